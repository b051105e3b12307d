//! Response-side HTTP middleware
//!
//! Authentication and role checks live in [`crate::auth`].

pub mod security_headers;

pub use security_headers::security_headers_middleware;
