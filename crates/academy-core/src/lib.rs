//! OpenAcademy core
//!
//! Configuration loading and small pure helpers shared by the API server
//! and the operator CLI.

pub mod config;
pub mod slugs;

pub use config::{
    AppConfig, AuthConfig, ConfigError, DatabaseConfig, FrontendConfig, LogFormat, LoggingConfig,
    MailConfig, ServerConfig, DEVELOPMENT_SIGNING_KEY,
};
pub use slugs::{slugify, unique_slug};
