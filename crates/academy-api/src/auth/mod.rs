//! Authentication and authorization
//!
//! - Signed session tokens and checkout token seeds (HS256)
//! - Password hashing with Argon2
//! - One-time checkout tokens for email verification and password reset
//! - The per-request authentication gate and the role policy
//! - The account lifecycle service

pub mod checkout;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod policy;
pub mod repository;
pub mod service;

pub use checkout::{CheckoutError, CheckoutTokens};
pub use jwt::{Claims, SignedTokenCodec, TokenCategory, TokenError};
pub use middleware::{authentication_gate, bearer_token, SecurityContext};
pub use models::{Account, AuthResponse, Role, TokenPurpose, UserView};
pub use password::{validate_password_strength, PasswordConfig, PasswordHasher};
pub use policy::{authorize, require_role};
pub use repository::{AccountStore, CheckoutTokenStore, RepositoryError, UserDirectory};
pub use service::{
    AccountLifecycleService, ForgotPasswordRequest, LifecycleSettings, LoginRequest,
    RegisterRequest, ResendRequest, ResetPasswordRequest, UpdateUsernameRequest,
    VerifyEmailQuery,
};
