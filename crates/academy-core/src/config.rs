//! Configuration management
//!
//! Handles configuration from environment variables and TOML files with
//! defaults suitable for local development. Environment values always win
//! over file values.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Minimum HMAC-SHA256 signing key length in bytes.
pub const MIN_SIGNING_KEY_LEN: usize = 32;

/// Built-in signing key. Public, so only usable without a database.
pub const DEVELOPMENT_SIGNING_KEY: &str = "development-secret-key-change-in-production";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Signing key must be at least {MIN_SIGNING_KEY_LEN} bytes, got {0}")]
    WeakSigningKey(usize),

    #[error("JWT_SECRET must be set when DATABASE_URL is configured")]
    DevelopmentSigningKey,
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub mail: MailConfig,
    pub frontend: FrontendConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables on top of defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    /// Apply every recognised variable returned by `lookup`.
    ///
    /// Takes the lookup as a closure so callers (and tests) can feed values
    /// from somewhere other than the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server
        if let Some(host) = lookup("API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_var(&lookup, "API_PORT")? {
            self.server.port = port;
        }
        if let Some(origins) = lookup("CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // Database
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Some(size) = parse_var(&lookup, "DATABASE_POOL_SIZE")? {
            self.database.pool_size = size;
        }

        // Auth
        if let Some(secret) = lookup("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(issuer) = lookup("JWT_ISSUER") {
            self.auth.issuer = issuer;
        }
        if let Some(ttl) = parse_var(&lookup, "CHECKOUT_TOKEN_TTL_MINUTES")? {
            self.auth.checkout_ttl_minutes = ttl;
        }
        if let Some(memory) = parse_var(&lookup, "ARGON2_MEMORY_KIB")? {
            self.auth.argon2_memory_kib = memory;
        }
        if let Some(iterations) = parse_var(&lookup, "ARGON2_ITERATIONS")? {
            self.auth.argon2_iterations = iterations;
        }
        if let Some(parallelism) = parse_var(&lookup, "ARGON2_PARALLELISM")? {
            self.auth.argon2_parallelism = parallelism;
        }

        // Mail
        if let Some(from) = lookup("MAIL_FROM") {
            self.mail.from = from;
        }
        if let Some(host) = lookup("SMTP_HOST") {
            self.mail.smtp_host = Some(host).filter(|h| !h.trim().is_empty());
        }
        if let Some(port) = parse_var(&lookup, "SMTP_PORT")? {
            self.mail.smtp_port = port;
        }
        if let Some(username) = lookup("SMTP_USERNAME") {
            self.mail.smtp_username = Some(username);
        }
        if let Some(password) = lookup("SMTP_PASSWORD") {
            self.mail.smtp_password = Some(password);
        }

        // Frontend links
        if let Some(url) = lookup("FRONTEND_VERIFY_EMAIL_URL") {
            self.frontend.verify_email_url = url;
        }
        if let Some(url) = lookup("FRONTEND_RESET_PASSWORD_URL") {
            self.frontend.reset_password_url = url;
        }

        // Logging
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = parse_var(&lookup, "LOG_FORMAT")? {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Startup-time sanity checks.
    ///
    /// A signing key that is too short is a fatal misconfiguration: every
    /// session token issued with it would be forgeable. The same holds for
    /// the built-in development key once real accounts are persisted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let key_len = self.auth.jwt_secret.len();
        if key_len < MIN_SIGNING_KEY_LEN {
            return Err(ConfigError::WeakSigningKey(key_len));
        }
        if self.database.url.is_some() && self.auth.uses_development_key() {
            return Err(ConfigError::DevelopmentSigningKey);
        }
        if self.auth.checkout_ttl_minutes <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHECKOUT_TOKEN_TTL_MINUTES".to_string(),
                value: self.auth.checkout_ttl_minutes.to_string(),
            });
        }
        Ok(())
    }

    /// Address the HTTP server binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        None => Ok(None),
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Allowed origins for CORS (empty means same-origin only)
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: vec![],
        }
    }
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL. `None` selects the in-memory store.
    pub url: Option<String>,

    /// Connection pool size
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: 10,
        }
    }
}

/// Token signing and password hashing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared HMAC secret for session tokens
    pub jwt_secret: String,

    /// `iss` claim written into and required from every token
    pub issuer: String,

    /// Lifetime of email-verification and password-reset tokens
    pub checkout_ttl_minutes: i64,

    /// Argon2 memory cost in KiB
    pub argon2_memory_kib: u32,

    /// Argon2 iterations
    pub argon2_iterations: u32,

    /// Argon2 lanes
    pub argon2_parallelism: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEVELOPMENT_SIGNING_KEY.to_string(),
            issuer: "academy-api".to_string(),
            checkout_ttl_minutes: 15,
            argon2_memory_kib: 65536, // 64 MB
            argon2_iterations: 3,
            argon2_parallelism: 4,
        }
    }
}

impl AuthConfig {
    pub fn uses_development_key(&self) -> bool {
        self.jwt_secret == DEVELOPMENT_SIGNING_KEY
    }
}

/// Outbound mail settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// Sender address
    pub from: String,

    /// Display name used in the From header
    pub from_name: String,

    /// SMTP relay host. When absent mails are only logged.
    pub smtp_host: Option<String>,

    pub smtp_port: u16,

    pub smtp_username: Option<String>,

    #[serde(skip_serializing)]
    pub smtp_password: Option<String>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from: "no-reply@openacademy.local".to_string(),
            from_name: "OpenAcademy".to_string(),
            smtp_host: None,
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
        }
    }
}

/// Links embedded in outgoing mails
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontendConfig {
    pub verify_email_url: String,
    pub reset_password_url: String,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            verify_email_url: "http://localhost:3000/verify-email".to_string(),
            reset_password_url: "http://localhost:3000/reset-password".to_string(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "academy_api=debug,tower_http=info,audit=info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.auth.checkout_ttl_minutes, 15);
        assert!(config.database.url.is_none());
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_apply_env_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_env(lookup_from(&[
                ("API_PORT", "9090"),
                ("CORS_ORIGINS", "http://a.test, http://b.test,,"),
                ("DATABASE_URL", "postgres://localhost/academy"),
                ("CHECKOUT_TOKEN_TTL_MINUTES", "30"),
                ("LOG_FORMAT", "json"),
                ("SMTP_HOST", ""),
            ]))
            .unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.cors_origins, vec!["http://a.test", "http://b.test"]);
        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://localhost/academy")
        );
        assert_eq!(config.auth.checkout_ttl_minutes, 30);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.mail.smtp_host.is_none());
    }

    #[test]
    fn test_invalid_numeric_value() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(lookup_from(&[("API_PORT", "not-a-port")]))
            .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "API_PORT"));
    }

    #[test]
    fn test_weak_signing_key_rejected() {
        let mut config = AppConfig::default();
        config.auth.jwt_secret = "short".to_string();

        assert!(matches!(config.validate(), Err(ConfigError::WeakSigningKey(5))));
    }

    #[test]
    fn test_development_key_rejected_with_database() {
        let mut config = AppConfig::default();
        config.database.url = Some("postgres://localhost/academy".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DevelopmentSigningKey)
        ));

        config.auth.jwt_secret = "0123456789abcdef0123456789abcdef-prod".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_development_key_from_env_is_rejected() {
        let mut config = AppConfig::default();
        config
            .apply_env(lookup_from(&[
                ("DATABASE_URL", "postgres://localhost/academy"),
                ("JWT_SECRET", DEVELOPMENT_SIGNING_KEY),
            ]))
            .unwrap();

        assert!(config.auth.uses_development_key());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            port = 7000

            [auth]
            issuer = "academy-test"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.auth.issuer, "academy-test");
        assert_eq!(config.auth.checkout_ttl_minutes, 15);
    }
}
