//! Outbound mail
//!
//! The account lifecycle only depends on the [`Mailer`] trait. Which
//! implementation runs is decided once at startup by [`build_mailer`].

pub mod smtp;
pub mod templates;

use std::sync::Arc;

use academy_core::MailConfig;
use async_trait::async_trait;
use thiserror::Error;

pub use smtp::SmtpMailer;

/// Mail delivery errors
#[derive(Debug, Error)]
pub enum MailError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// A rendered message ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError>;
}

/// Writes recipient and subject to the log and drops the body.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError> {
        // Bodies carry live tokens; never log them.
        tracing::info!(to = %mail.to, subject = %mail.subject, "Mail not sent (no SMTP relay configured)");
        Ok(())
    }
}

/// SMTP when a relay host is configured, log-only otherwise
pub fn build_mailer(config: &MailConfig) -> Result<Arc<dyn Mailer>, MailError> {
    match config.smtp_host.as_deref() {
        Some(host) => {
            tracing::info!(host, port = config.smtp_port, "Using SMTP mailer");
            Ok(Arc::new(SmtpMailer::new(config, host)?))
        }
        None => {
            tracing::warn!("SMTP_HOST not set, outgoing mail will only be logged");
            Ok(Arc::new(LogMailer))
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use recording::RecordingMailer;

#[cfg(any(test, feature = "test-utils"))]
mod recording {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Keeps every message in memory so tests can inspect them.
    #[derive(Debug, Default)]
    pub struct RecordingMailer {
        sent: Mutex<Vec<OutgoingMail>>,
        fail: AtomicBool,
    }

    impl RecordingMailer {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every following send fail with a transport error
        pub fn set_failing(&self, failing: bool) {
            self.fail.store(failing, Ordering::SeqCst);
        }

        pub fn sent(&self) -> Vec<OutgoingMail> {
            self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }

        pub fn sent_to(&self, address: &str) -> Vec<OutgoingMail> {
            self.sent()
                .into_iter()
                .filter(|m| m.to == address)
                .collect()
        }

        pub fn count(&self) -> usize {
            self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, mail: OutgoingMail) -> Result<(), MailError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(MailError::Transport("recording mailer set to fail".to_string()));
            }
            self.sent
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(mail);
            Ok(())
        }
    }
}
