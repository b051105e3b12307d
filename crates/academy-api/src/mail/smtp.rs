//! SMTP delivery through a STARTTLS relay

use academy_core::MailConfig;
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::PoolConfig;
use lettre::{Message, SmtpTransport, Transport};

use super::{MailError, Mailer, OutgoingMail};

/// Sends through a relay with `lettre`'s blocking transport, off the async runtime.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig, host: &str) -> Result<Self, MailError> {
        let from = format!("{} <{}>", config.from_name, config.from);
        let from: Mailbox = from.parse().map_err(|e| MailError::InvalidAddress {
            address: config.from.clone(),
            reason: format!("{e}"),
        })?;

        let mut builder = SmtpTransport::starttls_relay(host)
            .map_err(|e| MailError::Transport(e.to_string()))?
            .port(config.smtp_port)
            .pool_config(PoolConfig::new().max_size(4))
            .timeout(Some(std::time::Duration::from_secs(10)));

        if let (Some(username), Some(password)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    fn build_message(&self, mail: OutgoingMail) -> Result<Message, MailError> {
        let to: Mailbox = mail.to.parse().map_err(|e| MailError::InvalidAddress {
            address: mail.to.clone(),
            reason: format!("{e}"),
        })?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(mail.subject)
            .multipart(MultiPart::alternative_plain_html(mail.text, mail.html))
            .map_err(|e| MailError::Build(e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError> {
        let recipient = mail.to.clone();
        let message = self.build_message(mail)?;
        let transport = self.transport.clone();

        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| MailError::Transport(format!("mail task failed: {e}")))?
            .map_err(|e| MailError::Transport(e.to_string()))?;

        tracing::debug!(to = %recipient, "Mail sent");
        Ok(())
    }
}
