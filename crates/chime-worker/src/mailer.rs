//! Mail transport.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use crate::MailError;

/// Sends one plain-text message.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

/// SMTP connection settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Sender address. Defaults to `username` when unset.
    pub from: Option<String>,
    /// Upgrade the connection with STARTTLS. Plaintext otherwise.
    pub starttls: bool,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 587,
            username: None,
            password: None,
            from: None,
            starttls: true,
        }
    }
}

/// [`Mailer`] over SMTP.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let sender = config
            .from
            .as_deref()
            .or(config.username.as_deref())
            .unwrap_or("chime@localhost");
        let from = parse_mailbox(sender)?;

        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };
        let mut builder = builder.port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let message = build_message(&self.from, to, subject, body)?;
        self.transport.send(message).await?;
        debug!(to, "mail sent");
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address.parse().map_err(|e: lettre::address::AddressError| MailError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

fn build_message(from: &Mailbox, to: &str, subject: &str, body: &str) -> Result<Message, MailError> {
    Ok(Message::builder()
        .from(from.clone())
        .to(parse_mailbox(to)?)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_plain_text_message() {
        let from = parse_mailbox("alarms@example.com").unwrap();
        let message = build_message(&from, "ada@example.com", "Wake up", "Time to go").unwrap();

        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("To: ada@example.com"));
        assert!(raw.contains("Subject: Wake up"));
        assert!(raw.contains("Time to go"));
    }

    #[test]
    fn rejects_bad_recipient() {
        let from = parse_mailbox("alarms@example.com").unwrap();
        assert!(matches!(
            build_message(&from, "not an address", "s", "b"),
            Err(MailError::InvalidAddress { .. })
        ));
    }

    #[tokio::test]
    async fn plaintext_transport_builds_without_connecting() {
        let mailer = SmtpMailer::new(&SmtpConfig {
            host: "127.0.0.1".to_string(),
            port: 2525,
            starttls: false,
            from: Some("alarms@example.com".to_string()),
            ..SmtpConfig::default()
        });
        assert!(mailer.is_ok());
    }
}
