//! Email channel — SMTP sending via async lettre (STARTTLS).

use async_trait::async_trait;

use remailer_core::config::EmailConfig;
use remailer_core::error::{RemailerError, Result};
use remailer_core::traits::{ChannelSender, SendOutcome};
use remailer_core::types::{ChannelTag, Message};

/// SMTP sender. Constructed unconditionally; missing configuration or a
/// missing address surfaces as a `skipped` outcome at send time.
pub struct EmailSender {
    config: EmailConfig,
}

impl EmailSender {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn configured(&self) -> bool {
        !self.config.smtp_host.is_empty()
    }

    async fn deliver(&self, to: &str, message: &Message) -> Result<()> {
        use lettre::{
            AsyncSmtpTransport, AsyncTransport, Message as LettreMessage, message::Mailbox,
            message::header::ContentType, transport::smtp::authentication::Credentials,
        };

        let from_mailbox: Mailbox = match self.config.from_name.as_deref() {
            Some(name) => format!("{name} <{}>", self.config.from_address),
            None => self.config.from_address.clone(),
        }
        .parse()
        .map_err(|e| RemailerError::channel(format!("Invalid from address: {e}")))?;

        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| RemailerError::channel(format!("Invalid to address: {e}")))?;

        let subject = message.subject.as_deref().unwrap_or(&message.name);
        let email = LettreMessage::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| RemailerError::channel(format!("Build email: {e}")))?;

        let mut builder =
            AsyncSmtpTransport::<lettre::Tokio1Executor>::starttls_relay(&self.config.smtp_host)
                .map_err(|e| RemailerError::channel(format!("SMTP relay: {e}")))?
                .port(self.config.smtp_port);
        if !self.config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.clone(),
            ));
        }

        builder
            .build()
            .send(email)
            .await
            .map_err(|e| RemailerError::channel(format!("SMTP send: {e}")))?;

        tracing::info!("📤 Email sent to {to}");
        Ok(())
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn channel(&self) -> ChannelTag {
        ChannelTag::Email
    }

    async fn send(&self, message: &Message) -> SendOutcome {
        let Some(to) = message.email_to.as_deref().filter(|s| !s.is_empty()) else {
            return SendOutcome::skipped("No email target");
        };
        if !self.configured() {
            return SendOutcome::skipped("SMTP not configured");
        }
        match self.deliver(to, message).await {
            Ok(()) => SendOutcome::sent(),
            Err(e) => SendOutcome::error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use remailer_core::types::DeliveryStatus;

    fn message(email_to: Option<&str>) -> Message {
        Message {
            id: 1,
            name: "digest".into(),
            subject: None,
            body: "hello".into(),
            telegram_text: None,
            email_to: email_to.map(Into::into),
            telegram_chat_id: None,
            is_active: true,
            created_by: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_no_target_is_skipped() {
        let sender = EmailSender::new(EmailConfig::default());
        let outcome = sender.send(&message(None)).await;
        assert_eq!(outcome.status, DeliveryStatus::Skipped);
        assert_eq!(outcome.detail, "No email target");
    }

    #[tokio::test]
    async fn test_unconfigured_smtp_is_skipped() {
        let sender = EmailSender::new(EmailConfig::default());
        let outcome = sender.send(&message(Some("ops@example.com"))).await;
        assert_eq!(outcome.status, DeliveryStatus::Skipped);
        assert_eq!(outcome.detail, "SMTP not configured");
    }
}
