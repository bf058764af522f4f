//! SMTP email adapter — async lettre transport.
//!
//! Outbound only: this engine sends appointment notifications, it never
//! reads a mailbox. Address-parse and message-build problems are permanent;
//! SMTP transport errors are classified by the server's own verdict.

use async_trait::async_trait;
use chrono::Utc;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use dentiq_core::config::EmailConfig;
use dentiq_core::traits::ChannelAdapter;
use dentiq_core::types::{ChannelKind, ChannelStatus, DeliveryOutcome, MessagePayload};

use crate::rate::SendGate;

const PROBE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);
const DEFAULT_SUBJECT: &str = "Notificación de su clínica dental";

pub struct EmailAdapter {
    config: EmailConfig,
    /// None when the relay could not be constructed (bad host).
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    gate: SendGate,
}

impl EmailAdapter {
    pub fn new(config: EmailConfig) -> Self {
        let transport = if config.smtp_host.is_empty() {
            None
        } else {
            let creds = Credentials::new(config.from_address.clone(), config.password.clone());
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map(|builder| builder.port(config.smtp_port).credentials(creds).build())
                .map_err(|e| tracing::warn!("⚠️ SMTP relay setup failed: {e}"))
                .ok()
        };
        let gate = SendGate::new(config.max_per_minute);
        Self { config, transport, gate }
    }

    fn is_configured(&self) -> bool {
        self.transport.is_some() && !self.config.from_address.is_empty()
    }

    fn from_mailbox(&self) -> Result<Mailbox, String> {
        let name = self.config.display_name.as_deref().unwrap_or("Dentiq");
        format!("{name} <{}>", self.config.from_address)
            .parse()
            .map_err(|e| format!("invalid from address: {e}"))
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn send(&self, recipient: &str, payload: &MessagePayload) -> DeliveryOutcome {
        let Some(transport) = &self.transport else {
            return DeliveryOutcome::Permanent("email channel not configured".into());
        };

        let from = match self.from_mailbox() {
            Ok(m) => m,
            Err(e) => return DeliveryOutcome::Permanent(e),
        };
        let to: Mailbox = match recipient.parse() {
            Ok(m) => m,
            Err(e) => {
                return DeliveryOutcome::Permanent(format!("invalid recipient '{recipient}': {e}"));
            }
        };

        let subject = payload.subject.as_deref().unwrap_or(DEFAULT_SUBJECT);
        let email = match Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(payload.body.clone())
        {
            Ok(m) => m,
            Err(e) => return DeliveryOutcome::Permanent(format!("build email: {e}")),
        };

        match transport.send(email).await {
            Ok(_) => {
                tracing::debug!("📤 Email accepted for {recipient}");
                DeliveryOutcome::Delivered
            }
            Err(e) if e.is_permanent() => {
                DeliveryOutcome::Permanent(format!("SMTP rejected: {e}"))
            }
            Err(e) => DeliveryOutcome::Transient(format!("SMTP send: {e}")),
        }
    }

    async fn health_check(&self) -> ChannelStatus {
        let mut status = ChannelStatus {
            channel: ChannelKind::Email,
            enabled: self.config.enabled,
            configured: self.is_configured(),
            last_health_check_at: Some(Utc::now()),
            last_error: None,
        };
        let Some(transport) = &self.transport else {
            status.last_error = Some("smtp_host missing or relay setup failed".into());
            return status;
        };

        match tokio::time::timeout(PROBE_TIMEOUT, transport.test_connection()).await {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => status.last_error = Some("SMTP NOOP refused".into()),
            Ok(Err(e)) => status.last_error = Some(format!("SMTP probe: {e}")),
            Err(_) => status.last_error = Some("SMTP probe timed out".into()),
        }
        status
    }

    fn try_acquire_slot(&self) -> bool {
        self.gate.try_acquire()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_send_is_permanent() {
        let adapter = EmailAdapter::new(EmailConfig::default());
        let outcome = adapter
            .send("laura@example.com", &MessagePayload::body("hola"))
            .await;
        assert!(matches!(outcome, DeliveryOutcome::Permanent(_)));
    }

    #[tokio::test]
    async fn test_malformed_recipient_is_permanent() {
        let adapter = EmailAdapter::new(EmailConfig {
            enabled: true,
            smtp_host: "smtp.example.com".into(),
            from_address: "clinica@example.com".into(),
            password: "secret".into(),
            ..Default::default()
        });
        let outcome = adapter
            .send("not-an-address", &MessagePayload::body("hola"))
            .await;
        match outcome {
            DeliveryOutcome::Permanent(reason) => assert!(reason.contains("invalid recipient")),
            other => panic!("expected Permanent, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_health_check_unconfigured() {
        let adapter = EmailAdapter::new(EmailConfig::default());
        let status = adapter.health_check().await;
        assert_eq!(status.channel, ChannelKind::Email);
        assert!(!status.configured);
        assert!(status.last_error.is_some());
    }
}
