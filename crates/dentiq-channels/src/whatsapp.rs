//! WhatsApp Business Cloud API adapter.
//!
//! Sends patient notifications through the official WhatsApp Business
//! Platform (Cloud API). Requires an access token and phone number ID from
//! Meta Business Suite.

use async_trait::async_trait;
use chrono::Utc;

use dentiq_core::config::WhatsAppConfig;
use dentiq_core::traits::ChannelAdapter;
use dentiq_core::types::{ChannelKind, ChannelStatus, DeliveryOutcome, MessagePayload};

use crate::rate::SendGate;

const GRAPH_BASE: &str = "https://graph.facebook.com/v21.0";
const PROBE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

pub struct WhatsAppAdapter {
    config: WhatsAppConfig,
    client: reqwest::Client,
    gate: SendGate,
}

impl WhatsAppAdapter {
    pub fn new(config: WhatsAppConfig) -> Self {
        let gate = SendGate::new(config.max_per_minute);
        Self {
            config,
            client: reqwest::Client::new(),
            gate,
        }
    }

    fn is_configured(&self) -> bool {
        !self.config.access_token.is_empty() && !self.config.phone_number_id.is_empty()
    }

    async fn send_text(&self, to: &str, text: &str) -> DeliveryOutcome {
        let url = format!("{GRAPH_BASE}/{}/messages", self.config.phone_number_id);
        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": {
                "preview_url": false,
                "body": text
            }
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.access_token))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            // Connect/timeout level trouble — the provider may be fine later.
            Err(e) => return DeliveryOutcome::Transient(format!("WhatsApp request failed: {e}")),
        };

        let status = response.status();
        if status.is_success() {
            let msg_id = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v["messages"][0]["id"].as_str().map(String::from))
                .unwrap_or_else(|| "unknown".into());
            tracing::debug!("WhatsApp message accepted: {msg_id} → {to}");
            return DeliveryOutcome::Delivered;
        }

        let detail = response.text().await.unwrap_or_default();
        if status.is_server_error() || status.as_u16() == 429 {
            DeliveryOutcome::Transient(format!("WhatsApp API {status}: {detail}"))
        } else {
            // 4xx: bad recipient, malformed number, token rejection.
            DeliveryOutcome::Permanent(format!("WhatsApp API {status}: {detail}"))
        }
    }
}

#[async_trait]
impl ChannelAdapter for WhatsAppAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::WhatsApp
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn send(&self, recipient: &str, payload: &MessagePayload) -> DeliveryOutcome {
        if !self.is_configured() {
            return DeliveryOutcome::Permanent("WhatsApp channel not configured".into());
        }
        if recipient.trim().is_empty() {
            return DeliveryOutcome::Permanent("empty phone number".into());
        }
        self.send_text(recipient, &payload.body).await
    }

    async fn health_check(&self) -> ChannelStatus {
        let mut status = ChannelStatus {
            channel: ChannelKind::WhatsApp,
            enabled: self.config.enabled,
            configured: self.is_configured(),
            last_health_check_at: Some(Utc::now()),
            last_error: None,
        };
        if !status.configured {
            status.last_error = Some("access_token / phone_number_id missing".into());
            return status;
        }

        // Verify the token by fetching the phone-number resource.
        let url = format!("{GRAPH_BASE}/{}", self.config.phone_number_id);
        let probe = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.config.access_token))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;
        match probe {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => {
                status.last_error = Some(format!("token verification failed: {}", resp.status()));
            }
            Err(e) => {
                status.last_error = Some(format!("probe failed: {e}"));
            }
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
        let adapter = WhatsAppAdapter::new(WhatsAppConfig {
            enabled: true,
            ..Default::default()
        });
        let outcome = adapter
            .send("+34600111222", &MessagePayload::body("hola"))
            .await;
        assert!(matches!(outcome, DeliveryOutcome::Permanent(_)));
    }

    #[tokio::test]
    async fn test_empty_recipient_is_permanent() {
        let adapter = WhatsAppAdapter::new(WhatsAppConfig {
            enabled: true,
            access_token: "tok".into(),
            phone_number_id: "123".into(),
            ..Default::default()
        });
        let outcome = adapter.send("  ", &MessagePayload::body("hola")).await;
        assert!(matches!(outcome, DeliveryOutcome::Permanent(_)));
    }

    #[tokio::test]
    async fn test_health_check_reports_unconfigured() {
        let adapter = WhatsAppAdapter::new(WhatsAppConfig::default());
        let status = adapter.health_check().await;
        assert!(!status.configured);
        assert!(status.last_error.is_some());
        assert!(status.last_health_check_at.is_some());
    }

    #[test]
    fn test_rate_slots_follow_config() {
        let adapter = WhatsAppAdapter::new(WhatsAppConfig {
            max_per_minute: 2,
            ..Default::default()
        });
        assert!(adapter.try_acquire_slot());
        assert!(adapter.try_acquire_slot());
        assert!(!adapter.try_acquire_slot());
    }
}
