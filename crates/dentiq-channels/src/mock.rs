//! Scriptable in-memory adapter for tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use dentiq_core::traits::ChannelAdapter;
use dentiq_core::types::{ChannelKind, ChannelStatus, DeliveryOutcome, MessagePayload};

/// Test double: replays scripted outcomes and records every send.
/// With an empty script every send reports `Delivered`.
pub struct MockAdapter {
    kind: ChannelKind,
    enabled: AtomicBool,
    script: Mutex<VecDeque<DeliveryOutcome>>,
    sent: Mutex<Vec<(String, MessagePayload)>>,
    slots: Mutex<Option<u32>>,
    latency_ms: AtomicU64,
}

impl MockAdapter {
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            enabled: AtomicBool::new(true),
            script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            slots: Mutex::new(None),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Queue the outcome the next send will report.
    pub fn push_outcome(&self, outcome: DeliveryOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    /// Everything that has been "sent" so far.
    pub fn sent(&self) -> Vec<(String, MessagePayload)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Limit the number of rate slots the adapter will grant.
    pub fn set_slots(&self, slots: u32) {
        *self.slots.lock().unwrap() = Some(slots);
    }

    /// Make every send sleep this long before reporting its outcome, to
    /// simulate a slow provider.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChannelAdapter for MockAdapter {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn send(&self, recipient: &str, payload: &MessagePayload) -> DeliveryOutcome {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), payload.clone()));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(DeliveryOutcome::Delivered)
    }

    async fn health_check(&self) -> ChannelStatus {
        ChannelStatus {
            channel: self.kind,
            enabled: self.is_enabled(),
            configured: true,
            last_health_check_at: Some(Utc::now()),
            last_error: None,
        }
    }

    fn try_acquire_slot(&self) -> bool {
        let mut slots = self.slots.lock().unwrap();
        match slots.as_mut() {
            None => true,
            Some(0) => false,
            Some(n) => {
                *n -= 1;
                true
            }
        }
    }
}
