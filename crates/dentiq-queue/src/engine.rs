//! Queue engine — the dispatch loop over the job store.
//!
//! Workers pull due Pending jobs, claim them with a compare-and-set against
//! the store, hand them to the matching channel adapter, and record the
//! classified outcome. Concurrency is bounded by a semaphore; the claim in
//! the store is what guarantees a job is processed by exactly one worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::sync::{Semaphore, watch};

use dentiq_core::config::QueueConfig;
use dentiq_core::error::Result;
use dentiq_core::traits::ChannelAdapter;
use dentiq_core::types::{ChannelKind, ChannelStatus, DeliveryOutcome, JobStatus, NotificationJob};
use dentiq_store::{JobStore, QueueCounts};

use crate::backoff::retry_delay;

/// Snapshot of queue state plus in-process throughput.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub counts: QueueCounts,
    pub sent_total: u64,
    pub failed_total: u64,
    pub dead_total: u64,
    pub deferred_total: u64,
    /// Successful sends per minute since the engine started.
    pub sent_per_minute: f64,
}

/// Health of the store and every registered channel.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub healthy: bool,
    pub store_reachable: bool,
    pub channels: Vec<ChannelStatus>,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    failed: AtomicU64,
    dead: AtomicU64,
    deferred: AtomicU64,
}

/// Dispatch loop over the job store.
pub struct QueueEngine {
    store: Arc<JobStore>,
    adapters: HashMap<ChannelKind, Arc<dyn ChannelAdapter>>,
    config: QueueConfig,
    permits: Arc<Semaphore>,
    counters: Counters,
    started_at: DateTime<Utc>,
}

impl QueueEngine {
    pub fn new(store: Arc<JobStore>, config: QueueConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.workers.max(1)));
        Self {
            store,
            adapters: HashMap::new(),
            config,
            permits,
            counters: Counters::default(),
            started_at: Utc::now(),
        }
    }

    /// Register the adapter responsible for one channel.
    pub fn register_adapter(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        tracing::info!("🔌 Channel adapter registered: {}", adapter.kind());
        self.adapters.insert(adapter.kind(), adapter);
    }

    /// One pass over due jobs: claim and dispatch up to `batch_size` of
    /// them on the worker pool. Returns the number of jobs dispatched.
    /// All sends spawned by this pass complete before it returns.
    pub async fn tick(self: &Arc<Self>) -> usize {
        let now = Utc::now();
        let due = match self.store.due_jobs(now, self.config.batch_size) {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!("⚠️ Due-job scan failed: {e}");
                return 0;
            }
        };
        if due.is_empty() {
            return 0;
        }

        let mut handles = Vec::new();
        for job in due {
            let Some(adapter) = self.adapters.get(&job.channel).cloned() else {
                // No adapter for the channel — a claim would just strand the
                // job in Processing, so fail it directly.
                self.record_permanent(&job.id, 0, "no adapter for channel");
                continue;
            };

            // Rate cap: leave the job Pending and nudge it forward. No
            // attempt is consumed.
            if !adapter.try_acquire_slot() {
                let nudge = Duration::seconds(rand::thread_rng().gen_range(45..=75));
                if let Err(e) = self.store.defer(&job.id, now + nudge) {
                    tracing::warn!("⚠️ Defer failed for {}: {e}", job.id);
                }
                self.counters.deferred.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("🐢 Rate cap hit on {}, deferred {}", job.channel, job.id);
                continue;
            }

            match self.store.claim(&job.id) {
                Ok(true) => {}
                Ok(false) => continue, // another worker won the claim
                Err(e) => {
                    tracing::warn!("⚠️ Claim failed for {}: {e}", job.id);
                    continue;
                }
            }

            let engine = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let _permit = engine.permits.acquire().await;
                engine.process(adapter, job).await;
            }));
        }

        let dispatched = handles.len();
        for handle in handles {
            let _ = handle.await;
        }
        dispatched
    }

    /// Send one claimed job and record the classified outcome.
    async fn process(&self, adapter: Arc<dyn ChannelAdapter>, job: NotificationJob) {
        if !adapter.is_enabled() {
            self.record_permanent(&job.id, job.attempts, "channel disabled");
            return;
        }

        let send_timeout = std::time::Duration::from_secs(self.config.send_timeout_secs);
        let outcome =
            match tokio::time::timeout(send_timeout, adapter.send(&job.recipient, &job.payload))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => DeliveryOutcome::Transient(format!(
                    "send timed out after {}s",
                    self.config.send_timeout_secs
                )),
            };

        match outcome {
            DeliveryOutcome::Delivered => {
                if let Err(e) = self.store.mark_sent(&job.id) {
                    tracing::warn!("⚠️ mark_sent failed for {}: {e}", job.id);
                    return;
                }
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
                tracing::info!("✅ Sent {} via {} to {}", job.id, job.channel, job.recipient);
            }
            DeliveryOutcome::Transient(reason) => {
                let attempts = job.attempts + 1;
                if attempts < job.max_attempts {
                    let delay = retry_delay(
                        self.config.backoff_base_secs,
                        self.config.backoff_cap_secs,
                        attempts,
                    );
                    if let Err(e) =
                        self.store.reschedule(&job.id, attempts, Utc::now() + delay, &reason)
                    {
                        tracing::warn!("⚠️ Reschedule failed for {}: {e}", job.id);
                        return;
                    }
                    tracing::info!(
                        "🔁 Transient failure on {} (attempt {attempts}/{}), retry in {}s: {reason}",
                        job.id,
                        job.max_attempts,
                        delay.num_seconds()
                    );
                } else {
                    if let Err(e) = self.store.mark_dead(&job.id, attempts, &reason) {
                        tracing::warn!("⚠️ mark_dead failed for {}: {e}", job.id);
                        return;
                    }
                    self.counters.dead.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("💀 Job {} dead after {attempts} attempts: {reason}", job.id);
                }
            }
            DeliveryOutcome::Permanent(reason) => {
                self.record_permanent(&job.id, job.attempts, &reason);
            }
        }
    }

    fn record_permanent(&self, id: &str, attempts: u32, reason: &str) {
        if let Err(e) = self.store.mark_failed(id, reason) {
            tracing::warn!("⚠️ mark_failed failed for {id}: {e}");
            return;
        }
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("❌ Job {id} failed permanently (attempt {attempts}): {reason}");
    }

    /// Store counts plus in-process throughput.
    pub fn queue_stats(&self) -> Result<QueueStats> {
        let counts = self.store.queue_counts()?;
        let sent_total = self.counters.sent.load(Ordering::Relaxed);
        let elapsed_mins =
            ((Utc::now() - self.started_at).num_seconds().max(1) as f64) / 60.0;
        Ok(QueueStats {
            counts,
            sent_total,
            failed_total: self.counters.failed.load(Ordering::Relaxed),
            dead_total: self.counters.dead.load(Ordering::Relaxed),
            deferred_total: self.counters.deferred.load(Ordering::Relaxed),
            sent_per_minute: sent_total as f64 / elapsed_mins,
        })
    }

    /// Probe the store and every adapter. An unhealthy dependency is
    /// reported here; it never halts the process.
    pub async fn service_status(&self) -> ServiceStatus {
        let store_reachable = self.store.ping();
        let mut channels = Vec::with_capacity(self.adapters.len());
        for adapter in self.adapters.values() {
            channels.push(adapter.health_check().await);
        }
        channels.sort_by_key(|c| c.channel.as_str());
        let healthy = store_reachable
            && channels
                .iter()
                .filter(|c| c.enabled)
                .all(|c| c.last_error.is_none());
        ServiceStatus { healthy, store_reachable, channels }
    }

    /// Delete Failed/Dead jobs older than `days`. Returns the removed count.
    pub fn cleanup_failed_jobs(&self, days: i64) -> Result<u64> {
        self.store.purge_terminal(Utc::now() - Duration::days(days))
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }
}

/// Background dispatch loop. Polls every `poll_interval_secs` until the
/// shutdown flag flips.
pub async fn spawn_queue_loop(engine: Arc<QueueEngine>, mut shutdown: watch::Receiver<bool>) {
    let interval = std::time::Duration::from_secs(engine.config.poll_interval_secs.max(1));
    tracing::info!(
        "⚙️ Queue engine started ({} workers, poll every {}s)",
        engine.config.workers,
        interval.as_secs()
    );
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let dispatched = engine.tick().await;
                if dispatched > 0 {
                    tracing::debug!("Queue pass dispatched {dispatched} job(s)");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("⚙️ Queue engine stopping");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dentiq_channels::MockAdapter;
    use dentiq_core::types::{MessagePayload, NotificationKind};
    use dentiq_store::ResendOutcome;

    fn test_config() -> QueueConfig {
        QueueConfig {
            backoff_base_secs: 0, // retries become due immediately
            ..Default::default()
        }
    }

    fn setup(kind: ChannelKind) -> (Arc<QueueEngine>, Arc<JobStore>, Arc<MockAdapter>) {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let adapter = Arc::new(MockAdapter::new(kind));
        let mut engine = QueueEngine::new(store.clone(), test_config());
        engine.register_adapter(adapter.clone());
        (Arc::new(engine), store, adapter)
    }

    fn insert_job(store: &JobStore, channel: ChannelKind) -> NotificationJob {
        let job = NotificationJob::new(
            Some("apt-1".into()),
            "pat-1",
            channel,
            NotificationKind::Confirmation,
            "+34600111222",
            MessagePayload::body("su cita"),
            3,
            Utc::now(),
        );
        store.insert(&job).unwrap();
        job
    }

    #[tokio::test]
    async fn test_delivered_job_lands_on_sent() {
        let (engine, store, adapter) = setup(ChannelKind::WhatsApp);
        let job = insert_job(&store, ChannelKind::WhatsApp);

        assert_eq!(engine.tick().await, 1);
        let done = store.get(&job.id).unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Sent);
        assert_eq!(adapter.sent().len(), 1);
        assert_eq!(adapter.sent()[0].0, "+34600111222");
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_into_dead() {
        let (engine, store, adapter) = setup(ChannelKind::WhatsApp);
        let job = insert_job(&store, ChannelKind::WhatsApp);
        for _ in 0..3 {
            adapter.push_outcome(DeliveryOutcome::Transient("provider 503".into()));
        }

        // attempt 1 and 2: rescheduled, still pending
        engine.tick().await;
        let j = store.get(&job.id).unwrap().unwrap();
        assert_eq!((j.status, j.attempts), (JobStatus::Pending, 1));
        engine.tick().await;
        let j = store.get(&job.id).unwrap().unwrap();
        assert_eq!((j.status, j.attempts), (JobStatus::Pending, 2));

        // attempt 3: budget exhausted
        engine.tick().await;
        let j = store.get(&job.id).unwrap().unwrap();
        assert_eq!(j.status, JobStatus::Dead);
        assert_eq!(j.attempts, 3);
        assert!(j.attempts <= j.max_attempts);

        // manual resend opens a fresh cycle
        assert_eq!(store.resend(&job.id).unwrap(), ResendOutcome::Reset);
        let j = store.get(&job.id).unwrap().unwrap();
        assert_eq!((j.status, j.attempts), (JobStatus::Pending, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_send_times_out_as_transient() {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let adapter = Arc::new(MockAdapter::new(ChannelKind::WhatsApp));
        let mut engine = QueueEngine::new(
            store.clone(),
            QueueConfig {
                send_timeout_secs: 1,
                backoff_base_secs: 0,
                ..Default::default()
            },
        );
        engine.register_adapter(adapter.clone());
        let engine = Arc::new(engine);

        let job = insert_job(&store, ChannelKind::WhatsApp);
        adapter.set_latency(std::time::Duration::from_secs(5));

        assert_eq!(engine.tick().await, 1);
        let j = store.get(&job.id).unwrap().unwrap();
        assert_eq!((j.status, j.attempts), (JobStatus::Pending, 1));
        assert!(j.last_error.unwrap().contains("timed out after 1s"));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let (engine, store, adapter) = setup(ChannelKind::Email);
        let job = insert_job(&store, ChannelKind::Email);
        adapter.push_outcome(DeliveryOutcome::Permanent("invalid recipient".into()));

        engine.tick().await;
        let j = store.get(&job.id).unwrap().unwrap();
        assert_eq!(j.status, JobStatus::Failed);
        assert_eq!(j.last_error.as_deref(), Some("invalid recipient"));

        // Nothing left to dispatch.
        assert_eq!(engine.tick().await, 0);
        assert_eq!(adapter.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_rate_cap_defers_without_consuming_attempts() {
        let (engine, store, adapter) = setup(ChannelKind::WhatsApp);
        let job = insert_job(&store, ChannelKind::WhatsApp);
        adapter.set_slots(0);

        assert_eq!(engine.tick().await, 0);
        let j = store.get(&job.id).unwrap().unwrap();
        assert_eq!(j.status, JobStatus::Pending);
        assert_eq!(j.attempts, 0);
        assert!(j.next_attempt_at > Utc::now());
        assert!(adapter.sent().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_channel_fails_permanently() {
        let (engine, store, adapter) = setup(ChannelKind::Email);
        let job = insert_job(&store, ChannelKind::Email);
        adapter.set_enabled(false);

        engine.tick().await;
        let j = store.get(&job.id).unwrap().unwrap();
        assert_eq!(j.status, JobStatus::Failed);
        assert!(adapter.sent().is_empty());
    }

    #[tokio::test]
    async fn test_missing_adapter_fails_job() {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let engine = Arc::new(QueueEngine::new(store.clone(), test_config()));
        let job = insert_job(&store, ChannelKind::WhatsApp);

        engine.tick().await;
        let j = store.get(&job.id).unwrap().unwrap();
        assert_eq!(j.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_queue_stats_and_service_status() {
        let (engine, store, _adapter) = setup(ChannelKind::WhatsApp);
        insert_job(&store, ChannelKind::WhatsApp);
        engine.tick().await;

        let stats = engine.queue_stats().unwrap();
        assert_eq!(stats.sent_total, 1);
        assert_eq!(stats.counts.sent, 1);
        assert_eq!(stats.counts.pending, 0);

        let status = engine.service_status().await;
        assert!(status.store_reachable);
        assert!(status.healthy);
        assert_eq!(status.channels.len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_delegates_to_store() {
        let (engine, store, adapter) = setup(ChannelKind::Email);
        let job = insert_job(&store, ChannelKind::Email);
        adapter.push_outcome(DeliveryOutcome::Permanent("bad".into()));
        engine.tick().await;
        assert_eq!(store.get(&job.id).unwrap().unwrap().status, JobStatus::Failed);

        // Freshly failed job survives a 7-day retention cleanup.
        assert_eq!(engine.cleanup_failed_jobs(7).unwrap(), 0);
        // A zero-day retention removes it.
        assert_eq!(engine.cleanup_failed_jobs(-1).unwrap(), 1);
    }
}
