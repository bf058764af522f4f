//! Named-task registry and tick loop.
//!
//! Each task owns a tokio `Mutex<()>` run lock, so a scheduled tick and a
//! manual run of the same task can never overlap. Runners execute inside a
//! spawned tokio task, so a panic in one runner is contained to that run
//! and surfaces as `RunStatus::Error`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex as TokioMutex, watch};

use dentiq_core::error::{DentiqError, Result};

use crate::tasks::{RunStatus, Schedule, ScheduledTask, TaskRunner};

struct TaskEntry {
    state: StdMutex<ScheduledTask>,
    run_lock: TokioMutex<()>,
    runner: Arc<dyn TaskRunner>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub initialized: bool,
    pub task_count: usize,
    pub enabled_count: usize,
    pub tick_count: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
}

/// Task registry. Built once at startup via `register`, then driven by
/// `spawn_scheduler` (or `tick` directly in tests).
pub struct TaskScheduler {
    tasks: Vec<Arc<TaskEntry>>,
    initialized: AtomicBool,
    ticks: AtomicU64,
    last_tick_at: StdMutex<Option<DateTime<Utc>>>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            initialized: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
            last_tick_at: StdMutex::new(None),
        }
    }

    /// Add a task to the registry. Names must be unique and cron
    /// expressions parsable, both rejected as `Validation` otherwise.
    pub fn register(
        &mut self,
        name: &str,
        schedule: Schedule,
        runner: Arc<dyn TaskRunner>,
    ) -> Result<()> {
        if self.find(name).is_some() {
            return Err(DentiqError::Validation(format!(
                "task '{name}' is already registered"
            )));
        }
        let task = ScheduledTask::new(name, schedule);
        if task.next_run_at.is_none() {
            return Err(DentiqError::Validation(format!(
                "task '{name}' has an invalid schedule"
            )));
        }
        tracing::info!("📅 Task registered: '{}' ({})", task.name, task.schedule);
        self.tasks.push(Arc::new(TaskEntry {
            state: StdMutex::new(task),
            run_lock: TokioMutex::new(()),
            runner,
        }));
        Ok(())
    }

    fn find(&self, name: &str) -> Option<&Arc<TaskEntry>> {
        self.tasks
            .iter()
            .find(|entry| entry.state.lock().unwrap().name == name)
    }

    /// One pass over the registry. A due disabled task records Skipped and
    /// advances without running or touching `last_run_at`. Returns how many
    /// tasks executed.
    pub async fn tick(&self) -> usize {
        let now = Utc::now();
        self.initialized.store(true, Ordering::Relaxed);
        self.ticks.fetch_add(1, Ordering::Relaxed);
        *self.last_tick_at.lock().unwrap() = Some(now);

        let mut fired = 0;
        for entry in &self.tasks {
            let (due, enabled, name) = {
                let state = entry.state.lock().unwrap();
                (
                    state.next_run_at.is_some_and(|at| at <= now),
                    state.enabled,
                    state.name.clone(),
                )
            };
            if !due {
                continue;
            }
            if !enabled {
                tracing::debug!("⏭️ Task '{name}' due but disabled, skipping");
                let mut state = entry.state.lock().unwrap();
                state.last_run_status = Some(RunStatus::Skipped);
                state.next_run_at = state.schedule.next_after(now);
                continue;
            }
            // A manual run in flight keeps the lock; try again next tick.
            let Ok(_guard) = entry.run_lock.try_lock() else {
                tracing::debug!("Task '{name}' still running, tick skipped");
                continue;
            };
            fired += 1;
            let outcome = run_isolated(&name, entry.runner.clone()).await;
            let mut state = entry.state.lock().unwrap();
            state.last_run_at = Some(now);
            state.run_count += 1;
            state.last_run_status = Some(match outcome {
                Ok(_) => RunStatus::Ok,
                Err(message) => RunStatus::Error(message),
            });
            state.next_run_at = state.schedule.next_after(Utc::now());
        }
        fired
    }

    /// Run a task right now, outside its schedule. Rejected with
    /// `Validation` when the task is mid-run; the call never waits. Manual
    /// runs do not move `next_run_at`.
    pub async fn run_task_manually(&self, name: &str) -> Result<String> {
        let entry = self
            .find(name)
            .ok_or_else(|| DentiqError::TaskNotFound(name.to_string()))?
            .clone();
        let Ok(_guard) = entry.run_lock.try_lock() else {
            return Err(DentiqError::Validation(format!(
                "task '{name}' is already running"
            )));
        };

        tracing::info!("▶️ Manual run: '{name}'");
        let started = Utc::now();
        let outcome = run_isolated(name, entry.runner.clone()).await;
        let mut state = entry.state.lock().unwrap();
        state.last_run_at = Some(started);
        state.run_count += 1;
        match outcome {
            Ok(summary) => {
                state.last_run_status = Some(RunStatus::Ok);
                Ok(summary)
            }
            Err(message) => {
                state.last_run_status = Some(RunStatus::Error(message.clone()));
                Err(DentiqError::TaskFailed {
                    name: name.to_string(),
                    message,
                })
            }
        }
    }

    /// Flip a task's enabled flag. Returns whether the task existed.
    pub fn toggle_task(&self, name: &str, enabled: bool) -> bool {
        match self.find(name) {
            Some(entry) => {
                let mut state = entry.state.lock().unwrap();
                state.enabled = enabled;
                tracing::info!(
                    "🔀 Task '{name}' {}",
                    if enabled { "enabled" } else { "disabled" }
                );
                true
            }
            None => false,
        }
    }

    pub fn tasks_status(&self) -> Vec<ScheduledTask> {
        self.tasks
            .iter()
            .map(|entry| entry.state.lock().unwrap().clone())
            .collect()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        let enabled_count = self
            .tasks
            .iter()
            .filter(|entry| entry.state.lock().unwrap().enabled)
            .count();
        SchedulerStats {
            initialized: self.initialized.load(Ordering::Relaxed),
            task_count: self.tasks.len(),
            enabled_count,
            tick_count: self.ticks.load(Ordering::Relaxed),
            last_tick_at: *self.last_tick_at.lock().unwrap(),
        }
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Execute a runner in its own tokio task so a panic is caught as a
/// JoinError instead of tearing down the tick loop.
async fn run_isolated(
    name: &str,
    runner: Arc<dyn TaskRunner>,
) -> std::result::Result<String, String> {
    let outcome = tokio::spawn(async move { runner.run().await }).await;
    match outcome {
        Ok(Ok(summary)) => {
            tracing::info!("✅ Task '{name}' completed: {summary}");
            Ok(summary)
        }
        Ok(Err(e)) => {
            tracing::warn!("⚠️ Task '{name}' failed: {e}");
            Err(e.to_string())
        }
        Err(join_err) => {
            tracing::warn!("⚠️ Task '{name}' panicked: {join_err}");
            Err(format!("panicked: {join_err}"))
        }
    }
}

/// Background tick loop. Runs until the shutdown flag flips.
pub async fn spawn_scheduler(
    scheduler: Arc<TaskScheduler>,
    tick_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("⏰ Scheduler started (tick every {tick_secs}s)");
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(tick_secs));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                scheduler.tick().await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("⏰ Scheduler stopping");
                    break;
                }
            }
        }
    }
}
