//! Dentiq configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DentiqError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DentiqConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub reminder: ReminderConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

impl DentiqConfig {
    /// Load config from the default path (~/.dentiq/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DentiqError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| DentiqError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the given path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| DentiqError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Dentiq home directory (~/.dentiq).
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".dentiq")
    }
}

/// Job store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "~/.dentiq/notifications.db".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { db_path: default_db_path() }
    }
}

/// Queue engine configuration — worker pool, polling, retry policy.
/// Backoff is explicit here rather than inferred from a queue library:
/// delay = backoff_base_secs * 2^attempts, capped at backoff_cap_secs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_secs: u64,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

fn default_workers() -> usize { 4 }
fn default_poll_interval() -> u64 { 5 }
fn default_batch_size() -> usize { 16 }
fn default_max_attempts() -> u32 { 3 }
fn default_backoff_base() -> u64 { 30 }
fn default_backoff_cap() -> u64 { 3600 }
fn default_send_timeout() -> u64 { 30 }

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base(),
            backoff_cap_secs: default_backoff_cap(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

/// Reminder scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    /// Reminders are dispatched this long before appointment start.
    #[serde(default = "default_lead_time")]
    pub lead_time_hours: i64,
    /// The periodic scan looks this far ahead for upcoming appointments.
    #[serde(default = "default_scan_window")]
    pub scan_window_hours: i64,
}

fn default_lead_time() -> i64 { 24 }
fn default_scan_window() -> i64 { 24 }

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            lead_time_hours: default_lead_time(),
            scan_window_hours: default_scan_window(),
        }
    }
}

/// Terminal-job retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_retention_days() -> i64 { 30 }

impl Default for CleanupConfig {
    fn default() -> Self {
        Self { retention_days: default_retention_days() }
    }
}

/// Scheduler tick and task schedules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// 5-field cron spec for the daily reminder scan.
    #[serde(default = "default_reminder_cron")]
    pub reminder_cron: String,
    /// 5-field cron spec for the nightly cleanup.
    #[serde(default = "default_cleanup_cron")]
    pub cleanup_cron: String,
}

fn default_tick_secs() -> u64 { 30 }
fn default_reminder_cron() -> String { "0 7 * * *".into() }
fn default_cleanup_cron() -> String { "30 3 * * *".into() }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            reminder_cron: default_reminder_cron(),
            cleanup_cron: default_cleanup_cron(),
        }
    }
}

/// Channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub whatsapp: Option<WhatsAppConfig>,
    #[serde(default)]
    pub email: Option<EmailConfig>,
}

/// WhatsApp Business Cloud API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Facebook Graph API access token.
    #[serde(default)]
    pub access_token: String,
    /// WhatsApp Phone Number ID.
    #[serde(default)]
    pub phone_number_id: String,
    #[serde(default = "default_wa_per_minute")]
    pub max_per_minute: u32,
}

fn default_wa_per_minute() -> u32 { 20 }

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            access_token: String::new(),
            phone_number_id: String::new(),
            max_per_minute: default_wa_per_minute(),
        }
    }
}

/// SMTP email configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub from_address: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_email_per_minute")]
    pub max_per_minute: u32,
}

fn default_smtp_port() -> u16 { 587 }
fn default_email_per_minute() -> u32 { 30 }

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            from_address: String::new(),
            password: String::new(),
            display_name: None,
            max_per_minute: default_email_per_minute(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DentiqConfig::default();
        assert_eq!(config.queue.workers, 4);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.reminder.lead_time_hours, 24);
        assert_eq!(config.cleanup.retention_days, 30);
        assert!(config.channels.whatsapp.is_none());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [queue]
            workers = 8
            backoff_base_secs = 10

            [channels.whatsapp]
            enabled = true
            access_token = "tok"
            phone_number_id = "12345"
        "#;

        let config: DentiqConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.queue.workers, 8);
        assert_eq!(config.queue.backoff_base_secs, 10);
        // untouched fields fall back to defaults
        assert_eq!(config.queue.max_attempts, 3);
        let wa = config.channels.whatsapp.unwrap();
        assert!(wa.enabled);
        assert_eq!(wa.phone_number_id, "12345");
        assert_eq!(wa.max_per_minute, 20);
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: DentiqConfig = toml::from_str("").unwrap();
        assert_eq!(config.scheduler.reminder_cron, "0 7 * * *");
        assert_eq!(config.queue.send_timeout_secs, 30);
    }

    #[test]
    fn test_home_dir() {
        let home = DentiqConfig::home_dir();
        assert!(home.to_string_lossy().contains("dentiq"));
    }
}
