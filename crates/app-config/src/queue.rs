use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configures the transfer queue and its retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// The number of attempts after which a record is abandoned.
    pub max_attempts: u32,
    /// Whether failed records are retried in the background.
    /// Manual retries are always possible.
    pub auto_retry: bool,
    /// The delay before the first automatic retry, in seconds.
    /// Each further retry doubles the delay.
    pub retry_delay_sec: u64,
    /// The upper bound for the retry delay, in seconds.
    pub max_retry_delay_sec: u64,
    /// The number of transfers that may run at the same time.
    /// Simple FTP servers often only tolerate a single connection.
    pub max_concurrent_attempts: usize,
    /// The time after which a single transfer attempt is considered timed out.
    pub attempt_timeout_sec: u64,
    /// Whether the stashed file is deleted after a successful transfer.
    pub delete_after_transfer: bool,
    /// Whether transitions are journaled to disk for restart recovery.
    pub journal_enabled: bool,
    /// The journal location. Defaults to a file in the upload directory.
    pub journal_file: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            auto_retry: true,
            retry_delay_sec: 5 * 60,
            max_retry_delay_sec: 60 * 60,
            max_concurrent_attempts: 1,
            attempt_timeout_sec: 5 * 60,
            delete_after_transfer: true,
            journal_enabled: true,
            journal_file: None,
        }
    }
}

impl QueueConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_sec)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_secs(self.max_retry_delay_sec)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_sec)
    }
}
