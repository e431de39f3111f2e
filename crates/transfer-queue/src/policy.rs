use app_config::queue::QueueConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The file name of the journal when none is configured.
pub const DEFAULT_JOURNAL_FILE: &str = ".transfer-journal.jsonl";

/// Decides how often and when failed transfers are retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// The number of attempts after which a record is abandoned.
    pub max_attempts: u32,
    /// Whether failed records are retried in the background.
    pub auto_retry: bool,
    /// The delay before the first automatic retry.
    pub initial_delay: Duration,
    /// The upper bound for the delay between attempts.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            auto_retry: true,
            initial_delay: Duration::from_secs(5 * 60),
            max_delay: Duration::from_secs(60 * 60),
        }
    }
}

impl RetryPolicy {
    /// Calculates the delay after the given failed attempt (1-based).
    /// The delay doubles with every attempt and is capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .checked_mul(1u32 << exp)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Runtime options of the [`TransferQueue`](crate::TransferQueue).
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub retry: RetryPolicy,
    /// The number of attempts that may run at the same time. At least one.
    pub max_concurrent_attempts: usize,
    /// The time after which a single attempt counts as timed out.
    pub attempt_timeout: Duration,
    /// Whether stashed files are deleted after delivery.
    pub delete_after_transfer: bool,
    /// Where transitions are journaled, if anywhere.
    pub journal_file: Option<PathBuf>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_concurrent_attempts: 1,
            attempt_timeout: Duration::from_secs(5 * 60),
            delete_after_transfer: true,
            journal_file: None,
        }
    }
}

impl QueueOptions {
    /// Builds the options from the configuration.
    ///
    /// ## Arguments
    /// * `config` - The queue configuration.
    /// * `stash_root` - The upload directory; holds the journal unless
    ///   another location is configured.
    pub fn from_config(config: &QueueConfig, stash_root: &Path) -> Self {
        let journal_file = if config.journal_enabled {
            Some(
                config
                    .journal_file
                    .clone()
                    .unwrap_or_else(|| stash_root.join(DEFAULT_JOURNAL_FILE)),
            )
        } else {
            None
        };

        Self {
            retry: RetryPolicy {
                max_attempts: config.max_attempts.max(1),
                auto_retry: config.auto_retry,
                initial_delay: config.retry_delay(),
                max_delay: config.max_retry_delay(),
            },
            max_concurrent_attempts: config.max_concurrent_attempts.max(1),
            attempt_timeout: config.attempt_timeout(),
            delete_after_transfer: config.delete_after_transfer,
            journal_file,
        }
    }
}
