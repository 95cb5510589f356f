//! Installer configuration.

use std::time::Duration;

/// Tunables for verification, range requests, and retry behavior.
#[derive(Debug, Clone)]
pub struct InstallerOptions {
    /// Concurrent per-target verification tasks.
    pub verify_concurrency: usize,
    /// Interval between progress callback emissions.
    pub progress_interval: Duration,
    /// Byte ranges closer than this are merged into one request range.
    pub coalesce_gap: u64,
    /// Upper bound on ranges in a single request; excess ranges are
    /// re-requested on the next round.
    pub max_ranges_per_request: usize,
    /// Consecutive transient failures tolerated per install task.
    pub max_attempts: u32,
    /// Base delay for exponential backoff (doubles per failure, capped at
    /// `backoff_base * 2^5`).
    pub backoff_base: Duration,
    /// `User-Agent` sent with range requests.
    pub user_agent: String,
    /// Number of tasks one source patch's missing parts are split into.
    pub split_by: usize,
}

impl Default for InstallerOptions {
    fn default() -> Self {
        Self {
            verify_concurrency: 8,
            progress_interval: Duration::from_millis(250),
            coalesce_gap: 1024,
            max_ranges_per_request: 1024,
            max_attempts: 8,
            backoff_base: Duration::from_secs(1),
            user_agent: concat!("stitch-patch/", env!("CARGO_PKG_VERSION")).to_string(),
            split_by: 8,
        }
    }
}

impl InstallerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verify_concurrency(mut self, concurrency: usize) -> Self {
        self.verify_concurrency = concurrency.max(1);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_split_by(mut self, split_by: usize) -> Self {
        self.split_by = split_by.max(1);
        self
    }
}
