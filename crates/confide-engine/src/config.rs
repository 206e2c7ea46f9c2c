use std::time::Duration;

use crate::error::ConfideError;
use crate::splitter::MAX_SHARES;

/// Shares per secret when nothing else is configured.
pub const DEFAULT_SHARE_COUNT: usize = 3;

/// Background sweep period when nothing else is configured.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for a [`ShareService`](crate::ShareService).
///
/// Builder style, defaults first:
///
/// ```rust
/// use std::time::Duration;
/// use confide_engine::EngineConfig;
///
/// let config = EngineConfig::new()
///     .share_count(5)
///     .sweep_interval(Duration::from_secs(10));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Shares each secret is split into (N). Every one is needed to rebuild
    /// it, and each goes to a different user.
    pub(crate) share_count: usize,
    /// Period of the background ledger sweep.
    pub(crate) sweep_interval: Duration,
    /// Sweep every ledger entry per tick instead of a single one.
    pub(crate) sweep_batch: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfig {
    /// Create a config with defaults.
    ///
    /// `CONFIDE_SHARE_COUNT` and `CONFIDE_SWEEP_INTERVAL_SECS` override the
    /// defaults when set and parseable; the builder methods override both.
    pub fn new() -> Self {
        let share_count = std::env::var("CONFIDE_SHARE_COUNT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SHARE_COUNT);
        let sweep_interval = std::env::var("CONFIDE_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SWEEP_INTERVAL);

        Self {
            share_count,
            sweep_interval,
            sweep_batch: true,
        }
    }

    /// Set the number of shares per secret (default: 3).
    ///
    /// Distribution only makes steady progress while this stays below the
    /// number of active users.
    pub fn share_count(mut self, n: usize) -> Self {
        self.share_count = n;
        self
    }

    /// Set the background sweep period (default: 60s).
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sweep all ledger entries per tick (`true`, default) or one.
    pub fn sweep_batch(mut self, batch: bool) -> Self {
        self.sweep_batch = batch;
        self
    }

    pub fn get_share_count(&self) -> usize {
        self.share_count
    }

    pub fn get_sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    pub fn get_sweep_batch(&self) -> bool {
        self.sweep_batch
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfideError> {
        if self.share_count == 0 || self.share_count > MAX_SHARES {
            return Err(ConfideError::InvalidConfig {
                reason: format!(
                    "share count must be between 1 and {MAX_SHARES}, got {}",
                    self.share_count
                ),
            });
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfideError::InvalidConfig {
                reason: "sweep interval must be non-zero".into(),
            });
        }
        Ok(())
    }
}
