//! Activity counters for the confide share engine.
//!
//! [`EngineMetrics`] is shared by every component of an engine instance and
//! bumped as shares move around. [`EngineMetrics::snapshot`] freezes the
//! current values into a plain [`MetricsSnapshot`] for display or export.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Monotonic counter. Relaxed ordering: values are statistics only.
#[derive(Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Counter({})", self.get())
    }
}

/// Counters for one engine instance.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Shares moved from an owner's queue into another user's holdings.
    pub shares_placed: Counter,
    /// Placements abandoned because the recipient vanished or already held
    /// the secret by the time the write landed.
    pub placements_skipped: Counter,
    /// Secrets whose last share was placed.
    pub secrets_completed: Counter,
    /// Rounds that left shares behind and rotated the secret to the back.
    pub secrets_requeued: Counter,
    /// Held shares moved off a departing account.
    pub shares_relocated: Counter,
    /// Held shares discarded because nobody could take them.
    pub shares_dropped: Counter,
    /// Deletion ledger entries written.
    pub ledger_recorded: Counter,
    /// Deletion ledger entries resolved and removed.
    pub ledger_resolved: Counter,
    /// Orphaned shares stripped from holders by the sweep.
    pub shares_purged: Counter,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy every counter into a serializable snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            shares_placed: self.shares_placed.get(),
            placements_skipped: self.placements_skipped.get(),
            secrets_completed: self.secrets_completed.get(),
            secrets_requeued: self.secrets_requeued.get(),
            shares_relocated: self.shares_relocated.get(),
            shares_dropped: self.shares_dropped.get(),
            ledger_recorded: self.ledger_recorded.get(),
            ledger_resolved: self.ledger_resolved.get(),
            shares_purged: self.shares_purged.get(),
        }
    }
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub shares_placed: u64,
    pub placements_skipped: u64,
    pub secrets_completed: u64,
    pub secrets_requeued: u64,
    pub shares_relocated: u64,
    pub shares_dropped: u64,
    pub ledger_recorded: u64,
    pub ledger_resolved: u64,
    pub shares_purged: u64,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "shares placed:       {}", self.shares_placed)?;
        writeln!(f, "placements skipped:  {}", self.placements_skipped)?;
        writeln!(f, "secrets completed:   {}", self.secrets_completed)?;
        writeln!(f, "secrets requeued:    {}", self.secrets_requeued)?;
        writeln!(f, "shares relocated:    {}", self.shares_relocated)?;
        writeln!(f, "shares dropped:      {}", self.shares_dropped)?;
        writeln!(f, "ledger recorded:     {}", self.ledger_recorded)?;
        writeln!(f, "ledger resolved:     {}", self.ledger_resolved)?;
        write!(f, "shares purged:       {}", self.shares_purged)
    }
}
