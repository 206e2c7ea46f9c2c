//! Confide share engine.
//!
//! Splits secrets all-of-n, disperses the shares among other users one
//! round at a time, and cleans up after deleted accounts.
//!
//! Storage: any [`Datastore`] (in-memory or SQLite).
//! Splitting: Shamir over GF(256) via `bc-shamir`, shares rendered as
//! BIP-39 word sequences.

pub mod config;
pub mod distributor;
pub mod error;
pub mod ledger;
pub mod progress;
pub mod reclaim;
pub mod runtime;
pub mod service;
pub mod splitter;
pub mod store;
pub mod types;

pub use config::{EngineConfig, DEFAULT_SHARE_COUNT, DEFAULT_SWEEP_INTERVAL};
pub use confide_metrics::{EngineMetrics, MetricsSnapshot};
pub use distributor::{Distributor, RoundOutcome};
pub use error::ConfideError;
pub use ledger::{LedgerSweeper, SweepOutcome};
pub use progress::{ProgressTracker, SecretProgress};
pub use reclaim::{DeletionReclaimer, ReclaimReport};
pub use runtime::{SweepHandle, SweepRuntime};
pub use service::ShareService;
pub use splitter::{ShamirScheme, SplitError, ThresholdScheme, MAX_SHARES};
pub use store::{Datastore, MemoryStore, Placement, Settlement, SqliteStore, StoreError, UserFilter};
pub use types::{
    DeletionLedgerEntry, Email, PendingSecret, Progress, ReceivedShare, SecretId, ShareToken, User,
};
