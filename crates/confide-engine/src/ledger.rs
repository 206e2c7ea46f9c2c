//! Deletion ledger sweep.
//!
//! A ledger entry names a secret whose owner is gone. Sweeping an entry
//! strips every remaining share of that secret from its holders; the entry
//! itself is removed only by a later sweep that finds no holders left.
//! Sweeps are idempotent and safe to run concurrently.
use std::sync::Arc;

use confide_metrics::EngineMetrics;
use serde::Serialize;

use crate::error::ConfideError;
use crate::store::{Datastore, UserFilter};
use crate::types::{DeletionLedgerEntry, SecretId};

/// Result of sweeping one ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SweepOutcome {
    /// The ledger was empty.
    Empty,
    /// No holders left; the entry was removed.
    Resolved { secret_id: SecretId },
    /// Shares stripped from `holders` users; the entry stays for re-check.
    Purged { secret_id: SecretId, holders: usize },
}

pub struct LedgerSweeper<S> {
    store: Arc<S>,
    metrics: Arc<EngineMetrics>,
}

impl<S: Datastore> LedgerSweeper<S> {
    pub fn new(store: Arc<S>, metrics: Arc<EngineMetrics>) -> Self {
        Self { store, metrics }
    }

    /// Sweep whichever entry the store hands out first.
    pub async fn sweep_once(&self) -> Result<SweepOutcome, ConfideError> {
        match self.store.next_ledger_entry().await? {
            Some(entry) => self.sweep_entry(&entry).await,
            None => Ok(SweepOutcome::Empty),
        }
    }

    /// Sweep each entry present at call time exactly once.
    pub async fn sweep_all(&self) -> Result<Vec<SweepOutcome>, ConfideError> {
        let entries = self.store.ledger_entries().await?;
        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in &entries {
            outcomes.push(self.sweep_entry(entry).await?);
        }
        Ok(outcomes)
    }

    async fn sweep_entry(&self, entry: &DeletionLedgerEntry) -> Result<SweepOutcome, ConfideError> {
        let secret_id = &entry.secret_id;
        let holders = self
            .store
            .find_emails(&UserFilter::all().holding_share_for(secret_id.clone()))
            .await?;

        if holders.is_empty() {
            if self.store.resolve_ledger_entry(secret_id).await? {
                self.metrics.ledger_resolved.inc();
                tracing::info!(%secret_id, "ledger entry resolved");
            }
            return Ok(SweepOutcome::Resolved {
                secret_id: secret_id.clone(),
            });
        }

        let mut purged = 0;
        for holder in &holders {
            if self.store.purge_share(holder, secret_id).await? {
                purged += 1;
                self.metrics.shares_purged.inc();
                tracing::debug!(%secret_id, %holder, "orphaned share purged");
            }
        }
        tracing::info!(
            %secret_id,
            purged,
            expected = entry.expected_share_count,
            "orphaned shares purged"
        );
        Ok(SweepOutcome::Purged {
            secret_id: secret_id.clone(),
            holders: purged,
        })
    }
}
