//! Account deletion: ledger unfinished secrets, move held shares elsewhere,
//! then drop the record.
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use confide_metrics::EngineMetrics;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::error::ConfideError;
use crate::store::{Datastore, StoreError, UserFilter};
use crate::types::{DeletionLedgerEntry, Email, ReceivedShare, SecretId};

/// What [`DeletionReclaimer::reclaim`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    /// Unfinished secrets of the departed user now awaiting sweep.
    pub ledgered: Vec<SecretId>,
    /// Held shares and the user each one moved to.
    pub relocated: Vec<(SecretId, Email)>,
    /// Held shares nobody could take.
    pub dropped: Vec<SecretId>,
}

pub struct DeletionReclaimer<S> {
    store: Arc<S>,
    share_count: usize,
    metrics: Arc<EngineMetrics>,
    rng: Mutex<StdRng>,
}

impl<S: Datastore> DeletionReclaimer<S> {
    pub fn new(store: Arc<S>, share_count: usize, metrics: Arc<EngineMetrics>) -> Self {
        Self::with_rng(store, share_count, metrics, StdRng::from_os_rng())
    }

    pub fn with_rng(
        store: Arc<S>,
        share_count: usize,
        metrics: Arc<EngineMetrics>,
        rng: StdRng,
    ) -> Self {
        Self {
            store,
            share_count,
            metrics,
            rng: Mutex::new(rng),
        }
    }

    /// Remove `email`, keeping every share it held alive elsewhere where
    /// possible.
    pub async fn reclaim(&self, email: &Email) -> Result<ReclaimReport, ConfideError> {
        let user = self
            .store
            .find_user(email)
            .await?
            .ok_or_else(|| ConfideError::user_not_found(email))?;
        let mut report = ReclaimReport::default();

        // ── Ledger unfinished secrets ─────────────────────────────────────
        let mut unfinished: Vec<(&SecretId, usize)> = user
            .progress
            .iter()
            .filter(|(_, count)| *count < self.share_count)
            .collect();
        unfinished.sort();
        for (secret_id, placed) in unfinished {
            self.ledger(secret_id, placed).await?;
            report.ledgered.push(secret_id.clone());
        }

        // ── Relocate held shares ──────────────────────────────────────────
        for share in &user.held_shares {
            let secret_id = &share.secret_id;
            match self.relocate(email, secret_id).await {
                Ok(Some(to)) => report.relocated.push((secret_id.clone(), to)),
                Ok(None) => {}
                Err(e @ ConfideError::NoEligibleRecipient { .. }) => {
                    self.metrics.shares_dropped.inc();
                    tracing::warn!(%email, "dropping held share: {e}");
                    report.dropped.push(secret_id.clone());
                }
                Err(e) => return Err(e),
            }
        }

        // ── Delete ────────────────────────────────────────────────────────
        let removed = self.store.delete_user(email).await?;

        // The final record is authoritative: rounds may have placed more
        // shares, and a sweep may have resolved an entry recorded above.
        let ledgered: HashSet<SecretId> = report.ledgered.iter().cloned().collect();
        let mut unfinished: Vec<(&SecretId, usize)> = removed
            .progress
            .iter()
            .filter(|(_, count)| *count < self.share_count)
            .collect();
        unfinished.sort();
        for (secret_id, placed) in unfinished {
            if ledgered.contains(secret_id) {
                self.store.record_deletion(&self.entry_for(secret_id)).await?;
            } else {
                self.ledger(secret_id, placed).await?;
                report.ledgered.push(secret_id.clone());
            }
        }
        let late: Vec<ReceivedShare> = removed
            .held_shares
            .into_iter()
            .filter(|s| !user.held_shares.contains(s))
            .collect();
        for share in late {
            tracing::warn!(%email, secret_id = %share.secret_id, "share arrived during deletion");
            match self.regrant(email, &share).await {
                Ok(to) => report.relocated.push((share.secret_id.clone(), to)),
                Err(e @ ConfideError::NoEligibleRecipient { .. }) => {
                    self.metrics.shares_dropped.inc();
                    tracing::warn!(%email, "dropping late share: {e}");
                    report.dropped.push(share.secret_id.clone());
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            %email,
            ledgered = report.ledgered.len(),
            relocated = report.relocated.len(),
            dropped = report.dropped.len(),
            "account reclaimed"
        );
        Ok(report)
    }

    fn entry_for(&self, secret_id: &SecretId) -> DeletionLedgerEntry {
        DeletionLedgerEntry {
            secret_id: secret_id.clone(),
            expected_share_count: self.share_count,
        }
    }

    async fn ledger(&self, secret_id: &SecretId, placed: usize) -> Result<(), ConfideError> {
        self.store.record_deletion(&self.entry_for(secret_id)).await?;
        self.metrics.ledger_recorded.inc();
        tracing::info!(%secret_id, placed, "unfinished secret ledgered");
        Ok(())
    }

    /// Users who may take over a share of `secret_id`: no progress entry for
    /// it (so not its owner) and no share of it already.
    async fn candidates(&self, departing: &Email, secret_id: &SecretId) -> Result<Vec<Email>, ConfideError> {
        let filter = UserFilter::all()
            .excluding(departing.clone())
            .lacking_progress_for(secret_id.clone())
            .lacking_share_for(secret_id.clone());
        Ok(self.store.find_emails(&filter).await?)
    }

    /// Uniformly pick and remove one candidate.
    fn take_random(&self, candidates: &mut Vec<Email>) -> Option<Email> {
        if candidates.is_empty() {
            return None;
        }
        let index = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .random_range(0..candidates.len());
        Some(candidates.swap_remove(index))
    }

    /// Move `from`'s share of `secret_id` to a random candidate. `Ok(None)`
    /// when `from` no longer holds it.
    async fn relocate(&self, from: &Email, secret_id: &SecretId) -> Result<Option<Email>, ConfideError> {
        let mut candidates = self.candidates(from, secret_id).await?;
        while let Some(to) = self.take_random(&mut candidates) {
            match self.store.transfer_share(from, &to, secret_id).await {
                Ok(()) => {
                    self.metrics.shares_relocated.inc();
                    tracing::info!(%from, %to, %secret_id, "share relocated");
                    return Ok(Some(to));
                }
                Err(e) if e.is_skippable() => {
                    tracing::debug!(%secret_id, %to, "relocation target rejected: {e}");
                }
                Err(StoreError::NotFound { what }) => {
                    tracing::debug!(%secret_id, "nothing to relocate: {what} not found");
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ConfideError::NoEligibleRecipient {
            secret_id: secret_id.clone(),
        })
    }

    /// Hand a share taken off a deleted record to a random candidate.
    async fn regrant(&self, departed: &Email, share: &ReceivedShare) -> Result<Email, ConfideError> {
        let mut candidates = self.candidates(departed, &share.secret_id).await?;
        while let Some(to) = self.take_random(&mut candidates) {
            match self.store.grant_share(&to, share).await {
                Ok(()) => {
                    self.metrics.shares_relocated.inc();
                    tracing::info!(from = %departed, %to, secret_id = %share.secret_id, "share relocated");
                    return Ok(to);
                }
                Err(e) if e.is_skippable() => {
                    tracing::debug!(secret_id = %share.secret_id, %to, "relocation target rejected: {e}");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ConfideError::NoEligibleRecipient {
            secret_id: share.secret_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{PendingSecret, ShareToken};

    struct Fixture {
        store: Arc<MemoryStore>,
        metrics: Arc<EngineMetrics>,
        reclaimer: DeletionReclaimer<MemoryStore>,
    }

    async fn fixture(users: &[&str], share_count: usize) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        for u in users {
            store.insert_user(&Email::new(*u), u).await.unwrap();
        }
        let metrics = Arc::new(EngineMetrics::new());
        let reclaimer = DeletionReclaimer::with_rng(
            Arc::clone(&store),
            share_count,
            Arc::clone(&metrics),
            StdRng::seed_from_u64(11),
        );
        Fixture {
            store,
            metrics,
            reclaimer,
        }
    }

    async fn submit(store: &MemoryStore, owner: &str, secret: &str, n: u8) {
        let shares = (0..n).map(|b| ShareToken::from_bytes(vec![b])).collect();
        store
            .enqueue_secret(&owner.into(), PendingSecret::new(secret.into(), shares))
            .await
            .unwrap();
    }

    async fn place(store: &MemoryStore, owner: &str, secret: &str, to: &str) {
        store
            .place_share(&owner.into(), &secret.into(), &to.into())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unfinished_secrets_are_ledgered() {
        let f = fixture(&["a@x", "b@x"], 2).await;
        submit(&f.store, "a@x", "done", 1).await;
        submit(&f.store, "a@x", "open", 2).await;
        place(&f.store, "a@x", "open", "b@x").await;

        // "done" holds one share in a 2-share world: still unfinished
        let report = f.reclaimer.reclaim(&"a@x".into()).await.unwrap();
        assert_eq!(report.ledgered, vec![SecretId::from("done"), SecretId::from("open")]);
        assert_eq!(f.store.ledger_entries().await.unwrap().len(), 2);
        assert!(f.store.find_user(&"a@x".into()).await.unwrap().is_none());
        assert_eq!(f.metrics.ledger_recorded.get(), 2);
    }

    #[tokio::test]
    async fn finished_secrets_are_not_ledgered() {
        let f = fixture(&["a@x", "b@x", "c@x"], 2).await;
        submit(&f.store, "a@x", "s1", 2).await;
        place(&f.store, "a@x", "s1", "b@x").await;
        place(&f.store, "a@x", "s1", "c@x").await;

        let report = f.reclaimer.reclaim(&"a@x".into()).await.unwrap();
        assert!(report.ledgered.is_empty());
        assert!(f.store.ledger_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn held_share_moves_to_eligible_user() {
        let f = fixture(&["a@x", "b@x", "c@x", "e@x"], 2).await;
        submit(&f.store, "a@x", "s1", 2).await;
        place(&f.store, "a@x", "s1", "b@x").await;
        place(&f.store, "a@x", "s1", "c@x").await;

        let report = f.reclaimer.reclaim(&"b@x".into()).await.unwrap();
        // a owns s1 (has progress) and c already holds it: only e qualifies
        assert_eq!(report.relocated, vec![(SecretId::from("s1"), Email::from("e@x"))]);

        let holders = f
            .store
            .find_users(&UserFilter::all().holding_share_for("s1".into()))
            .await
            .unwrap();
        assert_eq!(holders.len(), 2);
        assert_eq!(f.metrics.shares_relocated.get(), 1);
    }

    #[tokio::test]
    async fn share_without_candidate_is_dropped() {
        let f = fixture(&["a@x", "b@x"], 1).await;
        submit(&f.store, "a@x", "s1", 1).await;
        place(&f.store, "a@x", "s1", "b@x").await;

        let report = f.reclaimer.reclaim(&"b@x".into()).await.unwrap();
        assert_eq!(report.dropped, vec![SecretId::from("s1")]);
        assert!(report.relocated.is_empty());
        assert!(f.store.find_user(&"b@x".into()).await.unwrap().is_none());
        assert_eq!(f.metrics.shares_dropped.get(), 1);
    }

    #[tokio::test]
    async fn missing_user_is_not_found() {
        let f = fixture(&[], 3).await;
        let err = f.reclaimer.reclaim(&"ghost@x".into()).await.unwrap_err();
        assert!(matches!(err, ConfideError::NotFound { .. }));
    }
}
