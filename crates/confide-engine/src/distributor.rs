//! Distributor: hands queued shares out to other users, one round at a time.
//!
//! A round looks at the owner's head-of-queue secret, samples up to
//! `remaining` recipients uniformly from everyone who does not already hold
//! a share of it, places one share with each, then either retires the
//! secret or rotates it to the back of the queue.
//!
//! Every placement is a single [`Datastore::place_share`] call, so a round
//! interrupted halfway leaves the store consistent and the next round picks
//! up from whatever was persisted.
use std::sync::{Arc, Mutex, PoisonError};

use confide_metrics::EngineMetrics;
use rand::rngs::StdRng;
use rand::seq::{IteratorRandom, SliceRandom};
use rand::SeedableRng;
use serde::Serialize;

use crate::error::ConfideError;
use crate::store::{Datastore, Settlement, StoreError, UserFilter};
use crate::types::{Email, SecretId};

/// Result of one [`Distributor::distribute_one`] round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RoundOutcome {
    /// The owner's queue was empty.
    Idle,
    /// Last share placed; the secret left the queue.
    Completed {
        secret_id: SecretId,
        placed: usize,
        skipped: usize,
    },
    /// Shares remain; the secret moved to the back of the queue.
    Requeued {
        secret_id: SecretId,
        placed: usize,
        skipped: usize,
        remaining: usize,
    },
    /// The secret disappeared mid-round (owner deleted, or a concurrent
    /// round on the same owner settled it first).
    Vanished {
        secret_id: SecretId,
        placed: usize,
        skipped: usize,
    },
}

impl RoundOutcome {
    /// Shares placed during the round.
    pub fn placed(&self) -> usize {
        match self {
            RoundOutcome::Idle => 0,
            RoundOutcome::Completed { placed, .. }
            | RoundOutcome::Requeued { placed, .. }
            | RoundOutcome::Vanished { placed, .. } => *placed,
        }
    }

    pub fn secret_id(&self) -> Option<&SecretId> {
        match self {
            RoundOutcome::Idle => None,
            RoundOutcome::Completed { secret_id, .. }
            | RoundOutcome::Requeued { secret_id, .. }
            | RoundOutcome::Vanished { secret_id, .. } => Some(secret_id),
        }
    }
}

/// Runs distribution rounds against a shared datastore.
pub struct Distributor<S> {
    store: Arc<S>,
    metrics: Arc<EngineMetrics>,
    /// Never held across an await.
    rng: Mutex<StdRng>,
}

impl<S: Datastore> Distributor<S> {
    pub fn new(store: Arc<S>, metrics: Arc<EngineMetrics>) -> Self {
        Self::with_rng(store, metrics, StdRng::from_os_rng())
    }

    /// Distributor drawing recipients from a caller-supplied generator.
    pub fn with_rng(store: Arc<S>, metrics: Arc<EngineMetrics>, rng: StdRng) -> Self {
        Self {
            store,
            metrics,
            rng: Mutex::new(rng),
        }
    }

    /// Advance the owner's head-of-queue secret by one round.
    pub async fn distribute_one(&self, owner: &Email) -> Result<RoundOutcome, ConfideError> {
        let user = self
            .store
            .find_user(owner)
            .await?
            .ok_or_else(|| ConfideError::user_not_found(owner))?;
        let Some(head) = user.queue.first() else {
            return Ok(RoundOutcome::Idle);
        };
        let secret_id = head.secret_id.clone();
        let wanted = head.remaining.len();

        let eligible: Vec<Email> = self
            .store
            .find_emails(
                &UserFilter::all()
                    .excluding(owner.clone())
                    .lacking_share_for(secret_id.clone()),
            )
            .await?;
        let recipients = self.sample(eligible, wanted);

        if recipients.is_empty() && wanted > 0 {
            let deferred = ConfideError::NoEligibleRecipient {
                secret_id: secret_id.clone(),
            };
            tracing::debug!(%owner, "{deferred}, deferring to a later round");
        }

        let mut placed = 0;
        let mut skipped = 0;
        for recipient in &recipients {
            match self.store.place_share(owner, &secret_id, recipient).await {
                Ok(placement) => {
                    placed += 1;
                    self.metrics.shares_placed.inc();
                    tracing::debug!(
                        %owner,
                        %secret_id,
                        %recipient,
                        progress = placement.progress,
                        remaining = placement.remaining,
                        "share placed"
                    );
                }
                Err(e) if e.is_skippable() => {
                    skipped += 1;
                    self.metrics.placements_skipped.inc();
                    tracing::debug!(%secret_id, %recipient, "skipping recipient: {e}");
                }
                Err(StoreError::NotFound { what }) => {
                    // Owner or queued secret gone; settling below reports it.
                    tracing::debug!(%secret_id, "round cut short: {what} not found");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let outcome = match self.store.settle_secret(owner, &secret_id).await? {
            Settlement::Completed => {
                self.metrics.secrets_completed.inc();
                tracing::info!(%owner, %secret_id, placed, "secret fully distributed");
                RoundOutcome::Completed {
                    secret_id,
                    placed,
                    skipped,
                }
            }
            Settlement::Rotated { remaining } => {
                self.metrics.secrets_requeued.inc();
                tracing::info!(%owner, %secret_id, placed, remaining, "secret requeued");
                RoundOutcome::Requeued {
                    secret_id,
                    placed,
                    skipped,
                    remaining,
                }
            }
            Settlement::Absent => RoundOutcome::Vanished {
                secret_id,
                placed,
                skipped,
            },
        };
        Ok(outcome)
    }

    /// One round per secret queued at entry. Secrets requeued by these
    /// rounds are not revisited in the same call.
    pub async fn distribute_all(&self, owner: &Email) -> Result<Vec<RoundOutcome>, ConfideError> {
        let rounds = self
            .store
            .find_user(owner)
            .await?
            .ok_or_else(|| ConfideError::user_not_found(owner))?
            .queue
            .len();

        let mut outcomes = Vec::with_capacity(rounds);
        for _ in 0..rounds {
            let outcome = self.distribute_one(owner).await?;
            if outcome == RoundOutcome::Idle {
                break;
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Uniform sample of `k` candidates without replacement, in random order.
    fn sample(&self, candidates: Vec<Email>, k: usize) -> Vec<Email> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let mut picked = candidates.into_iter().choose_multiple(&mut *rng, k);
        picked.shuffle(&mut *rng);
        picked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{PendingSecret, ShareToken};

    async fn setup(users: &[&str]) -> (Arc<MemoryStore>, Distributor<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        for u in users {
            store.insert_user(&Email::new(*u), u).await.unwrap();
        }
        let distributor = Distributor::with_rng(
            Arc::clone(&store),
            Arc::new(EngineMetrics::new()),
            StdRng::seed_from_u64(7),
        );
        (store, distributor)
    }

    async fn submit(store: &MemoryStore, owner: &str, secret: &str, n: u8) {
        let shares = (0..n).map(|b| ShareToken::from_bytes(vec![b])).collect();
        store
            .enqueue_secret(&owner.into(), PendingSecret::new(secret.into(), shares))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_queue_is_idle() {
        let (_, d) = setup(&["a@x"]).await;
        assert_eq!(d.distribute_one(&"a@x".into()).await.unwrap(), RoundOutcome::Idle);
        assert!(d.distribute_all(&"a@x".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_owner_is_not_found() {
        let (_, d) = setup(&[]).await;
        let err = d.distribute_one(&"nobody@x".into()).await.unwrap_err();
        assert!(matches!(err, ConfideError::NotFound { .. }));
    }

    #[tokio::test]
    async fn enough_recipients_complete_in_one_round() {
        let (store, d) = setup(&["a@x", "b@x", "c@x", "d@x"]).await;
        submit(&store, "a@x", "s1", 3).await;

        let outcome = d.distribute_one(&"a@x".into()).await.unwrap();
        assert!(matches!(outcome, RoundOutcome::Completed { placed: 3, skipped: 0, .. }));

        let a = store.find_user(&"a@x".into()).await.unwrap().unwrap();
        assert!(a.queue.is_empty());
        assert_eq!(a.progress.get(&"s1".into()), Some(3));
        assert!(!a.holds(&"s1".into()));
    }

    #[tokio::test]
    async fn too_few_recipients_requeue() {
        let (store, d) = setup(&["a@x", "b@x"]).await;
        submit(&store, "a@x", "s1", 3).await;

        let outcome = d.distribute_one(&"a@x".into()).await.unwrap();
        assert_eq!(
            outcome,
            RoundOutcome::Requeued {
                secret_id: "s1".into(),
                placed: 1,
                skipped: 0,
                remaining: 2,
            }
        );

        // b already holds s1: nobody else is eligible
        let outcome = d.distribute_one(&"a@x".into()).await.unwrap();
        assert_eq!(outcome.placed(), 0);
        assert!(matches!(outcome, RoundOutcome::Requeued { remaining: 2, .. }));
    }

    #[tokio::test]
    async fn rounds_rotate_between_secrets() {
        let (store, d) = setup(&["a@x", "b@x"]).await;
        submit(&store, "a@x", "s1", 2).await;
        submit(&store, "a@x", "s2", 2).await;

        let outcomes = d.distribute_all(&"a@x".into()).await.unwrap();
        let ids: Vec<&str> = outcomes
            .iter()
            .filter_map(|o| o.secret_id())
            .map(SecretId::as_str)
            .collect();
        assert_eq!(ids, vec!["s1", "s2"]);
        assert!(outcomes.iter().all(|o| o.placed() == 1));

        let a = store.find_user(&"a@x".into()).await.unwrap().unwrap();
        let order: Vec<&str> = a.queue.iter().map(|p| p.secret_id.as_str()).collect();
        assert_eq!(order, vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn distribute_all_is_bounded_by_entry_length() {
        let (store, d) = setup(&["a@x"]).await;
        submit(&store, "a@x", "s1", 1).await;
        // no recipients at all: one round, requeued, not retried
        let outcomes = d.distribute_all(&"a@x".into()).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], RoundOutcome::Requeued { placed: 0, .. }));
    }

    #[tokio::test]
    async fn sample_never_exceeds_candidates() {
        let (_, d) = setup(&[]).await;
        let picked = d.sample(vec!["a@x".into(), "b@x".into()], 5);
        assert_eq!(picked.len(), 2);
        assert!(d.sample(Vec::new(), 3).is_empty());
        assert!(d.sample(vec!["a@x".into()], 0).is_empty());
    }

    #[tokio::test]
    async fn sampling_reaches_every_candidate() {
        let (_, d) = setup(&[]).await;
        let candidates: Vec<Email> = (0..5).map(|i| Email::new(format!("u{i}@x"))).collect();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.extend(d.sample(candidates.clone(), 1));
        }
        assert_eq!(seen.len(), candidates.len());
    }
}
