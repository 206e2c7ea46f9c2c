//! In-memory datastore.
//!
//! Every method takes the one state lock for its whole body, so each call
//! is atomic with respect to every other.
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{Datastore, Placement, Settlement, StoreError, UserFilter};
use crate::types::{DeletionLedgerEntry, Email, PendingSecret, ReceivedShare, SecretId, User};

#[derive(Default)]
struct State {
    users: BTreeMap<Email, User>,
    /// Insertion-ordered, at most one entry per secret id.
    ledger: Vec<DeletionLedgerEntry>,
}

/// Datastore kept entirely in process memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }

    /// Number of user records.
    pub fn user_count(&self) -> usize {
        self.lock().map(|s| s.users.len()).unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl Datastore for MemoryStore {
    async fn find_user(&self, email: &Email) -> Result<Option<User>, StoreError> {
        Ok(self.lock()?.users.get(email).cloned())
    }

    async fn find_users(&self, filter: &UserFilter) -> Result<Vec<User>, StoreError> {
        Ok(self
            .lock()?
            .users
            .values()
            .filter(|u| filter.matches(u))
            .cloned()
            .collect())
    }

    async fn find_emails(&self, filter: &UserFilter) -> Result<Vec<Email>, StoreError> {
        Ok(self
            .lock()?
            .users
            .values()
            .filter(|u| filter.matches(u))
            .map(|u| u.email.clone())
            .collect())
    }

    async fn insert_user(&self, email: &Email, name: &str) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.users.contains_key(email) {
            return Err(StoreError::AlreadyExists {
                email: email.clone(),
            });
        }
        state.users.insert(email.clone(), User::new(email.clone(), name));
        Ok(())
    }

    async fn update_profile(
        &self,
        email: &Email,
        name: Option<&str>,
        new_email: Option<&Email>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if let Some(new_email) = new_email {
            if new_email != email && state.users.contains_key(new_email) {
                return Err(StoreError::AlreadyExists {
                    email: new_email.clone(),
                });
            }
        }
        let mut user = state.users.remove(email).ok_or_else(|| StoreError::user(email))?;
        if let Some(name) = name {
            user.name = name.to_string();
        }
        if let Some(new_email) = new_email {
            user.email = new_email.clone();
        }
        state.users.insert(user.email.clone(), user);
        Ok(())
    }

    async fn enqueue_secret(&self, owner: &Email, pending: PendingSecret) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let user = state.users.get_mut(owner).ok_or_else(|| StoreError::user(owner))?;
        user.progress.set(pending.secret_id.clone(), 0);
        user.queue.push(pending);
        Ok(())
    }

    async fn place_share(
        &self,
        owner: &Email,
        secret_id: &SecretId,
        recipient: &Email,
    ) -> Result<Placement, StoreError> {
        let mut state = self.lock()?;

        // Check every precondition before touching anything.
        let sender = state.users.get(owner).ok_or_else(|| StoreError::user(owner))?;
        let pending = sender
            .pending(secret_id)
            .ok_or_else(|| StoreError::queued(owner, secret_id))?;
        if pending.is_exhausted() {
            return Err(StoreError::ConcurrentModification {
                reason: format!("no shares of {secret_id} left to place"),
            });
        }
        if recipient == owner {
            return Err(StoreError::ConcurrentModification {
                reason: format!("{owner} cannot receive its own share"),
            });
        }
        let receiver = state.users.get(recipient).ok_or_else(|| StoreError::RecipientGone {
            email: recipient.clone(),
        })?;
        if receiver.holds(secret_id) {
            return Err(StoreError::already_holds(recipient, secret_id));
        }

        let sender = state
            .users
            .get_mut(owner)
            .ok_or_else(|| StoreError::user(owner))?;
        let pending = sender
            .queue
            .iter_mut()
            .find(|p| &p.secret_id == secret_id)
            .ok_or_else(|| StoreError::queued(owner, secret_id))?;
        let share = pending.remaining.remove(0);
        let remaining = pending.remaining.len();
        let progress = sender.progress.increment(secret_id);

        let receiver = state
            .users
            .get_mut(recipient)
            .ok_or_else(|| StoreError::RecipientGone {
                email: recipient.clone(),
            })?;
        receiver.held_shares.push(ReceivedShare {
            secret_id: secret_id.clone(),
            payload: share.clone(),
        });

        Ok(Placement {
            share,
            remaining,
            progress,
        })
    }

    async fn settle_secret(&self, owner: &Email, secret_id: &SecretId) -> Result<Settlement, StoreError> {
        let mut state = self.lock()?;
        let Some(user) = state.users.get_mut(owner) else {
            return Ok(Settlement::Absent);
        };
        let Some(pos) = user.queue.iter().position(|p| &p.secret_id == secret_id) else {
            return Ok(Settlement::Absent);
        };
        let pending = user.queue.remove(pos);
        if pending.is_exhausted() {
            return Ok(Settlement::Completed);
        }
        let remaining = pending.remaining.len();
        user.queue.push(pending);
        Ok(Settlement::Rotated { remaining })
    }

    async fn transfer_share(&self, from: &Email, to: &Email, secret_id: &SecretId) -> Result<(), StoreError> {
        let mut state = self.lock()?;

        let source = state.users.get(from).ok_or_else(|| StoreError::user(from))?;
        if !source.holds(secret_id) {
            return Err(StoreError::held(from, secret_id));
        }
        if to == from {
            return Err(StoreError::already_holds(to, secret_id));
        }
        let target = state.users.get(to).ok_or_else(|| StoreError::RecipientGone {
            email: to.clone(),
        })?;
        if target.holds(secret_id) {
            return Err(StoreError::already_holds(to, secret_id));
        }

        let source = state.users.get_mut(from).ok_or_else(|| StoreError::user(from))?;
        let pos = source
            .held_shares
            .iter()
            .position(|s| &s.secret_id == secret_id)
            .ok_or_else(|| StoreError::held(from, secret_id))?;
        let share = source.held_shares.remove(pos);

        let target = state.users.get_mut(to).ok_or_else(|| StoreError::RecipientGone {
            email: to.clone(),
        })?;
        target.held_shares.push(share);
        Ok(())
    }

    async fn grant_share(&self, to: &Email, share: &ReceivedShare) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let target = state.users.get_mut(to).ok_or_else(|| StoreError::RecipientGone {
            email: to.clone(),
        })?;
        if target.holds(&share.secret_id) {
            return Err(StoreError::already_holds(to, &share.secret_id));
        }
        target.held_shares.push(share.clone());
        Ok(())
    }

    async fn delete_user(&self, email: &Email) -> Result<User, StoreError> {
        self.lock()?
            .users
            .remove(email)
            .ok_or_else(|| StoreError::user(email))
    }

    async fn purge_share(&self, holder: &Email, secret_id: &SecretId) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let Some(user) = state.users.get_mut(holder) else {
            return Ok(false);
        };
        let before = user.held_shares.len();
        user.held_shares.retain(|s| &s.secret_id != secret_id);
        Ok(user.held_shares.len() != before)
    }

    async fn record_deletion(&self, entry: &DeletionLedgerEntry) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        match state.ledger.iter_mut().find(|e| e.secret_id == entry.secret_id) {
            Some(existing) => *existing = entry.clone(),
            None => state.ledger.push(entry.clone()),
        }
        Ok(())
    }

    async fn next_ledger_entry(&self) -> Result<Option<DeletionLedgerEntry>, StoreError> {
        Ok(self.lock()?.ledger.first().cloned())
    }

    async fn ledger_entries(&self) -> Result<Vec<DeletionLedgerEntry>, StoreError> {
        Ok(self.lock()?.ledger.clone())
    }

    async fn resolve_ledger_entry(&self, secret_id: &SecretId) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let before = state.ledger.len();
        state.ledger.retain(|e| &e.secret_id != secret_id);
        Ok(state.ledger.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ShareToken;

    fn token(b: u8) -> ShareToken {
        ShareToken::from_bytes(vec![b])
    }

    async fn store_with(users: &[&str]) -> MemoryStore {
        let store = MemoryStore::new();
        for u in users {
            store.insert_user(&Email::new(*u), u).await.unwrap();
        }
        store
    }

    async fn enqueue(store: &MemoryStore, owner: &str, secret: &str, n: u8) {
        let shares = (0..n).map(token).collect();
        store
            .enqueue_secret(&owner.into(), PendingSecret::new(secret.into(), shares))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn insert_rejects_duplicates() {
        let store = store_with(&["a@x"]).await;
        let err = store.insert_user(&"a@x".into(), "again").await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn emails_follow_the_filter() {
        let store = store_with(&["c@x", "a@x", "b@x"]).await;
        enqueue(&store, "a@x", "s1", 2).await;
        store
            .place_share(&"a@x".into(), &"s1".into(), &"b@x".into())
            .await
            .unwrap();

        let eligible = store
            .find_emails(
                &UserFilter::all()
                    .excluding("a@x".into())
                    .lacking_share_for("s1".into()),
            )
            .await
            .unwrap();
        assert_eq!(eligible, vec![Email::from("c@x")]);
        assert_eq!(store.find_emails(&UserFilter::all()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn enqueue_sets_zero_progress() {
        let store = store_with(&["a@x"]).await;
        enqueue(&store, "a@x", "s1", 3).await;
        let user = store.find_user(&"a@x".into()).await.unwrap().unwrap();
        assert_eq!(user.queue.len(), 1);
        assert_eq!(user.progress.get(&"s1".into()), Some(0));
    }

    #[tokio::test]
    async fn placement_moves_front_share_and_counts() {
        let store = store_with(&["a@x", "b@x"]).await;
        enqueue(&store, "a@x", "s1", 3).await;

        let placed = store
            .place_share(&"a@x".into(), &"s1".into(), &"b@x".into())
            .await
            .unwrap();
        assert_eq!(placed.share, token(0));
        assert_eq!(placed.remaining, 2);
        assert_eq!(placed.progress, 1);

        let b = store.find_user(&"b@x".into()).await.unwrap().unwrap();
        assert!(b.holds(&"s1".into()));
    }

    #[tokio::test]
    async fn placement_preconditions_leave_state_untouched() {
        let store = store_with(&["a@x", "b@x"]).await;
        enqueue(&store, "a@x", "s1", 3).await;
        store
            .place_share(&"a@x".into(), &"s1".into(), &"b@x".into())
            .await
            .unwrap();

        let again = store
            .place_share(&"a@x".into(), &"s1".into(), &"b@x".into())
            .await
            .unwrap_err();
        assert!(again.is_skippable());

        let gone = store
            .place_share(&"a@x".into(), &"s1".into(), &"ghost@x".into())
            .await
            .unwrap_err();
        assert!(matches!(gone, StoreError::RecipientGone { .. }));

        let a = store.find_user(&"a@x".into()).await.unwrap().unwrap();
        assert_eq!(a.queue[0].remaining.len(), 2);
        assert_eq!(a.progress.get(&"s1".into()), Some(1));
    }

    #[tokio::test]
    async fn settle_rotates_then_completes() {
        let store = store_with(&["a@x", "b@x"]).await;
        enqueue(&store, "a@x", "s1", 1).await;
        enqueue(&store, "a@x", "s2", 1).await;

        let settled = store.settle_secret(&"a@x".into(), &"s1".into()).await.unwrap();
        assert_eq!(settled, Settlement::Rotated { remaining: 1 });
        let a = store.find_user(&"a@x".into()).await.unwrap().unwrap();
        assert_eq!(a.queue[0].secret_id, "s2".into());

        store
            .place_share(&"a@x".into(), &"s1".into(), &"b@x".into())
            .await
            .unwrap();
        let settled = store.settle_secret(&"a@x".into(), &"s1".into()).await.unwrap();
        assert_eq!(settled, Settlement::Completed);
        let settled = store.settle_secret(&"a@x".into(), &"s1".into()).await.unwrap();
        assert_eq!(settled, Settlement::Absent);
    }

    #[tokio::test]
    async fn transfer_requires_free_recipient() {
        let store = store_with(&["a@x", "b@x", "c@x", "d@x"]).await;
        enqueue(&store, "a@x", "s1", 2).await;
        for r in ["b@x", "c@x"] {
            store
                .place_share(&"a@x".into(), &"s1".into(), &r.into())
                .await
                .unwrap();
        }

        let err = store
            .transfer_share(&"b@x".into(), &"c@x".into(), &"s1".into())
            .await
            .unwrap_err();
        assert!(err.is_skippable());

        store
            .transfer_share(&"b@x".into(), &"d@x".into(), &"s1".into())
            .await
            .unwrap();
        let b = store.find_user(&"b@x".into()).await.unwrap().unwrap();
        let d = store.find_user(&"d@x".into()).await.unwrap().unwrap();
        assert!(!b.holds(&"s1".into()));
        assert!(d.holds(&"s1".into()));
    }

    #[tokio::test]
    async fn rename_rekeys_record() {
        let store = store_with(&["a@x", "b@x"]).await;
        enqueue(&store, "a@x", "s1", 1).await;

        let taken = store
            .update_profile(&"a@x".into(), None, Some(&"b@x".into()))
            .await
            .unwrap_err();
        assert!(matches!(taken, StoreError::AlreadyExists { .. }));

        store
            .update_profile(&"a@x".into(), Some("Ana"), Some(&"ana@x".into()))
            .await
            .unwrap();
        assert!(store.find_user(&"a@x".into()).await.unwrap().is_none());
        let ana = store.find_user(&"ana@x".into()).await.unwrap().unwrap();
        assert_eq!(ana.name, "Ana");
        assert_eq!(ana.queue.len(), 1);
    }

    #[tokio::test]
    async fn ledger_upserts_by_secret() {
        let store = MemoryStore::new();
        let entry = DeletionLedgerEntry {
            secret_id: "s1".into(),
            expected_share_count: 3,
        };
        store.record_deletion(&entry).await.unwrap();
        store.record_deletion(&entry).await.unwrap();
        assert_eq!(store.ledger_entries().await.unwrap().len(), 1);

        assert!(store.resolve_ledger_entry(&"s1".into()).await.unwrap());
        assert!(!store.resolve_ledger_entry(&"s1".into()).await.unwrap());
        assert!(store.next_ledger_entry().await.unwrap().is_none());
    }
}
