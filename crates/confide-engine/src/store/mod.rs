//! Datastore interface: the repository every component is handed at
//! construction.
//!
//! Each method is one atomic unit: it either applies all of its effects or
//! none. Two backends:
//! - **memory**: a single mutex around the whole state
//! - **sqlite**: one SQLite transaction per method
pub mod memory;
pub mod sqlite;

use crate::types::{DeletionLedgerEntry, Email, PendingSecret, ReceivedShare, SecretId, ShareToken, User};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Datastore failures.
///
/// `RecipientGone` and `ConcurrentModification` mean a conditional write
/// found its precondition false; callers skip and carry on. `Backend` and
/// `Sqlite` are fatal to the current operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{what} not found")]
    NotFound { what: String },

    #[error("user {email} already exists")]
    AlreadyExists { email: Email },

    #[error("recipient {email} no longer exists")]
    RecipientGone { email: Email },

    #[error("precondition failed: {reason}")]
    ConcurrentModification { reason: String },

    #[error("backend failure: {0}")]
    Backend(String),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    pub(crate) fn user(email: &Email) -> Self {
        StoreError::NotFound {
            what: format!("user {email}"),
        }
    }

    pub(crate) fn queued(owner: &Email, secret_id: &SecretId) -> Self {
        StoreError::NotFound {
            what: format!("queued secret {secret_id} of {owner}"),
        }
    }

    pub(crate) fn held(holder: &Email, secret_id: &SecretId) -> Self {
        StoreError::NotFound {
            what: format!("share of {secret_id} held by {holder}"),
        }
    }

    pub(crate) fn already_holds(recipient: &Email, secret_id: &SecretId) -> Self {
        StoreError::ConcurrentModification {
            reason: format!("{recipient} already holds a share of {secret_id}"),
        }
    }

    /// A targeted write whose precondition no longer held.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            StoreError::RecipientGone { .. } | StoreError::ConcurrentModification { .. }
        )
    }
}

/// Predicates for [`Datastore::find_users`]. Unset fields match everyone.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub exclude: Option<Email>,
    pub lacking_share: Option<SecretId>,
    pub holding_share: Option<SecretId>,
    pub lacking_progress: Option<SecretId>,
}

impl UserFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// `email != excluded`
    pub fn excluding(mut self, email: Email) -> Self {
        self.exclude = Some(email);
        self
    }

    /// Holds no share with this secret id.
    pub fn lacking_share_for(mut self, secret_id: SecretId) -> Self {
        self.lacking_share = Some(secret_id);
        self
    }

    /// Holds a share with this secret id.
    pub fn holding_share_for(mut self, secret_id: SecretId) -> Self {
        self.holding_share = Some(secret_id);
        self
    }

    /// Has no progress entry for this secret id.
    pub fn lacking_progress_for(mut self, secret_id: SecretId) -> Self {
        self.lacking_progress = Some(secret_id);
        self
    }

    pub fn matches(&self, user: &User) -> bool {
        if self.exclude.as_ref() == Some(&user.email) {
            return false;
        }
        if let Some(id) = &self.lacking_share {
            if user.holds(id) {
                return false;
            }
        }
        if let Some(id) = &self.holding_share {
            if !user.holds(id) {
                return false;
            }
        }
        if let Some(id) = &self.lacking_progress {
            if user.progress.contains(id) {
                return false;
            }
        }
        true
    }
}

/// What a successful [`Datastore::place_share`] did.
#[derive(Debug, Clone)]
pub struct Placement {
    /// The share now held by the recipient.
    pub share: ShareToken,
    /// Shares still queued for the secret after this placement.
    pub remaining: usize,
    /// Owner's progress count for the secret after this placement.
    pub progress: usize,
}

/// What [`Datastore::settle_secret`] did with a queued secret after a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// No shares left: removed from the queue.
    Completed,
    /// Shares left: moved to the back of the queue.
    Rotated { remaining: usize },
    /// Not queued any more (owner deleted, or settled by a concurrent round).
    Absent,
}

/// Storage the engine runs against.
#[async_trait::async_trait]
pub trait Datastore: Send + Sync {
    /// Look up one user.
    async fn find_user(&self, email: &Email) -> Result<Option<User>, StoreError>;

    /// All users matching `filter`, ordered by email.
    async fn find_users(&self, filter: &UserFilter) -> Result<Vec<User>, StoreError>;

    /// Emails of the users matching `filter`, ordered. Cheaper than
    /// [`Datastore::find_users`] when only the keys are needed.
    async fn find_emails(&self, filter: &UserFilter) -> Result<Vec<Email>, StoreError>;

    /// Create an empty user record. Fails with `AlreadyExists`.
    async fn insert_user(&self, email: &Email, name: &str) -> Result<(), StoreError>;

    /// Change display name and/or email. A new email re-keys the record and
    /// everything it owns; fails with `AlreadyExists` when taken.
    async fn update_profile(
        &self,
        email: &Email,
        name: Option<&str>,
        new_email: Option<&Email>,
    ) -> Result<(), StoreError>;

    /// Append a secret to the owner's queue and set its progress to zero.
    async fn enqueue_secret(&self, owner: &Email, pending: PendingSecret) -> Result<(), StoreError>;

    /// Move the next queued share of `secret_id` from `owner` to `recipient`
    /// and bump the owner's progress, all at once.
    ///
    /// Fails with `NotFound` when the owner or queued secret is gone,
    /// `RecipientGone` when the recipient is, and `ConcurrentModification`
    /// when the recipient already holds the secret or no shares remain.
    async fn place_share(
        &self,
        owner: &Email,
        secret_id: &SecretId,
        recipient: &Email,
    ) -> Result<Placement, StoreError>;

    /// Drop `secret_id` from the owner's queue if exhausted, otherwise move
    /// it to the back.
    async fn settle_secret(&self, owner: &Email, secret_id: &SecretId) -> Result<Settlement, StoreError>;

    /// Move the share of `secret_id` held by `from` over to `to`, provided
    /// `to` exists and holds none. No progress counter changes.
    async fn transfer_share(&self, from: &Email, to: &Email, secret_id: &SecretId) -> Result<(), StoreError>;

    /// Give `share` to `to`, provided `to` exists and holds none of that
    /// secret.
    async fn grant_share(&self, to: &Email, share: &ReceivedShare) -> Result<(), StoreError>;

    /// Remove a user and everything it owns. Returns the removed record.
    async fn delete_user(&self, email: &Email) -> Result<User, StoreError>;

    /// Strip `holder`'s share of `secret_id`. `Ok(false)` if it held none.
    async fn purge_share(&self, holder: &Email, secret_id: &SecretId) -> Result<bool, StoreError>;

    /// Insert or replace the ledger entry for `entry.secret_id`.
    async fn record_deletion(&self, entry: &DeletionLedgerEntry) -> Result<(), StoreError>;

    /// Any one ledger entry.
    async fn next_ledger_entry(&self) -> Result<Option<DeletionLedgerEntry>, StoreError>;

    /// Every ledger entry.
    async fn ledger_entries(&self) -> Result<Vec<DeletionLedgerEntry>, StoreError>;

    /// Delete the ledger entry for `secret_id`. `Ok(false)` if already gone.
    async fn resolve_ledger_entry(&self, secret_id: &SecretId) -> Result<bool, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_holding(email: &str, secret: &str) -> User {
        let mut user = User::new(email.into(), "u");
        user.held_shares.push(ReceivedShare {
            secret_id: secret.into(),
            payload: ShareToken::from_bytes(vec![1]),
        });
        user
    }

    #[test]
    fn empty_filter_matches_everyone() {
        assert!(UserFilter::all().matches(&User::new("a@x".into(), "a")));
    }

    #[test]
    fn exclusion_and_share_predicates() {
        let holder = user_holding("h@x", "s1");
        let other = User::new("o@x".into(), "o");

        let eligible = UserFilter::all()
            .excluding("o@x".into())
            .lacking_share_for("s1".into());
        assert!(!eligible.matches(&holder));
        assert!(!eligible.matches(&other));

        let holders = UserFilter::all().holding_share_for("s1".into());
        assert!(holders.matches(&holder));
        assert!(!holders.matches(&other));
    }

    #[test]
    fn progress_predicate() {
        let mut owner = User::new("a@x".into(), "a");
        owner.progress.set("s1".into(), 0);
        let filter = UserFilter::all().lacking_progress_for("s1".into());
        assert!(!filter.matches(&owner));
        assert!(filter.matches(&User::new("b@x".into(), "b")));
    }

    #[test]
    fn skippable_kinds() {
        assert!(StoreError::RecipientGone { email: "a@x".into() }.is_skippable());
        assert!(StoreError::already_holds(&"a@x".into(), &"s".into()).is_skippable());
        assert!(!StoreError::user(&"a@x".into()).is_skippable());
        assert!(!StoreError::Backend("x".into()).is_skippable());
    }
}
