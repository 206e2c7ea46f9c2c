//! Read-only view of how far each of a user's secrets has been dispersed.
use std::sync::Arc;

use serde::Serialize;

use crate::error::ConfideError;
use crate::store::Datastore;
use crate::types::{Email, SecretId};

/// Placement count for one secret against the configured share count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretProgress {
    pub secret_id: SecretId,
    pub placed: usize,
    pub total: usize,
}

impl SecretProgress {
    pub fn is_complete(&self) -> bool {
        self.placed >= self.total
    }
}

pub struct ProgressTracker<S> {
    store: Arc<S>,
    share_count: usize,
}

impl<S: Datastore> ProgressTracker<S> {
    pub fn new(store: Arc<S>, share_count: usize) -> Self {
        Self { store, share_count }
    }

    /// Every secret the user has submitted, ordered by id.
    pub async fn all_progress(&self, email: &Email) -> Result<Vec<SecretProgress>, ConfideError> {
        let user = self
            .store
            .find_user(email)
            .await?
            .ok_or_else(|| ConfideError::user_not_found(email))?;

        let mut entries: Vec<SecretProgress> = user
            .progress
            .iter()
            .map(|(secret_id, placed)| SecretProgress {
                secret_id: secret_id.clone(),
                placed,
                total: self.share_count,
            })
            .collect();
        entries.sort_by(|a, b| a.secret_id.cmp(&b.secret_id));
        Ok(entries)
    }

    /// `None` when the user never submitted `secret_id`.
    pub async fn progress_of(
        &self,
        email: &Email,
        secret_id: &SecretId,
    ) -> Result<Option<usize>, ConfideError> {
        let user = self
            .store
            .find_user(email)
            .await?
            .ok_or_else(|| ConfideError::user_not_found(email))?;
        Ok(user.progress.get(secret_id))
    }
}
