use crate::splitter::SplitError;
use crate::store::StoreError;
use crate::types::{Email, SecretId};

/// Engine-level errors for confide.
///
/// Wraps datastore and splitter failures and maps them onto the kinds
/// callers act on: missing records, failed reconstruction, recipients that
/// changed under a round, and the absence of any eligible recipient.
#[derive(Debug, thiserror::Error)]
pub enum ConfideError {
    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("already exists: {email}")]
    AlreadyExists { email: Email },

    #[error("reconstruction failed: {0}")]
    Reconstruction(#[source] SplitError),

    #[error("split failed: {0}")]
    Split(#[source] SplitError),

    #[error("recipient gone: {email}")]
    RecipientGone { email: Email },

    #[error("concurrent modification: {reason}")]
    ConcurrentModification { reason: String },

    #[error("no eligible recipient for secret {secret_id}")]
    NoEligibleRecipient { secret_id: SecretId },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("datastore error: {0}")]
    Store(#[source] StoreError),
}

impl ConfideError {
    pub(crate) fn user_not_found(email: &Email) -> Self {
        ConfideError::NotFound {
            what: format!("user {email}"),
        }
    }
}

impl From<StoreError> for ConfideError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { what } => ConfideError::NotFound { what },
            StoreError::AlreadyExists { email } => ConfideError::AlreadyExists { email },
            StoreError::RecipientGone { email } => ConfideError::RecipientGone { email },
            StoreError::ConcurrentModification { reason } => {
                ConfideError::ConcurrentModification { reason }
            }
            other => ConfideError::Store(other),
        }
    }
}

impl From<SplitError> for ConfideError {
    fn from(e: SplitError) -> Self {
        if e.is_reconstruction() {
            ConfideError::Reconstruction(e)
        } else {
            ConfideError::Split(e)
        }
    }
}
