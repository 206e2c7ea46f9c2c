//! Threshold splitting of secrets into shares, and the word codec that
//! makes share bytes readable.
//!
//! - **shamir**: all-of-n Shamir splitting over arbitrary-length secrets
//! - **words**: reversible bytes ↔ word-sequence encoding
pub mod shamir;
pub mod words;

use zeroize::Zeroizing;

use crate::types::ShareToken;

pub use shamir::{ShamirScheme, MAX_SHARES};

/// Errors from splitting, recombining or decoding shares.
#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    #[error("share count must be between 1 and {max}, got {requested}")]
    InvalidShareCount { requested: usize, max: usize },

    #[error("secret too large to split: {len} bytes")]
    SecretTooLarge { len: usize },

    #[error("split failed: {0}")]
    Split(String),

    #[error("insufficient shares: have {have}, need {need}")]
    InsufficientShares { have: usize, need: usize },

    #[error("malformed share: {0}")]
    MalformedShare(String),

    #[error("share interpolation failed: {0}")]
    Interpolation(String),

    #[error("invalid word sequence: {0}")]
    Decoding(String),
}

impl SplitError {
    /// Whether this error means a reconstruction attempt could not produce
    /// the secret.
    pub fn is_reconstruction(&self) -> bool {
        matches!(
            self,
            SplitError::InsufficientShares { .. }
                | SplitError::MalformedShare(_)
                | SplitError::Interpolation(_)
        )
    }
}

/// An n-of-n threshold scheme: every share is needed to rebuild the secret.
pub trait ThresholdScheme: Send + Sync {
    /// Split `secret` into exactly `n` shares.
    fn split(&self, secret: &[u8], n: usize) -> Result<Vec<ShareToken>, SplitError>;

    /// Rebuild the secret from all of its shares. Fewer than the split's
    /// share count is an error, never a partial result.
    fn combine(&self, shares: &[ShareToken]) -> Result<Zeroizing<Vec<u8>>, SplitError>;
}
