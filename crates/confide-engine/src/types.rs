//! Core records: users, queued secrets, held shares, progress and the
//! deletion ledger.
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::splitter::{words, SplitError};

/// Unique identity key of a user record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Email(String);

impl Email {
    pub fn new(email: impl Into<String>) -> Self {
        Self(email.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Email {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Email {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque identifier tying a secret's shares, progress and ledger entry
/// together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretId(String);

impl SecretId {
    /// Fresh random identifier: a UUIDv4 rendered as words.
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4();
        Self(words::encode(uuid.as_bytes()))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SecretId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// One opaque fragment of a split secret.
///
/// Serialized (and displayed) as its word sequence.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ShareToken(Vec<u8>);

impl ShareToken {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Human-readable form, exactly invertible with [`ShareToken::from_words`].
    pub fn to_words(&self) -> String {
        words::encode(&self.0)
    }

    pub fn from_words(text: &str) -> Result<Self, SplitError> {
        words::decode(text).map(Self)
    }
}

impl fmt::Debug for ShareToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShareToken({} bytes)", self.0.len())
    }
}

impl fmt::Display for ShareToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_words())
    }
}

impl From<ShareToken> for String {
    fn from(token: ShareToken) -> Self {
        token.to_words()
    }
}

impl TryFrom<String> for ShareToken {
    type Error = SplitError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        Self::from_words(&text)
    }
}

/// A secret its owner has not finished handing out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSecret {
    pub secret_id: SecretId,
    /// Shares not yet placed. The front is placed first.
    pub remaining: Vec<ShareToken>,
}

impl PendingSecret {
    pub fn new(secret_id: SecretId, shares: Vec<ShareToken>) -> Self {
        Self {
            secret_id,
            remaining: shares,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// A share held on behalf of someone else's secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedShare {
    pub secret_id: SecretId,
    pub payload: ShareToken,
}

/// Per-secret count of shares an owner has placed with other users.
///
/// A secret never written is absent, not zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Progress(HashMap<SecretId, usize>);

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, secret_id: &SecretId) -> Option<usize> {
        self.0.get(secret_id).copied()
    }

    pub fn contains(&self, secret_id: &SecretId) -> bool {
        self.0.contains_key(secret_id)
    }

    pub fn set(&mut self, secret_id: SecretId, count: usize) {
        self.0.insert(secret_id, count);
    }

    /// Add one to the count, creating the entry if needed. Returns the new count.
    pub fn increment(&mut self, secret_id: &SecretId) -> usize {
        let count = self.0.entry(secret_id.clone()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SecretId, usize)> {
        self.0.iter().map(|(id, count)| (id, *count))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A user record as the datastore holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub email: Email,
    pub name: String,
    /// Secrets awaiting distribution; the front is attempted next.
    pub queue: Vec<PendingSecret>,
    /// At most one entry per secret id.
    pub held_shares: Vec<ReceivedShare>,
    pub progress: Progress,
}

impl User {
    pub fn new(email: Email, name: impl Into<String>) -> Self {
        Self {
            email,
            name: name.into(),
            queue: Vec::new(),
            held_shares: Vec::new(),
            progress: Progress::new(),
        }
    }

    /// Whether this user already holds a share of `secret_id`.
    pub fn holds(&self, secret_id: &SecretId) -> bool {
        self.held_shares.iter().any(|s| &s.secret_id == secret_id)
    }

    pub fn held_share(&self, secret_id: &SecretId) -> Option<&ReceivedShare> {
        self.held_shares.iter().find(|s| &s.secret_id == secret_id)
    }

    pub fn pending(&self, secret_id: &SecretId) -> Option<&PendingSecret> {
        self.queue.iter().find(|p| &p.secret_id == secret_id)
    }
}

/// Outstanding cleanup for a secret whose owner account is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionLedgerEntry {
    pub secret_id: SecretId,
    pub expected_share_count: usize,
}
