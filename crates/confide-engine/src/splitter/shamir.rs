//! All-of-n Shamir splitting for secrets of any length.
//!
//! The field arithmetic comes from `bc-shamir`, which only accepts 16–32
//! byte even-length secrets. Secrets are therefore framed first:
//!
//! ```text
//! [len: u32 BE][secret bytes][zero padding to a multiple of 32]
//! ```
//!
//! and every 32-byte block is split on its own. Share `i` of the secret is
//! block-share `i` of every block, behind a small header:
//!
//! ```text
//! [version][index][threshold][block share 0][block share 1]...
//! ```
use bc_rand::SecureRandomNumberGenerator;
use bc_shamir::{recover_secret, split_secret};
use zeroize::Zeroizing;

use super::{SplitError, ThresholdScheme};
use crate::types::ShareToken;

/// Largest share count the underlying scheme supports.
pub const MAX_SHARES: usize = 16;

const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 3;
const BLOCK_LEN: usize = 32;
const LENGTH_PREFIX_LEN: usize = 4;

/// Shamir secret sharing with threshold equal to the share count.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShamirScheme;

impl ShamirScheme {
    pub fn new() -> Self {
        Self
    }
}

impl ThresholdScheme for ShamirScheme {
    fn split(&self, secret: &[u8], n: usize) -> Result<Vec<ShareToken>, SplitError> {
        if n == 0 || n > MAX_SHARES {
            return Err(SplitError::InvalidShareCount {
                requested: n,
                max: MAX_SHARES,
            });
        }

        let framed = frame(secret)?;
        let mut rng = SecureRandomNumberGenerator;

        let mut tokens: Vec<Vec<u8>> = (0..n)
            .map(|index| {
                let mut token = Vec::with_capacity(HEADER_LEN + framed.len());
                token.extend_from_slice(&[FORMAT_VERSION, index as u8, n as u8]);
                token
            })
            .collect();

        for block in framed.chunks(BLOCK_LEN) {
            let block_shares = Zeroizing::new(
                split_secret(n, n, block, &mut rng).map_err(|e| SplitError::Split(e.to_string()))?,
            );
            for (token, share) in tokens.iter_mut().zip(block_shares.iter()) {
                token.extend_from_slice(share);
            }
        }

        Ok(tokens.into_iter().map(ShareToken::from_bytes).collect())
    }

    fn combine(&self, shares: &[ShareToken]) -> Result<Zeroizing<Vec<u8>>, SplitError> {
        let first = shares
            .first()
            .ok_or(SplitError::InsufficientShares { have: 0, need: 1 })?;
        let expected = Header::parse(first.as_bytes())?;
        let token_len = first.len();

        let mut indexes = Vec::with_capacity(shares.len());
        for share in shares {
            let header = Header::parse(share.as_bytes())?;
            if header.threshold != expected.threshold || share.len() != token_len {
                return Err(SplitError::MalformedShare(
                    "shares come from different splits".into(),
                ));
            }
            let index = usize::from(header.index);
            if indexes.contains(&index) {
                return Err(SplitError::MalformedShare(format!(
                    "share index {index} supplied twice"
                )));
            }
            indexes.push(index);
        }

        let need = usize::from(expected.threshold);
        if indexes.len() < need {
            return Err(SplitError::InsufficientShares {
                have: indexes.len(),
                need,
            });
        }

        let body_len = token_len - HEADER_LEN;
        let mut framed = Zeroizing::new(Vec::with_capacity(body_len));
        for offset in (HEADER_LEN..token_len).step_by(BLOCK_LEN) {
            let block_shares: Vec<&[u8]> = shares
                .iter()
                .map(|s| &s.as_bytes()[offset..offset + BLOCK_LEN])
                .collect();
            let block = Zeroizing::new(
                recover_secret(&indexes, &block_shares)
                    .map_err(|e| SplitError::Interpolation(e.to_string()))?,
            );
            framed.extend_from_slice(&block);
        }

        unframe(&framed)
    }
}

struct Header {
    index: u8,
    threshold: u8,
}

impl Header {
    fn parse(token: &[u8]) -> Result<Self, SplitError> {
        if token.len() < HEADER_LEN + BLOCK_LEN || (token.len() - HEADER_LEN) % BLOCK_LEN != 0 {
            return Err(SplitError::MalformedShare(format!(
                "unexpected share length {}",
                token.len()
            )));
        }
        if token[0] != FORMAT_VERSION {
            return Err(SplitError::MalformedShare(format!(
                "unknown share format version {}",
                token[0]
            )));
        }
        let (index, threshold) = (token[1], token[2]);
        if threshold == 0 || usize::from(threshold) > MAX_SHARES || index >= threshold {
            return Err(SplitError::MalformedShare(format!(
                "share index {index} invalid for threshold {threshold}"
            )));
        }
        Ok(Self { index, threshold })
    }
}

fn frame(secret: &[u8]) -> Result<Zeroizing<Vec<u8>>, SplitError> {
    let len = u32::try_from(secret.len())
        .map_err(|_| SplitError::SecretTooLarge { len: secret.len() })?;
    let unpadded = LENGTH_PREFIX_LEN + secret.len();
    let padded = unpadded.div_ceil(BLOCK_LEN) * BLOCK_LEN;

    let mut framed = Zeroizing::new(Vec::with_capacity(padded));
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(secret);
    framed.resize(padded, 0);
    Ok(framed)
}

fn unframe(framed: &[u8]) -> Result<Zeroizing<Vec<u8>>, SplitError> {
    let prefix: [u8; LENGTH_PREFIX_LEN] = framed
        .get(..LENGTH_PREFIX_LEN)
        .and_then(|p| p.try_into().ok())
        .ok_or_else(|| SplitError::MalformedShare("missing length prefix".into()))?;
    let len = u32::from_be_bytes(prefix) as usize;
    let body = framed
        .get(LENGTH_PREFIX_LEN..LENGTH_PREFIX_LEN + len)
        .ok_or_else(|| SplitError::MalformedShare("length prefix exceeds data".into()))?;
    Ok(Zeroizing::new(body.to_vec()))
}
