//! Canonical merge keys for direct-message chats.
//!
//! A key is `dm_<lo>_<hi>` for the sorted participant pair. When that form is
//! longer than [`MAX_KEY_LEN`] (the store's document id limit), the pair is
//! hashed instead: `dm_` + the first [`DIGEST_HEX_LEN`] hex digits of
//! SHA-1(`<lo>_<hi>`).
//!
//! Ordering and length are measured in UTF-16 code units. Keys already stored
//! by the mobile client and earlier tooling were produced that way, and a
//! rerun must land on exactly the same ids.

use crate::error::ValidationError;
use serde::Serialize;
use sha1::{Digest, Sha1};
use std::cmp::Ordering;
use std::fmt;

pub const KEY_PREFIX: &str = "dm_";
pub const PAIR_SEPARATOR: &str = "_";
pub const MAX_KEY_LEN: usize = 36;
pub const DIGEST_HEX_LEN: usize = 16;

/// Deterministic identifier of the canonical chat for an unordered pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct MergeKey(String);

impl MergeKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    /// True when the key was produced by the digest fallback.
    #[must_use]
    pub fn is_hashed(&self) -> bool {
        self.0.len() == KEY_PREFIX.len() + DIGEST_HEX_LEN
            && self.0[KEY_PREFIX.len()..]
                .bytes()
                .all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
    }
}

impl fmt::Display for MergeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MergeKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for MergeKey {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

fn utf16_cmp(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Sort a participant pair into canonical order.
///
/// # Errors
///
/// [`ValidationError::EmptyParticipant`] for an empty id and
/// [`ValidationError::SelfPair`] when both ids are equal.
pub fn sorted_pair<'a>(a: &'a str, b: &'a str) -> Result<(&'a str, &'a str), ValidationError> {
    if a.is_empty() || b.is_empty() {
        return Err(ValidationError::EmptyParticipant);
    }
    match utf16_cmp(a, b) {
        Ordering::Less => Ok((a, b)),
        Ordering::Greater => Ok((b, a)),
        Ordering::Equal => Err(ValidationError::SelfPair { id: a.to_string() }),
    }
}

/// Derive the merge key for an unordered participant pair.
///
/// # Errors
///
/// See [`sorted_pair`].
pub fn derive(a: &str, b: &str) -> Result<MergeKey, ValidationError> {
    let (lo, hi) = sorted_pair(a, b)?;
    let joined = format!("{lo}{PAIR_SEPARATOR}{hi}");
    let primary = format!("{KEY_PREFIX}{joined}");
    if utf16_len(&primary) <= MAX_KEY_LEN {
        return Ok(MergeKey(primary));
    }

    let digest = Sha1::digest(joined.as_bytes());
    let hex = format!("{digest:x}");
    Ok(MergeKey(format!("{KEY_PREFIX}{}", &hex[..DIGEST_HEX_LEN])))
}
