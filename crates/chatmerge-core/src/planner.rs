//! Per-chat merge decision.
//!
//! Planning is read-only. The only store call is the existence lookup for the
//! canonical twin, and it is skipped whenever the answer cannot change the
//! action.

use crate::error::ValidationError;
use crate::key::{self, MergeKey};
use crate::model::{ChatEntity, MEMBERS_FIELD, member_id};
use crate::store::{Collection, Document, DocumentStore, StoreError};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Why a chat needs no work. Every skip carries one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The chat id already equals its merge key.
    AlreadyCanonical,
    /// Group chat or broken members list.
    NotAPair { members: usize },
    /// Two members that cannot form a key.
    Invalid { error: ValidationError },
    /// Marked by an earlier run as folded into `key`.
    AlreadyMerged { key: MergeKey },
    /// The same id appeared earlier in this run's listing.
    Duplicate,
    /// The merge key is taken by a chat of another pair; nothing was moved.
    KeyCollision { error: ValidationError },
    /// Canonical twin exists and no messages are left behind.
    NothingToMove,
}

impl SkipReason {
    /// Stable short label, used as the summary bucket.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::AlreadyCanonical => "already_canonical",
            Self::NotAPair { .. } => "not_a_pair",
            Self::Invalid { .. } => "invalid",
            Self::AlreadyMerged { .. } => "already_merged",
            Self::Duplicate => "duplicate",
            Self::KeyCollision { .. } => "key_collision",
            Self::NothingToMove => "nothing_to_move",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyCanonical => f.write_str("already canonical"),
            Self::NotAPair { members } => write!(f, "not a pair ({members} members)"),
            Self::Invalid { error } => write!(f, "invalid: {error}"),
            Self::AlreadyMerged { key } => write!(f, "already merged into {key}"),
            Self::Duplicate => f.write_str("duplicate listing entry"),
            Self::KeyCollision { error } => write!(f, "{error}"),
            Self::NothingToMove => f.write_str("no messages left to move"),
        }
    }
}

/// The canonical chat a duplicate folds into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub key: MergeKey,
    /// Sorted participant pair.
    pub members: (String, String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "target", rename_all = "snake_case")]
pub enum Action {
    Skip(SkipReason),
    CreateCanonicalAndReassign(Target),
    ReassignOnly(Target),
}

impl Action {
    #[must_use]
    pub const fn target(&self) -> Option<&Target> {
        match self {
            Self::Skip(_) => None,
            Self::CreateCanonicalAndReassign(target) | Self::ReassignOnly(target) => Some(target),
        }
    }

    #[must_use]
    pub const fn is_skip(&self) -> bool {
        matches!(self, Self::Skip(_))
    }
}

/// A chat together with what should happen to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub chat_id: String,
    #[serde(flatten)]
    pub action: Action,
}

/// Decide without touching the store whether `chat` can be skipped.
///
/// # Errors
///
/// Returns the [`SkipReason`] when no lookup is needed.
pub fn classify(chat: &ChatEntity) -> Result<Target, SkipReason> {
    let members = chat.members();
    let [a, b] = members else {
        return Err(SkipReason::NotAPair {
            members: members.len(),
        });
    };

    let invalid = |error| SkipReason::Invalid { error };
    let a = member_id(a).map_err(invalid)?;
    let b = member_id(b).map_err(invalid)?;
    let (lo, hi) = key::sorted_pair(&a, &b).map_err(invalid)?;
    let key = key::derive(lo, hi).map_err(invalid)?;

    if key == *chat.id {
        return Err(SkipReason::AlreadyCanonical);
    }
    if chat.superseded_by() == Some(key.as_str()) {
        return Err(SkipReason::AlreadyMerged { key });
    }

    Ok(Target {
        members: (lo.to_string(), hi.to_string()),
        key,
    })
}

/// Check that `existing`, found at the merge key, belongs to `target`'s pair.
///
/// # Errors
///
/// [`ValidationError::KeyCollision`] when its members are not exactly the
/// target pair, including when they are missing or malformed.
pub fn verify_canonical(existing: &Document, target: &Target) -> Result<(), ValidationError> {
    let members: Vec<String> = existing
        .field(MEMBERS_FIELD)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .map(|value| member_id(value).unwrap_or_else(|_| value.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let (lo, hi) = (&target.members.0, &target.members.1);
    let same_pair = match members.as_slice() {
        [a, b] => key::sorted_pair(a, b).is_ok_and(|pair| pair == (lo.as_str(), hi.as_str())),
        _ => false,
    };
    if same_pair {
        Ok(())
    } else {
        Err(ValidationError::KeyCollision {
            key: target.key.to_string(),
            members,
        })
    }
}

/// Plan one chat, probing the store for its canonical twin when needed.
///
/// # Errors
///
/// A lookup failure other than not-found.
pub fn plan<S: DocumentStore + ?Sized>(store: &S, chat: &ChatEntity) -> Result<Plan, StoreError> {
    let action = match classify(chat) {
        Err(reason) => Action::Skip(reason),
        Ok(target) => match store.get(Collection::Chats, target.key.as_str()) {
            Ok(Some(existing)) => match verify_canonical(&existing, &target) {
                Ok(()) => Action::ReassignOnly(target),
                Err(error) => Action::Skip(SkipReason::KeyCollision { error }),
            },
            Ok(None) | Err(StoreError::NotFound) => Action::CreateCanonicalAndReassign(target),
            Err(err) => return Err(err),
        },
    };

    Ok(Plan {
        chat_id: chat.id.clone(),
        action,
    })
}
