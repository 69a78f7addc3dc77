use crate::store::{Collection, StoreError};
use serde::Serialize;
use serde::ser::SerializeStruct;
use std::fmt;
use std::path::PathBuf;

/// Machine-readable error codes for operators and log scrapers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissing,
    ConfigInvalid,
    ConfigFileUnreadable,
    FetchFailed,
    LookupFailed,
    CreateFailed,
    MessageListFailed,
    MessageUpdateFailed,
    SupersedeFailed,
    SelfPair,
    EmptyParticipant,
    MalformedParticipant,
    KeyCollision,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigMissing => "E1001",
            Self::ConfigInvalid => "E1002",
            Self::ConfigFileUnreadable => "E1003",
            Self::FetchFailed => "E2001",
            Self::LookupFailed => "E3001",
            Self::CreateFailed => "E3002",
            Self::MessageListFailed => "E3003",
            Self::MessageUpdateFailed => "E3004",
            Self::SupersedeFailed => "E3005",
            Self::SelfPair => "E4001",
            Self::EmptyParticipant => "E4002",
            Self::MalformedParticipant => "E4003",
            Self::KeyCollision => "E4004",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigMissing => "Required configuration missing",
            Self::ConfigInvalid => "Configuration value invalid",
            Self::ConfigFileUnreadable => "Configuration file unreadable",
            Self::FetchFailed => "Listing from the document store failed",
            Self::LookupFailed => "Canonical chat lookup failed",
            Self::CreateFailed => "Canonical chat creation failed",
            Self::MessageListFailed => "Listing chat messages failed",
            Self::MessageUpdateFailed => "Message reassignment failed",
            Self::SupersedeFailed => "Superseded chat handling failed",
            Self::SelfPair => "Chat pairs a participant with itself",
            Self::EmptyParticipant => "Chat has an empty participant id",
            Self::MalformedParticipant => "Chat participant is not a string or number",
            Self::KeyCollision => "Merge key is held by a chat of other participants",
        }
    }

    /// Optional remediation hint.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigMissing => Some("Export the listed variables or set them in $CHATMERGE_CONFIG."),
            Self::ConfigInvalid => Some("Fix the listed value and retry."),
            Self::ConfigFileUnreadable => Some("Check the path in $CHATMERGE_CONFIG and its TOML syntax."),
            Self::FetchFailed => Some("Check endpoint, credentials and connectivity, then rerun."),
            Self::LookupFailed | Self::CreateFailed | Self::MessageListFailed => {
                Some("Rerun the migration; processed chats are skipped.")
            }
            Self::MessageUpdateFailed => {
                Some("Rerun the migration; already moved messages no longer match.")
            }
            Self::SupersedeFailed => Some("Rerun with the same policy once the store is reachable."),
            Self::SelfPair | Self::EmptyParticipant | Self::MalformedParticipant => {
                Some("Repair the chat's members attribute by hand.")
            }
            Self::KeyCollision => {
                Some("Inspect both chats by hand; their messages were left in place.")
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Configuration problems detected before any network call.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required configuration: {}", .keys.join(", "))]
    Missing { keys: Vec<&'static str> },

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Missing { .. } => ErrorCode::ConfigMissing,
            Self::Invalid { .. } => ErrorCode::ConfigInvalid,
            Self::Read { .. } | Self::Parse { .. } => ErrorCode::ConfigFileUnreadable,
        }
    }
}

/// A listing failure. Fatal for the run: the listed set is the unit of correctness.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}: failed to list {collection} at offset {offset}: {source}", ErrorCode::FetchFailed.code())]
pub struct FetchError {
    pub collection: Collection,
    pub offset: usize,
    #[source]
    pub source: StoreError,
}

impl FetchError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::FetchFailed
    }
}

/// A chat whose participants cannot form a merge key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("participant {id:?} is paired with itself")]
    SelfPair { id: String },

    #[error("participant id is empty")]
    EmptyParticipant,

    #[error("participant {value} is not a string or number")]
    MalformedParticipant { value: String },

    /// The document at the merge key belongs to a different pair. Ids that
    /// contain `_` can make two pairs share the readable key form.
    #[error("merge key {key} is held by a chat with members [{}]", .members.join(", "))]
    KeyCollision { key: String, members: Vec<String> },
}

impl ValidationError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::SelfPair { .. } => ErrorCode::SelfPair,
            Self::EmptyParticipant => ErrorCode::EmptyParticipant,
            Self::MalformedParticipant { .. } => ErrorCode::MalformedParticipant,
            Self::KeyCollision { .. } => ErrorCode::KeyCollision,
        }
    }
}

impl Serialize for ValidationError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ValidationError", 2)?;
        state.serialize_field("code", self.code().code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Step of the per-chat pipeline an [`EntityError`] happened in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Lookup,
    Create,
    ListMessages,
    UpdateMessage { message_id: String },
    Supersede,
}

impl Stage {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Lookup => ErrorCode::LookupFailed,
            Self::Create => ErrorCode::CreateFailed,
            Self::ListMessages => ErrorCode::MessageListFailed,
            Self::UpdateMessage { .. } => ErrorCode::MessageUpdateFailed,
            Self::Supersede => ErrorCode::SupersedeFailed,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lookup => f.write_str("lookup"),
            Self::Create => f.write_str("create"),
            Self::ListMessages => f.write_str("list-messages"),
            Self::UpdateMessage { message_id } => write!(f, "update-message {message_id}"),
            Self::Supersede => f.write_str("supersede"),
        }
    }
}

/// A failure confined to one chat. Recorded in the report; the run continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}: {stage} failed for chat {chat_id}: {source}", .stage.code().code())]
pub struct EntityError {
    pub chat_id: String,
    pub stage: Stage,
    #[source]
    pub source: StoreError,
}

impl EntityError {
    #[must_use]
    pub fn new(chat_id: impl Into<String>, stage: Stage, source: StoreError) -> Self {
        Self {
            chat_id: chat_id.into(),
            stage,
            source,
        }
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.stage.code()
    }
}

impl Serialize for EntityError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("EntityError", 4)?;
        state.serialize_field("code", self.code().code())?;
        state.serialize_field("chat_id", &self.chat_id)?;
        state.serialize_field("stage", &self.stage.to_string())?;
        state.serialize_field("message", &self.source.to_string())?;
        state.end()
    }
}
