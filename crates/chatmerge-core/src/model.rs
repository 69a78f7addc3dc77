//! Chat and message views over raw store documents.

use crate::error::ValidationError;
use crate::store::{Document, Fields};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

pub const MEMBERS_FIELD: &str = "members";
pub const CHAT_ID_FIELD: &str = "chatId";
pub const CREATED_AT_FIELD: &str = "createdAt";
pub const SUPERSEDED_BY_FIELD: &str = "supersededBy";

/// A chat thread. Everything except the id is pass-through payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatEntity {
    pub id: String,
    pub payload: Fields,
}

impl ChatEntity {
    #[must_use]
    pub fn from_document(doc: Document) -> Self {
        Self {
            id: doc.id,
            payload: doc.fields,
        }
    }

    /// Raw `members` values. Missing or non-array counts as no members.
    #[must_use]
    pub fn members(&self) -> &[Value] {
        match self.payload.get(MEMBERS_FIELD) {
            Some(Value::Array(members)) => members,
            _ => &[],
        }
    }

    /// Marker left by a previous run under the `mark` policy.
    #[must_use]
    pub fn superseded_by(&self) -> Option<&str> {
        self.payload.get(SUPERSEDED_BY_FIELD).and_then(Value::as_str)
    }

    /// Attributes for the canonical twin of this chat.
    ///
    /// Copies the payload, pins `members` to the sorted pair, and fills
    /// `createdAt` with `now` when it is missing, null or empty.
    #[must_use]
    pub fn canonical_fields(&self, lo: &str, hi: &str, now: DateTime<Utc>) -> Fields {
        let mut fields = self.payload.clone();
        fields.remove(SUPERSEDED_BY_FIELD);
        fields.insert(
            MEMBERS_FIELD.to_string(),
            Value::Array(vec![Value::from(lo), Value::from(hi)]),
        );

        let has_created_at = match fields.get(CREATED_AT_FIELD) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        };
        if !has_created_at {
            fields.insert(
                CREATED_AT_FIELD.to_string(),
                Value::from(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
        fields
    }
}

/// Text form of one `members` entry. Numbers use their decimal text.
///
/// # Errors
///
/// [`ValidationError::MalformedParticipant`] for anything but a string or number.
pub fn member_id(value: &Value) -> Result<String, ValidationError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(ValidationError::MalformedParticipant {
            value: other.to_string(),
        }),
    }
}

/// A chat message; only `chatId` is ever touched.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEntity {
    pub id: String,
    pub chat_id: Option<String>,
}

impl MessageEntity {
    #[must_use]
    pub fn from_document(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            chat_id: doc
                .field(CHAT_ID_FIELD)
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
        }
    }
}
