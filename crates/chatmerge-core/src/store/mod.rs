//! Remote document store contract.
//!
//! The store is an opaque paginated CRUD API. [`DocumentStore`] is the seam:
//! the binary talks HTTP, tests use [`memory::MemoryStore`].

pub mod memory;

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Attribute map carried by a document.
pub type Fields = Map<String, Value>;

/// The two collections the migration touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Chats,
    Messages,
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chats => f.write_str("chats"),
            Self::Messages => f.write_str("messages"),
        }
    }
}

/// Errors reported by a store implementation for a single call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("document not found")]
    NotFound,

    #[error("document already exists")]
    Conflict,

    #[error("store returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed store response: {0}")]
    Decode(String),
}

/// Equality filter on one attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub field: String,
    pub value: String,
}

impl Filter {
    #[must_use]
    pub fn equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Whether `doc` carries `field == value`. Numbers compare by their decimal text.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        match doc.field(&self.field) {
            Some(Value::String(s)) => *s == self.value,
            Some(Value::Number(n)) => n.to_string() == self.value,
            _ => false,
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub documents: Vec<Document>,
    pub has_more: bool,
}

/// A stored record: identifier plus user attributes.
///
/// Store-maintained attributes (keys starting with `$`) are dropped on decode
/// so that `fields` can be written back verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    #[must_use]
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Decode a raw store record.
    ///
    /// The identifier is `$id`, or `id` when `$id` is absent. Attributes come
    /// from the top level, overlaid with a nested `data` object if present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Decode`] when the record is not an object or has no
    /// string identifier.
    pub fn from_json(value: Value) -> Result<Self, StoreError> {
        let mut object = match value {
            Value::Object(object) => object,
            other => {
                return Err(StoreError::Decode(format!(
                    "expected document object, got {other}"
                )));
            }
        };

        let id = match (object.remove("$id"), object.remove("id")) {
            (Some(Value::String(id)), _) | (None, Some(Value::String(id))) => id,
            _ => {
                return Err(StoreError::Decode(
                    "document has no string `$id` or `id`".to_string(),
                ));
            }
        };

        let nested = match object.remove("data") {
            Some(Value::Object(data)) => Some(data),
            Some(other) => {
                object.insert("data".to_string(), other);
                None
            }
            None => None,
        };

        let mut fields: Fields = object
            .into_iter()
            .filter(|(key, _)| !key.starts_with('$'))
            .collect();
        if let Some(data) = nested {
            fields.extend(data.into_iter().filter(|(key, _)| !key.starts_with('$')));
        }

        Ok(Self { id, fields })
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Paginated CRUD access to the remote store.
///
/// Implementations own network concerns (auth, timeouts, retries); callers
/// only see per-call success or a [`StoreError`].
pub trait DocumentStore {
    /// List up to `limit` documents starting at `offset`, optionally filtered.
    ///
    /// # Errors
    ///
    /// Any failure to produce the page.
    fn list(
        &self,
        collection: Collection,
        filter: Option<&Filter>,
        limit: usize,
        offset: usize,
    ) -> Result<Page, StoreError>;

    /// Fetch one document; `Ok(None)` when it does not exist.
    ///
    /// # Errors
    ///
    /// Any failure other than not-found.
    fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError>;

    /// Create a document under a caller-chosen id.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`] when `id` is taken, or any other failure.
    fn create(&self, collection: Collection, id: &str, data: &Fields)
    -> Result<Document, StoreError>;

    /// Patch only the given attributes of an existing document.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when `id` does not exist, or any other failure.
    fn update(&self, collection: Collection, id: &str, data: &Fields)
    -> Result<Document, StoreError>;

    /// Delete a document.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when `id` does not exist, or any other failure.
    fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError>;
}
