//! Move every message of one chat onto another.

use crate::error::{EntityError, FetchError, Stage};
use crate::lister::list_all;
use crate::model::{CHAT_ID_FIELD, MessageEntity};
use crate::store::{Collection, DocumentStore, Fields, Filter};
use serde_json::Value;
use tracing::{debug, warn};

/// Outcome of one reassignment pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reassignment {
    /// Messages whose `chatId` now points at the canonical chat.
    pub count: usize,
    pub errors: Vec<EntityError>,
}

/// Point every message of `source` at `canonical`.
///
/// The full message list is fetched before the first patch, so the shrinking
/// filter result cannot shift offsets under the pager. Each patch writes only
/// `chatId`. A failed patch is recorded and the rest continue; a rerun only
/// sees the messages that are still left behind.
///
/// # Errors
///
/// Fails only when the message listing itself fails, before any write.
pub fn reassign<S: DocumentStore + ?Sized>(
    store: &S,
    page_size: usize,
    source: &str,
    canonical: &str,
) -> Result<Reassignment, FetchError> {
    let filter = Filter::equals(CHAT_ID_FIELD, source);
    let messages = list_all(store, Collection::Messages, Some(&filter), page_size)?;
    debug!(source, canonical, found = messages.len(), "messages to reassign");

    let mut patch = Fields::new();
    patch.insert(CHAT_ID_FIELD.to_string(), Value::from(canonical));

    let mut outcome = Reassignment::default();
    for message in messages.iter().map(MessageEntity::from_document) {
        match store.update(Collection::Messages, &message.id, &patch) {
            Ok(_) => outcome.count += 1,
            Err(err) => {
                warn!(message = %message.id, source, canonical, error = %err, "message reassignment failed");
                outcome.errors.push(EntityError::new(
                    source,
                    Stage::UpdateMessage {
                        message_id: message.id,
                    },
                    err,
                ));
            }
        }
    }

    Ok(outcome)
}
