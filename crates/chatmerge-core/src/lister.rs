//! Offset-paginated enumeration of a whole collection.

use crate::error::FetchError;
use crate::store::{Collection, Document, DocumentStore, Filter};
use tracing::debug;

pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Fetch every document of `collection` matching `filter`.
///
/// Stops at the first short page or when the store reports no further
/// pages. Read-only; calling it again restarts from offset 0.
///
/// # Errors
///
/// The first failing page aborts the listing. Nothing fetched so far is
/// returned.
pub fn list_all<S: DocumentStore + ?Sized>(
    store: &S,
    collection: Collection,
    filter: Option<&Filter>,
    page_size: usize,
) -> Result<Vec<Document>, FetchError> {
    let page_size = page_size.max(1);
    let mut documents = Vec::new();
    let mut offset = 0_usize;

    loop {
        let page = store
            .list(collection, filter, page_size, offset)
            .map_err(|source| FetchError {
                collection,
                offset,
                source,
            })?;

        let fetched = page.documents.len();
        debug!(%collection, offset, fetched, "fetched page");
        documents.extend(page.documents);

        if fetched < page_size || !page.has_more {
            break;
        }
        offset += fetched;
    }

    Ok(documents)
}
