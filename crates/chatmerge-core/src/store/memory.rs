//! In-process [`DocumentStore`] with fault injection and a write journal.

use super::{Collection, Document, DocumentStore, Fields, Filter, Page, StoreError};
use std::cell::RefCell;
use std::collections::HashMap;

/// A store call that can be made to fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Op {
    List(Collection),
    Get(Collection, String),
    Create(Collection, String),
    Update(Collection, String),
    Delete(Collection, String),
}

/// A mutation that reached the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    Create { collection: Collection, id: String },
    Update { collection: Collection, id: String },
    Delete { collection: Collection, id: String },
}

#[derive(Debug, Default)]
struct State {
    chats: Vec<Document>,
    messages: Vec<Document>,
    faults: HashMap<Op, StoreError>,
    one_shot: HashMap<Op, StoreError>,
    writes: Vec<Write>,
}

impl State {
    const fn docs(&self, collection: Collection) -> &Vec<Document> {
        match collection {
            Collection::Chats => &self.chats,
            Collection::Messages => &self.messages,
        }
    }

    const fn docs_mut(&mut self, collection: Collection) -> &mut Vec<Document> {
        match collection {
            Collection::Chats => &mut self.chats,
            Collection::Messages => &mut self.messages,
        }
    }

    fn check(&mut self, op: &Op) -> Result<(), StoreError> {
        if let Some(err) = self.one_shot.remove(op) {
            return Err(err);
        }
        self.faults.get(op).map_or(Ok(()), |err| Err(err.clone()))
    }
}

/// Insertion-ordered in-memory collections.
///
/// Faults from [`MemoryStore::fail`] stay armed until
/// [`MemoryStore::clear_faults`]; [`MemoryStore::fail_once`] fires on the
/// next matching call only. Seeding through
/// [`MemoryStore::insert`] is not journaled; trait writes are.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RefCell<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document without journaling it.
    pub fn insert(&self, collection: Collection, doc: Document) {
        self.state.borrow_mut().docs_mut(collection).push(doc);
    }

    /// Make every matching call return `error`.
    pub fn fail(&self, op: Op, error: StoreError) {
        self.state.borrow_mut().faults.insert(op, error);
    }

    /// Make only the next matching call return `error`.
    pub fn fail_once(&self, op: Op, error: StoreError) {
        self.state.borrow_mut().one_shot.insert(op, error);
    }

    pub fn clear_faults(&self) {
        let mut state = self.state.borrow_mut();
        state.faults.clear();
        state.one_shot.clear();
    }

    #[must_use]
    pub fn document(&self, collection: Collection, id: &str) -> Option<Document> {
        self.state
            .borrow()
            .docs(collection)
            .iter()
            .find(|doc| doc.id == id)
            .cloned()
    }

    #[must_use]
    pub fn documents(&self, collection: Collection) -> Vec<Document> {
        self.state.borrow().docs(collection).clone()
    }

    #[must_use]
    pub fn writes(&self) -> Vec<Write> {
        self.state.borrow().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.borrow_mut().writes.clear();
    }
}

impl DocumentStore for MemoryStore {
    fn list(
        &self,
        collection: Collection,
        filter: Option<&Filter>,
        limit: usize,
        offset: usize,
    ) -> Result<Page, StoreError> {
        let mut state = self.state.borrow_mut();
        state.check(&Op::List(collection))?;

        let matching: Vec<&Document> = state
            .docs(collection)
            .iter()
            .filter(|doc| filter.is_none_or(|f| f.matches(doc)))
            .collect();
        let documents: Vec<Document> = matching
            .iter()
            .skip(offset)
            .take(limit)
            .map(|doc| (*doc).clone())
            .collect();

        Ok(Page {
            has_more: offset.saturating_add(limit) < matching.len(),
            documents,
        })
    }

    fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError> {
        self.state
            .borrow_mut()
            .check(&Op::Get(collection, id.to_string()))?;
        Ok(self.document(collection, id))
    }

    fn create(
        &self,
        collection: Collection,
        id: &str,
        data: &Fields,
    ) -> Result<Document, StoreError> {
        let mut state = self.state.borrow_mut();
        state.check(&Op::Create(collection, id.to_string()))?;

        if state.docs(collection).iter().any(|doc| doc.id == id) {
            return Err(StoreError::Conflict);
        }

        let doc = Document::new(id, data.clone());
        state.docs_mut(collection).push(doc.clone());
        state.writes.push(Write::Create {
            collection,
            id: id.to_string(),
        });
        Ok(doc)
    }

    fn update(
        &self,
        collection: Collection,
        id: &str,
        data: &Fields,
    ) -> Result<Document, StoreError> {
        let mut state = self.state.borrow_mut();
        state.check(&Op::Update(collection, id.to_string()))?;

        let doc = state
            .docs_mut(collection)
            .iter_mut()
            .find(|doc| doc.id == id)
            .ok_or(StoreError::NotFound)?;
        doc.fields
            .extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
        let updated = doc.clone();

        state.writes.push(Write::Update {
            collection,
            id: id.to_string(),
        });
        Ok(updated)
    }

    fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        let mut state = self.state.borrow_mut();
        state.check(&Op::Delete(collection, id.to_string()))?;

        let docs = state.docs_mut(collection);
        let position = docs
            .iter()
            .position(|doc| doc.id == id)
            .ok_or(StoreError::NotFound)?;
        docs.remove(position);

        state.writes.push(Write::Delete {
            collection,
            id: id.to_string(),
        });
        Ok(())
    }
}
