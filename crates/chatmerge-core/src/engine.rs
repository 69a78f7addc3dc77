//! Drives the pipeline: list chats, plan each one, apply the plan.
//!
//! Chats are processed one at a time, in listing order. Two chats that share
//! a merge key therefore never race each other on the canonical create, and
//! a failure on one chat is recorded in its [`EntityOutcome`] without
//! touching the others.

use crate::config::{MigrationConfig, SupersededPolicy};
use crate::error::{EntityError, FetchError, Stage, ValidationError};
use crate::lister::{DEFAULT_PAGE_SIZE, list_all};
use crate::model::{ChatEntity, SUPERSEDED_BY_FIELD};
use crate::planner::{self, Action, Plan, SkipReason, Target};
use crate::reassign::reassign;
use crate::report::{EntityOutcome, RunMode, RunReport};
use crate::store::{Collection, DocumentStore, Fields, StoreError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub dry_run: bool,
    pub page_size: usize,
    pub superseded: SupersededPolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: true,
            page_size: DEFAULT_PAGE_SIZE,
            superseded: SupersededPolicy::default(),
        }
    }
}

impl RunOptions {
    #[must_use]
    pub const fn from_config(config: &MigrationConfig, dry_run: bool) -> Self {
        Self {
            dry_run,
            page_size: config.page_size,
            superseded: config.superseded,
        }
    }

    #[must_use]
    pub const fn live(self) -> Self {
        Self {
            dry_run: false,
            ..self
        }
    }
}

/// What was done to the old chat after its messages moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Superseded {
    Marked,
    Deleted,
}

/// Result of applying one plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// This run created the canonical chat.
    pub created: bool,
    /// The create found the canonical chat already there.
    pub create_conflict: bool,
    pub reassigned_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded: Option<Superseded>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<EntityError>,
    /// After a create conflict, the document found belongs to another pair.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collision: Option<ValidationError>,
}

impl ExecutionResult {
    /// Nothing was created, moved, or superseded, and nothing failed.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        !self.created
            && !self.create_conflict
            && self.reassigned_count == 0
            && self.superseded.is_none()
            && self.errors.is_empty()
            && self.collision.is_none()
    }
}

pub struct Engine<'a, S: ?Sized> {
    store: &'a S,
    options: RunOptions,
    clock: fn() -> DateTime<Utc>,
}

impl<'a, S: DocumentStore + ?Sized> Engine<'a, S> {
    pub fn new(store: &'a S, options: RunOptions) -> Self {
        Self {
            store,
            options,
            clock: Utc::now,
        }
    }

    /// Replace the source of `createdAt` defaults.
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub const fn options(&self) -> RunOptions {
        self.options
    }

    /// Run the whole migration once.
    ///
    /// # Errors
    ///
    /// Only a failure to list the chats collection. Everything after that is
    /// reported per chat.
    pub fn run(&self) -> Result<RunReport, FetchError> {
        let chats = list_all(self.store, Collection::Chats, None, self.options.page_size)?;
        let mode = RunMode::from_dry_run(self.options.dry_run);
        info!(count = chats.len(), mode = mode.as_str(), "found chat documents");

        let mut report = RunReport::new(mode, self.options.superseded, chats.len());
        let mut seen = HashSet::with_capacity(chats.len());

        for doc in chats {
            let chat = ChatEntity::from_document(doc);
            if !seen.insert(chat.id.clone()) {
                debug!(chat = %chat.id, "chat listed twice; skipping repeat");
                report.record(EntityOutcome::Skipped {
                    chat_id: chat.id,
                    reason: SkipReason::Duplicate,
                });
                continue;
            }
            report.record(self.process(&chat));
        }

        let s = &report.summary;
        info!(
            created = s.created,
            migrated = s.migrated,
            reassigned = s.messages_reassigned,
            skipped = s.skipped_total(),
            failed = s.failed,
            "migration finished"
        );
        Ok(report)
    }

    /// Plan and, outside dry-run, apply one chat.
    pub fn process(&self, chat: &ChatEntity) -> EntityOutcome {
        let plan = match planner::plan(self.store, chat) {
            Ok(plan) => plan,
            Err(err) => {
                let key = planner::classify(chat).ok().map(|target| target.key);
                warn!(chat = %chat.id, error = %err, "canonical lookup failed");
                return EntityOutcome::Failed {
                    chat_id: chat.id.clone(),
                    key,
                    result: ExecutionResult {
                        errors: vec![EntityError::new(chat.id.as_str(), Stage::Lookup, err)],
                        ..ExecutionResult::default()
                    },
                };
            }
        };

        let Plan { chat_id, action } = plan;
        let key = match action {
            Action::Skip(reason) => {
                debug!(chat = %chat_id, %reason, "skipping chat");
                return EntityOutcome::Skipped { chat_id, reason };
            }
            Action::CreateCanonicalAndReassign(ref target) | Action::ReassignOnly(ref target) => {
                target.key.clone()
            }
        };

        let result = self.execute(chat, &action);
        if self.options.dry_run {
            return EntityOutcome::Planned { chat_id, action };
        }
        if let Some(error) = result.collision {
            return EntityOutcome::Skipped {
                chat_id,
                reason: SkipReason::KeyCollision { error },
            };
        }
        if result.is_noop() {
            debug!(chat = %chat_id, canonical = %key, "no messages left to move");
            return EntityOutcome::Skipped {
                chat_id,
                reason: SkipReason::NothingToMove,
            };
        }
        if result.errors.is_empty() {
            EntityOutcome::Migrated {
                chat_id,
                key,
                result,
            }
        } else {
            EntityOutcome::Failed {
                chat_id,
                key: Some(key),
                result,
            }
        }
    }

    /// Apply `action` to `chat`. In dry-run this only logs the intent.
    pub fn execute(&self, chat: &ChatEntity, action: &Action) -> ExecutionResult {
        let mut result = ExecutionResult::default();

        let (target, create) = match action {
            Action::Skip(_) => return result,
            Action::CreateCanonicalAndReassign(target) => {
                info!(chat = %chat.id, canonical = %target.key, "canonical missing; will create");
                (target, true)
            }
            Action::ReassignOnly(target) => {
                info!(chat = %chat.id, canonical = %target.key, "canonical exists; will reassign messages");
                (target, false)
            }
        };

        if self.options.dry_run {
            return result;
        }

        if create {
            match self.create_canonical(chat, target) {
                Ok(()) => result.created = true,
                Err(StoreError::Conflict) => {
                    result.create_conflict = true;
                    if let Err(err) = self.confirm_existing(chat, target, &mut result) {
                        result
                            .errors
                            .push(EntityError::new(chat.id.as_str(), Stage::Lookup, err));
                        return result;
                    }
                    if result.collision.is_some() {
                        return result;
                    }
                    info!(chat = %chat.id, canonical = %target.key, "canonical appeared concurrently; reusing it");
                }
                Err(err) => {
                    warn!(chat = %chat.id, canonical = %target.key, error = %err, "canonical create failed");
                    result
                        .errors
                        .push(EntityError::new(chat.id.as_str(), Stage::Create, err));
                    return result;
                }
            }
        }

        match reassign(
            self.store,
            self.options.page_size,
            &chat.id,
            target.key.as_str(),
        ) {
            Ok(moved) => {
                info!(chat = %chat.id, canonical = %target.key, count = moved.count, "reassigned messages");
                result.reassigned_count = moved.count;
                result.errors.extend(moved.errors);
            }
            Err(err) => {
                warn!(chat = %chat.id, error = %err, "listing messages failed");
                result.errors.push(EntityError::new(
                    chat.id.as_str(),
                    Stage::ListMessages,
                    err.source,
                ));
                return result;
            }
        }

        if result.errors.is_empty() {
            match self.supersede(chat, target) {
                Ok(done) => result.superseded = done,
                Err(err) => {
                    warn!(chat = %chat.id, policy = %self.options.superseded, error = %err, "superseded chat handling failed");
                    result
                        .errors
                        .push(EntityError::new(chat.id.as_str(), Stage::Supersede, err));
                }
            }
        }

        result
    }

    fn create_canonical(&self, chat: &ChatEntity, target: &Target) -> Result<(), StoreError> {
        let (lo, hi) = &target.members;
        let fields = chat.canonical_fields(lo, hi, (self.clock)());
        self.store
            .create(Collection::Chats, target.key.as_str(), &fields)?;
        info!(canonical = %target.key, "created canonical chat");
        Ok(())
    }

    /// Re-read the document that made the create conflict and check that it
    /// belongs to the same pair. A mismatch lands in `result.collision`.
    fn confirm_existing(
        &self,
        chat: &ChatEntity,
        target: &Target,
        result: &mut ExecutionResult,
    ) -> Result<(), StoreError> {
        let existing = self
            .store
            .get(Collection::Chats, target.key.as_str())?
            .ok_or(StoreError::NotFound)?;
        if let Err(error) = planner::verify_canonical(&existing, target) {
            warn!(chat = %chat.id, canonical = %target.key, %error, "merge key held by another pair; leaving messages in place");
            result.collision = Some(error);
        }
        Ok(())
    }

    fn supersede(
        &self,
        chat: &ChatEntity,
        target: &Target,
    ) -> Result<Option<Superseded>, StoreError> {
        match self.options.superseded {
            SupersededPolicy::Retain => Ok(None),
            SupersededPolicy::Mark => {
                let mut patch = Fields::new();
                patch.insert(
                    SUPERSEDED_BY_FIELD.to_string(),
                    Value::from(target.key.as_str()),
                );
                self.store.update(Collection::Chats, &chat.id, &patch)?;
                debug!(chat = %chat.id, canonical = %target.key, "marked superseded chat");
                Ok(Some(Superseded::Marked))
            }
            SupersededPolicy::Delete => match self.store.delete(Collection::Chats, &chat.id) {
                Ok(()) | Err(StoreError::NotFound) => {
                    debug!(chat = %chat.id, canonical = %target.key, "deleted superseded chat");
                    Ok(Some(Superseded::Deleted))
                }
                Err(err) => Err(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::MergeKey;
    use crate::store::Document;
    use crate::store::memory::{MemoryStore, Op};
    use serde_json::json;

    fn members_doc(id: &str, members: &[&str]) -> Document {
        let mut fields = Fields::new();
        fields.insert("members".to_string(), json!(members));
        Document::new(id, fields)
    }

    fn chat(id: &str, members: &[&str]) -> ChatEntity {
        ChatEntity::from_document(members_doc(id, members))
    }

    fn live() -> RunOptions {
        RunOptions::default().live()
    }

    #[test]
    fn dry_run_execute_writes_nothing() {
        let store = MemoryStore::new();
        let engine = Engine::new(&store, RunOptions::default());
        let c = chat("c1", &["u1", "u2"]);
        let plan = planner::plan(&store, &c).expect("plan");

        let result = engine.execute(&c, &plan.action);
        assert_eq!(result, ExecutionResult::default());
        assert!(store.writes().is_empty());
    }

    #[test]
    fn create_failure_skips_reassignment() {
        let store = MemoryStore::new();
        store.insert(
            Collection::Messages,
            Document::new("m1", json!({"chatId": "c1"}).as_object().cloned().unwrap_or_default()),
        );
        store.fail(
            Op::Create(Collection::Chats, "dm_u1_u2".to_string()),
            StoreError::Status {
                status: 400,
                message: "invalid document structure".to_string(),
            },
        );

        let engine = Engine::new(&store, live());
        let outcome = engine.process(&chat("c1", &["u1", "u2"]));

        let EntityOutcome::Failed { result, .. } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(!result.created);
        assert_eq!(result.reassigned_count, 0);
        assert_eq!(result.errors[0].stage, Stage::Create);
        assert!(store.writes().is_empty());
    }

    #[test]
    fn create_conflict_still_reassigns() {
        let store = MemoryStore::new();
        store.insert(
            Collection::Messages,
            Document::new("m1", json!({"chatId": "c1"}).as_object().cloned().unwrap_or_default()),
        );
        store.insert(Collection::Chats, members_doc("dm_u1_u2", &["u1", "u2"]));
        store.fail_once(
            Op::Get(Collection::Chats, "dm_u1_u2".to_string()),
            StoreError::NotFound,
        );

        let engine = Engine::new(&store, live());
        let outcome = engine.process(&chat("c1", &["u1", "u2"]));

        let EntityOutcome::Migrated { result, .. } = outcome else {
            panic!("expected migration, got {outcome:?}");
        };
        assert!(result.create_conflict);
        assert!(!result.created);
        assert_eq!(result.reassigned_count, 1);
    }

    #[test]
    fn create_conflict_with_foreign_owner_moves_nothing() {
        let store = MemoryStore::new();
        store.insert(
            Collection::Messages,
            Document::new("m1", json!({"chatId": "c2"}).as_object().cloned().unwrap_or_default()),
        );
        store.insert(Collection::Chats, members_doc("dm_a_b_c", &["a_b", "c"]));
        store.fail_once(
            Op::Get(Collection::Chats, "dm_a_b_c".to_string()),
            StoreError::NotFound,
        );

        let engine = Engine::new(&store, live());
        let outcome = engine.process(&chat("c2", &["a", "b_c"]));

        let EntityOutcome::Skipped { reason, .. } = outcome else {
            panic!("expected skip, got {outcome:?}");
        };
        assert_eq!(reason.label(), "key_collision");
        assert!(store.writes().is_empty());
    }

    #[test]
    fn conflict_without_readable_canonical_is_entity_error() {
        let store = MemoryStore::new();
        store.fail(
            Op::Create(Collection::Chats, "dm_u1_u2".to_string()),
            StoreError::Conflict,
        );

        let engine = Engine::new(&store, live());
        let outcome = engine.process(&chat("c1", &["u1", "u2"]));

        let EntityOutcome::Failed { result, .. } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(result.create_conflict);
        assert_eq!(result.errors[0].stage, Stage::Lookup);
        assert_eq!(result.reassigned_count, 0);
    }

    #[test]
    fn lookup_failure_is_entity_error() {
        let store = MemoryStore::new();
        store.fail(
            Op::Get(Collection::Chats, "dm_u1_u2".to_string()),
            StoreError::Transport("timed out".to_string()),
        );

        let engine = Engine::new(&store, live());
        let outcome = engine.process(&chat("c1", &["u1", "u2"]));
        let EntityOutcome::Failed { key, result, .. } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(key.as_ref().map(MergeKey::as_str), Some("dm_u1_u2"));
        assert_eq!(result.errors[0].stage, Stage::Lookup);
    }

    #[test]
    fn supersede_is_skipped_after_partial_reassignment() {
        let store = MemoryStore::new();
        for id in ["m1", "m2"] {
            store.insert(
                Collection::Messages,
                Document::new(id, json!({"chatId": "c1"}).as_object().cloned().unwrap_or_default()),
            );
        }
        store.insert(Collection::Chats, Document::new("c1", Fields::new()));
        store.fail(
            Op::Update(Collection::Messages, "m2".to_string()),
            StoreError::Transport("reset".to_string()),
        );

        let options = RunOptions {
            superseded: SupersededPolicy::Delete,
            ..live()
        };
        let engine = Engine::new(&store, options);
        let outcome = engine.process(&chat("c1", &["u1", "u2"]));

        assert!(outcome.is_failure());
        assert!(store.document(Collection::Chats, "c1").is_some());
    }
}
