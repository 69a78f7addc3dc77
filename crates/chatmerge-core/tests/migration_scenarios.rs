//! End-to-end migration runs against the in-memory store.
//!
//! Each scenario seeds chats and messages, runs the engine, and checks the
//! store afterwards, including what a second run does to the same data.

use chatmerge_core::engine::Superseded;
use chatmerge_core::error::{ErrorCode, Stage};
use chatmerge_core::model::ChatEntity;
use chatmerge_core::planner::{self, SkipReason};
use chatmerge_core::report::RunMode;
use chatmerge_core::store::Fields;
use chatmerge_core::store::memory::{MemoryStore, Op, Write};
use chatmerge_core::{
    Action, Collection, Document, Engine, EntityOutcome, RunOptions, StoreError,
    SupersededPolicy, derive,
};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};

fn fixed_clock() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn fields(value: Value) -> Fields {
    value.as_object().cloned().expect("object literal")
}

fn seed_chat(store: &MemoryStore, id: &str, members: Value) {
    store.insert(
        Collection::Chats,
        Document::new(id, fields(json!({"members": members, "title": format!("chat {id}")}))),
    );
}

fn seed_messages(store: &MemoryStore, chat_id: &str, ids: &[&str]) {
    for id in ids {
        store.insert(
            Collection::Messages,
            Document::new(*id, fields(json!({"chatId": chat_id, "body": format!("hello from {id}")}))),
        );
    }
}

fn live(policy: SupersededPolicy) -> RunOptions {
    RunOptions {
        dry_run: false,
        page_size: 2,
        superseded: policy,
    }
}

fn run(store: &MemoryStore, options: RunOptions) -> chatmerge_core::RunReport {
    Engine::new(store, options)
        .with_clock(fixed_clock)
        .run()
        .expect("chat listing succeeds")
}

fn chat_id_of(store: &MemoryStore, message: &str) -> Value {
    store
        .document(Collection::Messages, message)
        .and_then(|doc| doc.field("chatId").cloned())
        .unwrap_or(Value::Null)
}

#[test]
fn duplicate_chat_is_folded_then_rerun_is_quiet() {
    let store = MemoryStore::new();
    seed_chat(&store, "c1", json!(["u2", "u1"]));
    seed_messages(&store, "c1", &["m1", "m2", "m3"]);

    let report = run(&store, live(SupersededPolicy::Retain));
    assert_eq!(report.mode, RunMode::Live);
    assert_eq!(report.summary.created, 1);
    assert_eq!(report.summary.migrated, 1);
    assert_eq!(report.summary.messages_reassigned, 3);
    assert!(!report.has_failures());

    let canonical = store
        .document(Collection::Chats, "dm_u1_u2")
        .expect("canonical created");
    assert_eq!(canonical.field("members"), Some(&json!(["u1", "u2"])));
    assert_eq!(canonical.field("title"), Some(&json!("chat c1")));
    assert_eq!(
        canonical.field("createdAt"),
        Some(&json!("2024-03-01T12:00:00.000Z"))
    );
    for m in ["m1", "m2", "m3"] {
        assert_eq!(chat_id_of(&store, m), json!("dm_u1_u2"));
    }
    assert!(store.document(Collection::Chats, "c1").is_some());

    store.clear_writes();
    let rerun = run(&store, live(SupersededPolicy::Retain));
    assert!(store.writes().is_empty());
    assert_eq!(rerun.summary.created, 0);
    assert_eq!(rerun.summary.messages_reassigned, 0);
    assert_eq!(
        rerun.outcome("dm_u1_u2"),
        Some(&EntityOutcome::Skipped {
            chat_id: "dm_u1_u2".to_string(),
            reason: SkipReason::AlreadyCanonical,
        })
    );
    assert_eq!(rerun.summary.migrated, 0);
    assert_eq!(
        rerun.outcome("c1"),
        Some(&EntityOutcome::Skipped {
            chat_id: "c1".to_string(),
            reason: SkipReason::NothingToMove,
        })
    );
    assert_eq!(rerun.summary.skipped.get("nothing_to_move"), Some(&1));
}

#[test]
fn group_chat_is_left_alone() {
    let store = MemoryStore::new();
    seed_chat(&store, "g1", json!(["u1", "u2", "u3"]));
    seed_messages(&store, "g1", &["m1"]);

    for _ in 0..2 {
        let report = run(&store, live(SupersededPolicy::Delete));
        assert_eq!(report.summary.skipped.get("not_a_pair"), Some(&1));
    }
    assert!(store.writes().is_empty());
    assert_eq!(chat_id_of(&store, "m1"), json!("g1"));
}

#[test]
fn long_participant_ids_use_hashed_key() {
    let store = MemoryStore::new();
    seed_chat(
        &store,
        "legacy",
        json!(["user_bbbbbbbbbbbbbbbb", "user_aaaaaaaaaaaaaaaa"]),
    );
    seed_messages(&store, "legacy", &["m1"]);

    run(&store, live(SupersededPolicy::Retain));

    let canonical = store
        .document(Collection::Chats, "dm_e94eab2835e24ed5")
        .expect("hashed canonical created");
    assert_eq!(
        canonical.field("members"),
        Some(&json!(["user_aaaaaaaaaaaaaaaa", "user_bbbbbbbbbbbbbbbb"]))
    );
    assert_eq!(chat_id_of(&store, "m1"), json!("dm_e94eab2835e24ed5"));
}

#[test]
fn one_failing_chat_does_not_stop_the_others() {
    let store = MemoryStore::new();
    seed_chat(&store, "c1", json!(["u1", "u2"]));
    seed_chat(&store, "c2", json!(["u3", "u4"]));
    seed_messages(&store, "c1", &["m1"]);
    seed_messages(&store, "c2", &["m2"]);
    store.fail(
        Op::Create(Collection::Chats, "dm_u1_u2".to_string()),
        StoreError::Status {
            status: 400,
            message: "Invalid document structure".to_string(),
        },
    );

    let report = run(&store, live(SupersededPolicy::Retain));
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.migrated, 1);

    let errors: Vec<_> = report.errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].chat_id, "c1");
    assert_eq!(errors[0].stage, Stage::Create);
    assert_eq!(errors[0].code(), ErrorCode::CreateFailed);

    assert_eq!(chat_id_of(&store, "m1"), json!("c1"));
    assert_eq!(chat_id_of(&store, "m2"), json!("dm_u3_u4"));

    // Once the store recovers, a rerun finishes the job.
    store.clear_faults();
    let retry = run(&store, live(SupersededPolicy::Retain));
    assert!(!retry.has_failures());
    assert_eq!(chat_id_of(&store, "m1"), json!("dm_u1_u2"));
}

#[test]
fn dry_run_plans_without_writing() {
    let store = MemoryStore::new();
    seed_chat(&store, "c1", json!(["u1", "u2"]));
    seed_chat(&store, "c2", json!(["u2", "u1"]));
    seed_chat(&store, "dm_u1_u2", json!(["u1", "u2"]));
    seed_messages(&store, "c1", &["m1", "m2"]);

    let report = run(&store, RunOptions::default());
    assert_eq!(report.mode, RunMode::DryRun);
    assert!(store.writes().is_empty());
    assert_eq!(report.summary.planned_reassigns, 2);
    assert_eq!(report.summary.created, 0);
    assert_eq!(report.summary.messages_reassigned, 0);
    assert!(matches!(
        report.outcome("c1"),
        Some(EntityOutcome::Planned {
            action: Action::ReassignOnly(_),
            ..
        })
    ));
    assert_eq!(chat_id_of(&store, "m1"), json!("c1"));
}

#[test]
fn create_race_still_moves_messages() {
    let store = MemoryStore::new();
    seed_chat(&store, "c1", json!(["u1", "u2"]));
    seed_messages(&store, "c1", &["m1", "m2"]);
    // Another writer creates the canonical between our lookup and our create.
    seed_chat(&store, "dm_u1_u2", json!(["u2", "u1"]));
    store.fail_once(
        Op::Get(Collection::Chats, "dm_u1_u2".to_string()),
        StoreError::NotFound,
    );

    let report = run(&store, live(SupersededPolicy::Retain));
    assert_eq!(report.summary.create_conflicts, 1);
    assert_eq!(report.summary.created, 0);
    assert_eq!(report.summary.messages_reassigned, 2);
    assert!(!report.has_failures());
    assert_eq!(chat_id_of(&store, "m2"), json!("dm_u1_u2"));
}

#[test]
fn underscore_ids_sharing_a_key_do_not_merge() {
    let store = MemoryStore::new();
    seed_chat(&store, "c1", json!(["a_b", "c"]));
    seed_chat(&store, "c2", json!(["a", "b_c"]));
    seed_messages(&store, "c1", &["m1"]);
    seed_messages(&store, "c2", &["m2"]);

    let report = run(&store, live(SupersededPolicy::Delete));
    assert_eq!(report.summary.created, 1);
    assert_eq!(report.summary.skipped.get("key_collision"), Some(&1));
    assert!(!report.has_failures());

    let Some(EntityOutcome::Skipped {
        reason: SkipReason::KeyCollision { error },
        ..
    }) = report.outcome("c2")
    else {
        panic!("expected collision, got {:?}", report.outcome("c2"));
    };
    assert_eq!(error.code(), ErrorCode::KeyCollision);

    assert_eq!(chat_id_of(&store, "m1"), json!("dm_a_b_c"));
    assert_eq!(chat_id_of(&store, "m2"), json!("c2"));
    assert!(store.document(Collection::Chats, "c2").is_some());

    let canonical = store
        .document(Collection::Chats, "dm_a_b_c")
        .expect("canonical for the first pair");
    assert_eq!(canonical.field("members"), Some(&json!(["a_b", "c"])));
}

#[test]
fn twin_duplicates_share_one_canonical() {
    let store = MemoryStore::new();
    seed_chat(&store, "c1", json!(["u1", "u2"]));
    seed_chat(&store, "c2", json!(["u2", "u1"]));
    seed_messages(&store, "c1", &["m1"]);
    seed_messages(&store, "c2", &["m2", "m3"]);

    let report = run(&store, live(SupersededPolicy::Retain));
    assert_eq!(report.summary.created, 1);
    assert_eq!(report.summary.migrated, 2);
    assert_eq!(report.summary.create_conflicts, 0);
    assert!(matches!(
        report.outcome("c2"),
        Some(EntityOutcome::Migrated { result, .. }) if !result.created && result.reassigned_count == 2
    ));

    let creates = store
        .writes()
        .into_iter()
        .filter(|w| matches!(w, Write::Create { .. }))
        .count();
    assert_eq!(creates, 1);
    for m in ["m1", "m2", "m3"] {
        assert_eq!(chat_id_of(&store, m), json!("dm_u1_u2"));
    }
}

#[test]
fn repeated_listing_entry_is_skipped() {
    let store = MemoryStore::new();
    seed_chat(&store, "c1", json!(["u1", "u2"]));
    seed_chat(&store, "c1", json!(["u1", "u2"]));

    let report = run(&store, RunOptions::default());
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.summary.skipped.get("duplicate"), Some(&1));
}

#[test]
fn chat_listing_failure_is_fatal() {
    let store = MemoryStore::new();
    seed_chat(&store, "c1", json!(["u1", "u2"]));
    store.fail(
        Op::List(Collection::Chats),
        StoreError::Status {
            status: 401,
            message: "missing scope".to_string(),
        },
    );

    let err = Engine::new(&store, live(SupersededPolicy::Retain))
        .run()
        .expect_err("listing fails");
    assert_eq!(err.code(), ErrorCode::FetchFailed);
    assert!(err.to_string().starts_with("E2001"));
    assert!(store.writes().is_empty());
}

#[test]
fn mark_policy_tags_old_chat_and_second_plan_is_all_skips() {
    let store = MemoryStore::new();
    seed_chat(&store, "c1", json!(["u1", "u2"]));
    seed_messages(&store, "c1", &["m1"]);

    let report = run(&store, live(SupersededPolicy::Mark));
    assert_eq!(report.summary.marked, 1);
    assert!(matches!(
        report.outcome("c1"),
        Some(EntityOutcome::Migrated { result, .. }) if result.superseded == Some(Superseded::Marked)
    ));

    let old = store.document(Collection::Chats, "c1").expect("old chat kept");
    assert_eq!(old.field("supersededBy"), Some(&json!("dm_u1_u2")));
    let canonical = store
        .document(Collection::Chats, "dm_u1_u2")
        .expect("canonical");
    assert_eq!(canonical.field("supersededBy"), None);

    for doc in store.documents(Collection::Chats) {
        let plan = planner::plan(&store, &ChatEntity::from_document(doc)).expect("plan");
        assert!(plan.action.is_skip(), "{} still has work", plan.chat_id);
    }

    store.clear_writes();
    run(&store, live(SupersededPolicy::Mark));
    assert!(store.writes().is_empty());
}

#[test]
fn mark_without_schema_attribute_fails_at_supersede() {
    let store = MemoryStore::new();
    seed_chat(&store, "c1", json!(["u1", "u2"]));
    seed_messages(&store, "c1", &["m1"]);
    store.fail(
        Op::Update(Collection::Chats, "c1".to_string()),
        StoreError::Status {
            status: 400,
            message: "Invalid document structure: Unknown attribute: \"supersededBy\"".to_string(),
        },
    );

    let report = run(&store, live(SupersededPolicy::Mark));
    let errors: Vec<_> = report.errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].stage, Stage::Supersede);
    assert_eq!(chat_id_of(&store, "m1"), json!("dm_u1_u2"));

    // Nothing marks the chat, so every later run tries again.
    let rerun = run(&store, live(SupersededPolicy::Mark));
    assert_eq!(rerun.summary.failed, 1);
    assert_eq!(rerun.summary.messages_reassigned, 0);
}

#[test]
fn delete_policy_removes_old_chat() {
    let store = MemoryStore::new();
    seed_chat(&store, "c1", json!(["u1", "u2"]));
    seed_messages(&store, "c1", &["m1", "m2", "m3"]);

    let report = run(&store, live(SupersededPolicy::Delete));
    assert_eq!(report.summary.deleted, 1);
    assert!(store.document(Collection::Chats, "c1").is_none());

    let remaining: Vec<String> = store
        .documents(Collection::Chats)
        .into_iter()
        .map(|doc| doc.id)
        .collect();
    assert_eq!(remaining, ["dm_u1_u2"]);

    store.clear_writes();
    let rerun = run(&store, live(SupersededPolicy::Delete));
    assert!(store.writes().is_empty());
    assert_eq!(rerun.summary.skipped_total(), 1);
}

#[test]
fn partial_reassignment_is_completed_by_rerun() {
    let store = MemoryStore::new();
    seed_chat(&store, "c1", json!(["u1", "u2"]));
    seed_messages(&store, "c1", &["m1", "m2", "m3", "m4", "m5"]);
    store.fail(
        Op::Update(Collection::Messages, "m4".to_string()),
        StoreError::Transport("connection reset".to_string()),
    );

    let first = run(&store, live(SupersededPolicy::Delete));
    assert_eq!(first.summary.failed, 1);
    assert_eq!(first.summary.messages_reassigned, 4);
    // Superseded handling waits for a clean pass.
    assert!(store.document(Collection::Chats, "c1").is_some());

    store.clear_faults();
    let second = run(&store, live(SupersededPolicy::Delete));
    assert!(!second.has_failures());
    assert_eq!(second.summary.messages_reassigned, 1);
    assert_eq!(second.summary.deleted, 1);

    let key = derive("u1", "u2").expect("key");
    for doc in store.documents(Collection::Messages) {
        assert_eq!(doc.field("chatId"), Some(&json!(key.as_str())));
    }
}
