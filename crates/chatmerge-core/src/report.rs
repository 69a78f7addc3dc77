//! Per-chat outcomes and the end-of-run summary.

use crate::config::SupersededPolicy;
use crate::engine::{ExecutionResult, Superseded};
use crate::error::EntityError;
use crate::key::MergeKey;
use crate::planner::{Action, SkipReason};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    DryRun,
    Live,
}

impl RunMode {
    #[must_use]
    pub const fn from_dry_run(dry_run: bool) -> Self {
        if dry_run { Self::DryRun } else { Self::Live }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DryRun => "dry-run",
            Self::Live => "live",
        }
    }
}

/// What happened to one chat. Exactly one per listed chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntityOutcome {
    Skipped {
        chat_id: String,
        reason: SkipReason,
    },
    /// Dry-run only: the action a live run would take.
    Planned {
        chat_id: String,
        #[serde(flatten)]
        action: Action,
    },
    Migrated {
        chat_id: String,
        key: MergeKey,
        result: ExecutionResult,
    },
    Failed {
        chat_id: String,
        key: Option<MergeKey>,
        result: ExecutionResult,
    },
}

impl EntityOutcome {
    #[must_use]
    pub fn chat_id(&self) -> &str {
        match self {
            Self::Skipped { chat_id, .. }
            | Self::Planned { chat_id, .. }
            | Self::Migrated { chat_id, .. }
            | Self::Failed { chat_id, .. } => chat_id,
        }
    }

    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Counters over every outcome of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub created: usize,
    pub create_conflicts: usize,
    pub migrated: usize,
    pub messages_reassigned: usize,
    pub marked: usize,
    pub deleted: usize,
    pub planned_creates: usize,
    pub planned_reassigns: usize,
    pub skipped: BTreeMap<&'static str, usize>,
    pub failed: usize,
    pub errors: usize,
}

impl Summary {
    fn absorb_result(&mut self, result: &ExecutionResult) {
        self.created += usize::from(result.created);
        self.create_conflicts += usize::from(result.create_conflict);
        self.messages_reassigned += result.reassigned_count;
        match result.superseded {
            Some(Superseded::Marked) => self.marked += 1,
            Some(Superseded::Deleted) => self.deleted += 1,
            None => {}
        }
        self.errors += result.errors.len();
    }

    fn absorb(&mut self, outcome: &EntityOutcome) {
        match outcome {
            EntityOutcome::Skipped { reason, .. } => {
                *self.skipped.entry(reason.label()).or_default() += 1;
            }
            EntityOutcome::Planned { action, .. } => match action {
                Action::CreateCanonicalAndReassign(_) => self.planned_creates += 1,
                Action::ReassignOnly(_) => self.planned_reassigns += 1,
                Action::Skip(reason) => *self.skipped.entry(reason.label()).or_default() += 1,
            },
            EntityOutcome::Migrated { result, .. } => {
                self.migrated += 1;
                self.absorb_result(result);
            }
            EntityOutcome::Failed { result, .. } => {
                self.failed += 1;
                self.absorb_result(result);
            }
        }
    }

    /// Total skips across all reasons.
    #[must_use]
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }
}

/// Everything a run did, in listing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub mode: RunMode,
    pub superseded_policy: SupersededPolicy,
    pub chats_seen: usize,
    pub summary: Summary,
    pub outcomes: Vec<EntityOutcome>,
}

impl RunReport {
    #[must_use]
    pub fn new(mode: RunMode, superseded_policy: SupersededPolicy, chats_seen: usize) -> Self {
        Self {
            mode,
            superseded_policy,
            chats_seen,
            summary: Summary::default(),
            outcomes: Vec::with_capacity(chats_seen),
        }
    }

    pub fn record(&mut self, outcome: EntityOutcome) {
        self.summary.absorb(&outcome);
        self.outcomes.push(outcome);
    }

    /// Every entity-level error, in the order it happened.
    pub fn errors(&self) -> impl Iterator<Item = &EntityError> {
        self.outcomes.iter().flat_map(|outcome| match outcome {
            EntityOutcome::Migrated { result, .. } | EntityOutcome::Failed { result, .. } => {
                result.errors.as_slice()
            }
            EntityOutcome::Skipped { .. } | EntityOutcome::Planned { .. } => &[][..],
        })
    }

    #[must_use]
    pub fn outcome(&self, chat_id: &str) -> Option<&EntityOutcome> {
        self.outcomes.iter().find(|o| o.chat_id() == chat_id)
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.summary.failed > 0
    }
}
