//! chatmerge-core library.
//!
//! Folds duplicate direct-message chats in a remote document store into one
//! canonical chat per participant pair and moves their messages across.
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums per failure class, each mapped to an
//!   [`error::ErrorCode`]. Entity-level failures never abort a run.
//! - **Logging**: use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod config;
pub mod engine;
pub mod error;
pub mod key;
pub mod lister;
pub mod model;
pub mod planner;
pub mod reassign;
pub mod report;
pub mod store;

pub use config::{MigrationConfig, SupersededPolicy};
pub use engine::{Engine, ExecutionResult, RunOptions};
pub use key::{MergeKey, derive};
pub use planner::{Action, Plan, SkipReason};
pub use report::{EntityOutcome, RunReport, Summary};
pub use store::{Collection, Document, DocumentStore, Filter, Page, StoreError};
