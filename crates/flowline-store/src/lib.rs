//! Flowline Store
//!
//! This crate provides the storage trait and implementations for flow
//! definitions, flow executions and the step audit log. Data lives either in
//! memory (tests, simulations) or in SQLite.
//!
//! The [`Store`] trait defines operations for:
//! - Saving and loading flow definitions
//! - Creating and updating executions with optimistic concurrency
//! - Finding the active execution of a (flow, contact) pair
//! - Finding suspended executions that are waiting or due
//! - Appending to and reading the step log

mod memory;
mod sqlite;
mod types;
mod variables;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use types::{ExecutionStatus, FlowExecution, StepLogEntry, StepStatus};
pub use variables::{ProtocolState, RESERVED_KEYS, Variables};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowline_flow::{FlowDefinition, FlowError};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// The execution changed since it was read.
  #[error("execution {id} was modified concurrently (expected version {expected})")]
  Conflict { id: String, expected: i64 },

  /// The flow definition cannot be stored.
  #[error("invalid flow definition: {0}")]
  InvalidFlow(#[from] FlowError),

  /// Applying migrations failed.
  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),
}

/// Storage trait for flows, executions and step logs.
#[async_trait]
pub trait Store: Send + Sync {
  /// Insert or replace a flow definition.
  async fn save_flow(&self, flow: &FlowDefinition) -> Result<(), Error>;

  /// Get a flow definition by ID.
  async fn get_flow(&self, flow_id: &str) -> Result<FlowDefinition, Error>;

  /// Active flows of a tenant, in storage order.
  async fn list_active_flows(&self, tenant_id: &str) -> Result<Vec<FlowDefinition>, Error>;

  /// Create a new execution.
  async fn create_execution(&self, execution: &FlowExecution) -> Result<(), Error>;

  /// Get an execution by ID.
  async fn get_execution(&self, execution_id: &str) -> Result<FlowExecution, Error>;

  /// The RUNNING or WAITING execution of a flow for a contact, if any.
  async fn find_active_execution(
    &self,
    flow_id: &str,
    contact_id: &str,
  ) -> Result<Option<FlowExecution>, Error>;

  /// Persist `execution` if its `version` still matches the stored one.
  ///
  /// Returns the stored row with the bumped version and `updated_at`.
  /// A version mismatch is [`Error::Conflict`].
  async fn update_execution(&self, execution: &FlowExecution) -> Result<FlowExecution, Error>;

  /// All executions in WAITING.
  async fn list_waiting_executions(&self) -> Result<Vec<FlowExecution>, Error>;

  /// WAITING executions whose `next_step_at` is at or before `now`.
  async fn list_due_executions(&self, now: DateTime<Utc>) -> Result<Vec<FlowExecution>, Error>;

  /// List executions for a flow, newest first.
  async fn list_executions(&self, flow_id: &str) -> Result<Vec<FlowExecution>, Error>;

  /// Append an entry to the step log.
  async fn append_step_log(&self, entry: &StepLogEntry) -> Result<(), Error>;

  /// Step log of an execution, oldest first.
  async fn list_step_logs(&self, execution_id: &str) -> Result<Vec<StepLogEntry>, Error>;
}
