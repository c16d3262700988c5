use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::variables::{ProtocolState, Variables};

/// Status of a flow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
  Running,
  Waiting,
  Completed,
  Failed,
  Cancelled,
}

impl ExecutionStatus {
  /// RUNNING or WAITING: at most one per (flow, contact).
  pub fn is_active(&self) -> bool {
    matches!(self, Self::Running | Self::Waiting)
  }
}

/// One run of a flow bound to one contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FlowExecution {
  pub id: String,
  pub flow_id: String,
  pub contact_id: String,
  pub status: ExecutionStatus,
  pub current_node_id: String,
  #[sqlx(json)]
  pub variables: Variables,
  #[sqlx(json)]
  pub protocol: ProtocolState,
  pub next_step_at: Option<DateTime<Utc>>,
  pub last_error: Option<String>,
  /// Bumped on every successful update.
  pub version: i64,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl FlowExecution {
  /// A fresh RUNNING execution positioned at `start_node_id`.
  pub fn new(
    flow_id: impl Into<String>,
    contact_id: impl Into<String>,
    start_node_id: impl Into<String>,
    variables: Variables,
    protocol: ProtocolState,
  ) -> Self {
    let now = Utc::now();
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      flow_id: flow_id.into(),
      contact_id: contact_id.into(),
      status: ExecutionStatus::Running,
      current_node_id: start_node_id.into(),
      variables,
      protocol,
      next_step_at: None,
      last_error: None,
      version: 0,
      created_at: now,
      updated_at: now,
    }
  }

  /// Whether the last update is older than `threshold` at `now`.
  pub fn is_stale(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
    now - self.updated_at > threshold
  }
}

/// Status recorded on a step log entry. Node attempts are logged before
/// they run, so every entry is informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
  Info,
}

/// Append-only audit record, one per node execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StepLogEntry {
  pub execution_id: String,
  pub flow_id: String,
  pub contact_id: String,
  pub node_id: String,
  pub action_type: String,
  pub status: StepStatus,
  pub message: String,
  pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_activity() {
    assert!(ExecutionStatus::Running.is_active());
    assert!(ExecutionStatus::Waiting.is_active());
    assert!(!ExecutionStatus::Cancelled.is_active());
    assert!(!ExecutionStatus::Completed.is_active());
    assert!(!ExecutionStatus::Failed.is_active());
  }

  #[test]
  fn test_staleness_is_strict() {
    let mut exec = FlowExecution::new("f", "c", "start", Variables::new(), ProtocolState::default());
    let now = Utc::now();
    exec.updated_at = now - chrono::Duration::minutes(15);

    assert!(!exec.is_stale(now, chrono::Duration::minutes(15)));
    assert!(exec.is_stale(now + chrono::Duration::seconds(1), chrono::Duration::minutes(15)));
  }

  #[test]
  fn test_serialized_shape() {
    let exec = FlowExecution::new("f1", "c1", "n1", Variables::new(), ProtocolState::default());
    let value = serde_json::to_value(&exec).unwrap();

    assert_eq!(value["flowId"], "f1");
    assert_eq!(value["currentNodeId"], "n1");
    assert_eq!(value["status"], "RUNNING");
    assert!(value["nextStepAt"].is_null());
  }
}
