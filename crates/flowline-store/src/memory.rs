use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowline_flow::FlowDefinition;
use tokio::sync::RwLock;

use crate::{Error, ExecutionStatus, FlowExecution, StepLogEntry, Store};

/// In-memory store.
///
/// Records are kept in insertion order so listings match the order they
/// were written in.
#[derive(Debug, Default)]
pub struct MemoryStore {
  flows: RwLock<Vec<FlowDefinition>>,
  executions: RwLock<Vec<FlowExecution>>,
  logs: RwLock<Vec<StepLogEntry>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn save_flow(&self, flow: &FlowDefinition) -> Result<(), Error> {
    flow.validate()?;
    let mut flows = self.flows.write().await;
    match flows.iter_mut().find(|f| f.id == flow.id) {
      Some(existing) => *existing = flow.clone(),
      None => flows.push(flow.clone()),
    }
    Ok(())
  }

  async fn get_flow(&self, flow_id: &str) -> Result<FlowDefinition, Error> {
    self
      .flows
      .read()
      .await
      .iter()
      .find(|f| f.id == flow_id)
      .cloned()
      .ok_or_else(|| Error::NotFound(format!("flow {}", flow_id)))
  }

  async fn list_active_flows(&self, tenant_id: &str) -> Result<Vec<FlowDefinition>, Error> {
    Ok(
      self
        .flows
        .read()
        .await
        .iter()
        .filter(|f| f.tenant_id == tenant_id && f.is_active())
        .cloned()
        .collect(),
    )
  }

  async fn create_execution(&self, execution: &FlowExecution) -> Result<(), Error> {
    self.executions.write().await.push(execution.clone());
    Ok(())
  }

  async fn get_execution(&self, execution_id: &str) -> Result<FlowExecution, Error> {
    self
      .executions
      .read()
      .await
      .iter()
      .find(|e| e.id == execution_id)
      .cloned()
      .ok_or_else(|| Error::NotFound(format!("execution {}", execution_id)))
  }

  async fn find_active_execution(
    &self,
    flow_id: &str,
    contact_id: &str,
  ) -> Result<Option<FlowExecution>, Error> {
    Ok(
      self
        .executions
        .read()
        .await
        .iter()
        .find(|e| e.flow_id == flow_id && e.contact_id == contact_id && e.status.is_active())
        .cloned(),
    )
  }

  async fn update_execution(&self, execution: &FlowExecution) -> Result<FlowExecution, Error> {
    let mut executions = self.executions.write().await;
    let stored = executions
      .iter_mut()
      .find(|e| e.id == execution.id)
      .ok_or_else(|| Error::NotFound(format!("execution {}", execution.id)))?;

    if stored.version != execution.version {
      return Err(Error::Conflict {
        id: execution.id.clone(),
        expected: execution.version,
      });
    }

    let mut updated = execution.clone();
    updated.version += 1;
    updated.updated_at = Utc::now();
    *stored = updated.clone();
    Ok(updated)
  }

  async fn list_waiting_executions(&self) -> Result<Vec<FlowExecution>, Error> {
    Ok(
      self
        .executions
        .read()
        .await
        .iter()
        .filter(|e| e.status == ExecutionStatus::Waiting)
        .cloned()
        .collect(),
    )
  }

  async fn list_due_executions(&self, now: DateTime<Utc>) -> Result<Vec<FlowExecution>, Error> {
    Ok(
      self
        .executions
        .read()
        .await
        .iter()
        .filter(|e| e.status == ExecutionStatus::Waiting && e.next_step_at.is_some_and(|at| at <= now))
        .cloned()
        .collect(),
    )
  }

  async fn list_executions(&self, flow_id: &str) -> Result<Vec<FlowExecution>, Error> {
    Ok(
      self
        .executions
        .read()
        .await
        .iter()
        .rev()
        .filter(|e| e.flow_id == flow_id)
        .cloned()
        .collect(),
    )
  }

  async fn append_step_log(&self, entry: &StepLogEntry) -> Result<(), Error> {
    self.logs.write().await.push(entry.clone());
    Ok(())
  }

  async fn list_step_logs(&self, execution_id: &str) -> Result<Vec<StepLogEntry>, Error> {
    Ok(
      self
        .logs
        .read()
        .await
        .iter()
        .filter(|l| l.execution_id == execution_id)
        .cloned()
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{ProtocolState, StepStatus, Variables};
  use flowline_flow::{FlowStatus, Node, NodeKind, StartData, TriggerConfig};

  fn flow(id: &str, tenant: &str, status: FlowStatus) -> FlowDefinition {
    FlowDefinition {
      id: id.to_string(),
      tenant_id: tenant.to_string(),
      name: id.to_string(),
      status,
      trigger_config: TriggerConfig::default(),
      nodes: vec![Node::new("start", NodeKind::Trigger(StartData::default()))],
      edges: vec![],
    }
  }

  fn execution(flow_id: &str, contact_id: &str) -> FlowExecution {
    FlowExecution::new(flow_id, contact_id, "start", Variables::new(), ProtocolState::default())
  }

  #[tokio::test]
  async fn test_active_flows_keep_storage_order() {
    let store = MemoryStore::new();
    store.save_flow(&flow("b", "t1", FlowStatus::Active)).await.unwrap();
    store.save_flow(&flow("a", "t1", FlowStatus::Active)).await.unwrap();
    store.save_flow(&flow("off", "t1", FlowStatus::Inactive)).await.unwrap();
    store.save_flow(&flow("other", "t2", FlowStatus::Active)).await.unwrap();

    let ids: Vec<_> = store
      .list_active_flows("t1")
      .await
      .unwrap()
      .into_iter()
      .map(|f| f.id)
      .collect();
    assert_eq!(ids, vec!["b", "a"]);
  }

  #[tokio::test]
  async fn test_save_flow_rejects_missing_start() {
    let store = MemoryStore::new();
    let mut bad = flow("f", "t", FlowStatus::Active);
    bad.nodes.clear();

    assert!(matches!(store.save_flow(&bad).await, Err(Error::InvalidFlow(_))));
  }

  #[tokio::test]
  async fn test_update_checks_version() {
    let store = MemoryStore::new();
    let exec = execution("f", "c");
    store.create_execution(&exec).await.unwrap();

    let mut first = exec.clone();
    first.current_node_id = "next".to_string();
    let stored = store.update_execution(&first).await.unwrap();
    assert_eq!(stored.version, 1);

    // A writer still holding version 0 loses.
    let err = store.update_execution(&exec).await.unwrap_err();
    assert!(matches!(err, Error::Conflict { expected: 0, .. }));
    assert_eq!(store.get_execution(&exec.id).await.unwrap().current_node_id, "next");
  }

  #[tokio::test]
  async fn test_find_active_ignores_terminal() {
    let store = MemoryStore::new();
    let mut done = execution("f", "c");
    done.status = ExecutionStatus::Completed;
    store.create_execution(&done).await.unwrap();
    assert!(store.find_active_execution("f", "c").await.unwrap().is_none());

    let live = execution("f", "c");
    store.create_execution(&live).await.unwrap();
    assert_eq!(
      store.find_active_execution("f", "c").await.unwrap().map(|e| e.id),
      Some(live.id)
    );
  }

  #[tokio::test]
  async fn test_due_executions() {
    let store = MemoryStore::new();
    let now = Utc::now();

    let mut due = execution("f", "c1");
    due.status = ExecutionStatus::Waiting;
    due.next_step_at = Some(now - chrono::Duration::seconds(1));
    let mut later = execution("f", "c2");
    later.status = ExecutionStatus::Waiting;
    later.next_step_at = Some(now + chrono::Duration::minutes(5));
    store.create_execution(&due).await.unwrap();
    store.create_execution(&later).await.unwrap();

    let ids: Vec<_> = store
      .list_due_executions(now)
      .await
      .unwrap()
      .into_iter()
      .map(|e| e.id)
      .collect();
    assert_eq!(ids, vec![due.id]);
    assert_eq!(store.list_waiting_executions().await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_step_logs_by_execution() {
    let store = MemoryStore::new();
    for (exec, node) in [("e1", "a"), ("e2", "a"), ("e1", "b")] {
      store
        .append_step_log(&StepLogEntry {
          execution_id: exec.to_string(),
          flow_id: "f".to_string(),
          contact_id: "c".to_string(),
          node_id: node.to_string(),
          action_type: "message".to_string(),
          status: StepStatus::Info,
          message: "Executing node message".to_string(),
          timestamp: Utc::now(),
        })
        .await
        .unwrap();
    }

    let nodes: Vec<_> = store
      .list_step_logs("e1")
      .await
      .unwrap()
      .into_iter()
      .map(|l| l.node_id)
      .collect();
    assert_eq!(nodes, vec!["a", "b"]);
  }
}
