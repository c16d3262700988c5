//! Integration tests for the SQLite store against a temporary database file.

use chrono::{Duration, Utc};
use flowline_flow::{Edge, FlowDefinition, FlowStatus, MessageData, Node, NodeKind, StartData, TriggerConfig};
use flowline_store::{
  Error, ExecutionStatus, FlowExecution, ProtocolState, SqliteStore, StepLogEntry, StepStatus,
  Store, Variables,
};
use serde_json::json;

async fn create_test_store() -> (SqliteStore, tempfile::TempDir) {
  let temp_dir = tempfile::tempdir().expect("failed to create temp dir");
  let url = format!("sqlite://{}?mode=rwc", temp_dir.path().join("flowline.db").display());
  let store = SqliteStore::connect(&url).await.expect("failed to open store");
  (store, temp_dir)
}

fn test_flow(id: &str, status: FlowStatus) -> FlowDefinition {
  FlowDefinition {
    id: id.to_string(),
    tenant_id: "tenant-1".to_string(),
    name: format!("flow {}", id),
    status,
    trigger_config: serde_json::from_value(json!({ "type": "KEYWORD", "keyword": "promo" })).unwrap(),
    nodes: vec![
      Node::new("start", NodeKind::Trigger(StartData::default())),
      Node::new(
        "hello",
        NodeKind::Message(MessageData {
          text: "Hi {{name}}".to_string(),
          ..Default::default()
        }),
      ),
    ],
    edges: vec![Edge::new("start", "hello")],
  }
}

fn test_execution(flow_id: &str, contact_id: &str) -> FlowExecution {
  let vars = Variables::from(json!({ "name": "Ana" }).as_object().cloned().unwrap());
  FlowExecution::new(
    flow_id,
    contact_id,
    "start",
    vars,
    ProtocolState::new(Some("chat-1".to_string()), Some("inbox-1".to_string())),
  )
}

#[tokio::test]
async fn test_flow_round_trip_and_listing() {
  let (store, _dir) = create_test_store().await;

  store.save_flow(&test_flow("f1", FlowStatus::Active)).await.unwrap();
  store.save_flow(&test_flow("f2", FlowStatus::Inactive)).await.unwrap();
  store.save_flow(&test_flow("f3", FlowStatus::Active)).await.unwrap();

  let loaded = store.get_flow("f1").await.unwrap();
  assert_eq!(loaded, test_flow("f1", FlowStatus::Active));

  let active: Vec<_> = store
    .list_active_flows("tenant-1")
    .await
    .unwrap()
    .into_iter()
    .map(|f| f.id)
    .collect();
  assert_eq!(active, vec!["f1", "f3"]);
  assert!(store.list_active_flows("tenant-2").await.unwrap().is_empty());

  // Re-saving replaces in place.
  store.save_flow(&test_flow("f2", FlowStatus::Active)).await.unwrap();
  assert_eq!(store.list_active_flows("tenant-1").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_missing_records_are_not_found() {
  let (store, _dir) = create_test_store().await;

  assert!(matches!(store.get_flow("nope").await, Err(Error::NotFound(_))));
  assert!(matches!(store.get_execution("nope").await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_execution_update_and_conflict() {
  let (store, _dir) = create_test_store().await;
  let exec = test_execution("f1", "contact-1");
  store.create_execution(&exec).await.unwrap();

  let loaded = store.get_execution(&exec.id).await.unwrap();
  assert_eq!(loaded.variables.get_str("name").as_deref(), Some("Ana"));
  assert_eq!(loaded.protocol.chat_id.as_deref(), Some("chat-1"));
  assert_eq!(loaded.status, ExecutionStatus::Running);

  let mut waiting = loaded.clone();
  waiting.status = ExecutionStatus::Waiting;
  waiting.protocol.waiting_for_response = true;
  waiting.next_step_at = Some(Utc::now() + Duration::minutes(1));
  let stored = store.update_execution(&waiting).await.unwrap();
  assert_eq!(stored.version, 1);
  assert!(stored.protocol.waiting_for_response);

  let err = store.update_execution(&loaded).await.unwrap_err();
  assert!(matches!(err, Error::Conflict { .. }));

  let mut ghost = loaded.clone();
  ghost.id = "ghost".to_string();
  assert!(matches!(store.update_execution(&ghost).await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_active_and_due_queries() {
  let (store, _dir) = create_test_store().await;
  let now = Utc::now();

  let mut done = test_execution("f1", "contact-1");
  done.status = ExecutionStatus::Cancelled;
  store.create_execution(&done).await.unwrap();
  assert!(store.find_active_execution("f1", "contact-1").await.unwrap().is_none());

  let mut due = test_execution("f1", "contact-1");
  due.status = ExecutionStatus::Waiting;
  due.next_step_at = Some(now - Duration::seconds(5));
  store.create_execution(&due).await.unwrap();

  let mut later = test_execution("f1", "contact-2");
  later.status = ExecutionStatus::Waiting;
  later.next_step_at = Some(now + Duration::minutes(10));
  store.create_execution(&later).await.unwrap();

  let active = store.find_active_execution("f1", "contact-1").await.unwrap();
  assert_eq!(active.map(|e| e.id), Some(due.id.clone()));

  let due_ids: Vec<_> = store
    .list_due_executions(now)
    .await
    .unwrap()
    .into_iter()
    .map(|e| e.id)
    .collect();
  assert_eq!(due_ids, vec![due.id]);
  assert_eq!(store.list_waiting_executions().await.unwrap().len(), 2);
  assert_eq!(store.list_executions("f1").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_step_log_is_append_only_and_ordered() {
  let (store, _dir) = create_test_store().await;

  for node in ["start", "hello"] {
    store
      .append_step_log(&StepLogEntry {
        execution_id: "e1".to_string(),
        flow_id: "f1".to_string(),
        contact_id: "contact-1".to_string(),
        node_id: node.to_string(),
        action_type: "message".to_string(),
        status: StepStatus::Info,
        message: "Executing node message".to_string(),
        timestamp: Utc::now(),
      })
      .await
      .unwrap();
  }

  let logs = store.list_step_logs("e1").await.unwrap();
  let nodes: Vec<_> = logs.iter().map(|l| l.node_id.as_str()).collect();
  assert_eq!(nodes, vec!["start", "hello"]);
  assert_eq!(logs[0].status, StepStatus::Info);
  assert!(store.list_step_logs("e2").await.unwrap().is_empty());
}
