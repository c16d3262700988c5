//! Execution lifecycle.
//!
//! Starting a flow for a contact enforces "one active execution per
//! (flow, contact)": an existing RUNNING/WAITING execution is either
//! superseded (CANCELLED) or the new start is skipped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use flowline_flow::{FlowDefinition, TriggerType};
use flowline_store::{ExecutionStatus, FlowExecution, ProtocolState, Store, Variables};
use serde_json::{Map, Value};
use tracing::{error, info, instrument, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::ports::{Notification, Services};
use crate::queue::StepQueue;
use crate::worker::mark_failed;

/// Result of a start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
  /// A new execution was created and its first step enqueued.
  Started(String),
  /// The contact already has an active execution of this flow.
  Skipped,
  /// The flow has no start node; nothing was created.
  NoStartNode,
}

/// What to do about an existing active execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
  /// Nothing is active: start.
  Start,
  /// Cancel the active execution, then start.
  Supersede,
  /// Keep the active execution, do not start.
  Skip,
}

/// Keyword and manual triggers always restart; anything else restarts only
/// an execution that has not moved for longer than `stale_after`.
pub fn restart_decision(
  existing: Option<&FlowExecution>,
  trigger_type: TriggerType,
  now: DateTime<Utc>,
  stale_after: chrono::Duration,
) -> RestartDecision {
  match existing {
    None => RestartDecision::Start,
    Some(_) if trigger_type.always_restarts() => RestartDecision::Supersede,
    Some(execution) if execution.is_stale(now, stale_after) => RestartDecision::Supersede,
    Some(_) => RestartDecision::Skip,
  }
}

/// A manual start requested by an operator.
#[derive(Debug, Clone, Default)]
pub struct ManualTrigger {
  pub tenant_id: String,
  pub flow_id: String,
  pub contact_id: String,
  pub chat_id: Option<String>,
  pub variables: Map<String, Value>,
  /// The operator who started the flow.
  pub user_id: Option<String>,
}

pub struct LifecycleManager {
  store: Arc<dyn Store>,
  queue: Arc<dyn StepQueue>,
  services: Services,
  config: EngineConfig,
}

impl LifecycleManager {
  pub fn new(
    store: Arc<dyn Store>,
    queue: Arc<dyn StepQueue>,
    services: Services,
    config: EngineConfig,
  ) -> Self {
    Self {
      store,
      queue,
      services,
      config,
    }
  }

  /// Start `flow` for a contact, or skip if it is already active for them.
  #[instrument(skip(self, flow, trigger_data), fields(flow_id = %flow.id, trigger_type = %trigger_type))]
  pub async fn start(
    &self,
    flow: &FlowDefinition,
    contact_id: &str,
    trigger_data: &Map<String, Value>,
    chat_id: Option<&str>,
    trigger_type: TriggerType,
  ) -> Result<StartOutcome, EngineError> {
    let existing = self.store.find_active_execution(&flow.id, contact_id).await?;

    match restart_decision(existing.as_ref(), trigger_type, Utc::now(), self.config.stale_after) {
      RestartDecision::Start => {}
      RestartDecision::Skip => {
        info!(contact_id, "contact already active in flow, skipping");
        return Ok(StartOutcome::Skipped);
      }
      RestartDecision::Supersede => {
        if let Some(existing) = existing {
          let mut cancelled = existing;
          cancelled.status = ExecutionStatus::Cancelled;
          cancelled.next_step_at = None;
          cancelled.last_error = Some(format!("Superseded by {} trigger", trigger_type));

          match self.store.update_execution(&cancelled).await {
            Ok(_) => info!(contact_id, execution_id = %cancelled.id, "superseded active execution"),
            Err(flowline_store::Error::Conflict { .. }) => {
              warn!(contact_id, execution_id = %cancelled.id, "active execution changed while superseding, skipping");
              return Ok(StartOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
          }
        }
      }
    }

    let start_node = match flow.start_node() {
      Ok(node) => node,
      Err(e) => {
        error!(error = %e, "cannot start flow");
        return Ok(StartOutcome::NoStartNode);
      }
    };

    let inbox_id = text(trigger_data, "inbox_id")
      .or_else(|| flow.trigger_config.inbox_filter().map(String::from));
    let protocol = ProtocolState::new(
      Some(chat_id.unwrap_or(contact_id).to_string()),
      inbox_id,
    );
    let execution = FlowExecution::new(
      &flow.id,
      contact_id,
      &start_node.id,
      Variables::from_trigger_data(trigger_data),
      protocol,
    );

    self.store.create_execution(&execution).await?;
    info!(contact_id, execution_id = %execution.id, "started flow execution");

    if let Err(e) = self.queue.enqueue(&execution.id).await {
      error!(execution_id = %execution.id, error = %e, "failed to enqueue first step");
      mark_failed(self.store.as_ref(), execution, &e.to_string()).await?;
      return Err(e.into());
    }
    Ok(StartOutcome::Started(execution.id))
  }

  /// Start a flow by id on an operator's request.
  ///
  /// Announces the start in the chat and notifies the operator. Both are
  /// best-effort and never prevent the start.
  #[instrument(skip(self, request), fields(flow_id = %request.flow_id, contact_id = %request.contact_id))]
  pub async fn trigger_manual(&self, request: ManualTrigger) -> Result<StartOutcome, EngineError> {
    let flow = match self.store.get_flow(&request.flow_id).await {
      Ok(flow) if flow.tenant_id == request.tenant_id => flow,
      Ok(_) | Err(flowline_store::Error::NotFound(_)) => {
        return Err(EngineError::FlowNotFound(request.flow_id));
      }
      Err(e) => return Err(e.into()),
    };

    let mut variables = request.variables;

    if let Some(chat_id) = request.chat_id.as_deref() {
      if text(&variables, "inbox_id").is_none() {
        match self.services.chats.inbox_of(chat_id).await {
          Ok(Some(inbox_id)) => {
            variables.insert("inbox_id".to_string(), Value::String(inbox_id));
          }
          Ok(None) => {}
          Err(e) => warn!(chat_id, error = %e, "failed to look up chat inbox"),
        }
      }

      let sender = self.operator_name(request.user_id.as_deref()).await;
      let content = format!("{} started the flow \"{}\"", sender, flow.name);
      if let Err(e) = self.services.chats.post_system_message(chat_id, &content).await {
        warn!(chat_id, error = %e, "failed to post flow start message");
      }
    }

    if let Some(user_id) = request.user_id.as_deref() {
      let notification = Notification {
        tenant_id: request.tenant_id.clone(),
        user_id: user_id.to_string(),
        title: "Flow started".to_string(),
        message: format!("The flow \"{}\" was started successfully.", flow.name),
      };
      if let Err(e) = self.services.operators.notify(notification).await {
        warn!(user_id, error = %e, "failed to notify operator");
      }
    }

    self
      .start(
        &flow,
        &request.contact_id,
        &variables,
        request.chat_id.as_deref(),
        TriggerType::Manual,
      )
      .await
  }

  async fn operator_name(&self, user_id: Option<&str>) -> String {
    let Some(user_id) = user_id else {
      return "System".to_string();
    };
    match self.services.operators.name(user_id).await {
      Ok(Some(name)) if !name.is_empty() => name,
      Ok(_) => "System".to_string(),
      Err(e) => {
        warn!(user_id, error = %e, "failed to look up operator name");
        "System".to_string()
      }
    }
  }
}

fn text(data: &Map<String, Value>, key: &str) -> Option<String> {
  match data.get(key)? {
    Value::String(s) if !s.is_empty() => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}
