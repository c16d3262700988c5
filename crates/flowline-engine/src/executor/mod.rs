//! Node execution.
//!
//! [`NodeExecutor::execute`] performs one node's side effect and returns a
//! [`NodeResult`]: where to go next, variables to merge, and the protocol
//! state to keep. It never persists the execution itself; the worker does.

mod condition;
mod message;
mod notify;

pub use condition::is_business_hours;
pub use message::{fallback_text, media_file};

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use flowline_flow::{AiAction, AiActionData, FlowDefinition, Node, NodeKind, WaitForResponseData};
use flowline_store::{FlowExecution, ProtocolState, StepLogEntry, StepStatus, Store, Variables};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::ports::{Contact, Services};

/// How the worker moves the execution after a node ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
  /// Follow the outgoing edge matching `handle`, or the default edge.
  Advance { handle: Option<String> },
  /// Stay on this node and suspend until resumed or `until` passes. The node
  /// runs again afterwards.
  Suspend { until: DateTime<Utc> },
  /// Follow the default edge, then suspend until `until`.
  Sleep { until: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeResult {
  pub transition: Transition,
  /// Merged shallowly into the execution's variables.
  pub variables: Variables,
  /// Replaces the execution's protocol state when set.
  pub protocol: Option<ProtocolState>,
}

impl NodeResult {
  pub fn advance() -> Self {
    Self::with_transition(Transition::Advance { handle: None })
  }

  pub fn branch(handle: impl Into<String>) -> Self {
    Self::with_transition(Transition::Advance {
      handle: Some(handle.into()),
    })
  }

  pub fn suspend(until: DateTime<Utc>) -> Self {
    Self::with_transition(Transition::Suspend { until })
  }

  pub fn sleep(until: DateTime<Utc>) -> Self {
    Self::with_transition(Transition::Sleep { until })
  }

  pub fn protocol(mut self, protocol: ProtocolState) -> Self {
    self.protocol = Some(protocol);
    self
  }

  fn with_transition(transition: Transition) -> Self {
    Self {
      transition,
      variables: Variables::new(),
      protocol: None,
    }
  }
}

/// Everything a node sees while it runs.
pub(crate) struct StepContext<'a> {
  pub flow: &'a FlowDefinition,
  pub node: &'a Node,
  pub execution: &'a FlowExecution,
  pub contact: Option<&'a Contact>,
  pub now: DateTime<Utc>,
}

impl StepContext<'_> {
  pub fn variables(&self) -> &Variables {
    &self.execution.variables
  }

  pub fn protocol(&self) -> &ProtocolState {
    &self.execution.protocol
  }

  /// The chat bound to the execution, defaulting to the contact id.
  pub fn chat_id(&self) -> &str {
    self
      .execution
      .protocol
      .chat_id
      .as_deref()
      .unwrap_or(&self.execution.contact_id)
  }

  pub fn render(&self, text: &str) -> String {
    crate::template::render(text, self.variables(), self.contact)
  }
}

/// Executes nodes against the injected collaborators.
pub struct NodeExecutor {
  store: Arc<dyn Store>,
  services: Services,
  config: EngineConfig,
}

impl NodeExecutor {
  pub fn new(store: Arc<dyn Store>, services: Services, config: EngineConfig) -> Self {
    Self {
      store,
      services,
      config,
    }
  }

  /// Execute one node for an execution.
  ///
  /// Loads the contact, appends the step log entry, then dispatches on the
  /// node variant.
  pub async fn execute(
    &self,
    flow: &FlowDefinition,
    node: &Node,
    execution: &FlowExecution,
  ) -> Result<NodeResult, EngineError> {
    let contact = self.services.contacts.get(&execution.contact_id).await?;
    let action_type = node.kind.type_name();

    self
      .store
      .append_step_log(&StepLogEntry {
        execution_id: execution.id.clone(),
        flow_id: execution.flow_id.clone(),
        contact_id: execution.contact_id.clone(),
        node_id: node.id.clone(),
        action_type: action_type.to_string(),
        status: StepStatus::Info,
        message: format!("Executing node {}", action_type),
        timestamp: Utc::now(),
      })
      .await?;

    let ctx = StepContext {
      flow,
      node,
      execution,
      contact: contact.as_ref(),
      now: Utc::now(),
    };

    debug!(
      execution_id = %execution.id,
      node_id = %node.id,
      node_type = action_type,
      "executing node"
    );

    match &node.kind {
      NodeKind::Trigger(_) => Ok(NodeResult::advance()),
      NodeKind::Message(data) | NodeKind::Interactive(data) => {
        message::send(&self.services, &ctx, data).await?;
        Ok(NodeResult::advance())
      }
      NodeKind::WaitForResponse(data) => self.wait_for_response(&ctx, data).await,
      NodeKind::Switch(data) => Ok(NodeResult::branch(switch_handle(
        ctx.variables(),
        data.variable(),
      ))),
      NodeKind::Wait(data) => {
        let minutes = data
          .delay_minutes
          .filter(|m| *m > 0)
          .unwrap_or(self.config.default_delay_minutes);
        Ok(NodeResult::sleep(ctx.now + Duration::minutes(minutes.into())))
      }
      NodeKind::AddTag(data) => {
        if let Some(tag_id) = non_empty(data.tag_id.as_deref()) {
          self
            .services
            .contacts
            .add_tag(&execution.contact_id, tag_id)
            .await?;
        }
        Ok(NodeResult::advance())
      }
      NodeKind::MoveStage(data) => {
        if let Some(column_id) = non_empty(data.column_id.as_deref()) {
          self
            .services
            .contacts
            .move_stage(&execution.contact_id, column_id)
            .await?;
        }
        Ok(NodeResult::advance())
      }
      NodeKind::ChangeStatus(data) => {
        if let (Some(chat_id), Some(status)) = (
          non_empty(execution.protocol.chat_id.as_deref()),
          non_empty(data.status.as_deref()),
        ) {
          self.services.chats.set_status(chat_id, status).await?;
        }
        Ok(NodeResult::advance())
      }
      NodeKind::ExternalNotify(data) => {
        notify::execute(&self.services, &self.config, &ctx, data).await
      }
      NodeKind::AiAction(data) => {
        self.ai_action(&ctx, data).await?;
        Ok(NodeResult::advance())
      }
      NodeKind::Condition(data) => {
        let met = condition::evaluate(&self.services, &ctx, data).await?;
        Ok(NodeResult::branch(if met { "true" } else { "false" }))
      }
    }
  }

  /// Two visits: the first sends the prompt and suspends, the second routes
  /// on whether a reply arrived.
  async fn wait_for_response(
    &self,
    ctx: &StepContext<'_>,
    data: &WaitForResponseData,
  ) -> Result<NodeResult, EngineError> {
    let mut protocol = ctx.protocol().clone();

    if protocol.waiting_for_response {
      let handle = if protocol.responded { "response" } else { "timeout" };
      protocol.clear_wait();
      return Ok(NodeResult::branch(handle).protocol(protocol));
    }

    if data.message.has_content() {
      message::send(&self.services, ctx, &data.message).await?;
    }

    let minutes = data
      .timeout_minutes
      .filter(|m| *m > 0)
      .unwrap_or(self.config.default_response_timeout_minutes);
    protocol.waiting_for_response = true;
    protocol.responded = false;
    protocol.response_edge = None;

    Ok(NodeResult::suspend(ctx.now + Duration::minutes(minutes.into())).protocol(protocol))
  }

  async fn ai_action(&self, ctx: &StepContext<'_>, data: &AiActionData) -> Result<(), EngineError> {
    let Some(chat_id) = non_empty(ctx.protocol().chat_id.as_deref()) else {
      warn!(execution_id = %ctx.execution.id, "no chat bound to execution, skipping ai_action");
      return Ok(());
    };

    let (agent_id, status) = ai_assignment(data);
    self
      .services
      .chats
      .set_ai_agent(chat_id, agent_id, &status)
      .await?;
    Ok(())
  }
}

/// Agent and chat status an `ai_action` node applies.
pub fn ai_assignment(data: &AiActionData) -> (Option<&str>, String) {
  let explicit = non_empty(data.change_chat_status.as_deref());
  match data.action {
    AiAction::Activate | AiAction::Transfer => (
      non_empty(data.agent_id.as_deref()),
      explicit.unwrap_or("AI").to_string(),
    ),
    AiAction::Deactivate => (
      None,
      explicit
        .or(non_empty(data.destination_status.as_deref()))
        .unwrap_or("OPEN")
        .to_string(),
    ),
  }
}

/// The handle a switch node routes on: the variable, trimmed and lower-cased.
pub fn switch_handle(variables: &Variables, variable: &str) -> String {
  variables
    .get_str(variable)
    .unwrap_or_default()
    .trim()
    .to_lowercase()
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
  value.filter(|v| !v.trim().is_empty())
}
