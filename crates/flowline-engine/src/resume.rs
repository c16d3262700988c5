use std::sync::Arc;

use flowline_store::{ExecutionStatus, Store};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::error::EngineError;
use crate::queue::StepQueue;
use crate::worker::mark_failed;

/// An inbound chat message that may answer a waiting execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
  pub content: String,
  /// Message type as reported by the channel (`text`, `interactive`, ...).
  #[serde(default)]
  pub message_type: Option<String>,
  /// Id of the button or list row the sender picked.
  #[serde(default)]
  pub interactive_payload: Option<String>,
}

impl InboundMessage {
  pub fn text(content: impl Into<String>) -> Self {
    Self {
      content: content.into(),
      message_type: Some("text".to_string()),
      interactive_payload: None,
    }
  }

  /// A button or list reply.
  pub fn interactive(content: impl Into<String>, payload: impl Into<String>) -> Self {
    Self {
      content: content.into(),
      message_type: Some("interactive".to_string()),
      interactive_payload: Some(payload.into()),
    }
  }

  fn payload(&self) -> Option<&str> {
    self.interactive_payload.as_deref().filter(|p| !p.is_empty())
  }

  /// The reply value flows route on: the payload id, else the raw content.
  pub fn response(&self) -> &str {
    self.payload().unwrap_or(&self.content)
  }
}

/// Reactivates executions suspended on a reply.
pub struct ResumeHandler {
  store: Arc<dyn Store>,
  queue: Arc<dyn StepQueue>,
}

impl ResumeHandler {
  pub fn new(store: Arc<dyn Store>, queue: Arc<dyn StepQueue>) -> Self {
    Self { store, queue }
  }

  /// Resume every WAITING execution that awaits a reply on `chat_id`.
  ///
  /// Returns whether at least one execution was resumed.
  #[instrument(skip(self, message))]
  pub async fn resume(&self, chat_id: &str, message: &InboundMessage) -> Result<bool, EngineError> {
    let waiting = self.store.list_waiting_executions().await?;
    let mut resumed = false;

    for execution in waiting
      .into_iter()
      .filter(|e| e.protocol.awaits_reply_on(chat_id))
    {
      let mut next = execution;
      next
        .protocol
        .record_response(message.payload().map(String::from));
      next.variables.insert("last_response", message.response());
      next.variables.insert(
        "last_response_type",
        message.message_type.clone().unwrap_or_else(|| "text".to_string()),
      );
      next.status = ExecutionStatus::Running;
      next.next_step_at = None;

      match self.store.update_execution(&next).await {
        Ok(stored) => match self.queue.enqueue(&stored.id).await {
          Ok(()) => {
            info!(execution_id = %stored.id, flow_id = %stored.flow_id, "resumed waiting execution");
            resumed = true;
          }
          Err(e) => {
            error!(execution_id = %stored.id, error = %e, "failed to enqueue resumed execution");
            mark_failed(self.store.as_ref(), stored, &e.to_string()).await?;
          }
        },
        Err(flowline_store::Error::Conflict { .. }) => {
          warn!(execution_id = %next.id, "execution changed before resume, skipping");
        }
        Err(e) => return Err(e.into()),
      }
    }

    Ok(resumed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_response_prefers_payload() {
    assert_eq!(InboundMessage::text("Sim").response(), "Sim");
    assert_eq!(InboundMessage::interactive("Yes", "opt_yes").response(), "opt_yes");

    let empty_payload = InboundMessage {
      content: "hello".to_string(),
      message_type: None,
      interactive_payload: Some(String::new()),
    };
    assert_eq!(empty_payload.response(), "hello");
  }
}
