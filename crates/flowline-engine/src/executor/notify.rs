use chrono::Duration;
use flowline_flow::{ExternalNotifyData, Graph, NotifyTarget};
use tracing::{info, warn};

use super::message::{DEFAULT_LIST_BUTTON_TEXT, reply_buttons};
use super::{NodeResult, StepContext, fallback_text, media_file, non_empty};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::ports::{Inbox, OutboundContent, OutboundMessage, Services};

/// Body of the button message sent after the text on native providers.
const BUTTONS_PROMPT: &str = "Choose an option";

/// Message a third party (task owner, task customer, the contact, or a fixed
/// number) and optionally wait for their reply.
pub(crate) async fn execute(
  services: &Services,
  config: &EngineConfig,
  ctx: &StepContext<'_>,
  data: &ExternalNotifyData,
) -> Result<NodeResult, EngineError> {
  let mut protocol = ctx.protocol().clone();

  if protocol.waiting_for_external {
    let handle = resume_handle(
      &ctx.flow.graph(),
      &ctx.node.id,
      protocol.responded,
      protocol.response_edge.as_deref(),
    );
    protocol.clear_wait();
    return Ok(NodeResult::branch(handle).protocol(protocol));
  }

  let Some((phone, name)) = recipient(ctx, data) else {
    warn!(execution_id = %ctx.execution.id, target = ?data.target, "no phone for external notification, skipping");
    return Ok(NodeResult::advance());
  };

  let tenant_id = &ctx.flow.tenant_id;
  let Some(inbox) = outbound_inbox(services, tenant_id, data.inbox_id.as_deref()).await? else {
    warn!(execution_id = %ctx.execution.id, "no inbox available for external notification, skipping");
    return Ok(NodeResult::advance());
  };

  let customer = services
    .contacts
    .find_or_create_by_phone(tenant_id, &phone, name.as_deref())
    .await?;
  let chat = services
    .chats
    .find_or_create(tenant_id, &customer.id, &inbox.id)
    .await?;

  let outbound = |content| OutboundMessage {
    tenant_id: tenant_id.clone(),
    contact_id: customer.id.clone(),
    chat_id: chat.id.clone(),
    inbox_id: Some(inbox.id.clone()),
    phone: Some(phone.clone()),
    content,
  };

  let message = &data.message;
  let body = ctx.render(&message.text);
  let native = inbox.supports_interactive();

  if let Some(url) = message.media_url() {
    let (filename, mime_type, is_voice) = media_file(message.media_type, message.media_name.as_deref());
    services
      .messenger
      .send(outbound(OutboundContent::Media {
        url: url.to_string(),
        caption: body.clone(),
        filename,
        mime_type,
        is_voice,
      }))
      .await?;
  } else if native && (!message.buttons.is_empty() || message.sections().is_some()) {
    // Native providers get the text and the options as separate messages.
    if message.has_text() {
      services
        .messenger
        .send(outbound(OutboundContent::Text { body: body.clone() }))
        .await?;
    }
    let content = if !message.buttons.is_empty() {
      OutboundContent::Buttons {
        body: BUTTONS_PROMPT.to_string(),
        buttons: reply_buttons(&message.buttons),
      }
    } else {
      OutboundContent::List {
        body: BUTTONS_PROMPT.to_string(),
        button_text: message
          .list_button_text
          .clone()
          .filter(|t| !t.is_empty())
          .unwrap_or_else(|| DEFAULT_LIST_BUTTON_TEXT.to_string()),
        sections: message.sections().map(<[_]>::to_vec).unwrap_or_default(),
      }
    };
    if let Err(e) = services.messenger.send(outbound(content)).await {
      warn!(execution_id = %ctx.execution.id, error = %e, "native options failed, falling back to text");
      let options = fallback_text("", &message.buttons, message.sections());
      services
        .messenger
        .send(outbound(OutboundContent::Text {
          body: options.trim_start().to_string(),
        }))
        .await?;
    }
  } else {
    services
      .messenger
      .send(outbound(OutboundContent::Text {
        body: fallback_text(&body, &message.buttons, message.sections()),
      }))
      .await?;
  }

  info!(
    execution_id = %ctx.execution.id,
    recipient_id = %customer.id,
    chat_id = %chat.id,
    "external notification sent"
  );

  if !data.wait_for_response {
    return Ok(NodeResult::advance());
  }

  let minutes = data
    .timeout_minutes
    .filter(|m| *m > 0)
    .unwrap_or(config.default_response_timeout_minutes);
  protocol.waiting_for_external = true;
  protocol.responded = false;
  protocol.response_edge = None;
  protocol.external_customer_id = Some(customer.id.clone());
  protocol.external_chat_id = Some(chat.id.clone());
  protocol.external_chat_uuid = chat.uuid.clone();

  Ok(NodeResult::suspend(ctx.now + Duration::minutes(minutes.into())).protocol(protocol))
}

/// The branch taken when the node runs again after its wait.
///
/// A reply follows the recorded button or row id when the node has an edge
/// for it, and the `response` edge otherwise.
fn resume_handle(graph: &Graph<'_>, node_id: &str, responded: bool, response_edge: Option<&str>) -> String {
  if !responded {
    return "timeout".to_string();
  }
  response_edge
    .filter(|&edge| !edge.is_empty() && graph.next_edge(node_id, Some(edge)).is_some())
    .unwrap_or("response")
    .to_string()
}

/// Phone and display name of the notification target.
fn recipient(ctx: &StepContext<'_>, data: &ExternalNotifyData) -> Option<(String, Option<String>)> {
  let vars = ctx.variables();
  let (phone, name) = match data.target {
    NotifyTarget::Responsible => (vars.get_str("responsible_phone"), vars.get_str("responsible_name")),
    NotifyTarget::EntityCustomer => (vars.get_str("customer_phone"), vars.get_str("customer_name")),
    NotifyTarget::FlowContact => (
      ctx.contact.and_then(|c| c.phone.clone()),
      ctx.contact.and_then(|c| c.name.clone()),
    ),
    NotifyTarget::Custom => (
      data.custom_phone.as_deref().map(|p| ctx.render(p)),
      None,
    ),
  };

  let phone = normalize_phone(&phone?);
  (!phone.is_empty()).then_some((phone, name.filter(|n| !n.is_empty())))
}

/// Strip formatting, keeping digits only.
fn normalize_phone(phone: &str) -> String {
  phone.chars().filter(char::is_ascii_digit).collect()
}

/// The explicit inbox, or the first active inbox not on the legacy "META"
/// provider.
async fn outbound_inbox(
  services: &Services,
  tenant_id: &str,
  explicit: Option<&str>,
) -> Result<Option<Inbox>, EngineError> {
  if let Some(inbox_id) = non_empty(explicit) {
    return Ok(services.messenger.inbox(inbox_id).await?);
  }

  Ok(
    services
      .messenger
      .active_inboxes(tenant_id)
      .await?
      .into_iter()
      .find(|inbox| inbox.provider != "META"),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use flowline_flow::FlowDefinition;
  use serde_json::json;

  #[test]
  fn test_resume_handle() {
    let flow: FlowDefinition = serde_json::from_value(json!({
      "id": "f1",
      "tenantId": "t1",
      "name": "Escalation",
      "triggerConfig": { "type": "MANUAL" },
      "nodes": [
        { "id": "ask", "type": "external_notify", "data": { "target": "CUSTOM" } },
        { "id": "done", "type": "add_tag", "data": { "tag_id": "done" } },
        { "id": "answered", "type": "add_tag", "data": { "tag_id": "answered" } },
        { "id": "late", "type": "add_tag", "data": { "tag_id": "late" } }
      ],
      "edges": [
        { "source": "ask", "target": "done", "sourceHandle": "opt_done" },
        { "source": "ask", "target": "answered", "sourceHandle": "response" },
        { "source": "ask", "target": "late", "sourceHandle": "timeout" }
      ]
    }))
    .unwrap();
    let graph = flow.graph();

    assert_eq!(resume_handle(&graph, "ask", true, Some("opt_done")), "opt_done");
    assert_eq!(resume_handle(&graph, "ask", true, Some("btn_0")), "response");
    assert_eq!(resume_handle(&graph, "ask", true, None), "response");
    assert_eq!(resume_handle(&graph, "ask", false, Some("opt_done")), "timeout");
  }

  #[test]
  fn test_normalize_phone() {
    assert_eq!(normalize_phone("+55 (11) 99999-0000"), "5511999990000");
    assert_eq!(normalize_phone("  "), "");
  }
}
