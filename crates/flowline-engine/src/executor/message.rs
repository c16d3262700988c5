use flowline_flow::{Button, ListSection, MediaType, MessageData};
use tracing::{info, warn};

use super::StepContext;
use crate::error::EngineError;
use crate::ports::{Inbox, OutboundContent, OutboundMessage, ReplyButton, Services};

pub(crate) const DEFAULT_LIST_BUTTON_TEXT: &str = "View options";

/// Send a message node's content to the execution's contact.
///
/// Buttons and lists go out natively when the inbox supports it and the
/// contact has a phone. A native send that fails falls back to text with
/// the options flattened into the body.
pub(crate) async fn send(
  services: &Services,
  ctx: &StepContext<'_>,
  data: &MessageData,
) -> Result<(), EngineError> {
  let inbox_id = ctx.protocol().inbox_id.clone();
  let phone = ctx.contact.and_then(|c| c.phone.clone());
  let body = ctx.render(&data.text);

  let inbox = match inbox_id.as_deref() {
    Some(id) => match services.messenger.inbox(id).await {
      Ok(inbox) => inbox,
      Err(e) => {
        warn!(inbox_id = id, error = %e, "inbox lookup failed, sending as text");
        None
      }
    },
    None => None,
  };
  let native = phone.is_some() && inbox.as_ref().is_some_and(Inbox::supports_interactive);

  let outbound = |content| OutboundMessage {
    tenant_id: ctx.flow.tenant_id.clone(),
    contact_id: ctx.execution.contact_id.clone(),
    chat_id: ctx.chat_id().to_string(),
    inbox_id: inbox_id.clone(),
    phone: phone.clone(),
    content,
  };

  if native && !data.buttons.is_empty() {
    let content = OutboundContent::Buttons {
      body: body.clone(),
      buttons: reply_buttons(&data.buttons),
    };
    match services.messenger.send(outbound(content)).await {
      Ok(()) => return Ok(()),
      Err(e) => warn!(execution_id = %ctx.execution.id, error = %e, "native buttons failed, falling back to text"),
    }
  }

  if native && let Some(sections) = data.sections() {
    let content = OutboundContent::List {
      body: body.clone(),
      button_text: data
        .list_button_text
        .clone()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_LIST_BUTTON_TEXT.to_string()),
      sections: sections.to_vec(),
    };
    match services.messenger.send(outbound(content)).await {
      Ok(()) => return Ok(()),
      Err(e) => warn!(execution_id = %ctx.execution.id, error = %e, "native list failed, falling back to text"),
    }
  }

  let content = match data.media_url() {
    Some(url) => {
      let (filename, mime_type, is_voice) = media_file(data.media_type, data.media_name.as_deref());
      OutboundContent::Media {
        url: url.to_string(),
        caption: body,
        filename,
        mime_type,
        is_voice,
      }
    }
    None => OutboundContent::Text {
      body: fallback_text(&body, &data.buttons, data.sections()),
    },
  };

  info!(execution_id = %ctx.execution.id, chat_id = ctx.chat_id(), "sending flow message");
  services.messenger.send(outbound(content)).await?;
  Ok(())
}

pub(crate) fn reply_buttons(buttons: &[Button]) -> Vec<ReplyButton> {
  buttons
    .iter()
    .enumerate()
    .map(|(i, b)| ReplyButton {
      id: b
        .id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("btn_{}", i)),
      title: b.text.clone(),
    })
    .collect()
}

/// Plain-text rendition of a message with its options appended.
///
/// Buttons become numbered lines (`1️⃣ Yes`), list rows become bullets
/// (`🔹 Title (description)`). Buttons win when both are present.
pub fn fallback_text(body: &str, buttons: &[Button], sections: Option<&[ListSection]>) -> String {
  let options: Vec<String> = if !buttons.is_empty() {
    buttons
      .iter()
      .enumerate()
      .map(|(i, b)| format!("{}\u{fe0f}\u{20e3} {}", i + 1, b.text))
      .collect()
  } else if let Some(sections) = sections {
    sections
      .iter()
      .flat_map(|s| s.rows.iter())
      .map(|row| match row.description.as_deref().filter(|d| !d.is_empty()) {
        Some(description) => format!("🔹 {} ({})", row.title, description),
        None => format!("🔹 {}", row.title),
      })
      .collect()
  } else {
    Vec::new()
  };

  if options.is_empty() {
    body.to_string()
  } else {
    format!("{}\n\n{}", body, options.join("\n"))
  }
}

/// File name, MIME type and voice flag of a media message.
pub fn media_file(media_type: Option<MediaType>, media_name: Option<&str>) -> (String, Option<String>, bool) {
  let is_voice = matches!(media_type, Some(MediaType::Audio | MediaType::Voice));
  let mime_type = matches!(media_type, Some(MediaType::Image)).then(|| "image/png".to_string());
  let default_name = match media_type {
    Some(MediaType::Image) => "image.png",
    Some(MediaType::Audio | MediaType::Voice) => "audio.ogg",
    _ => "file",
  };
  let filename = media_name
    .filter(|n| !n.is_empty())
    .unwrap_or(default_name)
    .to_string();
  (filename, mime_type, is_voice)
}
