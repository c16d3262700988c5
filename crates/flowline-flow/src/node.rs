use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::FlowError;

/// A node in a flow graph.
///
/// Stored as `{ id, type, data }`. The `type` string and the `data` payload
/// are parsed together into a [`NodeKind`] variant; `data.isStart` marks a
/// non-trigger node as the entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNode", into = "RawNode")]
pub struct Node {
  pub id: String,
  pub kind: NodeKind,
  pub is_start: bool,
}

impl Node {
  pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
    Self {
      id: id.into(),
      kind,
      is_start: false,
    }
  }

  /// Mark this node as the entry point.
  pub fn start(mut self) -> Self {
    self.is_start = true;
    self
  }

  /// Whether execution begins at this node.
  pub fn is_entry(&self) -> bool {
    self.is_start || matches!(self.kind, NodeKind::Trigger(_))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum NodeKind {
  Trigger(StartData),
  Message(MessageData),
  Interactive(MessageData),
  WaitForResponse(WaitForResponseData),
  Switch(SwitchData),
  Wait(WaitData),
  AddTag(TagData),
  MoveStage(MoveStageData),
  ChangeStatus(ChangeStatusData),
  ExternalNotify(ExternalNotifyData),
  AiAction(AiActionData),
  Condition(ConditionData),
}

impl NodeKind {
  /// The storage name of this node type, also used as the step log action.
  pub fn type_name(&self) -> &'static str {
    match self {
      Self::Trigger(_) => "trigger",
      Self::Message(_) => "message",
      Self::Interactive(_) => "interactive",
      Self::WaitForResponse(_) => "wait_for_response",
      Self::Switch(_) => "switch",
      Self::Wait(_) => "wait",
      Self::AddTag(_) => "add_tag",
      Self::MoveStage(_) => "move_stage",
      Self::ChangeStatus(_) => "change_status",
      Self::ExternalNotify(_) => "external_notify",
      Self::AiAction(_) => "ai_action",
      Self::Condition(_) => "condition",
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartData {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub label: Option<String>,
}

/// Outbound message content shared by message-like nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageData {
  #[serde(default)]
  pub text: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub buttons: Vec<Button>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub list_sections: Option<Vec<ListSection>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub list_button_text: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub media_url: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub media_type: Option<MediaType>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub media_name: Option<String>,
}

impl MessageData {
  pub fn has_text(&self) -> bool {
    !self.text.trim().is_empty()
  }

  pub fn media_url(&self) -> Option<&str> {
    self.media_url.as_deref().filter(|u| !u.is_empty())
  }

  /// List sections, ignoring an empty list.
  pub fn sections(&self) -> Option<&[ListSection]> {
    self.list_sections.as_deref().filter(|s| !s.is_empty())
  }

  pub fn has_content(&self) -> bool {
    self.has_text() || self.media_url().is_some()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Button {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(default)]
  pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListSection {
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub rows: Vec<ListRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListRow {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(default)]
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaType {
  Image,
  Video,
  Audio,
  Voice,
  Document,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaitForResponseData {
  #[serde(flatten)]
  pub message: MessageData,
  #[serde(
    rename = "timeoutMinutes",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub timeout_minutes: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchData {
  /// Variable to route on; `last_response` when unset.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub variable: Option<String>,
}

impl SwitchData {
  pub fn variable(&self) -> &str {
    self
      .variable
      .as_deref()
      .filter(|v| !v.is_empty())
      .unwrap_or("last_response")
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaitData {
  #[serde(
    rename = "delayMinutes",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub delay_minutes: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagData {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tag_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveStageData {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub column_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeStatusData {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
}

/// Who an `external_notify` node sends to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotifyTarget {
  /// The user responsible for the task/project behind a system event.
  #[default]
  Responsible,
  /// The customer attached to the task/project behind a system event.
  EntityCustomer,
  /// The contact the flow is running for.
  FlowContact,
  /// A fixed or templated phone number.
  Custom,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalNotifyData {
  #[serde(default)]
  pub target: NotifyTarget,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub custom_phone: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub inbox_id: Option<String>,
  #[serde(flatten)]
  pub message: MessageData,
  #[serde(default)]
  pub wait_for_response: bool,
  #[serde(
    rename = "timeoutMinutes",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub timeout_minutes: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AiAction {
  Activate,
  Deactivate,
  Transfer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiActionData {
  pub action: AiAction,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub agent_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub destination_status: Option<String>,
  /// Explicit chat status override, wins over the per-action default.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub change_chat_status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionType {
  HasTag,
  InStage,
  BusinessHours,
  HasValue,
  MsgContains,
  MsgEquals,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionData {
  pub condition_type: ConditionType,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tag_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub column_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub field: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub value: Option<String>,
}

/// Storage representation of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawNode {
  id: String,
  #[serde(rename = "type")]
  node_type: String,
  #[serde(default)]
  data: Value,
}

impl TryFrom<RawNode> for Node {
  type Error = FlowError;

  fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
    let data = match raw.data {
      Value::Null => json!({}),
      data => data,
    };
    let is_start = data
      .get("isStart")
      .and_then(Value::as_bool)
      .unwrap_or(false);

    let kind: NodeKind = serde_json::from_value(json!({ "type": raw.node_type, "data": data }))
      .map_err(|e| FlowError::InvalidNode {
        node_id: raw.id.clone(),
        message: e.to_string(),
      })?;

    Ok(Self {
      id: raw.id,
      kind,
      is_start,
    })
  }
}

impl From<Node> for RawNode {
  fn from(node: Node) -> Self {
    let tagged = serde_json::to_value(&node.kind).unwrap_or(Value::Null);
    let mut data = tagged.get("data").cloned().unwrap_or_else(|| json!({}));
    if node.is_start
      && let Some(obj) = data.as_object_mut()
    {
      obj.insert("isStart".to_string(), Value::Bool(true));
    }

    Self {
      id: node.id,
      node_type: node.kind.type_name().to_string(),
      data,
    }
  }
}
