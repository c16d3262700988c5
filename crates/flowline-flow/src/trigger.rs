use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The business event types that can start a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
  StageChange,
  TagAdded,
  Keyword,
  LeadCreated,
  NewMessage,
  SystemEvent,
  Manual,
}

impl TriggerType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::StageChange => "STAGE_CHANGE",
      Self::TagAdded => "TAG_ADDED",
      Self::Keyword => "KEYWORD",
      Self::LeadCreated => "LEAD_CREATED",
      Self::NewMessage => "NEW_MESSAGE",
      Self::SystemEvent => "SYSTEM_EVENT",
      Self::Manual => "MANUAL",
    }
  }

  /// Whether a trigger of this type replaces an execution that is still active.
  ///
  /// Keyword and manual triggers are explicit requests from a person, so they
  /// always win over whatever the contact is currently doing in the flow.
  pub fn always_restarts(&self) -> bool {
    matches!(self, Self::Keyword | Self::Manual)
  }
}

impl fmt::Display for TriggerType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TriggerType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "STAGE_CHANGE" => Ok(Self::StageChange),
      "TAG_ADDED" => Ok(Self::TagAdded),
      "KEYWORD" => Ok(Self::Keyword),
      "LEAD_CREATED" => Ok(Self::LeadCreated),
      "NEW_MESSAGE" => Ok(Self::NewMessage),
      "SYSTEM_EVENT" => Ok(Self::SystemEvent),
      "MANUAL" => Ok(Self::Manual),
      other => Err(format!("unknown trigger type '{}'", other)),
    }
  }
}

/// Trigger configuration attached to a flow definition.
///
/// The `type` tag selects the [`TriggerKind`]; the inbox and contact filters
/// are shared by every kind and only apply when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
  #[serde(flatten)]
  pub kind: TriggerKind,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub inbox_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub filter_stage_id: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub filter_tag_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerKind {
  StageChange {
    #[serde(default)]
    column_id: Option<String>,
  },
  TagAdded {
    #[serde(default)]
    tag_id: Option<String>,
  },
  Keyword {
    #[serde(default)]
    keyword: Option<String>,
  },
  LeadCreated,
  NewMessage {
    #[serde(default)]
    message_types: Vec<String>,
  },
  SystemEvent {
    /// Specific event name (e.g. `TASK_OVERDUE`); empty matches every event.
    #[serde(default)]
    event: Option<String>,
  },
  Manual,
}

impl Default for TriggerConfig {
  fn default() -> Self {
    Self {
      kind: TriggerKind::Manual,
      inbox_id: None,
      filter_stage_id: None,
      filter_tag_ids: Vec::new(),
    }
  }
}

impl TriggerKind {
  pub fn trigger_type(&self) -> TriggerType {
    match self {
      Self::StageChange { .. } => TriggerType::StageChange,
      Self::TagAdded { .. } => TriggerType::TagAdded,
      Self::Keyword { .. } => TriggerType::Keyword,
      Self::LeadCreated => TriggerType::LeadCreated,
      Self::NewMessage { .. } => TriggerType::NewMessage,
      Self::SystemEvent { .. } => TriggerType::SystemEvent,
      Self::Manual => TriggerType::Manual,
    }
  }
}

impl TriggerConfig {
  /// Inbox filter, ignoring the empty string the UI stores for "all inboxes".
  pub fn inbox_filter(&self) -> Option<&str> {
    non_empty(self.inbox_id.as_deref())
  }

  pub fn stage_filter(&self) -> Option<&str> {
    non_empty(self.filter_stage_id.as_deref())
  }

  pub fn tag_filter(&self) -> Vec<&str> {
    self
      .filter_tag_ids
      .iter()
      .filter_map(|id| non_empty(Some(id.as_str())))
      .collect()
  }

  /// Whether evaluating this trigger needs the contact's stage and tags.
  pub fn requires_contact_context(&self) -> bool {
    self.stage_filter().is_some() || !self.tag_filter().is_empty()
  }

  /// Evaluate the type-specific predicate against an incoming event.
  ///
  /// Pure function of the configuration and the event data; contact filters
  /// are evaluated separately by [`TriggerConfig::matches_contact`].
  pub fn matches_event(&self, trigger_type: TriggerType, data: &Map<String, Value>) -> bool {
    if self.kind.trigger_type() != trigger_type {
      return false;
    }

    match &self.kind {
      TriggerKind::StageChange { column_id } => {
        column_id.is_some() && column_id.as_deref() == text(data, "column_id").as_deref()
      }
      TriggerKind::TagAdded { tag_id } => {
        tag_id.is_some() && tag_id.as_deref() == text(data, "tag_id").as_deref()
      }
      TriggerKind::Keyword { keyword } => match non_empty(keyword.as_deref()) {
        Some(keyword) => text(data, "text")
          .is_some_and(|text| text.to_lowercase().contains(&keyword.to_lowercase())),
        None => false,
      },
      TriggerKind::LeadCreated => self.inbox_matches(data),
      TriggerKind::NewMessage { message_types } => {
        let type_matches = message_types.is_empty()
          || text(data, "type").is_some_and(|t| {
            let t = t.to_lowercase();
            message_types.iter().any(|allowed| allowed.to_lowercase() == t)
          });
        self.inbox_matches(data) && type_matches
      }
      TriggerKind::SystemEvent { event } => match non_empty(event.as_deref()) {
        Some(event) => text(data, "event").as_deref() == Some(event),
        None => true,
      },
      TriggerKind::Manual => true,
    }
  }

  /// Evaluate the stage and tag filters against the contact's current state.
  ///
  /// The tag filter has OR semantics: one shared tag is enough.
  pub fn matches_contact(&self, stage_id: Option<&str>, tag_ids: &[String]) -> bool {
    if let Some(stage) = self.stage_filter()
      && Some(stage) != stage_id
    {
      return false;
    }

    let tags = self.tag_filter();
    tags.is_empty() || tags.iter().any(|t| tag_ids.iter().any(|held| held == t))
  }

  fn inbox_matches(&self, data: &Map<String, Value>) -> bool {
    match self.inbox_filter() {
      Some(inbox) => text(data, "inbox_id").as_deref() == Some(inbox),
      None => true,
    }
  }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
  value.filter(|v| !v.trim().is_empty())
}

/// Read a string-like field from event data. Numeric ids are stringified.
fn text(data: &Map<String, Value>, key: &str) -> Option<String> {
  match data.get(key)? {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}
