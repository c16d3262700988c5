use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys that carry engine bookkeeping rather than flow data.
///
/// They live in [`ProtocolState`]; any of them arriving through trigger data
/// or a node result is dropped from the user variables.
pub const RESERVED_KEYS: &[&str] = &[
  "waiting_for_response",
  "waiting_for_external",
  "responded",
  "response_edge",
  "chat_id",
  "inbox_id",
  "external_customer_id",
  "external_chat_id",
  "external_chat_uuid",
];

/// The working memory of an execution.
///
/// A flat JSON object merged shallowly on every transition. Values written by
/// one node are visible to every later node and to message templating.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variables(Map<String, Value>);

impl Variables {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build user variables from event data, dropping reserved keys.
  pub fn from_trigger_data(data: &Map<String, Value>) -> Self {
    let mut vars = Self(data.clone());
    vars.strip_reserved();
    vars
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.0.get(key)
  }

  /// Read a value as text. Numbers and booleans are stringified, null and
  /// missing keys are `None`.
  pub fn get_str(&self, key: &str) -> Option<String> {
    match self.0.get(key)? {
      Value::String(s) => Some(s.clone()),
      Value::Number(n) => Some(n.to_string()),
      Value::Bool(b) => Some(b.to_string()),
      Value::Null => None,
      other => Some(other.to_string()),
    }
  }

  pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
    self.0.insert(key.into(), value.into());
  }

  pub fn contains_key(&self, key: &str) -> bool {
    self.0.contains_key(key)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Shallow merge: keys in `other` overwrite keys in `self`.
  pub fn merge(&mut self, other: Variables) {
    for (key, value) in other.0 {
      if !RESERVED_KEYS.contains(&key.as_str()) {
        self.0.insert(key, value);
      }
    }
  }

  pub fn strip_reserved(&mut self) {
    self.0.retain(|key, _| !RESERVED_KEYS.contains(&key.as_str()));
  }

  pub fn as_map(&self) -> &Map<String, Value> {
    &self.0
  }
}

impl From<Map<String, Value>> for Variables {
  fn from(map: Map<String, Value>) -> Self {
    Self(map)
  }
}

/// Engine bookkeeping for an execution, kept apart from user variables.
///
/// `chat_id`/`inbox_id` bind the execution to a conversation. The wait flags
/// and `external_*` ids let an inbound message find the suspended execution
/// it answers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolState {
  #[serde(default)]
  pub chat_id: Option<String>,
  #[serde(default)]
  pub inbox_id: Option<String>,
  #[serde(default)]
  pub waiting_for_response: bool,
  #[serde(default)]
  pub waiting_for_external: bool,
  #[serde(default)]
  pub responded: bool,
  /// Interactive payload id of the reply, used as the branch handle.
  #[serde(default)]
  pub response_edge: Option<String>,
  #[serde(default)]
  pub external_customer_id: Option<String>,
  #[serde(default)]
  pub external_chat_id: Option<String>,
  #[serde(default)]
  pub external_chat_uuid: Option<String>,
}

impl ProtocolState {
  pub fn new(chat_id: Option<String>, inbox_id: Option<String>) -> Self {
    Self {
      chat_id,
      inbox_id,
      ..Default::default()
    }
  }

  /// Whether an inbound message on `chat_id` answers this execution.
  pub fn awaits_reply_on(&self, chat_id: &str) -> bool {
    if self.waiting_for_response && self.chat_id.as_deref() == Some(chat_id) {
      return true;
    }
    self.waiting_for_external
      && (self.external_chat_uuid.as_deref() == Some(chat_id)
        || self.external_chat_id.as_deref() == Some(chat_id))
  }

  /// Record a reply. `payload` is the interactive button/row id, if any.
  pub fn record_response(&mut self, payload: Option<String>) {
    self.responded = true;
    self.response_edge = payload;
  }

  /// Clear the wait bookkeeping once a waiting node has been revisited.
  pub fn clear_wait(&mut self) {
    self.waiting_for_response = false;
    self.waiting_for_external = false;
    self.responded = false;
    self.response_edge = None;
    self.external_customer_id = None;
    self.external_chat_id = None;
    self.external_chat_uuid = None;
  }
}
