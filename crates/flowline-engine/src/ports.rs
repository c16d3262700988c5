//! Interfaces to the rest of the CRM.
//!
//! The engine never talks to contacts, chats, messaging providers or
//! operator notifications directly. Each concern is a trait here, injected
//! through [`Services`].

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use flowline_flow::ListSection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Error returned by external collaborators.
#[derive(Debug, Error)]
pub enum ServiceError {
  #[error("{0} not found")]
  NotFound(String),

  #[error("send failed: {0}")]
  Send(String),

  #[error("service unavailable: {0}")]
  Unavailable(String),
}

/// A CRM contact (customer).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
  pub id: String,
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub phone: Option<String>,
  /// Remaining record fields, read by `HAS_VALUE` conditions.
  #[serde(default)]
  pub fields: Map<String, Value>,
}

/// Pipeline stage and tags of a contact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactContext {
  pub stage_id: Option<String>,
  pub tag_ids: Vec<String>,
}

#[async_trait]
pub trait Contacts: Send + Sync {
  async fn get(&self, contact_id: &str) -> Result<Option<Contact>, ServiceError>;

  async fn find_or_create_by_phone(
    &self,
    tenant_id: &str,
    phone: &str,
    name: Option<&str>,
  ) -> Result<Contact, ServiceError>;

  /// Kanban stage and tag ids of a contact.
  async fn context(&self, contact_id: &str) -> Result<ContactContext, ServiceError>;

  /// Idempotent.
  async fn add_tag(&self, contact_id: &str, tag_id: &str) -> Result<(), ServiceError>;

  /// Idempotent.
  async fn move_stage(&self, contact_id: &str, column_id: &str) -> Result<(), ServiceError>;
}

/// Identifiers of a chat as known to the messaging layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRef {
  pub id: String,
  pub uuid: Option<String>,
}

#[async_trait]
pub trait Chats: Send + Sync {
  async fn set_status(&self, chat_id: &str, status: &str) -> Result<(), ServiceError>;

  /// Assign (or clear) the AI agent and set the chat status.
  async fn set_ai_agent(
    &self,
    chat_id: &str,
    agent_id: Option<&str>,
    status: &str,
  ) -> Result<(), ServiceError>;

  async fn find_or_create(
    &self,
    tenant_id: &str,
    contact_id: &str,
    inbox_id: &str,
  ) -> Result<ChatRef, ServiceError>;

  /// Insert a system-authored message into a chat.
  async fn post_system_message(&self, chat_id: &str, content: &str) -> Result<(), ServiceError>;

  async fn inbox_of(&self, chat_id: &str) -> Result<Option<String>, ServiceError>;
}

/// A messaging channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbox {
  pub id: String,
  pub provider: String,
}

impl Inbox {
  /// Whether the provider renders native buttons and lists.
  pub fn supports_interactive(&self) -> bool {
    matches!(self.provider.as_str(), "META" | "META_CLOUD")
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyButton {
  pub id: String,
  pub title: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundContent {
  Text {
    body: String,
  },
  Buttons {
    body: String,
    buttons: Vec<ReplyButton>,
  },
  List {
    body: String,
    button_text: String,
    sections: Vec<ListSection>,
  },
  Media {
    url: String,
    caption: String,
    filename: String,
    mime_type: Option<String>,
    is_voice: bool,
  },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
  pub tenant_id: String,
  pub contact_id: String,
  pub chat_id: String,
  pub inbox_id: Option<String>,
  pub phone: Option<String>,
  pub content: OutboundContent,
}

#[async_trait]
pub trait Messenger: Send + Sync {
  async fn inbox(&self, inbox_id: &str) -> Result<Option<Inbox>, ServiceError>;

  /// Active inboxes of a tenant, in configuration order.
  async fn active_inboxes(&self, tenant_id: &str) -> Result<Vec<Inbox>, ServiceError>;

  async fn send(&self, message: OutboundMessage) -> Result<(), ServiceError>;
}

/// A notification for a human operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub tenant_id: String,
  pub user_id: String,
  pub title: String,
  pub message: String,
}

#[async_trait]
pub trait Operators: Send + Sync {
  async fn name(&self, user_id: &str) -> Result<Option<String>, ServiceError>;

  async fn notify(&self, notification: Notification) -> Result<(), ServiceError>;
}

/// Business entity behind a system event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
  Task,
  Project,
}

impl FromStr for EntityType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "TASK" => Ok(Self::Task),
      "PROJECT" => Ok(Self::Project),
      other => Err(format!("unknown entity type '{}'", other)),
    }
  }
}

#[async_trait]
pub trait EntityResolver: Send + Sync {
  /// Denormalized context of an entity: `responsible_name`,
  /// `responsible_phone`, `customer_name`, `customer_phone`,
  /// `<entity>_title`, `<entity>_status`, ...
  async fn resolve(
    &self,
    tenant_id: &str,
    entity_type: EntityType,
    entity_id: &str,
  ) -> Result<Map<String, Value>, ServiceError>;
}

/// The collaborators the engine is wired with.
#[derive(Clone)]
pub struct Services {
  pub contacts: Arc<dyn Contacts>,
  pub chats: Arc<dyn Chats>,
  pub messenger: Arc<dyn Messenger>,
  pub operators: Arc<dyn Operators>,
  pub entities: Arc<dyn EntityResolver>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_interactive_providers() {
    let inbox = |provider: &str| Inbox {
      id: "i".to_string(),
      provider: provider.to_string(),
    };
    assert!(inbox("META").supports_interactive());
    assert!(inbox("META_CLOUD").supports_interactive());
    assert!(!inbox("EVOLUTION").supports_interactive());
  }

  #[test]
  fn test_entity_type_parse() {
    assert_eq!("task".parse::<EntityType>().unwrap(), EntityType::Task);
    assert_eq!("PROJECT".parse::<EntityType>().unwrap(), EntityType::Project);
    assert!("invoice".parse::<EntityType>().is_err());
  }
}
