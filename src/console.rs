//! In-process collaborators for simulating flows from the command line.
//!
//! Contacts, tags and stages live in memory. Outbound messages and chat
//! changes are logged and recorded so the run can be printed afterwards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flowline_engine::{
  ChatRef, Chats, Contact, ContactContext, Contacts, EntityResolver, EntityType, Inbox, Messenger,
  Notification, Operators, OutboundContent, OutboundMessage, ServiceError, Services,
};
use serde_json::{Map, Value, json};
use tracing::info;

/// Everything the simulated collaborators did, in order.
#[derive(Default)]
pub struct Journal {
  events: Mutex<Vec<Value>>,
}

impl Journal {
  fn record(&self, event: Value) {
    if let Ok(mut events) = self.events.lock() {
      events.push(event);
    }
  }

  pub fn events(&self) -> Vec<Value> {
    self.events.lock().map(|e| e.clone()).unwrap_or_default()
  }
}

pub struct ConsoleContacts {
  journal: Arc<Journal>,
  contacts: Mutex<HashMap<String, Contact>>,
  context: Mutex<HashMap<String, ContactContext>>,
}

impl ConsoleContacts {
  pub fn new(journal: Arc<Journal>, seed: Contact) -> Self {
    let mut contacts = HashMap::new();
    contacts.insert(seed.id.clone(), seed);
    Self {
      journal,
      contacts: Mutex::new(contacts),
      context: Mutex::new(HashMap::new()),
    }
  }

  fn lock_error() -> ServiceError {
    ServiceError::Unavailable("contact store poisoned".to_string())
  }
}

#[async_trait]
impl Contacts for ConsoleContacts {
  async fn get(&self, contact_id: &str) -> Result<Option<Contact>, ServiceError> {
    let contacts = self.contacts.lock().map_err(|_| Self::lock_error())?;
    Ok(contacts.get(contact_id).cloned())
  }

  async fn find_or_create_by_phone(
    &self,
    _tenant_id: &str,
    phone: &str,
    name: Option<&str>,
  ) -> Result<Contact, ServiceError> {
    let mut contacts = self.contacts.lock().map_err(|_| Self::lock_error())?;
    if let Some(existing) = contacts.values().find(|c| c.phone.as_deref() == Some(phone)) {
      return Ok(existing.clone());
    }

    let contact = Contact {
      id: format!("contact-{}", phone),
      name: name.map(String::from),
      phone: Some(phone.to_string()),
      fields: Map::new(),
    };
    contacts.insert(contact.id.clone(), contact.clone());
    Ok(contact)
  }

  async fn context(&self, contact_id: &str) -> Result<ContactContext, ServiceError> {
    let context = self.context.lock().map_err(|_| Self::lock_error())?;
    Ok(context.get(contact_id).cloned().unwrap_or_default())
  }

  async fn add_tag(&self, contact_id: &str, tag_id: &str) -> Result<(), ServiceError> {
    {
      let mut context = self.context.lock().map_err(|_| Self::lock_error())?;
      let entry = context.entry(contact_id.to_string()).or_default();
      if !entry.tag_ids.iter().any(|t| t == tag_id) {
        entry.tag_ids.push(tag_id.to_string());
      }
    }
    info!(contact_id, tag_id, "tag added");
    self
      .journal
      .record(json!({ "action": "add_tag", "contactId": contact_id, "tagId": tag_id }));
    Ok(())
  }

  async fn move_stage(&self, contact_id: &str, column_id: &str) -> Result<(), ServiceError> {
    {
      let mut context = self.context.lock().map_err(|_| Self::lock_error())?;
      context.entry(contact_id.to_string()).or_default().stage_id = Some(column_id.to_string());
    }
    info!(contact_id, column_id, "stage moved");
    self
      .journal
      .record(json!({ "action": "move_stage", "contactId": contact_id, "columnId": column_id }));
    Ok(())
  }
}

pub struct ConsoleChats {
  journal: Arc<Journal>,
  inbox_id: Option<String>,
}

#[async_trait]
impl Chats for ConsoleChats {
  async fn set_status(&self, chat_id: &str, status: &str) -> Result<(), ServiceError> {
    info!(chat_id, status, "chat status changed");
    self
      .journal
      .record(json!({ "action": "set_status", "chatId": chat_id, "status": status }));
    Ok(())
  }

  async fn set_ai_agent(
    &self,
    chat_id: &str,
    agent_id: Option<&str>,
    status: &str,
  ) -> Result<(), ServiceError> {
    info!(chat_id, agent_id, status, "chat agent changed");
    self.journal.record(json!({
      "action": "set_ai_agent",
      "chatId": chat_id,
      "agentId": agent_id,
      "status": status
    }));
    Ok(())
  }

  async fn find_or_create(
    &self,
    _tenant_id: &str,
    contact_id: &str,
    _inbox_id: &str,
  ) -> Result<ChatRef, ServiceError> {
    Ok(ChatRef {
      id: format!("chat-{}", contact_id),
      uuid: None,
    })
  }

  async fn post_system_message(&self, chat_id: &str, content: &str) -> Result<(), ServiceError> {
    info!(chat_id, content, "system message");
    self
      .journal
      .record(json!({ "action": "system_message", "chatId": chat_id, "content": content }));
    Ok(())
  }

  async fn inbox_of(&self, _chat_id: &str) -> Result<Option<String>, ServiceError> {
    Ok(self.inbox_id.clone())
  }
}

pub struct ConsoleMessenger {
  journal: Arc<Journal>,
  inbox: Option<Inbox>,
}

#[async_trait]
impl Messenger for ConsoleMessenger {
  async fn inbox(&self, inbox_id: &str) -> Result<Option<Inbox>, ServiceError> {
    Ok(self.inbox.clone().filter(|i| i.id == inbox_id))
  }

  async fn active_inboxes(&self, _tenant_id: &str) -> Result<Vec<Inbox>, ServiceError> {
    Ok(self.inbox.clone().into_iter().collect())
  }

  async fn send(&self, message: OutboundMessage) -> Result<(), ServiceError> {
    let content = describe(&message.content);
    info!(chat_id = %message.chat_id, contact_id = %message.contact_id, "message sent");
    self.journal.record(json!({
      "action": "send",
      "contactId": message.contact_id,
      "chatId": message.chat_id,
      "inboxId": message.inbox_id,
      "phone": message.phone,
      "content": content
    }));
    Ok(())
  }
}

pub struct ConsoleOperators {
  journal: Arc<Journal>,
}

#[async_trait]
impl Operators for ConsoleOperators {
  async fn name(&self, _user_id: &str) -> Result<Option<String>, ServiceError> {
    Ok(None)
  }

  async fn notify(&self, notification: Notification) -> Result<(), ServiceError> {
    info!(user_id = %notification.user_id, title = %notification.title, "operator notified");
    self.journal.record(json!({
      "action": "notify",
      "userId": notification.user_id,
      "title": notification.title,
      "message": notification.message
    }));
    Ok(())
  }
}

/// Resolves every entity to the same fixed context.
pub struct StaticEntities {
  context: Map<String, Value>,
}

#[async_trait]
impl EntityResolver for StaticEntities {
  async fn resolve(
    &self,
    _tenant_id: &str,
    _entity_type: EntityType,
    entity_id: &str,
  ) -> Result<Map<String, Value>, ServiceError> {
    if self.context.is_empty() {
      return Err(ServiceError::NotFound(format!("entity {}", entity_id)));
    }
    Ok(self.context.clone())
  }
}

/// Options for wiring the console collaborators.
pub struct ConsoleOptions {
  pub contact: Contact,
  pub inbox: Option<Inbox>,
  pub entity_context: Map<String, Value>,
}

pub fn services(journal: Arc<Journal>, options: ConsoleOptions) -> Services {
  let inbox_id = options.inbox.as_ref().map(|i| i.id.clone());
  Services {
    contacts: Arc::new(ConsoleContacts::new(journal.clone(), options.contact)),
    chats: Arc::new(ConsoleChats {
      journal: journal.clone(),
      inbox_id,
    }),
    messenger: Arc::new(ConsoleMessenger {
      journal: journal.clone(),
      inbox: options.inbox,
    }),
    operators: Arc::new(ConsoleOperators { journal }),
    entities: Arc::new(StaticEntities {
      context: options.entity_context,
    }),
  }
}

fn describe(content: &OutboundContent) -> Value {
  match content {
    OutboundContent::Text { body } => json!({ "type": "text", "body": body }),
    OutboundContent::Buttons { body, buttons } => json!({
      "type": "buttons",
      "body": body,
      "buttons": buttons
        .iter()
        .map(|b| json!({ "id": b.id, "title": b.title }))
        .collect::<Vec<_>>()
    }),
    OutboundContent::List {
      body,
      button_text,
      sections,
    } => json!({
      "type": "list",
      "body": body,
      "buttonText": button_text,
      "sections": sections
    }),
    OutboundContent::Media {
      url,
      caption,
      filename,
      mime_type,
      is_voice,
    } => json!({
      "type": "media",
      "url": url,
      "caption": caption,
      "filename": filename,
      "mimeType": mime_type,
      "isVoice": is_voice
    }),
  }
}
