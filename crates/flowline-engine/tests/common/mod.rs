//! Recording fakes for the engine's collaborators.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flowline_engine::{
  ChatRef, Chats, Contact, ContactContext, Contacts, EngineConfig, EntityResolver, EntityType,
  FlowEngine, Inbox, Messenger, Notification, Operators, OutboundContent, OutboundMessage,
  QueueError, ServiceError, Services, StepOutcome, StepQueue,
};
use flowline_flow::FlowDefinition;
use flowline_store::{FlowExecution, MemoryStore, Store};
use serde_json::{Map, Value};

#[derive(Default)]
pub struct FakeContacts {
  pub contacts: Mutex<HashMap<String, Contact>>,
  pub tags: Mutex<HashMap<String, Vec<String>>>,
  pub stages: Mutex<HashMap<String, String>>,
  pub fail_context: AtomicBool,
  pub fail_add_tag: AtomicBool,
}

impl FakeContacts {
  pub fn add(&self, contact: Contact) {
    self.contacts.lock().unwrap().insert(contact.id.clone(), contact);
  }

  pub fn tags_of(&self, contact_id: &str) -> Vec<String> {
    self.tags.lock().unwrap().get(contact_id).cloned().unwrap_or_default()
  }

  pub fn give_tag(&self, contact_id: &str, tag_id: &str) {
    self
      .tags
      .lock()
      .unwrap()
      .entry(contact_id.to_string())
      .or_default()
      .push(tag_id.to_string());
  }
}

#[async_trait]
impl Contacts for FakeContacts {
  async fn get(&self, contact_id: &str) -> Result<Option<Contact>, ServiceError> {
    Ok(self.contacts.lock().unwrap().get(contact_id).cloned())
  }

  async fn find_or_create_by_phone(
    &self,
    _tenant_id: &str,
    phone: &str,
    name: Option<&str>,
  ) -> Result<Contact, ServiceError> {
    let mut contacts = self.contacts.lock().unwrap();
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
    if self.fail_context.load(Ordering::SeqCst) {
      return Err(ServiceError::Unavailable("contact context".to_string()));
    }
    Ok(ContactContext {
      stage_id: self.stages.lock().unwrap().get(contact_id).cloned(),
      tag_ids: self.tags_of(contact_id),
    })
  }

  async fn add_tag(&self, contact_id: &str, tag_id: &str) -> Result<(), ServiceError> {
    if self.fail_add_tag.load(Ordering::SeqCst) {
      return Err(ServiceError::Unavailable("tag upsert".to_string()));
    }
    let mut tags = self.tags.lock().unwrap();
    let held = tags.entry(contact_id.to_string()).or_default();
    if !held.iter().any(|t| t == tag_id) {
      held.push(tag_id.to_string());
    }
    Ok(())
  }

  async fn move_stage(&self, contact_id: &str, column_id: &str) -> Result<(), ServiceError> {
    self
      .stages
      .lock()
      .unwrap()
      .insert(contact_id.to_string(), column_id.to_string());
    Ok(())
  }
}

#[derive(Default)]
pub struct FakeChats {
  pub statuses: Mutex<Vec<(String, String)>>,
  pub agents: Mutex<Vec<(String, Option<String>, String)>>,
  pub system_messages: Mutex<Vec<(String, String)>>,
  pub inboxes: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl Chats for FakeChats {
  async fn set_status(&self, chat_id: &str, status: &str) -> Result<(), ServiceError> {
    self
      .statuses
      .lock()
      .unwrap()
      .push((chat_id.to_string(), status.to_string()));
    Ok(())
  }

  async fn set_ai_agent(
    &self,
    chat_id: &str,
    agent_id: Option<&str>,
    status: &str,
  ) -> Result<(), ServiceError> {
    self.agents.lock().unwrap().push((
      chat_id.to_string(),
      agent_id.map(String::from),
      status.to_string(),
    ));
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
      uuid: Some(format!("uuid-{}", contact_id)),
    })
  }

  async fn post_system_message(&self, chat_id: &str, content: &str) -> Result<(), ServiceError> {
    self
      .system_messages
      .lock()
      .unwrap()
      .push((chat_id.to_string(), content.to_string()));
    Ok(())
  }

  async fn inbox_of(&self, chat_id: &str) -> Result<Option<String>, ServiceError> {
    Ok(self.inboxes.lock().unwrap().get(chat_id).cloned())
  }
}

#[derive(Default)]
pub struct FakeMessenger {
  pub inboxes: Mutex<Vec<Inbox>>,
  pub sent: Mutex<Vec<OutboundMessage>>,
  pub fail_interactive: AtomicBool,
}

impl FakeMessenger {
  pub fn add_inbox(&self, id: &str, provider: &str) {
    self.inboxes.lock().unwrap().push(Inbox {
      id: id.to_string(),
      provider: provider.to_string(),
    });
  }

  pub fn sent(&self) -> Vec<OutboundMessage> {
    self.sent.lock().unwrap().clone()
  }

  /// Bodies of the text messages sent so far.
  pub fn texts(&self) -> Vec<String> {
    self
      .sent()
      .into_iter()
      .filter_map(|m| match m.content {
        OutboundContent::Text { body } => Some(body),
        _ => None,
      })
      .collect()
  }
}

#[async_trait]
impl Messenger for FakeMessenger {
  async fn inbox(&self, inbox_id: &str) -> Result<Option<Inbox>, ServiceError> {
    Ok(self.inboxes.lock().unwrap().iter().find(|i| i.id == inbox_id).cloned())
  }

  async fn active_inboxes(&self, _tenant_id: &str) -> Result<Vec<Inbox>, ServiceError> {
    Ok(self.inboxes.lock().unwrap().clone())
  }

  async fn send(&self, message: OutboundMessage) -> Result<(), ServiceError> {
    let interactive = matches!(
      message.content,
      OutboundContent::Buttons { .. } | OutboundContent::List { .. }
    );
    if interactive && self.fail_interactive.load(Ordering::SeqCst) {
      return Err(ServiceError::Send("interactive rejected".to_string()));
    }
    self.sent.lock().unwrap().push(message);
    Ok(())
  }
}

#[derive(Default)]
pub struct FakeOperators {
  pub names: Mutex<HashMap<String, String>>,
  pub notifications: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Operators for FakeOperators {
  async fn name(&self, user_id: &str) -> Result<Option<String>, ServiceError> {
    Ok(self.names.lock().unwrap().get(user_id).cloned())
  }

  async fn notify(&self, notification: Notification) -> Result<(), ServiceError> {
    self.notifications.lock().unwrap().push(notification);
    Ok(())
  }
}

#[derive(Default)]
pub struct FakeEntities {
  pub entities: Mutex<HashMap<String, Map<String, Value>>>,
}

#[async_trait]
impl EntityResolver for FakeEntities {
  async fn resolve(
    &self,
    _tenant_id: &str,
    _entity_type: EntityType,
    entity_id: &str,
  ) -> Result<Map<String, Value>, ServiceError> {
    self
      .entities
      .lock()
      .unwrap()
      .get(entity_id)
      .cloned()
      .ok_or_else(|| ServiceError::NotFound(format!("entity {}", entity_id)))
  }
}

/// Queue that records enqueued ids for tests to drain by hand.
#[derive(Default)]
pub struct RecordingQueue {
  pub pending: Mutex<VecDeque<String>>,
  /// Reject every enqueue as if the queue were closed.
  pub closed: AtomicBool,
}

impl RecordingQueue {
  pub fn pop(&self) -> Option<String> {
    self.pending.lock().unwrap().pop_front()
  }

  pub fn len(&self) -> usize {
    self.pending.lock().unwrap().len()
  }
}

#[async_trait]
impl StepQueue for RecordingQueue {
  async fn enqueue(&self, execution_id: &str) -> Result<(), QueueError> {
    if self.closed.load(Ordering::SeqCst) {
      return Err(QueueError::Closed);
    }
    self
      .pending
      .lock()
      .unwrap()
      .push_back(execution_id.to_string());
    Ok(())
  }
}

pub struct Harness {
  pub engine: FlowEngine,
  pub store: Arc<MemoryStore>,
  pub queue: Arc<RecordingQueue>,
  pub contacts: Arc<FakeContacts>,
  pub chats: Arc<FakeChats>,
  pub messenger: Arc<FakeMessenger>,
  pub operators: Arc<FakeOperators>,
  pub entities: Arc<FakeEntities>,
}

pub const TENANT: &str = "tenant-1";

impl Harness {
  pub fn new() -> Self {
    Self::with_config(EngineConfig::default())
  }

  pub fn with_config(config: EngineConfig) -> Self {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(RecordingQueue::default());
    let contacts = Arc::new(FakeContacts::default());
    let chats = Arc::new(FakeChats::default());
    let messenger = Arc::new(FakeMessenger::default());
    let operators = Arc::new(FakeOperators::default());
    let entities = Arc::new(FakeEntities::default());

    let services = Services {
      contacts: contacts.clone(),
      chats: chats.clone(),
      messenger: messenger.clone(),
      operators: operators.clone(),
      entities: entities.clone(),
    };
    let engine = FlowEngine::new(store.clone(), queue.clone(), services, config);

    Self {
      engine,
      store,
      queue,
      contacts,
      chats,
      messenger,
      operators,
      entities,
    }
  }

  /// The fakes bundled for wiring a second engine.
  pub fn services(&self) -> Services {
    Services {
      contacts: self.contacts.clone(),
      chats: self.chats.clone(),
      messenger: self.messenger.clone(),
      operators: self.operators.clone(),
      entities: self.entities.clone(),
    }
  }

  pub async fn save_flow(&self, flow: Value) -> FlowDefinition {
    let flow: FlowDefinition = serde_json::from_value(flow).expect("invalid test flow");
    self.store.save_flow(&flow).await.expect("failed to save flow");
    flow
  }

  /// Process queued steps until the queue is empty.
  pub async fn drain(&self) -> Vec<StepOutcome> {
    let mut outcomes = Vec::new();
    while let Some(id) = self.queue.pop() {
      outcomes.push(self.engine.process_step(&id).await.expect("step failed"));
      assert!(outcomes.len() < 100, "flow did not quiesce");
    }
    outcomes
  }

  pub async fn executions(&self, flow_id: &str) -> Vec<FlowExecution> {
    let mut executions = self.store.list_executions(flow_id).await.unwrap();
    executions.reverse();
    executions
  }

  pub async fn only_execution(&self, flow_id: &str) -> FlowExecution {
    let executions = self.executions(flow_id).await;
    assert_eq!(executions.len(), 1, "expected exactly one execution");
    executions.into_iter().next().unwrap()
  }
}

pub fn data(value: Value) -> Map<String, Value> {
  value.as_object().cloned().expect("expected a JSON object")
}

pub fn contact(id: &str, name: &str, phone: &str) -> Contact {
  Contact {
    id: id.to_string(),
    name: Some(name.to_string()),
    phone: Some(phone.to_string()),
    fields: Map::new(),
  }
}
