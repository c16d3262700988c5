//! Flowline Engine
//!
//! Runs automation flows as per-contact state machines. Business events
//! start executions, a queue-driven worker advances them one node at a time,
//! and suspended executions resume when a reply arrives or their wait
//! expires.
//!
//! # Architecture
//!
//! ```text
//! event ──► TriggerMatcher ──► LifecycleManager ──► Store (create)
//!                                     │
//!                                     ▼
//!                               StepQueue ◄──────────────┐
//!                                     │                  │
//!                                     ▼                  │
//!                 Worker::process_step ──► NodeExecutor  │
//!                                     │                  │
//!                       Store (persist transition) ──────┘ (RUNNING)
//!
//! reply ──► ResumeHandler ──► Store (RUNNING) ──► StepQueue
//! clock ──► Waker         ──► Store (RUNNING) ──► StepQueue
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let (queue, receiver) = ChannelQueue::new(config.queue_capacity);
//! let engine = FlowEngine::new(store, Arc::new(queue), services, config);
//!
//! let cancel = CancellationToken::new();
//! tokio::spawn(engine.worker().run(receiver, cancel.clone()));
//!
//! engine.trigger(TriggerEvent { .. }).await;
//! ```

mod config;
mod engine;
mod error;
mod executor;
mod lifecycle;
mod matcher;
mod ports;
mod queue;
mod resume;
mod template;
mod waker;
mod worker;

pub use config::EngineConfig;
pub use engine::{FlowEngine, TriggerEvent};
pub use error::EngineError;
pub use executor::{
  NodeExecutor, NodeResult, Transition, ai_assignment, fallback_text, is_business_hours,
  media_file, switch_handle,
};
pub use lifecycle::{LifecycleManager, ManualTrigger, RestartDecision, StartOutcome, restart_decision};
pub use matcher::TriggerMatcher;
pub use ports::{
  ChatRef, Chats, Contact, ContactContext, Contacts, EntityResolver, EntityType, Inbox, Messenger,
  Notification, Operators, OutboundContent, OutboundMessage, ReplyButton, ServiceError, Services,
};
pub use queue::{ChannelQueue, QueueError, StepMessage, StepQueue};
pub use resume::{InboundMessage, ResumeHandler};
pub use template::{render, template_context};
pub use waker::Waker;
pub use worker::{StepOutcome, Worker};
