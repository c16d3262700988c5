//! The flow engine facade.
//!
//! Wires the matcher, lifecycle manager, worker, resume handler and waker
//! around one store and one step queue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use flowline_flow::TriggerType;
use flowline_store::Store;
use serde_json::{Map, Value};
use tracing::{error, instrument, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::executor::NodeExecutor;
use crate::lifecycle::{LifecycleManager, ManualTrigger, StartOutcome};
use crate::matcher::TriggerMatcher;
use crate::ports::Services;
use crate::queue::StepQueue;
use crate::resume::{InboundMessage, ResumeHandler};
use crate::waker::Waker;
use crate::worker::{StepOutcome, Worker};

/// A business event that may start flows.
#[derive(Debug, Clone)]
pub struct TriggerEvent {
  pub tenant_id: String,
  pub trigger_type: TriggerType,
  pub data: Map<String, Value>,
  pub contact_id: Option<String>,
  pub chat_id: Option<String>,
}

pub struct FlowEngine {
  store: Arc<dyn Store>,
  matcher: TriggerMatcher,
  lifecycle: LifecycleManager,
  worker: Arc<Worker>,
  resume: ResumeHandler,
  waker: Waker,
}

impl FlowEngine {
  pub fn new(
    store: Arc<dyn Store>,
    queue: Arc<dyn StepQueue>,
    services: Services,
    config: EngineConfig,
  ) -> Self {
    let executor = Arc::new(NodeExecutor::new(
      store.clone(),
      services.clone(),
      config.clone(),
    ));

    Self {
      matcher: TriggerMatcher::new(
        store.clone(),
        services.contacts.clone(),
        services.entities.clone(),
      ),
      lifecycle: LifecycleManager::new(store.clone(), queue.clone(), services, config.clone()),
      worker: Arc::new(Worker::new(
        store.clone(),
        queue.clone(),
        executor,
        config.clone(),
      )),
      resume: ResumeHandler::new(store.clone(), queue.clone()),
      waker: Waker::new(store.clone(), queue, config.wake_interval),
      store,
    }
  }

  /// Match an event against the tenant's flows and start every match.
  ///
  /// Matching failures are logged and start nothing; they never reach the
  /// caller. Returns one outcome per started-or-skipped flow.
  #[instrument(skip(self, event), fields(tenant_id = %event.tenant_id, trigger_type = %event.trigger_type))]
  pub async fn trigger(&self, event: TriggerEvent) -> Vec<StartOutcome> {
    let TriggerEvent {
      tenant_id,
      trigger_type,
      mut data,
      contact_id,
      chat_id,
    } = event;

    let flows = match self
      .matcher
      .match_flows(&tenant_id, trigger_type, &mut data, contact_id.as_deref())
      .await
    {
      Ok(flows) => flows,
      Err(e) => {
        error!(error = %e, "trigger matching failed");
        return Vec::new();
      }
    };

    let Some(contact_id) = contact_id else {
      if !flows.is_empty() {
        warn!(matched = flows.len(), "event has no contact, cannot start flows");
      }
      return Vec::new();
    };

    let mut outcomes = Vec::with_capacity(flows.len());
    for flow in &flows {
      match self
        .lifecycle
        .start(flow, &contact_id, &data, chat_id.as_deref(), trigger_type)
        .await
      {
        Ok(outcome) => outcomes.push(outcome),
        Err(e) => error!(flow_id = %flow.id, error = %e, "failed to start flow"),
      }
    }
    outcomes
  }

  pub async fn trigger_manual(&self, request: ManualTrigger) -> Result<StartOutcome, EngineError> {
    self.lifecycle.trigger_manual(request).await
  }

  pub async fn process_step(&self, execution_id: &str) -> Result<StepOutcome, EngineError> {
    self.worker.process_step(execution_id).await
  }

  pub async fn resume(&self, chat_id: &str, message: &InboundMessage) -> Result<bool, EngineError> {
    self.resume.resume(chat_id, message).await
  }

  pub async fn wake_due(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
    self.waker.wake_due(now).await
  }

  pub fn worker(&self) -> Arc<Worker> {
    Arc::clone(&self.worker)
  }

  pub fn waker(&self) -> &Waker {
    &self.waker
  }

  pub fn lifecycle(&self) -> &LifecycleManager {
    &self.lifecycle
  }

  pub fn store(&self) -> &Arc<dyn Store> {
    &self.store
  }
}
