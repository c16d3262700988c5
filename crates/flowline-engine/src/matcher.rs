//! Trigger matching.
//!
//! Decides which active flows of a tenant an incoming business event starts.
//! The type-specific predicate is a pure function of the flow's trigger
//! configuration and the event data; stage and tag filters need the
//! contact's live context, fetched at most once per event.

use std::sync::Arc;

use flowline_flow::{FlowDefinition, TriggerType};
use flowline_store::Store;
use serde_json::{Map, Value};
use tracing::{debug, error, instrument, warn};

use crate::error::EngineError;
use crate::ports::{ContactContext, Contacts, EntityResolver, EntityType};

pub struct TriggerMatcher {
  store: Arc<dyn Store>,
  contacts: Arc<dyn Contacts>,
  entities: Arc<dyn EntityResolver>,
}

/// Contact context, loaded lazily for the first flow with filters.
enum ContextCache {
  Unloaded,
  Loaded(ContactContext),
  Failed,
}

impl TriggerMatcher {
  pub fn new(
    store: Arc<dyn Store>,
    contacts: Arc<dyn Contacts>,
    entities: Arc<dyn EntityResolver>,
  ) -> Self {
    Self {
      store,
      contacts,
      entities,
    }
  }

  /// Return the active flows of `tenant_id` that `trigger_type` starts.
  ///
  /// System events are enriched in place with the context of the entity
  /// they refer to before matching. Flows are returned in storage order.
  #[instrument(skip(self, data), fields(trigger_type = %trigger_type))]
  pub async fn match_flows(
    &self,
    tenant_id: &str,
    trigger_type: TriggerType,
    data: &mut Map<String, Value>,
    contact_id: Option<&str>,
  ) -> Result<Vec<FlowDefinition>, EngineError> {
    if trigger_type == TriggerType::SystemEvent {
      self.enrich(tenant_id, data).await;
    }

    let flows = self.store.list_active_flows(tenant_id).await?;
    let mut context = ContextCache::Unloaded;
    let mut matched = Vec::new();

    for flow in flows {
      if let Err(e) = flow.validate() {
        error!(flow_id = %flow.id, error = %e, "skipping invalid flow definition");
        continue;
      }

      let config = &flow.trigger_config;
      if !config.matches_event(trigger_type, data) {
        continue;
      }

      if config.requires_contact_context() {
        let Some(contact_id) = contact_id else {
          debug!(flow_id = %flow.id, "flow has contact filters but event has no contact, skipping");
          continue;
        };

        if matches!(context, ContextCache::Unloaded) {
          context = match self.contacts.context(contact_id).await {
            Ok(ctx) => ContextCache::Loaded(ctx),
            Err(e) => {
              error!(contact_id, error = %e, "failed to load contact context for trigger filters");
              ContextCache::Failed
            }
          };
        }

        let ContextCache::Loaded(ctx) = &context else {
          continue;
        };
        if !config.matches_contact(ctx.stage_id.as_deref(), &ctx.tag_ids) {
          continue;
        }
      }

      matched.push(flow);
    }

    debug!(matched = matched.len(), "trigger matched flows");
    Ok(matched)
  }

  /// Merge the entity context of a system event into its data.
  ///
  /// Failures leave the data untouched.
  async fn enrich(&self, tenant_id: &str, data: &mut Map<String, Value>) {
    let entity_type = field(data, &["entityType", "entity_type"]);
    let entity_id = field(data, &["entityId", "entity_id"]);
    let (Some(entity_type), Some(entity_id)) = (entity_type, entity_id) else {
      return;
    };

    let entity_type = match entity_type.parse::<EntityType>() {
      Ok(t) => t,
      Err(e) => {
        warn!(error = %e, "cannot enrich system event");
        return;
      }
    };

    match self.entities.resolve(tenant_id, entity_type, &entity_id).await {
      Ok(resolved) => data.extend(resolved),
      Err(e) => warn!(entity_id = %entity_id, error = %e, "system event enrichment failed"),
    }
  }
}

fn field(data: &Map<String, Value>, keys: &[&str]) -> Option<String> {
  keys.iter().find_map(|key| match data.get(*key)? {
    Value::String(s) if !s.is_empty() => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  })
}
