use serde::{Deserialize, Serialize};

use crate::edge::Edge;
use crate::error::FlowError;
use crate::graph::Graph;
use crate::node::Node;
use crate::trigger::TriggerConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStatus {
  Active,
  #[default]
  Inactive,
}

impl FlowStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Active => "ACTIVE",
      Self::Inactive => "INACTIVE",
    }
  }
}

/// An automation flow as authored in the flow builder.
///
/// Immutable per version: executions reference the flow by id and read the
/// current graph on every step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
  pub id: String,
  pub tenant_id: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub status: FlowStatus,
  #[serde(default)]
  pub trigger_config: TriggerConfig,
  #[serde(default)]
  pub nodes: Vec<Node>,
  #[serde(default)]
  pub edges: Vec<Edge>,
}

impl FlowDefinition {
  /// Parse a definition from its JSON storage form.
  pub fn from_json(json: &str) -> Result<Self, FlowError> {
    Ok(serde_json::from_str(json)?)
  }

  pub fn is_active(&self) -> bool {
    self.status == FlowStatus::Active
  }

  /// Build the graph structure for traversal.
  pub fn graph(&self) -> Graph<'_> {
    Graph::new(&self.nodes, &self.edges)
  }

  /// Get a node by ID.
  pub fn get_node(&self, node_id: &str) -> Option<&Node> {
    self.nodes.iter().find(|n| n.id == node_id)
  }

  /// The node execution starts at.
  pub fn start_node(&self) -> Result<&Node, FlowError> {
    self
      .nodes
      .iter()
      .find(|n| n.is_entry())
      .ok_or_else(|| FlowError::NoStartNode(self.id.clone()))
  }

  /// Check that every edge connects two known nodes.
  pub fn validate(&self) -> Result<(), FlowError> {
    for edge in &self.edges {
      if self.get_node(&edge.source).is_none() || self.get_node(&edge.target).is_none() {
        return Err(FlowError::InvalidEdge {
          from: edge.source.clone(),
          to: edge.target.clone(),
        });
      }
    }
    self.start_node().map(|_| ())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::node::{MessageData, NodeKind, StartData};
  use serde_json::json;

  #[test]
  fn test_parse_storage_shape() {
    let flow = FlowDefinition::from_json(
      &json!({
        "id": "f1",
        "tenantId": "t1",
        "name": "Welcome",
        "status": "ACTIVE",
        "triggerConfig": { "type": "LEAD_CREATED" },
        "nodes": [
          { "id": "start", "type": "trigger", "data": { "label": "Start" } },
          { "id": "hello", "type": "message", "data": { "text": "Hi" } }
        ],
        "edges": [{ "source": "start", "target": "hello", "sourceHandle": null }]
      })
      .to_string(),
    )
    .unwrap();

    assert!(flow.is_active());
    assert_eq!(flow.start_node().unwrap().id, "start");
    assert!(flow.validate().is_ok());
  }

  #[test]
  fn test_missing_start_node() {
    let flow = FlowDefinition {
      id: "f".to_string(),
      tenant_id: "t".to_string(),
      name: String::new(),
      status: FlowStatus::Active,
      trigger_config: TriggerConfig::default(),
      nodes: vec![Node::new("a", NodeKind::Message(MessageData::default()))],
      edges: vec![],
    };

    assert!(matches!(flow.start_node(), Err(FlowError::NoStartNode(id)) if id == "f"));
  }

  #[test]
  fn test_validate_rejects_dangling_edge() {
    let flow = FlowDefinition {
      id: "f".to_string(),
      tenant_id: "t".to_string(),
      name: String::new(),
      status: FlowStatus::Active,
      trigger_config: TriggerConfig::default(),
      nodes: vec![Node::new("start", NodeKind::Trigger(StartData::default()))],
      edges: vec![Edge::new("start", "ghost")],
    };

    assert!(matches!(flow.validate(), Err(FlowError::InvalidEdge { .. })));
  }
}
