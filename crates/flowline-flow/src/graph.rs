use std::collections::HashMap;

use crate::edge::Edge;
use crate::node::Node;

/// Graph structure for traversal.
///
/// Borrowed view over a flow's edges, indexed by source node. Outgoing edges
/// keep their definition order, which decides ties when more than one edge
/// matches.
#[derive(Debug, Clone)]
pub struct Graph<'a> {
  /// node_id -> outgoing edges, in definition order.
  outgoing: HashMap<&'a str, Vec<&'a Edge>>,
}

impl<'a> Graph<'a> {
  /// Build a graph from nodes and edges.
  pub fn new(nodes: &'a [Node], edges: &'a [Edge]) -> Self {
    let mut outgoing: HashMap<&str, Vec<&Edge>> = HashMap::new();

    for node in nodes {
      outgoing.entry(node.id.as_str()).or_default();
    }

    for edge in edges {
      outgoing.entry(edge.source.as_str()).or_default().push(edge);
    }

    Self { outgoing }
  }

  /// Outgoing edges of a node.
  pub fn outgoing(&self, node_id: &str) -> &[&'a Edge] {
    self
      .outgoing
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Pick the edge to follow out of `node_id` for a node result.
  ///
  /// With a handle, only an edge carrying that exact handle matches. Without
  /// one, an edge with no handle is preferred, falling back to the first
  /// outgoing edge. `None` means the node is terminal for this result.
  pub fn next_edge(&self, node_id: &str, handle: Option<&str>) -> Option<&'a Edge> {
    let edges = self.outgoing(node_id);
    match handle.filter(|h| !h.is_empty()) {
      Some(handle) => edges.iter().find(|e| e.handle() == Some(handle)).copied(),
      None => edges
        .iter()
        .find(|e| e.handle().is_none())
        .or_else(|| edges.first())
        .copied(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::node::{ConditionData, ConditionType, MessageData, NodeKind, StartData};

  fn condition() -> NodeKind {
    NodeKind::Condition(ConditionData {
      condition_type: ConditionType::BusinessHours,
      tag_id: None,
      column_id: None,
      field: None,
      value: None,
    })
  }

  fn fixture() -> (Vec<Node>, Vec<Edge>) {
    let nodes = vec![
      Node::new("start", NodeKind::Trigger(StartData::default())),
      Node::new("check", condition()),
      Node::new("yes", NodeKind::Message(MessageData::default())),
      Node::new("no", NodeKind::Message(MessageData::default())),
    ];
    let edges = vec![
      Edge::new("start", "check"),
      Edge::new("check", "yes").with_handle("true"),
      Edge::new("check", "no").with_handle("false"),
    ];
    (nodes, edges)
  }

  #[test]
  fn test_next_edge_by_handle() {
    let (nodes, edges) = fixture();
    let graph = Graph::new(&nodes, &edges);

    assert_eq!(graph.next_edge("check", Some("true")).unwrap().target, "yes");
    assert_eq!(graph.next_edge("check", Some("false")).unwrap().target, "no");
    assert!(graph.next_edge("check", Some("maybe")).is_none());
  }

  #[test]
  fn test_next_edge_without_handle() {
    let (nodes, edges) = fixture();
    let graph = Graph::new(&nodes, &edges);

    assert_eq!(graph.next_edge("start", None).unwrap().target, "check");
    // Only handled edges leave `check`: fall back to the first one.
    assert_eq!(graph.next_edge("check", None).unwrap().target, "yes");
    assert!(graph.next_edge("yes", None).is_none());
  }

  #[test]
  fn test_outgoing_keeps_definition_order() {
    let (nodes, edges) = fixture();
    let graph = Graph::new(&nodes, &edges);

    let targets: Vec<_> = graph.outgoing("check").iter().map(|e| e.target.as_str()).collect();
    assert_eq!(targets, vec!["yes", "no"]);
    assert!(graph.outgoing("yes").is_empty());
    assert!(graph.outgoing("missing").is_empty());
  }
}
