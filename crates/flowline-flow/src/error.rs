use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
  #[error("flow '{0}' has no start node")]
  NoStartNode(String),

  #[error("invalid node '{node_id}': {message}")]
  InvalidNode { node_id: String, message: String },

  #[error("edge references unknown node: from={from}, to={to}")]
  InvalidEdge { from: String, to: String },

  #[error("invalid flow definition: {0}")]
  Parse(#[from] serde_json::Error),
}
