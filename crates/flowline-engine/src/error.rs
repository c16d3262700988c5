use flowline_flow::FlowError;
use thiserror::Error;

use crate::ports::ServiceError;
use crate::queue::QueueError;

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("flow not found: {0}")]
  FlowNotFound(String),

  /// The execution points at a node the flow does not contain.
  #[error("Node not found")]
  NodeNotFound(String),

  #[error(transparent)]
  Flow(#[from] FlowError),

  #[error(transparent)]
  Store(#[from] flowline_store::Error),

  #[error(transparent)]
  Service(#[from] ServiceError),

  #[error(transparent)]
  Queue(#[from] QueueError),
}

impl EngineError {
  /// Another writer updated the execution first.
  pub fn is_conflict(&self) -> bool {
    matches!(self, Self::Store(flowline_store::Error::Conflict { .. }))
  }
}
