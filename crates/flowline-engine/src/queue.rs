//! Step queue boundary.
//!
//! Every "advance this execution" request is a [`StepMessage`]. Producers only
//! see the [`StepQueue`] trait; the in-process [`ChannelQueue`] hands messages
//! to a [`crate::Worker`] through a bounded mpsc channel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Queue payload: `{ "executionId": "..." }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepMessage {
  pub execution_id: String,
}

#[derive(Debug, Error)]
pub enum QueueError {
  #[error("step queue closed")]
  Closed,
}

/// Producer side of the step queue. Delivery is at-least-once.
#[async_trait]
pub trait StepQueue: Send + Sync {
  async fn enqueue(&self, execution_id: &str) -> Result<(), QueueError>;
}

/// In-process queue backed by a bounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelQueue {
  sender: mpsc::Sender<StepMessage>,
}

impl ChannelQueue {
  /// Create a queue and the receiver the worker drains.
  pub fn new(capacity: usize) -> (Self, mpsc::Receiver<StepMessage>) {
    let (sender, receiver) = mpsc::channel(capacity);
    (Self { sender }, receiver)
  }
}

#[async_trait]
impl StepQueue for ChannelQueue {
  async fn enqueue(&self, execution_id: &str) -> Result<(), QueueError> {
    self
      .sender
      .send(StepMessage {
        execution_id: execution_id.to_string(),
      })
      .await
      .map_err(|_| QueueError::Closed)
  }
}
