//! Step worker.
//!
//! Consumes [`StepMessage`]s and advances one execution by one node per
//! message. A step only re-enqueues its execution after the transition is
//! persisted, so steps of one execution never overlap under normal
//! operation; a late duplicate loses the version check and is dropped.

use std::sync::Arc;

use flowline_store::{ExecutionStatus, FlowExecution, Store};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::executor::{NodeExecutor, Transition};
use crate::queue::{StepMessage, StepQueue};

/// What one step did to its execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
  /// Missing, or not RUNNING: the message was stale.
  Skipped,
  /// Moved to `node_id` and re-enqueued.
  Advanced { node_id: String },
  /// Suspended in WAITING.
  Waiting,
  /// No outgoing edge matched: the flow finished.
  Completed,
  /// The step failed and the execution is now FAILED.
  Failed { error: String },
  /// Another writer updated the execution first; nothing was persisted.
  Conflict,
}

pub struct Worker {
  store: Arc<dyn Store>,
  queue: Arc<dyn StepQueue>,
  executor: Arc<NodeExecutor>,
  config: EngineConfig,
}

impl Worker {
  pub fn new(
    store: Arc<dyn Store>,
    queue: Arc<dyn StepQueue>,
    executor: Arc<NodeExecutor>,
    config: EngineConfig,
  ) -> Self {
    Self {
      store,
      queue,
      executor,
      config,
    }
  }

  /// Advance an execution by one node.
  ///
  /// Node, flow and queue errors mark the execution FAILED with the error
  /// message and are not retried. Only store failures surface as `Err`.
  #[instrument(skip(self))]
  pub async fn process_step(&self, execution_id: &str) -> Result<StepOutcome, EngineError> {
    let execution = match self.store.get_execution(execution_id).await {
      Ok(execution) => execution,
      Err(flowline_store::Error::NotFound(_)) => {
        debug!("execution not found, dropping step");
        return Ok(StepOutcome::Skipped);
      }
      Err(e) => return Err(e.into()),
    };

    if execution.status != ExecutionStatus::Running {
      debug!(status = ?execution.status, "execution not running, dropping step");
      return Ok(StepOutcome::Skipped);
    }

    match self.advance(&execution).await {
      Ok(outcome) => Ok(outcome),
      Err(e) if e.is_conflict() => {
        warn!(error = %e, "execution changed during step, dropping");
        Ok(StepOutcome::Conflict)
      }
      Err(e) => {
        error!(node_id = %execution.current_node_id, error = %e, "step failed");
        self.fail(execution, e.to_string()).await
      }
    }
  }

  async fn advance(&self, execution: &FlowExecution) -> Result<StepOutcome, EngineError> {
    let flow = self.store.get_flow(&execution.flow_id).await?;
    let node = flow
      .get_node(&execution.current_node_id)
      .ok_or_else(|| EngineError::NodeNotFound(execution.current_node_id.clone()))?;

    let result = self.executor.execute(&flow, node, execution).await?;

    let mut next = execution.clone();
    next.variables.merge(result.variables);
    if let Some(protocol) = result.protocol {
      next.protocol = protocol;
    }

    let graph = flow.graph();
    match result.transition {
      Transition::Suspend { until } => {
        next.status = ExecutionStatus::Waiting;
        next.next_step_at = Some(until);
        self.store.update_execution(&next).await?;
        debug!(until = %until, "execution waiting");
        Ok(StepOutcome::Waiting)
      }
      Transition::Sleep { until } => match graph.next_edge(&node.id, None) {
        Some(edge) => {
          next.current_node_id = edge.target.clone();
          next.status = ExecutionStatus::Waiting;
          next.next_step_at = Some(until);
          self.store.update_execution(&next).await?;
          debug!(until = %until, next_node = %edge.target, "execution sleeping");
          Ok(StepOutcome::Waiting)
        }
        None => self.complete(next).await,
      },
      Transition::Advance { handle } => match graph.next_edge(&node.id, handle.as_deref()) {
        Some(edge) => {
          next.current_node_id = edge.target.clone();
          next.next_step_at = None;
          let stored = self.store.update_execution(&next).await?;
          if let Err(e) = self.queue.enqueue(&stored.id).await {
            error!(execution_id = %stored.id, error = %e, "failed to enqueue next step");
            return self.fail(stored, e.to_string()).await;
          }
          Ok(StepOutcome::Advanced {
            node_id: edge.target.clone(),
          })
        }
        None => self.complete(next).await,
      },
    }
  }

  async fn complete(&self, mut execution: FlowExecution) -> Result<StepOutcome, EngineError> {
    execution.status = ExecutionStatus::Completed;
    execution.next_step_at = None;
    self.store.update_execution(&execution).await?;
    info!(execution_id = %execution.id, flow_id = %execution.flow_id, "flow execution completed");
    Ok(StepOutcome::Completed)
  }

  async fn fail(&self, execution: FlowExecution, message: String) -> Result<StepOutcome, EngineError> {
    if mark_failed(self.store.as_ref(), execution, &message).await? {
      Ok(StepOutcome::Failed { error: message })
    } else {
      Ok(StepOutcome::Conflict)
    }
  }

  async fn handle(&self, message: StepMessage) {
    if let Err(e) = self.process_step(&message.execution_id).await {
      error!(execution_id = %message.execution_id, error = %e, "step processing error");
    }
  }

  /// Run the consume loop.
  ///
  /// Blocks until the cancellation token is triggered or the channel closes.
  /// Up to `worker_concurrency` steps run at once.
  pub async fn run(
    self: Arc<Self>,
    mut receiver: mpsc::Receiver<StepMessage>,
    cancel: CancellationToken,
  ) {
    info!(concurrency = self.config.worker_concurrency, "starting step worker");
    let permits = Arc::new(Semaphore::new(self.config.worker_concurrency.max(1)));

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!("step worker cancelled");
          break;
        }
        message = receiver.recv() => {
          let Some(message) = message else {
            info!("step queue closed");
            break;
          };
          let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
          };
          let worker = Arc::clone(&self);
          tokio::spawn(async move {
            worker.handle(message).await;
            drop(permit);
          });
        }
      }
    }
  }

  /// Process queued steps one at a time until the queue is empty.
  ///
  /// Steps enqueue their successors before returning, so an empty queue
  /// means every execution is WAITING or finished. Returns the number of
  /// steps processed.
  pub async fn run_until_idle(&self, receiver: &mut mpsc::Receiver<StepMessage>) -> usize {
    let mut processed = 0;
    while let Ok(message) = receiver.try_recv() {
      self.handle(message).await;
      processed += 1;
    }
    processed
  }
}

/// Record `message` as the execution's last error and mark it FAILED.
///
/// Also used when a RUNNING execution could not be enqueued, since nothing
/// would ever pick it up again. Returns `false` if another writer got there
/// first.
pub(crate) async fn mark_failed(
  store: &dyn Store,
  mut execution: FlowExecution,
  message: &str,
) -> Result<bool, EngineError> {
  execution.status = ExecutionStatus::Failed;
  execution.next_step_at = None;
  execution.last_error = Some(message.to_string());

  match store.update_execution(&execution).await {
    Ok(_) => Ok(true),
    Err(flowline_store::Error::Conflict { .. }) => {
      warn!(execution_id = %execution.id, "execution changed before failure could be recorded");
      Ok(false)
    }
    Err(e) => Err(e.into()),
  }
}
