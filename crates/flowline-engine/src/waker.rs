use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flowline_store::{ExecutionStatus, Store};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::queue::StepQueue;
use crate::worker::mark_failed;

/// Re-enqueues WAITING executions once their `next_step_at` has passed.
pub struct Waker {
  store: Arc<dyn Store>,
  queue: Arc<dyn StepQueue>,
  interval: Duration,
}

impl Waker {
  pub fn new(store: Arc<dyn Store>, queue: Arc<dyn StepQueue>, interval: Duration) -> Self {
    Self {
      store,
      queue,
      interval,
    }
  }

  /// Flip every due execution to RUNNING and enqueue it. Returns how many
  /// were woken.
  pub async fn wake_due(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
    let mut woken = 0;

    for execution in self.store.list_due_executions(now).await? {
      let mut next = execution;
      next.status = ExecutionStatus::Running;
      next.next_step_at = None;

      match self.store.update_execution(&next).await {
        Ok(stored) => match self.queue.enqueue(&stored.id).await {
          Ok(()) => {
            debug!(execution_id = %stored.id, "woke due execution");
            woken += 1;
          }
          Err(e) => {
            error!(execution_id = %stored.id, error = %e, "failed to enqueue due execution");
            mark_failed(self.store.as_ref(), stored, &e.to_string()).await?;
          }
        },
        Err(flowline_store::Error::Conflict { .. }) => {
          warn!(execution_id = %next.id, "execution changed before wake, skipping");
        }
        Err(e) => return Err(e.into()),
      }
    }

    Ok(woken)
  }

  /// Run `wake_due` every interval until cancelled.
  pub async fn run(&self, cancel: CancellationToken) {
    info!(interval_secs = self.interval.as_secs(), "starting waker");
    let mut ticker = tokio::time::interval(self.interval);

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!("waker cancelled");
          break;
        }
        _ = ticker.tick() => {
          match self.wake_due(Utc::now()).await {
            Ok(0) => {}
            Ok(woken) => info!(woken, "woke due executions"),
            Err(e) => error!(error = %e, "failed to wake due executions"),
          }
        }
      }
    }
  }
}
