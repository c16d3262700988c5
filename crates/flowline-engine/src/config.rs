use std::time::Duration;

/// Configuration for the flow engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// An active execution not updated for longer than this is superseded by
  /// any new trigger.
  pub stale_after: chrono::Duration,
  /// Timeout for `wait_for_response` and waiting `external_notify` nodes
  /// that do not set one.
  pub default_response_timeout_minutes: u32,
  /// Delay for `wait` nodes that do not set one.
  pub default_delay_minutes: u32,
  /// Maximum number of steps processed at once. Each step belongs to a
  /// different execution under normal operation.
  pub worker_concurrency: usize,
  /// How often the waker looks for due executions.
  pub wake_interval: Duration,
  /// Capacity of the in-process step queue.
  pub queue_capacity: usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      stale_after: chrono::Duration::minutes(15),
      default_response_timeout_minutes: 60,
      default_delay_minutes: 1,
      worker_concurrency: 8,
      wake_interval: Duration::from_secs(60),
      queue_capacity: 1024,
    }
  }
}
