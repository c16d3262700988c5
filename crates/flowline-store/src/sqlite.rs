use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowline_flow::FlowDefinition;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::types::Json;

use crate::{Error, ExecutionStatus, FlowExecution, StepLogEntry, Store};

const EXECUTION_COLUMNS: &str = "id, flow_id, contact_id, status, current_node_id, variables, protocol, next_step_at, last_error, version, created_at, updated_at";

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open a pool for `url` (e.g. `sqlite://flowline.db?mode=rwc`) and run migrations.
  pub async fn connect(url: &str) -> Result<Self, Error> {
    let pool = SqlitePoolOptions::new().connect(url).await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(&self.pool).await
  }

  async fn select_executions(
    &self,
    filter: &str,
    bind: Option<&str>,
  ) -> Result<Vec<FlowExecution>, Error> {
    let sql = format!("SELECT {} FROM flow_executions {}", EXECUTION_COLUMNS, filter);
    let mut query = sqlx::query_as::<_, FlowExecution>(&sql);
    if let Some(value) = bind {
      query = query.bind(value);
    }
    Ok(query.fetch_all(&self.pool).await?)
  }
}

#[async_trait]
impl Store for SqliteStore {
  async fn save_flow(&self, flow: &FlowDefinition) -> Result<(), Error> {
    flow.validate()?;
    sqlx::query(
      r#"
      INSERT INTO flows (id, tenant_id, name, status, definition)
      VALUES (?, ?, ?, ?, ?)
      ON CONFLICT (id) DO UPDATE SET
        tenant_id = excluded.tenant_id,
        name = excluded.name,
        status = excluded.status,
        definition = excluded.definition
      "#,
    )
    .bind(&flow.id)
    .bind(&flow.tenant_id)
    .bind(&flow.name)
    .bind(flow.status.as_str())
    .bind(Json(flow))
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn get_flow(&self, flow_id: &str) -> Result<FlowDefinition, Error> {
    let row: Option<Json<FlowDefinition>> =
      sqlx::query_scalar("SELECT definition FROM flows WHERE id = ?")
        .bind(flow_id)
        .fetch_optional(&self.pool)
        .await?;

    row
      .map(|Json(flow)| flow)
      .ok_or_else(|| Error::NotFound(format!("flow {}", flow_id)))
  }

  async fn list_active_flows(&self, tenant_id: &str) -> Result<Vec<FlowDefinition>, Error> {
    let rows: Vec<Json<FlowDefinition>> = sqlx::query_scalar(
      r#"
      SELECT definition FROM flows
      WHERE tenant_id = ? AND status = 'ACTIVE'
      ORDER BY rowid ASC
      "#,
    )
    .bind(tenant_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(rows.into_iter().map(|Json(flow)| flow).collect())
  }

  async fn create_execution(&self, execution: &FlowExecution) -> Result<(), Error> {
    sqlx::query(
      r#"
      INSERT INTO flow_executions (id, flow_id, contact_id, status, current_node_id, variables, protocol, next_step_at, last_error, version, created_at, updated_at)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(&execution.id)
    .bind(&execution.flow_id)
    .bind(&execution.contact_id)
    .bind(execution.status)
    .bind(&execution.current_node_id)
    .bind(Json(&execution.variables))
    .bind(Json(&execution.protocol))
    .bind(execution.next_step_at)
    .bind(&execution.last_error)
    .bind(execution.version)
    .bind(execution.created_at)
    .bind(execution.updated_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn get_execution(&self, execution_id: &str) -> Result<FlowExecution, Error> {
    self
      .select_executions("WHERE id = ?", Some(execution_id))
      .await?
      .into_iter()
      .next()
      .ok_or_else(|| Error::NotFound(format!("execution {}", execution_id)))
  }

  async fn find_active_execution(
    &self,
    flow_id: &str,
    contact_id: &str,
  ) -> Result<Option<FlowExecution>, Error> {
    let sql = format!(
      "SELECT {} FROM flow_executions WHERE flow_id = ? AND contact_id = ? AND status IN ('RUNNING', 'WAITING') ORDER BY rowid ASC LIMIT 1",
      EXECUTION_COLUMNS
    );
    Ok(
      sqlx::query_as::<_, FlowExecution>(&sql)
        .bind(flow_id)
        .bind(contact_id)
        .fetch_optional(&self.pool)
        .await?,
    )
  }

  async fn update_execution(&self, execution: &FlowExecution) -> Result<FlowExecution, Error> {
    let result = sqlx::query(
      r#"
      UPDATE flow_executions
      SET status = ?, current_node_id = ?, variables = ?, protocol = ?, next_step_at = ?,
          last_error = ?, version = version + 1, updated_at = ?
      WHERE id = ? AND version = ?
      "#,
    )
    .bind(execution.status)
    .bind(&execution.current_node_id)
    .bind(Json(&execution.variables))
    .bind(Json(&execution.protocol))
    .bind(execution.next_step_at)
    .bind(&execution.last_error)
    .bind(Utc::now())
    .bind(&execution.id)
    .bind(execution.version)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      // Distinguish a missing row from a stale version.
      self.get_execution(&execution.id).await?;
      return Err(Error::Conflict {
        id: execution.id.clone(),
        expected: execution.version,
      });
    }

    self.get_execution(&execution.id).await
  }

  async fn list_waiting_executions(&self) -> Result<Vec<FlowExecution>, Error> {
    self
      .select_executions("WHERE status = 'WAITING' ORDER BY rowid ASC", None)
      .await
  }

  async fn list_due_executions(&self, now: DateTime<Utc>) -> Result<Vec<FlowExecution>, Error> {
    // Timestamps are stored as text; compare them as values, not strings.
    Ok(
      self
        .list_waiting_executions()
        .await?
        .into_iter()
        .filter(|e| e.status == ExecutionStatus::Waiting && e.next_step_at.is_some_and(|at| at <= now))
        .collect(),
    )
  }

  async fn list_executions(&self, flow_id: &str) -> Result<Vec<FlowExecution>, Error> {
    self
      .select_executions(
        "WHERE flow_id = ? ORDER BY created_at DESC, rowid DESC",
        Some(flow_id),
      )
      .await
  }

  async fn append_step_log(&self, entry: &StepLogEntry) -> Result<(), Error> {
    sqlx::query(
      r#"
      INSERT INTO flow_step_logs (execution_id, flow_id, contact_id, node_id, action_type, status, message, timestamp)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(&entry.execution_id)
    .bind(&entry.flow_id)
    .bind(&entry.contact_id)
    .bind(&entry.node_id)
    .bind(&entry.action_type)
    .bind(entry.status)
    .bind(&entry.message)
    .bind(entry.timestamp)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn list_step_logs(&self, execution_id: &str) -> Result<Vec<StepLogEntry>, Error> {
    Ok(
      sqlx::query_as(
        r#"
        SELECT execution_id, flow_id, contact_id, node_id, action_type, status, message, timestamp
        FROM flow_step_logs
        WHERE execution_id = ?
        ORDER BY id ASC
        "#,
      )
      .bind(execution_id)
      .fetch_all(&self.pool)
      .await?,
    )
  }
}
