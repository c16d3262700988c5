mod console;

use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value, json};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use console::{ConsoleOptions, Journal};
use flowline_engine::{
  ChannelQueue, Contact, EngineConfig, FlowEngine, Inbox, InboundMessage, ManualTrigger,
  TriggerEvent,
};
use flowline_flow::{FlowDefinition, FlowStatus, TriggerType};
use flowline_store::{MemoryStore, SqliteStore, Store};

/// Upper bound on how many wait deadlines `--expire-waits` fast-forwards.
const MAX_WAKE_ROUNDS: usize = 32;

/// Flowline - CRM automation flows
#[derive(Parser)]
#[command(name = "flowline")]
#[command(version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a flow for one contact and print the resulting executions
  ///
  /// Trigger data is read as a JSON object from stdin.
  Simulate(SimulateArgs),

  /// Create or upgrade the execution database schema
  Migrate {
    /// SQLite connection URL (e.g. sqlite://flowline.db?mode=rwc)
    #[arg(long)]
    database: String,
  },
}

#[derive(Args)]
struct SimulateArgs {
  /// Path to the flow definition (JSON)
  flow_file: PathBuf,

  /// Trigger type of the event
  #[arg(long, default_value = "MANUAL")]
  trigger: TriggerType,

  /// Contact the flow runs for
  #[arg(long, default_value = "contact-1")]
  contact: String,

  #[arg(long)]
  name: Option<String>,

  #[arg(long)]
  phone: Option<String>,

  /// Chat the event arrived on (defaults to the contact id)
  #[arg(long)]
  chat: Option<String>,

  /// Inbox outbound messages are sent through
  #[arg(long)]
  inbox: Option<String>,

  /// Provider of `--inbox`; META and META_CLOUD render native buttons
  #[arg(long, default_value = "META_CLOUD")]
  provider: String,

  /// JSON file with the context system events are enriched with
  #[arg(long)]
  entity_file: Option<PathBuf>,

  /// Persist executions to this SQLite URL instead of memory
  #[arg(long)]
  database: Option<String>,

  /// Reply with this text once the flow is waiting
  #[arg(long)]
  respond: Option<String>,

  /// Expire every wait instead of waiting for it
  #[arg(long)]
  expire_waits: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(io::stderr)
    .init();

  let cli = Cli::parse();
  let rt = tokio::runtime::Runtime::new()?;

  match cli.command {
    Some(Commands::Simulate(args)) => rt.block_on(simulate(args)),
    Some(Commands::Migrate { database }) => rt.block_on(async {
      SqliteStore::connect(&database)
        .await
        .with_context(|| format!("failed to migrate database: {}", database))?;
      info!(database = %database, "database is up to date");
      Ok(())
    }),
    None => {
      println!("flowline - use --help to see available commands");
      Ok(())
    }
  }
}

async fn simulate(args: SimulateArgs) -> Result<()> {
  let content = tokio::fs::read_to_string(&args.flow_file)
    .await
    .with_context(|| format!("failed to read flow file: {}", args.flow_file.display()))?;
  let mut flow = FlowDefinition::from_json(&content)
    .with_context(|| format!("failed to parse flow file: {}", args.flow_file.display()))?;
  flow.status = FlowStatus::Active;

  let data = read_payload_from_stdin()?;
  let entity_context = match &args.entity_file {
    Some(path) => read_object(path).await?,
    None => Map::new(),
  };

  let store: Arc<dyn Store> = match &args.database {
    Some(url) => Arc::new(
      SqliteStore::connect(url)
        .await
        .with_context(|| format!("failed to open database: {}", url))?,
    ),
    None => Arc::new(MemoryStore::new()),
  };
  store.save_flow(&flow).await.context("invalid flow definition")?;

  let journal = Arc::new(Journal::default());
  let services = console::services(
    journal.clone(),
    ConsoleOptions {
      contact: Contact {
        id: args.contact.clone(),
        name: args.name.clone(),
        phone: args.phone.clone(),
        fields: Map::new(),
      },
      inbox: args.inbox.clone().map(|id| Inbox {
        id,
        provider: args.provider.clone(),
      }),
      entity_context,
    },
  );

  let config = EngineConfig::default();
  let (queue, mut receiver) = ChannelQueue::new(config.queue_capacity);
  let engine = FlowEngine::new(store.clone(), Arc::new(queue), services, config);
  let worker = engine.worker();

  let outcomes = if args.trigger == TriggerType::Manual {
    vec![
      engine
        .trigger_manual(ManualTrigger {
          tenant_id: flow.tenant_id.clone(),
          flow_id: flow.id.clone(),
          contact_id: args.contact.clone(),
          chat_id: args.chat.clone(),
          variables: data,
          user_id: None,
        })
        .await
        .context("manual trigger failed")?,
    ]
  } else {
    engine
      .trigger(TriggerEvent {
        tenant_id: flow.tenant_id.clone(),
        trigger_type: args.trigger,
        data,
        contact_id: Some(args.contact.clone()),
        chat_id: args.chat.clone(),
      })
      .await
  };
  info!(?outcomes, "trigger handled");

  let steps = worker.run_until_idle(&mut receiver).await;
  info!(steps, "flow idle");

  if let Some(reply) = args.respond {
    let chat_id = args.chat.clone().unwrap_or_else(|| args.contact.clone());
    if engine.resume(&chat_id, &InboundMessage::text(reply)).await? {
      worker.run_until_idle(&mut receiver).await;
    } else {
      warn!(chat_id = %chat_id, "no execution was waiting for a reply");
    }
  }

  if args.expire_waits {
    for _ in 0..MAX_WAKE_ROUNDS {
      let deadline = store
        .list_waiting_executions()
        .await?
        .into_iter()
        .filter(|e| e.flow_id == flow.id)
        .filter_map(|e| e.next_step_at)
        .max();
      let Some(deadline) = deadline else {
        break;
      };
      engine.wake_due(deadline).await?;
      worker.run_until_idle(&mut receiver).await;
    }
  }

  let mut executions = Vec::new();
  for execution in store.list_executions(&flow.id).await? {
    let steps = store.list_step_logs(&execution.id).await?;
    executions.push(json!({ "execution": execution, "steps": steps }));
  }

  let output = json!({ "executions": executions, "actions": journal.events() });
  println!("{}", serde_json::to_string_pretty(&output)?);

  Ok(())
}

async fn read_object(path: &Path) -> Result<Map<String, Value>> {
  let content = tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("failed to read {}", path.display()))?;
  serde_json::from_str(&content).with_context(|| format!("{} is not a JSON object", path.display()))
}

fn read_payload_from_stdin() -> Result<Map<String, Value>> {
  if io::stdin().is_terminal() {
    return Ok(Map::new());
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read trigger data from stdin")?;

  if input.trim().is_empty() {
    Ok(Map::new())
  } else {
    serde_json::from_str(&input).context("failed to parse trigger data JSON from stdin")
  }
}
