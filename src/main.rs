use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_queue::config::{Config, ConfigError};
use agent_queue::daemon::{self, DaemonError, StartOutcome, StopOutcome};
use agent_queue::persistence::{self, StateError, StateLock, StateStore};
use agent_queue::status;
use agent_queue::types::WorkItemId;

/// Fatal misconfiguration.
const EXIT_CONFIG: u8 = 2;

/// Exclusive ownership of the persisted state could not be acquired.
const EXIT_OWNERSHIP: u8 = 3;

#[derive(Parser)]
#[command(name = "agent-queue", version, about = "Coding-agent workflow automation engine")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the automation loop in the foreground.
    Start,

    /// Ask a running loop to stop after its current cycle.
    Stop,

    /// Report engine status.
    Status {
        /// Emit the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Execute exactly one poll cycle and exit.
    RunOnce,

    /// Inspect or edit the persistent queue.
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },

    /// Delete the persisted engine state.
    Reset {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum QueueCommand {
    /// Print the queue in assignment order.
    List,

    /// Append an item (or insert at a position).
    Add {
        id: String,
        #[arg(long)]
        position: Option<usize>,
    },

    /// Remove an item.
    Remove { id: String },

    /// Move an item one position toward the head.
    MoveUp { id: String },

    /// Move an item one position toward the tail.
    MoveDown { id: String },

    /// Move an item to an exact position (0 = head).
    Move { id: String, position: usize },
}

#[tokio::main]
async fn main() -> ExitCode {
    // A .env file in the working directory supplies GITHUB_TOKEN.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent_queue=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

fn exit_code_for(err: &DaemonError) -> u8 {
    match err {
        DaemonError::Config(_) => EXIT_CONFIG,
        DaemonError::State(StateError::AlreadyOwned(_)) => EXIT_OWNERSHIP,
        _ => 1,
    }
}

async fn run(cli: Cli) -> Result<ExitCode, DaemonError> {
    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Start => match daemon::start(config).await? {
            StartOutcome::AlreadyRunning(pid) => {
                println!("already running (pid {})", pid);
                Ok(ExitCode::SUCCESS)
            }
            StartOutcome::Stopped => Ok(ExitCode::SUCCESS),
        },

        Command::Stop => match daemon::request_stop(&config.state_dir)? {
            StopOutcome::Requested(pid) => {
                println!("stop requested (pid {})", pid);
                Ok(ExitCode::SUCCESS)
            }
            StopOutcome::NotRunning => {
                println!("not running");
                Ok(ExitCode::SUCCESS)
            }
        },

        Command::Status { json } => {
            let report = status::gather(&config.state_dir, config.cooldown_minutes)?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).expect("report serializes")
                );
            } else {
                print!("{}", report);
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::RunOnce => {
            let report = daemon::run_once(config).await?;
            if report.actions.is_empty() {
                println!("no actions needed");
            }
            for action in &report.actions {
                println!("{}", action);
            }
            if let Some(err) = &report.error {
                println!("cycle error: {}", err);
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Queue { command } => edit_queue(config, command),

        Command::Reset { yes } => {
            if !yes {
                eprintln!("refusing to delete persisted state without --yes");
                return Ok(ExitCode::FAILURE);
            }
            // Take the lock so a running daemon cannot race the deletion.
            let lock = StateLock::acquire(&config.state_dir)?;
            persistence::reset(&config.state_dir)?;
            drop(lock);
            println!("state reset");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: &PathBuf) -> Result<Config, ConfigError> {
    Config::load(path)
}

/// Queue edits take the same exclusive ownership as the daemon, so a running
/// loop never has its in-memory queue silently overwritten.
fn edit_queue(config: Config, command: QueueCommand) -> Result<ExitCode, DaemonError> {
    let lock = StateLock::acquire(&config.state_dir)?;
    let mut store = StateStore::open(&config)?;

    match command {
        QueueCommand::List => {
            let state = store.state();
            if state.queue.is_empty() {
                println!("queue is empty");
            }
            for (position, id) in state.queue.iter().enumerate() {
                let lifecycle = state
                    .items
                    .get(id)
                    .map(|item| item.state.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                let marker = if state.active.as_ref() == Some(id) {
                    " *"
                } else {
                    ""
                };
                println!("{:>3}. {} ({}){}", position + 1, id, lifecycle, marker);
            }
        }
        QueueCommand::Add { id, position } => {
            let id = WorkItemId::from(id);
            let state = store.state_mut();
            match position {
                Some(position) => state.queue.insert(id.clone(), position)?,
                None => state.queue.enqueue(id.clone())?,
            }
            let issue = config.issue_number_for(&id);
            state
                .items
                .entry(id.clone())
                .or_insert_with(|| agent_queue::types::WorkItem::queued(id.clone(), issue));
            store.persist()?;
            println!("added {}", id);
        }
        QueueCommand::Remove { id } => {
            let id = WorkItemId::from(id);
            store.state_mut().queue.remove(&id)?;
            if store.state().active.as_ref() == Some(&id) {
                store.state_mut().active = None;
            }
            store.persist()?;
            println!("removed {}", id);
        }
        QueueCommand::MoveUp { id } => {
            let id = WorkItemId::from(id);
            let moved = store.state_mut().queue.move_up(&id)?;
            store.persist()?;
            println!("{}", if moved { "moved up" } else { "already at head" });
        }
        QueueCommand::MoveDown { id } => {
            let id = WorkItemId::from(id);
            let moved = store.state_mut().queue.move_down(&id)?;
            store.persist()?;
            println!("{}", if moved { "moved down" } else { "already at tail" });
        }
        QueueCommand::Move { id, position } => {
            let id = WorkItemId::from(id);
            store.state_mut().queue.reorder(&id, position)?;
            store.persist()?;
            println!("moved {} to position {}", id, position);
        }
    }

    drop(lock);
    Ok(ExitCode::SUCCESS)
}
