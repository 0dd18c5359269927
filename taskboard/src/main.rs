//! `taskboard`: command-line client for a Taskboard server.
//!
//! Task edits go through a workspace session: they show up in the local
//! cache immediately, are confirmed by the REST API, and are announced on the
//! Event Bus so every other open session of the workspace sees them live.
//!
//! ```bash
//! # Get a token
//! taskboard register --name Ada --email ada@example.com --password secret1
//! export TASKBOARD_TOKEN=...
//!
//! # Follow a workspace in one terminal
//! taskboard -w team watch
//! taskboard -w team watch --status in-progress
//!
//! # Edit it from another
//! taskboard -w team create "Write release notes" --priority high
//! taskboard -w team update <id> --status completed
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;

use taskboard::config::{CliArgs, ClientConfig};
use taskboard::remote::HttpTaskStore;
use taskboard::session::{SessionConfig, WorkspaceSession};
use taskboard::view::{format_task, render_board};
use taskboard_proto::api::{AuthResponse, LoginRequest, RegisterRequest};
use taskboard_proto::task::{TaskDraft, TaskId, TaskPatch, TaskPriority, TaskStatus};

/// Upper bound on the delay between reconnect attempts in `watch`.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(version, about = "Real-time task board client")]
struct Cli {
    #[command(flatten)]
    args: CliArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an account and print its token.
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Log in and print a token.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Print your tasks.
    List {
        /// Show only tasks with this status.
        #[arg(long)]
        status: Option<TaskStatus>,
    },
    /// Create a task in the workspace.
    Create {
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, default_value_t)]
        status: TaskStatus,
        #[arg(long, default_value_t)]
        priority: TaskPriority,
    },
    /// Update fields of a task.
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long)]
        priority: Option<TaskPriority>,
    },
    /// Delete a task.
    Delete { id: String },
    /// Print the task list whenever the workspace changes, until Ctrl-C.
    Watch {
        /// Show only tasks with this status.
        #[arg(long)]
        status: Option<TaskStatus>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ClientConfig::load(&cli.args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.args.log_level, cli.args.log_file.as_deref());
    tracing::info!(server = %config.server_url, "taskboard starting");

    match run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Logs go to a file so stdout carries only command output. Returns a
/// [`WorkerGuard`] that must be held until shutdown to flush buffered entries.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("taskboard.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

async fn run(command: Command, config: &ClientConfig) -> CliResult {
    let mut store = HttpTaskStore::new(&config.server_url)?;
    if let Some(token) = &config.token {
        store = store.with_token(token.clone());
    }

    match command {
        Command::Register {
            name,
            email,
            password,
        } => {
            let req = RegisterRequest {
                name,
                email,
                password,
            };
            req.validate()?;
            print_auth(&store.register(&req).await?);
        }
        Command::Login { email, password } => {
            let req = LoginRequest { email, password };
            req.validate()?;
            print_auth(&store.login(&req).await?);
        }
        Command::List { status } => {
            use taskboard::mutation::TaskStore;
            println!("{}", render_board(&store.list().await?, status));
        }
        Command::Create {
            title,
            description,
            status,
            priority,
        } => {
            let session = open_session(store, config).await?;
            let draft = TaskDraft {
                title,
                description,
                status,
                priority,
            };
            let result = session.create(draft).await;
            session.close().await;
            println!("{}", format_task(&result?));
        }
        Command::Update {
            id,
            title,
            description,
            status,
            priority,
        } => {
            let patch = TaskPatch {
                title,
                description,
                status,
                priority,
            };
            if patch.is_empty() {
                return Err("nothing to update: pass at least one field".into());
            }
            let session = open_session(store, config).await?;
            let result = session.update(&TaskId::from(id), patch).await;
            session.close().await;
            println!("{}", format_task(&result?));
        }
        Command::Delete { id } => {
            let session = open_session(store, config).await?;
            let result = session.delete(&TaskId::from(id.as_str())).await;
            session.close().await;
            result?;
            println!("deleted {id}");
        }
        Command::Watch { status } => {
            let session = open_session(store, config).await?;
            watch(&session, status).await;
            session.close().await;
        }
    }
    Ok(())
}

async fn open_session(
    store: HttpTaskStore,
    config: &ClientConfig,
) -> Result<WorkspaceSession, Box<dyn std::error::Error>> {
    let user_id = store
        .user_id()
        .ok_or("not logged in: set TASKBOARD_TOKEN or run `taskboard login`")?;
    let session_config = SessionConfig {
        bus_url: config.resolved_bus_url()?,
        workspace: config.workspace_id()?,
        user_id,
        bus: config.bus_options(),
    };
    Ok(WorkspaceSession::open(store, session_config).await?)
}

/// Prints the list on every cache change; reconnects when the bus drops.
async fn watch(session: &WorkspaceSession, status: Option<TaskStatus>) {
    let mut changes = session.cache().subscribe();
    let mut connected = session.disconnected();
    let print = || println!("{}", render_board(&session.tasks(), status));
    println!("watching {} (Ctrl-C to stop)", session.workspace());
    print();

    loop {
        let lost = tokio::select! {
            change = changes.recv() => match change {
                Ok(ws) => {
                    if &ws == session.workspace() {
                        print();
                    }
                    false
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "change notifications lagged");
                    print();
                    false
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = connected.wait_for(|up| !*up) => true,
            _ = tokio::signal::ctrl_c() => break,
        };
        if lost {
            eprintln!("connection lost, reconnecting...");
            reconnect_with_backoff(session).await;
            connected = session.disconnected();
            print();
        }
    }
}

async fn reconnect_with_backoff(session: &WorkspaceSession) {
    let mut delay = Duration::from_millis(500);
    loop {
        match session.reconnect().await {
            Ok(()) => {
                eprintln!("reconnected");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, delay_ms = delay.as_millis(), "reconnect failed");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_RECONNECT_DELAY);
            }
        }
    }
}

fn print_auth(resp: &AuthResponse) {
    println!("logged in as {} <{}>", resp.user.name, resp.user.email);
    println!("token: {}", resp.token);
}
