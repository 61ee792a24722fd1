//! Hale - conversational assistant lifecycle driver
//!
//! This binary is the composition root: it constructs the event bus, the
//! activity broadcaster, the connection registry, the probe, and the
//! workflow client, wires one tracker per conversation, and drives the
//! scripted flow over stdin. The rendering here is intentionally plain -
//! the real chat surface is an external collaborator of the engine.
//!
//! # Usage
//!
//! ```bash
//! # Start a conversation against the configured backend
//! hale
//!
//! # Override the backend endpoint
//! hale --endpoint http://localhost:5678/webhook/assistant
//!
//! # Inspect the persisted admin session clock
//! hale session-status
//!
//! # Enable debug logging
//! RUST_LOG=hale=debug hale
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use hale_client::{HttpProbe, WorkflowClient};
use hale_core::{
    Conversation, ConversationId, ConversationStage, EndReason, NoticeKind, RetryPolicy,
    SessionTimeoutConfig, TrackerConfig,
};
use hale_session::{
    ActivityBroadcaster, ActivityTracker, ConnectionRegistry, FileSessionStore, RetryCoordinator,
    RetryOutcome, SessionTimeoutManager, TrackerEvent, UiEvent, UiEventBus,
};
use hale_wire::WorkflowRequest;

// ============================================================================
// CLI Arguments
// ============================================================================

/// Hale - healthcare-analytics assistant session driver
#[derive(Parser, Debug)]
#[command(name = "hale", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to the TOML config file
    #[arg(long, default_value = "hale.toml", global = true)]
    config: PathBuf,

    /// Backend endpoint override
    #[arg(long)]
    endpoint: Option<String>,

    /// Health centre identifier sent with each request
    #[arg(long, default_value = "HC-000")]
    centre_id: String,

    /// Health centre display name sent with each request
    #[arg(long, default_value = "Demo Clinic")]
    centre_name: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a conversation (default)
    Chat,
    /// Show the persisted admin session clock
    SessionStatus,
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct HaleConfig {
    backend: BackendConfig,
    tracker: TrackerConfig,
    retry: RetryPolicy,
    session: SessionTimeoutConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct BackendConfig {
    endpoint: String,
    timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:5678/webhook/assistant".to_string(),
            timeout_secs: 30,
        }
    }
}

fn load_config(path: &PathBuf) -> Result<HaleConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "No config file, using defaults");
        return Ok(HaleConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("hale=info".parse()?)
                .add_directive("hale_session=info".parse()?)
                .add_directive("hale_client=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args.config)?;

    match args.command {
        Some(Command::SessionStatus) => show_session_status(config),
        // `chat` is also the default when no subcommand is given.
        Some(Command::Chat) | None => run_chat(args, config).await,
    }
}

/// Prints the persisted admin session clock - the dev-side view of what the
/// dashboard's timeout manager sees.
fn show_session_status(config: HaleConfig) -> Result<()> {
    let store = FileSessionStore::new(FileSessionStore::default_path());
    let (events, _rx) = mpsc::unbounded_channel();
    let manager = SessionTimeoutManager::new(config.session, Arc::new(store), events);

    let status = manager.get_session_status();
    match status.last_activity {
        Some(last) => {
            println!("last activity:  {last}");
            println!("expired:        {}", status.is_expired);
            println!("remaining:      {}s", status.time_remaining.as_secs());
            println!("warning due:    {}", status.should_show_warning);
        }
        None => println!("No persisted session."),
    }
    Ok(())
}

// ============================================================================
// Conversation driver
// ============================================================================

async fn run_chat(args: Args, config: HaleConfig) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        endpoint = %config.backend.endpoint,
        "Hale starting"
    );

    // Composition root: every shared service is constructed here and
    // injected; nothing is a global.
    let cancel_token = CancellationToken::new();
    let bus = UiEventBus::new();
    let broadcaster = ActivityBroadcaster::new(bus.clone());
    let registry = ConnectionRegistry::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("Failed to listen for Ctrl+C");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let endpoint = args
        .endpoint
        .clone()
        .unwrap_or_else(|| config.backend.endpoint.clone());

    let tracker_config = config.tracker.clone();
    let probe = Arc::new(HttpProbe::new(
        tracker_config.probe_endpoint.clone(),
        tracker_config.probe_timeout,
    ));
    let backend = Arc::new(WorkflowClient::new(
        endpoint,
        Duration::from_secs(config.backend.timeout_secs),
    ));

    let (tracker_tx, mut tracker_rx) = mpsc::unbounded_channel();
    let tracker = ActivityTracker::new(
        ConversationId::generate(),
        tracker_config,
        probe,
        registry.clone(),
        broadcaster.clone(),
        tracker_tx,
    );
    tracker.start_inactivity_timer();
    tracker.start_periodic_connection_checks(None);

    let mut coordinator = RetryCoordinator::new(
        config.retry.clone(),
        backend,
        cancel_token.clone(),
    )
    .with_registry(registry.clone());

    let mut conversation = Conversation::new(tracker.id().clone());
    greet(&mut conversation);

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                conversation.end(EndReason::Explicit, "Session ended.");
                break;
            }

            event = tracker_rx.recv() => match event {
                Some(TrackerEvent::InactivityTimeout) => {
                    conversation.end(
                        EndReason::Inactivity,
                        "Session ended due to inactivity.",
                    );
                    print_last_notice(&conversation);
                    break;
                }
                Some(TrackerEvent::ConnectionChanged { connected }) => {
                    let (kind, text) = if connected {
                        (NoticeKind::ConnectionRestored, "Connection restored.")
                    } else {
                        (NoticeKind::ConnectionLost, "Connection lost. Retrying in the background.")
                    };
                    if conversation.transcript.push_notice(kind, text) {
                        println!("[{text}]");
                    }
                }
                None => break,
            },

            line = lines.next_line() => {
                let Some(line) = line.unwrap_or(None) else {
                    conversation.end(EndReason::Explicit, "Session ended.");
                    break;
                };
                bus.emit(UiEvent::KeyPress);
                handle_line(
                    line.trim(),
                    &args,
                    &mut conversation,
                    &mut coordinator,
                )
                .await;
                if conversation.stage().is_terminal() {
                    print_last_notice(&conversation);
                    break;
                }
            }
        }
    }

    tracker.cleanup();
    info!("Hale stopped");
    Ok(())
}

fn greet(conversation: &mut Conversation) {
    let welcome = "Welcome to Hale. What would you like to see?\n  1) Utilisation report\n  2) Referral summary\n  (q to quit)";
    conversation.transcript.push_assistant(welcome);
    conversation.show_options();
    println!("{welcome}");
}

/// Advances the scripted flow by one user line.
async fn handle_line(
    line: &str,
    args: &Args,
    conversation: &mut Conversation,
    coordinator: &mut RetryCoordinator,
) {
    if line.is_empty() {
        return;
    }
    conversation.transcript.push_user(line);

    if line.eq_ignore_ascii_case("q") {
        conversation.end(EndReason::Explicit, "Session ended.");
        return;
    }

    match conversation.stage() {
        ConversationStage::OptionSelect => match line {
            "1" | "2" => {
                conversation.collect_parameters();
                println!("How many months should the report cover?");
            }
            _ => println!("Please choose 1 or 2 (or q to quit)."),
        },

        ConversationStage::ParameterEntry => {
            let Ok(months) = line.parse::<u32>() else {
                println!("Please enter a number of months.");
                return;
            };

            let request = WorkflowRequest::analytics(
                conversation.id.clone(),
                args.centre_id.clone(),
                args.centre_name.clone(),
                months,
                format!("report for the last {months} months"),
            );

            println!("Working on it...");
            match coordinator.run(&request, conversation).await {
                RetryOutcome::Success(reply) => {
                    println!("{reply}");
                    println!("Anything else? (1/2, q to quit)");
                    conversation.show_options();
                }
                RetryOutcome::SoftFailure => {
                    print_last_notice(conversation);
                    println!("Let's try that again. How many months?");
                    conversation.collect_parameters();
                }
                RetryOutcome::Cancelled => {
                    debug!("Request cancelled");
                }
                // Exhausted and AuthRejected already ended the conversation
                // with their terminal notice.
                RetryOutcome::Exhausted | RetryOutcome::AuthRejected => {}
            }
        }

        stage => debug!(%stage, "Input ignored in this stage"),
    }
}

fn print_last_notice(conversation: &Conversation) {
    if let Some(message) = conversation.transcript.last() {
        if message.notice.is_some() {
            println!("[{}]", message.content);
        }
    }
}
