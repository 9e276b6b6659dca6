//! Chatsync CLI entry point.
//!
//! Provides `check-config` for validating a configuration file, `history`
//! for loading a conversation from the REST backend, and `replay` for
//! feeding a recorded push event log through a session backed by the
//! in-memory backend.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use chatsync::backend::http::HttpBackend;
use chatsync::backend::memory::MemoryBackend;
use chatsync::backend::ChatBackend;
use chatsync::config::{config_dir, load_config, Config};
use chatsync::logging::{init_cli, init_production};
use chatsync::session::ChatSession;
use chatsync::transport::channel::ChannelTransport;
use chatsync::transport::PushEvent;
use chatsync::types::{ConversationId, ParticipantId};

/// Chatsync — coach/client chat synchronization core.
#[derive(Parser)]
#[command(name = "chatsync", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Load and validate a configuration file, then print the effective values.
    CheckConfig {
        /// Config file path (default: ~/.chatsync/config.toml).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Fetch a conversation's history from the configured backend and print
    /// the resulting snapshot.
    History {
        /// Config file path (default: ~/.chatsync/config.toml).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Conversation to open.
        #[arg(long)]
        conversation: String,
        /// The other participant of the conversation.
        #[arg(long)]
        peer: String,
    },
    /// Replay a JSON-lines file of push events and print the final snapshot.
    Replay {
        /// File with one push event per line.
        events: PathBuf,
        /// Config file path; defaults are used when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Local participant id, overriding the config.
        #[arg(long)]
        self_id: Option<String>,
        /// Conversation to open before replaying.
        #[arg(long)]
        conversation: String,
        /// The other participant of the conversation.
        #[arg(long)]
        peer: String,
        /// Mark incoming messages read after the replay.
        #[arg(long)]
        mark_read: bool,
        /// Also write JSON logs to this directory.
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command {
        Command::CheckConfig { config } => handle_check_config(config),
        Command::History {
            config,
            conversation,
            peer,
        } => handle_history(config, conversation, peer).await,
        Command::Replay {
            events,
            config,
            self_id,
            conversation,
            peer,
            mark_read,
            log_dir,
        } => {
            let _logging_guard = match log_dir {
                Some(dir) => Some(init_production(&dir)?),
                None => {
                    init_cli();
                    None
                }
            };
            let config = replay_config(config.as_deref(), self_id)?;
            handle_replay(&config, &events, conversation, peer, mark_read).await
        }
    }
}

/// Validate a config file and print its effective values.
fn handle_check_config(path: Option<PathBuf>) -> anyhow::Result<()> {
    init_cli();
    let path = match path {
        Some(path) => path,
        None => config_dir()?.join("config.toml"),
    };
    let config = load_config(&path)?;

    println!("config ok: {}", path.display());
    println!("  self_id          = {}", config.identity.self_id);
    println!("  backend.base_url = {}", config.backend.base_url);
    println!("  typing_idle_ms   = {}", config.sync.typing_idle_ms);
    println!("  max_file_bytes   = {}", config.attachments.max_file_bytes);
    println!("  max_batch_bytes  = {}", config.attachments.max_batch_bytes);
    Ok(())
}

/// Open a conversation against the REST backend and print its snapshot.
async fn handle_history(
    path: Option<PathBuf>,
    conversation: String,
    peer: String,
) -> anyhow::Result<()> {
    init_cli();
    let path = match path {
        Some(path) => path,
        None => config_dir()?.join("config.toml"),
    };
    let config = load_config(&path)?;
    let backend = HttpBackend::new(&config.backend)
        .with_context(|| format!("invalid backend URL {}", config.backend.base_url))?;
    info!(base_url = %backend.base_url(), "using REST backend");

    let (transport, _emitted) = ChannelTransport::new();
    let session = ChatSession::new(&config, Arc::new(backend), Arc::new(transport));
    let added = session
        .open(ConversationId::new(conversation), ParticipantId::new(peer))
        .await
        .context("failed to load history")?;
    info!(added, "history loaded");

    print_snapshot(&session)
}

/// Resolve the config for a replay: file (if any), then `--self-id`.
fn replay_config(path: Option<&Path>, self_id: Option<String>) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => {
            let id = self_id
                .clone()
                .or_else(|| std::env::var("CHATSYNC_SELF_ID").ok())
                .context("--self-id or --config is required")?;
            Config::for_participant(id)
        }
    };
    if let Some(id) = self_id {
        config.identity.self_id = id;
    }
    config.validate()?;
    Ok(config)
}

/// Feed every line of `events` into a fresh session.
async fn handle_replay(
    config: &Config,
    events: &Path,
    conversation: String,
    peer: String,
    mark_read: bool,
) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(events)
        .with_context(|| format!("failed to read {}", events.display()))?;

    let backend = Arc::new(MemoryBackend::new());
    let (transport, mut emitted) = ChannelTransport::new();
    let session_backend: Arc<dyn ChatBackend> = backend.clone();
    let session = ChatSession::new(config, session_backend, Arc::new(transport));

    session.on_transport_connected().await;
    session
        .open(ConversationId::new(conversation), ParticipantId::new(peer))
        .await?;

    let mut applied: usize = 0;
    let mut rejected: usize = 0;
    for (index, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let event = match PushEvent::from_json(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = index.saturating_add(1), error = %e, "skipping event");
                rejected = rejected.saturating_add(1);
                continue;
            }
        };
        // Messages with an id were persisted by the peer's side.
        if let PushEvent::Message(message) = &event {
            if let Ok(record) = message.clone().into_record() {
                backend.seed(vec![record]);
            }
        }
        if session.handle_push(event) {
            applied = applied.saturating_add(1);
        }
    }

    if mark_read {
        let outcome = session.on_viewport_at_bottom().await?;
        info!(?outcome, "viewport at bottom");
    }

    let mut outbound: usize = 0;
    while emitted.try_recv().is_ok() {
        outbound = outbound.saturating_add(1);
    }
    info!(applied, rejected, outbound, "replay finished");

    print_snapshot(&session)
}

fn print_snapshot(session: &ChatSession) -> anyhow::Result<()> {
    let snapshot = session.snapshot();
    println!(
        "{}",
        serde_json::to_string_pretty(&snapshot).context("failed to encode snapshot")?
    );
    Ok(())
}
