//! Command-line interface.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use uuid::Uuid;

use crate::adapters::{
    ChannelPublisher, ExtractionClient, FsCaptureStore, MessagingClient, TranscriptionClient,
};
use crate::config::QuorumConfig;
use crate::core::{Collaborators, Dispatcher, SessionLog, SessionRegistry};

/// Meeting decision capture orchestrator
#[derive(Parser)]
#[command(name = "quorum", version, about)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dispatcher against a JSONL event feed on stdin
    Serve,

    /// List archived sessions
    Sessions {
        /// Maximum number of sessions to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Replay one session's audit log
    Show {
        /// Session id
        session_id: Uuid,
    },
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = QuorumConfig::load()?;

        match self.command {
            Commands::Serve => serve(config).await,
            Commands::Sessions { limit } => list_sessions(config, limit).await,
            Commands::Show { session_id } => show_session(config, session_id).await,
        }
    }
}

/// Read external events from stdin, one JSON object per line, until EOF
async fn serve(config: QuorumConfig) -> Result<()> {
    let messenger = Arc::new(MessagingClient::new(config.messaging_url.clone()));

    let collaborators = Collaborators {
        capture: Arc::new(FsCaptureStore::new(config.captures_dir())),
        transcription: Arc::new(TranscriptionClient::new(config.transcribe_url.clone())),
        extraction: Arc::new(ExtractionClient::new(config.extract_url.clone())),
        messenger: Arc::clone(&messenger) as _,
        publisher: Arc::new(ChannelPublisher::new(
            messenger,
            config.results_channel.clone(),
        )),
    };

    let registry = Arc::new(SessionRegistry::new());
    let dispatcher = Dispatcher::new(
        registry,
        collaborators,
        config.retry.clone(),
        config.veto_window(),
        config.sessions_dir(),
    );

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    while let Some(line) = lines.next_line().await? {
        // A malformed line is dropped, not fatal
        if let Err(e) = dispatcher.handle_line(&line).await {
            warn!(error = %e, "Dropped event");
        }
    }

    Ok(())
}

async fn list_sessions(config: QuorumConfig, limit: usize) -> Result<()> {
    let base = config.sessions_dir();
    let mut ids = SessionLog::list_sessions(&base).await?;
    ids.sort();

    for session_id in ids.into_iter().take(limit) {
        let log = SessionLog::open(&base, session_id).await?;
        let events = log.replay().await?;
        let outcome = log
            .outcome()
            .await?
            .map(|k| format!("{:?}", k))
            .unwrap_or_else(|| "in progress".to_string());

        let started = events
            .first()
            .map(|e| e.timestamp.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());

        println!("{}  {}  {} events  {}", session_id, started, events.len(), outcome);
    }

    Ok(())
}

async fn show_session(config: QuorumConfig, session_id: Uuid) -> Result<()> {
    let log = SessionLog::open(&config.sessions_dir(), session_id)
        .await
        .context("Failed to open session log")?;

    let events = log.replay().await?;
    if events.is_empty() {
        anyhow::bail!("No events found for session {}", session_id);
    }

    for event in events {
        println!("{}  {:?}  {}", event.timestamp.to_rfc3339(), event.kind, event.detail);
    }

    Ok(())
}
