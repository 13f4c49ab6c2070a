//! Binary entry point.
//!
//! Wires the orchestrator runtime to the bundled model adapter and a local
//! console chat surface: stdin lines become direct messages from a test
//! user, outbound sends print to stdout. A real deployment replaces the
//! console ports with its platform adapters.

use parley::config::Config;
use parley::llm::HttpModelClient;
use parley::orchestrator::Orchestrator;
use parley::ports::{ChatPort, ForwardPart, Ports, RoomPort};
use parley::runtime::Runtime;
use parley::{HostEvent, InboundMessage, RequestId, RoomId, RoomInfoKind, Segment, UserId};

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "parley", about = "Conversational session orchestrator")]
struct Args {
    /// Path to the TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose logging (overridden by RUST_LOG).
    #[arg(long)]
    debug: bool,

    /// Sender id for console input.
    #[arg(long, default_value_t = 1000)]
    user: u64,
}

/// Console chat surface: outbound sends go to stdout.
struct ConsoleChat;

impl ChatPort for ConsoleChat {
    fn send_reply(&self, user: UserId, _room: Option<RoomId>, text: &str) {
        println!("-> {}: {text}", user.masked());
    }

    fn send_forward_bundle(&self, user: UserId, _room: Option<RoomId>, parts: &[ForwardPart]) {
        println!("-> {} (bundle, {} parts):", user.masked(), parts.len());
        for part in parts {
            match part {
                ForwardPart::Text(text) => println!("{text}"),
                ForwardPart::Image(bytes) => println!("[rendered image, {} bytes]", bytes.len()),
            }
        }
    }
}

/// The console has no rooms; any fetch answers "unavailable" immediately so
/// the pipeline degrades to triage without context.
struct NoRooms {
    events: mpsc::Sender<HostEvent>,
}

impl NoRooms {
    fn respond(&self, request_id: RequestId, kind: RoomInfoKind) {
        let event = HostEvent::RoomInfo {
            request_id,
            kind,
            success: false,
            content: String::new(),
        };
        if self.events.try_send(event).is_err() {
            tracing::warn!(request_id = %request_id, "event queue full, room info dropped");
        }
    }
}

impl RoomPort for NoRooms {
    fn fetch_announcements(&self, request_id: RequestId, _room: RoomId) {
        self.respond(request_id, RoomInfoKind::Announcements);
    }

    fn fetch_history(&self, request_id: RequestId, _room: RoomId, _count: u32) {
        self.respond(request_id, RoomInfoKind::History);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if args.debug { "parley=debug" } else { "parley=info" })
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => {
            tracing::warn!("no --config given, running with defaults");
            Config::default()
        }
    };
    let config = Arc::new(config);

    // The ports need the event sender, which needs the runtime, which needs
    // the orchestrator, which needs the ports. Break the cycle with a
    // staging channel that forwards into the runtime's queue.
    let (staging_tx, mut staging_rx) = mpsc::channel::<HostEvent>(256);

    let ports = Ports {
        chat: Arc::new(ConsoleChat),
        model: Arc::new(HttpModelClient::new(&config.llm, staging_tx.clone())?),
        room: Arc::new(NoRooms {
            events: staging_tx.clone(),
        }),
        renderer: None,
    };

    let orchestrator = Orchestrator::new(config.clone(), ports);
    let (runtime, event_tx) = Runtime::new(orchestrator, std::time::Duration::from_secs(1));

    let forward_tx = event_tx.clone();
    tokio::spawn(async move {
        while let Some(event) = staging_rx.recv().await {
            if forward_tx.send(event).await.is_err() {
                break;
            }
        }
    });

    let runtime_handle = tokio::spawn(runtime.run());

    let sender = UserId(args.user);
    let stdin_tx = event_tx.clone();
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let message = InboundMessage {
                sender,
                room: None,
                segments: vec![Segment::Text { text: line }],
                timestamp: chrono::Utc::now(),
            };
            if stdin_tx.send(HostEvent::Message(message)).await.is_err() {
                break;
            }
        }
    });

    tracing::info!(user = %sender.masked(), "console session ready, type to chat");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    drop(event_tx);
    runtime_handle.abort();
    Ok(())
}
