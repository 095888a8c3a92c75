//! skyfilter server
//!
//! Reads Jetstream JSON lines from a file or stdin, runs them through the
//! rule pipeline, and streams matches to websocket clients on `/ws`.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use clap::Parser;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use skyfilter::config::DEFAULT_CONFIG_PATH;
use skyfilter::hub::{Frame, Hub};
use skyfilter::{AppConfig, Catalog, JsonlSource, Pipeline};

#[derive(Parser, Debug)]
#[command(name = "skyfilter-server")]
#[command(about = "Rule-based filter for the Bluesky firehose", long_about = None)]
struct Args {
    /// Path to the JSON config file.
    #[arg(long, short, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Listen port; overrides the config file.
    #[arg(long, short)]
    port: Option<u16>,

    /// Jetstream JSON-lines input, or `-` for stdin.
    #[arg(long, short, default_value = "-")]
    input: String,
}

#[derive(Clone)]
struct AppState {
    hub: Arc<Hub>,
    catalog: Arc<Catalog>,
    sink_capacity: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = AppConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(port) = args.port {
        config.port = port;
    }

    let mut pipeline = Pipeline::start(&config).context("starting pipeline")?;

    let query = pipeline.plan().jetstream_query(config.cursor(Utc::now()));
    info!(
        upstream = config.jetstream_server.as_deref().unwrap_or("stdin"),
        query = %query,
        "subscription plan"
    );

    let reader: Box<dyn BufRead + Send> = if args.input == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(&args.input).with_context(|| format!("opening {}", args.input))?;
        Box::new(BufReader::new(file))
    };
    let inbound = pipeline.inbound()?;
    let source = JsonlSource::new(reader, pipeline.plan().clone());
    thread::Builder::new()
        .name("skyfilter-source".to_string())
        .spawn(move || match source.run(&inbound) {
            Ok(stats) => info!(?stats, "input exhausted"),
            Err(e) => error!(error = %e, "ingestion stopped"),
        })
        .context("spawning source thread")?;

    let state = AppState {
        hub: Arc::clone(pipeline.hub()),
        catalog: Arc::clone(pipeline.catalog()),
        sink_capacity: config.sink_capacity,
    };
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/rules", get(rules_handler))
        .route("/config", get(config_handler))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    let snapshot = tokio::task::spawn_blocking(move || {
        let snapshot = pipeline.abort();
        let counts = pipeline.counters().snapshot();
        (snapshot, counts)
    })
    .await?;
    info!(dispatch = ?snapshot.0, matches = ?snapshot.1, "stopped");
    Ok(())
}

async fn rules_handler(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.catalog.rule_names().to_vec())
}

async fn config_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.catalog.public_config().clone())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (tx, mut rx) = mpsc::channel::<Frame>(state.sink_capacity);
    let hub = Arc::clone(&state.hub);
    let handle = match tokio::task::spawn_blocking(move || hub.register(tx)).await {
        Ok(Ok(handle)) => handle,
        Ok(Err(e)) => {
            warn!(error = %e, "rejecting subscriber");
            return;
        }
        Err(e) => {
            error!(error = %e, "register task failed");
            return;
        }
    };
    let id = handle.id();
    debug!(sink = %id, "subscriber connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if ws_tx.send(Message::Text(frame.to_string())).await.is_err() {
                        break;
                    }
                }
                // The hub dropped the sink: evicted or shutting down.
                None => break,
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(sink = %id, error = %e, "websocket read failed");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    let released = tokio::task::spawn_blocking(move || handle.close())
        .await
        .unwrap_or(false);
    if released {
        let _ = ws_tx.close().await;
    }
    debug!(sink = %id, "subscriber disconnected");
}
