use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tower_http::cors::CorsLayer;

use tabdeck_core::commands::Command;
use tabdeck_core::ids::{ConnectionId, SessionKey};
use tabdeck_core::protocol::Envelope;
use tabdeck_core::strategy::SortStrategy;
use tabdeck_store::{spawn_writer, Database, DisplayCache};
use tabdeck_telemetry::FaultCounters;

use crate::connection;
use crate::display::{DisplayBuilder, DisplaySnapshot};
use crate::registry::{Mutation, SessionRegistry};

/// Server configuration.
pub struct ServerConfig {
    /// Fixed local port extensions dial. Loopback only.
    pub port: u16,
    pub max_send_queue: usize,
    pub ping_interval: Duration,
    pub sweep_interval: Duration,
    /// Disconnected sessions older than this are collected by the sweep.
    pub session_max_age: Duration,
    pub persist_debounce: Duration,
    pub default_strategy: SortStrategy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 48125,
            max_send_queue: 256,
            ping_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(3600),
            session_max_age: Duration::from_secs(24 * 3600),
            persist_debounce: Duration::from_millis(1000),
            default_strategy: SortStrategy::LastActivated,
        }
    }
}

/// Everything the coordinator task can be asked to do. All session and
/// display mutations flow through this one mailbox.
pub(crate) enum CoordMsg {
    Inbound {
        envelope: Envelope,
        outbound: mpsc::Sender<String>,
    },
    Disconnect {
        connection_id: ConnectionId,
    },
    Command {
        session_key: SessionKey,
        command: Command,
    },
    SetStrategy {
        strategy: SortStrategy,
    },
    GetDisplay {
        reply: oneshot::Sender<DisplaySnapshot>,
    },
    Stats {
        reply: oneshot::Sender<CoordinatorStats>,
    },
    Sweep,
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorStats {
    pub sessions: usize,
    pub active_sessions: usize,
    pub connections: usize,
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
struct AppState {
    coord_tx: mpsc::Sender<CoordMsg>,
    counters: Arc<FaultCounters>,
    max_send_queue: usize,
    ping_interval: Duration,
}

/// Create and start the coordinator server. Returns a handle that keeps the
/// background tasks alive and exposes the command/display surface.
pub async fn start(config: ServerConfig, db: Database) -> Result<ServerHandle, std::io::Error> {
    let counters = Arc::new(FaultCounters::new());

    let (persist_tx, persist_handle) =
        spawn_writer(DisplayCache::new(db), config.persist_debounce);

    let registry = SessionRegistry::new(Arc::clone(&counters));
    let display = DisplayBuilder::new(config.default_strategy, Some(persist_tx));
    let display_tx = display.publisher();

    let (coord_tx, coord_rx) = mpsc::channel::<CoordMsg>(1024);
    let max_age_ms = config.session_max_age.as_millis() as i64;
    let coordinator = tokio::spawn(run_coordinator(coord_rx, registry, display, max_age_ms));

    // Staleness sweep on a coarse schedule, routed through the mailbox so
    // it serializes with everything else.
    let sweeper = {
        let coord_tx = coord_tx.clone();
        let interval = config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if coord_tx.send(CoordMsg::Sweep).await.is_err() {
                    break;
                }
            }
        })
    };

    let state = AppState {
        coord_tx: coord_tx.clone(),
        counters: Arc::clone(&counters),
        max_send_queue: config.max_send_queue,
        ping_interval: config.ping_interval,
    };
    let router = build_router(state);

    let addr = format!("127.0.0.1:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "tabdeck coordinator started");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        coord_tx,
        counters,
        display_tx,
        _server: server,
        _coordinator: coordinator,
        _sweeper: sweeper,
        _persist: persist_handle,
    })
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Handle returned by `start()` — keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    coord_tx: mpsc::Sender<CoordMsg>,
    counters: Arc<FaultCounters>,
    display_tx: broadcast::Sender<DisplaySnapshot>,
    _server: tokio::task::JoinHandle<()>,
    _coordinator: tokio::task::JoinHandle<()>,
    _sweeper: tokio::task::JoinHandle<()>,
    _persist: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Presentation surfaces subscribe here; every rebuild is pushed.
    pub fn subscribe_display(&self) -> broadcast::Receiver<DisplaySnapshot> {
        self.display_tx.subscribe()
    }

    pub async fn current_display(&self) -> Option<DisplaySnapshot> {
        let (reply, rx) = oneshot::channel();
        self.coord_tx.send(CoordMsg::GetDisplay { reply }).await.ok()?;
        rx.await.ok()
    }

    /// Route a command back to the originating browser session.
    pub async fn send_command(&self, session_key: SessionKey, command: Command) {
        let _ = self.coord_tx.send(CoordMsg::Command { session_key, command }).await;
    }

    /// Operator strategy switch; re-merges cached state, no round trip.
    pub async fn set_sort_strategy(&self, strategy: SortStrategy) {
        let _ = self.coord_tx.send(CoordMsg::SetStrategy { strategy }).await;
    }

    pub async fn stats(&self) -> Option<CoordinatorStats> {
        let (reply, rx) = oneshot::channel();
        self.coord_tx.send(CoordMsg::Stats { reply }).await.ok()?;
        rx.await.ok()
    }

    pub fn counters(&self) -> &Arc<FaultCounters> {
        &self.counters
    }
}

/// The single mutation loop. One message is handled to completion before
/// the next, which is the whole concurrency story for session state.
async fn run_coordinator(
    mut rx: mpsc::Receiver<CoordMsg>,
    mut registry: SessionRegistry,
    mut display: DisplayBuilder,
    max_age_ms: i64,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            CoordMsg::Inbound { envelope, outbound } => {
                match registry.handle_envelope(envelope, &outbound) {
                    Mutation::Rebuild => display.rebuild(&registry.active_sessions()),
                    Mutation::ConnectionsChanged => {
                        display.connections_changed(&registry.active_sessions())
                    }
                    Mutation::None => {}
                }
            }
            CoordMsg::Disconnect { connection_id } => {
                if registry.handle_disconnect(&connection_id) == Mutation::ConnectionsChanged {
                    display.connections_changed(&registry.active_sessions());
                }
            }
            CoordMsg::Command { session_key, command } => {
                if let Err(e) = registry.send_command(&session_key, command) {
                    tracing::warn!(session = %session_key, error = %e, "command not delivered");
                }
            }
            CoordMsg::SetStrategy { strategy } => {
                display.set_strategy(strategy, &registry.active_sessions());
            }
            CoordMsg::GetDisplay { reply } => {
                let _ = reply.send(display.current().clone());
            }
            CoordMsg::Stats { reply } => {
                let _ = reply.send(CoordinatorStats {
                    sessions: registry.session_count(),
                    active_sessions: registry.active_sessions().len(),
                    connections: registry.connection_count(),
                });
            }
            CoordMsg::Sweep => {
                let removed = registry.cleanup_stale_sessions(max_age_ms);
                if removed > 0 {
                    tracing::info!(removed, "stale session sweep");
                    display.connections_changed(&registry.active_sessions());
                }
            }
        }
    }
    tracing::info!("coordinator loop stopped");
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    tracing::debug!("socket connected");
    connection::handle_socket(
        socket,
        state.coord_tx,
        state.max_send_queue,
        state.ping_interval,
        state.counters,
    )
    .await;
}

/// Health check HTTP endpoint: liveness plus the fault counters that keep
/// swallowed protocol errors visible.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let (reply, rx) = oneshot::channel();
    let stats = match state.coord_tx.send(CoordMsg::Stats { reply }).await {
        Ok(()) => rx.await.ok(),
        Err(_) => None,
    };

    match stats {
        Some(stats) => (
            axum::http::StatusCode::OK,
            axum::Json(serde_json::json!({
                "status": "healthy",
                "sessions": stats.sessions,
                "activeSessions": stats.active_sessions,
                "connections": stats.connections,
                "faults": state.counters.snapshot(),
            })),
        ),
        None => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(serde_json::json!({ "status": "unavailable" })),
        ),
    }
}
