//! Listener and top-level server wiring.
//!
//! This module:
//! - Spawns the single registry task that owns the membership set.
//! - Listens on the configured address/port.
//! - Accepts connections on the configured transport:
//!   - `ws`: axum router with the upgrade endpoint and `/health`,
//!   - `tcp`: plain accept loop with length-prefixed frames.
//! - Hands every accepted stream to [`Relay::admit`], which starts the
//!   connection's supervisor.
//!
//! At most `max_clients` connections are served at once; the permit is
//! held until the connection's supervisor has finished.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use relay_core::{BackpressurePolicy, ConnectionId, Registry, RegistrySnapshot, RelayEvent, RelayStats};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{Config, TransportKind};
use crate::registry_task::run_registry_loop;
use crate::supervisor::{self, RegistryClosed, SupervisorExit};
use crate::transport::{tcp, ws, FrameSink, FrameSource};
use crate::types::{intake_channel, IntakeTx};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Handle to a running relay.
///
/// Cheap to clone; every clone feeds the same registry task.
#[derive(Clone)]
pub struct Relay {
    intake: IntakeTx,
    queue_capacity: usize,
}

impl Relay {
    /// Spawn the registry task.
    ///
    /// The returned handle resolves with the final snapshot once every
    /// `Relay` clone and every connection is gone.
    pub fn start(policy: BackpressurePolicy) -> (Relay, JoinHandle<RegistrySnapshot>) {
        let (intake, intake_rx) = intake_channel();
        let registry = tokio::spawn(run_registry_loop(intake_rx, Registry::new(policy)));
        (
            Relay {
                intake,
                queue_capacity: policy.queue_capacity,
            },
            registry,
        )
    }

    /// Admit a new duplex frame stream into the room.
    pub fn admit<R, W>(
        &self,
        source: R,
        sink: W,
    ) -> Result<(ConnectionId, JoinHandle<SupervisorExit>), RegistryClosed>
    where
        R: FrameSource + 'static,
        W: FrameSink + 'static,
    {
        supervisor::start(source, sink, &self.intake, self.queue_capacity)
    }

    /// Current membership and counters, taken in order with other events.
    pub async fn snapshot(&self) -> Result<RegistrySnapshot, RegistryClosed> {
        let (tx, rx) = oneshot::channel();
        self.intake
            .send(RelayEvent::Snapshot(tx))
            .map_err(|_| RegistryClosed)?;
        rx.await.map_err(|_| RegistryClosed)
    }
}

/// Run the relay server with the given configuration.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let addr = config.socket_addr_string();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    serve(listener, config).await
}

/// Serve on an already bound listener.
pub async fn serve(listener: TcpListener, config: Config) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    let (relay, _registry) = Relay::start(config.backpressure());
    let limiter = Arc::new(Semaphore::new(config.max_clients));

    info!(
        addr = %local_addr,
        transport = %config.transport,
        max_clients = config.max_clients,
        "relay listening"
    );

    match config.transport {
        TransportKind::Ws => serve_ws(listener, relay, limiter, &config).await,
        TransportKind::Tcp => serve_tcp(listener, relay, limiter, config.max_frame_len).await,
    }
}

// -----------------------------------------------------------------------------
// WebSocket
// -----------------------------------------------------------------------------

#[derive(Clone)]
struct AppState {
    relay: Relay,
    limiter: Arc<Semaphore>,
    max_clients: usize,
    max_frame_len: usize,
}

/// Build the axum router: upgrade endpoint at `ws_path` plus `/health`.
pub fn router(relay: Relay, limiter: Arc<Semaphore>, config: &Config) -> Router {
    let state = AppState {
        relay,
        limiter,
        max_clients: config.max_clients,
        max_frame_len: config.max_frame_len,
    };
    Router::new()
        .route(&config.ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn serve_ws(
    listener: TcpListener,
    relay: Relay,
    limiter: Arc<Semaphore>,
    config: &Config,
) -> anyhow::Result<()> {
    let app = router(relay, limiter, config);
    axum::serve(listener, app).await.context("http server failed")
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let Ok(permit) = Arc::clone(&state.limiter).try_acquire_owned() else {
        warn!(max_clients = state.max_clients, "rejecting websocket: max_clients reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "relay is full").into_response();
    };

    let relay = state.relay.clone();
    ws.max_message_size(state.max_frame_len)
        .on_failed_upgrade(|e: axum::Error| warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| async move {
            let (source, sink) = ws::split(socket);
            run_admitted(&relay, source, sink, permit).await;
        })
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    connections: usize,
    capacity_left: usize,
    stats: StatsBody,
}

#[derive(Debug, Serialize)]
struct StatsBody {
    joined: u64,
    left: u64,
    evicted: u64,
    messages: u64,
    orphan_messages: u64,
    queued: u64,
    dropped: u64,
}

impl From<RelayStats> for StatsBody {
    fn from(s: RelayStats) -> Self {
        StatsBody {
            joined: s.joined,
            left: s.left,
            evicted: s.evicted,
            messages: s.messages,
            orphan_messages: s.orphan_messages,
            queued: s.queued,
            dropped: s.dropped,
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> Response {
    match state.relay.snapshot().await {
        Ok(snapshot) => Json(HealthResponse {
            status: "ok",
            connections: snapshot.members.len(),
            capacity_left: state.limiter.available_permits(),
            stats: snapshot.stats.into(),
        })
        .into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

// -----------------------------------------------------------------------------
// TCP
// -----------------------------------------------------------------------------

async fn serve_tcp(
    listener: TcpListener,
    relay: Relay,
    limiter: Arc<Semaphore>,
    max_frame_len: usize,
) -> anyhow::Result<()> {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                // Usually fd exhaustion; the next accept may well succeed.
                warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        let Ok(permit) = Arc::clone(&limiter).try_acquire_owned() else {
            // Just drop the stream; client will see connection closed.
            warn!(peer = %peer_addr, "rejecting connection: max_clients reached");
            continue;
        };

        info!(peer = %peer_addr, "accepted tcp connection");
        let (source, sink) = tcp::split(stream, max_frame_len);
        let relay = relay.clone();
        tokio::spawn(async move {
            run_admitted(&relay, source, sink, permit).await;
        });
    }
}

/// Admit a connection and hold its permit until the supervisor is done.
async fn run_admitted<R, W>(relay: &Relay, source: R, sink: W, permit: OwnedSemaphorePermit)
where
    R: FrameSource + 'static,
    W: FrameSink + 'static,
{
    match relay.admit(source, sink) {
        Ok((conn_id, handle)) => {
            if let Err(e) = handle.await {
                warn!(conn_id = %conn_id, error = %e, "supervisor task failed");
            }
        }
        Err(e) => warn!(error = %e, "connection not admitted"),
    }
    drop(permit);
}
