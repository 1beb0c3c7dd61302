//! Connection handling for the click feed.
//!
//! Each accepted WebSocket gets an outbound queue, a heartbeat supervisor,
//! and a select loop bridging the socket to the channel registry. Replies
//! and fanned-out entries share the queue, so a subscriber sees its ack
//! before any entry published after the subscribe completed.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use shortwave_core::{
    ConnectionId, Gateway, GatewayConfig, HeartbeatSupervisor, SubscriberHandle,
};
use shortwave_protocol::{codec, ControlMessage, ProtocolError, ServerMessage};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The channel registry.
    pub gateway: Arc<Gateway>,
    /// Server configuration.
    pub config: Config,
    /// Validated supervision timing applied to every connection.
    heartbeat: shortwave_core::HeartbeatConfig,
}

impl AppState {
    /// Create new app state.
    ///
    /// # Errors
    ///
    /// Returns an error if the heartbeat timing is invalid.
    pub fn new(config: Config) -> Result<Self> {
        let heartbeat = config.heartbeat.supervision()?;
        let gateway = Arc::new(Gateway::with_config(GatewayConfig {
            max_subscriptions_per_connection: config.limits.max_subscriptions_per_connection,
        }));

        Ok(Self {
            gateway,
            config,
            heartbeat,
        })
    }
}

/// Build the HTTP router serving the feed endpoint and health check.
pub fn app(state: Arc<AppState>) -> Router {
    let websocket_path = state.config.transport.websocket_path.clone();

    Router::new()
        .route(&websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone())?);

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = app(state);

    // Bind and serve
    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr).await?;

    info!("Click feed server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = ConnectionId::generate();
    info!(connection = %connection_id, "New connection to click feed");

    let (mut sender, mut receiver) = socket.split();

    // Replies, fan-out entries, and heartbeat probes all flow through one
    // outbound queue
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let (close_tx, mut close_rx) = oneshot::channel::<()>();

    // Liveness failure detaches the connection from every channel and
    // closes the transport
    let mut supervisor = HeartbeatSupervisor::new(state.heartbeat, out_tx.clone(), {
        let gateway = Arc::clone(&state.gateway);
        let connection = connection_id.clone();
        Box::new(move || {
            gateway.unsubscribe_all(&connection);
            let _ = close_tx.send(());
        })
    });
    supervisor.start();

    let subscriber = SubscriberHandle::new(connection_id.clone(), out_tx.clone());

    // Message processing loop
    loop {
        tokio::select! {
            biased;

            _ = &mut close_rx => {
                warn!(connection = %connection_id, "Heartbeat failed, closing connection");
                metrics::record_error("liveness");
                break;
            }

            Some(message) = out_rx.recv() => {
                match codec::encode_server(&message) {
                    Ok(text) => {
                        metrics::record_message(text.len(), "outbound");
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(connection = %connection_id, error = %e, "Failed to encode frame");
                    }
                }
            }

            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        metrics::record_message(text.len(), "inbound");
                        let start = Instant::now();
                        handle_control(&text, &connection_id, &subscriber, &state, &supervisor, &out_tx);
                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        metrics::record_message(data.len(), "inbound");
                        match String::from_utf8(data) {
                            Ok(text) => {
                                handle_control(&text, &connection_id, &subscriber, &state, &supervisor, &out_tx);
                            }
                            Err(_) => {
                                error!(connection = %connection_id, "Rejected non-UTF-8 payload");
                                metrics::record_error("protocol");
                                let _ = out_tx.send(ServerMessage::error(ProtocolError::Parse.to_string()));
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup: covers disconnects that never sent an unsubscribe
    supervisor.stop();
    state.gateway.unsubscribe_all(&connection_id);
    metrics::set_active_channels(state.gateway.stats().channel_count);

    debug!(connection = %connection_id, "Connection closed");
}

/// Handle one decoded control payload.
///
/// Replies go through the outbound queue; protocol and membership errors
/// are reported to the offending connection only and never end it.
fn handle_control(
    raw: &str,
    connection_id: &ConnectionId,
    subscriber: &SubscriberHandle,
    state: &Arc<AppState>,
    supervisor: &HeartbeatSupervisor,
    out_tx: &mpsc::UnboundedSender<ServerMessage>,
) {
    let control = match codec::decode_control(raw) {
        Ok(control) => control,
        Err(e) => {
            error!(connection = %connection_id, payload = %raw.trim(), error = %e, "Rejected control payload");
            metrics::record_error("protocol");
            let _ = out_tx.send(ServerMessage::error(e.to_string()));
            return;
        }
    };

    match control {
        ControlMessage::Heartbeat => supervisor.pulse(),

        ControlMessage::Subscribe { channel } => {
            match state.gateway.subscribe(&channel, subscriber.clone()) {
                Ok(()) => {
                    info!(connection = %connection_id, channel = %channel, "New subscription to click feed channel");
                    metrics::record_subscription();
                    metrics::set_active_channels(state.gateway.stats().channel_count);
                    let _ = out_tx.send(ServerMessage::Ack);
                }
                Err(e) => {
                    warn!(connection = %connection_id, channel = %channel, error = %e, "Subscribe failed");
                    metrics::record_error("state");
                    let _ = out_tx.send(ServerMessage::error(e.to_string()));
                }
            }
        }

        ControlMessage::Unsubscribe { channel } => {
            match state.gateway.unsubscribe(connection_id, &channel) {
                Ok(()) => {
                    info!(connection = %connection_id, channel = %channel, "Unsubscribed from click feed channel");
                    metrics::set_active_channels(state.gateway.stats().channel_count);
                    let _ = out_tx.send(ServerMessage::Ack);
                }
                Err(e) => {
                    warn!(connection = %connection_id, channel = %channel, error = %e, "Unsubscribe failed");
                    metrics::record_error("state");
                    let _ = out_tx.send(ServerMessage::error(e.to_string()));
                }
            }
        }
    }
}
