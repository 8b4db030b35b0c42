//! Connection handlers for the Huddle server.
//!
//! This module is the transport adapter: it bootstraps sessions from the
//! upgrade request, runs one task per WebSocket connection, feeds decoded
//! events to the dispatcher in arrival order, and drains the connection's
//! outbox back onto the socket.

use crate::bootstrap::{Session, SessionParams};
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use huddle_core::{
    ChannelOutbox, Connection, ConnectionId, Dispatcher, RegistryConfig, RoomRegistry,
};
use huddle_protocol::codec::LENGTH_PREFIX_SIZE;
use huddle_protocol::{codes, Encoded, Frame, FrameCodec, FrameReader, ReadOutcome};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocket, Message>;

/// Shared server state.
pub struct AppState {
    /// Event dispatcher over the room registry.
    pub dispatcher: Dispatcher,
    /// Outbound queues, one per live connection.
    pub outbox: Arc<ChannelOutbox>,
    /// One permit per allowed connection, held for the connection's lifetime.
    pub connection_slots: Arc<Semaphore>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let outbox = Arc::new(ChannelOutbox::new());
        let registry = RoomRegistry::with_config(
            outbox.clone(),
            RegistryConfig {
                reclaim_empty_rooms: config.rooms.reclaim_empty,
            },
        );

        let slots = config.limits.max_connections.min(Semaphore::MAX_PERMITS);

        Self {
            dispatcher: Dispatcher::new(Arc::new(registry)),
            outbox,
            connection_slots: Arc::new(Semaphore::new(slots)),
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Huddle server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}?name=<name>&room=<room>",
        addr, config.transport.websocket_path
    );

    serve(listener, Arc::new(AppState::new(config))).await
}

/// Serve the application on an already bound listener.
///
/// # Errors
///
/// Returns an error if serving fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rooms": state.dispatcher.registry().stats().room_count,
        "connections": state.outbox.len(),
    }))
}

/// WebSocket upgrade handler.
///
/// Rejects the upgrade when the session parameters are invalid or the
/// server is full.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<SessionParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let session = match params.validate(
        &state.config.bootstrap,
        state.config.transport.default_format,
    ) {
        Ok(session) => session,
        Err(e) => {
            debug!(error = %e, "Session bootstrap rejected");
            metrics::record_error("bootstrap");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    let Ok(permit) = Arc::clone(&state.connection_slots).try_acquire_owned() else {
        warn!(
            limit = state.config.limits.max_connections,
            "Connection limit reached"
        );
        metrics::record_error("connection_limit");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": "Too many connections" })),
        )
            .into_response();
    };

    ws.on_upgrade(move |socket| handle_websocket(socket, state, session, permit))
}

/// Handle a WebSocket connection.
///
/// The connection slot is released when `_permit` drops at the end.
async fn handle_websocket(
    socket: WebSocket,
    state: Arc<AppState>,
    session: Session,
    _permit: OwnedSemaphorePermit,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = ConnectionId::generate();
    let mut outbound = state.outbox.register(connection_id.clone());
    let connection =
        Connection::new(connection_id.clone(), session.identity).with_room(session.room);
    let codec = FrameCodec::new(session.format);

    debug!(
        connection = %connection_id,
        identity = %connection.identity(),
        room = %connection.room(),
        format = %codec.format(),
        "WebSocket connected"
    );

    let (mut sender, mut receiver) = socket.split();

    let heartbeat_interval = Duration::from_millis(state.config.heartbeat.interval_ms);
    let heartbeat_timeout = Duration::from_millis(state.config.heartbeat.timeout_ms);

    let connected = Frame::connected(
        connection_id.as_str(),
        connection.identity(),
        connection.room(),
        u32::try_from(state.config.heartbeat.interval_ms).unwrap_or(u32::MAX),
    );

    if send_frame(&mut sender, &codec, &connected).await.is_ok() {
        let mut reader = FrameReader::new(state.config.limits.max_message_size);
        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + heartbeat_interval,
            heartbeat_interval,
        );
        let mut last_seen = Instant::now();
        let max_message_size = state.config.limits.max_message_size;

        loop {
            tokio::select! {
                biased;

                // Envelopes queued for this connection by the registry
                Some(envelope) = outbound.recv() => {
                    let frame = Frame::from((*envelope).clone());
                    if send_frame(&mut sender, &codec, &frame).await.is_err() {
                        break;
                    }
                }

                // Receive from WebSocket
                msg = receiver.next() => {
                    last_seen = Instant::now();
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            metrics::record_message(text.len(), "inbound");
                            if text.len() > max_message_size {
                                if reject_oversized(&mut sender, &codec, &connection_id, text.len()).await.is_err() {
                                    break;
                                }
                                continue;
                            }

                            let result = match codec.decode_text(&text) {
                                Ok(frame) => handle_frame(frame, &connection, &state, &mut sender, &codec).await,
                                Err(e) => reject_malformed(&mut sender, &codec, &connection_id, &e).await,
                            };
                            if result.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            metrics::record_message(data.len(), "inbound");
                            // One message may finish a frame and start the next,
                            // but never carry more than one frame's worth of bytes.
                            if data.len() > max_message_size.saturating_add(LENGTH_PREFIX_SIZE) {
                                reader.reset();
                                if reject_oversized(&mut sender, &codec, &connection_id, data.len()).await.is_err() {
                                    break;
                                }
                                continue;
                            }

                            reader.push(&data);
                            if drain_binary_frames(&mut reader, &connection, &state, &mut sender, &codec).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if sender.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {}
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

                _ = heartbeat.tick() => {
                    if last_seen.elapsed() > heartbeat_timeout {
                        info!(connection = %connection_id, "Heartbeat timeout, closing");
                        metrics::record_error("heartbeat_timeout");
                        break;
                    }
                    if sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    } else {
        error!(connection = %connection_id, "Failed to send Connected frame");
    }

    // Cleanup: leave the room and drop the outbound queue
    state.dispatcher.disconnect(&connection);
    state.outbox.unregister(&connection_id);
    metrics::set_active_rooms(state.dispatcher.registry().stats().room_count);

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Handle every complete frame the binary reader holds.
async fn drain_binary_frames(
    reader: &mut FrameReader,
    connection: &Connection,
    state: &Arc<AppState>,
    sender: &mut WsSink,
    codec: &FrameCodec,
) -> Result<()> {
    while let Some(outcome) = reader.next_frame() {
        match outcome {
            ReadOutcome::Frame(frame) => {
                handle_frame(frame, connection, state, sender, codec).await?;
            }
            ReadOutcome::TooLarge(size) => {
                reject_oversized(sender, codec, connection.id(), size).await?;
            }
            ReadOutcome::Malformed(e) => {
                reject_malformed(sender, codec, connection.id(), &e).await?;
            }
        }
    }
    Ok(())
}

/// Handle a decoded frame.
async fn handle_frame(
    frame: Frame,
    connection: &Connection,
    state: &Arc<AppState>,
    sender: &mut WsSink,
    codec: &FrameCodec,
) -> Result<()> {
    match frame {
        Frame::Event { event, payload } => {
            let start = Instant::now();
            let recipients = state.dispatcher.deliver(connection, event, &payload);
            metrics::record_event(event.as_str(), start.elapsed().as_secs_f64());
            metrics::set_active_rooms(state.dispatcher.registry().stats().room_count);

            debug!(
                connection = %connection.id(),
                event = %event,
                recipients = recipients,
                "Event handled"
            );
        }

        Frame::Ping { timestamp } => {
            send_frame(sender, codec, &Frame::pong(timestamp)).await?;
        }

        Frame::Pong { .. } => {}

        other => {
            warn!(connection = %connection.id(), frame_type = other.type_name(), "Unexpected frame type");
            metrics::record_error("unexpected_frame");
            let reply = Frame::error(
                codes::UNEXPECTED_FRAME,
                format!("Unexpected frame type: {}", other.type_name()),
            );
            send_frame(sender, codec, &reply).await?;
        }
    }

    Ok(())
}

async fn reject_malformed(
    sender: &mut WsSink,
    codec: &FrameCodec,
    connection_id: &ConnectionId,
    error: &huddle_protocol::ProtocolError,
) -> Result<()> {
    warn!(connection = %connection_id, error = %error, "Malformed frame");
    metrics::record_error("malformed_frame");
    let reply = Frame::error(codes::MALFORMED_FRAME, error.to_string());
    send_frame(sender, codec, &reply).await
}

async fn reject_oversized(
    sender: &mut WsSink,
    codec: &FrameCodec,
    connection_id: &ConnectionId,
    size: usize,
) -> Result<()> {
    warn!(connection = %connection_id, size = size, "Message too large");
    metrics::record_error("message_too_large");
    let reply = Frame::error(
        codes::MESSAGE_TOO_LARGE,
        format!("Message of {size} bytes exceeds the limit"),
    );
    send_frame(sender, codec, &reply).await
}

/// Send a frame to the WebSocket in the connection's wire format.
async fn send_frame(sender: &mut WsSink, codec: &FrameCodec, frame: &Frame) -> Result<()> {
    let encoded = codec.encode(frame)?;
    metrics::record_message(encoded.len(), "outbound");

    let message = match encoded {
        Encoded::Text(text) => Message::Text(text),
        Encoded::Binary(data) => Message::Binary(data.to_vec()),
    };
    sender.send(message).await?;
    Ok(())
}
