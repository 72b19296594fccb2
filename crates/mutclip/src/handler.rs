//! HTTP routes and the per-socket transport adapter.
//!
//! Each WebSocket gets its own pair of pumps:
//!
//! ```text
//!   socket ──read pump──▶ decode ──▶ Ingress ──▶ clip
//!   socket ◀─write pump── encode ◀── sink    ◀── clip
//! ```
//!
//! Anything that ends either pump (read error, write error, close frame,
//! idle timer) cancels the connection's scope, which ends the other pump
//! and removes the connection from its clip.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use mutclip_clipboard::{ClipConnection, ClipRegistry};
use mutclip_protocol::{ClipId, Codec, Message, ProtocolError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{MutclipError, ServerConfig};

/// Shared state handed to every route.
pub(crate) struct AppState<C: Codec> {
    pub(crate) registry: ClipRegistry,
    pub(crate) config: ServerConfig,
    pub(crate) codec: C,
    pub(crate) shutdown: CancellationToken,
}

/// `GET /newclip`: creates a clip, starts it, returns its id as the body.
pub(crate) async fn newclip<C: Codec>(State(state): State<Arc<AppState<C>>>) -> String {
    let id = state.registry.generate(&state.shutdown);

    let registry = state.registry.clone();
    let run_id = id.clone();
    tokio::spawn(async move {
        if let Err(e) = registry.start(&run_id).await {
            warn!(clip_id = %run_id, error = %e, "clip failed to start");
        }
    });

    id.to_string()
}

/// `GET /check/{id}`: 200 if the clip is live, 404 otherwise.
pub(crate) async fn check<C: Codec>(
    State(state): State<Arc<AppState<C>>>,
    Path(id): Path<String>,
) -> StatusCode {
    if state.registry.exists(&ClipId::from(id)) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

/// `GET /ws/{id}`: upgrades to a WebSocket bound to the clip.
pub(crate) async fn ws<C: Codec>(
    State(state): State<Arc<AppState<C>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());
    if !origin_allowed(&state.config.allowed_origins, origin) {
        warn!(origin, "origin denied");
        return StatusCode::FORBIDDEN.into_response();
    }

    let id = ClipId::from(id);
    upgrade.on_upgrade(move |socket| async move {
        if let Err(e) = serve_socket(socket, id.clone(), state).await {
            debug!(clip_id = %id, error = %e, "websocket ended with error");
        }
    })
}

/// Checks an `Origin` header's hostname against the allow-list.
pub(crate) fn origin_allowed(allowed: &[String], origin: Option<&str>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let Some(host) = origin
        .and_then(|origin| origin.parse::<Uri>().ok())
        .and_then(|uri| uri.host().map(str::to_ascii_lowercase))
    else {
        return false;
    };
    allowed.iter().any(|a| a.eq_ignore_ascii_case(&host))
}

async fn serve_socket<C: Codec>(
    socket: WebSocket,
    id: ClipId,
    state: Arc<AppState<C>>,
) -> Result<(), MutclipError> {
    let (mut ws_tx, ws_rx) = socket.split();
    let caller = state.shutdown.child_token();
    let (sink_tx, sink_rx) = mpsc::channel(state.config.sink_capacity.max(1));

    let conn = match state.registry.connect(&id, &caller, sink_tx.clone()) {
        Ok(conn) => conn,
        Err(e) => {
            warn!(clip_id = %id, error = %e, "connection refused");
            let frame = state.codec.encode(&Message::fatal(e.to_string()))?;
            ws_tx.send(WsMessage::Binary(frame.into())).await?;
            let _ = ws_tx.close().await;
            return Ok(());
        }
    };
    info!(clip_id = %id, conn_id = %conn.id, "websocket connected");

    let writer = tokio::spawn(write_pump(
        ws_tx,
        sink_rx,
        conn.scope.clone(),
        Arc::clone(&state),
    ));
    read_pump(ws_rx, &conn, &sink_tx, &state).await;

    conn.scope.cancel();
    caller.cancel();
    let _ = writer.await;
    info!(clip_id = %id, conn_id = %conn.id, "websocket closed");
    Ok(())
}

async fn read_pump<C: Codec>(
    mut ws_rx: SplitStream<WebSocket>,
    conn: &ClipConnection,
    sink: &mpsc::Sender<Message>,
    state: &AppState<C>,
) {
    let scope = &conn.scope;
    let idle = state.config.conn_idle_timeout;

    loop {
        let next = tokio::select! {
            biased;
            _ = scope.cancelled() => break,
            next = tokio::time::timeout(idle, ws_rx.next()) => next,
        };
        let frame = match next {
            Err(_) => {
                info!(conn_id = %conn.id, "connection idle, closing");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(conn_id = %conn.id, error = %e, "websocket read failed");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        if let WsMessage::Close(_) = frame {
            break;
        }
        let message = match decode_frame(&state.codec, frame) {
            Ok(Some(message)) => Some(message),
            Ok(None) => continue,
            Err(e) => {
                debug!(conn_id = %conn.id, error = %e, "unusable frame");
                None
            }
        };

        let delivered = match message {
            Some(message) => tokio::select! {
                biased;
                _ = scope.cancelled() => break,
                pushed = conn.inbound.push(message) => pushed.is_ok(),
            },
            None => tokio::select! {
                biased;
                _ = scope.cancelled() => break,
                sent = sink.send(Message::error("unexpected message")) => sent.is_ok(),
            },
        };
        if !delivered {
            break;
        }
    }
}

/// Turns one data frame into a message. `Ok(None)` for control frames,
/// which axum answers on its own.
fn decode_frame<C: Codec>(codec: &C, frame: WsMessage) -> Result<Option<Message>, ProtocolError> {
    match frame {
        WsMessage::Binary(bytes) => codec.decode(&bytes).map(Some),
        WsMessage::Text(_) => Err(ProtocolError::InvalidMessage(
            "text frame on a binary protocol".into(),
        )),
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Close(_) => Ok(None),
    }
}

async fn write_pump<C: Codec>(
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
    mut sink_rx: mpsc::Receiver<Message>,
    scope: CancellationToken,
    state: Arc<AppState<C>>,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = scope.cancelled() => break,
            message = sink_rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        let frame = match state.codec.encode(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, kind = message.kind(), "failed to encode frame");
                continue;
            }
        };
        if let Err(e) = ws_tx.send(WsMessage::Binary(frame.into())).await {
            debug!(error = %e, "websocket write failed");
            break;
        }
    }
    scope.cancel();
    let _ = ws_tx.close().await;
}
