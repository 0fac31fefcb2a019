use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::metrics::{WS_SESSIONS_CLOSED, WS_SESSIONS_OPENED};
use crate::registry::Connection;
use crate::server::AppState;
use crate::transport::ChannelTransport;

use super::message::{ClientMessage, ServerMessage};

const CHANNEL_BUFFER_SIZE: usize = 32;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub user_id: Option<String>,
    pub thread_id: Option<String>,
}

/// WebSocket upgrade handler
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query),
    fields(has_thread = query.thread_id.is_some())
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    let user_id = match query.user_id {
        Some(ref id) if !id.trim().is_empty() => id.clone(),
        _ => {
            return (StatusCode::BAD_REQUEST, "Missing user_id").into_response();
        }
    };

    tracing::info!(user_id = %user_id, "WebSocket upgrade requested");

    let thread_id = query.thread_id.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id, thread_id))
}

/// Handle an established WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state, thread_id),
    fields(user_id = %user_id)
)]
async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    user_id: String,
    thread_id: Option<String>,
) {
    let connection_start = std::time::Instant::now();

    // Channel into the writer task; the engine only ever sees the transport
    let (tx, mut rx) = mpsc::channel::<Value>(CHANNEL_BUFFER_SIZE);
    let transport = Arc::new(ChannelTransport::new(tx));

    let conn = Arc::new(Connection::with_thread(
        user_id.clone(),
        thread_id.clone(),
        transport,
    ));
    let connection_id = conn.id;

    // Registration replays any recovery backlog for this user
    state.engine.register_connection(conn.clone()).await;
    WS_SESSIONS_OPENED.inc();

    tracing::info!(
        connection_id = %connection_id,
        user_id = %user_id,
        thread_id = ?thread_id,
        "WebSocket connection established"
    );

    // Split socket into sender and receiver
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task for sending frames from the transport channel to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize outbound frame");
                    continue;
                }
            };

            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Task for receiving messages from the WebSocket
    let state_clone = state.clone();
    let conn_clone = conn.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &state_clone, &conn_clone).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
        }
        _ = recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
        }
    }

    // Unregister connection
    state.registry.remove_connection(connection_id).await;
    WS_SESSIONS_CLOSED.inc();

    tracing::info!(
        connection_id = %connection_id,
        user_id = %user_id,
        duration_secs = connection_start.elapsed().as_secs_f64(),
        "WebSocket connection closed"
    );
}

/// Process a received WebSocket message
/// Returns false if the connection should be closed
async fn process_message(msg: Message, state: &AppState, conn: &Arc<Connection>) -> bool {
    match msg {
        Message::Text(text) => {
            let client_msg: ClientMessage = match serde_json::from_str(&text) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse client message");
                    let _ = conn
                        .transport
                        .send(ServerMessage::error("INVALID_MESSAGE", e.to_string()).to_frame())
                        .await;
                    return true;
                }
            };

            handle_client_message(client_msg, state, conn).await;
            true
        }
        Message::Binary(_) => {
            let _ = conn
                .transport
                .send(
                    ServerMessage::error(
                        "UNSUPPORTED_FORMAT",
                        "Binary messages are not supported",
                    )
                    .to_frame(),
                )
                .await;
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            tracing::debug!(connection_id = %conn.id, "Received close frame");
            false
        }
    }
}

/// Handle a parsed client message
#[tracing::instrument(
    name = "ws.message",
    skip(state, conn),
    fields(connection_id = %conn.id, user_id = %conn.user_id)
)]
async fn handle_client_message(msg: ClientMessage, state: &AppState, conn: &Arc<Connection>) {
    match msg {
        ClientMessage::Ping => {
            let _ = conn.transport.send(ServerMessage::Pong.to_frame()).await;
        }
        ClientMessage::AssociateThread { thread_id } => {
            if thread_id.trim().is_empty() {
                let _ = conn
                    .transport
                    .send(
                        ServerMessage::error("INVALID_THREAD", "thread_id must not be empty")
                            .to_frame(),
                    )
                    .await;
                return;
            }

            if state
                .registry
                .update_connection_thread(conn.id, &thread_id)
                .await
            {
                let _ = conn
                    .transport
                    .send(ServerMessage::ThreadAssociated { thread_id }.to_frame())
                    .await;
            }
        }
    }
}
