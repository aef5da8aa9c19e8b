//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::util::time::unix_millis;
use crate::ws::protocol::ServerMsg;
use crate::ws::session::{on_disconnect, Session};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "New WebSocket connection");

    let (ws_sink, mut ws_stream) = socket.split();
    let outbox = state.hub.register(&conn_id);
    let writer_handle = tokio::spawn(run_writer(conn_id.clone(), ws_sink, outbox));

    state.hub.send(
        &conn_id,
        &ServerMsg::Welcome {
            conn_id: conn_id.clone(),
            server_time: unix_millis(),
        },
    );

    let session = Session::new(conn_id.clone());

    // Reader loop: WebSocket -> session
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => session.handle_text(&state, &text),
            Ok(Message::Binary(_)) => {
                warn!(conn_id = %conn_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(conn_id = %conn_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    on_disconnect(&state, &conn_id);
    writer_handle.abort();

    info!(conn_id = %conn_id, "WebSocket connection closed");
}

/// Drain the connection's outbox into the socket
async fn run_writer(
    conn_id: String,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbox: mpsc::Receiver<String>,
) {
    while let Some(text) = outbox.recv().await {
        if let Err(e) = ws_sink.send(Message::Text(text)).await {
            debug!(conn_id = %conn_id, error = %e, "WebSocket send failed");
            break;
        }
    }
    let _ = ws_sink.close().await;
}
