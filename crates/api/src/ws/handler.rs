use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::state::AppState;

pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    // Engine output for this connection is queued here and written by a
    // dedicated task, so room handlers never wait on a slow socket.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<axum::body::Bytes>();
    let connection_id = state.gateway.on_connect(tx);

    let writer = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                Some(text) = rx.recv() => Message::text(text),
                Some(data) = pong_rx.recv() => Message::Pong(data),
                else => break,
            };
            if sink.send(msg).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut reason = "closed by client";
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                state.gateway.on_message(connection_id, text.as_str()).await;
            }
            Ok(Message::Ping(data)) => {
                let _ = pong_tx.send(data);
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => {
                debug!(%connection_id, "Ignoring binary frame");
            }
            Ok(Message::Pong(_)) => {}
            Err(e) => {
                warn!(%connection_id, %e, "WebSocket error");
                reason = "transport error";
                break;
            }
        }
    }

    // Dropping the connection's sender ends the writer once it drains.
    state.gateway.on_disconnect(connection_id, reason);
    drop(pong_tx);
    let _ = writer.await;
}
