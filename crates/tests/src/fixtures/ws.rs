use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw JSON test client for the `/ws` endpoint.
pub struct WsClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn connect(url: &str) -> Self {
        let (ws, _) = connect_async(url).await.expect("WS connect failed");
        Self { ws }
    }

    /// Sends an event with a fresh correlation id and returns it.
    pub async fn send(&mut self, event: &str, data: Value) -> Uuid {
        let correlation_id = Uuid::new_v4();
        let frame = json!({
            "type": event,
            "data": data,
            "correlationId": correlation_id,
        });
        self.send_raw(&frame.to_string()).await;
        correlation_id
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws
            .send(Message::text(text.to_string()))
            .await
            .expect("WS send failed");
    }

    pub async fn next_event(&mut self) -> Value {
        loop {
            let msg = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a server event")
                .expect("socket closed")
                .expect("socket error");
            if let Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).expect("server sent invalid JSON");
            }
        }
    }

    /// Skips events until one of type `event` arrives.
    pub async fn expect(&mut self, event: &str) -> Value {
        loop {
            let value = self.next_event().await;
            if value["type"] == event {
                return value;
            }
        }
    }

    /// Skips events until an `error`, returning its `kind`.
    pub async fn expect_error(&mut self) -> (String, Value) {
        let value = self.expect("error").await;
        (
            value["data"]["kind"].as_str().unwrap_or_default().to_string(),
            value,
        )
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
