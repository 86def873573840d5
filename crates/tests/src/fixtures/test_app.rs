use std::net::SocketAddr;
use std::sync::Arc;

use pointroom_api::{build_router, state::AppState};
use pointroom_config::{Settings, StoreBackend};
use pointroom_services::{Engine, MemoryStore, SequenceCodes};
use tokio::net::TcpListener;

use super::ws::WsClient;

/// The full application on an ephemeral port, backed by the in-memory
/// store. Room codes are handed out from a fixed list so tests can predict
/// them.
pub struct TestApp {
    pub addr: SocketAddr,
    pub engine: Arc<Engine>,
    pub store: Arc<MemoryStore>,
    pub http: reqwest::Client,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_codes(&["ABC123", "XYZ789", "QRS456"]).await
    }

    pub async fn spawn_with_codes(codes: &[&str]) -> Self {
        let mut settings = Settings::default();
        settings.database.backend = StoreBackend::Memory;
        settings.app.host = "127.0.0.1".to_string();
        settings.app.port = 0;

        let store = Arc::new(MemoryStore::new());
        let engine = Engine::with_codes(
            store.clone(),
            &settings,
            Box::new(SequenceCodes::new(codes.iter().copied())),
        )
        .expect("engine");

        let app = build_router(AppState::new(engine.clone(), settings.clone()));
        let listener = TcpListener::bind(settings.bind_addr())
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });

        Self {
            addr,
            engine,
            store,
            http: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.http
            .get(self.url(path))
            .send()
            .await
            .expect("GET request")
    }

    /// Opens a socket and consumes the `connected` greeting.
    pub async fn connect(&self) -> WsClient {
        let mut ws = WsClient::connect(&self.ws_url()).await;
        ws.expect("connected").await;
        ws
    }

    /// Creates room `ABC123` (the first code) hosted by `user_id`.
    pub async fn host(&self, user_id: &str) -> WsClient {
        let mut ws = self.connect().await;
        ws.send(
            "create_room",
            serde_json::json!({
                "name": "Sprint 42",
                "userId": user_id,
                "displayName": user_id,
            }),
        )
        .await;
        ws.expect("room_created").await;
        ws
    }

    pub async fn join(&self, room: &str, user_id: &str) -> WsClient {
        let mut ws = self.connect().await;
        ws.send(
            "join_room",
            serde_json::json!({
                "roomId": room,
                "userId": user_id,
                "name": user_id,
            }),
        )
        .await;
        ws.expect("room_joined").await;
        ws
    }
}
