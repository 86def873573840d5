use crate::fixtures::test_app::TestApp;
use serde_json::Value;

#[tokio::test]
async fn health_check() {
    let app = TestApp::spawn().await;
    let resp = app.get("/health").await;
    assert_eq!(resp.status().as_u16(), 200);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn room_summary_is_public() {
    let app = TestApp::spawn().await;
    let _alice = app.host("alice").await;
    let _bob = app.join("ABC123", "bob").await;

    let resp = app.get("/api/room/abc123").await;
    assert_eq!(resp.status().as_u16(), 200);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["id"], "ABC123");
    assert_eq!(json["name"], "Sprint 42");
    assert_eq!(json["status"], "active");
    assert_eq!(json["participantCount"], 2);
    assert_eq!(json["onlineCount"], 2);
}

#[tokio::test]
async fn missing_room_is_404() {
    let app = TestApp::spawn().await;
    let resp = app.get("/api/room/ZZZ999").await;
    assert_eq!(resp.status().as_u16(), 404);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["error"], "not_found");
}
