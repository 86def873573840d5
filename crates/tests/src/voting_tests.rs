use crate::fixtures::test_app::TestApp;
use crate::fixtures::ws::WsClient;
use serde_json::json;

async fn story_with_session(host: &mut WsClient) -> String {
    host.send("create_story", json!({ "title": "Login page" })).await;
    let created = host.expect("story_created").await;
    let story_id = created["data"]["story"]["id"].as_str().unwrap().to_string();

    host.send(
        "start_voting_session",
        json!({ "storyId": story_id, "deckType": "fibonacci" }),
    )
    .await;
    let started = host.expect("voting_session_started").await;
    assert_eq!(started["data"]["session"]["state"], "OPEN");
    assert_eq!(started["data"]["session"]["round"], 1);
    story_id
}

#[tokio::test]
async fn three_voters_reveal_automatically() {
    let app = TestApp::spawn().await;
    let mut alice = app.host("alice").await;
    let mut bob = app.join("ABC123", "bob").await;
    let mut carol = app.join("abc123", "carol").await;
    let story_id = story_with_session(&mut alice).await;

    alice.send("submit_vote", json!({ "storyId": story_id, "value": "3" })).await;
    bob.send("submit_vote", json!({ "storyId": story_id, "value": "5" })).await;

    let mut progress = Vec::new();
    while progress.len() < 2 {
        let event = carol.expect("vote_submitted").await;
        progress.push((
            event["data"]["voteCount"].as_u64().unwrap(),
            event["data"]["totalUsers"].as_u64().unwrap(),
        ));
    }
    assert_eq!(progress, vec![(1, 3), (2, 3)]);

    carol.send("submit_vote", json!({ "storyId": story_id, "value": "5" })).await;
    let revealed = alice.expect("votes_revealed").await;
    let data = &revealed["data"];
    assert_eq!(data["trigger"], "all_voted");
    assert_eq!(data["votes"].as_array().unwrap().len(), 3);
    assert_eq!(data["statistics"]["meanRounded"], 4.3);
    assert_eq!(data["statistics"]["median"], 5.0);

    let mut values: Vec<String> = data["votes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["value"].as_str().unwrap().to_string())
        .collect();
    values.sort();
    assert_eq!(values, vec!["3", "5", "5"]);
}

#[tokio::test]
async fn non_admin_reveal_is_rejected() {
    let app = TestApp::spawn().await;
    let mut alice = app.host("alice").await;
    let mut bob = app.join("ABC123", "bob").await;
    let story_id = story_with_session(&mut alice).await;

    let correlation = bob
        .send("reveal_votes", json!({ "storyId": story_id, "revealed": true }))
        .await;
    let (kind, error) = bob.expect_error().await;
    assert_eq!(kind, "authorization");
    assert_eq!(error["correlationId"], correlation.to_string());

    bob.send("request_snapshot", json!({})).await;
    let snapshot = bob.expect("room_snapshot").await;
    assert_eq!(snapshot["data"]["snapshot"]["sessions"][0]["state"], "OPEN");
}

#[tokio::test]
async fn room_events_need_a_joined_connection() {
    let app = TestApp::spawn().await;
    let mut stranger = app.connect().await;

    stranger
        .send(
            "submit_vote",
            json!({ "storyId": uuid::Uuid::new_v4(), "value": "5" }),
        )
        .await;
    let (kind, _) = stranger.expect_error().await;
    assert_eq!(kind, "not_authenticated");
}

#[tokio::test]
async fn unknown_rooms_and_events_are_reported() {
    let app = TestApp::spawn().await;
    let mut ws = app.connect().await;

    ws.send(
        "join_room",
        json!({ "roomId": "NOPE99", "userId": "bob", "name": "Bob" }),
    )
    .await;
    let (kind, _) = ws.expect_error().await;
    assert_eq!(kind, "not_found");

    ws.send_raw(r#"{"type":"self_destruct","data":{}}"#).await;
    let (kind, _) = ws.expect_error().await;
    assert_eq!(kind, "validation");
}

#[tokio::test]
async fn reset_and_end_session() {
    let app = TestApp::spawn().await;
    let mut alice = app.host("alice").await;
    let _bob = app.join("ABC123", "bob").await;
    let story_id = story_with_session(&mut alice).await;

    alice.send("submit_vote", json!({ "storyId": story_id, "value": "8" })).await;
    alice.send("reveal_votes", json!({ "storyId": story_id })).await;
    let revealed = alice.expect("votes_revealed").await;
    assert_eq!(revealed["data"]["trigger"], "manual");

    alice.send("reset_voting", json!({ "storyId": story_id })).await;
    let reset = alice.expect("voting_reset").await;
    assert_eq!(reset["data"]["round"], 2);

    alice
        .send(
            "end_voting_session",
            json!({ "storyId": story_id, "finalEstimate": "8" }),
        )
        .await;
    let ended = alice.expect("voting_session_ended").await;
    assert_eq!(ended["data"]["finalEstimate"], "8");
    assert_eq!(ended["data"]["story"]["status"], "voted");
    assert_eq!(ended["data"]["story"]["finalPoints"], "8");
}
