use crate::fixtures::test_app::TestApp;
use serde_json::json;

#[tokio::test]
async fn vote_survives_disconnect_and_rejoin() {
    let app = TestApp::spawn().await;
    let mut alice = app.host("alice").await;
    let mut bob = app.join("ABC123", "bob").await;
    let mut carol = app.join("ABC123", "carol").await;

    alice.send("create_story", json!({ "title": "Checkout" })).await;
    let story_id = alice.expect("story_created").await["data"]["story"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    alice
        .send("start_voting_session", json!({ "storyId": story_id }))
        .await;
    alice.expect("voting_session_started").await;

    bob.send("submit_vote", json!({ "storyId": story_id, "value": "5" })).await;
    alice.expect("vote_submitted").await;
    bob.close().await;

    let left = alice.expect("user_left").await;
    assert_eq!(left["data"]["userId"], "bob");

    let mut bob = app.connect().await;
    bob.send(
        "join_room",
        json!({ "roomId": "ABC123", "userId": "bob", "name": "bob" }),
    )
    .await;
    let joined = bob.expect("room_joined").await;
    let session = &joined["data"]["snapshot"]["sessions"][0];
    assert_eq!(session["state"], "OPEN");
    assert_eq!(session["myVote"], "5");
    assert_eq!(session["voted"], json!(["bob"]));

    alice.send("submit_vote", json!({ "storyId": story_id, "value": "3" })).await;
    carol.send("submit_vote", json!({ "storyId": story_id, "value": "5" })).await;
    let revealed = carol.expect("votes_revealed").await;
    assert_eq!(revealed["data"]["votes"].as_array().unwrap().len(), 3);
}
