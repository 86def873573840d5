use std::time::Duration;

use pointroom_client::{ClientConfig, RoomClient, Update};
use pointroom_protocol::client::StartVotingSession;
use pointroom_protocol::{ClientEvent, SessionState};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::fixtures::test_app::TestApp;

async fn wait_for<F>(updates: &mut UnboundedReceiver<Update>, mut pred: F) -> Update
where
    F: FnMut(&Update) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let update = updates.recv().await.expect("client stopped");
            if pred(&update) {
                return update;
            }
        }
    })
    .await
    .expect("timed out waiting for client update")
}

#[tokio::test]
async fn optimistic_story_and_vote_are_confirmed() {
    let app = TestApp::spawn().await;
    let (client, mut updates, _task) = RoomClient::spawn(ClientConfig::new(app.ws_url()));
    wait_for(&mut updates, |u| *u == Update::Connected).await;

    client.create_room("Sprint 42", Some("alice".to_string()), "Alice").unwrap();
    wait_for(&mut updates, |u| *u == Update::Applied { event: "room_created" }).await;

    let placeholder = client.create_story("Search", None).unwrap();
    assert!(client.mirror().story(placeholder).is_some());
    wait_for(&mut updates, |u| {
        *u == Update::Confirmed {
            correlation_id: placeholder,
        }
    })
    .await;
    let mirror = client.mirror();
    assert!(mirror.story(placeholder).is_none());
    assert_eq!(mirror.stories.len(), 1);
    let story_id = mirror.stories[0].id;

    client
        .send(ClientEvent::StartVotingSession(StartVotingSession {
            story_id,
            deck_type: None,
            timer_duration: None,
        }))
        .unwrap();
    wait_for(&mut updates, |u| {
        *u == Update::Applied {
            event: "voting_session_started",
        }
    })
    .await;

    let vote = client.vote(story_id, "8").unwrap();
    assert_eq!(
        client.mirror().session(story_id).unwrap().my_vote.as_deref(),
        Some("8")
    );
    wait_for(&mut updates, |u| *u == Update::Confirmed { correlation_id: vote }).await;
    // Sole voter, so the round reveals itself.
    wait_for(&mut updates, |u| *u == Update::Applied { event: "votes_revealed" }).await;
    let session = client.mirror().session(story_id).cloned().unwrap();
    assert_eq!(session.state, SessionState::Revealed);
    assert_eq!(session.votes.unwrap().len(), 1);
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn rejected_edit_rolls_back() {
    let app = TestApp::spawn().await;
    let mut alice = app.host("alice").await;
    alice
        .send("create_story", serde_json::json!({ "title": "Billing" }))
        .await;
    alice.expect("story_created").await;

    let (client, mut updates, _task) = RoomClient::spawn(ClientConfig::new(app.ws_url()));
    client.join_room("abc123", "bob", "Bob").unwrap();
    wait_for(&mut updates, |u| *u == Update::Applied { event: "room_joined" }).await;

    let story_id = client.mirror().stories[0].id;
    let edit = client.update_story(story_id, Some("Hijacked"), None).unwrap();
    assert_eq!(client.mirror().story(story_id).unwrap().title, "Hijacked");

    let update = wait_for(&mut updates, |u| matches!(u, Update::RolledBack { .. })).await;
    assert!(matches!(
        update,
        Update::RolledBack { correlation_id, .. } if correlation_id == edit
    ));
    assert_eq!(client.mirror().story(story_id).unwrap().title, "Billing");
}
