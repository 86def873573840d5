//! Connection gateway: decodes client frames, enforces that a connection has
//! an identity before room-scoped events, routes to the engine and turns
//! failures into `error` events for the originating connection.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use pointroom_protocol::{ClientEvent, ClientFrame, ConnectionId, CorrelationId};
use tracing::{debug, error, info, warn};

use crate::broadcast::ConnSender;
use crate::engine::Engine;
use crate::error::{ServiceError, ServiceResult};

#[derive(Clone)]
pub struct Gateway {
    engine: Arc<Engine>,
}

impl Gateway {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn on_connect(&self, sender: ConnSender) -> ConnectionId {
        let connection_id = self.engine.connect(sender);
        info!(%connection_id, "Connection opened");
        connection_id
    }

    pub fn on_disconnect(&self, connection_id: ConnectionId, reason: &str) {
        self.engine.disconnect(connection_id);
        info!(%connection_id, reason, "Connection closed");
    }

    /// Handles one text frame. Never fails: every error is reported back to
    /// the sender, and a panicking handler only costs that one frame.
    pub async fn on_message(&self, connection_id: ConnectionId, text: &str) {
        let frame = match ClientFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(%connection_id, %e, "Rejected client frame");
                self.engine
                    .send_error(&connection_id, None, &ServiceError::from(e));
                return;
            }
        };
        let correlation_id = frame.correlation_id;
        let event_name = frame.event.name();
        debug!(%connection_id, event = event_name, "Client event received");

        let outcome = AssertUnwindSafe(self.dispatch(connection_id, frame))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                error!(%connection_id, event = event_name, "Handler panicked");
                Err(ServiceError::Internal(
                    "The server failed to process this request".to_string(),
                ))
            }
        };

        if let Err(e) = result {
            if e.is_client_error() {
                debug!(%connection_id, event = event_name, %e, "Client event rejected");
            } else {
                warn!(%connection_id, event = event_name, %e, "Client event failed");
            }
            self.engine.send_error(&connection_id, correlation_id, &e);
        }
    }

    async fn dispatch(&self, connection_id: ConnectionId, frame: ClientFrame) -> ServiceResult<()> {
        let engine = &self.engine;
        let correlation_id: Option<CorrelationId> = frame.correlation_id;

        if !frame.event.is_room_scoped() {
            return match frame.event {
                ClientEvent::Ping => {
                    engine.pong(&connection_id, correlation_id);
                    Ok(())
                }
                ClientEvent::CreateRoom(request) => engine
                    .create_room(connection_id, correlation_id, request)
                    .map(|_| ()),
                ClientEvent::JoinRoom(request) => engine
                    .join_room(connection_id, correlation_id, request)
                    .map(|_| ()),
                _ => Err(ServiceError::NotAuthenticated),
            };
        }

        let caller = engine.identify(connection_id, correlation_id)?;
        match frame.event {
            ClientEvent::LeaveRoom => engine.leave_room(&caller),
            ClientEvent::RequestSnapshot => engine.request_snapshot(&caller),
            ClientEvent::UpdateRoomSettings(patch) => engine.update_room_settings(&caller, patch),
            ClientEvent::ArchiveRoom => engine.archive_room(&caller),
            ClientEvent::AssignRole(request) => engine.assign_role(&caller, request),
            ClientEvent::CreateStory(request) => engine.create_story(&caller, request),
            ClientEvent::UpdateStory(request) => engine.update_story(&caller, request),
            ClientEvent::DeleteStory(request) => engine.delete_story(&caller, request),
            ClientEvent::StartVotingSession(request) => engine
                .start_voting_session(&caller, request)
                .map(|_| ()),
            ClientEvent::SubmitVote(request) => engine.submit_vote(&caller, request),
            ClientEvent::StartTimer(request) => engine.start_timer(&caller, request),
            ClientEvent::StopTimer(request) => engine.stop_timer(&caller, request),
            ClientEvent::RevealVotes(request) => engine.reveal_votes(&caller, request),
            ClientEvent::ResetVoting(request) => engine.reset_voting(&caller, request),
            ClientEvent::ChangeDeckType(request) => engine.change_deck_type(&caller, request),
            ClientEvent::EndVotingSession(request) => {
                engine.end_voting_session(&caller, request).await
            }
            // Answered before identification.
            ClientEvent::Ping | ClientEvent::CreateRoom(_) | ClientEvent::JoinRoom(_) => Ok(()),
        }
    }
}
