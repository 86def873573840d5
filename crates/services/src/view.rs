//! Conversions from stored state to the read models sent to clients.

use pointroom_db::models::{Participant, Story, Vote};
use pointroom_protocol::{
    ParticipantView, RoomCode, RoomSnapshot, RoomSummary, RoomView, SessionState, SessionView,
    StoryView, VoteView,
};

use crate::room::RoomState;
use crate::session::LiveSession;
use crate::votes::statistics;

pub fn participant(p: &Participant) -> ParticipantView {
    ParticipantView {
        user_id: p.user_id.clone(),
        display_name: p.display_name.clone(),
        role: p.role,
        is_online: p.is_online,
        joined_at: p.joined_at.to_chrono(),
        last_activity: p.last_activity.to_chrono(),
    }
}

pub fn participants(state: &RoomState) -> Vec<ParticipantView> {
    state.room.participants.iter().map(participant).collect()
}

pub fn room(state: &RoomState) -> RoomView {
    let room = &state.room;
    RoomView {
        id: state.code.clone(),
        name: room.name.clone(),
        description: room.description.clone(),
        host_id: room.host_id.clone(),
        settings: room.settings.clone(),
        status: room.status,
        last_activity: room.last_activity.to_chrono(),
        expires_at: room.expires_at.to_chrono(),
    }
}

pub fn story(s: &Story) -> StoryView {
    StoryView {
        id: s.id,
        title: s.title.clone(),
        description: s.description.clone(),
        status: s.status,
        final_points: s.final_points.clone(),
        position: s.position,
        created_at: s.created_at.to_chrono(),
    }
}

pub fn vote(v: &Vote) -> VoteView {
    VoteView {
        user_id: v.user_id.clone(),
        display_name: v.display_name.clone(),
        value: v.value.clone(),
        submitted_at: v.submitted_at.to_chrono(),
    }
}

pub fn votes(list: &[Vote]) -> Vec<VoteView> {
    list.iter().map(vote).collect()
}

/// Session as seen by `viewer`. Other users' values appear only once the
/// current round is revealed (or the session has ended).
pub fn session(code: &RoomCode, live: &LiveSession, viewer: Option<&str>) -> SessionView {
    let record = &live.record;
    let current = live.current_votes();
    let visible = matches!(record.state, SessionState::Revealed | SessionState::Ended);

    SessionView {
        id: record.id,
        story_id: record.story_id,
        room_id: code.clone(),
        deck_type: record.deck_type,
        round: record.round,
        state: record.state,
        timer_started_at: record.timer_started_at.map(|at| at.to_chrono()),
        timer_duration: record.timer_duration,
        created_by: record.created_by.clone(),
        voted: current.iter().map(|v| v.user_id.clone()).collect(),
        my_vote: viewer
            .and_then(|user_id| live.votes.vote_of(record.round, user_id))
            .map(|v| v.value.clone()),
        votes: visible.then(|| votes(current)),
        statistics: if visible { statistics(current) } else { None },
        final_estimate: record.final_estimate.clone(),
    }
}

/// Full room state for one recipient: the newest session of every story.
pub fn snapshot(state: &RoomState, viewer: Option<&str>) -> RoomSnapshot {
    let sessions = state
        .stories
        .iter()
        .filter_map(|s| state.latest_session_index(s.id))
        .map(|i| session(&state.code, &state.sessions[i], viewer))
        .collect();

    RoomSnapshot {
        room: room(state),
        participants: participants(state),
        stories: state.stories.iter().map(story).collect(),
        sessions,
    }
}

pub fn summary(state: &RoomState) -> RoomSummary {
    RoomSummary {
        id: state.code.clone(),
        name: state.room.name.clone(),
        status: state.room.status,
        participant_count: state.room.participants.len(),
        online_count: state.room.online_count(),
    }
}
