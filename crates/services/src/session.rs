//! Per-story voting state machine.
//!
//! ```text
//! NONE ──start──▶ OPEN ──reveal──▶ REVEALED ──end──▶ ENDED
//!                  ▲ ◀──hide / reset──┘
//!                  └──reset (round + 1)
//! ```
//!
//! Transition methods only mutate the session; the engine decides what to
//! broadcast and persist based on their results.

use chrono::{DateTime, Utc};
use pointroom_db::models::{Vote, VotingSession};
use pointroom_protocol::{DeckType, RoomCode, SessionState, StoryId, UserId};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::votes::VoteBook;

/// Aborts the timer task when dropped.
pub(crate) struct TimerGuard(Option<JoinHandle<()>>);

impl TimerGuard {
    pub(crate) fn new(handle: JoinHandle<()>) -> Self {
        Self(Some(handle))
    }

    /// Lets the task run to completion. Used by the task itself when it
    /// fires, so it never aborts its own handle.
    pub(crate) fn disarm(mut self) {
        self.0.take();
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

pub struct LiveSession {
    pub record: VotingSession,
    pub votes: VoteBook,
    pub(crate) timer: Option<TimerGuard>,
    /// Bumped each time a timer is armed; a firing timer with a stale
    /// generation is ignored.
    pub(crate) timer_generation: u64,
}

impl LiveSession {
    /// NONE/ENDED → OPEN: a fresh session at round 1.
    pub fn open(
        code: &RoomCode,
        story_id: StoryId,
        deck_type: DeckType,
        timer_duration: u32,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        Self::restore(
            VotingSession {
                id: Uuid::new_v4(),
                story_id,
                room_id: code.to_string(),
                deck_type,
                round: 1,
                state: SessionState::Open,
                timer_started_at: None,
                timer_duration,
                created_by,
                created_at: bson::DateTime::from_chrono(now),
                ended_at: None,
                final_estimate: None,
                confidence: None,
            },
            VoteBook::new(),
        )
    }

    pub fn restore(record: VotingSession, votes: VoteBook) -> Self {
        Self {
            record,
            votes,
            timer: None,
            timer_generation: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.record.id
    }

    pub fn state(&self) -> SessionState {
        self.record.state
    }

    pub fn round(&self) -> u32 {
        self.record.round
    }

    pub fn accepts_votes(&self) -> bool {
        self.record.state == SessionState::Open
    }

    pub fn current_votes(&self) -> &[Vote] {
        self.votes.round(self.record.round)
    }

    /// OPEN → REVEALED. `Ok(false)` when already revealed, so a second
    /// trigger is a no-op.
    pub fn reveal(&mut self) -> ServiceResult<bool> {
        match self.record.state {
            SessionState::Open => {
                self.record.state = SessionState::Revealed;
                self.cancel_timer();
                Ok(true)
            }
            SessionState::Revealed => Ok(false),
            state => Err(illegal("reveal votes", state)),
        }
    }

    /// REVEALED → OPEN for the same round. `Ok(false)` when already hidden.
    pub fn hide(&mut self) -> ServiceResult<bool> {
        match self.record.state {
            SessionState::Revealed => {
                self.record.state = SessionState::Open;
                Ok(true)
            }
            SessionState::Open => Ok(false),
            state => Err(illegal("hide votes", state)),
        }
    }

    /// OPEN/REVEALED → OPEN with an empty next round. Earlier rounds stay in
    /// the vote book. Returns the new round.
    pub fn reset(&mut self) -> ServiceResult<u32> {
        match self.record.state {
            SessionState::Open | SessionState::Revealed => {
                self.record.round += 1;
                self.record.state = SessionState::Open;
                self.cancel_timer();
                Ok(self.record.round)
            }
            state => Err(illegal("reset voting", state)),
        }
    }

    pub fn change_deck(&mut self, deck_type: DeckType) -> ServiceResult<()> {
        if self.record.state != SessionState::Open {
            return Err(illegal("change the deck", self.record.state));
        }
        if !self.current_votes().is_empty() {
            return Err(ServiceError::Conflict(
                "Reset the round before changing the deck".to_string(),
            ));
        }
        self.record.deck_type = deck_type;
        Ok(())
    }

    /// Records the timer start; the engine arms the task.
    pub fn start_timer(&mut self, duration: u32, now: DateTime<Utc>) -> ServiceResult<()> {
        if self.record.state != SessionState::Open {
            return Err(illegal("start the timer", self.record.state));
        }
        self.cancel_timer();
        self.record.timer_duration = duration;
        self.record.timer_started_at = Some(bson::DateTime::from_chrono(now));
        Ok(())
    }

    /// `Ok(false)` when no timer was running.
    pub fn stop_timer(&mut self) -> ServiceResult<bool> {
        if self.record.state != SessionState::Open {
            return Err(illegal("stop the timer", self.record.state));
        }
        let was_running = self.record.timer_started_at.is_some();
        self.cancel_timer();
        Ok(was_running)
    }

    /// OPEN/REVEALED → ENDED. Terminal.
    pub fn end(
        &mut self,
        final_estimate: Option<String>,
        confidence: Option<f64>,
        now: DateTime<Utc>,
    ) -> ServiceResult<()> {
        if !self.record.is_live() {
            return Err(illegal("end the session", self.record.state));
        }
        self.cancel_timer();
        self.record.state = SessionState::Ended;
        self.record.ended_at = Some(bson::DateTime::from_chrono(now));
        self.record.final_estimate = final_estimate;
        self.record.confidence = confidence;
        Ok(())
    }

    /// True when a timer armed with `generation` may still fire.
    pub(crate) fn timer_is_current(&self, generation: u64) -> bool {
        self.timer_generation == generation
            && self.record.state == SessionState::Open
            && self.record.timer_started_at.is_some()
    }

    pub(crate) fn arm_timer(&mut self) -> u64 {
        self.timer_generation += 1;
        self.timer_generation
    }

    pub(crate) fn cancel_timer(&mut self) {
        self.record.timer_started_at = None;
        self.timer = None;
    }

    /// Clears the timer from inside its own task.
    pub(crate) fn fire_timer(&mut self) {
        self.record.timer_started_at = None;
        if let Some(guard) = self.timer.take() {
            guard.disarm();
        }
    }
}

fn illegal(action: &str, state: SessionState) -> ServiceError {
    ServiceError::Conflict(format!("Cannot {action} while the session is {state:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_session() -> LiveSession {
        let code = RoomCode::parse("ABC123").unwrap();
        LiveSession::open(
            &code,
            Uuid::new_v4(),
            DeckType::Fibonacci,
            60,
            "host".to_string(),
            Utc::now(),
        )
    }

    #[test]
    fn starts_open_at_round_one() {
        let session = open_session();
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(session.round(), 1);
        assert!(session.accepts_votes());
    }

    #[test]
    fn second_reveal_is_a_no_op() {
        let mut session = open_session();
        assert!(session.reveal().unwrap());
        assert!(!session.reveal().unwrap());
        assert_eq!(session.state(), SessionState::Revealed);
        assert!(!session.accepts_votes());
    }

    #[test]
    fn hide_returns_to_open_in_the_same_round() {
        let mut session = open_session();
        session.reveal().unwrap();
        assert!(session.hide().unwrap());
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(session.round(), 1);
        assert!(!session.hide().unwrap());
    }

    #[test]
    fn reset_advances_round_and_clears_timer() {
        let mut session = open_session();
        session.start_timer(30, Utc::now()).unwrap();
        session.reveal().unwrap();
        assert_eq!(session.reset().unwrap(), 2);
        assert_eq!(session.state(), SessionState::Open);
        assert!(session.record.timer_started_at.is_none());
    }

    #[test]
    fn ended_is_terminal() {
        let mut session = open_session();
        session
            .end(Some("5".to_string()), Some(0.8), Utc::now())
            .unwrap();
        assert_eq!(session.state(), SessionState::Ended);
        assert_eq!(session.record.final_estimate.as_deref(), Some("5"));
        assert!(session.record.ended_at.is_some());

        assert!(matches!(session.reveal(), Err(ServiceError::Conflict(_))));
        assert!(matches!(session.reset(), Err(ServiceError::Conflict(_))));
        assert!(matches!(
            session.end(None, None, Utc::now()),
            Err(ServiceError::Conflict(_))
        ));
    }

    #[test]
    fn timer_and_deck_only_while_open() {
        let mut session = open_session();
        session.change_deck(DeckType::Tshirt).unwrap();
        assert_eq!(session.record.deck_type, DeckType::Tshirt);

        session.reveal().unwrap();
        assert!(session.start_timer(10, Utc::now()).is_err());
        assert!(session.stop_timer().is_err());
        assert!(session.change_deck(DeckType::Fibonacci).is_err());
    }

    #[test]
    fn stale_timer_generation_is_ignored() {
        let mut session = open_session();
        session.start_timer(10, Utc::now()).unwrap();
        let first = session.arm_timer();
        session.start_timer(20, Utc::now()).unwrap();
        let second = session.arm_timer();

        assert!(!session.timer_is_current(first));
        assert!(session.timer_is_current(second));

        session.stop_timer().unwrap();
        assert!(!session.timer_is_current(second));
    }
}
