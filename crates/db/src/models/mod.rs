pub mod room;
pub mod story;
pub mod vote;
pub mod voting_session;

pub use room::{Participant, Room};
pub use story::Story;
pub use vote::Vote;
pub use voting_session::VotingSession;
