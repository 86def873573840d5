use pointroom_protocol::{DeckType, ProtocolError, StoryId};
use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Not in a room")]
    NotInRoom,
    #[error("Unknown story {0}")]
    UnknownStory(StoryId),
    #[error("Story {0} has no open voting round")]
    NoOpenRound(StoryId),
    #[error("{value:?} is not a card in the {deck} deck")]
    InvalidCard { value: String, deck: DeckType },
    #[error("Client connection task has stopped")]
    Closed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("WebSocket error: {0}")]
    Transport(#[from] tungstenite::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;
