use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(String),
    #[error("Unknown event type: {0}")]
    UnknownEvent(String),
    #[error("Invalid payload for {event}: {reason}")]
    InvalidPayload { event: String, reason: String },
    #[error("Invalid room code: {0:?}")]
    InvalidRoomCode(String),
    #[error("Unknown deck type: {0}")]
    UnknownDeck(String),
}

/// Machine-readable category carried by `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authorization,
    NotAuthenticated,
    NotFound,
    Conflict,
    TransientIo,
    Internal,
}
