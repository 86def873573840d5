//! Wire protocol for Pointroom real-time rooms.
//!
//! Every frame is a JSON text message shaped as
//! `{"type": "...", "data": {...}, "correlationId": "..."}`. The client and
//! server event sets are closed enums; anything outside them is rejected at
//! the connection boundary with [`ProtocolError`].

pub mod client;
pub mod deck;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod server;
pub mod views;

pub use client::ClientEvent;
pub use deck::DeckType;
pub use envelope::{ClientFrame, ServerFrame};
pub use error::{ErrorKind, ProtocolError};
pub use ids::{ConnectionId, CorrelationId, RoomCode, SessionId, StoryId, UserId};
pub use server::ServerEvent;
pub use views::*;
