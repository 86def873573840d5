//! Client side of the room protocol: a local mirror with optimistic updates
//! and a reconnecting WebSocket driver.

pub mod connection;
pub mod error;
pub mod mirror;
pub mod pending;
pub mod reconciler;

pub use connection::{Backoff, ClientConfig, RoomClient};
pub use error::{ClientError, ClientResult};
pub use mirror::Mirror;
pub use pending::{PendingOp, PendingQueue};
pub use reconciler::{Reconciler, RollbackReason, Update};
