//! Room, presence and voting services behind the WebSocket gateway.

pub mod broadcast;
pub mod dao;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod persist;
pub mod registry;
pub mod room;
pub mod session;
pub mod store;
pub mod sweeper;
pub mod view;
pub mod votes;

pub use engine::{Caller, Engine};
pub use error::{ServiceError, ServiceResult};
pub use gateway::Gateway;
pub use registry::{CodeGenerator, RandomCodes, Registry, SequenceCodes};
pub use store::{DocumentStore, MemoryStore};
