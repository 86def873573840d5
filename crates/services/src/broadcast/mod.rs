pub mod dispatcher;
pub mod storage;

pub use dispatcher::Dispatcher;
pub use storage::{ConnSender, ConnectionStorage};
