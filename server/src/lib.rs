pub mod command;
pub mod console;
pub mod control;
pub mod error;
pub mod messages;
pub mod registry;
pub mod transport;

pub use command::{DEFAULT_HOST, DEFAULT_PORT, SHUTDOWN_SENTINEL};
pub use control::ChatServer;
pub use error::ChatError;
pub use messages::Message;
pub use transport::ConnectionId;
