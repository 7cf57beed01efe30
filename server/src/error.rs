//! Error taxonomy shared by the server and the client session.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    /// The operation is illegal in the current connect/listen state. Nothing changed.
    #[error("{0}")]
    InvalidState(&'static str),

    /// A port argument could not be parsed; the caller has already fallen back to the default.
    #[error("Invalid input '{0}'. Using default port")]
    InvalidArgument(String),

    #[error("Transport failure: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Malformed frame: {0}")]
    Frame(#[from] serde_json::Error),

    /// A connection broke the login protocol. Only that connection is affected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(&'static str),
}

impl ChatError {
    /// A send or receive on a connection whose other end is gone.
    pub fn disconnected() -> Self {
        ChatError::Transport(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "connection is closed",
        ))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ChatError::Transport(_) | ChatError::Frame(_))
    }
}

pub type Result<T, E = ChatError> = std::result::Result<T, E>;
