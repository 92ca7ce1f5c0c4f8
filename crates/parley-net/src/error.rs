use thiserror::Error;

use parley_shared::ProtocolError;

use crate::state::ConnectionState;

#[derive(Error, Debug)]
pub enum NetError {
    /// Connect failure or a broken channel. Always recoverable via backoff.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid push endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("Channel is not open")]
    NotOpen,

    #[error("{operation} is not allowed while {state:?}")]
    NotAllowed {
        operation: &'static str,
        state: ConnectionState,
    },

    #[error("Connection manager has shut down")]
    ManagerClosed,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, NetError>;
