use thiserror::Error;

use parley_net::NetError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} service responded with status {status}")]
    Status { service: &'static str, status: u16 },

    #[error("Invalid response from {service} service: {reason}")]
    Decode {
        service: &'static str,
        reason: String,
    },

    /// The service understood the request and refused it.
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Invalid service URL: {0}")]
    InvalidUrl(String),

    #[error("Chat list refresh failed: {0}")]
    Refresh(String),

    #[error("Chat list synchronizer has stopped")]
    SynchronizerStopped,

    #[error("Connection error: {0}")]
    Net(#[from] NetError),
}

impl From<url::ParseError> for ClientError {
    fn from(e: url::ParseError) -> Self {
        ClientError::InvalidUrl(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
