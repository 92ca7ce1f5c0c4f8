use thiserror::Error;

/// Errors raised while encoding or decoding channel frames.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame payload contains a line break")]
    LineBreak,

    #[error("Empty frame")]
    Empty,
}
