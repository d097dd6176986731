use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WireError>;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("buffer overflow: need {needed} bytes, {available} available")]
    BufferOverflow { needed: usize, available: usize },

    #[error("broken pipe: heartbeat probe did not complete")]
    BrokenPipe,

    #[error("not connected")]
    NotConnected,

    #[error("transport already bound")]
    AlreadyBound,

    #[error(transparent)]
    Io(#[from] io::Error),
}

