use std::time::Duration;

use thiserror::Error;

use crate::capture::encoder::EncodeError;

/// Failures of the streaming core.
///
/// None of these is fatal: open and read failures send the capture loop into
/// its backoff, encode failures skip a single cycle of the multipart sequence
/// and a shutdown timeout only means the session is released forcibly.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("failed to open stream: {0}")]
    Open(String),
    #[error("failed to read frame: {0}")]
    Read(String),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] EncodeError),
    #[error("capture loop for '{stream}' did not exit within {waited:?}")]
    ShutdownTimeout { stream: String, waited: Duration },
}

impl StreamError {
    pub fn open(reason: impl ToString) -> Self {
        StreamError::Open(reason.to_string())
    }

    pub fn read(reason: impl ToString) -> Self {
        StreamError::Read(reason.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
