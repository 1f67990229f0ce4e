use std::io;
use thiserror::Error;

/// Link-level failure underneath the command/response protocol.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
}

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("bad response from com port: {0}")]
    Protocol(String),
    #[error("couldn't read all image bytes: got {read} of {expected}")]
    ImageRead { read: usize, expected: usize },
    #[error("camera busy acquiring")]
    Busy,
    #[error("unsupported mode: {0}")]
    UnknownMode(String),
    #[error("pixel write of {got} bytes does not match buffer size {expected}")]
    BufferSize { expected: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, CameraError>;
