//! Error types for the streaming server

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ingest and transport errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Not a URTP header: {0}")]
    InvalidHeader(String),

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),
}

/// Audio decoding and MP3 encoding errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Truncated payload: {0} byte(s)")]
    TruncatedPayload(usize),
}

/// Segment production and publishing errors
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Unable to create playlist file: {0}")]
    PlaylistCreate(String),

    #[error("Unable to open segment file: {0}")]
    SegmentOpen(String),

    #[error("Unable to write segment file: {0}")]
    SegmentWrite(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
