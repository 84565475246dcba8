use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to read incoming packet length: got {0} of 4 header bytes")]
    TruncatedHeader(usize),
    #[error("Connection dropped while reading a {expected} byte packet")]
    TruncatedPayload { expected: usize },
    #[error("Packet of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to decode msgpack payload: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("Failed to encode msgpack payload: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("Invalid server address '{0}'")]
    InvalidAddress(String),
}
