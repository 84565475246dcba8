use inference_proto::ProtocolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Protocol version error: {0}")]
    ProtocolVersion(String),
    #[error("Operation failed: {0}")]
    OperationFailed(String),
    #[error("{0}: stream socket was not opened")]
    NotConnected(&'static str),
    #[error("send: observation callback is not installed")]
    NoObserver,
    #[error("{0}: result receiving thread is running")]
    AlreadyRunning(&'static str),
    #[error("Invalid server address '{0}'")]
    InvalidAddress(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to decode prediction result: {0}")]
    Decode(String),
    #[error("Failed to start I/O runtime: {0}")]
    Runtime(String),
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Json(e) => ClientError::Json(e),
            ProtocolError::Decode(e) => ClientError::Decode(e.to_string()),
            ProtocolError::Encode(e) => ClientError::Decode(e.to_string()),
            ProtocolError::InvalidAddress(a) => ClientError::InvalidAddress(a),
            other => ClientError::Transport(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
