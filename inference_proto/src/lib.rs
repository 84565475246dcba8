//! Wire-level vocabulary of the AI server client-server protocol.

mod address;
mod error;
mod model;

pub mod framing;
pub mod message;

pub use address::{ServerAddress, DEFAULT_PORT};
pub use error::ProtocolError;
pub use message::{commands, CURRENT_PROTOCOL_VERSION, PROTOCOL_VERSION_TAG};
pub use model::{ModelInfo, ModelQuery, TriState};
