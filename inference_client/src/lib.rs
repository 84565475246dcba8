mod client;
mod command;
mod connection;
mod dispatcher;
mod error;
mod stream;

pub mod api;
pub mod config;

pub use client::Client;
pub use command::CommandChannel;
pub use config::ClientSettings;
pub use connection::{Connection, Executor, WriteHandle};
pub use dispatcher::{PipelineMonitor, ResultCallback};
pub use error::{ClientError, Result};
pub use stream::StreamChannel;

pub use inference_proto::{ModelInfo, ModelQuery, ServerAddress, TriState};
