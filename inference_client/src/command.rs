use crate::connection::{Connection, Executor};
use crate::error::{ClientError, Result};
use inference_proto::message::{self, VersionCheck};
use inference_proto::{ServerAddress, PROTOCOL_VERSION_TAG};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Request/response channel for management commands. One request is in
/// flight at a time; callers serialize access through `&mut self`.
pub struct CommandChannel {
    connection: Connection,
}

impl CommandChannel {
    pub fn connect(
        executor: Arc<Executor>,
        address: &ServerAddress,
        timeout: Duration,
    ) -> Result<Self> {
        let connection = Connection::connect(executor, address, timeout)?;
        Ok(Self { connection })
    }

    /// Send `request` and return the validated response. A response with
    /// `"success": false` becomes [`ClientError::OperationFailed`].
    #[instrument(level = "debug", skip(self, request))]
    pub fn call(&mut self, source: &str, request: &Value) -> Result<Value> {
        let response = self.transmit(source, request)?;
        match message::error_check(&response) {
            Some(msg) => Err(ClientError::OperationFailed(format!("{}: {}", source, msg))),
            None => Ok(response),
        }
    }

    /// Like [`Self::call`], but a server-reported failure is returned as
    /// its message instead of an error.
    #[instrument(level = "debug", skip(self, request))]
    pub fn probe(&mut self, source: &str, request: &Value) -> Result<Option<String>> {
        let response = self.transmit(source, request)?;
        Ok(message::error_check(&response))
    }

    fn transmit(&mut self, source: &str, request: &Value) -> Result<Value> {
        let peer = self.connection.peer();
        let payload = message::prepare(request)?;
        self.connection.write(&payload)?;

        let reply = self.connection.read()?.ok_or_else(|| {
            ClientError::Transport(format!(
                "{}: server '{}' closed the connection without a response",
                source, peer
            ))
        })?;
        let response: Value = serde_json::from_slice(&reply)?;

        match message::check_version(&response) {
            VersionCheck::Compatible(_) => Ok(response),
            VersionCheck::NotAnObject => Err(ClientError::ProtocolVersion(format!(
                "Response from server '{}' is incorrect.",
                peer
            ))),
            VersionCheck::Missing => Err(ClientError::ProtocolVersion(format!(
                "AI server protocol version data is missing in response from server '{}'. \
                 Please upgrade AI server instance to newer one.",
                peer
            ))),
            VersionCheck::Unsupported(version) => Err(ClientError::ProtocolVersion(format!(
                "Server '{}' speaks unsupported protocol {} {}",
                peer, PROTOCOL_VERSION_TAG, version
            ))),
        }
    }

    pub fn close(&self) {
        self.connection.close();
    }
}
