use crate::connection::{Connection, Executor};
use crate::error::{ClientError, Result};
use bytes::Bytes;
use inference_proto::{message, ServerAddress};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Long-lived socket dedicated to one model.
pub struct StreamChannel {
    connection: Arc<Connection>,
    model_name: String,
    queue_depth: usize,
}

impl StreamChannel {
    /// Connect and send the control message announcing `model_name`. The
    /// server does not answer the control message.
    #[instrument(skip(executor, config))]
    pub fn open(
        executor: Arc<Executor>,
        address: &ServerAddress,
        timeout: Duration,
        model_name: &str,
        queue_depth: usize,
        config: &Value,
    ) -> Result<Self> {
        let connection = Connection::connect(executor, address, timeout)?;
        let request = message::stream_request(model_name, queue_depth, config);
        connection.write(&message::prepare(&request)?)?;
        tracing::info!(peer = %connection.peer(), "Opened stream for model {}", model_name);

        Ok(Self {
            connection: Arc::new(connection),
            model_name: model_name.to_string(),
            queue_depth: queue_depth.max(1),
        })
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Maximum number of outstanding frames in pipelined mode.
    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }

    /// Write every buffer of one frame.
    pub fn write_frame(&self, frames: &[Bytes]) -> Result<()> {
        for frame in frames {
            self.connection.write(frame)?;
        }
        Ok(())
    }

    /// Full round trip for one frame: no pipelining.
    #[instrument(level = "debug", skip(self, frames), fields(model = %self.model_name))]
    pub fn predict(&self, frames: &[Bytes]) -> Result<Value> {
        self.write_frame(frames)?;
        let payload = self.connection.read()?.ok_or_else(|| {
            ClientError::Transport(format!(
                "predict: server '{}' closed the stream",
                self.connection.peer()
            ))
        })?;
        Ok(message::decode_result(&payload)?)
    }

    /// Announce end of stream with an empty frame, then close the socket.
    /// The empty frame is written asynchronously so a dead peer cannot
    /// stall the close longer than `grace`.
    pub fn close(&self, grace: Duration) {
        if !self.connection.is_open() {
            return;
        }
        let handle = self.connection.write_async(Vec::new(), grace);
        if !handle.wait(grace) {
            tracing::debug!(
                peer = %self.connection.peer(),
                "End-of-stream marker not flushed: {}",
                handle.error().unwrap_or_else(|| "timed out".into())
            );
        }
        self.connection.close();
        tracing::info!("Closed stream for model {}", self.model_name);
    }
}
