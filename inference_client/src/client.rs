use crate::command::CommandChannel;
use crate::config::ClientSettings;
use crate::connection::{Connection, Executor};
use crate::dispatcher::{Dispatcher, PipelineMonitor, ResultCallback};
use crate::error::{ClientError, Result};
use crate::stream::StreamChannel;
use bytes::Bytes;
use inference_proto::message::{self, commands};
use inference_proto::{ModelInfo, ServerAddress};
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

/// Client side of the AI server protocol: a command socket opened on
/// construction plus an optional stream socket for one model.
pub struct Client {
    address: ServerAddress,
    settings: ClientSettings,
    executor: Arc<Executor>,
    command: CommandChannel,
    stream: Option<StreamChannel>,
    dispatcher: Dispatcher,
    callback: Option<ResultCallback>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Connect to `server_address` (`"host[:port]"`) with default timeouts.
    pub fn new(server_address: &str) -> Result<Self> {
        Self::with_settings(server_address, ClientSettings::default())
    }

    pub fn with_timeouts(
        server_address: &str,
        connection_timeout_ms: u64,
        inference_timeout_ms: u64,
    ) -> Result<Self> {
        Self::with_settings(
            server_address,
            ClientSettings::new(connection_timeout_ms, inference_timeout_ms),
        )
    }

    #[instrument(skip(settings))]
    pub fn with_settings(server_address: &str, settings: ClientSettings) -> Result<Self> {
        let address: ServerAddress = server_address.parse()?;
        let executor = Arc::new(Executor::new()?);
        let command = CommandChannel::connect(
            Arc::clone(&executor),
            &address,
            settings.connection_timeout(),
        )?;
        tracing::info!("Connected to AI server {}", address);

        Ok(Self {
            address,
            settings,
            executor,
            command,
            stream: None,
            dispatcher: Dispatcher::default(),
            callback: None,
        })
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Every model in the server's model zoos.
    pub fn model_zoo_list(&mut self) -> Result<Vec<ModelInfo>> {
        let request = Value::Object(message::request(commands::MODEL_ZOO));
        let mut response = self.command.call("modelzooListGet", &request)?;
        match response.get_mut(commands::MODEL_ZOO).map(Value::take) {
            Some(models) if !models.is_null() => Ok(serde_json::from_value(models)?),
            _ => Ok(Vec::new()),
        }
    }

    /// Host system information dictionary.
    pub fn system_info(&mut self) -> Result<Value> {
        let request = Value::Object(message::request(commands::SYSTEM_INFO));
        self.command_payload("systemInfo", &request, commands::SYSTEM_INFO)
    }

    /// Server tracing facility management; the reply is request specific.
    pub fn trace_manage(&mut self, args: &Value) -> Result<Value> {
        let request = message::managed_request(commands::TRACE_MANAGE, args);
        self.command_payload("traceManage", &request, commands::TRACE_MANAGE)
    }

    /// Server model zoo management; the reply is request specific.
    pub fn model_zoo_manage(&mut self, args: &Value) -> Result<Value> {
        let request = message::managed_request(commands::ZOO_MANAGE, args);
        self.command_payload("modelZooManage", &request, commands::ZOO_MANAGE)
    }

    /// Label dictionary of `model_name`.
    pub fn label_dictionary(&mut self, model_name: &str) -> Result<Value> {
        let mut request = message::request(commands::LABEL_DICT);
        request.insert("name".into(), Value::from(model_name));
        self.command_payload("labelDictionary", &Value::Object(request), commands::LABEL_DICT)
    }

    fn command_payload(&mut self, source: &str, request: &Value, key: &str) -> Result<Value> {
        let mut response = self.command.call(source, request)?;
        Ok(response
            .get_mut(key)
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    /// Round trip an instantaneous command; false if anything went wrong.
    pub fn ping(&mut self) -> bool {
        let request = Value::Object(message::request(commands::SLEEP));
        match self.command.probe("ping", &request) {
            Ok(None) => true,
            Ok(Some(msg)) => {
                tracing::warn!("Ping of {} reported: {}", self.address, msg);
                false
            }
            Err(e) => {
                tracing::warn!("Ping of {} failed: {}", self.address, e);
                false
            }
        }
    }

    /// Ask the server to shut down.
    #[instrument(skip(self), fields(server = %self.address))]
    pub fn shutdown(&mut self) -> Result<()> {
        let request = Value::Object(message::request(commands::SHUTDOWN));
        self.command.call("shutdown", &request)?;

        // an empty packet on a fresh connection pushes the server out of
        // its accept loop
        let wakeup = Connection::connect(
            Arc::clone(&self.executor),
            &self.address,
            self.settings.connection_timeout(),
        )?;
        wakeup.write(&[])?;
        wakeup.close();
        Ok(())
    }

    /// Open the stream socket for `model_name`, replacing any open stream.
    /// `queue_depth` bounds the number of outstanding frames in pipelined
    /// mode; `config` holds extra model parameters (null or `{}` for none).
    pub fn open_stream(&mut self, model_name: &str, queue_depth: usize, config: &Value) -> Result<()> {
        self.close_stream();
        let stream = StreamChannel::open(
            Arc::clone(&self.executor),
            &self.address,
            self.settings.connection_timeout(),
            model_name,
            queue_depth,
            config,
        )?;
        self.stream = Some(stream);
        Ok(())
    }

    /// Drain any pipelined session and close the stream socket.
    pub fn close_stream(&mut self) {
        self.dispatcher.drain();
        if let Some(stream) = self.stream.take() {
            stream.close(self.settings.connection_timeout());
        }
    }

    /// Synchronous prediction: send one frame and wait for its result.
    pub fn predict_sync(&mut self, frames: &[Bytes]) -> Result<Value> {
        let stream = self
            .stream
            .as_ref()
            .ok_or(ClientError::NotConnected("predict"))?;
        if self.dispatcher.is_running() {
            return Err(ClientError::AlreadyRunning("predict"));
        }
        stream.predict(frames)
    }

    /// Install the callback receiving pipelined results. Only allowed
    /// between sessions.
    pub fn result_observe<F>(&mut self, callback: F) -> Result<()>
    where
        F: Fn(&Value, &str) + Send + Sync + 'static,
    {
        if self.dispatcher.is_running() {
            return Err(ClientError::AlreadyRunning("result_observe"));
        }
        self.callback = Some(Arc::new(callback));
        Ok(())
    }

    /// Submit one frame without waiting for its result. The first frame of
    /// a session starts the result receiving thread; [`Self::drain`] ends
    /// the session.
    #[instrument(level = "debug", skip(self, frames), fields(buffers = frames.len()))]
    pub fn send(&mut self, frames: &[Bytes], frame_info: &str) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or(ClientError::NotConnected("send"))?;
        let callback = self.callback.as_ref().ok_or(ClientError::NoObserver)?;
        self.dispatcher.submit(
            stream,
            frames,
            frame_info,
            callback,
            self.settings.inference_timeout(),
        )
    }

    /// No more frames are expected: wait for all outstanding results and
    /// stop the result receiving thread.
    pub fn drain(&mut self) {
        self.dispatcher.drain();
    }

    pub fn outstanding_count(&self) -> usize {
        self.dispatcher.monitor().outstanding_count()
    }

    pub fn last_error(&self) -> Option<String> {
        self.dispatcher.monitor().last_error()
    }

    /// Handle for observing the pipeline from other threads.
    pub fn monitor(&self) -> PipelineMonitor {
        self.dispatcher.monitor()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close_stream();
        self.command.close();
    }
}
