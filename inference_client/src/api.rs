//! One-shot helpers and model handles built on [`Client`].
//!
//! `server` arguments take the form `"host[:port]"`; the port defaults to
//! 8778.

use crate::client::Client;
use crate::config::ClientSettings;
use crate::dispatcher::PipelineMonitor;
use crate::error::Result;
use bytes::Bytes;
use inference_proto::{message, ModelInfo, ModelQuery};
use serde_json::Value;

pub fn model_zoo_list(server: &str) -> Result<Vec<ModelInfo>> {
    Client::new(server)?.model_zoo_list()
}

pub fn system_info(server: &str) -> Result<Value> {
    Client::new(server)?.system_info()
}

pub fn trace_manage(server: &str, args: &Value) -> Result<Value> {
    Client::new(server)?.trace_manage(args)
}

pub fn model_zoo_manage(server: &str, args: &Value) -> Result<Value> {
    Client::new(server)?.model_zoo_manage(args)
}

pub fn shutdown(server: &str) -> Result<()> {
    Client::new(server)?.shutdown()
}

pub fn label_dictionary(server: &str, model_name: &str) -> Result<Value> {
    Client::new(server)?.label_dictionary(model_name)
}

/// First model on `server` matching `query`. Connection or protocol
/// failures are reported as "not found".
pub fn model_find(server: &str, query: &ModelQuery) -> Option<ModelInfo> {
    match model_zoo_list(server) {
        Ok(models) => query.find(&models).cloned(),
        Err(e) => {
            tracing::debug!("Model lookup on {} failed: {}", server, e);
            None
        }
    }
}

/// True when `server` answers a ping.
pub fn server_ping(server: &str) -> bool {
    Client::new(server).map(|mut client| client.ping()).unwrap_or(false)
}

/// Server-reported error message carried by a prediction result, if any.
pub fn error_check(result: &Value) -> Option<String> {
    message::error_check(result)
}

/// Synchronous model handle: every `predict` is a full round trip.
pub struct AiModel {
    client: Client,
}

impl AiModel {
    pub fn new(
        server: &str,
        model_name: &str,
        model_params: &Value,
        settings: ClientSettings,
    ) -> Result<Self> {
        let mut client = Client::with_settings(server, settings)?;
        client.open_stream(model_name, 0, model_params)?;
        Ok(Self { client })
    }

    pub fn predict(&mut self, frames: &[Bytes]) -> Result<Value> {
        self.client.predict_sync(frames)
    }
}

/// Pipelined model handle: results arrive on `callback` from a
/// background thread. Dropping the handle waits for outstanding results.
pub struct AiModelAsync {
    client: Client,
}

impl AiModelAsync {
    pub fn new<F>(
        server: &str,
        model_name: &str,
        model_params: &Value,
        frame_queue_depth: usize,
        settings: ClientSettings,
        callback: F,
    ) -> Result<Self>
    where
        F: Fn(&Value, &str) + Send + Sync + 'static,
    {
        let mut client = Client::with_settings(server, settings)?;
        client.open_stream(model_name, frame_queue_depth, model_params)?;
        client.result_observe(callback)?;
        Ok(Self { client })
    }

    /// Replace the result callback; fails while results are outstanding.
    pub fn set_callback<F>(&mut self, callback: F) -> Result<()>
    where
        F: Fn(&Value, &str) + Send + Sync + 'static,
    {
        self.client.result_observe(callback)
    }

    pub fn predict(&mut self, frames: &[Bytes], frame_info: &str) -> Result<()> {
        self.client.send(frames, frame_info)
    }

    /// Wait for every outstanding result.
    pub fn wait_completion(&mut self) {
        self.client.drain();
    }

    pub fn outstanding_count(&self) -> usize {
        self.client.outstanding_count()
    }

    pub fn last_error(&self) -> Option<String> {
        self.client.last_error()
    }

    pub fn monitor(&self) -> PipelineMonitor {
        self.client.monitor()
    }
}
