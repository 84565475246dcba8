//! Pipelined frame submission and background result delivery.
//!
//! Frames are written by the caller's thread; results are read by one
//! dispatcher thread and matched to frames in send order. The server is
//! expected to answer in the order it received frames: a single ordered
//! TCP stream makes that hold, but nothing on the wire lets the client
//! verify it.

use crate::connection::Connection;
use crate::error::{ClientError, Result};
use crate::stream::StreamChannel;
use bytes::Bytes;
use inference_proto::message;
use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Receives each prediction result with the frame info passed to `send`.
pub type ResultCallback = Arc<dyn Fn(&Value, &str) + Send + Sync + 'static>;

#[derive(Default)]
struct PipelineState {
    frame_info: VecDeque<String>,
    stopped: bool,
    last_error: Option<String>,
}

/// State shared between the producer and the dispatcher thread.
#[derive(Default)]
struct Pipeline {
    state: Mutex<PipelineState>,
    waiter: Condvar,
    // written only while `state` is locked; read lock-free by monitors
    outstanding: AtomicUsize,
}

impl Pipeline {
    fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Latch a failure: stop the session and abandon every frame in flight.
    fn abort(&self, error: String) {
        {
            let mut state = self.state.lock();
            tracing::error!(
                abandoned = self.outstanding(),
                "Stopping result pipeline: {}",
                error
            );
            state.stopped = true;
            state.last_error = Some(error);
            state.frame_info.clear();
            self.outstanding.store(0, Ordering::SeqCst);
        }
        self.waiter.notify_all();
    }

    /// Dispatcher thread body.
    fn run(&self, connection: &Connection, callback: &ResultCallback, timeout: Duration) {
        loop {
            {
                let mut state = self.state.lock();
                self.waiter
                    .wait_while(&mut state, |state| self.outstanding() == 0 && !state.stopped);
                if self.outstanding() == 0 {
                    break;
                }
            }

            if let Err(e) = self.receive(connection, callback, timeout) {
                self.abort(e.to_string());
                break;
            }
        }
        tracing::debug!("Result receiving thread finished");
    }

    /// Read, attribute and deliver one result.
    fn receive(
        &self,
        connection: &Connection,
        callback: &ResultCallback,
        timeout: Duration,
    ) -> Result<()> {
        let size = match connection.read_header(timeout)? {
            Some(size) if size > 0 => size,
            _ => {
                return Err(ClientError::Transport(format!(
                    "server '{}' closed the stream with results outstanding",
                    connection.peer()
                )))
            }
        };
        let payload = connection.read_payload(size)?;
        let result = message::decode_result(&payload)?;
        let server_error = message::error_check(&result);

        let frame_info = {
            let mut state = self.state.lock();
            let frame_info = state.frame_info.pop_front().unwrap_or_default();
            match &server_error {
                Some(msg) => {
                    tracing::warn!(frame_info = %frame_info, "Server reported error: {}", msg);
                    state.stopped = true;
                    state.last_error = Some(msg.clone());
                    state.frame_info.clear();
                    self.outstanding.store(0, Ordering::SeqCst);
                }
                None => {
                    let outstanding = self.outstanding();
                    self.outstanding
                        .store(outstanding.saturating_sub(1), Ordering::SeqCst);
                }
            }
            self.waiter.notify_all();
            frame_info
        };

        tracing::debug!(frame_info = %frame_info, bytes = size, "Result received");
        if panic::catch_unwind(AssertUnwindSafe(|| callback(&result, &frame_info))).is_err() {
            tracing::warn!(frame_info = %frame_info, "Result callback panicked; result dropped");
        }
        Ok(())
    }
}

/// Read-only view of the pipeline, usable from any thread.
#[derive(Clone)]
pub struct PipelineMonitor {
    pipeline: Arc<Pipeline>,
}

impl PipelineMonitor {
    /// Frames sent whose result or error has not been attributed yet.
    pub fn outstanding_count(&self) -> usize {
        self.pipeline.outstanding()
    }

    /// Error that stopped the current or last session, if any.
    pub fn last_error(&self) -> Option<String> {
        self.pipeline.state.lock().last_error.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.pipeline.state.lock().stopped
    }
}

/// Producer side of the pipeline plus the dispatcher thread it starts.
#[derive(Default)]
pub(crate) struct Dispatcher {
    pipeline: Arc<Pipeline>,
    thread: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub(crate) fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    pub(crate) fn monitor(&self) -> PipelineMonitor {
        PipelineMonitor {
            pipeline: Arc::clone(&self.pipeline),
        }
    }

    /// Queue one frame. Blocks while `queue_depth` results are outstanding,
    /// at most `timeout`. Once the session has failed, frames are silently
    /// dropped until the session is drained.
    pub(crate) fn submit(
        &mut self,
        stream: &StreamChannel,
        frames: &[Bytes],
        frame_info: &str,
        callback: &ResultCallback,
        timeout: Duration,
    ) -> Result<()> {
        let pipeline = &self.pipeline;
        let connection = stream.connection();
        let queue_depth = stream.queue_depth();

        {
            let mut state = pipeline.state.lock();

            if self.thread.is_none() {
                // fresh session: forget the previous one
                *state = PipelineState::default();
                pipeline.outstanding.store(0, Ordering::SeqCst);
            }

            if state.stopped && state.last_error.is_some() {
                return Ok(());
            }

            if pipeline.outstanding() >= queue_depth {
                pipeline.waiter.wait_while_for(
                    &mut state,
                    |state| pipeline.outstanding() >= queue_depth && !state.stopped,
                    timeout,
                );
                if pipeline.outstanding() >= queue_depth && !state.stopped {
                    return Err(ClientError::Timeout(format!(
                        "Timeout waiting for inference response from server '{}'",
                        connection.peer()
                    )));
                }
            }

            if state.stopped && state.last_error.is_some() {
                return Ok(());
            }

            state.frame_info.push_back(frame_info.to_string());
            pipeline.outstanding.fetch_add(1, Ordering::SeqCst);
        }

        if let Err(e) = stream.write_frame(frames) {
            pipeline.abort(e.to_string());
            return Err(e);
        }
        tracing::debug!(frame_info = %frame_info, "Frame sent");

        if self.thread.is_none() {
            let pipeline = Arc::clone(&self.pipeline);
            let connection = Arc::clone(connection);
            let callback = Arc::clone(callback);
            let thread = thread::Builder::new()
                .name("inference-results".into())
                .spawn(move || pipeline.run(&connection, &callback, timeout))
                .map_err(|e| ClientError::Runtime(e.to_string()))?;
            self.thread = Some(thread);
        } else {
            self.pipeline.waiter.notify_all();
        }
        Ok(())
    }

    /// Stop accepting work, wait for every outstanding result, then join
    /// the dispatcher thread. Safe to call when nothing is running.
    pub(crate) fn drain(&mut self) {
        {
            let mut state = self.pipeline.state.lock();
            state.stopped = true;
        }
        self.pipeline.waiter.notify_all();

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Result receiving thread panicked");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.drain();
    }
}
