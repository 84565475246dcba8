//! Blocking TCP connections driven by a shared tokio runtime.
//!
//! Every blocking operation here is a single `block_on` of one future, so
//! the executor is left without pending work from the caller once the
//! call returns, and can be reused by later command calls or by the
//! result dispatcher.

use crate::error::{ClientError, Result};
use inference_proto::{framing, ServerAddress};
use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::error::Elapsed;

/// Event loop shared by every connection of one client.
pub struct Executor {
    runtime: Runtime,
}

impl Executor {
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("inference-client-io")
            .enable_all()
            .build()
            .map_err(|e| ClientError::Runtime(e.to_string()))?;
        Ok(Self { runtime })
    }

    /// Drive `future` to completion on the calling thread.
    pub fn run<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Drive `future` until it completes or `limit` elapses; on timeout
    /// the future is dropped, cancelling whatever it was waiting on.
    pub fn run_for<F: Future>(&self, limit: Duration, future: F) -> Result<F::Output, Elapsed> {
        self.runtime
            .block_on(async { tokio::time::timeout(limit, future).await })
    }

    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(future);
    }
}

/// One connected socket. Reads and writes may come from different threads;
/// each direction is serialized by its own lock.
pub struct Connection {
    executor: Arc<Executor>,
    peer: SocketAddr,
    open: AtomicBool,
    reader: AsyncMutex<Option<OwnedReadHalf>>,
    writer: Arc<AsyncMutex<Option<OwnedWriteHalf>>>,
}

impl Connection {
    /// Resolve `address` (IPv4 only) and connect within `timeout`.
    pub fn connect(
        executor: Arc<Executor>,
        address: &ServerAddress,
        timeout: Duration,
    ) -> Result<Self> {
        let target = address.clone();
        let attempt = async move {
            let mut last_error = None;
            for addr in lookup_host((target.host(), target.port()))
                .await?
                .filter(SocketAddr::is_ipv4)
            {
                match TcpStream::connect(addr).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) => last_error = Some(e),
                }
            }
            Err::<TcpStream, io::Error>(last_error.unwrap_or_else(|| {
                io::Error::new(ErrorKind::NotFound, format!("no IPv4 address for {}", target))
            }))
        };

        let stream = match executor.run_for(timeout, attempt) {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ClientError::Transport(format!(
                    "failed to connect to {}: {}",
                    address, e
                )))
            }
            Err(_) => {
                return Err(ClientError::Timeout(format!(
                    "connection to {} was not established within {:?}",
                    address, timeout
                )))
            }
        };

        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        tracing::debug!(%peer, "Connected");

        Ok(Self {
            executor,
            peer,
            open: AtomicBool::new(true),
            reader: AsyncMutex::new(Some(reader)),
            writer: Arc::new(AsyncMutex::new(Some(writer))),
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn closed(&self) -> ClientError {
        ClientError::Transport(format!("connection to {} is closed", self.peer))
    }

    /// Write one framed message, blocking until it is handed to the socket.
    pub fn write(&self, payload: &[u8]) -> Result<()> {
        self.executor.run(async {
            let mut writer = self.writer.lock().await;
            let writer = writer.as_mut().ok_or_else(|| self.closed())?;
            framing::write_frame(writer, payload).await?;
            Ok::<_, ClientError>(())
        })
    }

    /// Queue a framed write on the event loop and return immediately.
    ///
    /// A write still unfinished after `limit` is abandoned and gives up the
    /// write half: the stream may hold a partial frame.
    pub fn write_async(&self, payload: Vec<u8>, limit: Duration) -> WriteHandle {
        let handle = WriteHandle::pending();
        let progress = Arc::clone(&handle.progress);
        let writer = Arc::clone(&self.writer);
        let peer = self.peer;

        self.executor.spawn(async move {
            let mut guard = writer.lock().await;
            let written = match guard.as_mut() {
                Some(half) => {
                    Some(tokio::time::timeout(limit, framing::write_frame(half, &payload)).await)
                }
                None => None,
            };
            let outcome = match written {
                Some(Ok(result)) => result.map_err(|e| e.to_string()),
                Some(Err(_)) => {
                    guard.take();
                    Err(format!("write to {} did not complete within {:?}", peer, limit))
                }
                None => Err(format!("connection to {} is closed", peer)),
            };
            if let Err(ref e) = outcome {
                tracing::debug!(%peer, "Asynchronous write failed: {}", e);
            }
            progress.finish(outcome);
        });

        handle
    }

    /// Read one framed message. `None` means the peer ended the stream.
    pub fn read(&self) -> Result<Option<Vec<u8>>> {
        self.executor.run(async {
            let mut reader = self.reader.lock().await;
            let reader = reader.as_mut().ok_or_else(|| self.closed())?;
            Ok::<_, ClientError>(framing::read_frame(reader).await?)
        })
    }

    /// Wait at most `timeout` for the next message header and return the
    /// announced payload size.
    pub fn read_header(&self, timeout: Duration) -> Result<Option<u32>> {
        let header = self.executor.run_for(timeout, async {
            let mut reader = self.reader.lock().await;
            let reader = reader.as_mut().ok_or_else(|| self.closed())?;
            Ok::<_, ClientError>(framing::read_header(reader).await?)
        });
        header.map_err(|_| {
            ClientError::Timeout(format!(
                "no inference response from server '{}' within {:?}",
                self.peer, timeout
            ))
        })?
    }

    /// Complete a read whose size is already known from [`Self::read_header`].
    pub fn read_payload(&self, size: u32) -> Result<Vec<u8>> {
        self.executor.run(async {
            let mut reader = self.reader.lock().await;
            let reader = reader.as_mut().ok_or_else(|| self.closed())?;
            Ok::<_, ClientError>(framing::read_payload(reader, size).await?)
        })
    }

    /// Shut down both directions and release the socket. Safe to call
    /// more than once.
    pub fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }

        self.executor.run(async {
            match self.writer.try_lock() {
                Ok(mut writer) => {
                    if let Some(mut writer) = writer.take() {
                        if let Err(e) = writer.shutdown().await {
                            tracing::debug!(peer = %self.peer, "Socket shutdown failed: {}", e);
                        }
                    }
                }
                // an asynchronous write owns the half; it releases it
                // once its time limit runs out
                Err(_) => tracing::debug!(peer = %self.peer, "Write in progress during close"),
            }
            self.reader.lock().await.take();
        });
        tracing::debug!(peer = %self.peer, "Connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

enum WriteState {
    Pending,
    Flushed,
    Failed(String),
}

struct WriteProgress {
    state: Mutex<WriteState>,
    done: Condvar,
}

impl WriteProgress {
    fn finish(&self, outcome: std::result::Result<(), String>) {
        let mut state = self.state.lock();
        *state = match outcome {
            Ok(()) => WriteState::Flushed,
            Err(e) => WriteState::Failed(e),
        };
        self.done.notify_all();
    }
}

/// Completion handle of [`Connection::write_async`].
pub struct WriteHandle {
    progress: Arc<WriteProgress>,
}

impl WriteHandle {
    fn pending() -> Self {
        Self {
            progress: Arc::new(WriteProgress {
                state: Mutex::new(WriteState::Pending),
                done: Condvar::new(),
            }),
        }
    }

    /// Whether every byte was flushed, waiting up to `timeout`.
    /// A zero timeout polls without waiting.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut state = self.progress.state.lock();
        if !timeout.is_zero() {
            self.progress.done.wait_while_for(
                &mut state,
                |state| matches!(state, WriteState::Pending),
                timeout,
            );
        }
        matches!(*state, WriteState::Flushed)
    }

    /// Error reported by a failed write, if any.
    pub fn error(&self) -> Option<String> {
        match &*self.progress.state.lock() {
            WriteState::Failed(e) => Some(e.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inference_proto::framing::{read_frame_blocking, write_frame_blocking};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Instant;

    fn local_server() -> (TcpListener, ServerAddress) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, ServerAddress::new("127.0.0.1", port))
    }

    #[test]
    fn test_write_then_read_through_echo_server() {
        let (listener, address) = local_server();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            while let Some(frame) = read_frame_blocking(&mut socket).unwrap() {
                write_frame_blocking(&mut socket, &frame).unwrap();
            }
        });

        let executor = Arc::new(Executor::new().unwrap());
        let connection = Connection::connect(executor, &address, Duration::from_secs(5)).unwrap();
        connection.write(b"ping").unwrap();
        assert_eq!(connection.read().unwrap().as_deref(), Some(&b"ping"[..]));

        let handle = connection.write_async(b"async".to_vec(), Duration::from_secs(5));
        assert!(handle.wait(Duration::from_secs(5)));
        assert_eq!(connection.read_header(Duration::from_secs(5)).unwrap(), Some(5));
        assert_eq!(connection.read_payload(5).unwrap(), b"async");

        connection.write(b"").unwrap();
        connection.close();
        server.join().unwrap();
    }

    #[test]
    fn test_close_is_idempotent_and_fails_later_operations() {
        let (listener, address) = local_server();
        let server = thread::spawn(move || listener.accept().map(|_| ()));

        let executor = Arc::new(Executor::new().unwrap());
        let connection = Connection::connect(executor, &address, Duration::from_secs(5)).unwrap();
        server.join().unwrap().unwrap();

        connection.close();
        connection.close();
        assert!(!connection.is_open());
        assert!(matches!(connection.write(b"x"), Err(ClientError::Transport(_))));
        assert!(matches!(connection.read(), Err(ClientError::Transport(_))));
        let handle = connection.write_async(b"x".to_vec(), Duration::from_secs(5));
        assert!(!handle.wait(Duration::from_secs(5)));
        assert!(handle.error().is_some());
    }

    #[test]
    fn test_refused_connection_is_a_transport_error() {
        let (listener, address) = local_server();
        drop(listener);

        let executor = Arc::new(Executor::new().unwrap());
        let result = Connection::connect(executor, &address, Duration::from_secs(5));
        assert!(matches!(result, Err(ClientError::Transport(_))));
    }

    #[test]
    fn test_silent_server_times_out_header_read() {
        let (listener, address) = local_server();
        let server = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(500));
            drop(socket);
        });

        let executor = Arc::new(Executor::new().unwrap());
        let connection = Connection::connect(executor, &address, Duration::from_secs(5)).unwrap();
        let result = connection.read_header(Duration::from_millis(50));
        assert!(matches!(result, Err(ClientError::Timeout(_))));
        server.join().unwrap();
    }

    #[test]
    fn test_zero_timeout_wait_polls() {
        let pending = WriteHandle::pending();
        let started = Instant::now();
        assert!(!pending.wait(Duration::ZERO));
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(pending.error().is_none());

        let (listener, address) = local_server();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            read_frame_blocking(&mut socket).unwrap()
        });

        let executor = Arc::new(Executor::new().unwrap());
        let connection = Connection::connect(executor, &address, Duration::from_secs(5)).unwrap();
        let handle = connection.write_async(b"frame".to_vec(), Duration::from_secs(5));
        assert!(handle.wait(Duration::from_secs(5)));
        assert!(handle.wait(Duration::ZERO));
        assert_eq!(server.join().unwrap().as_deref(), Some(&b"frame"[..]));
    }

    #[test]
    fn test_stalled_async_write_releases_write_half() {
        let (listener, address) = local_server();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        let server = thread::spawn(move || {
            // accept but never read
            let (socket, _) = listener.accept().unwrap();
            let _ = done_rx.recv_timeout(Duration::from_secs(10));
            drop(socket);
        });

        let executor = Arc::new(Executor::new().unwrap());
        let connection = Connection::connect(executor, &address, Duration::from_secs(5)).unwrap();
        let handle = connection.write_async(vec![0u8; 64 * 1024 * 1024], Duration::from_millis(200));
        assert!(!handle.wait(Duration::from_secs(5)));
        assert!(handle.error().unwrap().contains("did not complete"));

        let started = Instant::now();
        assert!(matches!(connection.write(b"x"), Err(ClientError::Transport(_))));
        connection.close();
        assert!(started.elapsed() < Duration::from_secs(1));

        let _ = done_tx.send(());
        server.join().unwrap();
    }
}
