#![allow(dead_code)]

use inference_proto::framing::{read_frame_blocking, write_frame_blocking, HEADER_SIZE};
use inference_proto::message::encode_result;
use serde_json::{json, Value};
use std::io::{ErrorKind, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(5);
pub const QUIET: Duration = Duration::from_millis(300);

/// In-process stand-in for the AI server.
pub struct FakeServer {
    listener: TcpListener,
    pub address: String,
}

impl FakeServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
        Self { listener, address }
    }

    pub fn accept(&self) -> TcpStream {
        let (socket, _) = self.listener.accept().unwrap();
        socket.set_read_timeout(Some(WAIT)).unwrap();
        socket
    }
}

pub fn read_frame(socket: &mut TcpStream) -> Option<Vec<u8>> {
    read_frame_blocking(socket).unwrap()
}

pub fn read_json(socket: &mut TcpStream) -> Value {
    let frame = read_frame(socket).expect("expected a JSON frame");
    serde_json::from_slice(&frame).unwrap()
}

/// True when nothing arrives on `socket` for [`QUIET`].
pub fn stays_quiet(socket: &mut TcpStream) -> bool {
    socket.set_read_timeout(Some(QUIET)).unwrap();
    let quiet = match read_frame_blocking(socket) {
        Err(inference_proto::ProtocolError::Io(e)) => {
            matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
        }
        _ => false,
    };
    socket.set_read_timeout(Some(WAIT)).unwrap();
    quiet
}

/// Command reply stamped with the protocol version.
pub fn reply_json(socket: &mut TcpStream, mut reply: Value) {
    if let Some(map) = reply.as_object_mut() {
        map.entry("VERSION").or_insert(json!(4));
    }
    write_frame_blocking(socket, &serde_json::to_vec(&reply).unwrap()).unwrap();
}

pub fn reply_result(socket: &mut TcpStream, result: &Value) {
    write_frame_blocking(socket, &encode_result(result).unwrap()).unwrap();
}

/// Deliver a result with header and payload in separate network writes.
pub fn reply_result_split(socket: &mut TcpStream, result: &Value) {
    let payload = encode_result(result).unwrap();
    let header: [u8; HEADER_SIZE] = (payload.len() as u32).to_be_bytes();
    socket.write_all(&header).unwrap();
    socket.flush().unwrap();
    thread::sleep(Duration::from_millis(20));
    socket.write_all(&payload).unwrap();
    socket.flush().unwrap();
}

/// Poll `condition` until it holds or [`WAIT`] elapses.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
