//! The abstract byte-stream transport the reactor drives (§6).
//!
//! Mirrors the teacher's `io::{Sender, Receiver, TryClone}` split of session logic away from a
//! concrete `TcpStream`, generalized to the nonblocking connect/send/recv triad the state machine
//! needs instead of blocking `Read`/`Write`.

use std::fmt;

/// Outcome of a nonblocking `connect` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    /// The connection completed synchronously (rare for a nonblocking socket, but legal).
    Connected,
    /// The connection is in progress; caller must wait for writability and check `SO_ERROR`.
    InProgress,
}

/// Outcome of a nonblocking `send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// `n` (always `> 0`) bytes were accepted by the transport.
    Sent(usize),
    /// The transport would block; no bytes were accepted. The caller keeps its buffer.
    WouldBlock,
    /// The transport reported a `0`-byte write without `EAGAIN`: a closed connection.
    Closed,
}

/// Outcome of a nonblocking `recv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvStatus {
    /// `bytes` were read from the peer.
    Data(Vec<u8>),
    /// The peer performed an orderly close (`recv` returned 0).
    Closed,
    /// The transport would block; no bytes are available yet.
    WouldBlock,
}

/// An opaque OS-level socket error, carrying just enough to log and to classify (§7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketError(pub String);

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for SocketError {}

/// The nonblocking byte-stream contract the reactor core is generic over (§6).
///
/// Implementations never block the caller: `send`/`recv` report [`SendStatus::WouldBlock`] /
/// [`RecvStatus::WouldBlock`] instead of blocking, matching `EAGAIN`/`EWOULDBLOCK` on a real
/// nonblocking socket.
pub trait Socket {
    /// Initiates a connection to `endpoint`. Real nonblocking sockets return `InProgress`
    /// immediately; `so_error` is polled afterwards to discover the eventual outcome.
    fn connect(&mut self, endpoint: &(String, u16)) -> Result<ConnectStatus, SocketError>;

    /// Best-effort write of `bytes`. Returns how many bytes were actually accepted; a short write
    /// is legal and the caller is responsible for retrying with the unsent remainder.
    fn send(&mut self, bytes: &[u8]) -> Result<SendStatus, SocketError>;

    /// Best-effort read of up to `max` bytes.
    fn recv(&mut self, max: usize) -> Result<RecvStatus, SocketError>;

    /// `SO_ERROR`, consulted once a nonblocking `connect` becomes writable.
    fn take_error(&mut self) -> Result<Option<SocketError>, SocketError>;

    fn close(&mut self);
}
