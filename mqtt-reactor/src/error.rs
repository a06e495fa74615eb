//! The reactor's terminal error taxonomy (§7).

use thiserror::Error;

use mqtt_core::{ConnectReturnCode, DecodeError, EncodeError};

/// Tagged variant held by `Reactor::error` once the session has entered `ReactorState::Error`.
///
/// Every variant here is terminal: once set, the reactor rejects further API calls (§7).
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ReactorError {
    #[error("connect failed before a CONNACK was seen: {0}")]
    ConnectFailed(String),

    #[error("socket error: {0}")]
    SocketError(String),

    #[error("peer closed the connection")]
    PeerDisconnect,

    #[error("malformed packet: {0}")]
    MalformedPacket(#[from] DecodeError),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("broker refused CONNECT with return code {0:?}")]
    ConnackRefused(ConnectReturnCode),

    #[error("no PINGRESP within the keepalive response window")]
    KeepaliveTimeout,

    #[error("all 65535 packet ids are in flight")]
    TooManyInFlight,
}

/// Rejection of an application call against the reactor, distinct from [`ReactorError`]: these
/// do not put the reactor into the terminal `Error` state, they just refuse a call that does not
/// make sense right now (§4.3 Connected-only operations).
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CallError {
    #[error("reactor is not in the Connected state")]
    NotConnected,

    #[error("reactor session has already ended")]
    Terminated,

    #[error("publish payload does not fit the wire's remaining-length encoding: {0}")]
    PayloadTooLarge(#[from] EncodeError),

    #[error(transparent)]
    Reactor(#[from] ReactorError),
}
