use thiserror::Error;

/// Failures the decoder can report for a packet that cannot be encoded.
///
/// Every packet type is a plain struct whose fields satisfy the wire invariants in the data
/// model by construction of the caller (e.g. the reactor only ever builds a `Publish` with a
/// `packet_id` when `qos > 0`), so a caller hitting this indicates a programming error rather
/// than a recoverable condition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("remaining length {0} exceeds the maximum encodable varint (268435455)")]
    RemainingLengthTooLarge(usize),
}

/// Failures the decoder can report while parsing a byte buffer into a [`Packet`](crate::Packet).
///
/// [`DecodeError::Underflow`] is not a malformed-input error: it means the buffer does not yet
/// hold a complete packet and the caller should retry after more bytes arrive.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer ends before a complete packet could be parsed")]
    Underflow,

    #[error("variable-length integer uses more than 4 bytes")]
    MalformedVarint,

    #[error("fixed header names unknown packet type {0}")]
    UnknownPacketType(u8),

    #[error("fixed header flags {flags:#06b} are invalid for packet type {packet_type:?}")]
    InvalidFlags { packet_type: crate::packet::Type, flags: u8 },

    #[error("field is not valid UTF-8")]
    InvalidUtf8,

    #[error("CONNECT protocol name/level did not match MQTT 3.1.1")]
    UnsupportedProtocol,

    #[error("packet body is malformed: {0}")]
    Malformed(&'static str),
}
