use bitflags::bitflags;
use num_enum::TryFromPrimitive;

/// MQTT Control Packet type, the high nibble of the fixed header's first byte.
#[repr(u8)]
#[derive(Debug, Eq, PartialEq, Copy, Clone, TryFromPrimitive)]
pub enum Type {
    Connect = 1,
    Connack = 2,
    Publish = 3,
    Puback = 4,
    Pubrec = 5,
    Pubrel = 6,
    Pubcomp = 7,
    Subscribe = 8,
    Suback = 9,
    Unsubscribe = 10,
    Unsuback = 11,
    Pingreq = 12,
    Pingresp = 13,
    Disconnect = 14,
}

pub const PROTOCOL_NAME: &[u8] = b"MQTT";
pub const PROTOCOL_LEVEL: u8 = 0x04;

/// Quality of Service levels.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, TryFromPrimitive)]
pub enum QoS {
    /// At most once delivery: fire and forget, no packet id, no ack.
    AtMostOnce = 0,
    /// At least once delivery: acknowledged by a single Puback.
    AtLeastOnce = 1,
    /// Exactly once delivery: the four-packet Pubrec/Pubrel/Pubcomp handshake.
    ExactlyOnce = 2,
}

impl QoS {
    pub fn from_bits(bits: u8) -> Option<Self> {
        Self::try_from(bits).ok()
    }
}

/// Packet Identifier correlating a request with its acknowledgement.
pub type PacketId = u16;

/// Each Control Packet contains a fixed header.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct FixedHeader {
    pub packet_type: Type,
    pub flags: u8,
    pub remaining_len: usize,
}

impl FixedHeader {
    /// True when `flags` matches the mask mandated for `packet_type` (§3).
    pub fn is_valid_flags(packet_type: Type, flags: u8) -> bool {
        match packet_type {
            Type::Publish => flags <= 0x0F,
            Type::Pubrel | Type::Subscribe | Type::Unsubscribe => flags == 0x02,
            _ => flags == 0,
        }
    }
}

bitflags! {
    /// Connect Flags byte.
    #[derive(Default)]
    pub struct ConnectFlags: u8 {
        const USERNAME      = 0b1000_0000;
        const PASSWORD      = 0b0100_0000;
        const WILL_RETAIN   = 0b0010_0000;
        const WILL_QOS      = 0b0001_1000;
        const WILL_PRESENT  = 0b0000_0100;
        const CLEAN_SESSION = 0b0000_0010;
        const RESERVED      = 0b0000_0001;
    }
}

const WILL_QOS_SHIFT: u8 = 3;

impl ConnectFlags {
    pub fn will_qos(self) -> Option<QoS> {
        QoS::from_bits((self & Self::WILL_QOS).bits() >> WILL_QOS_SHIFT)
    }
}

impl From<QoS> for ConnectFlags {
    fn from(qos: QoS) -> Self {
        Self::from_bits_truncate((qos as u8) << WILL_QOS_SHIFT)
    }
}

bitflags! {
    /// Connack flags byte: only the session-present bit is defined.
    #[derive(Default)]
    pub struct ConnackFlags: u8 {
        const SESSION_PRESENT = 0b0000_0001;
    }
}

bitflags! {
    /// Publish flags, packed into the fixed header's low nibble.
    #[derive(Default)]
    pub struct PublishFlags: u8 {
        const RETAIN = 0b0000_0001;
        const QOS    = 0b0000_0110;
        const DUP    = 0b0000_1000;
    }
}

const PUBLISH_QOS_SHIFT: u8 = 1;

impl PublishFlags {
    pub fn qos(self) -> Option<QoS> {
        QoS::from_bits((self & Self::QOS).bits() >> PUBLISH_QOS_SHIFT)
    }
}

impl From<QoS> for PublishFlags {
    fn from(qos: QoS) -> Self {
        Self::from_bits_truncate((qos as u8) << PUBLISH_QOS_SHIFT)
    }
}

/// The message the broker publishes on behalf of the client upon ungraceful disconnect.
#[derive(Debug, PartialEq, Clone)]
pub struct Will {
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    pub message: Vec<u8>,
}

/// Connect Return Code (§4.1).
#[repr(u8)]
#[derive(Debug, Eq, PartialEq, Copy, Clone, TryFromPrimitive)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUserNameOrPassword = 4,
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    pub fn is_accepted(self) -> bool {
        matches!(self, ConnectReturnCode::Accepted)
    }
}

/// A per-filter outcome of a Subscribe request.
#[derive(Debug, PartialEq, Copy, Clone)]
pub enum SubscribeResult {
    Success(QoS),
    Failure,
}

impl SubscribeResult {
    const FAILURE_BYTE: u8 = 0x80;
    const QOS_MASK: u8 = 0x03;

    pub fn from_byte(b: u8) -> Option<Self> {
        if b & Self::FAILURE_BYTE != 0 {
            Some(SubscribeResult::Failure)
        } else {
            QoS::from_bits(b & Self::QOS_MASK).map(SubscribeResult::Success)
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            SubscribeResult::Success(qos) => qos as u8,
            SubscribeResult::Failure => Self::FAILURE_BYTE,
        }
    }
}

/// Client request to connect to the server.
#[derive(Debug, PartialEq, Clone)]
pub struct Connect {
    pub client_id: String,
    pub clean_session: bool,
    pub keep_alive_s: u16,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    pub will: Option<Will>,
}

/// Connect acknowledgment.
#[derive(Debug, PartialEq, Clone)]
pub struct Connack {
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

/// Publish message, carried in both directions.
#[derive(Debug, PartialEq, Clone)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    pub packet_id: Option<PacketId>,
    pub payload: Vec<u8>,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Puback {
    pub packet_id: PacketId,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Pubrec {
    pub packet_id: PacketId,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Pubrel {
    pub packet_id: PacketId,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Pubcomp {
    pub packet_id: PacketId,
}

/// Client subscribe request: a non-empty set of (topic filter, requested QoS) pairs.
#[derive(Debug, PartialEq, Clone)]
pub struct Subscribe {
    pub packet_id: PacketId,
    pub topics: Vec<(String, QoS)>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Suback {
    pub packet_id: PacketId,
    pub results: Vec<SubscribeResult>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Unsubscribe {
    pub packet_id: PacketId,
    pub filters: Vec<String>,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Unsuback {
    pub packet_id: PacketId,
}

/// MQTT Control Packets, closed over the 14 types defined by 3.1.1.
#[derive(Debug, PartialEq, Clone)]
pub enum Packet {
    Connect(Connect),
    Connack(Connack),
    Publish(Publish),
    Puback(Puback),
    Pubrec(Pubrec),
    Pubrel(Pubrel),
    Pubcomp(Pubcomp),
    Subscribe(Subscribe),
    Suback(Suback),
    Unsubscribe(Unsubscribe),
    Unsuback(Unsuback),
    Pingreq,
    Pingresp,
    Disconnect,
}

impl Packet {
    pub fn packet_type(&self) -> Type {
        match self {
            Packet::Connect(_) => Type::Connect,
            Packet::Connack(_) => Type::Connack,
            Packet::Publish(_) => Type::Publish,
            Packet::Puback(_) => Type::Puback,
            Packet::Pubrec(_) => Type::Pubrec,
            Packet::Pubrel(_) => Type::Pubrel,
            Packet::Pubcomp(_) => Type::Pubcomp,
            Packet::Subscribe(_) => Type::Subscribe,
            Packet::Suback(_) => Type::Suback,
            Packet::Unsubscribe(_) => Type::Unsubscribe,
            Packet::Unsuback(_) => Type::Unsuback,
            Packet::Pingreq => Type::Pingreq,
            Packet::Pingresp => Type::Pingresp,
            Packet::Disconnect => Type::Disconnect,
        }
    }
}
