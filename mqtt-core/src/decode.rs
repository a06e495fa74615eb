use core::convert::TryFrom;
use core::str;

use nom::bytes::complete::{tag, take};
use nom::combinator::{map, map_opt};
use nom::multi::many1;
use nom::number::complete::{be_u16, be_u8};
use nom::sequence::tuple;
use nom::IResult;

use crate::error::DecodeError;
use crate::packet::*;

const CONTINUATION_BIT: u8 = 0x80;

/// Decodes an MQTT variable-length integer from the front of `input`.
///
/// Returns the number of bytes consumed and the decoded value. `Underflow` means the buffer ends
/// before a terminating byte (continuation bit clear) was seen; `MalformedVarint` means a fifth
/// byte was about to be read.
fn decode_varint(input: &[u8]) -> Result<(usize, usize), DecodeError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;

    for (consumed, &byte) in input.iter().enumerate() {
        value += usize::from(byte & !CONTINUATION_BIT) * multiplier;

        if byte & CONTINUATION_BIT == 0 {
            return Ok((consumed + 1, value));
        }

        if consumed + 1 >= 4 {
            return Err(DecodeError::MalformedVarint);
        }

        multiplier <<= 7;
    }

    Err(DecodeError::Underflow)
}

impl FixedHeader {
    /// Parses the packet-type/flags byte and the `remaining_len` varint from the front of
    /// `input`. Does not require the body to be present yet.
    fn decode(input: &[u8]) -> Result<(usize, Self), DecodeError> {
        let &first = input.first().ok_or(DecodeError::Underflow)?;

        let packet_type =
            Type::try_from((first >> 4) & 0x0F).map_err(|_| DecodeError::UnknownPacketType(first >> 4))?;
        let flags = first & 0x0F;

        if !FixedHeader::is_valid_flags(packet_type, flags) {
            return Err(DecodeError::InvalidFlags { packet_type, flags });
        }

        let (varint_len, remaining_len) = decode_varint(&input[1..])?;

        Ok((
            1 + varint_len,
            FixedHeader {
                packet_type,
                flags,
                remaining_len,
            },
        ))
    }
}

type NomError<'a> = (&'a [u8], nom::error::ErrorKind);
type BodyResult<'a, T> = IResult<&'a [u8], T, NomError<'a>>;

fn utf8_str(input: &[u8]) -> BodyResult<String> {
    let (input, len) = be_u16(input)?;
    let (input, bytes) = take(len)(input)?;
    // Tagged with `Char` specifically so callers can tell "not UTF-8" apart from other body
    // mismatches and report `DecodeError::InvalidUtf8` rather than a generic `Malformed` (§4.1).
    let s = str::from_utf8(bytes)
        .map_err(|_| nom::Err::Failure((input, nom::error::ErrorKind::Char)))?;
    Ok((input, s.to_owned()))
}

/// True when a failed body parse failed specifically because of [`utf8_str`]'s UTF-8 check.
fn is_utf8_failure(err: &nom::Err<NomError>) -> bool {
    matches!(
        err,
        nom::Err::Error((_, nom::error::ErrorKind::Char))
            | nom::Err::Failure((_, nom::error::ErrorKind::Char))
    )
}

fn binary(input: &[u8]) -> BodyResult<Vec<u8>> {
    let (input, len) = be_u16(input)?;
    let (input, bytes) = take(len)(input)?;
    Ok((input, bytes.to_vec()))
}

fn packet_id(input: &[u8]) -> BodyResult<PacketId> {
    be_u16(input)
}

fn qos(input: &[u8]) -> BodyResult<QoS> {
    map_opt(be_u8, QoS::from_bits)(input)
}

fn subscription(input: &[u8]) -> BodyResult<(String, QoS)> {
    tuple((utf8_str, qos))(input)
}

fn connect_body(body: &[u8]) -> BodyResult<Connect> {
    let (body, _) = tag(&[0x00, 0x04][..])(body)?;
    let (body, _) = tag(PROTOCOL_NAME)(body)?;
    let (body, level) = be_u8(body)?;
    if level != PROTOCOL_LEVEL {
        return Err(nom::Err::Failure((body, nom::error::ErrorKind::Verify)));
    }
    let (body, flags) = map_opt(be_u8, ConnectFlags::from_bits)(body)?;
    if flags.contains(ConnectFlags::RESERVED) {
        return Err(nom::Err::Failure((body, nom::error::ErrorKind::Verify)));
    }
    let (body, keep_alive_s) = be_u16(body)?;
    let (body, client_id) = utf8_str(body)?;

    let (body, will) = if flags.contains(ConnectFlags::WILL_PRESENT) {
        let (body, topic) = utf8_str(body)?;
        let (body, message) = binary(body)?;
        let qos = flags
            .will_qos()
            .ok_or_else(|| nom::Err::Failure((body, nom::error::ErrorKind::Verify)))?;
        (
            body,
            Some(Will {
                qos,
                retain: flags.contains(ConnectFlags::WILL_RETAIN),
                topic,
                message,
            }),
        )
    } else {
        (body, None)
    };

    let (body, username) = if flags.contains(ConnectFlags::USERNAME) {
        map(utf8_str, Some)(body)?
    } else {
        (body, None)
    };

    let (body, password) = if flags.contains(ConnectFlags::PASSWORD) {
        map(binary, Some)(body)?
    } else {
        (body, None)
    };

    Ok((
        body,
        Connect {
            client_id,
            clean_session: flags.contains(ConnectFlags::CLEAN_SESSION),
            keep_alive_s,
            username,
            password,
            will,
        },
    ))
}

fn decode_connect(body: &[u8]) -> Result<Connect, DecodeError> {
    match connect_body(body) {
        Ok((_, connect)) => Ok(connect),
        Err(ref err) if is_utf8_failure(err) => Err(DecodeError::InvalidUtf8),
        Err(_) => Err(DecodeError::UnsupportedProtocol),
    }
}

fn decode_connack(body: &[u8]) -> Result<Connack, DecodeError> {
    let parse = tuple((map_opt(be_u8, ConnackFlags::from_bits), be_u8))(body);

    match parse {
        Ok((_, (flags, return_code_byte))) => {
            let return_code = ConnectReturnCode::try_from(return_code_byte)
                .map_err(|_| DecodeError::Malformed("CONNACK return code"))?;
            Ok(Connack {
                session_present: flags.contains(ConnackFlags::SESSION_PRESENT),
                return_code,
            })
        }
        Err(_) => Err(DecodeError::Malformed("CONNACK")),
    }
}

fn publish_topic_and_id(qos: QoS, body: &[u8]) -> BodyResult<(String, Option<PacketId>)> {
    let (body, topic) = utf8_str(body)?;
    if qos > QoS::AtMostOnce {
        let (body, id) = packet_id(body)?;
        Ok((body, (topic, Some(id))))
    } else {
        Ok((body, (topic, None)))
    }
}

fn decode_publish(flags: u8, body: &[u8]) -> Result<Publish, DecodeError> {
    let flags = PublishFlags::from_bits_truncate(flags);
    let qos = flags.qos().ok_or(DecodeError::Malformed("PUBLISH qos"))?;

    match publish_topic_and_id(qos, body) {
        Ok((rest, (topic, packet_id))) => Ok(Publish {
            dup: flags.contains(PublishFlags::DUP),
            qos,
            retain: flags.contains(PublishFlags::RETAIN),
            topic,
            packet_id,
            payload: rest.to_vec(),
        }),
        Err(ref err) if is_utf8_failure(err) => Err(DecodeError::InvalidUtf8),
        Err(_) => Err(DecodeError::Malformed("PUBLISH")),
    }
}

macro_rules! decode_packet_id_only {
    ($name:ident, $t:ty, $label:literal) => {
        fn $name(body: &[u8]) -> Result<$t, DecodeError> {
            // `body` is already the bounded slice `decode()` carved out from `remaining_len`
            // (never more bytes will arrive for this packet), so a parse failure here is a
            // malformed packet, not an `Underflow` the caller should retry after more reads.
            match packet_id(body) {
                Ok((_, id)) => Ok(<$t>::from_packet_id(id)),
                Err(_) => Err(DecodeError::Malformed($label)),
            }
        }
    };
}

trait FromPacketId {
    fn from_packet_id(id: PacketId) -> Self;
}

macro_rules! impl_from_packet_id {
    ($t:ty) => {
        impl FromPacketId for $t {
            fn from_packet_id(packet_id: PacketId) -> Self {
                Self { packet_id }
            }
        }
    };
}

impl_from_packet_id!(Puback);
impl_from_packet_id!(Pubrec);
impl_from_packet_id!(Pubrel);
impl_from_packet_id!(Pubcomp);
impl_from_packet_id!(Unsuback);

decode_packet_id_only!(decode_puback, Puback, "PUBACK");
decode_packet_id_only!(decode_pubrec, Pubrec, "PUBREC");
decode_packet_id_only!(decode_pubrel, Pubrel, "PUBREL");
decode_packet_id_only!(decode_pubcomp, Pubcomp, "PUBCOMP");
decode_packet_id_only!(decode_unsuback, Unsuback, "UNSUBACK");

fn decode_subscribe(body: &[u8]) -> Result<Subscribe, DecodeError> {
    let parse = tuple((packet_id, many1(subscription)))(body);

    match parse {
        Ok((_, (packet_id, topics))) => Ok(Subscribe { packet_id, topics }),
        Err(ref err) if is_utf8_failure(err) => Err(DecodeError::InvalidUtf8),
        Err(_) => Err(DecodeError::Malformed("SUBSCRIBE")),
    }
}

fn decode_suback(body: &[u8]) -> Result<Suback, DecodeError> {
    let result_byte = map_opt(be_u8, SubscribeResult::from_byte);
    let parse = tuple((packet_id, many1(result_byte)))(body);

    match parse {
        Ok((_, (packet_id, results))) => Ok(Suback { packet_id, results }),
        Err(_) => Err(DecodeError::Malformed("SUBACK")),
    }
}

fn decode_unsubscribe(body: &[u8]) -> Result<Unsubscribe, DecodeError> {
    let parse = tuple((packet_id, many1(utf8_str)))(body);

    match parse {
        Ok((_, (packet_id, filters))) => Ok(Unsubscribe { packet_id, filters }),
        Err(ref err) if is_utf8_failure(err) => Err(DecodeError::InvalidUtf8),
        Err(_) => Err(DecodeError::Malformed("UNSUBSCRIBE")),
    }
}

/// Decodes exactly one packet from the front of `input`.
///
/// On success returns the number of bytes consumed. [`DecodeError::Underflow`] means `input` does
/// not yet hold a complete packet; the caller should retry once more bytes have arrived. Any other
/// error means the buffer is malformed and the connection cannot continue.
pub fn decode(input: &[u8]) -> Result<(usize, Packet), DecodeError> {
    let (header_len, header) = FixedHeader::decode(input)?;
    let total_len = header_len + header.remaining_len;

    if input.len() < total_len {
        return Err(DecodeError::Underflow);
    }

    let body = &input[header_len..total_len];

    let packet = match header.packet_type {
        Type::Connect => Packet::Connect(decode_connect(body)?),
        Type::Connack => Packet::Connack(decode_connack(body)?),
        Type::Publish => Packet::Publish(decode_publish(header.flags, body)?),
        Type::Puback => Packet::Puback(decode_puback(body)?),
        Type::Pubrec => Packet::Pubrec(decode_pubrec(body)?),
        Type::Pubrel => Packet::Pubrel(decode_pubrel(body)?),
        Type::Pubcomp => Packet::Pubcomp(decode_pubcomp(body)?),
        Type::Subscribe => Packet::Subscribe(decode_subscribe(body)?),
        Type::Suback => Packet::Suback(decode_suback(body)?),
        Type::Unsubscribe => Packet::Unsubscribe(decode_unsubscribe(body)?),
        Type::Unsuback => Packet::Unsuback(decode_unsuback(body)?),
        Type::Pingreq => Packet::Pingreq,
        Type::Pingresp => Packet::Pingresp,
        Type::Disconnect => Packet::Disconnect,
    };

    Ok((total_len, packet))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::WriteTo;

    fn roundtrip(packet: Packet) {
        let mut buf = Vec::new();
        let written = packet.encode(&mut buf).unwrap();
        assert_eq!(written, buf.len());

        let (consumed, decoded) = decode(&buf).unwrap();
        assert_eq!(consumed, written);
        assert_eq!(decoded, packet);
    }

    #[test]
    fn roundtrip_connect_minimal() {
        roundtrip(Packet::Connect(Connect {
            client_id: "client".into(),
            clean_session: true,
            keep_alive_s: 600,
            username: None,
            password: None,
            will: None,
        }));
    }

    #[test]
    fn roundtrip_connect_with_will_and_credentials() {
        roundtrip(Packet::Connect(Connect {
            client_id: "client-2".into(),
            clean_session: false,
            keep_alive_s: 30,
            username: Some("user".into()),
            password: Some(b"pass".to_vec()),
            will: Some(Will {
                qos: QoS::ExactlyOnce,
                retain: true,
                topic: "last/will".into(),
                message: b"bye".to_vec(),
            }),
        }));
    }

    #[test]
    fn roundtrip_connack() {
        roundtrip(Packet::Connack(Connack {
            session_present: false,
            return_code: ConnectReturnCode::Accepted,
        }));
        roundtrip(Packet::Connack(Connack {
            session_present: true,
            return_code: ConnectReturnCode::NotAuthorized,
        }));
    }

    #[test]
    fn roundtrip_publish_all_qos() {
        roundtrip(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: "bear_topic".into(),
            packet_id: None,
            payload: b"outgoing".to_vec(),
        }));
        roundtrip(Packet::Publish(Publish {
            dup: true,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: "t".into(),
            packet_id: Some(7),
            payload: b"incoming".to_vec(),
        }));
        roundtrip(Packet::Publish(Publish {
            dup: false,
            qos: QoS::ExactlyOnce,
            retain: true,
            topic: "t".into(),
            packet_id: Some(0xFFFF),
            payload: vec![],
        }));
    }

    #[test]
    fn roundtrip_acks() {
        roundtrip(Packet::Puback(Puback { packet_id: 1 }));
        roundtrip(Packet::Pubrec(Pubrec { packet_id: 2 }));
        roundtrip(Packet::Pubrel(Pubrel { packet_id: 3 }));
        roundtrip(Packet::Pubcomp(Pubcomp { packet_id: 4 }));
        roundtrip(Packet::Unsuback(Unsuback { packet_id: 5 }));
    }

    #[test]
    fn roundtrip_subscribe_and_suback() {
        roundtrip(Packet::Subscribe(Subscribe {
            packet_id: 0x1234,
            topics: vec![
                ("test".into(), QoS::AtLeastOnce),
                ("filter".into(), QoS::ExactlyOnce),
            ],
        }));
        roundtrip(Packet::Suback(Suback {
            packet_id: 0x1234,
            results: vec![
                SubscribeResult::Success(QoS::AtLeastOnce),
                SubscribeResult::Failure,
                SubscribeResult::Success(QoS::ExactlyOnce),
            ],
        }));
    }

    #[test]
    fn roundtrip_unsubscribe_and_control_packets() {
        roundtrip(Packet::Unsubscribe(Unsubscribe {
            packet_id: 0x4321,
            filters: vec!["test".into(), "filter".into()],
        }));
        roundtrip(Packet::Pingreq);
        roundtrip(Packet::Pingresp);
        roundtrip(Packet::Disconnect);
    }

    fn encode_varint(mut n: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        loop {
            let mut byte = (n & 0x7F) as u8;
            n >>= 7;
            if n > 0 {
                byte |= 0x80;
            }
            buf.push(byte);
            if n == 0 {
                break;
            }
        }
        buf
    }

    #[test]
    fn varint_boundaries_round_trip() {
        for &n in &[0usize, 127, 128, 16383, 16384, 2097151, 2097152, 268435455] {
            let buf = encode_varint(n);
            assert_eq!(decode_varint(&buf), Ok((buf.len(), n)));
        }
    }

    #[test]
    fn varint_rejects_fifth_continuation_byte() {
        assert_eq!(
            decode_varint(&[0xFF, 0xFF, 0xFF, 0xFF]),
            Err(DecodeError::MalformedVarint)
        );
    }

    #[test]
    fn varint_reports_underflow_on_truncated_buffer() {
        assert_eq!(decode_varint(&[0xFF, 0xFF]), Err(DecodeError::Underflow));
        assert_eq!(decode_varint(&[]), Err(DecodeError::Underflow));
    }

    #[test]
    fn decode_reports_underflow_on_partial_packet() {
        let mut buf = Vec::new();
        Packet::Pingreq.encode(&mut buf).unwrap();
        // A PINGREQ is exactly 2 bytes; truncate it.
        assert_eq!(decode(&buf[..1]), Err(DecodeError::Underflow));
    }

    #[test]
    fn decode_reports_underflow_when_body_not_yet_arrived() {
        let mut buf = Vec::new();
        Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: "t".into(),
            packet_id: None,
            payload: b"hello".to_vec(),
        })
        .encode(&mut buf)
        .unwrap();

        assert_eq!(decode(&buf[..buf.len() - 1]), Err(DecodeError::Underflow));
    }

    #[test]
    fn decode_rejects_unknown_packet_type() {
        assert_eq!(decode(&[0x00, 0x00]), Err(DecodeError::UnknownPacketType(0)));
        assert_eq!(decode(&[0xF0, 0x00]), Err(DecodeError::UnknownPacketType(15)));
    }

    #[test]
    fn decode_rejects_invalid_flags() {
        // CONNACK (type 2) must have flags == 0; 0x21 sets flag bit 0.
        assert_eq!(
            decode(&[0x21, 0x00]),
            Err(DecodeError::InvalidFlags {
                packet_type: Type::Connack,
                flags: 1,
            })
        );
    }

    #[test]
    fn decode_rejects_invalid_utf8_client_id() {
        let mut body = vec![0x00, 0x04];
        body.extend_from_slice(PROTOCOL_NAME);
        body.push(PROTOCOL_LEVEL);
        body.push(ConnectFlags::CLEAN_SESSION.bits());
        body.extend_from_slice(&[0x00, 0x3C]);
        body.extend_from_slice(&[0x00, 0x02, 0xFF, 0xFF]); // invalid UTF-8 client id

        let mut buf = Vec::new();
        buf.push((Type::Connect as u8) << 4);
        buf.extend_from_slice(&encode_varint(body.len()));
        buf.extend_from_slice(&body);

        assert_eq!(decode(&buf), Err(DecodeError::InvalidUtf8));
    }

    #[test]
    fn decode_rejects_connect_with_reserved_flag_bit_set() {
        let mut body = vec![0x00, 0x04];
        body.extend_from_slice(PROTOCOL_NAME);
        body.push(PROTOCOL_LEVEL);
        body.push(ConnectFlags::CLEAN_SESSION.bits() | ConnectFlags::RESERVED.bits());
        body.extend_from_slice(&[0x00, 0x3C]);
        body.extend_from_slice(&[0x00, 0x06]);
        body.extend_from_slice(b"client");

        let mut buf = Vec::new();
        buf.push((Type::Connect as u8) << 4);
        buf.extend_from_slice(&encode_varint(body.len()));
        buf.extend_from_slice(&body);

        assert_eq!(decode(&buf), Err(DecodeError::UnsupportedProtocol));
    }
}
