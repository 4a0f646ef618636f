use std::convert::TryFrom;
use std::str;

use nom::{
    bytes::complete::length_data,
    combinator::map_res,
    error::ErrorKind,
    number::complete::{be_u16, be_u8},
    Err as NomErr, IResult,
};

use crate::mqtt::{
    Connect, ConnectAck, ConnectAckFlags, ConnectFlags, ConnectReturnCode, Error, FixedHeader,
    LastWill, PacketId, Packet, Publish, PublishAck, PublishComplete, PublishFlags,
    PublishReceived, PublishRelease, QoS, Subscribe, SubscribeAck, SubscribeReturnCode, Type,
    Unsubscribe, UnsubscribeAck, PROTOCOL_LEVEL, PROTOCOL_NAME,
};

type Parsed<'a, T> = IResult<&'a [u8], T, (&'a [u8], ErrorKind)>;

fn binary_data(input: &[u8]) -> Parsed<&[u8]> {
    length_data(be_u16)(input)
}

fn utf8_str(input: &[u8]) -> Parsed<&str> {
    map_res(length_data(be_u16), str::from_utf8)(input)
}

fn malformed<T>(result: Result<T, NomErr<(&[u8], ErrorKind)>>, context: &'static str) -> Result<T, Error> {
    result.map_err(|_| Error::MalformedResponse(context))
}

/// Reads a four-byte base-128 variable-length integer. Returns `None`
/// once at least one more byte of input is required.
fn varint(input: &[u8]) -> Result<Option<(usize, usize)>, Error> {
    let mut value: usize = 0;
    for i in 0..4 {
        if i >= input.len() {
            return Ok(None);
        }
        let b = input[i];
        value |= usize::from(b & 0x7F) << (7 * i);
        if b & 0x80 == 0 {
            return Ok(Some((i + 1, value)));
        }
    }
    Err(Error::InvalidRemainingLength)
}

/// Reads a fixed header. Returns `Ok(None)` if `input` does not yet hold
/// a complete header.
pub fn unpack_fixed_header(input: &[u8]) -> Result<Option<(usize, FixedHeader)>, Error> {
    if input.is_empty() {
        return Ok(None);
    }
    let b = input[0];
    let packet_type = Type::try_from(b >> 4).map_err(|_| Error::UnknownControlType(b >> 4))?;
    let packet_flags = b & 0x0F;

    let (len, remaining_length) = match varint(&input[1..])? {
        Some((n, v)) => (n, v),
        None => return Ok(None),
    };

    if let Some(mandated) = packet_type.mandated_flags() {
        if packet_flags != mandated {
            return Err(Error::InvalidControlFlags {
                packet_type,
                flags: packet_flags,
            });
        }
    }

    Ok(Some((
        1 + len,
        FixedHeader {
            packet_type,
            packet_flags,
            remaining_length,
        },
    )))
}

fn parse_connect(body: &[u8]) -> Result<Connect, Error> {
    if body.len() < 2 + PROTOCOL_NAME.len() || &body[2..2 + PROTOCOL_NAME.len()] != PROTOCOL_NAME {
        return Err(Error::MalformedResponse("missing or invalid protocol name"));
    }
    let input = &body[2 + PROTOCOL_NAME.len()..];

    let (input, level) = malformed(be_u8(input), "protocol level")?;
    if level != PROTOCOL_LEVEL {
        return Err(Error::MalformedResponse("unsupported protocol level"));
    }
    let (input, flags_byte) = malformed(be_u8(input), "connect flags")?;
    let flags =
        ConnectFlags::from_bits(flags_byte).ok_or(Error::MalformedResponse("invalid connect flags"))?;
    if flags.contains(ConnectFlags::WILL) {
        flags.will_qos()?;
    }
    let (input, keep_alive) = malformed(be_u16(input), "keep alive")?;
    let (input, client_id) = malformed(utf8_str(input), "client id")?;

    let (input, last_will) = if flags.contains(ConnectFlags::WILL) {
        let (input, topic_name) = malformed(utf8_str(input), "will topic")?;
        let (input, message) = malformed(binary_data(input), "will message")?;
        (
            input,
            Some(LastWill {
                qos: flags.will_qos()?,
                retain: flags.contains(ConnectFlags::WILL_RETAIN),
                topic_name,
                message,
            }),
        )
    } else {
        (input, None)
    };

    let (input, user_name) = if flags.contains(ConnectFlags::USER_NAME) {
        let (input, s) = malformed(utf8_str(input), "user name")?;
        (input, Some(s))
    } else {
        (input, None)
    };

    let (input, password) = if flags.contains(ConnectFlags::PASSWORD) {
        let (input, p) = malformed(binary_data(input), "password")?;
        (input, Some(p))
    } else {
        (input, None)
    };

    if !input.is_empty() {
        return Err(Error::MalformedResponse("trailing bytes after connect"));
    }

    Ok(Connect {
        clean_session: flags.contains(ConnectFlags::CLEAN_SESSION),
        keep_alive,
        client_id,
        last_will,
        user_name,
        password,
    })
}

fn parse_connect_ack(body: &[u8]) -> Result<ConnectAck, Error> {
    if body.len() != 2 {
        return Err(Error::MalformedResponse("connack must be 2 bytes"));
    }
    let flags = ConnectAckFlags::from_bits(body[0])
        .ok_or(Error::MalformedResponse("invalid connack flags"))?;
    let return_code = ConnectReturnCode::try_from(body[1])
        .map_err(|_| Error::MalformedResponse("invalid connect return code"))?;
    Ok(ConnectAck {
        session_present: flags.contains(ConnectAckFlags::SESSION_PRESENT),
        return_code,
    })
}

fn parse_publish(body: &[u8], packet_flags: u8) -> Result<Publish, Error> {
    let flags = PublishFlags::from_bits_truncate(packet_flags);
    let dup = flags.contains(PublishFlags::DUP);
    let qos = flags.qos()?;
    let retain = flags.contains(PublishFlags::RETAIN);

    let (input, topic_name) = malformed(utf8_str(body), "publish topic")?;
    let (input, packet_id) = if qos != QoS::AtMostOnce {
        let (input, id) = malformed(be_u16(input), "publish packet id")?;
        (input, Some(id))
    } else {
        (input, None)
    };

    Ok(Publish {
        dup,
        qos,
        retain,
        topic_name,
        packet_id,
        payload: input,
    })
}

fn parse_packet_id(body: &[u8]) -> Result<PacketId, Error> {
    if body.len() != 2 {
        return Err(Error::MalformedResponse("expected a two-byte packet id"));
    }
    Ok(u16::from_be_bytes([body[0], body[1]]))
}

fn parse_subscribe(body: &[u8]) -> Result<Subscribe, Error> {
    let (mut input, packet_id) = malformed(be_u16(body), "subscribe packet id")?;
    let mut subscriptions = Vec::new();
    while !input.is_empty() {
        let (rest, filter) = malformed(utf8_str(input), "subscribe topic filter")?;
        let (rest, qos_byte) = malformed(be_u8(rest), "subscribe requested qos")?;
        let qos = QoS::try_from(qos_byte)
            .map_err(|_| Error::MalformedResponse("invalid requested qos"))?;
        subscriptions.push((filter, qos));
        input = rest;
    }
    if subscriptions.is_empty() {
        return Err(Error::MalformedResponse(
            "subscribe requires at least one topic filter",
        ));
    }
    Ok(Subscribe {
        packet_id,
        subscriptions,
    })
}

const SUBACK_FAILURE: u8 = 0x80;

fn parse_subscribe_ack(body: &[u8]) -> Result<SubscribeAck, Error> {
    if body.len() < 3 {
        return Err(Error::MalformedResponse("suback too short"));
    }
    let packet_id = u16::from_be_bytes([body[0], body[1]]);
    let mut status = Vec::with_capacity(body.len() - 2);
    for &code in &body[2..] {
        if code == SUBACK_FAILURE {
            status.push(SubscribeReturnCode::Failure);
        } else {
            let qos = QoS::try_from(code)
                .map_err(|_| Error::MalformedResponse("invalid suback return code"))?;
            status.push(SubscribeReturnCode::Success(qos));
        }
    }
    Ok(SubscribeAck { packet_id, status })
}

fn parse_unsubscribe(body: &[u8]) -> Result<Unsubscribe, Error> {
    let (mut input, packet_id) = malformed(be_u16(body), "unsubscribe packet id")?;
    let mut topic_filters = Vec::new();
    while !input.is_empty() {
        let (rest, filter) = malformed(utf8_str(input), "unsubscribe topic filter")?;
        topic_filters.push(filter);
        input = rest;
    }
    if topic_filters.is_empty() {
        return Err(Error::MalformedResponse(
            "unsubscribe requires at least one topic filter",
        ));
    }
    Ok(Unsubscribe {
        packet_id,
        topic_filters,
    })
}

/// Reads a single control packet. Returns `Ok(None)` if `input` does not
/// yet hold a complete packet.
pub fn unpack_packet(input: &[u8]) -> Result<Option<(usize, Packet)>, Error> {
    let (header_len, header) = match unpack_fixed_header(input)? {
        Some(v) => v,
        None => return Ok(None),
    };
    let total = header_len + header.remaining_length;
    if input.len() < total {
        return Ok(None);
    }
    let body = &input[header_len..total];

    let packet = match header.packet_type {
        Type::CONNECT => Packet::Connect(parse_connect(body)?),
        Type::CONNACK => Packet::ConnectAck(parse_connect_ack(body)?),
        Type::PUBLISH => Packet::Publish(parse_publish(body, header.packet_flags)?),
        Type::PUBACK => Packet::PublishAck(PublishAck {
            packet_id: parse_packet_id(body)?,
        }),
        Type::PUBREC => Packet::PublishReceived(PublishReceived {
            packet_id: parse_packet_id(body)?,
        }),
        Type::PUBREL => Packet::PublishRelease(PublishRelease {
            packet_id: parse_packet_id(body)?,
        }),
        Type::PUBCOMP => Packet::PublishComplete(PublishComplete {
            packet_id: parse_packet_id(body)?,
        }),
        Type::SUBSCRIBE => Packet::Subscribe(parse_subscribe(body)?),
        Type::SUBACK => Packet::SubscribeAck(parse_subscribe_ack(body)?),
        Type::UNSUBSCRIBE => Packet::Unsubscribe(parse_unsubscribe(body)?),
        Type::UNSUBACK => Packet::UnsubscribeAck(UnsubscribeAck {
            packet_id: parse_packet_id(body)?,
        }),
        Type::PINGREQ => {
            if !body.is_empty() {
                return Err(Error::MalformedResponse("pingreq must have no payload"));
            }
            Packet::Ping
        }
        Type::PINGRESP => {
            if !body.is_empty() {
                return Err(Error::MalformedResponse("pingresp must have no payload"));
            }
            Packet::Pong
        }
        Type::DISCONNECT => {
            if !body.is_empty() {
                return Err(Error::MalformedResponse("disconnect must have no payload"));
            }
            Packet::Disconnect
        }
    };

    log::trace!("unpacked {:?} ({} bytes)", header.packet_type, total);

    Ok(Some((total, packet)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpack_fixed_header() {
        assert_eq!(
            unpack_fixed_header(b"\x20\x7f").unwrap(),
            Some((
                2,
                FixedHeader {
                    packet_type: Type::CONNACK,
                    packet_flags: 0,
                    remaining_length: 127,
                }
            ))
        );

        assert_eq!(unpack_fixed_header(b"\x20").unwrap(), None, "incomplete header");
        assert_eq!(unpack_fixed_header(b"").unwrap(), None, "empty input");
    }

    #[test]
    fn test_unpack_fixed_header_invalid_flags() {
        let err = unpack_fixed_header(b"\x61\x00").unwrap_err();
        assert_eq!(
            err,
            Error::InvalidControlFlags {
                packet_type: Type::PUBREL,
                flags: 0x01,
            }
        );
    }

    #[test]
    fn test_unpack_suback() {
        let (n, packet) = unpack_packet(b"\x90\x05\x00\x84\x00\x01\x80")
            .unwrap()
            .unwrap();
        assert_eq!(n, 7);
        match packet {
            Packet::SubscribeAck(ack) => {
                assert_eq!(ack.packet_id, 132);
                assert_eq!(
                    ack.status,
                    vec![
                        SubscribeReturnCode::Success(QoS::AtMostOnce),
                        SubscribeReturnCode::Success(QoS::AtLeastOnce),
                        SubscribeReturnCode::Failure,
                    ]
                );
            }
            other => panic!("expected SubscribeAck, got {:?}", other),
        }
    }

    #[test]
    fn test_unpack_incomplete_body() {
        assert_eq!(
            unpack_packet(b"\x30\x0b\x00\x05topic").unwrap(),
            None,
            "fixed header complete but body truncated"
        );
    }

    #[test]
    fn test_unpack_connect_roundtrip() {
        let bytes = b"\x10\x10\x00\x04MQTT\x04\x00\x00\x78\x00\x04liam";
        let (n, packet) = unpack_packet(bytes).unwrap().unwrap();
        assert_eq!(n, bytes.len());
        match packet {
            Packet::Connect(connect) => {
                assert_eq!(connect.client_id, "liam");
                assert_eq!(connect.keep_alive, 120);
                assert!(!connect.clean_session);
            }
            other => panic!("expected Connect, got {:?}", other),
        }
    }
}
