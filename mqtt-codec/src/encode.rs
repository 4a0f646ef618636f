use crate::mqtt::{
    Connect, ConnectAck, ConnectAckFlags, ConnectFlags, Error, FixedHeader, LastWill,
    PacketId, Packet, Publish, PublishAck, PublishComplete, PublishFlags, PublishReceived,
    PublishRelease, QoS, Subscribe, SubscribeAck, Type, Unsubscribe, UnsubscribeAck,
    MAX_REMAINING_LENGTH, PROTOCOL_LEVEL, PROTOCOL_NAME,
};

fn varint_len(mut n: usize) -> usize {
    let mut len = 1;
    while n >= 0x80 {
        n >>= 7;
        len += 1;
    }
    len
}

/// Writes `n` as a base-128 variable-length integer into `buf`, which the
/// caller must have already sized via [`varint_len`]. Returns the number
/// of bytes written.
fn put_varint(buf: &mut [u8], mut n: usize) -> usize {
    let mut i = 0;
    loop {
        let mut b = (n & 0x7F) as u8;
        n >>= 7;
        if n > 0 {
            b |= 0x80;
        }
        buf[i] = b;
        i += 1;
        if n == 0 {
            break;
        }
    }
    i
}

fn put_u16(buf: &mut [u8], v: u16) {
    buf[0] = (v >> 8) as u8;
    buf[1] = v as u8;
}

fn put_utf8_str(buf: &mut [u8], s: &str) -> usize {
    put_u16(buf, s.len() as u16);
    buf[2..2 + s.len()].copy_from_slice(s.as_bytes());
    2 + s.len()
}

fn put_binary(buf: &mut [u8], data: &[u8]) -> usize {
    put_u16(buf, data.len() as u16);
    buf[2..2 + data.len()].copy_from_slice(data);
    2 + data.len()
}

/// Packs a fixed header alone. Returns `Ok(0)` if `buf` is too short for
/// the header bytes.
pub fn pack_fixed_header(buf: &mut [u8], header: FixedHeader) -> Result<usize, Error> {
    if header.remaining_length > MAX_REMAINING_LENGTH {
        return Err(Error::InvalidRemainingLength);
    }
    if let Some(mandated) = header.packet_type.mandated_flags() {
        if header.packet_flags != mandated {
            return Err(Error::InvalidControlFlags {
                packet_type: header.packet_type,
                flags: header.packet_flags,
            });
        }
    }
    let len = 1 + varint_len(header.remaining_length);
    if buf.len() < len {
        return Ok(0);
    }
    buf[0] = ((header.packet_type as u8) << 4) | header.packet_flags;
    put_varint(&mut buf[1..], header.remaining_length);
    Ok(len)
}

/// Writes the fixed header followed by a body of `body_len` bytes
/// produced by `write_body`, or returns `Ok(0)` if `buf` is too small for
/// the whole packet. `write_body` is only invoked once enough room has
/// been confirmed.
fn pack_with_header(
    buf: &mut [u8],
    packet_type: Type,
    flags: u8,
    body_len: usize,
    write_body: impl FnOnce(&mut [u8]),
) -> Result<usize, Error> {
    if body_len > MAX_REMAINING_LENGTH {
        return Err(Error::InvalidRemainingLength);
    }
    let header_len = 1 + varint_len(body_len);
    let total = header_len + body_len;
    if buf.len() < total {
        log::debug!("buffer too small to pack {:?}: need {}, have {}", packet_type, total, buf.len());
        return Ok(0);
    }
    buf[0] = ((packet_type as u8) << 4) | flags;
    put_varint(&mut buf[1..header_len], body_len);
    write_body(&mut buf[header_len..total]);
    Ok(total)
}

fn connect_size(connect: &Connect) -> usize {
    2 + PROTOCOL_NAME.len() // length-prefixed protocol name
        + 1 // protocol level
        + 1 // connect flags
        + 2 // keep alive
        + 2 + connect.client_id.len()
        + connect
            .last_will
            .as_ref()
            .map_or(0, |w| 2 + w.topic_name.len() + 2 + w.message.len())
        + connect.user_name.map_or(0, |s| 2 + s.len())
        + connect.password.map_or(0, |p| 2 + p.len())
}

/// Packs a CONNECT packet.
pub fn pack_connect(buf: &mut [u8], connect: &Connect) -> Result<usize, Error> {
    if connect.password.is_some() && connect.user_name.is_none() {
        return Err(Error::InvalidArgument("password requires a user name"));
    }
    let size = connect_size(connect);
    pack_with_header(buf, Type::CONNECT, 0, size, |body| {
        let mut off = put_utf8_str(body, std::str::from_utf8(PROTOCOL_NAME).unwrap());
        body[off] = PROTOCOL_LEVEL;
        off += 1;
        let flags_off = off;
        off += 1;
        put_u16(&mut body[off..], connect.keep_alive);
        off += 2;
        off += put_utf8_str(&mut body[off..], connect.client_id);

        let mut flags = ConnectFlags::empty();
        if let Some(ref will) = connect.last_will {
            flags |= ConnectFlags::WILL;
            flags |= ConnectFlags::from(will.qos);
            if will.retain {
                flags |= ConnectFlags::WILL_RETAIN;
            }
            off += put_utf8_str(&mut body[off..], will.topic_name);
            off += put_binary(&mut body[off..], will.message);
        }
        if let Some(user_name) = connect.user_name {
            flags |= ConnectFlags::USER_NAME;
            off += put_utf8_str(&mut body[off..], user_name);
        }
        if let Some(password) = connect.password {
            flags |= ConnectFlags::PASSWORD;
            off += put_binary(&mut body[off..], password);
        }
        if connect.clean_session {
            flags |= ConnectFlags::CLEAN_SESSION;
        }
        body[flags_off] = flags.bits();
        let _ = off;
    })
}

/// Packs a CONNACK packet.
pub fn pack_connect_ack(buf: &mut [u8], ack: &ConnectAck) -> Result<usize, Error> {
    pack_with_header(buf, Type::CONNACK, 0, 2, |body| {
        body[0] = if ack.session_present {
            ConnectAckFlags::SESSION_PRESENT.bits()
        } else {
            0
        };
        body[1] = ack.return_code as u8;
    })
}

fn publish_size(publish: &Publish) -> usize {
    2 + publish.topic_name.len()
        + publish.packet_id.map_or(0, |_| 2)
        + publish.payload.len()
}

/// Packs a PUBLISH packet.
pub fn pack_publish(buf: &mut [u8], publish: &Publish) -> Result<usize, Error> {
    if publish.qos != QoS::AtMostOnce && publish.packet_id.is_none() {
        return Err(Error::InvalidArgument("packet id required for qos > 0"));
    }
    let mut flags = PublishFlags::from(publish.qos);
    if publish.dup {
        flags |= PublishFlags::DUP;
    }
    if publish.retain {
        flags |= PublishFlags::RETAIN;
    }
    let size = publish_size(publish);
    pack_with_header(buf, Type::PUBLISH, flags.bits(), size, |body| {
        let mut off = put_utf8_str(body, publish.topic_name);
        if let Some(packet_id) = publish.packet_id {
            put_u16(&mut body[off..], packet_id);
            off += 2;
        }
        body[off..].copy_from_slice(publish.payload);
    })
}

fn pack_ack(
    buf: &mut [u8],
    packet_type: Type,
    flags: u8,
    packet_id: PacketId,
) -> Result<usize, Error> {
    pack_with_header(buf, packet_type, flags, 2, |body| put_u16(body, packet_id))
}

/// Packs a PUBACK packet.
pub fn pack_publish_ack(buf: &mut [u8], ack: &PublishAck) -> Result<usize, Error> {
    pack_ack(buf, Type::PUBACK, 0, ack.packet_id)
}

/// Packs a PUBREC packet.
pub fn pack_publish_received(buf: &mut [u8], ack: &PublishReceived) -> Result<usize, Error> {
    pack_ack(buf, Type::PUBREC, 0, ack.packet_id)
}

/// Packs a PUBREL packet.
pub fn pack_publish_release(buf: &mut [u8], ack: &PublishRelease) -> Result<usize, Error> {
    pack_ack(buf, Type::PUBREL, 0b0010, ack.packet_id)
}

/// Packs a PUBCOMP packet.
pub fn pack_publish_complete(buf: &mut [u8], ack: &PublishComplete) -> Result<usize, Error> {
    pack_ack(buf, Type::PUBCOMP, 0, ack.packet_id)
}

/// Packs an UNSUBACK packet.
pub fn pack_unsubscribe_ack(buf: &mut [u8], ack: &UnsubscribeAck) -> Result<usize, Error> {
    pack_ack(buf, Type::UNSUBACK, 0, ack.packet_id)
}

fn subscribe_size(subscribe: &Subscribe) -> usize {
    2 + subscribe
        .subscriptions
        .iter()
        .map(|(filter, _)| 2 + filter.len() + 1)
        .sum::<usize>()
}

/// Packs a SUBSCRIBE packet.
pub fn pack_subscribe(buf: &mut [u8], subscribe: &Subscribe) -> Result<usize, Error> {
    if subscribe.subscriptions.is_empty() {
        return Err(Error::InvalidArgument(
            "subscribe requires at least one topic filter",
        ));
    }
    let size = subscribe_size(subscribe);
    pack_with_header(buf, Type::SUBSCRIBE, 0b0010, size, |body| {
        put_u16(body, subscribe.packet_id);
        let mut off = 2;
        for &(filter, qos) in &subscribe.subscriptions {
            off += put_utf8_str(&mut body[off..], filter);
            body[off] = qos as u8;
            off += 1;
        }
    })
}

fn subscribe_ack_size(ack: &SubscribeAck) -> usize {
    2 + ack.status.len()
}

/// Packs a SUBACK packet.
pub fn pack_subscribe_ack(buf: &mut [u8], ack: &SubscribeAck) -> Result<usize, Error> {
    if ack.status.is_empty() {
        return Err(Error::InvalidArgument(
            "suback requires at least one return code",
        ));
    }
    let size = subscribe_ack_size(ack);
    pack_with_header(buf, Type::SUBACK, 0, size, |body| {
        put_u16(body, ack.packet_id);
        for (i, &code) in ack.status.iter().enumerate() {
            body[2 + i] = code.into();
        }
    })
}

fn unsubscribe_size(unsubscribe: &Unsubscribe) -> usize {
    2 + unsubscribe
        .topic_filters
        .iter()
        .map(|filter| 2 + filter.len())
        .sum::<usize>()
}

/// Packs an UNSUBSCRIBE packet.
pub fn pack_unsubscribe(buf: &mut [u8], unsubscribe: &Unsubscribe) -> Result<usize, Error> {
    if unsubscribe.topic_filters.is_empty() {
        return Err(Error::InvalidArgument(
            "unsubscribe requires at least one topic filter",
        ));
    }
    let size = unsubscribe_size(unsubscribe);
    pack_with_header(buf, Type::UNSUBSCRIBE, 0b0010, size, |body| {
        put_u16(body, unsubscribe.packet_id);
        let mut off = 2;
        for &filter in &unsubscribe.topic_filters {
            off += put_utf8_str(&mut body[off..], filter);
        }
    })
}

/// Packs a PINGREQ packet.
pub fn pack_ping(buf: &mut [u8]) -> Result<usize, Error> {
    pack_with_header(buf, Type::PINGREQ, 0, 0, |_| {})
}

/// Packs a PINGRESP packet.
pub fn pack_pong(buf: &mut [u8]) -> Result<usize, Error> {
    pack_with_header(buf, Type::PINGRESP, 0, 0, |_| {})
}

/// Packs a DISCONNECT packet.
pub fn pack_disconnect(buf: &mut [u8]) -> Result<usize, Error> {
    pack_with_header(buf, Type::DISCONNECT, 0, 0, |_| {})
}

/// Returns the exact number of bytes [`pack_packet`] will write for
/// `packet`, fixed header included. Used to size a `MessageQueue`
/// reservation before packing into it.
pub fn packed_size(packet: &Packet) -> Result<usize, Error> {
    let body_len = match packet {
        Packet::Connect(connect) => connect_size(connect),
        Packet::ConnectAck(_) => 2,
        Packet::Publish(publish) => publish_size(publish),
        Packet::PublishAck(_)
        | Packet::PublishReceived(_)
        | Packet::PublishRelease(_)
        | Packet::PublishComplete(_)
        | Packet::UnsubscribeAck(_) => 2,
        Packet::Subscribe(subscribe) => subscribe_size(subscribe),
        Packet::SubscribeAck(ack) => subscribe_ack_size(ack),
        Packet::Unsubscribe(unsubscribe) => unsubscribe_size(unsubscribe),
        Packet::Ping | Packet::Pong | Packet::Disconnect => 0,
    };
    if body_len > MAX_REMAINING_LENGTH {
        return Err(Error::InvalidRemainingLength);
    }
    Ok(1 + varint_len(body_len) + body_len)
}

/// Packs any control packet, dispatching on its variant.
pub fn pack_packet(buf: &mut [u8], packet: &Packet) -> Result<usize, Error> {
    match packet {
        Packet::Connect(connect) => pack_connect(buf, connect),
        Packet::ConnectAck(ack) => pack_connect_ack(buf, ack),
        Packet::Publish(publish) => pack_publish(buf, publish),
        Packet::PublishAck(ack) => pack_publish_ack(buf, ack),
        Packet::PublishReceived(ack) => pack_publish_received(buf, ack),
        Packet::PublishRelease(ack) => pack_publish_release(buf, ack),
        Packet::PublishComplete(ack) => pack_publish_complete(buf, ack),
        Packet::Subscribe(subscribe) => pack_subscribe(buf, subscribe),
        Packet::SubscribeAck(ack) => pack_subscribe_ack(buf, ack),
        Packet::Unsubscribe(unsubscribe) => pack_unsubscribe(buf, unsubscribe),
        Packet::UnsubscribeAck(ack) => pack_unsubscribe_ack(buf, ack),
        Packet::Ping => pack_ping(buf),
        Packet::Pong => pack_pong(buf),
        Packet::Disconnect => pack_disconnect(buf),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_len() {
        assert_eq!(varint_len(0), 1);
        assert_eq!(varint_len(127), 1);
        assert_eq!(varint_len(128), 2);
        assert_eq!(varint_len(16_383), 2);
        assert_eq!(varint_len(16_384), 3);
        assert_eq!(varint_len(2_097_151), 3);
        assert_eq!(varint_len(2_097_152), 4);
        assert_eq!(varint_len(268_435_455), 4);
    }

    #[test]
    fn test_pack_connect() {
        let connect = Connect {
            clean_session: false,
            keep_alive: 120,
            client_id: "liam",
            last_will: None,
            user_name: None,
            password: None,
        };
        let mut buf = [0u8; 32];
        let n = pack_connect(&mut buf, &connect).unwrap();
        assert_eq!(n, 18);
        assert_eq!(
            &buf[..n],
            b"\x10\x10\x00\x04MQTT\x04\x00\x00\x78\x00\x04liam"
        );
    }

    #[test]
    fn test_pack_publish_retain() {
        let publish = Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: true,
            topic_name: "topic1",
            packet_id: Some(23),
            payload: b"0123456789",
        };
        let mut buf = [0u8; 32];
        let n = pack_publish(&mut buf, &publish).unwrap();
        assert_eq!(n, 22);
        assert_eq!(
            &buf[..n],
            b"\x31\x14\x00\x06topic1\x00\x170123456789"
        );
    }

    #[test]
    fn test_pack_subscribe() {
        let subscribe = Subscribe {
            packet_id: 132,
            subscriptions: vec![
                ("a/b", QoS::AtMostOnce),
                ("bbb/x", QoS::AtLeastOnce),
                ("c/dd", QoS::AtMostOnce),
            ],
        };
        let mut buf = [0u8; 32];
        let n = pack_subscribe(&mut buf, &subscribe).unwrap();
        assert_eq!(n, 25);
        assert_eq!(&buf[..4], b"\x82\x17\x00\x84");
    }

    #[test]
    fn test_packed_size_matches_pack_output() {
        let connect = Connect {
            clean_session: false,
            keep_alive: 120,
            client_id: "liam",
            last_will: None,
            user_name: None,
            password: None,
        };
        assert_eq!(
            packed_size(&Packet::Connect(connect.clone())).unwrap(),
            18
        );

        let publish = Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: true,
            topic_name: "topic1",
            packet_id: Some(23),
            payload: b"0123456789",
        };
        assert_eq!(
            packed_size(&Packet::Publish(publish.clone())).unwrap(),
            22
        );

        let mut buf = [0u8; 32];
        let n = pack_packet(&mut buf, &Packet::Publish(publish)).unwrap();
        assert_eq!(n, 22);
    }

    #[test]
    fn test_pack_short_buffer_returns_zero() {
        let publish = Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic_name: "topic",
            packet_id: None,
            payload: b"data",
        };
        let mut buf = [0u8; 10];
        assert_eq!(pack_publish(&mut buf, &publish).unwrap(), 0);
    }

    #[test]
    fn test_pack_ping_pong_disconnect() {
        let mut buf = [0u8; 2];
        assert_eq!(pack_ping(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"\xc0\x00");
        assert_eq!(pack_pong(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"\xd0\x00");
        assert_eq!(pack_disconnect(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"\xe0\x00");
    }
}
