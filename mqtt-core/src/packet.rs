use std::convert::TryFrom;

use num_enum::TryFromPrimitive;

use crate::proto::{PacketId, QoS};

/// The protocol name carried in every CONNECT packet, "MQTT" (the codec
/// is responsible for prefixing it with its 2-byte length).
pub const PROTOCOL_NAME: &[u8] = b"MQTT";

/// The protocol level this client speaks: v3.1.1.
pub const PROTOCOL_LEVEL: u8 = 4;

/// MQTT Control Packets.
#[derive(Debug, PartialEq, Clone)]
pub enum Packet<'a> {
    /// Client request to connect to the server.
    Connect(Connect<'a>),
    /// Connect acknowledgment.
    ConnectAck(ConnectAck),
    /// Publish message.
    Publish(Publish<'a>),
    /// Publish acknowledgment (QoS 1).
    PublishAck(PublishAck),
    /// Publish received, assured delivery part 1 (QoS 2).
    PublishReceived(PublishReceived),
    /// Publish release, assured delivery part 2 (QoS 2).
    PublishRelease(PublishRelease),
    /// Publish complete, assured delivery part 3 (QoS 2).
    PublishComplete(PublishComplete),
    /// Client subscribe request.
    Subscribe(Subscribe<'a>),
    /// Subscribe acknowledgment.
    SubscribeAck(SubscribeAck),
    /// Unsubscribe request.
    Unsubscribe(Unsubscribe<'a>),
    /// Unsubscribe acknowledgment.
    UnsubscribeAck(UnsubscribeAck),
    /// PING request.
    Ping,
    /// PING response.
    Pong,
    /// Client is disconnecting.
    Disconnect,
}

/// Fixed header.
///
/// Each MQTT control packet begins with this: a one-byte control type and
/// flags nibble, followed by the variable-length `remaining_length`.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct FixedHeader {
    /// MQTT control packet type.
    pub packet_type: Type,
    /// Flags specific to each MQTT control packet type.
    pub packet_flags: u8,
    /// The number of bytes remaining within the current packet,
    /// including the variable header and the payload.
    pub remaining_length: usize,
}

/// MQTT control packet type, the high nibble of the fixed header's first
/// byte.
#[repr(u8)]
#[derive(Debug, Eq, PartialEq, Copy, Clone, TryFromPrimitive)]
pub enum Type {
    /// Client request to connect to server.
    CONNECT = 1,
    /// Connect acknowledgment.
    CONNACK = 2,
    /// Publish message.
    PUBLISH = 3,
    /// Publish acknowledgment.
    PUBACK = 4,
    /// Publish received (assured delivery part 1).
    PUBREC = 5,
    /// Publish release (assured delivery part 2).
    PUBREL = 6,
    /// Publish complete (assured delivery part 3).
    PUBCOMP = 7,
    /// Client subscribe request.
    SUBSCRIBE = 8,
    /// Subscribe acknowledgment.
    SUBACK = 9,
    /// Unsubscribe request.
    UNSUBSCRIBE = 10,
    /// Unsubscribe acknowledgment.
    UNSUBACK = 11,
    /// PING request.
    PINGREQ = 12,
    /// PING response.
    PINGRESP = 13,
    /// Disconnect notification.
    DISCONNECT = 14,
}

impl Type {
    /// The fixed header flags the protocol mandates for this control
    /// type, or `None` for PUBLISH, whose flags vary with DUP/QoS/RETAIN.
    pub fn mandated_flags(self) -> Option<u8> {
        match self {
            Type::PUBREL | Type::SUBSCRIBE | Type::UNSUBSCRIBE => Some(0b0010),
            Type::PUBLISH => None,
            _ => Some(0b0000),
        }
    }
}

bitflags! {
    /// The CONNECT flags byte: which optional fields follow the variable
    /// header, and how the broker should treat the session and will.
    #[derive(Default)]
    pub struct ConnectFlags: u8 {
        /// A user name is present in the payload.
        const USER_NAME     = 0b1000_0000;
        /// A password is present in the payload.
        const PASSWORD      = 0b0100_0000;
        /// The will message should be retained when published.
        const WILL_RETAIN    = 0b0010_0000;
        /// The QoS level to use when publishing the will message.
        const WILL_QOS       = 0b0001_1000;
        /// A will topic and message follow the client id.
        const WILL           = 0b0000_0100;
        /// The broker should discard any prior session state for this client id.
        const CLEAN_SESSION  = 0b0000_0010;
    }
}

const WILL_QOS_SHIFT: u8 = 3;

impl ConnectFlags {
    /// The QoS level encoded in the WILL_QOS bits.
    pub fn will_qos(self) -> Result<QoS, crate::Error> {
        QoS::try_from((self & Self::WILL_QOS).bits() >> WILL_QOS_SHIFT)
            .map_err(|_| crate::Error::MalformedResponse("invalid will QoS"))
    }
}

impl From<QoS> for ConnectFlags {
    fn from(qos: QoS) -> Self {
        Self::from_bits_truncate((qos as u8) << WILL_QOS_SHIFT)
    }
}

/// Client request to connect to the server.
#[derive(Debug, PartialEq, Clone)]
pub struct Connect<'a> {
    /// Whether the broker should discard any prior session state for
    /// this client id.
    pub clean_session: bool,
    /// The maximum number of seconds permitted between packets the
    /// client sends before it must send PINGREQ.
    pub keep_alive: u16,
    /// Identifies the client to the broker. May be empty.
    pub client_id: &'a str,
    /// The will message to be stored by the broker and published if the
    /// connection is subsequently lost.
    pub last_will: Option<LastWill<'a>>,
    /// User name for authentication.
    pub user_name: Option<&'a str>,
    /// Password for authentication. Requires `user_name` to be set.
    pub password: Option<&'a [u8]>,
}

/// The will message bundle of a CONNECT packet.
#[derive(Debug, PartialEq, Clone)]
pub struct LastWill<'a> {
    /// QoS level to use when the broker publishes the will message.
    pub qos: QoS,
    /// Whether the will message should be retained when published.
    pub retain: bool,
    /// The topic the will message is published to.
    pub topic_name: &'a str,
    /// The application message published as the will.
    pub message: &'a [u8],
}

bitflags! {
    /// The CONNACK acknowledge flags byte.
    #[derive(Default)]
    pub struct ConnectAckFlags: u8 {
        /// Whether the broker already holds session state for this client id.
        const SESSION_PRESENT = 0b0000_0001;
    }
}

/// Connect acknowledgment.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct ConnectAck {
    /// Whether the broker and client have a consistent view of prior
    /// session state.
    pub session_present: bool,
    /// Whether, and why not, the connection was accepted.
    pub return_code: ConnectReturnCode,
}

/// Connect return code.
#[repr(u8)]
#[derive(Debug, Eq, PartialEq, Clone, Copy, TryFromPrimitive)]
pub enum ConnectReturnCode {
    /// Connection accepted.
    ConnectionAccepted = 0,
    /// The broker does not support the requested protocol version.
    UnacceptableProtocolVersion = 1,
    /// The client identifier is correctly formed UTF-8 but rejected.
    IdentifierRejected = 2,
    /// The network connection was made but the broker is unavailable.
    ServerUnavailable = 3,
    /// The user name or password was malformed.
    BadUserNameOrPassword = 4,
    /// The client is not authorized to connect.
    NotAuthorized = 5,
}

impl std::fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            ConnectReturnCode::ConnectionAccepted => "connection accepted",
            ConnectReturnCode::UnacceptableProtocolVersion => "unacceptable protocol version",
            ConnectReturnCode::IdentifierRejected => "identifier rejected",
            ConnectReturnCode::ServerUnavailable => "server unavailable",
            ConnectReturnCode::BadUserNameOrPassword => "bad user name or password",
            ConnectReturnCode::NotAuthorized => "not authorized",
        };
        f.write_str(msg)
    }
}

impl ConnectReturnCode {
    /// `Ok(())` for `ConnectionAccepted`, `Err(self)` otherwise.
    pub fn ok(self) -> Result<(), Self> {
        if self == ConnectReturnCode::ConnectionAccepted {
            Ok(())
        } else {
            Err(self)
        }
    }
}

bitflags! {
    /// Publish flags, the low nibble of a PUBLISH fixed header.
    #[derive(Default)]
    pub struct PublishFlags: u8 {
        /// Set on a retransmitted PUBLISH.
        const DUP    = 0b0000_1000;
        /// The two QoS bits.
        const QOS    = 0b0000_0110;
        /// The broker should retain this as the topic's last known value.
        const RETAIN = 0b0000_0001;
    }
}

const PUBLISH_QOS_SHIFT: u8 = 1;

impl PublishFlags {
    /// The QoS level encoded in the QOS bits.
    pub fn qos(self) -> Result<QoS, crate::Error> {
        QoS::try_from((self & Self::QOS).bits() >> PUBLISH_QOS_SHIFT)
            .map_err(|_| crate::Error::MalformedResponse("invalid publish QoS"))
    }
}

impl From<QoS> for PublishFlags {
    fn from(qos: QoS) -> Self {
        Self::from_bits_truncate((qos as u8) << PUBLISH_QOS_SHIFT)
    }
}

/// Publish message.
#[derive(Debug, PartialEq, Clone)]
pub struct Publish<'a> {
    /// Set when this packet might be a redelivery of an earlier attempt.
    pub dup: bool,
    /// The level of assurance for delivery of this application message.
    pub qos: QoS,
    /// Whether the broker should retain this as the topic's last known value.
    pub retain: bool,
    /// The information channel this application message is published to.
    pub topic_name: &'a str,
    /// Present iff `qos` is `AtLeastOnce` or `ExactlyOnce`.
    pub packet_id: Option<PacketId>,
    /// The application message payload.
    pub payload: &'a [u8],
}

/// Publish acknowledgment (QoS 1).
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct PublishAck {
    /// Packet identifier of the PUBLISH being acknowledged.
    pub packet_id: PacketId,
}

/// Publish received, assured delivery part 1 (QoS 2).
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct PublishReceived {
    /// Packet identifier of the PUBLISH being acknowledged.
    pub packet_id: PacketId,
}

/// Publish release, assured delivery part 2 (QoS 2).
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct PublishRelease {
    /// Packet identifier of the PUBLISH being released.
    pub packet_id: PacketId,
}

/// Publish complete, assured delivery part 3 (QoS 2).
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct PublishComplete {
    /// Packet identifier of the PUBLISH being completed.
    pub packet_id: PacketId,
}

/// Client subscribe request.
#[derive(Debug, PartialEq, Clone)]
pub struct Subscribe<'a> {
    /// Packet identifier, echoed back in the SUBACK.
    pub packet_id: PacketId,
    /// The topic filters and requested maximum QoS to subscribe to.
    pub subscriptions: Vec<(&'a str, QoS)>,
}

/// Subscribe acknowledgment.
#[derive(Debug, PartialEq, Clone)]
pub struct SubscribeAck {
    /// Packet identifier of the SUBSCRIBE being acknowledged.
    pub packet_id: PacketId,
    /// One return code per topic filter in the SUBSCRIBE, in order.
    pub status: Vec<SubscribeReturnCode>,
}

/// Subscribe return code.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum SubscribeReturnCode {
    /// The broker granted this maximum QoS for the filter.
    Success(QoS),
    /// The broker refused the subscription.
    Failure,
}

impl SubscribeReturnCode {
    /// The wire value of a refused subscription.
    pub const FAILURE: u8 = 0x80;
}

impl From<SubscribeReturnCode> for u8 {
    fn from(code: SubscribeReturnCode) -> u8 {
        match code {
            SubscribeReturnCode::Success(qos) => qos as u8,
            SubscribeReturnCode::Failure => SubscribeReturnCode::FAILURE,
        }
    }
}

/// Unsubscribe request.
#[derive(Debug, PartialEq, Clone)]
pub struct Unsubscribe<'a> {
    /// Packet identifier, echoed back in the UNSUBACK.
    pub packet_id: PacketId,
    /// The topic filters to unsubscribe from.
    pub topic_filters: Vec<&'a str>,
}

/// Unsubscribe acknowledgment.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct UnsubscribeAck {
    /// Packet identifier of the UNSUBSCRIBE being acknowledged.
    pub packet_id: PacketId,
}
