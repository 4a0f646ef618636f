use derive_more::Display;
use num_enum::{TryFromPrimitive, UnsafeFromPrimitive};

/// Packet Identifier
///
/// The variable header component of many of the Control Packet types
/// includes a 2 byte Packet Identifier field. A nonzero value correlates
/// a request with its acknowledgment within a session.
pub type PacketId = u16;

/// Quality of Service levels
#[repr(u8)]
#[derive(
    Clone, Copy, Debug, Display, Hash, PartialEq, Eq, PartialOrd, Ord, TryFromPrimitive,
    UnsafeFromPrimitive,
)]
pub enum QoS {
    /// At most once delivery.
    ///
    /// The message is delivered according to the capabilities of the
    /// underlying network. No response is sent by the receiver and no
    /// retry is performed by the sender.
    #[display(fmt = "at-most-once")]
    AtMostOnce = 0,

    /// At least once delivery.
    ///
    /// This quality of service ensures that the message arrives at the
    /// receiver at least once. A QoS 1 PUBLISH packet has a packet
    /// identifier in its variable header and is acknowledged by a PUBACK.
    #[display(fmt = "at-least-once")]
    AtLeastOnce = 1,

    /// Exactly once delivery.
    ///
    /// The highest quality of service, for use when neither loss nor
    /// duplication of messages is acceptable. Requires the four-way
    /// PUBLISH/PUBREC/PUBREL/PUBCOMP handshake.
    #[display(fmt = "exactly-once")]
    ExactlyOnce = 2,
}

impl Default for QoS {
    fn default() -> Self {
        QoS::AtMostOnce
    }
}
