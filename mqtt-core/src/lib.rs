//! Shared protocol types for an MQTT v3.1.1 client.
//!
//! This crate carries the data model every other crate in the workspace
//! builds on: the control packet enum, the fixed header, the per-packet
//! structs, and the error taxonomy shared by the codec, the outgoing
//! message queue and the client state machine.

#[macro_use]
extern crate bitflags;

mod error;
mod packet;
mod proto;

pub use error::Error;
pub use packet::{
    Connect, ConnectAck, ConnectAckFlags, ConnectFlags, ConnectReturnCode, FixedHeader, LastWill,
    Packet, Publish, PublishAck, PublishComplete, PublishFlags, PublishReceived, PublishRelease,
    Subscribe, SubscribeAck, SubscribeReturnCode, Type, Unsubscribe, UnsubscribeAck,
    PROTOCOL_LEVEL, PROTOCOL_NAME,
};
pub use proto::{PacketId, QoS};

/// Largest value representable by the four-byte variable-length integer
/// encoding used for `remaining_length`.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;
