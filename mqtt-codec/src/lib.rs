//! Byte-level pack/unpack of MQTT v3.1.1 control packets.
//!
//! Every `pack_*` function writes a complete packet (fixed header plus
//! variable header and payload) into a caller-provided buffer and returns
//! the number of bytes written, or `Ok(0)` if the buffer is too small for
//! the packet ("would not fit", not an error). Every `unpack_*` function
//! reads a complete packet from a caller-provided buffer and returns the
//! number of bytes consumed together with the decoded packet, or
//! `Ok(None)` if the buffer does not yet hold a complete packet
//! ("incomplete, retry once more bytes arrive"). Malformed input (as
//! opposed to merely truncated input) is always an `Err`.
#![warn(missing_docs)]

extern crate mqtt_core as mqtt;

mod decode;
mod encode;

pub use crate::decode::{unpack_fixed_header, unpack_packet};
pub use crate::encode::{
    pack_connect, pack_connect_ack, pack_disconnect, pack_fixed_header, pack_ping, pack_packet,
    pack_pong, pack_publish, pack_publish_ack, pack_publish_complete, pack_publish_received,
    pack_publish_release, pack_subscribe, pack_subscribe_ack, pack_unsubscribe,
    pack_unsubscribe_ack, packed_size,
};

pub use mqtt_core::Error;
