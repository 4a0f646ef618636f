//! A non-blocking MQTT v3.1.1 client state machine.
//!
//! [`Client`] owns an arena-backed outgoing queue and a receive buffer,
//! and drives a single connection's CONNECT/PUBLISH/SUBSCRIBE/
//! UNSUBSCRIBE/PINGREQ/DISCONNECT handshakes against whatever
//! [`Transport`] it is given. No I/O happens except inside
//! [`Client::sync`]; every other method only serializes a packet into
//! the queue and returns.

mod client;
mod config;
mod lock;
mod transport;
mod types;

pub use client::Client;
pub use config::ClientConfig;
pub use mqtt_core::{Error, QoS};
pub use transport::{Progress, TcpTransport, Transport};
pub use types::{ConnectOptions, LastWillOptions, PublishData};
