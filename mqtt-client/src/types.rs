//! Request/response types at the [`crate::Client`] boundary.
//!
//! These mirror the wire types in `mqtt_core` but use owned-free,
//! borrowed shapes suited to a caller building a request right before
//! handing it to a `Client` method, or to data freshly decoded out of
//! the receive buffer.

use mqtt_core::QoS;

/// The will message bundle of a [`ConnectOptions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastWillOptions<'a> {
    /// The topic the will message is published to.
    pub topic: &'a str,
    /// The application message published as the will.
    pub message: &'a [u8],
    /// QoS level to use when the broker publishes the will message.
    pub qos: QoS,
    /// Whether the will message should be retained when published.
    pub retain: bool,
}

/// Parameters for [`crate::Client::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions<'a> {
    /// Identifies the client to the broker. May be empty.
    pub client_id: &'a str,
    /// The maximum number of seconds permitted between packets the
    /// client sends before it must send PINGREQ.
    pub keep_alive: u16,
    /// Whether the broker should discard any prior session state for
    /// this client id.
    pub clean_session: bool,
    /// The will message to be stored by the broker and published if the
    /// connection is subsequently lost.
    pub last_will: Option<LastWillOptions<'a>>,
    /// User name for authentication.
    pub user_name: Option<&'a str>,
    /// Password for authentication. Requires `user_name` to be set.
    pub password: Option<&'a [u8]>,
}

impl<'a> Default for ConnectOptions<'a> {
    fn default() -> Self {
        ConnectOptions {
            client_id: "",
            keep_alive: 60,
            clean_session: true,
            last_will: None,
            user_name: None,
            password: None,
        }
    }
}

/// A publish delivered to the user callback.
///
/// `topic_name` and `payload` point into the `Client`'s receive buffer
/// and are only valid for the duration of the callback invocation; a
/// callback that needs to retain them must copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishData<'a> {
    /// The information channel this application message was published to.
    pub topic_name: &'a str,
    /// The application message payload.
    pub payload: &'a [u8],
    /// The level of assurance this message was delivered with.
    pub qos: QoS,
    /// Whether the broker is delivering this as the topic's retained message.
    pub retain: bool,
    /// Set when this delivery might be a redelivery of an earlier attempt.
    pub dup: bool,
    /// Present iff `qos` is `AtLeastOnce` or `ExactlyOnce`.
    pub packet_id: Option<u16>,
}
