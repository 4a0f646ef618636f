use std::time::Duration;

/// Per-client tuning knobs that do not affect the wire format.
///
/// Supplied once at [`crate::Client::new`] time; every field has a
/// sensible default so a caller that does not care can use
/// `ClientConfig::default()`.
#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    /// How long an `AWAITING_ACK` entry may sit unacknowledged before
    /// [`crate::Client::sync`] resets it to `UNSENT` and flags it DUP for
    /// retransmission.
    pub response_timeout: Duration,

    /// The maximum idle time between outbound packets before `sync`
    /// enqueues a PINGREQ.
    pub keep_alive: Duration,

    /// Whether a QoS 2 PUBLISH whose id is already awaiting PUBCOMP
    /// suppresses redelivery to the publish callback on retransmission.
    ///
    /// Defaults to `true`, the spec-conformant behavior. Set `false` to
    /// recover the looser legacy behavior of invoking the callback on
    /// every inbound PUBLISH regardless of duplication, useful only for
    /// interop testing against brokers that rely on it.
    pub suppress_duplicate_qos2_delivery: bool,

    /// The seed for the packet identifier LFSR. Zero is coerced to
    /// [`mqtt_pid::DEFAULT_SEED`] by [`mqtt_pid::PidGenerator::new`].
    /// Exposed mainly so tests can reproduce a fixed packet id sequence.
    pub pid_seed: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            response_timeout: Duration::from_secs(3),
            keep_alive: Duration::from_secs(60),
            suppress_duplicate_qos2_delivery: true,
            pid_seed: mqtt_pid::DEFAULT_SEED,
        }
    }
}
