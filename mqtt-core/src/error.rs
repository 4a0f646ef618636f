use thiserror::Error as ThisError;

/// The error taxonomy shared by the codec, the outgoing message queue and
/// the client state machine.
///
/// Argument errors (`InvalidArgument`, `MemoryExhausted`,
/// `InvalidRemainingLength`, `InvalidControlFlags`, `UnknownControlType`)
/// are reported directly to the caller and never latch into a client's
/// sticky error field. Protocol errors (`MalformedResponse`,
/// `ConnectionRefused`, `AckOfUnknown`) and transport errors
/// (`SocketError`) do latch: once a `Client` observes one, every
/// subsequent operation returns the same error until the client is
/// reinitialized.
#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum Error {
    /// An argument was missing or malformed (e.g. a will message without a
    /// will topic). Stands in for the source's null-pointer checks, which
    /// have no counterpart in a language without null pointers.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A `MessageQueue::register` call could not reserve enough room for
    /// the payload plus one more record slot.
    #[error("message queue exhausted")]
    MemoryExhausted,

    /// A variable-length integer would need a fifth continuation byte.
    #[error("remaining length exceeds the 4-byte variable-length encoding")]
    InvalidRemainingLength,

    /// The fixed header's flags did not match the value the protocol
    /// mandates for that control packet type.
    #[error("control packet flags {flags:#06b} invalid for {packet_type:?}")]
    InvalidControlFlags {
        /// The packet type the flags were read for.
        packet_type: crate::Type,
        /// The observed (invalid) flags.
        flags: u8,
    },

    /// The fixed header named a control type outside 1..=14.
    #[error("unknown control packet type {0}")]
    UnknownControlType(u8),

    /// A packet failed to decode: truncated variable header, invalid
    /// UTF-8, or an out-of-range enum discriminant inside the payload.
    #[error("malformed response from broker: {0}")]
    MalformedResponse(&'static str),

    /// The broker's CONNACK carried a return code other than "accepted".
    #[error("connection refused: {0}")]
    ConnectionRefused(crate::ConnectReturnCode),

    /// An inbound acknowledgment referenced a packet identifier the queue
    /// has no matching entry for.
    #[error("acknowledgment for unknown packet id {0}")]
    AckOfUnknown(u16),

    /// The transport reported a non-recoverable I/O error, or a
    /// zero-byte read on an established session (a half-closed stream).
    #[error("transport error: {0}")]
    SocketError(String),
}

impl Error {
    /// True for errors that latch into a client's sticky error field.
    pub fn is_sticky(&self) -> bool {
        matches!(
            self,
            Error::MalformedResponse(_)
                | Error::ConnectionRefused(_)
                | Error::AckOfUnknown(_)
                | Error::SocketError(_)
        )
    }
}
