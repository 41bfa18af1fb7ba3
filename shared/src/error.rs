//! Error taxonomy for the packet codec.

use thiserror::Error;

/// Reasons a datagram or payload is refused.
///
/// Decode failures are per-packet: callers log and drop them, they never stop
/// a receive loop.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("packet too short: {len} bytes (header is {min})")]
    PacketTooShort { len: usize, min: usize },

    #[error("invalid protocol id {0:?}")]
    InvalidProtocolId([u8; 4]),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    #[error("payload length mismatch: header says {declared}, received {actual}")]
    PayloadLengthMismatch { declared: usize, actual: usize },

    #[error("checksum mismatch: header {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { expected: u32, computed: u32 },

    #[error("payload of {size} bytes exceeds the {max}-byte datagram budget")]
    OversizedPayload { size: usize, max: usize },

    #[error("malformed {kind} payload: {reason}")]
    MalformedPayload { kind: &'static str, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

impl CodecError {
    /// True for failures caused by bytes received off the wire, as opposed to
    /// a local encoding problem.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, CodecError::OversizedPayload { .. })
    }

    pub(crate) fn malformed(kind: &'static str, reason: impl Into<String>) -> Self {
        CodecError::MalformedPayload {
            kind,
            reason: reason.into(),
        }
    }
}
