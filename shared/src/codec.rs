//! Packet framing: 28-byte big-endian header, CRC32, size limits.

use crate::error::CodecError;
use crate::{HEADER_SIZE, MAX_PAYLOAD_SIZE, PROTOCOL_ID, PROTOCOL_VERSION};
use bincode::Options;
use serde::{Deserialize, Serialize};

/// Byte offset of the checksum field; the CRC covers the header bytes before it.
const CHECKSUM_OFFSET: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// server -> client
    Snapshot = 0,
    /// client -> server
    Heartbeat = 1,
    /// client -> server
    ClientInit = 2,
    /// server -> client
    ServerInitResponse = 3,
    /// client -> server
    CellClaimRequest = 4,
    /// server -> client
    GameOver = 5,
    /// server -> client
    ClaimAck = 6,
    /// server -> client
    ServerFull = 7,
    /// client -> server
    NewGame = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::Snapshot),
            1 => Ok(MessageType::Heartbeat),
            2 => Ok(MessageType::ClientInit),
            3 => Ok(MessageType::ServerInitResponse),
            4 => Ok(MessageType::CellClaimRequest),
            5 => Ok(MessageType::GameOver),
            6 => Ok(MessageType::ClaimAck),
            7 => Ok(MessageType::ServerFull),
            8 => Ok(MessageType::NewGame),
            other => Err(CodecError::UnknownMessageType(other)),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        value as u8
    }
}

/// Header exactly as laid out on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct WireHeader {
    protocol_id: [u8; 4],
    version: u8,
    msg_type: u8,
    snapshot_id: u32,
    seq_num: u32,
    server_ts_ms: u64,
    payload_len: u16,
    checksum: u32,
}

/// Validated header of a decoded packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub version: u8,
    pub msg_type: MessageType,
    pub snapshot_id: u32,
    pub seq_num: u32,
    pub server_ts_ms: u64,
    pub payload_len: u16,
    pub checksum: u32,
}

/// A datagram that passed every framing and integrity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn msg_type(&self) -> MessageType {
        self.header.msg_type
    }
}

/// Fixed-width, big-endian bincode settings so every integer keeps its
/// declared size and network byte order.
pub(crate) fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
}

fn checksum(header_prefix: &[u8], payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header_prefix);
    hasher.update(payload);
    hasher.finalize()
}

/// Builds a complete datagram.
///
/// Refuses payloads that would push the datagram past
/// [`crate::MAX_DATAGRAM_SIZE`] instead of truncating them.
pub fn encode(
    msg_type: MessageType,
    snapshot_id: u32,
    seq_num: u32,
    server_ts_ms: u64,
    payload: &[u8],
) -> Result<Vec<u8>, CodecError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(CodecError::OversizedPayload {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let header = WireHeader {
        protocol_id: PROTOCOL_ID,
        version: PROTOCOL_VERSION,
        msg_type: msg_type.into(),
        snapshot_id,
        seq_num,
        server_ts_ms,
        payload_len: payload.len() as u16,
        checksum: 0,
    };

    let mut bytes = wire_options().serialize(&header)?;
    debug_assert_eq!(bytes.len(), HEADER_SIZE);

    let crc = checksum(&bytes[..CHECKSUM_OFFSET], payload);
    bytes[CHECKSUM_OFFSET..HEADER_SIZE].copy_from_slice(&crc.to_be_bytes());
    bytes.extend_from_slice(payload);
    Ok(bytes)
}

/// Validates and splits a received datagram.
pub fn decode(data: &[u8]) -> Result<Packet, CodecError> {
    if data.len() < HEADER_SIZE {
        return Err(CodecError::PacketTooShort {
            len: data.len(),
            min: HEADER_SIZE,
        });
    }

    let wire: WireHeader = wire_options().deserialize(&data[..HEADER_SIZE])?;

    if wire.protocol_id != PROTOCOL_ID {
        return Err(CodecError::InvalidProtocolId(wire.protocol_id));
    }
    if wire.version != PROTOCOL_VERSION {
        return Err(CodecError::UnsupportedVersion(wire.version));
    }

    let payload = &data[HEADER_SIZE..];
    if payload.len() != wire.payload_len as usize {
        return Err(CodecError::PayloadLengthMismatch {
            declared: wire.payload_len as usize,
            actual: payload.len(),
        });
    }

    let computed = checksum(&data[..CHECKSUM_OFFSET], payload);
    if computed != wire.checksum {
        return Err(CodecError::ChecksumMismatch {
            expected: wire.checksum,
            computed,
        });
    }

    let msg_type = MessageType::try_from(wire.msg_type)?;

    Ok(Packet {
        header: PacketHeader {
            version: wire.version,
            msg_type,
            snapshot_id: wire.snapshot_id,
            seq_num: wire.seq_num,
            server_ts_ms: wire.server_ts_ms,
            payload_len: wire.payload_len,
            checksum: wire.checksum,
        },
        payload: payload.to_vec(),
    })
}
