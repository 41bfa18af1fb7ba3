//! Wire protocol and data model shared by the GridClash server and client.
//!
//! Every datagram is a fixed 28-byte header followed by a typed payload.
//! The header carries a CRC32 over everything except the checksum field, so
//! corrupted or foreign traffic is rejected in [`codec::decode`] before any
//! game logic sees it.

pub mod codec;
pub mod error;
pub mod message;
pub mod sequence;

pub use codec::{decode, encode, MessageType, Packet, PacketHeader};
pub use error::CodecError;
pub use message::Message;
pub use sequence::is_newer;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const PROTOCOL_ID: [u8; 4] = *b"GCUP";
pub const PROTOCOL_VERSION: u8 = 1;
pub const HEADER_SIZE: usize = 28;
/// Largest datagram either side will put on the wire.
pub const MAX_DATAGRAM_SIZE: usize = 1200;
pub const MAX_PAYLOAD_SIZE: usize = MAX_DATAGRAM_SIZE - HEADER_SIZE;

/// Owner byte of a cell nobody has claimed yet.
pub const UNCLAIMED: u8 = 255;
/// Highest assignable player id; 255 is reserved for [`UNCLAIMED`].
pub const MAX_PLAYER_ID: u8 = 254;

pub const DEFAULT_GRID_WIDTH: u8 = 20;
pub const DEFAULT_GRID_HEIGHT: u8 = 20;
pub const DEFAULT_PORT: u16 = 12000;

pub type PlayerId = u8;

/// Per-player record carried in every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerSummary {
    pub id: PlayerId,
    pub score: u32,
    pub x: i32,
    pub y: i32,
}

impl PlayerSummary {
    pub fn new(id: PlayerId, score: u32, x: i32, y: i32) -> Self {
        Self { id, score, x, y }
    }

    pub fn position(&self) -> (i32, i32) {
        (self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Winner {
    pub player_id: PlayerId,
    pub score: u32,
}

/// Outcome of a game. `winner` stays `None` until a win condition names one,
/// which keeps "no winner" distinct from player 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GameResult {
    pub winner: Option<Winner>,
    pub ended: bool,
}

impl GameResult {
    pub fn in_progress() -> Self {
        Self::default()
    }

    pub fn finished(winner: Option<Winner>) -> Self {
        Self {
            winner,
            ended: true,
        }
    }
}

/// Milliseconds since the Unix epoch, as stamped into `server_ts_ms`.
pub fn current_timestamp_ms() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis();
    (millis.min(u64::MAX as u128)) as u64
}

/// Row-major index of `(row, col)` in a grid of the given width.
pub fn cell_index(row: u8, col: u8, width: u8) -> usize {
    row as usize * width as usize + col as usize
}
