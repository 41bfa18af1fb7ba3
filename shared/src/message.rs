//! Typed payloads carried inside a [`Packet`].
//!
//! Fixed-size records go through the same big-endian bincode settings as the
//! header. The snapshot grid is raw bytes, one owner byte per cell, with
//! [`UNCLAIMED`] marking free cells.

use crate::codec::{self, wire_options, MessageType, Packet};
use crate::error::CodecError;
use crate::{PlayerId, PlayerSummary, Winner, UNCLAIMED};
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const PLAYER_RECORD_SIZE: usize = 13;
pub const INIT_RESPONSE_SIZE: usize = 9;
pub const CLAIM_REQUEST_SIZE: usize = 2;
pub const CLAIM_ACK_SIZE: usize = 7;
pub const GAME_OVER_SIZE: usize = 6;

/// Server reply to `CLIENT_INIT`: assigned id and spawn cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitResponse {
    pub player_id: PlayerId,
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub row: u8,
    pub col: u8,
}

/// Server verdict on one claim, echoing the request's `seq_num`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimAck {
    pub claim_seq: u32,
    pub row: u8,
    pub col: u8,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPayload {
    /// Row-major owners, `None` for unclaimed cells.
    pub cells: Vec<Option<PlayerId>>,
    pub players: Vec<PlayerSummary>,
}

#[derive(Serialize, Deserialize)]
struct PlayerRecord {
    id: u8,
    score: u32,
    x: i32,
    y: i32,
}

#[derive(Serialize, Deserialize)]
struct GameOverRecord {
    has_winner: u8,
    winner_id: u8,
    winner_score: u32,
}

/// Every message the protocol knows, with its decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Snapshot(SnapshotPayload),
    Heartbeat,
    ClientInit,
    ServerInitResponse(InitResponse),
    CellClaimRequest(ClaimRequest),
    GameOver(Option<Winner>),
    ClaimAck(ClaimAck),
    ServerFull,
    NewGame,
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Snapshot(_) => MessageType::Snapshot,
            Message::Heartbeat => MessageType::Heartbeat,
            Message::ClientInit => MessageType::ClientInit,
            Message::ServerInitResponse(_) => MessageType::ServerInitResponse,
            Message::CellClaimRequest(_) => MessageType::CellClaimRequest,
            Message::GameOver(_) => MessageType::GameOver,
            Message::ClaimAck(_) => MessageType::ClaimAck,
            Message::ServerFull => MessageType::ServerFull,
            Message::NewGame => MessageType::NewGame,
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, CodecError> {
        match self {
            Message::Snapshot(snapshot) => snapshot.to_bytes(),
            Message::Heartbeat | Message::ClientInit | Message::ServerFull | Message::NewGame => {
                Ok(Vec::new())
            }
            Message::ServerInitResponse(response) => Ok(wire_options().serialize(response)?),
            Message::CellClaimRequest(request) => Ok(wire_options().serialize(request)?),
            Message::ClaimAck(ack) => Ok(wire_options().serialize(ack)?),
            Message::GameOver(winner) => {
                let record = match winner {
                    Some(w) => GameOverRecord {
                        has_winner: 1,
                        winner_id: w.player_id,
                        winner_score: w.score,
                    },
                    None => GameOverRecord {
                        has_winner: 0,
                        winner_id: 0,
                        winner_score: 0,
                    },
                };
                Ok(wire_options().serialize(&record)?)
            }
        }
    }

    /// Encodes the message into a complete datagram.
    pub fn encode(
        &self,
        snapshot_id: u32,
        seq_num: u32,
        server_ts_ms: u64,
    ) -> Result<Vec<u8>, CodecError> {
        let payload = self.to_payload()?;
        codec::encode(
            self.message_type(),
            snapshot_id,
            seq_num,
            server_ts_ms,
            &payload,
        )
    }

    /// Parses the payload of a validated packet.
    ///
    /// `grid_cells` is the receiver's configured `width * height`; a snapshot
    /// carrying a different grid is rejected.
    pub fn from_packet(packet: &Packet, grid_cells: usize) -> Result<Self, CodecError> {
        let payload = packet.payload.as_slice();
        match packet.msg_type() {
            MessageType::Snapshot => Ok(Message::Snapshot(SnapshotPayload::from_bytes(
                payload, grid_cells,
            )?)),
            MessageType::Heartbeat => expect_empty("heartbeat", payload).map(|_| Message::Heartbeat),
            MessageType::ClientInit => {
                expect_empty("client init", payload).map(|_| Message::ClientInit)
            }
            MessageType::ServerInitResponse => Ok(Message::ServerInitResponse(fixed(
                "init response",
                payload,
                INIT_RESPONSE_SIZE,
            )?)),
            MessageType::CellClaimRequest => Ok(Message::CellClaimRequest(fixed(
                "claim request",
                payload,
                CLAIM_REQUEST_SIZE,
            )?)),
            MessageType::ClaimAck => Ok(Message::ClaimAck(fixed(
                "claim ack",
                payload,
                CLAIM_ACK_SIZE,
            )?)),
            MessageType::GameOver => {
                let record: GameOverRecord = fixed("game over", payload, GAME_OVER_SIZE)?;
                match record.has_winner {
                    0 => Ok(Message::GameOver(None)),
                    1 => Ok(Message::GameOver(Some(Winner {
                        player_id: record.winner_id,
                        score: record.winner_score,
                    }))),
                    flag => Err(CodecError::malformed(
                        "game over",
                        format!("invalid winner flag {flag}"),
                    )),
                }
            }
            MessageType::ServerFull => {
                expect_empty("server full", payload).map(|_| Message::ServerFull)
            }
            MessageType::NewGame => expect_empty("new game", payload).map(|_| Message::NewGame),
        }
    }
}

impl SnapshotPayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let player_count = u8::try_from(self.players.len()).map_err(|_| {
            CodecError::malformed(
                "snapshot",
                format!("{} players do not fit in a count byte", self.players.len()),
            )
        })?;

        let mut bytes =
            Vec::with_capacity(self.cells.len() + 1 + self.players.len() * PLAYER_RECORD_SIZE);
        bytes.extend(self.cells.iter().map(|owner| owner.unwrap_or(UNCLAIMED)));
        bytes.push(player_count);

        for player in &self.players {
            let record = PlayerRecord {
                id: player.id,
                score: player.score,
                x: player.x,
                y: player.y,
            };
            bytes.extend(wire_options().serialize(&record)?);
        }

        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8], grid_cells: usize) -> Result<Self, CodecError> {
        if bytes.len() < grid_cells + 1 {
            return Err(CodecError::malformed(
                "snapshot",
                format!("{} bytes cannot hold a {grid_cells}-cell grid", bytes.len()),
            ));
        }

        let (grid, rest) = bytes.split_at(grid_cells);
        let player_count = rest[0] as usize;
        let records = &rest[1..];
        if records.len() != player_count * PLAYER_RECORD_SIZE {
            return Err(CodecError::malformed(
                "snapshot",
                format!(
                    "{player_count} players need {} bytes, got {}",
                    player_count * PLAYER_RECORD_SIZE,
                    records.len()
                ),
            ));
        }

        let cells = grid
            .iter()
            .map(|&owner| (owner != UNCLAIMED).then_some(owner))
            .collect();

        let players = records
            .chunks_exact(PLAYER_RECORD_SIZE)
            .map(|chunk| {
                let record: PlayerRecord = fixed("snapshot player", chunk, PLAYER_RECORD_SIZE)?;
                Ok(PlayerSummary::new(record.id, record.score, record.x, record.y))
            })
            .collect::<Result<Vec<_>, CodecError>>()?;

        Ok(Self { cells, players })
    }
}

fn fixed<T: DeserializeOwned>(
    kind: &'static str,
    bytes: &[u8],
    expected: usize,
) -> Result<T, CodecError> {
    if bytes.len() != expected {
        return Err(CodecError::malformed(
            kind,
            format!("expected {expected} bytes, got {}", bytes.len()),
        ));
    }
    wire_options()
        .deserialize(bytes)
        .map_err(|e| CodecError::malformed(kind, e.to_string()))
}

fn expect_empty(kind: &'static str, bytes: &[u8]) -> Result<(), CodecError> {
    if bytes.is_empty() {
        Ok(())
    } else {
        Err(CodecError::malformed(
            kind,
            format!("expected no payload, got {} bytes", bytes.len()),
        ))
    }
}
