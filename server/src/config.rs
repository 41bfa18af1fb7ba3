//! Server configuration

use serde::{Deserialize, Serialize};
use shared::message::PLAYER_RECORD_SIZE;
use shared::{DEFAULT_GRID_HEIGHT, DEFAULT_GRID_WIDTH, DEFAULT_PORT, MAX_PAYLOAD_SIZE};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

/// Player ids run from 0 up to 254, so at most 255 sessions can exist.
pub const MAX_SESSIONS: usize = shared::MAX_PLAYER_ID as usize + 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("tick rate must be at least 1 Hz")]
    ZeroTickRate,
    #[error("max_clients must be between 1 and {MAX_SESSIONS}, got {0}")]
    InvalidMaxClients(usize),
    #[error("grid must have at least one row and one column")]
    EmptyGrid,
    #[error("heartbeat timeout and reap interval must be non-zero")]
    ZeroTimeout,
    #[error("a full snapshot would need {size} payload bytes, budget is {max}")]
    SnapshotTooLarge { size: usize, max: usize },
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the UDP socket to
    pub bind_address: SocketAddr,
    /// Snapshot broadcasts per second
    pub tick_rate_hz: u32,
    /// Maximum concurrent sessions
    pub max_clients: usize,
    /// Silence after which a session is reaped
    pub heartbeat_timeout: Duration,
    /// How often the reaper scans the session table
    pub reap_interval: Duration,
    pub grid_width: u8,
    pub grid_height: u8,
    /// Whether joining claims the player's spawn cell
    pub claim_spawn_cell: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            tick_rate_hz: 20,
            max_clients: 4,
            heartbeat_timeout: Duration::from_secs(10),
            reap_interval: Duration::from_secs(1),
            grid_width: DEFAULT_GRID_WIDTH,
            grid_height: DEFAULT_GRID_HEIGHT,
            claim_spawn_cell: true,
        }
    }
}

impl ServerConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz.max(1) as f64)
    }

    pub fn grid_capacity(&self) -> usize {
        self.grid_width as usize * self.grid_height as usize
    }

    /// Payload size of a snapshot with every slot filled.
    pub fn worst_case_snapshot_size(&self) -> usize {
        self.grid_capacity() + 1 + self.max_clients * PLAYER_RECORD_SIZE
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate_hz == 0 {
            return Err(ConfigError::ZeroTickRate);
        }
        if self.max_clients == 0 || self.max_clients > MAX_SESSIONS {
            return Err(ConfigError::InvalidMaxClients(self.max_clients));
        }
        if self.grid_width == 0 || self.grid_height == 0 {
            return Err(ConfigError::EmptyGrid);
        }
        if self.heartbeat_timeout.is_zero() || self.reap_interval.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        let size = self.worst_case_snapshot_size();
        if size > MAX_PAYLOAD_SIZE {
            return Err(ConfigError::SnapshotTooLarge {
                size,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(())
    }
}
