//! Client configuration

use serde::{Deserialize, Serialize};
use shared::{DEFAULT_GRID_HEIGHT, DEFAULT_GRID_WIDTH, DEFAULT_PORT};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be non-zero")]
    ZeroInterval(&'static str),
    #[error("bot interval range is inverted: min {min:?} > max {max:?}")]
    InvertedBotInterval { min: Duration, max: Duration },
    #[error("grid must have at least one row and one column")]
    EmptyGrid,
    #[error("interpolation rate must be a positive number")]
    InvalidInterpolationRate,
}

/// Retry schedule for `CLIENT_INIT`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    /// `None` retries until a response arrives
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            multiplier: 2,
            max_delay: Duration::from_secs(4),
            max_attempts: None,
        }
    }
}

impl BackoffConfig {
    /// Wait after the `attempt`-th send (1-based) before trying again.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_delay;
        for _ in 1..attempt {
            delay = delay.saturating_mul(self.multiplier.max(1));
            if delay >= self.max_delay {
                return self.max_delay;
            }
        }
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub server_address: SocketAddr,
    pub heartbeat_interval: Duration,
    /// Latency samples kept for metrics
    pub history_capacity: usize,
    /// Visual catch-up rate per second
    pub interpolation_rate: f32,
    /// Distance in cells below which a visual position snaps to its target
    pub snap_epsilon: f32,
    /// Time without an accepted snapshot before the feed is flagged stale
    pub stale_after: Duration,
    pub backoff: BackoffConfig,
    pub grid_width: u8,
    pub grid_height: u8,
    /// Claim cells automatically
    pub bot_enabled: bool,
    /// Bounds of the randomized wait between bot claims
    pub bot_min_interval: Duration,
    pub bot_max_interval: Duration,
    /// Ask for a new game once the current one ends
    pub auto_restart: bool,
    pub visual_step_interval: Duration,
    pub metrics_log_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            heartbeat_interval: Duration::from_secs(1),
            history_capacity: 256,
            interpolation_rate: 10.0,
            snap_epsilon: 0.01,
            stale_after: Duration::from_secs(2),
            backoff: BackoffConfig::default(),
            grid_width: DEFAULT_GRID_WIDTH,
            grid_height: DEFAULT_GRID_HEIGHT,
            bot_enabled: true,
            bot_min_interval: Duration::from_millis(50),
            bot_max_interval: Duration::from_millis(200),
            auto_restart: false,
            visual_step_interval: Duration::from_millis(16),
            metrics_log_interval: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    pub fn grid_capacity(&self) -> usize {
        self.grid_width as usize * self.grid_height as usize
    }

    /// Rejects settings that would stall or panic the client's timers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("heartbeat_interval", self.heartbeat_interval),
            ("visual_step_interval", self.visual_step_interval),
            ("metrics_log_interval", self.metrics_log_interval),
            ("backoff.initial_delay", self.backoff.initial_delay),
        ];
        if let Some((name, _)) = intervals.into_iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::ZeroInterval(name));
        }
        if self.bot_min_interval > self.bot_max_interval {
            return Err(ConfigError::InvertedBotInterval {
                min: self.bot_min_interval,
                max: self.bot_max_interval,
            });
        }
        if self.grid_width == 0 || self.grid_height == 0 {
            return Err(ConfigError::EmptyGrid);
        }
        if !(self.interpolation_rate.is_finite() && self.interpolation_rate > 0.0) {
            return Err(ConfigError::InvalidInterpolationRate);
        }
        Ok(())
    }
}
