//! `CLIENT_INIT` handshake with exponential backoff

use crate::config::BackoffConfig;
use crate::error::ClientError;
use log::{debug, info, warn};
use shared::message::InitResponse;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    AwaitingResponse { attempts: u32, next_retry: Instant },
    Established(InitResponse),
    Refused,
}

/// Tracks handshake progress; the caller owns the socket and sends
/// `CLIENT_INIT` whenever [`Handshake::start`] or [`Handshake::poll_retry`]
/// asks it to.
#[derive(Debug, Clone)]
pub struct Handshake {
    backoff: BackoffConfig,
    state: HandshakeState,
}

impl Handshake {
    pub fn new(backoff: BackoffConfig) -> Self {
        Self {
            backoff,
            state: HandshakeState::Idle,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Records the first `CLIENT_INIT` send.
    pub fn start(&mut self, now: Instant) {
        self.state = HandshakeState::AwaitingResponse {
            attempts: 1,
            next_retry: now + self.backoff.delay_for(1),
        };
    }

    /// When the next resend is due, if the handshake is still pending.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            HandshakeState::AwaitingResponse { next_retry, .. } => Some(next_retry),
            _ => None,
        }
    }

    /// Returns `Ok(true)` when a resend is due now, and errors once the
    /// configured attempt limit has been used up.
    pub fn poll_retry(&mut self, now: Instant) -> Result<bool, ClientError> {
        let HandshakeState::AwaitingResponse {
            attempts,
            next_retry,
        } = self.state
        else {
            return Ok(false);
        };
        if now < next_retry {
            return Ok(false);
        }
        if let Some(max_attempts) = self.backoff.max_attempts {
            if attempts >= max_attempts {
                warn!("Handshake gave up after {} attempts", attempts);
                self.state = HandshakeState::Idle;
                return Err(ClientError::HandshakeTimedOut { attempts });
            }
        }

        let attempts = attempts + 1;
        let delay = self.backoff.delay_for(attempts);
        debug!("Resending CLIENT_INIT (attempt {}, next in {:?})", attempts, delay);
        self.state = HandshakeState::AwaitingResponse {
            attempts,
            next_retry: now + delay,
        };
        Ok(true)
    }

    pub fn on_init_response(&mut self, response: InitResponse) {
        if !self.is_established() {
            info!(
                "Connected as player {} at ({}, {})",
                response.player_id, response.x, response.y
            );
        }
        self.state = HandshakeState::Established(response);
    }

    pub fn on_server_full(&mut self) {
        warn!("Server refused the connection: full");
        self.state = HandshakeState::Refused;
    }

    pub fn is_established(&self) -> bool {
        matches!(self.state, HandshakeState::Established(_))
    }

    pub fn response(&self) -> Option<InitResponse> {
        match self.state {
            HandshakeState::Established(response) => Some(response),
            _ => None,
        }
    }
}
