use crate::config::ConfigError;
use shared::{CodecError, Winner};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("server is full")]
    ServerFull,
    #[error("no response from server after {attempts} attempts")]
    HandshakeTimedOut { attempts: u32 },
    #[error("game already over (winner: {winner:?})")]
    GameAlreadyOver { winner: Option<Winner> },
    #[error("not connected to a server")]
    NotConnected,
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}
