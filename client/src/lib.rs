//! # GridClash Client Library
//!
//! Client side of the GridClash UDP protocol. The server owns the grid; the
//! client keeps the newest snapshot it has seen, smooths player movement for
//! display and measures how the connection behaves.
//!
//! ## Architecture Overview
//!
//! ### Handshake
//! The client sends `CLIENT_INIT` and resends it with exponential backoff
//! until the server answers with a player id, refuses with `SERVER_FULL`, or
//! the optional attempt limit runs out.
//!
//! ### Snapshot Reconciliation
//! Snapshots are full state, so reconciliation is replacement. The only
//! question is whether a snapshot is newer than the last accepted one, which
//! is answered with wrapping serial-number arithmetic so `snapshot_id`
//! rollover is handled.
//!
//! ### Interpolation
//! Visual positions chase the authoritative ones at a fixed rate and snap
//! once close enough. The authoritative state is never touched by this step.
//!
//! ## Module Organization
//!
//! - `config`: client settings and the handshake backoff schedule
//! - `handshake`: handshake state and retry timing
//! - `game`: snapshot intake, visual state and game result
//! - `metrics`: bounded latency history and the metrics report
//! - `bot`: headless player choosing claims by breadth-first search
//! - `network`: the UDP client and its event loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::ClientConfig;
//! use client::network::Client;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig {
//!         server_address: "127.0.0.1:12000".parse()?,
//!         ..ClientConfig::default()
//!     };
//!     let mut client = Client::new(config).await?;
//!     client.run(Some(Duration::from_secs(30))).await?;
//!     println!("{:?}", client.metrics_report());
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod config;
pub mod error;
pub mod game;
pub mod handshake;
pub mod metrics;
pub mod network;

pub use config::ClientConfig;
pub use error::ClientError;
pub use game::{ClientGameState, SnapshotOutcome, VisualPosition};
pub use metrics::{LatencyHistory, MetricsReport};
pub use network::Client;
