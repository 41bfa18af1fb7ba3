//! # GridClash Server Library
//!
//! Authoritative server for GridClash, a grid-ownership game played over a
//! custom UDP protocol. Players claim cells on a shared grid; the server
//! decides every claim, keeps score and announces the winner.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Grid
//! The grid lives in the main loop and nowhere else. Claims are resolved in
//! arrival order: the first claim on an unclaimed cell wins, later claims on
//! that cell are rejected with a `CLAIM_ACK` whose `accepted` flag is clear.
//!
//! ### Session Management
//! Every client address that sends `CLIENT_INIT` gets a session holding its
//! player id, score and outbound sequence counter:
//! - Ids are the lowest free value up to `max_clients`
//! - Any valid packet refreshes the session heartbeat
//! - A reaper task removes sessions silent for `heartbeat_timeout`
//!
//! ### State Broadcasting
//! At `tick_rate_hz` the server sends a full snapshot of the grid and player
//! table to every live session. Snapshots are never deltas, so a lost
//! datagram is repaired by the next one.
//!
//! ## Architecture Design
//!
//! The server runs an event loop over a `tokio::select!` between decoded
//! client messages and the tick timer, with helper tasks for:
//! - **Network Receiver**: decodes datagrams and drops malformed ones
//! - **Network Sender**: drains the outgoing datagram queue
//! - **Reaper**: removes timed-out sessions
//!
//! The session table is the only state shared between tasks. It sits behind
//! a `tokio::sync::RwLock`, and broadcasts copy their recipient list under a
//! single lock acquisition before anything is sent.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         bind_address: "127.0.0.1:12000".parse()?,
//!         ..ServerConfig::default()
//!     };
//!     let mut server = Server::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod game;
pub mod network;
pub mod session_table;

pub use config::ServerConfig;
pub use error::ServerError;
pub use network::{Server, ServerHandle, TickObservation};
