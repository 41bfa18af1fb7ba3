//! Session tracking for connected players
//!
//! This module owns the server-side view of every player, including:
//! - Session lifecycle (register, heartbeat, timeout, disconnect)
//! - Player id assignment, always the lowest free id
//! - Per-session outbound sequence numbers
//! - Consistent broadcast views for the tick loop
//!
//! The table is shared between the main loop and the reaper task behind a
//! `tokio::sync::RwLock`. Anything that needs to iterate sessions copies what
//! it needs while holding the lock once, then releases it before any I/O.

use log::info;
use shared::sequence::SequenceCounter;
use shared::{PlayerId, PlayerSummary, Winner};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    /// Reaped after `heartbeat_timeout` without any valid packet
    TimedOut,
    /// Removed after the OS reported the address unreachable
    Disconnected,
}

/// A registered player and their connection metadata
#[derive(Debug, Clone)]
pub struct Session {
    pub player_id: PlayerId,
    pub addr: SocketAddr,
    pub score: u32,
    /// `(x, y)` of the player's last accepted claim or spawn
    pub position: (i32, i32),
    /// Last time any valid packet arrived from this address
    pub last_heartbeat: Instant,
    outbound_seq: SequenceCounter,
    pub state: SessionState,
}

impl Session {
    pub fn new(player_id: PlayerId, addr: SocketAddr, position: (i32, i32), now: Instant) -> Self {
        Self {
            player_id,
            addr,
            score: 0,
            position,
            last_heartbeat: now,
            outbound_seq: SequenceCounter::new(),
            state: SessionState::Active,
        }
    }

    pub fn touch(&mut self, now: Instant) {
        if now > self.last_heartbeat {
            self.last_heartbeat = now;
        }
    }

    /// Returns true if nothing has been heard within `timeout` as of `now`.
    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_heartbeat) > timeout
    }

    /// Sequence number stamped on the last packet sent to this session
    pub fn last_seq_num(&self) -> u32 {
        self.outbound_seq.current()
    }

    pub fn next_seq_num(&mut self) -> u32 {
        self.outbound_seq.next()
    }

    /// Records an accepted claim. Only a newly claimed cell adds to the score.
    pub fn credit_claim(&mut self, row: u8, col: u8, newly_claimed: bool) {
        if newly_claimed {
            self.score += 1;
        }
        self.position = (col as i32, row as i32);
    }

    pub fn summary(&self) -> PlayerSummary {
        PlayerSummary::new(self.player_id, self.score, self.position.0, self.position.1)
    }
}

/// One recipient of a broadcast, with the sequence number reserved for it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastTarget {
    pub player_id: PlayerId,
    pub addr: SocketAddr,
    pub seq_num: u32,
}

/// Everything a broadcast needs, copied out of the table in one critical section
#[derive(Debug, Clone, Default)]
pub struct BroadcastView {
    pub targets: Vec<BroadcastTarget>,
    /// Live players sorted by id
    pub players: Vec<PlayerSummary>,
}

/// All live sessions keyed by address
pub struct SessionTable {
    sessions: HashMap<SocketAddr, Session>,
    max_clients: usize,
}

impl SessionTable {
    pub fn new(max_clients: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            max_clients,
        }
    }

    /// Lowest player id not held by any session, or None when the table is full.
    pub fn next_free_id(&self) -> Option<PlayerId> {
        if self.sessions.len() >= self.max_clients {
            return None;
        }
        (0..self.max_clients)
            .filter_map(|id| PlayerId::try_from(id).ok())
            .find(|id| self.find_by_player(*id).is_none())
    }

    /// Inserts a freshly built session. Returns false if the address or the
    /// player id is already taken, or the table is at capacity.
    pub fn insert(&mut self, session: Session) -> bool {
        if self.sessions.len() >= self.max_clients
            || self.sessions.contains_key(&session.addr)
            || self.find_by_player(session.player_id).is_some()
        {
            return false;
        }
        info!(
            "Player {} connected from {} at {:?}",
            session.player_id, session.addr, session.position
        );
        self.sessions.insert(session.addr, session);
        true
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&Session> {
        self.sessions.get(addr)
    }

    pub fn get_mut(&mut self, addr: &SocketAddr) -> Option<&mut Session> {
        self.sessions.get_mut(addr)
    }

    pub fn find_by_player(&self, player_id: PlayerId) -> Option<&Session> {
        self.sessions.values().find(|s| s.player_id == player_id)
    }

    /// Refreshes the heartbeat of a known address. Returns false if unknown.
    pub fn touch(&mut self, addr: &SocketAddr, now: Instant) -> bool {
        match self.sessions.get_mut(addr) {
            Some(session) => {
                session.touch(now);
                true
            }
            None => false,
        }
    }

    /// Removes every session silent for longer than `timeout`
    ///
    /// Returns the removed sessions marked `TimedOut`. Their claimed cells
    /// stay on the grid; only the session and its player id are released.
    pub fn reap_timed_out(&mut self, now: Instant, timeout: Duration) -> Vec<Session> {
        let expired: Vec<SocketAddr> = self
            .sessions
            .values()
            .filter(|s| s.is_timed_out(now, timeout))
            .map(|s| s.addr)
            .collect();

        expired
            .into_iter()
            .filter_map(|addr| self.sessions.remove(&addr))
            .map(|mut session| {
                session.state = SessionState::TimedOut;
                info!(
                    "Player {} at {} timed out (score {})",
                    session.player_id, session.addr, session.score
                );
                session
            })
            .collect()
    }

    /// Removes a session whose address has become unreachable.
    pub fn disconnect(&mut self, addr: &SocketAddr) -> Option<Session> {
        let mut session = self.sessions.remove(addr)?;
        session.state = SessionState::Disconnected;
        info!("Player {} at {} disconnected", session.player_id, addr);
        Some(session)
    }

    /// Builds the recipient list and player records for one broadcast
    ///
    /// Sessions already past `timeout` are skipped even if the reaper has not
    /// removed them yet. Each included session's outbound sequence number is
    /// advanced here, so a recipient sees strictly increasing `seq_num`s.
    pub fn broadcast_view(&mut self, now: Instant, timeout: Duration) -> BroadcastView {
        let mut view = BroadcastView::default();
        for session in self.sessions.values_mut() {
            if session.is_timed_out(now, timeout) {
                continue;
            }
            view.targets.push(BroadcastTarget {
                player_id: session.player_id,
                addr: session.addr,
                seq_num: session.next_seq_num(),
            });
            view.players.push(session.summary());
        }
        view.targets.sort_by_key(|t| t.player_id);
        view.players.sort_by_key(|p| p.id);
        view
    }

    /// Player records of every live session, sorted by id.
    pub fn live_summaries(&self, now: Instant, timeout: Duration) -> Vec<PlayerSummary> {
        let mut players: Vec<PlayerSummary> = self
            .sessions
            .values()
            .filter(|s| !s.is_timed_out(now, timeout))
            .map(Session::summary)
            .collect();
        players.sort_by_key(|p| p.id);
        players
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.values_mut()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Highest score wins; ties go to the lowest player id.
pub fn leader(players: &[PlayerSummary]) -> Option<Winner> {
    players
        .iter()
        .max_by(|a, b| a.score.cmp(&b.score).then(b.id.cmp(&a.id)))
        .map(|p| Winner {
            player_id: p.id,
            score: p.score,
        })
}
