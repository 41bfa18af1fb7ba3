use crate::config::ClientConfig;
use crate::metrics::{LatencyHistory, MetricsReport, SnapshotCounters};
use log::{debug, info};
use shared::message::SnapshotPayload;
use shared::{cell_index, is_newer, GameResult, PlayerId, PlayerSummary, Winner};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Applied,
    /// Not newer than the last accepted snapshot
    Stale,
}

/// Smoothed on-screen position of a player, in cells
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualPosition {
    pub x: f32,
    pub y: f32,
}

impl VisualPosition {
    fn target_of(player: &PlayerSummary) -> Self {
        Self {
            x: player.x as f32,
            y: player.y as f32,
        }
    }
}

/// Client view of the game: the latest authoritative snapshot plus the
/// derived visual state and metrics.
pub struct ClientGameState {
    width: u8,
    height: u8,
    player_id: Option<PlayerId>,

    cells: Vec<Option<PlayerId>>,
    players: Vec<PlayerSummary>,
    last_snapshot_id: Option<u32>,
    last_accepted_at: Option<Instant>,
    result: GameResult,

    visual: HashMap<PlayerId, VisualPosition>,
    interpolation_rate: f32,
    snap_epsilon: f32,

    history: LatencyHistory,
    counters: SnapshotCounters,
    stale_after: Duration,
}

impl ClientGameState {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            width: config.grid_width,
            height: config.grid_height,
            player_id: None,
            cells: vec![None; config.grid_capacity()],
            players: Vec::new(),
            last_snapshot_id: None,
            last_accepted_at: None,
            result: GameResult::in_progress(),
            visual: HashMap::new(),
            interpolation_rate: config.interpolation_rate,
            snap_epsilon: config.snap_epsilon,
            history: LatencyHistory::new(config.history_capacity),
            counters: SnapshotCounters::default(),
            stale_after: config.stale_after,
        }
    }

    pub fn set_player_id(&mut self, player_id: PlayerId) {
        self.player_id = Some(player_id);
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        self.player_id
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    pub fn height(&self) -> u8 {
        self.height
    }

    pub fn grid_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn cells(&self) -> &[Option<PlayerId>] {
        &self.cells
    }

    pub fn owner(&self, row: u8, col: u8) -> Option<PlayerId> {
        if row >= self.height || col >= self.width {
            return None;
        }
        self.cells[cell_index(row, col, self.width)]
    }

    /// Authoritative player records from the latest snapshot, sorted by id
    pub fn players(&self) -> &[PlayerSummary] {
        &self.players
    }

    pub fn own_summary(&self) -> Option<PlayerSummary> {
        let id = self.player_id?;
        self.players.iter().find(|p| p.id == id).copied()
    }

    pub fn last_snapshot_id(&self) -> Option<u32> {
        self.last_snapshot_id
    }

    pub fn result(&self) -> GameResult {
        self.result
    }

    pub fn counters(&self) -> SnapshotCounters {
        self.counters
    }

    pub fn history(&self) -> &LatencyHistory {
        &self.history
    }

    /// Applies a snapshot unless an equal or newer one was already accepted
    ///
    /// `now_ms` is the local wall clock used for the latency sample against
    /// the server timestamp; clock skew that would make it negative clamps
    /// to zero.
    pub fn apply_snapshot(
        &mut self,
        snapshot_id: u32,
        server_ts_ms: u64,
        mut payload: SnapshotPayload,
        now_ms: u64,
        now: Instant,
    ) -> SnapshotOutcome {
        if let Some(last) = self.last_snapshot_id {
            if !is_newer(snapshot_id, last) {
                self.counters.stale_dropped += 1;
                debug!("Dropping stale snapshot {} (last {})", snapshot_id, last);
                return SnapshotOutcome::Stale;
            }
        }

        self.last_snapshot_id = Some(snapshot_id);
        self.last_accepted_at = Some(now);
        self.counters.accepted += 1;
        self.history.record(now_ms.saturating_sub(server_ts_ms));

        payload.players.sort_by_key(|p| p.id);
        self.visual
            .retain(|id, _| payload.players.iter().any(|p| p.id == *id));
        for player in &payload.players {
            self.visual
                .entry(player.id)
                .or_insert_with(|| VisualPosition::target_of(player));
        }

        self.cells = payload.cells;
        self.players = payload.players;
        SnapshotOutcome::Applied
    }

    pub fn record_malformed(&mut self) {
        self.counters.malformed_dropped += 1;
    }

    /// Moves every visual position toward its authoritative target
    pub fn step_visuals(&mut self, dt: f32) {
        let factor = (self.interpolation_rate * dt.max(0.0)).min(1.0);
        for player in &self.players {
            let target = VisualPosition::target_of(player);
            let Some(visual) = self.visual.get_mut(&player.id) else {
                continue;
            };
            visual.x += (target.x - visual.x) * factor;
            visual.y += (target.y - visual.y) * factor;

            let dx = target.x - visual.x;
            let dy = target.y - visual.y;
            if (dx * dx + dy * dy).sqrt() < self.snap_epsilon {
                *visual = target;
            }
        }
    }

    /// Visual positions of every known player, sorted by id
    pub fn visual_positions(&self) -> Vec<(PlayerId, VisualPosition)> {
        let mut positions: Vec<(PlayerId, VisualPosition)> =
            self.visual.iter().map(|(id, pos)| (*id, *pos)).collect();
        positions.sort_by_key(|(id, _)| *id);
        positions
    }

    pub fn visual_position(&self, player_id: PlayerId) -> Option<VisualPosition> {
        self.visual.get(&player_id).copied()
    }

    pub fn apply_game_over(&mut self, winner: Option<Winner>) {
        if self.result.ended {
            return;
        }
        self.result = GameResult::finished(winner);
        match (winner, self.player_id) {
            (Some(w), Some(me)) if w.player_id == me => {
                info!("Game over: we won with {} cells", w.score)
            }
            (Some(w), _) => info!("Game over: player {} won with {} cells", w.player_id, w.score),
            (None, _) => info!("Game over: no winner"),
        }
    }

    /// Clears the result after the server restarted the game. The snapshot
    /// id watermark is kept because the server keeps counting.
    pub fn start_new_game(&mut self) {
        self.result = GameResult::in_progress();
    }

    /// True when no snapshot has been accepted within `stale_after`
    pub fn is_stale(&self, now: Instant) -> bool {
        match self.last_accepted_at {
            Some(at) => now.saturating_duration_since(at) > self.stale_after,
            None => true,
        }
    }

    pub fn metrics_report(&self, now: Instant) -> MetricsReport {
        MetricsReport::from_history(&self.history, self.counters, self.is_stale(now))
    }
}
