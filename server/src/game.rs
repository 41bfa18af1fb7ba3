use crate::session_table::leader;
use log::{debug, info};
use rand::Rng;
use shared::message::SnapshotPayload;
use shared::sequence::SequenceCounter;
use shared::{cell_index, GameResult, PlayerId, PlayerSummary, Winner};
use std::ops::Range;

const SPAWN_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    /// The requester already owned the cell; nothing changes
    AlreadyOwned,
    OutOfRange,
    OwnedByOther(PlayerId),
    GameOver,
}

impl ClaimOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed | ClaimOutcome::AlreadyOwned)
    }
}

/// Authoritative grid. Owned by the server's main loop only.
#[derive(Debug, Clone)]
pub struct GameState {
    width: u8,
    height: u8,
    cells: Vec<Option<PlayerId>>,
    claimed_cells: usize,
    snapshot_counter: SequenceCounter,
    result: GameResult,
}

impl GameState {
    pub fn new(width: u8, height: u8) -> Self {
        Self {
            width,
            height,
            cells: vec![None; width as usize * height as usize],
            claimed_cells: 0,
            snapshot_counter: SequenceCounter::new(),
            result: GameResult::in_progress(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    pub fn claimed_cells(&self) -> usize {
        self.claimed_cells
    }

    pub fn is_full(&self) -> bool {
        self.claimed_cells == self.capacity()
    }

    pub fn cells(&self) -> &[Option<PlayerId>] {
        &self.cells
    }

    pub fn result(&self) -> GameResult {
        self.result
    }

    pub fn snapshot_id(&self) -> u32 {
        self.snapshot_counter.current()
    }

    /// Owner of `(row, col)`, or None when the coordinates are off the grid.
    pub fn owner(&self, row: u8, col: u8) -> Option<Option<PlayerId>> {
        if row >= self.height || col >= self.width {
            return None;
        }
        Some(self.cells[cell_index(row, col, self.width)])
    }

    pub fn claim(&mut self, player_id: PlayerId, row: u8, col: u8) -> ClaimOutcome {
        if self.result.ended {
            return ClaimOutcome::GameOver;
        }
        if row >= self.height || col >= self.width {
            return ClaimOutcome::OutOfRange;
        }

        let index = cell_index(row, col, self.width);
        match self.cells[index] {
            Some(owner) if owner == player_id => ClaimOutcome::AlreadyOwned,
            Some(owner) => ClaimOutcome::OwnedByOther(owner),
            None => {
                self.cells[index] = Some(player_id);
                self.claimed_cells += 1;
                debug!("Player {} claimed ({}, {})", player_id, row, col);
                ClaimOutcome::Claimed
            }
        }
    }

    /// Checks the win conditions against the current scores
    ///
    /// A full grid ends the game in favour of the leader. Otherwise a player
    /// holding more than half of all cells wins outright. Returns the result
    /// the first time a condition holds and None on every later call.
    pub fn evaluate_win(&mut self, players: &[PlayerSummary]) -> Option<GameResult> {
        if self.result.ended {
            return None;
        }

        let winner = if self.is_full() {
            leader(players)
        } else {
            let majority: Vec<PlayerSummary> = players
                .iter()
                .filter(|p| p.score as usize * 2 > self.capacity())
                .copied()
                .collect();
            match leader(&majority) {
                Some(winner) => Some(winner),
                None => return None,
            }
        };

        self.result = GameResult::finished(winner);
        match winner {
            Some(Winner { player_id, score }) => {
                info!("Game over: player {} wins with {} cells", player_id, score)
            }
            None => info!("Game over: grid full with no players left"),
        }
        Some(self.result)
    }

    /// Advances and returns the id for the next broadcast tick.
    pub fn next_snapshot_id(&mut self) -> u32 {
        self.snapshot_counter.next()
    }

    pub fn snapshot_payload(&self, players: Vec<PlayerSummary>) -> SnapshotPayload {
        SnapshotPayload {
            cells: self.cells.clone(),
            players,
        }
    }

    /// Clears the grid for a new round. Snapshot ids keep counting so clients
    /// never see an older id after the reset.
    pub fn reset(&mut self) {
        self.cells.iter_mut().for_each(|cell| *cell = None);
        self.claimed_cells = 0;
        self.result = GameResult::in_progress();
        info!("New game started on a {}x{} grid", self.width, self.height);
    }

    /// Picks a spawn `(x, y)` inside the quadrant of `player_id`, preferring
    /// cells nobody owns yet.
    pub fn spawn_position<R: Rng>(&self, player_id: PlayerId, rng: &mut R) -> (i32, i32) {
        let (cols, rows) = quadrant(self.width, self.height, player_id % 4);
        let mut pick = (cols.start, rows.start);
        for _ in 0..SPAWN_ATTEMPTS {
            pick = (rng.gen_range(cols.clone()), rng.gen_range(rows.clone()));
            if self.owner(pick.1, pick.0) == Some(None) {
                break;
            }
        }
        (pick.0 as i32, pick.1 as i32)
    }
}

/// Column and row ranges of one quadrant. Quadrant bit 0 picks the right
/// half, bit 1 the bottom half.
fn quadrant(width: u8, height: u8, index: u8) -> (Range<u8>, Range<u8>) {
    let half_w = (width / 2).max(1);
    let half_h = (height / 2).max(1);
    let cols = if index & 1 == 0 {
        0..half_w
    } else {
        (width - half_w)..width
    };
    let rows = if index & 2 == 0 {
        0..half_h
    } else {
        (height - half_h)..height
    };
    (cols, rows)
}
