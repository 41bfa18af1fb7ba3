//! Headless bot that picks claims by breadth-first search

use crate::game::ClientGameState;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::message::{ClaimAck, ClaimRequest};
use shared::{cell_index, PlayerId};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// (row, col)
pub type Cell = (u8, u8);

/// Drives claims for one player
///
/// The bot walks toward the nearest unclaimed cell, claiming every cell on
/// the way. Cells it already owns are free to cross; cells owned by others
/// block the walk.
pub struct Bot {
    player_id: PlayerId,
    position: Cell,
    path: VecDeque<Cell>,
    min_interval: Duration,
    max_interval: Duration,
    next_action_at: Instant,
    rng: StdRng,
}

impl Bot {
    pub fn new(
        player_id: PlayerId,
        spawn: (i32, i32),
        min_interval: Duration,
        max_interval: Duration,
    ) -> Self {
        Self::with_rng(
            player_id,
            spawn,
            min_interval,
            max_interval,
            StdRng::from_entropy(),
        )
    }

    pub fn with_rng(
        player_id: PlayerId,
        spawn: (i32, i32),
        min_interval: Duration,
        max_interval: Duration,
        rng: StdRng,
    ) -> Self {
        Self {
            player_id,
            position: to_cell(spawn),
            path: VecDeque::new(),
            min_interval,
            max_interval: max_interval.max(min_interval),
            next_action_at: Instant::now(),
            rng,
        }
    }

    pub fn position(&self) -> Cell {
        self.position
    }

    pub fn planned_path(&self) -> &VecDeque<Cell> {
        &self.path
    }

    /// Moves the bot after the server re-spawned it.
    pub fn respawn(&mut self, player_id: PlayerId, spawn: (i32, i32)) {
        self.player_id = player_id;
        self.position = to_cell(spawn);
        self.path.clear();
    }

    /// Returns the next claim to send, or None while waiting for the action
    /// timer or when no unclaimed cell is left.
    pub fn next_claim(&mut self, state: &ClientGameState, now: Instant) -> Option<ClaimRequest> {
        if now < self.next_action_at || state.result().ended {
            return None;
        }
        self.next_action_at = now + self.action_delay();

        while let Some(&(row, col)) = self.path.front() {
            match state.owner(row, col) {
                Some(owner) if owner != self.player_id => {
                    self.path.clear();
                }
                _ => break,
            }
        }

        if self.path.is_empty() {
            self.path = find_path(state, self.player_id, self.position)?;
            debug!("Bot planned {} steps from {:?}", self.path.len(), self.position);
        }

        let (row, col) = self.path.pop_front()?;
        Some(ClaimRequest { row, col })
    }

    pub fn on_ack(&mut self, ack: &ClaimAck) {
        if ack.accepted {
            self.position = (ack.row, ack.col);
        } else {
            debug!("Claim on ({}, {}) rejected, replanning", ack.row, ack.col);
            self.path.clear();
        }
    }

    fn action_delay(&mut self) -> Duration {
        if self.max_interval <= self.min_interval {
            return self.min_interval;
        }
        self.rng.gen_range(self.min_interval..=self.max_interval)
    }
}

fn to_cell((x, y): (i32, i32)) -> Cell {
    (y.clamp(0, u8::MAX as i32) as u8, x.clamp(0, u8::MAX as i32) as u8)
}

/// Shortest walk from `start` to the nearest unclaimed cell, excluding
/// `start` unless it is itself unclaimed
///
/// Falls back to the nearest unclaimed cell by Manhattan distance when every
/// route is blocked, so the bot always has something to claim while cells
/// remain.
pub fn find_path(state: &ClientGameState, me: PlayerId, start: Cell) -> Option<VecDeque<Cell>> {
    let (width, height) = (state.width(), state.height());
    if width == 0 || height == 0 {
        return None;
    }
    let start = (start.0.min(height - 1), start.1.min(width - 1));
    if state.owner(start.0, start.1).is_none() {
        return Some(VecDeque::from([start]));
    }

    let mut previous: Vec<Option<Cell>> = vec![None; state.grid_cells()];
    let mut visited = vec![false; state.grid_cells()];
    let mut queue = VecDeque::from([start]);
    visited[cell_index(start.0, start.1, width)] = true;

    while let Some(cell) = queue.pop_front() {
        for next in neighbours(cell, width, height) {
            let index = cell_index(next.0, next.1, width);
            if visited[index] {
                continue;
            }
            visited[index] = true;
            match state.owner(next.0, next.1) {
                None => {
                    previous[index] = Some(cell);
                    return Some(walk_back(&previous, next, start, width));
                }
                Some(owner) if owner == me => {
                    previous[index] = Some(cell);
                    queue.push_back(next);
                }
                Some(_) => {}
            }
        }
    }

    nearest_unclaimed(state, start).map(|cell| VecDeque::from([cell]))
}

fn neighbours((row, col): Cell, width: u8, height: u8) -> impl Iterator<Item = Cell> {
    let up = row.checked_sub(1).map(|r| (r, col));
    let down = (row + 1 < height).then(|| (row + 1, col));
    let left = col.checked_sub(1).map(|c| (row, c));
    let right = (col + 1 < width).then(|| (row, col + 1));
    [up, down, left, right].into_iter().flatten()
}

fn walk_back(previous: &[Option<Cell>], goal: Cell, start: Cell, width: u8) -> VecDeque<Cell> {
    let mut path = VecDeque::new();
    let mut cell = goal;
    while cell != start {
        path.push_front(cell);
        match previous[cell_index(cell.0, cell.1, width)] {
            Some(prev) => cell = prev,
            None => break,
        }
    }
    path
}

fn nearest_unclaimed(state: &ClientGameState, from: Cell) -> Option<Cell> {
    (0..state.height())
        .flat_map(|row| (0..state.width()).map(move |col| (row, col)))
        .filter(|(row, col)| state.owner(*row, *col).is_none())
        .min_by_key(|(row, col)| row.abs_diff(from.0) as u16 + col.abs_diff(from.1) as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use shared::message::SnapshotPayload;

    fn state_with(cells: Vec<Option<PlayerId>>, width: u8, height: u8) -> ClientGameState {
        let config = ClientConfig {
            grid_width: width,
            grid_height: height,
            ..ClientConfig::default()
        };
        let mut state = ClientGameState::new(&config);
        state.apply_snapshot(
            1,
            0,
            SnapshotPayload {
                cells,
                players: Vec::new(),
            },
            0,
            Instant::now(),
        );
        state
    }

    fn bot_at(spawn: (i32, i32)) -> Bot {
        Bot::with_rng(0, spawn, Duration::ZERO, Duration::ZERO, StdRng::seed_from_u64(3))
    }

    #[test]
    fn test_unclaimed_start_is_claimed_first() {
        let state = state_with(vec![None; 9], 3, 3);
        assert_eq!(find_path(&state, 0, (1, 1)), Some(VecDeque::from([(1, 1)])));
    }

    #[test]
    fn test_path_crosses_own_cells() {
        // 0 0 .
        // 1 1 1
        let cells = vec![Some(0), Some(0), None, Some(1), Some(1), Some(1)];
        let state = state_with(cells, 3, 2);
        assert_eq!(
            find_path(&state, 0, (0, 0)),
            Some(VecDeque::from([(0, 1), (0, 2)]))
        );
    }

    #[test]
    fn test_blocked_route_falls_back_to_nearest_cell() {
        // 0 1 .
        // 1 1 .
        let cells = vec![Some(0), Some(1), None, Some(1), Some(1), None];
        let state = state_with(cells, 3, 2);
        assert_eq!(find_path(&state, 0, (0, 0)), Some(VecDeque::from([(0, 2)])));
    }

    #[test]
    fn test_full_grid_has_no_path() {
        let state = state_with(vec![Some(1); 4], 2, 2);
        assert_eq!(find_path(&state, 0, (0, 0)), None);
    }

    #[test]
    fn test_bot_claims_along_path() {
        let cells = vec![Some(0), None, None, None];
        let state = state_with(cells, 2, 2);
        let mut bot = bot_at((0, 0));

        let claim = bot.next_claim(&state, Instant::now()).unwrap();
        assert_eq!((claim.row, claim.col), (1, 0));

        bot.on_ack(&ClaimAck {
            claim_seq: 1,
            row: 1,
            col: 0,
            accepted: true,
        });
        assert_eq!(bot.position(), (1, 0));
    }

    #[test]
    fn test_rejected_claim_clears_path() {
        // 0 0 0 .
        let cells = vec![Some(0), Some(0), Some(0), None];
        let state = state_with(cells, 4, 1);
        let mut bot = bot_at((0, 0));

        bot.next_claim(&state, Instant::now()).unwrap();
        assert!(!bot.planned_path().is_empty());

        bot.on_ack(&ClaimAck {
            claim_seq: 1,
            row: 0,
            col: 1,
            accepted: false,
        });
        assert!(bot.planned_path().is_empty());
        assert_eq!(bot.position(), (0, 0));
    }

    #[test]
    fn test_bot_waits_for_action_interval() {
        let state = state_with(vec![None; 4], 2, 2);
        let mut bot = Bot::with_rng(
            0,
            (0, 0),
            Duration::from_secs(1),
            Duration::from_secs(1),
            StdRng::seed_from_u64(3),
        );
        let now = Instant::now();
        assert!(bot.next_claim(&state, now).is_some());
        assert!(bot.next_claim(&state, now + Duration::from_millis(500)).is_none());
        assert!(bot.next_claim(&state, now + Duration::from_secs(1)).is_some());
    }

    #[test]
    fn test_bot_idle_after_game_over() {
        let mut state = state_with(vec![None; 4], 2, 2);
        state.apply_game_over(None);
        let mut bot = bot_at((0, 0));
        assert!(bot.next_claim(&state, Instant::now()).is_none());
    }

    #[test]
    fn test_spawn_coordinates_map_to_row_and_col() {
        let bot = bot_at((3, 1));
        assert_eq!(bot.position(), (1, 3));
    }
}
