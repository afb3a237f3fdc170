//! Vision & Pathfinding
//!
//! The agent's decision core, kept pure so every piece is testable on its
//! own: a [`Vision`] snapshot comes in, a [`CostGrid`] is derived from it
//! and the current [`Inventory`], a bounded wavefront fills the grid
//! outward from the goal cells, and the best cardinal step falls out.

use crate::agent::AgentError;
use crate::core::direction::Direction;
use crate::core::rng::GameRng;

/// Cost of a cell the agent cannot enter (wall, off-window, other player).
pub const IMPASSABLE: u8 = 88;

/// Cost of a passable cell the wavefront has not reached.
pub const UNVISITED: u8 = 46;

/// Propagation passes: one less than the unvisited sentinel, so assigned
/// levels can never collide with it.
const MAX_LEVEL: u8 = UNVISITED - 1;

/// One LOOKREPLY: a square, odd-sided grid of tile characters centered on
/// the agent. Immutable; replaced wholesale by the next exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vision {
    size: usize,
    cells: Vec<char>,
}

impl Vision {
    /// Build a snapshot from reply rows.
    pub fn from_rows(rows: &[String]) -> Result<Vision, AgentError> {
        let size = rows.len();
        if size == 0 {
            return Err(AgentError::MalformedLookReply("no rows".into()));
        }
        if size % 2 == 0 {
            return Err(AgentError::MalformedLookReply(format!(
                "even side length {size}"
            )));
        }
        let mut cells = Vec::with_capacity(size * size);
        for row in rows {
            if row.chars().count() != size {
                return Err(AgentError::MalformedLookReply(format!(
                    "row \"{row}\" does not match height {size}"
                )));
            }
            cells.extend(row.chars());
        }
        Ok(Vision { size, cells })
    }

    /// Side length of the window.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The cell at `(col, row)` offsets from the center, `'#'` outside
    /// the window (off-window is as solid as a wall).
    pub fn at_offset(&self, dc: i32, dr: i32) -> char {
        let center = (self.size / 2) as i32;
        let col = center + dc;
        let row = center + dr;
        if col < 0 || row < 0 || col >= self.size as i32 || row >= self.size as i32 {
            return '#';
        }
        self.cells[row as usize * self.size + col as usize]
    }

    /// The tile the agent is standing on.
    pub fn center(&self) -> char {
        self.at_offset(0, 0)
    }
}

/// What the agent carries, and what the game demands.
///
/// Updated only by the agent itself: held flags optimistically on its own
/// pickups, gold from `TREASUREMOD` notifications, the requirement from
/// the `GOLD` notice at join.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Inventory {
    /// Holding a lantern.
    pub has_lantern: bool,
    /// Holding a sword.
    pub has_sword: bool,
    /// Holding armour.
    pub has_armour: bool,
    /// Gold collected so far.
    pub gold: u32,
    /// Gold the exit demands.
    pub gold_to_win: u32,
}

/// Per-cycle cost grid: `0` for goals, [`IMPASSABLE`], or [`UNVISITED`]
/// until the wavefront overwrites it with a distance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CostGrid {
    size: usize,
    cells: Vec<u8>,
}

impl CostGrid {
    /// Derive costs from a snapshot and the current inventory.
    ///
    /// Goals: gold always; the exit once enough gold is carried; an item
    /// not yet held only while still short of gold (after that, gold and
    /// the exit are all that matter); a health pickup exactly at the
    /// threshold. Walls, the window edge, and other players are solid.
    pub fn assign(vision: &Vision, inventory: &Inventory) -> CostGrid {
        let enough_gold = inventory.gold >= inventory.gold_to_win;
        let cells = vision
            .cells
            .iter()
            .map(|&c| match c {
                'G' => 0,
                'E' if enough_gold => 0,
                'L' if !inventory.has_lantern && !enough_gold => 0,
                'S' if !inventory.has_sword && !enough_gold => 0,
                'A' if !inventory.has_armour && !enough_gold => 0,
                'H' if inventory.gold == inventory.gold_to_win => 0,
                '#' | 'X' | 'P' => IMPASSABLE,
                _ => UNVISITED,
            })
            .collect();
        CostGrid {
            size: vision.size,
            cells,
        }
    }

    fn get(&self, row: usize, col: usize) -> u8 {
        self.cells[row * self.size + col]
    }

    fn set(&mut self, row: usize, col: usize, value: u8) {
        self.cells[row * self.size + col] = value;
    }

    /// Is the agent already standing on a goal?
    pub fn center_is_goal(&self) -> bool {
        self.get(self.size / 2, self.size / 2) == 0
    }

    /// Wavefront propagation: for each level `k`, one row-major scan
    /// assigns `k + 1` to every unvisited 4-connected neighbor of a
    /// `k`-valued cell.
    ///
    /// The scan relaxes in place: cells written during a pass are seen
    /// by later reads of the same pass. A double-buffered BFS would be
    /// the conventional shape, but the chosen move must reproduce this
    /// exact scan order, so it stays as is.
    pub fn propagate(&mut self) {
        for level in 0..MAX_LEVEL {
            for row in 0..self.size {
                for col in 0..self.size {
                    if self.get(row, col) != level {
                        continue;
                    }
                    if row > 0 && self.get(row - 1, col) == UNVISITED {
                        self.set(row - 1, col, level + 1);
                    }
                    if row + 1 < self.size && self.get(row + 1, col) == UNVISITED {
                        self.set(row + 1, col, level + 1);
                    }
                    if col > 0 && self.get(row, col - 1) == UNVISITED {
                        self.set(row, col - 1, level + 1);
                    }
                    if col + 1 < self.size && self.get(row, col + 1) == UNVISITED {
                        self.set(row, col + 1, level + 1);
                    }
                }
            }
        }
    }

    /// The cost one step from the center in `dir`.
    pub fn neighbor(&self, dir: Direction) -> u8 {
        let center = self.size / 2;
        let (dc, dr) = dir.offset();
        let row = (center as i32 + dr) as usize;
        let col = (center as i32 + dc) as usize;
        self.get(row, col)
    }

    /// The cheapest cardinal step toward a goal, ties broken in N, E, S,
    /// W order. `None` when no neighbor was reached by the wavefront;
    /// unvisited and impassable cells alike are not a path.
    pub fn best_direction(&self) -> Option<Direction> {
        let best = Direction::ALL
            .iter()
            .map(|&d| self.neighbor(d))
            .min()
            .unwrap_or(UNVISITED);
        if best >= UNVISITED {
            return None;
        }
        Direction::ALL
            .into_iter()
            .find(|&d| self.neighbor(d) == best)
    }
}

/// Is any cardinal neighbor of the agent not a wall?
///
/// Must be checked before [`random_step`]'s retry loop; it is what keeps
/// that loop finite.
pub fn is_move_possible(vision: &Vision) -> bool {
    Direction::ALL.iter().any(|&d| {
        let (dc, dr) = d.offset();
        vision.at_offset(dc, dr) != '#'
    })
}

/// The deadlock-avoidance fallback: uniformly random cardinal directions
/// until one is not a wall. With every neighbor walled off there is
/// nothing to draw, and the agent's game is over.
pub fn random_step(vision: &Vision, rng: &mut GameRng) -> Result<Direction, AgentError> {
    if !is_move_possible(vision) {
        return Err(AgentError::Deadlocked);
    }
    loop {
        let dir = Direction::ALL[rng.next_int(4) as usize];
        let (dc, dr) = dir.offset();
        if vision.at_offset(dc, dr) != '#' {
            return Ok(dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn vision(rows: &[&str]) -> Vision {
        let rows: Vec<String> = rows.iter().map(|r| r.to_string()).collect();
        Vision::from_rows(&rows).unwrap()
    }

    fn poor() -> Inventory {
        Inventory {
            gold_to_win: 3,
            ..Inventory::default()
        }
    }

    #[test]
    fn test_vision_rejects_bad_shapes() {
        assert!(Vision::from_rows(&[]).is_err());
        assert!(Vision::from_rows(&["##".into(), "##".into()]).is_err());
        assert!(Vision::from_rows(&["###".into(), "##".into(), "###".into()]).is_err());
    }

    #[test]
    fn test_vision_offsets() {
        let v = vision(&["#####", "#.G.#", "#...#", "#...#", "#####"]);
        assert_eq!(v.center(), '.');
        assert_eq!(v.at_offset(0, -1), 'G');
        assert_eq!(v.at_offset(-2, 0), '#');
        // Outside the window counts as wall.
        assert_eq!(v.at_offset(5, 0), '#');
    }

    #[test]
    fn test_gold_north_scenario() {
        // 5x5, all floor, border walls, gold straight north of center:
        // the north neighbor must cost 0 and the decision must be N.
        let v = vision(&["#####", "#.G.#", "#...#", "#...#", "#####"]);
        let mut grid = CostGrid::assign(&v, &poor());
        grid.propagate();
        assert_eq!(grid.neighbor(Direction::North), 0);
        assert_eq!(grid.best_direction(), Some(Direction::North));
    }

    #[test]
    fn test_gold_north_full_cost_grid() {
        // Pin down the whole propagation result, same-pass writes and all.
        let v = vision(&["#####", "#.G.#", "#...#", "#...#", "#####"]);
        let mut grid = CostGrid::assign(&v, &poor());
        grid.propagate();
        #[rustfmt::skip]
        let expected: Vec<u8> = vec![
            88, 88, 88, 88, 88,
            88,  1,  0,  1, 88,
            88,  2,  1,  2, 88,
            88,  3,  2,  3, 88,
            88, 88, 88, 88, 88,
        ];
        assert_eq!(grid.cells, expected);
    }

    #[test]
    fn test_exit_is_goal_only_with_enough_gold() {
        let v = vision(&["#####", "#.E.#", "#...#", "#...#", "#####"]);
        let grid = CostGrid::assign(&v, &poor());
        assert_eq!(grid.neighbor(Direction::North), UNVISITED);

        let rich = Inventory {
            gold: 3,
            gold_to_win: 3,
            ..Inventory::default()
        };
        let grid = CostGrid::assign(&v, &rich);
        assert_eq!(grid.neighbor(Direction::North), 0);
    }

    #[test]
    fn test_items_are_goals_only_while_poor_and_unheld() {
        let v = vision(&["#####", "#.L.#", "#...#", "#...#", "#####"]);
        let grid = CostGrid::assign(&v, &poor());
        assert_eq!(grid.neighbor(Direction::North), 0);

        let holding = Inventory {
            has_lantern: true,
            gold_to_win: 3,
            ..Inventory::default()
        };
        let grid = CostGrid::assign(&v, &holding);
        assert_eq!(grid.neighbor(Direction::North), UNVISITED);

        let rich = Inventory {
            gold: 3,
            gold_to_win: 3,
            ..Inventory::default()
        };
        let grid = CostGrid::assign(&v, &rich);
        assert_eq!(grid.neighbor(Direction::North), UNVISITED);
    }

    #[test]
    fn test_health_is_goal_exactly_at_threshold() {
        let v = vision(&["#####", "#.H.#", "#...#", "#...#", "#####"]);
        let at = Inventory {
            gold: 3,
            gold_to_win: 3,
            ..Inventory::default()
        };
        assert_eq!(CostGrid::assign(&v, &at).neighbor(Direction::North), 0);

        let below = poor();
        assert_eq!(
            CostGrid::assign(&v, &below).neighbor(Direction::North),
            UNVISITED
        );
    }

    #[test]
    fn test_other_players_block_the_wavefront() {
        // The only corridor to the gold is plugged by another player.
        let v = vision(&["##G##", "##P##", "##.##", "#####", "#####"]);
        let mut grid = CostGrid::assign(&v, &poor());
        grid.propagate();
        assert_eq!(grid.best_direction(), None);
    }

    #[test]
    fn test_center_goal_detected() {
        let v = vision(&["#####", "#...#", "#.G.#", "#...#", "#####"]);
        let grid = CostGrid::assign(&v, &poor());
        assert!(grid.center_is_goal());
    }

    #[test]
    fn test_no_goal_means_no_direction() {
        let v = vision(&["#####", "#...#", "#...#", "#...#", "#####"]);
        let mut grid = CostGrid::assign(&v, &poor());
        grid.propagate();
        assert_eq!(grid.best_direction(), None);
    }

    #[test]
    fn test_unreachable_goal_means_no_direction() {
        // Gold in a sealed pocket: never selected, fallback territory.
        let v = vision(&["##G##", "#####", "#...#", "#...#", "#####"]);
        let mut grid = CostGrid::assign(&v, &poor());
        grid.propagate();
        assert_eq!(grid.best_direction(), None);
    }

    #[test]
    fn test_propagation_is_deterministic() {
        let v = vision(&["#####", "#G..#", "#.#.#", "#..G#", "#####"]);
        let mut a = CostGrid::assign(&v, &poor());
        let mut b = CostGrid::assign(&v, &poor());
        a.propagate();
        b.propagate();
        assert_eq!(a, b);
        assert_eq!(a.best_direction(), b.best_direction());
    }

    #[test]
    fn test_random_step_only_returns_open_directions() {
        // Only the east neighbor is open; every draw must land there.
        let v = vision(&["#####", "#####", "##..#", "#####", "#####"]);
        let mut rng = GameRng::new(99);
        for _ in 0..50 {
            assert_eq!(random_step(&v, &mut rng).unwrap(), Direction::East);
        }
    }

    #[test]
    fn test_walled_in_is_a_deadlock() {
        let v = vision(&["#####", "#####", "##.##", "#####", "#####"]);
        assert!(!is_move_possible(&v));
        let mut rng = GameRng::new(1);
        assert!(matches!(
            random_step(&v, &mut rng),
            Err(AgentError::Deadlocked)
        ));
    }

    proptest! {
        /// Same snapshot + same inventory ⇒ same decision, every time.
        #[test]
        fn prop_decision_is_reproducible(
            cells in proptest::collection::vec(
                proptest::sample::select(vec!['.', '#', 'G', 'E', 'L', 'S', 'A', 'H', 'P', 'X']),
                25,
            ),
            gold in 0u32..5,
            gold_to_win in 0u32..5,
            has_lantern: bool,
            has_sword: bool,
            has_armour: bool,
        ) {
            let rows: Vec<String> = cells
                .chunks(5)
                .map(|chunk| chunk.iter().collect())
                .collect();
            let vision = Vision::from_rows(&rows).unwrap();
            let inventory = Inventory {
                has_lantern,
                has_sword,
                has_armour,
                gold,
                gold_to_win,
            };

            let mut first = CostGrid::assign(&vision, &inventory);
            first.propagate();
            let mut second = CostGrid::assign(&vision, &inventory);
            second.propagate();

            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.best_direction(), second.best_direction());
        }

        /// The chosen step is never into a cell the grid marked solid.
        #[test]
        fn prop_never_steps_into_impassable(
            cells in proptest::collection::vec(
                proptest::sample::select(vec!['.', '#', 'G', 'P']),
                25,
            ),
        ) {
            let rows: Vec<String> = cells
                .chunks(5)
                .map(|chunk| chunk.iter().collect())
                .collect();
            let vision = Vision::from_rows(&rows).unwrap();
            let mut grid = CostGrid::assign(&vision, &Inventory::default());
            grid.propagate();
            if let Some(dir) = grid.best_direction() {
                let (dc, dr) = dir.offset();
                let target = vision.at_offset(dc, dr);
                prop_assert!(target != '#' && target != 'P');
            }
        }
    }
}
