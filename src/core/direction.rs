//! Compass Directions
//!
//! The four cardinal directions used by MOVE and ATTACK, with their grid
//! offsets. Row 0 is the top of the map, so north is negative row.

use std::fmt;
use std::str::FromStr;

/// A cardinal compass direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Up on the map (row - 1).
    North,
    /// Right on the map (col + 1).
    East,
    /// Down on the map (row + 1).
    South,
    /// Left on the map (col - 1).
    West,
}

impl Direction {
    /// All four directions in protocol order (N, E, S, W).
    ///
    /// This order is load-bearing: tie-breaking in the agent's move
    /// selection and the random-walk dice both index into it.
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    /// Grid offset as `(col delta, row delta)`.
    #[inline]
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::East => (1, 0),
            Direction::South => (0, 1),
            Direction::West => (-1, 0),
        }
    }

    /// Single-letter wire form.
    #[inline]
    pub fn letter(self) -> char {
        match self {
            Direction::North => 'N',
            Direction::East => 'E',
            Direction::South => 'S',
            Direction::West => 'W',
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Parse failure for a direction token.
///
/// Carries no detail: the protocol layer maps any failure to the single
/// `Invalid direction` reason string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParseDirectionError;

impl FromStr for Direction {
    type Err = ParseDirectionError;

    /// Accepts a single compass letter, either case (`N`, `e`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "N" | "n" => Ok(Direction::North),
            "E" | "e" => Ok(Direction::East),
            "S" | "s" => Ok(Direction::South),
            "W" | "w" => Ok(Direction::West),
            _ => Err(ParseDirectionError),
        }
    }
}
