//! Dungeon Map
//!
//! Tile grid plus the text format maps are written in:
//!
//! ```text
//! name The Gloom Warrens
//! win 3
//! #####
//! #G.E#
//! #####
//! ```
//!
//! A `name` line, a `win` line with the gold required to leave through the
//! exit, then rectangular tile rows.

use thiserror::Error;

use crate::core::direction::Direction;

/// One square of the dungeon.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tile {
    /// Open floor.
    Floor,
    /// Impassable wall.
    Wall,
    /// A pile of gold worth one.
    Gold,
    /// The exit; stepping here with enough gold wins.
    Exit,
    /// Lantern pickup (wider vision).
    Lantern,
    /// Sword pickup (stronger attacks).
    Sword,
    /// Armour pickup (softer hits).
    Armour,
    /// Health pickup (one hit point).
    Health,
}

impl Tile {
    /// Parse a map character.
    pub fn from_char(c: char) -> Option<Tile> {
        match c {
            '.' => Some(Tile::Floor),
            '#' => Some(Tile::Wall),
            'G' => Some(Tile::Gold),
            'E' => Some(Tile::Exit),
            'L' => Some(Tile::Lantern),
            'S' => Some(Tile::Sword),
            'A' => Some(Tile::Armour),
            'H' => Some(Tile::Health),
            _ => None,
        }
    }

    /// The character this tile renders as in a LOOKREPLY window.
    pub fn to_char(self) -> char {
        match self {
            Tile::Floor => '.',
            Tile::Wall => '#',
            Tile::Gold => 'G',
            Tile::Exit => 'E',
            Tile::Lantern => 'L',
            Tile::Sword => 'S',
            Tile::Armour => 'A',
            Tile::Health => 'H',
        }
    }

    /// Can a player stand on this tile?
    #[inline]
    pub fn is_walkable(self) -> bool {
        !matches!(self, Tile::Wall)
    }

    /// Does PICKUP consume this tile?
    #[inline]
    pub fn is_pickup(self) -> bool {
        matches!(
            self,
            Tile::Gold | Tile::Lantern | Tile::Sword | Tile::Armour | Tile::Health
        )
    }
}

/// A map coordinate: `col` runs left to right, `row` top to bottom.
///
/// Signed so that stepping off the map is representable and bounds checks
/// stay in one place ([`DungeonMap::tile`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Pos {
    /// Column (x), 0 at the left edge.
    pub col: i32,
    /// Row (y), 0 at the top edge.
    pub row: i32,
}

impl Pos {
    /// Build a position.
    pub fn new(col: i32, row: i32) -> Self {
        Self { col, row }
    }

    /// The neighboring position one step in `dir`.
    #[inline]
    pub fn step(self, dir: Direction) -> Pos {
        let (dc, dr) = dir.offset();
        Pos::new(self.col + dc, self.row + dr)
    }
}

/// Map loading failures.
#[derive(Debug, Error)]
pub enum MapError {
    /// The `name` header line is missing.
    #[error("map is missing its name line")]
    MissingName,

    /// The `win` header line is missing or malformed.
    #[error("map is missing a valid win line")]
    MissingWin,

    /// No tile rows followed the headers.
    #[error("map has no tile rows")]
    Empty,

    /// A tile row differs in length from the first row.
    #[error("map row {0} is not the same width as the first row")]
    RaggedRow(usize),

    /// An unknown tile character.
    #[error("unknown tile character '{0}' at row {1}")]
    UnknownTile(char, usize),
}

/// The dungeon grid and its win condition.
#[derive(Clone, Debug)]
pub struct DungeonMap {
    name: String,
    gold_to_win: u32,
    width: usize,
    height: usize,
    tiles: Vec<Tile>,
}

/// The map served when no map file is given.
const DEFAULT_MAP: &str = "\
name The Gloom Warrens
win 3
###################
#.........#.....SG#
#.#######.#.####..#
#.G...#...#....#.E#
#..#..#.#####..#..#
#H.#..#...G.#..#.L#
#..####.###.#..#..#
#A....#.....#.....#
###################
";

impl DungeonMap {
    /// Parse the map text format.
    pub fn parse(text: &str) -> Result<DungeonMap, MapError> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());

        let name = lines
            .next()
            .and_then(|l| l.strip_prefix("name "))
            .ok_or(MapError::MissingName)?
            .trim()
            .to_string();

        let gold_to_win = lines
            .next()
            .and_then(|l| l.strip_prefix("win "))
            .and_then(|n| n.trim().parse::<u32>().ok())
            .ok_or(MapError::MissingWin)?;

        let mut width = 0;
        let mut tiles = Vec::new();
        let mut height = 0;

        for (row, line) in lines.enumerate() {
            if row == 0 {
                width = line.chars().count();
            } else if line.chars().count() != width {
                return Err(MapError::RaggedRow(row));
            }
            for c in line.chars() {
                let tile = Tile::from_char(c).ok_or(MapError::UnknownTile(c, row))?;
                tiles.push(tile);
            }
            height += 1;
        }

        if height == 0 || width == 0 {
            return Err(MapError::Empty);
        }

        Ok(DungeonMap {
            name,
            gold_to_win,
            width,
            height,
            tiles,
        })
    }

    /// The built-in map.
    pub fn default_map() -> DungeonMap {
        // The embedded text is compile-time constant; parsing it cannot fail.
        DungeonMap::parse(DEFAULT_MAP).expect("built-in map is valid")
    }

    /// Map title from the `name` header.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gold required to win, from the `win` header.
    pub fn gold_to_win(&self) -> u32 {
        self.gold_to_win
    }

    /// Grid width in tiles.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Grid height in tiles.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Is `pos` inside the grid?
    pub fn in_bounds(&self, pos: Pos) -> bool {
        pos.col >= 0
            && pos.row >= 0
            && (pos.col as usize) < self.width
            && (pos.row as usize) < self.height
    }

    /// The tile at `pos`, or `None` outside the grid.
    pub fn tile(&self, pos: Pos) -> Option<Tile> {
        if !self.in_bounds(pos) {
            return None;
        }
        Some(self.tiles[pos.row as usize * self.width + pos.col as usize])
    }

    /// Can a player stand at `pos`?
    pub fn is_walkable(&self, pos: Pos) -> bool {
        self.tile(pos).map(Tile::is_walkable).unwrap_or(false)
    }

    /// Replace a consumed pickup with floor. No-op outside the grid.
    pub fn clear_tile(&mut self, pos: Pos) {
        if self.in_bounds(pos) {
            self.tiles[pos.row as usize * self.width + pos.col as usize] = Tile::Floor;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TINY: &str = "name Test Cell\nwin 2\n#####\n#G.E#\n#####\n";

    #[test]
    fn test_parse_headers() {
        let map = DungeonMap::parse(TINY).unwrap();
        assert_eq!(map.name(), "Test Cell");
        assert_eq!(map.gold_to_win(), 2);
        assert_eq!(map.width(), 5);
        assert_eq!(map.height(), 3);
    }

    #[test]
    fn test_tile_lookup_and_bounds() {
        let map = DungeonMap::parse(TINY).unwrap();
        assert_eq!(map.tile(Pos::new(1, 1)), Some(Tile::Gold));
        assert_eq!(map.tile(Pos::new(3, 1)), Some(Tile::Exit));
        assert_eq!(map.tile(Pos::new(0, 0)), Some(Tile::Wall));
        assert_eq!(map.tile(Pos::new(-1, 0)), None);
        assert_eq!(map.tile(Pos::new(5, 1)), None);
    }

    #[test]
    fn test_walkability() {
        let map = DungeonMap::parse(TINY).unwrap();
        assert!(map.is_walkable(Pos::new(2, 1)));
        assert!(map.is_walkable(Pos::new(1, 1))); // gold is floor you stand on
        assert!(!map.is_walkable(Pos::new(0, 1)));
        assert!(!map.is_walkable(Pos::new(-3, -3)));
    }

    #[test]
    fn test_clear_tile() {
        let mut map = DungeonMap::parse(TINY).unwrap();
        map.clear_tile(Pos::new(1, 1));
        assert_eq!(map.tile(Pos::new(1, 1)), Some(Tile::Floor));
    }

    #[test]
    fn test_missing_name_rejected() {
        assert!(matches!(
            DungeonMap::parse("win 2\n###\n"),
            Err(MapError::MissingName)
        ));
    }

    #[test]
    fn test_bad_win_rejected() {
        assert!(matches!(
            DungeonMap::parse("name X\nwin lots\n###\n"),
            Err(MapError::MissingWin)
        ));
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let text = "name X\nwin 1\n####\n##\n";
        assert!(matches!(DungeonMap::parse(text), Err(MapError::RaggedRow(1))));
    }

    #[test]
    fn test_unknown_tile_rejected() {
        let text = "name X\nwin 1\n#?#\n";
        assert!(matches!(
            DungeonMap::parse(text),
            Err(MapError::UnknownTile('?', 0))
        ));
    }

    #[test]
    fn test_default_map_loads() {
        let map = DungeonMap::default_map();
        assert_eq!(map.name(), "The Gloom Warrens");
        assert_eq!(map.gold_to_win(), 3);
        // Border must be sealed or players could walk off the world
        for col in 0..map.width() as i32 {
            assert_eq!(map.tile(Pos::new(col, 0)), Some(Tile::Wall));
            assert_eq!(
                map.tile(Pos::new(col, map.height() as i32 - 1)),
                Some(Tile::Wall)
            );
        }
    }

    #[test]
    fn test_step() {
        let p = Pos::new(3, 3);
        assert_eq!(p.step(crate::Direction::North), Pos::new(3, 2));
        assert_eq!(p.step(crate::Direction::East), Pos::new(4, 3));
        assert_eq!(p.step(crate::Direction::South), Pos::new(3, 4));
        assert_eq!(p.step(crate::Direction::West), Pos::new(2, 3));
    }
}
