//! The Dungeon Engine
//!
//! Authoritative world state shared by every session. All operations are
//! synchronous and atomic under the [`SharedDungeon`] mutex; pushes to
//! players go out through the [`PlayerListener`] registry while the lock
//! is held, so the order notifications are generated in is the order each
//! player's session observes them in.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::info;

use crate::core::direction::Direction;
use crate::core::rng::GameRng;
use crate::game::events::{PlayerEvent, PlayerListener};
use crate::game::map::{DungeonMap, Pos, Tile};
use crate::{STARTING_HIT_POINTS, TURN_ACTION_POINTS, VISION_RADIUS, LANTERN_BONUS};

/// Unique player identifier, assigned by the engine on join.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// Help text pushed in response to HELP.
const HELP_TEXT: &str = "Commands: HELLO <name>, LOOK, MOVE <N|E|S|W>, \
     ATTACK <N|E|S|W>, PICKUP, ENDTURN, SHOUT <message>, CHANGE, \
     SETPLAYERPOS <col row>, QUIT, HELP";

/// Rule violations reported back to the issuing player.
///
/// Every variant renders as the reason string of a recoverable
/// `FAIL` response; none of these end a session.
#[derive(Debug, Error)]
pub enum GameError {
    /// Acting outside the player's turn.
    #[error("It is not your turn")]
    NotYourTurn,

    /// Moving into a wall or off the map.
    #[error("You walked into a wall")]
    BlockedByWall,

    /// Moving or teleporting onto another player.
    #[error("That square is occupied")]
    Occupied,

    /// Attacking a square with no one on it.
    #[error("There is no one there to attack")]
    NoTarget,

    /// PICKUP on a bare tile.
    #[error("There is nothing to pick up")]
    NothingToPickUp,

    /// Picking up a second lantern/sword/armour.
    #[error("You already have a {0}")]
    AlreadyHave(&'static str),

    /// SETPLAYERPOS outside the map or into a wall.
    #[error("That is not a valid position")]
    InvalidPosition,

    /// World-mutating command after someone has won.
    #[error("The game is over")]
    GameOver,

    /// World-mutating command from a defeated player.
    #[error("You are dead")]
    Dead,

    /// No free tile to spawn a new player on.
    #[error("There is no room in the dungeon")]
    MapFull,

    /// Operation on an id the engine does not know. Indicates a session
    /// bug, not a player mistake.
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),
}

/// Per-player world state.
struct Player {
    name: String,
    pos: Pos,
    gold: u32,
    hit_points: i32,
    action_points: u32,
    has_lantern: bool,
    has_sword: bool,
    has_armour: bool,
    alive: bool,
    listener: Arc<dyn PlayerListener>,
}

/// The shared world: map, players, turn order.
pub struct Dungeon {
    map: DungeonMap,
    players: BTreeMap<PlayerId, Player>,
    next_id: u32,
    /// Living players in join order; `current` indexes the turn holder.
    turn_order: Vec<PlayerId>,
    current: usize,
    game_over: bool,
    rng: GameRng,
}

/// The dungeon as sessions hold it: one mutex, every call atomic.
pub type SharedDungeon = Arc<Mutex<Dungeon>>;

impl Dungeon {
    /// Create a world on the given map.
    pub fn new(map: DungeonMap, rng: GameRng) -> Self {
        Self {
            map,
            players: BTreeMap::new(),
            next_id: 0,
            turn_order: Vec::new(),
            current: 0,
            game_over: false,
            rng,
        }
    }

    /// Wrap a world for sharing across connection tasks.
    pub fn shared(map: DungeonMap, rng: GameRng) -> SharedDungeon {
        Arc::new(Mutex::new(Dungeon::new(map, rng)))
    }

    /// Gold a player must carry to leave through the exit.
    pub fn gold_to_win(&self) -> u32 {
        self.map.gold_to_win()
    }

    /// Display name of a joined player.
    pub fn player_name(&self, id: PlayerId) -> Result<String, GameError> {
        Ok(self.player(id)?.name.clone())
    }

    /// Number of joined players (living and defeated).
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    // -----------------------------------------------------------------
    // Join / leave
    // -----------------------------------------------------------------

    /// Add a player: assign an id, spawn, register the listener, announce
    /// the join to the others and refresh everyone. The first player to
    /// join opens the first turn.
    pub fn join(
        &mut self,
        name: &str,
        listener: Arc<dyn PlayerListener>,
    ) -> Result<PlayerId, GameError> {
        let pos = self.pick_spawn().ok_or(GameError::MapFull)?;

        let id = PlayerId(self.next_id);
        self.next_id += 1;

        self.players.insert(
            id,
            Player {
                name: name.to_string(),
                pos,
                gold: 0,
                hit_points: STARTING_HIT_POINTS,
                action_points: 0,
                has_lantern: false,
                has_sword: false,
                has_armour: false,
                alive: true,
                listener,
            },
        );
        self.turn_order.push(id);

        info!("{} joined as \"{}\" at {},{}", id, name, pos.col, pos.row);

        self.broadcast_except(id, PlayerEvent::PlayerJoined(name.to_string()));
        self.broadcast(PlayerEvent::Change);

        if self.turn_order.len() == 1 {
            self.start_turn(id);
        }

        Ok(id)
    }

    /// Remove a player and drop their listener registration. Called
    /// exactly once per session, on QUIT or disconnect. If the leaver
    /// held the turn, the next living player's turn starts.
    pub fn remove_player(&mut self, id: PlayerId) -> Result<(), GameError> {
        let player = self.players.remove(&id).ok_or(GameError::UnknownPlayer(id))?;
        info!("{} (\"{}\") left the game", id, player.name);

        if let Some(idx) = self.turn_order.iter().position(|&p| p == id) {
            let had_turn = idx == self.current;
            self.turn_order.remove(idx);
            if idx < self.current {
                self.current -= 1;
            }
            if !self.turn_order.is_empty() {
                self.current %= self.turn_order.len();
                if had_turn && !self.game_over {
                    self.start_turn(self.turn_order[self.current]);
                }
            } else {
                self.current = 0;
            }
        }

        self.broadcast(PlayerEvent::Change);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// Render the vision window around a player: `2r + 1` rows of tile
    /// characters, `X` beyond the map edge, `P` over another living
    /// player. The center shows the tile under the player, so pickups
    /// underfoot stay visible to their owner.
    pub fn look(&self, id: PlayerId) -> Result<Vec<String>, GameError> {
        let player = self.player(id)?;
        let radius = if player.has_lantern {
            VISION_RADIUS + LANTERN_BONUS
        } else {
            VISION_RADIUS
        };
        let r = radius as i32;

        let mut rows = Vec::with_capacity((2 * r + 1) as usize);
        for dr in -r..=r {
            let mut row = String::with_capacity((2 * r + 1) as usize);
            for dc in -r..=r {
                let pos = Pos::new(player.pos.col + dc, player.pos.row + dr);
                let c = if !self.map.in_bounds(pos) {
                    'X'
                } else if (dc != 0 || dr != 0) && self.living_player_at(pos).is_some() {
                    'P'
                } else {
                    // In bounds, so the tile exists.
                    self.map.tile(pos).map(Tile::to_char).unwrap_or('X')
                };
                row.push(c);
            }
            rows.push(row);
        }
        Ok(rows)
    }

    // -----------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------

    /// Step one tile in `dir`. Costs one action point. Stepping onto the
    /// exit with enough gold ends the game: WIN to the mover, LOSE to
    /// everyone else.
    pub fn move_player(&mut self, id: PlayerId, dir: Direction) -> Result<(), GameError> {
        self.require_turn(id)?;

        let target = self.player(id)?.pos.step(dir);
        if !self.map.is_walkable(target) {
            return Err(GameError::BlockedByWall);
        }
        if self.living_player_at(target).is_some() {
            return Err(GameError::Occupied);
        }

        let gold = {
            let player = self.player_mut(id)?;
            player.pos = target;
            player.gold
        };

        if self.map.tile(target) == Some(Tile::Exit) && gold >= self.map.gold_to_win() {
            self.declare_winner(id);
            return Ok(());
        }

        self.spend_action_point(id);
        self.broadcast(PlayerEvent::Change);
        Ok(())
    }

    /// Strike the adjacent tile in `dir`. Costs one action point. A sword
    /// adds a point of damage, armour absorbs one (minimum one). A victim
    /// at zero hit points is defeated: LOSE, off the map, out of the turn
    /// order, but still registered until their own session leaves.
    pub fn attack(&mut self, id: PlayerId, dir: Direction) -> Result<(), GameError> {
        self.require_turn(id)?;

        let target = self.player(id)?.pos.step(dir);
        let victim_id = self.living_player_at(target).ok_or(GameError::NoTarget)?;

        let mut damage: i32 = if self.player(id)?.has_sword { 2 } else { 1 };
        if self.player(victim_id)?.has_armour {
            damage = (damage - 1).max(1);
        }

        let defeated = {
            let victim = self.player_mut(victim_id)?;
            victim.hit_points -= damage;
            victim.listener.notify(PlayerEvent::HitpointChange(-damage));
            victim.hit_points <= 0
        };

        if defeated {
            self.defeat(victim_id);
        }

        self.spend_action_point(id);
        self.broadcast(PlayerEvent::Change);
        Ok(())
    }

    /// Collect whatever the player is standing on. Costs one action point.
    pub fn pickup(&mut self, id: PlayerId) -> Result<(), GameError> {
        self.require_turn(id)?;

        let pos = self.player(id)?.pos;
        let tile = self.map.tile(pos).ok_or(GameError::NothingToPickUp)?;

        {
            let player = self.player_mut(id)?;
            match tile {
                Tile::Gold => {
                    player.gold += 1;
                    let total = player.gold;
                    player.listener.notify(PlayerEvent::TreasureChange(total));
                }
                Tile::Health => {
                    player.hit_points += 1;
                    player.listener.notify(PlayerEvent::HitpointChange(1));
                }
                Tile::Lantern => {
                    if player.has_lantern {
                        return Err(GameError::AlreadyHave("lantern"));
                    }
                    player.has_lantern = true;
                }
                Tile::Sword => {
                    if player.has_sword {
                        return Err(GameError::AlreadyHave("sword"));
                    }
                    player.has_sword = true;
                }
                Tile::Armour => {
                    if player.has_armour {
                        return Err(GameError::AlreadyHave("armour"));
                    }
                    player.has_armour = true;
                }
                Tile::Floor | Tile::Exit | Tile::Wall => {
                    return Err(GameError::NothingToPickUp);
                }
            }
        }

        self.map.clear_tile(pos);
        self.spend_action_point(id);
        self.broadcast(PlayerEvent::Change);
        Ok(())
    }

    /// Voluntarily end the turn.
    pub fn end_turn(&mut self, id: PlayerId) -> Result<(), GameError> {
        self.require_turn(id)?;
        self.pass_turn();
        Ok(())
    }

    /// Broadcast a MESSAGE to every player, the shouter included.
    pub fn shout(&self, text: &str) {
        self.broadcast(PlayerEvent::Message(text.to_string()));
    }

    /// Push the command summary to one player.
    pub fn help(&self, id: PlayerId) -> Result<(), GameError> {
        self.player(id)?
            .listener
            .notify(PlayerEvent::Message(HELP_TEXT.to_string()));
        Ok(())
    }

    /// Force a view refresh on every client.
    pub fn change_all(&self) {
        self.broadcast(PlayerEvent::Change);
    }

    /// Debug teleport. Bounds-, wall- and occupancy-checked; no turn gate
    /// and no action point cost.
    pub fn set_player_position(
        &mut self,
        id: PlayerId,
        col: i32,
        row: i32,
    ) -> Result<(), GameError> {
        if self.game_over {
            return Err(GameError::GameOver);
        }
        let target = Pos::new(col, row);
        if !self.map.is_walkable(target) {
            return Err(GameError::InvalidPosition);
        }
        if self
            .living_player_at(target)
            .map(|p| p != id)
            .unwrap_or(false)
        {
            return Err(GameError::Occupied);
        }
        self.player_mut(id)?.pos = target;
        self.broadcast(PlayerEvent::Change);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    fn player(&self, id: PlayerId) -> Result<&Player, GameError> {
        self.players.get(&id).ok_or(GameError::UnknownPlayer(id))
    }

    fn player_mut(&mut self, id: PlayerId) -> Result<&mut Player, GameError> {
        self.players.get_mut(&id).ok_or(GameError::UnknownPlayer(id))
    }

    fn living_player_at(&self, pos: Pos) -> Option<PlayerId> {
        self.players
            .iter()
            .find(|(_, p)| p.alive && p.pos == pos)
            .map(|(&id, _)| id)
    }

    /// A uniformly random free floor tile, or `None` when the map is full.
    fn pick_spawn(&mut self) -> Option<Pos> {
        let mut candidates = Vec::new();
        for row in 0..self.map.height() as i32 {
            for col in 0..self.map.width() as i32 {
                let pos = Pos::new(col, row);
                if self.map.tile(pos) == Some(Tile::Floor)
                    && self.living_player_at(pos).is_none()
                {
                    candidates.push(pos);
                }
            }
        }
        if candidates.is_empty() {
            return None;
        }
        let idx = self.rng.next_int(candidates.len() as u32) as usize;
        Some(candidates[idx])
    }

    fn require_turn(&self, id: PlayerId) -> Result<(), GameError> {
        if self.game_over {
            return Err(GameError::GameOver);
        }
        if !self.player(id)?.alive {
            return Err(GameError::Dead);
        }
        if self.turn_order.get(self.current) != Some(&id) {
            return Err(GameError::NotYourTurn);
        }
        Ok(())
    }

    fn notify(&self, id: PlayerId, event: PlayerEvent) {
        if let Some(player) = self.players.get(&id) {
            player.listener.notify(event);
        }
    }

    fn broadcast(&self, event: PlayerEvent) {
        for player in self.players.values() {
            player.listener.notify(event.clone());
        }
    }

    fn broadcast_except(&self, id: PlayerId, event: PlayerEvent) {
        for (&pid, player) in &self.players {
            if pid != id {
                player.listener.notify(event.clone());
            }
        }
    }

    fn start_turn(&mut self, id: PlayerId) {
        if let Ok(player) = self.player_mut(id) {
            player.action_points = TURN_ACTION_POINTS;
        }
        self.notify(id, PlayerEvent::StartTurn);
        self.notify(id, PlayerEvent::ActionPointsLeft(TURN_ACTION_POINTS));
    }

    /// Deduct one action point; an exhausted turn passes automatically.
    fn spend_action_point(&mut self, id: PlayerId) {
        let remaining = {
            let Ok(player) = self.player_mut(id) else { return };
            player.action_points = player.action_points.saturating_sub(1);
            player.action_points
        };
        self.notify(id, PlayerEvent::ActionPointsLeft(remaining));
        if remaining == 0 {
            self.pass_turn();
        }
    }

    /// End the current turn and open the next living player's.
    fn pass_turn(&mut self) {
        let Some(&leaving) = self.turn_order.get(self.current) else {
            return;
        };
        self.notify(leaving, PlayerEvent::EndTurn);
        self.current = (self.current + 1) % self.turn_order.len();
        self.start_turn(self.turn_order[self.current]);
    }

    fn declare_winner(&mut self, id: PlayerId) {
        self.game_over = true;
        info!("{} wins the game", id);
        self.notify(id, PlayerEvent::Win);
        self.broadcast_except(id, PlayerEvent::Lose);
    }

    /// Take a player off the map and out of the turn rotation. Their
    /// registry entry stays until the session removes itself.
    fn defeat(&mut self, id: PlayerId) {
        if let Ok(player) = self.player_mut(id) {
            player.alive = false;
        }
        if let Some(idx) = self.turn_order.iter().position(|&p| p == id) {
            self.turn_order.remove(idx);
            if idx < self.current {
                self.current -= 1;
            } else if !self.turn_order.is_empty() {
                self.current %= self.turn_order.len();
            }
        }
        info!("{} was defeated", id);
        self.notify(id, PlayerEvent::Lose);
    }
}
