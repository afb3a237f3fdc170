//! # Grimdelve Game Server
//!
//! Turn-based multiplayer dungeon game played over a newline-terminated
//! text protocol, plus an autonomous agent that plays it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        GRIMDELVE                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── direction.rs- Compass directions and offsets            │
//! │  └── rng.rs      - Seeded Xorshift128+ PRNG                  │
//! │                                                              │
//! │  game/           - Authoritative world (synchronous)         │
//! │  ├── map.rs      - Tile grid, map text format                │
//! │  ├── events.rs   - Engine-to-player push events              │
//! │  └── engine.rs   - The Dungeon: players, turns, rules        │
//! │                                                              │
//! │  network/        - Wire protocol and sessions                │
//! │  ├── protocol.rs - Line codec: commands and replies          │
//! │  ├── session.rs  - Per-connection dispatch + ordering buffer │
//! │  └── server.rs   - TCP acceptor, one task per connection     │
//! │                                                              │
//! │  agent/          - Autonomous player (protocol client)       │
//! │  ├── pathfind.rs - Vision window, cost grid, wavefront       │
//! │  └── client.rs   - Connection loop and decision cycle        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering Guarantee
//!
//! Every command with a direct response (`SUCCESS`, `FAIL`, `GOLD`,
//! `LOOKREPLY`) is answered before any notification pushed to the same
//! session while that command was in flight; the pushes are buffered and
//! flushed in generation order right after the response. See
//! [`network::session::Outbox`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod agent;
pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use crate::core::direction::Direction;
pub use crate::core::rng::GameRng;
pub use game::engine::{Dungeon, GameError, PlayerId, SharedDungeon};
pub use game::map::{DungeonMap, Pos, Tile};
pub use network::protocol::{Command, CommandError, ServerMessage};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default server port
pub const DEFAULT_PORT: u16 = 54879;

/// Action points granted at the start of each turn
pub const TURN_ACTION_POINTS: u32 = 6;

/// Starting hit points for a freshly joined player
pub const STARTING_HIT_POINTS: i32 = 3;

/// Vision radius without a lantern (window side = 2r + 1)
pub const VISION_RADIUS: usize = 2;

/// Extra vision radius granted by a held lantern
pub const LANTERN_BONUS: usize = 1;
