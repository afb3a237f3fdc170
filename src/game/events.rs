//! Player Events
//!
//! Pushes the engine sends to individual players. The engine never sees
//! the wire format; sessions convert these to protocol messages at the
//! network layer and apply the response-ordering buffer there.

/// An asynchronous push from the world to one player.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlayerEvent {
    /// Free-text broadcast (shouts, help text, server notices).
    Message(String),

    /// World state changed; clients should refresh their view.
    Change,

    /// This player's turn began.
    StartTurn,

    /// This player's turn ended.
    EndTurn,

    /// This player won the game.
    Win,

    /// This player lost (defeated, or someone else won).
    Lose,

    /// Hit points changed by the given delta.
    HitpointChange(i32),

    /// Action points remaining in the current turn.
    ActionPointsLeft(u32),

    /// Gold carried is now this total.
    TreasureChange(u32),

    /// Another player joined under this display name.
    PlayerJoined(String),
}

/// Where the engine delivers pushes for one player.
///
/// One registration per joined player, dropped on removal. Implementations
/// must be cheap and non-blocking: delivery happens under the world lock.
pub trait PlayerListener: Send + Sync {
    /// Deliver one event to the player.
    fn notify(&self, event: PlayerEvent);
}
