//! The autonomous player.
//!
//! The agent is an ordinary protocol client: it joins with HELLO, then
//! loops LOOK → decide → MOVE/PICKUP until it wins, loses, or walls it in.
//! [`pathfind`] is the pure decision core; [`client`] drives it over TCP.

pub mod client;
pub mod pathfind;

use thiserror::Error;

pub use client::{Agent, AgentConfig, Outcome};
pub use pathfind::{CostGrid, Inventory, Vision};

/// Terminal agent failures.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Every cardinal neighbor is a wall. Announced with a distress
    /// shout, then the agent exits non-zero: an accepted terminal
    /// outcome, not a bug to retry.
    #[error("the agent is walled in and cannot move")]
    Deadlocked,

    /// The server hung up mid-game.
    #[error("server closed the connection")]
    ConnectionClosed,

    /// A LOOKREPLY grid that is not a square odd-sided block.
    #[error("malformed look reply: {0}")]
    MalformedLookReply(String),

    /// Transport failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
