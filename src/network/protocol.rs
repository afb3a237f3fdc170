//! Wire Protocol
//!
//! Newline-terminated UTF-8 text lines, `COMMAND[ ARGUMENT]`. Commands are
//! case-sensitive tokens; the argument, where one exists, is the remainder
//! of the line after the first space. Only `LOOKREPLY` spans multiple
//! lines: a marker line followed by the grid rows.

use std::fmt;

use thiserror::Error;

use crate::core::direction::Direction;

// =============================================================================
// CLIENT -> SERVER COMMANDS
// =============================================================================

/// A parsed client command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Join the game under a display name.
    Hello(String),

    /// Request the vision window.
    Look,

    /// Step one tile.
    Move(Direction),

    /// Strike an adjacent tile.
    Attack(Direction),

    /// Collect whatever the player stands on.
    Pickup,

    /// End the current turn.
    EndTurn,

    /// Leave the game.
    Quit,

    /// Request the command summary.
    Help,

    /// Broadcast rich text to every player.
    Shout(String),

    /// Force a state refresh for every client.
    Change,

    /// Debug teleport to `col row`.
    SetPlayerPos {
        /// Target column.
        col: i32,
        /// Target row.
        row: i32,
    },
}

/// Protocol violations: recoverable, rendered as `FAIL <reason>`.
///
/// The messages are part of the wire contract and clients display them
/// verbatim, so they read as plain English, not as Rust debug output.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// HELLO without a name.
    #[error("HELLO needs an argument")]
    HelloNeedsName,

    /// MOVE or ATTACK without a direction token.
    #[error("{0} needs a direction")]
    NeedsDirection(&'static str),

    /// MOVE or ATTACK with a token that is not a compass letter.
    #[error("Invalid direction")]
    InvalidDirection,

    /// LOOK or PICKUP with a trailing argument.
    #[error("{0} does not take an argument")]
    TakesNoArgument(&'static str),

    /// SHOUT with nothing to say.
    #[error("need something to shout")]
    NothingToShout,

    /// CHANGE with a trailing argument.
    #[error("Change does not need an argument")]
    ChangeTakesNoArgument,

    /// SETPLAYERPOS without an argument.
    #[error("need a position")]
    NeedsPosition,

    /// SETPLAYERPOS with the wrong number of coordinates.
    #[error("need two co-ordinates")]
    NeedsTwoCoordinates,

    /// SETPLAYERPOS with non-numeric coordinates.
    #[error("co-ordinates must be integers")]
    NonNumericCoordinates,

    /// Anything else.
    #[error("Invalid command")]
    UnknownCommand,
}

impl Command {
    /// Parse one non-empty line into a command.
    ///
    /// The caller strips line endings and skips empty lines; this only
    /// splits `COMMAND` from the optional argument and checks arity.
    pub fn parse(line: &str) -> Result<Command, CommandError> {
        let (name, arg) = match line.split_once(' ') {
            Some((name, arg)) => (name, Some(arg)),
            None => (line, None),
        };

        match name {
            "HELLO" => match arg {
                Some(name) => Ok(Command::Hello(name.to_string())),
                None => Err(CommandError::HelloNeedsName),
            },
            "LOOK" => match arg {
                None => Ok(Command::Look),
                Some(_) => Err(CommandError::TakesNoArgument("LOOK")),
            },
            "MOVE" => Ok(Command::Move(parse_direction(arg, "MOVE")?)),
            "ATTACK" => Ok(Command::Attack(parse_direction(arg, "ATTACK")?)),
            "PICKUP" => match arg {
                None => Ok(Command::Pickup),
                Some(_) => Err(CommandError::TakesNoArgument("PICKUP")),
            },
            // ENDTURN, QUIT and HELP tolerate (and ignore) stray arguments.
            "ENDTURN" => Ok(Command::EndTurn),
            "QUIT" => Ok(Command::Quit),
            "HELP" => Ok(Command::Help),
            "SHOUT" => match arg {
                Some(text) => Ok(Command::Shout(text.to_string())),
                None => Err(CommandError::NothingToShout),
            },
            "CHANGE" => match arg {
                None => Ok(Command::Change),
                Some(_) => Err(CommandError::ChangeTakesNoArgument),
            },
            "SETPLAYERPOS" => parse_position(arg),
            _ => Err(CommandError::UnknownCommand),
        }
    }
}

fn parse_direction(
    arg: Option<&str>,
    command: &'static str,
) -> Result<Direction, CommandError> {
    let token = arg.ok_or(CommandError::NeedsDirection(command))?;
    token
        .parse::<Direction>()
        .map_err(|_| CommandError::InvalidDirection)
}

fn parse_position(arg: Option<&str>) -> Result<Command, CommandError> {
    let arg = arg.ok_or(CommandError::NeedsPosition)?;
    let parts: Vec<&str> = arg.split_whitespace().collect();
    if parts.len() != 2 {
        return Err(CommandError::NeedsTwoCoordinates);
    }
    let col = parts[0]
        .parse::<i32>()
        .map_err(|_| CommandError::NonNumericCoordinates)?;
    let row = parts[1]
        .parse::<i32>()
        .map_err(|_| CommandError::NonNumericCoordinates)?;
    Ok(Command::SetPlayerPos { col, row })
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// A message from the server: a direct response or a pushed notification.
///
/// Which of the two it is depends on context, not on the variant:
/// `FAIL`, `SUCCESS`, `GOLD` and `LOOKREPLY` answer commands directly,
/// the rest arrive as pushes subject to the session ordering buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerMessage {
    /// Free-text broadcast.
    Message(String),

    /// The recipient's turn ended.
    EndTurn,

    /// Another player joined under this name.
    Hello(String),

    /// Gold required to win. First message after a join.
    Gold(u32),

    /// The recipient won.
    Win,

    /// The recipient lost.
    Lose,

    /// The recipient's turn began.
    StartTurn,

    /// Hit points changed by this delta.
    HitMod(i32),

    /// Gold carried is now this total.
    TreasureMod(u32),

    /// Action points remaining this turn.
    Ap(u32),

    /// The command succeeded.
    Success,

    /// The command failed for the given human-readable reason.
    Fail(String),

    /// The vision window: marker line plus grid rows.
    LookReply(Vec<String>),

    /// World changed; refresh the view.
    Change,
}

impl ServerMessage {
    /// Encode for the wire, without the trailing newline.
    ///
    /// `LOOKREPLY` encodes to multiple `\n`-separated lines; the writer
    /// terminates whole messages, not rows, so the block stays contiguous.
    pub fn to_wire(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMessage::Message(text) => write!(f, "MESSAGE {text}"),
            ServerMessage::EndTurn => write!(f, "ENDTURN"),
            ServerMessage::Hello(name) => write!(f, "HELLO {name}"),
            ServerMessage::Gold(n) => write!(f, "GOLD {n}"),
            ServerMessage::Win => write!(f, "WIN"),
            ServerMessage::Lose => write!(f, "LOSE"),
            ServerMessage::StartTurn => write!(f, "STARTTURN"),
            ServerMessage::HitMod(n) => write!(f, "HITMOD {n}"),
            ServerMessage::TreasureMod(n) => write!(f, "TREASUREMOD {n}"),
            ServerMessage::Ap(n) => write!(f, "AP {n}"),
            ServerMessage::Success => write!(f, "SUCCESS"),
            ServerMessage::Fail(reason) => write!(f, "FAIL {reason}"),
            ServerMessage::LookReply(rows) => {
                write!(f, "LOOKREPLY")?;
                for row in rows {
                    write!(f, "\n{row}")?;
                }
                Ok(())
            }
            ServerMessage::Change => write!(f, "CHANGE"),
        }
    }
}
