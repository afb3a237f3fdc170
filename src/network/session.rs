//! Session Engine
//!
//! One [`Session`] per connection: parses command lines, drives the shared
//! [`Dungeon`], and owns the response-ordering buffer.
//!
//! ## Ordering
//!
//! Every command with a direct response marks the session as awaiting
//! before it touches the world. Any notification pushed to this session
//! while the flag is up, whether by this command's own side effects or by
//! other sessions' commands running on other tasks, lands in the buffer instead
//! of the socket. Sending the response drains the buffer in generation
//! order and clears the flag, all under one lock, so an interleaved push
//! can never split the response from its flush or jump the queue.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::game::engine::{Dungeon, PlayerId, SharedDungeon};
use crate::game::events::{PlayerEvent, PlayerListener};
use crate::network::protocol::{Command, ServerMessage};

/// What the connection loop should do after a line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading.
    Continue,
    /// The client quit; close the connection cleanly.
    Quit,
}

/// Fatal precondition violations: the client broke the session contract
/// and the connection is torn down.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Any command other than HELLO before joining.
    #[error("command received before HELLO")]
    CommandBeforeHello,

    /// A second HELLO on an already-joined session.
    #[error("HELLO received twice on one session")]
    DoubleHello,
}

/// The outbound side of one session: a writer channel plus the ordering
/// buffer. Shared between the session (responses) and the world's
/// listener registry (pushes), which is why it is its own type behind an
/// `Arc` rather than a field of [`Session`].
pub struct Outbox {
    tx: mpsc::UnboundedSender<String>,
    state: Mutex<OutboxState>,
}

#[derive(Default)]
struct OutboxState {
    awaiting_response: bool,
    buffer: Vec<String>,
}

impl Outbox {
    /// Wrap a writer channel. Lines sent on `tx` carry no terminator; the
    /// writer task appends the newline.
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Arc<Outbox> {
        Arc::new(Outbox {
            tx,
            state: Mutex::new(OutboxState::default()),
        })
    }

    fn state(&self) -> MutexGuard<'_, OutboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue or send a notification. Buffered while a response is
    /// pending, sent immediately otherwise.
    pub fn push(&self, msg: &ServerMessage) {
        let mut state = self.state();
        if state.awaiting_response {
            state.buffer.push(msg.to_wire());
        } else {
            // A closed channel means the connection is gone; the reader
            // side is what notices and unwinds.
            let _ = self.tx.send(msg.to_wire());
        }
    }

    /// Mark a direct response as pending. Must be called before the world
    /// is touched, so side-effect pushes of the command itself buffer too.
    pub fn begin_command(&self) {
        let mut state = self.state();
        debug_assert!(
            !state.awaiting_response,
            "second command began before the first response was sent"
        );
        state.awaiting_response = true;
    }

    /// Send the direct response, then flush the buffer in FIFO order and
    /// clear the awaiting flag, atomically with respect to [`push`].
    ///
    /// [`push`]: Outbox::push
    pub fn respond(&self, msg: &ServerMessage) {
        let mut state = self.state();
        let _ = self.tx.send(msg.to_wire());
        for line in state.buffer.drain(..) {
            let _ = self.tx.send(line);
        }
        state.awaiting_response = false;
    }
}

impl PlayerListener for Outbox {
    fn notify(&self, event: PlayerEvent) {
        self.push(&wire_message(event));
    }
}

/// Engine push → wire message.
fn wire_message(event: PlayerEvent) -> ServerMessage {
    match event {
        PlayerEvent::Message(text) => ServerMessage::Message(text),
        PlayerEvent::Change => ServerMessage::Change,
        PlayerEvent::StartTurn => ServerMessage::StartTurn,
        PlayerEvent::EndTurn => ServerMessage::EndTurn,
        PlayerEvent::Win => ServerMessage::Win,
        PlayerEvent::Lose => ServerMessage::Lose,
        PlayerEvent::HitpointChange(n) => ServerMessage::HitMod(n),
        PlayerEvent::ActionPointsLeft(n) => ServerMessage::Ap(n),
        PlayerEvent::TreasureChange(n) => ServerMessage::TreasureMod(n),
        PlayerEvent::PlayerJoined(name) => ServerMessage::Hello(name),
    }
}

/// Rich-text SHOUT rewriting: a recognized prefix becomes markup around
/// the rest of the line; anything else passes through with the sender's
/// name. `/bld` is tested before `/b` so the longer prefix wins.
fn format_shout(name: &str, text: &str) -> String {
    if let Some(rest) = text.strip_prefix("/bld") {
        format!("{name}: <b>{rest}</b>")
    } else if let Some(rest) = text.strip_prefix("/itl") {
        format!("{name}: <i>{rest}</i>")
    } else if let Some(rest) = text.strip_prefix("/g") {
        format!("{name}: <font color = green>{rest}</font>")
    } else if let Some(rest) = text.strip_prefix("/r") {
        format!("{name}: <font color = red>{rest}</font>")
    } else if let Some(rest) = text.strip_prefix("/o") {
        format!("{name}: <font color = orange>{rest}</font>")
    } else if let Some(rest) = text.strip_prefix("/b") {
        format!("{name}: <font color = blue>{rest}</font>")
    } else {
        format!("{name}: {text}")
    }
}

/// Per-connection command dispatcher.
pub struct Session {
    dungeon: SharedDungeon,
    outbox: Arc<Outbox>,
    player_id: Option<PlayerId>,
}

impl Session {
    /// Create a session for a fresh connection. Nothing is registered
    /// with the world until HELLO arrives.
    pub fn new(dungeon: SharedDungeon, outbox: Arc<Outbox>) -> Self {
        Self {
            dungeon,
            outbox,
            player_id: None,
        }
    }

    fn world(&self) -> MutexGuard<'_, Dungeon> {
        self.dungeon.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle one line from the client.
    ///
    /// Empty lines are ignored. Malformed commands get a `FAIL` response
    /// and the session stays open; contract violations return `Err` and
    /// the caller closes the connection.
    pub fn handle_line(&mut self, line: &str) -> Result<Flow, SessionError> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            return Ok(Flow::Continue);
        }

        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(reason) => {
                debug!("rejected command line: {reason}");
                // Always a direct response, never buffered.
                self.outbox.respond(&ServerMessage::Fail(reason.to_string()));
                return Ok(Flow::Continue);
            }
        };

        let Some(id) = self.player_id else {
            return match command {
                Command::Hello(name) => self.join(&name),
                _ => Err(SessionError::CommandBeforeHello),
            };
        };

        match command {
            Command::Hello(_) => Err(SessionError::DoubleHello),

            Command::Look => {
                self.outbox.begin_command();
                let result = self.world().look(id);
                match result {
                    Ok(rows) => self.outbox.respond(&ServerMessage::LookReply(rows)),
                    Err(e) => self.respond_fail(e),
                }
                Ok(Flow::Continue)
            }

            Command::Move(dir) => {
                self.outbox.begin_command();
                let result = self.world().move_player(id, dir);
                self.respond_outcome(result);
                Ok(Flow::Continue)
            }

            Command::Attack(dir) => {
                self.outbox.begin_command();
                let result = self.world().attack(id, dir);
                self.respond_outcome(result);
                Ok(Flow::Continue)
            }

            Command::Pickup => {
                self.outbox.begin_command();
                let result = self.world().pickup(id);
                self.respond_outcome(result);
                Ok(Flow::Continue)
            }

            Command::SetPlayerPos { col, row } => {
                self.outbox.begin_command();
                let result = self.world().set_player_position(id, col, row);
                self.respond_outcome(result);
                Ok(Flow::Continue)
            }

            // The remaining commands answer through pushes, not a direct
            // response; failures still come back as an immediate FAIL.
            Command::EndTurn => {
                if let Err(e) = self.world().end_turn(id) {
                    self.respond_fail(e);
                }
                Ok(Flow::Continue)
            }

            Command::Shout(text) => {
                let world = self.world();
                match world.player_name(id) {
                    Ok(name) => world.shout(&format_shout(&name, &text)),
                    Err(e) => {
                        drop(world);
                        self.respond_fail(e);
                    }
                }
                Ok(Flow::Continue)
            }

            Command::Help => {
                if let Err(e) = self.world().help(id) {
                    self.respond_fail(e);
                }
                Ok(Flow::Continue)
            }

            Command::Change => {
                self.world().change_all();
                Ok(Flow::Continue)
            }

            Command::Quit => {
                self.leave();
                Ok(Flow::Quit)
            }
        }
    }

    /// Join the world. The direct response is the gold requirement; the
    /// contract is that it is the first thing a joined client hears, ahead
    /// of whatever the join itself broadcast.
    fn join(&mut self, name: &str) -> Result<Flow, SessionError> {
        self.outbox.begin_command();
        let result = {
            let mut world = self.world();
            let listener: Arc<dyn PlayerListener> = self.outbox.clone();
            let joined = world.join(name, listener);
            joined.map(|id| (id, world.gold_to_win()))
        };
        match result {
            Ok((id, gold)) => {
                self.player_id = Some(id);
                self.outbox.respond(&ServerMessage::Gold(gold));
            }
            Err(e) => self.respond_fail(e),
        }
        Ok(Flow::Continue)
    }

    /// Deregister from the world. Runs at most once: QUIT takes the id,
    /// so the disconnect path afterwards is a no-op, and vice versa.
    pub fn leave(&mut self) {
        if let Some(id) = self.player_id.take() {
            if let Err(e) = self.world().remove_player(id) {
                // Double removal would be a session bug, not a client one.
                warn!("removing {id} failed: {e}");
            }
        }
    }

    /// Is this session past its HELLO?
    pub fn joined(&self) -> bool {
        self.player_id.is_some()
    }

    fn respond_outcome(&self, result: Result<(), crate::game::engine::GameError>) {
        match result {
            Ok(()) => self.outbox.respond(&ServerMessage::Success),
            Err(e) => self.respond_fail(e),
        }
    }

    fn respond_fail(&self, error: crate::game::engine::GameError) {
        self.outbox
            .respond(&ServerMessage::Fail(error.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rng::GameRng;
    use crate::game::map::DungeonMap;

    fn arena() -> SharedDungeon {
        let text = "name Arena\nwin 2\n#######\n#..G..#\n#.....#\n#G...E#\n#######\n";
        Dungeon::shared(DungeonMap::parse(text).unwrap(), GameRng::new(42))
    }

    fn outbox() -> (Arc<Outbox>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Outbox::new(tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    // =====================================================================
    // Outbox ordering primitive
    // =====================================================================

    #[test]
    fn test_push_sends_immediately_when_idle() {
        let (outbox, mut rx) = outbox();
        outbox.push(&ServerMessage::Change);
        assert_eq!(drain(&mut rx), vec!["CHANGE"]);
    }

    #[test]
    fn test_pushes_buffer_behind_pending_response() {
        let (outbox, mut rx) = outbox();
        outbox.begin_command();
        outbox.push(&ServerMessage::Message("one".into()));
        outbox.push(&ServerMessage::Message("two".into()));
        assert!(drain(&mut rx).is_empty());

        outbox.respond(&ServerMessage::Success);
        assert_eq!(
            drain(&mut rx),
            vec!["SUCCESS", "MESSAGE one", "MESSAGE two"]
        );
    }

    #[test]
    fn test_buffer_clears_between_commands() {
        let (outbox, mut rx) = outbox();
        outbox.begin_command();
        outbox.push(&ServerMessage::Message("first".into()));
        outbox.respond(&ServerMessage::Success);
        drain(&mut rx);

        // The next command must not replay the old buffer.
        outbox.begin_command();
        outbox.respond(&ServerMessage::Success);
        assert_eq!(drain(&mut rx), vec!["SUCCESS"]);
    }

    #[test]
    fn test_lookreply_outruns_concurrent_shout() {
        // A LOOK is in flight when another player's shout arrives: the
        // reply must still hit the socket first.
        let (outbox, mut rx) = outbox();
        outbox.begin_command();
        outbox.push(&ServerMessage::Message("Bob: boo".into()));
        outbox.respond(&ServerMessage::LookReply(vec!["#.#".into()]));

        let lines = drain(&mut rx);
        assert_eq!(lines[0], "LOOKREPLY\n#.#");
        assert_eq!(lines[1], "MESSAGE Bob: boo");
    }

    #[test]
    fn test_push_and_flush_race_loses_nothing() {
        let (outbox, mut rx) = outbox();
        let pusher = {
            let outbox = outbox.clone();
            std::thread::spawn(move || {
                for i in 0..500 {
                    outbox.push(&ServerMessage::Message(format!("n{i}")));
                }
            })
        };
        for _ in 0..100 {
            outbox.begin_command();
            outbox.respond(&ServerMessage::Success);
        }
        pusher.join().unwrap();

        let lines = drain(&mut rx);
        let notes: Vec<&String> =
            lines.iter().filter(|l| l.starts_with("MESSAGE ")).collect();
        // Every push arrives exactly once, in generation order.
        assert_eq!(notes.len(), 500);
        for (i, line) in notes.iter().enumerate() {
            assert_eq!(**line, format!("MESSAGE n{i}"));
        }
        assert_eq!(lines.iter().filter(|l| *l == "SUCCESS").count(), 100);
    }

    // =====================================================================
    // Session dispatch
    // =====================================================================

    #[test]
    fn test_hello_answers_gold_before_join_side_effects() {
        let dungeon = arena();
        let (outbox, mut rx) = outbox();
        let mut session = Session::new(dungeon, outbox);

        assert_eq!(session.handle_line("HELLO Ada").unwrap(), Flow::Continue);
        let lines = drain(&mut rx);
        // The join broadcast a refresh and opened Ada's turn while the
        // GOLD response was pending; the response still leads.
        assert_eq!(lines, vec!["GOLD 2", "CHANGE", "STARTTURN", "AP 6"]);
    }

    #[test]
    fn test_move_response_precedes_own_change() {
        let dungeon = arena();
        let (outbox, mut rx) = outbox();
        let mut session = Session::new(dungeon, outbox);
        session.handle_line("HELLO Ada").unwrap();
        session.handle_line("SETPLAYERPOS 2 2").unwrap();
        drain(&mut rx);

        session.handle_line("MOVE E").unwrap();
        assert_eq!(drain(&mut rx), vec!["SUCCESS", "AP 5", "CHANGE"]);
    }

    #[test]
    fn test_invalid_direction_is_recoverable() {
        let dungeon = arena();
        let (outbox, mut rx) = outbox();
        let mut session = Session::new(dungeon, outbox);
        session.handle_line("HELLO Ada").unwrap();
        drain(&mut rx);

        assert_eq!(session.handle_line("MOVE Q").unwrap(), Flow::Continue);
        assert_eq!(drain(&mut rx), vec!["FAIL Invalid direction"]);

        // Session still works.
        session.handle_line("LOOK").unwrap();
        let lines = drain(&mut rx);
        assert!(lines[0].starts_with("LOOKREPLY\n"));
    }

    #[test]
    fn test_rule_rejection_is_recoverable() {
        let dungeon = arena();
        let (outbox, mut rx) = outbox();
        let mut session = Session::new(dungeon.clone(), outbox);
        session.handle_line("HELLO Ada").unwrap();
        session.handle_line("SETPLAYERPOS 1 1").unwrap();
        drain(&mut rx);

        session.handle_line("MOVE W").unwrap();
        assert_eq!(drain(&mut rx), vec!["FAIL You walked into a wall"]);
    }

    #[test]
    fn test_empty_lines_ignored() {
        let dungeon = arena();
        let (outbox, mut rx) = outbox();
        let mut session = Session::new(dungeon, outbox);
        assert_eq!(session.handle_line("").unwrap(), Flow::Continue);
        assert_eq!(session.handle_line("\r").unwrap(), Flow::Continue);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_command_before_hello_is_fatal() {
        let dungeon = arena();
        let (outbox, _rx) = outbox();
        let mut session = Session::new(dungeon, outbox);
        assert!(matches!(
            session.handle_line("LOOK"),
            Err(SessionError::CommandBeforeHello)
        ));
    }

    #[test]
    fn test_double_hello_is_fatal() {
        let dungeon = arena();
        let (outbox, _rx) = outbox();
        let mut session = Session::new(dungeon, outbox);
        session.handle_line("HELLO Ada").unwrap();
        assert!(matches!(
            session.handle_line("HELLO Ada again"),
            Err(SessionError::DoubleHello)
        ));
    }

    #[test]
    fn test_malformed_line_before_hello_is_recoverable() {
        let dungeon = arena();
        let (outbox, mut rx) = outbox();
        let mut session = Session::new(dungeon, outbox);
        assert_eq!(session.handle_line("NONSENSE").unwrap(), Flow::Continue);
        assert_eq!(drain(&mut rx), vec!["FAIL Invalid command"]);
    }

    #[test]
    fn test_quit_removes_exactly_once() {
        let dungeon = arena();
        let (outbox, _rx) = outbox();
        let mut session = Session::new(dungeon.clone(), outbox);
        session.handle_line("HELLO Ada").unwrap();
        assert_eq!(dungeon.lock().unwrap().player_count(), 1);

        assert_eq!(session.handle_line("QUIT").unwrap(), Flow::Quit);
        assert_eq!(dungeon.lock().unwrap().player_count(), 0);

        // The disconnect path after a QUIT must be a no-op.
        session.leave();
        assert_eq!(dungeon.lock().unwrap().player_count(), 0);
    }

    #[test]
    fn test_shout_reaches_other_session_with_name_prefix() {
        let dungeon = arena();
        let (a_outbox, mut a_rx) = outbox();
        let (b_outbox, mut b_rx) = outbox();
        let mut a = Session::new(dungeon.clone(), a_outbox);
        let mut b = Session::new(dungeon, b_outbox);
        a.handle_line("HELLO Ada").unwrap();
        b.handle_line("HELLO Bob").unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);

        b.handle_line("SHOUT anyone here?").unwrap();
        let a_lines = drain(&mut a_rx);
        assert_eq!(a_lines, vec!["MESSAGE Bob: anyone here?"]);
        // The shouter hears their own shout too.
        assert_eq!(drain(&mut b_rx), vec!["MESSAGE Bob: anyone here?"]);
    }

    #[test]
    fn test_endturn_has_no_direct_response() {
        let dungeon = arena();
        let (outbox, mut rx) = outbox();
        let mut session = Session::new(dungeon, outbox);
        session.handle_line("HELLO Ada").unwrap();
        drain(&mut rx);

        session.handle_line("ENDTURN").unwrap();
        // Lone player: the turn wraps straight back around.
        assert_eq!(drain(&mut rx), vec!["ENDTURN", "STARTTURN", "AP 6"]);
    }

    #[test]
    fn test_help_is_a_message_push() {
        let dungeon = arena();
        let (outbox, mut rx) = outbox();
        let mut session = Session::new(dungeon, outbox);
        session.handle_line("HELLO Ada").unwrap();
        drain(&mut rx);

        session.handle_line("HELP").unwrap();
        let lines = drain(&mut rx);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("MESSAGE Commands: HELLO"));
    }

    // =====================================================================
    // Shout markup
    // =====================================================================

    #[test]
    fn test_shout_markup_bold_italic() {
        assert_eq!(format_shout("Ada", "/bld hi"), "Ada: <b> hi</b>");
        assert_eq!(format_shout("Ada", "/itl hi"), "Ada: <i> hi</i>");
    }

    #[test]
    fn test_shout_markup_colors() {
        assert_eq!(
            format_shout("Ada", "/g go"),
            "Ada: <font color = green> go</font>"
        );
        assert_eq!(
            format_shout("Ada", "/r stop"),
            "Ada: <font color = red> stop</font>"
        );
        assert_eq!(
            format_shout("Ada", "/o mind"),
            "Ada: <font color = orange> mind</font>"
        );
        assert_eq!(
            format_shout("Ada", "/b calm"),
            "Ada: <font color = blue> calm</font>"
        );
    }

    #[test]
    fn test_shout_markup_longest_prefix_wins() {
        // "/bld" must not be read as "/b" + "ld".
        assert_eq!(format_shout("Ada", "/bldx"), "Ada: <b>x</b>");
    }

    #[test]
    fn test_shout_plain_text_passes_through() {
        assert_eq!(format_shout("Ada", "onward"), "Ada: onward");
    }
}
