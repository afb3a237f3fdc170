//! Agent Client
//!
//! Drives the pathfinding core over a real connection. A background
//! reader task parses every server line into shared state; the decision
//! loop requests a LOOK, waits out a fixed settle delay, polls until the
//! grid is in, and issues PICKUP/MOVE until the game ends or the agent is
//! walled in.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::agent::pathfind::{random_step, CostGrid, Inventory, Vision};
use crate::agent::AgentError;
use crate::core::rng::GameRng;
use crate::DEFAULT_PORT;

/// Delay after issuing LOOK before the first poll, to let the reply cross
/// the network.
const LOOK_SETTLE: Duration = Duration::from_millis(1000);

/// Poll interval while waiting for the reply after the settle delay.
const LOOK_POLL: Duration = Duration::from_millis(200);

/// How the agent's game ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Reached the exit with enough gold.
    Won,
    /// Defeated, or someone else won first.
    Lost,
}

/// Connection parameters for the agent binary.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Display name sent with HELLO.
    pub name: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            name: "Clank".to_string(),
        }
    }
}

/// State the reader task maintains for the decision loop.
#[derive(Default)]
struct AgentState {
    /// The latest fully-assembled vision window, taken by the decision
    /// loop once per cycle.
    vision: Option<Vision>,
    /// Gold collected, counted from TREASUREMOD notifications.
    gold: u32,
    /// The requirement from the GOLD notice at join.
    gold_to_win: u32,
    /// Set by WIN or LOSE; ends the decision loop.
    finished: Option<Outcome>,
}

type SharedState = Arc<Mutex<AgentState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, AgentState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The autonomous player.
pub struct Agent {
    config: AgentConfig,
    state: SharedState,
    rng: GameRng,
    // Held flags live on the agent, not in shared state: only the
    // decision loop's own pickups change them.
    has_lantern: bool,
    has_sword: bool,
    has_armour: bool,
}

impl Agent {
    /// Create an agent with a clock-seeded walk.
    pub fn new(config: AgentConfig) -> Self {
        Self::with_rng(config, GameRng::from_entropy())
    }

    /// Create an agent with a chosen seed, for reproducible runs.
    pub fn with_rng(config: AgentConfig, rng: GameRng) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(AgentState::default())),
            rng,
            has_lantern: false,
            has_sword: false,
            has_armour: false,
        }
    }

    /// Connect, join, and play until the game ends.
    ///
    /// Returns the outcome, or [`AgentError::Deadlocked`] after the
    /// distress shout when no legal move exists.
    pub async fn run(&mut self) -> Result<Outcome, AgentError> {
        let addr = (self.config.host.as_str(), self.config.port);
        let stream = TcpStream::connect(addr).await?;
        info!(
            "connected to {}:{} as \"{}\"",
            self.config.host, self.config.port, self.config.name
        );

        let (read_half, mut write_half) = stream.into_split();
        let reader = tokio::spawn(read_server_lines(
            BufReader::new(read_half).lines(),
            self.state.clone(),
        ));

        send(&mut write_half, &format!("HELLO {}", self.config.name)).await?;

        let outcome = loop {
            if let Some(outcome) = lock(&self.state).finished {
                break outcome;
            }

            let Some(vision) = self.fetch_vision(&mut write_half, &reader).await? else {
                // Game ended while we were waiting on the reply.
                continue;
            };

            let inventory = self.inventory();
            let grid = CostGrid::assign(&vision, &inventory);

            if grid.center_is_goal() {
                self.pickup_here(&vision, &mut write_half).await?;
            }

            let mut grid = grid;
            grid.propagate();

            match grid.best_direction() {
                Some(dir) => {
                    debug!("pathfinding chose {dir}");
                    send(&mut write_half, &format!("MOVE {dir}")).await?;
                }
                None => match random_step(&vision, &mut self.rng) {
                    Ok(dir) => {
                        debug!("no goal in sight, wandering {dir}");
                        send(&mut write_half, &format!("MOVE {dir}")).await?;
                    }
                    Err(AgentError::Deadlocked) => {
                        warn!("walled in, giving up");
                        send(
                            &mut write_half,
                            "SHOUT I am stuck and so will terminate.",
                        )
                        .await?;
                        return Err(AgentError::Deadlocked);
                    }
                    Err(e) => return Err(e),
                },
            }
        };

        info!("game over: {outcome:?}");
        // The server may already have hung up on a finished game; a
        // failed QUIT changes nothing about the outcome.
        let _ = send(&mut write_half, "QUIT").await;
        reader.abort();
        Ok(outcome)
    }

    /// Issue a LOOK and wait for the reader task to assemble the reply:
    /// a fixed settle delay, then short polls. `Ok(None)` means the game
    /// finished while waiting.
    async fn fetch_vision<W>(
        &mut self,
        writer: &mut W,
        reader: &tokio::task::JoinHandle<()>,
    ) -> Result<Option<Vision>, AgentError>
    where
        W: AsyncWrite + Unpin,
    {
        lock(&self.state).vision = None;
        send(writer, "LOOK").await?;
        tokio::time::sleep(LOOK_SETTLE).await;

        loop {
            {
                let mut state = lock(&self.state);
                if state.finished.is_some() {
                    return Ok(None);
                }
                if let Some(vision) = state.vision.take() {
                    return Ok(Some(vision));
                }
            }
            if reader.is_finished() {
                return Err(AgentError::ConnectionClosed);
            }
            tokio::time::sleep(LOOK_POLL).await;
        }
    }

    fn inventory(&self) -> Inventory {
        let state = lock(&self.state);
        Inventory {
            has_lantern: self.has_lantern,
            has_sword: self.has_sword,
            has_armour: self.has_armour,
            gold: state.gold,
            gold_to_win: state.gold_to_win,
        }
    }

    /// Grab whatever the agent is standing on, tracking held items
    /// optimistically; gold and health totals come back as
    /// notifications instead.
    async fn pickup_here<W>(&mut self, vision: &Vision, writer: &mut W) -> Result<(), AgentError>
    where
        W: AsyncWrite + Unpin,
    {
        match vision.center() {
            'G' => {
                info!("picking up gold");
                send(writer, "PICKUP").await?;
            }
            'H' => {
                info!("picking up health");
                send(writer, "PICKUP").await?;
            }
            'L' if !self.has_lantern => {
                info!("picking up the lantern");
                send(writer, "PICKUP").await?;
                self.has_lantern = true;
            }
            'S' if !self.has_sword => {
                info!("picking up the sword");
                send(writer, "PICKUP").await?;
                self.has_sword = true;
            }
            'A' if !self.has_armour => {
                info!("picking up the armour");
                send(writer, "PICKUP").await?;
                self.has_armour = true;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Write one command line.
async fn send<W>(writer: &mut W, line: &str) -> Result<(), AgentError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    Ok(())
}

/// Reader task: parse every server line into the shared state. Exits on
/// disconnect; the decision loop notices through the join handle.
async fn read_server_lines<R>(mut lines: Lines<R>, state: SharedState)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("read error: {e}");
                break;
            }
        };
        let line = line.trim_end_matches('\r');
        let (kind, arg) = match line.split_once(' ') {
            Some((kind, arg)) => (kind, Some(arg)),
            None => (line, None),
        };

        match kind {
            "MESSAGE" => info!("heard: {}", arg.unwrap_or_default()),
            "GOLD" => {
                if let Some(n) = arg.and_then(|a| a.trim().parse::<u32>().ok()) {
                    lock(&state).gold_to_win = n;
                }
            }
            // The total is also in the argument, but counting piles keeps
            // this robust against servers that send the bare form.
            "TREASUREMOD" => {
                let mut state = lock(&state);
                state.gold += 1;
                debug!("gold is now {}", state.gold);
            }
            "WIN" => {
                info!("we won");
                lock(&state).finished = Some(Outcome::Won);
            }
            "LOSE" => {
                info!("we lost");
                lock(&state).finished = Some(Outcome::Lost);
            }
            "LOOKREPLY" => match read_look_grid(&mut lines).await {
                Ok(vision) => lock(&state).vision = Some(vision),
                Err(e) => warn!("discarding look reply: {e}"),
            },
            "FAIL" => warn!("command failed: {}", arg.unwrap_or_default()),
            "HELLO" => debug!("{} joined", arg.unwrap_or_default()),
            "STARTTURN" | "ENDTURN" | "SUCCESS" | "CHANGE" | "HITMOD" | "AP" => {
                debug!("server: {line}");
            }
            _ => debug!("unhandled server line: {line}"),
        }
    }
}

/// Assemble the grid rows that follow a LOOKREPLY marker. The first row's
/// width fixes how many rows belong to the block.
async fn read_look_grid<R>(lines: &mut Lines<R>) -> Result<Vision, AgentError>
where
    R: AsyncBufRead + Unpin,
{
    let first = lines
        .next_line()
        .await?
        .ok_or(AgentError::ConnectionClosed)?;
    let first = first.trim_end_matches('\r').to_string();
    let width = first.chars().count();
    if width == 0 {
        return Err(AgentError::MalformedLookReply("empty first row".into()));
    }

    let mut rows = Vec::with_capacity(width);
    rows.push(first);
    for _ in 1..width {
        let row = lines
            .next_line()
            .await?
            .ok_or(AgentError::ConnectionClosed)?;
        rows.push(row.trim_end_matches('\r').to_string());
    }
    Vision::from_rows(&rows)
}
