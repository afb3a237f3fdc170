//! Grimdelve Agent
//!
//! An autonomous player: connects to a server and plays until it wins,
//! loses, or gets walled in. A deadlock is an accepted terminal outcome
//! and exits non-zero.
//!
//! ```text
//! grimdelve-agent <host> <port> [name]
//! ```

use anyhow::Context;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use grimdelve::agent::{Agent, AgentConfig, AgentError};
use grimdelve::VERSION;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    let mut args = std::env::args().skip(1);
    let defaults = AgentConfig::default();
    let host = args.next().unwrap_or(defaults.host);
    let port = match args.next() {
        Some(port) => port.parse::<u16>().context("port must be a number")?,
        None => defaults.port,
    };
    let name = args.next().unwrap_or(defaults.name);

    info!("Grimdelve Agent v{VERSION}");

    let mut agent = Agent::new(AgentConfig { host, port, name });
    match agent.run().await {
        Ok(outcome) => {
            info!("finished: {outcome:?}");
            Ok(())
        }
        Err(AgentError::Deadlocked) => {
            error!("{}", AgentError::Deadlocked);
            std::process::exit(1);
        }
        Err(e) => Err(e).context("agent failed"),
    }
}
