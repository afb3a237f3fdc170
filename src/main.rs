//! Grimdelve Game Server
//!
//! Hosts the shared dungeon and serves the text protocol.
//!
//! ```text
//! grimdelve-server [map-file] [config.json]
//! ```

use anyhow::Context;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use grimdelve::game::engine::Dungeon;
use grimdelve::game::map::DungeonMap;
use grimdelve::network::server::{GameServer, ServerConfig};
use grimdelve::{GameRng, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    let mut args = std::env::args().skip(1);
    let map_arg = args.next();
    let config_arg = args.next();

    let mut config = match &config_arg {
        Some(path) => ServerConfig::from_file(path.as_ref())
            .with_context(|| format!("loading config {path}"))?,
        None => ServerConfig::default(),
    };
    if let Some(path) = map_arg {
        config.map_path = Some(path.into());
    }

    let map = match &config.map_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading map {}", path.display()))?;
            DungeonMap::parse(&text)
                .with_context(|| format!("parsing map {}", path.display()))?
        }
        None => DungeonMap::default_map(),
    };

    info!("Grimdelve Server v{VERSION}");
    info!(
        "map \"{}\" ({}x{}), {} gold to win",
        map.name(),
        map.width(),
        map.height(),
        map.gold_to_win()
    );

    let dungeon = Dungeon::shared(map, GameRng::from_entropy());
    let server = GameServer::new(config, dungeon);
    server.run().await?;
    Ok(())
}
