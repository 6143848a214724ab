use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kr_core::Game;
use kr_dispatch::SyncRequest;
use kr_web::WebConfig;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "kr-cli")]
#[command(about = "Kingsroom social match engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Dispatch one event (stream batch, typed query or direct game) against a seeded store.
    Invoke {
        #[arg(long)]
        event: PathBuf,
        #[arg(long)]
        seed: Option<PathBuf>,
        /// Treat the event as a game-table stream and refresh projections.
        #[arg(long)]
        game_stream: bool,
    },
    /// Run the projection synchronizer for one saved game.
    SyncGame {
        #[arg(long)]
        game: PathBuf,
        #[arg(long)]
        previous: Option<PathBuf>,
        #[arg(long)]
        seed: Option<PathBuf>,
    },
    Serve {
        #[arg(long)]
        seed: Option<PathBuf>,
        #[arg(long)]
        port: Option<u16>,
    },
}

async fn read_json(path: &Path) -> Result<Value> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

async fn read_game(path: &Path) -> Result<Game> {
    let value = read_json(path).await?;
    serde_json::from_value(value).with_context(|| format!("decoding game in {}", path.display()))
}

fn print(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Invoke {
            event,
            seed,
            game_stream,
        } => {
            let dispatcher = kr_web::seeded_dispatcher(seed.as_deref()).await?;
            let event = read_json(&event).await?;
            let response = if game_stream {
                dispatcher.dispatch_game_stream(&event).await
            } else {
                dispatcher.dispatch(&event).await
            };
            print(&response)?;
        }
        Commands::SyncGame { game, previous, seed } => {
            let dispatcher = kr_web::seeded_dispatcher(seed.as_deref()).await?;
            let request = SyncRequest {
                game: Some(read_game(&game).await?),
                previous_game: match previous {
                    Some(path) => Some(read_game(&path).await?),
                    None => None,
                },
                ..Default::default()
            };
            let outcome = dispatcher
                .sync_request(request)
                .await?
                .context("game not found")?;
            print(&serde_json::to_value(outcome)?)?;
        }
        Commands::Serve { seed, port } => {
            let mut config = WebConfig::from_env();
            if let Some(port) = port {
                config.port = port;
            }
            if seed.is_some() {
                config.seed = seed;
            }
            kr_web::serve(config).await?;
        }
    }

    Ok(())
}
