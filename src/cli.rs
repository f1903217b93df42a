//! CLI interface for salon-voice

use clap::{Parser, Subcommand};
use anyhow::Result;
use std::sync::Arc;

use crate::config::{self, Config};
use crate::marketplace::memory::InMemoryMarketplace;
use crate::marketplace::NullKnowledge;
use crate::voice::session_log::SessionStore;

#[derive(Parser)]
#[command(name = "salon-voice")]
#[command(about = "Voice agent backend for the salon marketplace", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the voice WebSocket server (default when no command given)
    Serve {
        /// Bind host, overrides config
        #[arg(long)]
        host: Option<String>,
        /// Bind port, overrides config
        #[arg(long)]
        port: Option<u16>,
        /// Seed the in-memory marketplace with demo shops
        #[arg(long)]
        demo: bool,
    },
    /// Configure the server
    Config {
        /// Set the OpenAI API key in the config file
        #[arg(long)]
        set_api_key: Option<String>,
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        None => serve(None, None, false).await,
        Some(Commands::Serve { host, port, demo }) => serve(host, port, demo).await,
        Some(Commands::Config { set_api_key, show }) => configure(set_api_key, show),
    }
}

async fn serve(host: Option<String>, port: Option<u16>, demo: bool) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let market = Arc::new(InMemoryMarketplace::new());
    if demo {
        let shop = market.seed_demo().await;
        println!("Seeded demo marketplace (try \"{}\")", shop.name);
    }

    let store = Arc::new(SessionStore::open(config.database.resolve_path()?).await?);
    crate::server::start(&config, market, Arc::new(NullKnowledge), store).await
}

fn configure(set_api_key: Option<String>, show: bool) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(key) = set_api_key {
        config.openai.api_key = Some(key);
        config.save()?;
        println!("API key saved");
    }
    if show {
        // Never echo the key itself
        println!("config file: {}", config::config_path()?.display());
        println!("server:      {}:{}", config.server.host, config.server.port);
        println!("model:       {}", config.openai.model);
        println!(
            "api key:     {}",
            if config.openai.api_key.is_some() || std::env::var("OPENAI_API_KEY").is_ok() {
                "set"
            } else {
                "not set"
            }
        );
        println!("database:    {}", config.database.resolve_path()?.display());
    }
    Ok(())
}
