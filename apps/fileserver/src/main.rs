//! SwiftLink file server entry point.

mod app;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "swiftlink", version, about = "Point-to-point file transfer over TCP")]
struct Cli {
    /// Config file (defaults to the platform config location).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Shared secret; overrides the config file.
    #[arg(short, long, global = true)]
    secret: Option<String>,

    /// Directory incoming files are stored under.
    #[arg(long, global = true)]
    receive_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept clients and receive their files.
    Serve {
        #[arg(short, long)]
        port: Option<u16>,

        #[arg(long)]
        max_clients: Option<usize>,
    },
    /// Send files to a server.
    Send {
        /// Server address, `host:port`.
        address: String,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Stay connected and receive files the server sends.
    Receive {
        /// Server address, `host:port`.
        address: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = config::Config::load(cli.config.as_deref())?;
    if let Some(secret) = cli.secret {
        config.shared_secret = secret;
    }
    if let Some(dir) = cli.receive_dir {
        config.receive_dir = dir;
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting SwiftLink");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Serve { port, max_clients } => {
                if let Some(port) = port {
                    config.port = port;
                }
                if let Some(max_clients) = max_clients {
                    config.max_clients = max_clients;
                }
                app::serve(config).await
            }
            Command::Send { address, files } => app::send(config, &address, files).await,
            Command::Receive { address } => app::receive(config, &address).await,
        }
    })
}
