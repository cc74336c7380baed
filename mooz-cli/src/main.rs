use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use mooz_core::Id;
use mooz_server::{RelayServer, ServerConfig};
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mooz")]
#[command(about = "Message relay and tooling for mooz mesh calls")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP message relay.
    Serve {
        #[arg(long, default_value_t = ServerConfig::default().addr)]
        addr: SocketAddr,
    },

    /// Print fresh client identifiers.
    NewId {
        #[arg(short, long, default_value_t = 1)]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Commands::Serve { addr } => {
            println!("{}", "📡 Starting mooz relay...".green().bold());

            let server = RelayServer::bind(ServerConfig { addr }).await?;
            let local = server.local_addr()?;
            println!("   🔗 POST/GET http://{}/messages/{{id}}", local);
            println!("   🔗 WS       ws://{}/subscribe/{{id}}", local);
            info!("Relay ready on {}", local);

            server.run().await.context("Relay terminated")?;
        }

        Commands::NewId { count } => {
            for _ in 0..count {
                println!("{}", Id::new().to_string().cyan());
            }
        }
    }

    Ok(())
}
