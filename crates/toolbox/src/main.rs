//! `capstan-tools`: the demo tools, served over HTTP or stdio.

mod error;
mod http;
mod tools;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use error::Result;

#[derive(Parser)]
#[command(name = "capstan-tools")]
#[command(about = "Tool server for the capstan agent", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve tools over HTTP
    Http {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: SocketAddr,
    },
    /// Serve tools as line-delimited JSON-RPC on stdin/stdout
    Stdio,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries the protocol in stdio mode; keep logs off it either way.
    let default_level = match cli.command {
        Commands::Http { .. } => "info",
        Commands::Stdio => "warn",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let registry = tools::registry()?;

    match cli.command {
        Commands::Http { addr } => http::serve(Arc::new(registry), addr).await,
        Commands::Stdio => {
            info!(tools = registry.len(), "serving on stdio");
            mcp::serve(&registry, tokio::io::stdin(), tokio::io::stdout()).await?;
            Ok(())
        }
    }
}
