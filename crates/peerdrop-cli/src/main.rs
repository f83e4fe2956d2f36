//! Peerdrop CLI - Serverless peer-to-peer file drop
//!
//! ## Quick Start
//!
//! ```bash
//! # Exercise the transfer pipeline end to end on this machine
//! peerdrop loopback ./document.pdf
//! ```

#![allow(clippy::doc_markdown)]

use anyhow::Result;
use clap::Parser;

mod commands;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Loopback(args) => commands::loopback::run(args).await,
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,peerdrop=info,peerdrop_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
