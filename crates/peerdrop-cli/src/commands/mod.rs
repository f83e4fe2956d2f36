//! CLI command definitions and handlers.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod loopback;

/// Peerdrop - Serverless peer-to-peer file drop
#[derive(Parser)]
#[command(name = "peerdrop")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Run a file through the full transfer pipeline on this machine
    Loopback(LoopbackArgs),
}

/// Arguments for the loopback command
#[derive(Parser)]
pub struct LoopbackArgs {
    /// File to transfer
    pub file: PathBuf,

    /// Chunk size in bytes
    #[arg(long, default_value_t = peerdrop_core::DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Directory for the received copy (defaults to the input's directory)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
