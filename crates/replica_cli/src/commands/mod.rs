//! CLI command definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod clones;
pub mod serve;
pub mod teardown;

/// Replica - clone a web page into a live, editable Next.js preview
#[derive(Parser)]
#[command(name = "replica")]
#[command(version, about = "Replica - clone a web page into a live Next.js preview")]
#[command(long_about = r#"
Replica captures a page, generates a React/Next.js reimplementation with
parallel model workers, and serves it from a disposable preview environment.

COMMANDS:
  serve      → Run the HTTP API and preview proxy
  clones     → Inspect finished clones in the durable store
  teardown   → Remove preview containers left behind by earlier runs

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
  3 - Configuration error
  4 - Container runtime error
  5 - Store error
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "REPLICA_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API and preview proxy
    Serve(serve::ServeArgs),

    /// Inspect finished clones
    Clones(clones::ClonesArgs),

    /// Remove managed preview containers
    Teardown(teardown::TeardownArgs),
}
