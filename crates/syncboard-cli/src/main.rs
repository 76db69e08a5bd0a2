//! Syncboard CLI - clipboard syncing over the local network
//!
//! Every peer runs the same binary. Peers connect to each other by address,
//! and a clipboard value set on any of them is pushed to the rest.
//!
//! ## Quick Start
//!
//! ```bash
//! # On the first device
//! syncboard run
//!
//! # On the second device
//! syncboard run --connect 192.168.1.20
//! ```
//!
//! Type a line on either side and it shows up on the other.

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

use anyhow::Result;
use clap::Parser;

mod commands;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => commands::run::run(args).await,
        Command::Connections(args) => commands::connections::run(args).await,
        Command::Config(args) => commands::config::run(args).await,
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,syncboard=info,syncboard_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
