//! CLI command definitions and handlers.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Load configuration with graceful fallback to defaults.
///
/// If the config file doesn't exist or can't be parsed, this falls back to
/// defaults.
pub fn load_config() -> syncboard_core::config::Config {
    syncboard_core::config::Config::load().unwrap_or_default()
}

pub mod config;
pub mod connections;
pub mod run;

/// Syncboard - clipboard syncing over the local network
#[derive(Parser)]
#[command(name = "syncboard")]
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
    /// Join the clipboard network and sync until stopped
    Run(RunArgs),

    /// Show saved connections
    Connections(ConnectionsArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the run command
#[derive(Parser)]
pub struct RunArgs {
    /// Port to listen on
    #[arg(short, long, env = "SYNCBOARD_PORT")]
    pub port: Option<u16>,

    /// Peer to connect to (IP or IP:PORT), may be repeated
    #[arg(short, long = "connect", value_name = "ADDR")]
    pub connect: Vec<String>,

    /// Name shown for this device
    #[arg(short, long)]
    pub alias: Option<String>,

    /// Don't load or save the connection list
    #[arg(long)]
    pub no_persist: bool,
}

/// Arguments for the connections command
#[derive(Parser)]
pub struct ConnectionsArgs {
    /// Connection list to read (default: the configured one)
    #[arg(long, value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the current configuration
    Show,

    /// Print the configuration file location
    Path,

    /// Reset configuration to defaults
    Reset,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args_parse() {
        let cli = Cli::try_parse_from([
            "syncboard",
            "run",
            "--port",
            "30000",
            "--connect",
            "192.168.1.20",
            "-c",
            "192.168.1.21:30001",
            "--alias",
            "desk",
        ])
        .unwrap();

        let Command::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.port, Some(30000));
        assert_eq!(args.connect, ["192.168.1.20", "192.168.1.21:30001"]);
        assert_eq!(args.alias.as_deref(), Some("desk"));
        assert!(!args.no_persist);
    }

    #[test]
    fn test_config_action_parse() {
        let cli = Cli::try_parse_from(["syncboard", "config", "path"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Config(ConfigArgs {
                action: ConfigAction::Path
            })
        ));
    }
}
