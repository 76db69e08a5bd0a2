//! Config command implementation.

use anyhow::Result;

use syncboard_core::config::Config;

use super::{ConfigAction, ConfigArgs};

/// Run the config command.
pub async fn run(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let config = Config::load()?;
            println!();
            println!("Syncboard Configuration");
            println!("{}", "─".repeat(50));
            println!();
            print!("{}", toml::to_string_pretty(&config)?);
            println!();
            println!("  connections file: {}", config.session.connections_path().display());
            println!();
        }

        ConfigAction::Path => {
            println!("{}", Config::config_path().display());
        }

        ConfigAction::Reset => {
            let config = Config::default();
            config.save()?;
            println!("Configuration reset to defaults.");
        }
    }

    Ok(())
}
