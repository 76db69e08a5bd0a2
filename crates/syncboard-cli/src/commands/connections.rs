//! Connections command implementation.

use anyhow::Result;

use syncboard_core::connection::ConnectionRegistry;

use super::ConnectionsArgs;

/// Run the connections command.
pub async fn run(args: ConnectionsArgs) -> Result<()> {
    let path = args
        .file
        .unwrap_or_else(|| super::load_config().session.connections_path());
    let registry = ConnectionRegistry::load_from(&path)?;

    if args.json {
        let records: Vec<_> = registry.iter().collect();
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if registry.is_empty() {
        println!("No saved connections.");
        return Ok(());
    }

    println!();
    println!("Saved Connections:");
    println!("{}", "─".repeat(50));
    for record in registry.iter() {
        println!("  {:<15}  {}:{}", record.alias, record.address, record.port);
    }
    println!("{}", "─".repeat(50));
    println!("  {}", path.display());

    Ok(())
}
