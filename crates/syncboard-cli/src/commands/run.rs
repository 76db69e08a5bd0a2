//! Run command implementation.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use syncboard_core::connection::ConnectionStatus;
use syncboard_core::network::ClipboardEntry;
use syncboard_core::protocol::DataType;
use syncboard_core::session::Session;

use super::RunArgs;

/// Run the sync loop until Ctrl-C or end of input.
pub async fn run(args: RunArgs) -> Result<()> {
    let mut config = super::load_config();
    if let Some(port) = args.port {
        config.network.port = port;
    }
    if let Some(alias) = args.alias {
        config.general.alias = alias;
    }
    let persist = config.session.persist_connections && !args.no_persist;
    let connections_path = config.session.connections_path();

    let session = Session::new(&config);

    if persist {
        match session.load_connections(&connections_path) {
            Ok(count) if count > 0 => tracing::info!("Loaded {} saved connections", count),
            Ok(_) => {}
            Err(e) => tracing::warn!("Ignoring saved connections: {}", e),
        }
    }

    let bound = match session.start() {
        Ok(addr) => addr,
        Err(e) => {
            print_error(&e);
            return Err(e.into());
        }
    };

    println!();
    println!("Syncboard");
    println!("{}", "-".repeat(37));
    println!();
    println!("  Device:    {}", config.general.alias);
    println!("  Listening: port {}", bound.port());
    println!();
    println!("  Type a line to share it. Ctrl-C to quit.");
    println!();

    for peer in &args.connect {
        match session.new_connection(peer, peer).await {
            Ok(()) => println!("  Connecting to {}...", peer),
            Err(e) => {
                eprintln!("  Could not connect to {}", peer);
                print_error(&e);
            }
        }
    }

    let result = sync_loop(&session, config.network.poll_interval).await;

    session.stop().await;

    if persist {
        session.save_connections(&connections_path)?;
        tracing::info!("Saved connections to {}", connections_path.display());
    }

    println!();
    println!("  Stopped.");
    result
}

async fn sync_loop(session: &Session, poll_interval: std::time::Duration) -> Result<()> {
    let mut clipboard = session.subscribe_clipboard();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(poll_interval);

    loop {
        tokio::select! {
            changed = clipboard.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let entry = clipboard.borrow_and_update().clone();
                print_remote_entry(&entry);
            }
            line = lines.next_line() => {
                match line? {
                    Some(text) => {
                        if let Err(e) =
                            session.set_clipboard_data(text.into_bytes(), DataType::Text)
                        {
                            print_error(&e);
                        }
                    }
                    None => {
                        tracing::info!("End of input, shutting down");
                        return Ok(());
                    }
                }
            }
            _ = ticker.tick() => accept_requests(session),
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down");
                return Ok(());
            }
        }
    }
}

/// Accept every peer waiting on us.
fn accept_requests(session: &Session) {
    for record in session.connections() {
        if record.status == ConnectionStatus::Request {
            let address = record.address.to_string();
            session.accept_connection(&address);
            println!("  Connected with {} ({})", record.address, record.alias);
        }
    }
}

fn print_remote_entry(entry: &ClipboardEntry) {
    let Some(owner) = entry.owner else {
        return;
    };

    match entry.data_type {
        DataType::Text => {
            println!("  [{}] {}", owner.ip(), String::from_utf8_lossy(&entry.data));
        }
    }
}

fn print_error(error: &syncboard_core::Error) {
    eprintln!("  {}", error_line(error));
    if let Some(suggestion) = error.suggestion() {
        eprintln!();
        for line in suggestion.lines() {
            eprintln!("  {}", line.trim());
        }
        eprintln!();
    }
}

fn error_line(error: &syncboard_core::Error) -> String {
    let mut line = match error.code() {
        Some(code) => format!("Error [{code}]: {error}"),
        None => format!("Error: {error}"),
    };
    if error.is_recoverable() {
        line.push_str(" (temporary, try again)");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    #[test]
    fn test_error_line_shows_code_and_retry_hint() {
        let addr: SocketAddr = "192.168.1.20:24749".parse().unwrap();
        let line = error_line(&syncboard_core::Error::ConnectTimeout(addr));
        assert_eq!(
            line,
            "Error [E002]: connection to 192.168.1.20:24749 timed out (temporary, try again)"
        );
    }

    #[test]
    fn test_error_line_without_code() {
        let line = error_line(&syncboard_core::Error::PayloadTooLarge(20_000_000));
        assert_eq!(line, "Error: payload too large: 20000000 bytes");
    }
}
