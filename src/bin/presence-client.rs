//! # Presence Client
//!
//! Command-line heartbeat client. Connects with the configured identity,
//! logs presence updates and quality changes, and sends stdin lines as chat.
//!
//! Line commands: `/stats`, `/reconnect`, `/disconnect`, `/quit`.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use presence_server::client;
use presence_server::config::Settings;
use presence_server::shared::protocol::WireMessage;

#[tokio::main]
async fn main() -> Result<()> {
    presence_server::telemetry::init_tracing();

    let settings = Settings::load()?;
    info!(
        url = %settings.client.url,
        user_id = %settings.client.user_id,
        ping_interval_ms = settings.client.ping_interval_ms,
        "Starting presence client"
    );

    let (handle, mut messages) = client::spawn(settings.client)?;
    let mut snapshots = handle.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last_seen = handle.snapshot();

    loop {
        tokio::select! {
            message = messages.recv() => match message {
                Some(WireMessage::StatusUpdate(update)) => {
                    let online: Vec<_> = update.data.iter().map(|e| e.username.as_str()).collect();
                    info!(count = online.len(), online = ?online, "Presence updated");
                }
                Some(WireMessage::ChatMessage(chat)) => {
                    info!(from = %chat.username, "{}", chat.message);
                }
                Some(_) => {}
                None => break,
            },
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = snapshots.borrow_and_update().clone();
                if current.state != last_seen.state || current.quality != last_seen.quality {
                    info!(
                        state = %current.state,
                        quality = ?current.quality,
                        rtt_ms = ?current.last_rtt_ms,
                        "Connection changed"
                    );
                }
                last_seen = current;
            },
            line = lines.next_line() => match line? {
                Some(line) => match line.trim() {
                    "" => {}
                    "/quit" => break,
                    "/stats" => {
                        let snapshot = handle.snapshot();
                        println!("{}", serde_json::to_string_pretty(&snapshot)?);
                    }
                    "/reconnect" => handle.reconnect()?,
                    "/disconnect" => handle.disconnect()?,
                    text => handle.send_chat(text)?,
                },
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Shutting down presence client");
    handle.shutdown().await;
    Ok(())
}
