//! Driver-side commands — talk to a running engine over the bridge.

use anyhow::{bail, Result};

use roundtable::bridge::BridgeClient;
use roundtable::config::Config;

/// Submit a goal.
pub async fn send(bridge_url: &str, content: &str) -> Result<()> {
    if content.trim().is_empty() {
        bail!("goal content must not be empty");
    }
    let client = BridgeClient::new(bridge_url);
    client.submit(content).await?;
    println!("Goal queued for the roundtable.");
    Ok(())
}

/// Read the latest published output.
pub async fn fetch(bridge_url: &str, as_json: bool) -> Result<()> {
    let client = BridgeClient::new(bridge_url);
    match client.fetch().await? {
        Some(envelope) => {
            if as_json {
                println!("{}", serde_json::to_string_pretty(&envelope)?);
            } else if let Some(message) = envelope.as_message() {
                let author = message.author.as_deref().unwrap_or("user");
                println!("[{}] {}", author, message.content);
            } else {
                println!("{}", serde_json::to_string_pretty(&envelope)?);
            }
        }
        None => println!("No output published yet."),
    }
    Ok(())
}

/// Resolve a pending invocation.
pub async fn approve(
    bridge_url: &str,
    entry: u64,
    invocation: &str,
    approved: bool,
) -> Result<()> {
    let client = BridgeClient::new(bridge_url);
    let status = client.approve(entry, invocation, approved).await?;
    match status.as_str() {
        "already_resolved" => println!("Invocation was already resolved; nothing changed."),
        _ => println!(
            "Invocation {} {}.",
            invocation,
            if approved { "approved" } else { "rejected" }
        ),
    }
    Ok(())
}

/// Continue a paused cycle.
pub async fn resume(bridge_url: &str) -> Result<()> {
    let client = BridgeClient::new(bridge_url);
    client.resume().await?;
    println!("Cycle resuming.");
    Ok(())
}

/// Ask the active cycle to stop.
pub async fn stop(bridge_url: &str) -> Result<()> {
    let client = BridgeClient::new(bridge_url);
    client.stop().await?;
    println!("Stop requested.");
    Ok(())
}

/// Show bridge and cycle status.
pub async fn status(bridge_url: &str) -> Result<()> {
    let client = BridgeClient::new(bridge_url);
    if !client.probe().await {
        println!("Bridge at {} is unreachable.", bridge_url);
        return Ok(());
    }
    let status = client.status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

/// Write a default config file.
pub fn init(force: bool) -> Result<()> {
    let path = Config::path();
    if path.exists() && !force {
        bail!(
            "config already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save()?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}
