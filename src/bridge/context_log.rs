//! Append-only shared context log
//!
//! Every goal submitted over the bridge and every output published back is
//! appended to a markdown file in the workspace. The file is the
//! low-tech synchronization point between the engine and whatever external
//! tooling reads the workspace; it is initialized from a template and only
//! ever appended to, except for the explicit history-clear operation which
//! resets it to the template.

use std::path::PathBuf;

use chrono::Local;
use tracing::{debug, warn};

use crate::bridge::BridgeMessage;
use crate::error::Result;

const TEMPLATE: &str = "# Roundtable Shared Context\n\n\
This file is the synchronization point between the roundtable engine and\n\
external tooling working out of the same workspace. Goals arriving over the\n\
bridge and finished outputs are appended below.\n\n\
---\n## Session Log\n";

/// Append-only markdown session log.
pub struct ContextLog {
    path: PathBuf,
}

impl ContextLog {
    /// Create a log at the given path. The file is created from the
    /// template on first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file path.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Ensure the file exists, writing the template if it does not.
    pub async fn ensure_initialized(&self) -> Result<()> {
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, TEMPLATE).await?;
        debug!(path = %self.path.display(), "context log initialized");
        Ok(())
    }

    /// Append a message under a source heading.
    ///
    /// Failures are logged and swallowed: the context log is an audit aid,
    /// not a delivery guarantee, and must never stall the bridge.
    pub async fn append(&self, source: &str, message: &BridgeMessage) {
        if let Err(e) = self.try_append(source, message).await {
            warn!(error = %e, "failed to append to context log");
        }
    }

    async fn try_append(&self, source: &str, message: &BridgeMessage) -> Result<()> {
        self.ensure_initialized().await?;

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let sender = match &message.author {
            Some(agent) => format!("**Agent ({})**", agent),
            None => "**User**".to_string(),
        };
        let block = format!(
            "\n\n--- {} MESSAGE [{}] ---\n{}: {}\n",
            source.to_uppercase(),
            timestamp,
            sender,
            message.content
        );

        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(block.as_bytes()).await?;
        Ok(())
    }

    /// Reset the log back to the template (history-clear path).
    pub async fn reset(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, TEMPLATE).await?;
        debug!(path = %self.path.display(), "context log reset");
        Ok(())
    }
}
