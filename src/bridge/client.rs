//! Driver-side bridge client
//!
//! A thin reqwest wrapper over the bridge HTTP surface, used by the CLI
//! driver commands and by the reachability monitor. There is no persistent
//! connection: every operation is an independent, best-effort HTTP call.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::bridge::{BridgeCommand, Envelope};
use crate::error::{Result, RoundtableError};

/// Timeout for normal driver operations.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the lightweight health probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct EnvelopeReply {
    envelope: Option<Envelope>,
}

#[derive(Debug, Deserialize)]
struct StatusReply {
    status: Option<String>,
    error: Option<String>,
}

/// HTTP client for one bridge endpoint.
///
/// # Example
/// ```no_run
/// use roundtable::bridge::BridgeClient;
///
/// #[tokio::main]
/// async fn main() {
///     let client = BridgeClient::new("http://127.0.0.1:4230");
///     client.submit("draft a plan for the parser").await.unwrap();
/// }
/// ```
pub struct BridgeClient {
    base_url: String,
    client: reqwest::Client,
}

impl BridgeClient {
    /// Create a client for the given bridge base URL.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client"),
        }
    }

    /// The configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Submit a goal (driver → app). Overwrites any unconsumed submission.
    pub async fn submit(&self, content: &str) -> Result<()> {
        self.post_expecting_status("/bridge/in", &json!({ "content": content }))
            .await
            .map(|_| ())
    }

    /// Submit a structured command (driver → app).
    pub async fn submit_command(&self, command: BridgeCommand) -> Result<()> {
        self.post_expecting_status("/bridge/in", &json!({ "command": command }))
            .await
            .map(|_| ())
    }

    /// Consume-once read of the driver→app slot (app side).
    pub async fn poll(&self) -> Result<Option<Envelope>> {
        let reply: EnvelopeReply = self.get_json("/bridge/poll").await?;
        Ok(reply.envelope)
    }

    /// Non-destructive read of the latest published output (driver side).
    pub async fn fetch(&self) -> Result<Option<Envelope>> {
        let reply: EnvelopeReply = self.get_json("/bridge/out").await?;
        Ok(reply.envelope)
    }

    /// App-side publish of an envelope. Returns false when the bridge
    /// ignored it (thinking message).
    pub async fn publish(&self, envelope: &Envelope) -> Result<bool> {
        let status = self.post_expecting_status("/bridge/out", envelope).await?;
        Ok(status == "stored")
    }

    /// Resolve a pending invocation.
    pub async fn approve(
        &self,
        entry_id: u64,
        invocation_id: &str,
        approved: bool,
    ) -> Result<String> {
        self.post_expecting_status(
            &format!("/approvals/{}/{}", entry_id, invocation_id),
            &json!({ "approved": approved }),
        )
        .await
    }

    /// Explicitly resume a paused cycle.
    pub async fn resume(&self) -> Result<String> {
        self.post_expecting_status("/cycle/resume", &json!({})).await
    }

    /// Request the active cycle to stop.
    pub async fn stop(&self) -> Result<String> {
        self.post_expecting_status("/cycle/stop", &json!({})).await
    }

    /// Full bridge status JSON.
    pub async fn status(&self) -> Result<serde_json::Value> {
        self.get_json("/bridge/status").await
    }

    /// Lightweight reachability probe. Never errors; any failure means
    /// unreachable. Has no effect on slot contents.
    pub async fn probe(&self) -> bool {
        let request = self
            .client
            .get(format!("{}/bridge/status", self.base_url))
            .timeout(PROBE_TIMEOUT);
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "bridge probe failed");
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .map_err(|e| RoundtableError::Bridge(format!("request failed: {}", e)))?;
        Self::check(&response)?;
        response
            .json()
            .await
            .map_err(|e| RoundtableError::Bridge(format!("malformed reply: {}", e)))
    }

    async fn post_expecting_status<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<String> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| RoundtableError::Bridge(format!("request failed: {}", e)))?;

        let http_status = response.status();
        let reply: StatusReply = response
            .json()
            .await
            .map_err(|e| RoundtableError::Bridge(format!("malformed reply: {}", e)))?;

        if !http_status.is_success() {
            let detail = reply.error.unwrap_or_else(|| http_status.to_string());
            if http_status == reqwest::StatusCode::NOT_FOUND {
                return Err(RoundtableError::NotFound(detail));
            }
            return Err(RoundtableError::Bridge(detail));
        }

        Ok(reply.status.unwrap_or_default())
    }

    fn check(response: &reqwest::Response) -> Result<()> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(RoundtableError::Bridge(format!(
                "bridge returned {}",
                response.status()
            )))
        }
    }
}
