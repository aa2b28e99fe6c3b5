//! Bridge HTTP server
//!
//! Serves the bridge surface over plain HTTP for the external driver:
//!
//! ```text
//! POST /bridge/in                      submit a goal or command
//! GET  /bridge/poll                    consume-once read of the inbound slot
//! GET  /bridge/out                     non-destructive read of the latest output
//! POST /bridge/out                     app-side publish of an envelope
//! GET  /bridge/status                  slot occupancy + cycle state (never mutates)
//! POST /approvals/{entry}/{invocation} resolve a pending tool invocation
//! POST /cycle/resume                   explicitly continue a paused cycle
//! POST /cycle/stop                     request the cycle to stop
//! GET  /cycle                          cycle state introspection
//! ```
//!
//! Uses raw TCP + minimal hand-parsed HTTP rather than a web framework;
//! the surface is nine fixed routes with small JSON bodies, and the
//! binary stays lean.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::bridge::{BridgeCommand, BridgeMessage, ContextLog, Envelope, Mailbox, PublishOutcome};
use crate::error::{Result, RoundtableError};
use crate::orchestrator::{ApprovalGate, CycleState, Orchestrator, ResolutionOutcome};

/// Maximum allowed request body size (1 MB).
const MAX_BODY_SIZE: usize = 1_048_576;

/// Maximum allowed header section size (8 KB).
const MAX_HEADER_SIZE: usize = 8_192;

/// Shared references the server routes requests to.
pub struct BridgeHandles {
    /// The mailbox slots.
    pub mailbox: Arc<Mailbox>,
    /// The turn scheduler (stop/resume/state).
    pub orchestrator: Arc<Orchestrator>,
    /// The approval gate.
    pub gate: Arc<ApprovalGate>,
    /// Optional shared context log, appended on submit and publish.
    pub context_log: Option<Arc<ContextLog>>,
}

/// JSON body accepted by `POST /bridge/in`.
#[derive(Debug, Deserialize)]
struct SubmitBody {
    /// Goal text; wrapped into a message envelope.
    content: Option<String>,
    /// Alternative: a structured command.
    command: Option<BridgeCommand>,
}

/// JSON body accepted by `POST /approvals/...`.
#[derive(Debug, Deserialize)]
struct ApprovalBody {
    approved: bool,
}

/// Parsed representation of an incoming HTTP request.
struct ParsedHttpRequest {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: String,
}

/// The bridge HTTP server.
///
/// Binds a `TcpListener` and serves until `stop()`. Idempotent start/stop
/// in the style of the other background services.
pub struct BridgeServer {
    host: String,
    port: u16,
    handles: Arc<BridgeHandles>,
    running: Arc<AtomicBool>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl BridgeServer {
    /// Create a server for the given bind address.
    pub fn new(host: &str, port: u16, handles: BridgeHandles) -> Self {
        Self {
            host: host.to_string(),
            port,
            handles: Arc::new(handles),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx: None,
        }
    }

    /// Whether the server is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start serving. Returns the bound address (useful with port 0).
    ///
    /// # Errors
    /// Fails if the listener cannot bind.
    pub async fn start(&mut self) -> Result<std::net::SocketAddr> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RoundtableError::Bridge("server already running".to_string()));
        }

        let bind_addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            self.running.store(false, Ordering::SeqCst);
            RoundtableError::Bridge(format!("failed to bind {}: {}", bind_addr, e))
        })?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "bridge server listening");

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        self.shutdown_tx = Some(shutdown_tx);

        let handles = Arc::clone(&self.handles);
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                debug!(peer = %peer, "bridge connection accepted");
                                let handles = Arc::clone(&handles);
                                tokio::spawn(async move {
                                    handle_connection(stream, handles).await;
                                });
                            }
                            Err(e) => warn!("bridge accept failed: {}", e),
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("bridge server shutdown signal received");
                        break;
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
            info!("bridge server stopped");
        });

        Ok(local_addr)
    }

    /// Stop serving.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = self.shutdown_tx.take() {
            if tx.send(()).is_err() {
                warn!("bridge shutdown receiver already dropped");
            }
        }
    }
}

// ============================================================================
// Connection handling
// ============================================================================

async fn handle_connection(mut stream: tokio::net::TcpStream, handles: Arc<BridgeHandles>) {
    let mut buf = vec![0u8; MAX_HEADER_SIZE + MAX_BODY_SIZE];
    let mut total_read = 0usize;

    loop {
        if total_read >= buf.len() {
            write_response(&mut stream, 413, "Payload Too Large", json!({"error": "payload too large"})).await;
            return;
        }

        match tokio::time::timeout(
            std::time::Duration::from_secs(5),
            stream.read(&mut buf[total_read..]),
        )
        .await
        {
            Ok(Ok(0)) => break, // EOF
            Ok(Ok(n)) => {
                total_read += n;
                let data = &buf[..total_read];
                if let Some(header_end) = find_header_end(data) {
                    if let Ok(request) = parse_http_request(data) {
                        let expected = content_length(&request.headers);
                        let body_received = total_read - header_end - 4;
                        if body_received >= expected {
                            break;
                        }
                    } else {
                        break;
                    }
                }
            }
            Ok(Err(e)) => {
                debug!("bridge connection read error: {}", e);
                return;
            }
            Err(_) => break, // Timeout — process what we have
        }
    }

    if total_read == 0 {
        return;
    }

    let request = match parse_http_request(&buf[..total_read]) {
        Ok(request) => request,
        Err(e) => {
            debug!("bridge request parse failed: {}", e);
            write_response(&mut stream, 400, "Bad Request", json!({"error": "malformed request"}))
                .await;
            return;
        }
    };

    let (status, reason, body) = route(&request, &handles).await;
    write_response(&mut stream, status, reason, body).await;
}

async fn write_response(
    stream: &mut tokio::net::TcpStream,
    status: u16,
    reason: &str,
    body: serde_json::Value,
) {
    let payload = body.to_string();
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        payload.len(),
        payload
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!("bridge response write failed: {}", e);
    }
}

// ============================================================================
// Routing
// ============================================================================

async fn route(
    request: &ParsedHttpRequest,
    handles: &BridgeHandles,
) -> (u16, &'static str, serde_json::Value) {
    let path = request.path.split('?').next().unwrap_or(&request.path);

    match (request.method.as_str(), path) {
        ("POST", "/bridge/in") => submit(request, handles).await,
        ("GET", "/bridge/poll") => poll(handles),
        ("GET", "/bridge/out") => fetch(handles),
        ("POST", "/bridge/out") => publish(request, handles).await,
        ("GET", "/bridge/status") => status(handles),
        ("POST", "/cycle/stop") => cycle_stop(handles),
        ("POST", "/cycle/resume") => cycle_resume(handles).await,
        ("GET", "/cycle") => cycle_state(handles),
        (method, path) if path.starts_with("/approvals/") => {
            if method != "POST" {
                return method_not_allowed();
            }
            approvals(request, path, handles).await
        }
        (_, "/bridge/in") | (_, "/bridge/poll") | (_, "/bridge/out") | (_, "/bridge/status")
        | (_, "/cycle") | (_, "/cycle/stop") | (_, "/cycle/resume") => method_not_allowed(),
        _ => (404, "Not Found", json!({"error": "not found"})),
    }
}

fn method_not_allowed() -> (u16, &'static str, serde_json::Value) {
    (405, "Method Not Allowed", json!({"error": "method not allowed"}))
}

async fn submit(
    request: &ParsedHttpRequest,
    handles: &BridgeHandles,
) -> (u16, &'static str, serde_json::Value) {
    let body: SubmitBody = match serde_json::from_str(&request.body) {
        Ok(body) => body,
        Err(e) => {
            return (400, "Bad Request", json!({"error": format!("invalid JSON: {}", e)}));
        }
    };

    let envelope = match (body.content, body.command) {
        (Some(content), None) => {
            if content.trim().is_empty() {
                return (400, "Bad Request", json!({"error": "content must not be empty"}));
            }
            let message = BridgeMessage::from_driver(content.trim());
            if let Some(log) = &handles.context_log {
                log.append("driver", &message).await;
            }
            Envelope::message("driver", message)
        }
        (None, Some(command)) => Envelope::command("driver", command),
        _ => {
            return (
                400,
                "Bad Request",
                json!({"error": "provide exactly one of content or command"}),
            );
        }
    };

    let outcome = handles.mailbox.submit(envelope);
    info!(outcome = ?outcome, "driver submission stored");
    (200, "OK", json!({"status": "queued"}))
}

fn poll(handles: &BridgeHandles) -> (u16, &'static str, serde_json::Value) {
    let envelope = handles.mailbox.poll();
    (200, "OK", json!({ "envelope": envelope }))
}

fn fetch(handles: &BridgeHandles) -> (u16, &'static str, serde_json::Value) {
    let envelope = handles.mailbox.fetch();
    (200, "OK", json!({ "envelope": envelope }))
}

async fn publish(
    request: &ParsedHttpRequest,
    handles: &BridgeHandles,
) -> (u16, &'static str, serde_json::Value) {
    let envelope: Envelope = match serde_json::from_str(&request.body) {
        Ok(envelope) => envelope,
        Err(e) => {
            return (400, "Bad Request", json!({"error": format!("invalid envelope: {}", e)}));
        }
    };
    if let Err(e) = envelope.validate() {
        return (400, "Bad Request", json!({"error": e.to_string()}));
    }

    let logged_message = envelope.as_message().filter(|m| !m.thinking).cloned();
    match handles.mailbox.publish(envelope) {
        PublishOutcome::Stored => {
            if let (Some(log), Some(message)) = (&handles.context_log, logged_message) {
                log.append("engine", &message).await;
            }
            (200, "OK", json!({"status": "stored"}))
        }
        PublishOutcome::IgnoredThinking => (200, "OK", json!({"status": "ignored"})),
    }
}

fn status(handles: &BridgeHandles) -> (u16, &'static str, serde_json::Value) {
    (
        200,
        "OK",
        json!({
            "status": "ok",
            "inbound_pending": handles.mailbox.inbound_pending(),
            "outbound_available": handles.mailbox.outbound_available(),
            "cycle": {
                "state": handles.orchestrator.state().as_str(),
                "round": handles.orchestrator.round(),
                "active": handles.orchestrator.is_active(),
            }
        }),
    )
}

fn cycle_state(handles: &BridgeHandles) -> (u16, &'static str, serde_json::Value) {
    (
        200,
        "OK",
        json!({
            "state": handles.orchestrator.state().as_str(),
            "round": handles.orchestrator.round(),
            "active": handles.orchestrator.is_active(),
        }),
    )
}

fn cycle_stop(handles: &BridgeHandles) -> (u16, &'static str, serde_json::Value) {
    handles.orchestrator.stop();
    (200, "OK", json!({"status": "stopping"}))
}

async fn cycle_resume(handles: &BridgeHandles) -> (u16, &'static str, serde_json::Value) {
    if handles.orchestrator.state() != CycleState::AwaitingApproval {
        return (409, "Conflict", json!({"error": "cycle is not paused"}));
    }
    let pending = handles
        .orchestrator
        .store()
        .entries()
        .await
        .iter()
        .any(|e| e.has_pending_invocations());
    if pending {
        return (
            409,
            "Conflict",
            json!({"error": "invocations from the paused turn are still pending"}),
        );
    }

    let orchestrator = Arc::clone(&handles.orchestrator);
    tokio::spawn(async move {
        if let Err(e) = orchestrator.resume().await {
            error!(error = %e, "resume failed");
        }
    });
    (200, "OK", json!({"status": "resuming"}))
}

async fn approvals(
    request: &ParsedHttpRequest,
    path: &str,
    handles: &BridgeHandles,
) -> (u16, &'static str, serde_json::Value) {
    // /approvals/{entry_id}/{invocation_id}
    let mut parts = path.trim_start_matches("/approvals/").splitn(2, '/');
    let entry_id = match parts.next().and_then(|s| s.parse::<u64>().ok()) {
        Some(id) => id,
        None => return (400, "Bad Request", json!({"error": "invalid entry id"})),
    };
    let invocation_id = match parts.next().filter(|s| !s.is_empty()) {
        Some(id) => id,
        None => return (400, "Bad Request", json!({"error": "missing invocation id"})),
    };

    let body: ApprovalBody = match serde_json::from_str(&request.body) {
        Ok(body) => body,
        Err(e) => {
            return (400, "Bad Request", json!({"error": format!("invalid JSON: {}", e)}));
        }
    };

    match handles.gate.resolve(entry_id, invocation_id, body.approved).await {
        Ok(ResolutionOutcome::Resolved(status)) => (
            200,
            "OK",
            json!({"status": "resolved", "result": status.to_string()}),
        ),
        Ok(ResolutionOutcome::AlreadyResolved) => {
            (200, "OK", json!({"status": "already_resolved"}))
        }
        Err(RoundtableError::NotFound(what)) => {
            (404, "Not Found", json!({"error": format!("not found: {}", what)}))
        }
        Err(e) => {
            error!(error = %e, "approval resolution failed");
            (500, "Internal Server Error", json!({"error": e.to_string()}))
        }
    }
}

// ============================================================================
// HTTP parsing
// ============================================================================

/// Parse a raw HTTP request into structured parts.
///
/// Intentionally minimal — method, path, headers, UTF-8 body.
fn parse_http_request(raw: &[u8]) -> Result<ParsedHttpRequest> {
    let raw_str = std::str::from_utf8(raw)
        .map_err(|_| RoundtableError::Bridge("invalid UTF-8 in request".to_string()))?;

    let (header_section, body) = match raw_str.find("\r\n\r\n") {
        Some(pos) => (&raw_str[..pos], raw_str[pos + 4..].to_string()),
        None => (raw_str, String::new()),
    };

    let mut lines = header_section.lines();
    let request_line = lines
        .next()
        .ok_or_else(|| RoundtableError::Bridge("empty request".to_string()))?;

    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| RoundtableError::Bridge("missing method".to_string()))?
        .to_uppercase();
    let path = parts
        .next()
        .ok_or_else(|| RoundtableError::Bridge("missing path".to_string()))?
        .to_string();

    let mut headers = Vec::new();
    for line in lines {
        if let Some(colon) = line.find(':') {
            headers.push((
                line[..colon].trim().to_string(),
                line[colon + 1..].trim().to_string(),
            ));
        }
    }

    Ok(ParsedHttpRequest {
        method,
        path,
        headers,
        body,
    })
}

/// Extract the Content-Length value, defaulting to 0.
fn content_length(headers: &[(String, String)]) -> usize {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0)
}

/// Byte offset of the `\r\n\r\n` header/body separator.
fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // 1. HTTP parsing
    // -----------------------------------------------------------------------

    #[test]
    fn test_parse_http_request_post() {
        let raw = b"POST /bridge/in HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: 21\r\n\r\n{\"content\":\"a goal\"}";
        let request = parse_http_request(raw).expect("should parse");
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/bridge/in");
        assert!(request.body.contains("a goal"));
    }

    #[test]
    fn test_parse_http_request_get() {
        let raw = b"GET /bridge/status HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let request = parse_http_request(raw).expect("should parse");
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/bridge/status");
        assert!(request.body.is_empty());
    }

    #[test]
    fn test_parse_http_request_empty() {
        assert!(parse_http_request(b"").is_err());
    }

    #[test]
    fn test_content_length() {
        let headers = vec![("Content-Length".to_string(), "42".to_string())];
        assert_eq!(content_length(&headers), 42);
        assert_eq!(content_length(&[]), 0);
        let bad = vec![("Content-Length".to_string(), "x".to_string())];
        assert_eq!(content_length(&bad), 0);
    }

    #[test]
    fn test_find_header_end() {
        assert!(find_header_end(b"GET / HTTP/1.1\r\nHost: x\r\n\r\nbody").is_some());
        assert!(find_header_end(b"GET / HTTP/1.1\r\nHost: x\r\n").is_none());
    }

    // -----------------------------------------------------------------------
    // 2. Body parsing
    // -----------------------------------------------------------------------

    #[test]
    fn test_submit_body_content() {
        let body: SubmitBody = serde_json::from_str(r#"{"content": "draft a plan"}"#).unwrap();
        assert_eq!(body.content.as_deref(), Some("draft a plan"));
        assert!(body.command.is_none());
    }

    #[test]
    fn test_submit_body_command() {
        let body: SubmitBody = serde_json::from_str(r#"{"command": "stop"}"#).unwrap();
        assert_eq!(body.command, Some(BridgeCommand::Stop));
    }

    #[test]
    fn test_approval_body() {
        let body: ApprovalBody = serde_json::from_str(r#"{"approved": false}"#).unwrap();
        assert!(!body.approved);
        assert!(serde_json::from_str::<ApprovalBody>(r#"{}"#).is_err());
    }
}
