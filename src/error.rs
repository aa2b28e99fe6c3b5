//! Error types for Roundtable
//!
//! This module defines all error types used throughout the crate.
//! Uses `thiserror` for ergonomic error handling with automatic `Display`
//! and `Error` trait implementations.

use thiserror::Error;

/// The primary error type for Roundtable operations.
#[derive(Error, Debug)]
pub enum RoundtableError {
    /// Configuration-related errors (invalid config, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Inference provider errors (API failures, timeouts, malformed responses, etc.)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Conversation store errors (unknown entries, invariant violations, etc.)
    #[error("Conversation error: {0}")]
    Conversation(String),

    /// Bridge protocol errors (malformed envelopes, transport failures, etc.)
    #[error("Bridge error: {0}")]
    Bridge(String),

    /// Tool execution errors (unknown function, sandbox violation, write failure, etc.)
    #[error("Tool error: {0}")]
    Tool(String),

    /// Cycle state errors (start while active, resume while not paused,
    /// resume with unresolved invocations, etc.)
    #[error("Cycle error: {0}")]
    Cycle(String),

    /// Resource not found (entries, invocations, agents, etc.)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A specialized `Result` type for Roundtable operations.
pub type Result<T> = std::result::Result<T, RoundtableError>;
