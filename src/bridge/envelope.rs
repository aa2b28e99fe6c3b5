//! Bridge protocol envelopes
//!
//! Every item crossing the bridge is wrapped in a versioned envelope
//! carrying a source tag and a payload that is either a conversation
//! message or a structured command. The envelope keeps the transport
//! swappable without touching the application logic.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::conversation::Entry;
use crate::error::{Result, RoundtableError};

/// Current bridge protocol version.
pub const PROTOCOL_VERSION: &str = "1.0";

/// A message payload as it travels over the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeMessage {
    /// Entry id on the sending side (stringly typed over the wire).
    pub id: String,
    /// Authoring agent id; `None` for the human user / driver.
    pub author: Option<String>,
    /// Text content.
    pub content: String,
    /// True while the message is streaming/incomplete. Partial content
    /// must never be published to the driver.
    #[serde(default)]
    pub thinking: bool,
    /// Creation time (unix milliseconds).
    pub timestamp_ms: i64,
}

impl BridgeMessage {
    /// Build a driver-authored message from raw content.
    pub fn from_driver(content: &str) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: now.to_string(),
            author: None,
            content: content.to_string(),
            thinking: false,
            timestamp_ms: now,
        }
    }

    /// Build a message from a conversation entry.
    pub fn from_entry(entry: &Entry) -> Self {
        Self {
            id: entry.id.to_string(),
            author: entry.author.clone(),
            content: entry.content.clone(),
            thinking: entry.thinking,
            timestamp_ms: entry.timestamp.timestamp_millis(),
        }
    }
}

/// A structured command payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeCommand {
    /// Request the active cycle to stop.
    Stop,
    /// Clear the conversation history (and reset the context log).
    Clear,
}

/// Envelope payload: a message or a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnvelopePayload {
    /// A conversation message.
    Message {
        /// The wrapped message.
        message: BridgeMessage,
    },
    /// A structured command.
    Command {
        /// The wrapped command.
        command: BridgeCommand,
    },
}

/// A versioned bridge envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version.
    pub ver: String,
    /// Sender tag (e.g. "driver", "engine").
    pub source: String,
    /// Creation time (unix milliseconds).
    pub timestamp_ms: i64,
    /// The payload.
    #[serde(flatten)]
    pub payload: EnvelopePayload,
}

impl Envelope {
    /// Wrap a message.
    pub fn message(source: &str, message: BridgeMessage) -> Self {
        Self {
            ver: PROTOCOL_VERSION.to_string(),
            source: source.to_string(),
            timestamp_ms: Utc::now().timestamp_millis(),
            payload: EnvelopePayload::Message { message },
        }
    }

    /// Wrap a command.
    pub fn command(source: &str, command: BridgeCommand) -> Self {
        Self {
            ver: PROTOCOL_VERSION.to_string(),
            source: source.to_string(),
            timestamp_ms: Utc::now().timestamp_millis(),
            payload: EnvelopePayload::Command { command },
        }
    }

    /// The wrapped message, if this is a message envelope.
    pub fn as_message(&self) -> Option<&BridgeMessage> {
        match &self.payload {
            EnvelopePayload::Message { message } => Some(message),
            EnvelopePayload::Command { .. } => None,
        }
    }

    /// The wrapped command, if this is a command envelope.
    pub fn as_command(&self) -> Option<BridgeCommand> {
        match &self.payload {
            EnvelopePayload::Command { command } => Some(*command),
            EnvelopePayload::Message { .. } => None,
        }
    }

    /// Validate structural requirements.
    ///
    /// Violations are programming-contract errors: they surface as hard
    /// errors to the immediate caller rather than being absorbed.
    pub fn validate(&self) -> Result<()> {
        if self.ver.trim().is_empty() {
            return Err(RoundtableError::Bridge(
                "envelope missing protocol version".to_string(),
            ));
        }
        if self.source.trim().is_empty() {
            return Err(RoundtableError::Bridge(
                "envelope missing source tag".to_string(),
            ));
        }
        if let EnvelopePayload::Message { message } = &self.payload {
            if message.content.trim().is_empty() {
                return Err(RoundtableError::Bridge(
                    "message envelope has empty content".to_string(),
                ));
            }
        }
        Ok(())
    }
}
