//! Conversation entry types
//!
//! This module defines the core types for conversation state: entries,
//! tool invocations, citations, and usage metadata.
//!
//! An entry's lifecycle: created as a placeholder with empty content and
//! `thinking = true`, mutated by high-frequency token appends while the
//! provider streams, then finalized by a single update that clears
//! `thinking` and freezes the content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Store-assigned entry identifier. Monotonically increasing, so ordering
/// by id matches conversation order.
pub type EntryId = u64;

/// Reserved author id for engine-generated notices (approval outcomes,
/// error markers). Never part of the roster.
pub const SYSTEM_AUTHOR: &str = "system";

/// Status of a tool invocation.
///
/// Transitions are monotonic: `Pending` → `Approved` | `Rejected`,
/// `Approved` → `Executed` | `Error`. Never reverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    /// Awaiting an external approval decision.
    Pending,
    /// Approved; side effect not yet performed.
    Approved,
    /// Denied by the external decision.
    Rejected,
    /// Side effect performed successfully.
    Executed,
    /// Side effect attempted and failed.
    Error,
}

impl InvocationStatus {
    /// Returns true if `next` is a legal monotonic transition from `self`.
    pub fn can_transition_to(self, next: InvocationStatus) -> bool {
        use InvocationStatus::*;
        matches!(
            (self, next),
            (Pending, Approved) | (Pending, Rejected) | (Approved, Executed) | (Approved, Error)
        )
    }

    /// Returns true once the invocation has left `Pending`.
    pub fn is_resolved(self) -> bool {
        !matches!(self, InvocationStatus::Pending)
    }
}

impl std::fmt::Display for InvocationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InvocationStatus::Pending => "pending",
            InvocationStatus::Approved => "approved",
            InvocationStatus::Rejected => "rejected",
            InvocationStatus::Executed => "executed",
            InvocationStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// A structured request, embedded in a generated turn, for an external
/// side-effecting action requiring approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Unique identifier for this invocation.
    pub id: String,
    /// Requested function name (e.g. "write_file").
    pub function: String,
    /// JSON arguments for the function.
    pub arguments: serde_json::Value,
    /// Current status.
    pub status: InvocationStatus,
    /// Result summary once executed, or failure detail on error.
    pub result: Option<String>,
}

impl ToolInvocation {
    /// Create a pending invocation with a fresh UUID.
    pub fn new(function: &str, arguments: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            function: function.to_string(),
            arguments,
            status: InvocationStatus::Pending,
            result: None,
        }
    }

    /// Create a pending invocation with a caller-supplied id (used when the
    /// provider already assigned one).
    pub fn with_id(id: &str, function: &str, arguments: serde_json::Value) -> Self {
        Self {
            id: id.to_string(),
            function: function.to_string(),
            arguments,
            status: InvocationStatus::Pending,
            result: None,
        }
    }
}

/// A source citation attached to a generated entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// Human-readable title of the source.
    pub title: String,
    /// Source URI.
    pub uri: String,
}

/// Token usage metadata from a generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,
    /// Tokens in the completion.
    pub completion_tokens: u32,
    /// Total tokens used (prompt + completion).
    pub total_tokens: u32,
}

impl Usage {
    /// Create usage metadata; the total is derived.
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// A single conversation entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Store-assigned id, monotonic within a store.
    pub id: EntryId,
    /// Authoring agent id; `None` means the human user / driver.
    pub author: Option<String>,
    /// Text content. Mutable while streaming, frozen once finalized.
    pub content: String,
    /// True while the entry is streaming/incomplete.
    pub thinking: bool,
    /// Source citations, if any.
    pub citations: Vec<Citation>,
    /// Tool invocations requested by this entry.
    pub invocations: Vec<ToolInvocation>,
    /// Usage metadata from the generation call.
    pub usage: Option<Usage>,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

impl Entry {
    /// Returns true when the entry was authored by the human user / driver.
    pub fn is_user(&self) -> bool {
        self.author.is_none()
    }

    /// Returns true if any invocation on this entry is still pending.
    pub fn has_pending_invocations(&self) -> bool {
        self.invocations
            .iter()
            .any(|inv| inv.status == InvocationStatus::Pending)
    }

    /// Look up an invocation by id.
    pub fn invocation(&self, id: &str) -> Option<&ToolInvocation> {
        self.invocations.iter().find(|inv| inv.id == id)
    }

    /// Display label for transcripts: agent id or "user".
    pub fn author_label(&self) -> &str {
        self.author.as_deref().unwrap_or("user")
    }
}

/// Draft for a new entry, before the store assigns an id.
#[derive(Debug, Clone)]
pub struct NewEntry {
    /// Authoring agent id; `None` for the human user / driver.
    pub author: Option<String>,
    /// Initial content.
    pub content: String,
    /// Whether the entry starts in streaming state.
    pub thinking: bool,
}

impl NewEntry {
    /// A finalized user-authored entry (e.g. the injected goal).
    pub fn user(content: &str) -> Self {
        Self {
            author: None,
            content: content.to_string(),
            thinking: false,
        }
    }

    /// A finalized system notice (approval outcomes, error markers).
    pub fn system(content: &str) -> Self {
        Self {
            author: Some(SYSTEM_AUTHOR.to_string()),
            content: content.to_string(),
            thinking: true,
        }
        .finalized()
    }

    /// An empty streaming placeholder for the given agent.
    pub fn placeholder(agent_id: &str) -> Self {
        Self {
            author: Some(agent_id.to_string()),
            content: String::new(),
            thinking: true,
        }
    }

    fn finalized(mut self) -> Self {
        self.thinking = false;
        self
    }
}

/// Partial update applied when finalizing (or amending) an entry.
///
/// Unset fields leave the entry untouched.
#[derive(Debug, Clone, Default)]
pub struct EntryUpdate {
    /// Replacement content.
    pub content: Option<String>,
    /// New thinking flag (finalization sets `false`).
    pub thinking: Option<bool>,
    /// Replacement citations.
    pub citations: Option<Vec<Citation>>,
    /// Replacement invocations.
    pub invocations: Option<Vec<ToolInvocation>>,
    /// Usage metadata.
    pub usage: Option<Usage>,
}

impl EntryUpdate {
    /// An empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set replacement content (builder pattern).
    pub fn with_content(mut self, content: &str) -> Self {
        self.content = Some(content.to_string());
        self
    }

    /// Set the thinking flag (builder pattern).
    pub fn with_thinking(mut self, thinking: bool) -> Self {
        self.thinking = Some(thinking);
        self
    }

    /// Set replacement citations (builder pattern).
    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.citations = Some(citations);
        self
    }

    /// Set replacement invocations (builder pattern).
    pub fn with_invocations(mut self, invocations: Vec<ToolInvocation>) -> Self {
        self.invocations = Some(invocations);
        self
    }

    /// Set usage metadata (builder pattern).
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}
