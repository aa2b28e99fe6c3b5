//! Conversation store - entry lifecycle and history access
//!
//! The scheduler talks to conversation storage through the
//! [`ConversationStore`] trait: `append` creates entries, `stream_token`
//! feeds high-frequency token appends while a turn streams, and `update`
//! finalizes an entry in a single call. `update` completion is awaited
//! before the finished message may be published through the bridge.
//!
//! [`MemoryStore`] is the in-process reference implementation. Durable
//! persistence stays behind the trait seam; this crate only guarantees
//! in-memory ordering and the streaming invariants.
//!
//! # Example
//!
//! ```
//! use roundtable::conversation::{ConversationStore, EntryUpdate, MemoryStore, NewEntry};
//!
//! # tokio_test::block_on(async {
//! let store = MemoryStore::new();
//!
//! let id = store.append(NewEntry::placeholder("lead")).await.unwrap();
//! store.stream_token(id, "Working").await;
//! store.stream_token(id, " on it").await;
//! store
//!     .update(id, EntryUpdate::new().with_content("Working on it.").with_thinking(false))
//!     .await
//!     .unwrap();
//!
//! let entry = store.entry(id).await.unwrap();
//! assert!(!entry.thinking);
//! # });
//! ```

mod types;

pub use types::{
    Citation, Entry, EntryId, EntryUpdate, InvocationStatus, NewEntry, ToolInvocation, Usage,
    SYSTEM_AUTHOR,
};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{Result, RoundtableError};

/// Contract between the scheduler and conversation storage.
///
/// `stream_token` is fire-and-forget: implementations must not block the
/// producer, may buffer, and must preserve token order. Everything else is
/// awaited by callers.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append a new entry and return its assigned id.
    ///
    /// # Errors
    /// Fails if the draft is a `thinking` entry for an agent that already
    /// has one in flight (an agent cannot speak twice concurrently).
    async fn append(&self, draft: NewEntry) -> Result<EntryId>;

    /// Append a streamed token to an in-flight entry.
    ///
    /// Unknown ids and already-finalized entries are ignored.
    async fn stream_token(&self, id: EntryId, token: &str);

    /// Apply a partial update to an entry (finalization path).
    ///
    /// # Errors
    /// Returns `NotFound` if the entry does not exist.
    async fn update(&self, id: EntryId, update: EntryUpdate) -> Result<()>;

    /// Transition an invocation's status, optionally recording a result.
    ///
    /// # Errors
    /// `NotFound` for unknown entry/invocation ids; a conversation error
    /// for non-monotonic transitions.
    async fn set_invocation(
        &self,
        entry_id: EntryId,
        invocation_id: &str,
        status: InvocationStatus,
        result: Option<String>,
    ) -> Result<()>;

    /// Fetch a single entry by id.
    async fn entry(&self, id: EntryId) -> Option<Entry>;

    /// Snapshot of the full history in order.
    async fn entries(&self) -> Vec<Entry>;

    /// Snapshot of the last `n` entries in order.
    async fn tail(&self, n: usize) -> Vec<Entry>;

    /// Remove all entries (the explicit history-clear operation).
    async fn clear(&self);
}

/// In-memory conversation store.
///
/// Entries live in an ordered vector guarded by an async `RwLock`; ids come
/// from an atomic counter so ordering by id matches insertion order.
pub struct MemoryStore {
    entries: Arc<RwLock<Vec<Entry>>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true when the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn append(&self, draft: NewEntry) -> Result<EntryId> {
        let mut entries = self.entries.write().await;

        if draft.thinking {
            if let Some(author) = &draft.author {
                let already_streaming = entries
                    .iter()
                    .any(|e| e.thinking && e.author.as_deref() == Some(author.as_str()));
                if already_streaming {
                    return Err(RoundtableError::Conversation(format!(
                        "agent {} already has a streaming entry",
                        author
                    )));
                }
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        entries.push(Entry {
            id,
            author: draft.author,
            content: draft.content,
            thinking: draft.thinking,
            citations: Vec::new(),
            invocations: Vec::new(),
            usage: None,
            timestamp: Utc::now(),
        });
        Ok(id)
    }

    async fn stream_token(&self, id: EntryId, token: &str) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
            if entry.thinking {
                entry.content.push_str(token);
            }
        }
    }

    async fn update(&self, id: EntryId, update: EntryUpdate) -> Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| RoundtableError::NotFound(format!("entry {}", id)))?;

        if let Some(content) = update.content {
            entry.content = content;
        }
        if let Some(thinking) = update.thinking {
            entry.thinking = thinking;
        }
        if let Some(citations) = update.citations {
            entry.citations = citations;
        }
        if let Some(invocations) = update.invocations {
            entry.invocations = invocations;
        }
        if let Some(usage) = update.usage {
            entry.usage = Some(usage);
        }
        Ok(())
    }

    async fn set_invocation(
        &self,
        entry_id: EntryId,
        invocation_id: &str,
        status: InvocationStatus,
        result: Option<String>,
    ) -> Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == entry_id)
            .ok_or_else(|| RoundtableError::NotFound(format!("entry {}", entry_id)))?;
        let invocation = entry
            .invocations
            .iter_mut()
            .find(|inv| inv.id == invocation_id)
            .ok_or_else(|| RoundtableError::NotFound(format!("invocation {}", invocation_id)))?;

        if !invocation.status.can_transition_to(status) {
            return Err(RoundtableError::Conversation(format!(
                "invocation {} cannot move from {} to {}",
                invocation_id, invocation.status, status
            )));
        }

        invocation.status = status;
        if result.is_some() {
            invocation.result = result;
        }
        Ok(())
    }

    async fn entry(&self, id: EntryId) -> Option<Entry> {
        self.entries.read().await.iter().find(|e| e.id == id).cloned()
    }

    async fn entries(&self) -> Vec<Entry> {
        self.entries.read().await.clone()
    }

    async fn tail(&self, n: usize) -> Vec<Entry> {
        let entries = self.entries.read().await;
        let start = entries.len().saturating_sub(n);
        entries[start..].to_vec()
    }

    async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_append_assigns_monotonic_ids() {
        let store = MemoryStore::new();
        let a = store.append(NewEntry::user("first")).await.unwrap();
        let b = store.append(NewEntry::user("second")).await.unwrap();
        assert!(b > a);

        let entries = store.entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "first");
        assert_eq!(entries[1].content, "second");
    }

    #[tokio::test]
    async fn test_streaming_lifecycle() {
        let store = MemoryStore::new();
        let id = store.append(NewEntry::placeholder("lead")).await.unwrap();

        store.stream_token(id, "Hel").await;
        store.stream_token(id, "lo").await;

        let entry = store.entry(id).await.unwrap();
        assert!(entry.thinking);
        assert_eq!(entry.content, "Hello");

        store
            .update(id, EntryUpdate::new().with_content("Hello.").with_thinking(false))
            .await
            .unwrap();

        let entry = store.entry(id).await.unwrap();
        assert!(!entry.thinking);
        assert_eq!(entry.content, "Hello.");
    }

    #[tokio::test]
    async fn test_stream_token_ignored_after_finalize() {
        let store = MemoryStore::new();
        let id = store.append(NewEntry::placeholder("lead")).await.unwrap();
        store
            .update(id, EntryUpdate::new().with_content("done").with_thinking(false))
            .await
            .unwrap();

        store.stream_token(id, " extra").await;
        assert_eq!(store.entry(id).await.unwrap().content, "done");
    }

    #[tokio::test]
    async fn test_stream_token_unknown_id_is_ignored() {
        let store = MemoryStore::new();
        // Must not panic or error
        store.stream_token(999, "ghost").await;
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_second_thinking_entry_for_same_agent_rejected() {
        let store = MemoryStore::new();
        store.append(NewEntry::placeholder("lead")).await.unwrap();

        let err = store.append(NewEntry::placeholder("lead")).await.unwrap_err();
        assert!(matches!(err, RoundtableError::Conversation(_)));
        assert!(err.to_string().contains("lead"));
    }

    #[tokio::test]
    async fn test_thinking_entries_for_different_agents_allowed() {
        let store = MemoryStore::new();
        store.append(NewEntry::placeholder("lead")).await.unwrap();
        assert!(store.append(NewEntry::placeholder("critic")).await.is_ok());
    }

    #[tokio::test]
    async fn test_thinking_allowed_again_after_finalize() {
        let store = MemoryStore::new();
        let id = store.append(NewEntry::placeholder("lead")).await.unwrap();
        store
            .update(id, EntryUpdate::new().with_thinking(false))
            .await
            .unwrap();
        assert!(store.append(NewEntry::placeholder("lead")).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_unknown_entry() {
        let store = MemoryStore::new();
        let err = store.update(42, EntryUpdate::new()).await.unwrap_err();
        assert!(matches!(err, RoundtableError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_invocation_transitions() {
        let store = MemoryStore::new();
        let id = store.append(NewEntry::placeholder("coder")).await.unwrap();
        let invocation = ToolInvocation::new("write_file", json!({"filename": "a.txt"}));
        let inv_id = invocation.id.clone();
        store
            .update(
                id,
                EntryUpdate::new()
                    .with_thinking(false)
                    .with_invocations(vec![invocation]),
            )
            .await
            .unwrap();

        store
            .set_invocation(id, &inv_id, InvocationStatus::Approved, None)
            .await
            .unwrap();
        store
            .set_invocation(
                id,
                &inv_id,
                InvocationStatus::Executed,
                Some("written".to_string()),
            )
            .await
            .unwrap();

        let entry = store.entry(id).await.unwrap();
        let inv = entry.invocation(&inv_id).unwrap();
        assert_eq!(inv.status, InvocationStatus::Executed);
        assert_eq!(inv.result.as_deref(), Some("written"));
    }

    #[tokio::test]
    async fn test_invocation_transition_never_reverts() {
        let store = MemoryStore::new();
        let id = store.append(NewEntry::placeholder("coder")).await.unwrap();
        let invocation = ToolInvocation::new("write_file", json!({}));
        let inv_id = invocation.id.clone();
        store
            .update(
                id,
                EntryUpdate::new()
                    .with_thinking(false)
                    .with_invocations(vec![invocation]),
            )
            .await
            .unwrap();

        store
            .set_invocation(id, &inv_id, InvocationStatus::Rejected, None)
            .await
            .unwrap();

        let err = store
            .set_invocation(id, &inv_id, InvocationStatus::Approved, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RoundtableError::Conversation(_)));
    }

    #[tokio::test]
    async fn test_set_invocation_not_found() {
        let store = MemoryStore::new();
        let err = store
            .set_invocation(1, "nope", InvocationStatus::Approved, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RoundtableError::NotFound(_)));

        let id = store.append(NewEntry::user("hello")).await.unwrap();
        let err = store
            .set_invocation(id, "nope", InvocationStatus::Approved, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RoundtableError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_tail_window() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .append(NewEntry::user(&format!("msg {}", i)))
                .await
                .unwrap();
        }

        let tail = store.tail(2).await;
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].content, "msg 3");
        assert_eq!(tail[1].content, "msg 4");

        // Larger window than history returns everything
        assert_eq!(store.tail(50).await.len(), 5);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryStore::new();
        store.append(NewEntry::user("hello")).await.unwrap();
        store.clear().await;
        assert!(store.is_empty().await);
    }
}
