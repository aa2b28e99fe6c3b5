//! The approval gate
//!
//! Generated turns that request tools pause the cycle until an external
//! decision arrives. `resolve` applies that decision: approval performs
//! the side effect through the tool executor and records the outcome;
//! rejection records the denial. Every path appends a system-authored
//! notice entry and stamps a lesson, so future planning is warned about
//! the same failure mode.
//!
//! Resolving never resumes the round loop. The cycle stays paused until
//! an explicit resume, because one turn may carry several invocations and
//! a human may want to inspect results in between.

use std::sync::Arc;

use tracing::{info, warn};

use crate::conversation::{
    ConversationStore, EntryId, InvocationStatus, NewEntry, ToolInvocation,
};
use crate::error::{Result, RoundtableError};
use crate::learning::{Lesson, LessonLog};
use crate::tools::ToolExecutor;

/// Result of a resolve call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// The invocation was resolved; carries the terminal status.
    Resolved(InvocationStatus),
    /// The invocation had already been resolved; nothing changed.
    /// Duplicate external retries land here instead of erroring.
    AlreadyResolved,
}

/// Applies external approval decisions to pending invocations.
pub struct ApprovalGate {
    store: Arc<dyn ConversationStore>,
    executor: Arc<dyn ToolExecutor>,
    lessons: Arc<dyn LessonLog>,
}

impl ApprovalGate {
    /// Create a gate over the given collaborators.
    pub fn new(
        store: Arc<dyn ConversationStore>,
        executor: Arc<dyn ToolExecutor>,
        lessons: Arc<dyn LessonLog>,
    ) -> Self {
        Self {
            store,
            executor,
            lessons,
        }
    }

    /// Resolve one pending invocation.
    ///
    /// # Errors
    /// `NotFound` when the entry or invocation does not exist. An
    /// already-resolved invocation is a no-op success, not an error.
    pub async fn resolve(
        &self,
        entry_id: EntryId,
        invocation_id: &str,
        approved: bool,
    ) -> Result<ResolutionOutcome> {
        let entry = self
            .store
            .entry(entry_id)
            .await
            .ok_or_else(|| RoundtableError::NotFound(format!("entry {}", entry_id)))?;
        let invocation = entry
            .invocation(invocation_id)
            .cloned()
            .ok_or_else(|| RoundtableError::NotFound(format!("invocation {}", invocation_id)))?;

        if invocation.status.is_resolved() {
            info!(
                entry = entry_id,
                invocation = invocation_id,
                status = %invocation.status,
                "invocation already resolved, no-op"
            );
            return Ok(ResolutionOutcome::AlreadyResolved);
        }

        if approved {
            self.approve(entry_id, invocation).await
        } else {
            self.reject(entry_id, invocation).await
        }
    }

    async fn approve(
        &self,
        entry_id: EntryId,
        invocation: ToolInvocation,
    ) -> Result<ResolutionOutcome> {
        self.store
            .set_invocation(entry_id, &invocation.id, InvocationStatus::Approved, None)
            .await?;

        let action = action_label(&invocation);
        let tags = lesson_tags(&invocation);

        match self.executor.execute(&invocation).await {
            Ok(summary) => {
                self.store
                    .set_invocation(
                        entry_id,
                        &invocation.id,
                        InvocationStatus::Executed,
                        Some(summary.clone()),
                    )
                    .await?;
                self.record_lesson(Lesson::success(tags, &action)).await;
                self.append_notice(&format!("Action completed: {}", summary)).await;
                info!(entry = entry_id, invocation = %invocation.id, "invocation executed");
                Ok(ResolutionOutcome::Resolved(InvocationStatus::Executed))
            }
            Err(e) => {
                let detail = e.to_string();
                self.store
                    .set_invocation(
                        entry_id,
                        &invocation.id,
                        InvocationStatus::Error,
                        Some(detail.clone()),
                    )
                    .await?;
                self.record_lesson(Lesson::failure(tags, &action, &detail)).await;
                self.append_notice(&format!("Action failed: {} ({})", action, detail))
                    .await;
                warn!(entry = entry_id, invocation = %invocation.id, error = %detail, "invocation failed");
                Ok(ResolutionOutcome::Resolved(InvocationStatus::Error))
            }
        }
    }

    async fn reject(
        &self,
        entry_id: EntryId,
        invocation: ToolInvocation,
    ) -> Result<ResolutionOutcome> {
        self.store
            .set_invocation(entry_id, &invocation.id, InvocationStatus::Rejected, None)
            .await?;

        let action = action_label(&invocation);
        // A denial is informative for future planning, so it is stamped
        // as a failure outcome like any other.
        self.record_lesson(Lesson::failure(
            lesson_tags(&invocation),
            &action,
            "denied by operator",
        ))
        .await;
        self.append_notice(&format!("Action denied: {}", action)).await;
        info!(entry = entry_id, invocation = %invocation.id, "invocation rejected");
        Ok(ResolutionOutcome::Resolved(InvocationStatus::Rejected))
    }

    async fn append_notice(&self, content: &str) {
        if let Err(e) = self.store.append(NewEntry::system(content)).await {
            warn!(error = %e, "failed to append system notice");
        }
    }

    async fn record_lesson(&self, lesson: Lesson) {
        if let Err(e) = self.lessons.record(lesson).await {
            warn!(error = %e, "failed to record lesson");
        }
    }
}

/// Short action description, e.g. `write_file: notes.md`.
fn action_label(invocation: &ToolInvocation) -> String {
    match invocation.arguments.get("filename").and_then(|v| v.as_str()) {
        Some(filename) => format!("{}: {}", invocation.function, filename),
        None => invocation.function.clone(),
    }
}

/// Retrieval tags: the function name plus the filename when present.
fn lesson_tags(invocation: &ToolInvocation) -> Vec<String> {
    let mut tags = vec![invocation.function.clone()];
    if let Some(filename) = invocation.arguments.get("filename").and_then(|v| v.as_str()) {
        tags.push(filename.to_string());
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{EntryUpdate, MemoryStore, SYSTEM_AUTHOR};
    use crate::learning::{FileLessonLog, LessonOutcome};
    use crate::tools::WorkspaceExecutor;
    use serde_json::json;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<MemoryStore>,
        gate: ApprovalGate,
        lessons: Arc<FileLessonLog>,
        workspace: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path().join("workspace");
        let store = Arc::new(MemoryStore::new());
        let lessons = Arc::new(FileLessonLog::new(dir.path().join("lessons.jsonl")));
        let executor = Arc::new(WorkspaceExecutor::new(&workspace));
        let gate = ApprovalGate::new(
            Arc::clone(&store) as Arc<dyn ConversationStore>,
            executor,
            Arc::clone(&lessons) as Arc<dyn LessonLog>,
        );
        Fixture {
            _dir: dir,
            store,
            gate,
            lessons,
            workspace,
        }
    }

    /// Seed an entry carrying one pending invocation, returning both ids.
    async fn seed_invocation(
        store: &MemoryStore,
        arguments: serde_json::Value,
    ) -> (EntryId, String) {
        let entry_id = store.append(NewEntry::placeholder("coder")).await.unwrap();
        let invocation = ToolInvocation::new("write_file", arguments);
        let invocation_id = invocation.id.clone();
        store
            .update(
                entry_id,
                EntryUpdate::new()
                    .with_content("writing a file")
                    .with_thinking(false)
                    .with_invocations(vec![invocation]),
            )
            .await
            .unwrap();
        (entry_id, invocation_id)
    }

    #[tokio::test]
    async fn test_approve_executes_and_records() {
        let f = fixture();
        let (entry_id, invocation_id) = seed_invocation(
            &f.store,
            json!({"filename": "a.ts", "content": "export {}"}),
        )
        .await;

        let outcome = f.gate.resolve(entry_id, &invocation_id, true).await.unwrap();
        assert_eq!(
            outcome,
            ResolutionOutcome::Resolved(InvocationStatus::Executed)
        );

        // Side effect happened
        assert!(f.workspace.join("a.ts").exists());

        // Invocation carries the result summary
        let entry = f.store.entry(entry_id).await.unwrap();
        let invocation = entry.invocation(&invocation_id).unwrap();
        assert_eq!(invocation.status, InvocationStatus::Executed);
        assert!(invocation.result.as_deref().unwrap().contains("a.ts"));

        // System notice appended
        let entries = f.store.entries().await;
        let notice = entries.last().unwrap();
        assert_eq!(notice.author.as_deref(), Some(SYSTEM_AUTHOR));
        assert!(notice.content.contains("Action completed"));

        // Success lesson recorded (not a failure)
        let failures = f
            .lessons
            .recent_failures(&["write_file".to_string()], 5)
            .await
            .unwrap();
        assert!(failures.is_empty());
    }

    #[tokio::test]
    async fn test_approve_execution_failure_is_recorded_not_fatal() {
        let f = fixture();
        let (entry_id, invocation_id) = seed_invocation(
            &f.store,
            json!({"filename": "../escape.txt", "content": "x"}),
        )
        .await;

        let outcome = f.gate.resolve(entry_id, &invocation_id, true).await.unwrap();
        assert_eq!(outcome, ResolutionOutcome::Resolved(InvocationStatus::Error));

        let entry = f.store.entry(entry_id).await.unwrap();
        let invocation = entry.invocation(&invocation_id).unwrap();
        assert_eq!(invocation.status, InvocationStatus::Error);
        assert!(invocation.result.as_deref().unwrap().contains("traversal"));

        // Failure lesson recorded with the filename tag
        let failures = f
            .lessons
            .recent_failures(&["../escape.txt".to_string()], 5)
            .await
            .unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].outcome, LessonOutcome::Failure);
    }

    #[tokio::test]
    async fn test_reject_records_denial() {
        let f = fixture();
        let (entry_id, invocation_id) =
            seed_invocation(&f.store, json!({"filename": "a.ts", "content": "x"})).await;

        let outcome = f.gate.resolve(entry_id, &invocation_id, false).await.unwrap();
        assert_eq!(
            outcome,
            ResolutionOutcome::Resolved(InvocationStatus::Rejected)
        );

        // No side effect
        assert!(!f.workspace.join("a.ts").exists());

        // Denial notice appended
        let entries = f.store.entries().await;
        assert!(entries.last().unwrap().content.contains("Action denied"));

        // Denial stamped as failure
        let failures = f
            .lessons
            .recent_failures(&["write_file".to_string()], 5)
            .await
            .unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(
            failures[0].error_details.as_deref(),
            Some("denied by operator")
        );
    }

    #[tokio::test]
    async fn test_duplicate_resolution_is_idempotent() {
        let f = fixture();
        let (entry_id, invocation_id) =
            seed_invocation(&f.store, json!({"filename": "a.ts", "content": "x"})).await;

        f.gate.resolve(entry_id, &invocation_id, true).await.unwrap();
        let entries_after_first = f.store.entries().await.len();

        // Duplicate retry: success, no mutation
        let outcome = f.gate.resolve(entry_id, &invocation_id, true).await.unwrap();
        assert_eq!(outcome, ResolutionOutcome::AlreadyResolved);
        assert_eq!(f.store.entries().await.len(), entries_after_first);

        // Flipping the decision afterwards is also a no-op
        let outcome = f.gate.resolve(entry_id, &invocation_id, false).await.unwrap();
        assert_eq!(outcome, ResolutionOutcome::AlreadyResolved);
        let entry = f.store.entry(entry_id).await.unwrap();
        assert_eq!(
            entry.invocation(&invocation_id).unwrap().status,
            InvocationStatus::Executed
        );
    }

    #[tokio::test]
    async fn test_resolve_unknown_entry() {
        let f = fixture();
        let err = f.gate.resolve(404, "whatever", true).await.unwrap_err();
        assert!(matches!(err, RoundtableError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_unknown_invocation() {
        let f = fixture();
        let (entry_id, _) =
            seed_invocation(&f.store, json!({"filename": "a.ts", "content": "x"})).await;

        let err = f.gate.resolve(entry_id, "missing", true).await.unwrap_err();
        assert!(matches!(err, RoundtableError::NotFound(_)));
    }

    #[test]
    fn test_action_label_and_tags() {
        let invocation =
            ToolInvocation::new("write_file", json!({"filename": "src/a.ts", "content": "x"}));
        assert_eq!(action_label(&invocation), "write_file: src/a.ts");
        assert_eq!(lesson_tags(&invocation), vec!["write_file", "src/a.ts"]);

        let bare = ToolInvocation::new("write_file", json!({}));
        assert_eq!(action_label(&bare), "write_file");
        assert_eq!(lesson_tags(&bare), vec!["write_file"]);
    }
}
