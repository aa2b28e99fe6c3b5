//! Lesson log - outcome memory for approval decisions
//!
//! Every tool approval outcome (executed, failed, denied) is recorded as a
//! lesson: tags, an action description, and the outcome. Future generation
//! calls query recent failures so agents can be warned about failure modes
//! they have already hit. A denial is recorded as a failure too, since it
//! is informative for future planning.
//!
//! [`FileLessonLog`] is the built-in implementation: one JSON object per
//! line, appended to a log file.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

/// Outcome of a recorded action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonOutcome {
    /// The action succeeded.
    Success,
    /// The action failed or was denied.
    Failure,
}

/// One recorded lesson.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    /// Keywords for later retrieval (agent ids, function names, filenames).
    pub tags: Vec<String>,
    /// What was attempted (e.g. "write_file: notes.md").
    pub action: String,
    /// How it went.
    pub outcome: LessonOutcome,
    /// Failure detail, when there is one.
    pub error_details: Option<String>,
    /// Recording time (unix milliseconds).
    pub timestamp_ms: i64,
}

impl Lesson {
    /// Record a successful action.
    pub fn success(tags: Vec<String>, action: &str) -> Self {
        Self {
            tags,
            action: action.to_string(),
            outcome: LessonOutcome::Success,
            error_details: None,
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Record a failed or denied action.
    pub fn failure(tags: Vec<String>, action: &str, details: &str) -> Self {
        Self {
            tags,
            action: action.to_string(),
            outcome: LessonOutcome::Failure,
            error_details: Some(details.to_string()),
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Returns true if this lesson carries any of the given tags.
    pub fn matches_any(&self, tags: &[String]) -> bool {
        self.tags.iter().any(|t| tags.contains(t))
    }
}

/// Contract for the outcome memory collaborator.
#[async_trait]
pub trait LessonLog: Send + Sync {
    /// Append a lesson.
    async fn record(&self, lesson: Lesson) -> Result<()>;

    /// Most recent failures matching any of the given tags, newest first.
    ///
    /// An empty tag list yields an empty result.
    async fn recent_failures(&self, tags: &[String], limit: usize) -> Result<Vec<Lesson>>;
}

/// JSONL-file-backed lesson log.
///
/// # Example
/// ```no_run
/// use roundtable::learning::{FileLessonLog, Lesson, LessonLog};
///
/// #[tokio::main]
/// async fn main() {
///     let log = FileLessonLog::new("/tmp/lessons.jsonl");
///     log.record(Lesson::success(vec!["write_file".into()], "write_file: a.txt"))
///         .await
///         .unwrap();
/// }
/// ```
pub struct FileLessonLog {
    path: PathBuf,
}

impl FileLessonLog {
    /// Create a log backed by the given file. The file and its parent
    /// directory are created on first record.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file path.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<Lesson>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut lessons = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Lesson>(line) {
                Ok(lesson) => lessons.push(lesson),
                Err(e) => warn!(error = %e, "skipping unreadable lesson line"),
            }
        }
        Ok(lessons)
    }
}

#[async_trait]
impl LessonLog for FileLessonLog {
    async fn record(&self, lesson: Lesson) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_string(&lesson)?;
        line.push('\n');

        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;

        debug!(action = %lesson.action, outcome = ?lesson.outcome, "lesson recorded");
        Ok(())
    }

    async fn recent_failures(&self, tags: &[String], limit: usize) -> Result<Vec<Lesson>> {
        if tags.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let lessons = self.read_all().await?;
        Ok(lessons
            .into_iter()
            .rev()
            .filter(|l| l.outcome == LessonOutcome::Failure && l.matches_any(tags))
            .take(limit)
            .collect())
    }
}
