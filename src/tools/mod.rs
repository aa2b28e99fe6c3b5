//! Tool execution - the approval gate's side-effect collaborator
//!
//! Generated turns may request side-effecting actions. Those requests pause
//! the cycle until an external approval decision arrives; once approved,
//! the [`ToolExecutor`] performs the action. The executor also publishes
//! [`ToolDefinition`]s so the inference provider knows what may be
//! requested.
//!
//! [`WorkspaceExecutor`] is the built-in implementation: a `write_file`
//! function sandboxed to the workspace directory, with path traversal
//! rejected before any filesystem access.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::conversation::ToolInvocation;
use crate::error::{Result, RoundtableError};
use crate::providers::ToolDefinition;

/// Executes approved tool invocations.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Definitions of every function this executor can perform.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Perform the side effect for an approved invocation.
    ///
    /// Returns a short human-readable result summary.
    async fn execute(&self, invocation: &ToolInvocation) -> Result<String>;
}

/// Executor sandboxed to a workspace directory.
///
/// # Example
/// ```
/// use roundtable::tools::{ToolExecutor, WorkspaceExecutor};
///
/// let executor = WorkspaceExecutor::new("/tmp/roundtable-workspace");
/// assert_eq!(executor.definitions().len(), 1);
/// ```
pub struct WorkspaceExecutor {
    root: PathBuf,
}

impl WorkspaceExecutor {
    /// Create an executor rooted at the given directory.
    ///
    /// The directory is created lazily on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The workspace root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a requested filename to a path inside the workspace.
    ///
    /// Rejects absolute paths and any parent-directory component before
    /// touching the filesystem.
    fn sandboxed_path(&self, filename: &str) -> Result<PathBuf> {
        if filename.trim().is_empty() {
            return Err(RoundtableError::Tool("filename must not be empty".to_string()));
        }

        let requested = Path::new(filename);
        if requested.is_absolute() {
            return Err(RoundtableError::Tool(
                "absolute paths are not allowed".to_string(),
            ));
        }

        let mut clean = PathBuf::new();
        for component in requested.components() {
            match component {
                Component::Normal(part) => clean.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(RoundtableError::Tool(
                        "path traversal rejected".to_string(),
                    ));
                }
            }
        }

        Ok(self.root.join(clean))
    }

    async fn write_file(&self, arguments: &serde_json::Value) -> Result<String> {
        let filename = arguments
            .get("filename")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RoundtableError::Tool("write_file requires filename".to_string()))?;
        let content = arguments
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RoundtableError::Tool("write_file requires content".to_string()))?;

        let target = self.sandboxed_path(filename)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content).await?;

        info!(file = %filename, bytes = content.len(), "workspace file written");
        Ok(format!("written to {}", filename))
    }
}

#[async_trait]
impl ToolExecutor for WorkspaceExecutor {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition::new(
            "write_file",
            "Write a text file into the shared workspace. Requires external approval before it runs.",
            json!({
                "type": "object",
                "properties": {
                    "filename": {
                        "type": "string",
                        "description": "Relative path of the file inside the workspace"
                    },
                    "content": {
                        "type": "string",
                        "description": "Full file content"
                    }
                },
                "required": ["filename", "content"]
            }),
        )]
    }

    async fn execute(&self, invocation: &ToolInvocation) -> Result<String> {
        match invocation.function.as_str() {
            "write_file" => self.write_file(&invocation.arguments).await,
            other => Err(RoundtableError::Tool(format!("unknown function: {}", other))),
        }
    }
}
