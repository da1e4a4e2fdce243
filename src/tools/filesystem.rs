//! Filesystem tools for NanoClaw
//!
//! This module provides tools for reading, writing, editing and listing files.
//! Every path is resolved against the workspace in the tool context and must
//! stay inside it.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{NanoError, Result};

use super::{required_str, ToolContext, ToolDescriptor, ToolExecutor};

/// Largest file `read_file` will return.
pub const MAX_READ_BYTES: u64 = 1024 * 1024;

/// Resolve `path` against the workspace, rejecting anything that escapes it.
///
/// Resolution is lexical so that paths to files that do not exist yet (for
/// `write_file`) can be checked too.
fn resolve_path(path: &str, ctx: &ToolContext) -> Result<PathBuf> {
    let workspace = ctx.workspace.as_ref().ok_or_else(|| {
        NanoError::InvalidState("Workspace not configured; filesystem tools need one".into())
    })?;

    let candidate = Path::new(path);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        workspace.join(candidate)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(NanoError::Tool(format!("Path escapes workspace: {}", path)));
                }
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }

    if !normalized.starts_with(workspace) {
        return Err(NanoError::Tool(format!("Path escapes workspace: {}", path)));
    }
    Ok(normalized)
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

// ============================================================================
// read_file
// ============================================================================

/// Reads a UTF-8 file of at most [`MAX_READ_BYTES`].
pub struct ReadFileTool;

impl ReadFileTool {
    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new("read_file", "Read the contents of a file in the workspace")
            .param("path", "string", "Path of the file, relative to the workspace", true)
            .requires_workspace()
    }
}

#[async_trait]
impl ToolExecutor for ReadFileTool {
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        let path = required_str(&args, "path")?;
        let full_path = resolve_path(path, ctx)?;

        let metadata = tokio::fs::metadata(&full_path)
            .await
            .map_err(|_| NanoError::Tool(format!("File not found: {}", path)))?;
        if !metadata.is_file() {
            return Err(NanoError::Tool(format!("Not a file: {}", path)));
        }
        if metadata.len() > MAX_READ_BYTES {
            return Err(NanoError::Tool(format!(
                "File too large: {} bytes (max: {})",
                metadata.len(),
                MAX_READ_BYTES
            )));
        }

        let content = tokio::fs::read_to_string(&full_path)
            .await
            .map_err(|e| NanoError::Tool(format!("Failed to read file '{}': {}", path, e)))?;
        Ok(format!("File: {}\n\n{}", path, content))
    }
}

// ============================================================================
// write_file
// ============================================================================

/// Creates or overwrites a file, creating parent directories as needed.
pub struct WriteFileTool;

impl WriteFileTool {
    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            "write_file",
            "Write content to a file in the workspace, creating it if necessary",
        )
        .param("path", "string", "Path of the file, relative to the workspace", true)
        .param("content", "string", "Content to write", true)
        .requires_workspace()
    }
}

#[async_trait]
impl ToolExecutor for WriteFileTool {
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        let path = required_str(&args, "path")?;
        let content = required_str(&args, "content")?;
        let full_path = resolve_path(path, ctx)?;

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| NanoError::Tool(format!("Failed to create directories: {}", e)))?;
        }
        tokio::fs::write(&full_path, content)
            .await
            .map_err(|e| NanoError::Tool(format!("Failed to write file '{}': {}", path, e)))?;

        Ok(format!(
            "Successfully wrote {} bytes to {}",
            content.len(),
            path
        ))
    }
}

// ============================================================================
// edit_file
// ============================================================================

/// Replaces every occurrence of `old_text` with `new_text`.
pub struct EditFileTool;

impl EditFileTool {
    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new("edit_file", "Replace text in a workspace file")
            .param("path", "string", "Path of the file, relative to the workspace", true)
            .param("old_text", "string", "Exact text to find", true)
            .param("new_text", "string", "Replacement text", true)
            .requires_workspace()
    }
}

#[async_trait]
impl ToolExecutor for EditFileTool {
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        let path = required_str(&args, "path")?;
        let old_text = required_str(&args, "old_text")?;
        let new_text = required_str(&args, "new_text")?;
        let full_path = resolve_path(path, ctx)?;

        let content = tokio::fs::read_to_string(&full_path)
            .await
            .map_err(|_| NanoError::Tool(format!("File not found: {}", path)))?;
        if old_text.is_empty() || !content.contains(old_text) {
            return Err(NanoError::Tool(format!(
                "Text not found in file: {}",
                old_text
            )));
        }

        tokio::fs::write(&full_path, content.replace(old_text, new_text))
            .await
            .map_err(|e| NanoError::Tool(format!("Failed to edit file '{}': {}", path, e)))?;
        Ok(format!("Successfully edited {}", path))
    }
}

// ============================================================================
// list_dir
// ============================================================================

/// Lists a directory, directories first, then files with their sizes.
pub struct ListDirTool;

impl ListDirTool {
    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new("list_dir", "List the contents of a workspace directory")
            .param(
                "path",
                "string",
                "Directory relative to the workspace (default: workspace root)",
                false,
            )
            .requires_workspace()
    }
}

#[async_trait]
impl ToolExecutor for ListDirTool {
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        let path = args.get("path").and_then(Value::as_str).unwrap_or(".");
        let full_path = resolve_path(path, ctx)?;

        let mut reader = tokio::fs::read_dir(&full_path)
            .await
            .map_err(|_| NanoError::Tool(format!("Directory not found: {}", path)))?;

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            match entry.metadata().await {
                Ok(meta) if meta.is_dir() => dirs.push(format!("{}/", name)),
                Ok(meta) => files.push(format!("{} ({})", name, format_size(meta.len()))),
                Err(_) => continue,
            }
        }
        dirs.sort();
        files.sort();

        if dirs.is_empty() && files.is_empty() {
            return Ok(format!("{} is empty", path));
        }
        Ok(dirs.into_iter().chain(files).collect::<Vec<_>>().join("\n"))
    }
}
