//! Built-in tools that read and modify files on the host.
//!
//! Paths are resolved the same way the policy engine resolves them, so the
//! path a tool touches is the path that was authorized.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{ToolError, ToolResult};
use crate::policy::path::resolve;
use crate::policy::ResourceAccess;
use crate::tools::{
    opt_str_arg, opt_u64_arg, str_arg, ParamType, Tool, ToolContext, ToolParameter,
};

fn path_arg(args: &Map<String, Value>, name: &str) -> ToolResult<PathBuf> {
    Ok(resolve(Path::new(str_arg(args, name)?)))
}

/// Like `From<io::Error>`, but names the path when it is missing.
fn io_error(e: std::io::Error, path: &Path) -> ToolError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ToolError::NotFound(path.display().to_string())
    } else {
        ToolError::from(e)
    }
}

/// Lines `start..=end` (1-indexed, both optional, clamped to the content).
fn line_range(content: &str, start: Option<u64>, end: Option<u64>) -> String {
    if start.is_none() && end.is_none() {
        return content.to_string();
    }
    let lines: Vec<&str> = content.split('\n').collect();
    let len = lines.len();
    let from = start.map(|n| n.saturating_sub(1) as usize).unwrap_or(0).min(len);
    let to = end.map(|n| n as usize).unwrap_or(len).min(len).max(from);
    lines[from..to].join("\n")
}

// ── file_read ────────────────────────────────────────────

pub struct FileReadTool;

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file, optionally limited to a line range"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("path", ParamType::String, "Absolute or relative file path"),
            ToolParameter::optional(
                "start_line",
                ParamType::Integer,
                "First line to return (1-indexed)",
            ),
            ToolParameter::optional(
                "end_line",
                ParamType::Integer,
                "Last line to return (1-indexed)",
            ),
        ]
    }

    fn accesses(&self, args: &Map<String, Value>) -> Vec<ResourceAccess> {
        path_arg(args, "path")
            .map(|p| vec![ResourceAccess::Read(p)])
            .unwrap_or_default()
    }

    async fn invoke(&self, args: &Map<String, Value>, _ctx: &ToolContext) -> ToolResult<Value> {
        let path = path_arg(args, "path")?;
        let meta = tokio::fs::metadata(&path).await.map_err(|e| io_error(e, &path))?;
        if !meta.is_file() {
            return Err(ToolError::Execution(format!(
                "Path is not a file: {}",
                path.display()
            )));
        }
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| io_error(e, &path))?;
        let content = line_range(
            &content,
            opt_u64_arg(args, "start_line"),
            opt_u64_arg(args, "end_line"),
        );

        Ok(json!({
            "status": "success",
            "path": path.display().to_string(),
            "size_bytes": content.len(),
            "line_count": content.split('\n').count(),
            "content": content,
        }))
    }
}

// ── file_write ───────────────────────────────────────────

pub struct FileWriteTool;

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file with content, or append to it. Parent folders are created"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("path", ParamType::String, "File path"),
            ToolParameter::required("content", ParamType::String, "Content to write"),
            ToolParameter::optional("mode", ParamType::String, "Write mode")
                .with_allowed(vec![json!("write"), json!("append")])
                .with_default(json!("write")),
        ]
    }

    fn accesses(&self, args: &Map<String, Value>) -> Vec<ResourceAccess> {
        path_arg(args, "path")
            .map(|p| vec![ResourceAccess::Write(p)])
            .unwrap_or_default()
    }

    async fn invoke(&self, args: &Map<String, Value>, _ctx: &ToolContext) -> ToolResult<Value> {
        let path = path_arg(args, "path")?;
        let content = str_arg(args, "content")?;
        let mode = opt_str_arg(args, "mode").unwrap_or("write");

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if mode == "append" {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(content.as_bytes()).await?;
            file.flush().await?;
        } else {
            tokio::fs::write(&path, content).await?;
        }
        debug!("Wrote {} bytes to {}", content.len(), path.display());

        Ok(json!({
            "status": "success",
            "path": path.display().to_string(),
            "bytes_written": content.len(),
            "mode": mode,
        }))
    }
}

// ── file_list ────────────────────────────────────────────

pub struct FileListTool;

#[async_trait]
impl Tool for FileListTool {
    fn name(&self) -> &str {
        "file_list"
    }

    fn description(&self) -> &str {
        "List the files and folders directly inside a folder, optionally filtered by a glob pattern"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::optional("path", ParamType::String, "Folder path")
                .with_default(json!(".")),
            ToolParameter::optional(
                "pattern",
                ParamType::String,
                "Glob pattern on entry names (e.g. *.txt)",
            ),
        ]
    }

    fn accesses(&self, args: &Map<String, Value>) -> Vec<ResourceAccess> {
        path_arg(args, "path")
            .map(|p| vec![ResourceAccess::Read(p)])
            .unwrap_or_default()
    }

    async fn invoke(&self, args: &Map<String, Value>, _ctx: &ToolContext) -> ToolResult<Value> {
        let dir = path_arg(args, "path")?;
        let pattern = opt_str_arg(args, "pattern")
            .map(glob::Pattern::new)
            .transpose()
            .map_err(|e| ToolError::invalid("pattern", e.to_string()))?;

        let meta = tokio::fs::metadata(&dir).await.map_err(|e| io_error(e, &dir))?;
        if !meta.is_dir() {
            return Err(ToolError::Execution(format!(
                "Path is not a directory: {}",
                dir.display()
            )));
        }

        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(pattern) = &pattern {
                if !pattern.matches(&name) {
                    continue;
                }
            }
            let entry_path = entry.path();
            match tokio::fs::metadata(&entry_path).await {
                Ok(meta) => entries.push((name, entry_path, meta)),
                Err(e) => warn!("Could not stat {}: {e}", entry_path.display()),
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let items: Vec<Value> = entries
            .into_iter()
            .map(|(name, path, meta)| {
                json!({
                    "name": name,
                    "type": if meta.is_dir() { "directory" } else { "file" },
                    "size_bytes": meta.is_file().then(|| meta.len()),
                    "path": path.display().to_string(),
                })
            })
            .collect();

        Ok(json!({
            "status": "success",
            "path": dir.display().to_string(),
            "count": items.len(),
            "items": items,
        }))
    }
}

// ── file_move ────────────────────────────────────────────

pub struct FileMoveTool;

#[async_trait]
impl Tool for FileMoveTool {
    fn name(&self) -> &str {
        "file_move"
    }

    fn description(&self) -> &str {
        "Move or rename a file or folder. Destination folders are created"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("source", ParamType::String, "Source file or folder path"),
            ToolParameter::required("destination", ParamType::String, "Destination file path"),
        ]
    }

    /// The source disappears from its folder, so it needs delete rights.
    /// A folder source takes its whole subtree along, so rules nested under
    /// either end must agree as well.
    fn accesses(&self, args: &Map<String, Value>) -> Vec<ResourceAccess> {
        let mut accesses = Vec::new();
        if let Ok(source) = path_arg(args, "source") {
            accesses.push(ResourceAccess::DeleteTree(source));
        }
        if let Ok(destination) = path_arg(args, "destination") {
            accesses.push(ResourceAccess::WriteTree(destination));
        }
        accesses
    }

    async fn invoke(&self, args: &Map<String, Value>, _ctx: &ToolContext) -> ToolResult<Value> {
        let source = path_arg(args, "source")?;
        let destination = path_arg(args, "destination")?;

        let meta = tokio::fs::metadata(&source)
            .await
            .map_err(|e| io_error(e, &source))?;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if let Err(e) = tokio::fs::rename(&source, &destination).await {
            if !meta.is_file() {
                return Err(e.into());
            }
            // Different filesystems: copy, then remove the original.
            debug!("rename failed ({e}), copying {}", source.display());
            tokio::fs::copy(&source, &destination).await?;
            tokio::fs::remove_file(&source).await?;
        }

        Ok(json!({
            "status": "success",
            "source": source.display().to_string(),
            "destination": destination.display().to_string(),
        }))
    }
}

// ── file_delete ──────────────────────────────────────────

pub struct FileDeleteTool;

#[async_trait]
impl Tool for FileDeleteTool {
    fn name(&self) -> &str {
        "file_delete"
    }

    fn description(&self) -> &str {
        "Delete a single file (folders are refused)"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::required("path", ParamType::String, "File path to delete")]
    }

    fn accesses(&self, args: &Map<String, Value>) -> Vec<ResourceAccess> {
        path_arg(args, "path")
            .map(|p| vec![ResourceAccess::Delete(p)])
            .unwrap_or_default()
    }

    async fn invoke(&self, args: &Map<String, Value>, _ctx: &ToolContext) -> ToolResult<Value> {
        let path = path_arg(args, "path")?;
        let meta = tokio::fs::metadata(&path).await.map_err(|e| io_error(e, &path))?;
        if !meta.is_file() {
            return Err(ToolError::Execution(format!(
                "Path is not a file: {}",
                path.display()
            )));
        }
        tokio::fs::remove_file(&path).await?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(json!({
            "status": "success",
            "path": path.display().to_string(),
            "message": format!("Deleted {name}"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::error::ErrorKind;
    use crate::tools::validate_arguments;

    fn ctx() -> ToolContext {
        ToolContext::new("task_test", 1, Duration::from_secs(30))
    }

    /// Validates like the executor does before invoking.
    async fn run(tool: &dyn Tool, args: Value) -> ToolResult<Value> {
        let args = validate_arguments(&tool.parameters(), args.as_object().unwrap())?;
        tool.invoke(&args, &ctx()).await
    }

    fn p(path: &Path) -> String {
        path.display().to_string()
    }

    // ── file_read ───────────────────────────────────────

    #[tokio::test]
    async fn test_read_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, "one\ntwo\nthree").unwrap();

        let result = run(&FileReadTool, json!({"path": p(&file)})).await.unwrap();
        assert_eq!(result["status"], "success");
        assert_eq!(result["content"], "one\ntwo\nthree");
        assert_eq!(result["line_count"], 3);
        assert_eq!(result["size_bytes"], 13);
    }

    #[tokio::test]
    async fn test_read_line_range() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, "one\ntwo\nthree\nfour").unwrap();

        let result = run(&FileReadTool, json!({"path": p(&file), "start_line": 2, "end_line": 3}))
            .await
            .unwrap();
        assert_eq!(result["content"], "two\nthree");

        let result = run(&FileReadTool, json!({"path": p(&file), "start_line": 3}))
            .await
            .unwrap();
        assert_eq!(result["content"], "three\nfour");
    }

    #[test]
    fn test_line_range_clamps() {
        assert_eq!(line_range("a\nb", Some(5), None), "");
        assert_eq!(line_range("a\nb", Some(0), Some(99)), "a\nb");
        assert_eq!(line_range("a\nb\nc", Some(3), Some(1)), "");
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(&FileReadTool, json!({"path": p(&dir.path().join("nope.txt"))}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_read_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(&FileReadTool, json!({"path": p(dir.path())})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionError);
    }

    // ── file_write ──────────────────────────────────────

    #[tokio::test]
    async fn test_write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a/b/out.txt");
        let result = run(&FileWriteTool, json!({"path": p(&file), "content": "héllo"}))
            .await
            .unwrap();
        assert_eq!(result["bytes_written"], 6);
        assert_eq!(result["mode"], "write");
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "héllo");
    }

    #[tokio::test]
    async fn test_write_append() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("log.txt");
        std::fs::write(&file, "a\n").unwrap();
        run(&FileWriteTool, json!({"path": p(&file), "content": "b\n", "mode": "append"}))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "a\nb\n");
    }

    #[tokio::test]
    async fn test_write_bad_mode_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x.txt");
        let err = run(&FileWriteTool, json!({"path": p(&file), "content": "x", "mode": "truncate"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(!file.exists());
    }

    // ── file_list ───────────────────────────────────────

    #[tokio::test]
    async fn test_list_sorted_with_types() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "12345").unwrap();
        std::fs::write(dir.path().join("a.md"), "").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let result = run(&FileListTool, json!({"path": p(dir.path())})).await.unwrap();
        assert_eq!(result["status"], "success");
        assert_eq!(result["count"], 3);
        let items = result["items"].as_array().unwrap();
        let names: Vec<&str> = items.iter().map(|i| i["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["a.md", "b.txt", "sub"]);
        assert_eq!(items[1]["size_bytes"], 5);
        assert_eq!(items[2]["type"], "directory");
        assert!(items[2]["size_bytes"].is_null());
    }

    #[tokio::test]
    async fn test_list_with_pattern() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("c.md"), "").unwrap();

        let result = run(&FileListTool, json!({"path": p(dir.path()), "pattern": "*.txt"}))
            .await
            .unwrap();
        assert_eq!(result["count"], 2);
    }

    #[tokio::test]
    async fn test_list_invalid_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(&FileListTool, json!({"path": p(dir.path()), "pattern": "[a-"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_list_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(&FileListTool, json!({"path": p(&dir.path().join("gone"))}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    // ── file_move ───────────────────────────────────────

    #[tokio::test]
    async fn test_move_into_new_folder() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        let dst = dir.path().join("archive/2024/a.txt");
        std::fs::write(&src, "data").unwrap();

        let result = run(&FileMoveTool, json!({"source": p(&src), "destination": p(&dst)}))
            .await
            .unwrap();
        assert_eq!(result["status"], "success");
        assert!(!src.exists());
        assert_eq!(std::fs::read_to_string(&dst).unwrap(), "data");
    }

    #[tokio::test]
    async fn test_move_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(
            &FileMoveTool,
            json!({"source": p(&dir.path().join("x")), "destination": p(&dir.path().join("y"))}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    // ── file_delete ─────────────────────────────────────

    #[tokio::test]
    async fn test_delete_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("old.log");
        std::fs::write(&file, "x").unwrap();
        let result = run(&FileDeleteTool, json!({"path": p(&file)})).await.unwrap();
        assert_eq!(result["message"], "Deleted old.log");
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn test_delete_refuses_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        let err = run(&FileDeleteTool, json!({"path": p(&sub)})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionError);
        assert!(sub.exists());
    }

    // ── Declared accesses ───────────────────────────────

    #[test]
    fn test_declared_accesses() {
        let dir = tempfile::tempdir().unwrap();
        let root = resolve(dir.path());
        let a = root.join("a.txt");
        let b = root.join("b.txt");
        let args = |v: Value| v.as_object().cloned().unwrap();

        assert_eq!(
            FileReadTool.accesses(&args(json!({"path": p(&a)}))),
            vec![ResourceAccess::Read(a.clone())]
        );
        assert_eq!(
            FileWriteTool.accesses(&args(json!({"path": p(&a)}))),
            vec![ResourceAccess::Write(a.clone())]
        );
        assert_eq!(
            FileDeleteTool.accesses(&args(json!({"path": p(&a)}))),
            vec![ResourceAccess::Delete(a.clone())]
        );
        assert_eq!(
            FileMoveTool.accesses(&args(json!({"source": p(&a), "destination": p(&b)}))),
            vec![ResourceAccess::DeleteTree(a.clone()), ResourceAccess::WriteTree(b)]
        );
        assert!(FileReadTool.accesses(&args(json!({}))).is_empty());
    }
}
