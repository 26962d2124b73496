use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{ToolError, ToolResult};
use crate::policy::path::resolve;
use crate::policy::ResourceAccess;
use crate::tools::{bool_arg, str_arg, ParamType, Tool, ToolContext, ToolParameter};

/// Case-insensitive substring search over every readable file under `dir`.
fn search(dir: &Path, pattern: &str, recursive: bool) -> Vec<Value> {
    let needle = pattern.to_lowercase();
    let mut walker = WalkDir::new(dir).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut matches = Vec::new();
    for entry in walker.into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let bytes = match std::fs::read(entry.path()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Could not search {}: {e}", entry.path().display());
                continue;
            }
        };
        // Undecodable bytes are replaced rather than skipping the file.
        let content = String::from_utf8_lossy(&bytes);
        for (index, line) in content.lines().enumerate() {
            if line.to_lowercase().contains(&needle) {
                matches.push(json!({
                    "file": entry.path().display().to_string(),
                    "line": index + 1,
                    "content": line.trim_end(),
                }));
            }
        }
    }
    matches
}

// ── text_search ──────────────────────────────────────────

pub struct TextSearchTool;

#[async_trait]
impl Tool for TextSearchTool {
    fn name(&self) -> &str {
        "text_search"
    }

    fn description(&self) -> &str {
        "Search files in a folder for lines containing a text (case-insensitive)"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("directory", ParamType::String, "Folder to search"),
            ToolParameter::required("pattern", ParamType::String, "Text to look for"),
            ToolParameter::optional("recursive", ParamType::Boolean, "Search subfolders too")
                .with_default(json!(true)),
        ]
    }

    /// Reads files below the folder, so rules nested under it apply too.
    fn accesses(&self, args: &Map<String, Value>) -> Vec<ResourceAccess> {
        str_arg(args, "directory")
            .map(|d| vec![ResourceAccess::ReadTree(resolve(Path::new(d)))])
            .unwrap_or_default()
    }

    async fn invoke(&self, args: &Map<String, Value>, _ctx: &ToolContext) -> ToolResult<Value> {
        let dir: PathBuf = resolve(Path::new(str_arg(args, "directory")?));
        let pattern = str_arg(args, "pattern")?.to_string();
        let recursive = bool_arg(args, "recursive", true);

        if !tokio::fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(ToolError::NotFound(format!(
                "Directory not found: {}",
                dir.display()
            )));
        }

        let root = dir.clone();
        let needle = pattern.clone();
        let results = tokio::task::spawn_blocking(move || search(&root, &needle, recursive))
            .await
            .map_err(|e| ToolError::Execution(format!("search task failed: {e}")))?;
        debug!("text_search '{pattern}' in {}: {} matches", dir.display(), results.len());

        Ok(json!({
            "status": "success",
            "pattern": pattern,
            "directory": dir.display().to_string(),
            "count": results.len(),
            "results": results,
        }))
    }
}

// ── text_replace ─────────────────────────────────────────

pub struct TextReplaceTool;

#[async_trait]
impl Tool for TextReplaceTool {
    fn name(&self) -> &str {
        "text_replace"
    }

    fn description(&self) -> &str {
        "Replace every occurrence of a text in a file"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("path", ParamType::String, "File path"),
            ToolParameter::required("old_text", ParamType::String, "Text to find"),
            ToolParameter::required("new_text", ParamType::String, "Replacement text"),
        ]
    }

    fn accesses(&self, args: &Map<String, Value>) -> Vec<ResourceAccess> {
        str_arg(args, "path")
            .map(|p| vec![ResourceAccess::Write(resolve(Path::new(p)))])
            .unwrap_or_default()
    }

    async fn invoke(&self, args: &Map<String, Value>, _ctx: &ToolContext) -> ToolResult<Value> {
        let path = resolve(Path::new(str_arg(args, "path")?));
        let old_text = str_arg(args, "old_text")?;
        let new_text = str_arg(args, "new_text")?;
        if old_text.is_empty() {
            return Err(ToolError::invalid("old_text", "must not be empty"));
        }

        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolError::NotFound(path.display().to_string())
            } else {
                ToolError::from(e)
            }
        })?;
        let occurrences = content.matches(old_text).count();
        if occurrences == 0 {
            return Err(ToolError::Execution(format!(
                "Text not found in {}",
                path.display()
            )));
        }
        tokio::fs::write(&path, content.replace(old_text, new_text)).await?;

        Ok(json!({
            "status": "success",
            "path": path.display().to_string(),
            "occurrences_replaced": occurrences,
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

    async fn run(tool: &dyn Tool, args: Value) -> ToolResult<Value> {
        let args = validate_arguments(&tool.parameters(), args.as_object().unwrap())?;
        tool.invoke(&args, &ctx()).await
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.txt"),
            "Hello world\nnothing here\nHELLO again\n",
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), "say hello\n").unwrap();
        dir
    }

    // ── text_search ─────────────────────────────────────

    #[tokio::test]
    async fn test_search_recursive_case_insensitive() {
        let dir = fixture();
        let result = run(
            &TextSearchTool,
            json!({"directory": dir.path().display().to_string(), "pattern": "hello"}),
        )
        .await
        .unwrap();
        assert_eq!(result["status"], "success");
        assert_eq!(result["count"], 3);
        let results = result["results"].as_array().unwrap();
        assert_eq!(results[0]["line"], 1);
        assert_eq!(results[0]["content"], "Hello world");
        assert_eq!(results[1]["line"], 3);
        assert!(results[2]["file"].as_str().unwrap().ends_with("b.txt"));
    }

    #[tokio::test]
    async fn test_search_top_level_only() {
        let dir = fixture();
        let result = run(
            &TextSearchTool,
            json!({
                "directory": dir.path().display().to_string(),
                "pattern": "hello",
                "recursive": false
            }),
        )
        .await
        .unwrap();
        assert_eq!(result["count"], 2);
    }

    #[tokio::test]
    async fn test_search_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(
            &TextSearchTool,
            json!({"directory": dir.path().join("gone").display().to_string(), "pattern": "x"}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    // ── text_replace ────────────────────────────────────

    #[tokio::test]
    async fn test_replace_counts_occurrences() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.ini");
        std::fs::write(&file, "host=old\nbackup=old\n").unwrap();

        let result = run(
            &TextReplaceTool,
            json!({"path": file.display().to_string(), "old_text": "old", "new_text": "new"}),
        )
        .await
        .unwrap();
        assert_eq!(result["occurrences_replaced"], 2);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "host=new\nbackup=new\n");
    }

    #[tokio::test]
    async fn test_replace_missing_text_is_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.ini");
        std::fs::write(&file, "host=old\n").unwrap();

        let err = run(
            &TextReplaceTool,
            json!({"path": file.display().to_string(), "old_text": "absent", "new_text": "x"}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionError);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "host=old\n");
    }

    #[tokio::test]
    async fn test_replace_requires_all_arguments() {
        let err = run(&TextReplaceTool, json!({"path": "x", "old_text": "a"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingArgument);
    }

    #[test]
    fn test_declared_accesses() {
        let args = json!({"directory": "/srv/docs", "pattern": "x"});
        assert_eq!(
            TextSearchTool.accesses(args.as_object().unwrap()),
            vec![ResourceAccess::ReadTree(resolve(Path::new("/srv/docs")))]
        );
        let args = json!({"path": "/srv/docs/a.txt", "old_text": "a", "new_text": "b"});
        assert_eq!(
            TextReplaceTool.accesses(args.as_object().unwrap()),
            vec![ResourceAccess::Write(resolve(Path::new("/srv/docs/a.txt")))]
        );
    }
}
