//! Filesystem adapter
//!
//! Direct file I/O rooted at a configured base directory. Caller paths are
//! relative to the root; anything that resolves outside it is rejected
//! before touching the disk.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::fs;
use tracing::{debug, info};

use crate::adapters::{
    not_ready, require_str, resolve_under, unknown_tool, AdapterState, ServiceAdapter,
};
use crate::error::Result;
use crate::service::{Capability, ServiceCommand, ServiceResult};

pub struct FilesystemAdapter {
    root: PathBuf,
    state: AdapterState,
}

impl FilesystemAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: AdapterState::Uninitialized,
        }
    }

    fn resolve(&self, path: &str) -> std::result::Result<PathBuf, ServiceResult> {
        resolve_under(&self.root, path)
            .ok_or_else(|| ServiceResult::err("Path traversal detected"))
    }

    async fn read_file(&self, args: &Value) -> ServiceResult {
        let path = match require_str(args, "path") {
            Ok(v) => v,
            Err(result) => return result,
        };
        let full = match self.resolve(path) {
            Ok(p) => p,
            Err(result) => return result,
        };
        match fs::read_to_string(&full).await {
            Ok(content) => ServiceResult::ok(json!({ "content": content })),
            Err(e) => ServiceResult::err(format!("Failed to read '{}': {}", path, e)),
        }
    }

    async fn write_file(&self, args: &Value) -> ServiceResult {
        let path = match require_str(args, "path") {
            Ok(v) => v,
            Err(result) => return result,
        };
        let content = match require_str(args, "content") {
            Ok(v) => v,
            Err(result) => return result,
        };
        let full = match self.resolve(path) {
            Ok(p) => p,
            Err(result) => return result,
        };
        if let Some(parent) = full.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                return ServiceResult::err(format!("Failed to create parent dirs: {}", e));
            }
        }
        match fs::write(&full, content).await {
            Ok(()) => {
                debug!(path = %path, bytes = content.len(), "wrote file");
                ServiceResult::ok(json!({ "written": true }))
            }
            Err(e) => ServiceResult::err(format!("Failed to write '{}': {}", path, e)),
        }
    }

    async fn list_directory(&self, args: &Value) -> ServiceResult {
        let path = match require_str(args, "path") {
            Ok(v) => v,
            Err(result) => return result,
        };
        let full = match self.resolve(path) {
            Ok(p) => p,
            Err(result) => return result,
        };
        let mut reader = match fs::read_dir(&full).await {
            Ok(r) => r,
            Err(e) => return ServiceResult::err(format!("Failed to list '{}': {}", path, e)),
        };
        let mut entries = Vec::new();
        loop {
            match reader.next_entry().await {
                Ok(Some(entry)) => {
                    entries.push(entry.file_name().to_string_lossy().into_owned())
                }
                Ok(None) => break,
                Err(e) => {
                    return ServiceResult::err(format!("Failed to list '{}': {}", path, e))
                }
            }
        }
        entries.sort();
        ServiceResult::ok(json!({ "entries": entries }))
    }

    async fn create_directory(&self, args: &Value) -> ServiceResult {
        let path = match require_str(args, "path") {
            Ok(v) => v,
            Err(result) => return result,
        };
        let full = match self.resolve(path) {
            Ok(p) => p,
            Err(result) => return result,
        };
        match fs::create_dir_all(&full).await {
            Ok(()) => ServiceResult::ok(json!({ "created": true })),
            Err(e) => ServiceResult::err(format!("Failed to create '{}': {}", path, e)),
        }
    }
}

#[async_trait]
impl ServiceAdapter for FilesystemAdapter {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn description(&self) -> &str {
        "File operations rooted at the workspace directory"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::new(
                "read_file",
                "Read a file's contents",
                json!({
                    "type": "object",
                    "properties": { "path": { "type": "string" } },
                    "required": ["path"]
                }),
            ),
            Capability::new(
                "write_file",
                "Write content to a file, creating parent directories",
                json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string" },
                        "content": { "type": "string" }
                    },
                    "required": ["path", "content"]
                }),
            ),
            Capability::new(
                "list_directory",
                "List the entries of a directory",
                json!({
                    "type": "object",
                    "properties": { "path": { "type": "string" } },
                    "required": ["path"]
                }),
            ),
            Capability::new(
                "create_directory",
                "Create a directory and any missing parents",
                json!({
                    "type": "object",
                    "properties": { "path": { "type": "string" } },
                    "required": ["path"]
                }),
            ),
        ]
    }

    fn state(&self) -> AdapterState {
        self.state
    }

    async fn initialize(&mut self) -> Result<()> {
        if self.state == AdapterState::Ready {
            return Ok(());
        }
        self.state = AdapterState::Initializing;
        fs::create_dir_all(&self.root).await?;
        self.state = AdapterState::Ready;
        info!(root = %self.root.display(), "filesystem adapter ready");
        Ok(())
    }

    async fn execute(&self, command: &ServiceCommand) -> ServiceResult {
        if self.state != AdapterState::Ready {
            return not_ready(self.name());
        }
        match command.tool.as_str() {
            "read_file" => self.read_file(&command.args).await,
            "write_file" => self.write_file(&command.args).await,
            "list_directory" => self.list_directory(&command.args).await,
            "create_directory" => self.create_directory(&command.args).await,
            other => unknown_tool(other),
        }
    }

    async fn cleanup(&mut self) {
        self.state = AdapterState::ShuttingDown;
        self.state = AdapterState::Closed;
        info!("filesystem adapter closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn ready_adapter() -> (FilesystemAdapter, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let mut adapter = FilesystemAdapter::new(dir.path());
        adapter.initialize().await.unwrap();
        (adapter, dir)
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (adapter, _dir) = ready_adapter().await;

        let write = adapter
            .execute(&ServiceCommand::new(
                "write_file",
                json!({ "path": "notes/todo.txt", "content": "ship it" }),
            ))
            .await;
        assert!(write.success, "{:?}", write.error);
        assert_eq!(write.data.unwrap()["written"], true);

        let read = adapter
            .execute(&ServiceCommand::new(
                "read_file",
                json!({ "path": "notes/todo.txt" }),
            ))
            .await;
        assert!(read.success);
        assert_eq!(read.data.unwrap()["content"], "ship it");
    }

    #[tokio::test]
    async fn test_list_directory_sorted() {
        let (adapter, _dir) = ready_adapter().await;
        for name in ["b.txt", "a.txt", "c.txt"] {
            let result = adapter
                .execute(&ServiceCommand::new(
                    "write_file",
                    json!({ "path": name, "content": "" }),
                ))
                .await;
            assert!(result.success);
        }

        let listed = adapter
            .execute(&ServiceCommand::new("list_directory", json!({ "path": "." })))
            .await;
        assert!(listed.success);
        assert_eq!(
            listed.data.unwrap()["entries"],
            json!(["a.txt", "b.txt", "c.txt"])
        );
    }

    #[tokio::test]
    async fn test_create_directory() {
        let (adapter, dir) = ready_adapter().await;
        let result = adapter
            .execute(&ServiceCommand::new(
                "create_directory",
                json!({ "path": "deep/nested/dir" }),
            ))
            .await;
        assert!(result.success);
        assert!(dir.path().join("deep/nested/dir").is_dir());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let (adapter, _dir) = ready_adapter().await;
        for path in ["../escape.txt", "a/../../escape.txt", "/etc/passwd"] {
            let result = adapter
                .execute(&ServiceCommand::new("read_file", json!({ "path": path })))
                .await;
            assert!(!result.success, "path {} should be rejected", path);
            assert_eq!(result.error.as_deref(), Some("Path traversal detected"));
        }
    }

    #[tokio::test]
    async fn test_missing_argument() {
        let (adapter, _dir) = ready_adapter().await;
        let result = adapter
            .execute(&ServiceCommand::new("write_file", json!({ "path": "x.txt" })))
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Missing 'content' argument"));
    }

    #[tokio::test]
    async fn test_read_missing_file_is_failed_result() {
        let (adapter, _dir) = ready_adapter().await;
        let result = adapter
            .execute(&ServiceCommand::new(
                "read_file",
                json!({ "path": "no-such-file.txt" }),
            ))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Failed to read"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let (adapter, _dir) = ready_adapter().await;
        let result = adapter
            .execute(&ServiceCommand::new("delete_everything", json!({})))
            .await;
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Unknown tool: delete_everything")
        );
    }

    #[tokio::test]
    async fn test_execute_before_initialize() {
        let dir = tempdir().unwrap();
        let adapter = FilesystemAdapter::new(dir.path());
        assert_eq!(adapter.state(), AdapterState::Uninitialized);

        let result = adapter
            .execute(&ServiceCommand::new("read_file", json!({ "path": "x" })))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not initialized"));
    }

    #[tokio::test]
    async fn test_initialize_idempotent() {
        let dir = tempdir().unwrap();
        let mut adapter = FilesystemAdapter::new(dir.path());
        adapter.initialize().await.unwrap();
        adapter.initialize().await.unwrap();
        assert_eq!(adapter.state(), AdapterState::Ready);
    }

    #[tokio::test]
    async fn test_capabilities_cover_dispatch() {
        let (adapter, _dir) = ready_adapter().await;
        let names: Vec<String> = adapter
            .capabilities()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(
            names,
            ["read_file", "write_file", "list_directory", "create_directory"]
        );
    }
}
