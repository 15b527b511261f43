//! Git adapter
//!
//! Version control operations executed through the `git` binary with
//! tokio::process. Repository paths are relative to the same workspace root
//! the filesystem adapter uses, with the same containment rule. A failing
//! git subprocess becomes a failed result carrying its stderr.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};

use crate::adapters::{
    not_ready, require_str, resolve_under, unknown_tool, AdapterState, ServiceAdapter,
};
use crate::error::{HostError, Result};
use crate::service::{Capability, ServiceCommand, ServiceResult};

pub struct GitAdapter {
    root: PathBuf,
    state: AdapterState,
}

impl GitAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: AdapterState::Uninitialized,
        }
    }

    /// Repo directory from the optional `path` argument, default the root.
    fn resolve_repo(&self, args: &Value) -> std::result::Result<PathBuf, ServiceResult> {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        resolve_under(&self.root, path)
            .ok_or_else(|| ServiceResult::err("Path traversal detected"))
    }

    async fn run_git(
        &self,
        dir: &Path,
        args: &[&str],
    ) -> std::result::Result<String, String> {
        debug!(dir = %dir.display(), args = ?args, "running git");
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .await
            .map_err(|e| format!("Failed to run git: {}", e))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
        }
    }

    async fn git_init(&self, args: &Value) -> ServiceResult {
        let repo = match self.resolve_repo(args) {
            Ok(p) => p,
            Err(result) => return result,
        };
        if let Err(e) = fs::create_dir_all(&repo).await {
            return ServiceResult::err(format!("Failed to create repo dir: {}", e));
        }
        match self.run_git(&repo, &["init"]).await {
            Ok(_) => ServiceResult::ok(json!({ "initialized": true })),
            Err(e) => ServiceResult::err(format!("git init failed: {}", e)),
        }
    }

    async fn git_clone(&self, args: &Value) -> ServiceResult {
        let url = match require_str(args, "url") {
            Ok(v) => v,
            Err(result) => return result,
        };
        let mut git_args = vec!["clone", url];
        let target;
        if let Some(path) = args.get("path").and_then(|v| v.as_str()) {
            target = match resolve_under(&self.root, path) {
                Some(p) => p,
                None => return ServiceResult::err("Path traversal detected"),
            };
            git_args.push(match target.to_str() {
                Some(s) => s,
                None => return ServiceResult::err("Invalid 'path' argument"),
            });
        }
        match self.run_git(&self.root, &git_args).await {
            Ok(_) => ServiceResult::ok(json!({ "cloned": true })),
            Err(e) => ServiceResult::err(format!("git clone failed: {}", e)),
        }
    }

    async fn git_status(&self, args: &Value) -> ServiceResult {
        let repo = match self.resolve_repo(args) {
            Ok(p) => p,
            Err(result) => return result,
        };
        match self.run_git(&repo, &["status", "--porcelain"]).await {
            Ok(status) => {
                let clean = status.is_empty();
                ServiceResult::ok(json!({ "status": status, "clean": clean }))
            }
            Err(e) => ServiceResult::err(format!("git status failed: {}", e)),
        }
    }

    async fn git_add(&self, args: &Value) -> ServiceResult {
        let repo = match self.resolve_repo(args) {
            Ok(p) => p,
            Err(result) => return result,
        };
        let files: Vec<String> = match args.get("files") {
            None => vec![".".to_string()],
            Some(Value::Array(items)) => {
                let mut files = Vec::with_capacity(items.len());
                for item in items {
                    match item.as_str() {
                        Some(s) => files.push(s.to_string()),
                        None => return ServiceResult::err("Invalid 'files' argument"),
                    }
                }
                files
            }
            Some(_) => return ServiceResult::err("Invalid 'files' argument"),
        };
        let mut git_args = vec!["add"];
        git_args.extend(files.iter().map(String::as_str));
        match self.run_git(&repo, &git_args).await {
            Ok(_) => ServiceResult::ok(json!({ "added": files })),
            Err(e) => ServiceResult::err(format!("git add failed: {}", e)),
        }
    }

    async fn git_commit(&self, command: &ServiceCommand) -> ServiceResult {
        let args = &command.args;
        let message = match require_str(args, "message") {
            Ok(v) => v,
            Err(result) => return result,
        };
        let repo = match self.resolve_repo(args) {
            Ok(p) => p,
            Err(result) => return result,
        };
        let full_message = match &command.project_name {
            Some(project) => format!("[{}] {}", project, message),
            None => message.to_string(),
        };
        match self.run_git(&repo, &["commit", "-m", &full_message]).await {
            Ok(_) => ServiceResult::ok(json!({ "committed": true, "message": full_message })),
            Err(e) => ServiceResult::err(format!("git commit failed: {}", e)),
        }
    }
}

#[async_trait]
impl ServiceAdapter for GitAdapter {
    fn name(&self) -> &str {
        "git"
    }

    fn description(&self) -> &str {
        "Version control operations on workspace repositories"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::new(
                "git_init",
                "Initialize a repository",
                json!({
                    "type": "object",
                    "properties": { "path": { "type": "string" } }
                }),
            ),
            Capability::new(
                "git_clone",
                "Clone a repository into the workspace",
                json!({
                    "type": "object",
                    "properties": {
                        "url": { "type": "string" },
                        "path": { "type": "string" }
                    },
                    "required": ["url"]
                }),
            ),
            Capability::new(
                "git_status",
                "Porcelain status and a clean flag",
                json!({
                    "type": "object",
                    "properties": { "path": { "type": "string" } }
                }),
            ),
            Capability::new(
                "git_add",
                "Stage files, default all",
                json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string" },
                        "files": { "type": "array", "items": { "type": "string" } }
                    }
                }),
            ),
            Capability::new(
                "git_commit",
                "Commit staged changes, message prefixed with the project name",
                json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string" },
                        "message": { "type": "string" }
                    },
                    "required": ["message"]
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
        let version = self
            .run_git(&self.root, &["--version"])
            .await
            .map_err(|e| HostError::Backend(format!("git not available: {}", e)))?;
        self.state = AdapterState::Ready;
        info!(root = %self.root.display(), version = %version, "git adapter ready");
        Ok(())
    }

    async fn execute(&self, command: &ServiceCommand) -> ServiceResult {
        if self.state != AdapterState::Ready {
            return not_ready(self.name());
        }
        match command.tool.as_str() {
            "git_init" => self.git_init(&command.args).await,
            "git_clone" => self.git_clone(&command.args).await,
            "git_status" => self.git_status(&command.args).await,
            "git_add" => self.git_add(&command.args).await,
            "git_commit" => self.git_commit(command).await,
            other => unknown_tool(other),
        }
    }

    async fn cleanup(&mut self) {
        self.state = AdapterState::ShuttingDown;
        self.state = AdapterState::Closed;
        info!("git adapter closed");
    }
}
