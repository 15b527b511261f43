//! Terminal adapter
//!
//! Shell execution relayed to an out-of-process backend over the RPC
//! transport. The backend owns the processes; this adapter adds a command
//! whitelist in front and keeps its own registry of long-running sessions,
//! recovered by sniffing the backend's textual output for a PID marker and
//! still-running phrases.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::adapters::{not_ready, require_str, unknown_tool, AdapterState, ServiceAdapter};
use crate::error::Result;
use crate::service::{Capability, ServiceCommand, ServiceResult};
use crate::transport::{RpcChannel, RpcTransport};

/// A backend process this adapter believes is still running.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub pid: u32,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub cwd: Option<String>,
}

/// First-word whitelist applied before any backend call.
pub fn default_allowed_commands() -> Vec<String> {
    [
        "ls", "pwd", "echo", "cat", "grep", "find", "which", "npm", "yarn", "cargo",
        "python", "node", "git", "make",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub struct TerminalAdapter {
    channel: Arc<dyn RpcChannel>,
    /// Present when this adapter created the transport and must close it.
    transport: Option<Arc<RpcTransport>>,
    sessions: Arc<RwLock<HashMap<u32, Session>>>,
    allowed_commands: Vec<String>,
    state: AdapterState,
}

impl TerminalAdapter {
    /// Owns the transport: `initialize` connects it, `cleanup` closes it.
    pub fn new(transport: Arc<RpcTransport>, allowed_commands: Vec<String>) -> Self {
        Self {
            channel: transport.clone(),
            transport: Some(transport),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            allowed_commands,
            state: AdapterState::Uninitialized,
        }
    }

    /// Shares an already-connected channel; starts `Ready` and leaves the
    /// channel open on cleanup.
    pub fn with_channel(channel: Arc<dyn RpcChannel>, allowed_commands: Vec<String>) -> Self {
        Self {
            channel,
            transport: None,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            allowed_commands,
            state: AdapterState::Ready,
        }
    }

    async fn run_command(&self, args: &Value) -> ServiceResult {
        let cmd = match require_str(args, "command") {
            Ok(v) => v,
            Err(result) => return result,
        };
        let first = cmd.split_whitespace().next().unwrap_or("");
        if !self.allowed_commands.iter().any(|allowed| allowed == first) {
            return ServiceResult::err(format!("Command '{}' is not allowed", first));
        }

        let cwd = args.get("cwd").and_then(|v| v.as_str()).map(str::to_string);
        let mut params = json!({ "command": cmd });
        if let Some(dir) = &cwd {
            params["cwd"] = json!(dir);
        }
        if let Some(timeout) = args.get("timeout_ms").and_then(|v| v.as_u64()) {
            params["timeout_ms"] = json!(timeout);
        }

        match self.channel.call("execute", params).await {
            Ok(value) => {
                let text = flatten_text(&value);
                if let Some(pid) = detect_background_session(&text) {
                    let session = Session {
                        pid,
                        command: cmd.to_string(),
                        started_at: Utc::now(),
                        cwd,
                    };
                    self.sessions.write().await.insert(pid, session);
                    info!(pid, command = %cmd, "tracking background session");
                    return ServiceResult::ok(value).with_metadata("session_pid", json!(pid));
                }
                ServiceResult::ok(value)
            }
            Err(e) => ServiceResult::err(e.to_string()),
        }
    }

    async fn list_sessions(&self) -> ServiceResult {
        let mut local: Vec<Session> = self.sessions.read().await.values().cloned().collect();
        local.sort_by_key(|s| s.pid);

        match self.channel.call("list_processes", json!({})).await {
            Ok(listing) => {
                let alive = extract_pids(&listing);
                let sessions: Vec<Value> = local
                    .iter()
                    .map(|s| {
                        json!({
                            "pid": s.pid,
                            "command": s.command,
                            "started_at": s.started_at,
                            "cwd": s.cwd,
                            "alive": alive.contains(&s.pid),
                        })
                    })
                    .collect();
                ServiceResult::ok(json!({ "sessions": sessions }))
            }
            Err(e) => {
                // Degrade to local metadata when the backend listing is
                // unavailable.
                warn!(error = %e, "backend listing failed, returning local sessions");
                let sessions: Vec<Value> = local
                    .iter()
                    .map(|s| {
                        json!({
                            "pid": s.pid,
                            "command": s.command,
                            "started_at": s.started_at,
                            "cwd": s.cwd,
                        })
                    })
                    .collect();
                ServiceResult::ok(json!({ "sessions": sessions }))
            }
        }
    }

    /// The local entry goes first, unconditionally: the caller must never see
    /// a session it asked to kill, whatever the backend says.
    async fn kill_session(&self, args: &Value) -> ServiceResult {
        let pid = match args.get("pid").and_then(|v| v.as_u64()) {
            Some(p) => p as u32,
            None => return ServiceResult::err("Missing 'pid' argument"),
        };
        if self.sessions.write().await.remove(&pid).is_none() {
            return ServiceResult::err(format!("Session {} is not tracked", pid));
        }
        match self.channel.call("kill_process", json!({ "pid": pid })).await {
            Ok(_) => ServiceResult::ok(json!({ "killed": true, "pid": pid })),
            Err(e) => {
                warn!(pid, error = %e, "backend kill failed, session untracked anyway");
                ServiceResult::err(format!(
                    "Session {} untracked, but backend kill failed: {}",
                    pid, e
                ))
            }
        }
    }
}

#[async_trait]
impl ServiceAdapter for TerminalAdapter {
    fn name(&self) -> &str {
        "terminal"
    }

    fn description(&self) -> &str {
        "Whitelisted shell execution with background session tracking"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::new(
                "run_command",
                "Run a whitelisted shell command through the backend",
                json!({
                    "type": "object",
                    "properties": {
                        "command": { "type": "string" },
                        "cwd": { "type": "string" },
                        "timeout_ms": { "type": "integer" }
                    },
                    "required": ["command"]
                }),
            ),
            Capability::new(
                "list_sessions",
                "Tracked background sessions, cross-checked against the backend",
                json!({ "type": "object", "properties": {} }),
            ),
            Capability::new(
                "kill_session",
                "Stop tracking a session and ask the backend to terminate it",
                json!({
                    "type": "object",
                    "properties": { "pid": { "type": "integer" } },
                    "required": ["pid"]
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
        if let Some(transport) = &self.transport {
            if let Err(e) = transport.connect().await {
                self.state = AdapterState::Uninitialized;
                return Err(e);
            }
        }
        self.state = AdapterState::Ready;
        info!(
            allowed = self.allowed_commands.len(),
            "terminal adapter ready"
        );
        Ok(())
    }

    async fn execute(&self, command: &ServiceCommand) -> ServiceResult {
        if self.state != AdapterState::Ready {
            return not_ready(self.name());
        }
        match command.tool.as_str() {
            "run_command" => self.run_command(&command.args).await,
            "list_sessions" => self.list_sessions().await,
            "kill_session" => self.kill_session(&command.args).await,
            other => unknown_tool(other),
        }
    }

    async fn cleanup(&mut self) {
        self.state = AdapterState::ShuttingDown;
        let sessions: Vec<u32> = self.sessions.write().await.drain().map(|(pid, _)| pid).collect();
        for pid in sessions {
            if let Err(e) = self.channel.call("kill_process", json!({ "pid": pid })).await {
                warn!(pid, error = %e, "failed to terminate session during cleanup");
            }
        }
        if let Some(transport) = &self.transport {
            transport.close().await;
        }
        self.state = AdapterState::Closed;
        info!("terminal adapter closed");
    }

    async fn health_check(&self) -> bool {
        if self.state != AdapterState::Ready {
            return false;
        }
        self.channel.call("ping", json!({})).await.is_ok()
    }
}

/// Concatenate every string leaf of a backend response, in order.
fn flatten_text(value: &Value) -> String {
    let mut parts = Vec::new();
    collect_strings(value, &mut parts);
    parts.join("\n")
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => {
            for item in items {
                collect_strings(item, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_strings(item, out);
            }
        }
        _ => {}
    }
}

/// Every number that follows a `pid` marker (case-insensitive, colon
/// tolerated), in order of appearance.
fn scan_pids(text: &str) -> Vec<u32> {
    let lower = text.to_lowercase();
    let bytes = lower.as_bytes();
    let mut pids = Vec::new();
    let mut offset = 0;
    while let Some(found) = lower[offset..].find("pid") {
        let at = offset + found;
        let word_start = at == 0 || !bytes[at - 1].is_ascii_alphanumeric();
        if word_start {
            let rest = lower[at + 3..]
                .trim_start_matches(|c: char| c == ':' || c.is_whitespace());
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            if let Ok(pid) = digits.parse::<u32>() {
                pids.push(pid);
            }
        }
        offset = at + 3;
    }
    pids
}

fn find_pid(text: &str) -> Option<u32> {
    scan_pids(text).into_iter().next()
}

const RUNNING_PHRASES: [&str; 3] = [
    "still running",
    "running in background",
    "started with pid",
];

fn mentions_running(text: &str) -> bool {
    let lower = text.to_lowercase();
    RUNNING_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

/// A session is only recorded when the output names a pid AND says the
/// process kept running.
fn detect_background_session(text: &str) -> Option<u32> {
    if mentions_running(text) {
        find_pid(text)
    } else {
        None
    }
}

/// Pids named by a backend process listing, whatever its exact shape:
/// `pid` fields of objects, bare numbers in arrays, pid markers in text.
fn extract_pids(value: &Value) -> HashSet<u32> {
    let mut pids = HashSet::new();
    collect_pids(value, &mut pids);
    pids
}

fn collect_pids(value: &Value, out: &mut HashSet<u32>) {
    match value {
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Number(n) => {
                        if let Some(pid) = n.as_u64() {
                            out.insert(pid as u32);
                        }
                    }
                    other => collect_pids(other, out),
                }
            }
        }
        Value::Object(map) => {
            if let Some(pid) = map.get("pid").and_then(|v| v.as_u64()) {
                out.insert(pid as u32);
            }
            for item in map.values() {
                collect_pids(item, out);
            }
        }
        Value::String(s) => out.extend(scan_pids(s)),
        _ => {}
    }
}
