//! Host shell
//!
//! Assembles every service from configuration, wires the orchestrator, and
//! serves newline-delimited JSON requests over stdin/stdout. One request
//! line in, one response line out; malformed lines get a parse-error
//! response instead of killing the loop.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

use crate::adapters::filesystem::FilesystemAdapter;
use crate::adapters::git::GitAdapter;
use crate::adapters::sidecar::SidecarAdapter;
use crate::adapters::terminal::TerminalAdapter;
use crate::cache::ResponseCache;
use crate::config::HostConfig;
use crate::context::JsonlContextStore;
use crate::error::Result;
use crate::orchestrator::{RoleCatalog, RoleContext, RoleOrchestrator};
use crate::registry::ServiceRegistry;
use crate::transport::{RpcTransport, SubprocessDialer, UnixDialer};

const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Reserved service name for host introspection.
const HOST_SERVICE: &str = "_host";

/// One request line on stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRequest {
    pub id: String,
    pub role: String,
    pub service: String,
    pub tool: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

/// One response line on stdout. `id` is absent when the request line could
/// not be parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<std::collections::HashMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_context: Option<RoleContext>,
}

pub struct Host {
    config: HostConfig,
    orchestrator: RoleOrchestrator,
}

impl Host {
    /// Build every adapter from the configuration, initialize them, and
    /// assemble the orchestrator. Adapters whose backends are unreachable
    /// stay uninitialized; their failures surface per-request.
    pub async fn new(config: HostConfig) -> Result<Self> {
        if let Some(parent) = Path::new(&config.context_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut registry = ServiceRegistry::new();
        registry.register(Box::new(FilesystemAdapter::new(&config.filesystem.root)));
        registry.register(Box::new(GitAdapter::new(&config.filesystem.root)));

        let terminal_transport = Arc::new(RpcTransport::new(
            Arc::new(SubprocessDialer::new(
                config.terminal.backend_command.clone(),
                config.terminal.backend_args.clone(),
            )),
            config.transport.options(),
        ));
        registry.register(Box::new(TerminalAdapter::new(
            terminal_transport,
            config.terminal.allowed_commands.clone(),
        )));

        if let Some(socket) = &config.transport.socket_path {
            let sidecar_transport = Arc::new(RpcTransport::new(
                Arc::new(UnixDialer::new(socket)),
                config.transport.options(),
            ));
            registry.register(Box::new(SidecarAdapter::new(sidecar_transport)));
        }

        registry.init_all().await;

        let store = Arc::new(JsonlContextStore::new(config.context_path.clone().into()));
        let cache = ResponseCache::new(
            config.cache.max_entries,
            Duration::from_secs(config.cache.ttl_secs),
        );
        let mut roles = RoleCatalog::builtin();
        for role in &config.roles {
            roles.add(role.clone());
        }

        let orchestrator = RoleOrchestrator::new(registry, cache, store, roles);
        info!(
            project = %config.project_name,
            services = orchestrator.registry().service_count(),
            "host assembled"
        );

        Ok(Self {
            config,
            orchestrator,
        })
    }

    /// Main request loop
    pub async fn run(mut self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();
        let mut heartbeat = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        info!("host ready, entering main loop");

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            let response = self.handle_line(&line).await;
                            match serde_json::to_string(&response) {
                                Ok(out) => {
                                    stdout.write_all(out.as_bytes()).await?;
                                    stdout.write_all(b"\n").await?;
                                    stdout.flush().await?;
                                }
                                Err(e) => error!(error = %e, "failed to serialize response"),
                            }
                        }
                        Ok(None) => {
                            info!("stdin closed, shutting down");
                            break;
                        }
                        Err(e) => {
                            error!(error = %e, "failed to read stdin");
                            break;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    self.orchestrator.heartbeat(HEARTBEAT_INTERVAL_SECS).await;
                }
            }
        }

        self.orchestrator.shutdown().await;
        Ok(())
    }

    async fn handle_line(&self, line: &str) -> HostResponse {
        let request: HostRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "malformed request line");
                return HostResponse {
                    id: None,
                    success: false,
                    data: None,
                    error: Some(format!("Parse error: {}", e)),
                    metadata: None,
                    role_context: None,
                };
            }
        };

        if request.service == HOST_SERVICE {
            return self.handle_host_tool(request).await;
        }

        let project = request
            .project
            .as_deref()
            .unwrap_or(&self.config.project_name);
        let result = self
            .orchestrator
            .execute_as_role(
                &request.role,
                &request.service,
                &request.tool,
                request.args,
                Some(project),
            )
            .await;

        HostResponse {
            id: Some(request.id),
            success: result.success,
            data: result.data,
            error: result.error,
            metadata: result.metadata,
            role_context: Some(result.role_context),
        }
    }

    /// Introspection tools on the reserved `_host` service.
    async fn handle_host_tool(&self, request: HostRequest) -> HostResponse {
        let (success, data, error) = match request.tool.as_str() {
            "list_services" => {
                let services = self.orchestrator.registry().list_services();
                (true, Some(json!({ "services": services })), None)
            }
            "stats" => {
                let metrics = self.orchestrator.metrics().await;
                let cache = self.orchestrator.cache_stats().await;
                let data = json!({
                    "metrics": metrics,
                    "cache": cache,
                    "roles": self.orchestrator.roles().ids(),
                });
                (true, Some(data), None)
            }
            other => (false, None, Some(format!("Unknown tool: {}", other))),
        };

        HostResponse {
            id: Some(request.id),
            success,
            data,
            error,
            metadata: None,
            role_context: None,
        }
    }
}
