//! Role orchestrator
//!
//! The layer above the registry: validates the acting role, probes the
//! response cache for cacheable reads, dispatches through the registry,
//! attaches role-flavored context to every result, persists a context record
//! after successful work, and invalidates a project's cached reads after
//! writes. Every collaborator is constructor-injected.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{make_key, CacheStats, ResponseCache};
use crate::context::{ContextRecord, ContextStore};
use crate::metrics::HostMetrics;
use crate::registry::ServiceRegistry;
use crate::service::{ServiceCommand, ServiceResult};

/// Tools whose results may be served from the cache.
const CACHEABLE_TOOLS: [&str; 3] = ["read_file", "list_directory", "git_status"];

/// Tools that mutate project state and so invalidate its cached reads.
const WRITE_TOOLS: [&str; 7] = [
    "write_file",
    "create_directory",
    "git_init",
    "git_clone",
    "git_add",
    "git_commit",
    "run_command",
];

fn is_cacheable(tool: &str) -> bool {
    CACHEABLE_TOOLS.contains(&tool)
}

fn is_write(tool: &str) -> bool {
    WRITE_TOOLS.contains(&tool)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub title: String,
    pub focus: String,
    pub suggestions: Vec<String>,
}

/// The roles a caller may act as. Built-ins cover the usual hats; config can
/// add more.
pub struct RoleCatalog {
    roles: HashMap<String, Role>,
}

impl RoleCatalog {
    pub fn builtin() -> Self {
        let mut catalog = Self {
            roles: HashMap::new(),
        };
        catalog.add(Role {
            id: "developer".to_string(),
            title: "Developer".to_string(),
            focus: "implementation and iteration".to_string(),
            suggestions: vec![
                "Run the test suite after changes".to_string(),
                "Keep commits small and focused".to_string(),
            ],
        });
        catalog.add(Role {
            id: "architect".to_string(),
            title: "Architect".to_string(),
            focus: "structure and boundaries".to_string(),
            suggestions: vec![
                "Check module boundaries before adding dependencies".to_string(),
                "Record the trade-offs behind structural decisions".to_string(),
            ],
        });
        catalog.add(Role {
            id: "reviewer".to_string(),
            title: "Reviewer".to_string(),
            focus: "correctness and clarity".to_string(),
            suggestions: vec![
                "Look for missing error handling on new paths".to_string(),
                "Verify tests cover the edge cases".to_string(),
            ],
        });
        catalog.add(Role {
            id: "operations".to_string(),
            title: "Operations".to_string(),
            focus: "deployment and runtime health".to_string(),
            suggestions: vec![
                "Check service health before rolling out".to_string(),
                "Watch resource usage after configuration changes".to_string(),
            ],
        });
        catalog
    }

    pub fn add(&mut self, role: Role) {
        self.roles.insert(role.id.clone(), role);
    }

    pub fn get(&self, id: &str) -> Option<&Role> {
        self.roles.get(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.roles.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Role-flavored commentary attached to every orchestrated result, success
/// or failure, so callers can always see which role attempted what.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleContext {
    pub role_id: String,
    pub analysis: String,
    pub suggestions: Vec<String>,
    pub context_stored: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
    pub role_context: RoleContext,
}

impl RoleResult {
    fn from_service(result: ServiceResult, role_context: RoleContext) -> Self {
        Self {
            success: result.success,
            data: result.data,
            error: result.error,
            metadata: result.metadata,
            role_context,
        }
    }
}

pub struct RoleOrchestrator {
    registry: ServiceRegistry,
    cache: Mutex<ResponseCache<ServiceResult>>,
    store: Arc<dyn ContextStore>,
    roles: RoleCatalog,
    metrics: Mutex<HostMetrics>,
}

impl RoleOrchestrator {
    pub fn new(
        registry: ServiceRegistry,
        cache: ResponseCache<ServiceResult>,
        store: Arc<dyn ContextStore>,
        roles: RoleCatalog,
    ) -> Self {
        Self {
            registry,
            cache: Mutex::new(cache),
            store,
            roles,
            metrics: Mutex::new(HostMetrics::new()),
        }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn roles(&self) -> &RoleCatalog {
        &self.roles
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.lock().await.stats()
    }

    pub async fn metrics(&self) -> HostMetrics {
        self.metrics.lock().await.clone()
    }

    /// Run `tool` on `service` while acting as `role_id`.
    ///
    /// Unknown roles and unknown services come back as failed results with a
    /// role context attached; this method never errors.
    pub async fn execute_as_role(
        &self,
        role_id: &str,
        service: &str,
        tool: &str,
        args: Value,
        project: Option<&str>,
    ) -> RoleResult {
        let role = match self.roles.get(role_id) {
            Some(role) => role.clone(),
            None => {
                warn!(role = %role_id, "unknown role");
                self.metrics.lock().await.record_failure(service);
                return RoleResult {
                    success: false,
                    data: None,
                    error: Some(format!("Unknown role: {}", role_id)),
                    metadata: None,
                    role_context: RoleContext {
                        role_id: role_id.to_string(),
                        analysis: format!("Role '{}' is not in the catalog", role_id),
                        suggestions: Vec::new(),
                        context_stored: false,
                    },
                };
            }
        };

        let project_name = project.unwrap_or("default");
        let key = make_key(tool, project_name, &args);

        if is_cacheable(tool) {
            let hit = self.cache.lock().await.get(&key);
            if let Some(result) = hit {
                debug!(key = %key, "cache hit");
                self.metrics.lock().await.record_success(service);
                let result = result.with_metadata("cached", json!(true));
                return RoleResult::from_service(
                    result,
                    build_context(&role, tool, true, false),
                );
            }
        }

        let command = ServiceCommand {
            tool: tool.to_string(),
            args,
            project_name: project.map(str::to_string),
            role_id: Some(role.id.clone()),
        };
        let result = self.registry.execute(service, &command).await;

        let mut context_stored = false;
        if result.success {
            self.metrics.lock().await.record_success(service);

            let record = ContextRecord::new(
                project_name,
                &role.id,
                service,
                tool,
                format!("{} ran {}.{}", role.title, service, tool),
            );
            match self.store.persist(&record).await {
                Ok(()) => context_stored = true,
                Err(e) => warn!(error = %e, "failed to persist context record"),
            }

            if is_cacheable(tool) {
                self.cache.lock().await.set(key, result.clone());
            } else if is_write(tool) {
                let dropped = self.cache.lock().await.invalidate_project(project_name);
                if dropped > 0 {
                    debug!(project = %project_name, dropped, "invalidated cached reads");
                }
            }
        } else {
            self.metrics.lock().await.record_failure(service);
        }

        let succeeded = result.success;
        RoleResult::from_service(result, build_context(&role, tool, succeeded, context_stored))
    }

    /// Uptime/memory bookkeeping plus a structured liveness line.
    pub async fn heartbeat(&self, interval_secs: u64) {
        let mut metrics = self.metrics.lock().await;
        metrics.increment_uptime(interval_secs);
        metrics.update_memory();
        let stats = self.cache.lock().await.stats();
        info!(
            uptime_sec = metrics.uptime_sec,
            executions = metrics.executions_total,
            success_rate = metrics.success_rate(),
            cache_hits = stats.hits,
            cache_entries = stats.size,
            "heartbeat"
        );
    }

    pub async fn shutdown(&mut self) {
        info!("orchestrator shutting down");
        self.registry.shutdown().await;
    }
}

fn build_context(role: &Role, tool: &str, succeeded: bool, context_stored: bool) -> RoleContext {
    let outcome = if succeeded { "succeeded" } else { "failed" };
    RoleContext {
        role_id: role.id.clone(),
        analysis: format!(
            "{} ({}) ran {}, which {}",
            role.title, role.focus, tool, outcome
        ),
        suggestions: role.suggestions.clone(),
        context_stored,
    }
}
