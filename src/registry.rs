//! Service registry
//!
//! Holds every adapter as a trait object keyed by service name and routes
//! commands to them. Dispatch never throws: an absent service or a failing
//! adapter both come back as a failed `ServiceResult`.

use std::collections::HashMap;

use tracing::{debug, error, info};

use crate::adapters::ServiceAdapter;
use crate::service::{ServiceCommand, ServiceDescriptor, ServiceResult};

pub struct ServiceRegistry {
    services: HashMap<String, Box<dyn ServiceAdapter>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
        }
    }

    /// Register an adapter under its own name. Re-registering a name
    /// replaces the previous adapter silently; last write wins.
    pub fn register(&mut self, adapter: Box<dyn ServiceAdapter>) {
        let name = adapter.name().to_string();
        info!(service = %name, "registering service");
        self.services.insert(name, adapter);
    }

    pub fn get(&self, name: &str) -> Option<&dyn ServiceAdapter> {
        self.services.get(name).map(|adapter| adapter.as_ref())
    }

    /// Initialize every registered adapter. A failure leaves that adapter
    /// un-ready and moves on; the others still come up.
    pub async fn init_all(&mut self) {
        let names: Vec<String> = self.services.keys().cloned().collect();
        for name in names {
            if let Some(adapter) = self.services.get_mut(&name) {
                info!(service = %name, "initializing service");
                if let Err(e) = adapter.initialize().await {
                    error!(service = %name, error = %e, "failed to initialize service");
                } else {
                    info!(service = %name, "service initialized");
                }
            }
        }
    }

    /// Route a command to the named service. An unknown name is a failed
    /// result, not an error; the signature makes dispatch infallible.
    pub async fn execute(&self, service: &str, command: &ServiceCommand) -> ServiceResult {
        match self.services.get(service) {
            Some(adapter) => {
                debug!(service = %service, tool = %command.tool, "dispatching command");
                adapter.execute(command).await
            }
            None => ServiceResult::err(format!("Service '{}' not found", service)),
        }
    }

    /// Discovery payload for every registered service, name-ordered.
    pub fn list_services(&self) -> Vec<ServiceDescriptor> {
        let mut descriptors: Vec<ServiceDescriptor> = self
            .services
            .values()
            .map(|adapter| ServiceDescriptor {
                name: adapter.name().to_string(),
                description: adapter.description().to_string(),
                capabilities: adapter.capabilities(),
            })
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Probe every adapter, name to liveness.
    pub async fn health_all(&self) -> HashMap<String, bool> {
        let mut health = HashMap::new();
        for (name, adapter) in &self.services {
            health.insert(name.clone(), adapter.health_check().await);
        }
        health
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Clean up every adapter. Failures are the adapters' to log; shutdown
    /// always visits all of them.
    pub async fn shutdown(&mut self) {
        let names: Vec<String> = self.services.keys().cloned().collect();
        for name in names {
            if let Some(adapter) = self.services.get_mut(&name) {
                info!(service = %name, "shutting down service");
                adapter.cleanup().await;
            }
        }
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::AdapterState;
    use crate::error::{HostError, Result};
    use crate::service::Capability;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    struct MockAdapter {
        name: String,
        description: String,
        state: AdapterState,
        fail_init: bool,
        executions: Arc<AtomicU32>,
        cleaned: Arc<AtomicBool>,
        healthy: bool,
    }

    impl MockAdapter {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                description: format!("{} mock", name),
                state: AdapterState::Uninitialized,
                fail_init: false,
                executions: Arc::new(AtomicU32::new(0)),
                cleaned: Arc::new(AtomicBool::new(false)),
                healthy: true,
            }
        }

        fn failing_init(mut self) -> Self {
            self.fail_init = true;
            self
        }

        fn with_description(mut self, description: &str) -> Self {
            self.description = description.to_string();
            self
        }

        fn unhealthy(mut self) -> Self {
            self.healthy = false;
            self
        }
    }

    #[async_trait]
    impl ServiceAdapter for MockAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> &str {
            &self.description
        }

        fn capabilities(&self) -> Vec<Capability> {
            vec![
                Capability::new("status", "mock status", json!({})),
                Capability::new("fail", "mock failure", json!({})),
            ]
        }

        fn state(&self) -> AdapterState {
            self.state
        }

        async fn initialize(&mut self) -> Result<()> {
            if self.fail_init {
                return Err(HostError::Backend("mock init failure".to_string()));
            }
            self.state = AdapterState::Ready;
            Ok(())
        }

        async fn execute(&self, command: &ServiceCommand) -> ServiceResult {
            if self.state != AdapterState::Ready {
                return ServiceResult::err(format!(
                    "Service '{}' is not initialized",
                    self.name
                ));
            }
            self.executions.fetch_add(1, Ordering::SeqCst);
            match command.tool.as_str() {
                "status" => ServiceResult::ok(json!({ "status": "ok", "service": self.name })),
                "fail" => ServiceResult::err("deliberate failure"),
                other => ServiceResult::err(format!("Unknown tool: {}", other)),
            }
        }

        async fn cleanup(&mut self) {
            self.cleaned.store(true, Ordering::SeqCst);
            self.state = AdapterState::Closed;
        }

        async fn health_check(&self) -> bool {
            self.healthy
        }
    }

    #[test]
    fn test_registry_new() {
        let registry = ServiceRegistry::new();
        assert_eq!(registry.service_count(), 0);
        assert!(registry.list_services().is_empty());
    }

    #[test]
    fn test_registry_default() {
        let registry = ServiceRegistry::default();
        assert_eq!(registry.service_count(), 0);
    }

    #[test]
    fn test_register_service() {
        let mut registry = ServiceRegistry::new();
        registry.register(Box::new(MockAdapter::new("alpha")));
        assert_eq!(registry.service_count(), 1);
        assert!(registry.get("alpha").is_some());
        assert!(registry.get("beta").is_none());
    }

    #[test]
    fn test_register_overwrites_same_name() {
        let mut registry = ServiceRegistry::new();
        registry.register(Box::new(MockAdapter::new("alpha").with_description("first")));
        registry.register(Box::new(MockAdapter::new("alpha").with_description("second")));
        assert_eq!(registry.service_count(), 1);
        assert_eq!(registry.get("alpha").unwrap().description(), "second");
    }

    #[tokio::test]
    async fn test_init_all_success() {
        let mut registry = ServiceRegistry::new();
        registry.register(Box::new(MockAdapter::new("a")));
        registry.register(Box::new(MockAdapter::new("b")));
        registry.init_all().await;
        assert_eq!(registry.get("a").unwrap().state(), AdapterState::Ready);
        assert_eq!(registry.get("b").unwrap().state(), AdapterState::Ready);
    }

    #[tokio::test]
    async fn test_init_all_failure_does_not_abort_others() {
        let mut registry = ServiceRegistry::new();
        registry.register(Box::new(MockAdapter::new("good")));
        registry.register(Box::new(MockAdapter::new("bad").failing_init()));
        registry.init_all().await;

        assert_eq!(registry.get("good").unwrap().state(), AdapterState::Ready);
        assert_eq!(
            registry.get("bad").unwrap().state(),
            AdapterState::Uninitialized
        );

        // The failed adapter answers with a failed result, not a panic.
        let result = registry
            .execute("bad", &ServiceCommand::new("status", json!({})))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not initialized"));

        let result = registry
            .execute("good", &ServiceCommand::new("status", json!({})))
            .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_execute_unknown_service() {
        let registry = ServiceRegistry::new();
        let result = registry
            .execute("nonexistent", &ServiceCommand::new("status", json!({})))
            .await;
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Service 'nonexistent' not found")
        );
    }

    #[tokio::test]
    async fn test_execute_routes_to_adapter() {
        let mut registry = ServiceRegistry::new();
        let adapter = MockAdapter::new("echo");
        let executions = adapter.executions.clone();
        registry.register(Box::new(adapter));
        registry.init_all().await;

        let result = registry
            .execute("echo", &ServiceCommand::new("status", json!({})))
            .await;
        assert!(result.success);
        assert_eq!(result.data.unwrap()["service"], "echo");
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_failed_result_passes_through() {
        let mut registry = ServiceRegistry::new();
        registry.register(Box::new(MockAdapter::new("echo")));
        registry.init_all().await;

        let result = registry
            .execute("echo", &ServiceCommand::new("fail", json!({})))
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("deliberate failure"));
    }

    #[tokio::test]
    async fn test_list_services_sorted_with_capabilities() {
        let mut registry = ServiceRegistry::new();
        registry.register(Box::new(MockAdapter::new("zeta")));
        registry.register(Box::new(MockAdapter::new("alpha")));

        let descriptors = registry.list_services();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].name, "alpha");
        assert_eq!(descriptors[1].name, "zeta");
        for descriptor in &descriptors {
            assert_eq!(descriptor.capabilities.len(), 2);
        }
    }

    #[tokio::test]
    async fn test_health_all() {
        let mut registry = ServiceRegistry::new();
        registry.register(Box::new(MockAdapter::new("up")));
        registry.register(Box::new(MockAdapter::new("down").unhealthy()));

        let health = registry.health_all().await;
        assert_eq!(health.get("up"), Some(&true));
        assert_eq!(health.get("down"), Some(&false));
    }

    #[tokio::test]
    async fn test_shutdown_cleans_every_adapter() {
        let mut registry = ServiceRegistry::new();
        let a = MockAdapter::new("a");
        let b = MockAdapter::new("b");
        let cleaned_a = a.cleaned.clone();
        let cleaned_b = b.cleaned.clone();
        registry.register(Box::new(a));
        registry.register(Box::new(b));
        registry.init_all().await;

        registry.shutdown().await;
        assert!(cleaned_a.load(Ordering::SeqCst));
        assert!(cleaned_b.load(Ordering::SeqCst));
        assert_eq!(registry.get("a").unwrap().state(), AdapterState::Closed);
    }
}
