use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::adapters::terminal::default_allowed_commands;
use crate::error::{HostError, Result};
use crate::orchestrator::Role;
use crate::transport::TransportOptions;
use std::time::Duration;

/// Host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Project the host works on; namespaces cache entries and context
    /// records
    #[serde(default = "default_project_name")]
    pub project_name: String,

    /// Context record JSONL file
    #[serde(default = "default_context_path")]
    pub context_path: String,

    /// Response cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// RPC transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Filesystem service configuration
    #[serde(default)]
    pub filesystem: FilesystemConfig,

    /// Terminal service configuration
    #[serde(default)]
    pub terminal: TerminalConfig,

    /// Extra roles on top of the built-in catalog
    #[serde(default)]
    pub roles: Vec<Role>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Unix socket of the sidecar service; the sidecar adapter is only
    /// registered when this is set
    #[serde(default)]
    pub socket_path: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemConfig {
    #[serde(default = "default_filesystem_root")]
    pub root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    #[serde(default = "default_backend_command")]
    pub backend_command: String,
    #[serde(default)]
    pub backend_args: Vec<String>,
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,
}

fn default_project_name() -> String {
    "default".to_string()
}

fn default_context_path() -> String {
    "context.jsonl".to_string()
}

fn default_cache_max_entries() -> usize {
    100
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_filesystem_root() -> String {
    "workspace".to_string()
}

fn default_backend_command() -> String {
    "switchboard-shell".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_max_entries(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            request_timeout_secs: default_request_timeout_secs(),
            auto_reconnect: default_auto_reconnect(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            root: default_filesystem_root(),
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            backend_command: default_backend_command(),
            backend_args: Vec::new(),
            allowed_commands: default_allowed_commands(),
        }
    }
}

impl TransportConfig {
    pub fn options(&self) -> TransportOptions {
        TransportOptions {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            auto_reconnect: self.auto_reconnect,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
        }
    }
}

impl HostConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HostConfig =
            toml::from_str(&content).map_err(|e| HostError::Config(e.to_string()))?;
        info!(project = %config.project_name, "configuration loaded");
        Ok(config)
    }

    /// Create default configuration for a project
    pub fn default_for_project(name: impl Into<String>) -> Self {
        Self {
            project_name: name.into(),
            context_path: default_context_path(),
            cache: CacheConfig::default(),
            transport: TransportConfig::default(),
            filesystem: FilesystemConfig::default(),
            terminal: TerminalConfig::default(),
            roles: Vec::new(),
        }
    }
}
