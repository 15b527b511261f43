//! Service adapters
//!
//! Each backend capability family (filesystem, git, terminal, sidecar) is an
//! adapter implementing [`ServiceAdapter`]. The registry stores adapters as
//! trait objects and dispatches by service name; inside an adapter a flat
//! match on the tool name routes to per-tool handlers, with argument
//! validation ahead of any I/O.

pub mod filesystem;
pub mod git;
pub mod sidecar;
pub mod terminal;

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::service::{Capability, ServiceCommand, ServiceResult};

/// Adapter lifecycle. `Ready` is the only state in which `execute` does work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Uninitialized,
    Initializing,
    Ready,
    ShuttingDown,
    Closed,
}

/// Uniform contract between the registry and a backend capability family.
///
/// Expected failures (bad arguments, backend errors, unknown tools) surface
/// as `ServiceResult { success: false, .. }` from `execute`, never as `Err`,
/// so dispatch through the registry cannot throw or panic.
#[async_trait]
pub trait ServiceAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Declared tools. `execute` accepts exactly these names.
    fn capabilities(&self) -> Vec<Capability>;

    fn state(&self) -> AdapterState;

    /// Acquire owned resources. Idempotent: initializing a `Ready` adapter
    /// is a no-op.
    async fn initialize(&mut self) -> Result<()>;

    /// Run one tool invocation.
    async fn execute(&self, command: &ServiceCommand) -> ServiceResult;

    /// Release owned resources. Idempotent.
    async fn cleanup(&mut self);

    /// Liveness probe; adapters without a meaningful probe report healthy.
    async fn health_check(&self) -> bool {
        true
    }
}

pub(crate) fn unknown_tool(tool: &str) -> ServiceResult {
    ServiceResult::err(format!("Unknown tool: {}", tool))
}

pub(crate) fn not_ready(name: &str) -> ServiceResult {
    ServiceResult::err(format!("Service '{}' is not initialized", name))
}

/// Pull a required string argument, or produce the failed result to return.
pub(crate) fn require_str<'a>(
    args: &'a Value,
    field: &str,
) -> std::result::Result<&'a str, ServiceResult> {
    args.get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ServiceResult::err(format!("Missing '{}' argument", field)))
}

/// Resolve a caller-supplied relative path against a base directory,
/// normalizing `.` and `..` lexically. Returns `None` when the path is
/// absolute or would escape the base.
pub(crate) fn resolve_under(base: &Path, relative: &str) -> Option<PathBuf> {
    let mut resolved = base.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() || !resolved.starts_with(base) {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if resolved.starts_with(base) {
        Some(resolved)
    } else {
        None
    }
}
