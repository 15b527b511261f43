//! Sidecar adapter
//!
//! Generic passthrough to the native sidecar service over the RPC transport:
//! `call` forwards an arbitrary method, `ping` doubles as the health probe.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::adapters::{not_ready, require_str, unknown_tool, AdapterState, ServiceAdapter};
use crate::error::Result;
use crate::service::{Capability, ServiceCommand, ServiceResult};
use crate::transport::{RpcChannel, RpcTransport};

pub struct SidecarAdapter {
    channel: Arc<dyn RpcChannel>,
    /// Present when this adapter created the transport and must close it.
    transport: Option<Arc<RpcTransport>>,
    state: AdapterState,
}

impl SidecarAdapter {
    /// Owns the transport: `initialize` connects it, `cleanup` closes it.
    pub fn new(transport: Arc<RpcTransport>) -> Self {
        Self {
            channel: transport.clone(),
            transport: Some(transport),
            state: AdapterState::Uninitialized,
        }
    }

    /// Shares an already-connected channel; starts `Ready` and leaves the
    /// channel open on cleanup.
    pub fn with_channel(channel: Arc<dyn RpcChannel>) -> Self {
        Self {
            channel,
            transport: None,
            state: AdapterState::Ready,
        }
    }

    async fn call(&self, args: &Value) -> ServiceResult {
        let method = match require_str(args, "method") {
            Ok(v) => v,
            Err(result) => return result,
        };
        let params = args.get("params").cloned().unwrap_or_else(|| json!({}));
        match self.channel.call(method, params).await {
            Ok(value) => ServiceResult::ok(value),
            Err(e) => ServiceResult::err(e.to_string()),
        }
    }

    async fn ping(&self) -> ServiceResult {
        match self.channel.call("ping", json!({})).await {
            Ok(value) => ServiceResult::ok(value),
            Err(e) => ServiceResult::err(e.to_string()),
        }
    }
}

#[async_trait]
impl ServiceAdapter for SidecarAdapter {
    fn name(&self) -> &str {
        "sidecar"
    }

    fn description(&self) -> &str {
        "Passthrough to the native sidecar service"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::new(
                "call",
                "Forward a method call to the sidecar",
                json!({
                    "type": "object",
                    "properties": {
                        "method": { "type": "string" },
                        "params": { "type": "object" }
                    },
                    "required": ["method"]
                }),
            ),
            Capability::new(
                "ping",
                "Probe sidecar liveness",
                json!({ "type": "object", "properties": {} }),
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
        info!("sidecar adapter ready");
        Ok(())
    }

    async fn execute(&self, command: &ServiceCommand) -> ServiceResult {
        if self.state != AdapterState::Ready {
            return not_ready(self.name());
        }
        match command.tool.as_str() {
            "call" => self.call(&command.args).await,
            "ping" => self.ping().await,
            other => unknown_tool(other),
        }
    }

    async fn cleanup(&mut self) {
        self.state = AdapterState::ShuttingDown;
        if let Some(transport) = &self.transport {
            transport.close().await;
        }
        self.state = AdapterState::Closed;
        info!("sidecar adapter closed");
    }

    async fn health_check(&self) -> bool {
        if self.state != AdapterState::Ready {
            return false;
        }
        self.channel.call("ping", json!({})).await.is_ok()
    }
}
