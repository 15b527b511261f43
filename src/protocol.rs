//! RPC wire protocol shared with sidecar backends
//!
//! Newline-delimited UTF-8 JSON. Each request line carries a correlation id;
//! the backend answers with either a result or an error envelope bearing the
//! same id. Responses may arrive in any order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound lines larger than this are dropped rather than parsed.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: String,
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    pub fn parse_error(msg: &str) -> Self {
        Self {
            code: -32700,
            message: format!("Parse error: {}", msg),
        }
    }

    pub fn invalid_request() -> Self {
        Self {
            code: -32600,
            message: "Invalid request".to_string(),
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {}", method),
        }
    }

    pub fn invalid_params(msg: &str) -> Self {
        Self {
            code: -32602,
            message: format!("Invalid params: {}", msg),
        }
    }

    pub fn internal_error(msg: &str) -> Self {
        Self {
            code: -32603,
            message: format!("Internal error: {}", msg),
        }
    }
}

/// Serialize a request to a single wire line (without the trailing newline).
pub fn encode_request(request: &RpcRequest) -> Result<String, serde_json::Error> {
    serde_json::to_string(request)
}

/// Parse one response line. Oversized or malformed lines produce an error;
/// the transport logs and drops them without touching in-flight requests.
pub fn parse_response(line: &str) -> Result<RpcResponse, String> {
    if line.len() > MAX_MESSAGE_SIZE {
        return Err(format!("message exceeds {} bytes", MAX_MESSAGE_SIZE));
    }
    serde_json::from_str(line.trim()).map_err(|e| e.to_string())
}
