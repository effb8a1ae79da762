//! Newline-delimited JSON-RPC 2.0 frames for the MCP stdio transport.

use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_LIST_TOOLS: &str = "tools/list";
pub const METHOD_CALL_TOOL: &str = "tools/call";

#[derive(Debug, Serialize)]
pub struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    pub params: serde_json::Value,
}

impl Request {
    #[must_use]
    pub fn new(id: u64, method: &'static str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: serde_json::Value,
}

impl Notification {
    #[must_use]
    pub fn new(method: &'static str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// Anything a backend may write on stdout: a response (`id` plus `result`
/// or `error`) or a server-initiated notification (`method`, no `id`).
#[derive(Debug, Deserialize)]
pub struct Incoming {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl Incoming {
    /// Correlator of a response frame. Only numeric ids are issued by this
    /// client, so anything else is ignored.
    #[must_use]
    pub fn correlator(&self) -> Option<u64> {
        self.id.as_ref().and_then(serde_json::Value::as_u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
}

/// Tool shape reported by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<NativeTool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_with_version_tag() {
        let req = Request::new(7, METHOD_LIST_TOOLS, serde_json::json!({}));
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 7);
        assert_eq!(json["method"], "tools/list");
    }

    #[test]
    fn notification_has_no_id() {
        let note = Notification::new(METHOD_INITIALIZED, serde_json::json!({}));
        let json = serde_json::to_value(&note).unwrap();
        assert!(json.get("id").is_none());
    }

    #[test]
    fn response_frame_parses() {
        let frame: Incoming =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":3,"result":{"ok":true}}"#).unwrap();
        assert_eq!(frame.correlator(), Some(3));
        assert!(frame.result.is_some());
        assert!(frame.error.is_none());
    }

    #[test]
    fn error_frame_parses() {
        let frame: Incoming = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32601,"message":"method not found"}}"#,
        )
        .unwrap();
        let err = frame.error.unwrap();
        assert_eq!(err.code, -32601);
        assert_eq!(err.to_string(), "JSON-RPC error -32601: method not found");
    }

    #[test]
    fn server_notification_has_no_correlator() {
        let frame: Incoming = serde_json::from_str(
            r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{}}"#,
        )
        .unwrap();
        assert_eq!(frame.correlator(), None);
        assert_eq!(frame.method.as_deref(), Some("notifications/progress"));
    }

    #[test]
    fn string_id_is_ignored() {
        let frame: Incoming =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"abc","result":null}"#).unwrap();
        assert_eq!(frame.correlator(), None);
    }

    #[test]
    fn tools_list_result_parses_input_schema() {
        let result: ToolsListResult = serde_json::from_str(
            r#"{"tools":[{"name":"search","description":"Search the web","inputSchema":{"type":"object"}}]}"#,
        )
        .unwrap();
        assert_eq!(result.tools.len(), 1);
        assert_eq!(result.tools[0].name, "search");
        assert_eq!(result.tools[0].input_schema["type"], "object");
    }

    #[test]
    fn native_tool_missing_description_defaults_empty() {
        let tool: NativeTool = serde_json::from_str(r#"{"name":"t"}"#).unwrap();
        assert!(tool.description.is_empty());
        assert!(tool.input_schema.is_null());
    }

    #[test]
    fn initialize_result_parses() {
        let result: InitializeResult =
            serde_json::from_str(r#"{"protocolVersion":"2024-11-05","capabilities":{}}"#).unwrap();
        assert_eq!(result.protocol_version, PROTOCOL_VERSION);
    }
}
