//! MCP stdio wire layer — JSON-RPC 2.0 request/response/notification framing,
//! newline-delimited over stdin/stdout, plus the handful of lifecycle
//! messages (`initialize`, `notifications/initialized`, `ping`) every MCP
//! server answers before any tool call can happen.

use std::io::Write;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

pub const MCP_PARSE_ERROR: i64 = -32700;
pub const MCP_INVALID_REQUEST: i64 = -32600;
pub const MCP_METHOD_NOT_FOUND: i64 = -32601;
pub const MCP_INVALID_PARAMS: i64 = -32602;
pub const MCP_INTERNAL_ERROR: i64 = -32603;
/// Out-of-spec-range code used across this server for "the referenced
/// resource exists but isn't in a usable state right now" (a locked
/// project, a missing deployment, a task in the wrong phase).
pub const MCP_PROVIDER_NOT_AVAILABLE: i64 = -32002;

const PROTOCOL_VERSION: &str = "2024-11-05";

/// A JSON-RPC error object, also the MCP tool-call error shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl McpError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// One parsed line of stdin — either a request (has an `id`, expects a
/// response) or a notification (no `id`, fire-and-forget).
#[derive(Debug, Clone)]
pub enum McpMessage {
    Request { id: Value, method: String, params: Value },
    Notification { method: String, params: Value },
}

impl McpMessage {
    pub fn parse(line: &str) -> Result<Self, McpError> {
        let raw: Value = serde_json::from_str(line)
            .map_err(|e| McpError::new(MCP_PARSE_ERROR, format!("invalid JSON: {e}")))?;
        let method = raw
            .get("method")
            .and_then(|v| v.as_str())
            .ok_or_else(|| McpError::new(MCP_INVALID_REQUEST, "missing 'method'"))?
            .to_string();
        let params = raw.get("params").cloned().unwrap_or(Value::Null);
        match raw.get("id") {
            Some(id) => Ok(McpMessage::Request { id: id.clone(), method, params }),
            None => Ok(McpMessage::Notification { method, params }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct McpResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
}

impl McpResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    pub fn failure(id: Value, error: McpError) -> Self {
        Self { jsonrpc: "2.0", id, result: None, error: Some(error) }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct McpProgressNotification {
    pub progress_token: Value,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct McpCancelledNotification {
    pub request_id: Value,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Per-session negotiated state plus an async callback surface for
/// `tools/call`. The transport loop owns parsing and framing; everything
/// it doesn't know how to answer itself is routed here.
#[async_trait::async_trait]
pub trait McpTransportHandler: Send + Sync {
    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, McpError>;
    async fn handle_notification(&self, method: &str, params: Value);
}

/// Drives the newline-delimited JSON-RPC loop over a pair of async
/// stdin/stdout handles. Lifecycle methods (`initialize`,
/// `notifications/initialized`, `ping`) are answered here directly;
/// everything else is handed to an [`McpTransportHandler`].
pub struct McpTransport<R, W> {
    reader: BufReader<R>,
    writer: W,
}

impl<R, W> McpTransport<R, W>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader: BufReader::new(reader), writer }
    }

    pub async fn run(&mut self, handler: &dyn McpTransportHandler) -> Result<()> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .context("reading from stdin")?;
            if n == 0 {
                debug!("MCP stdin closed, shutting down transport loop");
                return Ok(());
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match McpMessage::parse(trimmed) {
                Ok(McpMessage::Request { id, method, params }) => {
                    let response = match method.as_str() {
                        "initialize" => McpResponse::success(id, handle_initialize(params)),
                        "ping" => McpResponse::success(id, handle_ping()),
                        other => match handler.handle_request(other, params).await {
                            Ok(result) => McpResponse::success(id, result),
                            Err(err) => McpResponse::failure(id, err),
                        },
                    };
                    self.write_message(&response).await?;
                }
                Ok(McpMessage::Notification { method, params }) => {
                    if method == "notifications/initialized" {
                        handle_initialized();
                    } else {
                        handler.handle_notification(&method, params).await;
                    }
                }
                Err(err) => {
                    warn!(error = %err.message, "MCP message parse failure");
                    let response = McpResponse::failure(Value::Null, err);
                    self.write_message(&response).await?;
                }
            }
        }
    }

    async fn write_message<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let mut line = serde_json::to_string(value).context("serializing MCP message")?;
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .context("writing to stdout")?;
        self.writer.flush().await.context("flushing stdout")?;
        Ok(())
    }
}

/// Build the `initialize` result: protocol version, negotiated
/// capabilities, and server identity.
pub fn handle_initialize(params: Value) -> Value {
    let client_caps = params.get("capabilities").cloned().unwrap_or(json!({}));
    let caps = super::capabilities::negotiate(client_caps);
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": caps.to_mcp_value(),
        "serverInfo": {
            "name": "gasmcpd",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

/// Acknowledge the client's `notifications/initialized`. Nothing to send
/// back — notifications never get a response.
pub fn handle_initialized() {
    debug!("MCP client sent notifications/initialized");
}

pub fn handle_ping() -> Value {
    json!({})
}

/// Emit a `notifications/progress` message out of band of any request.
pub async fn send_progress<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    notification: McpProgressNotification,
) -> Result<()> {
    let envelope = json!({
        "jsonrpc": "2.0",
        "method": "notifications/progress",
        "params": {
            "progressToken": notification.progress_token,
            "progress": notification.progress,
            "total": notification.total,
        },
    });
    let mut line = serde_json::to_string(&envelope)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Flush-only helper for contexts (like `doctor`) that print a single JSON
/// line to real stdout without going through the async transport.
pub fn print_line(value: &impl Serialize) -> Result<()> {
    let line = serde_json::to_string(value)?;
    let mut stdout = std::io::stdout();
    writeln!(stdout, "{line}")?;
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_request_with_id() {
        let msg = McpMessage::parse(r#"{"jsonrpc":"2.0","id":1,"method":"ping","params":{}}"#).unwrap();
        assert!(matches!(msg, McpMessage::Request { method, .. } if method == "ping"));
    }

    #[test]
    fn parses_a_notification_without_id() {
        let msg = McpMessage::parse(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(matches!(msg, McpMessage::Notification { method, .. } if method == "notifications/initialized"));
    }

    #[test]
    fn malformed_json_yields_parse_error() {
        let err = McpMessage::parse("not json").unwrap_err();
        assert_eq!(err.code, MCP_PARSE_ERROR);
    }

    #[test]
    fn missing_method_yields_invalid_request() {
        let err = McpMessage::parse(r#"{"jsonrpc":"2.0","id":1}"#).unwrap_err();
        assert_eq!(err.code, MCP_INVALID_REQUEST);
    }

    #[test]
    fn initialize_response_reports_protocol_version_and_tools_capability() {
        let result = handle_initialize(json!({ "capabilities": { "tools": {} } }));
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[test]
    fn response_omits_result_when_erroring() {
        let resp = McpResponse::failure(json!(1), McpError::new(MCP_INVALID_PARAMS, "bad"));
        let v = serde_json::to_value(&resp).unwrap();
        assert!(v.get("result").is_none());
        assert_eq!(v["error"]["code"], MCP_INVALID_PARAMS);
    }
}
