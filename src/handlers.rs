//! JSON-RPC method routing for one session.
//!
//! A [`SessionHandler`] answers `initialize`, `ping`, the tool, prompt and
//! resource methods, and accepts notifications. Transports feed it decoded
//! payloads and write back whatever it returns.

use crate::error::{ServerError, ServerResult};
use crate::protocol::{
    methods, recover_id, CallToolParams, GetPromptParams, InitializeParams, InitializeResult,
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListPromptsResult,
    ListResourcesResult, ListToolsResult, Payload, ReadResourceParams, ServerCapabilities,
    LATEST_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::prompts::build_prompt_list;
use crate::resources::{build_resource_list, read_resource};
use crate::server::{build_instructions, server_info, ServerShared};
use crate::telemetry::RequestContext;
use crate::tools::list_tools;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-session request handler.
pub struct SessionHandler {
    shared: Arc<ServerShared>,
    protocol_version: Mutex<Option<String>>,
}

impl SessionHandler {
    pub(crate) fn new(shared: Arc<ServerShared>) -> Self {
        Self {
            shared,
            protocol_version: Mutex::new(None),
        }
    }

    /// Whether `initialize` has completed on this session.
    pub fn is_initialized(&self) -> bool {
        self.protocol_version.lock().is_some()
    }

    /// Negotiated protocol version, once initialized.
    pub fn protocol_version(&self) -> Option<String> {
        self.protocol_version.lock().clone()
    }

    pub(crate) fn mark_initialized(&self, version: &str) {
        *self.protocol_version.lock() = Some(version.to_string());
    }

    /// Handle a wire payload. Returns `None` when nothing needs to be sent
    /// back (notifications and client responses only).
    pub async fn handle_payload(&self, payload: Payload, session_id: Option<&str>) -> Option<Value> {
        match payload {
            Payload::Single(value) => self
                .handle_value(value, session_id)
                .await
                .map(|r| r.to_value()),
            Payload::Batch(items) => {
                let mut responses = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(response) = self.handle_value(item, session_id).await {
                        responses.push(response.to_value());
                    }
                }
                if responses.is_empty() {
                    None
                } else {
                    Some(Value::Array(responses))
                }
            }
        }
    }

    /// Handle one decoded JSON value.
    pub async fn handle_value(&self, value: Value, session_id: Option<&str>) -> Option<JsonRpcResponse> {
        let id = recover_id(&value);
        match JsonRpcMessage::from_value(value) {
            Ok(message) => self.handle_message(message, session_id).await,
            Err(e) => {
                debug!("Rejected message: {}", e);
                Some(JsonRpcResponse::from_error(id, &e))
            }
        }
    }

    /// Handle one classified message.
    pub async fn handle_message(
        &self,
        message: JsonRpcMessage,
        session_id: Option<&str>,
    ) -> Option<JsonRpcResponse> {
        match message {
            JsonRpcMessage::Request(request) => {
                let mut ctx = RequestContext::new().with_operation(request.method.clone());
                if let Some(id) = session_id {
                    ctx = ctx.with_session(id);
                }
                Some(self.handle_request(request, &ctx).await)
            }
            JsonRpcMessage::Notification(notification) => {
                self.handle_notification(&notification);
                None
            }
            JsonRpcMessage::Response(_) => {
                debug!("Ignoring client response; no server requests are outstanding");
                None
            }
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest, ctx: &RequestContext) -> JsonRpcResponse {
        debug!("{} request received", ctx.log_prefix());

        let result = self.dispatch(&request.method, request.params).await;
        let success = result.is_ok();
        self.shared.metrics.record_request(success);

        match result {
            Ok(value) => {
                debug!("{} completed in {:?}", ctx.log_prefix(), ctx.elapsed());
                JsonRpcResponse::success(request.id, value)
            }
            Err(e) => {
                warn!("{} failed: {}", ctx.log_prefix(), e);
                JsonRpcResponse::from_error(Some(request.id), &e)
            }
        }
    }

    fn handle_notification(&self, notification: &JsonRpcNotification) {
        match notification.method.as_str() {
            "notifications/initialized" => debug!("Client finished initialization"),
            "notifications/cancelled" => debug!("Client cancelled a request"),
            other => debug!("Ignoring notification {}", other),
        }
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> ServerResult<Value> {
        match method {
            methods::INITIALIZE => {
                let params: InitializeParams = parse_params_or_default(params)?;
                Ok(serde_json::to_value(self.initialize(params))?)
            }
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => Ok(serde_json::to_value(ListToolsResult {
                tools: list_tools(),
            })?),
            methods::TOOLS_CALL => {
                let params: CallToolParams = parse_params(params)?;
                let result = self.shared.tools.call(&params.name, params.arguments).await?;
                Ok(serde_json::to_value(result)?)
            }
            methods::PROMPTS_LIST => Ok(serde_json::to_value(ListPromptsResult {
                prompts: build_prompt_list(),
            })?),
            methods::PROMPTS_GET => {
                let params: GetPromptParams = parse_params(params)?;
                let result = self
                    .shared
                    .prompts
                    .get_prompt(&params.name, params.arguments.as_ref())
                    .await?;
                Ok(serde_json::to_value(result)?)
            }
            methods::RESOURCES_LIST => Ok(serde_json::to_value(ListResourcesResult {
                resources: build_resource_list(),
            })?),
            methods::RESOURCES_READ => {
                let params: ReadResourceParams = parse_params(params)?;
                Ok(serde_json::to_value(read_resource(&params.uri)?)?)
            }
            other => Err(ServerError::MethodNotFound(other.to_string())),
        }
    }

    fn initialize(&self, params: InitializeParams) -> InitializeResult {
        let requested = params.protocol_version.as_deref();
        let version = match requested {
            Some(v) if SUPPORTED_PROTOCOL_VERSIONS.contains(&v) => v,
            _ => LATEST_PROTOCOL_VERSION,
        };
        self.mark_initialized(version);

        let client = params
            .client_info
            .map(|c| format!("{} {}", c.name, c.version))
            .unwrap_or_else(|| "unknown client".to_string());
        info!("Initialized session for {} (protocol {})", client, version);

        InitializeResult {
            protocol_version: version.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(json!({})),
                prompts: Some(json!({})),
                resources: Some(json!({})),
            },
            server_info: server_info(),
            instructions: Some(build_instructions(&self.shared.config)),
        }
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> ServerResult<T> {
    let value = params.ok_or_else(|| ServerError::invalid_params("missing params"))?;
    serde_json::from_value(value).map_err(|e| ServerError::invalid_params(e.to_string()))
}

fn parse_params_or_default<T: DeserializeOwned + Default>(params: Option<Value>) -> ServerResult<T> {
    match params {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => {
            serde_json::from_value(value).map_err(|e| ServerError::invalid_params(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::server::McpServer;

    fn handler() -> SessionHandler {
        McpServer::new(Config::default()).new_handler()
    }

    async fn request(h: &SessionHandler, method: &str, params: Value) -> Value {
        let msg = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params});
        h.handle_value(msg, None).await.unwrap().to_value()
    }

    #[tokio::test]
    async fn test_initialize_negotiates_version() {
        let h = handler();
        let resp = request(&h, "initialize", json!({"protocolVersion": "2024-11-05"})).await;
        assert_eq!(resp["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(resp["result"]["serverInfo"]["name"], "mssql-crud-mcp");
        assert!(resp["result"]["capabilities"]["tools"].is_object());
        assert!(h.is_initialized());

        let h = handler();
        let resp = request(&h, "initialize", json!({"protocolVersion": "1999-01-01"})).await;
        assert_eq!(resp["result"]["protocolVersion"], LATEST_PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn test_list_methods() {
        let h = handler();
        let tools = request(&h, "tools/list", json!({})).await;
        assert_eq!(tools["result"]["tools"].as_array().unwrap().len(), 6);

        let prompts = request(&h, "prompts/list", json!({})).await;
        assert_eq!(prompts["result"]["prompts"].as_array().unwrap().len(), 3);

        let resources = request(&h, "resources/list", json!({})).await;
        assert_eq!(
            resources["result"]["resources"][0]["mimeType"],
            "text/markdown"
        );
    }

    #[tokio::test]
    async fn test_tool_errors_are_soft() {
        let h = handler();
        let resp = request(
            &h,
            "tools/call",
            json!({"name": "query", "arguments": {"sql": "DELETE FROM employees"}}),
        )
        .await;
        assert!(resp.get("error").is_none());
        assert_eq!(resp["result"]["isError"], true);
        assert_eq!(
            resp["result"]["content"][0]["text"],
            "Only SELECT queries are allowed"
        );
    }

    #[tokio::test]
    async fn test_prompt_and_resource_errors_are_hard() {
        let h = handler();
        let resp = request(&h, "prompts/get", json!({"name": "nope"})).await;
        assert_eq!(resp["error"]["code"], -32603);
        assert_eq!(resp["error"]["message"], "Unknown prompt: nope");

        let resp = request(&h, "resources/read", json!({"uri": "schema://x"})).await;
        assert_eq!(resp["error"]["code"], -32603);
        assert_eq!(resp["error"]["message"], "Unknown resource: schema://x");
    }

    #[tokio::test]
    async fn test_get_prompt() {
        let h = handler();
        let resp = request(
            &h,
            "prompts/get",
            json!({"name": "insert-employee", "arguments": {"employee_info": "John Doe"}}),
        )
        .await;
        let text = resp["result"]["messages"][0]["content"]["text"].as_str().unwrap();
        assert!(text.contains("John Doe"));
        assert_eq!(resp["result"]["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn test_unknown_method_and_bad_params() {
        let h = handler();
        let resp = request(&h, "sampling/createMessage", json!({})).await;
        assert_eq!(resp["error"]["code"], -32601);

        let resp = request(&h, "tools/call", json!({"arguments": {}})).await;
        assert_eq!(resp["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let h = handler();
        let msg = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        assert!(h.handle_value(msg, None).await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_message_keeps_id() {
        let h = handler();
        let resp = h
            .handle_value(json!({"jsonrpc": "1.0", "id": 9, "method": "ping"}), None)
            .await
            .unwrap();
        assert_eq!(resp.id, Some(crate::protocol::RequestId::Number(9)));
        assert_eq!(resp.error.unwrap().code, -32600);
    }

    #[tokio::test]
    async fn test_batch() {
        let h = handler();
        let payload = Payload::Batch(vec![
            json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
        ]);
        let out = h.handle_payload(payload, None).await.unwrap();
        assert_eq!(out.as_array().unwrap().len(), 2);

        let only_notes = Payload::Batch(vec![json!({"jsonrpc": "2.0", "method": "x"})]);
        assert!(h.handle_payload(only_notes, None).await.is_none());
    }
}
