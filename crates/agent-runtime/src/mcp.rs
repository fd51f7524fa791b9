//! Remote Tool Client
//!
//! Talks to a tool server over MCP streamable HTTP: every message is a
//! JSON-RPC `POST`, answered with either a JSON body or an SSE body whose
//! `data:` lines carry the response.
//!
//! Connections are scoped to the operation that needs them. Discovery opens
//! a session, lists tools and closes it; each remote tool call does the same.
//! A session dropped before `close()` sends its `DELETE` from a spawned task.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use agent_core::{
    error::{AgentError, Result},
    registry::RemoteToolSource,
    tool::{Tool, ToolCall, ToolOrigin, ToolResult, ToolSchema},
};
use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, header};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::McpConfig;

const PROTOCOL_VERSION: &str = "2025-03-26";
const SESSION_HEADER: &str = "mcp-session-id";
const ACCEPT: &str = "application/json, text/event-stream";

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<Value>,
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct CallToolResult {
    #[serde(default)]
    content: Vec<ContentItem>,
    #[serde(default, rename = "isError")]
    is_error: bool,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

struct Transport {
    http: Client,
    config: McpConfig,
    ids: AtomicU64,
}

impl Transport {
    fn post(&self, session: Option<&str>) -> RequestBuilder {
        let mut request = self
            .http
            .post(&self.config.url)
            .header(header::ACCEPT, ACCEPT);
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }
        if let Some(id) = session {
            request = request.header(SESSION_HEADER, id);
        }
        request
    }

    async fn delete(&self, session: &str) {
        let mut request = self.http.delete(&self.config.url).header(SESSION_HEADER, session);
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }
        match request.send().await {
            Ok(response) if response.status().is_success() || response.status() == StatusCode::METHOD_NOT_ALLOWED => {
                tracing::debug!(session, "Closed tool server session");
            }
            Ok(response) => tracing::warn!(session, status = %response.status(), "Tool server rejected session close"),
            Err(e) => tracing::warn!(session, error = %e, "Failed to close tool server session"),
        }
    }
}

/// An open connection to the tool server
pub struct McpSession {
    transport: Arc<Transport>,
    id: Option<String>,
    closed: bool,
}

impl McpSession {
    async fn open(transport: Arc<Transport>) -> anyhow::Result<Self> {
        let id = transport.ids.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: Some(id),
            method: "initialize",
            params: Some(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION")},
            })),
        };

        let response = transport
            .post(None)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("connecting to {}", transport.config.url))?;
        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let session = Self {
            transport,
            id: session_id,
            closed: false,
        };
        decode(response, id).await.context("initialize")?;
        session.notify("notifications/initialized").await?;
        tracing::debug!(session = ?session.id, "Opened tool server session");
        Ok(session)
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    async fn request(&self, method: &str, params: Option<Value>) -> anyhow::Result<Value> {
        let id = self.transport.ids.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest { jsonrpc: "2.0", id: Some(id), method, params };
        let response = self.transport.post(self.id()).json(&request).send().await?;
        decode(response, id).await.with_context(|| method.to_string())
    }

    async fn notify(&self, method: &str) -> anyhow::Result<()> {
        let request = JsonRpcRequest { jsonrpc: "2.0", id: None, method, params: None };
        let response = self.transport.post(self.id()).json(&request).send().await?;
        if !response.status().is_success() {
            bail!("{method}: tool server returned {}", response.status());
        }
        Ok(())
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolSchema>> {
        let result = self
            .request("tools/list", None)
            .await
            .map_err(|e| AgentError::ToolDiscovery(format!("{e:#}")))?;
        parse_descriptors(&result)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> anyhow::Result<ToolResult> {
        let result = self
            .request("tools/call", Some(json!({"name": name, "arguments": arguments})))
            .await?;
        let call: CallToolResult = serde_json::from_value(result).context("tools/call result")?;

        let output = call
            .content
            .into_iter()
            .filter(|item| item.kind == "text")
            .filter_map(|item| item.text)
            .collect::<Vec<_>>()
            .join("\n");

        Ok(if call.is_error {
            ToolResult::failure(name, output)
        } else {
            ToolResult::success(name, output)
        })
    }

    pub async fn close(mut self) {
        self.closed = true;
        if let Some(id) = self.id.take() {
            self.transport.delete(&id).await;
        }
    }
}

impl Drop for McpSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let Some(id) = self.id.take() else { return };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let transport = Arc::clone(&self.transport);
                runtime.spawn(async move { transport.delete(&id).await });
            }
            Err(_) => tracing::warn!(session = %id, "Tool server session dropped outside a runtime"),
        }
    }
}

/// Read a JSON-RPC response from either a JSON or an SSE body
async fn decode(response: reqwest::Response, id: u64) -> anyhow::Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("tool server returned {status}: {body}");
    }

    let is_sse = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/event-stream"));
    let body = response.text().await?;

    let message = if is_sse {
        sse_response(&body, id)?
    } else {
        serde_json::from_str::<JsonRpcResponse>(&body).context("decoding JSON-RPC response")?
    };

    if let Some(error) = message.error {
        bail!("[{}] {}", error.code, error.message);
    }
    message.result.ok_or_else(|| anyhow!("response carried no result"))
}

/// Pick the response for `id` out of an SSE body
fn sse_response(body: &str, id: u64) -> anyhow::Result<JsonRpcResponse> {
    let mut data = String::new();
    let mut events = Vec::new();
    for line in body.lines() {
        if let Some(chunk) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(chunk.strip_prefix(' ').unwrap_or(chunk));
        } else if line.is_empty() && !data.is_empty() {
            events.push(std::mem::take(&mut data));
        }
    }
    if !data.is_empty() {
        events.push(data);
    }

    events
        .iter()
        .filter_map(|event| serde_json::from_str::<JsonRpcResponse>(event).ok())
        .find(|message| message.id.as_ref().and_then(Value::as_u64) == Some(id))
        .ok_or_else(|| anyhow!("no response for request {id} in event stream"))
}

fn parse_descriptors(result: &Value) -> Result<Vec<ToolSchema>> {
    let tools = result
        .get("tools")
        .and_then(Value::as_array)
        .ok_or_else(|| AgentError::ToolDiscovery("tools/list result has no 'tools' array".into()))?;

    tools
        .iter()
        .enumerate()
        .map(|(index, tool)| {
            let name = tool
                .get("name")
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| AgentError::ToolDiscovery(format!("tool descriptor {index} has no name")))?;
            Ok(ToolSchema {
                name: name.to_string(),
                description: tool.get("description").and_then(Value::as_str).unwrap_or_default().to_string(),
                input_schema: tool.get("inputSchema").cloned().unwrap_or_else(|| json!({"type": "object"})),
            })
        })
        .collect()
}

/// Client for one tool server endpoint
#[derive(Clone)]
pub struct McpClient {
    transport: Arc<Transport>,
}

impl McpClient {
    pub fn new(config: McpConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AgentError::Config(format!("tool server client: {e}")))?;
        Ok(Self {
            transport: Arc::new(Transport {
                http,
                config,
                ids: AtomicU64::new(1),
            }),
        })
    }

    pub async fn open(&self) -> Result<McpSession> {
        McpSession::open(Arc::clone(&self.transport))
            .await
            .map_err(|e| AgentError::ToolDiscovery(format!("{e:#}")))
    }

    /// Tool descriptors advertised by the server
    pub async fn list_tools(&self) -> Result<Vec<ToolSchema>> {
        let session = self.open().await?;
        let tools = session.list_tools().await;
        session.close().await;
        tools
    }

    /// Invoke a named tool in its own session
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<ToolResult> {
        let session = McpSession::open(Arc::clone(&self.transport))
            .await
            .map_err(|e| AgentError::ToolExecution(format!("{name}: {e:#}")))?;
        let result = session.call_tool(name, arguments).await;
        session.close().await;
        result.map_err(|e| AgentError::ToolExecution(format!("{name}: {e:#}")))
    }
}

#[async_trait]
impl RemoteToolSource for McpClient {
    fn endpoint(&self) -> &str {
        &self.transport.config.url
    }

    async fn discover(&self) -> Result<Vec<Arc<dyn Tool>>> {
        let schemas = self.list_tools().await?;
        tracing::info!(endpoint = %self.endpoint(), tools = schemas.len(), "Discovered remote tools");
        Ok(schemas
            .into_iter()
            .map(|schema| Arc::new(RemoteTool { client: self.clone(), schema }) as Arc<dyn Tool>)
            .collect())
    }
}

/// A tool that executes on the remote server
pub struct RemoteTool {
    client: McpClient,
    schema: ToolSchema,
}

#[async_trait]
impl Tool for RemoteTool {
    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolResult> {
        let result = self.client.invoke(&self.schema.name, call.arguments_value()).await?;
        Ok(result.with_id(call.id.clone()))
    }

    fn origin(&self) -> ToolOrigin {
        ToolOrigin::Remote
    }
}
