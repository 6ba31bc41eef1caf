// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client for a Graphiti knowledge-graph service exposed over MCP.
//!
//! The [`GraphClient`] trait is the seam the graph backend depends on.
//! [`McpGraphClient`] speaks JSON-RPC 2.0 over the MCP streamable HTTP
//! transport: an `initialize` handshake establishes a session whose id is
//! echoed in the `Mcp-Session-Id` header, and every response may arrive
//! either as plain JSON or as a server-sent event stream.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use engram_core::EngramError;

/// Backend name used in errors raised by the MCP client.
pub const MCP_BACKEND: &str = "graphiti-mcp";

const PROTOCOL_VERSION: &str = "2025-03-26";
const SESSION_HEADER: &str = "mcp-session-id";

/// A relationship fact returned by `search_memory_facts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphFact {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    pub fact: String,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub valid_at: Option<String>,
    #[serde(default)]
    pub invalid_at: Option<String>,
    #[serde(default)]
    pub source_node_uuid: Option<String>,
    #[serde(default)]
    pub target_node_uuid: Option<String>,
    #[serde(default)]
    pub episodes: Vec<String>,
}

/// An entity node returned by `search_nodes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// A raw episode returned by `get_episodes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEpisode {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub source_description: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Arguments of an `add_memory` call.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeInput {
    pub name: String,
    pub body: String,
    pub group_id: String,
    /// Graphiti episode type: `message`, `text` or `json`.
    pub source: String,
    pub source_description: String,
}

/// Operations the graph backend needs from a knowledge-graph service.
#[async_trait]
pub trait GraphClient: Send + Sync + 'static {
    async fn add_episode(&self, episode: EpisodeInput) -> Result<(), EngramError>;

    /// Facts ranked by the service, most relevant first.
    async fn search_facts(
        &self,
        query: &str,
        group_id: &str,
        max_facts: usize,
    ) -> Result<Vec<GraphFact>, EngramError>;

    /// Entity nodes ranked by the service, most relevant first.
    async fn search_nodes(
        &self,
        query: &str,
        group_id: &str,
        max_nodes: usize,
    ) -> Result<Vec<GraphNode>, EngramError>;

    /// Most recent episodes of the group.
    async fn get_episodes(
        &self,
        group_id: &str,
        max_episodes: usize,
    ) -> Result<Vec<GraphEpisode>, EngramError>;

    async fn delete_episode(&self, uuid: &str) -> Result<(), EngramError>;

    /// Deletes every node, edge and episode of the group.
    async fn clear_graph(&self, group_id: &str) -> Result<(), EngramError>;

    async fn ping(&self) -> Result<(), EngramError>;
}

struct Session {
    id: Option<String>,
}

enum RpcFailure {
    /// The server no longer recognizes the session.
    SessionExpired,
    Error(EngramError),
}

impl From<EngramError> for RpcFailure {
    fn from(e: EngramError) -> Self {
        RpcFailure::Error(e)
    }
}

/// [`GraphClient`] over the MCP streamable HTTP transport.
pub struct McpGraphClient {
    http: reqwest::Client,
    url: String,
    session: Mutex<Option<Session>>,
    next_id: AtomicU64,
}

impl McpGraphClient {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            session: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Current session id, running the handshake if none is established.
    async fn session_id(&self) -> Result<Option<String>, EngramError> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.id.clone());
        }
        let session = self.handshake().await?;
        let id = session.id.clone();
        *guard = Some(session);
        Ok(id)
    }

    async fn reset_session(&self) {
        *self.session.lock().await = None;
    }

    async fn handshake(&self) -> Result<Session, EngramError> {
        let id = self.request_id();
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": "engram",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            },
        });
        let response = self.post(&body, None).await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngramError::unavailable(
                MCP_BACKEND,
                format!("initialize returned {status}: {text}"),
            ));
        }
        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let message = read_message(response, id).await?;
        rpc_result(message, "initialize")?;

        let notification = json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
        });
        let response = self.post(&notification, session_id.as_deref()).await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "initialized notification rejected");
        }
        debug!(url = %self.url, session = ?session_id, "MCP session established");
        Ok(Session { id: session_id })
    }

    async fn post(
        &self,
        body: &Value,
        session_id: Option<&str>,
    ) -> Result<reqwest::Response, EngramError> {
        let mut request = self
            .http
            .post(&self.url)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(id) = session_id {
            request = request.header(SESSION_HEADER, id);
        }
        request
            .send()
            .await
            .map_err(|e| EngramError::unavailable(MCP_BACKEND, e))
    }

    async fn send(
        &self,
        method: &str,
        params: &Value,
        session_id: Option<&str>,
    ) -> Result<Value, RpcFailure> {
        let id = self.request_id();
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let response = self.post(&body, session_id).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND && session_id.is_some() {
            return Err(RpcFailure::SessionExpired);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RpcFailure::Error(EngramError::unavailable(
                MCP_BACKEND,
                format!("{method} returned {status}: {text}"),
            )));
        }
        let message = read_message(response, id).await?;
        Ok(rpc_result(message, method)?)
    }

    /// Sends one JSON-RPC request, re-establishing an expired session once.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, EngramError> {
        let session_id = self.session_id().await?;
        match self.send(method, &params, session_id.as_deref()).await {
            Ok(value) => Ok(value),
            Err(RpcFailure::Error(e)) => Err(e),
            Err(RpcFailure::SessionExpired) => {
                debug!(method, "MCP session expired, re-initializing");
                self.reset_session().await;
                let session_id = self.session_id().await?;
                match self.send(method, &params, session_id.as_deref()).await {
                    Ok(value) => Ok(value),
                    Err(RpcFailure::Error(e)) => Err(e),
                    Err(RpcFailure::SessionExpired) => Err(EngramError::unavailable(
                        MCP_BACKEND,
                        "session rejected after re-initialization",
                    )),
                }
            }
        }
    }

    /// Invokes an MCP tool and returns its decoded payload.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, EngramError> {
        let result = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        decode_tool_result(name, result)
    }
}

/// Reads the JSON-RPC message answering request `id` from a JSON or SSE body.
async fn read_message(response: reqwest::Response, id: u64) -> Result<Value, EngramError> {
    let is_sse = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"));

    if !is_sse {
        return response
            .json::<Value>()
            .await
            .map_err(|e| EngramError::unavailable(MCP_BACKEND, e));
    }

    let mut events = response.bytes_stream().eventsource();
    while let Some(event) = events.next().await {
        let event = event.map_err(|e| EngramError::unavailable(MCP_BACKEND, e.to_string()))?;
        if event.data.trim().is_empty() {
            continue;
        }
        let message: Value = serde_json::from_str(&event.data)?;
        if message.get("id").and_then(Value::as_u64) == Some(id) {
            return Ok(message);
        }
    }
    Err(EngramError::unavailable(
        MCP_BACKEND,
        format!("event stream ended without a response to request {id}"),
    ))
}

fn rpc_result(mut message: Value, method: &str) -> Result<Value, EngramError> {
    if let Some(error) = message.get("error") {
        let text = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(EngramError::unavailable(
            MCP_BACKEND,
            format!("{method} failed: {text}"),
        ));
    }
    Ok(message
        .get_mut("result")
        .map(Value::take)
        .unwrap_or(Value::Null))
}

/// Extracts the tool payload from a `tools/call` result.
///
/// Prefers `structuredContent`, falling back to the first text block parsed
/// as JSON. A single `result` wrapper is unwrapped, and a payload carrying an
/// `error` string is treated as a failed call.
fn decode_tool_result(tool: &str, mut result: Value) -> Result<Value, EngramError> {
    let text_of = |result: &Value| -> String {
        result
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
    };

    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        return Err(EngramError::unavailable(
            MCP_BACKEND,
            format!("tool {tool} failed: {}", text_of(&result)),
        ));
    }

    let mut payload = match result.get_mut("structuredContent").map(Value::take) {
        Some(structured) if !structured.is_null() => structured,
        _ => {
            let text = text_of(&result);
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        }
    };

    if let Some(obj) = payload.as_object_mut() {
        if obj.len() == 1 && obj.contains_key("result") {
            payload = obj.remove("result").unwrap_or(Value::Null);
        }
    }
    if let Some(error) = payload.get("error").and_then(Value::as_str) {
        return Err(EngramError::unavailable(
            MCP_BACKEND,
            format!("tool {tool} failed: {error}"),
        ));
    }
    Ok(payload)
}

/// Pulls `key` out of a tool payload, accepting a bare array as well.
fn list_field<T: for<'de> Deserialize<'de>>(mut payload: Value, key: &str) -> Result<Vec<T>, EngramError> {
    let items = if payload.is_array() {
        payload
    } else {
        payload.get_mut(key).map(Value::take).unwrap_or(Value::Null)
    };
    if items.is_null() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_value(items)?)
}

#[async_trait]
impl GraphClient for McpGraphClient {
    async fn add_episode(&self, episode: EpisodeInput) -> Result<(), EngramError> {
        self.call_tool(
            "add_memory",
            json!({
                "name": episode.name,
                "episode_body": episode.body,
                "group_id": episode.group_id,
                "source": episode.source,
                "source_description": episode.source_description,
            }),
        )
        .await?;
        Ok(())
    }

    async fn search_facts(
        &self,
        query: &str,
        group_id: &str,
        max_facts: usize,
    ) -> Result<Vec<GraphFact>, EngramError> {
        let payload = self
            .call_tool(
                "search_memory_facts",
                json!({ "query": query, "group_ids": [group_id], "max_facts": max_facts }),
            )
            .await?;
        list_field(payload, "facts")
    }

    async fn search_nodes(
        &self,
        query: &str,
        group_id: &str,
        max_nodes: usize,
    ) -> Result<Vec<GraphNode>, EngramError> {
        let payload = self
            .call_tool(
                "search_nodes",
                json!({ "query": query, "group_ids": [group_id], "max_nodes": max_nodes }),
            )
            .await?;
        list_field(payload, "nodes")
    }

    async fn get_episodes(
        &self,
        group_id: &str,
        max_episodes: usize,
    ) -> Result<Vec<GraphEpisode>, EngramError> {
        let payload = self
            .call_tool(
                "get_episodes",
                json!({ "group_ids": [group_id], "max_episodes": max_episodes }),
            )
            .await?;
        list_field(payload, "episodes")
    }

    async fn delete_episode(&self, uuid: &str) -> Result<(), EngramError> {
        self.call_tool("delete_episode", json!({ "uuid": uuid }))
            .await?;
        Ok(())
    }

    async fn clear_graph(&self, group_id: &str) -> Result<(), EngramError> {
        self.call_tool("clear_graph", json!({ "group_ids": [group_id] }))
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), EngramError> {
        self.request("ping", json!({})).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_prefers_structured_content() {
        let result = json!({
            "content": [{"type": "text", "text": "ignored"}],
            "structuredContent": {"result": {"facts": []}},
        });
        let payload = decode_tool_result("search_memory_facts", result).unwrap();
        assert_eq!(payload, json!({"facts": []}));
    }

    #[test]
    fn decode_parses_text_content() {
        let result = json!({
            "content": [{"type": "text", "text": "{\"nodes\": [{\"uuid\": \"n1\", \"name\": \"Rex\"}]}"}],
        });
        let payload = decode_tool_result("search_nodes", result).unwrap();
        let nodes: Vec<GraphNode> = list_field(payload, "nodes").unwrap();
        assert_eq!(nodes[0].name, "Rex");
        assert_eq!(nodes[0].summary, None);
    }

    #[test]
    fn decode_surfaces_tool_errors() {
        let flagged = json!({"isError": true, "content": [{"type": "text", "text": "boom"}]});
        assert!(decode_tool_result("clear_graph", flagged).is_err());

        let error_payload = json!({"structuredContent": {"error": "no such group"}});
        assert!(decode_tool_result("clear_graph", error_payload).is_err());
    }

    #[test]
    fn decode_keeps_plain_text_messages() {
        let result = json!({"content": [{"type": "text", "text": "Episode queued"}]});
        let payload = decode_tool_result("add_memory", result).unwrap();
        assert_eq!(payload, Value::String("Episode queued".into()));
    }

    #[test]
    fn list_field_accepts_bare_arrays_and_missing_keys() {
        let eps: Vec<GraphEpisode> =
            list_field(json!([{"uuid": "e1", "name": "turn:t1:1"}]), "episodes").unwrap();
        assert_eq!(eps.len(), 1);
        let none: Vec<GraphEpisode> = list_field(json!({"message": "empty"}), "episodes").unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn rpc_errors_become_unavailable() {
        let message = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32601, "message": "nope"}});
        let err = rpc_result(message, "tools/call").unwrap_err();
        assert!(matches!(err, EngramError::BackendUnavailable { .. }));
    }
}
