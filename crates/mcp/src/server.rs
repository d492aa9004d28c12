#![forbid(unsafe_code)]

//! JSON-RPC request handling and the tools/call envelope.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};
use wg_storage::{CoordConfig, DocsService, FileStore, IssueService, LockService, TraceService, WorkerService};

use crate::handlers;
use crate::roles;
use crate::support::str_arg;

pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "waggle-mcp";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default, rename = "jsonrpc")]
    pub _jsonrpc: Option<String>,
    pub method: String,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub params: Option<Value>,
}

pub fn json_rpc_response(id: Option<Value>, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

pub fn json_rpc_error(id: Option<Value>, code: i64, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub role: String,
    pub role_code: String,
    pub suggested_min_task_count: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            role: String::new(),
            role_code: String::new(),
            suggested_min_task_count: 0,
        }
    }
}

/// One server process: the four services over a shared root, plus the
/// session-id → member-id mapping used to attribute lead actions.
pub struct McpServer {
    pub(crate) cfg: ServerConfig,
    pub(crate) issues: IssueService,
    pub(crate) locks: LockService,
    pub(crate) workers: WorkerService,
    pub(crate) docs: DocsService,
    sessions: Mutex<HashMap<String, String>>,
}

impl McpServer {
    pub fn new(root: impl Into<std::path::PathBuf>, coord: CoordConfig, cfg: ServerConfig) -> Self {
        let store = FileStore::new(root);
        let trace = TraceService::new(store.clone());
        Self {
            cfg,
            issues: IssueService::new(store.clone(), coord),
            locks: LockService::new(store.clone(), trace.clone()),
            workers: WorkerService::new(store.clone(), trace),
            docs: DocsService::new(store),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Stable member id for a caller: per-session when a `session_id`
    /// rides along, otherwise a fixed per-role anonymous identity.
    pub(crate) fn member_id(&self, args: &Map<String, Value>) -> String {
        let session_id = {
            let sid = str_arg(args, "session_id");
            if sid.trim().is_empty() {
                str_arg(args, "semantic_session_id")
            } else {
                sid
            }
        };
        let session_id = session_id.trim().to_string();
        if session_id.is_empty() {
            return format!("anon:{}", self.cfg.role.trim());
        }
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        sessions
            .entry(session_id)
            .or_insert_with(|| wg_core::gen_id("m"))
            .clone()
    }

    /// Handle one request; `None` means no response (notification).
    pub fn handle(&self, req: JsonRpcRequest) -> Option<Value> {
        let id = req.id.clone()?;
        let id = Some(id);

        match req.method.as_str() {
            "initialize" => Some(json_rpc_response(
                id,
                json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {
                        "resources": {},
                        "prompts": {},
                        "tools": {}
                    },
                    "serverInfo": { "name": SERVER_NAME, "version": SERVER_VERSION }
                }),
            )),
            "ping" => Some(json_rpc_response(id, json!({}))),
            "prompts/list" => Some(json_rpc_response(id, json!({ "prompts": [] }))),
            "resources/list" => Some(json_rpc_response(id, json!({ "resources": [] }))),
            "tools/list" => Some(json_rpc_response(id, self.tools_list(req.params))),
            "tools/call" => Some(self.tools_call(id, req.params)),
            other => Some(json_rpc_error(
                id,
                -32601,
                &format!("method not found: {other}"),
            )),
        }
    }

    fn tools_list(&self, params: Option<Value>) -> Value {
        let mut tools = handlers::definitions::tool_definitions(&self.cfg.role);

        let disabled: Vec<String> = params
            .as_ref()
            .and_then(|p| p.get("disabledTools"))
            .and_then(|v| v.as_array())
            .map(|xs| {
                xs.iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        if !disabled.is_empty() {
            tools.retain(|t| {
                let name = t.get("name").and_then(|v| v.as_str()).unwrap_or("");
                !disabled.iter().any(|d| d == name)
            });
        }

        if !self.cfg.role_code.is_empty() {
            roles::inject_role_code_into_tools(&mut tools);
        }
        json!({ "tools": tools })
    }

    fn tools_call(&self, id: Option<Value>, params: Option<Value>) -> Value {
        let Some(params) = params.as_ref().and_then(|p| p.as_object()) else {
            return json_rpc_error(id, -32602, "params must be an object");
        };
        let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
        let args = params
            .get("arguments")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        if !self.cfg.role_code.is_empty() {
            let provided = str_arg(&args, "role_code");
            let provided = provided.trim();
            if provided.is_empty() {
                return json_rpc_error(
                    id,
                    -32602,
                    &format!("missing role_code for role '{}'", self.cfg.role.trim()),
                );
            }
            if provided != self.cfg.role_code {
                return json_rpc_error(
                    id,
                    -32602,
                    &format!("invalid role_code for role '{}'", self.cfg.role.trim()),
                );
            }
        }

        match self.dispatch(name, &args) {
            Ok(result) => {
                let text = serde_json::to_string_pretty(&result)
                    .unwrap_or_else(|_| "{}".to_string());
                json_rpc_response(
                    id,
                    json!({ "content": [{ "type": "text", "text": text }] }),
                )
            }
            Err(err) => {
                warn!(tool = name, error = %err, "tool call failed");
                json_rpc_response(
                    id,
                    json!({
                        "content": [{ "type": "text", "text": format!("ERROR: {err}") }],
                        "isError": true
                    }),
                )
            }
        }
    }

    /// Allowlist gate then per-tool handler. Exposed for integration
    /// tests that drive tools without the stdio loop.
    pub fn dispatch(
        &self,
        tool: &str,
        args: &Map<String, Value>,
    ) -> wg_storage::Result<Value> {
        if tool.is_empty() {
            return Err(wg_storage::CoordError::InvalidArgument(
                "tool name is required".to_string(),
            ));
        }
        if !roles::tool_allowed_for_role(&self.cfg.role, tool) {
            return Err(wg_storage::CoordError::InvalidArgument(format!(
                "tool '{tool}' is not allowed for role '{}'",
                self.cfg.role.trim()
            )));
        }
        debug!(tool, "dispatch");
        handlers::dispatch(self, tool, args)
    }
}
