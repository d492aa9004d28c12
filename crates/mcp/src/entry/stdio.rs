#![forbid(unsafe_code)]

//! Newline-delimited JSON-RPC loop on stdio.
//!
//! Requests are handled concurrently, one thread each: several tools are
//! long-polls (waitIssueTaskEvents, submitIssueTask, waitDeliveries) and
//! must not stall unrelated calls on the same transport. Responses carry
//! request ids, so out-of-order writes are fine; a mutex around stdout
//! keeps individual response lines intact.

use std::io::{BufRead, BufReader, Write};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::warn;

use crate::server::{JsonRpcRequest, McpServer, json_rpc_error};

pub fn run_stdio(server: Arc<McpServer>) -> std::io::Result<()> {
    let stdin = std::io::stdin();
    let reader = BufReader::new(stdin.lock());
    let stdout = Arc::new(Mutex::new(std::io::stdout()));

    for line in reader.lines() {
        let line = line?;
        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }

        let parsed: Result<Value, _> = serde_json::from_str(raw);
        let data = match parsed {
            Ok(v) => v,
            Err(err) => {
                write_response(&stdout, &json_rpc_error(None, -32700, &format!("parse error: {err}")));
                continue;
            }
        };

        let (id, has_method) = match data.as_object() {
            Some(obj) => (obj.get("id").cloned(), obj.contains_key("method")),
            None => {
                write_response(&stdout, &json_rpc_error(None, -32600, "invalid request"));
                continue;
            }
        };
        if !has_method {
            write_response(&stdout, &json_rpc_error(id, -32600, "invalid request"));
            continue;
        }

        let request: JsonRpcRequest = match serde_json::from_value(data) {
            Ok(v) => v,
            Err(err) => {
                write_response(
                    &stdout,
                    &json_rpc_error(id, -32600, &format!("invalid request: {err}")),
                );
                continue;
            }
        };

        let server = Arc::clone(&server);
        let stdout = Arc::clone(&stdout);
        std::thread::spawn(move || {
            if let Some(resp) = server.handle(request) {
                write_response(&stdout, &resp);
            }
        });
    }

    Ok(())
}

fn write_response(stdout: &Arc<Mutex<std::io::Stdout>>, resp: &Value) {
    let Ok(mut out) = stdout.lock() else {
        return;
    };
    let line = serde_json::to_string(resp).unwrap_or_else(|_| "{}".to_string());
    if writeln!(out, "{line}").and_then(|_| out.flush()).is_err() {
        warn!("failed to write response to stdout");
    }
}
