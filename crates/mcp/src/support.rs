#![forbid(unsafe_code)]

//! Argument extraction from untyped tool-call maps, plus response
//! envelope helpers (`server_now`, `lease_expires_at`).

use serde_json::{Map, Value, json};
use wg_core::model::{CommandResult, FeedbackDetail};
use wg_core::{ms_to_rfc3339, now_ms, now_rfc3339};

pub type Args = Map<String, Value>;

pub fn str_arg(args: &Args, key: &str) -> String {
    match args.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

pub fn int_arg(args: &Args, key: &str) -> i64 {
    match args.get(key) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or_else(|| n.as_f64().unwrap_or(0.0) as i64),
        _ => 0,
    }
}

pub fn bool_arg(args: &Args, key: &str) -> bool {
    matches!(args.get(key), Some(Value::Bool(true)))
}

pub fn str_slice_arg(args: &Args, key: &str) -> Vec<String> {
    let Some(Value::Array(items)) = args.get(key) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.to_string()))
        .collect()
}

/// Present-vs-absent distinction for patch-style args.
pub fn opt_str_slice_arg(args: &Args, key: &str) -> Option<Vec<String>> {
    args.get(key)?;
    Some(str_slice_arg(args, key))
}

pub fn obj_arg(args: &Args, key: &str) -> Args {
    match args.get(key) {
        Some(Value::Object(m)) => m.clone(),
        _ => Map::new(),
    }
}

pub fn map_slice_arg(args: &Args, key: &str) -> Vec<Args> {
    let Some(Value::Array(items)) = args.get(key) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|v| v.as_object().cloned())
        .collect()
}

/// `{name, content}` doc object.
pub fn doc_arg(args: &Args, key: &str) -> (String, String) {
    let obj = obj_arg(args, key);
    (str_arg(&obj, "name"), str_arg(&obj, "content"))
}

pub fn command_results_arg(args: &Args, key: &str) -> Vec<CommandResult> {
    map_slice_arg(args, key)
        .iter()
        .map(|m| CommandResult {
            command: str_arg(m, "command"),
            passed: bool_arg(m, "passed"),
            exit_code: int_arg(m, "exit_code"),
            output: str_arg(m, "output"),
        })
        .collect()
}

pub fn feedback_details_arg(args: &Args, key: &str) -> Vec<FeedbackDetail> {
    map_slice_arg(args, key)
        .iter()
        .map(|m| FeedbackDetail {
            dimension: str_arg(m, "dimension"),
            severity: str_arg(m, "severity"),
            file_path: str_arg(m, "file_path"),
            line_range: str_arg(m, "line_range"),
            content: str_arg(m, "content"),
            suggestion: str_arg(m, "suggestion"),
        })
        .collect()
}

/// Stamp `server_now_ms` / `server_now` onto an object value.
pub fn add_now(mut value: Value) -> Value {
    if let Some(obj) = value.as_object_mut() {
        obj.insert("server_now_ms".to_string(), json!(now_ms()));
        obj.insert("server_now".to_string(), json!(now_rfc3339()));
    }
    value
}

/// Wherever `lease_expires_at_ms` appears, add the RFC3339 rendering next
/// to it (empty string for a disabled lease).
pub fn add_lease_expires_at(mut value: Value) -> Value {
    if let Some(obj) = value.as_object_mut() {
        if let Some(ms) = obj.get("lease_expires_at_ms").and_then(|v| v.as_i64()) {
            let rendered = if ms > 0 {
                ms_to_rfc3339(ms)
            } else {
                String::new()
            };
            obj.insert("lease_expires_at".to_string(), json!(rendered));
        }
    }
    value
}

/// Offset/limit pagination with the shared defaults (limit 50, cap 200).
pub fn paginate<T>(items: Vec<T>, offset: i64, limit: i64) -> Vec<T> {
    let offset = offset.max(0) as usize;
    let mut limit = if limit <= 0 { 50 } else { limit as usize };
    if limit > 200 {
        limit = 200;
    }
    items.into_iter().skip(offset).take(limit).collect()
}
