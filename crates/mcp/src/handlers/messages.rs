#![forbid(unsafe_code)]

use serde_json::Value;
use wg_core::model::MessageKind;
use wg_storage::{CoordError, Result};

use crate::server::McpServer;
use crate::support::{Args, add_now, int_arg, str_arg};

use super::next_actions;

fn parse_kind(raw: &str) -> Result<MessageKind> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(MessageKind::Question);
    }
    MessageKind::parse(raw)
        .ok_or_else(|| CoordError::InvalidArgument("kind must be question or blocker".to_string()))
}

fn require_worker_id(args: &Args) -> Result<String> {
    let wid = str_arg(args, "worker_id");
    let wid = wid.trim();
    if wid.is_empty() {
        return Err(CoordError::InvalidArgument("worker_id is required".to_string()));
    }
    Ok(wid.to_string())
}

/// Post a question/blocker and block until the lead replies.
pub(crate) fn ask_issue_task(server: &McpServer, args: &Args) -> Result<Value> {
    let worker_id = require_worker_id(args)?;
    let kind = parse_kind(&str_arg(args, "kind"))?;
    server.issues.ask_issue_task(
        &str_arg(args, "issue_id"),
        &str_arg(args, "task_id"),
        &worker_id,
        kind,
        &str_arg(args, "content"),
        &str_arg(args, "refs"),
        int_arg(args, "timeout_sec"),
    )
}

pub(crate) fn post_issue_task_message(server: &McpServer, args: &Args) -> Result<Value> {
    let worker_id = require_worker_id(args)?;
    let kind = parse_kind(&str_arg(args, "kind"))?;
    let ev = server.issues.post_task_message(
        &str_arg(args, "issue_id"),
        &str_arg(args, "task_id"),
        &worker_id,
        kind,
        &str_arg(args, "content"),
        &str_arg(args, "refs"),
    )?;
    Ok(serde_json::to_value(&ev)?)
}

pub(crate) fn reply_issue_task_message(server: &McpServer, args: &Args) -> Result<Value> {
    let ev = server.issues.reply_task_message(
        &str_arg(args, "issue_id"),
        &str_arg(args, "task_id"),
        &server.member_id(args),
        &str_arg(args, "message_id"),
        &str_arg(args, "content"),
        &str_arg(args, "refs"),
    )?;
    let mut value = add_now(serde_json::to_value(&ev)?);
    if let Some(obj) = value.as_object_mut() {
        obj.insert("next_actions".to_string(), next_actions("lead_after_reply"));
    }
    Ok(value)
}
