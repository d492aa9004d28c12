#![forbid(unsafe_code)]

use serde_json::Value;
use wg_storage::Result;

use crate::server::McpServer;
use crate::support::{Args, str_arg};

pub(crate) fn write_shared_doc(server: &McpServer, args: &Args) -> Result<Value> {
    let name = server
        .docs
        .write_shared_doc(&str_arg(args, "name"), &str_arg(args, "content"))?;
    Ok(Value::String(name))
}

pub(crate) fn read_shared_doc(server: &McpServer, args: &Args) -> Result<Value> {
    Ok(Value::String(server.docs.read_shared_doc(&str_arg(args, "name"))?))
}

pub(crate) fn list_shared_docs(server: &McpServer, _args: &Args) -> Result<Value> {
    Ok(serde_json::to_value(server.docs.list_shared_docs()?)?)
}

pub(crate) fn write_issue_doc(server: &McpServer, args: &Args) -> Result<Value> {
    let name = server.docs.write_issue_doc(
        &str_arg(args, "issue_id"),
        &str_arg(args, "name"),
        &str_arg(args, "content"),
    )?;
    Ok(Value::String(name))
}

pub(crate) fn read_issue_doc(server: &McpServer, args: &Args) -> Result<Value> {
    Ok(Value::String(server.docs.read_issue_doc(
        &str_arg(args, "issue_id"),
        &str_arg(args, "name"),
    )?))
}

pub(crate) fn list_issue_docs(server: &McpServer, args: &Args) -> Result<Value> {
    Ok(serde_json::to_value(
        server.docs.list_issue_docs(&str_arg(args, "issue_id"))?,
    )?)
}

pub(crate) fn write_task_doc(server: &McpServer, args: &Args) -> Result<Value> {
    let name = server.docs.write_task_doc(
        &str_arg(args, "issue_id"),
        &str_arg(args, "task_id"),
        &str_arg(args, "name"),
        &str_arg(args, "content"),
    )?;
    Ok(Value::String(name))
}

pub(crate) fn read_task_doc(server: &McpServer, args: &Args) -> Result<Value> {
    Ok(Value::String(server.docs.read_task_doc(
        &str_arg(args, "issue_id"),
        &str_arg(args, "task_id"),
        &str_arg(args, "name"),
    )?))
}

pub(crate) fn list_task_docs(server: &McpServer, args: &Args) -> Result<Value> {
    Ok(serde_json::to_value(server.docs.list_task_docs(
        &str_arg(args, "issue_id"),
        &str_arg(args, "task_id"),
    )?)?)
}
