#![forbid(unsafe_code)]

use serde_json::Value;
use wg_storage::Result;

use crate::server::McpServer;
use crate::support::{Args, str_arg};

pub(crate) fn register_worker(server: &McpServer, args: &Args) -> Result<Value> {
    let worker = server.workers.register(&str_arg(args, "worker_id"))?;
    Ok(serde_json::to_value(&worker)?)
}

pub(crate) fn list_workers(server: &McpServer, _args: &Args) -> Result<Value> {
    let workers = server.workers.list()?;
    Ok(serde_json::to_value(&workers)?)
}

pub(crate) fn get_worker(server: &McpServer, args: &Args) -> Result<Value> {
    let worker = server.workers.get(&str_arg(args, "worker_id"))?;
    Ok(serde_json::to_value(&worker)?)
}
