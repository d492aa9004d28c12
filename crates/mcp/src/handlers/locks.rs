#![forbid(unsafe_code)]

use serde_json::Value;
use wg_storage::{CoordError, Result};

use crate::server::McpServer;
use crate::support::{Args, int_arg, str_arg, str_slice_arg};

fn require_worker_id(server: &McpServer, args: &Args) -> Result<String> {
    let wid = str_arg(args, "worker_id");
    let wid = wid.trim();
    if wid.is_empty() {
        return Err(CoordError::InvalidArgument("worker_id is required".to_string()));
    }
    if !server.workers.exists(wid) {
        return Err(CoordError::NotFound(
            "unknown worker_id: please call registerWorker to obtain a new worker_id".to_string(),
        ));
    }
    Ok(wid.to_string())
}

/// When locking on behalf of a task, the task must actually be claimed by
/// this worker; file leases are an extension of a task claim.
pub(crate) fn lock_files(server: &McpServer, args: &Args) -> Result<Value> {
    let worker_id = require_worker_id(server, args)?;
    let issue_id = str_arg(args, "issue_id");
    let task_id = str_arg(args, "task_id");
    let task_id = task_id.trim();
    if !task_id.is_empty() {
        if issue_id.trim().is_empty() {
            return Err(CoordError::InvalidArgument(
                "issue_id is required when task_id is provided".to_string(),
            ));
        }
        let task = server.issues.get_task(issue_id.trim(), task_id)?;
        if task.claimed_by.trim() != worker_id {
            return Err(CoordError::Precondition(format!(
                "task '{task_id}' is not claimed by worker_id"
            )));
        }
    }
    let lease = server.locks.lock_files(
        task_id,
        &worker_id,
        &str_slice_arg(args, "files"),
        int_arg(args, "ttl_sec"),
        int_arg(args, "wait_sec"),
    )?;
    Ok(serde_json::to_value(&lease)?)
}

pub(crate) fn heartbeat(server: &McpServer, args: &Args) -> Result<Value> {
    let worker_id = require_worker_id(server, args)?;
    let lease_id = str_arg(args, "lease_id");
    let lease = server.locks.get_lease(lease_id.trim())?;
    if lease.owner.trim() != worker_id {
        return Err(CoordError::Precondition(format!(
            "lease '{}' is not owned by worker_id",
            lease_id.trim()
        )));
    }
    let lease = server
        .locks
        .heartbeat(lease_id.trim(), int_arg(args, "extend_sec"))?;
    Ok(serde_json::to_value(&lease)?)
}

pub(crate) fn unlock(server: &McpServer, args: &Args) -> Result<Value> {
    let worker_id = require_worker_id(server, args)?;
    let lease_id = str_arg(args, "lease_id");
    let lease = server.locks.get_lease(lease_id.trim())?;
    if lease.owner.trim() != worker_id {
        return Err(CoordError::Precondition(format!(
            "lease '{}' is not owned by worker_id",
            lease_id.trim()
        )));
    }
    server.locks.unlock(lease_id.trim())?;
    Ok(Value::Null)
}

pub(crate) fn list_locks(server: &McpServer, args: &Args) -> Result<Value> {
    let mut owner = str_arg(args, "owner").trim().to_string();
    if server.cfg.role.trim() == "worker" {
        let wid = str_arg(args, "worker_id");
        let wid = wid.trim();
        if wid.is_empty() {
            return Err(CoordError::InvalidArgument("worker_id is required".to_string()));
        }
        // Workers default to their own leases; global lock state stays
        // with the lead.
        if owner.is_empty() {
            owner = wid.to_string();
        }
    }
    let leases = server
        .locks
        .list_locks(&owner, &str_slice_arg(args, "files"))?;
    Ok(serde_json::to_value(&leases)?)
}

pub(crate) fn force_unlock(server: &McpServer, args: &Args) -> Result<Value> {
    server
        .locks
        .force_unlock(str_arg(args, "lease_id").trim(), &str_arg(args, "reason"))?;
    Ok(Value::Null)
}
