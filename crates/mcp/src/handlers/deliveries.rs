#![forbid(unsafe_code)]

use serde_json::{Value, json};
use wg_core::model::{DeliveryArtifacts, TestEvidence, Verification};
use wg_core::{now_ms, now_rfc3339};
use wg_storage::{DeliveryFilter, Result};

use crate::server::McpServer;
use crate::support::{
    Args, add_now, bool_arg, command_results_arg, int_arg, obj_arg, paginate, str_arg,
    str_slice_arg,
};

use super::next_actions;

fn artifacts_arg(args: &Args) -> DeliveryArtifacts {
    let art = obj_arg(args, "artifacts");
    DeliveryArtifacts {
        test_result: str_arg(&art, "test_result"),
        test_cases: str_slice_arg(&art, "test_cases"),
        changed_files: str_slice_arg(&art, "changed_files"),
        reviewed_refs: str_slice_arg(&art, "reviewed_refs"),
        test_output: str_arg(&art, "test_output"),
        known_risks: str_arg(&art, "known_risks"),
    }
}

fn test_evidence_arg(args: &Args) -> TestEvidence {
    let e = obj_arg(args, "test_evidence");
    TestEvidence {
        script_path: str_arg(&e, "script_path"),
        script_cmd: str_arg(&e, "script_cmd"),
        script_passed: bool_arg(&e, "script_passed"),
        script_result: str_arg(&e, "script_result"),
        doc_path: str_arg(&e, "doc_path"),
        doc_commands: str_slice_arg(&e, "doc_commands"),
        doc_results: command_results_arg(&e, "doc_results"),
        doc_passed: bool_arg(&e, "doc_passed"),
    }
}

/// Lead-side blocking call: package the issue, then wait for the
/// acceptor's verdict.
pub(crate) fn submit_delivery(server: &McpServer, args: &Args) -> Result<Value> {
    let out = server.issues.submit_delivery(
        &server.member_id(args),
        &str_arg(args, "issue_id"),
        &str_arg(args, "summary"),
        &str_arg(args, "refs"),
        artifacts_arg(args),
        test_evidence_arg(args),
        int_arg(args, "timeout_sec"),
    )?;
    Ok(add_now(out))
}

pub(crate) fn get_delivery(server: &McpServer, args: &Args) -> Result<Value> {
    let d = server.issues.get_delivery(&str_arg(args, "delivery_id"))?;
    Ok(add_now(serde_json::to_value(&d)?))
}

pub(crate) fn list_deliveries(server: &McpServer, args: &Args) -> Result<Value> {
    let ds = server.issues.list_deliveries(&DeliveryFilter {
        status: str_arg(args, "status"),
        issue_id: str_arg(args, "issue_id"),
        delivered_by: str_arg(args, "delivered_by"),
        reviewed_by: str_arg(args, "reviewed_by"),
    })?;
    let ds = paginate(ds, int_arg(args, "offset"), int_arg(args, "limit"));
    let out: Result<Vec<Value>> = ds
        .iter()
        .map(|d| Ok(add_now(serde_json::to_value(d)?)))
        .collect();
    Ok(Value::Array(out?))
}

pub(crate) fn list_opened_deliveries(server: &McpServer, _args: &Args) -> Result<Value> {
    let ds = server.issues.list_deliveries(&DeliveryFilter {
        status: "open".to_string(),
        ..DeliveryFilter::default()
    })?;
    let out: Result<Vec<Value>> = ds
        .iter()
        .map(|d| Ok(add_now(serde_json::to_value(d)?)))
        .collect();
    Ok(Value::Array(out?))
}

/// Acceptor long-poll. The returned delivery is already claimed into
/// `in_review` for this caller.
pub(crate) fn wait_deliveries(server: &McpServer, args: &Args) -> Result<Value> {
    let ds = server
        .issues
        .wait_deliveries("acceptor", int_arg(args, "timeout_sec"))?;
    let out: Result<Vec<Value>> = ds
        .iter()
        .map(|d| Ok(add_now(serde_json::to_value(d)?)))
        .collect();
    let actions_key = if ds.is_empty() {
        "acceptor_after_wait_empty"
    } else {
        "acceptor_after_wait_has_delivery"
    };
    Ok(json!({
        "deliveries": out?,
        "count": ds.len(),
        "server_now_ms": now_ms(),
        "server_now": now_rfc3339(),
        "next_actions": next_actions(actions_key),
    }))
}

pub(crate) fn claim_delivery(server: &McpServer, args: &Args) -> Result<Value> {
    let d = server.issues.claim_delivery(
        "acceptor",
        &str_arg(args, "delivery_id"),
        int_arg(args, "extend_sec"),
    )?;
    Ok(add_now(serde_json::to_value(&d)?))
}

pub(crate) fn extend_delivery_lease(server: &McpServer, args: &Args) -> Result<Value> {
    let d = server.issues.extend_delivery_lease(
        "acceptor",
        &str_arg(args, "delivery_id"),
        int_arg(args, "extend_sec"),
    )?;
    Ok(add_now(serde_json::to_value(&d)?))
}

pub(crate) fn review_delivery(server: &McpServer, args: &Args) -> Result<Value> {
    let v = obj_arg(args, "verification");
    let d = server.issues.review_delivery(
        "acceptor",
        &str_arg(args, "delivery_id"),
        &str_arg(args, "verdict"),
        &str_arg(args, "feedback"),
        &str_arg(args, "refs"),
        Verification {
            script_passed: bool_arg(&v, "script_passed"),
            script_result: str_arg(&v, "script_result"),
            doc_passed: bool_arg(&v, "doc_passed"),
            doc_results: command_results_arg(&v, "doc_results"),
        },
    )?;
    let mut value = add_now(serde_json::to_value(&d)?);
    if let Some(obj) = value.as_object_mut() {
        obj.insert("next_actions".to_string(), next_actions("acceptor_after_review"));
    }
    Ok(value)
}
