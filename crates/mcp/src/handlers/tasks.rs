#![forbid(unsafe_code)]

use serde_json::{Value, json};
use wg_core::model::{IssueTask, SubmissionArtifacts, TaskStatus, event};
use wg_core::{now_ms, now_rfc3339};
use wg_storage::{CoordError, CreateTaskParams, Result, ReviewTaskParams, TaskSpec};

use crate::server::McpServer;
use crate::support::{
    Args, add_lease_expires_at, add_now, feedback_details_arg, int_arg, obj_arg, paginate, str_arg,
    str_slice_arg,
};

use super::next_actions;

pub(crate) fn create_issue_task(server: &McpServer, args: &Args) -> Result<Value> {
    let spec = obj_arg(args, "spec");
    let task = server.issues.create_task(
        &server.member_id(args),
        CreateTaskParams {
            issue_id: str_arg(args, "issue_id"),
            subject: str_arg(args, "subject"),
            description: str_arg(args, "description"),
            difficulty: str_arg(args, "difficulty"),
            points: int_arg(args, "points"),
            suggested_files: str_slice_arg(args, "suggested_files"),
            labels: str_slice_arg(args, "labels"),
            doc_paths: str_slice_arg(args, "doc_paths"),
            context_task_ids: str_slice_arg(args, "context_task_ids"),
            spec: TaskSpec {
                name: str_arg(&spec, "name"),
                split_from: str_arg(&spec, "split_from"),
                split_reason: str_arg(&spec, "split_reason"),
                impact_scope: str_arg(&spec, "impact_scope"),
                context_task_ids: str_slice_arg(&spec, "context_task_ids"),
                goal: str_arg(&spec, "goal"),
                rules: str_arg(&spec, "rules"),
                constraints: str_arg(&spec, "constraints"),
                conventions: str_arg(&spec, "conventions"),
                acceptance: str_arg(&spec, "acceptance"),
            },
        },
    )?;
    Ok(add_lease_expires_at(add_now(serde_json::to_value(&task)?)))
}

pub(crate) fn get_issue_task(server: &McpServer, args: &Args) -> Result<Value> {
    let task = server
        .issues
        .get_task(&str_arg(args, "issue_id"), &str_arg(args, "task_id"))?;
    Ok(add_lease_expires_at(add_now(serde_json::to_value(&task)?)))
}

pub(crate) fn list_issue_tasks(server: &McpServer, args: &Args) -> Result<Value> {
    let mut tasks = server.issues.list_tasks(&str_arg(args, "issue_id"), None)?;
    filter_tasks(
        &mut tasks,
        &str_arg(args, "status"),
        &str_arg(args, "subject_contains"),
        &str_arg(args, "claimed_by"),
        &str_arg(args, "submitter"),
    )?;
    sort_tasks(&mut tasks, &str_arg(args, "sort_by"), &str_arg(args, "sort_order"));
    let tasks = paginate(tasks, int_arg(args, "offset"), int_arg(args, "limit"));
    Ok(Value::Array(tasks.iter().map(task_summary).collect()))
}

pub(crate) fn list_issue_opened_tasks(server: &McpServer, args: &Args) -> Result<Value> {
    let mut tasks = server
        .issues
        .list_tasks(&str_arg(args, "issue_id"), Some(TaskStatus::Open))?;
    sort_tasks(&mut tasks, "created_at", "desc");
    Ok(Value::Array(tasks.iter().map(task_summary).collect()))
}

pub(crate) fn wait_issue_tasks(server: &McpServer, args: &Args) -> Result<Value> {
    let status_arg = str_arg(args, "status");
    let status = if status_arg.trim().is_empty() {
        TaskStatus::Open
    } else {
        TaskStatus::parse(status_arg.trim()).ok_or_else(|| {
            CoordError::InvalidArgument(format!("invalid status: {status_arg}"))
        })?
    };
    let tasks = server.issues.wait_issue_tasks(
        &str_arg(args, "issue_id"),
        status,
        int_arg(args, "timeout_sec"),
        int_arg(args, "limit").max(0) as usize,
    )?;
    let out: Result<Vec<Value>> = tasks
        .iter()
        .map(|t| Ok(add_lease_expires_at(add_now(serde_json::to_value(t)?))))
        .collect();
    let actions_key = if tasks.is_empty() {
        "worker_after_wait_issue_tasks_empty"
    } else {
        "worker_after_wait_issue_tasks_has_tasks"
    };
    Ok(json!({
        "tasks": out?,
        "count": tasks.len(),
        "server_now_ms": now_ms(),
        "server_now": now_rfc3339(),
        "next_actions": next_actions(actions_key),
    }))
}

pub(crate) fn claim_issue_task(server: &McpServer, args: &Args) -> Result<Value> {
    let worker_id = require_worker_id(server, args)?;
    let task = server.issues.claim_task(
        &str_arg(args, "issue_id"),
        &str_arg(args, "task_id"),
        &worker_id,
        &str_arg(args, "next_step_token"),
    )?;
    let mut value = add_lease_expires_at(add_now(serde_json::to_value(&task)?));
    if let Some(obj) = value.as_object_mut() {
        obj.insert("next_actions".to_string(), next_actions("worker_after_claim"));
    }
    Ok(value)
}

pub(crate) fn extend_issue_task_lease(server: &McpServer, args: &Args) -> Result<Value> {
    let actor = if server.cfg.role.trim() == "worker" {
        let wid = str_arg(args, "worker_id");
        if wid.trim().is_empty() {
            return Err(CoordError::InvalidArgument("worker_id is required".to_string()));
        }
        wid.trim().to_string()
    } else {
        server.member_id(args)
    };
    let task = server.issues.extend_task_lease(
        &actor,
        &str_arg(args, "issue_id"),
        &str_arg(args, "task_id"),
        int_arg(args, "extend_sec"),
    )?;
    Ok(add_lease_expires_at(add_now(serde_json::to_value(&task)?)))
}

pub(crate) fn submit_issue_task(server: &McpServer, args: &Args) -> Result<Value> {
    let worker_id = require_worker_id(server, args)?;
    let art = obj_arg(args, "artifacts");
    let task = server.issues.submit_task(
        &str_arg(args, "issue_id"),
        &str_arg(args, "task_id"),
        &worker_id,
        SubmissionArtifacts {
            summary: str_arg(&art, "summary"),
            changed_files: str_slice_arg(&art, "changed_files"),
            diff: str_arg(&art, "diff"),
            links: str_slice_arg(&art, "links"),
            test_cases: str_slice_arg(&art, "test_cases"),
            test_result: str_arg(&art, "test_result"),
            test_output: str_arg(&art, "test_output"),
        },
    )?;
    let mut value = add_lease_expires_at(add_now(serde_json::to_value(&task)?));
    if let Some(obj) = value.as_object_mut() {
        obj.insert("next_actions".to_string(), next_actions("worker_after_submit"));
    }
    Ok(value)
}

pub(crate) fn review_issue_task(server: &McpServer, args: &Args) -> Result<Value> {
    let art = obj_arg(args, "artifacts");
    let verdict = str_arg(args, "verdict");
    let issue_id = str_arg(args, "issue_id");
    let task = server.issues.review_task(
        &server.member_id(args),
        ReviewTaskParams {
            issue_id: issue_id.clone(),
            task_id: str_arg(args, "task_id"),
            submission_id: str_arg(args, "submission_id"),
            verdict: verdict.clone(),
            feedback: str_arg(args, "feedback"),
            completion_score: int_arg(args, "completion_score"),
            review_summary: str_arg(&art, "review_summary"),
            reviewed_refs: str_slice_arg(&art, "reviewed_refs"),
            feedback_details: feedback_details_arg(args, "feedback_details"),
            next_step_token: str_arg(args, "next_step_token"),
        },
    )?;

    let mut actions_key = match verdict.as_str() {
        "approved" => "lead_after_review_approved",
        "rejected" => "lead_after_review_rejected",
        _ => "lead_after_review",
    };
    if verdict == "approved" {
        // With everything finished, steer the lead toward delivery.
        if let Ok(tasks) = server.issues.list_tasks(&issue_id, None) {
            let all_done = !tasks.is_empty()
                && tasks
                    .iter()
                    .all(|t| matches!(t.status, TaskStatus::Done | TaskStatus::Canceled));
            if all_done {
                actions_key = "lead_after_review_all_done";
            }
        }
    }
    let mut value = add_lease_expires_at(add_now(serde_json::to_value(&task)?));
    if let Some(obj) = value.as_object_mut() {
        obj.insert("next_actions".to_string(), next_actions(actions_key));
    }
    Ok(value)
}

pub(crate) fn reset_issue_task(server: &McpServer, args: &Args) -> Result<Value> {
    let task = server.issues.reset_task(
        &server.member_id(args),
        &str_arg(args, "issue_id"),
        &str_arg(args, "task_id"),
        &str_arg(args, "reason"),
    )?;
    Ok(add_lease_expires_at(add_now(serde_json::to_value(&task)?)))
}

pub(crate) fn get_next_step_token(server: &McpServer, args: &Args) -> Result<Value> {
    let outcome = server.issues.get_next_step_token(
        &str_arg(args, "issue_id"),
        &server.member_id(args),
        &str_arg(args, "task_id"),
        &str_arg(args, "worker_id"),
        int_arg(args, "completion_score"),
    )?;
    Ok(json!({
        "next_step_token": outcome.token,
        "next_step": outcome.next_step,
        "difficulty": outcome.difficulty,
        "worker_total_points": outcome.worker_total_points,
        "consecutive_low_scores": outcome.consecutive_low_scores,
    }))
}

/// Lead long-poll: at most one signal per call, delivered through the
/// inbox for single-consumer semantics. `next_seq` stays -1 in inbox mode.
pub(crate) fn wait_issue_task_events(server: &McpServer, args: &Args) -> Result<Value> {
    let session_actor = str_arg(args, "session_id");
    let events = server.issues.wait_issue_task_events(
        &str_arg(args, "issue_id"),
        session_actor.trim(),
        int_arg(args, "timeout_sec"),
    )?;

    let actions_key = match events.first() {
        None => "lead_after_wait_empty",
        Some(ev) => match ev.get("type").and_then(|v| v.as_str()).unwrap_or("") {
            t if t == event::ISSUE_TASK_MESSAGE => "lead_after_wait_message",
            t if t == event::SUBMISSION_CREATED => "lead_after_wait_submission",
            _ => "lead_after_wait_other",
        },
    };
    Ok(json!({
        "events": events,
        "next_seq": -1,
        "next_actions": next_actions(actions_key),
    }))
}

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

fn task_summary(t: &IssueTask) -> Value {
    add_lease_expires_at(json!({
        "id": t.id,
        "issue_id": t.issue_id,
        "subject": t.subject,
        "difficulty": t.difficulty,
        "points": t.points,
        "status": t.status,
        "reserved_token": t.reserved_token,
        "reserved_until_ms": t.reserved_until_ms,
        "lease_expires_at_ms": t.lease_expires_at_ms,
        "claimed_by": t.claimed_by,
        "created_at": t.created_at,
        "updated_at": t.updated_at,
    }))
}

fn filter_tasks(
    tasks: &mut Vec<IssueTask>,
    status: &str,
    subject_contains: &str,
    claimed_by: &str,
    submitter: &str,
) -> Result<()> {
    let status = status.trim().to_lowercase();
    if !status.is_empty() && status != "all" {
        let want = TaskStatus::parse(&status)
            .ok_or_else(|| CoordError::InvalidArgument(format!("invalid status: {status}")))?;
        tasks.retain(|t| t.status == want);
    }
    let needle = subject_contains.trim().to_lowercase();
    if !needle.is_empty() {
        tasks.retain(|t| t.subject.to_lowercase().contains(&needle));
    }
    let claimed_by = claimed_by.trim();
    if !claimed_by.is_empty() {
        tasks.retain(|t| t.claimed_by == claimed_by);
    }
    let submitter = submitter.trim();
    if !submitter.is_empty() {
        tasks.retain(|t| t.submitter == submitter);
    }
    Ok(())
}

fn sort_tasks(tasks: &mut [IssueTask], sort_by: &str, sort_order: &str) {
    let sort_by = sort_by.trim().to_lowercase();
    let asc = sort_order.trim().eq_ignore_ascii_case("asc");
    tasks.sort_by(|a, b| {
        let ord = match sort_by.as_str() {
            "updated_at" => a.updated_at.cmp(&b.updated_at),
            "points" => a.points.cmp(&b.points),
            _ => a.created_at.cmp(&b.created_at),
        };
        if asc { ord } else { ord.reverse() }
    });
}
