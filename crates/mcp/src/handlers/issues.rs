#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use serde_json::{Value, json};
use wg_core::model::{Issue, IssueStatus, TaskStatus};
use wg_core::{now_ms, now_rfc3339};
use wg_storage::{CoordError, CreateIssueParams, Result};

use crate::server::McpServer;
use crate::support::{
    Args, add_lease_expires_at, add_now, int_arg, opt_str_slice_arg, paginate, str_arg,
    str_slice_arg,
};

pub(crate) fn create_issue(server: &McpServer, args: &Args) -> Result<Value> {
    let (user_name, user_content) = crate::support::doc_arg(args, "user_issue_doc");
    let (lead_name, lead_content) = crate::support::doc_arg(args, "lead_issue_doc");
    let other_docs = crate::support::map_slice_arg(args, "user_other_docs")
        .iter()
        .map(|d| (str_arg(d, "name"), str_arg(d, "content")))
        .collect();

    let issue = server.issues.create_issue(
        &server.member_id(args),
        CreateIssueParams {
            subject: str_arg(args, "subject"),
            description: str_arg(args, "description"),
            shared_doc_paths: str_slice_arg(args, "shared_doc_paths"),
            project_doc_paths: str_slice_arg(args, "project_doc_paths"),
            user_doc_name: user_name,
            user_doc_content: user_content,
            lead_doc_name: lead_name,
            lead_doc_content: lead_content,
            other_docs,
        },
    )?;
    Ok(add_lease_expires_at(add_now(serde_json::to_value(&issue)?)))
}

pub(crate) fn get_issue(server: &McpServer, args: &Args) -> Result<Value> {
    let issue = server.issues.get_issue(&str_arg(args, "issue_id"))?;
    Ok(add_lease_expires_at(add_now(serde_json::to_value(&issue)?)))
}

pub(crate) fn list_issues(server: &McpServer, args: &Args) -> Result<Value> {
    let mut issues = server.issues.list_issues()?;
    filter_issues(
        &mut issues,
        &str_arg(args, "status"),
        &str_arg(args, "subject_contains"),
    )?;
    sort_issues(&mut issues, &str_arg(args, "sort_by"), &str_arg(args, "sort_order"));
    let issues = paginate(issues, int_arg(args, "offset"), int_arg(args, "limit"));
    Ok(Value::Array(
        issues.iter().map(issue_summary).collect::<Vec<_>>(),
    ))
}

pub(crate) fn list_opened_issues(server: &McpServer, _args: &Args) -> Result<Value> {
    let mut issues = server.issues.list_issues()?;
    issues.retain(|it| it.status == IssueStatus::Open);
    sort_issues(&mut issues, "created_at", "desc");
    Ok(Value::Array(
        issues.iter().map(issue_summary).collect::<Vec<_>>(),
    ))
}

pub(crate) fn wait_issues(server: &McpServer, args: &Args) -> Result<Value> {
    let status_arg = str_arg(args, "status");
    let status = if status_arg.trim().is_empty() {
        IssueStatus::Open
    } else {
        IssueStatus::parse(status_arg.trim()).ok_or_else(|| {
            CoordError::InvalidArgument(format!("invalid status: {status_arg}"))
        })?
    };
    let issues = server.issues.wait_issues(
        status,
        int_arg(args, "timeout_sec"),
        int_arg(args, "limit").max(0) as usize,
    )?;
    let out: Result<Vec<Value>> = issues
        .iter()
        .map(|it| Ok(add_lease_expires_at(add_now(serde_json::to_value(it)?))))
        .collect();
    Ok(json!({
        "issues": out?,
        "count": issues.len(),
        "server_now_ms": now_ms(),
        "server_now": now_rfc3339(),
    }))
}

pub(crate) fn update_issue_doc_paths(server: &McpServer, args: &Args) -> Result<Value> {
    let issue = server.issues.update_issue_doc_paths(
        &server.member_id(args),
        &str_arg(args, "issue_id"),
        opt_str_slice_arg(args, "shared_doc_paths"),
        opt_str_slice_arg(args, "project_doc_paths"),
    )?;
    Ok(add_lease_expires_at(add_now(serde_json::to_value(&issue)?)))
}

pub(crate) fn extend_issue_lease(server: &McpServer, args: &Args) -> Result<Value> {
    let issue = server.issues.extend_issue_lease(
        &server.member_id(args),
        &str_arg(args, "issue_id"),
        int_arg(args, "extend_sec"),
    )?;
    Ok(add_lease_expires_at(add_now(serde_json::to_value(&issue)?)))
}

pub(crate) fn close_issue(server: &McpServer, args: &Args) -> Result<Value> {
    let issue = server.issues.close_issue(
        &server.member_id(args),
        &str_arg(args, "issue_id"),
        &str_arg(args, "summary"),
    )?;
    Ok(add_lease_expires_at(add_now(serde_json::to_value(&issue)?)))
}

pub(crate) fn reopen_issue(server: &McpServer, args: &Args) -> Result<Value> {
    let issue = server.issues.reopen_issue(
        &server.member_id(args),
        &str_arg(args, "issue_id"),
        &str_arg(args, "summary"),
    )?;
    Ok(add_lease_expires_at(add_now(serde_json::to_value(&issue)?)))
}

/// Issue + aggregated task summaries for the acceptor: unions of changed
/// files, reviewed refs, test cases and links across approved work.
pub(crate) fn get_issue_acceptance_bundle(server: &McpServer, args: &Args) -> Result<Value> {
    let issue_id = str_arg(args, "issue_id");
    let issue = server.issues.get_issue(&issue_id)?;
    let tasks = server.issues.list_tasks(&issue_id, None)?;

    let mut changed_files: BTreeSet<String> = BTreeSet::new();
    let mut reviewed_refs: BTreeSet<String> = BTreeSet::new();
    let mut test_cases: BTreeSet<String> = BTreeSet::new();
    let mut links: BTreeSet<String> = BTreeSet::new();
    let mut submitters: BTreeSet<String> = BTreeSet::new();
    let mut not_done: Vec<String> = Vec::new();
    let mut done_count = 0;
    let mut task_summaries: Vec<Value> = Vec::new();

    for t in &tasks {
        if t.status == TaskStatus::Done {
            done_count += 1;
        } else {
            not_done.push(format!("{}:{}", t.id, t.status.as_str()));
        }
        if !t.submitter.trim().is_empty() {
            submitters.insert(t.submitter.trim().to_string());
        }
        for f in &t.submission_artifacts.changed_files {
            if !f.trim().is_empty() {
                changed_files.insert(f.trim().to_string());
            }
        }
        for r in &t.review_artifacts.reviewed_refs {
            if !r.trim().is_empty() {
                reviewed_refs.insert(r.trim().to_string());
            }
        }
        for c in &t.submission_artifacts.test_cases {
            if !c.trim().is_empty() {
                test_cases.insert(c.trim().to_string());
            }
        }
        for l in &t.submission_artifacts.links {
            if !l.trim().is_empty() {
                links.insert(l.trim().to_string());
            }
        }
        task_summaries.push(json!({
            "task_id": t.id,
            "subject": t.subject,
            "status": t.status,
            "claimed_by": t.claimed_by,
            "submitter": t.submitter,
            "summary": t.submission_artifacts.summary,
            "test_result": t.submission_artifacts.test_result,
            "verdict": t.verdict,
            "completion_score": t.completion_score,
            "review_summary": t.review_artifacts.review_summary,
            "updated_at": t.updated_at,
        }));
    }
    not_done.sort();
    task_summaries.sort_by(|a, b| {
        let a = a.get("task_id").and_then(|v| v.as_str()).unwrap_or("");
        let b = b.get("task_id").and_then(|v| v.as_str()).unwrap_or("");
        a.cmp(b)
    });

    let issue_value = add_lease_expires_at(add_now(serde_json::to_value(&issue)?));
    Ok(json!({
        "issue": issue_value,
        "delivery_summary": {
            "task_total": tasks.len(),
            "task_done": done_count,
            "task_not_done": not_done,
            "submitters": submitters,
            "changed_files": changed_files,
            "reviewed_refs": reviewed_refs,
            "test_cases": test_cases,
            "links": links,
            "task_summaries": task_summaries,
            "server_now_ms": now_ms(),
            "server_now": now_rfc3339(),
        }
    }))
}

fn issue_summary(it: &Issue) -> Value {
    add_lease_expires_at(json!({
        "id": it.id,
        "subject": it.subject,
        "status": it.status,
        "lease_expires_at_ms": it.lease_expires_at_ms,
        "created_at": it.created_at,
        "updated_at": it.updated_at,
    }))
}

fn filter_issues(issues: &mut Vec<Issue>, status: &str, subject_contains: &str) -> Result<()> {
    let status = status.trim().to_lowercase();
    if !status.is_empty() && status != "all" {
        let want = IssueStatus::parse(&status)
            .ok_or_else(|| CoordError::InvalidArgument(format!("invalid status: {status}")))?;
        issues.retain(|it| it.status == want);
    }
    let needle = subject_contains.trim().to_lowercase();
    if !needle.is_empty() {
        issues.retain(|it| it.subject.to_lowercase().contains(&needle));
    }
    Ok(())
}

/// RFC3339 strings compare correctly lexicographically.
fn sort_issues(issues: &mut [Issue], sort_by: &str, sort_order: &str) {
    let by_updated = sort_by.trim().eq_ignore_ascii_case("updated_at");
    let asc = sort_order.trim().eq_ignore_ascii_case("asc");
    issues.sort_by(|a, b| {
        let (ka, kb) = if by_updated {
            (&a.updated_at, &b.updated_at)
        } else {
            (&a.created_at, &b.created_at)
        };
        if asc { ka.cmp(kb) } else { kb.cmp(ka) }
    });
}
