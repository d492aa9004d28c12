#![forbid(unsafe_code)]

//! Tool handlers, one module per tool family. `dispatch` is the single
//! routing point; the server has already applied role gating.

pub mod definitions;
mod deliveries;
mod docs;
mod issues;
mod locks;
mod messages;
mod tasks;
mod workers;

use serde_json::{Value, json};
use wg_core::{now_ms, now_rfc3339};
use wg_storage::{CoordError, Result};

use crate::server::McpServer;
use crate::support::Args;

pub(crate) fn dispatch(server: &McpServer, tool: &str, args: &Args) -> Result<Value> {
    match tool {
        // Introspection
        "myProfile" => Ok(json!({
            "member_id": server.member_id(args),
            "role": server.cfg.role,
            "suggested_min_task_count": server.cfg.suggested_min_task_count,
        })),
        "swarmNow" => Ok(json!({ "now_ms": now_ms(), "now": now_rfc3339() })),

        // Issue pool
        "createIssue" => issues::create_issue(server, args),
        "getIssue" => issues::get_issue(server, args),
        "listIssues" => issues::list_issues(server, args),
        "listOpenedIssues" => issues::list_opened_issues(server, args),
        "waitIssues" => issues::wait_issues(server, args),
        "updateIssueDocPaths" => issues::update_issue_doc_paths(server, args),
        "extendIssueLease" => issues::extend_issue_lease(server, args),
        "closeIssue" => issues::close_issue(server, args),
        "reopenIssue" => issues::reopen_issue(server, args),
        "getIssueAcceptanceBundle" => issues::get_issue_acceptance_bundle(server, args),

        // Tasks
        "createIssueTask" => tasks::create_issue_task(server, args),
        "getIssueTask" => tasks::get_issue_task(server, args),
        "listIssueTasks" => tasks::list_issue_tasks(server, args),
        "listIssueOpenedTasks" => tasks::list_issue_opened_tasks(server, args),
        "waitIssueTasks" => tasks::wait_issue_tasks(server, args),
        "claimIssueTask" => tasks::claim_issue_task(server, args),
        "extendIssueTaskLease" => tasks::extend_issue_task_lease(server, args),
        "submitIssueTask" => tasks::submit_issue_task(server, args),
        "reviewIssueTask" => tasks::review_issue_task(server, args),
        "resetIssueTask" => tasks::reset_issue_task(server, args),
        "getNextStepToken" => tasks::get_next_step_token(server, args),
        "waitIssueTaskEvents" => tasks::wait_issue_task_events(server, args),

        // Messaging
        "askIssueTask" => messages::ask_issue_task(server, args),
        "postIssueTaskMessage" => messages::post_issue_task_message(server, args),
        "replyIssueTaskMessage" => messages::reply_issue_task_message(server, args),

        // Deliveries
        "submitDelivery" => deliveries::submit_delivery(server, args),
        "getDelivery" => deliveries::get_delivery(server, args),
        "listDeliveries" => deliveries::list_deliveries(server, args),
        "listOpenedDeliveries" => deliveries::list_opened_deliveries(server, args),
        "waitDeliveries" => deliveries::wait_deliveries(server, args),
        "claimDelivery" => deliveries::claim_delivery(server, args),
        "extendDeliveryLease" => deliveries::extend_delivery_lease(server, args),
        "reviewDelivery" => deliveries::review_delivery(server, args),

        // Workers
        "registerWorker" => workers::register_worker(server, args),
        "listWorkers" => workers::list_workers(server, args),
        "getWorker" => workers::get_worker(server, args),

        // Docs
        "writeSharedDoc" => docs::write_shared_doc(server, args),
        "readSharedDoc" => docs::read_shared_doc(server, args),
        "listSharedDocs" => docs::list_shared_docs(server, args),
        "writeIssueDoc" => docs::write_issue_doc(server, args),
        "readIssueDoc" => docs::read_issue_doc(server, args),
        "listIssueDocs" => docs::list_issue_docs(server, args),
        "writeTaskDoc" => docs::write_task_doc(server, args),
        "readTaskDoc" => docs::read_task_doc(server, args),
        "listTaskDocs" => docs::list_task_docs(server, args),

        // Locks
        "lockFiles" => locks::lock_files(server, args),
        "heartbeat" => locks::heartbeat(server, args),
        "unlock" => locks::unlock(server, args),
        "listLocks" => locks::list_locks(server, args),
        "forceUnlock" => locks::force_unlock(server, args),

        other => Err(CoordError::NotFound(format!("unknown tool: {other}"))),
    }
}

/// Guidance strings appended to responses so an agent always knows its
/// next move without re-reading the playbook.
pub(crate) fn next_actions(key: &str) -> Value {
    let lines: &[&str] = match key {
        "worker_after_claim" => {
            &["Next: implement the task, run tests, then submitIssueTask."]
        }
        "worker_after_submit" => &[
            "Next: interpret the lead review result included in this response.",
            "If approved: follow the lead's next-step instructions (if any) or finish/stand by for further work.",
            "If rejected: follow feedback, adjust code/tests, and submitIssueTask again.",
            "If you need clarification: askIssueTask.",
        ],
        "worker_after_wait_issue_tasks_empty" => {
            &["Next: keep waiting for available tasks (waitIssueTasks)."]
        }
        "worker_after_wait_issue_tasks_has_tasks" => {
            &["Next: claim an open task (claimIssueTask)."]
        }
        "lead_after_review_approved" | "lead_after_review" => {
            &["Next: wait for the next worker signal (waitIssueTaskEvents)."]
        }
        "lead_after_review_rejected" => {
            &["Next: wait for worker follow-up (question or resubmission)."]
        }
        "lead_after_review_all_done" => &[
            "Next: run the issue's full test suite end to end and capture the evidence.",
            "Then: submitDelivery; if rejected, fix and resubmit.",
            "When approved: closeIssue.",
        ],
        "lead_after_reply" => {
            &["Next: wait for the next worker signal (waitIssueTaskEvents)."]
        }
        "lead_after_wait_empty" => {
            &["Next: keep waiting for the next worker signal (waitIssueTaskEvents)."]
        }
        "lead_after_wait_message" => {
            &["Next: replyIssueTaskMessage, then wait for the next signal."]
        }
        "lead_after_wait_submission" => {
            &["Next: reviewIssueTask, then wait for the next signal."]
        }
        "lead_after_wait_other" => {
            &["Next: handle this signal, then wait for the next signal."]
        }
        "acceptor_after_wait_empty" => &["Next: keep waiting for new deliveries."],
        "acceptor_after_wait_has_delivery" => {
            &["Next: review the claimed delivery (reviewDelivery)."]
        }
        "acceptor_after_review" => &["Next: wait for the next delivery (waitDeliveries)."],
        _ => &[],
    };
    json!(lines)
}
