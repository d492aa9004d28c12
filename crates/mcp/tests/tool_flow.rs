#![forbid(unsafe_code)]

//! Whole-workflow test driven purely through the tool surface: lead
//! creates, worker claims and submits, lead reviews, delivery goes to the
//! acceptor, issue closes.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use wg_mcp::{McpServer, ServerConfig};
use wg_storage::CoordConfig;

fn temp_root(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("wg_mcp_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp root");
    dir
}

fn args(value: Value) -> Map<String, Value> {
    value.as_object().expect("args object").clone()
}

#[test]
fn lead_worker_acceptor_round_trip() {
    let root = temp_root("lead_worker_acceptor_round_trip");
    let server = Arc::new(McpServer::new(
        root,
        CoordConfig {
            default_timeout_sec: 5,
            ..CoordConfig::default()
        },
        ServerConfig::default(),
    ));

    // Lead sets up the issue and one task.
    let issue = server
        .dispatch(
            "createIssue",
            &args(json!({
                "subject": "ship the widget",
                "user_issue_doc": { "name": "user_issue_doc", "content": "Widget please." },
                "lead_issue_doc": { "name": "lead_issue_doc", "content": "Plan of record." }
            })),
        )
        .expect("createIssue");
    let issue_id = issue["id"].as_str().unwrap().to_string();

    server
        .dispatch(
            "createIssueTask",
            &args(json!({
                "issue_id": issue_id,
                "subject": "implement widget",
                "difficulty": "easy",
                "points": 1,
                "spec": {
                    "name": "spec",
                    "split_from": "plan",
                    "split_reason": "single unit",
                    "impact_scope": "widget module",
                    "goal": "widget works",
                    "rules": "house style",
                    "constraints": "no new deps",
                    "conventions": "match neighbors",
                    "acceptance": "tests pass"
                }
            })),
        )
        .expect("createIssueTask");

    // Worker registers and claims.
    let worker = server.dispatch("registerWorker", &Map::new()).expect("register");
    let worker_id = worker["id"].as_str().unwrap().to_string();
    server
        .dispatch(
            "claimIssueTask",
            &args(json!({ "issue_id": issue_id, "task_id": "task-1", "worker_id": worker_id })),
        )
        .expect("claim");

    // Worker locks the file it edits, then submits (blocking).
    let lease = server
        .dispatch(
            "lockFiles",
            &args(json!({
                "worker_id": worker_id,
                "issue_id": issue_id,
                "task_id": "task-1",
                "files": ["src/widget.rs"],
                "ttl_sec": 60
            })),
        )
        .expect("lockFiles");
    let lease_id = lease["lease_id"].as_str().unwrap().to_string();

    let submitter = {
        let server = Arc::clone(&server);
        let issue_id = issue_id.clone();
        let worker_id = worker_id.clone();
        std::thread::spawn(move || {
            server.dispatch(
                "submitIssueTask",
                &args(json!({
                    "issue_id": issue_id,
                    "task_id": "task-1",
                    "worker_id": worker_id,
                    "artifacts": {
                        "summary": "widget implemented",
                        "changed_files": ["src/widget.rs"],
                        "test_cases": ["cargo test -p widget"],
                        "test_result": "passed",
                        "test_output": "ok"
                    }
                })),
            )
        })
    };

    // Lead long-polls and receives exactly the submission signal.
    let signal = server
        .dispatch(
            "waitIssueTaskEvents",
            &args(json!({ "issue_id": issue_id, "session_id": "lead-1", "timeout_sec": 5 })),
        )
        .expect("waitIssueTaskEvents");
    let events = signal["events"].as_array().expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "submission_created");
    assert_eq!(events[0]["task_id"], "task-1");

    // Lead mints the next-step token (no more open tasks: end) and
    // approves.
    let token = server
        .dispatch(
            "getNextStepToken",
            &args(json!({
                "issue_id": issue_id,
                "task_id": "task-1",
                "worker_id": worker_id,
                "completion_score": 5
            })),
        )
        .expect("getNextStepToken");
    assert_eq!(token["next_step"]["type"], "end");

    let reviewed = server
        .dispatch(
            "reviewIssueTask",
            &args(json!({
                "issue_id": issue_id,
                "task_id": "task-1",
                "verdict": "approved",
                "completion_score": 5,
                "artifacts": {
                    "review_summary": "clean implementation",
                    "reviewed_refs": ["src/widget.rs"]
                },
                "feedback_details": [
                    { "dimension": "correctness", "severity": "info", "content": "ok" }
                ],
                "next_step_token": token["next_step_token"]
            })),
        )
        .expect("reviewIssueTask");
    assert_eq!(reviewed["status"], "done");

    let submitted = submitter.join().expect("join").expect("submit returns");
    assert_eq!(submitted["status"], "done");
    assert_eq!(submitted["verdict"], "approved");

    // Worker cleans up its lease.
    server
        .dispatch(
            "unlock",
            &args(json!({ "worker_id": worker_id, "lease_id": lease_id })),
        )
        .expect("unlock");

    // Lead packages the delivery; the acceptor claims and approves it.
    let deliverer = {
        let server = Arc::clone(&server);
        let issue_id = issue_id.clone();
        std::thread::spawn(move || {
            server.dispatch(
                "submitDelivery",
                &args(json!({
                    "issue_id": issue_id,
                    "summary": "widget delivered",
                    "artifacts": {
                        "test_result": "passed",
                        "test_cases": ["./run.sh"],
                        "changed_files": ["src/widget.rs"],
                        "reviewed_refs": ["src/widget.rs"],
                        "test_output": "ok"
                    },
                    "test_evidence": {
                        "script_path": "scripts/verify.sh",
                        "script_cmd": "bash scripts/verify.sh",
                        "script_passed": true,
                        "script_result": "ok",
                        "doc_path": "docs/verify.md",
                        "doc_commands": ["echo hi"],
                        "doc_results": [
                            { "command": "echo hi", "passed": true, "exit_code": 0, "output": "hi" }
                        ],
                        "doc_passed": true
                    }
                })),
            )
        })
    };

    let waited = server
        .dispatch("waitDeliveries", &args(json!({ "timeout_sec": 5 })))
        .expect("waitDeliveries");
    let deliveries = waited["deliveries"].as_array().expect("deliveries");
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0]["status"], "in_review");
    let delivery_id = deliveries[0]["id"].as_str().unwrap().to_string();

    let verdict = server
        .dispatch(
            "reviewDelivery",
            &args(json!({
                "delivery_id": delivery_id,
                "verdict": "approved",
                "verification": {
                    "script_passed": true,
                    "script_result": "ok",
                    "doc_passed": true,
                    "doc_results": [
                        { "command": "echo hi", "passed": true, "exit_code": 0, "output": "hi" }
                    ]
                }
            })),
        )
        .expect("reviewDelivery");
    assert_eq!(verdict["status"], "approved");

    let delivered = deliverer.join().expect("join").expect("submitDelivery returns");
    assert_eq!(delivered["reviewed"]["status"], "approved");

    let closed = server
        .dispatch("closeIssue", &args(json!({ "issue_id": issue_id, "summary": "shipped" })))
        .expect("closeIssue");
    assert_eq!(closed["status"], "done");

    // The acceptance bundle reflects the approved work.
    let bundle = server
        .dispatch(
            "getIssueAcceptanceBundle",
            &args(json!({ "issue_id": issue_id })),
        )
        .expect("bundle");
    assert_eq!(bundle["delivery_summary"]["task_done"], 1);
    assert_eq!(
        bundle["delivery_summary"]["changed_files"],
        json!(["src/widget.rs"])
    );
}

#[test]
fn worker_question_round_trip_through_tools() {
    let root = temp_root("worker_question_round_trip");
    let server = Arc::new(McpServer::new(
        root,
        CoordConfig {
            default_timeout_sec: 5,
            ..CoordConfig::default()
        },
        ServerConfig::default(),
    ));

    let issue = server
        .dispatch(
            "createIssue",
            &args(json!({
                "subject": "ambiguous work",
                "user_issue_doc": { "name": "u", "content": "U" },
                "lead_issue_doc": { "name": "l", "content": "L" }
            })),
        )
        .expect("createIssue");
    let issue_id = issue["id"].as_str().unwrap().to_string();
    server
        .dispatch(
            "createIssueTask",
            &args(json!({
                "issue_id": issue_id,
                "subject": "unclear task",
                "difficulty": "easy",
                "points": 1,
                "spec": {
                    "name": "spec", "split_from": "p", "split_reason": "s",
                    "impact_scope": "i", "goal": "g", "rules": "r",
                    "constraints": "c", "conventions": "k", "acceptance": "a"
                }
            })),
        )
        .expect("createIssueTask");

    let worker = server.dispatch("registerWorker", &Map::new()).expect("register");
    let worker_id = worker["id"].as_str().unwrap().to_string();
    server
        .dispatch(
            "claimIssueTask",
            &args(json!({ "issue_id": issue_id, "task_id": "task-1", "worker_id": worker_id })),
        )
        .expect("claim");

    let asker = {
        let server = Arc::clone(&server);
        let issue_id = issue_id.clone();
        let worker_id = worker_id.clone();
        std::thread::spawn(move || {
            server.dispatch(
                "askIssueTask",
                &args(json!({
                    "issue_id": issue_id,
                    "task_id": "task-1",
                    "worker_id": worker_id,
                    "kind": "question",
                    "content": "X or Y?",
                    "timeout_sec": 5
                })),
            )
        })
    };

    // While the question is open the task reads blocked.
    let blocked = loop {
        let task = server
            .dispatch(
                "getIssueTask",
                &args(json!({ "issue_id": issue_id, "task_id": "task-1" })),
            )
            .expect("getIssueTask");
        if task["status"] == "blocked" {
            break task;
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    };
    assert_eq!(blocked["status"], "blocked");

    server
        .dispatch(
            "replyIssueTaskMessage",
            &args(json!({ "issue_id": issue_id, "task_id": "task-1", "content": "X" })),
        )
        .expect("reply");

    let out = asker.join().expect("join").expect("ask returns");
    assert_eq!(out["reply"]["detail"], "X");

    let task = server
        .dispatch(
            "getIssueTask",
            &args(json!({ "issue_id": issue_id, "task_id": "task-1" })),
        )
        .expect("getIssueTask after reply");
    assert_eq!(task["status"], "in_progress");
}
