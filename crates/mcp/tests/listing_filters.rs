#![forbid(unsafe_code)]

//! Listing/pagination shaping and the lock-tool gating that rides on top
//! of the services.

use std::path::PathBuf;

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

fn test_server(role: &str) -> McpServer {
    McpServer::new(
        temp_root(&format!("filters_{role}")),
        CoordConfig {
            default_timeout_sec: 5,
            ..CoordConfig::default()
        },
        ServerConfig {
            role: role.to_string(),
            ..ServerConfig::default()
        },
    )
}

fn args(value: Value) -> Map<String, Value> {
    value.as_object().expect("args object").clone()
}

fn seed_issue_with_tasks(server: &McpServer, subject: &str, task_count: usize) -> String {
    let issue = server
        .dispatch(
            "createIssue",
            &args(json!({
                "subject": subject,
                "user_issue_doc": { "name": "u", "content": "U" },
                "lead_issue_doc": { "name": "l", "content": "L" }
            })),
        )
        .expect("createIssue");
    let issue_id = issue["id"].as_str().unwrap().to_string();
    for n in 0..task_count {
        server
            .dispatch(
                "createIssueTask",
                &args(json!({
                    "issue_id": issue_id,
                    "subject": format!("{subject} task {n}"),
                    "difficulty": "easy",
                    "points": n as i64,
                    "spec": {
                        "name": "spec", "split_from": "p", "split_reason": "s",
                        "impact_scope": "i", "goal": "g", "rules": "r",
                        "constraints": "c", "conventions": "k", "acceptance": "a"
                    }
                })),
            )
            .expect("createIssueTask");
    }
    issue_id
}

#[test]
fn task_listing_paginates_and_sorts_by_points() {
    let server = test_server("");
    let issue_id = seed_issue_with_tasks(&server, "alpha", 5);

    let listed = server
        .dispatch(
            "listIssueTasks",
            &args(json!({
                "issue_id": issue_id,
                "sort_by": "points",
                "sort_order": "desc"
            })),
        )
        .expect("list");
    let tasks = listed.as_array().expect("array");
    assert_eq!(tasks.len(), 5);
    let points: Vec<i64> = tasks.iter().map(|t| t["points"].as_i64().unwrap()).collect();
    assert_eq!(points, vec![4, 3, 2, 1, 0]);

    let page = server
        .dispatch(
            "listIssueTasks",
            &args(json!({
                "issue_id": issue_id,
                "sort_by": "points",
                "sort_order": "asc",
                "offset": 3,
                "limit": 2
            })),
        )
        .expect("page");
    let tasks = page.as_array().expect("array");
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0]["points"], 3);
    assert_eq!(tasks[1]["points"], 4);
}

#[test]
fn task_listing_filters_by_status_and_claimer() {
    let server = test_server("");
    let issue_id = seed_issue_with_tasks(&server, "beta", 3);

    let worker = server.dispatch("registerWorker", &Map::new()).expect("register");
    let worker_id = worker["id"].as_str().unwrap().to_string();
    server
        .dispatch(
            "claimIssueTask",
            &args(json!({ "issue_id": issue_id, "task_id": "task-2", "worker_id": worker_id })),
        )
        .expect("claim");

    let open = server
        .dispatch(
            "listIssueTasks",
            &args(json!({ "issue_id": issue_id, "status": "open" })),
        )
        .expect("open");
    assert_eq!(open.as_array().unwrap().len(), 2);

    let mine = server
        .dispatch(
            "listIssueTasks",
            &args(json!({ "issue_id": issue_id, "claimed_by": worker_id })),
        )
        .expect("mine");
    let mine = mine.as_array().unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0]["id"], "task-2");

    let err = server
        .dispatch(
            "listIssueTasks",
            &args(json!({ "issue_id": issue_id, "status": "weird" })),
        )
        .expect_err("invalid status filter");
    assert!(err.to_string().contains("invalid status"));
}

#[test]
fn issue_listing_filters_by_subject_substring() {
    let server = test_server("");
    seed_issue_with_tasks(&server, "payments rework", 0);
    seed_issue_with_tasks(&server, "search rework", 0);
    seed_issue_with_tasks(&server, "unrelated", 0);

    let reworks = server
        .dispatch(
            "listIssues",
            &args(json!({ "subject_contains": "REWORK", "sort_order": "asc" })),
        )
        .expect("filtered");
    let reworks = reworks.as_array().unwrap();
    assert_eq!(reworks.len(), 2);
    for it in reworks {
        assert!(it["subject"].as_str().unwrap().contains("rework"));
        // Summaries carry the rendered lease alongside the raw ms value.
        assert!(it["lease_expires_at"].as_str().is_some());
    }
}

#[test]
fn lock_tools_enforce_task_claims_and_worker_scope() {
    let server = test_server("");
    let issue_id = seed_issue_with_tasks(&server, "locks", 1);

    let worker = server.dispatch("registerWorker", &Map::new()).expect("register");
    let worker_id = worker["id"].as_str().unwrap().to_string();

    // Locking on behalf of a task requires actually holding the claim.
    let err = server
        .dispatch(
            "lockFiles",
            &args(json!({
                "worker_id": worker_id,
                "issue_id": issue_id,
                "task_id": "task-1",
                "files": ["src/a.rs"]
            })),
        )
        .expect_err("unclaimed task");
    assert!(err.to_string().contains("not claimed by worker_id"), "{err}");

    server
        .dispatch(
            "claimIssueTask",
            &args(json!({ "issue_id": issue_id, "task_id": "task-1", "worker_id": worker_id })),
        )
        .expect("claim");
    let lease = server
        .dispatch(
            "lockFiles",
            &args(json!({
                "worker_id": worker_id,
                "issue_id": issue_id,
                "task_id": "task-1",
                "files": ["src/a.rs"]
            })),
        )
        .expect("lock after claim");
    let lease_id = lease["lease_id"].as_str().unwrap().to_string();

    // Another registered worker cannot heartbeat or unlock it.
    let other = server.dispatch("registerWorker", &Map::new()).expect("register other");
    let other_id = other["id"].as_str().unwrap().to_string();
    let err = server
        .dispatch(
            "heartbeat",
            &args(json!({ "worker_id": other_id, "lease_id": lease_id })),
        )
        .expect_err("foreign heartbeat");
    assert!(err.to_string().contains("not owned by worker_id"));
    let err = server
        .dispatch(
            "unlock",
            &args(json!({ "worker_id": other_id, "lease_id": lease_id })),
        )
        .expect_err("foreign unlock");
    assert!(err.to_string().contains("not owned by worker_id"));

    // The owner's heartbeat and unlock go through.
    server
        .dispatch(
            "heartbeat",
            &args(json!({ "worker_id": worker_id, "lease_id": lease_id })),
        )
        .expect("owner heartbeat");
    server
        .dispatch(
            "unlock",
            &args(json!({ "worker_id": worker_id, "lease_id": lease_id })),
        )
        .expect("owner unlock");
}

#[test]
fn worker_role_list_locks_defaults_to_self() {
    let server = test_server("worker");
    let worker = server.dispatch("registerWorker", &Map::new()).expect("register");
    let worker_id = worker["id"].as_str().unwrap().to_string();

    server
        .dispatch(
            "lockFiles",
            &args(json!({ "worker_id": worker_id, "files": ["mine.rs"] })),
        )
        .expect("lock");

    // Missing worker_id is rejected for the worker role.
    let err = server.dispatch("listLocks", &Map::new()).expect_err("no worker_id");
    assert!(err.to_string().contains("worker_id is required"));

    let listed = server
        .dispatch("listLocks", &args(json!({ "worker_id": worker_id })))
        .expect("list");
    let leases = listed.as_array().unwrap();
    assert_eq!(leases.len(), 1);
    assert_eq!(leases[0]["owner"], worker_id.as_str());
}
