#![forbid(unsafe_code)]
// Each test binary uses its own slice of these helpers.
#![allow(dead_code)]

//! Shared scaffolding for the integration tests: a unique temp root per
//! test and service constructors with short timeouts so blocking calls
//! resolve in test time.

use std::path::PathBuf;

use wg_storage::{
    CoordConfig, CreateIssueParams, CreateTaskParams, FileStore, IssueService, LockService,
    TaskSpec, TraceService, WorkerService,
};

pub fn temp_root(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("wg_storage_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp root");
    dir
}

pub fn test_config() -> CoordConfig {
    CoordConfig {
        issue_ttl_sec: 3600,
        task_ttl_sec: 600,
        // Short so blocking waits time out quickly when a test wants that.
        default_timeout_sec: 5,
        max_task_count: 0,
        suggested_min_task_count: 0,
    }
}

pub fn issue_service(root: &PathBuf) -> IssueService {
    IssueService::new(FileStore::new(root.clone()), test_config())
}

pub fn issue_service_with(root: &PathBuf, cfg: CoordConfig) -> IssueService {
    IssueService::new(FileStore::new(root.clone()), cfg)
}

pub fn lock_service(root: &PathBuf) -> LockService {
    let store = FileStore::new(root.clone());
    LockService::new(store.clone(), TraceService::new(store))
}

pub fn worker_service(root: &PathBuf) -> WorkerService {
    let store = FileStore::new(root.clone());
    WorkerService::new(store.clone(), TraceService::new(store))
}

pub fn create_issue(svc: &IssueService, subject: &str) -> String {
    let issue = svc
        .create_issue(
            "lead",
            CreateIssueParams {
                subject: subject.to_string(),
                user_doc_name: "user_issue_doc".to_string(),
                user_doc_content: "What the user wants.".to_string(),
                lead_doc_name: "lead_issue_doc".to_string(),
                lead_doc_content: "How the lead plans to do it.".to_string(),
                ..CreateIssueParams::default()
            },
        )
        .expect("create issue");
    issue.id
}

pub fn create_task(svc: &IssueService, issue_id: &str, subject: &str, difficulty: &str, points: i64) -> String {
    let task = svc
        .create_task(
            "lead",
            CreateTaskParams {
                issue_id: issue_id.to_string(),
                subject: subject.to_string(),
                difficulty: difficulty.to_string(),
                points,
                spec: TaskSpec {
                    name: "spec".to_string(),
                    split_from: "root plan".to_string(),
                    split_reason: "independent unit".to_string(),
                    impact_scope: "one module".to_string(),
                    goal: "make it work".to_string(),
                    rules: "follow the house style".to_string(),
                    constraints: "no new deps".to_string(),
                    conventions: "match neighbors".to_string(),
                    acceptance: "tests pass".to_string(),
                    ..TaskSpec::default()
                },
                ..CreateTaskParams::default()
            },
        )
        .expect("create task");
    task.id
}

pub fn sample_artifacts() -> wg_core::model::SubmissionArtifacts {
    wg_core::model::SubmissionArtifacts {
        summary: "implemented the thing".to_string(),
        changed_files: vec!["src/lib.rs".to_string()],
        test_cases: vec!["cargo test".to_string()],
        test_result: "passed".to_string(),
        test_output: "ok".to_string(),
        ..wg_core::model::SubmissionArtifacts::default()
    }
}

pub fn sample_review(issue_id: &str, task_id: &str, token: &str) -> wg_storage::ReviewTaskParams {
    wg_storage::ReviewTaskParams {
        issue_id: issue_id.to_string(),
        task_id: task_id.to_string(),
        verdict: "approved".to_string(),
        completion_score: 5,
        review_summary: "looks right".to_string(),
        reviewed_refs: vec!["src/lib.rs".to_string()],
        feedback_details: vec![wg_core::model::FeedbackDetail {
            dimension: "correctness".to_string(),
            severity: "info".to_string(),
            content: "ok".to_string(),
            ..wg_core::model::FeedbackDetail::default()
        }],
        next_step_token: token.to_string(),
        ..wg_storage::ReviewTaskParams::default()
    }
}

/// Wait for the single open submission of a task to show up (the submit
/// side runs on another thread).
pub fn wait_for_submission(svc: &IssueService, issue_id: &str, task_id: &str) -> String {
    for _ in 0..100 {
        if let Ok(subs) = svc.list_submissions(issue_id, task_id) {
            if let Some(sub) = subs.first() {
                return sub.id.clone();
            }
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    }
    panic!("submission never appeared for {task_id}");
}
