#![forbid(unsafe_code)]

mod support;

use wg_core::model::{IssueStatus, SubmissionStatus, TaskStatus};
use wg_storage::CoordError;

use support::*;

#[test]
fn claim_and_submit_happy_path() {
    let root = temp_root("claim_and_submit_happy_path");
    let svc = issue_service(&root);

    let issue_id = create_issue(&svc, "build the widget");
    let task_id = create_task(&svc, &issue_id, "T1", "easy", 1);
    assert_eq!(task_id, "task-1");

    let task = svc
        .claim_task(&issue_id, &task_id, "w1", "")
        .expect("claim task");
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.claimed_by, "w1");
    assert!(task.lease_expires_at_ms > 0);

    // Submit blocks until review, so it runs on its own thread.
    let submitter = {
        let svc = svc.clone();
        let issue_id = issue_id.clone();
        let task_id = task_id.clone();
        std::thread::spawn(move || svc.submit_task(&issue_id, &task_id, "w1", sample_artifacts()))
    };

    let submission_id = wait_for_submission(&svc, &issue_id, &task_id);

    // Minting the token for the finished task ends the run: there is no
    // other open task to reserve.
    let outcome = svc
        .get_next_step_token(&issue_id, "lead", &task_id, "w1", 5)
        .expect("next step token");
    assert_eq!(outcome.next_step, wg_core::model::NextStep::End);

    let reviewed = svc
        .review_task("lead", sample_review(&issue_id, &task_id, &outcome.token))
        .expect("review task");
    assert_eq!(reviewed.status, TaskStatus::Done);
    assert_eq!(reviewed.submitter, "w1");
    assert_eq!(
        reviewed.submission_artifacts.changed_files,
        vec!["src/lib.rs".to_string()]
    );

    let task = submitter
        .join()
        .expect("join submitter")
        .expect("submit returns reviewed task");
    assert_eq!(task.status, TaskStatus::Done);

    let sub = svc
        .get_submission(&issue_id, &submission_id)
        .expect("submission");
    assert_eq!(sub.status, SubmissionStatus::Approved);
    assert_eq!(sub.reviewed_by, "lead");
}

#[test]
fn rejected_submission_leaves_task_in_progress() {
    let root = temp_root("rejected_submission_leaves_task_in_progress");
    let svc = issue_service(&root);

    let issue_id = create_issue(&svc, "rework expected");
    let task_id = create_task(&svc, &issue_id, "T1", "easy", 1);
    svc.claim_task(&issue_id, &task_id, "w1", "").expect("claim");

    let submitter = {
        let svc = svc.clone();
        let issue_id = issue_id.clone();
        let task_id = task_id.clone();
        std::thread::spawn(move || svc.submit_task(&issue_id, &task_id, "w1", sample_artifacts()))
    };
    wait_for_submission(&svc, &issue_id, &task_id);

    let outcome = svc
        .get_next_step_token(&issue_id, "lead", &task_id, "w1", 1)
        .expect("token");
    let mut review = sample_review(&issue_id, &task_id, &outcome.token);
    review.verdict = "rejected".to_string();
    review.completion_score = 1;
    let reviewed = svc.review_task("lead", review).expect("review");
    assert_eq!(reviewed.status, TaskStatus::InProgress);

    let task = submitter.join().expect("join").expect("submit returns");
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.verdict, "rejected");
}

#[test]
fn submit_requires_the_claiming_worker() {
    let root = temp_root("submit_requires_the_claiming_worker");
    let svc = issue_service(&root);

    let issue_id = create_issue(&svc, "ownership check");
    let task_id = create_task(&svc, &issue_id, "T1", "easy", 1);
    svc.claim_task(&issue_id, &task_id, "w1", "").expect("claim");

    let err = svc
        .submit_task(&issue_id, &task_id, "w2", sample_artifacts())
        .expect_err("foreign submit must fail");
    match err {
        CoordError::Precondition(msg) => {
            assert!(msg.contains("not claimed by actor"), "{msg}");
        }
        other => panic!("expected precondition error, got {other:?}"),
    }
}

#[test]
fn close_issue_reports_unfinished_tasks() {
    let root = temp_root("close_issue_reports_unfinished_tasks");
    let svc = issue_service(&root);

    let issue_id = create_issue(&svc, "not done yet");
    create_task(&svc, &issue_id, "T1", "easy", 1);
    let t2 = create_task(&svc, &issue_id, "T2", "easy", 1);
    svc.claim_task(&issue_id, &t2, "w1", "").expect("claim");

    let err = svc.close_issue("lead", &issue_id, "done").expect_err("close must fail");
    match err {
        CoordError::Precondition(msg) => {
            assert!(msg.contains("cannot close issue: tasks not done:"), "{msg}");
            assert!(msg.contains("task-1:open"), "{msg}");
            assert!(msg.contains("task-2:in_progress"), "{msg}");
        }
        other => panic!("expected precondition error, got {other:?}"),
    }
}

#[test]
fn reopen_requires_terminal_status() {
    let root = temp_root("reopen_requires_terminal_status");
    let svc = issue_service(&root);

    let issue_id = create_issue(&svc, "reopen me");
    assert!(svc.reopen_issue("lead", &issue_id, "").is_err());

    let closed = svc.close_issue("lead", &issue_id, "all done").expect("close");
    assert_eq!(closed.status, IssueStatus::Done);

    let reopened = svc.reopen_issue("lead", &issue_id, "missed a case").expect("reopen");
    assert_eq!(reopened.status, IssueStatus::Open);
    assert!(reopened.lease_expires_at_ms > 0);
}

#[test]
fn create_issue_round_trips_subject_and_docs() {
    let root = temp_root("create_issue_round_trips_subject_and_docs");
    let svc = issue_service(&root);

    let issue_id = create_issue(&svc, "round trip");
    let issue = svc.get_issue(&issue_id).expect("get issue");
    assert_eq!(issue.subject, "round trip");
    let names: Vec<&str> = issue.docs.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["user_issue_doc", "lead_issue_doc"]);
    for doc in &issue.docs {
        assert!(std::path::Path::new(&doc.path).exists(), "{}", doc.path);
    }
}

#[test]
fn task_requires_complete_spec_fields() {
    let root = temp_root("task_requires_complete_spec_fields");
    let svc = issue_service(&root);
    let issue_id = create_issue(&svc, "spec gate");

    let mut params = wg_storage::CreateTaskParams {
        issue_id: issue_id.clone(),
        subject: "incomplete".to_string(),
        difficulty: "easy".to_string(),
        points: 1,
        spec: wg_storage::TaskSpec {
            name: "spec".to_string(),
            split_from: "x".to_string(),
            split_reason: "y".to_string(),
            impact_scope: "z".to_string(),
            goal: "g".to_string(),
            rules: "r".to_string(),
            constraints: "c".to_string(),
            conventions: "k".to_string(),
            acceptance: "  ".to_string(),
            ..wg_storage::TaskSpec::default()
        },
        ..wg_storage::CreateTaskParams::default()
    };
    let err = svc.create_task("lead", params.clone()).expect_err("blank acceptance");
    assert!(err.to_string().contains("spec_acceptance is required"));

    params.spec.acceptance = "a".to_string();
    params.difficulty = "extreme".to_string();
    let err = svc.create_task("lead", params).expect_err("bad difficulty");
    assert!(err.to_string().contains("invalid difficulty"));
}

#[test]
fn task_numbering_is_gapless_per_issue() {
    let root = temp_root("task_numbering_is_gapless_per_issue");
    let svc = issue_service(&root);
    let issue_id = create_issue(&svc, "numbering");
    for n in 1..=4 {
        let id = create_task(&svc, &issue_id, &format!("T{n}"), "easy", 1);
        assert_eq!(id, format!("task-{n}"));
    }
    let other = create_issue(&svc, "second issue");
    assert_eq!(create_task(&svc, &other, "T1", "easy", 1), "task-1");
}

#[test]
fn max_task_count_is_enforced() {
    let root = temp_root("max_task_count_is_enforced");
    let mut cfg = test_config();
    cfg.max_task_count = 1;
    let svc = issue_service_with(&root, cfg);

    let issue_id = create_issue(&svc, "capped");
    create_task(&svc, &issue_id, "T1", "easy", 1);
    let err = svc
        .create_task(
            "lead",
            wg_storage::CreateTaskParams {
                issue_id: issue_id.clone(),
                subject: "T2".to_string(),
                difficulty: "easy".to_string(),
                points: 1,
                spec: wg_storage::TaskSpec {
                    name: "spec".to_string(),
                    split_from: "x".to_string(),
                    split_reason: "y".to_string(),
                    impact_scope: "z".to_string(),
                    goal: "g".to_string(),
                    rules: "r".to_string(),
                    constraints: "c".to_string(),
                    conventions: "k".to_string(),
                    acceptance: "a".to_string(),
                    ..wg_storage::TaskSpec::default()
                },
                ..wg_storage::CreateTaskParams::default()
            },
        )
        .expect_err("limit");
    match err {
        CoordError::LimitExceeded(msg) => assert!(msg.contains("max_task_count"), "{msg}"),
        other => panic!("expected limit error, got {other:?}"),
    }
}
