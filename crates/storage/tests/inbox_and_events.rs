#![forbid(unsafe_code)]

mod support;

use wg_core::model::{InboxItem, InboxStatus, TaskStatus};

use support::*;

#[test]
fn event_seq_is_gapless_and_strictly_increasing() {
    let root = temp_root("event_seq_is_gapless");
    let svc = issue_service(&root);

    let issue_id = create_issue(&svc, "sequencing");
    create_task(&svc, &issue_id, "T1", "easy", 1);
    let t2 = create_task(&svc, &issue_id, "T2", "easy", 1);
    svc.claim_task(&issue_id, &t2, "w1", "").expect("claim");

    let events = svc.read_all_events(&issue_id).expect("events");
    assert!(!events.is_empty());
    for (i, ev) in events.iter().enumerate() {
        assert_eq!(ev.seq, i as i64 + 1, "gap at index {i}");
    }
}

#[test]
fn wait_events_delivers_one_submission_signal() {
    let root = temp_root("wait_events_delivers_one_submission_signal");
    let svc = issue_service(&root);

    let issue_id = create_issue(&svc, "signal me");
    let task_id = create_task(&svc, &issue_id, "T1", "easy", 1);
    svc.claim_task(&issue_id, &task_id, "w1", "").expect("claim");

    let submitter = {
        let svc = svc.clone();
        let issue_id = issue_id.clone();
        let task_id = task_id.clone();
        std::thread::spawn(move || svc.submit_task(&issue_id, &task_id, "w1", sample_artifacts()))
    };
    let submission_id = wait_for_submission(&svc, &issue_id, &task_id);

    let events = svc
        .wait_issue_task_events(&issue_id, "lead", 5)
        .expect("wait events");
    assert_eq!(events.len(), 1);
    let ev = &events[0];
    assert_eq!(ev["type"], "submission_created");
    assert_eq!(ev["task_id"], task_id.as_str());
    assert_eq!(ev["submission_id"], submission_id.as_str());
    assert_eq!(ev["seq"], -1);
    assert!(ev["submission_artifacts"]["changed_files"].is_array());

    // A second consumer does not get the same signal: the item is held
    // in processing by the first claim.
    let empty = svc
        .wait_issue_task_events(&issue_id, "other-session", 5)
        .expect("second wait");
    assert!(empty.is_empty());

    // Unblock the submitter so the test tears down cleanly.
    let outcome = svc
        .get_next_step_token(&issue_id, "lead", &task_id, "w1", 5)
        .expect("token");
    svc.review_task("lead", sample_review(&issue_id, &task_id, &outcome.token))
        .expect("review");
    submitter.join().expect("join").expect("submit");
}

#[test]
fn stale_inbox_claims_are_redelivered() {
    let root = temp_root("stale_inbox_claims_are_redelivered");
    let svc = issue_service(&root);

    let issue_id = create_issue(&svc, "redelivery");
    let task_id = create_task(&svc, &issue_id, "T1", "easy", 1);
    svc.claim_task(&issue_id, &task_id, "w1", "").expect("claim");

    let submitter = {
        let svc = svc.clone();
        let issue_id = issue_id.clone();
        let task_id = task_id.clone();
        std::thread::spawn(move || svc.submit_task(&issue_id, &task_id, "w1", sample_artifacts()))
    };
    wait_for_submission(&svc, &issue_id, &task_id);

    let first = svc
        .wait_issue_task_events(&issue_id, "lead-1", 5)
        .expect("first claim");
    assert_eq!(first.len(), 1);

    // Simulate the claimer dying: age the claim past its TTL on disk.
    let inbox_dir = root.join("issues").join(&issue_id).join("inbox").join("lead");
    let mut aged = 0;
    for entry in std::fs::read_dir(&inbox_dir).expect("inbox dir") {
        let path = entry.expect("entry").path();
        let data = std::fs::read(&path).expect("read item");
        let mut item: InboxItem = serde_json::from_slice(&data).expect("parse item");
        if item.status == InboxStatus::Processing {
            item.claim_expires_at_ms = 1;
            std::fs::write(&path, serde_json::to_vec_pretty(&item).expect("encode")).expect("write");
            aged += 1;
        }
    }
    assert_eq!(aged, 1);

    let second = svc
        .wait_issue_task_events(&issue_id, "lead-2", 5)
        .expect("reclaim");
    assert_eq!(second.len(), 1, "stale claim must be redelivered");

    let outcome = svc
        .get_next_step_token(&issue_id, "lead", &task_id, "w1", 5)
        .expect("token");
    svc.review_task("lead", sample_review(&issue_id, &task_id, &outcome.token))
        .expect("review");
    submitter.join().expect("join").expect("submit");
}

#[test]
fn wait_events_returns_empty_for_finished_issues() {
    let root = temp_root("wait_events_returns_empty_for_finished_issues");
    let svc = issue_service(&root);

    let issue_id = create_issue(&svc, "nothing to wait for");
    // No tasks at all: immediate empty result, no blocking.
    let events = svc
        .wait_issue_task_events(&issue_id, "lead", 60)
        .expect("wait");
    assert!(events.is_empty());
}

#[test]
fn reset_rewrites_history_without_rewinding_seq() {
    let root = temp_root("reset_rewrites_history_without_rewinding_seq");
    let svc = issue_service(&root);

    let issue_id = create_issue(&svc, "resettable");
    let t1 = create_task(&svc, &issue_id, "T1", "easy", 1);
    let t2 = create_task(&svc, &issue_id, "T2", "easy", 1);
    svc.claim_task(&issue_id, &t1, "w1", "").expect("claim t1");
    svc.claim_task(&issue_id, &t2, "w2", "").expect("claim t2");

    let before = svc.read_all_events(&issue_id).expect("events");
    let max_seq_before = before.iter().map(|e| e.seq).max().unwrap_or(0);

    let task = svc.reset_task("lead", &issue_id, &t1, "flaky worker").expect("reset");
    assert_eq!(task.status, TaskStatus::Open);
    assert!(task.claimed_by.is_empty());

    let after = svc.read_all_events(&issue_id).expect("events after reset");
    // Claim/create rows for t1 are gone, except the reset marker itself.
    for ev in &after {
        if ev.task_id == t1 {
            assert_eq!(ev.event_type, "issue_task_reset");
        }
    }
    assert!(after.iter().any(|e| e.task_id == t2));
    // The counter moved forward for the reset event, never backward.
    let max_seq_after = after.iter().map(|e| e.seq).max().unwrap_or(0);
    assert!(max_seq_after > max_seq_before);

    // The required spec doc survives the reset.
    let spec_path = root
        .join("issues")
        .join(&issue_id)
        .join("tasks")
        .join(format!("{t1}.docs"))
        .join("spec.md");
    assert!(spec_path.exists());
}

#[test]
fn legacy_signal_scan_advances_its_cursor() {
    let root = temp_root("legacy_signal_scan_advances_its_cursor");
    let svc = issue_service(&root);

    let issue_id = create_issue(&svc, "legacy scan");
    let task_id = create_task(&svc, &issue_id, "T1", "easy", 1);
    svc.claim_task(&issue_id, &task_id, "w1", "").expect("claim");

    let submitter = {
        let svc = svc.clone();
        let issue_id = issue_id.clone();
        let task_id = task_id.clone();
        std::thread::spawn(move || svc.submit_task(&issue_id, &task_id, "w1", sample_artifacts()))
    };
    wait_for_submission(&svc, &issue_id, &task_id);

    let first = svc
        .scan_signal_events(&issue_id, "session-1", 10)
        .expect("scan");
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].event_type, "submission_created");

    // The cursor advanced: the same session sees nothing new.
    let second = svc
        .scan_signal_events(&issue_id, "session-1", 10)
        .expect("rescan");
    assert!(second.is_empty());

    // A different session starts from the beginning.
    let fresh = svc
        .scan_signal_events(&issue_id, "session-2", 10)
        .expect("fresh scan");
    assert_eq!(fresh.len(), 1);

    let outcome = svc
        .get_next_step_token(&issue_id, "lead", &task_id, "w1", 5)
        .expect("token");
    svc.review_task("lead", sample_review(&issue_id, &task_id, &outcome.token))
        .expect("review");
    submitter.join().expect("join").expect("submit");
}
