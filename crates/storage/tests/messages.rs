#![forbid(unsafe_code)]

mod support;

use wg_core::model::{MessageKind, TaskStatus};
use wg_storage::CoordError;

use support::*;

#[test]
fn question_blocks_and_reply_unblocks() {
    let root = temp_root("question_blocks_and_reply_unblocks");
    let svc = issue_service(&root);

    let issue_id = create_issue(&svc, "q and a");
    let task_id = create_task(&svc, &issue_id, "T1", "easy", 1);
    svc.claim_task(&issue_id, &task_id, "w1", "").expect("claim");

    let ev = svc
        .post_task_message(&issue_id, &task_id, "w1", MessageKind::Question, "X or Y?", "")
        .expect("post question");
    assert!(!ev.message_id.is_empty());
    assert!(ev.seq > 0);

    let task = svc.get_task(&issue_id, &task_id).expect("get");
    assert_eq!(task.status, TaskStatus::Blocked);

    let reply = svc
        .reply_task_message(&issue_id, &task_id, "lead", "", "X", "")
        .expect("reply");
    assert_eq!(reply.kind, "reply");
    assert_eq!(reply.message_id, ev.message_id);

    let task = svc.get_task(&issue_id, &task_id).expect("get after reply");
    assert_eq!(task.status, TaskStatus::InProgress);
}

#[test]
fn ask_round_trip_returns_question_and_reply() {
    let root = temp_root("ask_round_trip_returns_question_and_reply");
    let svc = issue_service(&root);

    let issue_id = create_issue(&svc, "ask flow");
    let task_id = create_task(&svc, &issue_id, "T1", "easy", 1);
    svc.claim_task(&issue_id, &task_id, "w1", "").expect("claim");

    let asker = {
        let svc = svc.clone();
        let issue_id = issue_id.clone();
        let task_id = task_id.clone();
        std::thread::spawn(move || {
            svc.ask_issue_task(
                &issue_id,
                &task_id,
                "w1",
                MessageKind::Question,
                "which approach?",
                "",
                5,
            )
        })
    };

    // The lead sees the question in its inbox and replies.
    let events = svc
        .wait_issue_task_events(&issue_id, "lead", 5)
        .expect("wait");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "issue_task_message");
    assert_eq!(events[0]["kind"], "question");
    assert_eq!(events[0]["detail"], "which approach?");

    svc.reply_task_message(&issue_id, &task_id, "lead", "", "approach A", "")
        .expect("reply");

    let out = asker.join().expect("join").expect("ask returns");
    assert_eq!(out["question"]["detail"], "which approach?");
    assert_eq!(out["reply"]["detail"], "approach A");
    assert_eq!(out["reply"]["kind"], "reply");

    let task = svc.get_task(&issue_id, &task_id).expect("task");
    assert_eq!(task.status, TaskStatus::InProgress);
}

#[test]
fn only_the_claimer_may_post() {
    let root = temp_root("only_the_claimer_may_post");
    let svc = issue_service(&root);

    let issue_id = create_issue(&svc, "gatekeeping");
    let task_id = create_task(&svc, &issue_id, "T1", "easy", 1);
    svc.claim_task(&issue_id, &task_id, "w1", "").expect("claim");

    let err = svc
        .post_task_message(&issue_id, &task_id, "w2", MessageKind::Blocker, "stuck", "")
        .expect_err("foreign post");
    assert!(matches!(err, CoordError::Precondition(_)));
}

#[test]
fn reply_with_no_open_message_fails() {
    let root = temp_root("reply_with_no_open_message_fails");
    let svc = issue_service(&root);

    let issue_id = create_issue(&svc, "nothing to reply to");
    let task_id = create_task(&svc, &issue_id, "T1", "easy", 1);
    svc.claim_task(&issue_id, &task_id, "w1", "").expect("claim");

    let err = svc
        .reply_task_message(&issue_id, &task_id, "lead", "", "hello?", "")
        .expect_err("no message");
    match err {
        CoordError::NotFound(msg) => assert!(msg.contains("no open message"), "{msg}"),
        other => panic!("expected not_found, got {other:?}"),
    }
}
