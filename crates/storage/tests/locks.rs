#![forbid(unsafe_code)]

mod support;

use wg_storage::CoordError;

use support::*;

#[test]
fn conflicting_lock_rolls_back_everything_it_acquired() {
    let root = temp_root("conflicting_lock_rolls_back");
    let locks = lock_service(&root);

    let lease_a = locks
        .lock_files("task-1", "worker-a", &["a.rs".to_string(), "b.rs".to_string()], 60, 0)
        .expect("worker-a locks a+b");

    let err = locks
        .lock_files("task-2", "worker-b", &["b.rs".to_string(), "c.rs".to_string()], 60, 0)
        .expect_err("b.rs is taken");
    match err {
        CoordError::Conflict(msg) => {
            assert!(msg.contains("'b.rs' locked by 'worker-a'"), "{msg}");
            assert!(msg.contains("task-1"), "{msg}");
        }
        other => panic!("expected conflict, got {other:?}"),
    }

    // The failed attempt must not leave a lock on c.rs behind.
    let leases = locks.list_locks("", &["c.rs".to_string()]).expect("list");
    assert!(leases.is_empty());

    // After unlock the same request succeeds.
    locks.unlock(&lease_a.lease_id).expect("unlock a");
    locks
        .lock_files("task-2", "worker-b", &["b.rs".to_string(), "c.rs".to_string()], 60, 0)
        .expect("retry succeeds after unlock");
}

#[test]
fn unlock_removes_lease_and_file_locks() {
    let root = temp_root("unlock_removes_lease_and_file_locks");
    let locks = lock_service(&root);

    let lease = locks
        .lock_files("", "worker-a", &["x.rs".to_string()], 60, 0)
        .expect("lock");
    assert_eq!(lease.files, vec!["x.rs".to_string()]);
    locks.unlock(&lease.lease_id).expect("unlock");

    assert!(locks.get_lease(&lease.lease_id).is_err());
    assert!(locks.list_locks("", &["x.rs".to_string()]).expect("list").is_empty());

    // Nothing left on disk either.
    let files_dir = root.join("locks").join("files");
    let count = std::fs::read_dir(&files_dir)
        .map(|d| d.count())
        .unwrap_or(0);
    assert_eq!(count, 0);
}

#[test]
fn same_owner_relock_is_reentrant() {
    let root = temp_root("same_owner_relock_is_reentrant");
    let locks = lock_service(&root);

    locks
        .lock_files("task-1", "worker-a", &["shared.rs".to_string()], 60, 0)
        .expect("first lock");
    locks
        .lock_files("task-1", "worker-a", &["shared.rs".to_string()], 60, 0)
        .expect("same owner may relock");
}

#[test]
fn heartbeat_extends_lease_and_file_locks() {
    let root = temp_root("heartbeat_extends_lease_and_file_locks");
    let locks = lock_service(&root);

    let lease = locks
        .lock_files("", "worker-a", &["x.rs".to_string()], 2, 0)
        .expect("lock");
    let before = lease.expires_at.clone();

    let extended = locks.heartbeat(&lease.lease_id, 600).expect("heartbeat");
    assert_eq!(extended.owner, "worker-a");
    assert_eq!(extended.files, lease.files);
    assert!(extended.expires_at > before, "{} !> {before}", extended.expires_at);

    // Heartbeat again: ownership unchanged, expiry only moves forward.
    let again = locks.heartbeat(&lease.lease_id, 600).expect("heartbeat again");
    assert_eq!(again.owner, "worker-a");
    assert!(again.expires_at >= extended.expires_at);
}

#[test]
fn expired_lock_is_taken_over() {
    let root = temp_root("expired_lock_is_taken_over");
    let locks = lock_service(&root);

    locks
        .lock_files("task-1", "worker-a", &["hot.rs".to_string()], 1, 0)
        .expect("short lock");
    std::thread::sleep(std::time::Duration::from_millis(1200));

    let lease_b = locks
        .lock_files("task-2", "worker-b", &["hot.rs".to_string()], 60, 0)
        .expect("takeover after expiry");
    assert_eq!(lease_b.owner, "worker-b");
}

#[test]
fn wait_sec_retries_until_the_holder_releases() {
    let root = temp_root("wait_sec_retries_until_release");
    let locks = lock_service(&root);

    let lease_a = locks
        .lock_files("", "worker-a", &["contended.rs".to_string()], 60, 0)
        .expect("lock");

    let waiter = {
        let locks = locks.clone();
        std::thread::spawn(move || {
            locks.lock_files("", "worker-b", &["contended.rs".to_string()], 60, 5)
        })
    };
    std::thread::sleep(std::time::Duration::from_millis(700));
    locks.unlock(&lease_a.lease_id).expect("release");

    let lease_b = waiter.join().expect("join").expect("waiter acquires after release");
    assert_eq!(lease_b.owner, "worker-b");
}

#[test]
fn list_locks_filters_and_skips_expired() {
    let root = temp_root("list_locks_filters_and_skips_expired");
    let locks = lock_service(&root);

    locks
        .lock_files("", "worker-a", &["a.rs".to_string()], 60, 0)
        .expect("a");
    locks
        .lock_files("", "worker-b", &["b.rs".to_string()], 1, 0)
        .expect("b short");

    let all = locks.list_locks("", &[]).expect("list all");
    assert_eq!(all.len(), 2);

    let only_a = locks.list_locks("worker-a", &[]).expect("by owner");
    assert_eq!(only_a.len(), 1);
    assert_eq!(only_a[0].owner, "worker-a");

    std::thread::sleep(std::time::Duration::from_millis(1200));
    let live = locks.list_locks("", &[]).expect("after expiry");
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].owner, "worker-a");
}

#[test]
fn clean_expired_removes_stale_records() {
    let root = temp_root("clean_expired_removes_stale_records");
    let locks = lock_service(&root);

    locks
        .lock_files("", "worker-a", &["a.rs".to_string(), "b.rs".to_string()], 1, 0)
        .expect("short lease");
    std::thread::sleep(std::time::Duration::from_millis(1200));

    let cleaned = locks.clean_expired().expect("clean");
    assert!(cleaned >= 1, "cleaned {cleaned}");
    assert!(locks.list_locks("", &[]).expect("list").is_empty());
}

#[test]
fn files_are_cleaned_before_matching() {
    let root = temp_root("files_are_cleaned_before_matching");
    let locks = lock_service(&root);

    locks
        .lock_files("", "worker-a", &["src/./main.rs".to_string()], 60, 0)
        .expect("lock cleaned path");
    let err = locks
        .lock_files("", "worker-b", &["src/main.rs".to_string()], 60, 0)
        .expect_err("same file after cleaning");
    assert!(matches!(err, CoordError::Conflict(_)));
}
