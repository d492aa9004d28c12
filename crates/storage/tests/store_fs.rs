#![forbid(unsafe_code)]

//! FileStore primitives and cross-thread serialization under the global
//! advisory lock.

mod support;

use serde_json::json;
use wg_storage::FileStore;

use support::*;

#[test]
fn write_json_is_atomic_and_indented() {
    let root = temp_root("write_json_is_atomic_and_indented");
    let store = FileStore::new(root.clone());

    let path = store.path(&["nested", "dir", "doc.json"]);
    store
        .write_json(&path, &json!({"a": 1, "b": ["x", "y"]}))
        .expect("write");

    // No tmp residue next to the target.
    let siblings: Vec<_> = std::fs::read_dir(path.parent().unwrap())
        .expect("dir")
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(siblings, vec!["doc.json".to_string()]);

    let raw = std::fs::read_to_string(&path).expect("read raw");
    assert!(raw.contains("  \"a\": 1"), "expected 2-space indent: {raw}");

    let back: serde_json::Value = store.read_json(&path).expect("read back");
    assert_eq!(back["b"][1], "y");
}

#[test]
fn list_json_files_sorts_and_ignores_noise() {
    let root = temp_root("list_json_files_sorts_and_ignores_noise");
    let store = FileStore::new(root.clone());
    let dir = store.ensure_dir(&["items"]);

    for name in ["b.json", "a.json", "c.txt", "d.json"] {
        std::fs::write(dir.join(name), b"{}").expect("write");
    }
    std::fs::create_dir(dir.join("sub.json")).expect("decoy dir");

    let files: Vec<String> = store
        .list_json_files(&dir)
        .expect("list")
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    assert_eq!(files, vec!["a.json", "b.json", "d.json"]);

    // A missing directory is an empty listing, not an error.
    let missing = store.list_json_files(&store.path(&["nowhere"])).expect("missing dir");
    assert!(missing.is_empty());
}

#[test]
fn append_jsonl_produces_one_line_per_record() {
    let root = temp_root("append_jsonl_produces_one_line_per_record");
    let store = FileStore::new(root.clone());
    let path = store.path(&["log", "events.jsonl"]);

    for i in 0..3 {
        store.append_jsonl(&path, &json!({"n": i})).expect("append");
    }
    let raw = std::fs::read_to_string(&path).expect("read");
    let lines: Vec<&str> = raw.lines().collect();
    assert_eq!(lines.len(), 3);
    for (i, line) in lines.iter().enumerate() {
        let v: serde_json::Value = serde_json::from_str(line).expect("parse line");
        assert_eq!(v["n"], i as i64);
    }
}

#[test]
fn with_lock_serializes_read_modify_write_across_threads() {
    let root = temp_root("with_lock_serializes_rmw");
    let store = FileStore::new(root.clone());
    let counter_path = store.path(&["counter.json"]);
    store.write_json(&counter_path, &json!({"n": 0})).expect("seed");

    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        let path = counter_path.clone();
        handles.push(std::thread::spawn(move || {
            for _ in 0..25 {
                store
                    .with_lock(|| {
                        let mut v: serde_json::Value = store.read_json(&path)?;
                        let n = v["n"].as_i64().unwrap_or(0);
                        v["n"] = json!(n + 1);
                        store.write_json(&path, &v)
                    })
                    .expect("locked increment");
            }
        }));
    }
    for handle in handles {
        handle.join().expect("join");
    }

    let v: serde_json::Value = store.read_json(&counter_path).expect("final read");
    assert_eq!(v["n"], 100, "lost updates under the global lock");
}

#[test]
fn concurrent_task_creation_keeps_numbering_and_events_gapless() {
    let root = temp_root("concurrent_task_creation_gapless");
    let svc = issue_service(&root);
    let issue_id = create_issue(&svc, "contended counters");

    let mut handles = Vec::new();
    for t in 0..4 {
        let svc = svc.clone();
        let issue_id = issue_id.clone();
        handles.push(std::thread::spawn(move || {
            for n in 0..5 {
                create_task(&svc, &issue_id, &format!("T{t}-{n}"), "easy", 1);
            }
        }));
    }
    for handle in handles {
        handle.join().expect("join");
    }

    let tasks = svc.list_tasks(&issue_id, None).expect("tasks");
    assert_eq!(tasks.len(), 20);
    let mut nums: Vec<i64> = tasks
        .iter()
        .map(|t| t.id.trim_start_matches("task-").parse::<i64>().expect("task num"))
        .collect();
    nums.sort_unstable();
    assert_eq!(nums, (1..=20).collect::<Vec<i64>>());

    let events = svc.read_all_events(&issue_id).expect("events");
    for (i, ev) in events.iter().enumerate() {
        assert_eq!(ev.seq, i as i64 + 1, "event log gap at {i}");
    }
}
