#![forbid(unsafe_code)]

//! Task reset: return a task to "never claimed".
//!
//! This is the one operation allowed to rewrite `events.jsonl` (filtering
//! out the task's rows via tmp-file + rename, under the global lock).
//! `meta.next_seq` is not rewound.

use std::io::{BufRead, BufReader, Write};

use wg_core::model::{FileLock, IssueEvent, IssueTask, Lease, event};
use wg_core::now_rfc3339;

use crate::{CoordError, Result};

use super::IssueService;
use super::fs::{clean_path, path_hash};

impl IssueService {
    pub fn reset_task(
        &self,
        actor: &str,
        issue_id: &str,
        task_id: &str,
        reason: &str,
    ) -> Result<IssueTask> {
        if issue_id.is_empty() || task_id.is_empty() {
            return Err(CoordError::InvalidArgument(
                "issue_id and task_id are required".to_string(),
            ));
        }
        let actor = if actor.is_empty() { "lead" } else { actor };
        let reason = if reason.trim().is_empty() {
            "reset"
        } else {
            reason.trim()
        };

        self.store.with_lock(|| {
            if !self.store.exists(&["issues", issue_id, "issue.json"]) {
                return Err(CoordError::NotFound(format!("issue '{issue_id}' not found")));
            }
            let mut task = self.load_task_locked(issue_id, task_id)?;
            let prev_owner = task.claimed_by.trim().to_string();

            // Reservation and review tokens die with the reset.
            for token in [task.reserved_token.trim(), task.next_step_token.trim()] {
                if !token.is_empty() {
                    let _ = self.store.remove(&self.store.path(&[
                        "issues",
                        issue_id,
                        "next_steps",
                        &format!("{token}.json"),
                    ]));
                }
            }
            task.reserved_token = String::new();
            task.reserved_until_ms = 0;
            task.next_step_token = String::new();

            self.release_task_leases_locked(task_id, &prev_owner);

            task.clear_execution_state();
            task.updated_at = now_rfc3339();

            self.delete_submissions_for_task_locked(issue_id, task_id);
            self.delete_messages_for_task_locked(issue_id, task_id);
            self.delete_inbox_for_task_locked(issue_id, task_id);
            self.rewrite_events_without_task(issue_id, task_id)?;
            self.prune_task_docs(issue_id, &task);

            self.write_task_locked(&task)?;
            self.append_event_locked(
                issue_id,
                IssueEvent {
                    event_type: event::ISSUE_TASK_RESET.to_string(),
                    issue_id: issue_id.to_string(),
                    task_id: task.id.clone(),
                    actor: actor.to_string(),
                    detail: reason.to_string(),
                    timestamp: now_rfc3339(),
                    ..IssueEvent::default()
                },
            )?;
            Ok(task)
        })
    }

    /// Drop leases (and their file locks) tied to the task. Lease records
    /// carry no issue id and task ids repeat across issues, so when the
    /// previous owner is known it must match too.
    fn release_task_leases_locked(&self, task_id: &str, prev_owner: &str) {
        let leases_dir = self.store.path(&["locks", "leases"]);
        for lease_path in self.store.list_json_files(&leases_dir).unwrap_or_default() {
            let Ok(lease) = self.store.read_json::<Lease>(&lease_path) else {
                continue;
            };
            if lease.task_id != task_id {
                continue;
            }
            if !prev_owner.is_empty() && lease.owner.trim() != prev_owner {
                continue;
            }
            for file in &lease.files {
                let lock_path = self
                    .store
                    .path(&["locks", "files", &format!("{}.json", path_hash(file))]);
                if let Ok(fl) = self.store.read_json::<FileLock>(&lock_path) {
                    if fl.lease_id == lease.lease_id {
                        let _ = self.store.remove(&lock_path);
                    }
                }
            }
            let _ = self.store.remove(&lease_path);
        }

        // Leftover file locks whose lease file already vanished.
        let locks_dir = self.store.path(&["locks", "files"]);
        for lock_path in self.store.list_json_files(&locks_dir).unwrap_or_default() {
            let Ok(fl) = self.store.read_json::<FileLock>(&lock_path) else {
                continue;
            };
            if fl.task_id != task_id {
                continue;
            }
            if !prev_owner.is_empty() && fl.owner.trim() != prev_owner {
                continue;
            }
            let _ = self.store.remove(&lock_path);
        }
    }

    fn rewrite_events_without_task(&self, issue_id: &str, task_id: &str) -> Result<()> {
        let events_path = self.store.path(&["issues", issue_id, "events.jsonl"]);
        let file = match std::fs::File::open(&events_path) {
            Ok(f) => f,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let tmp_path = events_path.with_extension("jsonl.tmp");
        let mut out = std::io::BufWriter::new(std::fs::File::create(&tmp_path)?);
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let Ok(ev) = serde_json::from_str::<IssueEvent>(&line) else {
                continue;
            };
            if ev.task_id == task_id {
                continue;
            }
            out.write_all(line.as_bytes())?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        drop(out);
        std::fs::rename(&tmp_path, &events_path)?;
        Ok(())
    }

    /// Delete task markdown docs except the required ones laid down at
    /// creation. Required names may include subdirectories, so compare by
    /// cleaned relative path.
    fn prune_task_docs(&self, issue_id: &str, task: &IssueTask) {
        let docs_dir = self
            .store
            .path(&["issues", issue_id, "tasks", &format!("{}.docs", task.id)]);
        let keep: Vec<String> = task
            .required_task_docs
            .iter()
            .map(|n| clean_path(n).trim_start_matches('/').to_string())
            .collect();

        let mut stack = vec![docs_dir.clone()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                let is_md = path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("md"));
                if !is_md {
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&docs_dir) else {
                    continue;
                };
                let mut rel = clean_path(&rel.to_string_lossy());
                for suffix in [".md", ".MD"] {
                    if let Some(stripped) = rel.strip_suffix(suffix) {
                        rel = stripped.to_string();
                        break;
                    }
                }
                if keep.iter().any(|k| *k == rel) {
                    continue;
                }
                let _ = std::fs::remove_file(&path);
            }
        }
    }
}
