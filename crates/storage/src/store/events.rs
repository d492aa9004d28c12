#![forbid(unsafe_code)]

//! Per-issue append-only event log with monotonic sequencing.
//!
//! `meta.next_seq` is the single allocator: every append loads the meta,
//! stamps the event, advances the counter, rewrites the meta, then appends
//! one JSON line. All of that happens under the global lock, so seq values
//! are gapless and strictly increasing per issue. Reading the log without
//! the lock is safe (append-only bytes); write visibility requires it.

use std::io::{BufRead, BufReader};

use wg_core::model::{EventCursor, IssueEvent, IssueMeta, event};

use crate::{CoordError, Result};

use super::IssueService;

impl IssueService {
    /// Stamp `ev` with the issue's next seq and append it. Caller holds
    /// the global lock.
    pub(crate) fn append_event_locked(&self, issue_id: &str, mut ev: IssueEvent) -> Result<i64> {
        let meta_path = self.store.path(&["issues", issue_id, "meta.json"]);
        let mut meta: IssueMeta = self.store.read_json(&meta_path)?;
        ev.seq = meta.next_seq;
        meta.next_seq += 1;
        self.store.write_json(&meta_path, &meta)?;

        let events_path = self.store.path(&["issues", issue_id, "events.jsonl"]);
        self.store.append_jsonl(&events_path, &ev)?;
        Ok(ev.seq)
    }

    pub fn read_all_events(&self, issue_id: &str) -> Result<Vec<IssueEvent>> {
        if issue_id.is_empty() {
            return Err(CoordError::InvalidArgument("issue_id is required".to_string()));
        }
        if !self.store.exists(&["issues", issue_id, "issue.json"]) {
            return Err(CoordError::NotFound(format!("issue '{issue_id}' not found")));
        }
        self.scan_events(issue_id, |_| true, -1, usize::MAX)
            .map(|(events, _)| events)
    }

    /// Events with `seq > after_seq`, up to `limit`. Returns the events and
    /// the last seq seen (== `after_seq` when nothing matched).
    pub fn read_events_after(
        &self,
        issue_id: &str,
        after_seq: i64,
        limit: usize,
    ) -> Result<(Vec<IssueEvent>, i64)> {
        if !self.store.exists(&["issues", issue_id, "issue.json"]) {
            return Err(CoordError::NotFound(format!("issue '{issue_id}' not found")));
        }
        self.scan_events(issue_id, |_| true, after_seq, limit)
    }

    /// Legacy event-scan mode: "signal" events only (submissions created,
    /// worker questions/blockers), resuming from the per-session cursor.
    /// The inbox path has replaced this for live serving; it stays for
    /// tooling that still tails the log.
    pub fn scan_signal_events(
        &self,
        issue_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<IssueEvent>> {
        if issue_id.is_empty() || session_id.is_empty() {
            return Err(CoordError::InvalidArgument(
                "issue_id and session_id are required".to_string(),
            ));
        }
        if !self.store.exists(&["issues", issue_id, "issue.json"]) {
            return Err(CoordError::NotFound(format!("issue '{issue_id}' not found")));
        }
        let after_seq = self.read_cursor(issue_id, session_id);
        let (events, next_seq) = self.scan_events(
            issue_id,
            |ev| {
                ev.event_type == event::SUBMISSION_CREATED
                    || (ev.event_type == event::ISSUE_TASK_MESSAGE
                        && (ev.kind == "question" || ev.kind == "blocker"))
            },
            after_seq,
            limit,
        )?;
        if next_seq > after_seq {
            self.write_cursor(issue_id, session_id, next_seq)?;
        }
        Ok(events)
    }

    fn scan_events(
        &self,
        issue_id: &str,
        keep: impl Fn(&IssueEvent) -> bool,
        after_seq: i64,
        limit: usize,
    ) -> Result<(Vec<IssueEvent>, i64)> {
        let events_path = self.store.path(&["issues", issue_id, "events.jsonl"]);
        let file = match std::fs::File::open(&events_path) {
            Ok(f) => f,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok((Vec::new(), after_seq));
            }
            Err(err) => return Err(err.into()),
        };

        let mut out = Vec::new();
        let mut next_seq = after_seq;
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            // Rows written by other revisions may not parse; skip, don't fail.
            let Ok(ev) = serde_json::from_str::<IssueEvent>(&line) else {
                continue;
            };
            if ev.seq <= after_seq {
                continue;
            }
            if !keep(&ev) {
                continue;
            }
            next_seq = ev.seq;
            out.push(ev);
            if out.len() >= limit {
                break;
            }
        }
        Ok((out, next_seq))
    }

    pub(crate) fn read_cursor(&self, issue_id: &str, session_id: &str) -> i64 {
        let path = self.store.path(&[
            "issues",
            issue_id,
            "cursors",
            &format!("{session_id}.json"),
        ]);
        self.store
            .read_json::<EventCursor>(&path)
            .map(|c| c.after_seq)
            .unwrap_or(0)
    }

    pub(crate) fn write_cursor(&self, issue_id: &str, session_id: &str, after_seq: i64) -> Result<()> {
        let path = self.store.path(&[
            "issues",
            issue_id,
            "cursors",
            &format!("{session_id}.json"),
        ]);
        self.store.write_json(&path, &EventCursor { after_seq })
    }
}
