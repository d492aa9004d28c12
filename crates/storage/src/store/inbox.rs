#![forbid(unsafe_code)]

//! Reliable single-consumer inboxes.
//!
//! Three queues: the per-issue lead inbox, per-worker inboxes, and the
//! global acceptor inbox for deliveries. Each item is one JSON file.
//! Claiming flips `pending → processing` with a TTL; a claim that stalls
//! past the TTL is reset to `pending` on the next pass, bounding how long
//! a crashed consumer can hold an item.

use serde_json::{Value, json};
use tracing::debug;
use wg_core::model::{InboxItem, InboxItemType, InboxStatus, TaskMessage, event};
use wg_core::{gen_id, now_ms, now_rfc3339};

use crate::Result;

use super::IssueService;
use super::support::Deadline;

/// If a consumer claims an item and never finishes, the claim lapses
/// after this many seconds and the item is redelivered.
pub(crate) const INBOX_CLAIM_TTL_SEC: i64 = 300;

impl IssueService {
    pub(crate) fn push_to_lead_inbox_locked(
        &self,
        issue_id: &str,
        task_id: &str,
        item_type: InboxItemType,
        ref_id: &str,
        sender_id: &str,
    ) -> Result<InboxItem> {
        let item = new_item(issue_id, task_id, item_type, ref_id, sender_id, "lead");
        let path = self.store.path(&[
            "issues",
            issue_id,
            "inbox",
            "lead",
            &format!("{}.json", item.id),
        ]);
        self.store.write_json(&path, &item)?;
        Ok(item)
    }

    pub(crate) fn push_to_worker_inbox_locked(
        &self,
        issue_id: &str,
        worker_id: &str,
        task_id: &str,
        item_type: InboxItemType,
        ref_id: &str,
        sender_id: &str,
    ) -> Result<InboxItem> {
        let item = new_item(issue_id, task_id, item_type, ref_id, sender_id, worker_id);
        let path = self.store.path(&[
            "issues",
            issue_id,
            "inbox",
            "workers",
            worker_id,
            &format!("{}.json", item.id),
        ]);
        self.store.write_json(&path, &item)?;
        Ok(item)
    }

    pub(crate) fn push_to_acceptor_inbox_locked(
        &self,
        issue_id: &str,
        delivery_id: &str,
        sender_id: &str,
    ) -> Result<InboxItem> {
        let item = new_item(
            issue_id,
            "",
            InboxItemType::Delivery,
            delivery_id,
            sender_id,
            "acceptor",
        );
        let path = self.store.path(&[
            "deliveries",
            "inbox",
            "acceptor",
            &format!("{}.json", item.id),
        ]);
        self.store.write_json(&path, &item)?;
        Ok(item)
    }

    /// Mark lead items referencing `ref_id` done. Best-effort; acking an
    /// already-done item is a no-op.
    pub(crate) fn ack_lead_inbox_by_ref_locked(&self, issue_id: &str, ref_id: &str) {
        let dir = self.store.path(&["issues", issue_id, "inbox", "lead"]);
        self.ack_items_in_dir(&dir, |item| item.ref_id == ref_id);
    }

    pub(crate) fn ack_acceptor_inbox_by_delivery_locked(&self, delivery_id: &str) {
        let dir = self.store.path(&["deliveries", "inbox", "acceptor"]);
        self.ack_items_in_dir(&dir, |item| {
            item.item_type == InboxItemType::Delivery && item.ref_id == delivery_id
        });
    }

    fn ack_items_in_dir(&self, dir: &std::path::Path, matches: impl Fn(&InboxItem) -> bool) {
        for path in self.store.list_json_files(dir).unwrap_or_default() {
            let Ok(mut item) = self.store.read_json::<InboxItem>(&path) else {
                continue;
            };
            if item.status == InboxStatus::Done || !matches(&item) {
                continue;
            }
            item.status = InboxStatus::Done;
            item.updated_at = now_rfc3339();
            let _ = self.store.write_json(&path, &item);
        }
    }

    /// Claim one pending lead item (stable file order = oldest id first).
    /// Stale `processing` claims are reset to `pending` in the same pass.
    pub(crate) fn claim_lead_inbox_item(
        &self,
        issue_id: &str,
        claimed_by: &str,
    ) -> Result<Option<InboxItem>> {
        self.store.with_lock(|| {
            let dir = self.store.path(&["issues", issue_id, "inbox", "lead"]);
            self.claim_one_in_dir(&dir, claimed_by, |_| true)
        })
    }

    /// Claim one pending acceptor delivery item. Caller holds the lock.
    pub(crate) fn claim_acceptor_inbox_item_locked(
        &self,
        claimed_by: &str,
    ) -> Result<Option<InboxItem>> {
        let claimed_by = if claimed_by.trim().is_empty() {
            "acceptor"
        } else {
            claimed_by.trim()
        };
        let dir = self.store.path(&["deliveries", "inbox", "acceptor"]);
        self.claim_one_in_dir(&dir, claimed_by, |item| {
            item.item_type == InboxItemType::Delivery
        })
    }

    fn claim_one_in_dir(
        &self,
        dir: &std::path::Path,
        claimed_by: &str,
        eligible: impl Fn(&InboxItem) -> bool,
    ) -> Result<Option<InboxItem>> {
        let now = now_ms();
        let mut claimed: Option<InboxItem> = None;
        for path in self.store.list_json_files(dir)? {
            let Ok(mut item) = self.store.read_json::<InboxItem>(&path) else {
                continue;
            };
            if !eligible(&item) {
                continue;
            }
            if item.status == InboxStatus::Processing
                && item.claim_expires_at_ms > 0
                && now > item.claim_expires_at_ms
            {
                debug!(inbox_id = %item.id, stale_claimer = %item.claimed_by, "inbox claim lapsed, resetting");
                item.status = InboxStatus::Pending;
                item.claimed_by = String::new();
                item.claim_expires_at_ms = 0;
                item.updated_at = now_rfc3339();
                let _ = self.store.write_json(&path, &item);
            }
            if item.status == InboxStatus::Pending && claimed.is_none() {
                item.status = InboxStatus::Processing;
                item.claimed_by = claimed_by.to_string();
                item.claim_expires_at_ms = now + INBOX_CLAIM_TTL_SEC * 1000;
                item.updated_at = now_rfc3339();
                self.store.write_json(&path, &item)?;
                claimed = Some(item);
                // Keep scanning: remaining stale claims still get reset.
            }
        }
        Ok(claimed)
    }

    /// Poll-claim the lead inbox until an item arrives or the deadline
    /// lapses. The global lock is held only inside each claim attempt.
    pub(crate) fn claim_lead_inbox_blocking(
        &self,
        issue_id: &str,
        claimed_by: &str,
        timeout_sec: i64,
    ) -> Result<Option<InboxItem>> {
        let deadline = Deadline::after_secs(timeout_sec);
        loop {
            if let Some(item) = self.claim_lead_inbox_item(issue_id, claimed_by)? {
                return Ok(Some(item));
            }
            if deadline.expired() {
                return Ok(None);
            }
            deadline.sleep_poll();
        }
    }

    /// Reset stale lead-inbox claims for one issue.
    pub(crate) fn sweep_inbox_claims(&self, issue_id: &str) {
        let now = now_ms();
        let _ = self.store.with_lock(|| {
            let dir = self.store.path(&["issues", issue_id, "inbox", "lead"]);
            for path in self.store.list_json_files(&dir).unwrap_or_default() {
                let Ok(mut item) = self.store.read_json::<InboxItem>(&path) else {
                    continue;
                };
                if item.status == InboxStatus::Processing
                    && item.claim_expires_at_ms > 0
                    && now > item.claim_expires_at_ms
                {
                    item.status = InboxStatus::Pending;
                    item.claimed_by = String::new();
                    item.claim_expires_at_ms = 0;
                    item.updated_at = now_rfc3339();
                    let _ = self.store.write_json(&path, &item);
                }
            }
            Ok(())
        });
    }

    /// Remove all lead and worker inbox items for a task (reset path).
    pub(crate) fn delete_inbox_for_task_locked(&self, issue_id: &str, task_id: &str) {
        let lead_dir = self.store.path(&["issues", issue_id, "inbox", "lead"]);
        self.remove_items_in_dir(&lead_dir, task_id);

        let workers_dir = self.store.path(&["issues", issue_id, "inbox", "workers"]);
        for worker in self.store.list_dirs(&workers_dir).unwrap_or_default() {
            let dir = self
                .store
                .path(&["issues", issue_id, "inbox", "workers", &worker]);
            self.remove_items_in_dir(&dir, task_id);
        }
    }

    fn remove_items_in_dir(&self, dir: &std::path::Path, task_id: &str) {
        for path in self.store.list_json_files(dir).unwrap_or_default() {
            let Ok(item) = self.store.read_json::<InboxItem>(&path) else {
                continue;
            };
            if item.task_id == task_id {
                let _ = self.store.remove(&path);
            }
        }
    }

    /// Shape a claimed lead item as an event-like JSON value, loading the
    /// referenced submission or message for its content. `seq` is -1: the
    /// inbox path is not event-seq based.
    pub(crate) fn materialize_inbox_item(&self, issue_id: &str, item: &InboxItem) -> Value {
        let mut base = json!({
            "seq": -1,
            "issue_id": issue_id,
            "task_id": item.task_id,
            "actor": item.sender_id,
            "kind": "",
            "detail": "",
            "refs": "",
            "timestamp": item.created_at,
            "inbox_id": item.id,
        });
        let obj = base.as_object_mut().expect("object literal");
        match item.item_type {
            InboxItemType::Question | InboxItemType::Blocker => {
                obj.insert("type".into(), json!(event::ISSUE_TASK_MESSAGE));
                obj.insert("kind".into(), json!(item.item_type.as_str()));
                obj.insert("message_id".into(), json!(item.ref_id));
                let path = self.store.path(&[
                    "issues",
                    issue_id,
                    "messages",
                    &format!("{}.json", item.ref_id),
                ]);
                if let Ok(msg) = self.store.read_json::<TaskMessage>(&path) {
                    obj.insert("detail".into(), json!(msg.content));
                    obj.insert("refs".into(), json!(msg.refs));
                    obj.insert("timestamp".into(), json!(msg.created_at));
                }
            }
            InboxItemType::Submission => {
                obj.insert("type".into(), json!(event::SUBMISSION_CREATED));
                obj.insert("detail".into(), json!("submitted"));
                obj.insert("submission_id".into(), json!(item.ref_id));
                let sub = self
                    .store
                    .with_lock(|| Ok(self.get_submission_locked(issue_id, &item.ref_id).ok()))
                    .ok()
                    .flatten();
                if let Some(sub) = sub {
                    obj.insert(
                        "submission_artifacts".into(),
                        serde_json::to_value(&sub.artifacts).unwrap_or(Value::Null),
                    );
                    obj.insert("timestamp".into(), json!(sub.created_at));
                }
            }
            InboxItemType::Delivery | InboxItemType::Reply | InboxItemType::ReviewResult => {
                obj.insert("type".into(), json!(item.item_type.as_str()));
                obj.insert("ref_id".into(), json!(item.ref_id));
            }
        }
        base
    }
}

fn new_item(
    issue_id: &str,
    task_id: &str,
    item_type: InboxItemType,
    ref_id: &str,
    sender_id: &str,
    target: &str,
) -> InboxItem {
    InboxItem {
        id: gen_id("inb"),
        issue_id: issue_id.to_string(),
        task_id: task_id.to_string(),
        item_type,
        ref_id: ref_id.to_string(),
        sender_id: sender_id.to_string(),
        target: target.to_string(),
        status: InboxStatus::Pending,
        claimed_by: String::new(),
        claim_expires_at_ms: 0,
        created_at: now_rfc3339(),
        updated_at: now_rfc3339(),
    }
}
