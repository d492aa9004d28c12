#![forbid(unsafe_code)]

//! Task message threads (question / blocker / reply) and the two long
//! polls built on them: the worker-side `ask` and the lead-side inbox
//! wait. Posting a question or blocker drives an in-progress task to
//! `blocked`; the lead's reply drives it back.

use serde_json::{Value, json};
use wg_core::model::{
    InboxItemType, IssueEvent, MessageKind, MessageStatus, TaskMessage, TaskStatus, event,
};
use wg_core::{gen_id, now_ms, now_rfc3339};

use crate::{CoordError, Result};

use super::IssueService;
use super::support::Deadline;

impl IssueService {
    pub(crate) fn create_task_message_locked(
        &self,
        issue_id: &str,
        task_id: &str,
        sender_id: &str,
        kind: MessageKind,
        content: &str,
        refs: &str,
    ) -> Result<TaskMessage> {
        let msg = TaskMessage {
            id: gen_id("msg"),
            issue_id: issue_id.to_string(),
            task_id: task_id.to_string(),
            sender_id: sender_id.to_string(),
            kind,
            content: content.to_string(),
            refs: refs.to_string(),
            status: MessageStatus::Open,
            created_at: now_rfc3339(),
            updated_at: now_rfc3339(),
            ..TaskMessage::default()
        };
        let path = self
            .store
            .path(&["issues", issue_id, "messages", &format!("{}.json", msg.id)]);
        self.store.write_json(&path, &msg)?;
        Ok(msg)
    }

    pub(crate) fn load_message_locked(&self, issue_id: &str, message_id: &str) -> Result<TaskMessage> {
        self.store
            .read_json(&self.store.path(&["issues", issue_id, "messages", &format!("{message_id}.json")]))
            .map_err(|_| CoordError::NotFound(format!("message '{message_id}' not found")))
    }

    /// The explicit message, or the oldest open one for the task.
    fn resolve_message_for_reply(
        &self,
        issue_id: &str,
        task_id: &str,
        message_id: &str,
    ) -> Result<TaskMessage> {
        if !message_id.trim().is_empty() {
            return self.load_message_locked(issue_id, message_id.trim());
        }
        let dir = self.store.path(&["issues", issue_id, "messages"]);
        let mut oldest: Option<TaskMessage> = None;
        for path in self.store.list_json_files(&dir)? {
            let Ok(msg) = self.store.read_json::<TaskMessage>(&path) else {
                continue;
            };
            if msg.task_id != task_id || msg.status != MessageStatus::Open {
                continue;
            }
            if oldest.as_ref().is_none_or(|best| msg.created_at < best.created_at) {
                oldest = Some(msg);
            }
        }
        oldest.ok_or_else(|| {
            CoordError::NotFound(format!("no open message for task '{task_id}'"))
        })
    }

    fn reply_message_locked(
        &self,
        issue_id: &str,
        message_id: &str,
        actor: &str,
        content: &str,
    ) -> Result<TaskMessage> {
        let mut msg = self.load_message_locked(issue_id, message_id)?;
        if msg.status != MessageStatus::Open {
            return Err(CoordError::Precondition(format!(
                "message '{message_id}' is already {}",
                msg.status.as_str()
            )));
        }
        msg.status = MessageStatus::Replied;
        msg.reply_content = content.to_string();
        msg.reply_by = actor.to_string();
        msg.replied_at = now_rfc3339();
        msg.updated_at = now_rfc3339();
        let path = self
            .store
            .path(&["issues", issue_id, "messages", &format!("{}.json", msg.id)]);
        self.store.write_json(&path, &msg)?;
        Ok(msg)
    }

    pub(crate) fn delete_messages_for_task_locked(&self, issue_id: &str, task_id: &str) {
        let dir = self.store.path(&["issues", issue_id, "messages"]);
        for path in self.store.list_json_files(&dir).unwrap_or_default() {
            let Ok(msg) = self.store.read_json::<TaskMessage>(&path) else {
                continue;
            };
            if msg.task_id == task_id {
                let _ = self.store.remove(&path);
            }
        }
    }

    /// Worker posts a question or blocker: creates the message entity,
    /// blocks the task, and notifies the lead inbox. Returns the audit
    /// event (carrying the message id).
    pub fn post_task_message(
        &self,
        issue_id: &str,
        task_id: &str,
        actor: &str,
        kind: MessageKind,
        content: &str,
        refs: &str,
    ) -> Result<IssueEvent> {
        if issue_id.is_empty() || task_id.is_empty() {
            return Err(CoordError::InvalidArgument(
                "issue_id and task_id are required".to_string(),
            ));
        }
        let actor = if actor.is_empty() { "worker" } else { actor };

        self.store.with_lock(|| {
            let mut task = self.load_task_locked(issue_id, task_id)?;
            if task.claimed_by.is_empty() {
                return Err(CoordError::Precondition(format!(
                    "task '{task_id}' is not claimed"
                )));
            }
            if task.claimed_by.trim() != actor.trim() {
                return Err(CoordError::Precondition(format!(
                    "task '{task_id}' is not claimed by actor"
                )));
            }

            let msg = self.create_task_message_locked(issue_id, task_id, actor, kind, content, refs)?;

            if task.status == TaskStatus::InProgress {
                task.status = TaskStatus::Blocked;
                task.updated_at = now_rfc3339();
                self.write_task_locked(&task)?;
            }

            self.push_to_lead_inbox_locked(
                issue_id,
                task_id,
                InboxItemType::from(kind),
                &msg.id,
                actor,
            )?;

            let mut ev = IssueEvent {
                event_type: event::ISSUE_TASK_MESSAGE.to_string(),
                issue_id: issue_id.to_string(),
                task_id: task_id.to_string(),
                actor: actor.to_string(),
                kind: kind.as_str().to_string(),
                detail: content.to_string(),
                refs: refs.to_string(),
                message_id: msg.id.clone(),
                timestamp: now_rfc3339(),
                ..IssueEvent::default()
            };
            ev.seq = self.append_event_locked(issue_id, ev.clone())?;
            Ok(ev)
        })
    }

    /// Lead replies to a message (explicit id or oldest open): resolves
    /// the thread, acks the lead inbox, notifies the worker inbox, and
    /// unblocks the task.
    pub fn reply_task_message(
        &self,
        issue_id: &str,
        task_id: &str,
        actor: &str,
        message_id: &str,
        content: &str,
        refs: &str,
    ) -> Result<IssueEvent> {
        if issue_id.is_empty() || task_id.is_empty() {
            return Err(CoordError::InvalidArgument(
                "issue_id and task_id are required".to_string(),
            ));
        }
        let actor = if actor.is_empty() { "lead" } else { actor };

        self.store.with_lock(|| {
            let mut task = self.load_task_locked(issue_id, task_id)?;
            let msg = self.resolve_message_for_reply(issue_id, task_id, message_id)?;
            let replied = self.reply_message_locked(issue_id, &msg.id, actor, content)?;

            self.ack_lead_inbox_by_ref_locked(issue_id, &msg.id);
            if !task.claimed_by.is_empty() {
                let _ = self.push_to_worker_inbox_locked(
                    issue_id,
                    &task.claimed_by,
                    task_id,
                    InboxItemType::Reply,
                    &msg.id,
                    actor,
                );
            }

            if task.status == TaskStatus::Blocked {
                task.status = TaskStatus::InProgress;
                task.updated_at = now_rfc3339();
                self.write_task_locked(&task)?;
            }

            let mut ev = IssueEvent {
                event_type: event::ISSUE_TASK_MESSAGE.to_string(),
                issue_id: issue_id.to_string(),
                task_id: task_id.to_string(),
                actor: actor.to_string(),
                kind: "reply".to_string(),
                detail: content.to_string(),
                refs: replied.refs.clone(),
                message_id: msg.id.clone(),
                timestamp: now_rfc3339(),
                ..IssueEvent::default()
            };
            ev.seq = self.append_event_locked(issue_id, ev.clone())?;
            Ok(ev)
        })
    }

    /// Post a question/blocker and block until the lead replies. Extends
    /// the task lease to cover the wait so the sweep doesn't reclaim the
    /// task from under the waiting worker.
    pub fn ask_issue_task(
        &self,
        issue_id: &str,
        task_id: &str,
        actor: &str,
        kind: MessageKind,
        content: &str,
        refs: &str,
        timeout_sec: i64,
    ) -> Result<Value> {
        let timeout_sec = self.normalize_timeout(timeout_sec);
        let question = self.post_task_message(issue_id, task_id, actor, kind, content, refs)?;
        let message_id = question.message_id.clone();

        let _ = self.store.with_lock(|| {
            let Ok(mut task) = self.load_task_locked(issue_id, task_id) else {
                return Ok(());
            };
            if !actor.is_empty() && task.claimed_by == actor {
                let min_lease_ms = now_ms() + self.cfg.default_timeout_sec * 1000;
                if task.lease_expires_at_ms < min_lease_ms {
                    task.lease_expires_at_ms = min_lease_ms;
                    task.updated_at = now_rfc3339();
                    let _ = self.write_task_locked(&task);
                }
            }
            Ok(())
        });

        let replied = self.poll_message_reply(issue_id, &message_id, timeout_sec)?;
        let reply_event = IssueEvent {
            event_type: event::ISSUE_TASK_MESSAGE.to_string(),
            issue_id: issue_id.to_string(),
            task_id: task_id.to_string(),
            actor: replied.reply_by.clone(),
            kind: "reply".to_string(),
            detail: replied.reply_content.clone(),
            refs: replied.refs.clone(),
            message_id: message_id.clone(),
            timestamp: replied.replied_at.clone(),
            ..IssueEvent::default()
        };

        Ok(json!({
            "question": question,
            "reply": reply_event,
            "message_id": message_id,
        }))
    }

    fn poll_message_reply(
        &self,
        issue_id: &str,
        message_id: &str,
        timeout_sec: i64,
    ) -> Result<TaskMessage> {
        let deadline = Deadline::after_secs(timeout_sec);
        loop {
            let msg = self
                .store
                .with_lock(|| Ok(self.load_message_locked(issue_id, message_id).ok()))?;
            if let Some(msg) = msg {
                if msg.status != MessageStatus::Open {
                    return Ok(msg);
                }
            }
            if deadline.expired() {
                return Err(CoordError::Timeout(format!(
                    "timeout waiting for reply to message '{message_id}'"
                )));
            }
            deadline.sleep_poll();
        }
    }

    /// Lead long-poll: claim one pending inbox item (submission or
    /// question/blocker) and shape it as a single signal event. Returns
    /// an empty list right away when the issue is terminal, has no tasks,
    /// or all tasks are finished; otherwise blocks up to the timeout.
    pub fn wait_issue_task_events(
        &self,
        issue_id: &str,
        actor: &str,
        timeout_sec: i64,
    ) -> Result<Vec<Value>> {
        if issue_id.is_empty() {
            return Err(CoordError::InvalidArgument("issue_id is required".to_string()));
        }
        if !self.store.exists(&["issues", issue_id, "issue.json"]) {
            return Err(CoordError::NotFound(format!("issue '{issue_id}' not found")));
        }
        self.sweep_expired();
        let actor = if actor.is_empty() { "lead" } else { actor };

        let issue = self.store.with_lock(|| self.load_issue_locked(issue_id))?;
        if issue.status.is_terminal() {
            return Ok(Vec::new());
        }
        let tasks = self.list_tasks_unswept(issue_id, None)?;
        if tasks.is_empty() {
            return Ok(Vec::new());
        }
        let all_done = tasks
            .iter()
            .all(|t| matches!(t.status, TaskStatus::Done | TaskStatus::Canceled));
        if all_done {
            return Ok(Vec::new());
        }

        let timeout_sec = self.normalize_timeout(timeout_sec);
        self.sweep_inbox_claims(issue_id);

        match self.claim_lead_inbox_blocking(issue_id, actor, timeout_sec)? {
            Some(item) => Ok(vec![self.materialize_inbox_item(issue_id, &item)]),
            None => Ok(Vec::new()),
        }
    }
}
