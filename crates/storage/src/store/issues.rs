#![forbid(unsafe_code)]

//! Issue lifecycle and the synchronous expiry sweep.

use tracing::{debug, warn};
use wg_core::model::{
    DeliveryStatus, DocRef, Issue, IssueEvent, IssueMeta, IssueStatus, IssueTask, TaskStatus, event,
};
use wg_core::{gen_id, now_ms, now_rfc3339};

use crate::{CoordError, Result};

use super::IssueService;
use super::support::{Deadline, calc_lease_expiry_ms, clean_doc_name, trim_required, write_doc_file};

#[derive(Debug, Clone, Default)]
pub struct CreateIssueParams {
    pub subject: String,
    pub description: String,
    pub shared_doc_paths: Vec<String>,
    pub project_doc_paths: Vec<String>,
    pub user_doc_name: String,
    pub user_doc_content: String,
    pub lead_doc_name: String,
    pub lead_doc_content: String,
    pub other_docs: Vec<(String, String)>,
}

impl IssueService {
    /// Create an issue with its two mandatory named docs (plus optional
    /// extras), initialize the per-issue meta counters, and append
    /// `issue_created`.
    pub fn create_issue(&self, actor: &str, params: CreateIssueParams) -> Result<Issue> {
        if params.subject.is_empty() {
            return Err(CoordError::InvalidArgument("subject is required".to_string()));
        }
        let actor = if actor.is_empty() { "lead" } else { actor };
        let user_name = clean_doc_name(&params.user_doc_name)
            .map_err(|e| CoordError::InvalidArgument(format!("user_issue_doc.name: {e}")))?;
        let user_content = trim_required("user_issue_doc.content", &params.user_doc_content)?;
        let lead_name = clean_doc_name(&params.lead_doc_name)
            .map_err(|e| CoordError::InvalidArgument(format!("lead_issue_doc.name: {e}")))?;
        let lead_content = trim_required("lead_issue_doc.content", &params.lead_doc_content)?;

        let mut issue = Issue {
            id: gen_id("issue"),
            subject: params.subject.clone(),
            description: params.description.clone(),
            shared_doc_paths: params.shared_doc_paths.clone(),
            project_doc_paths: params.project_doc_paths.clone(),
            docs: Vec::new(),
            status: IssueStatus::Open,
            lease_expires_at_ms: calc_lease_expiry_ms(0, self.cfg.issue_ttl_sec),
            created_at: now_rfc3339(),
            updated_at: now_rfc3339(),
        };

        self.store.with_lock(|| {
            self.store.ensure_dir(&["issues", &issue.id, "tasks"]);
            let docs_dir = self.store.ensure_dir(&["issues", &issue.id, "docs"]);

            write_doc_file(&docs_dir, &format!("{user_name}.md"), &user_content)?;
            write_doc_file(&docs_dir, &format!("{lead_name}.md"), &lead_content)?;
            issue.docs.push(DocRef {
                name: user_name.clone(),
                path: docs_dir.join(format!("{user_name}.md")).to_string_lossy().to_string(),
            });
            issue.docs.push(DocRef {
                name: lead_name.clone(),
                path: docs_dir.join(format!("{lead_name}.md")).to_string_lossy().to_string(),
            });
            for (name, content) in &params.other_docs {
                let name = clean_doc_name(name)
                    .map_err(|e| CoordError::InvalidArgument(format!("user_other_docs.name: {e}")))?;
                write_doc_file(&docs_dir, &format!("{name}.md"), content.trim())?;
                issue.docs.push(DocRef {
                    path: docs_dir.join(format!("{name}.md")).to_string_lossy().to_string(),
                    name,
                });
            }

            self.store
                .write_json(&self.store.path(&["issues", &issue.id, "issue.json"]), &issue)?;
            self.store.write_json(
                &self.store.path(&["issues", &issue.id, "meta.json"]),
                &IssueMeta::default(),
            )?;
            self.append_event_locked(
                &issue.id,
                IssueEvent {
                    event_type: event::ISSUE_CREATED.to_string(),
                    issue_id: issue.id.clone(),
                    actor: actor.to_string(),
                    detail: params.subject.clone(),
                    timestamp: now_rfc3339(),
                    ..IssueEvent::default()
                },
            )?;
            Ok(())
        })?;
        Ok(issue)
    }

    pub fn update_issue_doc_paths(
        &self,
        actor: &str,
        issue_id: &str,
        shared_doc_paths: Option<Vec<String>>,
        project_doc_paths: Option<Vec<String>>,
    ) -> Result<Issue> {
        if issue_id.is_empty() {
            return Err(CoordError::InvalidArgument("issue_id is required".to_string()));
        }
        let actor = if actor.is_empty() { "lead" } else { actor };
        self.store.with_lock(|| {
            let mut issue = self.load_issue_locked(issue_id)?;
            if let Some(shared) = shared_doc_paths {
                issue.shared_doc_paths = shared;
            }
            if let Some(project) = project_doc_paths {
                issue.project_doc_paths = project;
            }
            issue.updated_at = now_rfc3339();
            self.write_issue_locked(&issue)?;
            self.append_event_locked(
                issue_id,
                IssueEvent {
                    event_type: event::ISSUE_UPDATED.to_string(),
                    issue_id: issue_id.to_string(),
                    actor: actor.to_string(),
                    detail: "doc_paths_updated".to_string(),
                    timestamp: now_rfc3339(),
                    ..IssueEvent::default()
                },
            )?;
            Ok(issue)
        })
    }

    pub fn get_issue(&self, issue_id: &str) -> Result<Issue> {
        if issue_id.is_empty() {
            return Err(CoordError::InvalidArgument("issue_id is required".to_string()));
        }
        self.sweep_expired();
        self.store
            .read_json(&self.store.path(&["issues", issue_id, "issue.json"]))
            .map_err(|_| CoordError::NotFound(format!("issue '{issue_id}' not found")))
    }

    pub fn list_issues(&self) -> Result<Vec<Issue>> {
        self.sweep_expired();
        self.list_issues_unswept()
    }

    fn list_issues_unswept(&self) -> Result<Vec<Issue>> {
        let dir = self.store.path(&["issues"]);
        let mut out = Vec::new();
        for id in self.store.list_dirs(&dir)? {
            let path = self.store.path(&["issues", &id, "issue.json"]);
            if let Ok(issue) = self.store.read_json::<Issue>(&path) {
                out.push(issue);
            }
        }
        Ok(out)
    }

    /// Long-poll until at least one issue matches `status`. Returns
    /// immediately when matches already exist; an empty vec on timeout.
    pub fn wait_issues(
        &self,
        status: IssueStatus,
        timeout_sec: i64,
        limit: usize,
    ) -> Result<Vec<Issue>> {
        let timeout_sec = self.normalize_timeout(timeout_sec);
        let limit = if limit == 0 { 50 } else { limit };
        let deadline = Deadline::after_secs(timeout_sec);
        loop {
            self.sweep_expired();
            let mut issues = self.list_issues_unswept()?;
            issues.retain(|it| it.status == status);
            if !issues.is_empty() {
                issues.truncate(limit);
                return Ok(issues);
            }
            if deadline.expired() {
                return Ok(Vec::new());
            }
            deadline.sleep_poll();
        }
    }

    /// Close is only legal when every task is done; the error names the
    /// offenders so the lead can see what is left.
    pub fn close_issue(&self, actor: &str, issue_id: &str, summary: &str) -> Result<Issue> {
        if issue_id.is_empty() {
            return Err(CoordError::InvalidArgument("issue_id is required".to_string()));
        }
        self.sweep_expired();
        let actor = if actor.is_empty() { "lead" } else { actor };

        let tasks = self.list_tasks(issue_id, None)?;
        let not_done: Vec<String> = tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Done)
            .map(|t| format!("{}:{}", t.id, t.status.as_str()))
            .collect();
        if !not_done.is_empty() {
            return Err(CoordError::Precondition(format!(
                "cannot close issue: tasks not done: {}",
                not_done.join(", ")
            )));
        }

        self.store.with_lock(|| {
            let mut issue = self.load_issue_locked(issue_id)?;
            issue.status = IssueStatus::Done;
            issue.updated_at = now_rfc3339();
            self.write_issue_locked(&issue)?;
            self.append_event_locked(
                issue_id,
                IssueEvent {
                    event_type: event::ISSUE_CLOSED.to_string(),
                    issue_id: issue_id.to_string(),
                    actor: actor.to_string(),
                    detail: summary.to_string(),
                    timestamp: now_rfc3339(),
                    ..IssueEvent::default()
                },
            )?;
            Ok(issue)
        })
    }

    /// Reopen a terminal issue: back to `open` with a fresh lease.
    pub fn reopen_issue(&self, actor: &str, issue_id: &str, summary: &str) -> Result<Issue> {
        if issue_id.is_empty() {
            return Err(CoordError::InvalidArgument("issue_id is required".to_string()));
        }
        let actor = if actor.is_empty() { "lead" } else { actor };
        self.store.with_lock(|| {
            let mut issue = self.load_issue_locked(issue_id)?;
            if !issue.status.is_terminal() {
                return Err(CoordError::Precondition(format!(
                    "issue '{issue_id}' is not done/canceled (status: {})",
                    issue.status.as_str()
                )));
            }
            issue.status = IssueStatus::Open;
            issue.lease_expires_at_ms = calc_lease_expiry_ms(0, self.cfg.issue_ttl_sec);
            issue.updated_at = now_rfc3339();
            self.write_issue_locked(&issue)?;
            self.append_event_locked(
                issue_id,
                IssueEvent {
                    event_type: event::ISSUE_REOPENED.to_string(),
                    issue_id: issue_id.to_string(),
                    actor: actor.to_string(),
                    detail: summary.to_string(),
                    timestamp: now_rfc3339(),
                    ..IssueEvent::default()
                },
            )?;
            Ok(issue)
        })
    }

    pub fn extend_issue_lease(&self, actor: &str, issue_id: &str, extend_sec: i64) -> Result<Issue> {
        if issue_id.is_empty() {
            return Err(CoordError::InvalidArgument("issue_id is required".to_string()));
        }
        let _ = actor;
        self.store.with_lock(|| {
            let mut issue = self.load_issue_locked(issue_id)?;
            if !matches!(issue.status, IssueStatus::Open | IssueStatus::InProgress) {
                return Err(CoordError::Precondition(format!(
                    "issue '{issue_id}' is not open/in_progress (status: {})",
                    issue.status.as_str()
                )));
            }
            issue.lease_expires_at_ms = calc_lease_expiry_ms(extend_sec, self.cfg.issue_ttl_sec);
            issue.updated_at = now_rfc3339();
            self.write_issue_locked(&issue)?;
            Ok(issue)
        })
    }

    pub fn extend_task_lease(
        &self,
        actor: &str,
        issue_id: &str,
        task_id: &str,
        extend_sec: i64,
    ) -> Result<IssueTask> {
        if issue_id.is_empty() || task_id.is_empty() {
            return Err(CoordError::InvalidArgument(
                "issue_id and task_id are required".to_string(),
            ));
        }
        let actor = if actor.is_empty() { "worker" } else { actor };
        self.store.with_lock(|| {
            let mut task = self.load_task_locked(issue_id, task_id)?;
            if task.claimed_by != actor {
                return Err(CoordError::Precondition(format!(
                    "task '{task_id}' is not claimed by actor"
                )));
            }
            if !matches!(
                task.status,
                TaskStatus::InProgress | TaskStatus::Blocked | TaskStatus::Submitted
            ) {
                return Err(CoordError::Precondition(format!(
                    "task '{task_id}' is not in progress/blocked (status: {})",
                    task.status.as_str()
                )));
            }
            task.lease_expires_at_ms = calc_lease_expiry_ms(extend_sec, self.cfg.task_ttl_sec);
            task.updated_at = now_rfc3339();
            self.write_task_locked(&task)?;
            Ok(task)
        })
    }

    /// Synchronous expiry pass, invoked from common tool entrypoints:
    /// leased-out issues are canceled, leased-out tasks return to `open`
    /// with execution state cleared, stuck in-review deliveries reopen.
    /// Best-effort per record; one bad file never stops the sweep.
    pub fn sweep_expired(&self) {
        let now = now_ms();
        let result = self.store.with_lock(|| {
            let issues_dir = self.store.path(&["issues"]);
            for issue_id in self.store.list_dirs(&issues_dir).unwrap_or_default() {
                let issue_path = self.store.path(&["issues", &issue_id, "issue.json"]);
                let Ok(mut issue) = self.store.read_json::<Issue>(&issue_path) else {
                    continue;
                };

                if matches!(issue.status, IssueStatus::Open | IssueStatus::InProgress)
                    && issue.lease_expires_at_ms > 0
                    && now > issue.lease_expires_at_ms
                {
                    issue.status = IssueStatus::Canceled;
                    issue.updated_at = now_rfc3339();
                    if self.store.write_json(&issue_path, &issue).is_ok() {
                        let _ = self.append_event_locked(
                            &issue_id,
                            IssueEvent {
                                event_type: event::ISSUE_EXPIRED.to_string(),
                                issue_id: issue_id.clone(),
                                actor: "system".to_string(),
                                detail: "expired".to_string(),
                                timestamp: now_rfc3339(),
                                ..IssueEvent::default()
                            },
                        );
                        debug!(issue_id = %issue_id, "issue lease expired, canceled");
                    }
                }

                let tasks_dir = self.store.path(&["issues", &issue_id, "tasks"]);
                for path in self.store.list_json_files(&tasks_dir).unwrap_or_default() {
                    let Ok(mut task) = self.store.read_json::<IssueTask>(&path) else {
                        continue;
                    };
                    if matches!(
                        task.status,
                        TaskStatus::InProgress | TaskStatus::Blocked | TaskStatus::Submitted
                    ) && task.lease_expires_at_ms > 0
                        && now > task.lease_expires_at_ms
                    {
                        let prev_status = task.status;
                        let prev_owner = task.claimed_by.clone();
                        task.clear_execution_state();
                        task.updated_at = now_rfc3339();
                        if self.store.write_json(&path, &task).is_ok() {
                            let _ = self.append_event_locked(
                                &issue_id,
                                IssueEvent {
                                    event_type: event::ISSUE_TASK_EXPIRED.to_string(),
                                    issue_id: issue_id.clone(),
                                    task_id: task.id.clone(),
                                    actor: "system".to_string(),
                                    detail: format!(
                                        "expired: {} claimed_by={prev_owner}",
                                        prev_status.as_str()
                                    ),
                                    timestamp: now_rfc3339(),
                                    ..IssueEvent::default()
                                },
                            );
                            debug!(issue_id = %issue_id, task_id = %task.id, "task lease expired, reopened");
                        }
                    }
                }
            }

            // In-review deliveries whose lease ran out go back to open.
            let deliveries_dir = self.store.path(&["deliveries"]);
            for path in self.store.list_json_files(&deliveries_dir).unwrap_or_default() {
                let Ok(mut delivery) = self.store.read_json::<wg_core::model::Delivery>(&path)
                else {
                    continue;
                };
                if delivery.status == DeliveryStatus::InReview
                    && delivery.lease_expires_at_ms > 0
                    && now > delivery.lease_expires_at_ms
                {
                    delivery.status = DeliveryStatus::Open;
                    delivery.claimed_by = String::new();
                    delivery.claimed_at = String::new();
                    delivery.lease_expires_at_ms = 0;
                    delivery.updated_at = now_rfc3339();
                    let _ = self.store.write_json(&path, &delivery);
                    debug!(delivery_id = %delivery.id, "delivery review lease expired, reopened");
                }
            }

            Ok(())
        });
        if let Err(err) = result {
            warn!(error = %err, "expiry sweep failed");
        }
    }

    pub(crate) fn normalize_timeout(&self, timeout_sec: i64) -> i64 {
        if timeout_sec <= 0 || timeout_sec < self.cfg.default_timeout_sec {
            self.cfg.default_timeout_sec
        } else {
            timeout_sec
        }
    }

    pub(crate) fn load_issue_locked(&self, issue_id: &str) -> Result<Issue> {
        self.store
            .read_json(&self.store.path(&["issues", issue_id, "issue.json"]))
            .map_err(|_| CoordError::NotFound(format!("issue '{issue_id}' not found")))
    }

    pub(crate) fn write_issue_locked(&self, issue: &Issue) -> Result<()> {
        self.store
            .write_json(&self.store.path(&["issues", &issue.id, "issue.json"]), issue)
    }

    pub(crate) fn load_task_locked(&self, issue_id: &str, task_id: &str) -> Result<IssueTask> {
        self.store
            .read_json(&self.store.path(&["issues", issue_id, "tasks", &format!("{task_id}.json")]))
            .map_err(|_| {
                CoordError::NotFound(format!("task '{task_id}' not found in issue '{issue_id}'"))
            })
    }

    pub(crate) fn write_task_locked(&self, task: &IssueTask) -> Result<()> {
        self.store.write_json(
            &self
                .store
                .path(&["issues", &task.issue_id, "tasks", &format!("{}.json", task.id)]),
            task,
        )
    }
}
