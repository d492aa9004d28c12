#![forbid(unsafe_code)]

//! Task lifecycle: create, claim (with the reservation protocol), submit
//! (blocking until review), review, list, wait.

use wg_core::model::{
    Difficulty, DocRef, InboxItemType, InboxStatus, IssueEvent, IssueMeta, IssueTask, NextStep,
    NextStepToken, SubmissionArtifacts, TaskStatus, Verdict, event,
};
use wg_core::{now_ms, now_rfc3339};

use crate::{CoordError, Result};

use super::IssueService;
use super::support::{Deadline, calc_lease_expiry_ms, clean_doc_name, trim_required, write_doc_file};

/// The task spec block rendered to `tasks/<id>.docs/<name>.md` at creation.
/// Every field is mandatory; a task without a written-down goal and
/// acceptance criteria is not claimable work.
#[derive(Debug, Clone, Default)]
pub struct TaskSpec {
    pub name: String,
    pub split_from: String,
    pub split_reason: String,
    pub impact_scope: String,
    pub context_task_ids: Vec<String>,
    pub goal: String,
    pub rules: String,
    pub constraints: String,
    pub conventions: String,
    pub acceptance: String,
}

#[derive(Debug, Clone, Default)]
pub struct CreateTaskParams {
    pub issue_id: String,
    pub subject: String,
    pub description: String,
    pub difficulty: String,
    pub points: i64,
    pub suggested_files: Vec<String>,
    pub labels: Vec<String>,
    pub doc_paths: Vec<String>,
    pub context_task_ids: Vec<String>,
    pub spec: TaskSpec,
}

#[derive(Debug, Clone, Default)]
pub struct ReviewTaskParams {
    pub issue_id: String,
    pub task_id: String,
    pub submission_id: String,
    pub verdict: String,
    pub feedback: String,
    pub completion_score: i64,
    pub review_summary: String,
    pub reviewed_refs: Vec<String>,
    pub feedback_details: Vec<wg_core::model::FeedbackDetail>,
    pub next_step_token: String,
}

impl IssueService {
    pub fn create_task(&self, actor: &str, params: CreateTaskParams) -> Result<IssueTask> {
        if params.issue_id.is_empty() || params.subject.is_empty() {
            return Err(CoordError::InvalidArgument(
                "issue_id and subject are required".to_string(),
            ));
        }
        let actor = if actor.is_empty() { "lead" } else { actor };
        let difficulty = Difficulty::parse(&params.difficulty).ok_or_else(|| {
            CoordError::InvalidArgument(format!("invalid difficulty: {}", params.difficulty))
        })?;
        let spec = &params.spec;
        let spec_name = clean_doc_name(&spec.name)
            .map_err(|e| CoordError::InvalidArgument(format!("spec.name: {e}")))?;
        let split_from = trim_required("spec_split_from", &spec.split_from)?;
        let split_reason = trim_required("spec_split_reason", &spec.split_reason)?;
        let impact_scope = trim_required("spec_impact_scope", &spec.impact_scope)?;
        let goal = trim_required("spec_goal", &spec.goal)?;
        let rules = trim_required("spec_rules", &spec.rules)?;
        let constraints = trim_required("spec_constraints", &spec.constraints)?;
        let conventions = trim_required("spec_conventions", &spec.conventions)?;
        let acceptance = trim_required("spec_acceptance", &spec.acceptance)?;

        // Merge top-level and spec context ids, first occurrence wins.
        let mut merged_ctx: Vec<String> = Vec::new();
        for id in params
            .context_task_ids
            .iter()
            .chain(spec.context_task_ids.iter())
        {
            let id = id.trim();
            if id.is_empty() || merged_ctx.iter().any(|seen| seen == id) {
                continue;
            }
            merged_ctx.push(id.to_string());
        }

        if self.cfg.max_task_count > 0 {
            let count = self.count_tasks(&params.issue_id)?;
            if count >= self.cfg.max_task_count {
                return Err(CoordError::LimitExceeded(format!(
                    "max_task_count exceeded: {}",
                    self.cfg.max_task_count
                )));
            }
        }

        let issue_id = params.issue_id.clone();
        self.store.with_lock(|| {
            if !self.store.exists(&["issues", &issue_id, "issue.json"]) {
                return Err(CoordError::NotFound(format!("issue '{issue_id}' not found")));
            }

            let meta_path = self.store.path(&["issues", &issue_id, "meta.json"]);
            let mut meta: IssueMeta = self.store.read_json(&meta_path)?;
            if meta.next_task_num <= 0 {
                meta.next_task_num = 1;
            }
            let task_id = format!("task-{}", meta.next_task_num);
            meta.next_task_num += 1;
            self.store.write_json(&meta_path, &meta)?;

            let mut task = IssueTask {
                id: task_id.clone(),
                issue_id: issue_id.clone(),
                subject: params.subject.clone(),
                description: params.description.clone(),
                difficulty,
                split_from: split_from.clone(),
                split_reason: split_reason.clone(),
                impact_scope: impact_scope.clone(),
                context_task_ids: merged_ctx.clone(),
                suggested_files: params.suggested_files.clone(),
                labels: params.labels.clone(),
                doc_paths: params.doc_paths.clone(),
                required_task_docs: vec![spec_name.clone()],
                points: params.points,
                status: TaskStatus::Open,
                created_at: now_rfc3339(),
                updated_at: now_rfc3339(),
                ..IssueTask::default()
            };

            // Every existing issue doc becomes required reading for the task.
            let issue = self.load_issue_locked(&issue_id)?;
            for doc in &issue.docs {
                task.required_issue_docs.push(doc.name.clone());
                task.doc_paths.push(format!("issue_doc:{}", doc.name));
            }
            let spec_ref = format!("task_doc:{spec_name}");
            if !task.doc_paths.contains(&spec_ref) {
                task.doc_paths.push(spec_ref);
            }

            let spec_md = render_spec_markdown(
                &split_from,
                &split_reason,
                &impact_scope,
                &merged_ctx,
                &goal,
                &rules,
                &constraints,
                &conventions,
                &acceptance,
            );
            let docs_dir = self
                .store
                .path(&["issues", &issue_id, "tasks", &format!("{task_id}.docs")]);
            write_doc_file(&docs_dir, &format!("{spec_name}.md"), &spec_md)?;
            task.task_docs.push(DocRef {
                name: spec_name.clone(),
                path: docs_dir
                    .join(format!("{spec_name}.md"))
                    .to_string_lossy()
                    .to_string(),
            });

            self.write_task_locked(&task)?;
            self.append_event_locked(
                &issue_id,
                IssueEvent {
                    event_type: event::ISSUE_TASK_CREATED.to_string(),
                    issue_id: issue_id.clone(),
                    task_id: task.id.clone(),
                    actor: actor.to_string(),
                    detail: params.subject.clone(),
                    timestamp: now_rfc3339(),
                    ..IssueEvent::default()
                },
            )?;
            Ok(task)
        })
    }

    /// Claim an open task. A live reservation must be redeemed with its
    /// next-step token (which this consumes); an expired reservation is
    /// silently cleared. Required docs are verified present before the
    /// status flips to `in_progress`.
    pub fn claim_task(
        &self,
        issue_id: &str,
        task_id: &str,
        actor: &str,
        next_step_token: &str,
    ) -> Result<IssueTask> {
        if issue_id.is_empty() || task_id.is_empty() {
            return Err(CoordError::InvalidArgument(
                "issue_id and task_id are required".to_string(),
            ));
        }
        self.sweep_expired();
        let actor = if actor.is_empty() { "worker" } else { actor };
        let now = now_ms();

        self.store.with_lock(|| {
            let mut task = self.load_task_locked(issue_id, task_id)?;

            if !task.reserved_token.is_empty() {
                if task.reserved_until_ms > 0 && now > task.reserved_until_ms {
                    task.reserved_token = String::new();
                    task.reserved_until_ms = 0;
                } else {
                    let reserved_err =
                        || CoordError::TokenInvalid(format!("task '{task_id}' is reserved"));
                    if next_step_token.trim().is_empty() || next_step_token != task.reserved_token {
                        return Err(reserved_err());
                    }
                    let tok_path = self.store.path(&[
                        "issues",
                        issue_id,
                        "next_steps",
                        &format!("{next_step_token}.json"),
                    ]);
                    let mut tok: NextStepToken =
                        self.store.read_json(&tok_path).map_err(|_| reserved_err())?;
                    let matches_task = matches!(
                        &tok.next_step,
                        NextStep::ClaimTask { task_id: reserved } if reserved.as_str() == task_id
                    );
                    if tok.issue_id != issue_id || tok.used || !tok.attached || !matches_task {
                        return Err(reserved_err());
                    }
                    tok.used = true;
                    tok.used_at = now_rfc3339();
                    self.store.write_json(&tok_path, &tok)?;
                    task.reserved_token = String::new();
                    task.reserved_until_ms = 0;
                }
            }

            for name in &task.required_issue_docs {
                if !self
                    .store
                    .exists(&["issues", issue_id, "docs", &format!("{name}.md")])
                {
                    return Err(CoordError::Precondition(format!(
                        "missing required issue doc: {name}"
                    )));
                }
            }
            for name in &task.required_task_docs {
                if !self.store.exists(&[
                    "issues",
                    issue_id,
                    "tasks",
                    &format!("{}.docs", task.id),
                    &format!("{name}.md"),
                ]) {
                    return Err(CoordError::Precondition(format!(
                        "missing required task doc: {name}"
                    )));
                }
            }

            if task.status != TaskStatus::Open {
                return Err(CoordError::Precondition(format!(
                    "task '{task_id}' is not open (status: {})",
                    task.status.as_str()
                )));
            }
            task.claimed_by = actor.to_string();
            task.status = TaskStatus::InProgress;
            task.lease_expires_at_ms = calc_lease_expiry_ms(0, self.cfg.task_ttl_sec);
            task.updated_at = now_rfc3339();
            self.write_task_locked(&task)?;
            self.append_event_locked(
                issue_id,
                IssueEvent {
                    event_type: event::ISSUE_TASK_CLAIMED.to_string(),
                    issue_id: issue_id.to_string(),
                    task_id: task.id.clone(),
                    actor: actor.to_string(),
                    timestamp: now_rfc3339(),
                    ..IssueEvent::default()
                },
            )?;
            Ok(task)
        })
    }

    /// Create a submission for a claimed task, notify the lead inbox, then
    /// block until the submission is reviewed (or the wait times out). The
    /// task status is untouched by the submit itself; approval is what
    /// moves it to `done`.
    pub fn submit_task(
        &self,
        issue_id: &str,
        task_id: &str,
        actor: &str,
        artifacts: SubmissionArtifacts,
    ) -> Result<IssueTask> {
        if issue_id.is_empty() || task_id.is_empty() {
            return Err(CoordError::InvalidArgument(
                "issue_id and task_id are required".to_string(),
            ));
        }
        self.sweep_expired();
        let actor = if actor.is_empty() { "worker" } else { actor };
        trim_required("artifacts.summary", &artifacts.summary)?;
        if artifacts.changed_files.is_empty() {
            return Err(CoordError::InvalidArgument(
                "artifacts.changed_files is required".to_string(),
            ));
        }
        if artifacts.test_cases.is_empty() {
            return Err(CoordError::InvalidArgument(
                "artifacts.test_cases is required".to_string(),
            ));
        }
        if artifacts.test_result != "passed" && artifacts.test_result != "failed" {
            return Err(CoordError::InvalidArgument(
                "artifacts.test_result must be 'passed' or 'failed'".to_string(),
            ));
        }
        trim_required("artifacts.test_output", &artifacts.test_output)?;

        let submission_id = self.store.with_lock(|| {
            let mut task = self.load_task_locked(issue_id, task_id)?;
            if task.claimed_by.trim().is_empty() {
                return Err(CoordError::Precondition(format!(
                    "task '{task_id}' is not claimed"
                )));
            }
            if task.claimed_by.trim() != actor.trim() {
                return Err(CoordError::Precondition(format!(
                    "task '{task_id}' is not claimed by actor"
                )));
            }
            if !matches!(task.status, TaskStatus::InProgress | TaskStatus::Blocked) {
                return Err(CoordError::Precondition(format!(
                    "task '{task_id}' is not in progress (status: {})",
                    task.status.as_str()
                )));
            }

            // Extend the lease to cover the review wait, else the sweep
            // would reopen the task under the waiting worker.
            let min_lease_ms = now_ms() + self.cfg.default_timeout_sec * 1000;
            if task.lease_expires_at_ms < min_lease_ms {
                task.lease_expires_at_ms = min_lease_ms;
                task.updated_at = now_rfc3339();
                self.write_task_locked(&task)?;
            }

            let sub = self.create_submission_locked(issue_id, &task.id, actor, artifacts.clone())?;
            self.push_to_lead_inbox_locked(
                issue_id,
                task_id,
                InboxItemType::Submission,
                &sub.id,
                actor,
            )?;
            self.append_event_locked(
                issue_id,
                IssueEvent {
                    event_type: event::SUBMISSION_CREATED.to_string(),
                    issue_id: issue_id.to_string(),
                    task_id: task.id.clone(),
                    actor: actor.to_string(),
                    submission_id: sub.id.clone(),
                    submission_artifacts: Some(artifacts.clone()),
                    timestamp: now_rfc3339(),
                    ..IssueEvent::default()
                },
            )?;
            Ok(sub.id)
        })?;

        self.poll_submission_status(issue_id, &submission_id, self.cfg.default_timeout_sec)?;
        // Approved reviews flip the task to done; rejected ones leave it
        // in_progress for a resubmit. Either way, return the live task.
        self.get_task(issue_id, task_id)
    }

    /// Review the latest open submission (or an explicit one): resolves
    /// the submission, notifies the worker inbox, attaches the next-step
    /// token, and couples the task status to the verdict.
    pub fn review_task(&self, actor: &str, params: ReviewTaskParams) -> Result<IssueTask> {
        let issue_id = params.issue_id.as_str();
        let task_id = params.task_id.as_str();
        if issue_id.is_empty() || task_id.is_empty() {
            return Err(CoordError::InvalidArgument(
                "issue_id and task_id are required".to_string(),
            ));
        }
        let verdict = Verdict::parse(&params.verdict).ok_or_else(|| {
            CoordError::InvalidArgument(format!("invalid verdict: {}", params.verdict))
        })?;
        if !matches!(params.completion_score, 1 | 2 | 5) {
            return Err(CoordError::InvalidArgument(format!(
                "invalid completion_score: {}",
                params.completion_score
            )));
        }
        trim_required("artifacts.review_summary", &params.review_summary)?;
        if params.reviewed_refs.is_empty() || params.feedback_details.is_empty() {
            return Err(CoordError::InvalidArgument(
                "artifacts.reviewed_refs and feedback_details are required".to_string(),
            ));
        }
        for (i, fd) in params.feedback_details.iter().enumerate() {
            trim_required(&format!("feedback_details[{i}].dimension"), &fd.dimension)?;
            trim_required(&format!("feedback_details[{i}].severity"), &fd.severity)?;
            trim_required(&format!("feedback_details[{i}].content"), &fd.content)?;
        }
        trim_required("next_step_token", &params.next_step_token)?;
        let actor = if actor.is_empty() { "lead" } else { actor };

        self.store.with_lock(|| {
            let tok_path = self.store.path(&[
                "issues",
                issue_id,
                "next_steps",
                &format!("{}.json", params.next_step_token),
            ]);
            let mut tok: NextStepToken = self
                .store
                .read_json(&tok_path)
                .map_err(|_| CoordError::TokenInvalid("invalid next_step_token".to_string()))?;
            if tok.issue_id != issue_id || tok.actor != actor || tok.used {
                return Err(CoordError::TokenInvalid("invalid next_step_token".to_string()));
            }
            if let NextStep::ClaimTask { task_id: reserved_id } = &tok.next_step {
                let reserved = self.load_task_locked(issue_id, reserved_id)?;
                let now = now_ms();
                if reserved.status != TaskStatus::Open
                    || reserved.reserved_token != tok.token
                    || (reserved.reserved_until_ms > 0 && now > reserved.reserved_until_ms)
                {
                    return Err(CoordError::TokenInvalid(format!(
                        "next_step task '{reserved_id}' is not reserved"
                    )));
                }
            }

            let mut task = self.load_task_locked(issue_id, task_id)?;
            let sub = self.resolve_submission_for_review(issue_id, task_id, &params.submission_id)?;
            let reviewed = self.review_submission_locked(
                issue_id,
                &sub.id,
                actor,
                verdict,
                &params.feedback,
                params.completion_score,
                &params.review_summary,
                &params.reviewed_refs,
                &params.feedback_details,
                &params.next_step_token,
            )?;
            self.ack_lead_inbox_by_ref_locked(issue_id, &sub.id);

            if !task.claimed_by.is_empty() {
                let item = self.push_to_worker_inbox_locked(
                    issue_id,
                    &task.claimed_by,
                    task_id,
                    InboxItemType::ReviewResult,
                    &sub.id,
                    actor,
                )?;
                // Approved workers usually end the conversation right away;
                // auto-ack so review_result items don't pile up.
                if verdict == Verdict::Approved {
                    let mut done = item;
                    done.status = InboxStatus::Done;
                    done.updated_at = now_rfc3339();
                    let _ = self.store.write_json(
                        &self.store.path(&[
                            "issues",
                            issue_id,
                            "inbox",
                            "workers",
                            &task.claimed_by,
                            &format!("{}.json", done.id),
                        ]),
                        &done,
                    );
                }
            }

            task.verdict = verdict.as_str().to_string();
            task.feedback = params.feedback.clone();
            task.completion_score = params.completion_score;
            task.review_artifacts = wg_core::model::ReviewArtifacts {
                review_summary: params.review_summary.clone(),
                reviewed_refs: params.reviewed_refs.clone(),
            };
            task.feedback_details = params.feedback_details.clone();
            task.next_step_token = params.next_step_token.clone();
            if verdict == Verdict::Approved {
                task.status = TaskStatus::Done;
                // Cache the approved artifacts on the task; delivery
                // aggregation reads them without touching submissions.
                task.submitter = reviewed.worker_id.clone();
                task.submission_artifacts = reviewed.artifacts.clone();
            } else {
                task.status = TaskStatus::InProgress;
            }
            task.updated_at = now_rfc3339();
            self.write_task_locked(&task)?;

            tok.attached = true;
            tok.attached_at = now_rfc3339();
            self.store.write_json(&tok_path, &tok)?;

            let event_type = if verdict == Verdict::Approved {
                event::ISSUE_TASK_RESOLVED
            } else {
                event::ISSUE_TASK_REVIEWED
            };
            self.append_event_locked(
                issue_id,
                IssueEvent {
                    event_type: event_type.to_string(),
                    issue_id: issue_id.to_string(),
                    task_id: task.id.clone(),
                    actor: actor.to_string(),
                    detail: verdict.as_str().to_string(),
                    submission_id: sub.id.clone(),
                    review_artifacts: Some(task.review_artifacts.clone()),
                    feedback_details: params.feedback_details.clone(),
                    completion_score: params.completion_score,
                    next_step: Some(tok.next_step.clone()),
                    next_step_token: params.next_step_token.clone(),
                    timestamp: now_rfc3339(),
                    ..IssueEvent::default()
                },
            )?;
            Ok(task)
        })
    }

    pub fn get_task(&self, issue_id: &str, task_id: &str) -> Result<IssueTask> {
        if issue_id.is_empty() || task_id.is_empty() {
            return Err(CoordError::InvalidArgument(
                "issue_id and task_id are required".to_string(),
            ));
        }
        self.sweep_expired();
        self.store.with_lock(|| self.load_task_locked(issue_id, task_id))
    }

    pub fn list_tasks(&self, issue_id: &str, status: Option<TaskStatus>) -> Result<Vec<IssueTask>> {
        if issue_id.is_empty() {
            return Err(CoordError::InvalidArgument("issue_id is required".to_string()));
        }
        self.sweep_expired();
        self.list_tasks_unswept(issue_id, status)
    }

    pub(crate) fn list_tasks_unswept(
        &self,
        issue_id: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<IssueTask>> {
        let dir = self.store.path(&["issues", issue_id, "tasks"]);
        let mut tasks = Vec::new();
        for path in self.store.list_json_files(&dir)? {
            let Ok(task) = self.store.read_json::<IssueTask>(&path) else {
                continue;
            };
            if let Some(want) = status {
                if task.status != want {
                    continue;
                }
            }
            tasks.push(task);
        }
        Ok(tasks)
    }

    pub fn count_tasks(&self, issue_id: &str) -> Result<i64> {
        if issue_id.is_empty() {
            return Err(CoordError::InvalidArgument("issue_id is required".to_string()));
        }
        if !self.store.exists(&["issues", issue_id, "issue.json"]) {
            return Err(CoordError::NotFound(format!("issue '{issue_id}' not found")));
        }
        let dir = self.store.path(&["issues", issue_id, "tasks"]);
        Ok(self.store.list_json_files(&dir)?.len() as i64)
    }

    /// Long-poll until at least one task matching `status` exists under
    /// the issue; empty vec on timeout.
    pub fn wait_issue_tasks(
        &self,
        issue_id: &str,
        status: TaskStatus,
        timeout_sec: i64,
        limit: usize,
    ) -> Result<Vec<IssueTask>> {
        if issue_id.is_empty() {
            return Err(CoordError::InvalidArgument("issue_id is required".to_string()));
        }
        let timeout_sec = self.normalize_timeout(timeout_sec);
        let limit = if limit == 0 { 50 } else { limit };
        let deadline = Deadline::after_secs(timeout_sec);
        loop {
            self.sweep_expired();
            let mut tasks = self.list_tasks_unswept(issue_id, Some(status))?;
            if !tasks.is_empty() {
                tasks.truncate(limit);
                return Ok(tasks);
            }
            if deadline.expired() {
                return Ok(Vec::new());
            }
            deadline.sleep_poll();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn render_spec_markdown(
    split_from: &str,
    split_reason: &str,
    impact_scope: &str,
    context_task_ids: &[String],
    goal: &str,
    rules: &str,
    constraints: &str,
    conventions: &str,
    acceptance: &str,
) -> String {
    [
        "# Spec",
        "",
        "## Split From",
        split_from,
        "",
        "## Split Reason",
        split_reason,
        "",
        "## Impact Scope",
        impact_scope,
        "",
        "## Context Tasks",
        &context_task_ids.join("\n"),
        "",
        "## Goal",
        goal,
        "",
        "## Rules",
        rules,
        "",
        "## Constraints",
        constraints,
        "",
        "## Conventions",
        conventions,
        "",
        "## Acceptance Criteria",
        acceptance,
        "",
    ]
    .join("\n")
}
