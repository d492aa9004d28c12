#![forbid(unsafe_code)]

//! Submission entities: one per submit, grouped per task under
//! `issues/<id>/submissions/<task_id>/`. A submission carries its own
//! approve/reject lifecycle; the submitting worker blocks on it.

use wg_core::model::{
    FeedbackDetail, ReviewArtifacts, Submission, SubmissionArtifacts, SubmissionStatus, Verdict,
};
use wg_core::{gen_id, now_rfc3339};

use crate::{CoordError, Result};

use super::IssueService;
use super::support::Deadline;

impl IssueService {
    pub(crate) fn create_submission_locked(
        &self,
        issue_id: &str,
        task_id: &str,
        worker_id: &str,
        artifacts: SubmissionArtifacts,
    ) -> Result<Submission> {
        let sub = Submission {
            id: gen_id("sub"),
            issue_id: issue_id.to_string(),
            task_id: task_id.to_string(),
            worker_id: worker_id.to_string(),
            artifacts,
            status: SubmissionStatus::Open,
            created_at: now_rfc3339(),
            updated_at: now_rfc3339(),
            ..Submission::default()
        };
        let path = self.store.path(&[
            "issues",
            issue_id,
            "submissions",
            task_id,
            &format!("{}.json", sub.id),
        ]);
        self.store.write_json(&path, &sub)?;
        Ok(sub)
    }

    /// Submission ids don't encode their task, so lookup scans the per-task
    /// subdirectories.
    pub(crate) fn get_submission_locked(
        &self,
        issue_id: &str,
        submission_id: &str,
    ) -> Result<Submission> {
        let tasks_dir = self.store.path(&["issues", issue_id, "submissions"]);
        for task_dir in self.store.list_dirs(&tasks_dir)? {
            let path = self.store.path(&[
                "issues",
                issue_id,
                "submissions",
                &task_dir,
                &format!("{submission_id}.json"),
            ]);
            if let Ok(sub) = self.store.read_json::<Submission>(&path) {
                return Ok(sub);
            }
        }
        Err(CoordError::NotFound(format!(
            "submission '{submission_id}' not found"
        )))
    }

    pub(crate) fn latest_open_submission_locked(
        &self,
        issue_id: &str,
        task_id: &str,
    ) -> Result<Submission> {
        let dir = self.store.path(&["issues", issue_id, "submissions", task_id]);
        let mut latest: Option<Submission> = None;
        for path in self.store.list_json_files(&dir)? {
            let Ok(sub) = self.store.read_json::<Submission>(&path) else {
                continue;
            };
            if sub.status != SubmissionStatus::Open {
                continue;
            }
            if latest.as_ref().is_none_or(|best| sub.created_at > best.created_at) {
                latest = Some(sub);
            }
        }
        latest.ok_or_else(|| {
            CoordError::NotFound(format!("no open submission for task '{task_id}'"))
        })
    }

    pub(crate) fn resolve_submission_for_review(
        &self,
        issue_id: &str,
        task_id: &str,
        submission_id: &str,
    ) -> Result<Submission> {
        if !submission_id.trim().is_empty() {
            return self.get_submission_locked(issue_id, submission_id.trim());
        }
        self.latest_open_submission_locked(issue_id, task_id)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn review_submission_locked(
        &self,
        issue_id: &str,
        submission_id: &str,
        actor: &str,
        verdict: Verdict,
        feedback: &str,
        completion_score: i64,
        review_summary: &str,
        reviewed_refs: &[String],
        feedback_details: &[FeedbackDetail],
        next_step_token: &str,
    ) -> Result<Submission> {
        let mut sub = self.get_submission_locked(issue_id, submission_id)?;
        if sub.status != SubmissionStatus::Open {
            return Err(CoordError::Precondition(format!(
                "submission '{submission_id}' is already {}",
                sub.status.as_str()
            )));
        }
        sub.status = match verdict {
            Verdict::Approved => SubmissionStatus::Approved,
            Verdict::Rejected => SubmissionStatus::Rejected,
        };
        sub.feedback = feedback.to_string();
        sub.review_artifacts = ReviewArtifacts {
            review_summary: review_summary.to_string(),
            reviewed_refs: reviewed_refs.to_vec(),
        };
        sub.feedback_details = feedback_details.to_vec();
        sub.completion_score = completion_score;
        sub.next_step_token = next_step_token.to_string();
        sub.reviewed_by = actor.to_string();
        sub.updated_at = now_rfc3339();

        let path = self.store.path(&[
            "issues",
            issue_id,
            "submissions",
            &sub.task_id,
            &format!("{}.json", sub.id),
        ]);
        self.store.write_json(&path, &sub)?;

        // Any sibling still open was superseded by this review.
        self.mark_task_submissions_obsolete_locked(issue_id, &sub.task_id, &sub.id);
        Ok(sub)
    }

    fn mark_task_submissions_obsolete_locked(&self, issue_id: &str, task_id: &str, except_id: &str) {
        let dir = self.store.path(&["issues", issue_id, "submissions", task_id]);
        for path in self.store.list_json_files(&dir).unwrap_or_default() {
            let Ok(mut sub) = self.store.read_json::<Submission>(&path) else {
                continue;
            };
            if sub.id == except_id || sub.status != SubmissionStatus::Open {
                continue;
            }
            sub.status = SubmissionStatus::Obsolete;
            sub.updated_at = now_rfc3339();
            let _ = self.store.write_json(&path, &sub);
        }
    }

    pub fn get_submission(&self, issue_id: &str, submission_id: &str) -> Result<Submission> {
        self.store
            .with_lock(|| self.get_submission_locked(issue_id, submission_id))
    }

    pub fn list_submissions(&self, issue_id: &str, task_id: &str) -> Result<Vec<Submission>> {
        let dir = self.store.path(&["issues", issue_id, "submissions", task_id]);
        let mut out = Vec::new();
        for path in self.store.list_json_files(&dir)? {
            if let Ok(sub) = self.store.read_json::<Submission>(&path) {
                out.push(sub);
            }
        }
        Ok(out)
    }

    pub(crate) fn delete_submissions_for_task_locked(&self, issue_id: &str, task_id: &str) {
        let dir = self.store.path(&["issues", issue_id, "submissions", task_id]);
        for path in self.store.list_json_files(&dir).unwrap_or_default() {
            let _ = self.store.remove(&path);
        }
        let _ = std::fs::remove_dir(&dir);
        let parent = self.store.path(&["issues", issue_id, "submissions"]);
        let _ = std::fs::remove_dir(&parent);
    }

    /// Poll until the submission leaves `open`; used by the blocking
    /// submit. Releases the global lock between iterations.
    pub(crate) fn poll_submission_status(
        &self,
        issue_id: &str,
        submission_id: &str,
        timeout_sec: i64,
    ) -> Result<Submission> {
        let deadline = Deadline::after_secs(self.normalize_timeout(timeout_sec));
        loop {
            let sub = self
                .store
                .with_lock(|| Ok(self.get_submission_locked(issue_id, submission_id).ok()))?;
            if let Some(sub) = sub {
                if sub.status != SubmissionStatus::Open {
                    return Ok(sub);
                }
            }
            if deadline.expired() {
                return Err(CoordError::Timeout(format!(
                    "timeout waiting for review of submission '{submission_id}'"
                )));
            }
            deadline.sleep_poll();
        }
    }
}
