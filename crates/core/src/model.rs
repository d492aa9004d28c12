#![forbid(unsafe_code)]

//! Entity model for a coordination root.
//!
//! Every entity is persisted as an indented-JSON document under the data
//! root (see the storage crate for the layout). Statuses and kinds are
//! closed enumerations: adding a variant is a schema change, so all
//! matching is exhaustive. String timestamps are RFC3339 UTC; `*_ms`
//! fields are unix milliseconds.

use serde::{Deserialize, Serialize};

// --- status and kind enumerations -----------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    #[default]
    Open,
    InProgress,
    Done,
    Canceled,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Canceled)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Open,
    InProgress,
    Blocked,
    Done,
    Canceled,
    /// Pre-submission-entity roots persisted this; never written anymore,
    /// still accepted so the expiry sweep can recover old tasks.
    Submitted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Done => "done",
            Self::Canceled => "canceled",
            Self::Submitted => "submitted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "blocked" => Some(Self::Blocked),
            "done" => Some(Self::Done),
            "canceled" => Some(Self::Canceled),
            "submitted" => Some(Self::Submitted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Focus,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Focus => "focus",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "easy" => Some(Self::Easy),
            "medium" => Some(Self::Medium),
            "focus" => Some(Self::Focus),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    Rejected,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    #[default]
    Open,
    Approved,
    Rejected,
    /// A newer submission superseded this one before it was reviewed.
    Obsolete,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Obsolete => "obsolete",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Question,
    Blocker,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::Blocker => "blocker",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "question" => Some(Self::Question),
            "blocker" => Some(Self::Blocker),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    #[default]
    Open,
    Replied,
    Resolved,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Replied => "replied",
            Self::Resolved => "resolved",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    #[default]
    Open,
    InReview,
    Approved,
    Rejected,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InReview => "in_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "in_review" => Some(Self::InReview),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboxItemType {
    #[default]
    Submission,
    Question,
    Blocker,
    Delivery,
    Reply,
    ReviewResult,
}

impl InboxItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submission => "submission",
            Self::Question => "question",
            Self::Blocker => "blocker",
            Self::Delivery => "delivery",
            Self::Reply => "reply",
            Self::ReviewResult => "review_result",
        }
    }
}

impl From<MessageKind> for InboxItemType {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Question => Self::Question,
            MessageKind::Blocker => Self::Blocker,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboxStatus {
    #[default]
    Pending,
    Processing,
    Done,
}

/// Capability minted at review time: either the worker is finished with
/// this issue, or one specific open task is reserved for them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NextStep {
    #[default]
    End,
    ClaimTask {
        task_id: String,
    },
}

// --- event type names ------------------------------------------------------

/// Issue event log `type` values.
pub mod event {
    pub const ISSUE_CREATED: &str = "issue_created";
    pub const ISSUE_UPDATED: &str = "issue_updated";
    pub const ISSUE_CLOSED: &str = "issue_closed";
    pub const ISSUE_REOPENED: &str = "issue_reopened";
    pub const ISSUE_EXPIRED: &str = "issue_expired";
    pub const ISSUE_TASK_CREATED: &str = "issue_task_created";
    pub const ISSUE_TASK_CLAIMED: &str = "issue_task_claimed";
    pub const ISSUE_TASK_EXPIRED: &str = "issue_task_expired";
    pub const ISSUE_TASK_REVIEWED: &str = "issue_task_reviewed";
    pub const ISSUE_TASK_RESOLVED: &str = "issue_task_resolved";
    pub const ISSUE_TASK_MESSAGE: &str = "issue_task_message";
    pub const ISSUE_TASK_RESET: &str = "issue_task_reset";
    pub const SUBMISSION_CREATED: &str = "submission_created";
}

/// Trace audit sink `type` values.
pub mod trace_event {
    pub const WORKER_REGISTERED: &str = "worker_registered";
    pub const LOCK_ACQUIRED: &str = "lock_acquired";
    pub const LOCK_RELEASED: &str = "lock_released";
    pub const LOCK_HEARTBEAT: &str = "lock_heartbeat";
    pub const LOCK_EXPIRED: &str = "lock_expired";
    pub const LOCK_FORCED: &str = "lock_forced";
    pub const LOCK_FAILED: &str = "lock_failed";
}

// --- entities --------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocRef {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Issue {
    pub id: String,
    pub subject: String,
    pub description: String,
    pub shared_doc_paths: Vec<String>,
    pub project_doc_paths: Vec<String>,
    pub docs: Vec<DocRef>,
    pub status: IssueStatus,
    pub lease_expires_at_ms: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionArtifacts {
    pub summary: String,
    pub changed_files: Vec<String>,
    pub diff: String,
    pub links: Vec<String>,
    pub test_cases: Vec<String>,
    pub test_result: String,
    pub test_output: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewArtifacts {
    pub review_summary: String,
    pub reviewed_refs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackDetail {
    pub dimension: String,
    pub severity: String,
    pub file_path: String,
    pub line_range: String,
    pub content: String,
    pub suggestion: String,
}

/// A claimable unit of work under an issue. Ids are `task-<n>` with `n`
/// allocated gaplessly from the issue's `meta.next_task_num`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueTask {
    pub id: String,
    pub issue_id: String,
    pub subject: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub split_from: String,
    pub split_reason: String,
    pub impact_scope: String,
    pub context_task_ids: Vec<String>,
    pub suggested_files: Vec<String>,
    pub labels: Vec<String>,
    pub doc_paths: Vec<String>,
    pub required_issue_docs: Vec<String>,
    pub required_task_docs: Vec<String>,
    pub task_docs: Vec<DocRef>,
    pub points: i64,
    pub status: TaskStatus,
    pub reserved_token: String,
    pub reserved_until_ms: i64,
    pub lease_expires_at_ms: i64,
    pub claimed_by: String,
    pub submitter: String,
    pub refs: String,
    pub submission_artifacts: SubmissionArtifacts,
    pub verdict: String,
    pub feedback: String,
    pub completion_score: i64,
    pub review_artifacts: ReviewArtifacts,
    pub feedback_details: Vec<FeedbackDetail>,
    pub next_step_token: String,
    pub created_at: String,
    pub updated_at: String,
}

impl IssueTask {
    /// Wipe every field written by claim/submit/review, returning the task
    /// to the shape it had right after creation.
    pub fn clear_execution_state(&mut self) {
        self.status = TaskStatus::Open;
        self.lease_expires_at_ms = 0;
        self.claimed_by = String::new();
        self.submitter = String::new();
        self.refs = String::new();
        self.submission_artifacts = SubmissionArtifacts::default();
        self.verdict = String::new();
        self.feedback = String::new();
        self.completion_score = 0;
        self.review_artifacts = ReviewArtifacts::default();
        self.feedback_details = Vec::new();
    }
}

/// A work product attached to a task. Reviewing a submission, not
/// submitting it, is what moves the task to `done`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Submission {
    pub id: String,
    pub issue_id: String,
    pub task_id: String,
    pub worker_id: String,
    pub artifacts: SubmissionArtifacts,
    pub status: SubmissionStatus,
    pub feedback: String,
    pub review_artifacts: ReviewArtifacts,
    pub feedback_details: Vec<FeedbackDetail>,
    pub completion_score: i64,
    pub next_step_token: String,
    pub reviewed_by: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Worker↔lead Q&A thread entity with its own state machine so both sides
/// can track resolution independently of the task state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskMessage {
    pub id: String,
    pub issue_id: String,
    pub task_id: String,
    pub sender_id: String,
    pub kind: MessageKind,
    pub content: String,
    pub refs: String,
    pub status: MessageStatus,
    pub reply_content: String,
    pub reply_by: String,
    pub replied_at: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Reliable delivery unit in the lead/worker/acceptor inbox queues.
/// A successful claim holds the item in `processing` for at most the claim
/// TTL; the next sweep returns stalled items to `pending`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InboxItem {
    pub id: String,
    pub issue_id: String,
    pub task_id: String,
    #[serde(rename = "type")]
    pub item_type: InboxItemType,
    pub ref_id: String,
    pub sender_id: String,
    pub target: String,
    pub status: InboxStatus,
    pub claimed_by: String,
    pub claim_expires_at_ms: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Worker {
    pub id: String,
    pub joined_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryArtifacts {
    pub test_result: String,
    pub test_cases: Vec<String>,
    pub changed_files: Vec<String>,
    pub reviewed_refs: Vec<String>,
    pub test_output: String,
    pub known_risks: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandResult {
    pub command: String,
    pub passed: bool,
    pub exit_code: i64,
    pub output: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TestEvidence {
    pub script_path: String,
    pub script_cmd: String,
    pub script_passed: bool,
    pub script_result: String,
    pub doc_path: String,
    pub doc_commands: Vec<String>,
    pub doc_results: Vec<CommandResult>,
    pub doc_passed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Verification {
    pub script_passed: bool,
    pub script_result: String,
    pub doc_passed: bool,
    pub doc_results: Vec<CommandResult>,
}

/// Lead-to-acceptor packaging of an issue's completed work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Delivery {
    pub id: String,
    pub issue_id: String,
    pub summary: String,
    pub refs: String,
    pub artifacts: DeliveryArtifacts,
    pub test_evidence: TestEvidence,
    pub verification: Verification,
    pub status: DeliveryStatus,
    pub delivered_by: String,
    pub claimed_by: String,
    pub reviewed_by: String,
    pub feedback: String,
    pub delivered_at: String,
    pub claimed_at: String,
    pub reviewed_at: String,
    pub lease_expires_at_ms: i64,
    pub updated_at: String,
}

/// Time-bounded claim over a set of files; `files` is cleaned and sorted,
/// and that sort order is the canonical acquisition order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Lease {
    pub lease_id: String,
    pub owner: String,
    pub task_id: String,
    pub files: Vec<String>,
    pub acquired_at: String,
    pub expires_at: String,
    pub last_heartbeat: String,
}

/// Per-file projection of a lease, stored under the hashed cleaned path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLock {
    pub lease_id: String,
    pub owner: String,
    pub task_id: String,
    pub file: String,
    pub acquired_at: String,
    pub expires_at: String,
    pub last_heartbeat: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NextStepToken {
    pub token: String,
    pub issue_id: String,
    pub actor: String,
    pub next_step: NextStep,
    pub attached: bool,
    pub attached_at: String,
    pub used: bool,
    pub created_at: String,
    pub used_at: String,
}

/// Per-issue scoring state feeding the difficulty tiering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueWorkerState {
    pub issue_id: String,
    pub worker_id: String,
    pub total_points: i64,
    pub consecutive_low_scores: i64,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub actor: String,
    pub subject: String,
    pub detail: String,
    pub timestamp: String,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

fn is_empty(s: &String) -> bool {
    s.is_empty()
}

/// One row of an issue's append-only `events.jsonl`. `seq` is allocated
/// from `meta.next_seq` under the global lock; it is strictly increasing
/// within an issue and never rewound (task reset filters rows out but
/// keeps the counter).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueEvent {
    pub seq: i64,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub parent_seq: i64,
    pub issue_id: String,
    pub task_id: String,
    pub actor: String,
    pub kind: String,
    pub detail: String,
    pub refs: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub submission_id: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_artifacts: Option<DeliveryArtifacts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_artifacts: Option<SubmissionArtifacts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_artifacts: Option<ReviewArtifacts>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub feedback_details: Vec<FeedbackDetail>,
    #[serde(skip_serializing_if = "is_zero")]
    pub completion_score: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_step: Option<NextStep>,
    #[serde(skip_serializing_if = "is_empty")]
    pub next_step_token: String,
    pub timestamp: String,
}

/// Per-issue counters: `next_seq` for the event log, `next_task_num` for
/// `task-<n>` allocation. Both start at 1 and only move forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueMeta {
    pub next_seq: i64,
    pub next_task_num: i64,
}

impl Default for IssueMeta {
    fn default() -> Self {
        Self {
            next_seq: 1,
            next_task_num: 1,
        }
    }
}

/// Legacy event-scan cursor, kept for compatibility with older tooling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventCursor {
    pub after_seq: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_round_trip_as_snake_case() {
        let s = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(s, "\"in_progress\"");
        let back: TaskStatus = serde_json::from_str("\"blocked\"").unwrap();
        assert_eq!(back, TaskStatus::Blocked);
        assert_eq!(TaskStatus::parse("submitted"), Some(TaskStatus::Submitted));
    }

    #[test]
    fn next_step_serializes_as_tagged_union() {
        let end = serde_json::to_value(NextStep::End).unwrap();
        assert_eq!(end, serde_json::json!({"type": "end"}));
        let claim = serde_json::to_value(NextStep::ClaimTask {
            task_id: "task-2".to_string(),
        })
        .unwrap();
        assert_eq!(
            claim,
            serde_json::json!({"type": "claim_task", "task_id": "task-2"})
        );
    }

    #[test]
    fn issue_task_tolerates_missing_fields() {
        let task: IssueTask =
            serde_json::from_str(r#"{"id": "task-1", "status": "open"}"#).unwrap();
        assert_eq!(task.id, "task-1");
        assert_eq!(task.status, TaskStatus::Open);
        assert!(task.claimed_by.is_empty());
        assert_eq!(task.points, 0);
    }

    #[test]
    fn inbox_item_type_field_uses_wire_name() {
        let item = InboxItem {
            item_type: InboxItemType::ReviewResult,
            ..InboxItem::default()
        };
        let v = serde_json::to_value(&item).unwrap();
        assert_eq!(v["type"], "review_result");
    }

    #[test]
    fn meta_defaults_start_counters_at_one() {
        let meta: IssueMeta = serde_json::from_str("{}").unwrap();
        assert_eq!(meta.next_seq, 1);
        assert_eq!(meta.next_task_num, 1);
    }
}
