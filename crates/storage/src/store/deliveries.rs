#![forbid(unsafe_code)]

//! Delivery lifecycle: the lead packages a finished issue for the
//! acceptor. Creation requires every task done, a changed-files superset
//! of the approved work, and full test evidence; review requires the
//! verification results to line up with that evidence command-for-command.

use std::collections::BTreeSet;

use serde_json::{Value, json};
use wg_core::model::{
    Delivery, DeliveryArtifacts, DeliveryStatus, TaskStatus, TestEvidence, Verification,
};
use wg_core::{gen_id, now_ms, now_rfc3339};

use crate::{CoordError, Result};

use super::IssueService;
use super::support::{Deadline, trim_required};

#[derive(Debug, Clone, Default)]
pub struct DeliveryFilter {
    pub status: String,
    pub issue_id: String,
    pub delivered_by: String,
    pub reviewed_by: String,
}

impl IssueService {
    /// Create a delivery in `open` and push it to the acceptor inbox.
    pub fn create_delivery(
        &self,
        actor: &str,
        issue_id: &str,
        summary: &str,
        refs: &str,
        artifacts: DeliveryArtifacts,
        test_evidence: TestEvidence,
    ) -> Result<Delivery> {
        if issue_id.is_empty() {
            return Err(CoordError::InvalidArgument("issue_id is required".to_string()));
        }
        let actor = if actor.is_empty() { "lead" } else { actor };
        let summary = trim_required("summary", summary)?;
        if artifacts.test_result != "passed" && artifacts.test_result != "failed" {
            return Err(CoordError::InvalidArgument(
                "artifacts.test_result must be 'passed' or 'failed'".to_string(),
            ));
        }
        if artifacts.test_cases.is_empty() {
            return Err(CoordError::InvalidArgument(
                "artifacts.test_cases is required".to_string(),
            ));
        }
        if artifacts.changed_files.is_empty() {
            return Err(CoordError::InvalidArgument(
                "artifacts.changed_files is required".to_string(),
            ));
        }
        if artifacts.reviewed_refs.is_empty() {
            return Err(CoordError::InvalidArgument(
                "artifacts.reviewed_refs is required".to_string(),
            ));
        }
        validate_test_evidence(&test_evidence)?;

        let tasks = self.list_tasks(issue_id, None)?;
        let not_done: Vec<String> = tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Done)
            .map(|t| format!("{}:{}", t.id, t.status.as_str()))
            .collect();
        if !not_done.is_empty() {
            return Err(CoordError::Precondition(format!(
                "cannot deliver issue: tasks not done: {}",
                not_done.join(", ")
            )));
        }

        // The delivery must cover at least the union of files the approved
        // submissions touched; fewer means something was dropped.
        let mut changed_union: BTreeSet<&str> = BTreeSet::new();
        for task in &tasks {
            for f in &task.submission_artifacts.changed_files {
                let f = f.trim();
                if !f.is_empty() {
                    changed_union.insert(f);
                }
            }
        }
        if artifacts.changed_files.len() < changed_union.len() {
            return Err(CoordError::InvalidArgument(
                "artifacts.changed_files is insufficient; please review and include all changed files"
                    .to_string(),
            ));
        }

        self.sweep_expired();
        self.store.with_lock(|| {
            if !self.store.exists(&["issues", issue_id, "issue.json"]) {
                return Err(CoordError::NotFound(format!("issue '{issue_id}' not found")));
            }
            let delivery = Delivery {
                id: gen_id("delivery"),
                issue_id: issue_id.to_string(),
                summary: summary.clone(),
                refs: refs.trim().to_string(),
                artifacts: artifacts.clone(),
                test_evidence: test_evidence.clone(),
                status: DeliveryStatus::Open,
                delivered_by: actor.to_string(),
                delivered_at: now_rfc3339(),
                updated_at: now_rfc3339(),
                ..Delivery::default()
            };
            self.store.write_json(
                &self.store.path(&["deliveries", &format!("{}.json", delivery.id)]),
                &delivery,
            )?;
            self.push_to_acceptor_inbox_locked(issue_id, &delivery.id, actor)?;
            Ok(delivery)
        })
    }

    pub fn get_delivery(&self, delivery_id: &str) -> Result<Delivery> {
        if delivery_id.is_empty() {
            return Err(CoordError::InvalidArgument("delivery_id is required".to_string()));
        }
        self.store
            .read_json(&self.store.path(&["deliveries", &format!("{delivery_id}.json")]))
            .map_err(|_| CoordError::NotFound(format!("delivery '{delivery_id}' not found")))
    }

    /// Filtered listing, newest first by `delivered_at`. Status "" / "all"
    /// means no status filter.
    pub fn list_deliveries(&self, filter: &DeliveryFilter) -> Result<Vec<Delivery>> {
        self.sweep_expired();
        self.list_deliveries_unswept(filter)
    }

    fn list_deliveries_unswept(&self, filter: &DeliveryFilter) -> Result<Vec<Delivery>> {
        let status = filter.status.trim().to_lowercase();
        let want_status = match status.as_str() {
            "" | "all" => None,
            other => Some(DeliveryStatus::parse(other).ok_or_else(|| {
                CoordError::InvalidArgument(format!("invalid status: {other}"))
            })?),
        };
        let dir = self.store.path(&["deliveries"]);
        let mut out = Vec::new();
        for path in self.store.list_json_files(&dir)? {
            let Ok(d) = self.store.read_json::<Delivery>(&path) else {
                continue;
            };
            if let Some(want) = want_status {
                if d.status != want {
                    continue;
                }
            }
            if !filter.issue_id.trim().is_empty() && d.issue_id != filter.issue_id.trim() {
                continue;
            }
            if !filter.delivered_by.trim().is_empty() && d.delivered_by != filter.delivered_by.trim()
            {
                continue;
            }
            if !filter.reviewed_by.trim().is_empty() && d.reviewed_by != filter.reviewed_by.trim() {
                continue;
            }
            out.push(d);
        }
        out.sort_by(|a, b| b.delivered_at.cmp(&a.delivered_at));
        Ok(out)
    }

    /// Atomically take an open delivery into review with a lease. The
    /// lease never undercuts `default_timeout_sec`, so the review window
    /// always outlasts the delivering side's blocking wait granularity.
    pub fn claim_delivery(&self, actor: &str, delivery_id: &str, extend_sec: i64) -> Result<Delivery> {
        if delivery_id.is_empty() {
            return Err(CoordError::InvalidArgument("delivery_id is required".to_string()));
        }
        let actor = if actor.is_empty() { "acceptor" } else { actor };
        self.sweep_expired();
        self.store
            .with_lock(|| self.claim_delivery_locked(actor, delivery_id, extend_sec))
    }

    pub(crate) fn claim_delivery_locked(
        &self,
        actor: &str,
        delivery_id: &str,
        extend_sec: i64,
    ) -> Result<Delivery> {
        let path = self.store.path(&["deliveries", &format!("{delivery_id}.json")]);
        let mut d: Delivery = self
            .store
            .read_json(&path)
            .map_err(|_| CoordError::NotFound(format!("delivery '{delivery_id}' not found")))?;
        if d.status != DeliveryStatus::Open {
            return Err(CoordError::Precondition(format!(
                "delivery '{delivery_id}' is not open (status: {})",
                d.status.as_str()
            )));
        }
        d.status = DeliveryStatus::InReview;
        d.claimed_by = actor.to_string();
        d.claimed_at = now_rfc3339();
        d.lease_expires_at_ms = now_ms() + self.review_lease_sec(extend_sec) * 1000;
        d.updated_at = now_rfc3339();
        self.store.write_json(&path, &d)?;
        Ok(d)
    }

    pub fn extend_delivery_lease(
        &self,
        actor: &str,
        delivery_id: &str,
        extend_sec: i64,
    ) -> Result<Delivery> {
        if delivery_id.is_empty() {
            return Err(CoordError::InvalidArgument("delivery_id is required".to_string()));
        }
        let actor = if actor.is_empty() { "acceptor" } else { actor };
        self.sweep_expired();
        self.store.with_lock(|| {
            let path = self.store.path(&["deliveries", &format!("{delivery_id}.json")]);
            let mut d: Delivery = self
                .store
                .read_json(&path)
                .map_err(|_| CoordError::NotFound(format!("delivery '{delivery_id}' not found")))?;
            if d.status != DeliveryStatus::InReview {
                return Err(CoordError::Precondition(format!(
                    "delivery '{delivery_id}' is not in_review (status: {})",
                    d.status.as_str()
                )));
            }
            if d.claimed_by != actor {
                return Err(CoordError::Precondition(format!(
                    "delivery '{delivery_id}' is not claimed by actor"
                )));
            }
            d.lease_expires_at_ms = now_ms() + self.review_lease_sec(extend_sec) * 1000;
            d.updated_at = now_rfc3339();
            self.store.write_json(&path, &d)?;
            Ok(d)
        })
    }

    fn review_lease_sec(&self, extend_sec: i64) -> i64 {
        let mut ttl = if extend_sec > 0 {
            extend_sec
        } else {
            self.cfg.issue_ttl_sec
        };
        if ttl <= 0 {
            ttl = self.cfg.default_timeout_sec;
        }
        ttl.max(self.cfg.default_timeout_sec)
    }

    /// Resolve an in-review delivery. Only the claimer may review, and the
    /// supplied verification must align 1:1 with the stored evidence's
    /// doc commands.
    pub fn review_delivery(
        &self,
        actor: &str,
        delivery_id: &str,
        verdict: &str,
        feedback: &str,
        refs: &str,
        verification: Verification,
    ) -> Result<Delivery> {
        if delivery_id.is_empty() {
            return Err(CoordError::InvalidArgument("delivery_id is required".to_string()));
        }
        let verdict = verdict.trim().to_lowercase();
        let status = match verdict.as_str() {
            "approved" => DeliveryStatus::Approved,
            "rejected" => DeliveryStatus::Rejected,
            other => {
                return Err(CoordError::InvalidArgument(format!("invalid verdict: {other}")));
            }
        };
        let actor = if actor.is_empty() { "acceptor" } else { actor };
        self.sweep_expired();

        let reviewed = self.store.with_lock(|| {
            let path = self.store.path(&["deliveries", &format!("{delivery_id}.json")]);
            let mut d: Delivery = self
                .store
                .read_json(&path)
                .map_err(|_| CoordError::NotFound(format!("delivery '{delivery_id}' not found")))?;
            if d.status != DeliveryStatus::InReview {
                return Err(CoordError::Precondition(format!(
                    "delivery '{delivery_id}' is not in_review (status: {})",
                    d.status.as_str()
                )));
            }
            if d.claimed_by != actor {
                return Err(CoordError::Precondition(format!(
                    "delivery '{delivery_id}' is not claimed by actor"
                )));
            }

            if verification.doc_results.len() != d.test_evidence.doc_commands.len() {
                return Err(CoordError::InvalidArgument(format!(
                    "verification.doc_results must align with test_evidence.doc_commands ({} vs {})",
                    verification.doc_results.len(),
                    d.test_evidence.doc_commands.len()
                )));
            }
            for (i, (result, command)) in verification
                .doc_results
                .iter()
                .zip(d.test_evidence.doc_commands.iter())
                .enumerate()
            {
                if result.command.trim() != command.trim() {
                    return Err(CoordError::InvalidArgument(format!(
                        "verification.doc_results[{i}].command does not match test_evidence.doc_commands[{i}]"
                    )));
                }
            }

            d.status = status;
            d.verification = verification.clone();
            d.reviewed_by = actor.to_string();
            d.reviewed_at = now_rfc3339();
            let feedback = feedback.trim();
            if !feedback.is_empty() {
                d.feedback = feedback.to_string();
            }
            let refs = refs.trim();
            if !refs.is_empty() {
                d.refs = format!("{}\n{refs}", d.refs.trim()).trim().to_string();
            }
            d.updated_at = now_rfc3339();
            self.store.write_json(&path, &d)?;
            self.ack_acceptor_inbox_by_delivery_locked(&d.id);
            Ok(d)
        })?;
        Ok(reviewed)
    }

    /// Acceptor long-poll with claim semantics: claim one pending acceptor
    /// inbox item, then claim its delivery into review. Items whose
    /// delivery is already taken (or gone) are marked done and skipped.
    /// Returns the claimed delivery, already `in_review`.
    pub fn wait_deliveries(&self, actor: &str, timeout_sec: i64) -> Result<Vec<Delivery>> {
        let actor = if actor.is_empty() { "acceptor" } else { actor };
        let timeout_sec = self.normalize_timeout(timeout_sec);
        let deadline = Deadline::after_secs(timeout_sec);
        loop {
            self.sweep_expired();
            let claimed = self.store.with_lock(|| {
                loop {
                    let Some(item) = self.claim_acceptor_inbox_item_locked(actor)? else {
                        return Ok(None);
                    };
                    match self.claim_delivery_locked(actor, &item.ref_id, 0) {
                        Ok(delivery) => return Ok(Some(delivery)),
                        Err(_) => {
                            // Already in review elsewhere or deleted; this
                            // item carries no more work.
                            let mut done = item;
                            done.status = wg_core::model::InboxStatus::Done;
                            done.updated_at = now_rfc3339();
                            let _ = self.store.write_json(
                                &self.store.path(&[
                                    "deliveries",
                                    "inbox",
                                    "acceptor",
                                    &format!("{}.json", done.id),
                                ]),
                                &done,
                            );
                        }
                    }
                }
            })?;
            if let Some(delivery) = claimed {
                return Ok(vec![delivery]);
            }
            if deadline.expired() {
                return Ok(Vec::new());
            }
            deadline.sleep_poll();
        }
    }

    fn wait_delivery_reviewed(&self, delivery_id: &str, timeout_sec: i64) -> Result<Delivery> {
        let deadline = Deadline::after_secs(self.normalize_timeout(timeout_sec));
        loop {
            self.sweep_expired();
            let d = self.get_delivery(delivery_id)?;
            if matches!(d.status, DeliveryStatus::Approved | DeliveryStatus::Rejected) {
                return Ok(d);
            }
            if deadline.expired() {
                return Err(CoordError::Timeout(
                    "timeout waiting for delivery review".to_string(),
                ));
            }
            deadline.sleep_poll();
        }
    }

    /// Create the delivery and block until the acceptor resolves it.
    pub fn submit_delivery(
        &self,
        actor: &str,
        issue_id: &str,
        summary: &str,
        refs: &str,
        artifacts: DeliveryArtifacts,
        test_evidence: TestEvidence,
        timeout_sec: i64,
    ) -> Result<Value> {
        let timeout_sec = self.normalize_timeout(timeout_sec);
        let delivery =
            self.create_delivery(actor, issue_id, summary, refs, artifacts, test_evidence)?;
        let reviewed = self.wait_delivery_reviewed(&delivery.id, timeout_sec)?;
        Ok(json!({
            "delivery": delivery,
            "reviewed": reviewed,
            "delivery_id": delivery.id,
        }))
    }
}

fn validate_test_evidence(evidence: &TestEvidence) -> Result<()> {
    trim_required("test_evidence.script_path", &evidence.script_path)?;
    trim_required("test_evidence.script_cmd", &evidence.script_cmd)?;
    trim_required("test_evidence.script_result", &evidence.script_result)?;
    trim_required("test_evidence.doc_path", &evidence.doc_path)?;
    if evidence.doc_commands.is_empty() {
        return Err(CoordError::InvalidArgument(
            "test_evidence.doc_commands is required".to_string(),
        ));
    }
    if evidence.doc_results.len() != evidence.doc_commands.len() {
        return Err(CoordError::InvalidArgument(format!(
            "test_evidence.doc_results must align with doc_commands ({} vs {})",
            evidence.doc_results.len(),
            evidence.doc_commands.len()
        )));
    }
    for (i, (result, command)) in evidence
        .doc_results
        .iter()
        .zip(evidence.doc_commands.iter())
        .enumerate()
    {
        if result.command.trim() != command.trim() {
            return Err(CoordError::InvalidArgument(format!(
                "test_evidence.doc_results[{i}].command does not match doc_commands[{i}]"
            )));
        }
    }
    Ok(())
}
