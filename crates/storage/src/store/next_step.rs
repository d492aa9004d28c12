#![forbid(unsafe_code)]

//! Next-step tokens and difficulty tiering.
//!
//! After a task is finished, the lead mints a token that either ends the
//! worker's involvement or reserves one specific open task for them. The
//! tier logic scales difficulty with accumulated points and backs off
//! after consecutive low scores. Reservations expire after two minutes.

use wg_core::model::{
    Difficulty, IssueTask, IssueWorkerState, NextStep, NextStepToken, TaskStatus,
};
use wg_core::{gen_id, now_ms, now_rfc3339};

use crate::{CoordError, Result};

use super::IssueService;

const RESERVE_TTL_MS: i64 = 2 * 60 * 1000;
const BUFFER_LEVEL_1: i64 = 50;
const BUFFER_LEVEL_2: i64 = 100;

/// What `get_next_step_token` hands back to the lead.
#[derive(Debug, Clone)]
pub struct NextStepOutcome {
    pub token: String,
    pub next_step: NextStep,
    pub difficulty: Difficulty,
    pub worker_total_points: i64,
    pub consecutive_low_scores: i64,
}

fn downgrade(d: Difficulty) -> Difficulty {
    match d {
        Difficulty::Focus => Difficulty::Medium,
        Difficulty::Medium | Difficulty::Easy => Difficulty::Easy,
    }
}

fn base_difficulty_by_points(total: i64) -> Difficulty {
    if total >= 30 {
        Difficulty::Focus
    } else if total >= 10 {
        Difficulty::Medium
    } else {
        Difficulty::Easy
    }
}

fn fallback_order(d: Difficulty) -> &'static [Difficulty] {
    match d {
        Difficulty::Focus => &[Difficulty::Focus, Difficulty::Medium, Difficulty::Easy],
        Difficulty::Medium => &[Difficulty::Medium, Difficulty::Easy],
        Difficulty::Easy => &[Difficulty::Easy],
    }
}

/// Sort candidates points-desc then id-asc, then pick by tier: seasoned
/// workers (≥100 pts) take the biggest task, the 30..50 band takes the
/// smallest, everyone else the middle.
fn pick_by_tier(mut tasks: Vec<IssueTask>, total_points: i64) -> Option<IssueTask> {
    if tasks.is_empty() {
        return None;
    }
    tasks.sort_by(|a, b| b.points.cmp(&a.points).then_with(|| a.id.cmp(&b.id)));
    let idx = if total_points >= 100 {
        0
    } else if (30..50).contains(&total_points) {
        tasks.len() - 1
    } else {
        tasks.len() / 2
    };
    Some(tasks.swap_remove(idx))
}

impl IssueService {
    fn load_worker_state_locked(&self, issue_id: &str, worker_id: &str) -> IssueWorkerState {
        let path = self
            .store
            .path(&["issues", issue_id, "workers", &format!("{worker_id}.json")]);
        self.store
            .read_json::<IssueWorkerState>(&path)
            .unwrap_or_else(|_| IssueWorkerState {
                issue_id: issue_id.to_string(),
                worker_id: worker_id.to_string(),
                total_points: 0,
                consecutive_low_scores: 0,
                updated_at: now_rfc3339(),
            })
    }

    fn save_worker_state_locked(&self, state: &mut IssueWorkerState) -> Result<()> {
        state.updated_at = now_rfc3339();
        let path = self.store.path(&[
            "issues",
            &state.issue_id,
            "workers",
            &format!("{}.json", state.worker_id),
        ]);
        self.store.write_json(&path, state)
    }

    /// Score the finished task into the worker's per-issue state, pick the
    /// next task by difficulty tier (with fallback toward easier tiers),
    /// reserve it, and mint the token. With no candidate the token carries
    /// `end`.
    pub fn get_next_step_token(
        &self,
        issue_id: &str,
        actor: &str,
        just_finished_task_id: &str,
        worker_id: &str,
        completion_score: i64,
    ) -> Result<NextStepOutcome> {
        if issue_id.is_empty() || worker_id.is_empty() || just_finished_task_id.is_empty() {
            return Err(CoordError::InvalidArgument(
                "issue_id, task_id and worker_id are required".to_string(),
            ));
        }
        let actor = if actor.is_empty() { "lead" } else { actor };
        if !matches!(completion_score, 1 | 2 | 5) {
            return Err(CoordError::InvalidArgument(format!(
                "invalid completion_score: {completion_score}"
            )));
        }

        self.store.with_lock(|| {
            let mut state = self.load_worker_state_locked(issue_id, worker_id);
            let finished = self.load_task_locked(issue_id, just_finished_task_id)?;
            state.total_points += finished.points;

            let base = base_difficulty_by_points(state.total_points);
            let mut next_difficulty = base;

            if completion_score < 2 {
                state.consecutive_low_scores += 1;
                let allowed_failures = if state.total_points >= BUFFER_LEVEL_2 {
                    2
                } else if state.total_points >= BUFFER_LEVEL_1 {
                    1
                } else {
                    0
                };
                if state.consecutive_low_scores > allowed_failures {
                    next_difficulty = downgrade(base);
                }
            } else {
                state.consecutive_low_scores = 0;
            }

            self.save_worker_state_locked(&mut state)?;

            let mut chosen: Option<IssueTask> = None;
            for difficulty in fallback_order(next_difficulty) {
                let candidates: Vec<IssueTask> = self
                    .list_tasks_unswept(issue_id, Some(TaskStatus::Open))?
                    .into_iter()
                    .filter(|t| t.difficulty == *difficulty)
                    .collect();
                chosen = pick_by_tier(candidates, state.total_points);
                if chosen.is_some() {
                    break;
                }
            }

            let mut tok = NextStepToken {
                token: gen_id("ns"),
                issue_id: issue_id.to_string(),
                actor: actor.to_string(),
                next_step: NextStep::End,
                attached: false,
                used: false,
                created_at: now_rfc3339(),
                ..NextStepToken::default()
            };

            let Some(chosen) = chosen else {
                self.write_token_locked(issue_id, &tok)?;
                return Ok(NextStepOutcome {
                    token: tok.token,
                    next_step: NextStep::End,
                    difficulty: next_difficulty,
                    worker_total_points: state.total_points,
                    consecutive_low_scores: state.consecutive_low_scores,
                });
            };

            // Re-read before reserving: the candidate scan is advisory.
            let now = now_ms();
            let mut live = self.load_task_locked(issue_id, &chosen.id)?;
            if live.status != TaskStatus::Open {
                return Err(CoordError::Precondition(format!(
                    "next_step task '{}' is not open (status: {})",
                    live.id,
                    live.status.as_str()
                )));
            }
            if !live.reserved_token.is_empty()
                && live.reserved_until_ms > 0
                && now <= live.reserved_until_ms
            {
                return Err(CoordError::Precondition(format!(
                    "next_step task '{}' is reserved",
                    live.id
                )));
            }

            tok.next_step = NextStep::ClaimTask {
                task_id: live.id.clone(),
            };
            self.write_token_locked(issue_id, &tok)?;

            live.reserved_token = tok.token.clone();
            live.reserved_until_ms = now + RESERVE_TTL_MS;
            live.updated_at = now_rfc3339();
            self.write_task_locked(&live)?;

            Ok(NextStepOutcome {
                token: tok.token,
                next_step: tok.next_step,
                difficulty: next_difficulty,
                worker_total_points: state.total_points,
                consecutive_low_scores: state.consecutive_low_scores,
            })
        })
    }

    pub fn read_next_step_token(&self, issue_id: &str, token: &str) -> Result<NextStepToken> {
        if issue_id.is_empty() || token.is_empty() {
            return Err(CoordError::InvalidArgument(
                "issue_id and token are required".to_string(),
            ));
        }
        self.store.with_lock(|| {
            self.store
                .read_json(&self.store.path(&["issues", issue_id, "next_steps", &format!("{token}.json")]))
                .map_err(|_| CoordError::NotFound(format!("next_step token '{token}' not found")))
        })
    }

    fn write_token_locked(&self, issue_id: &str, tok: &NextStepToken) -> Result<()> {
        self.store.write_json(
            &self
                .store
                .path(&["issues", issue_id, "next_steps", &format!("{}.json", tok.token)]),
            tok,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, points: i64) -> IssueTask {
        IssueTask {
            id: id.to_string(),
            points,
            ..IssueTask::default()
        }
    }

    #[test]
    fn base_difficulty_scales_with_points() {
        assert_eq!(base_difficulty_by_points(0), Difficulty::Easy);
        assert_eq!(base_difficulty_by_points(10), Difficulty::Medium);
        assert_eq!(base_difficulty_by_points(30), Difficulty::Focus);
    }

    #[test]
    fn downgrade_steps_one_tier() {
        assert_eq!(downgrade(Difficulty::Focus), Difficulty::Medium);
        assert_eq!(downgrade(Difficulty::Medium), Difficulty::Easy);
        assert_eq!(downgrade(Difficulty::Easy), Difficulty::Easy);
    }

    #[test]
    fn tier_pick_chooses_highest_lowest_middle() {
        let tasks = vec![task("task-1", 5), task("task-2", 20), task("task-3", 10)];
        // Ordered points-desc: task-2(20), task-3(10), task-1(5).
        assert_eq!(pick_by_tier(tasks.clone(), 120).unwrap().id, "task-2");
        assert_eq!(pick_by_tier(tasks.clone(), 40).unwrap().id, "task-1");
        assert_eq!(pick_by_tier(tasks, 0).unwrap().id, "task-3");
    }

    #[test]
    fn tier_pick_breaks_point_ties_by_id() {
        let tasks = vec![task("task-9", 10), task("task-2", 10), task("task-5", 10)];
        assert_eq!(pick_by_tier(tasks, 120).unwrap().id, "task-2");
    }
}
