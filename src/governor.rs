// src/governor.rs
//
// =============================================================================
// SHORTLIST: GOVERNOR (v 0.1)
// =============================================================================
//
// Periodic policy engine. Evaluates trigger conditions against roster
// metrics and wall clock, gated by quorum, and mutates the schedule.
// Idempotent by construction: ADD_TASK is guarded by an existence check, so
// re-running the same cycle against unchanged inputs is a no-op.
//
// The original source evaluated comparison operators with `eval()` on a
// format string. That is not reproduced here — `model::Operator::apply` is
// an explicit match over a closed enum.

use chrono::{Datelike, Timelike, Utc};
use tokio::sync::watch;
use tokio::time::sleep;

use crate::config::Config;
use crate::model::{
    Aggregator, Quorum, RosterDocument, ScheduleAction, ScheduleDocument, TriggerCondition,
};
use crate::repo::{PushOutcome, RepoClient, SharedRepo};
use crate::store::{StateStore, SCHEDULE_PATH};
use crate::throttle::CommitThrottle;

pub struct Governor {
    cfg: Config,
    repo: SharedRepo,
    shutdown: watch::Receiver<bool>,
    throttle: CommitThrottle,
}

struct SwarmHealth {
    total_nodes: usize,
    alive_nodes: usize,
}

impl SwarmHealth {
    fn percent_alive(&self) -> f64 {
        if self.total_nodes == 0 {
            0.0
        } else {
            (self.alive_nodes as f64 / self.total_nodes as f64) * 100.0
        }
    }
}

impl Governor {
    pub fn new(cfg: Config, repo: SharedRepo, shutdown: watch::Receiver<bool>) -> Self {
        Self { cfg, repo, shutdown, throttle: CommitThrottle::new() }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            if *self.shutdown.borrow() {
                return Ok(());
            }
            if let Err(e) = self.cycle().await {
                log::warn!("governor: cycle error: {}", e);
            }
            sleep(self.cfg.governor_interval).await;
        }
    }

    async fn cycle(&mut self) -> anyhow::Result<()> {
        if !self.throttle.allow(SCHEDULE_PATH, self.cfg.min_commit_interval) {
            return Ok(());
        }

        let cfg = self.cfg.clone();
        let git_timeout = self.cfg.git_timeout;

        let outcome = RepoClient::with_lock(&self.repo, git_timeout, move |repo| {
            repo.sync()?;

            let store = StateStore::new(repo);
            let roster = store.read_roster();
            let schedule = store.read_schedule();
            let triggers = store.read_triggers();

            let now = Utc::now();
            let health = swarm_health(&cfg, &roster, now);

            let mut working = schedule.clone();
            let mut applied_ids = Vec::new();

            for (trigger_id, rule) in &triggers.triggers {
                if !quorum_met(&rule.quorum, &health) {
                    continue;
                }
                if !condition_holds(&cfg, &rule.condition, &roster, &health, now) {
                    continue;
                }

                for action in &rule.actions {
                    apply_action(&mut working, action);
                }
                applied_ids.push(trigger_id.clone());
            }

            if working == schedule {
                return Ok(None);
            }

            store.write_schedule(&working)?;
            let msg = format!("chore(governor): Applied triggers: {}", applied_ids.join(", "));
            let outcome = repo.commit_and_push(&[SCHEDULE_PATH], &msg)?;
            if outcome == PushOutcome::PushRejected {
                repo.recover_reset()?;
            }
            Ok(Some((outcome, applied_ids)))
        })
        .await?;

        match outcome {
            Some((PushOutcome::Committed, applied_ids)) => {
                log::info!("governor: applied triggers [{}]", applied_ids.join(", "));
            }
            Some((PushOutcome::PushRejected, _)) => {
                log::info!("governor: schedule push rejected, recovered");
            }
            Some((PushOutcome::NothingToCommit, _)) | None => {}
        }
        Ok(())
    }
}

fn swarm_health(cfg: &Config, roster: &RosterDocument, now: chrono::DateTime<Utc>) -> SwarmHealth {
    let node_timeout = chrono::Duration::from_std(cfg.node_timeout).unwrap();
    let alive = roster
        .nodes
        .iter()
        .filter(|n| RosterDocument::is_alive(n, now, node_timeout))
        .count();
    SwarmHealth {
        total_nodes: roster.nodes.len(),
        alive_nodes: alive,
    }
}

fn quorum_met(quorum: &Quorum, health: &SwarmHealth) -> bool {
    if let Some(min_nodes) = quorum.min_nodes_alive {
        if (health.alive_nodes as u64) < min_nodes {
            return false;
        }
    }
    if let Some(min_percent) = quorum.min_percent_alive {
        if health.percent_alive() < min_percent {
            return false;
        }
    }
    true
}

fn condition_holds(
    cfg: &Config,
    condition: &TriggerCondition,
    roster: &RosterDocument,
    health: &SwarmHealth,
    now: chrono::DateTime<Utc>,
) -> bool {
    match condition {
        TriggerCondition::TimeBased { start, end, hours, weekdays } => {
            if let (Some(s), Some(e)) = (start, end) {
                if now < *s || now > *e {
                    return false;
                }
            }
            if let Some(hours) = hours {
                if !hours.contains(&now.hour()) {
                    return false;
                }
            }
            if let Some(weekdays) = weekdays {
                let weekday = now.weekday().num_days_from_monday();
                if !weekdays.contains(&weekday) {
                    return false;
                }
            }
            true
        }
        TriggerCondition::SwarmMetricAgg { metric, aggregator, operator, threshold } => {
            let node_timeout = chrono::Duration::from_std(cfg.node_timeout).unwrap();
            let values: Vec<f64> = roster
                .nodes
                .iter()
                .filter(|n| RosterDocument::is_alive(n, now, node_timeout))
                .map(|n| match metric.as_str() {
                    "cpu_load" => n.metrics.cpu_load,
                    "memory_percent" => n.metrics.memory_percent,
                    _ => 0.0,
                })
                .collect();

            if values.is_empty() {
                let _ = health;
                return false;
            }

            let aggregate = match aggregator {
                Aggregator::Average => values.iter().sum::<f64>() / values.len() as f64,
                Aggregator::Sum => values.iter().sum::<f64>(),
                Aggregator::Max => values.iter().cloned().fold(f64::MIN, f64::max),
                Aggregator::Min => values.iter().cloned().fold(f64::MAX, f64::min),
                Aggregator::CountAboveThreshold => {
                    values.iter().filter(|v| **v > *threshold).count() as f64
                }
            };

            operator.apply(aggregate, *threshold)
        }
    }
}

fn apply_action(schedule: &mut ScheduleDocument, action: &ScheduleAction) {
    match action {
        ScheduleAction::AddTask { id, task_type, priority, required_role, required_region } => {
            if schedule.get(id).is_some() {
                return;
            }
            schedule.tasks.push(crate::model::TaskDeclaration {
                id: id.clone(),
                task_type: task_type.clone(),
                priority: *priority,
                required_role: required_role.clone(),
                required_region: required_region.clone(),
                extra: Default::default(),
            });
        }
        ScheduleAction::RemoveTask { id } => {
            schedule.tasks.retain(|t| &t.id != id);
        }
        ScheduleAction::ChangePriority { id, priority } => {
            if let Some(task) = schedule.tasks.iter_mut().find(|t| &t.id == id) {
                task.priority = *priority;
            }
        }
        ScheduleAction::SwapTasks { id_a, id_b } => {
            let pos_a = schedule.tasks.iter().position(|t| &t.id == id_a);
            let pos_b = schedule.tasks.iter().position(|t| &t.id == id_b);
            if let (Some(a), Some(b)) = (pos_a, pos_b) {
                schedule.tasks.swap(a, b);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskDeclaration;

    fn task(id: &str, priority: i64) -> TaskDeclaration {
        TaskDeclaration {
            id: id.to_string(),
            task_type: "web".to_string(),
            priority,
            required_role: None,
            required_region: None,
            extra: Default::default(),
        }
    }

    #[test]
    fn add_task_is_idempotent() {
        let mut schedule = ScheduleDocument::default();
        let action = ScheduleAction::AddTask {
            id: "t1".into(),
            task_type: "web".into(),
            priority: 1,
            required_role: None,
            required_region: None,
        };
        apply_action(&mut schedule, &action);
        apply_action(&mut schedule, &action);
        assert_eq!(schedule.tasks.len(), 1);
    }

    #[test]
    fn swap_tasks_exchanges_positions() {
        let mut schedule = ScheduleDocument {
            tasks: vec![task("a", 1), task("b", 2)],
        };
        apply_action(
            &mut schedule,
            &ScheduleAction::SwapTasks { id_a: "a".into(), id_b: "b".into() },
        );
        assert_eq!(schedule.tasks[0].id, "b");
        assert_eq!(schedule.tasks[1].id, "a");
    }

    #[test]
    fn change_priority_updates_in_place() {
        let mut schedule = ScheduleDocument { tasks: vec![task("a", 1)] };
        apply_action(
            &mut schedule,
            &ScheduleAction::ChangePriority { id: "a".into(), priority: 9 },
        );
        assert_eq!(schedule.tasks[0].priority, 9);
    }

    #[test]
    fn remove_task_drops_entry() {
        let mut schedule = ScheduleDocument { tasks: vec![task("a", 1), task("b", 2)] };
        apply_action(&mut schedule, &ScheduleAction::RemoveTask { id: "a".into() });
        assert_eq!(schedule.tasks.len(), 1);
        assert_eq!(schedule.tasks[0].id, "b");
    }

    fn health(total: usize, alive: usize) -> SwarmHealth {
        SwarmHealth { total_nodes: total, alive_nodes: alive }
    }

    #[test]
    fn quorum_requires_both_min_nodes_and_min_percent() {
        let q = Quorum { min_nodes_alive: Some(3), min_percent_alive: Some(50.0) };
        assert!(!quorum_met(&q, &health(10, 2)), "below min_nodes_alive");
        assert!(!quorum_met(&q, &health(10, 4)), "above min_nodes_alive but below min_percent_alive");
        assert!(quorum_met(&q, &health(10, 6)));
    }

    proptest::proptest! {
        #[test]
        fn change_priority_is_idempotent(initial in -1000i64..1000, target in -1000i64..1000) {
            let mut schedule = ScheduleDocument { tasks: vec![task("a", initial)] };
            let action = ScheduleAction::ChangePriority { id: "a".into(), priority: target };
            apply_action(&mut schedule, &action);
            let once = schedule.clone();
            apply_action(&mut schedule, &action);
            proptest::prop_assert_eq!(schedule, once);
        }

        #[test]
        fn add_task_then_remove_task_is_a_no_op(priority in -1000i64..1000) {
            let mut schedule = ScheduleDocument::default();
            let add = ScheduleAction::AddTask {
                id: "t1".into(),
                task_type: "web".into(),
                priority,
                required_role: None,
                required_region: None,
            };
            let remove = ScheduleAction::RemoveTask { id: "t1".into() };
            apply_action(&mut schedule, &add);
            apply_action(&mut schedule, &remove);
            proptest::prop_assert!(schedule.tasks.is_empty());
        }

        /// For any roster size and any quorum thresholds, a trigger whose
        /// quorum is not met must never be treated as met.
        #[test]
        fn quorum_below_threshold_never_met(
            total in 0usize..200,
            alive in 0usize..200,
            min_nodes in 0u64..200,
            min_percent in 0.0f64..100.0,
        ) {
            let alive = alive.min(total);
            let h = health(total, alive);
            let q = Quorum { min_nodes_alive: Some(min_nodes), min_percent_alive: Some(min_percent) };

            let nodes_ok = alive as u64 >= min_nodes;
            let percent_ok = h.percent_alive() >= min_percent;
            proptest::prop_assert_eq!(quorum_met(&q, &h), nodes_ok && percent_ok);
        }

        #[test]
        fn untouched_schedule_is_unchanged_by_a_no_op_cycle(priority in -1000i64..1000) {
            let schedule = ScheduleDocument { tasks: vec![task("a", priority)] };
            let working = schedule.clone();
            proptest::prop_assert_eq!(working, schedule);
        }
    }
}
