// src/node.rs
//
// =============================================================================
// SHORTLIST: NODE STATE MACHINE (v 0.1)
// =============================================================================
//
// IDLE -> ATTEMPT_CLAIM -> ACTIVE. No terminal state; runs until the
// cancellation token fires. The central race (ATTEMPT_CLAIM) is where the
// fast-forward push rule turns ordinary Git into a consensus mechanism:
// exactly one competing claim per task can land.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::config::Config;
use crate::lease;
use crate::metrics::ResourceEmitter;
use crate::model::{Assignment, AssignmentStatus, RosterEntry};
use crate::renderer::RendererSupervisor;
use crate::repo::{PushOutcome, RepoClient, SharedRepo};
use crate::store::{StateStore, ASSIGNMENTS_PATH, ROSTER_PATH};
use crate::throttle::CommitThrottle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    AttemptClaim,
    Active,
}

/// Outcome of one claim attempt, decided under the repo lock.
enum ClaimAttempt {
    AlreadyTaken,
    Outcome(PushOutcome),
}

/// Outcome of one lease renewal attempt, decided under the repo lock.
enum RenewResult {
    LostOwnership,
    Outcome(PushOutcome, chrono::DateTime<Utc>, chrono::DateTime<Utc>),
}

enum RenewOutcome {
    Renewed(Duration),
    LostOwnership,
    Rejected,
}

pub struct Node {
    cfg: Config,
    repo: SharedRepo,
    supervisor: RendererSupervisor,
    shutdown: watch::Receiver<bool>,
    last_roster_heartbeat: Option<chrono::DateTime<Utc>>,
    metrics: ResourceEmitter,
    throttle: CommitThrottle,
}

impl Node {
    pub fn new(
        cfg: Config,
        repo: SharedRepo,
        supervisor: RendererSupervisor,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            cfg,
            repo,
            supervisor,
            shutdown,
            last_roster_heartbeat: None,
            metrics: ResourceEmitter::new(),
            throttle: CommitThrottle::new(),
        }
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut state = State::Idle;
        let mut current_task: Option<String> = None;

        loop {
            if self.is_shutting_down() {
                log::info!("node {}: shutdown observed at safe checkpoint", self.cfg.node_id);
                return Ok(());
            }

            state = match state {
                State::Idle => self.step_idle(&mut current_task).await,
                State::AttemptClaim => self.step_attempt_claim(&mut current_task).await,
                State::Active => self.step_active(&mut current_task).await,
            };
        }
    }

    fn roster_heartbeat_due(&self) -> bool {
        match self.last_roster_heartbeat {
            None => true,
            Some(t) => Utc::now() - t > chrono::Duration::from_std(self.cfg.heartbeat_interval).unwrap(),
        }
    }

    async fn do_roster_heartbeat(&mut self) {
        if !self.throttle.allow(ROSTER_PATH, self.cfg.min_commit_interval) {
            return;
        }

        let metrics = self.metrics.sample();
        let node_id = self.cfg.node_id.clone();
        let region = self.cfg.region.clone();
        let git_timeout = self.cfg.git_timeout;

        let result = RepoClient::with_lock(&self.repo, git_timeout, move |repo| {
            repo.sync()?;
            let store = StateStore::new(repo);
            let mut roster = store.read_roster();
            let now = Utc::now();
            let existing_started_at = roster.get(&node_id).map(|e| e.started_at);

            roster.upsert(RosterEntry {
                id: node_id.clone(),
                started_at: existing_started_at.unwrap_or(now),
                last_seen: now,
                metrics,
                region,
                extra: Default::default(),
            });

            store.write_roster(&roster)?;
            let msg = format!("chore(roster): heartbeat from node {}", short_id(&node_id));
            let outcome = repo.commit_and_push(&[ROSTER_PATH], &msg)?;
            if outcome == PushOutcome::PushRejected {
                repo.recover_reset()?;
            }
            Ok((outcome, now))
        })
        .await;

        match result {
            Ok((PushOutcome::Committed, now)) | Ok((PushOutcome::NothingToCommit, now)) => {
                self.last_roster_heartbeat = Some(now);
            }
            Ok((PushOutcome::PushRejected, _)) => {
                log::warn!("node {}: roster heartbeat rejected, recovered", self.cfg.node_id);
            }
            Err(e) => log::warn!("node {}: roster heartbeat failed: {}", self.cfg.node_id, e),
        }
    }

    async fn step_idle(&mut self, current_task: &mut Option<String>) -> State {
        if self.roster_heartbeat_due() {
            self.do_roster_heartbeat().await;
        }

        let cfg = self.cfg.clone();
        let git_timeout = self.cfg.git_timeout;

        let candidate_task = match RepoClient::with_lock(&self.repo, git_timeout, move |repo| {
            repo.sync()?;
            let store = StateStore::new(repo);
            let schedule = store.read_schedule();
            let assignments = store.read_assignments();
            let now = Utc::now();

            let candidate = schedule.sorted_by_priority().into_iter().find_map(|task| {
                let ok = match assignments.assignments.get(&task.id) {
                    None => true,
                    Some(a) => crate::model::AssignmentsDocument::is_orphan(a, now),
                } && cfg.role_allowed(task.required_role.as_deref())
                    && cfg.region_allowed(task.required_region.as_deref());

                ok.then(|| task.id.clone())
            });
            Ok(candidate)
        })
        .await
        {
            Ok(candidate) => candidate,
            Err(e) => {
                log::warn!("node {}: idle scan failed: {}", self.cfg.node_id, e);
                None
            }
        };

        match candidate_task {
            Some(id) => {
                *current_task = Some(id);
                State::AttemptClaim
            }
            None => {
                sleep(self.cfg.idle_interval).await;
                State::Idle
            }
        }
    }

    async fn step_attempt_claim(&mut self, current_task: &mut Option<String>) -> State {
        let task_id = match current_task.clone() {
            Some(t) => t,
            None => return State::Idle,
        };

        let jitter = Duration::from_millis(
            rand::thread_rng().gen_range(0..=self.cfg.jitter_max.as_millis() as u64),
        );
        sleep(jitter).await;

        if !self.throttle.allow(ASSIGNMENTS_PATH, self.cfg.min_commit_interval) {
            *current_task = None;
            return State::Idle;
        }

        let node_id = self.cfg.node_id.clone();
        let region = self.cfg.region.clone();
        let lease_duration = self.cfg.lease_duration;
        let git_timeout = self.cfg.git_timeout;
        let task_id_inner = task_id.clone();

        let result = RepoClient::with_lock(&self.repo, git_timeout, move |repo| {
            repo.sync()?;
            let store = StateStore::new(repo);
            let mut assignments = store.read_assignments();
            let now = Utc::now();

            if let Some(existing) = assignments.assignments.get(&task_id_inner) {
                if crate::model::AssignmentsDocument::is_live(existing, now) {
                    return Ok(ClaimAttempt::AlreadyTaken);
                }
            }

            let lease_expires_at = lease::new_lease(now, lease_duration);
            assignments.assignments.insert(
                task_id_inner.clone(),
                Assignment {
                    node_id: node_id.clone(),
                    claimed_at: now,
                    lease_expires_at,
                    status: AssignmentStatus::Claiming,
                    region,
                    extra: Default::default(),
                },
            );

            store.write_assignments(&assignments)?;
            let msg = format!(
                "feat(assignments): node {} claims {}",
                short_id(&node_id),
                task_id_inner
            );
            let outcome = repo.commit_and_push(&[ASSIGNMENTS_PATH], &msg)?;
            if outcome == PushOutcome::PushRejected {
                repo.recover_reset()?;
            }
            Ok(ClaimAttempt::Outcome(outcome))
        })
        .await;

        match result {
            Ok(ClaimAttempt::AlreadyTaken) => {
                *current_task = None;
                State::Idle
            }
            Ok(ClaimAttempt::Outcome(PushOutcome::Committed)) => State::Active,
            Ok(ClaimAttempt::Outcome(PushOutcome::NothingToCommit)) => {
                *current_task = None;
                State::Idle
            }
            Ok(ClaimAttempt::Outcome(PushOutcome::PushRejected)) => {
                log::info!("node {}: claim of {} rejected, peer won the race", self.cfg.node_id, task_id);
                *current_task = None;
                State::Idle
            }
            Err(e) => {
                log::warn!("node {}: claim attempt failed: {}", self.cfg.node_id, e);
                *current_task = None;
                State::Idle
            }
        }
    }

    async fn step_active(&mut self, current_task: &mut Option<String>) -> State {
        let task_id = match current_task.clone() {
            Some(t) => t,
            None => return State::Idle,
        };

        let git_timeout = self.cfg.git_timeout;
        let task_id_inner = task_id.clone();
        let task_type = match RepoClient::with_lock(&self.repo, git_timeout, move |repo| {
            let store = StateStore::new(repo);
            let schedule = store.read_schedule();
            Ok(schedule.get(&task_id_inner).map(|t| t.task_type.clone()))
        })
        .await
        {
            Ok(Some(t)) => t,
            Ok(None) => {
                log::warn!("node {}: task {} vanished from schedule", self.cfg.node_id, task_id);
                *current_task = None;
                return State::Idle;
            }
            Err(e) => {
                log::warn!("node {}: failed to resolve task type for {}: {}", self.cfg.node_id, task_id, e);
                *current_task = None;
                return State::Idle;
            }
        };

        let mut handle = match self.supervisor.start(&task_id, &task_type, &self.cfg.node_id).await {
            Ok(h) => h,
            Err(e) => {
                log::warn!("node {}: failed to start renderer for {}: {}", self.cfg.node_id, task_id, e);
                *current_task = None;
                return State::Idle;
            }
        };

        let mut consecutive_health_failures = 0u32;
        let renewal_threshold = self.cfg.renewal_threshold;
        let task_id_inner = task_id.clone();
        let mut next_renewal_sleep = RepoClient::with_lock(&self.repo, git_timeout, move |repo| {
            let store = StateStore::new(repo);
            let assignments = store.read_assignments();
            let sleep = match assignments.assignments.get(&task_id_inner) {
                Some(a) => lease::sleep_until_renewal(a.lease_expires_at, Utc::now(), renewal_threshold),
                None => Duration::ZERO,
            };
            Ok(sleep)
        })
        .await
        .unwrap_or(Duration::ZERO);
        let mut last_health_check = tokio::time::Instant::now();

        loop {
            if self.is_shutting_down() {
                self.supervisor.stop(&handle).await;
                self.try_release(&task_id).await;
                *current_task = None;
                return State::Idle;
            }

            tokio::select! {
                _ = sleep(next_renewal_sleep) => {
                    match self.renew_lease(&task_id).await {
                        RenewOutcome::Renewed(new_sleep) => {
                            next_renewal_sleep = new_sleep;
                        }
                        RenewOutcome::LostOwnership | RenewOutcome::Rejected => {
                            self.supervisor.stop(&handle).await;
                            *current_task = None;
                            return State::Idle;
                        }
                    }
                }
                _ = sleep(self.cfg.health_check_interval.saturating_sub(last_health_check.elapsed())) => {
                    last_health_check = tokio::time::Instant::now();

                    if !self.supervisor.is_running(&handle).await {
                        log::warn!("node {}: renderer for {} is no longer running", self.cfg.node_id, task_id);
                        self.try_release(&task_id).await;
                        *current_task = None;
                        return State::Idle;
                    }

                    if !self.supervisor.check_health(&mut handle).await {
                        consecutive_health_failures += 1;
                        if consecutive_health_failures >= self.cfg.max_consecutive_failures {
                            log::warn!("node {}: renderer for {} unhealthy, tearing down", self.cfg.node_id, task_id);
                            self.supervisor.stop(&handle).await;
                            self.try_release(&task_id).await;
                            *current_task = None;
                            return State::Idle;
                        }
                    } else {
                        consecutive_health_failures = 0;
                    }
                }
            }
        }
    }

    async fn renew_lease(&mut self, task_id: &str) -> RenewOutcome {
        let renewal_threshold = self.cfg.renewal_threshold;

        if !self.throttle.allow(ASSIGNMENTS_PATH, self.cfg.min_commit_interval) {
            return RenewOutcome::Renewed(renewal_threshold);
        }

        let node_id = self.cfg.node_id.clone();
        let task_id_owned = task_id.to_string();
        let lease_duration = self.cfg.lease_duration;
        let git_timeout = self.cfg.git_timeout;

        let result = RepoClient::with_lock(&self.repo, git_timeout, move |repo| {
            repo.sync()?;
            let store = StateStore::new(repo);
            let mut assignments = store.read_assignments();

            let owned = assignments
                .assignments
                .get(&task_id_owned)
                .map(|a| a.node_id == node_id)
                .unwrap_or(false);

            if !owned {
                return Ok(RenewResult::LostOwnership);
            }

            let now = Utc::now();
            let new_expiry = lease::new_lease(now, lease_duration);

            if let Some(a) = assignments.assignments.get_mut(&task_id_owned) {
                a.lease_expires_at = new_expiry;
                a.status = AssignmentStatus::Streaming;
            }

            store.write_assignments(&assignments)?;
            let msg = format!(
                "chore(assignments): task heartbeat for {} from node {}",
                task_id_owned,
                short_id(&node_id)
            );
            let outcome = repo.commit_and_push(&[ASSIGNMENTS_PATH], &msg)?;
            if outcome == PushOutcome::PushRejected {
                repo.recover_reset()?;
            }
            Ok(RenewResult::Outcome(outcome, new_expiry, now))
        })
        .await;

        match result {
            Ok(RenewResult::LostOwnership) => RenewOutcome::LostOwnership,
            Ok(RenewResult::Outcome(PushOutcome::Committed, new_expiry, now))
            | Ok(RenewResult::Outcome(PushOutcome::NothingToCommit, new_expiry, now)) => {
                RenewOutcome::Renewed(lease::sleep_until_renewal(new_expiry, now, renewal_threshold))
            }
            Ok(RenewResult::Outcome(PushOutcome::PushRejected, ..)) => RenewOutcome::Rejected,
            Err(e) => {
                log::warn!("node {}: lease renewal failed: {}", self.cfg.node_id, e);
                RenewOutcome::Renewed(renewal_threshold)
            }
        }
    }

    /// Best-effort assignment release. Never blocks shutdown beyond the
    /// single push attempt; the Healer is the backstop if this fails.
    async fn try_release(&mut self, task_id: &str) {
        if !self.throttle.allow(ASSIGNMENTS_PATH, self.cfg.min_commit_interval) {
            return;
        }

        let node_id = self.cfg.node_id.clone();
        let task_id_owned = task_id.to_string();
        let git_timeout = self.cfg.git_timeout;

        let result = RepoClient::with_lock(&self.repo, git_timeout, move |repo| {
            repo.sync()?;
            let store = StateStore::new(repo);
            let mut assignments = store.read_assignments();

            let owned = assignments
                .assignments
                .get(&task_id_owned)
                .map(|a| a.node_id == node_id)
                .unwrap_or(false);
            if !owned {
                return Ok(());
            }

            assignments.assignments.remove(&task_id_owned);
            store.write_assignments(&assignments)?;

            let msg = format!(
                "chore(assignments): release {} by node {}",
                task_id_owned,
                short_id(&node_id)
            );
            repo.commit_and_push(&[ASSIGNMENTS_PATH], &msg)?;
            Ok(())
        })
        .await;

        if let Err(e) = result {
            log::warn!("node {}: release of {} failed: {}", self.cfg.node_id, task_id, e);
        }
    }
}

fn short_id(node_id: &str) -> String {
    node_id.chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_truncates() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }
}
