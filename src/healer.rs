// src/healer.rs
//
// =============================================================================
// SHORTLIST: HEALER (v 0.1)
// =============================================================================
//
// Periodic sweeper. Purges assignments whose owning node has fallen out of
// the roster (zombie) or whose lease expired with no renewal (stale). Never
// touches the roster or schedule.

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::config::Config;
use crate::model::{Assignment, RosterDocument};
use crate::repo::{PushOutcome, RepoClient, SharedRepo};
use crate::store::{StateStore, ASSIGNMENTS_PATH};
use crate::throttle::CommitThrottle;

pub struct Healer {
    cfg: Config,
    repo: SharedRepo,
    shutdown: watch::Receiver<bool>,
    throttle: CommitThrottle,
}

impl Healer {
    pub fn new(cfg: Config, repo: SharedRepo, shutdown: watch::Receiver<bool>) -> Self {
        Self { cfg, repo, shutdown, throttle: CommitThrottle::new() }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            if *self.shutdown.borrow() {
                return Ok(());
            }
            if let Err(e) = self.cycle().await {
                log::warn!("healer: cycle error: {}", e);
            }
            sleep(self.cfg.healer_interval).await;
        }
    }

    async fn cycle(&mut self) -> anyhow::Result<()> {
        if !self.throttle.allow(ASSIGNMENTS_PATH, self.cfg.min_commit_interval) {
            return Ok(());
        }

        let node_timeout = self.cfg.node_timeout;
        let healer_grace = self.cfg.healer_grace;
        let git_timeout = self.cfg.git_timeout;

        let outcome = RepoClient::with_lock(&self.repo, git_timeout, move |repo| {
            repo.sync()?;

            let store = StateStore::new(repo);
            let roster = store.read_roster();
            let mut assignments = store.read_assignments();

            let now = Utc::now();
            let node_timeout = chrono::Duration::from_std(node_timeout).unwrap();
            let healer_grace = chrono::Duration::from_std(healer_grace).unwrap();

            let alive: std::collections::HashSet<&str> = roster
                .nodes
                .iter()
                .filter(|n| RosterDocument::is_alive(n, now, node_timeout))
                .map(|n| n.id.as_str())
                .collect();

            let before = assignments.assignments.len();
            assignments
                .assignments
                .retain(|_task_id, assignment| !is_purgeable(assignment, &alive, now, healer_grace));
            let purged = before - assignments.assignments.len();

            if purged == 0 {
                return Ok(None);
            }

            store.write_assignments(&assignments)?;
            let msg = format!("fix(healer): Cleared {} zombie task assignments", purged);
            let outcome = repo.commit_and_push(&[ASSIGNMENTS_PATH], &msg)?;
            if outcome == PushOutcome::PushRejected {
                repo.recover_reset()?;
            }
            Ok(Some((outcome, purged)))
        })
        .await?;

        match outcome {
            Some((PushOutcome::Committed, purged)) => log::info!("healer: purged {} assignments", purged),
            Some((PushOutcome::PushRejected, _)) => log::info!("healer: purge push rejected, recovered"),
            Some((PushOutcome::NothingToCommit, _)) | None => {}
        }
        Ok(())
    }
}

/// A task assignment is purgeable if its owning node has fallen out of the
/// roster (zombie) or its lease expired more than `healer_grace` ago with no
/// renewal (stale). Pure so it can be property-tested without a repo.
fn is_purgeable(
    assignment: &Assignment,
    alive: &std::collections::HashSet<&str>,
    now: chrono::DateTime<Utc>,
    healer_grace: chrono::Duration,
) -> bool {
    let zombie = !alive.contains(assignment.node_id.as_str());
    let stale = now > assignment.lease_expires_at + healer_grace;
    zombie || stale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssignmentStatus, AssignmentsDocument};

    fn assignment(node_id: &str, lease_expires_at: chrono::DateTime<Utc>) -> Assignment {
        Assignment {
            node_id: node_id.into(),
            claimed_at: Utc::now(),
            lease_expires_at,
            status: AssignmentStatus::Streaming,
            region: None,
            extra: Default::default(),
        }
    }

    #[test]
    fn purgeable_predicate_matches_zombie_and_stale() {
        let now = Utc::now();
        let alive: std::collections::HashSet<&str> = ["n_alive"].into_iter().collect();
        let grace = chrono::Duration::seconds(60);

        let zombie = assignment("n_dead", now + chrono::Duration::minutes(5));
        assert!(is_purgeable(&zombie, &alive, now, grace));

        let stale = assignment("n_alive", now - chrono::Duration::hours(1));
        assert!(is_purgeable(&stale, &alive, now, grace));

        let healthy = assignment("n_alive", now + chrono::Duration::minutes(5));
        assert!(!is_purgeable(&healthy, &alive, now, grace));

        let mut doc = AssignmentsDocument::default();
        doc.assignments.insert("t1".into(), zombie);
        doc.assignments.insert("t2".into(), stale);
        assert_eq!(doc.assignments.len(), 2);
    }

    proptest::proptest! {
        /// An assignment is purged if and only if its node is absent from the
        /// alive set or its lease expired more than `healer_grace` in the
        /// past — never purged while its node is alive and its lease is
        /// still within grace.
        #[test]
        fn purge_iff_zombie_or_stale_past_grace(
            node_alive in proptest::bool::ANY,
            lease_offset_secs in -7200i64..7200,
            grace_secs in 0i64..600,
        ) {
            let now = Utc::now();
            let node_id = if node_alive { "n_alive" } else { "n_dead" };
            let alive: std::collections::HashSet<&str> = ["n_alive"].into_iter().collect();
            let grace = chrono::Duration::seconds(grace_secs);
            let lease_expires_at = now + chrono::Duration::seconds(lease_offset_secs);

            let a = assignment(node_id, lease_expires_at);
            let expected_zombie = !node_alive;
            let expected_stale = now > lease_expires_at + grace;

            proptest::prop_assert_eq!(
                is_purgeable(&a, &alive, now, grace),
                expected_zombie || expected_stale
            );
        }
    }
}
