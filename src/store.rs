// src/store.rs
//
// =============================================================================
// SHORTLIST: STATE STORE (v 0.1)
// =============================================================================
//
// Typed views of the five coordination documents over the Repo Client.
// Every read tolerates a missing or corrupt file (logged, treated as empty);
// every write goes through `RepoClient::write_json`'s deterministic encoder
// so that `NothingToCommit` can be detected before a push is even attempted.

use crate::model::{
    AssignmentsDocument, RosterDocument, ScheduleDocument, ShortlistDocument, TriggersDocument,
};
use crate::repo::RepoClient;

pub const ROSTER_PATH: &str = "roster.json";
pub const SCHEDULE_PATH: &str = "schedule.json";
pub const ASSIGNMENTS_PATH: &str = "assignments.json";
pub const SHORTLIST_PATH: &str = "shortlist.json";
pub const TRIGGERS_PATH: &str = "triggers.json";

pub struct StateStore<'a> {
    repo: &'a RepoClient,
}

impl<'a> StateStore<'a> {
    pub fn new(repo: &'a RepoClient) -> Self {
        Self { repo }
    }

    pub fn read_roster(&self) -> RosterDocument {
        self.read_or_default(ROSTER_PATH)
    }

    pub fn write_roster(&self, doc: &RosterDocument) -> anyhow::Result<()> {
        self.repo.write_json(ROSTER_PATH, doc)?;
        Ok(())
    }

    pub fn read_schedule(&self) -> ScheduleDocument {
        self.read_or_default(SCHEDULE_PATH)
    }

    pub fn write_schedule(&self, doc: &ScheduleDocument) -> anyhow::Result<()> {
        self.repo.write_json(SCHEDULE_PATH, doc)?;
        Ok(())
    }

    pub fn read_assignments(&self) -> AssignmentsDocument {
        self.read_or_default(ASSIGNMENTS_PATH)
    }

    pub fn write_assignments(&self, doc: &AssignmentsDocument) -> anyhow::Result<()> {
        self.repo.write_json(ASSIGNMENTS_PATH, doc)?;
        Ok(())
    }

    pub fn read_shortlist(&self) -> ShortlistDocument {
        self.read_or_default(SHORTLIST_PATH)
    }

    pub fn read_triggers(&self) -> TriggersDocument {
        self.read_or_default(TRIGGERS_PATH)
    }

    fn read_or_default<T>(&self, path: &str) -> T
    where
        T: serde::de::DeserializeOwned + Default,
    {
        match self.repo.read_json::<T>(path) {
            Ok(doc) => doc,
            Err(e) => {
                log::warn!("corrupt document {}: {} — treating as empty", path, e);
                T::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RosterEntry;
    use std::process::Command;

    fn init_repo(dir: &std::path::Path) {
        let run = |args: &[&str]| {
            let status = Command::new("git").args(args).current_dir(dir).status().unwrap();
            assert!(status.success());
        };
        run(&["init", "-q", "-b", "main"]);
        run(&["config", "user.email", "test@test"]);
        run(&["config", "user.name", "test"]);
        std::fs::write(dir.join("README.md"), "seed").unwrap();
        run(&["add", "."]);
        run(&["commit", "-q", "-m", "seed"]);
    }

    #[test]
    fn missing_documents_default_empty() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        let repo = RepoClient::open(tmp.path(), "main").unwrap();
        let store = StateStore::new(&repo);
        assert!(store.read_roster().nodes.is_empty());
        assert!(store.read_schedule().tasks.is_empty());
        assert!(store.read_assignments().assignments.is_empty());
    }

    #[test]
    fn write_then_read_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        let repo = RepoClient::open(tmp.path(), "main").unwrap();
        let store = StateStore::new(&repo);

        let now = chrono::Utc::now();
        let mut doc = RosterDocument::default();
        doc.upsert(RosterEntry {
            id: "n1".into(),
            started_at: now,
            last_seen: now,
            metrics: crate::model::NodeMetrics { cpu_load: 0.1, memory_percent: 0.2 },
            region: None,
            extra: Default::default(),
        });
        store.write_roster(&doc).unwrap();

        let read_back = store.read_roster();
        assert_eq!(read_back, doc);
    }
}
