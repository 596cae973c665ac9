// tests/repo_client.rs
//
// Integration coverage for the Repo Client against a real (local, bare) Git
// remote: fast-forward push, push-rejected on conflicting writers, and
// recovery reset converging a diverged clone back to the remote head.

use shortlist::model::{Assignment, AssignmentStatus, AssignmentsDocument};
use shortlist::repo::{PushOutcome, RepoClient};
use shortlist::store::{StateStore, ASSIGNMENTS_PATH};
use std::path::Path;
use std::process::Command;

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git").args(args).current_dir(dir).status().unwrap();
    assert!(status.success(), "git {:?} failed in {:?}", args, dir);
}

/// Sets up a bare remote plus two independent clones (`n1`, `n2`), each
/// seeded with a valid `assignments.json` and tracking `origin/main`.
fn two_clones(tmp: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let bare = tmp.join("remote.git");
    git(tmp, &["init", "-q", "--bare", "-b", "main", bare.to_str().unwrap()]);

    let seed = tmp.join("seed");
    git(tmp, &["clone", "-q", bare.to_str().unwrap(), seed.to_str().unwrap()]);
    git(&seed, &["config", "user.email", "seed@test"]);
    git(&seed, &["config", "user.name", "seed"]);
    std::fs::write(seed.join("assignments.json"), "{\"assignments\":{}}").unwrap();
    git(&seed, &["add", "."]);
    git(&seed, &["commit", "-q", "-m", "seed"]);
    git(&seed, &["push", "-q", "origin", "main"]);

    let n1 = tmp.join("n1");
    let n2 = tmp.join("n2");
    git(tmp, &["clone", "-q", bare.to_str().unwrap(), n1.to_str().unwrap()]);
    git(tmp, &["clone", "-q", bare.to_str().unwrap(), n2.to_str().unwrap()]);
    for clone in [&n1, &n2] {
        git(clone, &["config", "user.email", "node@test"]);
        git(clone, &["config", "user.name", "node"]);
    }

    (n1, n2)
}

#[test]
fn concurrent_claims_one_committed_one_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let (n1_path, n2_path) = two_clones(tmp.path());

    let repo1 = RepoClient::open(&n1_path, "main").unwrap();
    let repo2 = RepoClient::open(&n2_path, "main").unwrap();

    let write_claim = |repo: &RepoClient, node: &str| {
        let store = StateStore::new(repo);
        let mut doc = AssignmentsDocument::default();
        let now = chrono::Utc::now();
        doc.assignments.insert(
            "t1".into(),
            Assignment {
                node_id: node.into(),
                claimed_at: now,
                lease_expires_at: now + chrono::Duration::minutes(5),
                status: AssignmentStatus::Claiming,
                region: None,
                extra: Default::default(),
            },
        );
        store.write_assignments(&doc).unwrap();
        repo.commit_and_push(&[ASSIGNMENTS_PATH], &format!("feat(assignments): node {} claims t1", node))
            .unwrap()
    };

    let outcome1 = write_claim(&repo1, "n1");
    assert_eq!(outcome1, PushOutcome::Committed);

    // n2 never synced after n1's push landed, so its push must be rejected.
    let outcome2 = write_claim(&repo2, "n2");
    assert_eq!(outcome2, PushOutcome::PushRejected);
}

#[test]
fn recovery_reset_converges_to_remote_head() {
    let tmp = tempfile::tempdir().unwrap();
    let (n1_path, n2_path) = two_clones(tmp.path());

    let repo1 = RepoClient::open(&n1_path, "main").unwrap();
    let repo2 = RepoClient::open(&n2_path, "main").unwrap();

    let store1 = StateStore::new(&repo1);
    let mut doc = AssignmentsDocument::default();
    let now = chrono::Utc::now();
    doc.assignments.insert(
        "t1".into(),
        Assignment {
            node_id: "n1".into(),
            claimed_at: now,
            lease_expires_at: now + chrono::Duration::minutes(5),
            status: AssignmentStatus::Claiming,
            region: None,
            extra: Default::default(),
        },
    );
    store1.write_assignments(&doc).unwrap();
    assert_eq!(
        repo1.commit_and_push(&[ASSIGNMENTS_PATH], "feat(assignments): node n1 claims t1").unwrap(),
        PushOutcome::Committed
    );

    // n2's local tree has no t1 assignment; recovery reset must pull n1's
    // committed state in, discarding n2's stale local view.
    repo2.recover_reset().unwrap();
    let store2 = StateStore::new(&repo2);
    let after = store2.read_assignments();
    assert_eq!(after.assignments.get("t1").unwrap().node_id, "n1");
}
