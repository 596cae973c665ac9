// src/repo.rs
//
// =============================================================================
// SHORTLIST: REPO CLIENT (v 0.1)
// =============================================================================
//
// Git-as-consensus. Wraps libgit2 (via `git2`) behind four operations:
// sync, read_json, write_json, commit_and_push. The working directory is
// never exposed to callers directly — every loop goes through these methods,
// which keeps the recovery-reset policy in one place.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use git2::{FetchOptions, RemoteCallbacks, Repository, ResetType};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// `git2::Repository` is not `Sync`; the Node, Governor, and Healer loops
/// each take the mutex briefly around a single sync/read/write/push call
/// rather than holding a raw handle.
pub type SharedRepo = Arc<tokio::sync::Mutex<RepoClient>>;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("network error reaching remote: {0}")]
    Network(String),
    #[error("local branch diverged from remote")]
    Diverged,
    #[error("corrupt document at {path}: {source}")]
    CorruptDocument {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Outcome of a staged commit+push. Control flow, not an error — the claim
/// race and push-rejected signal are ordinary values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Committed,
    NothingToCommit,
    PushRejected,
}

pub struct RepoClient {
    repo: Repository,
    root: PathBuf,
    branch: String,
    remote_name: String,
}

impl RepoClient {
    pub fn open(root: impl AsRef<Path>, branch: impl Into<String>) -> RepoResult<Self> {
        let root = root.as_ref().to_path_buf();
        let repo = Repository::open(&root)?;
        Ok(Self {
            repo,
            root,
            branch: branch.into(),
            remote_name: "origin".to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fast-forward the local branch to the remote tip.
    pub fn sync(&self) -> RepoResult<()> {
        let mut remote = self
            .repo
            .find_remote(&self.remote_name)
            .map_err(|e| RepoError::Network(e.message().to_string()))?;

        let mut cb = RemoteCallbacks::new();
        cb.credentials(|_url, username_from_url, _allowed| {
            git2::Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"))
        });
        let mut fo = FetchOptions::new();
        fo.remote_callbacks(cb);

        remote
            .fetch(&[self.branch.as_str()], Some(&mut fo), None)
            .map_err(|e| RepoError::Network(e.message().to_string()))?;

        let fetch_head = self.repo.find_reference("FETCH_HEAD")?;
        let fetch_commit = self.repo.reference_to_annotated_commit(&fetch_head)?;
        let analysis = self.repo.merge_analysis(&[&fetch_commit])?;

        if analysis.0.is_up_to_date() {
            return Ok(());
        }
        if analysis.0.is_fast_forward() {
            let refname = format!("refs/heads/{}", self.branch);
            let mut reference = self.repo.find_reference(&refname)?;
            reference.set_target(fetch_commit.id(), "fast-forward sync")?;
            self.repo.set_head(&refname)?;
            self.repo
                .checkout_head(Some(git2::build::CheckoutBuilder::default().force()))?;
            Ok(())
        } else {
            Err(RepoError::Diverged)
        }
    }

    /// Hard reset to `origin/<branch>`. The only recovery path for any
    /// push-rejected or diverged-branch failure.
    pub fn recover_reset(&self) -> RepoResult<()> {
        self.sync().or_else(|e| match e {
            RepoError::Diverged => Ok(()),
            other => Err(other),
        })?;

        let remote_ref = format!("refs/remotes/{}/{}", self.remote_name, self.branch);
        let obj = self.repo.revparse_single(&remote_ref)?;
        self.repo.reset(&obj, ResetType::Hard, None)?;
        Ok(())
    }

    /// Read a JSON document relative to the repo root. Missing file yields
    /// the type's `Default`. Corrupt contents surface as `CorruptDocument`
    /// so callers can decide to log-and-treat-as-empty per their own policy.
    pub fn read_json<T>(&self, rel_path: &str) -> RepoResult<T>
    where
        T: DeserializeOwned + Default,
    {
        let full = self.root.join(rel_path);
        if !full.exists() {
            return Ok(T::default());
        }
        let bytes = std::fs::read(&full)?;
        if bytes.is_empty() {
            return Ok(T::default());
        }
        serde_json::from_slice(&bytes).map_err(|source| RepoError::CorruptDocument {
            path: rel_path.to_string(),
            source,
        })
    }

    /// Serialize deterministically (sorted keys via `BTreeMap`/struct field
    /// order, stable 2-space indent) and stage the path for the next commit.
    pub fn write_json<T>(&self, rel_path: &str, doc: &T) -> RepoResult<()>
    where
        T: Serialize,
    {
        let full = self.root.join(rel_path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(doc).map_err(|source| RepoError::CorruptDocument {
            path: rel_path.to_string(),
            source,
        })?;
        std::fs::write(&full, bytes)?;

        let mut index = self.repo.index()?;
        index.add_path(Path::new(rel_path))?;
        index.write()?;
        Ok(())
    }

    /// Commit whatever is staged (restricted to `paths`) and push. The
    /// returned `PushOutcome` is the sole signal; this method never treats
    /// a rejected push as an `Err`.
    pub fn commit_and_push(&self, paths: &[&str], message: &str) -> RepoResult<PushOutcome> {
        let mut index = self.repo.index()?;
        for p in paths {
            index.add_path(Path::new(p)).ok();
        }
        index.write()?;

        let tree_oid = index.write_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;

        let head = self.repo.head()?;
        let parent_commit = head.peel_to_commit()?;

        if tree.id() == parent_commit.tree_id() {
            return Ok(PushOutcome::NothingToCommit);
        }

        let sig = self.repo.signature().or_else(|_| {
            git2::Signature::now("shortlist-node", "shortlist-node@local")
        })?;

        let refname = format!("refs/heads/{}", self.branch);
        self.repo
            .commit(Some(&refname), &sig, &sig, message, &tree, &[&parent_commit])?;

        let mut remote = self
            .repo
            .find_remote(&self.remote_name)
            .map_err(|e| RepoError::Network(e.message().to_string()))?;

        let mut cb = RemoteCallbacks::new();
        cb.credentials(|_url, username_from_url, _allowed| {
            git2::Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"))
        });

        let mut rejected = false;
        cb.push_update_reference(|_refname, status| {
            if status.is_some() {
                rejected = true;
            }
            Ok(())
        });

        let mut po = git2::PushOptions::new();
        po.remote_callbacks(cb);

        let push_result = remote.push(&[format!("{0}:{0}", refname)], Some(&mut po));

        match push_result {
            Ok(()) if !rejected => Ok(PushOutcome::Committed),
            Ok(()) => Ok(PushOutcome::PushRejected),
            Err(e) => {
                if is_non_fast_forward(&e) {
                    Ok(PushOutcome::PushRejected)
                } else {
                    Err(RepoError::Network(e.message().to_string()))
                }
            }
        }
    }

    /// Runs `f` against the repo client with exclusive access, on a
    /// blocking-pool thread, bounded by `timeout`. `sync`/`commit_and_push`
    /// perform synchronous libgit2 network I/O; this is the only place that
    /// crosses onto `spawn_blocking`, so a hung remote can stall at most one
    /// blocking-pool thread for `timeout` rather than wedging the async
    /// worker thread every loop shares.
    pub async fn with_lock<T, F>(repo: &SharedRepo, timeout: Duration, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&RepoClient) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let repo = repo.clone();
        let join = tokio::task::spawn_blocking(move || {
            let guard = repo.blocking_lock();
            f(&guard)
        });

        match tokio::time::timeout(timeout, join).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(anyhow::anyhow!("git worker thread panicked: {join_err}")),
            Err(_elapsed) => Err(anyhow::anyhow!("git operation timed out after {:?}", timeout)),
        }
    }
}

fn is_non_fast_forward(err: &git2::Error) -> bool {
    matches!(err.code(), git2::ErrorCode::NotFastForward)
        || err.message().contains("non-fast-forward")
        || err.message().contains("fetch first")
}
