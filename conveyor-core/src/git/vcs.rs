//! The version control seam used by session rollback and branch bookkeeping

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};

use super::repo::GitRepo;
use crate::{Error, Result};

/// Version control operations the session manager depends on
pub trait VcsOps: Send + Sync {
    /// Revert `commits` in the given order inside `workdir` and record the
    /// result as a single commit; returns that commit's SHA
    fn revert_commits(&self, workdir: &Path, commits: &[String], message: &str) -> Result<String>;

    /// Check whether a local branch exists
    fn branch_exists(&self, name: &str) -> Result<bool>;

    /// Create a branch from `base`
    fn create_branch(&self, name: &str, base: &str) -> Result<()>;
}

/// [`VcsOps`] backed by a real repository
#[derive(Debug, Clone)]
pub struct GitVcs {
    repo_root: PathBuf,
}

impl GitVcs {
    /// Use the repository containing `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: path.into(),
        }
    }

    /// Use the repository containing `path`, failing if there is none
    pub fn discover(path: impl AsRef<Path>) -> Result<Self> {
        let repo = GitRepo::open(path)?;
        debug!(
            root = %repo.root().display(),
            branch = ?repo.current_branch()?,
            "Using git repository"
        );
        Ok(Self::new(repo.root()))
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    fn open(&self) -> Result<GitRepo> {
        GitRepo::open(&self.repo_root)
    }
}

/// Run a git subcommand in `workdir`, returning stderr on failure
fn run_git(workdir: &Path, args: &[&str]) -> Result<()> {
    let output = Command::new("git")
        .args(args)
        .current_dir(workdir)
        .output()
        .map_err(|e| Error::Git(format!("Failed to run git {}: {}", args.join(" "), e)))?;

    if !output.status.success() {
        return Err(Error::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(())
}

impl VcsOps for GitVcs {
    fn revert_commits(&self, workdir: &Path, commits: &[String], message: &str) -> Result<String> {
        if commits.is_empty() {
            return Err(Error::Git("No commits to revert".to_string()));
        }

        for commit in commits {
            debug!(commit = %commit, workdir = %workdir.display(), "Reverting commit");
            if let Err(e) = run_git(workdir, &["revert", "--no-commit", commit]) {
                if let Err(abort) = run_git(workdir, &["revert", "--abort"]) {
                    warn!(error = %abort, "git revert --abort failed");
                }
                return Err(e);
            }
        }

        if let Err(e) = run_git(workdir, &["commit", "--no-verify", "-m", message]) {
            if let Err(abort) = run_git(workdir, &["revert", "--abort"]) {
                warn!(error = %abort, "git revert --abort failed");
            }
            return Err(e);
        }

        GitRepo::open(workdir)?.head_commit()
    }

    fn branch_exists(&self, name: &str) -> Result<bool> {
        self.open()?.branch_exists(name)
    }

    fn create_branch(&self, name: &str, base: &str) -> Result<()> {
        self.open()?.create_branch(name, base).map(|_| ())
    }
}
