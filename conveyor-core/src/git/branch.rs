//! Branch lookup and creation

use git2::{BranchType, Commit};

use super::repo::GitRepo;
use crate::{Error, Result};

impl GitRepo {
    /// Check whether a local branch exists
    pub fn branch_exists(&self, name: &str) -> Result<bool> {
        match self.inner().find_branch(name, BranchType::Local) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(false),
            Err(e) => Err(Error::Git(format!("Failed to look up branch {}: {}", name, e))),
        }
    }

    /// Create a local branch pointing at the tip of `base`
    ///
    /// `base` may be a local branch, a remote tracking branch
    /// (`origin/main`) or any revision git can parse.
    pub fn create_branch(&self, name: &str, base: &str) -> Result<String> {
        let commit = self.resolve_base(base)?;
        self.inner()
            .branch(name, &commit, false)
            .map_err(|e| Error::Git(format!("Failed to create branch {}: {}", name, e)))?;

        tracing::debug!(branch = name, base, commit = %commit.id(), "Branch created");
        Ok(commit.id().to_string())
    }

    fn resolve_base(&self, base: &str) -> Result<Commit<'_>> {
        let repo = self.inner();

        // Try local branch first, then the origin tracking branch
        let candidates = [
            format!("refs/heads/{}", base),
            format!("refs/remotes/origin/{}", base),
            format!("refs/remotes/{}", base),
        ];
        for name in &candidates {
            if let Ok(reference) = repo.find_reference(name) {
                return reference
                    .peel_to_commit()
                    .map_err(|e| Error::Git(format!("Failed to resolve {}: {}", base, e)));
            }
        }

        repo.revparse_single(base)
            .and_then(|object| object.peel_to_commit())
            .map_err(|_| Error::Config(format!("Branch '{}' not found", base)))
    }
}
