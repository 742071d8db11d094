//! Version control operations for Conveyor
//!
//! Repository discovery and branch bookkeeping go through `git2`; reverting
//! a session's commits shells out to the `git` binary. Callers depend on the
//! [`VcsOps`] trait so rollback logic can be exercised without a repository.

mod branch;
mod repo;
mod vcs;

pub use repo::GitRepo;
pub use vcs::{GitVcs, VcsOps};
