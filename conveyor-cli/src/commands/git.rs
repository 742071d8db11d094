//! Git-facing commands - issue branches and rollback

use clap::Args;

use super::Context;

/// Create (or confirm) the branch for an issue
#[derive(Args, Debug)]
pub struct BranchArgs {
    /// Feature identifier
    pub feature: String,

    /// Issue number
    pub issue: u64,
}

impl BranchArgs {
    pub fn execute(&self, ctx: &Context) -> anyhow::Result<()> {
        let branch = ctx.sessions().ensure_issue_branch(&self.feature, self.issue)?;
        println!("{}", branch);
        Ok(())
    }
}

/// Revert the commits a session (or every session of an issue) recorded
#[derive(Args, Debug)]
pub struct RollbackArgs {
    /// Session identifier, or feature identifier when --issue is given
    pub target: String,

    /// Roll back every session of this issue in the feature named by TARGET
    #[arg(long)]
    pub issue: Option<u64>,
}

impl RollbackArgs {
    pub fn execute(&self, ctx: &Context) -> anyhow::Result<()> {
        let manager = ctx.sessions();
        let outcome = match self.issue {
            Some(issue) => manager.rollback_issue(&self.target, issue)?,
            None => manager.rollback_session(&self.target)?,
        };

        match outcome.revert_commit {
            Some(ref commit) => {
                println!("Reverted {} commit(s) in {}", outcome.reverted.len(), commit);
                for reverted in &outcome.reverted {
                    println!("  {}", reverted);
                }
            }
            None => println!("No commits to roll back"),
        }
        Ok(())
    }
}
