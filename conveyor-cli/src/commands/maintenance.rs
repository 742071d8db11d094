//! Recovery commands - reconcile sessions and manage issue locks

use clap::{Args, Subcommand};

use super::Context;

/// Interrupt stale sessions, clean stale locks, repair the session pointer
#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Feature identifier
    pub feature: String,
}

impl ReconcileArgs {
    pub fn execute(&self, ctx: &Context) -> anyhow::Result<()> {
        let report = ctx.sessions().reconcile_feature(&self.feature)?;
        if report.is_clean() {
            println!("Nothing to reconcile for {}", self.feature);
            return Ok(());
        }

        for session_id in &report.interrupted_sessions {
            println!("Interrupted stale session {}", session_id);
        }
        for issue in &report.cleaned_locks {
            println!("Removed stale lock on #{}", issue);
        }
        if report.repaired_current_session {
            println!("Repaired current session pointer");
        }
        Ok(())
    }
}

/// Issue lock commands
#[derive(Args, Debug)]
pub struct LocksArgs {
    #[command(subcommand)]
    pub command: LocksCommand,
}

#[derive(Subcommand, Debug)]
pub enum LocksCommand {
    /// Remove a feature's issue locks
    Clear {
        /// Feature identifier
        feature: String,

        /// Only remove expired or unreadable locks
        #[arg(long)]
        stale: bool,
    },
}

impl LocksArgs {
    pub fn execute(&self, ctx: &Context) -> anyhow::Result<()> {
        match &self.command {
            LocksCommand::Clear { feature, stale } => {
                let manager = ctx.sessions();
                let cleared = if *stale {
                    manager.clean_stale_locks(feature)?
                } else {
                    manager.clear_all_locks(feature)?
                };
                if cleared.is_empty() {
                    println!("No locks removed");
                } else {
                    let issues: Vec<String> = cleared.iter().map(|n| format!("#{}", n)).collect();
                    println!("Removed locks: {}", issues.join(", "));
                }
                Ok(())
            }
        }
    }
}
