//! Next-action and phase commands

use clap::Args;
use conveyor_core::Phase;

use super::Context;

/// Print the next action as JSON
#[derive(Args, Debug)]
pub struct NextArgs {
    /// Feature identifier
    pub feature: String,

    /// Interrupt stale sessions and clean stale locks before deciding
    #[arg(long)]
    pub reconcile: bool,
}

impl NextArgs {
    pub fn execute(&self, ctx: &Context) -> anyhow::Result<()> {
        if self.reconcile {
            let report = ctx.sessions().reconcile_feature(&self.feature)?;
            if !report.is_clean() {
                tracing::info!(?report, "Reconciled before deciding");
            }
        }

        let action = ctx.machine().next_action(&self.feature)?;
        println!("{}", serde_json::to_string_pretty(&action)?);
        if action.kind.needs_human() {
            tracing::info!(
                feature_id = %self.feature,
                action = %action.kind,
                "Pipeline is waiting on a person"
            );
        }
        Ok(())
    }
}

/// Move a feature to another phase
#[derive(Args, Debug)]
pub struct PhaseArgs {
    /// Feature identifier
    pub feature: String,

    /// Target phase (e.g. SPEC_APPROVED)
    pub phase: Phase,

    /// Skip the transition check
    #[arg(short, long)]
    pub force: bool,
}

impl PhaseArgs {
    pub fn execute(&self, ctx: &Context) -> anyhow::Result<()> {
        let before = ctx.store.load(&self.feature)?.phase;
        let feature = if self.force {
            ctx.store.update_phase(&self.feature, self.phase)?
        } else {
            ctx.store.advance_phase(&self.feature, self.phase)?
        };
        println!("{}: {} -> {}", feature.feature_id, before, feature.phase);
        Ok(())
    }
}
