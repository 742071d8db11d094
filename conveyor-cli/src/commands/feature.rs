//! Feature commands - create, inspect, and list produced modules

use clap::Args;
use conveyor_core::Phase;

use super::Context;

/// A command that operates on one feature
#[derive(Args, Debug)]
pub struct FeatureArgs {
    /// Feature identifier
    pub feature: String,
}

impl FeatureArgs {
    /// Create the feature in NO_PRD
    pub fn init(&self, ctx: &Context) -> anyhow::Result<()> {
        let feature = ctx.store.create_feature(&self.feature, Phase::NoPrd)?;
        println!("Created feature {} ({})", feature.feature_id, feature.phase);
        Ok(())
    }

    /// Print phase, cost, tasks, sessions and locks
    pub fn status(&self, ctx: &Context) -> anyhow::Result<()> {
        let feature = ctx.store.load(&self.feature)?;
        let sessions = ctx.store.list_sessions(&self.feature)?;
        let manager = ctx.sessions();

        println!("Feature: {}", feature.feature_id);
        println!("  phase: {} ({})", feature.phase, feature.phase.description());
        println!("  cost: ${:.2}", feature.cost_total_usd);
        for (phase, cost) in &feature.cost_by_phase {
            println!("    {}: ${:.2}", phase, cost);
        }
        println!(
            "  updated: {}",
            feature.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        println!();
        if feature.tasks.is_empty() {
            println!("No tasks.");
        } else {
            let counts: Vec<String> = feature
                .stage_counts()
                .into_iter()
                .map(|(stage, n)| format!("{} {}", n, stage))
                .collect();
            println!("Tasks ({}):", counts.join(", "));
            for task in &feature.tasks {
                let lock = if manager.is_issue_locked(&feature.feature_id, task.issue_number)? {
                    " [locked]"
                } else {
                    ""
                };
                println!(
                    "  #{:<5} {:<16} {}{}",
                    task.issue_number, task.stage, task.title, lock
                );
                if !task.dependencies.is_empty() {
                    let deps: Vec<String> =
                        task.dependencies.iter().map(|d| format!("#{}", d)).collect();
                    println!("         depends on {}", deps.join(", "));
                }
                if let Some(ref reason) = task.blocked_reason {
                    println!("         blocked: {}", reason);
                }
            }
        }

        println!();
        if sessions.is_empty() {
            println!("No sessions.");
        } else {
            println!("Sessions:");
            for session in &sessions {
                let current = if feature.current_session_id.as_deref() == Some(session.session_id.as_str()) {
                    " (current)"
                } else {
                    ""
                };
                println!(
                    "  {} issue #{} {} ${:.2}{}",
                    session.session_id,
                    session.issue_number,
                    session.status,
                    session.total_cost(),
                    current
                );
            }
        }

        Ok(())
    }

    /// Print the module registry
    pub fn registry(&self, ctx: &Context) -> anyhow::Result<()> {
        let registry = ctx.store.get_module_registry(&self.feature)?;
        print!("{}", registry.render_context());
        Ok(())
    }
}
