//! CLI command implementations

pub mod feature;
pub mod git;
pub mod maintenance;
pub mod next;

use std::sync::Arc;

use conveyor_core::{Config, FeatureStateMachine, GitVcs, Secrets, SessionManager, StateStore};

pub use feature::FeatureArgs;
pub use git::{BranchArgs, RollbackArgs};
pub use maintenance::{LocksArgs, ReconcileArgs};
pub use next::{NextArgs, PhaseArgs};

/// Everything a command needs, opened once per invocation
pub struct Context {
    pub config: Config,
    pub store: StateStore,
}

impl Context {
    /// Open the record store named by the configuration
    pub fn open(config: Config) -> anyhow::Result<Self> {
        let secrets = Secrets::load()?;
        let store = StateStore::open(&config.state.root, secrets.signing_key());
        tracing::debug!(root = %config.state.root.display(), "Record store opened");
        Ok(Self { config, store })
    }

    /// Session manager, bound to the enclosing git repository if there is one
    pub fn sessions(&self) -> SessionManager {
        let manager = SessionManager::from_config(self.store.clone(), &self.config);
        let vcs = std::env::current_dir()
            .ok()
            .and_then(|cwd| GitVcs::discover(cwd).ok());
        match vcs {
            Some(vcs) => {
                let workdir = vcs.repo_root().to_path_buf();
                manager.with_vcs(Arc::new(vcs), workdir)
            }
            None => {
                tracing::debug!("Not inside a git repository; rollback and branches unavailable");
                manager
            }
        }
    }

    pub fn machine(&self) -> FeatureStateMachine {
        FeatureStateMachine::new(self.store.clone())
    }
}
