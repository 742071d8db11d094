//! Conveyor Core - control plane for the feature pipeline
//!
//! This crate keeps the durable state of features moving from requirements
//! to implemented issues: signed feature and session records, issue locks
//! and session lifecycle, and the state machine that decides what each
//! feature needs next.

pub mod config;
pub mod error;
pub mod git;
pub mod machine;
pub mod model;
pub mod secrets;
pub mod session;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
pub use git::{GitVcs, VcsOps};
pub use machine::{Action, ActionKind, FeatureStateMachine, IssueSelector, PriorityScorer};
pub use model::{
    AgentResult, EndStatus, FeatureState, Phase, SessionState, SessionStatus, TaskRef, TaskStage,
};
pub use secrets::Secrets;
pub use session::{ReconcileReport, RollbackOutcome, SessionManager};
pub use store::{ModuleRegistry, StateStore};
