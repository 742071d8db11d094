//! Records persisted by the state store

mod agent;
mod feature;
mod phase;
mod session;

pub use agent::AgentResult;
pub use feature::{FeatureState, TaskOutputs, TaskRef, TaskSize, TaskStage};
pub use phase::Phase;
pub use session::{Checkpoint, EndStatus, SessionState, SessionStatus};
