//! Session records: one attempt at implementing one issue

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Interrupted,
    Complete,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Interrupted => "interrupted",
            SessionStatus::Complete => "complete",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// How a completed session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndStatus {
    Success,
    Failed,
    Blocked,
}

impl std::fmt::Display for EndStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EndStatus::Success => "success",
            EndStatus::Failed => "failed",
            EndStatus::Blocked => "blocked",
        };
        f.pad(s)
    }
}

/// Append-only progress marker within a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Agent that produced this checkpoint (e.g. "coder", "verifier")
    pub agent: String,
    /// Free-form status label reported by the agent
    pub status: String,
    pub timestamp: DateTime<Utc>,
    /// Commit created by this step, if any
    #[serde(default)]
    pub commit: Option<String>,
    /// Incremental spend for this step
    #[serde(default)]
    pub cost_usd: f64,
}

/// Persistent record of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub feature_id: String,
    pub issue_number: u64,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_status: Option<EndStatus>,
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
    /// Commits created during the session, oldest first
    #[serde(default)]
    pub commits: Vec<String>,
    /// Isolated working copy, if the session runs in one
    #[serde(default)]
    pub worktree_path: Option<PathBuf>,
}

impl SessionState {
    /// Create a new active session with a fresh id
    pub fn new(
        feature_id: impl Into<String>,
        issue_number: u64,
        worktree_path: Option<PathBuf>,
    ) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            feature_id: feature_id.into(),
            issue_number,
            status: SessionStatus::Active,
            started_at: Utc::now(),
            ended_at: None,
            end_status: None,
            checkpoints: Vec::new(),
            commits: Vec::new(),
            worktree_path,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Sum of checkpoint costs
    pub fn total_cost(&self) -> f64 {
        self.checkpoints.iter().map(|c| c.cost_usd).sum()
    }

    /// Most recent sign of life: the later of start and last checkpoint
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.checkpoints
            .iter()
            .map(|c| c.timestamp)
            .fold(self.started_at, |latest, ts| latest.max(ts))
    }
}
