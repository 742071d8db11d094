//! Feature and task records

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::phase::Phase;
use crate::{Error, Result};

/// Stage of a single task (issue) within a feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStage {
    Backlog,
    NeedsRevision,
    Ready,
    InProgress,
    Interrupted,
    Verifying,
    Done,
    Blocked,
    Skipped,
    ManualRequired,
}

impl TaskStage {
    /// The wire name used in stored records
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStage::Backlog => "BACKLOG",
            TaskStage::NeedsRevision => "NEEDS_REVISION",
            TaskStage::Ready => "READY",
            TaskStage::InProgress => "IN_PROGRESS",
            TaskStage::Interrupted => "INTERRUPTED",
            TaskStage::Verifying => "VERIFYING",
            TaskStage::Done => "DONE",
            TaskStage::Blocked => "BLOCKED",
            TaskStage::Skipped => "SKIPPED",
            TaskStage::ManualRequired => "MANUAL_REQUIRED",
        }
    }
}

impl std::fmt::Display for TaskStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// T-shirt size estimate for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskSize {
    Xs,
    S,
    M,
    L,
    Xl,
}

/// Files and symbols a completed task produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutputs {
    /// Paths of files the task created
    #[serde(default)]
    pub files_created: Vec<String>,
    /// Classes/functions/types defined, keyed by file path
    #[serde(default)]
    pub symbols: BTreeMap<String, Vec<String>>,
}

/// Score for a task whose value or risk was never estimated
fn neutral_score() -> f64 {
    0.5
}

/// A work item (issue) belonging to a feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRef {
    /// Issue number, unique within the feature
    pub issue_number: u64,
    /// Short title for display
    #[serde(default)]
    pub title: String,
    /// Current stage
    pub stage: TaskStage,
    /// Issues that must be DONE before this one is eligible
    #[serde(default)]
    pub dependencies: BTreeSet<u64>,
    /// Size estimate, if known
    #[serde(default)]
    pub estimated_size: Option<TaskSize>,
    /// Business value in [0, 1]
    #[serde(default = "neutral_score")]
    pub business_value_score: f64,
    /// Technical risk in [0, 1]
    #[serde(default = "neutral_score")]
    pub technical_risk_score: f64,
    /// Why the task is blocked, set with stage BLOCKED
    #[serde(default)]
    pub blocked_reason: Option<String>,
    /// Files and symbols produced, set on completion
    #[serde(default)]
    pub outputs: Option<TaskOutputs>,
    /// Readable summary of the completed work
    #[serde(default)]
    pub completion_summary: Option<String>,
    /// When the task reached DONE
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRef {
    /// Create a new task in the given stage
    pub fn new(issue_number: u64, stage: TaskStage) -> Self {
        Self {
            issue_number,
            title: String::new(),
            stage,
            dependencies: BTreeSet::new(),
            estimated_size: None,
            business_value_score: neutral_score(),
            technical_risk_score: neutral_score(),
            blocked_reason: None,
            outputs: None,
            completion_summary: None,
            completed_at: None,
        }
    }

    /// Set the title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Add dependencies
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = u64>) -> Self {
        self.dependencies.extend(deps);
        self
    }

    /// Set the size estimate
    pub fn with_size(mut self, size: TaskSize) -> Self {
        self.estimated_size = Some(size);
        self
    }

    /// Set value and risk scores
    pub fn with_scores(mut self, business_value: f64, technical_risk: f64) -> Self {
        self.business_value_score = business_value;
        self.technical_risk_score = technical_risk;
        self
    }

    /// Check if the task is DONE
    pub fn is_done(&self) -> bool {
        self.stage == TaskStage::Done
    }
}

/// Persistent state of one feature moving through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureState {
    /// Immutable identifier
    pub feature_id: String,
    /// Current lifecycle phase
    pub phase: Phase,
    /// Tasks in issue-creation order
    #[serde(default)]
    pub tasks: Vec<TaskRef>,
    /// Session currently executing for this feature
    #[serde(default)]
    pub current_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Total spend across all phases
    #[serde(default)]
    pub cost_total_usd: f64,
    /// Spend per phase
    #[serde(default)]
    pub cost_by_phase: BTreeMap<Phase, f64>,
}

impl FeatureState {
    /// Create a new feature record
    pub fn new(feature_id: impl Into<String>, phase: Phase) -> Self {
        let now = Utc::now();
        Self {
            feature_id: feature_id.into(),
            phase,
            tasks: Vec::new(),
            current_session_id: None,
            created_at: now,
            updated_at: now,
            cost_total_usd: 0.0,
            cost_by_phase: BTreeMap::new(),
        }
    }

    /// Refresh `updated_at`
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Change phase, refreshing `updated_at`
    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.touch();
    }

    /// Accumulate spend against a phase
    pub fn add_cost(&mut self, phase: Phase, usd: f64) -> Result<()> {
        if !usd.is_finite() || usd < 0.0 {
            return Err(Error::InvalidCost(usd));
        }
        self.cost_total_usd += usd;
        *self.cost_by_phase.entry(phase).or_insert(0.0) += usd;
        self.touch();
        Ok(())
    }

    /// Append a task; issue numbers must be unique
    pub fn add_task(&mut self, task: TaskRef) -> Result<()> {
        if self.task(task.issue_number).is_some() {
            return Err(Error::InvalidState {
                key: self.feature_id.clone(),
                reason: format!("duplicate issue number {}", task.issue_number),
            });
        }
        self.tasks.push(task);
        self.touch();
        Ok(())
    }

    /// Look up a task by issue number
    pub fn task(&self, issue_number: u64) -> Option<&TaskRef> {
        self.tasks.iter().find(|t| t.issue_number == issue_number)
    }

    /// Look up a task by issue number for mutation
    pub fn task_mut(&mut self, issue_number: u64) -> Option<&mut TaskRef> {
        self.tasks.iter_mut().find(|t| t.issue_number == issue_number)
    }

    /// Move a task to a new stage; returns false if the task is unknown
    pub fn set_task_stage(&mut self, issue_number: u64, stage: TaskStage) -> bool {
        let Some(task) = self.task_mut(issue_number) else {
            return false;
        };
        task.stage = stage;
        if stage != TaskStage::Blocked {
            task.blocked_reason = None;
        }
        self.touch();
        true
    }

    /// Mark a task DONE with its summary and produced outputs
    pub fn mark_task_done(
        &mut self,
        issue_number: u64,
        summary: Option<String>,
        outputs: Option<TaskOutputs>,
    ) -> bool {
        let Some(task) = self.task_mut(issue_number) else {
            return false;
        };
        task.stage = TaskStage::Done;
        task.blocked_reason = None;
        task.completion_summary = summary;
        task.outputs = outputs;
        task.completed_at = Some(Utc::now());
        self.touch();
        true
    }

    /// Mark a task BLOCKED with a reason
    pub fn mark_task_blocked(&mut self, issue_number: u64, reason: impl Into<String>) -> bool {
        let Some(task) = self.task_mut(issue_number) else {
            return false;
        };
        task.stage = TaskStage::Blocked;
        task.blocked_reason = Some(reason.into());
        self.touch();
        true
    }

    /// True when every task is DONE (vacuously true with no tasks)
    pub fn all_tasks_done(&self) -> bool {
        self.tasks.iter().all(TaskRef::is_done)
    }

    /// Count tasks per stage
    pub fn stage_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for task in &self.tasks {
            *counts.entry(task.stage.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature() -> FeatureState {
        let mut state = FeatureState::new("auth", Phase::ReadyToImplement);
        state.add_task(TaskRef::new(1, TaskStage::Ready)).unwrap();
        state
            .add_task(TaskRef::new(2, TaskStage::Ready).with_dependencies([1]))
            .unwrap();
        state
    }

    #[test]
    fn test_add_task_rejects_duplicates() {
        let mut state = feature();
        let result = state.add_task(TaskRef::new(1, TaskStage::Backlog));
        assert!(matches!(result, Err(Error::InvalidState { .. })));
        assert_eq!(state.tasks.len(), 2);
    }

    #[test]
    fn test_cost_accumulates_per_phase() {
        let mut state = feature();
        state.add_cost(Phase::SpecInProgress, 1.25).unwrap();
        state.add_cost(Phase::SpecInProgress, 0.75).unwrap();
        state.add_cost(Phase::Implementing, 3.0).unwrap();

        assert_eq!(state.cost_total_usd, 5.0);
        assert_eq!(state.cost_by_phase[&Phase::SpecInProgress], 2.0);
        assert_eq!(state.cost_by_phase[&Phase::Implementing], 3.0);
    }

    #[test]
    fn test_cost_rejects_negative_and_nan() {
        let mut state = feature();
        assert!(matches!(state.add_cost(Phase::NoPrd, -1.0), Err(Error::InvalidCost(_))));
        assert!(state.add_cost(Phase::NoPrd, f64::NAN).is_err());
        assert_eq!(state.cost_total_usd, 0.0);
    }

    #[test]
    fn test_set_phase_refreshes_updated_at() {
        let mut state = feature();
        let before = state.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        state.set_phase(Phase::Implementing);
        assert!(state.updated_at > before);
    }

    #[test]
    fn test_mark_done_and_blocked() {
        let mut state = feature();
        assert!(state.mark_task_blocked(2, "waiting on API key"));
        assert_eq!(state.task(2).unwrap().blocked_reason.as_deref(), Some("waiting on API key"));

        assert!(state.mark_task_done(1, Some("added login".into()), None));
        let task = state.task(1).unwrap();
        assert!(task.is_done());
        assert!(task.completed_at.is_some());

        assert!(!state.all_tasks_done());
        state.set_task_stage(2, TaskStage::Done);
        assert!(state.task(2).unwrap().blocked_reason.is_none());
        assert!(state.all_tasks_done());
    }

    #[test]
    fn test_unknown_task_is_reported() {
        let mut state = feature();
        assert!(!state.set_task_stage(99, TaskStage::Done));
        assert!(!state.mark_task_done(99, None, None));
    }

    #[test]
    fn test_phase_keys_serialize_as_names() {
        let mut state = feature();
        state.add_cost(Phase::IssuesCreating, 0.5).unwrap();
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["cost_by_phase"]["ISSUES_CREATING"], 0.5);
        assert_eq!(json["tasks"][0]["stage"], "READY");
    }

    #[test]
    fn test_task_without_scores_matches_constructor() {
        let task: TaskRef = serde_json::from_str(r#"{"issue_number": 1, "stage": "READY"}"#).unwrap();
        assert_eq!(task, TaskRef::new(1, TaskStage::Ready));
        assert_eq!(task.business_value_score, 0.5);
        assert_eq!(task.technical_risk_score, 0.5);
    }

    #[test]
    fn test_stage_display_honors_width() {
        assert_eq!(format!("[{:<12}]", TaskStage::Ready), "[READY       ]");
        assert_eq!(format!("[{:>6}]", TaskStage::Done), "[  DONE]");
    }
}
