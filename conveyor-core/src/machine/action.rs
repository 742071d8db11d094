//! The single next step the state machine hands back to its caller

use serde::{Deserialize, Serialize};

use crate::model::Phase;

/// What kind of step to take next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    /// Wait for someone to supply the product requirements
    AwaitPrd,
    /// Run the spec-writing pipeline
    RunSpecPipeline,
    /// Wait for a human to approve the spec
    AwaitSpecApproval,
    /// Run the issue creation/validation pipeline
    RunIssuePipeline,
    /// Wait for a human to greenlight the issues
    AwaitIssueGreenlight,
    /// Claim and start the named issue
    SelectIssue,
    /// Pick an interrupted session back up
    ResumeSession,
    /// Keep going with the active session
    RunImplementation,
    /// Nothing left to do
    Complete,
    /// Stuck until a human intervenes
    AwaitHumanHelp,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::AwaitPrd => "AWAIT_PRD",
            ActionKind::RunSpecPipeline => "RUN_SPEC_PIPELINE",
            ActionKind::AwaitSpecApproval => "AWAIT_SPEC_APPROVAL",
            ActionKind::RunIssuePipeline => "RUN_ISSUE_PIPELINE",
            ActionKind::AwaitIssueGreenlight => "AWAIT_ISSUE_GREENLIGHT",
            ActionKind::SelectIssue => "SELECT_ISSUE",
            ActionKind::ResumeSession => "RESUME_SESSION",
            ActionKind::RunImplementation => "RUN_IMPLEMENTATION",
            ActionKind::Complete => "COMPLETE",
            ActionKind::AwaitHumanHelp => "AWAIT_HUMAN_HELP",
        }
    }

    /// True for actions that wait on a person rather than run something
    pub fn needs_human(&self) -> bool {
        matches!(
            self,
            ActionKind::AwaitPrd
                | ActionKind::AwaitSpecApproval
                | ActionKind::AwaitIssueGreenlight
                | ActionKind::AwaitHumanHelp
        )
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// One decision of the state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub feature_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Phase the caller should move the feature to after acting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_phase: Option<Phase>,
}

impl Action {
    pub fn new(kind: ActionKind, feature_id: impl Into<String>) -> Self {
        Self {
            kind,
            feature_id: feature_id.into(),
            issue_number: None,
            session_id: None,
            message: None,
            suggested_phase: None,
        }
    }

    pub fn with_issue(mut self, issue_number: u64) -> Self {
        self.issue_number = Some(issue_number);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_suggested_phase(mut self, phase: Phase) -> Self {
        self.suggested_phase = Some(phase);
        self
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.kind, self.feature_id)?;
        if let Some(issue) = self.issue_number {
            write!(f, " issue #{}", issue)?;
        }
        if let Some(ref session) = self.session_id {
            write!(f, " session {}", session)?;
        }
        if let Some(ref message) = self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}
