//! Feature lifecycle phases and the transitions between them

use serde::{Deserialize, Serialize};

/// The lifecycle phase of a feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// No product requirements document yet
    NoPrd,
    /// PRD written, spec pipeline not started
    PrdReady,
    /// Spec pipeline running
    SpecInProgress,
    /// Spec written, waiting for a human to approve it
    SpecNeedsApproval,
    /// Spec approved, issue pipeline not started
    SpecApproved,
    /// Issues being created from the spec
    IssuesCreating,
    /// Created issues being validated
    IssuesValidating,
    /// Issues waiting for a human greenlight
    IssuesNeedReview,
    /// Issues greenlit, no implementation started
    ReadyToImplement,
    /// Implementation sessions running
    Implementing,
    /// All work done
    Complete,
    /// Needs human intervention
    Blocked,
}

impl Phase {
    /// Every phase, in lifecycle order
    pub const ALL: [Phase; 12] = [
        Phase::NoPrd,
        Phase::PrdReady,
        Phase::SpecInProgress,
        Phase::SpecNeedsApproval,
        Phase::SpecApproved,
        Phase::IssuesCreating,
        Phase::IssuesValidating,
        Phase::IssuesNeedReview,
        Phase::ReadyToImplement,
        Phase::Implementing,
        Phase::Complete,
        Phase::Blocked,
    ];

    /// The wire name used in stored records (e.g. `SPEC_APPROVED`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::NoPrd => "NO_PRD",
            Phase::PrdReady => "PRD_READY",
            Phase::SpecInProgress => "SPEC_IN_PROGRESS",
            Phase::SpecNeedsApproval => "SPEC_NEEDS_APPROVAL",
            Phase::SpecApproved => "SPEC_APPROVED",
            Phase::IssuesCreating => "ISSUES_CREATING",
            Phase::IssuesValidating => "ISSUES_VALIDATING",
            Phase::IssuesNeedReview => "ISSUES_NEED_REVIEW",
            Phase::ReadyToImplement => "READY_TO_IMPLEMENT",
            Phase::Implementing => "IMPLEMENTING",
            Phase::Complete => "COMPLETE",
            Phase::Blocked => "BLOCKED",
        }
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Phase::NoPrd => "Waiting for a PRD",
            Phase::PrdReady => "PRD ready for spec generation",
            Phase::SpecInProgress => "Generating spec",
            Phase::SpecNeedsApproval => "Spec awaiting approval",
            Phase::SpecApproved => "Spec approved",
            Phase::IssuesCreating => "Creating issues",
            Phase::IssuesValidating => "Validating issues",
            Phase::IssuesNeedReview => "Issues awaiting greenlight",
            Phase::ReadyToImplement => "Ready to implement",
            Phase::Implementing => "Implementing issues",
            Phase::Complete => "Feature complete",
            Phase::Blocked => "Blocked on human help",
        }
    }

    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete)
    }

    /// Phases reachable from this one in a normal run
    pub fn valid_transitions(&self) -> Vec<Phase> {
        let mut next = match self {
            Phase::NoPrd => vec![Phase::PrdReady],
            Phase::PrdReady => vec![Phase::SpecInProgress],
            Phase::SpecInProgress => vec![Phase::SpecNeedsApproval],
            Phase::SpecNeedsApproval => vec![Phase::SpecApproved, Phase::SpecInProgress],
            Phase::SpecApproved => vec![Phase::IssuesCreating],
            Phase::IssuesCreating => vec![Phase::IssuesValidating, Phase::IssuesNeedReview],
            Phase::IssuesValidating => vec![Phase::IssuesNeedReview],
            Phase::IssuesNeedReview => vec![Phase::ReadyToImplement, Phase::IssuesCreating],
            Phase::ReadyToImplement => vec![Phase::Implementing, Phase::Complete],
            Phase::Implementing => vec![Phase::Complete],
            Phase::Complete => return Vec::new(),
            Phase::Blocked => {
                return Phase::ALL
                    .into_iter()
                    .filter(|p| !p.is_terminal() && *p != Phase::Blocked)
                    .collect()
            }
        };
        next.push(Phase::Blocked);
        next
    }

    /// Check if moving to `to` is permitted by the transition table
    pub fn can_transition_to(&self, to: &Phase) -> bool {
        self.valid_transitions().contains(to)
    }

    /// Where a successful pipeline run in this phase leads, if anywhere
    pub fn on_pipeline_success(&self) -> Option<Phase> {
        match self {
            Phase::PrdReady | Phase::SpecInProgress => Some(Phase::SpecNeedsApproval),
            Phase::SpecApproved | Phase::IssuesCreating | Phase::IssuesValidating => {
                Some(Phase::IssuesNeedReview)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase().replace('-', "_");
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| crate::Error::Config(format!("Unknown phase '{}'", s)))
    }
}
