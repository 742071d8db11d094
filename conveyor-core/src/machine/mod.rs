//! Deciding what a feature needs next
//!
//! [`FeatureStateMachine::next_action`] reads a feature and its sessions and
//! returns exactly one [`Action`]. It never writes: the caller carries out
//! the action, persists the outcome, and asks again.

mod action;
mod selector;

use tracing::debug;

pub use action::{Action, ActionKind};
pub use selector::{find_dependency_cycle, IssueSelector, PriorityScorer};

use crate::model::{FeatureState, Phase, SessionState, SessionStatus, TaskRef, TaskStage};
use crate::store::StateStore;
use crate::Result;

/// Maps persisted feature state to the next action
pub struct FeatureStateMachine<S: IssueSelector = PriorityScorer> {
    store: StateStore,
    selector: S,
}

impl<S: IssueSelector> std::fmt::Debug for FeatureStateMachine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureStateMachine").finish_non_exhaustive()
    }
}

impl FeatureStateMachine<PriorityScorer> {
    /// State machine using the default priority scorer
    pub fn new(store: StateStore) -> Self {
        Self::with_selector(store, PriorityScorer::default())
    }
}

impl<S: IssueSelector> FeatureStateMachine<S> {
    pub fn with_selector(store: StateStore, selector: S) -> Self {
        Self { store, selector }
    }

    pub fn selector(&self) -> &S {
        &self.selector
    }

    /// Decide the next action for a feature
    ///
    /// Fails with [`crate::Error::FeatureNotFound`] when the feature has no
    /// record. Sessions are only read while the feature is IMPLEMENTING.
    pub fn next_action(&self, feature_id: &str) -> Result<Action> {
        let feature = self.store.load(feature_id)?;
        let sessions = if feature.phase == Phase::Implementing {
            self.store.list_sessions(feature_id)?
        } else {
            Vec::new()
        };

        let action = decide(&feature, &sessions, &self.selector);
        debug!(
            feature_id,
            phase = %feature.phase,
            action = %action.kind,
            issue_number = ?action.issue_number,
            "Next action decided"
        );
        Ok(action)
    }
}

/// The decision table, free of any I/O
///
/// `sessions` should be the feature's sessions oldest first, as
/// [`StateStore::list_sessions`] returns them.
pub fn decide<S: IssueSelector + ?Sized>(
    feature: &FeatureState,
    sessions: &[SessionState],
    selector: &S,
) -> Action {
    let id = feature.feature_id.as_str();

    match feature.phase {
        Phase::NoPrd => Action::new(ActionKind::AwaitPrd, id)
            .with_message("Waiting for a product requirements document"),
        Phase::PrdReady | Phase::SpecInProgress => Action::new(ActionKind::RunSpecPipeline, id),
        Phase::SpecNeedsApproval => Action::new(ActionKind::AwaitSpecApproval, id)
            .with_message("Spec is ready for review"),
        Phase::SpecApproved | Phase::IssuesCreating | Phase::IssuesValidating => {
            Action::new(ActionKind::RunIssuePipeline, id)
        }
        Phase::IssuesNeedReview => Action::new(ActionKind::AwaitIssueGreenlight, id)
            .with_message("Issues are ready for review"),
        Phase::Complete => Action::new(ActionKind::Complete, id),
        Phase::Blocked => {
            Action::new(ActionKind::AwaitHumanHelp, id).with_message(blocked_message(feature))
        }
        Phase::ReadyToImplement => {
            if feature.all_tasks_done() {
                return all_done(id);
            }
            match select_next(feature, selector) {
                Some(action) if action.kind == ActionKind::SelectIssue => {
                    action.with_suggested_phase(Phase::Implementing)
                }
                Some(action) => action,
                None => nothing_ready(feature),
            }
        }
        Phase::Implementing => {
            if feature.all_tasks_done() {
                return all_done(id);
            }

            let ours = || sessions.iter().filter(|s| s.feature_id == id);
            if let Some(session) = ours().find(|s| s.status == SessionStatus::Interrupted) {
                return Action::new(ActionKind::ResumeSession, id)
                    .with_issue(session.issue_number)
                    .with_session(&session.session_id);
            }
            if let Some(session) = ours().rev().find(|s| s.is_active()) {
                return Action::new(ActionKind::RunImplementation, id)
                    .with_issue(session.issue_number)
                    .with_session(&session.session_id);
            }

            select_next(feature, selector).unwrap_or_else(|| nothing_ready(feature))
        }
    }
}

fn all_done(feature_id: &str) -> Action {
    Action::new(ActionKind::Complete, feature_id)
        .with_suggested_phase(Phase::Complete)
        .with_message("All issues are done")
}

/// SELECT_ISSUE for the best eligible task, or AWAIT_HUMAN_HELP if READY
/// tasks exist but none can start
fn select_next<S: IssueSelector + ?Sized>(feature: &FeatureState, selector: &S) -> Option<Action> {
    let id = feature.feature_id.as_str();
    let ready: Vec<&TaskRef> = feature
        .tasks
        .iter()
        .filter(|t| t.stage == TaskStage::Ready)
        .collect();
    if ready.is_empty() {
        return None;
    }

    let eligible = selector.filter_unblocked(&ready, &feature.tasks);
    if let Some(task) = selector.select(&eligible) {
        let mut action = Action::new(ActionKind::SelectIssue, id).with_issue(task.issue_number);
        if !task.title.is_empty() {
            action = action.with_message(task.title.clone());
        }
        return Some(action);
    }

    Some(Action::new(ActionKind::AwaitHumanHelp, id).with_message(dependency_diagnosis(feature, &ready)))
}

/// No READY tasks and not everything is DONE
fn nothing_ready(feature: &FeatureState) -> Action {
    let remaining: Vec<String> = feature
        .stage_counts()
        .into_iter()
        .filter(|(stage, _)| *stage != TaskStage::Done.as_str())
        .map(|(stage, count)| format!("{} {}", count, stage))
        .collect();
    Action::new(ActionKind::Complete, &feature.feature_id).with_message(format!(
        "No READY issues left to select; remaining: {}",
        remaining.join(", ")
    ))
}

fn dependency_diagnosis(feature: &FeatureState, ready: &[&TaskRef]) -> String {
    if let Some(cycle) = find_dependency_cycle(&feature.tasks) {
        let path: Vec<String> = cycle.iter().map(|n| format!("#{}", n)).collect();
        return format!("Dependency cycle: {}", path.join(" -> "));
    }

    let waiting: Vec<String> = ready
        .iter()
        .map(|task| {
            let unmet: Vec<String> = task
                .dependencies
                .iter()
                .filter_map(|dep| match feature.task(*dep) {
                    None => Some(format!("#{} (missing)", dep)),
                    Some(t) if !t.is_done() => Some(format!("#{} ({})", dep, t.stage)),
                    Some(_) => None,
                })
                .collect();
            format!("#{} waits on {}", task.issue_number, unmet.join(", "))
        })
        .collect();
    format!("No READY issue can start: {}", waiting.join("; "))
}

fn blocked_message(feature: &FeatureState) -> String {
    let reasons: Vec<String> = feature
        .tasks
        .iter()
        .filter_map(|t| {
            t.blocked_reason
                .as_ref()
                .map(|reason| format!("#{}: {}", t.issue_number, reason))
        })
        .collect();
    if reasons.is_empty() {
        "Feature is blocked".to_string()
    } else {
        format!("Feature is blocked ({})", reasons.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskSize;
    use crate::Error;

    fn feature(phase: Phase, tasks: Vec<TaskRef>) -> FeatureState {
        let mut feature = FeatureState::new("f", phase);
        feature.tasks = tasks;
        feature
    }

    fn task(issue: u64, stage: TaskStage, deps: &[u64]) -> TaskRef {
        TaskRef::new(issue, stage).with_dependencies(deps.iter().copied())
    }

    fn session(issue: u64, status: SessionStatus) -> SessionState {
        let mut session = SessionState::new("f", issue, None);
        session.status = status;
        session
    }

    fn run(feature: &FeatureState, sessions: &[SessionState]) -> Action {
        decide(feature, sessions, &PriorityScorer::default())
    }

    #[test]
    fn test_select_first_ready_without_deps() {
        let f = feature(
            Phase::ReadyToImplement,
            vec![task(1, TaskStage::Ready, &[]), task(2, TaskStage::Ready, &[1])],
        );
        let action = run(&f, &[]);
        assert_eq!(action.kind, ActionKind::SelectIssue);
        assert_eq!(action.issue_number, Some(1));
        assert_eq!(action.suggested_phase, Some(Phase::Implementing));
    }

    #[test]
    fn test_select_dependent_once_dependency_done() {
        let f = feature(
            Phase::ReadyToImplement,
            vec![task(1, TaskStage::Done, &[]), task(2, TaskStage::Ready, &[1])],
        );
        let action = run(&f, &[]);
        assert_eq!(action.kind, ActionKind::SelectIssue);
        assert_eq!(action.issue_number, Some(2));
    }

    #[test]
    fn test_interrupted_session_wins_over_ready_tasks() {
        let f = feature(
            Phase::Implementing,
            vec![task(1, TaskStage::Ready, &[]), task(3, TaskStage::Interrupted, &[])],
        );
        let interrupted = session(3, SessionStatus::Interrupted);
        let action = run(&f, &[interrupted.clone()]);
        assert_eq!(action.kind, ActionKind::ResumeSession);
        assert_eq!(action.issue_number, Some(3));
        assert_eq!(action.session_id, Some(interrupted.session_id));
    }

    #[test]
    fn test_first_interrupted_session_is_resumed() {
        let f = feature(Phase::Implementing, vec![task(1, TaskStage::Ready, &[])]);
        let older = session(4, SessionStatus::Interrupted);
        let newer = session(5, SessionStatus::Interrupted);
        let active = session(6, SessionStatus::Active);
        let action = run(&f, &[older.clone(), active, newer]);
        assert_eq!(action.kind, ActionKind::ResumeSession);
        assert_eq!(action.session_id, Some(older.session_id));
    }

    #[test]
    fn test_active_session_continues() {
        let f = feature(Phase::Implementing, vec![task(1, TaskStage::InProgress, &[])]);
        let done = session(9, SessionStatus::Complete);
        let active = session(1, SessionStatus::Active);
        let action = run(&f, &[done, active.clone()]);
        assert_eq!(action.kind, ActionKind::RunImplementation);
        assert_eq!(action.session_id, Some(active.session_id));
        assert_eq!(action.issue_number, Some(1));
    }

    #[test]
    fn test_all_done_while_implementing() {
        let f = feature(
            Phase::Implementing,
            vec![task(1, TaskStage::Done, &[]), task(2, TaskStage::Done, &[1])],
        );
        let action = run(&f, &[session(2, SessionStatus::Interrupted)]);
        assert_eq!(action.kind, ActionKind::Complete);
        assert_eq!(action.suggested_phase, Some(Phase::Complete));
    }

    #[test]
    fn test_no_tasks_is_complete() {
        let action = run(&feature(Phase::ReadyToImplement, vec![]), &[]);
        assert_eq!(action.kind, ActionKind::Complete);
        assert_eq!(action.suggested_phase, Some(Phase::Complete));
    }

    #[test]
    fn test_ready_tasks_all_blocked_needs_human() {
        let f = feature(
            Phase::ReadyToImplement,
            vec![task(1, TaskStage::Ready, &[2]), task(2, TaskStage::Ready, &[1])],
        );
        let action = run(&f, &[]);
        assert_eq!(action.kind, ActionKind::AwaitHumanHelp);
        assert!(action.message.unwrap().contains("cycle"));

        let f = feature(
            Phase::Implementing,
            vec![task(1, TaskStage::Blocked, &[]), task(2, TaskStage::Ready, &[1, 7])],
        );
        let action = run(&f, &[]);
        assert_eq!(action.kind, ActionKind::AwaitHumanHelp);
        let message = action.message.unwrap();
        assert!(message.contains("#1 (BLOCKED)"));
        assert!(message.contains("#7 (missing)"));
    }

    #[test]
    fn test_nothing_ready_falls_through_to_complete() {
        let f = feature(
            Phase::ReadyToImplement,
            vec![task(1, TaskStage::Done, &[]), task(2, TaskStage::Skipped, &[])],
        );
        let action = run(&f, &[]);
        assert_eq!(action.kind, ActionKind::Complete);
        assert_eq!(action.suggested_phase, None);
        assert!(action.message.unwrap().contains("1 SKIPPED"));
    }

    #[test]
    fn test_fixed_phase_mapping() {
        let expected = [
            (Phase::NoPrd, ActionKind::AwaitPrd),
            (Phase::PrdReady, ActionKind::RunSpecPipeline),
            (Phase::SpecInProgress, ActionKind::RunSpecPipeline),
            (Phase::SpecNeedsApproval, ActionKind::AwaitSpecApproval),
            (Phase::SpecApproved, ActionKind::RunIssuePipeline),
            (Phase::IssuesCreating, ActionKind::RunIssuePipeline),
            (Phase::IssuesValidating, ActionKind::RunIssuePipeline),
            (Phase::IssuesNeedReview, ActionKind::AwaitIssueGreenlight),
            (Phase::Complete, ActionKind::Complete),
            (Phase::Blocked, ActionKind::AwaitHumanHelp),
        ];
        for (phase, kind) in expected {
            assert_eq!(run(&feature(phase, vec![]), &[]).kind, kind, "{phase}");
        }
    }

    #[test]
    fn test_every_phase_decides_for_any_task_mix() {
        let tasks = vec![
            task(1, TaskStage::Done, &[]),
            task(2, TaskStage::Ready, &[1]),
            task(3, TaskStage::Blocked, &[]),
            task(4, TaskStage::Ready, &[3]),
            task(5, TaskStage::Interrupted, &[]),
        ];
        let sessions = [session(5, SessionStatus::Interrupted), session(2, SessionStatus::Active)];
        for phase in Phase::ALL {
            let f = feature(phase, tasks.clone());
            let action = run(&f, &sessions);
            assert_eq!(action.feature_id, "f");
            match phase {
                Phase::Complete => assert_eq!(action.kind, ActionKind::Complete),
                Phase::Blocked => assert_eq!(action.kind, ActionKind::AwaitHumanHelp),
                _ => {}
            }
        }
    }

    #[test]
    fn test_blocked_message_lists_reasons() {
        let mut f = feature(Phase::Blocked, vec![task(1, TaskStage::Ready, &[])]);
        f.mark_task_blocked(1, "needs API key");
        let action = run(&f, &[]);
        assert!(action.message.unwrap().contains("#1: needs API key"));
    }

    /// Every ordering of a small task set, to check dependency gating does
    /// not depend on position
    fn permutations(items: Vec<TaskRef>) -> Vec<Vec<TaskRef>> {
        if items.len() <= 1 {
            return vec![items];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.clone();
            let head = rest.remove(i);
            for mut tail in permutations(rest) {
                tail.insert(0, head.clone());
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn test_dependency_gating_over_permutations() {
        let tasks = vec![
            task(1, TaskStage::Done, &[]),
            task(2, TaskStage::Ready, &[1]).with_size(TaskSize::Xl),
            task(3, TaskStage::Ready, &[4]).with_size(TaskSize::Xs).with_scores(1.0, 0.0),
            task(4, TaskStage::InProgress, &[]),
            task(5, TaskStage::Ready, &[42]).with_size(TaskSize::Xs).with_scores(1.0, 0.0),
        ];
        for order in permutations(tasks) {
            let f = feature(Phase::ReadyToImplement, order);
            let action = run(&f, &[]);
            assert_eq!(action.kind, ActionKind::SelectIssue);
            assert_eq!(action.issue_number, Some(2));
        }
    }

    #[test]
    fn test_next_action_reads_store() {
        let store = StateStore::in_memory("k");
        let machine = FeatureStateMachine::new(store.clone());
        assert!(matches!(
            machine.next_action("missing"),
            Err(Error::FeatureNotFound(_))
        ));

        let mut f = store.create_feature("f", Phase::Implementing).unwrap();
        f.add_task(task(1, TaskStage::Ready, &[])).unwrap();
        store.save(&f).unwrap();
        let mut interrupted = SessionState::new("f", 1, None);
        interrupted.status = SessionStatus::Interrupted;
        store.save_session(&interrupted).unwrap();

        let action = machine.next_action("f").unwrap();
        assert_eq!(action.kind, ActionKind::ResumeSession);
        assert_eq!(action.session_id, Some(interrupted.session_id));
    }
}
