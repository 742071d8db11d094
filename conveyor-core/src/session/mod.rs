//! Session lifecycle, issue locks and rollback
//!
//! A session is one attempt at implementing one issue. At most one session
//! per feature is active at a time; the feature record points at it through
//! `current_session_id`. Issue locks are a separate, time-bounded claim on
//! an issue number (see [`locks`]).
//!
//! Nothing here spans processes transactionally. A worker that dies between
//! claiming, starting and saving leaves state that [`SessionManager::reconcile_feature`]
//! repairs once the session TTL or lock timeout has passed.

mod locks;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{Config, GitConfig};
use crate::git::VcsOps;
use crate::model::{Checkpoint, EndStatus, FeatureState, SessionState, SessionStatus, TaskStage};
use crate::store::StateStore;
use crate::{Error, Result};

/// Agent name used for checkpoints the manager itself writes
const MANAGER_AGENT: &str = "conveyor";

/// Result of a rollback
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackOutcome {
    /// Commits reverted, in the order they were reverted (newest first)
    pub reverted: Vec<String>,
    /// The single commit recording the revert; `None` when nothing was reverted
    pub revert_commit: Option<String>,
}

/// What [`SessionManager::reconcile_feature`] repaired
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Stale sessions moved to "interrupted"
    pub interrupted_sessions: Vec<String>,
    /// Issues whose lock marker was removed
    pub cleaned_locks: Vec<u64>,
    /// Whether `current_session_id` had to be corrected
    pub repaired_current_session: bool,
}

impl ReconcileReport {
    /// True when nothing needed repair
    pub fn is_clean(&self) -> bool {
        self.interrupted_sessions.is_empty()
            && self.cleaned_locks.is_empty()
            && !self.repaired_current_session
    }
}

struct VcsBinding {
    ops: Arc<dyn VcsOps>,
    /// Working copy used when a session has no worktree of its own
    workdir: PathBuf,
}

/// Owns session records, issue locks and session rollback
pub struct SessionManager {
    store: StateStore,
    vcs: Option<VcsBinding>,
    session_ttl: Duration,
    lock_timeout: Duration,
    git: GitConfig,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("session_ttl", &self.session_ttl)
            .field("lock_timeout", &self.lock_timeout)
            .field("vcs", &self.vcs.as_ref().map(|v| &v.workdir))
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager with default timeouts and no version control
    pub fn new(store: StateStore) -> Self {
        Self::from_config(store, &Config::default())
    }

    /// Create a manager using the configured timeouts and branch settings
    pub fn from_config(store: StateStore, config: &Config) -> Self {
        Self {
            store,
            vcs: None,
            session_ttl: config.session.ttl,
            lock_timeout: config.locks.stale_timeout,
            git: config.git.clone(),
        }
    }

    /// Attach version control for rollback and branch bookkeeping
    pub fn with_vcs(mut self, ops: Arc<dyn VcsOps>, workdir: impl Into<PathBuf>) -> Self {
        self.vcs = Some(VcsBinding {
            ops,
            workdir: workdir.into(),
        });
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    fn vcs(&self) -> Result<&VcsBinding> {
        self.vcs
            .as_ref()
            .ok_or_else(|| Error::Config("No version control configured".to_string()))
    }

    /// Start a session for an issue
    ///
    /// Fails with [`Error::FeatureNotFound`] if the feature has no record and
    /// with [`Error::SessionAlreadyActive`] if another session is running.
    pub fn start_session(
        &self,
        feature_id: &str,
        issue_number: u64,
        worktree_path: Option<PathBuf>,
    ) -> Result<SessionState> {
        // Fail on a missing feature before anything is written
        self.store.load(feature_id)?;
        if let Some(active) = self.store.get_active_session(feature_id)? {
            return Err(Error::SessionAlreadyActive {
                feature_id: feature_id.to_string(),
                session_id: active.session_id,
            });
        }

        let session = SessionState::new(feature_id, issue_number, worktree_path);
        self.store.save_session(&session)?;

        self.store.update_feature(feature_id, |feature| {
            feature.current_session_id = Some(session.session_id.clone());
            if feature.task(issue_number).is_some_and(|t| !t.is_done()) {
                feature.set_task_stage(issue_number, TaskStage::InProgress);
            }
            feature.touch();
            Ok(())
        })?;

        info!(
            feature_id,
            issue_number,
            session_id = %session.session_id,
            "Session started"
        );
        Ok(session)
    }

    fn load_active(&self, session_id: &str) -> Result<SessionState> {
        let session = self.store.load_session(session_id)?;
        if !session.is_active() {
            return Err(Error::SessionNotActive {
                session_id: session_id.to_string(),
                status: session.status.to_string(),
            });
        }
        Ok(session)
    }

    /// Record progress on an active session
    pub fn add_checkpoint(
        &self,
        session_id: &str,
        agent: &str,
        status: &str,
        commit: Option<String>,
        cost_usd: f64,
    ) -> Result<SessionState> {
        if !cost_usd.is_finite() || cost_usd < 0.0 {
            return Err(Error::InvalidCost(cost_usd));
        }
        let mut session = self.load_active(session_id)?;

        if let Some(ref hash) = commit {
            if !session.commits.contains(hash) {
                session.commits.push(hash.clone());
            }
        }
        session.checkpoints.push(Checkpoint {
            agent: agent.to_string(),
            status: status.to_string(),
            timestamp: Utc::now(),
            commit,
            cost_usd,
        });
        self.store.save_session(&session)?;

        debug!(session_id, agent, status, cost_usd, "Checkpoint added");
        Ok(session)
    }

    /// Record a commit made during a session
    pub fn add_commit(&self, session_id: &str, commit_hash: &str) -> Result<SessionState> {
        let mut session = self.store.load_session(session_id)?;
        if session.status == SessionStatus::Complete {
            return Err(Error::SessionAlreadyComplete(session_id.to_string()));
        }
        if !session.commits.iter().any(|c| c == commit_hash) {
            session.commits.push(commit_hash.to_string());
            self.store.save_session(&session)?;
        }
        debug!(session_id, commit = commit_hash, "Commit recorded");
        Ok(session)
    }

    /// Finish a session
    ///
    /// A failed session leaves its task INTERRUPTED; a blocked one marks the
    /// task BLOCKED. The issue lock is released either way.
    pub fn end_session(&self, session_id: &str, end_status: EndStatus) -> Result<SessionState> {
        let mut session = self.store.load_session(session_id)?;
        if session.status == SessionStatus::Complete {
            return Err(Error::SessionAlreadyComplete(session_id.to_string()));
        }

        session.status = SessionStatus::Complete;
        session.end_status = Some(end_status);
        session.ended_at = Some(Utc::now());
        self.store.save_session(&session)?;

        let issue_number = session.issue_number;
        self.store.update_feature(&session.feature_id, |feature| {
            if feature.current_session_id.as_deref() == Some(session_id) {
                feature.current_session_id = None;
            }
            let in_progress = feature
                .task(issue_number)
                .is_some_and(|t| t.stage == TaskStage::InProgress);
            match end_status {
                EndStatus::Success => {}
                EndStatus::Failed if in_progress => {
                    feature.set_task_stage(issue_number, TaskStage::Interrupted);
                }
                EndStatus::Failed => {}
                // Completion bookkeeping may already have marked it DONE
                EndStatus::Blocked if feature.task(issue_number).is_some_and(|t| t.is_done()) => {}
                EndStatus::Blocked => {
                    feature.mark_task_blocked(
                        issue_number,
                        format!("Session {} ended blocked", session_id),
                    );
                }
            }
            feature.touch();
            Ok(())
        })?;
        self.release_issue(&session.feature_id, issue_number)?;

        info!(
            session_id,
            feature_id = %session.feature_id,
            issue_number,
            end_status = %end_status,
            cost_usd = session.total_cost(),
            "Session ended"
        );
        Ok(session)
    }

    /// Move an active session to "interrupted"
    pub fn mark_as_interrupted(&self, session_id: &str) -> Result<SessionState> {
        let mut session = self.load_active(session_id)?;
        session.status = SessionStatus::Interrupted;
        self.store.save_session(&session)?;

        let issue_number = session.issue_number;
        self.store.update_feature(&session.feature_id, |feature| {
            if feature.current_session_id.as_deref() == Some(session_id) {
                feature.current_session_id = None;
            }
            interrupt_task(feature, issue_number);
            feature.touch();
            Ok(())
        })?;
        self.release_issue(&session.feature_id, issue_number)?;

        info!(
            session_id,
            feature_id = %session.feature_id,
            issue_number,
            "Session interrupted"
        );
        Ok(session)
    }

    /// Make an interrupted session active again
    ///
    /// Resuming writes a checkpoint so the session's staleness clock restarts.
    pub fn resume_session(&self, session_id: &str) -> Result<SessionState> {
        let mut session = self.store.load_session(session_id)?;
        match session.status {
            SessionStatus::Complete => {
                return Err(Error::SessionAlreadyComplete(session_id.to_string()))
            }
            SessionStatus::Active => return Ok(session),
            SessionStatus::Interrupted => {}
        }
        if let Some(active) = self.store.get_active_session(&session.feature_id)? {
            return Err(Error::SessionAlreadyActive {
                feature_id: session.feature_id,
                session_id: active.session_id,
            });
        }

        session.status = SessionStatus::Active;
        session.checkpoints.push(Checkpoint {
            agent: MANAGER_AGENT.to_string(),
            status: "resumed".to_string(),
            timestamp: Utc::now(),
            commit: None,
            cost_usd: 0.0,
        });
        self.store.save_session(&session)?;

        let issue_number = session.issue_number;
        self.store.update_feature(&session.feature_id, |feature| {
            feature.current_session_id = Some(session_id.to_string());
            if feature.task(issue_number).is_some_and(|t| !t.is_done()) {
                feature.set_task_stage(issue_number, TaskStage::InProgress);
            }
            feature.touch();
            Ok(())
        })?;

        info!(
            session_id,
            feature_id = %session.feature_id,
            issue_number,
            "Session resumed"
        );
        Ok(session)
    }

    /// Total spend recorded against a session
    pub fn session_cost(&self, session_id: &str) -> Result<f64> {
        Ok(self.store.load_session(session_id)?.total_cost())
    }

    fn revert(
        &self,
        workdir: Option<&Path>,
        mut commits: Vec<String>,
        message: &str,
    ) -> Result<RollbackOutcome> {
        if commits.is_empty() {
            info!("{}: no commits to revert", message);
            return Ok(RollbackOutcome::default());
        }
        let vcs = self.vcs()?;
        commits.reverse();
        let workdir = workdir.unwrap_or(&vcs.workdir);
        let revert_commit = vcs.ops.revert_commits(workdir, &commits, message)?;

        info!(
            reverted = commits.len(),
            revert_commit = %revert_commit,
            "{}",
            message
        );
        Ok(RollbackOutcome {
            reverted: commits,
            revert_commit: Some(revert_commit),
        })
    }

    /// Revert every commit a session recorded, newest first, as one commit
    pub fn rollback_session(&self, session_id: &str) -> Result<RollbackOutcome> {
        let session = self.store.load_session(session_id)?;
        let message = format!(
            "Roll back session {} (feature {}, issue #{})",
            session.session_id, session.feature_id, session.issue_number
        );
        self.revert(session.worktree_path.as_deref(), session.commits, &message)
    }

    /// Revert the commits of every session for an issue, newest first
    pub fn rollback_issue(&self, feature_id: &str, issue_number: u64) -> Result<RollbackOutcome> {
        let sessions: Vec<SessionState> = self
            .store
            .list_sessions(feature_id)?
            .into_iter()
            .filter(|s| s.issue_number == issue_number)
            .collect();

        let mut commits: Vec<String> = Vec::new();
        for commit in sessions.iter().flat_map(|s| s.commits.iter()) {
            if !commits.contains(commit) {
                commits.push(commit.clone());
            }
        }
        let workdir = sessions.iter().rev().find_map(|s| s.worktree_path.clone());

        let message = format!("Roll back issue #{} (feature {})", issue_number, feature_id);
        self.revert(workdir.as_deref(), commits, &message)
    }

    fn is_stale_at(&self, session: &SessionState, now: DateTime<Utc>) -> bool {
        if !session.is_active() {
            return false;
        }
        // A timestamp in the future gives a negative age: not stale
        (now - session.last_activity())
            .to_std()
            .is_ok_and(|age| age > self.session_ttl)
    }

    /// True if the session is active but has shown no activity within the TTL
    pub fn is_session_stale(&self, session_id: &str) -> Result<bool> {
        let session = self.store.load_session(session_id)?;
        Ok(self.is_stale_at(&session, Utc::now()))
    }

    /// Interrupt every stale active session of a feature
    ///
    /// Each one is marked interrupted, its issue lock is released and a task
    /// left IN_PROGRESS for it moves to INTERRUPTED. Returns the ids of the
    /// sessions interrupted.
    ///
    /// A session record that fails to load (bad signature or unparseable
    /// timestamp) fails the whole call; fix or remove it by hand first.
    pub fn cleanup_stale_sessions(&self, feature_id: &str) -> Result<Vec<String>> {
        let now = Utc::now();
        let stale: Vec<SessionState> = self
            .store
            .list_sessions(feature_id)?
            .into_iter()
            .filter(|s| self.is_stale_at(s, now))
            .collect();
        if stale.is_empty() {
            return Ok(Vec::new());
        }

        for session in &stale {
            warn!(
                feature_id,
                session_id = %session.session_id,
                issue_number = session.issue_number,
                last_activity = %session.last_activity(),
                "Interrupting stale session"
            );
            let mut session = session.clone();
            session.status = SessionStatus::Interrupted;
            self.store.save_session(&session)?;
            self.release_issue(feature_id, session.issue_number)?;
        }

        self.store.update_feature(feature_id, |feature| {
            for session in &stale {
                interrupt_task(feature, session.issue_number);
                if feature.current_session_id.as_deref() == Some(session.session_id.as_str()) {
                    feature.current_session_id = None;
                }
            }
            feature.touch();
            Ok(())
        })?;

        Ok(stale.into_iter().map(|s| s.session_id).collect())
    }

    /// End a still-active session whose task was already marked DONE
    ///
    /// Safe to call repeatedly. Returns true if the session was ended by this
    /// call. The issue lock is released whenever the task is DONE.
    pub fn finalize_session_on_task_done(&self, session_id: &str, issue_number: u64) -> Result<bool> {
        let session = self.store.load_session(session_id)?;
        let feature = self.store.load(&session.feature_id)?;
        if !feature.task(issue_number).is_some_and(|t| t.is_done()) {
            return Ok(false);
        }

        let ended = if session.is_active() && session.issue_number == issue_number {
            self.end_session(session_id, EndStatus::Success)?;
            info!(session_id, issue_number, "Finalized session for completed task");
            true
        } else {
            false
        };
        self.release_issue(&session.feature_id, issue_number)?;
        Ok(ended)
    }

    /// Bring a feature's sessions, locks and session pointer back in line
    ///
    /// Interrupts stale sessions, removes stale locks and points
    /// `current_session_id` at the active session (or clears it).
    pub fn reconcile_feature(&self, feature_id: &str) -> Result<ReconcileReport> {
        let interrupted_sessions = self.cleanup_stale_sessions(feature_id)?;
        let cleaned_locks = self.clean_stale_locks(feature_id)?;

        let active = self
            .store
            .get_active_session(feature_id)?
            .map(|s| s.session_id);
        let mut feature = self.store.load(feature_id)?;
        let repaired_current_session = feature.current_session_id != active;
        if repaired_current_session {
            warn!(
                feature_id,
                recorded = ?feature.current_session_id,
                active = ?active,
                "Repairing current session pointer"
            );
            feature.current_session_id = active;
            feature.touch();
            self.store.save(&feature)?;
        }

        let report = ReconcileReport {
            interrupted_sessions,
            cleaned_locks,
            repaired_current_session,
        };
        if !report.is_clean() {
            info!(feature_id, ?report, "Feature reconciled");
        }
        Ok(report)
    }

    /// Name of the branch work on an issue happens on
    pub fn issue_branch_name(&self, feature_id: &str, issue_number: u64) -> String {
        format!("{}/{}/issue-{}", self.git.branch_prefix, feature_id, issue_number)
    }

    /// Make sure the issue's branch exists, creating it from the base branch
    pub fn ensure_issue_branch(&self, feature_id: &str, issue_number: u64) -> Result<String> {
        let vcs = self.vcs()?;
        let branch = self.issue_branch_name(feature_id, issue_number);
        if vcs.ops.branch_exists(&branch)? {
            debug!(branch = %branch, "Issue branch exists");
        } else {
            vcs.ops.create_branch(&branch, &self.git.base_branch)?;
            info!(branch = %branch, base = %self.git.base_branch, "Created issue branch");
        }
        Ok(branch)
    }
}

/// Force a task left IN_PROGRESS to INTERRUPTED
fn interrupt_task(feature: &mut FeatureState, issue_number: u64) {
    if feature
        .task(issue_number)
        .is_some_and(|t| t.stage == TaskStage::InProgress)
    {
        feature.set_task_stage(issue_number, TaskStage::Interrupted);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{Phase, TaskRef};
    use crate::store::RecordKey;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    /// Records calls instead of touching a repository
    #[derive(Default)]
    pub(crate) struct RecordingVcs {
        pub reverts: Mutex<Vec<(PathBuf, Vec<String>, String)>>,
        pub branches: Mutex<BTreeSet<String>>,
        pub created: Mutex<Vec<(String, String)>>,
    }

    impl VcsOps for RecordingVcs {
        fn revert_commits(&self, workdir: &Path, commits: &[String], message: &str) -> Result<String> {
            let mut reverts = self.reverts.lock().unwrap();
            reverts.push((workdir.to_path_buf(), commits.to_vec(), message.to_string()));
            Ok(format!("revert-{}", reverts.len()))
        }

        fn branch_exists(&self, name: &str) -> Result<bool> {
            Ok(self.branches.lock().unwrap().contains(name))
        }

        fn create_branch(&self, name: &str, base: &str) -> Result<()> {
            self.branches.lock().unwrap().insert(name.to_string());
            self.created
                .lock()
                .unwrap()
                .push((name.to_string(), base.to_string()));
            Ok(())
        }
    }

    fn setup() -> SessionManager {
        let store = StateStore::in_memory("test-key");
        let mut feature = store.create_feature("f", Phase::Implementing).unwrap();
        feature.add_task(TaskRef::new(1, TaskStage::Ready)).unwrap();
        feature.add_task(TaskRef::new(2, TaskStage::Ready)).unwrap();
        store.save(&feature).unwrap();
        SessionManager::new(store)
    }

    fn with_vcs(manager: SessionManager) -> (SessionManager, Arc<RecordingVcs>) {
        let vcs = Arc::new(RecordingVcs::default());
        (manager.with_vcs(vcs.clone(), "/repo"), vcs)
    }

    /// Push a session's last activity into the past
    fn age_session(manager: &SessionManager, session_id: &str, by: chrono::Duration) {
        let mut session = manager.store().load_session(session_id).unwrap();
        session.started_at = session.started_at - by;
        for checkpoint in &mut session.checkpoints {
            checkpoint.timestamp = checkpoint.timestamp - by;
        }
        manager.store().save_session(&session).unwrap();
    }

    #[test]
    fn test_start_session_binds_feature_and_task() {
        let manager = setup();
        let session = manager.start_session("f", 1, None).unwrap();

        let feature = manager.store().load("f").unwrap();
        assert_eq!(feature.current_session_id.as_deref(), Some(session.session_id.as_str()));
        assert_eq!(feature.task(1).unwrap().stage, TaskStage::InProgress);
        assert!(session.is_active());
    }

    #[test]
    fn test_start_session_errors() {
        let manager = setup();
        assert!(matches!(
            manager.start_session("missing", 1, None),
            Err(Error::FeatureNotFound(_))
        ));

        let first = manager.start_session("f", 1, None).unwrap();
        match manager.start_session("f", 2, None) {
            Err(Error::SessionAlreadyActive { session_id, .. }) => {
                assert_eq!(session_id, first.session_id)
            }
            other => panic!("expected SessionAlreadyActive, got {:?}", other),
        }
    }

    #[test]
    fn test_single_active_session_across_sequences() {
        let manager = setup();

        let a = manager.start_session("f", 1, None).unwrap();
        assert!(manager.start_session("f", 2, None).is_err());
        manager.end_session(&a.session_id, EndStatus::Success).unwrap();

        let b = manager.start_session("f", 2, None).unwrap();
        assert!(manager.start_session("f", 1, None).is_err());
        manager.mark_as_interrupted(&b.session_id).unwrap();

        let c = manager.start_session("f", 1, None).unwrap();
        // The interrupted session cannot come back while c is running
        assert!(matches!(
            manager.resume_session(&b.session_id),
            Err(Error::SessionAlreadyActive { .. })
        ));
        manager.end_session(&c.session_id, EndStatus::Failed).unwrap();
        manager.resume_session(&b.session_id).unwrap();

        let active: Vec<_> = manager
            .store()
            .list_sessions("f")
            .unwrap()
            .into_iter()
            .filter(|s| s.is_active())
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, b.session_id);
    }

    #[test]
    fn test_checkpoints_require_active_session() {
        let manager = setup();
        let session = manager.start_session("f", 1, None).unwrap();

        manager
            .add_checkpoint(&session.session_id, "coder", "wrote tests", None, 0.25)
            .unwrap();
        manager
            .add_checkpoint(&session.session_id, "coder", "implemented", Some("abc123".into()), 0.5)
            .unwrap();
        assert_eq!(manager.session_cost(&session.session_id).unwrap(), 0.75);
        let stored = manager.store().load_session(&session.session_id).unwrap();
        assert_eq!(stored.commits, vec!["abc123".to_string()]);

        assert!(matches!(
            manager.add_checkpoint(&session.session_id, "coder", "x", None, -1.0),
            Err(Error::InvalidCost(_))
        ));

        manager.mark_as_interrupted(&session.session_id).unwrap();
        assert!(matches!(
            manager.add_checkpoint(&session.session_id, "coder", "late", None, 0.0),
            Err(Error::SessionNotActive { .. })
        ));
        assert!(matches!(
            manager.add_checkpoint("nope", "coder", "x", None, 0.0),
            Err(Error::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_end_session_twice_fails() {
        let manager = setup();
        let session = manager.start_session("f", 1, None).unwrap();
        let ended = manager.end_session(&session.session_id, EndStatus::Success).unwrap();
        assert_eq!(ended.status, SessionStatus::Complete);
        assert_eq!(ended.end_status, Some(EndStatus::Success));
        assert!(ended.ended_at.is_some());
        assert!(manager.store().load("f").unwrap().current_session_id.is_none());

        assert!(matches!(
            manager.end_session(&session.session_id, EndStatus::Success),
            Err(Error::SessionAlreadyComplete(_))
        ));
        assert!(matches!(
            manager.resume_session(&session.session_id),
            Err(Error::SessionAlreadyComplete(_))
        ));
        assert!(matches!(
            manager.add_commit(&session.session_id, "def"),
            Err(Error::SessionAlreadyComplete(_))
        ));
    }

    #[test]
    fn test_end_status_reconciles_task() {
        let manager = setup();
        let failed = manager.start_session("f", 1, None).unwrap();
        manager.end_session(&failed.session_id, EndStatus::Failed).unwrap();
        assert_eq!(
            manager.store().load("f").unwrap().task(1).unwrap().stage,
            TaskStage::Interrupted
        );

        let blocked = manager.start_session("f", 2, None).unwrap();
        manager.end_session(&blocked.session_id, EndStatus::Blocked).unwrap();
        let feature = manager.store().load("f").unwrap();
        let task = feature.task(2).unwrap();
        assert_eq!(task.stage, TaskStage::Blocked);
        assert!(task.blocked_reason.as_deref().unwrap().contains(&blocked.session_id));
    }

    #[test]
    fn test_corrupt_session_record_fails_cleanup() {
        let manager = setup();
        manager.start_session("f", 1, None).unwrap();
        manager
            .store()
            .backend()
            .write(&RecordKey::session("f", "garbled"), b"{\"started_at\": \"last tuesday\"}")
            .unwrap();

        let err = manager.cleanup_stale_sessions("f").unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_blocked_end_keeps_done_task_done() {
        let manager = setup();
        let session = manager.start_session("f", 1, None).unwrap();
        manager
            .store()
            .update_feature("f", |feature| {
                feature.mark_task_done(1, None, None);
                Ok(())
            })
            .unwrap();

        manager.end_session(&session.session_id, EndStatus::Blocked).unwrap();
        let feature = manager.store().load("f").unwrap();
        let task = feature.task(1).unwrap();
        assert_eq!(task.stage, TaskStage::Done);
        assert!(task.blocked_reason.is_none());
    }

    #[test]
    fn test_interrupt_and_resume() {
        let manager = setup();
        let session = manager.start_session("f", 1, None).unwrap();
        assert!(manager.claim_issue("f", 1).unwrap());

        let interrupted = manager.mark_as_interrupted(&session.session_id).unwrap();
        assert_eq!(interrupted.status, SessionStatus::Interrupted);
        let feature = manager.store().load("f").unwrap();
        assert!(feature.current_session_id.is_none());
        assert_eq!(feature.task(1).unwrap().stage, TaskStage::Interrupted);
        // Interrupting frees the claim
        assert!(manager.claim_issue("f", 1).unwrap());

        assert!(matches!(
            manager.mark_as_interrupted(&session.session_id),
            Err(Error::SessionNotActive { .. })
        ));

        let resumed = manager.resume_session(&session.session_id).unwrap();
        assert!(resumed.is_active());
        assert_eq!(resumed.checkpoints.last().unwrap().status, "resumed");
        let feature = manager.store().load("f").unwrap();
        assert_eq!(feature.current_session_id.as_deref(), Some(session.session_id.as_str()));
        assert_eq!(feature.task(1).unwrap().stage, TaskStage::InProgress);

        // Resuming an active session is a no-op
        assert!(manager.resume_session(&session.session_id).unwrap().is_active());
    }

    #[test]
    fn test_resume_restarts_staleness_clock() {
        let manager = setup().with_session_ttl(Duration::from_secs(3600));
        let session = manager.start_session("f", 1, None).unwrap();
        manager.mark_as_interrupted(&session.session_id).unwrap();
        age_session(&manager, &session.session_id, chrono::Duration::hours(5));

        manager.resume_session(&session.session_id).unwrap();
        assert!(!manager.is_session_stale(&session.session_id).unwrap());
    }

    #[test]
    fn test_staleness() {
        let manager = setup().with_session_ttl(Duration::from_secs(3600));
        let session = manager.start_session("f", 1, None).unwrap();
        assert!(!manager.is_session_stale(&session.session_id).unwrap());

        age_session(&manager, &session.session_id, chrono::Duration::hours(2));
        assert!(manager.is_session_stale(&session.session_id).unwrap());

        // A recent checkpoint keeps it alive
        manager
            .add_checkpoint(&session.session_id, "coder", "still going", None, 0.0)
            .unwrap();
        assert!(!manager.is_session_stale(&session.session_id).unwrap());

        // Only active sessions go stale
        age_session(&manager, &session.session_id, chrono::Duration::hours(2));
        manager.mark_as_interrupted(&session.session_id).unwrap();
        assert!(!manager.is_session_stale(&session.session_id).unwrap());
    }

    #[test]
    fn test_future_timestamp_is_not_stale() {
        let manager = setup().with_session_ttl(Duration::from_secs(60));
        let session = manager.start_session("f", 1, None).unwrap();
        age_session(&manager, &session.session_id, chrono::Duration::hours(-3));
        assert!(!manager.is_session_stale(&session.session_id).unwrap());
    }

    #[test]
    fn test_cleanup_stale_sessions() {
        let manager = setup().with_session_ttl(Duration::from_secs(3600));
        let session = manager.start_session("f", 1, None).unwrap();
        assert!(manager.claim_issue("f", 1).unwrap());
        age_session(&manager, &session.session_id, chrono::Duration::hours(3));

        let cleaned = manager.cleanup_stale_sessions("f").unwrap();
        assert_eq!(cleaned, vec![session.session_id.clone()]);

        let stored = manager.store().load_session(&session.session_id).unwrap();
        assert_eq!(stored.status, SessionStatus::Interrupted);
        let feature = manager.store().load("f").unwrap();
        assert_eq!(feature.task(1).unwrap().stage, TaskStage::Interrupted);
        assert!(feature.current_session_id.is_none());
        assert!(manager.claim_issue("f", 1).unwrap());

        // Nothing left to do
        assert!(manager.cleanup_stale_sessions("f").unwrap().is_empty());
    }

    #[test]
    fn test_finalize_session_on_task_done() {
        let manager = setup();
        let session = manager.start_session("f", 1, None).unwrap();
        assert!(manager.claim_issue("f", 1).unwrap());

        // Task not done yet
        assert!(!manager.finalize_session_on_task_done(&session.session_id, 1).unwrap());
        assert!(manager.store().load_session(&session.session_id).unwrap().is_active());

        manager
            .store()
            .update_feature("f", |f| {
                f.mark_task_done(1, Some("done".into()), None);
                Ok(())
            })
            .unwrap();

        assert!(manager.finalize_session_on_task_done(&session.session_id, 1).unwrap());
        let stored = manager.store().load_session(&session.session_id).unwrap();
        assert_eq!(stored.status, SessionStatus::Complete);
        assert_eq!(stored.end_status, Some(EndStatus::Success));
        assert!(manager.claim_issue("f", 1).unwrap());

        // Second call is a no-op
        assert!(!manager.finalize_session_on_task_done(&session.session_id, 1).unwrap());
        let feature = manager.store().load("f").unwrap();
        assert_eq!(feature.task(1).unwrap().stage, TaskStage::Done);
    }

    #[test]
    fn test_rollback_session_reverts_newest_first() {
        let (manager, vcs) = with_vcs(setup());
        let session = manager
            .start_session("f", 1, Some(PathBuf::from("/worktrees/f-1")))
            .unwrap();
        manager.add_commit(&session.session_id, "c1").unwrap();
        manager.add_commit(&session.session_id, "c2").unwrap();
        manager.add_commit(&session.session_id, "c2").unwrap();

        let outcome = manager.rollback_session(&session.session_id).unwrap();
        assert_eq!(outcome.reverted, vec!["c2".to_string(), "c1".to_string()]);
        assert_eq!(outcome.revert_commit.as_deref(), Some("revert-1"));

        let reverts = vcs.reverts.lock().unwrap();
        assert_eq!(reverts.len(), 1);
        assert_eq!(reverts[0].0, PathBuf::from("/worktrees/f-1"));
        assert_eq!(reverts[0].1, vec!["c2".to_string(), "c1".to_string()]);
    }

    #[test]
    fn test_rollback_without_commits_is_noop() {
        let (manager, vcs) = with_vcs(setup());
        let session = manager.start_session("f", 1, None).unwrap();
        let outcome = manager.rollback_session(&session.session_id).unwrap();
        assert_eq!(outcome, RollbackOutcome::default());
        assert!(vcs.reverts.lock().unwrap().is_empty());

        // No VCS is only an error when there is something to revert
        let plain = setup();
        let session = plain.start_session("f", 1, None).unwrap();
        assert!(plain.rollback_session(&session.session_id).is_ok());
        plain.add_commit(&session.session_id, "c1").unwrap();
        assert!(matches!(
            plain.rollback_session(&session.session_id),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_rollback_issue_spans_sessions() {
        let (manager, vcs) = with_vcs(setup());
        let first = manager.start_session("f", 1, None).unwrap();
        manager.add_commit(&first.session_id, "a1").unwrap();
        manager.end_session(&first.session_id, EndStatus::Failed).unwrap();

        let other = manager.start_session("f", 2, None).unwrap();
        manager.add_commit(&other.session_id, "b1").unwrap();
        manager.end_session(&other.session_id, EndStatus::Success).unwrap();

        let second = manager.start_session("f", 1, None).unwrap();
        manager.add_commit(&second.session_id, "a2").unwrap();
        manager.add_commit(&second.session_id, "a3").unwrap();

        let outcome = manager.rollback_issue("f", 1).unwrap();
        assert_eq!(
            outcome.reverted,
            vec!["a3".to_string(), "a2".to_string(), "a1".to_string()]
        );
        let reverts = vcs.reverts.lock().unwrap();
        assert_eq!(reverts[0].0, PathBuf::from("/repo"));
    }

    #[test]
    fn test_reconcile_feature() {
        let manager = setup()
            .with_session_ttl(Duration::from_secs(3600))
            .with_lock_timeout(Duration::from_secs(600));
        let session = manager.start_session("f", 1, None).unwrap();
        assert!(manager.claim_issue("f", 1).unwrap());
        age_session(&manager, &session.session_id, chrono::Duration::hours(2));
        let old = (Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
        manager
            .store()
            .backend()
            .write(&RecordKey::lock("f", 2), old.as_bytes())
            .unwrap();

        let report = manager.reconcile_feature("f").unwrap();
        assert_eq!(report.interrupted_sessions, vec![session.session_id.clone()]);
        assert_eq!(report.cleaned_locks, vec![2]);
        assert!(!report.repaired_current_session);

        assert!(manager.reconcile_feature("f").unwrap().is_clean());
    }

    #[test]
    fn test_reconcile_repairs_session_pointer() {
        let manager = setup();
        let session = manager.start_session("f", 1, None).unwrap();

        // Simulate a crash between saving the session and the feature
        manager
            .store()
            .update_feature("f", |f| {
                f.current_session_id = None;
                Ok(())
            })
            .unwrap();
        let report = manager.reconcile_feature("f").unwrap();
        assert!(report.repaired_current_session);
        assert_eq!(
            manager.store().load("f").unwrap().current_session_id.as_deref(),
            Some(session.session_id.as_str())
        );

        // A pointer to a session that is no longer active is cleared
        manager.mark_as_interrupted(&session.session_id).unwrap();
        manager
            .store()
            .update_feature("f", |f| {
                f.current_session_id = Some("gone".into());
                Ok(())
            })
            .unwrap();
        assert!(manager.reconcile_feature("f").unwrap().repaired_current_session);
        assert!(manager.store().load("f").unwrap().current_session_id.is_none());
    }

    #[test]
    fn test_ensure_issue_branch() {
        let (manager, vcs) = with_vcs(setup());
        let branch = manager.ensure_issue_branch("f", 7).unwrap();
        assert_eq!(branch, "conveyor/f/issue-7");
        assert_eq!(
            vcs.created.lock().unwrap().as_slice(),
            &[("conveyor/f/issue-7".to_string(), "main".to_string())]
        );

        // Existing branch is left alone
        manager.ensure_issue_branch("f", 7).unwrap();
        assert_eq!(vcs.created.lock().unwrap().len(), 1);

        assert!(matches!(setup().ensure_issue_branch("f", 7), Err(Error::Config(_))));
    }
}
