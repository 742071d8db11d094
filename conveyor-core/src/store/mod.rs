//! Signed, atomically written persistence for feature and session records

mod backend;
mod registry;
mod signing;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

pub use backend::{validate_id, FsBackend, MemoryBackend, Namespace, RecordKey, StorageBackend};
pub use registry::{ModuleEntry, ModuleRegistry};
pub use signing::{RecordSigner, SIGNATURE_FIELD};

use crate::model::{AgentResult, FeatureState, Phase, SessionState, SessionStatus};
use crate::{Error, Result};

/// Persistence for [`FeatureState`] and [`SessionState`] records
///
/// Every record is sealed with an HMAC on save and verified on load; a
/// record that fails verification is reported as [`Error::Corrupt`] and is
/// never returned. Cloning is cheap and shares the backend.
#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn StorageBackend>,
    signer: RecordSigner,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").finish_non_exhaustive()
    }
}

impl StateStore {
    /// Create a store over any backend
    pub fn new(backend: Arc<dyn StorageBackend>, signer: RecordSigner) -> Self {
        Self { backend, signer }
    }

    /// Create a store over JSON files under `root`
    pub fn open(root: impl Into<PathBuf>, signing_key: impl AsRef<[u8]>) -> Self {
        Self::new(
            Arc::new(FsBackend::new(root)),
            RecordSigner::new(signing_key),
        )
    }

    /// Create a store held entirely in memory
    pub fn in_memory(signing_key: impl AsRef<[u8]>) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), RecordSigner::new(signing_key))
    }

    /// Access the raw backend (used for lock markers)
    pub fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }

    /// Load a feature, or `None` if it has no record
    pub fn try_load(&self, feature_id: &str) -> Result<Option<FeatureState>> {
        validate_id(feature_id)?;
        let key = RecordKey::feature(feature_id);
        let Some(bytes) = self.backend.read(&key)? else {
            return Ok(None);
        };
        let state: FeatureState = self.signer.open(&key, &bytes)?;
        if state.feature_id != feature_id {
            return Err(Error::InvalidState {
                key: key.to_string(),
                reason: format!("record belongs to feature '{}'", state.feature_id),
            });
        }
        debug!(feature_id, phase = %state.phase, "Feature loaded");
        Ok(Some(state))
    }

    /// Load a feature
    pub fn load(&self, feature_id: &str) -> Result<FeatureState> {
        self.try_load(feature_id)?
            .ok_or_else(|| Error::FeatureNotFound(feature_id.to_string()))
    }

    /// Persist a feature (signed, atomic replace)
    pub fn save(&self, state: &FeatureState) -> Result<()> {
        validate_id(&state.feature_id)?;
        let key = RecordKey::feature(&state.feature_id);
        let bytes = self.signer.seal(&key, state)?;
        self.backend.write(&key, &bytes)?;
        debug!(feature_id = %state.feature_id, phase = %state.phase, "Feature saved");
        Ok(())
    }

    /// Create a new feature record; fails if one exists
    pub fn create_feature(&self, feature_id: &str, initial_phase: Phase) -> Result<FeatureState> {
        validate_id(feature_id)?;
        let state = FeatureState::new(feature_id, initial_phase);
        let key = RecordKey::feature(feature_id);
        let bytes = self.signer.seal(&key, &state)?;
        if !self.backend.create_new(&key, &bytes)? {
            return Err(Error::FeatureExists(feature_id.to_string()));
        }
        info!(feature_id, phase = %initial_phase, "Feature created");
        Ok(state)
    }

    /// Load, mutate and save a feature in one call
    pub fn update_feature<F>(&self, feature_id: &str, mutate: F) -> Result<FeatureState>
    where
        F: FnOnce(&mut FeatureState) -> Result<()>,
    {
        let mut state = self.load(feature_id)?;
        mutate(&mut state)?;
        self.save(&state)?;
        Ok(state)
    }

    /// Set a feature's phase without checking the transition table
    pub fn update_phase(&self, feature_id: &str, new_phase: Phase) -> Result<FeatureState> {
        self.update_feature(feature_id, |state| {
            let from = state.phase;
            state.set_phase(new_phase);
            info!(feature_id, from = %from, to = %new_phase, "Feature phase updated");
            Ok(())
        })
    }

    /// Set a feature's phase, rejecting moves the transition table forbids
    pub fn advance_phase(&self, feature_id: &str, new_phase: Phase) -> Result<FeatureState> {
        self.update_feature(feature_id, |state| {
            let from = state.phase;
            if !from.can_transition_to(&new_phase) {
                return Err(Error::InvalidTransition {
                    from: from.to_string(),
                    to: new_phase.to_string(),
                });
            }
            state.set_phase(new_phase);
            info!(feature_id, from = %from, to = %new_phase, "Feature phase advanced");
            Ok(())
        })
    }

    /// Accumulate spend against a phase
    pub fn add_cost(&self, feature_id: &str, phase: Phase, usd: f64) -> Result<FeatureState> {
        self.update_feature(feature_id, |state| state.add_cost(phase, usd))
    }

    /// Account for an agent run and advance the phase on pipeline success
    pub fn record_agent_result(
        &self,
        feature_id: &str,
        result: &AgentResult,
    ) -> Result<FeatureState> {
        self.update_feature(feature_id, |state| {
            let phase = state.phase;
            state.add_cost(phase, result.cost_usd)?;
            if !result.success {
                warn!(feature_id, phase = %phase, errors = ?result.errors, "Agent run failed");
                return Ok(());
            }
            if let Some(next) = phase.on_pipeline_success() {
                state.set_phase(next);
                info!(feature_id, from = %phase, to = %next, "Pipeline succeeded, phase advanced");
            }
            Ok(())
        })
    }

    /// Ids of every persisted feature, sorted
    pub fn list_features(&self) -> Result<Vec<String>> {
        Ok(self
            .backend
            .list(&Namespace::Features)?
            .into_iter()
            .filter_map(|key| match key {
                RecordKey::Feature(id) => Some(id),
                _ => None,
            })
            .collect())
    }

    /// Administrative removal of a feature with its sessions and locks
    pub fn delete_feature(&self, feature_id: &str) -> Result<bool> {
        validate_id(feature_id)?;
        let existed = self.backend.remove(&RecordKey::feature(feature_id))?;
        self.backend
            .remove_namespace(&Namespace::Sessions(feature_id.to_string()))?;
        self.backend
            .remove_namespace(&Namespace::Locks(feature_id.to_string()))?;
        if existed {
            warn!(feature_id, "Feature deleted");
        }
        Ok(existed)
    }

    fn open_session(&self, key: &RecordKey, bytes: &[u8]) -> Result<SessionState> {
        let session: SessionState = self.signer.open(key, bytes)?;
        if let RecordKey::Session {
            feature_id,
            session_id,
        } = key
        {
            if &session.feature_id != feature_id || &session.session_id != session_id {
                return Err(Error::InvalidState {
                    key: key.to_string(),
                    reason: "session record does not match its location".to_string(),
                });
            }
        }
        Ok(session)
    }

    /// Load a session by id
    pub fn load_session(&self, session_id: &str) -> Result<SessionState> {
        validate_id(session_id)?;
        for feature_id in self.list_features()? {
            let key = RecordKey::session(&feature_id, session_id);
            if let Some(bytes) = self.backend.read(&key)? {
                return self.open_session(&key, &bytes);
            }
        }
        Err(Error::SessionNotFound(session_id.to_string()))
    }

    /// Persist a session (signed, atomic replace)
    pub fn save_session(&self, session: &SessionState) -> Result<()> {
        validate_id(&session.feature_id)?;
        validate_id(&session.session_id)?;
        let key = RecordKey::session(&session.feature_id, &session.session_id);
        let bytes = self.signer.seal(&key, session)?;
        self.backend.write(&key, &bytes)?;
        debug!(
            session_id = %session.session_id,
            feature_id = %session.feature_id,
            status = %session.status,
            "Session saved"
        );
        Ok(())
    }

    /// Every session of a feature, oldest first
    pub fn list_sessions(&self, feature_id: &str) -> Result<Vec<SessionState>> {
        validate_id(feature_id)?;
        let mut sessions = Vec::new();
        for key in self
            .backend
            .list(&Namespace::Sessions(feature_id.to_string()))?
        {
            if let Some(bytes) = self.backend.read(&key)? {
                sessions.push(self.open_session(&key, &bytes)?);
            }
        }
        sessions.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(sessions)
    }

    /// The session with status "active", if any
    pub fn get_active_session(&self, feature_id: &str) -> Result<Option<SessionState>> {
        let mut active: Vec<SessionState> = self
            .list_sessions(feature_id)?
            .into_iter()
            .filter(|s| s.status == SessionStatus::Active)
            .collect();
        if active.len() > 1 {
            warn!(
                feature_id,
                count = active.len(),
                "More than one active session; using the most recent"
            );
        }
        Ok(active.pop())
    }

    /// The most recently started session, if any
    pub fn get_latest_session(&self, feature_id: &str) -> Result<Option<SessionState>> {
        Ok(self.list_sessions(feature_id)?.pop())
    }

    /// Files and symbols produced by the feature's DONE tasks
    pub fn get_module_registry(&self, feature_id: &str) -> Result<ModuleRegistry> {
        Ok(ModuleRegistry::build(&self.load(feature_id)?))
    }
}
