//! Time-bounded issue claims
//!
//! A lock marker holds the RFC 3339 timestamp of its claim. A marker at
//! least `lock_timeout` old, or one whose content does not parse, counts as
//! stale and may be reclaimed. Lock operations never fail because of a
//! missing or corrupt marker; only I/O errors surface.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::SessionManager;
use crate::store::{validate_id, Namespace, RecordKey};
use crate::Result;

/// Parse a marker's claim time; `None` for empty or malformed content
fn claimed_at(bytes: &[u8]) -> Option<DateTime<Utc>> {
    let text = std::str::from_utf8(bytes).ok()?.trim();
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

impl SessionManager {
    fn lock_is_stale(&self, bytes: &[u8], now: DateTime<Utc>) -> bool {
        let Some(claimed) = claimed_at(bytes) else {
            return true;
        };
        // Claims stamped in the future are treated as fresh
        (now - claimed)
            .to_std()
            .is_ok_and(|age| age >= self.lock_timeout)
    }

    /// Claim an issue for work
    ///
    /// Returns false if a fresh lock is already held. An absent, expired or
    /// unreadable marker is (re)written with the current time.
    pub fn claim_issue(&self, feature_id: &str, issue_number: u64) -> Result<bool> {
        validate_id(feature_id)?;
        let key = RecordKey::lock(feature_id, issue_number);
        let now = Utc::now();
        let stamp = now.to_rfc3339();
        let backend = self.store.backend();

        if backend.create_new(&key, stamp.as_bytes())? {
            debug!(feature_id, issue_number, "Issue claimed");
            return Ok(true);
        }

        match backend.read(&key)? {
            // Released between our create and read
            None => {
                let claimed = backend.create_new(&key, stamp.as_bytes())?;
                debug!(feature_id, issue_number, claimed, "Issue claim retried");
                Ok(claimed)
            }
            Some(existing) if self.lock_is_stale(&existing, now) => {
                backend.write(&key, stamp.as_bytes())?;
                debug!(feature_id, issue_number, "Reclaimed stale issue lock");
                Ok(true)
            }
            Some(_) => {
                debug!(feature_id, issue_number, "Issue already claimed");
                Ok(false)
            }
        }
    }

    /// Drop a claim; missing markers are ignored
    pub fn release_issue(&self, feature_id: &str, issue_number: u64) -> Result<()> {
        validate_id(feature_id)?;
        if self
            .store
            .backend()
            .remove(&RecordKey::lock(feature_id, issue_number))?
        {
            debug!(feature_id, issue_number, "Issue released");
        }
        Ok(())
    }

    /// True if a fresh lock is held on the issue
    pub fn is_issue_locked(&self, feature_id: &str, issue_number: u64) -> Result<bool> {
        validate_id(feature_id)?;
        let bytes = self
            .store
            .backend()
            .read(&RecordKey::lock(feature_id, issue_number))?;
        Ok(bytes.is_some_and(|b| !self.lock_is_stale(&b, Utc::now())))
    }

    fn lock_keys(&self, feature_id: &str) -> Result<Vec<(u64, RecordKey)>> {
        validate_id(feature_id)?;
        Ok(self
            .store
            .backend()
            .list(&Namespace::Locks(feature_id.to_string()))?
            .into_iter()
            .filter_map(|key| match key {
                RecordKey::Lock { issue_number, .. } => Some((issue_number, key)),
                _ => None,
            })
            .collect())
    }

    /// Remove every expired, empty or corrupted lock for a feature
    ///
    /// Returns the issue numbers whose locks were removed.
    pub fn clean_stale_locks(&self, feature_id: &str) -> Result<Vec<u64>> {
        let now = Utc::now();
        let backend = self.store.backend();
        let mut cleaned = Vec::new();

        for (issue_number, key) in self.lock_keys(feature_id)? {
            let Some(bytes) = backend.read(&key)? else {
                continue;
            };
            if self.lock_is_stale(&bytes, now) && backend.remove(&key)? {
                warn!(feature_id, issue_number, "Removed stale issue lock");
                cleaned.push(issue_number);
            }
        }

        Ok(cleaned)
    }

    /// Remove every lock for a feature regardless of age
    pub fn clear_all_locks(&self, feature_id: &str) -> Result<Vec<u64>> {
        let backend = self.store.backend();
        let mut cleared = Vec::new();

        for (issue_number, key) in self.lock_keys(feature_id)? {
            if backend.remove(&key)? {
                cleared.push(issue_number);
            }
        }

        if !cleared.is_empty() {
            warn!(feature_id, issues = ?cleared, "Cleared all issue locks");
        }
        Ok(cleared)
    }
}
