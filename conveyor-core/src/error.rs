//! Error types for Conveyor

use thiserror::Error;

/// Result type alias for Conveyor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for Conveyor operations
///
/// Not-found, corruption and invalid-transition conditions are separate
/// variants so callers can tell "nothing to do" apart from "this is a bug"
/// apart from "someone tampered with the store".
#[derive(Error, Debug)]
pub enum Error {
    /// No feature record exists for the id
    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    /// No session record exists for the id
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Stored record failed integrity verification
    #[error("Corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// Stored record is authentic but does not match the expected schema
    #[error("Invalid state in {key}: {reason}")]
    InvalidState { key: String, reason: String },

    /// `create_feature` on an id that already has a record
    #[error("Feature already exists: {0}")]
    FeatureExists(String),

    /// A second session was started (or resumed) while one is active
    #[error("Feature {feature_id} already has an active session: {session_id}")]
    SessionAlreadyActive {
        feature_id: String,
        session_id: String,
    },

    /// Operation requires an active session
    #[error("Session {session_id} is not active (status: {status})")]
    SessionNotActive { session_id: String, status: String },

    /// Session has already been ended
    #[error("Session already complete: {0}")]
    SessionAlreadyComplete(String),

    /// Phase change not permitted by the transition table
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Identifier cannot be used as a storage key
    #[error("Invalid identifier: {0:?}")]
    InvalidId(String),

    /// Cost accumulators only move forward
    #[error("Invalid cost amount: {0}")]
    InvalidCost(f64),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Version control error
    #[error("Git error: {0}")]
    Git(String),
}

impl Error {
    /// True for the not-found family of errors
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::FeatureNotFound(_) | Error::SessionNotFound(_))
    }

    /// True when stored data failed verification or schema checks
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corrupt { .. } | Error::InvalidState { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_distinct_from_corruption() {
        let missing = Error::FeatureNotFound("f".into());
        let corrupt = Error::Corrupt {
            key: "features/f.json".into(),
            reason: "signature mismatch".into(),
        };

        assert!(missing.is_not_found());
        assert!(!missing.is_corruption());
        assert!(corrupt.is_corruption());
        assert!(!corrupt.is_not_found());
    }

    #[test]
    fn test_messages_carry_identifiers() {
        let err = Error::SessionAlreadyActive {
            feature_id: "login".into(),
            session_id: "abc".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("login"));
        assert!(msg.contains("abc"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
