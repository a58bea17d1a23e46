//! Typed errors crossing component boundaries.

use thiserror::Error;

/// Failure classifications surfaced on run records, per the store's
/// `FailureClassification` enum, plus the two external-collaborator wrapper
/// variants used internally by core components.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("harness payload missing or invalid: {0}")]
    EnvelopeValidation(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("run orphaned on startup recovery")]
    OrphanRecovery,

    #[error("run exceeded stale threshold")]
    StaleRun,

    #[error("run exceeded zombie threshold")]
    ZombieRun,

    #[error("run exceeded maximum age")]
    OverdueRun,

    #[error(transparent)]
    StoreError(#[from] anyhow::Error),

    #[error("runtime error: {0}")]
    RuntimeError(anyhow::Error),
}

impl CoreError {
    /// Maps this error to the narrow `FailureClassification` column, if any
    /// of the error kinds that get recorded applies.
    pub fn failure_classification(&self) -> Option<orc_db::models::FailureClassification> {
        use orc_db::models::FailureClassification as FC;
        match self {
            Self::EnvelopeValidation(_) => Some(FC::EnvelopeValidation),
            Self::Timeout(_) => Some(FC::Timeout),
            Self::OrphanRecovery => Some(FC::OrphanRecovery),
            Self::StaleRun => Some(FC::StaleRun),
            Self::ZombieRun => Some(FC::ZombieRun),
            Self::OverdueRun => Some(FC::OverdueRun),
            Self::StoreError(_) | Self::RuntimeError(_) => None,
        }
    }

    /// An error string is classified `Timeout` if it case-insensitively
    /// contains "timeout" or "cancelled".
    pub fn classify_error_string(message: &str) -> Option<orc_db::models::FailureClassification> {
        let lower = message.to_lowercase();
        if lower.contains("timeout") || lower.contains("cancelled") || lower.contains("canceled") {
            Some(orc_db::models::FailureClassification::Timeout)
        } else {
            None
        }
    }
}
