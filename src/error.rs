//! Error types for Invite Flow.

use crate::wizard::steps::{FieldErrors, StepId};

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invitation error: {0}")]
    Invitation(#[from] InvitationError),

    #[error("Wizard error: {0}")]
    Wizard(#[from] WizardError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Invitation lifecycle errors.
///
/// `Malformed`, `Expired`, `AlreadyConsumed` and `IdentityMismatch` are
/// terminal for the current flow — the only remedy is a new invitation.
/// `Network` is retryable; `ServerRejected` re-opens the wizard at the
/// offending step when a hint is present.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InvitationError {
    #[error("Invitation token is malformed")]
    Malformed,

    #[error("Invitation has expired")]
    Expired,

    #[error("Invitation was already {status}")]
    AlreadyConsumed { status: String },

    #[error("Authenticated identity does not match the invited email")]
    IdentityMismatch,

    #[error("Invitation not found")]
    NotFound,

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Network error: {reason}")]
    Network { reason: String, retryable: bool },

    #[error("Server rejected submission: {reason}")]
    ServerRejected {
        step: Option<StepId>,
        field: Option<String>,
        reason: String,
    },
}

impl InvitationError {
    /// Whether re-attempting the same operation can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { retryable: true, .. })
    }
}

/// Wizard sequencing errors.
#[derive(Debug, thiserror::Error)]
pub enum WizardError {
    #[error("Step {step} has validation errors")]
    ValidationFailed { step: StepId, errors: FieldErrors },

    #[error("Cannot jump to step {target}: step {missing} is not complete")]
    JumpBlocked { target: StepId, missing: StepId },

    #[error("Step index {index} is out of range")]
    StepOutOfRange { index: usize },

    #[error("Required steps are incomplete, cannot submit")]
    NotSubmittable,

    #[error("A submission is already in flight")]
    SubmitInFlight,
}

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Stale revision: write carried {given}, current is {current}")]
    StaleRevision { given: u64, current: u64 },
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
