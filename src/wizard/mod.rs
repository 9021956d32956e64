//! Multi-step profile wizard — resumable, validated, debounced persistence.
//!
//! `WizardSessionManager` owns sequencing and draft state for one token;
//! `SubmissionCoordinator` sits above it and owns the accept handshake with
//! the invitation authority.

pub mod autosave;
pub mod session;
pub mod steps;
pub mod submit;

pub use autosave::AutosaveScheduler;
pub use session::{WizardSession, WizardSessionManager};
pub use steps::{DraftPayload, FieldError, FieldErrors, StepFields, StepId};
pub use submit::SubmissionCoordinator;
