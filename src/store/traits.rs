//! Async persistence traits — server-side invitation records and client-side
//! wizard drafts share one backend here, but deliberately through separate
//! traits so either side can be swapped or mocked on its own.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::invitation::model::{Invitation, Profile};
use crate::wizard::session::WizardSession;
use crate::wizard::steps::{StepFields, StepId};

/// Server-authoritative invitation persistence.
#[async_trait]
pub trait InvitationStore: Send + Sync {
    /// Insert a freshly minted pending invitation.
    async fn insert_invitation(&self, invitation: &Invitation) -> Result<(), DatabaseError>;

    /// Look up an invitation by token.
    async fn get_invitation(&self, token: &str) -> Result<Option<Invitation>, DatabaseError>;

    /// Pending→Accepted, guarded so it can only ever happen once.
    /// Fails with `Constraint` if the invitation is no longer pending.
    async fn mark_accepted(
        &self,
        token: &str,
        accepted_at: DateTime<Utc>,
        profile_created: bool,
    ) -> Result<(), DatabaseError>;

    /// Pending→Declined, same one-shot guard.
    async fn mark_declined(&self, token: &str) -> Result<(), DatabaseError>;

    /// Pending→Expired, persisted lazily when a mutating call observes expiry.
    async fn mark_expired(&self, token: &str) -> Result<(), DatabaseError>;

    /// Pending→Cancelled, same one-shot guard.
    async fn mark_cancelled(&self, token: &str) -> Result<(), DatabaseError>;

    /// Profile for an invited email, if one already exists.
    async fn find_profile(&self, email: &str) -> Result<Option<Profile>, DatabaseError>;

    /// Create a new profile on accept.
    async fn insert_profile(&self, profile: &Profile) -> Result<(), DatabaseError>;

    /// Whether a display name is already claimed by any profile.
    async fn display_name_taken(&self, display_name: &str) -> Result<bool, DatabaseError>;
}

/// Durable wizard draft persistence, keyed by invitation token.
///
/// Every successful write increments the session revision by exactly 1.
/// A write carrying a stale expected revision fails with
/// `DatabaseError::StaleRevision` instead of silently overwriting newer data.
#[async_trait]
pub trait DraftStore: Send + Sync {
    /// Load the persisted session for a token, if any.
    async fn get(&self, token: &str) -> Result<Option<WizardSession>, DatabaseError>;

    /// Merge a single-step field update into the draft. Creates the session
    /// (expected revision 0) on first write. Returns the new revision.
    async fn set_fields(
        &self,
        token: &str,
        fields: StepFields,
        expected_revision: u64,
    ) -> Result<u64, DatabaseError>;

    /// Persist the step position and completed-step set. Returns the new
    /// revision.
    async fn set_position(
        &self,
        token: &str,
        step_index: usize,
        completed_steps: &BTreeSet<StepId>,
        expected_revision: u64,
    ) -> Result<u64, DatabaseError>;

    /// Destroy the session. The only destructive draft operation; called on
    /// successful submission or explicit user cancel.
    async fn clear(&self, token: &str) -> Result<(), DatabaseError>;
}
