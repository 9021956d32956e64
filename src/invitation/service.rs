//! InvitationService — the server-authoritative invitation state machine.
//!
//! Owns every transition out of `Pending`. Clients only ever see snapshots;
//! all gates (identity, validity, payload re-validation) run here, against
//! the store, with the clock and actor identity passed in explicitly so the
//! machine stays independently testable.

use std::sync::Arc;
use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, InvitationError};
use crate::store::InvitationStore;
use crate::wizard::steps::{self, DraftPayload, StepId};

use super::model::{Invitation, InvitationRole, InvitationStatus, Profile, SubmissionResult};
use super::token::{self, TokenClass};

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap())
}

pub struct InvitationService {
    store: Arc<dyn InvitationStore>,
    lifetime: Duration,
}

impl InvitationService {
    pub fn new(store: Arc<dyn InvitationStore>, lifetime: Duration) -> Self {
        Self { store, lifetime }
    }

    /// Mint and persist a new pending invitation.
    pub async fn create(
        &self,
        email: &str,
        role: InvitationRole,
        now: DateTime<Utc>,
    ) -> Result<Invitation, Error> {
        if !email_re().is_match(email) {
            return Err(InvitationError::InvalidEmail(email.to_string()).into());
        }
        let invitation = Invitation::new(email, role, now, self.lifetime);
        self.store.insert_invitation(&invitation).await?;
        info!(token = %invitation.token, role = %role, "Invitation created");
        Ok(invitation)
    }

    /// Unauthenticated status read, for invitation preview before signup.
    ///
    /// Returns the stored snapshot as-is: a lapsed Pending invitation still
    /// reads as Pending here, and classification computes Expired from the
    /// timestamps. The transition is persisted only when a mutating call
    /// observes the expiry.
    pub async fn fetch_status(&self, token: &str) -> Result<Invitation, Error> {
        if !token::is_well_formed(token) {
            return Err(InvitationError::Malformed.into());
        }
        match self.store.get_invitation(token).await? {
            Some(invitation) => Ok(invitation),
            None => Err(InvitationError::NotFound.into()),
        }
    }

    /// Accept the invitation, creating or reusing a profile.
    ///
    /// Idempotent under retry: a repeat accept for an already-accepted
    /// invitation by the same identity replays the original result instead
    /// of erroring, so a client that lost the first response can retry.
    pub async fn accept(
        &self,
        token: &str,
        actor_identity: &str,
        payload: Option<&DraftPayload>,
        now: DateTime<Utc>,
    ) -> Result<SubmissionResult, Error> {
        let invitation = self.load_gated(token, actor_identity).await?;

        if invitation.status == InvitationStatus::Accepted {
            info!(token, "Replaying accept for already-accepted invitation");
            let profile_created = invitation.profile_created.unwrap_or(false);
            return Ok(SubmissionResult {
                invitation,
                profile_created,
            });
        }

        self.require_valid(&invitation, now).await?;

        let merged = payload.cloned().unwrap_or_default();
        if invitation.requires_wizard {
            revalidate_payload(&merged)?;
        }

        let profile_created = match self.store.find_profile(&invitation.email).await? {
            Some(existing) => {
                info!(token, profile_id = %existing.id, "Reusing existing profile");
                false
            }
            None => {
                let display_name = merged
                    .personal_info
                    .as_ref()
                    .and_then(|p| p.display_name.clone())
                    .unwrap_or_else(|| invitation.email.clone());
                if self.store.display_name_taken(&display_name).await? {
                    return Err(InvitationError::ServerRejected {
                        step: Some(StepId::PersonalInfo),
                        field: Some("display_name".to_string()),
                        reason: "display name is already taken".to_string(),
                    }
                    .into());
                }
                self.store
                    .insert_profile(&Profile {
                        id: Uuid::new_v4(),
                        email: invitation.email.clone(),
                        display_name,
                        data: merged,
                        created_at: now,
                    })
                    .await?;
                true
            }
        };

        self.store.mark_accepted(token, now, profile_created).await?;

        let mut accepted = invitation;
        accepted.status = InvitationStatus::Accepted;
        accepted.accepted_at = Some(now);
        accepted.profile_created = Some(profile_created);
        info!(token, profile_created, "Invitation accepted");
        Ok(SubmissionResult {
            invitation: accepted,
            profile_created,
        })
    }

    /// Decline the invitation. Same identity and validity gates as accept.
    pub async fn decline(
        &self,
        token: &str,
        actor_identity: &str,
        now: DateTime<Utc>,
    ) -> Result<Invitation, Error> {
        let invitation = self.load_gated(token, actor_identity).await?;
        self.require_valid(&invitation, now).await?;
        self.store.mark_declined(token).await?;

        let mut declined = invitation;
        declined.status = InvitationStatus::Declined;
        info!(token, "Invitation declined");
        Ok(declined)
    }

    /// Inviter-side revocation of a pending invitation.
    pub async fn cancel(&self, token: &str, now: DateTime<Utc>) -> Result<Invitation, Error> {
        let invitation = self.fetch_status(token).await?;
        self.require_valid(&invitation, now).await?;
        self.store.mark_cancelled(token).await?;

        let mut cancelled = invitation;
        cancelled.status = InvitationStatus::Cancelled;
        info!(token, "Invitation cancelled");
        Ok(cancelled)
    }

    /// Fetch and apply the identity gate. The gate runs before any validity
    /// check, so a mismatched actor always sees `IdentityMismatch`.
    async fn load_gated(&self, token: &str, actor_identity: &str) -> Result<Invitation, Error> {
        let invitation = self.fetch_status(token).await?;
        if !invitation.email.eq_ignore_ascii_case(actor_identity) {
            warn!(token, "Accept/decline attempted by non-invited identity");
            return Err(InvitationError::IdentityMismatch.into());
        }
        Ok(invitation)
    }

    /// Reject anything but a Valid classification, persisting the lazy
    /// Expired transition when a mutating call observes the lapse.
    async fn require_valid(&self, invitation: &Invitation, now: DateTime<Utc>) -> Result<(), Error> {
        match token::classify(invitation, now) {
            TokenClass::Valid => Ok(()),
            TokenClass::Expired => {
                self.store.mark_expired(&invitation.token).await?;
                Err(InvitationError::Expired.into())
            }
            TokenClass::Consumed => Err(InvitationError::AlreadyConsumed {
                status: invitation.status.to_string(),
            }
            .into()),
            TokenClass::Malformed => Err(InvitationError::Malformed.into()),
        }
    }
}

/// Authoritative re-validation of the merged payload. Client-side validation
/// already ran, but the server never trusts it.
fn revalidate_payload(payload: &DraftPayload) -> Result<(), InvitationError> {
    for step in StepId::ALL {
        let errors = steps::validate(step, payload);
        if let Some((field, error)) = errors.iter().next() {
            return Err(InvitationError::ServerRejected {
                step: Some(step),
                field: Some((*field).to_string()),
                reason: error.to_string(),
            });
        }
    }
    Ok(())
}
