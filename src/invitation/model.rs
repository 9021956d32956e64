//! Invitation data model — the server-authoritative record and its wire views.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::wizard::steps::DraftPayload;

use super::token;

/// Lifecycle status of an invitation.
///
/// `Pending` is the only non-terminal state; every other status is a one-shot
/// terminal transition out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
    Cancelled,
}

impl InvitationStatus {
    /// Whether the invitation can never transition again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Role the invitee is being offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationRole {
    Teacher,
    Admin,
    Member,
}

impl InvitationRole {
    /// Server-side rule for whether this role must complete the profile
    /// wizard before acceptance. Clients only ever see the resulting flag.
    pub fn requires_wizard(&self) -> bool {
        matches!(self, Self::Teacher)
    }
}

impl std::fmt::Display for InvitationRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Teacher => "teacher",
            Self::Admin => "admin",
            Self::Member => "member",
        };
        write!(f, "{s}")
    }
}

/// A single-use invitation, owned by the server authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
    pub id: Uuid,
    /// Opaque single-use token; fixed-length alphanumeric.
    pub token: String,
    /// Invited identity. Must match the authenticated actor on accept/decline.
    pub email: String,
    pub role: InvitationRole,
    pub status: InvitationStatus,
    /// Opaque to clients; derived from the role at creation.
    pub requires_wizard: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Set exactly once, on the Pending→Accepted transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,
    /// Recorded on accept so retried accepts replay the same result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_created: Option<bool>,
}

impl Invitation {
    /// Mint a new pending invitation with a fresh token.
    pub fn new(email: &str, role: InvitationRole, now: DateTime<Utc>, lifetime: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            token: token::generate(),
            email: email.to_string(),
            role,
            status: InvitationStatus::Pending,
            requires_wizard: role.requires_wizard(),
            created_at: now,
            expires_at: now + lifetime,
            accepted_at: None,
            profile_created: None,
        }
    }
}

/// Unauthenticated wire view of an invitation (status preview before signup).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvitationSummary {
    pub token: String,
    pub email: String,
    pub role: InvitationRole,
    pub status: InvitationStatus,
    pub expires_at: DateTime<Utc>,
    pub requires_wizard: bool,
}

impl From<&Invitation> for InvitationSummary {
    fn from(inv: &Invitation) -> Self {
        Self {
            token: inv.token.clone(),
            email: inv.email.clone(),
            role: inv.role,
            status: inv.status,
            expires_at: inv.expires_at,
            requires_wizard: inv.requires_wizard,
        }
    }
}

/// Outcome of a successful accept. Ephemeral — never persisted as a unit,
/// but reproducible from the invitation row for idempotent retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub invitation: Invitation,
    /// Whether a new profile was created, as opposed to reusing an existing one.
    pub profile_created: bool,
}

/// Profile entity created (or reused) when an invitation is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    /// The merged wizard payload the profile was created from.
    pub data: DraftPayload,
    pub created_at: DateTime<Utc>,
}

/// A possibly-stale client-side copy of server-authoritative state.
///
/// The client never trusts this implicitly: preconditions are re-checked
/// against a fresh fetch, and any failed precondition invalidates the cache.
#[derive(Debug, Clone)]
pub struct Cached<T> {
    pub value: T,
    pub fetched_at: DateTime<Utc>,
}

impl<T> Cached<T> {
    pub fn new(value: T, now: DateTime<Utc>) -> Self {
        Self {
            value,
            fetched_at: now,
        }
    }

    /// Whether the snapshot is older than `max_age`.
    pub fn is_stale(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        now - self.fetched_at > max_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_is_the_only_non_terminal_status() {
        assert!(!InvitationStatus::Pending.is_terminal());
        for status in [
            InvitationStatus::Accepted,
            InvitationStatus::Declined,
            InvitationStatus::Expired,
            InvitationStatus::Cancelled,
        ] {
            assert!(status.is_terminal(), "{status} should be terminal");
        }
    }

    #[test]
    fn wizard_requirement_follows_role() {
        assert!(InvitationRole::Teacher.requires_wizard());
        assert!(!InvitationRole::Admin.requires_wizard());
        assert!(!InvitationRole::Member.requires_wizard());
    }

    #[test]
    fn new_invitation_invariants() {
        let now = Utc::now();
        let inv = Invitation::new("a@x.com", InvitationRole::Teacher, now, Duration::days(14));
        assert_eq!(inv.status, InvitationStatus::Pending);
        assert!(inv.expires_at > inv.created_at);
        assert!(inv.requires_wizard);
        assert!(inv.accepted_at.is_none());
        assert!(crate::invitation::token::is_well_formed(&inv.token));
    }

    #[test]
    fn invitation_serde_roundtrip() {
        let now = Utc::now();
        let inv = Invitation::new("a@x.com", InvitationRole::Member, now, Duration::days(7));
        let json = serde_json::to_string(&inv).unwrap();
        let parsed: Invitation = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, inv);
    }

    #[test]
    fn cached_staleness() {
        let now = Utc::now();
        let cached = Cached::new(42u32, now);
        assert!(!cached.is_stale(Duration::seconds(30), now + Duration::seconds(30)));
        assert!(cached.is_stale(Duration::seconds(30), now + Duration::seconds(31)));
    }
}
