//! Routing policy — pure decisions about where an invitee lands.
//!
//! Emits destination identifiers only; the dashboard/router collaborator
//! owns the actual navigation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::invitation::model::{InvitationRole, InvitationStatus, InvitationSummary};
use crate::invitation::token::TokenClass;
use crate::wizard::session::WizardSession;

/// Role-specific landing destination after a completed flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandingPage {
    TeacherDashboard,
    AdminConsole,
    MemberHome,
}

impl LandingPage {
    pub fn for_role(role: InvitationRole) -> Self {
        match role {
            InvitationRole::Teacher => Self::TeacherDashboard,
            InvitationRole::Admin => Self::AdminConsole,
            InvitationRole::Member => Self::MemberHome,
        }
    }
}

/// Where the flow should take the user next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "destination", rename_all = "snake_case")]
pub enum Destination {
    /// The token is not even well-formed; nothing to show but an error page.
    InvalidLink,
    /// The invitation already reached a terminal state; each status implies a
    /// different next action for the user, so the status travels along.
    TerminalNotice { status: InvitationStatus },
    /// Pending, no wizard required: a plain accept/decline confirmation.
    Confirmation,
    /// Pending, wizard required: enter (or resume) at this step.
    Wizard { step_index: usize },
    /// Flow finished; hand off to the role-specific landing page.
    Landing { page: LandingPage },
}

/// Decide the entry destination for an invitation link.
///
/// A lapsed `Pending` routes to the expired notice even though the stored
/// status has not been rewritten yet; persistence of the expiry is the
/// authority's concern, not the router's.
pub fn decide(
    summary: &InvitationSummary,
    session: Option<&WizardSession>,
    now: DateTime<Utc>,
) -> Destination {
    match summary.classify(now) {
        TokenClass::Malformed => Destination::InvalidLink,
        TokenClass::Expired => Destination::TerminalNotice {
            status: InvitationStatus::Expired,
        },
        TokenClass::Consumed => Destination::TerminalNotice {
            status: summary.status,
        },
        TokenClass::Valid => {
            if summary.requires_wizard {
                Destination::Wizard {
                    step_index: session.map_or(0, |s| s.step_index),
                }
            } else {
                Destination::Confirmation
            }
        }
    }
}

/// Where a successfully completed flow lands.
pub fn after_submission(role: InvitationRole) -> Destination {
    Destination::Landing {
        page: LandingPage::for_role(role),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::wizard::steps::StepId;

    const TOKEN: &str = "abcdefghijklmnopqrstuvwxyz012345";

    fn summary(status: InvitationStatus, requires_wizard: bool) -> InvitationSummary {
        InvitationSummary {
            token: TOKEN.to_string(),
            email: "a@x.com".to_string(),
            role: InvitationRole::Teacher,
            status,
            expires_at: Utc::now() + Duration::days(1),
            requires_wizard,
        }
    }

    #[test]
    fn terminal_statuses_route_to_their_notice() {
        let now = Utc::now();
        for status in [
            InvitationStatus::Accepted,
            InvitationStatus::Declined,
            InvitationStatus::Expired,
            InvitationStatus::Cancelled,
        ] {
            let dest = decide(&summary(status, true), None, now);
            assert_eq!(dest, Destination::TerminalNotice { status }, "{status}");
        }
    }

    #[test]
    fn lapsed_pending_routes_to_the_expired_notice() {
        let now = Utc::now();
        let mut s = summary(InvitationStatus::Pending, true);
        s.expires_at = now - Duration::seconds(1);
        assert_eq!(
            decide(&s, None, now),
            Destination::TerminalNotice {
                status: InvitationStatus::Expired
            }
        );
    }

    #[test]
    fn malformed_token_routes_to_invalid_link() {
        let mut s = summary(InvitationStatus::Pending, true);
        s.token = "too-short".to_string();
        assert_eq!(decide(&s, None, Utc::now()), Destination::InvalidLink);
    }

    #[test]
    fn pending_without_wizard_routes_to_confirmation() {
        let s = summary(InvitationStatus::Pending, false);
        assert_eq!(decide(&s, None, Utc::now()), Destination::Confirmation);
    }

    #[test]
    fn pending_with_wizard_enters_at_step_zero_without_a_draft() {
        let s = summary(InvitationStatus::Pending, true);
        assert_eq!(
            decide(&s, None, Utc::now()),
            Destination::Wizard { step_index: 0 }
        );
    }

    #[test]
    fn pending_with_wizard_resumes_at_the_persisted_step() {
        let s = summary(InvitationStatus::Pending, true);
        let mut session = WizardSession::new(TOKEN);
        session.step_index = 1;
        session.completed_steps.insert(StepId::PersonalInfo);
        assert_eq!(
            decide(&s, Some(&session), Utc::now()),
            Destination::Wizard { step_index: 1 }
        );
    }

    #[test]
    fn submission_lands_on_the_role_page() {
        assert_eq!(
            after_submission(InvitationRole::Teacher),
            Destination::Landing {
                page: LandingPage::TeacherDashboard
            }
        );
        assert_eq!(
            after_submission(InvitationRole::Admin),
            Destination::Landing {
                page: LandingPage::AdminConsole
            }
        );
        assert_eq!(
            after_submission(InvitationRole::Member),
            Destination::Landing {
                page: LandingPage::MemberHome
            }
        );
    }
}
