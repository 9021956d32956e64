//! Token classification — pure validity checks over fetched snapshots.

use chrono::{DateTime, Utc};
use rand::Rng;

use super::model::{Invitation, InvitationStatus, InvitationSummary};

/// Fixed length of an invitation token.
pub const TOKEN_LEN: usize = 32;

const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Validity class of a token, given a fetched invitation snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenClass {
    Valid,
    Malformed,
    Expired,
    Consumed,
}

/// Mint a fresh token.
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LEN)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

/// Format pre-check: fixed-length ASCII alphanumeric. Needs no snapshot and
/// no I/O, so callers can fail fast before any network or database call.
pub fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_LEN && token.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Classify a token given its snapshot's status and expiry.
///
/// `now == expires_at` is still valid; expiry requires strictly later.
pub fn classify_parts(
    token: &str,
    status: InvitationStatus,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> TokenClass {
    if !is_well_formed(token) {
        return TokenClass::Malformed;
    }
    match status {
        InvitationStatus::Pending if now > expires_at => TokenClass::Expired,
        InvitationStatus::Pending => TokenClass::Valid,
        _ => TokenClass::Consumed,
    }
}

/// Classify against a full invitation record.
pub fn classify(invitation: &Invitation, now: DateTime<Utc>) -> TokenClass {
    classify_parts(&invitation.token, invitation.status, invitation.expires_at, now)
}

impl InvitationSummary {
    /// Classify this snapshot's token as of `now`.
    pub fn classify(&self, now: DateTime<Utc>) -> TokenClass {
        classify_parts(&self.token, self.status, self.expires_at, now)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::invitation::model::InvitationRole;

    fn pending_invitation(now: DateTime<Utc>, lifetime_days: i64) -> Invitation {
        Invitation::new("a@x.com", InvitationRole::Teacher, now, Duration::days(lifetime_days))
    }

    #[test]
    fn generated_tokens_are_well_formed_and_distinct() {
        let a = generate();
        let b = generate();
        assert!(is_well_formed(&a));
        assert!(is_well_formed(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_shapes() {
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("short"));
        assert!(!is_well_formed(&"x".repeat(TOKEN_LEN + 1)));
        // Right length, wrong characters
        assert!(!is_well_formed(&"!".repeat(TOKEN_LEN)));
        assert!(!is_well_formed(&format!("{}-", "a".repeat(TOKEN_LEN - 1))));
    }

    #[test]
    fn malformed_wins_over_everything() {
        let now = Utc::now();
        let mut inv = pending_invitation(now, 14);
        inv.token = "bogus".into();
        assert_eq!(classify(&inv, now), TokenClass::Malformed);
        inv.status = InvitationStatus::Accepted;
        assert_eq!(classify(&inv, now), TokenClass::Malformed);
    }

    #[test]
    fn pending_within_lifetime_is_valid() {
        let now = Utc::now();
        let inv = pending_invitation(now, 14);
        assert_eq!(classify(&inv, now), TokenClass::Valid);
        // Boundary: now == expires_at is still valid
        assert_eq!(classify(&inv, inv.expires_at), TokenClass::Valid);
    }

    #[test]
    fn pending_past_expiry_is_expired() {
        let now = Utc::now();
        let inv = pending_invitation(now, 14);
        let later = inv.expires_at + Duration::seconds(1);
        assert_eq!(classify(&inv, later), TokenClass::Expired);
    }

    #[test]
    fn every_terminal_status_is_consumed() {
        let now = Utc::now();
        for status in [
            InvitationStatus::Accepted,
            InvitationStatus::Declined,
            InvitationStatus::Expired,
            InvitationStatus::Cancelled,
        ] {
            let mut inv = pending_invitation(now, 14);
            inv.status = status;
            assert_eq!(classify(&inv, now), TokenClass::Consumed, "{status}");
            // Consumed even when also past expiry
            let later = inv.expires_at + Duration::days(1);
            assert_eq!(classify(&inv, later), TokenClass::Consumed, "{status}");
        }
    }

    #[test]
    fn summary_classifies_like_the_record() {
        let now = Utc::now();
        let inv = pending_invitation(now, 14);
        let summary = InvitationSummary::from(&inv);
        assert_eq!(summary.classify(now), TokenClass::Valid);
        assert_eq!(
            summary.classify(inv.expires_at + Duration::seconds(1)),
            TokenClass::Expired
        );
    }
}
