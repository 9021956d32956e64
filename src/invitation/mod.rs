//! Invitation subsystem — token-gated, single-use organization invitations.
//!
//! The server side owns the `Pending → {Accepted, Declined, Expired,
//! Cancelled}` state machine; the client side reaches it through the
//! `InvitationAuthority` seam and treats everything it fetched as a
//! possibly-stale cache.

pub mod authority;
pub mod model;
pub mod routes;
pub mod service;
pub mod token;

pub use authority::{HttpAuthority, InvitationAuthority};
pub use model::{
    Cached, Invitation, InvitationRole, InvitationStatus, InvitationSummary, Profile,
    SubmissionResult,
};
pub use routes::{InvitationRouteState, invitation_routes};
pub use service::InvitationService;
pub use token::{TokenClass, classify, is_well_formed};
