//! Invite Flow — invitation lifecycle and onboarding wizard core.

pub mod config;
pub mod error;
pub mod invitation;
pub mod routing;
pub mod store;
pub mod wizard;
