//! SubmissionCoordinator — single entry point for consuming an invitation.
//!
//! Merges the wizard draft into one payload, re-checks preconditions against
//! a fresh authority fetch, and performs the accept with a bounded timeout.
//! The draft is cleared only after a confirmed success; every failure path
//! leaves it intact so the user never re-enters data.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::config::FlowConfig;
use crate::error::{Error, InvitationError, WizardError};
use crate::invitation::authority::InvitationAuthority;
use crate::invitation::model::{Cached, Invitation, InvitationSummary, SubmissionResult};
use crate::invitation::token::TokenClass;
use crate::store::DraftStore;

use super::session::WizardSessionManager;
use super::steps::DraftPayload;

/// Bound an authority call; elapsing surfaces as a retryable network error.
async fn with_timeout<T>(
    timeout: StdDuration,
    fut: impl Future<Output = Result<T, InvitationError>>,
) -> Result<T, InvitationError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(InvitationError::Network {
            reason: "request timed out".to_string(),
            retryable: true,
        }),
    }
}

pub struct SubmissionCoordinator {
    authority: Arc<dyn InvitationAuthority>,
    store: Arc<dyn DraftStore>,
    /// Authenticated identity, passed through to every accept/decline.
    actor_identity: String,
    request_timeout: StdDuration,
    cache_max_age: Duration,
    cached: Option<Cached<InvitationSummary>>,
    /// Double-submit guard; the server's idempotent accept is the backstop.
    in_flight: bool,
}

impl SubmissionCoordinator {
    pub fn new(
        authority: Arc<dyn InvitationAuthority>,
        store: Arc<dyn DraftStore>,
        actor_identity: &str,
        config: &FlowConfig,
    ) -> Self {
        Self {
            authority,
            store,
            actor_identity: actor_identity.to_string(),
            request_timeout: config.request_timeout,
            cache_max_age: config.cache_max_age,
            cached: None,
            in_flight: false,
        }
    }

    /// Invitation status, served from the cache while fresh.
    pub async fn status(
        &mut self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<InvitationSummary, Error> {
        if let Some(cached) = &self.cached {
            if cached.value.token == token && !cached.is_stale(self.cache_max_age, now) {
                return Ok(cached.value.clone());
            }
        }
        self.fresh_status(token, now).await
    }

    /// Bypass the cache and fetch an authoritative snapshot.
    async fn fresh_status(
        &mut self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<InvitationSummary, Error> {
        let authority = Arc::clone(&self.authority);
        let summary = with_timeout(self.request_timeout, authority.fetch_status(token)).await?;
        self.cached = Some(Cached::new(summary.clone(), now));
        Ok(summary)
    }

    /// Submit the completed wizard: merged draft → accept → clear.
    pub async fn submit(
        &mut self,
        session: &mut WizardSessionManager,
        now: DateTime<Utc>,
    ) -> Result<SubmissionResult, Error> {
        if self.in_flight {
            return Err(WizardError::SubmitInFlight.into());
        }
        if !session.can_submit() {
            return Err(WizardError::NotSubmittable.into());
        }

        let token = session.session().invitation_token.clone();
        // The local snapshot may be stale; re-check against a fresh fetch.
        let summary = self.fresh_status(&token, now).await?;
        self.require_valid(&summary, now)?;

        // Everything durable before the network call.
        session.flush().await?;
        let payload = session.session().draft.clone();

        self.in_flight = true;
        let authority = Arc::clone(&self.authority);
        let result = with_timeout(
            self.request_timeout,
            authority.accept(&token, &self.actor_identity, payload),
        )
        .await;
        self.in_flight = false;

        match result {
            Ok(result) => {
                self.store.clear(&token).await?;
                self.cached = None;
                info!(token, "Submission confirmed, draft cleared");
                Ok(result)
            }
            Err(InvitationError::ServerRejected {
                step: Some(step),
                field,
                reason,
            }) => {
                // Re-open the wizard at the offending step; the draft stays.
                self.cached = None;
                if let Err(jump_err) = session.jump_to(step.index()).await {
                    warn!(token, step = %step, error = %jump_err, "Could not re-open rejected step");
                }
                Err(InvitationError::ServerRejected {
                    step: Some(step),
                    field,
                    reason,
                }
                .into())
            }
            Err(err) => {
                // Draft intentionally preserved; a retryable error can be
                // re-attempted without re-collecting anything.
                self.cached = None;
                Err(err.into())
            }
        }
    }

    /// Accept directly, for roles that skip the wizard.
    pub async fn accept_without_wizard(
        &mut self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<SubmissionResult, Error> {
        if self.in_flight {
            return Err(WizardError::SubmitInFlight.into());
        }
        let summary = self.fresh_status(token, now).await?;
        self.require_valid(&summary, now)?;

        self.in_flight = true;
        let authority = Arc::clone(&self.authority);
        let result = with_timeout(
            self.request_timeout,
            authority.accept(token, &self.actor_identity, DraftPayload::default()),
        )
        .await;
        self.in_flight = false;

        if result.is_err() {
            self.cached = None;
        }
        Ok(result?)
    }

    /// Decline the invitation.
    pub async fn decline(
        &mut self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Invitation, Error> {
        if self.in_flight {
            return Err(WizardError::SubmitInFlight.into());
        }
        let summary = self.fresh_status(token, now).await?;
        self.require_valid(&summary, now)?;

        self.in_flight = true;
        let authority = Arc::clone(&self.authority);
        let result = with_timeout(
            self.request_timeout,
            authority.decline(token, &self.actor_identity),
        )
        .await;
        self.in_flight = false;

        if result.is_err() {
            self.cached = None;
        }
        Ok(result?)
    }

    /// Check a fresh snapshot; any failed precondition drops the cache so
    /// the next read re-fetches.
    fn require_valid(&mut self, summary: &InvitationSummary, now: DateTime<Utc>) -> Result<(), Error> {
        let err = match summary.classify(now) {
            TokenClass::Valid => return Ok(()),
            TokenClass::Expired => InvitationError::Expired,
            TokenClass::Consumed => InvitationError::AlreadyConsumed {
                status: summary.status.to_string(),
            },
            TokenClass::Malformed => InvitationError::Malformed,
        };
        self.cached = None;
        Err(err.into())
    }
}
