//! The authority boundary the client-side flow talks through.
//!
//! `SubmissionCoordinator` never calls the service or the network directly;
//! it goes through `InvitationAuthority`, implemented in-process by
//! `InvitationService` and over the wire by `HttpAuthority`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;

use crate::error::{Error, InvitationError};
use crate::wizard::steps::DraftPayload;

use super::model::{Invitation, InvitationSummary, SubmissionResult};
use super::routes::{ACTOR_HEADER, DeclineResponse, ErrorBody};
use super::service::InvitationService;

/// Remote authority operations, as seen from the client side.
///
/// An empty `payload` means a no-wizard accept.
#[async_trait]
pub trait InvitationAuthority: Send + Sync {
    async fn fetch_status(&self, token: &str) -> Result<InvitationSummary, InvitationError>;

    async fn accept(
        &self,
        token: &str,
        actor_identity: &str,
        payload: DraftPayload,
    ) -> Result<SubmissionResult, InvitationError>;

    async fn decline(
        &self,
        token: &str,
        actor_identity: &str,
    ) -> Result<Invitation, InvitationError>;
}

/// Store/database failures cross the boundary as retryable network errors:
/// from the client's point of view the authority was simply unavailable.
fn flatten(err: Error) -> InvitationError {
    match err {
        Error::Invitation(e) => e,
        other => InvitationError::Network {
            reason: other.to_string(),
            retryable: true,
        },
    }
}

#[async_trait]
impl InvitationAuthority for InvitationService {
    async fn fetch_status(&self, token: &str) -> Result<InvitationSummary, InvitationError> {
        self.fetch_status(token)
            .await
            .map(|inv| InvitationSummary::from(&inv))
            .map_err(flatten)
    }

    async fn accept(
        &self,
        token: &str,
        actor_identity: &str,
        payload: DraftPayload,
    ) -> Result<SubmissionResult, InvitationError> {
        let payload = if payload.is_empty() {
            None
        } else {
            Some(payload)
        };
        self.accept(token, actor_identity, payload.as_ref(), Utc::now())
            .await
            .map_err(flatten)
    }

    async fn decline(
        &self,
        token: &str,
        actor_identity: &str,
    ) -> Result<Invitation, InvitationError> {
        self.decline(token, actor_identity, Utc::now())
            .await
            .map_err(flatten)
    }
}

/// HTTP client for a remote invitation authority.
pub struct HttpAuthority {
    base_url: String,
    client: reqwest::Client,
}

impl HttpAuthority {
    /// Build a client with a bounded per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, InvitationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InvitationError::Network {
                reason: format!("failed to build HTTP client: {e}"),
                retryable: false,
            })?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

fn transport_error(e: reqwest::Error) -> InvitationError {
    InvitationError::Network {
        reason: e.to_string(),
        retryable: e.is_timeout() || e.is_connect(),
    }
}

/// Map a non-2xx response back onto the error taxonomy.
async fn response_error(resp: reqwest::Response) -> InvitationError {
    let status = resp.status();
    let body: ErrorBody = resp.json().await.unwrap_or_default();
    match status {
        StatusCode::BAD_REQUEST => InvitationError::Malformed,
        StatusCode::UNAUTHORIZED => InvitationError::IdentityMismatch,
        StatusCode::NOT_FOUND => InvitationError::NotFound,
        StatusCode::CONFLICT => InvitationError::AlreadyConsumed {
            status: body.status.unwrap_or_else(|| "consumed".to_string()),
        },
        StatusCode::GONE => InvitationError::Expired,
        StatusCode::UNPROCESSABLE_ENTITY => InvitationError::ServerRejected {
            step: body.step,
            field: body.field,
            reason: body.error,
        },
        s => InvitationError::Network {
            reason: format!("unexpected response status {s}: {}", body.error),
            retryable: s.is_server_error(),
        },
    }
}

#[async_trait]
impl InvitationAuthority for HttpAuthority {
    async fn fetch_status(&self, token: &str) -> Result<InvitationSummary, InvitationError> {
        let resp = self
            .client
            .get(self.url(&format!("/invitations/{token}")))
            .send()
            .await
            .map_err(transport_error)?;
        if !resp.status().is_success() {
            return Err(response_error(resp).await);
        }
        resp.json().await.map_err(transport_error)
    }

    async fn accept(
        &self,
        token: &str,
        actor_identity: &str,
        payload: DraftPayload,
    ) -> Result<SubmissionResult, InvitationError> {
        let resp = self
            .client
            .post(self.url(&format!("/invitations/{token}/accept")))
            .header(ACTOR_HEADER, actor_identity)
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;
        if !resp.status().is_success() {
            return Err(response_error(resp).await);
        }
        resp.json().await.map_err(transport_error)
    }

    async fn decline(
        &self,
        token: &str,
        actor_identity: &str,
    ) -> Result<Invitation, InvitationError> {
        let resp = self
            .client
            .post(self.url(&format!("/invitations/{token}/decline")))
            .header(ACTOR_HEADER, actor_identity)
            .send()
            .await
            .map_err(transport_error)?;
        if !resp.status().is_success() {
            return Err(response_error(resp).await);
        }
        let body: DeclineResponse = resp.json().await.map_err(transport_error)?;
        Ok(body.invitation)
    }
}
