//! REST endpoints for the invitation lifecycle.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, InvitationError};
use crate::wizard::steps::{DraftPayload, StepId};

use super::model::{Invitation, InvitationRole, InvitationSummary};
use super::service::InvitationService;

/// Header carrying the authenticated actor's email, supplied by the
/// authentication collaborator.
pub const ACTOR_HEADER: &str = "x-actor-email";

/// Shared state for invitation routes.
#[derive(Clone)]
pub struct InvitationRouteState {
    pub service: Arc<InvitationService>,
}

/// Wire shape of an error response.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    /// For 409: which terminal status consumed the invitation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// For 422: which wizard step/field the server rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<StepId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Body of `POST /invitations`.
#[derive(Debug, Deserialize)]
pub struct CreateInvitationBody {
    pub email: String,
    pub role: InvitationRole,
}

/// Body of a successful decline.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeclineResponse {
    pub invitation: Invitation,
}

fn error_response(err: Error) -> Response {
    let (code, body) = match &err {
        Error::Invitation(e) => match e {
            InvitationError::Malformed | InvitationError::InvalidEmail(_) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: e.to_string(),
                    ..Default::default()
                },
            ),
            InvitationError::IdentityMismatch => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    error: e.to_string(),
                    ..Default::default()
                },
            ),
            InvitationError::NotFound => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    error: e.to_string(),
                    ..Default::default()
                },
            ),
            InvitationError::AlreadyConsumed { status } => (
                StatusCode::CONFLICT,
                ErrorBody {
                    error: e.to_string(),
                    status: Some(status.clone()),
                    ..Default::default()
                },
            ),
            InvitationError::Expired => (
                StatusCode::GONE,
                ErrorBody {
                    error: e.to_string(),
                    ..Default::default()
                },
            ),
            InvitationError::ServerRejected { step, field, reason } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody {
                    error: reason.clone(),
                    step: *step,
                    field: field.clone(),
                    ..Default::default()
                },
            ),
            InvitationError::Network { .. } => (
                StatusCode::BAD_GATEWAY,
                ErrorBody {
                    error: e.to_string(),
                    ..Default::default()
                },
            ),
        },
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorBody {
                error: other.to_string(),
                ..Default::default()
            },
        ),
    };
    (code, Json(body)).into_response()
}

fn actor_from(headers: &HeaderMap) -> Result<&str, Error> {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| InvitationError::IdentityMismatch.into())
}

/// POST /invitations — mint a new invitation (inviter side).
async fn create_invitation(
    State(state): State<InvitationRouteState>,
    Json(body): Json<CreateInvitationBody>,
) -> Response {
    match state.service.create(&body.email, body.role, Utc::now()).await {
        Ok(invitation) => (StatusCode::CREATED, Json(invitation)).into_response(),
        Err(err) => error_response(err),
    }
}

/// GET /invitations/{token} — unauthenticated status preview.
async fn get_invitation(
    State(state): State<InvitationRouteState>,
    Path(token): Path<String>,
) -> Response {
    match state.service.fetch_status(&token).await {
        Ok(invitation) => Json(InvitationSummary::from(&invitation)).into_response(),
        Err(err) => error_response(err),
    }
}

/// POST /invitations/{token}/accept — body is the merged wizard payload,
/// or `{}` for roles without a wizard.
async fn accept_invitation(
    State(state): State<InvitationRouteState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<DraftPayload>,
) -> Response {
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(err) => return error_response(err),
    };
    let payload = if payload.is_empty() {
        None
    } else {
        Some(&payload)
    };
    match state
        .service
        .accept(&token, actor, payload, Utc::now())
        .await
    {
        Ok(result) => Json(result).into_response(),
        Err(err) => error_response(err),
    }
}

/// POST /invitations/{token}/decline
async fn decline_invitation(
    State(state): State<InvitationRouteState>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Response {
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(err) => return error_response(err),
    };
    match state.service.decline(&token, actor, Utc::now()).await {
        Ok(invitation) => Json(DeclineResponse { invitation }).into_response(),
        Err(err) => error_response(err),
    }
}

/// POST /invitations/{token}/cancel — inviter-side revocation.
async fn cancel_invitation(
    State(state): State<InvitationRouteState>,
    Path(token): Path<String>,
) -> Response {
    match state.service.cancel(&token, Utc::now()).await {
        Ok(invitation) => Json(invitation).into_response(),
        Err(err) => error_response(err),
    }
}

/// Build the invitation REST routes.
pub fn invitation_routes(state: InvitationRouteState) -> Router {
    Router::new()
        .route("/invitations", post(create_invitation))
        .route("/invitations/{token}", get(get_invitation))
        .route("/invitations/{token}/accept", post(accept_invitation))
        .route("/invitations/{token}/decline", post(decline_invitation))
        .route("/invitations/{token}/cancel", post(cancel_invitation))
        .with_state(state)
}
