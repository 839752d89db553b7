//! Join-surface HTTP route handlers.
//!
//! Mounted by the binary crate; handlers delegate to [`AuthServer`].

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Duration;

use moray_common::error::ErrorCode;

use crate::error::AuthError;
use crate::protocol::{
    ErrorBody, GenerateTokenRequest, GenerateTokenResponse, HostCaKeysResponse, JoinRequest,
    ValidateTokenRequest, ValidateTokenResponse,
};
use crate::AuthServer;

/// Build the join-surface router.
pub fn routes(auth: Arc<AuthServer>) -> Router {
    Router::new()
        .route("/v1/tokens", post(generate_token_handler))
        .route("/v1/tokens/validate", post(validate_token_handler))
        .route("/v1/join", post(join_handler))
        .route("/v1/ca/host", get(host_ca_handler))
        .with_state(auth)
}

/// POST /v1/tokens — mint a join token.
async fn generate_token_handler(
    State(auth): State<Arc<AuthServer>>,
    Json(request): Json<GenerateTokenRequest>,
) -> Response {
    match auth
        .generate_token(
            &request.node_name,
            &request.role,
            Duration::seconds(request.ttl_secs),
        )
        .await
    {
        Ok(token) => (StatusCode::OK, Json(GenerateTokenResponse { token })).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /v1/tokens/validate — check a token without consuming it.
async fn validate_token_handler(
    State(auth): State<Arc<AuthServer>>,
    Json(request): Json<ValidateTokenRequest>,
) -> Response {
    match auth
        .validate_token(&request.token, &request.domain_name)
        .await
    {
        Ok(role) => (StatusCode::OK, Json(ValidateTokenResponse { role })).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /v1/join — exchange a token for a host certificate.
async fn join_handler(
    State(auth): State<Arc<AuthServer>>,
    Json(request): Json<JoinRequest>,
) -> Response {
    match auth
        .register_using_token(&request.token, &request.node_name, &request.role)
        .await
    {
        Ok(packed) => (StatusCode::OK, Json(packed)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /v1/ca/host — trusted host authority keys.
async fn host_ca_handler(State(auth): State<Arc<AuthServer>>) -> Response {
    match auth.host_authority_keys().await {
        Ok(keys) => (StatusCode::OK, Json(HostCaKeysResponse { keys })).into_response(),
        Err(e) => error_response(&e),
    }
}

fn error_response(e: &AuthError) -> Response {
    let code = ErrorCode::from(e);
    let status =
        StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ErrorBody {
            error: code,
            message: e.to_string(),
        }),
    )
        .into_response()
}
