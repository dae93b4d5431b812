//! HTTP facade.
//!
//! Thin request/response mapping onto the auth gateway and config issuer.
//! Handlers translate errors into the generic JSON bodies the API
//! advertises; detail stays in the server logs.

use crate::auth::{AuthError, AuthGateway};
use crate::issuer::ConfigIssuer;
use crate::store::{ConnectionRegistry, CredentialStore, Identity};
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::error;

/// Shared state behind every handler.
pub struct AppState {
    pub gateway: AuthGateway,
    pub issuer: ConfigIssuer,
    pub store: Arc<CredentialStore>,
    pub registry: Arc<ConnectionRegistry>,
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/config/generate", post(generate_config))
        .route("/api/users/me", get(current_user))
        .route("/api/status", get(status))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct UserInfo {
    id: String,
    username: String,
    email: String,
}

impl From<Identity> for UserInfo {
    fn from(identity: Identity) -> Self {
        UserInfo {
            id: identity.id.to_string(),
            username: identity.username,
            email: identity.email,
        }
    }
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    success: bool,
    token: String,
    user: UserInfo,
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    success: bool,
    config: String,
    assigned_ip: String,
    public_key: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    success: bool,
    status: &'static str,
    total_users: usize,
    active_connections: usize,
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// Pull a bearer token out of the Authorization header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Resolve the calling session or produce the 401 response.
async fn require_session(state: &AppState, headers: &HeaderMap) -> Result<String, Response> {
    let token = bearer_token(headers)
        .ok_or_else(|| error_body(StatusCode::UNAUTHORIZED, "Authentication required"))?;
    state
        .gateway
        .validate(token)
        .await
        .ok_or_else(|| error_body(StatusCode::UNAUTHORIZED, "Authentication required"))
}

async fn login(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<LoginRequest>,
) -> Response {
    if req.username.is_empty() || req.password.is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "Username and password required");
    }

    match state
        .gateway
        .authenticate(&req.username, &req.password, &addr.ip().to_string())
        .await
    {
        Ok((token, identity)) => Json(LoginResponse {
            success: true,
            token,
            user: identity.into(),
        })
        .into_response(),
        Err(AuthError::InvalidCredentials) => {
            error_body(StatusCode::UNAUTHORIZED, "Invalid credentials")
        }
        Err(AuthError::Store(detail)) => {
            error!("login failed: {detail}");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Login failed")
        }
    }
}

async fn logout(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return error_body(StatusCode::UNAUTHORIZED, "Authentication required");
    };
    match state.gateway.logout(token, &addr.ip().to_string()).await {
        Ok(_) => Json(serde_json::json!({ "success": true })).into_response(),
        Err(err) => {
            error!("logout failed: {err}");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Logout failed")
        }
    }
}

async fn generate_config(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let username = match require_session(&state, &headers).await {
        Ok(username) => username,
        Err(response) => return response,
    };

    match state.issuer.issue(&username).await {
        Ok(issued) => Json(GenerateResponse {
            success: true,
            config: issued.document,
            assigned_ip: issued.address.to_string(),
            public_key: issued.public_key,
        })
        .into_response(),
        Err(err) => {
            error!(username, "config generation failed: {err}");
            error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to generate configuration",
            )
        }
    }
}

async fn current_user(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let username = match require_session(&state, &headers).await {
        Ok(username) => username,
        Err(response) => return response,
    };

    match state.store.get(&username).await {
        Some(identity) => Json(serde_json::json!({
            "success": true,
            "user": UserInfo::from(identity),
        }))
        .into_response(),
        None => error_body(StatusCode::NOT_FOUND, "User not found"),
    }
}

async fn status(State(state): State<Arc<AppState>>) -> Response {
    Json(StatusResponse {
        success: true,
        status: "online",
        total_users: state.store.enabled_count().await,
        active_connections: state.registry.count().await,
    })
    .into_response()
}
