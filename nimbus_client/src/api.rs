//! HTTP client for the issuance server.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Errors raised while talking to the server.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Network-level failure
    #[error("connection error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The configured server URL is not parseable
    #[error("invalid server URL: {0}")]
    Url(#[from] url::ParseError),

    /// The server answered with an error status
    #[error("{message}")]
    Server { status: u16, message: String },
}

#[derive(Debug, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginData {
    pub token: String,
    pub user: UserInfo,
}

#[derive(Debug, Deserialize)]
pub struct IssuedBundle {
    pub config: String,
    pub assigned_ip: String,
    pub public_key: String,
}

#[derive(Debug, Deserialize)]
pub struct ServerStatus {
    pub status: String,
    pub total_users: usize,
    pub active_connections: usize,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Typed wrapper over the server's JSON API.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    /// Build a client for `base_url`. `insecure` disables certificate
    /// verification for development servers with self-signed certificates.
    pub fn new(base_url: &str, insecure: bool) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .danger_accept_invalid_certs(insecure)
            .build()?;
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path)?)
    }

    async fn fail(response: reqwest::Response, fallback: &str) -> ApiError {
        let status = response.status().as_u16();
        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.error)
            .unwrap_or_else(|| fallback.to_string());
        ApiError::Server { status, message }
    }

    /// Authenticate and obtain a session token.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginData, ApiError> {
        let response = self
            .http
            .post(self.endpoint("api/auth/login")?)
            .json(&LoginRequest { username, password })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::fail(response, "Login failed").await);
        }
        Ok(response.json().await?)
    }

    /// Request a fresh tunnel configuration for the session.
    pub async fn generate_config(&self, token: &str) -> Result<IssuedBundle, ApiError> {
        let response = self
            .http
            .post(self.endpoint("api/config/generate")?)
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::fail(response, "Config generation failed").await);
        }
        Ok(response.json().await?)
    }

    /// End the session server-side.
    pub async fn logout(&self, token: &str) -> Result<(), ApiError> {
        let response = self
            .http
            .post(self.endpoint("api/auth/logout")?)
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::fail(response, "Logout failed").await);
        }
        Ok(())
    }

    /// Fetch the server's public status counters.
    pub async fn status(&self) -> Result<ServerStatus, ApiError> {
        let response = self.http.get(self.endpoint("api/status")?).send().await?;

        if !response.status().is_success() {
            return Err(Self::fail(response, "Status query failed").await);
        }
        Ok(response.json().await?)
    }
}
