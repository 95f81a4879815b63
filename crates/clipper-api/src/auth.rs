//! API key authentication.
//!
//! Callers present a key either as `Authorization: Bearer <key>` or in the
//! `X-API-Key` header. With no keys configured every request is admitted.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, Response};
use axum::middleware::Next;
use axum::response::IntoResponse;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying an API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Who made the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self {
            subject: "anonymous".to_string(),
        }
    }
}

/// Raw credentials pulled from a request.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub token: Option<String>,
}

impl Credentials {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let bearer = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string());

        let api_key = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|t| t.trim().to_string());

        Self {
            token: bearer.or(api_key).filter(|t| !t.is_empty()),
        }
    }
}

/// Turns credentials into an identity or rejects them.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn verify(&self, credentials: &Credentials) -> Result<Identity, ApiError>;
}

/// Admits everyone.
pub struct AllowAll;

#[async_trait]
impl Authenticator for AllowAll {
    async fn verify(&self, _credentials: &Credentials) -> Result<Identity, ApiError> {
        Ok(Identity::anonymous())
    }
}

/// Checks the presented key against a fixed set.
pub struct ApiKeyAuthenticator {
    keys: Vec<String>,
}

impl ApiKeyAuthenticator {
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }
}

/// Compare without short-circuiting on the first differing byte.
fn keys_match(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    async fn verify(&self, credentials: &Credentials) -> Result<Identity, ApiError> {
        let token = credentials
            .token
            .as_deref()
            .ok_or_else(|| ApiError::unauthorized("Missing API key"))?;

        self.keys
            .iter()
            .position(|key| keys_match(key, token))
            .map(|index| Identity {
                subject: format!("api-key-{index}"),
            })
            .ok_or_else(|| ApiError::unauthorized("Invalid API key"))
    }
}

/// Build the authenticator for a key list.
pub fn authenticator_for(keys: &[String]) -> Arc<dyn Authenticator> {
    if keys.is_empty() {
        Arc::new(AllowAll)
    } else {
        Arc::new(ApiKeyAuthenticator::new(keys.to_vec()))
    }
}

/// Authentication middleware. Stores the `Identity` in request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let credentials = Credentials::from_headers(request.headers());
    match state.authenticator.verify(&credentials).await {
        Ok(identity) => {
            debug!(subject = %identity.subject, "Authenticated request");
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(e) => {
            warn!(uri = %request.uri(), "Rejected request: {}", e);
            e.into_response()
        }
    }
}
