//! Request authentication for the orchestrator API.
//!
//! Two credential forms are accepted on every protected route: a signed
//! bearer token (three-segment HMAC-SHA256, claims `sub`/`iat`/`exp` plus
//! optional `scope[]` and `device`), or an `X-API-Key` header carrying an
//! `sk_swarm_`-prefixed key. `/health` is mounted outside this layer.

use axum::{
    body::Body,
    http::{Request, Response, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::task::{Context, Poll};
use subtle::ConstantTimeEq;
use tower::{Layer, Service};

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
    #[error("invalid api key")]
    BadApiKey,
    #[error("missing credentials")]
    Missing,
}

// ---------------------------------------------------------------------------
// TokenVerifier
// ---------------------------------------------------------------------------

/// Verifies (and, for tests and companion tooling, signs) bearer tokens
/// with a process-wide HMAC secret.
#[derive(Clone)]
pub struct TokenVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Validate a token's signature and expiry, returning its claims.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        match jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(AuthError::Expired),
                _ => Err(AuthError::Invalid),
            },
        }
    }

    /// Issue a token for `sub` valid for `ttl_secs`.
    pub fn sign(&self, sub: &str, ttl_secs: i64) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: sub.to_string(),
            iat: now,
            exp: now + ttl_secs,
            scope: None,
            device: None,
        };
        jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|_| AuthError::Invalid)
    }
}

// ---------------------------------------------------------------------------
// API keys
// ---------------------------------------------------------------------------

pub const API_KEY_PREFIX: &str = "sk_swarm_";

/// Format check for API keys: `sk_swarm_` prefix and length > 20.
pub fn api_key_format_ok(key: &str) -> bool {
    key.starts_with(API_KEY_PREFIX) && key.len() > 20
}

// ---------------------------------------------------------------------------
// AuthLayer
// ---------------------------------------------------------------------------

struct AuthState {
    verifier: TokenVerifier,
    /// When set, `X-API-Key` must equal this key (constant-time).
    pinned_key: Option<String>,
}

/// A [`tower::Layer`] that wraps services with [`AuthMiddleware`].
#[derive(Clone)]
pub struct AuthLayer {
    state: Arc<AuthState>,
}

impl AuthLayer {
    pub fn new(verifier: TokenVerifier, pinned_key: Option<String>) -> Self {
        Self {
            state: Arc::new(AuthState {
                verifier,
                pinned_key,
            }),
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            state: self.state.clone(),
        }
    }
}

/// The actual middleware service produced by [`AuthLayer`].
#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    state: Arc<AuthState>,
}

fn check_request(state: &AuthState, req: &Request<Body>) -> Result<(), AuthError> {
    if let Some(key) = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
    {
        if !api_key_format_ok(key) {
            return Err(AuthError::BadApiKey);
        }
        if let Some(pinned) = &state.pinned_key {
            if !bool::from(key.as_bytes().ct_eq(pinned.as_bytes())) {
                return Err(AuthError::BadApiKey);
            }
        }
        return Ok(());
    }

    if let Some(token) = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return state.verifier.verify(token).map(|_| ());
    }

    Err(AuthError::Missing)
}

impl<S> Service<Request<Body>> for AuthMiddleware<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let state = self.state.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match check_request(&state, &req) {
                Ok(()) => inner.call(req).await,
                Err(e) => {
                    let resp = (
                        StatusCode::UNAUTHORIZED,
                        axum::Json(serde_json::json!({"error": e.to_string()})),
                    )
                        .into_response();
                    Ok(resp)
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
