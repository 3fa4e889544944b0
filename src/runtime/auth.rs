//! Authentication capability consumed by the executor
//!
//! Endpoints opt in with `requires_auth`. The process-wide `AUTH_ENABLED` flag
//! is a master switch that can only turn enforcement off. When enforcement is
//! on and no verifier is configured, protected endpoints reject every request.

use crate::config::AuthConfig;
use crate::error::AutomationError;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Claims carried by an accepted bearer token
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("authentication is required but no token verifier is configured")]
    NotConfigured,
}

impl From<AuthError> for AutomationError {
    fn from(err: AuthError) -> Self {
        AutomationError::Unauthorized(err.to_string())
    }
}

/// Verifies a bearer token and returns its claims
pub trait TokenVerifier: Send + Sync + fmt::Debug {
    fn verify(&self, token: &str) -> Result<Claims, AuthError>;
}

/// HMAC-signed JWT verification (HS256 / HS384 / HS512)
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

impl JwtVerifier {
    pub fn hmac(secret: &[u8], algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;
        validation.validate_aud = false;
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

/// Per-request auth decision shared by every executor
#[derive(Debug, Clone)]
pub struct AuthGate {
    enabled: bool,
    verifier: Option<Arc<dyn TokenVerifier>>,
}

impl AuthGate {
    pub fn new(enabled: bool, verifier: Option<Arc<dyn TokenVerifier>>) -> Self {
        Self { enabled, verifier }
    }

    /// Gate that never enforces auth
    pub fn disabled() -> Self {
        Self::new(false, None)
    }

    /// Build from configuration. An unknown algorithm name is a startup error.
    pub fn from_config(config: &AuthConfig) -> anyhow::Result<Self> {
        let verifier = match &config.jwt_secret {
            Some(secret) if !secret.is_empty() => {
                let algorithm = Algorithm::from_str(&config.jwt_algorithm)
                    .map_err(|e| anyhow::anyhow!("Invalid JWT_ALGORITHM '{}': {}", config.jwt_algorithm, e))?;
                if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
                    anyhow::bail!(
                        "JWT_ALGORITHM '{}' is not an HMAC algorithm (HS256, HS384, HS512)",
                        config.jwt_algorithm
                    );
                }
                Some(Arc::new(JwtVerifier::hmac(secret.as_bytes(), algorithm)) as Arc<dyn TokenVerifier>)
            }
            _ => None,
        };

        if config.enabled && verifier.is_none() {
            tracing::warn!("⚠️ Auth is enabled but JWT_SECRET_KEY is unset: endpoints with requires_auth will reject all requests");
        }

        Ok(Self::new(config.enabled, verifier))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// `Ok(None)` when the endpoint is open or enforcement is off
    pub fn check(&self, requires_auth: bool, bearer: Option<&str>) -> Result<Option<Claims>, AuthError> {
        if !requires_auth || !self.enabled {
            return Ok(None);
        }
        let verifier = self.verifier.as_ref().ok_or(AuthError::NotConfigured)?;
        let token = bearer.filter(|t| !t.is_empty()).ok_or(AuthError::MissingToken)?;
        verifier.verify(token).map(Some)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|t| !t.is_empty())
}
