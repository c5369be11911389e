//! Authenticated principals
//!
//! Accounts and logins live with an external identity service. It hands the
//! browser an HS256 JWT, either as a `token` cookie or as a bearer token,
//! whose claims name the user and their role. This module only verifies that
//! token and turns it into a [`Principal`] for the pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "web")]
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
#[cfg(feature = "web")]
use axum_extra::extract::cookie::CookieJar;
#[cfg(feature = "web")]
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
#[cfg(feature = "web")]
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Name of the cookie carrying the session token
pub const TOKEN_COOKIE: &str = "token";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// The authenticated actor behind a request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

impl Principal {
    pub fn user(id: impl Into<String>) -> Self {
        Principal {
            id: id.into(),
            role: Role::User,
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Principal {
            id: id.into(),
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Owners and admins may act on a resource; nobody else may
    pub fn may_access(&self, owner_id: &str) -> bool {
        self.is_admin() || self.id == owner_id
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.id, self.role)
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingToken,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[cfg(feature = "web")]
    #[error("Token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Token claims shared with the identity service
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: u64,
}

/// HS256 signing secret used to verify incoming tokens
#[cfg(feature = "web")]
#[derive(Clone)]
pub struct TokenKey(std::sync::Arc<[u8]>);

#[cfg(feature = "web")]
impl TokenKey {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        TokenKey(secret.as_ref().into())
    }

    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &DecodingKey::from_secret(&self.0), &validation)
            .map_err(|e| {
                tracing::debug!("Rejected token: {e}");
                AuthError::InvalidToken
            })?;

        Ok(Principal {
            id: data.claims.sub,
            role: data.claims.role,
        })
    }

    /// Mint a token for `principal` valid for `ttl`
    ///
    /// The identity service normally does this; the server exposes it for
    /// operators and tests.
    pub fn issue(&self, principal: &Principal, ttl: Duration) -> Result<String, AuthError> {
        let exp = SystemTime::now()
            .checked_add(ttl)
            .unwrap_or(SystemTime::now())
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let claims = Claims {
            sub: principal.id.clone(),
            role: principal.role,
            exp,
        };

        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&self.0),
        )?)
    }
}

#[cfg(feature = "web")]
fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
}

/// Pulls the principal out of the bearer header, falling back to the cookie
#[cfg(feature = "web")]
#[axum::async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
    TokenKey: FromRef<S>,
{
    type Rejection = crate::error::AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .or_else(|| {
                CookieJar::from_headers(&parts.headers)
                    .get(TOKEN_COOKIE)
                    .map(|cookie| cookie.value().to_string())
            })
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::MissingToken)?;

        Ok(TokenKey::from_ref(state).verify(&token)?)
    }
}
