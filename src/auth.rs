use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{AppError, TokenError},
    models::User,
    rbac::{PermissionSet, Role},
};

/// Claims
///
/// Payload of every issued JWT. Claims are self-contained: role and permissions are
/// embedded at issue time, so the gates never need a store round-trip. The price is that
/// claims stay frozen until `exp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// The identity's id.
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub permissions: PermissionSet,
    /// Expiry (expiresAt) as unix seconds. Kept under the registered `exp` name.
    #[serde(rename = "exp")]
    pub expires_at: i64,
    /// Issued-at as unix seconds.
    pub iat: i64,
}

/// TokenCodec
///
/// Issues and verifies HS256-signed tokens with the process-wide secret. The keys are
/// derived once at startup; rotating the secret invalidates every token issued before.
#[derive(Clone)]
pub struct TokenCodec {
    encoding: Arc<EncodingKey>,
    decoding: Arc<DecodingKey>,
    default_ttl: Duration,
}

impl TokenCodec {
    pub fn new(secret: &str, default_ttl: Duration) -> Self {
        Self {
            encoding: Arc::new(EncodingKey::from_secret(secret.as_bytes())),
            decoding: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
            default_ttl,
        }
    }

    /// TTL used by the login and token endpoints.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// issue
    ///
    /// Signs the identity's stored snapshot (id, username, role, permissions) with an expiry
    /// `ttl` from now.
    pub fn issue(&self, user: &User, ttl: Duration) -> Result<String, TokenError> {
        self.issue_at(user, ttl, Utc::now())
    }

    pub fn issue_at(
        &self,
        user: &User,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let expires_at = now.checked_add_signed(ttl).ok_or_else(|| {
            tracing::error!("token expiry out of range (ttl {})", ttl);
            TokenError::Signing
        })?;
        let claims = Claims {
            id: user.id,
            username: user.username.clone(),
            role: user.role,
            permissions: user.permissions.clone(),
            expires_at: expires_at.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(|e| {
            tracing::error!("token signing failed: {:?}", e);
            TokenError::Signing
        })
    }

    /// verify
    ///
    /// Validates the signature, then the expiry against the current time.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// verify_at
    ///
    /// Same as `verify` with an explicit clock. Expiry is strict: a token is expired as soon
    /// as `now` is past `expires_at`, with no leeway.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked below against `now`; the library still requires `exp` to exist.
        validation.validate_exp = false;
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => tracing::debug!("token rejected: bad signature"),
                other => tracing::debug!("token rejected: {:?}", other),
            }
            TokenError::Invalid
        })?;

        if now.timestamp() > data.claims.expires_at {
            return Err(TokenError::Expired);
        }

        Ok(data.claims)
    }
}

/// AuthUser
///
/// The resolved identity of an authenticated request, taken verbatim from verified claims.
/// The authentication middleware stores it in the request extensions; handlers receive it
/// as an extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub permissions: PermissionSet,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.id,
            username: claims.username,
            role: claims.role,
            permissions: claims.permissions,
        }
    }
}

/// bearer_token
///
/// Reads the one canonical token location: `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// authenticate
///
/// Resolves the request headers into an identity. Every failure (missing header, bad
/// signature, expired token) produces the same 401 so callers cannot probe the validator.
pub fn authenticate(headers: &HeaderMap, codec: &TokenCodec) -> Result<AuthUser, AppError> {
    let token = bearer_token(headers).ok_or_else(AppError::missing_token)?;

    match codec.verify(token) {
        Ok(claims) => Ok(AuthUser::from(claims)),
        Err(e) => {
            tracing::debug!("authentication failed: {}", e);
            Err(AppError::invalid_credentials())
        }
    }
}

/// auth_middleware
///
/// Authentication gate for the protected routers. On success the resolved `AuthUser` is
/// attached to the request extensions, where the permission gate and the handlers find it.
/// Mounted with the full `AppState`; the codec is taken out of it through `FromRef`.
pub async fn auth_middleware(
    State(codec): State<TokenCodec>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = authenticate(request.headers(), &codec)?;
    tracing::Span::current().record("user_id", tracing::field::display(user.id));
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// AuthUser Extractor Implementation
///
/// Reads the identity attached by `auth_middleware`. A handler mounted outside the
/// middleware gets a 401 instead of a missing-value fault.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(AppError::missing_token)
    }
}
