use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Unauthenticated endpoints mounted at the root.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for load balancers.
        .route("/health", get(|| async { "ok" }))
}

/// Credential endpoints, nested under `/api`. They issue tokens and therefore cannot sit
/// behind the authentication gate.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        // POST /api/auth/register
        // Creates an identity; 409 when the username is taken.
        .route("/auth/register", post(handlers::register))
        // POST /api/auth/login
        // Exchanges username + password for a token.
        .route("/auth/login", post(handlers::login))
        // POST /api/auth/token
        // Login that registers unknown usernames on first use.
        .route("/auth/token", post(handlers::issue_token))
}
