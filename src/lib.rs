use std::sync::Arc;

use axum::{
    Router,
    extract::FromRef,
    http::HeaderName,
    middleware,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Authorization core.
pub mod auth;
pub mod credentials;
pub mod policy;
pub mod rbac;

// Application services and plumbing.
pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod models;
pub mod repository;

// Routing segregation (public vs. authenticated).
pub mod routes;
use routes::{authenticated, public};

// --- Public Re-exports ---

pub use auth::{AuthUser, TokenCodec, auth_middleware};
pub use config::AppConfig;
pub use credentials::CredentialStore;
pub use error::AppError;
pub use rbac::{Permission, PermissionSet, RequirePermissions, Role, RoleCatalog};
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};

/// ApiDoc
///
/// OpenAPI document for every handler decorated with `#[utoipa::path]`, served at
/// `/api-docs/openapi.json` and browsable under `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::register, handlers::login, handlers::issue_token, handlers::get_me,
        handlers::list_exercises, handlers::search_exercises, handlers::get_exercise,
        handlers::create_exercise, handlers::update_exercise, handlers::delete_exercise,
        handlers::list_workouts, handlers::get_workout, handlers::create_workout,
        handlers::update_workout, handlers::delete_workout
    ),
    components(
        schemas(
            models::Exercise, models::Workout, models::WorkoutEntry, models::WorkoutView,
            models::WorkoutEntryView, models::Visibility,
            models::RegisterRequest, models::LoginRequest, models::TokenRequest,
            models::TokenResponse, models::MessageResponse, models::CreateExerciseRequest,
            models::UpdateExerciseRequest, models::CreateWorkoutRequest,
            models::UpdateWorkoutRequest, models::ExercisePage, models::WorkoutPage,
            models::UserProfile, rbac::Role, rbac::Permission, error::ErrorBody,
        )
    ),
    tags(
        (name = "fitness-tracker", description = "Fitness Tracker API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single shared container of services. Everything in it is either immutable after
/// startup (signing keys, role catalog) or internally synchronized (the repository).
/// Handlers and middleware pull the part they need through `FromRef`.
#[derive(Clone)]
pub struct AppState {
    /// Persistence for identities, exercises and workouts.
    pub repo: RepositoryState,
    /// Identity lifecycle, holding the shared role catalog.
    pub credentials: CredentialStore,
    /// Token issue/verify with the process-wide secret.
    pub tokens: TokenCodec,
}

impl AppState {
    /// Assembles the state with the built-in role catalog.
    pub fn new(repo: RepositoryState, config: &AppConfig) -> Self {
        let credentials = CredentialStore::new(repo.clone(), Arc::new(RoleCatalog::default()));
        let tokens = TokenCodec::new(&config.jwt_secret, config.token_ttl);
        Self {
            repo,
            credentials,
            tokens,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for TokenCodec {
    fn from_ref(app_state: &AppState) -> TokenCodec {
        app_state.tokens.clone()
    }
}

/// create_router
///
/// Assembles the routing tree. Protected routes pass through the authentication gate
/// first, then the per-route permission gate, then the handler's ownership checks.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let api = Router::new()
        .merge(public::auth_routes())
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        );

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .nest("/api", api)
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span for one request: method, uri and the `x-request-id`. `user_id` is filled in by the
/// authentication middleware once the caller is known.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
        user_id = tracing::field::Empty,
    )
}
