use crate::{
    AppState, handlers,
    rbac::{Permission, RequirePermissions},
};
use axum::{
    Router,
    routing::{delete, get, post, put},
};

/// Authenticated Router Module
///
/// Every route here runs behind `auth_middleware` (applied by `create_router`), so each
/// request reaches its permission gate with an `AuthUser` attached. The gates map HTTP
/// methods onto permissions: GET → READ, POST → WRITE, PUT → UPDATE, DELETE → DELETE.
/// They run before the handler, so a caller without the permission gets 403 even for a
/// resource it owns. Ownership and visibility are checked inside the handlers.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /api/me
        // Identity only; no permission beyond being authenticated.
        .route("/me", get(handlers::get_me))
        // --- Exercises ---
        // GET/POST /api/exercises
        .route(
            "/exercises",
            get(handlers::list_exercises)
                .route_layer(gate(Permission::Read))
                .merge(post(handlers::create_exercise).route_layer(gate(Permission::Write))),
        )
        // GET /api/exercises/search/{query}
        // Relevance-ranked text search, capped at 10 results.
        .route(
            "/exercises/search/{query}",
            get(handlers::search_exercises).route_layer(gate(Permission::Read)),
        )
        // GET/PUT/DELETE /api/exercises/{id}
        .route(
            "/exercises/{id}",
            get(handlers::get_exercise)
                .route_layer(gate(Permission::Read))
                .merge(put(handlers::update_exercise).route_layer(gate(Permission::Update)))
                .merge(delete(handlers::delete_exercise).route_layer(gate(Permission::Delete))),
        )
        // --- Workouts ---
        // GET/POST /api/workouts
        .route(
            "/workouts",
            get(handlers::list_workouts)
                .route_layer(gate(Permission::Read))
                .merge(post(handlers::create_workout).route_layer(gate(Permission::Write))),
        )
        // GET/PUT/DELETE /api/workouts/{id}
        .route(
            "/workouts/{id}",
            get(handlers::get_workout)
                .route_layer(gate(Permission::Read))
                .merge(put(handlers::update_workout).route_layer(gate(Permission::Update)))
                .merge(delete(handlers::delete_workout).route_layer(gate(Permission::Delete))),
        )
}

fn gate(permission: Permission) -> RequirePermissions {
    RequirePermissions::new([permission])
}
