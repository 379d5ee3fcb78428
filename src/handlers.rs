use std::collections::HashMap;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    AppState,
    auth::AuthUser,
    error::{AppError, ErrorBody},
    extract::{AppJson, AppPath},
    models::{
        CreateExerciseRequest, CreateWorkoutRequest, Exercise, ExercisePage, LoginRequest,
        MessageResponse, RegisterRequest, TokenRequest, TokenResponse, UpdateExerciseRequest,
        UpdateWorkoutRequest, UserProfile, Workout, WorkoutEntry, WorkoutEntryView, WorkoutPage,
        WorkoutView,
    },
    policy::{self, Action},
    repository::{PageRequest, RepositoryState, SEARCH_LIMIT},
};

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 100;

// --- Query Structs ---

/// PageQuery
///
/// `?page=&limit=` for the listing endpoints. Values are parsed leniently: anything that is
/// not a positive integer falls back to the default (page 1, 10 per page), and `limit` is
/// capped at 100.
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct PageQuery {
    /// 1-based page number.
    pub page: Option<String>,
    /// Page size.
    pub limit: Option<String>,
}

impl PageQuery {
    /// Returns the resolved page number and its offset/limit window.
    pub fn resolve(&self) -> (i64, PageRequest) {
        let positive = |raw: &Option<String>| {
            raw.as_deref()
                .and_then(|v| v.trim().parse::<i64>().ok())
                .filter(|n| *n > 0)
        };
        let page = positive(&self.page).unwrap_or(1);
        let limit = positive(&self.limit)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE);
        let offset = (page - 1).saturating_mul(limit);
        (page, PageRequest { offset, limit })
    }
}

fn total_pages(total: i64, limit: i64) -> i64 {
    (total + limit - 1) / limit
}

// --- Auth Handlers ---

/// register
///
/// [Public Route] Creates an identity. Without a `role` the caller becomes a VISITOR with
/// the catalog's VISITOR permissions.
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registered", body = MessageResponse),
        (status = 400, description = "Missing username or password", body = ErrorBody),
        (status = 409, description = "Username taken", body = ErrorBody)
    )
)]
pub async fn register(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    state
        .credentials
        .create(&payload.username, &payload.password, payload.role, None)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new("User registered successfully")),
    ))
}

/// login
///
/// [Public Route] Exchanges valid credentials for a token carrying the stored role and
/// permission snapshot. Unknown user and wrong password give the same 401.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 400, description = "Missing username or password", body = ErrorBody),
        (status = 401, description = "Invalid credentials", body = ErrorBody)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    if payload.username.trim().is_empty() || payload.password.is_empty() {
        return Err(AppError::Validation(
            "Username and password are required".to_string(),
        ));
    }
    let user = state
        .credentials
        .authenticate(&payload.username, &payload.password)
        .await?;
    let token = state.tokens.issue(&user, state.tokens.default_ttl())?;
    tracing::info!(user_id = %user.id, "login succeeded");
    Ok(Json(TokenResponse { token }))
}

/// issue_token
///
/// [Public Route] Token endpoint that registers unknown usernames on the fly (with an
/// optional explicit permission set) and otherwise behaves like `login`. Uses the same role
/// catalog and token lifetime as the register and login endpoints.
#[utoipa::path(
    post,
    path = "/api/auth/token",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 400, description = "Missing username or password", body = ErrorBody),
        (status = 401, description = "Invalid credentials", body = ErrorBody)
    )
)]
pub async fn issue_token(
    State(state): State<AppState>,
    AppJson(payload): AppJson<TokenRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let user = match state.credentials.find_by_username(payload.username.trim()).await? {
        Some(existing) => {
            if !state.credentials.verify_secret(&existing, &payload.password) {
                return Err(AppError::invalid_credentials());
            }
            existing
        }
        None => {
            let permissions = payload
                .permissions
                .map(|granted| granted.into_iter().collect());
            state
                .credentials
                .create(&payload.username, &payload.password, payload.role, permissions)
                .await?
        }
    };
    let token = state.tokens.issue(&user, state.tokens.default_ttl())?;
    Ok(Json(TokenResponse { token }))
}

/// get_me
///
/// [Authenticated Route] The caller's identity, straight from the verified claims.
#[utoipa::path(
    get,
    path = "/api/me",
    responses(
        (status = 200, description = "Profile", body = UserProfile),
        (status = 401, description = "Unauthenticated", body = ErrorBody)
    )
)]
pub async fn get_me(user: AuthUser) -> Json<UserProfile> {
    Json(UserProfile::from(&user))
}

// --- Exercise Handlers ---

fn required_field(name: &str, value: String) -> Result<String, AppError> {
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(AppError::Validation(format!("{name} is required")));
    }
    Ok(value)
}

fn optional_field(name: &str, value: Option<String>) -> Result<Option<String>, AppError> {
    value.map(|v| required_field(name, v)).transpose()
}

/// list_exercises
///
/// [READ] Public exercises, ownerless ones, and the caller's own private ones, newest first.
/// Visibility is applied in the store query, so hidden records never leave the store.
#[utoipa::path(
    get,
    path = "/api/exercises",
    params(PageQuery),
    responses((status = 200, description = "Visible exercises", body = ExercisePage))
)]
pub async fn list_exercises(
    user: AuthUser,
    State(repo): State<RepositoryState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ExercisePage>, AppError> {
    let (current_page, page) = query.resolve();
    let exercises = repo.list_visible_exercises(user.id, page).await?;
    let total = repo.count_visible_exercises(user.id).await?;
    Ok(Json(ExercisePage {
        exercises,
        current_page,
        total_pages: total_pages(total, page.limit),
        total_exercises: total,
    }))
}

/// search_exercises
///
/// [READ] Text search over name, target and body part within the caller's visible
/// exercises, best match first, at most 10 results.
#[utoipa::path(
    get,
    path = "/api/exercises/search/{query}",
    params(("query" = String, Path, description = "Search text")),
    responses((status = 200, description = "Ranked matches", body = [Exercise]))
)]
pub async fn search_exercises(
    user: AuthUser,
    State(repo): State<RepositoryState>,
    AppPath(text): AppPath<String>,
) -> Result<Json<Vec<Exercise>>, AppError> {
    let hits = repo
        .search_visible_exercises(user.id, &text, SEARCH_LIMIT)
        .await?;
    Ok(Json(hits))
}

/// get_exercise
///
/// [READ] A private exercise of another user is reported as not found.
#[utoipa::path(
    get,
    path = "/api/exercises/{id}",
    params(("id" = Uuid, Path, description = "Exercise ID")),
    responses(
        (status = 200, description = "Found", body = Exercise),
        (status = 404, description = "Not found or not visible", body = ErrorBody)
    )
)]
pub async fn get_exercise(
    user: AuthUser,
    State(repo): State<RepositoryState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Exercise>, AppError> {
    let found = repo.find_exercise(id).await?;
    let exercise = policy::authorize_found(&user, Action::Read, found)?;
    Ok(Json(exercise))
}

/// create_exercise
///
/// [WRITE] The caller becomes the owner; visibility defaults to private.
#[utoipa::path(
    post,
    path = "/api/exercises",
    request_body = CreateExerciseRequest,
    responses(
        (status = 201, description = "Created", body = Exercise),
        (status = 400, description = "Invalid payload", body = ErrorBody)
    )
)]
pub async fn create_exercise(
    user: AuthUser,
    State(repo): State<RepositoryState>,
    AppJson(payload): AppJson<CreateExerciseRequest>,
) -> Result<(StatusCode, Json<Exercise>), AppError> {
    let now = Utc::now();
    let exercise = Exercise {
        id: Uuid::new_v4(),
        name: required_field("name", payload.name)?,
        gif_url: required_field("gif_url", payload.gif_url)?,
        target: required_field("target", payload.target)?,
        body_part: required_field("body_part", payload.body_part)?,
        equipment: required_field("equipment", payload.equipment)?,
        is_custom: true,
        owner: Some(user.id),
        visibility: payload.visibility,
        created_at: now,
        updated_at: now,
    };
    let created = repo.insert_exercise(exercise).await?;
    tracing::info!(user_id = %user.id, exercise_id = %created.id, "exercise created");
    Ok((StatusCode::CREATED, Json(created)))
}

/// update_exercise
///
/// [UPDATE] Owner or administrator only, whatever the visibility.
#[utoipa::path(
    put,
    path = "/api/exercises/{id}",
    params(("id" = Uuid, Path, description = "Exercise ID")),
    request_body = UpdateExerciseRequest,
    responses(
        (status = 200, description = "Updated", body = Exercise),
        (status = 403, description = "Not owner", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
pub async fn update_exercise(
    user: AuthUser,
    State(repo): State<RepositoryState>,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<UpdateExerciseRequest>,
) -> Result<Json<Exercise>, AppError> {
    let found = repo.find_exercise(id).await?;
    policy::authorize_found(&user, Action::Update, found)?;

    let changes = UpdateExerciseRequest {
        name: optional_field("name", payload.name)?,
        gif_url: optional_field("gif_url", payload.gif_url)?,
        target: optional_field("target", payload.target)?,
        body_part: optional_field("body_part", payload.body_part)?,
        equipment: optional_field("equipment", payload.equipment)?,
    };
    let updated = repo
        .update_exercise(id, changes)
        .await?
        .ok_or_else(policy::not_found::<Exercise>)?;
    Ok(Json(updated))
}

/// delete_exercise
///
/// [DELETE] Owner or administrator only, whatever the visibility.
#[utoipa::path(
    delete,
    path = "/api/exercises/{id}",
    params(("id" = Uuid, Path, description = "Exercise ID")),
    responses(
        (status = 200, description = "Deleted", body = MessageResponse),
        (status = 403, description = "Not owner", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
pub async fn delete_exercise(
    user: AuthUser,
    State(repo): State<RepositoryState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    let found = repo.find_exercise(id).await?;
    policy::authorize_found(&user, Action::Delete, found)?;

    if !repo.delete_exercise(id).await? {
        return Err(policy::not_found::<Exercise>());
    }
    tracing::info!(user_id = %user.id, exercise_id = %id, "exercise deleted");
    Ok(Json(MessageResponse::new("Exercise deleted successfully")))
}

// --- Workout Handlers ---

/// validate_entries
///
/// Sets and reps must be at least 1, weight non-negative, and each referenced exercise must
/// exist and be visible to the workout's `owner`.
async fn validate_entries(
    repo: &RepositoryState,
    owner: Uuid,
    entries: &[WorkoutEntry],
) -> Result<(), AppError> {
    for entry in entries {
        if entry.sets < 1 || entry.reps < 1 {
            return Err(AppError::Validation(
                "sets and reps must be at least 1".to_string(),
            ));
        }
        if !entry.weight.is_finite() || entry.weight < 0.0 {
            return Err(AppError::Validation(
                "weight must be zero or positive".to_string(),
            ));
        }
        let visible = repo
            .find_exercise(entry.exercise)
            .await?
            .is_some_and(|exercise| policy::is_visible_to(owner, &exercise));
        if !visible {
            return Err(AppError::Validation(format!(
                "unknown exercise {}",
                entry.exercise
            )));
        }
    }
    Ok(())
}

fn trimmed_notes(notes: Option<String>) -> Option<String> {
    notes.map(|n| n.trim().to_string())
}

/// populate
///
/// Resolves the exercise of every entry for `user`. Deleted exercises, and ones the caller
/// may not read, come back as `None`. Each exercise is fetched once per call.
async fn populate(
    repo: &RepositoryState,
    user: &AuthUser,
    workouts: Vec<Workout>,
) -> Result<Vec<WorkoutView>, AppError> {
    let mut resolved: HashMap<Uuid, Option<Exercise>> = HashMap::new();
    let mut views = Vec::with_capacity(workouts.len());

    for workout in workouts {
        let mut entries = Vec::with_capacity(workout.exercises.len());
        for entry in workout.exercises {
            let exercise = match resolved.get(&entry.exercise) {
                Some(cached) => cached.clone(),
                None => {
                    let found = repo
                        .find_exercise(entry.exercise)
                        .await?
                        .filter(|exercise| policy::can_read(user, exercise));
                    resolved.insert(entry.exercise, found.clone());
                    found
                }
            };
            entries.push(WorkoutEntryView {
                exercise,
                sets: entry.sets,
                reps: entry.reps,
                weight: entry.weight,
            });
        }
        views.push(WorkoutView {
            id: workout.id,
            owner: workout.owner,
            date: workout.date,
            exercises: entries,
            notes: workout.notes,
            created_at: workout.created_at,
            updated_at: workout.updated_at,
        });
    }
    Ok(views)
}

async fn populate_one(
    repo: &RepositoryState,
    user: &AuthUser,
    workout: Workout,
) -> Result<WorkoutView, AppError> {
    let mut views = populate(repo, user, vec![workout]).await?;
    views.pop().ok_or(AppError::Internal)
}

/// list_workouts
///
/// [READ] The caller's own workouts, most recent first, with exercises populated.
#[utoipa::path(
    get,
    path = "/api/workouts",
    params(PageQuery),
    responses((status = 200, description = "Own workouts", body = WorkoutPage))
)]
pub async fn list_workouts(
    user: AuthUser,
    State(repo): State<RepositoryState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<WorkoutPage>, AppError> {
    let (current_page, page) = query.resolve();
    let workouts = repo.list_workouts(user.id, page).await?;
    let total = repo.count_workouts(user.id).await?;
    Ok(Json(WorkoutPage {
        workouts: populate(&repo, &user, workouts).await?,
        current_page,
        total_pages: total_pages(total, page.limit),
        total_workouts: total,
    }))
}

/// get_workout
///
/// [READ] Owner or administrator; anyone else sees not found.
#[utoipa::path(
    get,
    path = "/api/workouts/{id}",
    params(("id" = Uuid, Path, description = "Workout ID")),
    responses(
        (status = 200, description = "Found", body = WorkoutView),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
pub async fn get_workout(
    user: AuthUser,
    State(repo): State<RepositoryState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<WorkoutView>, AppError> {
    let found = repo.find_workout(id).await?;
    let workout = policy::authorize_found(&user, Action::Read, found)?;
    Ok(Json(populate_one(&repo, &user, workout).await?))
}

/// create_workout
///
/// [WRITE] The caller becomes the owner.
#[utoipa::path(
    post,
    path = "/api/workouts",
    request_body = CreateWorkoutRequest,
    responses(
        (status = 201, description = "Created", body = WorkoutView),
        (status = 400, description = "Invalid payload", body = ErrorBody)
    )
)]
pub async fn create_workout(
    user: AuthUser,
    State(repo): State<RepositoryState>,
    AppJson(payload): AppJson<CreateWorkoutRequest>,
) -> Result<(StatusCode, Json<WorkoutView>), AppError> {
    validate_entries(&repo, user.id, &payload.exercises).await?;

    let now = Utc::now();
    let workout = Workout {
        id: Uuid::new_v4(),
        owner: user.id,
        date: payload.date.unwrap_or(now),
        exercises: payload.exercises,
        notes: trimmed_notes(payload.notes),
        created_at: now,
        updated_at: now,
    };
    let created = repo.insert_workout(workout).await?;
    tracing::info!(user_id = %user.id, workout_id = %created.id, "workout created");
    Ok((
        StatusCode::CREATED,
        Json(populate_one(&repo, &user, created).await?),
    ))
}

/// update_workout
///
/// [UPDATE] Owner or administrator only. Entries are checked against what the workout's
/// owner can see, not the caller.
#[utoipa::path(
    put,
    path = "/api/workouts/{id}",
    params(("id" = Uuid, Path, description = "Workout ID")),
    request_body = UpdateWorkoutRequest,
    responses(
        (status = 200, description = "Updated", body = WorkoutView),
        (status = 403, description = "Not owner", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
pub async fn update_workout(
    user: AuthUser,
    State(repo): State<RepositoryState>,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<UpdateWorkoutRequest>,
) -> Result<Json<WorkoutView>, AppError> {
    let found = repo.find_workout(id).await?;
    let existing = policy::authorize_found(&user, Action::Update, found)?;

    if let Some(entries) = &payload.exercises {
        validate_entries(&repo, existing.owner, entries).await?;
    }
    let changes = UpdateWorkoutRequest {
        notes: trimmed_notes(payload.notes),
        ..payload
    };
    let updated = repo
        .update_workout(id, changes)
        .await?
        .ok_or_else(policy::not_found::<Workout>)?;
    Ok(Json(populate_one(&repo, &user, updated).await?))
}

/// delete_workout
///
/// [DELETE] Owner or administrator only.
#[utoipa::path(
    delete,
    path = "/api/workouts/{id}",
    params(("id" = Uuid, Path, description = "Workout ID")),
    responses(
        (status = 200, description = "Deleted", body = MessageResponse),
        (status = 403, description = "Not owner", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
pub async fn delete_workout(
    user: AuthUser,
    State(repo): State<RepositoryState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    let found = repo.find_workout(id).await?;
    policy::authorize_found(&user, Action::Delete, found)?;

    if !repo.delete_workout(id).await? {
        return Err(policy::not_found::<Workout>());
    }
    tracing::info!(user_id = %user.id, workout_id = %id, "workout deleted");
    Ok(Json(MessageResponse::new("Workout deleted successfully")))
}
