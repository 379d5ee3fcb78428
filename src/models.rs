use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    rbac::{Permission, PermissionSet, Role},
};

// --- Identity ---

/// User
///
/// A Credential Store record. `permissions` is the snapshot granted at creation, not a
/// live view of the role catalog. `password_hash` is an Argon2 PHC string and is never
/// serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub permissions: PermissionSet,
    pub created_at: DateTime<Utc>,
}

/// UserProfile
///
/// The caller's identity as carried by its token (GET /api/me).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub permissions: Vec<Permission>,
}

impl From<&AuthUser> for UserProfile {
    fn from(user: &AuthUser) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            role: user.role,
            permissions: user.permissions.iter().copied().collect(),
        }
    }
}

// --- Resources ---

/// Visibility
///
/// Default read access of an exercise, independent of ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Visibility {
    Public,
    #[default]
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

impl std::str::FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            other => Err(format!("unknown visibility '{other}'")),
        }
    }
}

/// Exercise
///
/// A catalog exercise. Seeded (legacy) exercises may have no owner; user-created ones are
/// always owned by their creator and flagged `is_custom`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Exercise {
    pub id: Uuid,
    pub name: String,
    pub gif_url: String,
    pub target: String,
    pub body_part: String,
    pub equipment: String,
    pub is_custom: bool,
    /// Owning user. `None` for ownerless legacy records.
    pub owner: Option<Uuid>,
    pub visibility: Visibility,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// WorkoutEntry
///
/// One exercise performed inside a workout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct WorkoutEntry {
    /// Referenced exercise id.
    pub exercise: Uuid,
    pub sets: i32,
    pub reps: i32,
    #[serde(default)]
    pub weight: f64,
}

/// Workout
///
/// A logged training session. Workouts carry no visibility flag: they are readable by their
/// owner (and administrators) only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Workout {
    pub id: Uuid,
    pub owner: Uuid,
    #[ts(type = "string")]
    pub date: DateTime<Utc>,
    pub exercises: Vec<WorkoutEntry>,
    pub notes: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// WorkoutEntryView
///
/// A `WorkoutEntry` with its exercise resolved. `exercise` is `null` when the exercise was
/// deleted or is not visible to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct WorkoutEntryView {
    pub exercise: Option<Exercise>,
    pub sets: i32,
    pub reps: i32,
    pub weight: f64,
}

/// WorkoutView
///
/// Response shape of the workout endpoints: a `Workout` with populated entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct WorkoutView {
    pub id: Uuid,
    pub owner: Uuid,
    #[ts(type = "string")]
    pub date: DateTime<Utc>,
    pub exercises: Vec<WorkoutEntryView>,
    pub notes: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

// --- Request Payloads ---

/// RegisterRequest
///
/// Input for `POST /api/auth/register`. Omitting `role` registers a VISITOR.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub role: Option<Role>,
}

/// LoginRequest
///
/// Input for `POST /api/auth/login`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// TokenRequest
///
/// Input for `POST /api/auth/token`. Creates the identity on first use; `permissions`
/// overrides the role baseline when given.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct TokenRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub role: Option<Role>,
    pub permissions: Option<Vec<Permission>>,
}

/// CreateExerciseRequest
///
/// Input for `POST /api/exercises`. Visibility defaults to private; the owner is always the
/// caller and cannot be supplied.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreateExerciseRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub gif_url: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub body_part: String,
    #[serde(default)]
    pub equipment: String,
    #[serde(default)]
    pub visibility: Visibility,
}

/// UpdateExerciseRequest
///
/// Partial update for `PUT /api/exercises/{id}`. Visibility and ownership are fixed at
/// creation and therefore absent here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateExerciseRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gif_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_part: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equipment: Option<String>,
}

/// CreateWorkoutRequest
///
/// Input for `POST /api/workouts`. `date` defaults to the time of creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreateWorkoutRequest {
    #[ts(type = "string | null")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exercises: Vec<WorkoutEntry>,
    pub notes: Option<String>,
}

/// UpdateWorkoutRequest
///
/// Partial update for `PUT /api/workouts/{id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateWorkoutRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(type = "string | null")]
    pub date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exercises: Option<Vec<WorkoutEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

// --- Responses ---

/// TokenResponse
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct TokenResponse {
    pub token: String,
}

/// MessageResponse
///
/// Plain acknowledgement body (registration, deletions).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// ExercisePage
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ExercisePage {
    pub exercises: Vec<Exercise>,
    pub current_page: i64,
    pub total_pages: i64,
    pub total_exercises: i64,
}

/// WorkoutPage
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct WorkoutPage {
    pub workouts: Vec<WorkoutView>,
    pub current_page: i64,
    pub total_pages: i64,
    pub total_workouts: i64,
}
