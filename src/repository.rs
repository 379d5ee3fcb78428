use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, types::Json};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    models::{
        Exercise, UpdateExerciseRequest, UpdateWorkoutRequest, User, Visibility, Workout,
        WorkoutEntry,
    },
    rbac::PermissionSet,
};

/// Maximum number of hits returned by a text search.
pub const SEARCH_LIMIT: i64 = 10;

/// RepoError
#[derive(Debug, Error)]
pub enum RepoError {
    /// A unique key is already taken.
    #[error("{0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A stored row could not be mapped back into the domain model.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// PageRequest
///
/// Offset/limit window over a listing with a fixed sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: i64,
    pub limit: i64,
}

/// Repository Trait
///
/// Persistence contract for identities and resources. Every lookup returns the raw record;
/// authorization decisions are made by the caller, except for listings, which are scoped
/// by the query itself (`*_visible_*` methods, owner-scoped workout listings).
///
/// **Send + Sync + async_trait** let the trait object (`Arc<dyn Repository>`) live in the
/// shared application state.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Identities ---
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, RepoError>;
    /// Fails with `RepoError::Conflict` when the username exists.
    async fn insert_user(&self, user: User) -> Result<User, RepoError>;

    // --- Exercises ---
    async fn find_exercise(&self, id: Uuid) -> Result<Option<Exercise>, RepoError>;
    async fn insert_exercise(&self, exercise: Exercise) -> Result<Exercise, RepoError>;
    async fn update_exercise(
        &self,
        id: Uuid,
        req: UpdateExerciseRequest,
    ) -> Result<Option<Exercise>, RepoError>;
    async fn delete_exercise(&self, id: Uuid) -> Result<bool, RepoError>;
    /// Counts exercises that are public, ownerless, or owned by `viewer`.
    async fn count_visible_exercises(&self, viewer: Uuid) -> Result<i64, RepoError>;
    /// Same scope as `count_visible_exercises`, newest first.
    async fn list_visible_exercises(
        &self,
        viewer: Uuid,
        page: PageRequest,
    ) -> Result<Vec<Exercise>, RepoError>;
    /// Text search over name, target and body part, ranked by relevance descending.
    async fn search_visible_exercises(
        &self,
        viewer: Uuid,
        text: &str,
        limit: i64,
    ) -> Result<Vec<Exercise>, RepoError>;

    // --- Workouts ---
    async fn find_workout(&self, id: Uuid) -> Result<Option<Workout>, RepoError>;
    async fn insert_workout(&self, workout: Workout) -> Result<Workout, RepoError>;
    async fn update_workout(
        &self,
        id: Uuid,
        req: UpdateWorkoutRequest,
    ) -> Result<Option<Workout>, RepoError>;
    async fn delete_workout(&self, id: Uuid) -> Result<bool, RepoError>;
    async fn count_workouts(&self, owner: Uuid) -> Result<i64, RepoError>;
    /// Workouts of `owner`, most recent `date` first.
    async fn list_workouts(&self, owner: Uuid, page: PageRequest)
    -> Result<Vec<Workout>, RepoError>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// search_terms
///
/// Splits a free-text query into lowercase alphanumeric terms. Both implementations match a
/// record when any term matches.
pub fn search_terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(str::to_lowercase)
        .collect()
}

// --- Row mapping ---

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    password_hash: String,
    role: String,
    permissions: Vec<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = RepoError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = row.role.parse().map_err(RepoError::Corrupt)?;
        let permissions = row
            .permissions
            .iter()
            .map(|p| p.parse())
            .collect::<Result<PermissionSet, _>>()
            .map_err(RepoError::Corrupt)?;
        Ok(User {
            id: row.id,
            username: row.username,
            password_hash: row.password_hash,
            role,
            permissions,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct ExerciseRow {
    id: Uuid,
    name: String,
    gif_url: String,
    target: String,
    body_part: String,
    equipment: String,
    is_custom: bool,
    owner_id: Option<Uuid>,
    visibility: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ExerciseRow> for Exercise {
    type Error = RepoError;

    fn try_from(row: ExerciseRow) -> Result<Self, Self::Error> {
        Ok(Exercise {
            id: row.id,
            name: row.name,
            gif_url: row.gif_url,
            target: row.target,
            body_part: row.body_part,
            equipment: row.equipment,
            is_custom: row.is_custom,
            owner: row.owner_id,
            visibility: row.visibility.parse().map_err(RepoError::Corrupt)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct WorkoutRow {
    id: Uuid,
    owner_id: Uuid,
    date: DateTime<Utc>,
    exercises: Json<Vec<WorkoutEntry>>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<WorkoutRow> for Workout {
    fn from(row: WorkoutRow) -> Self {
        Workout {
            id: row.id,
            owner: row.owner_id,
            date: row.date,
            exercises: row.exercises.0,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn exercises_from_rows(rows: Vec<ExerciseRow>) -> Result<Vec<Exercise>, RepoError> {
    rows.into_iter().map(Exercise::try_from).collect()
}

const USER_COLUMNS: &str = "id, username, password_hash, role, permissions, created_at";
const EXERCISE_COLUMNS: &str = "id, name, gif_url, target, body_part, equipment, is_custom, owner_id, visibility, created_at, updated_at";
const WORKOUT_COLUMNS: &str = "id, owner_id, date, exercises, notes, created_at, updated_at";
const VISIBLE_TO: &str = "(visibility = 'public' OR owner_id IS NULL OR owner_id = $1)";

/// PostgresRepository
///
/// `Repository` backed by PostgreSQL. Queries are checked at runtime (no compile-time
/// database), and the schema ships as embedded migrations (`migrations/`).
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the embedded migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    /// insert_user
    ///
    /// Relies on the unique index on `username`; a violation becomes `Conflict` and no row
    /// is written.
    async fn insert_user(&self, user: User) -> Result<User, RepoError> {
        let permissions: Vec<String> = user
            .permissions
            .iter()
            .map(|p| p.as_str().to_string())
            .collect();

        let result = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (id, username, password_hash, role, permissions, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {USER_COLUMNS}"
        ))
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(permissions)
        .bind(user.created_at)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => User::try_from(row),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(RepoError::Conflict("User already exists".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_exercise(&self, id: Uuid) -> Result<Option<Exercise>, RepoError> {
        let row = sqlx::query_as::<_, ExerciseRow>(&format!(
            "SELECT {EXERCISE_COLUMNS} FROM exercises WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Exercise::try_from).transpose()
    }

    async fn insert_exercise(&self, exercise: Exercise) -> Result<Exercise, RepoError> {
        let row = sqlx::query_as::<_, ExerciseRow>(&format!(
            "INSERT INTO exercises (id, name, gif_url, target, body_part, equipment, is_custom, \
             owner_id, visibility, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING {EXERCISE_COLUMNS}"
        ))
        .bind(exercise.id)
        .bind(&exercise.name)
        .bind(&exercise.gif_url)
        .bind(&exercise.target)
        .bind(&exercise.body_part)
        .bind(&exercise.equipment)
        .bind(exercise.is_custom)
        .bind(exercise.owner)
        .bind(exercise.visibility.as_str())
        .bind(exercise.created_at)
        .bind(exercise.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Exercise::try_from(row)
    }

    /// update_exercise
    ///
    /// Partial update through `COALESCE`: only columns whose field is `Some` change.
    async fn update_exercise(
        &self,
        id: Uuid,
        req: UpdateExerciseRequest,
    ) -> Result<Option<Exercise>, RepoError> {
        let row = sqlx::query_as::<_, ExerciseRow>(&format!(
            "UPDATE exercises \
             SET name = COALESCE($2, name), \
                 gif_url = COALESCE($3, gif_url), \
                 target = COALESCE($4, target), \
                 body_part = COALESCE($5, body_part), \
                 equipment = COALESCE($6, equipment), \
                 updated_at = NOW() \
             WHERE id = $1 RETURNING {EXERCISE_COLUMNS}"
        ))
        .bind(id)
        .bind(req.name)
        .bind(req.gif_url)
        .bind(req.target)
        .bind(req.body_part)
        .bind(req.equipment)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Exercise::try_from).transpose()
    }

    async fn delete_exercise(&self, id: Uuid) -> Result<bool, RepoError> {
        let res = sqlx::query("DELETE FROM exercises WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn count_visible_exercises(&self, viewer: Uuid) -> Result<i64, RepoError> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM exercises WHERE {VISIBLE_TO}"
        ))
        .bind(viewer)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn list_visible_exercises(
        &self,
        viewer: Uuid,
        page: PageRequest,
    ) -> Result<Vec<Exercise>, RepoError> {
        let rows = sqlx::query_as::<_, ExerciseRow>(&format!(
            "SELECT {EXERCISE_COLUMNS} FROM exercises WHERE {VISIBLE_TO} \
             ORDER BY created_at DESC, id OFFSET $2 LIMIT $3"
        ))
        .bind(viewer)
        .bind(page.offset)
        .bind(page.limit)
        .fetch_all(&self.pool)
        .await?;
        exercises_from_rows(rows)
    }

    /// search_visible_exercises
    ///
    /// Matches the generated `search` tsvector against an OR of the query terms and ranks
    /// with `ts_rank`. Terms are reduced to alphanumerics before reaching `to_tsquery`.
    async fn search_visible_exercises(
        &self,
        viewer: Uuid,
        text: &str,
        limit: i64,
    ) -> Result<Vec<Exercise>, RepoError> {
        let terms = search_terms(text);
        if terms.is_empty() {
            return Ok(vec![]);
        }
        let tsquery = terms.join(" | ");

        let rows = sqlx::query_as::<_, ExerciseRow>(&format!(
            "SELECT {EXERCISE_COLUMNS} FROM exercises \
             WHERE {VISIBLE_TO} AND search @@ to_tsquery('english', $2) \
             ORDER BY ts_rank(search, to_tsquery('english', $2)) DESC, created_at DESC \
             LIMIT $3"
        ))
        .bind(viewer)
        .bind(tsquery)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        exercises_from_rows(rows)
    }

    async fn find_workout(&self, id: Uuid) -> Result<Option<Workout>, RepoError> {
        let row = sqlx::query_as::<_, WorkoutRow>(&format!(
            "SELECT {WORKOUT_COLUMNS} FROM workouts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Workout::from))
    }

    async fn insert_workout(&self, workout: Workout) -> Result<Workout, RepoError> {
        let row = sqlx::query_as::<_, WorkoutRow>(&format!(
            "INSERT INTO workouts (id, owner_id, date, exercises, notes, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {WORKOUT_COLUMNS}"
        ))
        .bind(workout.id)
        .bind(workout.owner)
        .bind(workout.date)
        .bind(Json(&workout.exercises))
        .bind(&workout.notes)
        .bind(workout.created_at)
        .bind(workout.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn update_workout(
        &self,
        id: Uuid,
        req: UpdateWorkoutRequest,
    ) -> Result<Option<Workout>, RepoError> {
        let row = sqlx::query_as::<_, WorkoutRow>(&format!(
            "UPDATE workouts \
             SET date = COALESCE($2, date), \
                 exercises = COALESCE($3, exercises), \
                 notes = COALESCE($4, notes), \
                 updated_at = NOW() \
             WHERE id = $1 RETURNING {WORKOUT_COLUMNS}"
        ))
        .bind(id)
        .bind(req.date)
        .bind(req.exercises.map(Json))
        .bind(req.notes)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Workout::from))
    }

    async fn delete_workout(&self, id: Uuid) -> Result<bool, RepoError> {
        let res = sqlx::query("DELETE FROM workouts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn count_workouts(&self, owner: Uuid) -> Result<i64, RepoError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM workouts WHERE owner_id = $1")
            .bind(owner)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn list_workouts(
        &self,
        owner: Uuid,
        page: PageRequest,
    ) -> Result<Vec<Workout>, RepoError> {
        let rows = sqlx::query_as::<_, WorkoutRow>(&format!(
            "SELECT {WORKOUT_COLUMNS} FROM workouts WHERE owner_id = $1 \
             ORDER BY date DESC, id OFFSET $2 LIMIT $3"
        ))
        .bind(owner)
        .bind(page.offset)
        .bind(page.limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Workout::from).collect())
    }
}

// --- In-memory implementation ---

#[derive(Default)]
struct MemoryTables {
    users: HashMap<Uuid, User>,
    exercises: HashMap<Uuid, Exercise>,
    workouts: HashMap<Uuid, Workout>,
}

/// InMemoryRepository
///
/// A process-local `Repository` used when no `DATABASE_URL` is configured in `Env::Local`,
/// and by the integration tests. Each operation holds the table lock for its whole
/// read-modify-write, which gives the same per-record atomicity as the database.
///
/// Search only approximates the Postgres full-text ranking: terms are matched after a plain
/// plural strip, with no stop words and no other stemming.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: RwLock<MemoryTables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored identities.
    pub async fn user_count(&self) -> usize {
        self.tables.read().await.users.len()
    }
}

fn is_visible_to(exercise: &Exercise, viewer: Uuid) -> bool {
    exercise.visibility == Visibility::Public
        || exercise.owner.is_none()
        || exercise.owner == Some(viewer)
}

/// Plural stripping, a rough stand-in for the `english` stemmer of the Postgres search:
/// "squats" and "squat" compare equal, "press" is left alone.
fn stem(term: &str) -> &str {
    match term.strip_suffix('s') {
        Some(base) if base.len() >= 3 && !base.ends_with('s') => base,
        _ => term,
    }
}

/// Number of query-term occurrences among the searchable words of an exercise, after
/// [`stem`] on both sides.
fn relevance(exercise: &Exercise, terms: &[String]) -> usize {
    let text = format!("{} {} {}", exercise.name, exercise.target, exercise.body_part);
    let words = search_terms(&text);
    terms
        .iter()
        .map(|term| {
            words
                .iter()
                .filter(|word| stem(word) == stem(term))
                .count()
        })
        .sum()
}

fn window<T>(items: Vec<T>, page: PageRequest) -> Vec<T> {
    let offset = usize::try_from(page.offset).unwrap_or(0);
    let limit = usize::try_from(page.limit).unwrap_or(0);
    items.into_iter().skip(offset).take(limit).collect()
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, RepoError> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn insert_user(&self, user: User) -> Result<User, RepoError> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.username == user.username) {
            return Err(RepoError::Conflict("User already exists".to_string()));
        }
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_exercise(&self, id: Uuid) -> Result<Option<Exercise>, RepoError> {
        Ok(self.tables.read().await.exercises.get(&id).cloned())
    }

    async fn insert_exercise(&self, exercise: Exercise) -> Result<Exercise, RepoError> {
        let mut tables = self.tables.write().await;
        tables.exercises.insert(exercise.id, exercise.clone());
        Ok(exercise)
    }

    async fn update_exercise(
        &self,
        id: Uuid,
        req: UpdateExerciseRequest,
    ) -> Result<Option<Exercise>, RepoError> {
        let mut tables = self.tables.write().await;
        let Some(exercise) = tables.exercises.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = req.name {
            exercise.name = name;
        }
        if let Some(gif_url) = req.gif_url {
            exercise.gif_url = gif_url;
        }
        if let Some(target) = req.target {
            exercise.target = target;
        }
        if let Some(body_part) = req.body_part {
            exercise.body_part = body_part;
        }
        if let Some(equipment) = req.equipment {
            exercise.equipment = equipment;
        }
        exercise.updated_at = Utc::now();
        Ok(Some(exercise.clone()))
    }

    async fn delete_exercise(&self, id: Uuid) -> Result<bool, RepoError> {
        Ok(self.tables.write().await.exercises.remove(&id).is_some())
    }

    async fn count_visible_exercises(&self, viewer: Uuid) -> Result<i64, RepoError> {
        let tables = self.tables.read().await;
        let count = tables
            .exercises
            .values()
            .filter(|e| is_visible_to(e, viewer))
            .count();
        Ok(count as i64)
    }

    async fn list_visible_exercises(
        &self,
        viewer: Uuid,
        page: PageRequest,
    ) -> Result<Vec<Exercise>, RepoError> {
        let tables = self.tables.read().await;
        let mut visible: Vec<Exercise> = tables
            .exercises
            .values()
            .filter(|e| is_visible_to(e, viewer))
            .cloned()
            .collect();
        visible.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(window(visible, page))
    }

    async fn search_visible_exercises(
        &self,
        viewer: Uuid,
        text: &str,
        limit: i64,
    ) -> Result<Vec<Exercise>, RepoError> {
        let terms = search_terms(text);
        let tables = self.tables.read().await;
        let mut hits: Vec<(usize, Exercise)> = tables
            .exercises
            .values()
            .filter(|e| is_visible_to(e, viewer))
            .map(|e| (relevance(e, &terms), e.clone()))
            .filter(|(score, _)| *score > 0)
            .collect();
        hits.sort_by(|(sa, a), (sb, b)| sb.cmp(sa).then(b.created_at.cmp(&a.created_at)));
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(hits.into_iter().take(limit).map(|(_, e)| e).collect())
    }

    async fn find_workout(&self, id: Uuid) -> Result<Option<Workout>, RepoError> {
        Ok(self.tables.read().await.workouts.get(&id).cloned())
    }

    async fn insert_workout(&self, workout: Workout) -> Result<Workout, RepoError> {
        let mut tables = self.tables.write().await;
        tables.workouts.insert(workout.id, workout.clone());
        Ok(workout)
    }

    async fn update_workout(
        &self,
        id: Uuid,
        req: UpdateWorkoutRequest,
    ) -> Result<Option<Workout>, RepoError> {
        let mut tables = self.tables.write().await;
        let Some(workout) = tables.workouts.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(date) = req.date {
            workout.date = date;
        }
        if let Some(exercises) = req.exercises {
            workout.exercises = exercises;
        }
        if let Some(notes) = req.notes {
            workout.notes = Some(notes);
        }
        workout.updated_at = Utc::now();
        Ok(Some(workout.clone()))
    }

    async fn delete_workout(&self, id: Uuid) -> Result<bool, RepoError> {
        Ok(self.tables.write().await.workouts.remove(&id).is_some())
    }

    async fn count_workouts(&self, owner: Uuid) -> Result<i64, RepoError> {
        let tables = self.tables.read().await;
        Ok(tables.workouts.values().filter(|w| w.owner == owner).count() as i64)
    }

    async fn list_workouts(
        &self,
        owner: Uuid,
        page: PageRequest,
    ) -> Result<Vec<Workout>, RepoError> {
        let tables = self.tables.read().await;
        let mut owned: Vec<Workout> = tables
            .workouts
            .values()
            .filter(|w| w.owner == owner)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.date.cmp(&a.date).then(a.id.cmp(&b.id)));
        Ok(window(owned, page))
    }
}
