mod common;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use common::{exercise_body, spawn_app};
use fitness_tracker::{
    models::{Exercise, Visibility},
    repository::Repository,
};
use serde_json::json;
use tokio::test;
use uuid::Uuid;

// --- Public Surface ---

#[test]
async fn test_health_check() {
    let app = spawn_app();
    let (status, _) = app.send(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[test]
async fn test_openapi_document_is_served() {
    let app = spawn_app();
    let (status, body) = app
        .send(Method::GET, "/api-docs/openapi.json", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/exercises"].is_object());
}

// --- Registration & Login ---

#[test]
async fn test_register_defaults_to_visitor() {
    let app = spawn_app();
    let token = {
        assert_eq!(app.register("carol", "secret", None).await, StatusCode::CREATED);
        let (status, body) = app.login("carol", "secret").await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_string()
    };

    let (status, me) = app.send(Method::GET, "/api/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["username"], "carol");
    assert_eq!(me["role"], "VISITOR");
    assert_eq!(me["permissions"], json!(["READ"]));
}

#[test]
async fn test_duplicate_registration_conflicts_and_leaves_store_unchanged() {
    let app = spawn_app();
    assert_eq!(app.register("alice", "first", None).await, StatusCode::CREATED);
    assert_eq!(app.repo.user_count().await, 1);

    let (status, body) = app
        .send(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "username": "alice", "password": "second", "role": "ADMIN" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], 409);
    assert_eq!(app.repo.user_count().await, 1);

    // The original secret and role still apply.
    let (status, _) = app.login("alice", "first").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.login("alice", "second").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[test]
async fn test_register_requires_username_and_password() {
    let app = spawn_app();
    assert_eq!(app.register("", "secret", None).await, StatusCode::BAD_REQUEST);
    assert_eq!(app.register("dave", "", None).await, StatusCode::BAD_REQUEST);
    assert_eq!(app.repo.user_count().await, 0);
}

#[test]
async fn test_register_rejects_unknown_role() {
    let app = spawn_app();
    let (status, _) = app
        .send(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "username": "eve", "password": "pw", "role": "ROOT" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.repo.user_count().await, 0);
}

#[test]
async fn test_unknown_user_and_wrong_password_are_indistinguishable() {
    let app = spawn_app();
    app.register("alice", "right", None).await;

    let (wrong_status, wrong_body) = app.login("alice", "wrong").await;
    let (unknown_status, unknown_body) = app.login("nobody", "whatever").await;

    assert_eq!(wrong_status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_body, unknown_body);
}

#[test]
async fn test_token_endpoint_creates_identity_with_permission_override() {
    let app = spawn_app();
    let (status, body) = app
        .send(
            Method::POST,
            "/api/auth/token",
            None,
            Some(json!({
                "username": "robot",
                "password": "pw",
                "role": "VISITOR",
                "permissions": ["READ", "WRITE"],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap().to_string();

    let (_, me) = app.send(Method::GET, "/api/me", Some(&token), None).await;
    assert_eq!(me["role"], "VISITOR");
    assert_eq!(me["permissions"], json!(["READ", "WRITE"]));

    // The override is honored by the permission gate.
    let (status, _) = app
        .send(
            Method::POST,
            "/api/exercises",
            Some(&token),
            Some(exercise_body("Robot Press", "public")),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // Second call with the wrong secret does not re-register.
    let (status, _) = app
        .send(
            Method::POST,
            "/api/auth/token",
            None,
            Some(json!({ "username": "robot", "password": "nope" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.repo.user_count().await, 1);
}

// --- Authentication Gate ---

#[test]
async fn test_protected_route_without_token_is_unauthorized() {
    let app = spawn_app();
    let (status, body) = app.send(Method::GET, "/api/exercises", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], 401);
}

#[test]
async fn test_forged_and_expired_tokens_are_rejected_alike() {
    let app = spawn_app();
    let valid = app.token_for("alice", "ADMIN").await;

    let user = app
        .state
        .credentials
        .find_by_username("alice")
        .await
        .unwrap()
        .unwrap();
    let expired = app
        .state
        .tokens
        .issue_at(&user, Duration::minutes(1), Utc::now() - Duration::hours(1))
        .unwrap();
    let forged = fitness_tracker::TokenCodec::new("some-other-secret", Duration::hours(1))
        .issue(&user, Duration::hours(1))
        .unwrap();
    let mut tampered = valid.clone();
    tampered.push('x');

    let mut bodies = Vec::new();
    for token in [expired.as_str(), forged.as_str(), tampered.as_str(), "not-a-jwt"] {
        let (status, body) = app
            .send(Method::GET, "/api/exercises", Some(token), None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "token {token} accepted");
        bodies.push(body);
    }
    assert!(bodies.windows(2).all(|pair| pair[0] == pair[1]));

    let (status, _) = app
        .send(Method::GET, "/api/exercises", Some(&valid), None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

// --- Permission Gate ---

#[test]
async fn test_visitor_cannot_create_exercise() {
    let app = spawn_app();
    let alice = app.token_for("alice", "VISITOR").await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/exercises",
            Some(&alice),
            Some(exercise_body("Bench Press", "public")),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Insufficient permissions");
}

#[test]
async fn test_permission_gate_runs_before_body_parsing() {
    let app = spawn_app();
    let alice = app.token_for("alice", "VISITOR").await;

    // A malformed body would be a 400, but the missing WRITE permission wins.
    let (status, _) = app
        .send(
            Method::POST,
            "/api/exercises",
            Some(&alice),
            Some(json!("not an object")),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[test]
async fn test_owner_without_delete_permission_is_forbidden() {
    let app = spawn_app();
    let writer = app.token_for("wendy", "WRITER").await;
    let id = app.create_exercise(&writer, "Squat", "private").await;

    let (status, _) = app
        .send(Method::DELETE, &format!("/api/exercises/{id}"), Some(&writer), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(Method::GET, &format!("/api/exercises/{id}"), Some(&writer), None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

// --- Ownership & Visibility ---

#[test]
async fn test_admin_deletes_another_users_exercise() {
    let app = spawn_app();
    let alice = app
        .send(
            Method::POST,
            "/api/auth/token",
            None,
            Some(json!({ "username": "alice", "password": "pw", "permissions": ["READ", "WRITE"] })),
        )
        .await
        .1["token"]
        .as_str()
        .unwrap()
        .to_string();
    let bob = app.token_for("bob", "ADMIN").await;

    let id = app.create_exercise(&alice, "Alice Curl", "private").await;

    let (status, body) = app
        .send(Method::DELETE, &format!("/api/exercises/{id}"), Some(&bob), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Exercise deleted successfully");

    let (status, _) = app
        .send(Method::GET, &format!("/api/exercises/{id}"), Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[test]
async fn test_private_exercise_is_hidden_from_other_users() {
    let app = spawn_app();
    let owner = app.token_for("wendy", "WRITER").await;
    let other = app.token_for("walter", "WRITER").await;
    let id = app.create_exercise(&owner, "Secret Row", "private").await;

    let (status, body) = app
        .send(Method::GET, &format!("/api/exercises/{id}"), Some(&other), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Same answer as for an id that never existed.
    let (missing_status, missing_body) = app
        .send(
            Method::GET,
            &format!("/api/exercises/{}", Uuid::new_v4()),
            Some(&other),
            None,
        )
        .await;
    assert_eq!(missing_status, StatusCode::NOT_FOUND);
    assert_eq!(body, missing_body);

    let (_, page) = app.send(Method::GET, "/api/exercises", Some(&other), None).await;
    assert_eq!(page["total_exercises"], 0);

    let (_, hits) = app
        .send(Method::GET, "/api/exercises/search/secret", Some(&other), None)
        .await;
    assert_eq!(hits, json!([]));
}

#[test]
async fn test_public_exercise_is_readable_but_not_modifiable_by_others() {
    let app = spawn_app();
    let owner = app.token_for("wendy", "WRITER").await;
    let other = app
        .send(
            Method::POST,
            "/api/auth/token",
            None,
            Some(json!({
                "username": "ursula",
                "password": "pw",
                "permissions": ["READ", "UPDATE", "DELETE"],
            })),
        )
        .await
        .1["token"]
        .as_str()
        .unwrap()
        .to_string();
    let id = app.create_exercise(&owner, "Open Deadlift", "public").await;
    let uri = format!("/api/exercises/{id}");

    let (status, body) = app.send(Method::GET, &uri, Some(&other), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["visibility"], "public");

    let (status, _) = app
        .send(Method::PUT, &uri, Some(&other), Some(json!({ "name": "Hijacked" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.send(Method::DELETE, &uri, Some(&other), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = app.send(Method::GET, &uri, Some(&owner), None).await;
    assert_eq!(body["name"], "Open Deadlift");
}

#[test]
async fn test_ownerless_exercise_is_public_and_admin_only_to_modify() {
    let app = spawn_app();
    let now = Utc::now();
    let seeded = app
        .repo
        .insert_exercise(Exercise {
            id: Uuid::new_v4(),
            name: "Push Up".to_string(),
            gif_url: "https://cdn.example.com/pushup.gif".to_string(),
            target: "pectorals".to_string(),
            body_part: "chest".to_string(),
            equipment: "body weight".to_string(),
            is_custom: false,
            owner: None,
            visibility: Visibility::Private,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
    let uri = format!("/api/exercises/{}", seeded.id);

    let visitor = app.token_for("vic", "VISITOR").await;
    let admin = app.token_for("ada", "ADMIN").await;

    let (status, _) = app.send(Method::GET, &uri, Some(&visitor), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send(Method::PUT, &uri, Some(&admin), Some(json!({ "equipment": "none" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["equipment"], "none");
    assert_eq!(body["owner"], json!(null));
}

#[test]
async fn test_owner_updates_own_exercise_but_visibility_is_fixed() {
    let app = spawn_app();
    let admin = app.token_for("ada", "ADMIN").await;
    let id = app.create_exercise(&admin, "Clean", "private").await;

    let (status, body) = app
        .send(
            Method::PUT,
            &format!("/api/exercises/{id}"),
            Some(&admin),
            Some(json!({ "name": "Power Clean", "visibility": "public" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Power Clean");
    assert_eq!(body["visibility"], "private");
    assert_eq!(body["is_custom"], true);
}

#[test]
async fn test_create_exercise_defaults_to_private_and_validates_fields() {
    let app = spawn_app();
    let writer = app.token_for("wendy", "WRITER").await;

    let mut body = exercise_body("Lunge", "public");
    body.as_object_mut().unwrap().remove("visibility");
    let (status, created) = app
        .send(Method::POST, "/api/exercises", Some(&writer), Some(body))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["visibility"], "private");

    let mut body = exercise_body("Lunge", "public");
    body["target"] = json!("   ");
    let (status, _) = app
        .send(Method::POST, "/api/exercises", Some(&writer), Some(body))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// --- Listing & Search ---

#[test]
async fn test_exercise_pagination() {
    let app = spawn_app();
    let writer = app.token_for("wendy", "WRITER").await;
    for i in 0..5 {
        app.create_exercise(&writer, &format!("Move {i}"), "private").await;
    }

    let (status, page) = app
        .send(Method::GET, "/api/exercises?page=2&limit=2", Some(&writer), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["current_page"], 2);
    assert_eq!(page["total_pages"], 3);
    assert_eq!(page["total_exercises"], 5);
    assert_eq!(page["exercises"].as_array().unwrap().len(), 2);

    // Garbage falls back to the defaults.
    let (_, page) = app
        .send(Method::GET, "/api/exercises?page=abc&limit=-4", Some(&writer), None)
        .await;
    assert_eq!(page["current_page"], 1);
    assert_eq!(page["exercises"].as_array().unwrap().len(), 5);
}

#[test]
async fn test_search_ranks_by_relevance_and_caps_results() {
    let app = spawn_app();
    let writer = app.token_for("wendy", "WRITER").await;
    for i in 0..12 {
        app.create_exercise(&writer, &format!("Chest Fly {i}"), "public").await;
    }
    let (status, hits) = app
        .send(Method::GET, "/api/exercises/search/fly", Some(&writer), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hits.as_array().unwrap().len(), 10);

    let (_, hits) = app
        .send(Method::GET, "/api/exercises/search/chest%20fly%203", Some(&writer), None)
        .await;
    assert_eq!(hits[0]["name"], "Chest Fly 3");
}

// --- Workouts ---

#[test]
async fn test_workout_lifecycle_and_privacy() {
    let app = spawn_app();
    let owner = app.token_for("wendy", "WRITER").await;
    let other = app.token_for("walter", "WRITER").await;
    let admin = app.token_for("ada", "ADMIN").await;
    let exercise = app.create_exercise(&owner, "Front Squat", "private").await;

    let (status, workout) = app
        .send(
            Method::POST,
            "/api/workouts",
            Some(&owner),
            Some(json!({
                "exercises": [{ "exercise": exercise, "sets": 5, "reps": 5, "weight": 80.0 }],
                "notes": "heavy day",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{workout}");
    let uri = format!("/api/workouts/{}", workout["id"].as_str().unwrap());

    let (status, _) = app.send(Method::GET, &uri, Some(&owner), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.send(Method::GET, &uri, Some(&other), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.send(Method::GET, &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, page) = app.send(Method::GET, "/api/workouts", Some(&other), None).await;
    assert_eq!(page["total_workouts"], 0);
    let (_, page) = app.send(Method::GET, "/api/workouts", Some(&owner), None).await;
    assert_eq!(page["total_workouts"], 1);

    // Another user's private exercise cannot be referenced.
    let (status, _) = app
        .send(
            Method::POST,
            "/api/workouts",
            Some(&other),
            Some(json!({ "exercises": [{ "exercise": exercise, "sets": 1, "reps": 1 }] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.send(Method::DELETE, &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Workout deleted successfully");
    let (status, _) = app.send(Method::GET, &uri, Some(&owner), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[test]
async fn test_workout_entry_validation() {
    let app = spawn_app();
    let owner = app.token_for("wendy", "WRITER").await;
    let exercise = app.create_exercise(&owner, "Dip", "public").await;

    for entry in [
        json!({ "exercise": exercise, "sets": 0, "reps": 5 }),
        json!({ "exercise": exercise, "sets": 3, "reps": 0 }),
        json!({ "exercise": exercise, "sets": 3, "reps": 5, "weight": -1.0 }),
        json!({ "exercise": Uuid::new_v4(), "sets": 3, "reps": 5 }),
    ] {
        let (status, _) = app
            .send(
                Method::POST,
                "/api/workouts",
                Some(&owner),
                Some(json!({ "exercises": [entry] })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "accepted {entry}");
    }
}

#[test]
async fn test_non_owner_cannot_update_workout() {
    let app = spawn_app();
    let owner = app.token_for("wendy", "WRITER").await;
    let other = app
        .send(
            Method::POST,
            "/api/auth/token",
            None,
            Some(json!({ "username": "ursula", "password": "pw", "permissions": ["READ", "UPDATE"] })),
        )
        .await
        .1["token"]
        .as_str()
        .unwrap()
        .to_string();

    let (_, workout) = app
        .send(Method::POST, "/api/workouts", Some(&owner), Some(json!({ "notes": "rest" })))
        .await;
    let uri = format!("/api/workouts/{}", workout["id"].as_str().unwrap());

    let (status, _) = app
        .send(Method::PUT, &uri, Some(&other), Some(json!({ "notes": "mine now" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[test]
async fn test_workout_entries_are_populated() {
    let app = spawn_app();
    let owner = app.token_for("wendy", "WRITER").await;
    let admin = app.token_for("ada", "ADMIN").await;
    let public = app.create_exercise(&owner, "Pull Up", "public").await;
    let private = app.create_exercise(&owner, "Secret Squat", "private").await;

    let (status, workout) = app
        .send(
            Method::POST,
            "/api/workouts",
            Some(&owner),
            Some(json!({
                "exercises": [
                    { "exercise": public, "sets": 3, "reps": 8 },
                    { "exercise": private, "sets": 5, "reps": 5, "weight": 100.0 },
                ],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{workout}");
    assert_eq!(workout["exercises"][0]["exercise"]["name"], "Pull Up");
    assert_eq!(workout["exercises"][1]["exercise"]["name"], "Secret Squat");
    assert_eq!(workout["exercises"][1]["weight"], 100.0);
    let uri = format!("/api/workouts/{}", workout["id"].as_str().unwrap());

    let (_, page) = app.send(Method::GET, "/api/workouts", Some(&owner), None).await;
    assert_eq!(page["workouts"][0]["exercises"][0]["exercise"]["id"], json!(public));

    // The administrator reads the workout but not the owner's private exercise.
    let (status, seen_by_admin) = app.send(Method::GET, &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(seen_by_admin["exercises"][0]["exercise"]["name"], "Pull Up");
    assert_eq!(seen_by_admin["exercises"][1]["exercise"], json!(null));

    // A deleted exercise resolves to null while the entry itself stays.
    let (status, _) = app
        .send(Method::DELETE, &format!("/api/exercises/{public}"), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, after) = app.send(Method::GET, &uri, Some(&owner), None).await;
    assert_eq!(after["exercises"][0]["exercise"], json!(null));
    assert_eq!(after["exercises"][0]["sets"], 3);
}

#[test]
async fn test_admin_updates_workout_referencing_owners_private_exercise() {
    let app = spawn_app();
    let owner = app.token_for("wendy", "WRITER").await;
    let admin = app.token_for("ada", "ADMIN").await;
    let private = app.create_exercise(&owner, "Hack Squat", "private").await;

    let (_, workout) = app
        .send(
            Method::POST,
            "/api/workouts",
            Some(&owner),
            Some(json!({ "exercises": [{ "exercise": private, "sets": 3, "reps": 10 }] })),
        )
        .await;
    let uri = format!("/api/workouts/{}", workout["id"].as_str().unwrap());

    let (status, updated) = app
        .send(
            Method::PUT,
            &uri,
            Some(&admin),
            Some(json!({ "exercises": [{ "exercise": private, "sets": 4, "reps": 8 }] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{updated}");
    assert_eq!(updated["exercises"][0]["sets"], 4);

    // The admin's own private exercise is not visible to the owner, so it is refused.
    let foreign = app.create_exercise(&admin, "Admin Only", "private").await;
    let (status, _) = app
        .send(
            Method::PUT,
            &uri,
            Some(&admin),
            Some(json!({ "exercises": [{ "exercise": foreign, "sets": 1, "reps": 1 }] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[test]
async fn test_search_matches_plural_forms() {
    let app = spawn_app();
    let writer = app.token_for("wendy", "WRITER").await;
    app.create_exercise(&writer, "Goblet Squat", "public").await;
    app.create_exercise(&writer, "Bench Press", "public").await;

    let (_, hits) = app
        .send(Method::GET, "/api/exercises/search/squats", Some(&writer), None)
        .await;
    assert_eq!(hits.as_array().unwrap().len(), 1);
    assert_eq!(hits[0]["name"], "Goblet Squat");

    let (_, hits) = app
        .send(Method::GET, "/api/exercises/search/press", Some(&writer), None)
        .await;
    assert_eq!(hits[0]["name"], "Bench Press");
}
