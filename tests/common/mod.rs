#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use fitness_tracker::{AppConfig, AppState, InMemoryRepository, create_router};
use serde_json::{Value, json};
use tower::ServiceExt;

// --- Test Harness ---

/// A router over a fresh in-memory store. The store handle is kept so tests can inspect
/// or seed it directly.
pub struct TestApp {
    pub router: Router,
    pub repo: Arc<InMemoryRepository>,
    pub state: AppState,
}

pub fn spawn_app() -> TestApp {
    let repo = Arc::new(InMemoryRepository::new());
    let state = AppState::new(repo.clone(), &AppConfig::default());
    TestApp {
        router: create_router(state.clone()),
        repo,
        state,
    }
}

impl TestApp {
    /// Sends one request through the full middleware stack and decodes the JSON body
    /// (`Value::Null` for an empty or non-JSON body).
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    pub async fn register(&self, username: &str, password: &str, role: Option<&str>) -> StatusCode {
        let mut body = json!({ "username": username, "password": password });
        if let Some(role) = role {
            body["role"] = json!(role);
        }
        let (status, _) = self
            .send(Method::POST, "/api/auth/register", None, Some(body))
            .await;
        status
    }

    pub async fn login(&self, username: &str, password: &str) -> (StatusCode, Value) {
        self.send(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "username": username, "password": password })),
        )
        .await
    }

    /// Registers `username` with `role` and returns a fresh token for it.
    pub async fn token_for(&self, username: &str, role: &str) -> String {
        assert_eq!(
            self.register(username, "pw-123456", Some(role)).await,
            StatusCode::CREATED
        );
        let (status, body) = self.login(username, "pw-123456").await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_string()
    }

    /// Creates an exercise as the token's holder and returns its id.
    pub async fn create_exercise(&self, token: &str, name: &str, visibility: &str) -> String {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/exercises",
                Some(token),
                Some(exercise_body(name, visibility)),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create failed: {body}");
        body["id"].as_str().unwrap().to_string()
    }
}

pub fn exercise_body(name: &str, visibility: &str) -> Value {
    json!({
        "name": name,
        "gif_url": "https://cdn.example.com/x.gif",
        "target": "pectorals",
        "body_part": "chest",
        "equipment": "barbell",
        "visibility": visibility,
    })
}
