#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use classroom_portal::{
    AppConfig, AppState, MemoryRepository, create_router,
    generation::MockContentGenerator,
    identity::StaticIdentityProvider,
    join_code::RandomCodeSource,
    models::User,
};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

/// Who a test request acts as.
pub enum As<'a> {
    Nobody,
    User(Uuid),
    Guest(&'a str),
    Bearer(&'a str),
}

/// TestApp
///
/// The full router wired to in-memory collaborators. Requests go through `oneshot`, so no
/// port or database is needed.
pub struct TestApp {
    pub router: Router,
    pub repo: Arc<MemoryRepository>,
    pub identity: Arc<StaticIdentityProvider>,
    pub generator: Arc<MockContentGenerator>,
    pub config: AppConfig,
}

pub fn spawn_app() -> TestApp {
    spawn_app_with(AppConfig::default(), MockContentGenerator::new())
}

pub fn spawn_app_with(config: AppConfig, generator: MockContentGenerator) -> TestApp {
    let repo = Arc::new(MemoryRepository::new());
    let identity = Arc::new(StaticIdentityProvider::new());
    let generator = Arc::new(generator);

    let state = AppState {
        repo: repo.clone(),
        identity: identity.clone(),
        generator: generator.clone(),
        codes: Arc::new(RandomCodeSource),
        config: config.clone(),
    };

    TestApp {
        router: create_router(state),
        repo,
        identity,
        generator,
        config,
    }
}

impl TestApp {
    /// Seeds a profile and the matching provider account.
    pub fn seed_user(&self, email: &str, role: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.repo.insert_user(User {
            id,
            email: email.to_string(),
            role: role.to_string(),
        });
        self.identity.add_account(id, email);
        id
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        who: As<'_>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        builder = match who {
            As::Nobody => builder,
            As::User(id) => builder.header("x-user-id", id.to_string()),
            As::Guest(guest_id) => builder.header("x-guest-id", guest_id),
            As::Bearer(token) => builder.header(header::AUTHORIZATION, format!("Bearer {}", token)),
        };
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str, who: As<'_>) -> (StatusCode, serde_json::Value) {
        self.send(Method::GET, uri, who, None).await
    }

    pub async fn post(
        &self,
        uri: &str,
        who: As<'_>,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        self.send(Method::POST, uri, who, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, who: As<'_>) -> (StatusCode, serde_json::Value) {
        self.send(Method::DELETE, uri, who, None).await
    }
}
