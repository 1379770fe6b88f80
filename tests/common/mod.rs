#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::OnceCell;
use tower::ServiceExt;
use uuid::Uuid;

use agora::app::auth::TokenService;
use agora::app::channels::ChannelHub;
use agora::app::events::EventBus;
use agora::domain::notification::Notification;
use agora::domain::user::{NewUser, Role};
use agora::infra::db::Db;
use agora::infra::store::{MemoryStore, PgStore, Store};
use agora::jobs::notification_fanout::{self, FanoutHandler};
use agora::AppState;

const TEST_ACCESS_KEY: [u8; 32] = *b"0123456789abcdef0123456789abcdef";
const WAIT_STEP: Duration = Duration::from_millis(10);
const WAIT_LIMIT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// TestApp
// ---------------------------------------------------------------------------

/// A full application over the in-memory store. Built fresh for every test
/// because the fan-out workers run on the calling test's runtime.
pub struct TestApp {
    router: Router,
    pub store: Arc<MemoryStore>,
    pub hub: ChannelHub,
    pub tokens: TokenService,
}

pub struct TestResponse {
    pub status: StatusCode,
    body_bytes: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body_bytes).unwrap_or(Value::Null)
    }

    pub fn error_message(&self) -> String {
        self.json()["error"].as_str().unwrap_or("").to_string()
    }
}

pub struct TestUser {
    pub id: Uuid,
    pub username: String,
    pub access_token: String,
}

pub async fn app() -> TestApp {
    TestApp::with_max_depth(2)
}

impl TestApp {
    pub fn with_max_depth(comment_max_depth: i32) -> Self {
        let store = Arc::new(MemoryStore::new());
        let hub = ChannelHub::new();
        let tokens = TokenService::new(TEST_ACCESS_KEY, 15);

        let (bus, receivers) = EventBus::new(2);
        let handler = Arc::new(FanoutHandler::new(
            store.clone(),
            Arc::new(hub.clone()),
            Duration::from_secs(1),
        ));
        notification_fanout::spawn_workers(receivers, handler);

        let state = AppState {
            store: store.clone(),
            events: Arc::new(bus),
            hub: hub.clone(),
            relay: None,
            tokens: tokens.clone(),
            comment_max_depth,
        };

        TestApp {
            router: agora::http::router(state),
            store,
            hub,
            tokens,
        }
    }

    // ------------------------------------------------------------------
    // Low-level request helper
    // ------------------------------------------------------------------
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("host", "localhost");

        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        let request = if let Some(body) = body {
            builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap()
        } else {
            builder.body(Body::empty()).unwrap()
        };

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot failed");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("failed to collect body")
            .to_bytes();

        TestResponse { status, body_bytes }
    }

    // ------------------------------------------------------------------
    // Convenience HTTP helpers
    // ------------------------------------------------------------------
    pub async fn get(&self, path: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::GET, path, None, token).await
    }

    pub async fn post_json(&self, path: &str, body: Value, token: Option<&str>) -> TestResponse {
        self.request(Method::POST, path, Some(body), token).await
    }

    pub async fn post(&self, path: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::POST, path, None, token).await
    }

    pub async fn patch_json(&self, path: &str, body: Value, token: Option<&str>) -> TestResponse {
        self.request(Method::PATCH, path, Some(body), token).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::DELETE, path, None, token).await
    }

    // ------------------------------------------------------------------
    // Test data helpers
    // ------------------------------------------------------------------

    /// Creates a user directly in the store and mints an access token.
    pub async fn create_user(&self, username: &str) -> TestUser {
        self.create_user_with_role(username, Role::User).await
    }

    pub async fn create_admin(&self, username: &str) -> TestUser {
        self.create_user_with_role(username, Role::Admin).await
    }

    async fn create_user_with_role(&self, username: &str, role: Role) -> TestUser {
        let user = self
            .store
            .insert_user(NewUser {
                username: username.to_string(),
                role,
            })
            .await
            .expect("insert test user failed");
        let token = self
            .tokens
            .issue_access_token(user.id)
            .expect("issue_access_token failed");

        TestUser {
            id: user.id,
            username: user.username,
            access_token: token.token,
        }
    }

    /// Creates a post through the API and returns its id.
    pub async fn create_post(&self, owner: &TestUser, title: &str) -> Uuid {
        let resp = self
            .post_json(
                "/v1/posts",
                serde_json::json!({ "title": title, "content": "body" }),
                Some(&owner.access_token),
            )
            .await;
        assert_eq!(resp.status, StatusCode::CREATED, "{}", resp.error_message());
        Uuid::parse_str(resp.json()["id"].as_str().unwrap()).unwrap()
    }

    /// Polls until `receiver` has at least `count` stored notifications.
    pub async fn wait_for_notifications(&self, receiver: Uuid, count: usize) -> Vec<Notification> {
        let mut waited = Duration::ZERO;
        loop {
            let stored = self
                .store
                .list_notifications(receiver, None, 100)
                .await
                .expect("list notifications failed");
            if stored.len() >= count || waited >= WAIT_LIMIT {
                return stored;
            }
            tokio::time::sleep(WAIT_STEP).await;
            waited += WAIT_STEP;
        }
    }

    /// Gives the workers time to drain, then returns what is stored.
    pub async fn settled_notifications(&self, receiver: Uuid) -> Vec<Notification> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.store
            .list_notifications(receiver, None, 100)
            .await
            .expect("list notifications failed")
    }
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

static PG_SCHEMA: OnceCell<()> = OnceCell::const_new();

/// A `PgStore` on `DATABASE_URL` with the schema applied once per test
/// binary. Returns `None` when `DATABASE_URL` is unset so the caller can skip.
pub async fn postgres_store() -> Option<(Db, Arc<PgStore>)> {
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) if !url.is_empty() => url,
        _ => {
            eprintln!("DATABASE_URL not set, skipping Postgres-backed test");
            return None;
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(8)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&database_url)
        .await
        .expect("failed to connect to DATABASE_URL");
    let db = Db::from_pool(pool);

    PG_SCHEMA
        .get_or_init(|| async {
            let migrations = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
            db.apply_migrations(&migrations)
                .await
                .expect("failed to apply migrations");
        })
        .await;

    let store = Arc::new(PgStore::new(db.clone()));
    Some((db, store))
}

/// Usernames and slugs are unique across runs against the same database.
pub fn unique(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}
