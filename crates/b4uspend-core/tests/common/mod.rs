//! In-process mock of the B4USpend REST API for integration tests.

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use b4uspend_core::ClientConfig;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const PASSWORD: &str = "secret123";

type Reply = (StatusCode, Json<Value>);

#[derive(Default)]
pub struct MockState {
    access: Mutex<String>,
    refresh: Mutex<String>,
    issued: AtomicU64,
    pub refresh_calls: AtomicUsize,
    history: Mutex<Vec<Value>>,
}

impl MockState {
    fn issue(&self) -> Value {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let access = format!("access-{}", n);
        let refresh = format!("refresh-{}", n);
        *self.access.lock().unwrap() = access.clone();
        *self.refresh.lock().unwrap() = refresh.clone();
        json!({"access_token": access, "refresh_token": refresh, "token_type": "bearer"})
    }

    /// Make the server reject the current access token.
    pub fn expire_access(&self) {
        *self.access.lock().unwrap() = "expired".to_string();
    }

    pub fn revoke_refresh(&self) {
        *self.refresh.lock().unwrap() = String::new();
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), Reply> {
        let expected = format!("Bearer {}", self.access.lock().unwrap());
        match headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            Some(value) if value == expected => Ok(()),
            _ => Err(detail(StatusCode::UNAUTHORIZED, "Could not validate credentials")),
        }
    }
}

pub struct MockServer {
    pub base_url: String,
    pub state: Arc<MockState>,
}

impl MockServer {
    /// Client configuration pointing at this server, storing the session under `dir`.
    pub fn config(&self, dir: &Path) -> ClientConfig {
        ClientConfig {
            api_base_url: self.base_url.clone(),
            storage_path: dir.join("session.db"),
            request_timeout: Duration::from_secs(5),
            ..ClientConfig::default()
        }
    }
}

pub async fn spawn() -> MockServer {
    let state = Arc::new(MockState::default());
    let app = Router::new()
        .route("/api/v1/auth/login", post(login))
        .route("/api/v1/auth/refresh", post(refresh))
        .route("/api/v1/auth/logout", post(logout))
        .route("/api/v1/users/me", get(me))
        .route("/api/v1/dashboard", get(dashboard))
        .route("/api/v1/expenses", post(add_expense))
        .route("/api/v1/chat/history", get(chat_history).delete(clear_chat))
        .route("/api/v1/chat/send", post(send_chat))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockServer {
        base_url: format!("http://{}", addr),
        state,
    }
}

fn detail(status: StatusCode, message: &str) -> Reply {
    (status, Json(json!({"detail": message})))
}

pub fn profile() -> Value {
    json!({
        "id": Uuid::from_u128(0xabc),
        "phone": "9876543210",
        "name": "Asha",
        "age": 29,
        "city": "Pune",
        "monthly_salary": 85000.0,
        "other_income": 0.0,
        "dependent_type": "JUST_ME",
        "onboarding_complete": true,
        "fixed_expenses": [{"category": "RENT", "amount": 18000.0}],
        "created_at": "2025-01-01T00:00:00Z"
    })
}

async fn login(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Reply {
    if body["password"] != PASSWORD {
        return detail(StatusCode::UNAUTHORIZED, "Invalid phone or password");
    }
    (StatusCode::OK, Json(state.issue()))
}

async fn refresh(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Reply {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    let presented = body["refresh_token"].as_str().unwrap_or_default().to_string();
    let valid = state.refresh.lock().unwrap().clone();
    if valid.is_empty() || presented != valid {
        return detail(StatusCode::UNAUTHORIZED, "Invalid refresh token");
    }
    (StatusCode::OK, Json(state.issue()))
}

async fn logout(State(state): State<Arc<MockState>>) -> Reply {
    state.revoke_refresh();
    (StatusCode::OK, Json(json!({"message": "Logged out"})))
}

async fn me(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Reply {
    if let Err(reply) = state.authorize(&headers) {
        return reply;
    }
    (StatusCode::OK, Json(profile()))
}

async fn dashboard(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Reply {
    if let Err(reply) = state.authorize(&headers) {
        return reply;
    }
    (
        StatusCode::OK,
        Json(json!({
            "greeting": "Good morning, Asha",
            "month_label": "March 2025",
            "total_income": 85000.0,
            "total_spent": 12000.0,
            "total_saved": 5000.0,
            "remaining": 68000.0,
            "spend_percent": 14,
            "health_score": 3,
            "health_total": 6,
            "active_goal": null
        })),
    )
}

async fn add_expense(State(state): State<Arc<MockState>>, headers: HeaderMap, Json(body): Json<Value>) -> Reply {
    if let Err(reply) = state.authorize(&headers) {
        return reply;
    }
    if body["amount"].as_f64().unwrap_or_default() <= 0.0 {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"detail": [{
                "type": "greater_than",
                "loc": ["body", "amount"],
                "msg": "Input should be greater than 0"
            }]})),
        );
    }
    let mut expense = body.clone();
    expense["id"] = json!(Uuid::new_v4());
    expense["created_at"] = json!("2025-03-10T09:00:00Z");
    (StatusCode::CREATED, Json(expense))
}

async fn chat_history(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Reply {
    if let Err(reply) = state.authorize(&headers) {
        return reply;
    }
    let messages = state.history.lock().unwrap().clone();
    (StatusCode::OK, Json(json!({"messages": messages})))
}

async fn send_chat(State(state): State<Arc<MockState>>, headers: HeaderMap, Json(body): Json<Value>) -> Reply {
    if let Err(reply) = state.authorize(&headers) {
        return reply;
    }
    let content = body["content"].as_str().unwrap_or_default();
    let pair = vec![
        json!({"id": Uuid::new_v4(), "role": "user", "content": content, "created_at": "2025-03-10T09:00:00Z"}),
        json!({"id": Uuid::new_v4(), "role": "bot", "content": "Keep it under budget.", "created_at": "2025-03-10T09:00:01Z"}),
    ];
    state.history.lock().unwrap().extend(pair.iter().cloned());
    (StatusCode::CREATED, Json(Value::Array(pair)))
}

async fn clear_chat(State(state): State<Arc<MockState>>, headers: HeaderMap) -> StatusCode {
    if state.authorize(&headers).is_err() {
        return StatusCode::UNAUTHORIZED;
    }
    state.history.lock().unwrap().clear();
    StatusCode::NO_CONTENT
}
