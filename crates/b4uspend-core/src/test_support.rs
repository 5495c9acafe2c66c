//! In-process backend double for unit tests.

use crate::dispatcher::{ApiRequest, AuthMode, Dispatcher, HttpMethod};
use crate::error::ApiError;
use crate::guard::REFRESH_PATH;
use async_trait::async_trait;
use b4uspend_types::{TokenPair, UserProfile};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub(crate) fn sample_profile() -> UserProfile {
    UserProfile {
        id: Uuid::from_u128(0x5eed),
        phone: "9876543210".to_string(),
        name: "Asha".to_string(),
        age: Some(29),
        city: Some("Pune".to_string()),
        monthly_salary: Some(85_000.0),
        other_income: 0.0,
        dependent_type: None,
        onboarding_complete: true,
        fixed_expenses: Vec::new(),
        created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
    }
}

type Handler = Arc<dyn Fn(&ApiRequest) -> Result<Value, ApiError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordedCall {
    pub method: HttpMethod,
    pub path: String,
    pub token: Option<String>,
    pub body: Option<Value>,
}

#[derive(Default)]
struct State {
    valid_access: Option<String>,
    valid_refresh: Option<String>,
    issued: u64,
    refresh_calls: usize,
    calls: Vec<RecordedCall>,
    routes: HashMap<(Option<HttpMethod>, String), Handler>,
}

impl State {
    fn issue(&mut self) -> TokenPair {
        self.issued += 1;
        let pair = TokenPair::new(
            format!("access-{}", self.issued),
            format!("refresh-{}", self.issued),
        );
        self.valid_access = Some(pair.access_token.clone());
        self.valid_refresh = Some(pair.refresh_token.clone());
        pair
    }
}

/// Token-checking fake of the REST backend.
///
/// Bearer calls with anything but the current access token get 401.
/// `POST /auth/refresh` rotates both tokens. Unrouted paths get 404.
pub(crate) struct FakeBackend {
    state: Mutex<State>,
    latency: Duration,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Self::with_latency(Duration::ZERO)
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            latency,
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Issue a fresh, valid token pair.
    pub fn issue_tokens(&self) -> TokenPair {
        self.state().issue()
    }

    /// Reject the current access token from now on.
    pub fn expire_access_token(&self) {
        self.state().valid_access = Some("expired".to_string());
    }

    pub fn revoke_refresh_token(&self) {
        self.state().valid_refresh = None;
    }

    pub fn route_ok(&self, path: &str, value: Value) {
        self.route_fn(None, path, move |_| Ok(value.clone()));
    }

    pub fn route_err(&self, path: &str, err: ApiError) {
        self.route_fn(None, path, move |_| Err(err.clone()));
    }

    pub fn route_method(&self, method: HttpMethod, path: &str, value: Value) {
        self.route_fn(Some(method), path, move |_| Ok(value.clone()));
    }

    pub fn route_fn<F>(&self, method: Option<HttpMethod>, path: &str, handler: F)
    where
        F: Fn(&ApiRequest) -> Result<Value, ApiError> + Send + Sync + 'static,
    {
        self.state()
            .routes
            .insert((method, path.to_string()), Arc::new(handler));
    }

    pub fn refresh_calls(&self) -> usize {
        self.state().refresh_calls
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state().calls.clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.state().calls.iter().filter(|c| c.path == path).count()
    }

    pub fn calls_with(&self, method: HttpMethod, path: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .count()
    }

    fn refresh(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        let mut state = self.state();
        state.refresh_calls += 1;
        let presented = request
            .body
            .as_ref()
            .and_then(|b| b.get("refresh_token"))
            .and_then(Value::as_str);
        if presented.is_none() || presented != state.valid_refresh.as_deref() {
            return Err(ApiError::unauthorized("Invalid refresh token"));
        }
        let pair = state.issue();
        Ok(json!({
            "access_token": pair.access_token,
            "refresh_token": pair.refresh_token,
            "token_type": "bearer",
        }))
    }
}

#[async_trait]
impl Dispatcher for FakeBackend {
    async fn send(&self, request: &ApiRequest, access_token: Option<&str>) -> Result<Value, ApiError> {
        self.state().calls.push(RecordedCall {
            method: request.method,
            path: request.path.clone(),
            token: access_token.map(str::to_string),
            body: request.body.clone(),
        });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if request.path == REFRESH_PATH {
            return self.refresh(request);
        }

        let handler = {
            let state = self.state();
            if request.auth == AuthMode::Bearer
                && (access_token.is_none() || access_token != state.valid_access.as_deref())
            {
                return Err(ApiError::unauthorized("Could not validate credentials"));
            }
            state
                .routes
                .get(&(Some(request.method), request.path.clone()))
                .or_else(|| state.routes.get(&(None, request.path.clone())))
                .cloned()
        };

        match handler {
            Some(handler) => handler(request),
            None => Err(ApiError::status(404, Some("Not Found".to_string()))),
        }
    }
}
