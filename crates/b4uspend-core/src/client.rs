//! Typed client over the cache, the session guard and the endpoint catalog.

use crate::cache::{CacheKey, QueryCache, DEFAULT_KEEP_UNUSED_FOR};
use crate::catalog::{self, Operation, TagGraph};
use crate::credentials::CredentialStore;
use crate::dispatcher::{ApiRequest, Dispatcher, DispatcherConfig, HttpDispatcher};
use crate::error::ApiError;
use crate::guard::{SessionEvent, SessionGuard};
use crate::storage::{MemoryStorage, SessionStorage, SqliteStorage};
use crate::Result;
use b4uspend_types::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default number of chat messages fetched when a conversation opens.
pub const DEFAULT_CHAT_HISTORY_LIMIT: u32 = 50;
/// Default leaderboard size.
pub const DEFAULT_LEADERBOARD_LIMIT: u32 = 10;

/// Settings for [`FinanceClient::connect`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub api_prefix: String,
    pub request_timeout: Duration,
    /// SQLite file holding the persisted session.
    pub storage_path: PathBuf,
    /// Grace period before an unreferenced cache entry is dropped.
    pub keep_unused_for: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let dispatcher = DispatcherConfig::default();
        Self {
            api_base_url: dispatcher.base_url,
            api_prefix: dispatcher.prefix,
            request_timeout: dispatcher.timeout,
            storage_path: default_storage_path(),
            keep_unused_for: DEFAULT_KEEP_UNUSED_FOR,
        }
    }
}

/// `<data_local_dir>/b4uspend/session.db`, or the working directory when no
/// data directory is known.
pub fn default_storage_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("b4uspend")
        .join("session.db")
}

#[derive(Clone)]
pub struct FinanceClient {
    guard: SessionGuard,
    cache: QueryCache,
    graph: Arc<TagGraph>,
}

impl FinanceClient {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, credentials: CredentialStore, keep_unused_for: Duration) -> Self {
        let guard = SessionGuard::new(dispatcher, credentials);
        Self {
            cache: QueryCache::new(guard.clone(), keep_unused_for),
            guard,
            graph: Arc::new(TagGraph::standard()),
        }
    }

    /// Build the HTTP stack and rehydrate the persisted session.
    ///
    /// An unusable storage file degrades to an in-memory session.
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        let dispatcher = HttpDispatcher::new(&DispatcherConfig {
            base_url: config.api_base_url.clone(),
            prefix: config.api_prefix.clone(),
            timeout: config.request_timeout,
        })?;

        let storage: Arc<dyn SessionStorage> = match SqliteStorage::open(&config.storage_path) {
            Ok(storage) => Arc::new(storage),
            Err(e) => {
                warn!(
                    target: "b4uspend::storage",
                    "Cannot open {}: {}; session will not persist",
                    config.storage_path.display(),
                    e
                );
                Arc::new(MemoryStorage::new())
            }
        };

        let client = Self::new(
            Arc::new(dispatcher),
            CredentialStore::rehydrate(storage),
            config.keep_unused_for,
        );
        info!(
            target: "b4uspend::startup",
            "Client ready for {} (authenticated: {})",
            config.api_base_url,
            client.is_authenticated()
        );
        Ok(client)
    }

    pub fn session(&self) -> Session {
        self.guard.credentials().snapshot()
    }

    pub fn is_authenticated(&self) -> bool {
        self.guard.credentials().is_authenticated()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.guard.subscribe()
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn graph(&self) -> &TagGraph {
        &self.graph
    }

    // Cache plumbing

    async fn query<T: DeserializeOwned>(
        &self,
        op: &'static Operation,
        request: ApiRequest,
        args: Value,
        entity: Option<&str>,
    ) -> Result<T> {
        let key = CacheKey::new(op.name, &args);
        let value = self.cache.read(key, op.tags_for(entity), request).await?;
        decode(value)
    }

    async fn mutate<T: DeserializeOwned>(&self, op: &'static Operation, request: ApiRequest) -> Result<T> {
        let value = self.cache.write(request, &op.tags_for(None)).await?;
        debug!(
            target: "b4uspend::cache",
            "{} succeeded, stale reads: {:?}",
            op.name,
            self.graph.affected_reads(op.name)
        );
        decode(value)
    }

    async fn mutate_with<B, T>(&self, op: &'static Operation, params: &[&str], body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.mutate(op, op.request(params).json(body)?).await
    }

    // Auth

    /// Sign in and load the profile. Returns the new session.
    pub async fn login(&self, phone: &str, password: &str) -> Result<Session> {
        let body = LoginRequest {
            phone: phone.to_string(),
            password: password.to_string(),
        };
        let request = catalog::LOGIN.request(&[]).json(&body)?;
        let pair: TokenPair = decode(self.guard.execute(&request).await?)?;
        self.begin_session(&pair).await
    }

    pub async fn register(&self, body: &RegisterRequest) -> Result<Session> {
        let request = catalog::REGISTER.request(&[]).json(body)?;
        let pair: TokenPair = decode(self.guard.execute(&request).await?)?;
        self.begin_session(&pair).await
    }

    async fn begin_session(&self, pair: &TokenPair) -> Result<Session> {
        self.cache.reset();
        self.guard.establish(pair);
        // The tokens are valid even if the profile fetch fails
        if let Err(e) = self.get_me().await {
            warn!(target: "b4uspend::session", "Signed in but profile fetch failed: {}", e);
        }
        Ok(self.session())
    }

    /// Revoke the refresh token server-side (best effort), then clear the
    /// local session and cache.
    pub async fn logout(&self) {
        if let Some(refresh_token) = self.guard.credentials().refresh_token() {
            match catalog::LOGOUT.request(&[]).json(&RefreshRequest { refresh_token }) {
                Ok(request) => {
                    if let Err(e) = self.guard.execute(&request).await {
                        debug!(target: "b4uspend::session", "Server-side logout failed: {}", e);
                    }
                }
                Err(e) => debug!(target: "b4uspend::session", "Cannot encode logout request: {}", e),
            }
        }
        self.guard.sign_out();
        self.cache.reset();
    }

    // Profile

    pub async fn get_me(&self) -> Result<UserProfile> {
        let op = &catalog::GET_ME;
        let profile: UserProfile = self.query(op, op.request(&[]), Value::Null, None).await?;
        self.guard.update_profile(profile.clone());
        Ok(profile)
    }

    async fn update_profile_with<B: Serialize + ?Sized>(&self, op: &'static Operation, body: Option<&B>) -> Result<UserProfile> {
        let profile: UserProfile = match body {
            Some(body) => self.mutate_with(op, &[], body).await?,
            None => self.mutate(op, op.request(&[])).await?,
        };
        self.guard.update_profile(profile.clone());
        Ok(profile)
    }

    pub async fn update_user(&self, update: &UserUpdate) -> Result<UserProfile> {
        self.update_profile_with(&catalog::UPDATE_USER, Some(update)).await
    }

    pub async fn update_income(&self, update: &IncomeUpdate) -> Result<UserProfile> {
        self.update_profile_with(&catalog::UPDATE_INCOME, Some(update)).await
    }

    pub async fn update_fixed_expenses(&self, update: &FixedExpensesUpdate) -> Result<UserProfile> {
        self.update_profile_with(&catalog::UPDATE_FIXED_EXPENSES, Some(update)).await
    }

    pub async fn update_dependents(&self, update: &DependentUpdate) -> Result<UserProfile> {
        self.update_profile_with(&catalog::UPDATE_DEPENDENTS, Some(update)).await
    }

    pub async fn complete_onboarding(&self) -> Result<UserProfile> {
        self.update_profile_with::<Value>(&catalog::COMPLETE_ONBOARDING, None).await
    }

    pub async fn dashboard(&self) -> Result<Dashboard> {
        let op = &catalog::GET_DASHBOARD;
        self.query(op, op.request(&[]), Value::Null, None).await
    }

    // Expenses

    pub async fn list_expenses(&self, query: &ExpenseQuery) -> Result<ExpenseList> {
        let op = &catalog::LIST_EXPENSES;
        let request = op
            .request(&[])
            .query("month", query.month)
            .query("year", query.year)
            .query("page", query.page)
            .query("page_size", query.page_size);
        self.query(op, request, serde_json::to_value(query)?, None).await
    }

    pub async fn expense_breakdown(&self, month: MonthRef) -> Result<MonthlySummary> {
        self.month_summary(&catalog::EXPENSE_BREAKDOWN, month).await
    }

    pub async fn monthly_summary(&self, month: MonthRef) -> Result<MonthlySummary> {
        self.month_summary(&catalog::MONTHLY_SUMMARY, month).await
    }

    async fn month_summary(&self, op: &'static Operation, month: MonthRef) -> Result<MonthlySummary> {
        let request = op
            .request(&[])
            .query("month", month.month)
            .query("year", month.year);
        self.query(op, request, serde_json::to_value(month)?, None).await
    }

    pub async fn add_expense(&self, expense: &ExpenseCreate) -> Result<Expense> {
        self.mutate_with(&catalog::ADD_EXPENSE, &[], expense).await
    }

    pub async fn update_expense(&self, id: Uuid, update: &ExpenseUpdate) -> Result<Expense> {
        self.mutate_with(&catalog::UPDATE_EXPENSE, &[id.to_string().as_str()], update).await
    }

    pub async fn delete_expense(&self, id: Uuid) -> Result<()> {
        let op = &catalog::DELETE_EXPENSE;
        self.mutate(op, op.request(&[id.to_string().as_str()])).await
    }

    // Budget

    /// `None` when no budget exists for the current month.
    pub async fn current_budget(&self) -> Result<Option<Budget>> {
        let op = &catalog::CURRENT_BUDGET;
        self.query(op, op.request(&[]), Value::Null, None).await
    }

    pub async fn create_budget(&self, budget: &BudgetCreate) -> Result<Budget> {
        self.mutate_with(&catalog::CREATE_BUDGET, &[], budget).await
    }

    pub async fn update_budget_categories(&self, id: Uuid, update: &BudgetCategoriesUpdate) -> Result<Budget> {
        self.mutate_with(&catalog::UPDATE_BUDGET_CATEGORIES, &[id.to_string().as_str()], update)
            .await
    }

    // Goals

    pub async fn list_goals(&self) -> Result<Vec<Goal>> {
        let op = &catalog::LIST_GOALS;
        self.query(op, op.request(&[]), Value::Null, None).await
    }

    pub async fn goal_detail(&self, id: Uuid) -> Result<GoalDetail> {
        let op = &catalog::GOAL_DETAIL;
        let id = id.to_string();
        self.query(op, op.request(&[id.as_str()]), json!(id), Some(id.as_str())).await
    }

    pub async fn create_goal(&self, goal: &GoalCreate) -> Result<Goal> {
        self.mutate_with(&catalog::CREATE_GOAL, &[], goal).await
    }

    pub async fn update_goal(&self, id: Uuid, update: &GoalUpdate) -> Result<Goal> {
        self.mutate_with(&catalog::UPDATE_GOAL, &[id.to_string().as_str()], update).await
    }

    pub async fn delete_goal(&self, id: Uuid) -> Result<()> {
        let op = &catalog::DELETE_GOAL;
        self.mutate(op, op.request(&[id.to_string().as_str()])).await
    }

    pub async fn add_contribution(&self, goal_id: Uuid, contribution: &ContributionCreate) -> Result<Contribution> {
        self.mutate_with(&catalog::ADD_CONTRIBUTION, &[goal_id.to_string().as_str()], contribution)
            .await
    }

    // Checklist

    pub async fn checklist(&self) -> Result<ChecklistScore> {
        let op = &catalog::CHECKLIST;
        self.query(op, op.request(&[]), Value::Null, None).await
    }

    pub async fn checklist_item(&self, item: ChecklistItemType) -> Result<ChecklistItem> {
        let op = &catalog::CHECKLIST_ITEM;
        let id = item.as_str();
        self.query(op, op.request(&[id]), json!(id), Some(id)).await
    }

    pub async fn update_checklist_item(
        &self,
        item: ChecklistItemType,
        update: &ChecklistItemUpdate,
    ) -> Result<ChecklistItem> {
        self.mutate_with(&catalog::UPDATE_CHECKLIST_ITEM, &[item.as_str()], update)
            .await
    }

    // Challenges

    pub async fn available_challenges(&self) -> Result<ChallengeList> {
        let op = &catalog::AVAILABLE_CHALLENGES;
        self.query(op, op.request(&[]), Value::Null, None).await
    }

    pub async fn join_challenge(&self, challenge_id: Uuid) -> Result<UserChallenge> {
        self.mutate_with(&catalog::JOIN_CHALLENGE, &[], &JoinChallengeRequest { challenge_id })
            .await
    }

    pub async fn my_challenges(&self, status: Option<ChallengeStatus>) -> Result<UserChallengeList> {
        let op = &catalog::MY_CHALLENGES;
        let mut request = op.request(&[]);
        if let Some(status) = status {
            request = request.query("status", status.as_str());
        }
        let args = json!(status.map(|s| s.as_str()));
        self.query(op, request, args, None).await
    }

    pub async fn my_challenge_detail(&self, id: Uuid) -> Result<UserChallenge> {
        let op = &catalog::MY_CHALLENGE_DETAIL;
        let id = id.to_string();
        self.query(op, op.request(&[id.as_str()]), json!(id), Some(id.as_str())).await
    }

    pub async fn my_progress(&self) -> Result<UserProgress> {
        let op = &catalog::MY_PROGRESS;
        self.query(op, op.request(&[]), Value::Null, None).await
    }

    pub async fn leaderboard(&self, challenge_id: Uuid, limit: u32) -> Result<Leaderboard> {
        let op = &catalog::LEADERBOARD;
        let id = challenge_id.to_string();
        let request = op.request(&[id.as_str()]).query("limit", limit);
        self.query(op, request, json!({"challenge_id": id, "limit": limit}), None)
            .await
    }

    pub async fn abandon_challenge(&self, id: Uuid) -> Result<()> {
        let op = &catalog::ABANDON_CHALLENGE;
        self.mutate(op, op.request(&[id.to_string().as_str()])).await
    }

    pub async fn check_nudge(&self, check: &NudgeCheckRequest) -> Result<NudgeCheckResponse> {
        self.mutate_with(&catalog::CHECK_NUDGE, &[], check).await
    }

    // Chat

    pub async fn chat_history(&self, limit: u32) -> Result<ChatHistory> {
        let op = &catalog::CHAT_HISTORY;
        let request = op.request(&[]).query("limit", limit);
        self.query(op, request, json!({"limit": limit}), None).await
    }

    /// Send one message. The server answers with the stored user message and
    /// the bot reply, in that order.
    pub async fn send_chat(&self, content: &str) -> Result<Vec<ChatMessage>> {
        let body = ChatSendRequest {
            content: content.to_string(),
        };
        self.mutate_with(&catalog::SEND_CHAT, &[], &body).await
    }

    pub async fn clear_chat(&self) -> Result<()> {
        let op = &catalog::CLEAR_CHAT;
        self.mutate(op, op.request(&[])).await
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(ApiError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::HttpMethod;
    use crate::storage::MemoryStorage;
    use crate::test_support::{sample_profile, FakeBackend};
    use chrono::Utc;

    fn client_with(backend: &Arc<FakeBackend>, storage: Arc<MemoryStorage>) -> FinanceClient {
        FinanceClient::new(
            backend.clone(),
            CredentialStore::rehydrate(storage),
            DEFAULT_KEEP_UNUSED_FOR,
        )
    }

    fn signed_in(backend: &Arc<FakeBackend>) -> FinanceClient {
        let storage = Arc::new(MemoryStorage::new());
        let client = client_with(backend, storage);
        client.guard.establish(&backend.issue_tokens());
        client
    }

    fn route_login(backend: &Arc<FakeBackend>) {
        let tokens = Arc::clone(backend);
        backend.route_fn(None, "/auth/login", move |request| {
            let body = request.body.clone().unwrap_or_default();
            if body["password"] != "secret123" {
                return Err(ApiError::unauthorized("Invalid phone or password"));
            }
            Ok(serde_json::to_value(tokens.issue_tokens()).unwrap())
        });
        backend.route_ok("/users/me", serde_json::to_value(sample_profile()).unwrap());
    }

    #[tokio::test]
    async fn test_login_loads_profile_and_persists() {
        let backend = FakeBackend::new();
        route_login(&backend);
        let storage = Arc::new(MemoryStorage::new());
        let client = client_with(&backend, storage.clone());
        let mut events = client.subscribe();

        let session = client.login("9876543210", "secret123").await.unwrap();
        assert!(session.is_authenticated());
        assert_eq!(session.user, Some(sample_profile()));
        assert!(session.onboarding_complete());
        assert_eq!(events.try_recv().unwrap(), SessionEvent::SignedIn);
        assert_eq!(events.try_recv().unwrap(), SessionEvent::ProfileUpdated);

        let reloaded = CredentialStore::rehydrate(storage);
        assert_eq!(reloaded.user(), Some(sample_profile()));
        assert_eq!(reloaded.access_token(), session.access_token);
    }

    #[tokio::test]
    async fn test_bad_login_is_plain_failure() {
        let backend = FakeBackend::new();
        route_login(&backend);
        let client = client_with(&backend, Arc::new(MemoryStorage::new()));

        let err = client.login("9876543210", "nope").await.unwrap_err();
        assert_eq!(err.detail(), Some("Invalid phone or password"));
        assert!(!client.is_authenticated());
        assert_eq!(backend.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_login_survives_profile_failure() {
        let backend = FakeBackend::new();
        route_login(&backend);
        backend.route_err("/users/me", ApiError::status(500, None));
        let client = client_with(&backend, Arc::new(MemoryStorage::new()));

        let session = client.login("9876543210", "secret123").await.unwrap();
        assert!(session.is_authenticated());
        assert!(session.user.is_none());
    }

    #[tokio::test]
    async fn test_logout_revokes_and_clears() {
        let backend = FakeBackend::new();
        backend.route_ok("/auth/logout", json!({"message": "Logged out"}));
        backend.route_ok("/goals", json!([]));
        let storage = Arc::new(MemoryStorage::new());
        let client = client_with(&backend, storage.clone());
        client.guard.establish(&backend.issue_tokens());
        client.list_goals().await.unwrap();

        client.logout().await;
        assert!(!client.is_authenticated());
        assert!(client.cache().is_empty());
        let logout_call = backend.calls().into_iter().find(|c| c.path == "/auth/logout").unwrap();
        assert_eq!(logout_call.token, None);
        assert_eq!(logout_call.body.unwrap()["refresh_token"], "refresh-1");
        assert_eq!(CredentialStore::rehydrate(storage).snapshot(), Session::anonymous());
    }

    #[tokio::test]
    async fn test_logout_clears_even_when_server_unreachable() {
        let backend = FakeBackend::new();
        backend.route_err("/auth/logout", ApiError::Transport("offline".to_string()));
        let client = signed_in(&backend);

        client.logout().await;
        assert!(!client.is_authenticated());
    }

    #[tokio::test]
    async fn test_add_expense_refreshes_dashboard_and_budget() {
        let backend = FakeBackend::new();
        backend.route_ok(
            "/dashboard",
            json!({
                "greeting": "Hi", "month_label": "March 2025", "total_income": 85000.0,
                "total_spent": 100.0, "total_saved": 0.0, "remaining": 84900.0,
                "spend_percent": 0, "health_score": 2, "health_total": 6
            }),
        );
        backend.route_ok("/budgets/current", Value::Null);
        backend.route_ok("/goals", json!([]));
        let created = json!({
            "id": Uuid::from_u128(7), "amount": 250.0, "category": "GROCERIES",
            "date": "2025-03-10", "created_at": Utc::now()
        });
        backend.route_method(HttpMethod::Post, "/expenses", created);
        let client = signed_in(&backend);

        client.dashboard().await.unwrap();
        assert_eq!(client.current_budget().await.unwrap(), None);
        client.list_goals().await.unwrap();

        let expense = client
            .add_expense(&ExpenseCreate {
                amount: 250.0,
                category: ExpenseCategory::Groceries,
                description: None,
                date: chrono::NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            })
            .await
            .unwrap();
        assert_eq!(expense.id, Uuid::from_u128(7));

        client.dashboard().await.unwrap();
        client.current_budget().await.unwrap();
        client.list_goals().await.unwrap();
        assert_eq!(backend.calls_to("/dashboard"), 2);
        assert_eq!(backend.calls_to("/budgets/current"), 2);
        assert_eq!(backend.calls_to("/goals"), 1);
    }

    #[tokio::test]
    async fn test_list_expenses_sends_query() {
        let backend = FakeBackend::new();
        backend.route_ok("/expenses", json!({"items": [], "total": 0, "page": 1, "page_size": 20}));
        let client = signed_in(&backend);

        let list = client.list_expenses(&ExpenseQuery::month(3, 2025)).await.unwrap();
        assert_eq!(list.total, 0);
        // Same query is cached, a different month is not
        client.list_expenses(&ExpenseQuery::month(3, 2025)).await.unwrap();
        client.list_expenses(&ExpenseQuery::month(4, 2025)).await.unwrap();
        assert_eq!(backend.calls_to("/expenses"), 2);
    }

    #[tokio::test]
    async fn test_delete_accepts_empty_body() {
        let backend = FakeBackend::new();
        backend.route_method(HttpMethod::Delete, "/chat/history", Value::Null);
        let client = signed_in(&backend);
        client.clear_chat().await.unwrap();
    }

    #[tokio::test]
    async fn test_profile_write_updates_session() {
        let backend = FakeBackend::new();
        let mut updated = sample_profile();
        updated.city = Some("Mumbai".to_string());
        backend.route_ok("/users/me", serde_json::to_value(&updated).unwrap());
        let client = signed_in(&backend);

        let update = UserUpdate {
            city: Some("Mumbai".to_string()),
            ..Default::default()
        };
        let profile = client.update_user(&update).await.unwrap();
        assert_eq!(profile.city.as_deref(), Some("Mumbai"));
        assert_eq!(client.session().user, Some(updated));
        let call = backend.calls().pop().unwrap();
        assert_eq!(call.method, HttpMethod::Patch);
        assert_eq!(call.body.unwrap(), json!({"city": "Mumbai"}));
    }

    #[tokio::test]
    async fn test_decode_failure_is_reported() {
        let backend = FakeBackend::new();
        backend.route_ok("/goals", json!({"unexpected": true}));
        let client = signed_in(&backend);

        assert!(matches!(client.list_goals().await, Err(ApiError::Decode(_))));
    }
}
