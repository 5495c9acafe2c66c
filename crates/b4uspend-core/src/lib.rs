//! Session-aware data-access layer for the B4USpend API.
//!
//! Layers, innermost first: [`Dispatcher`] performs one HTTP call,
//! [`SessionGuard`] renews the session on 401 and replays once,
//! [`QueryCache`] deduplicates reads and applies tag invalidation,
//! [`FinanceClient`] exposes typed endpoints, and [`ChatSession`] adds
//! optimistic chat on top.

pub mod cache;
pub mod catalog;
pub mod chat;
pub mod client;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod guard;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;

pub use cache::{CacheEvent, CacheKey, QueryCache, QueryState, Subscription};
pub use catalog::{Operation, OperationKind, TagGraph};
pub use chat::{ChatSession, Conversation, PendingSend, FAILURE_NOTICE, MAX_MESSAGE_CHARS};
pub use client::{ClientConfig, FinanceClient, DEFAULT_CHAT_HISTORY_LIMIT, DEFAULT_LEADERBOARD_LIMIT};
pub use credentials::CredentialStore;
pub use dispatcher::{ApiRequest, AuthMode, Dispatcher, DispatcherConfig, HttpDispatcher, HttpMethod};
pub use error::{ApiError, StorageError};
pub use guard::{SessionEvent, SessionGuard, TerminationReason};
pub use storage::{MemoryStorage, SessionStorage, SqliteStorage};

pub type Result<T> = std::result::Result<T, ApiError>;
