//! Credential store: the single owner of the session.
//!
//! Every mutation is written through to durable storage. Storage failures are
//! logged and swallowed; the in-memory session stays authoritative for the
//! lifetime of the process.

use crate::storage::SessionStorage;
use b4uspend_types::{Session, TokenPair, UserProfile};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const USER_KEY: &str = "user";

#[derive(Clone)]
pub struct CredentialStore {
    session: Arc<RwLock<Session>>,
    storage: Arc<dyn SessionStorage>,
}

impl CredentialStore {
    /// Rebuild the session from storage. Missing or unreadable entries yield
    /// an unauthenticated session.
    pub fn rehydrate(storage: Arc<dyn SessionStorage>) -> Self {
        let session = load_session(storage.as_ref());
        debug!(target: "b4uspend::session", "Rehydrated session: {:?}", session);
        Self {
            session: Arc::new(RwLock::new(session)),
            storage,
        }
    }

    /// Replace both tokens.
    pub fn set_credentials(&self, pair: &TokenPair) {
        self.write().apply_tokens(pair);
        self.persist(ACCESS_TOKEN_KEY, &pair.access_token);
        self.persist(REFRESH_TOKEN_KEY, &pair.refresh_token);
    }

    /// Replace the cached profile.
    pub fn set_user(&self, user: UserProfile) {
        let encoded = serde_json::to_string(&user);
        self.write().user = Some(user);
        match encoded {
            Ok(json) => self.persist(USER_KEY, &json),
            Err(e) => warn!(target: "b4uspend::storage", "Failed to encode profile: {}", e),
        }
    }

    /// Clear tokens and profile, in memory and in storage.
    pub fn logout(&self) {
        self.write().clear();
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY] {
            if let Err(e) = self.storage.remove(key) {
                warn!(target: "b4uspend::storage", "Failed to remove {}: {}", key, e);
            }
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.read().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read().refresh_token.clone()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.read().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().is_authenticated()
    }

    pub fn snapshot(&self) -> Session {
        self.read().clone()
    }

    fn persist(&self, key: &str, value: &str) {
        if let Err(e) = self.storage.set(key, value) {
            warn!(target: "b4uspend::storage", "Failed to persist {}: {}", key, e);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Session> {
        self.session.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Session> {
        self.session.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn load_session(storage: &dyn SessionStorage) -> Session {
    let read_all = || -> Result<Session, String> {
        let access_token = storage.get(ACCESS_TOKEN_KEY).map_err(|e| e.to_string())?;
        let refresh_token = storage.get(REFRESH_TOKEN_KEY).map_err(|e| e.to_string())?;
        let user = match storage.get(USER_KEY).map_err(|e| e.to_string())? {
            Some(json) => serde_json::from_str::<Option<UserProfile>>(&json)
                .map_err(|e| format!("corrupt profile entry: {}", e))?,
            None => None,
        };
        Ok(Session {
            access_token,
            refresh_token,
            user,
        })
    };

    read_all().unwrap_or_else(|e| {
        warn!(target: "b4uspend::storage", "Discarding stored session: {}", e);
        Session::anonymous()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, SqliteStorage};
    use crate::test_support::sample_profile;
    use tempfile::TempDir;

    #[test]
    fn test_empty_storage_is_anonymous() {
        let store = CredentialStore::rehydrate(Arc::new(MemoryStorage::new()));
        assert_eq!(store.snapshot(), Session::anonymous());
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_set_credentials_persists() {
        let storage = Arc::new(MemoryStorage::new());
        let store = CredentialStore::rehydrate(storage.clone());
        store.set_credentials(&TokenPair::new("a1", "r1"));

        assert_eq!(store.access_token().as_deref(), Some("a1"));
        assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("a1"));
        assert_eq!(storage.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("r1"));

        let reloaded = CredentialStore::rehydrate(storage);
        assert_eq!(reloaded.refresh_token().as_deref(), Some("r1"));
    }

    #[test]
    fn test_logout_clears_and_rehydrates_anonymous() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.db");

        let store = CredentialStore::rehydrate(Arc::new(SqliteStorage::open(&path).unwrap()));
        store.set_credentials(&TokenPair::new("a1", "r1"));
        store.set_user(sample_profile());
        assert!(store.user().is_some());

        store.logout();
        assert_eq!(store.snapshot(), Session::anonymous());
        drop(store);

        let reloaded = CredentialStore::rehydrate(Arc::new(SqliteStorage::open(&path).unwrap()));
        assert_eq!(reloaded.snapshot(), Session::anonymous());
    }

    #[test]
    fn test_profile_round_trips_through_storage() {
        let storage = Arc::new(MemoryStorage::new());
        let store = CredentialStore::rehydrate(storage.clone());
        store.set_credentials(&TokenPair::new("a1", "r1"));
        store.set_user(sample_profile());

        let reloaded = CredentialStore::rehydrate(storage);
        assert_eq!(reloaded.user(), Some(sample_profile()));
    }

    #[test]
    fn test_corrupt_profile_degrades_to_anonymous() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(ACCESS_TOKEN_KEY, "a1").unwrap();
        storage.set(REFRESH_TOKEN_KEY, "r1").unwrap();
        storage.set(USER_KEY, "{not json").unwrap();

        let store = CredentialStore::rehydrate(storage);
        assert_eq!(store.snapshot(), Session::anonymous());
    }

    #[test]
    fn test_null_profile_entry_is_accepted() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(ACCESS_TOKEN_KEY, "a1").unwrap();
        storage.set(USER_KEY, "null").unwrap();

        let store = CredentialStore::rehydrate(storage);
        assert!(store.is_authenticated());
        assert!(store.user().is_none());
    }

    #[test]
    fn test_unavailable_storage_is_swallowed() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_failing(true);

        let store = CredentialStore::rehydrate(storage.clone());
        assert!(!store.is_authenticated());

        // In-memory state stays authoritative
        store.set_credentials(&TokenPair::new("a1", "r1"));
        assert_eq!(store.access_token().as_deref(), Some("a1"));
        store.logout();
        assert!(!store.is_authenticated());

        storage.set_failing(false);
        assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap(), None);
    }
}
