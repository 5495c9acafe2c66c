//! Session guard: retry-once-on-401 with a single shared token renewal.
//!
//! A call that fails with 401 while a refresh token is held joins (or starts)
//! the one outstanding renewal, then replays the original request exactly
//! once with the renewed access token. A failed renewal, or a 401 without a
//! refresh token, terminates the session.
//!
//! The renewal future commits the new credentials (or clears the session)
//! before it resolves and before the pending slot is emptied. Callers decide
//! between "join", "start" and "already renewed" while holding the slot lock,
//! so a 401 produced by a token that has since been replaced never starts a
//! second renewal.

use crate::credentials::CredentialStore;
use crate::dispatcher::{ApiRequest, AuthMode, Dispatcher};
use crate::error::ApiError;
use b4uspend_types::{RefreshRequest, TokenPair, UserProfile};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub const REFRESH_PATH: &str = "/auth/refresh";

type RenewalFuture = Shared<BoxFuture<'static, Result<TokenPair, ApiError>>>;

/// Why the session was forcibly ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// A request was rejected and no refresh token was held.
    NoRefreshToken,
    /// The refresh endpoint rejected the refresh token or was unreachable.
    RenewalFailed(String),
}

/// Session transitions, broadcast to collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    Renewed,
    ProfileUpdated,
    SignedOut,
    /// Forced logout. Collaborators must route to their unauthenticated entry point.
    Terminated { reason: TerminationReason },
}

#[derive(Clone)]
pub struct SessionGuard {
    inner: Arc<GuardInner>,
}

struct GuardInner {
    dispatcher: Arc<dyn Dispatcher>,
    credentials: CredentialStore,
    pending: Mutex<Option<RenewalFuture>>,
    /// Bumped by every sign-in, sign-out and termination. A renewal started
    /// in an older epoch must not resurrect credentials.
    epoch: AtomicU64,
    events: broadcast::Sender<SessionEvent>,
}

/// Outcome of the decision taken under the slot lock.
enum Renewal {
    /// Credentials already moved on; retry with this token.
    Current(String),
    Await(RenewalFuture),
    Unavailable,
}

impl SessionGuard {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, credentials: CredentialStore) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(GuardInner {
                dispatcher,
                credentials,
                pending: Mutex::new(None),
                epoch: AtomicU64::new(0),
                events,
            }),
        }
    }

    /// Subscribe to session transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.inner.credentials
    }

    /// Whether a renewal is currently outstanding.
    pub fn renewal_pending(&self) -> bool {
        self.inner.slot().is_some()
    }

    /// Perform one call, renewing the session at most once on 401.
    pub async fn execute(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        if request.auth == AuthMode::Public {
            return self.inner.dispatcher.send(request, None).await;
        }

        let token = self.inner.credentials.access_token();
        let original = match self.inner.dispatcher.send(request, token.as_deref()).await {
            Err(err) if err.is_unauthorized() => err,
            other => return other,
        };

        debug!(target: "b4uspend::guard", "{} rejected with 401", request.describe());
        let renewed = match self.inner.renewal_for(token.as_deref()) {
            Renewal::Current(token) => Some(token),
            Renewal::Await(renewal) => renewal.await.ok().map(|pair| pair.access_token),
            Renewal::Unavailable => None,
        };

        match renewed {
            Some(token) => {
                debug!(target: "b4uspend::guard", "Replaying {} with renewed token", request.describe());
                self.inner.dispatcher.send(request, Some(&token)).await
            }
            None => Err(original),
        }
    }

    /// Install credentials obtained by login or registration.
    pub fn establish(&self, pair: &TokenPair) {
        {
            let mut slot = self.inner.slot();
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            *slot = None;
            self.inner.credentials.set_credentials(pair);
        }
        info!(target: "b4uspend::session", "Signed in");
        self.inner.emit(SessionEvent::SignedIn);
    }

    /// Record a freshly fetched profile.
    pub fn update_profile(&self, user: UserProfile) {
        if self.inner.credentials.user().as_ref() == Some(&user) {
            return;
        }
        self.inner.credentials.set_user(user);
        self.inner.emit(SessionEvent::ProfileUpdated);
    }

    /// User-initiated logout.
    pub fn sign_out(&self) {
        {
            let mut slot = self.inner.slot();
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            *slot = None;
            self.inner.credentials.logout();
        }
        info!(target: "b4uspend::session", "Signed out");
        self.inner.emit(SessionEvent::SignedOut);
    }
}

impl GuardInner {
    fn slot(&self) -> MutexGuard<'_, Option<RenewalFuture>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn renewal_for(self: &Arc<Self>, stale_token: Option<&str>) -> Renewal {
        let mut slot = self.slot();

        if let Some(renewal) = slot.as_ref() {
            debug!(target: "b4uspend::guard", "Joining in-flight renewal");
            return Renewal::Await(renewal.clone());
        }

        if let Some(current) = self.credentials.access_token() {
            if Some(current.as_str()) != stale_token {
                debug!(target: "b4uspend::guard", "Token already renewed, skipping renewal");
                return Renewal::Current(current);
            }
        }

        let Some(refresh_token) = self.credentials.refresh_token() else {
            drop(slot);
            self.terminate(TerminationReason::NoRefreshToken);
            return Renewal::Unavailable;
        };

        info!(target: "b4uspend::guard", "Access token rejected, renewing session");
        let epoch = self.epoch.load(Ordering::SeqCst);
        let inner = Arc::clone(self);
        let renewal = async move { inner.renew(refresh_token, epoch).await }
            .boxed()
            .shared();
        *slot = Some(renewal.clone());
        Renewal::Await(renewal)
    }

    async fn renew(self: Arc<Self>, refresh_token: String, epoch: u64) -> Result<TokenPair, ApiError> {
        let outcome = match ApiRequest::post(REFRESH_PATH).public().json(&RefreshRequest { refresh_token }) {
            Ok(request) => self
                .dispatcher
                .send(&request, None)
                .await
                .and_then(|value| serde_json::from_value::<TokenPair>(value).map_err(ApiError::from)),
            Err(e) => Err(e),
        };

        // Check and commit under the slot lock; sign-in and sign-out take it too.
        let mut slot = self.slot();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            // Signed out or in again meanwhile; the slot already belongs to the new session.
            debug!(target: "b4uspend::guard", "Discarding renewal from a previous session");
            return Err(ApiError::SessionEnded);
        }
        *slot = None;

        match &outcome {
            Ok(pair) => {
                self.credentials.set_credentials(pair);
                drop(slot);
                info!(target: "b4uspend::guard", "Session renewed");
                self.emit(SessionEvent::Renewed);
            }
            Err(e) => {
                warn!(target: "b4uspend::guard", "Session renewal failed: {}", e);
                self.terminate(TerminationReason::RenewalFailed(e.to_string()));
                drop(slot);
            }
        }
        outcome
    }

    fn terminate(&self, reason: TerminationReason) {
        let snapshot = self.credentials.snapshot();
        if snapshot.access_token.is_none() && snapshot.refresh_token.is_none() && snapshot.user.is_none() {
            debug!(target: "b4uspend::guard", "Session already cleared");
            return;
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.credentials.logout();
        warn!(target: "b4uspend::session", "Session terminated: {:?}", reason);
        self.emit(SessionEvent::Terminated { reason });
    }
}
