//! Query cache with tag-based invalidation.
//!
//! Entries are keyed by operation name and serialized arguments. A read
//! returns the cached value while it is fresh, otherwise it joins or starts
//! the single in-flight call for that key. A successful write marks every
//! entry whose provided tags overlap the write's tags as stale; stale entries
//! keep their data until the next read replaces it. A read that starts after
//! such a write never joins a call that was already in flight before it.

use crate::dispatcher::ApiRequest;
use crate::error::ApiError;
use crate::guard::SessionGuard;
use b4uspend_types::Tag;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, trace};

pub const DEFAULT_KEEP_UNUSED_FOR: Duration = Duration::from_secs(60);

type Flight = Shared<BoxFuture<'static, Result<Value, ApiError>>>;

static NEXT_FLIGHT: AtomicU64 = AtomicU64::new(1);

/// Identity of a cached read: operation name plus canonical JSON arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub operation: &'static str,
    pub args: String,
}

impl CacheKey {
    pub fn new(operation: &'static str, args: &Value) -> Self {
        Self {
            operation,
            args: args.to_string(),
        }
    }

    /// Key for a read without arguments.
    pub fn bare(operation: &'static str) -> Self {
        Self::new(operation, &Value::Null)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.operation, self.args)
    }
}

/// Broadcast to consumers that should re-read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Invalidated { keys: Vec<CacheKey> },
    Reset,
}

/// Snapshot of one entry.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState {
    pub data: Option<Value>,
    pub error: Option<ApiError>,
    pub is_fresh: bool,
    pub is_fetching: bool,
    pub consumers: usize,
}

struct InFlight {
    id: u64,
    future: Flight,
    /// Set when the entry is invalidated while this call is outstanding.
    /// Reads starting after that never join this call.
    invalidated: bool,
    /// Callers currently awaiting `future`.
    waiters: usize,
}

struct Entry {
    data: Option<Value>,
    error: Option<ApiError>,
    fresh: bool,
    tags: Vec<Tag>,
    in_flight: Option<InFlight>,
    consumers: usize,
    last_used: Instant,
}

impl Entry {
    fn new() -> Self {
        Self {
            data: None,
            error: None,
            fresh: false,
            tags: Vec::new(),
            in_flight: None,
            consumers: 0,
            last_used: Instant::now(),
        }
    }

    fn state(&self) -> QueryState {
        QueryState {
            data: self.data.clone(),
            error: self.error.clone(),
            is_fresh: self.fresh,
            is_fetching: self.in_flight.is_some(),
            consumers: self.consumers,
        }
    }
}

#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    guard: SessionGuard,
    entries: Mutex<HashMap<CacheKey, Entry>>,
    keep_unused_for: Duration,
    events: broadcast::Sender<CacheEvent>,
}

impl QueryCache {
    pub fn new(guard: SessionGuard, keep_unused_for: Duration) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(CacheInner {
                guard,
                entries: Mutex::new(HashMap::new()),
                keep_unused_for,
                events,
            }),
        }
    }

    pub fn guard(&self) -> &SessionGuard {
        &self.inner.guard
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    /// Cached value if fresh, otherwise the result of the shared call for `key`.
    pub async fn read(&self, key: CacheKey, tags: Vec<Tag>, request: ApiRequest) -> Result<Value, ApiError> {
        let (flight, _waiter) = {
            let mut entries = self.inner.entries();
            self.inner.sweep_locked(&mut entries);

            let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
            entry.last_used = Instant::now();
            entry.tags = tags;

            if entry.fresh {
                if let Some(data) = &entry.data {
                    trace!(target: "b4uspend::cache", "Hit {}", key);
                    return Ok(data.clone());
                }
            }

            let joined = match entry.in_flight.as_mut() {
                Some(flight) if !flight.invalidated => {
                    flight.waiters += 1;
                    Some((flight.id, flight.future.clone()))
                }
                _ => None,
            };

            let (id, future) = match joined {
                Some(joined) => {
                    trace!(target: "b4uspend::cache", "Joining in-flight {}", key);
                    joined
                }
                None => {
                    if entry.in_flight.is_some() {
                        debug!(target: "b4uspend::cache", "Refetching {}, in-flight call predates a write", key);
                    } else {
                        debug!(target: "b4uspend::cache", "Fetching {}", key);
                    }
                    let id = NEXT_FLIGHT.fetch_add(1, Ordering::Relaxed);
                    let future = fetch(Arc::clone(&self.inner), key.clone(), id, request)
                        .boxed()
                        .shared();
                    // Replacing the old flight leaves it to its own waiters; its result is discarded.
                    entry.in_flight = Some(InFlight {
                        id,
                        future: future.clone(),
                        invalidated: false,
                        waiters: 1,
                    });
                    (id, future)
                }
            };

            let waiter = Waiter {
                inner: Arc::clone(&self.inner),
                key,
                id,
            };
            (future, waiter)
        };
        flight.await
    }

    /// Perform a write; on success invalidate every entry overlapping `invalidates`.
    pub async fn write(&self, request: ApiRequest, invalidates: &[Tag]) -> Result<Value, ApiError> {
        let value = self.inner.guard.execute(&request).await?;
        self.invalidate(invalidates);
        Ok(value)
    }

    /// Mark matching entries stale and notify consumers. Returns the affected keys.
    pub fn invalidate(&self, tags: &[Tag]) -> Vec<CacheKey> {
        if tags.is_empty() {
            return Vec::new();
        }
        let keys: Vec<CacheKey> = {
            let mut entries = self.inner.entries();
            entries
                .iter_mut()
                .filter(|(_, entry)| {
                    tags.iter()
                        .any(|tag| entry.tags.iter().any(|provided| tag.invalidates(provided)))
                })
                .map(|(key, entry)| {
                    entry.fresh = false;
                    if let Some(flight) = entry.in_flight.as_mut() {
                        flight.invalidated = true;
                    }
                    key.clone()
                })
                .collect()
        };

        if !keys.is_empty() {
            debug!(
                target: "b4uspend::cache",
                "Invalidated {} entries for [{}]",
                keys.len(),
                tags.iter().map(Tag::to_string).collect::<Vec<_>>().join(", ")
            );
            let _ = self.inner.events.send(CacheEvent::Invalidated { keys: keys.clone() });
        }
        keys
    }

    /// Register a consumer of `key`. The entry is kept while any subscription lives.
    pub fn subscribe(&self, key: CacheKey) -> Subscription {
        {
            let mut entries = self.inner.entries();
            let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
            entry.consumers += 1;
            entry.last_used = Instant::now();
        }
        Subscription {
            inner: Arc::clone(&self.inner),
            key,
        }
    }

    pub fn state(&self, key: &CacheKey) -> Option<QueryState> {
        self.inner.entries().get(key).map(Entry::state)
    }

    /// Drop unreferenced, idle entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.inner.entries();
        self.inner.sweep_locked(&mut entries)
    }

    /// Forget everything. Calls still in flight will not store their results.
    pub fn reset(&self) {
        let dropped = {
            let mut entries = self.inner.entries();
            let n = entries.len();
            entries.clear();
            n
        };
        debug!(target: "b4uspend::cache", "Cache reset, dropped {} entries", dropped);
        let _ = self.inner.events.send(CacheEvent::Reset);
    }

    pub fn len(&self) -> usize {
        self.inner.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheInner {
    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sweep_locked(&self, entries: &mut HashMap<CacheKey, Entry>) -> usize {
        let before = entries.len();
        entries.retain(|_, entry| {
            entry.consumers > 0
                || entry.in_flight.is_some()
                || entry.last_used.elapsed() < self.keep_unused_for
        });
        let removed = before - entries.len();
        if removed > 0 {
            trace!(target: "b4uspend::cache", "Swept {} idle entries", removed);
        }
        removed
    }

    /// A waiter of flight `id` went away. The last one to leave before the
    /// flight resolves drops it, cancelling the call.
    fn release(&self, key: &CacheKey, id: u64) {
        let abandoned = {
            let mut entries = self.entries();
            let Some(entry) = entries.get_mut(key) else {
                return;
            };
            let idle = match entry.in_flight.as_mut() {
                Some(flight) if flight.id == id => {
                    flight.waiters = flight.waiters.saturating_sub(1);
                    flight.waiters == 0
                }
                _ => false,
            };
            if idle {
                entry.in_flight.take()
            } else {
                None
            }
        };
        if abandoned.is_some() {
            trace!(target: "b4uspend::cache", "Abandoned in-flight {}", key);
        }
    }

    /// Record the outcome of flight `id`, unless the entry moved on.
    fn store(&self, key: &CacheKey, id: u64, result: &Result<Value, ApiError>) {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key) else {
            trace!(target: "b4uspend::cache", "Discarding result for dropped {}", key);
            return;
        };
        let invalidated = match &entry.in_flight {
            Some(flight) if flight.id == id => flight.invalidated,
            _ => {
                trace!(target: "b4uspend::cache", "Discarding superseded result for {}", key);
                return;
            }
        };

        entry.in_flight = None;
        entry.last_used = Instant::now();
        match result {
            Ok(value) => {
                entry.data = Some(value.clone());
                entry.error = None;
                entry.fresh = !invalidated;
            }
            Err(e) => {
                debug!(target: "b4uspend::cache", "Read {} failed: {}", key, e);
                entry.error = Some(e.clone());
                entry.fresh = false;
            }
        }
    }
}

async fn fetch(inner: Arc<CacheInner>, key: CacheKey, id: u64, request: ApiRequest) -> Result<Value, ApiError> {
    let result = inner.guard.execute(&request).await;
    inner.store(&key, id, &result);
    result
}

/// One caller awaiting a flight.
struct Waiter {
    inner: Arc<CacheInner>,
    key: CacheKey,
    id: u64,
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.inner.release(&self.key, self.id);
    }
}

/// RAII consumer registration returned by [`QueryCache::subscribe`].
pub struct Subscription {
    inner: Arc<CacheInner>,
    key: CacheKey,
}

impl Subscription {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut entries = self.inner.entries();
        if let Some(entry) = entries.get_mut(&self.key) {
            entry.consumers = entry.consumers.saturating_sub(1);
            entry.last_used = Instant::now();
        }
    }
}
