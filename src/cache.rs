//! Process-wide case cache.
//!
//! Maps case ids to shared [`Case`] instances with:
//! - TTL-bounded freshness (default 60s)
//! - Single-flight fetches: concurrent `get`s for one id share a fetch
//! - Bounded LRU eviction that never drops a case with staged changes
//!
//! Cached instances are refreshed in place, so a [`CaseHandle`] obtained
//! earlier keeps observing the latest snapshot.

use crate::client::{CaseClient, RetryPolicy};
use crate::error::Result;
use crate::model::{Case, CaseId, CaseSnapshot, FieldChanges};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Shared handle to a cached case.
pub type CaseHandle = Arc<Mutex<Case>>;

/// Lock a case, tolerating a poisoned mutex.
pub fn lock(handle: &CaseHandle) -> MutexGuard<'_, Case> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cache tuning, loaded from the `cache` section of the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    pub capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 60,
            capacity: 512,
        }
    }
}

impl CacheSettings {
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

struct Entry {
    case: CaseHandle,
    fetched_at: Instant,
    stale: bool,
    last_used: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CaseId, Entry>,
    in_flight: HashSet<CaseId>,
    tick: u64,
    warnings: Vec<String>,
}

impl CacheState {
    fn touch(&mut self, id: CaseId) {
        self.tick += 1;
        let tick = self.tick;
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.last_used = tick;
        }
    }
}

/// True when the case must stay in memory: it has staged changes, or
/// another caller currently holds it (and may be staging some).
fn is_pinned(case: &CaseHandle) -> bool {
    match case.try_lock() {
        Ok(c) => c.is_dirty(),
        Err(TryLockError::Poisoned(p)) => p.into_inner().is_dirty(),
        Err(TryLockError::WouldBlock) => true,
    }
}

/// Case cache backed by a [`CaseClient`].
pub struct CaseCache {
    client: Arc<dyn CaseClient>,
    settings: CacheSettings,
    retry: RetryPolicy,
    state: Mutex<CacheState>,
    fetched: Condvar,
}

impl CaseCache {
    pub fn new(client: Arc<dyn CaseClient>, settings: CacheSettings, retry: RetryPolicy) -> Self {
        Self {
            client,
            settings,
            retry,
            state: Mutex::new(CacheState::default()),
            fetched: Condvar::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub const fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    #[must_use]
    pub fn client(&self) -> &dyn CaseClient {
        self.client.as_ref()
    }

    /// Return the cached case, fetching it if absent or expired.
    ///
    /// A case with staged changes is returned as-is even when expired.
    pub fn get(&self, id: CaseId) -> Result<CaseHandle> {
        let ttl = self.settings.ttl();
        let mut state = self.state();

        loop {
            if let Some(entry) = state.entries.get(&id) {
                let fresh = !entry.stale && entry.fetched_at.elapsed() < ttl;
                if fresh || is_pinned(&entry.case) {
                    let case = Arc::clone(&entry.case);
                    state.touch(id);
                    trace!(%id, fresh, "Cache hit");
                    return Ok(case);
                }
            }

            if !state.in_flight.contains(&id) {
                break;
            }
            debug!(%id, "Waiting for in-flight fetch");
            state = self
                .fetched
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        state.in_flight.insert(id);
        drop(state);

        debug!(%id, "Cache miss, fetching");
        let result = self.retry.read("fetch", || self.client.fetch(id));

        let mut state = self.state();
        state.in_flight.remove(&id);
        let outcome = result.map(|snapshot| self.store(&mut state, snapshot));
        drop(state);
        self.fetched.notify_all();
        outcome
    }

    /// Drop the cached snapshot and fetch the case again.
    pub fn refresh(&self, id: CaseId) -> Result<CaseHandle> {
        if let Some(handle) = self.peek(id) {
            let case = lock(&handle);
            if case.is_dirty() {
                return Err(crate::Error::UnflushedChanges { id });
            }
        }
        self.invalidate(id);
        self.get(id)
    }

    /// Cached case without freshness checks or fetching.
    #[must_use]
    pub fn peek(&self, id: CaseId) -> Option<CaseHandle> {
        self.state().entries.get(&id).map(|e| Arc::clone(&e.case))
    }

    /// Insert a snapshot obtained elsewhere (e.g. from search results).
    ///
    /// Overwrites a clean cached copy; a copy with staged changes is kept.
    pub fn insert(&self, snapshot: CaseSnapshot) -> CaseHandle {
        let mut state = self.state();
        self.store(&mut state, snapshot)
    }

    /// Force the next `get` for `id` to fetch from the service.
    pub fn invalidate(&self, id: CaseId) {
        if let Some(entry) = self.state().entries.get_mut(&id) {
            debug!(%id, "Invalidated");
            entry.stale = true;
        }
    }

    /// Flush the staged changes of a cached case.
    ///
    /// Returns `false` if the case is not cached or has nothing staged.
    pub fn flush(&self, id: CaseId) -> Result<bool> {
        let Some(handle) = self.peek(id) else {
            return Ok(false);
        };
        let sent = lock(&handle).flush(self.client.as_ref())?;
        if sent {
            self.invalidate(id);
        }
        Ok(sent)
    }

    /// Add a comment to a case and invalidate its cached copy.
    pub fn comment(&self, id: CaseId, text: &str) -> Result<()> {
        let handle = self.get(id)?;
        lock(&handle).add_comment(self.client.as_ref(), text)?;
        self.invalidate(id);
        Ok(())
    }

    /// Drop the staged changes of a cached case.
    pub fn discard(&self, id: CaseId) -> FieldChanges {
        self.peek(id)
            .map(|handle| lock(&handle).discard())
            .unwrap_or_default()
    }

    /// Ids of cached cases with staged changes, ascending.
    #[must_use]
    pub fn dirty_cases(&self) -> Vec<CaseId> {
        let handles: Vec<CaseHandle> = self
            .state()
            .entries
            .values()
            .map(|e| Arc::clone(&e.case))
            .collect();
        let mut ids: Vec<CaseId> = handles
            .iter()
            .map(|h| lock(h))
            .filter(|c| c.is_dirty())
            .map(|c| c.id())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Warnings produced since the last call (e.g. deferred evictions).
    pub fn take_warnings(&self) -> Vec<String> {
        std::mem::take(&mut self.state().warnings)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn store(&self, state: &mut CacheState, snapshot: CaseSnapshot) -> CaseHandle {
        let id = snapshot.id;
        let handle = if let Some(entry) = state.entries.get_mut(&id) {
            match entry.case.try_lock() {
                Ok(mut case) if !case.is_dirty() => {
                    // Cannot fail: the case is clean
                    let _ = case.refresh(snapshot);
                    entry.fetched_at = Instant::now();
                    entry.stale = false;
                }
                _ => debug!(%id, "Keeping cached case with staged changes"),
            }
            Arc::clone(&entry.case)
        } else {
            let handle = Arc::new(Mutex::new(Case::new(snapshot)));
            state.entries.insert(
                id,
                Entry {
                    case: Arc::clone(&handle),
                    fetched_at: Instant::now(),
                    stale: false,
                    last_used: 0,
                },
            );
            handle
        };

        state.touch(id);
        self.evict(state, id);
        handle
    }

    fn evict(&self, state: &mut CacheState, keep: CaseId) {
        while state.entries.len() > self.settings.capacity {
            let victim = state
                .entries
                .iter()
                .filter(|(id, e)| **id != keep && !is_pinned(&e.case))
                .min_by_key(|(_, e)| e.last_used)
                .map(|(id, _)| *id);

            if let Some(id) = victim {
                trace!(%id, "Evicted");
                state.entries.remove(&id);
            } else {
                let message = format!(
                    "Case cache holds {} cases (limit {}); eviction deferred until unflushed \
                     changes are flushed or discarded",
                    state.entries.len(),
                    self.settings.capacity
                );
                warn!("{message}");
                state.warnings.push(message);
                break;
            }
        }
    }
}
