//! Content-addressed query cache with TTL expiry and request coalescing.
//!
//! [`QueryCache`] sits between every query issuer and the providers. A key
//! that is missing from the store is fetched by exactly one caller (the
//! leader); concurrent callers asking for the same key wait for the leader's
//! outcome instead of issuing their own upstream call.

use std::hash::{Hash, Hasher};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use fxhash::{FxHashMap, FxHasher64};
use jiff::{SignedDuration, Timestamp};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CacheUnavailable, Error};
use crate::model::{Coordinate, Departure, RouteQuery, RouteResult, TransportMode};
use crate::traits::{CacheStore, Clock};

pub const CACHE_FOLDER_ENV_VAR: &str = "HOME_SCORER_CACHE_FOLDER";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheKey {
    Geocode { provider: String, name: String },
    Route(RouteKey),
}

/// Canonical route query: both coordinates as integers at `precision`
/// decimal digits plus everything else the provider's answer depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteKey {
    pub origin: (i64, i64),
    pub destination: (i64, i64),
    pub precision: u32,
    pub mode: TransportMode,
    pub departure: Option<Departure>,
    pub provider: String,
}

impl CacheKey {
    pub fn geocode(provider: impl Into<String>, name: &str) -> Self {
        CacheKey::Geocode {
            provider: provider.into(),
            name: name.trim().to_lowercase(),
        }
    }

    pub fn route(query: &RouteQuery, precision: u32, provider: impl Into<String>) -> Self {
        CacheKey::Route(RouteKey {
            origin: query.origin.scaled(precision),
            destination: query.destination.scaled(precision),
            precision,
            mode: query.mode,
            departure: query.departure,
            provider: provider.into(),
        })
    }

    fn content_hash(&self) -> u64 {
        let mut hasher = FxHasher64::default();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Cached outcome. Negative answers are cached too so that a known
/// unreachable pair or unknown name is not asked again within the TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CachedValue {
    Coordinate(Coordinate),
    NoMatch,
    Route(RouteResult),
    NoRoute,
}

fn expiry(now: Timestamp, ttl: Duration) -> Timestamp {
    SignedDuration::try_from(ttl)
        .ok()
        .and_then(|ttl| now.checked_add(ttl).ok())
        .unwrap_or(Timestamp::MAX)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    value: CachedValue,
    expires_at: Timestamp,
}

impl Entry {
    fn live_value(&self, now: Timestamp) -> Option<CachedValue> {
        (now < self.expires_at).then(|| self.value.clone())
    }
}

/// Entry count at which a [`MemoryStore`] first sweeps out expired entries.
const DEFAULT_PURGE_THRESHOLD: usize = 4096;

struct MemoryEntries {
    map: FxHashMap<CacheKey, Entry>,
    /// Size that triggers the next sweep; doubles past the live set so sweeps
    /// stay amortised when most entries are still live.
    purge_at: usize,
}

/// Process-local store. Expired entries are dropped when read and swept in
/// bulk whenever the map grows past the purge threshold.
pub struct MemoryStore {
    entries: Mutex<MemoryEntries>,
    purge_threshold: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_purge_threshold(DEFAULT_PURGE_THRESHOLD)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_purge_threshold(purge_threshold: usize) -> Self {
        let purge_threshold = purge_threshold.max(1);
        Self {
            entries: Mutex::new(MemoryEntries {
                map: FxHashMap::default(),
                purge_at: purge_threshold,
            }),
            purge_threshold,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &CacheKey, now: Timestamp) -> Result<Option<CachedValue>, CacheUnavailable> {
        let mut entries = self.entries.lock();
        let live = entries.map.get(key).map(|entry| entry.live_value(now));
        match live {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                entries.map.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn put(
        &self,
        key: &CacheKey,
        value: &CachedValue,
        now: Timestamp,
        ttl: Duration,
    ) -> Result<(), CacheUnavailable> {
        let mut entries = self.entries.lock();
        entries.map.insert(
            key.clone(),
            Entry {
                value: value.clone(),
                expires_at: expiry(now, ttl),
            },
        );
        if entries.map.len() >= entries.purge_at {
            let before = entries.map.len();
            entries.map.retain(|_, entry| now < entry.expires_at);
            let live = entries.map.len();
            entries.purge_at = self.purge_threshold.max(live * 2);
            debug!("memory cache swept {} expired entries, {} live", before - live, live);
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct FileEntry {
    key: CacheKey,
    #[serde(flatten)]
    entry: Entry,
}

/// Durable store: one JSON document per key, named by the key's hash.
pub struct FileStore {
    folder: PathBuf,
}

impl FileStore {
    pub fn new(folder: impl Into<PathBuf>) -> Result<Self, CacheUnavailable> {
        let folder = folder.into();
        if !folder.is_dir() {
            return Err(CacheUnavailable(format!(
                "path {} is not a directory",
                folder.display()
            )));
        }
        Ok(Self { folder })
    }

    pub fn from_env() -> Result<Self, CacheUnavailable> {
        let folder = std::env::var(CACHE_FOLDER_ENV_VAR)
            .map_err(|_| CacheUnavailable(format!("{} is not set", CACHE_FOLDER_ENV_VAR)))?;
        Self::new(folder)
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.folder.join(format!("{:016x}.json", key.content_hash()))
    }
}

fn unavailable(path: &Path, err: impl std::fmt::Display) -> CacheUnavailable {
    CacheUnavailable(format!("{}: {}", path.display(), err))
}

impl CacheStore for FileStore {
    fn get(&self, key: &CacheKey, now: Timestamp) -> Result<Option<CachedValue>, CacheUnavailable> {
        let path = self.path_for(key);
        if !path.is_file() {
            return Ok(None);
        }
        let file = std::fs::File::open(&path).map_err(|err| unavailable(&path, err))?;
        let stored: FileEntry = match serde_json::from_reader(std::io::BufReader::new(file)) {
            Ok(stored) => stored,
            Err(err) => {
                debug!("ignoring unreadable cache entry {}: {}", path.display(), err);
                return Ok(None);
            }
        };
        if &stored.key != key {
            return Ok(None);
        }
        let value = stored.entry.live_value(now);
        if value.is_none() {
            let _ = std::fs::remove_file(&path);
        }
        Ok(value)
    }

    fn put(
        &self,
        key: &CacheKey,
        value: &CachedValue,
        now: Timestamp,
        ttl: Duration,
    ) -> Result<(), CacheUnavailable> {
        let path = self.path_for(key);
        let tmp_path = path.with_extension("tmp");
        let stored = FileEntry {
            key: key.clone(),
            entry: Entry {
                value: value.clone(),
                expires_at: expiry(now, ttl),
            },
        };

        let file = std::fs::File::create(&tmp_path).map_err(|err| unavailable(&tmp_path, err))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &stored).map_err(|err| unavailable(&tmp_path, err))?;
        writer.flush().map_err(|err| unavailable(&tmp_path, err))?;
        std::fs::rename(&tmp_path, &path).map_err(|err| unavailable(&path, err))?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = expiry(*now, by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Timestamp::UNIX_EPOCH)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub upstream_calls: u64,
    pub coalesced: u64,
    pub degraded: bool,
}

impl CacheStats {
    /// Traffic recorded after `start` was taken. `degraded` is the current
    /// state since a cache never recovers from it.
    pub fn since(&self, start: &CacheStats) -> CacheStats {
        CacheStats {
            hits: self.hits.saturating_sub(start.hits),
            misses: self.misses.saturating_sub(start.misses),
            upstream_calls: self.upstream_calls.saturating_sub(start.upstream_calls),
            coalesced: self.coalesced.saturating_sub(start.coalesced),
            degraded: self.degraded,
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    upstream_calls: AtomicU64,
    coalesced: AtomicU64,
}

enum FlightState {
    Running,
    Done(Result<CachedValue, Error>),
    Abandoned,
}

struct Flight {
    state: Mutex<FlightState>,
    done: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            state: Mutex::new(FlightState::Running),
            done: Condvar::new(),
        }
    }

    /// Blocks until the leader publishes. `None` means the leader went away
    /// without an outcome and the caller should try again.
    fn wait(&self) -> Option<Result<CachedValue, Error>> {
        let mut state = self.state.lock();
        self.done
            .wait_while(&mut state, |state| matches!(state, FlightState::Running));
        match &*state {
            FlightState::Done(result) => Some(result.clone()),
            FlightState::Running | FlightState::Abandoned => None,
        }
    }

    fn publish(&self, outcome: FlightState) {
        *self.state.lock() = outcome;
        self.done.notify_all();
    }
}

enum Role {
    Leader(Arc<Flight>),
    Waiter(Arc<Flight>),
}

/// Removes the in-flight entry and wakes waiters even if the fetch panics.
struct LeaderGuard<'a> {
    cache: &'a QueryCache,
    key: &'a CacheKey,
    flight: Arc<Flight>,
    published: bool,
}

impl LeaderGuard<'_> {
    fn finish(mut self, result: Result<CachedValue, Error>) {
        self.cache.release(self.key, &self.flight);
        self.flight.publish(FlightState::Done(result));
        self.published = true;
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.published {
            self.cache.release(self.key, &self.flight);
            self.flight.publish(FlightState::Abandoned);
        }
    }
}

/// Shared, injectable cache used by every geocode and route lookup.
pub struct QueryCache {
    store: Box<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    inflight: Mutex<FxHashMap<CacheKey, Arc<Flight>>>,
    degraded: AtomicBool,
    counters: Counters,
}

impl QueryCache {
    pub fn new(store: impl CacheStore + 'static, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Box::new(store),
            clock,
            inflight: Mutex::new(FxHashMap::default()),
            degraded: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new(), Arc::new(SystemClock))
    }

    /// File-backed cache when `HOME_SCORER_CACHE_FOLDER` points at a
    /// directory, in-memory otherwise.
    pub fn from_env() -> Self {
        match FileStore::from_env() {
            Ok(store) => Self::new(store, Arc::new(SystemClock)),
            Err(err) => {
                debug!("using in-memory cache: {}", err);
                Self::in_memory()
            }
        }
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Totals since this cache was created; see [`CacheStats::since`] for a
    /// single run's share.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            upstream_calls: self.counters.upstream_calls.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }

    /// Returns the cached value for `key`, or runs `fetch` exactly once across
    /// all concurrent callers of the same key and stores its successful
    /// result for `ttl`. Errors are shared with waiters but never stored.
    pub fn get_or_fetch<F>(&self, key: &CacheKey, ttl: Duration, fetch: F) -> Result<CachedValue, Error>
    where
        F: FnOnce() -> Result<CachedValue, Error>,
    {
        let flight = loop {
            if let Some(value) = self.lookup(key) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(value);
            }
            match self.join(key) {
                Role::Leader(flight) => break flight,
                Role::Waiter(flight) => {
                    self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    if let Some(result) = flight.wait() {
                        return result;
                    }
                }
            }
        };

        let guard = LeaderGuard {
            cache: self,
            key,
            flight,
            published: false,
        };

        // A previous leader may have stored the value between our lookup and
        // registering this flight.
        if let Some(value) = self.lookup(key) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            guard.finish(Ok(value.clone()));
            return Ok(value);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.counters.upstream_calls.fetch_add(1, Ordering::Relaxed);
        debug!("cache miss for {:?}", key);

        let result = fetch();
        if let Ok(value) = &result {
            self.store_value(key, value, ttl);
        }
        guard.finish(result.clone());
        result
    }

    fn join(&self, key: &CacheKey) -> Role {
        let mut inflight = self.inflight.lock();
        match inflight.get(key) {
            Some(flight) => Role::Waiter(Arc::clone(flight)),
            None => {
                let flight = Arc::new(Flight::new());
                inflight.insert(key.clone(), Arc::clone(&flight));
                Role::Leader(flight)
            }
        }
    }

    fn release(&self, key: &CacheKey, flight: &Arc<Flight>) {
        let mut inflight = self.inflight.lock();
        if inflight
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, flight))
        {
            inflight.remove(key);
        }
    }

    fn lookup(&self, key: &CacheKey) -> Option<CachedValue> {
        if self.degraded.load(Ordering::Relaxed) {
            return None;
        }
        match self.store.get(key, self.clock.now()) {
            Ok(value) => value,
            Err(err) => {
                self.degrade(err);
                None
            }
        }
    }

    fn store_value(&self, key: &CacheKey, value: &CachedValue, ttl: Duration) {
        if self.degraded.load(Ordering::Relaxed) {
            return;
        }
        if let Err(err) = self.store.put(key, value, self.clock.now(), ttl) {
            self.degrade(err);
        }
    }

    fn degrade(&self, err: CacheUnavailable) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!("{}; continuing without caching", err);
        }
    }
}
