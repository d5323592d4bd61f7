//! Shared engine instances with sliding expiration.
//!
//! Opening an engine replays its log, so call sites that want the same
//! collection should share one instance. A [`ConnectionCache`] maps each
//! [`Location`] to at most one live engine and closes it once it has been
//! idle for longer than its timeout. A [`Connection`] is a cheap handle
//! that knows how to (re)open its engine through the cache.
//!
//! ```rust
//! use docket_core::{CacheConfig, CollectionConfig, Connection, ConnectionCache, IdAccessor, Identity, JsonCodec};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Tag {
//!     id: i32,
//!     label: String,
//! }
//!
//! impl Identity for Tag {
//!     fn id(&self) -> i32 { self.id }
//!     fn set_id(&mut self, id: i32) { self.id = id; }
//! }
//!
//! let dir = tempfile::tempdir().unwrap();
//! let cache = Arc::new(ConnectionCache::new(CacheConfig::default()).unwrap());
//! let tags = Connection::collection(
//!     &cache,
//!     dir.path(),
//!     "tags",
//!     JsonCodec,
//!     Some(IdAccessor::<Tag>::identity()),
//!     CollectionConfig::default(),
//! )
//! .unwrap();
//!
//! let a = tags.get().unwrap();
//! let b = tags.get().unwrap();
//! assert!(Arc::ptr_eq(&a, &b));
//! ```

use crate::collection::Collection;
use crate::config::{CacheConfig, CollectionConfig};
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::identity::IdAccessor;
use crate::types::Location;
use docket_codec::Codec;
use parking_lot::{Condvar, Mutex};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// An engine the cache can share and close.
pub trait Engine: Send + Sync + 'static {
    /// Where the engine's files live.
    fn location(&self) -> &Location;

    /// Flushes and releases the engine's files.
    ///
    /// # Errors
    ///
    /// Returns the final flush error.
    fn close(&self) -> CoreResult<()>;
}

impl<T, C> Engine for Collection<T, C>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    C: Codec,
{
    fn location(&self) -> &Location {
        Collection::location(self)
    }

    fn close(&self) -> CoreResult<()> {
        Collection::close(self)
    }
}

impl<T, C> Engine for Database<T, C>
where
    T: Serialize + DeserializeOwned + 'static,
    C: Codec,
{
    fn location(&self) -> &Location {
        Database::location(self)
    }

    fn close(&self) -> CoreResult<()> {
        Database::close(self)
    }
}

struct Entry {
    engine: Arc<dyn Any + Send + Sync>,
    closer: Arc<dyn Engine>,
    idle: Duration,
    last_access: Instant,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.last_access) >= self.idle
    }

    fn close(self, key: &Location) {
        match self.closer.close() {
            Ok(()) => debug!(connection = %key, "closed cached engine"),
            Err(err) => error!(connection = %key, error = %err, "failed to close cached engine"),
        }
    }
}

/// Per-key cell. Its lock serializes creation so only one engine is ever
/// opened for a key.
#[derive(Default)]
struct Slot {
    entry: Mutex<Option<Entry>>,
}

struct CacheInner {
    slots: Mutex<HashMap<Location, Arc<Slot>>>,
    config: CacheConfig,
}

impl CacheInner {
    /// Drops `slot` from the map if it is still the slot for `key`.
    ///
    /// Callers hold the slot's entry lock.
    fn unmap(&self, key: &Location, slot: &Arc<Slot>) {
        let mut slots = self.slots.lock();
        if slots.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(key);
        }
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let snapshot: Vec<(Location, Arc<Slot>)> = self
            .slots
            .lock()
            .iter()
            .map(|(key, slot)| (key.clone(), Arc::clone(slot)))
            .collect();

        let mut purged = 0;
        for (key, slot) in snapshot {
            // A busy slot is being used right now, so it is not idle.
            let Some(mut entry) = slot.entry.try_lock() else {
                continue;
            };
            if entry.is_none() {
                self.unmap(&key, &slot);
                continue;
            }
            if entry.as_ref().is_some_and(|e| e.expired(now)) {
                self.unmap(&key, &slot);
                if let Some(expired) = entry.take() {
                    drop(entry);
                    expired.close(&key);
                    purged += 1;
                }
            }
        }
        if purged > 0 {
            debug!(purged, "evicted idle connections");
        }
        purged
    }

    fn close_all(&self) {
        let drained: Vec<(Location, Arc<Slot>)> = self.slots.lock().drain().collect();
        for (key, slot) in drained {
            let entry = slot.entry.lock().take();
            if let Some(entry) = entry {
                entry.close(&key);
            }
        }
    }
}

struct Sweeper {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    fn start(inner: Weak<CacheInner>, interval: Duration) -> CoreResult<Self> {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("docket-cache-sweeper".into())
            .spawn(move || loop {
                {
                    let (stopped, wake) = &*signal;
                    let mut stopped = stopped.lock();
                    if !*stopped {
                        wake.wait_for(&mut stopped, interval);
                    }
                    if *stopped {
                        return;
                    }
                }
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                inner.purge_expired();
            })?;
        Ok(Self { stop, handle })
    }

    fn stop(self) {
        {
            let (stopped, wake) = &*self.stop;
            *stopped.lock() = true;
            wake.notify_all();
        }
        if self.handle.thread().id() != thread::current().id() && self.handle.join().is_err() {
            error!("cache sweeper panicked");
        }
    }
}

/// Keyed cache of open engines with sliding idle expiration.
///
/// Construct one per application and share it behind an `Arc`. Dropping
/// the cache closes every engine it still holds.
pub struct ConnectionCache {
    inner: Arc<CacheInner>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl ConnectionCache {
    /// Creates a cache, starting the background sweeper if configured.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero idle timeout or sweep interval,
    /// or an I/O error if the sweeper thread cannot be spawned.
    pub fn new(config: CacheConfig) -> CoreResult<Self> {
        if config.idle_timeout.is_zero() {
            return Err(CoreError::invalid_config("idle timeout must be positive"));
        }
        if config.sweep_interval.is_some_and(|i| i.is_zero()) {
            return Err(CoreError::invalid_config("sweep interval must be positive"));
        }

        let sweep_interval = config.sweep_interval;
        let inner = Arc::new(CacheInner {
            slots: Mutex::new(HashMap::new()),
            config,
        });
        let sweeper = match sweep_interval {
            Some(interval) => Some(Sweeper::start(Arc::downgrade(&inner), interval)?),
            None => None,
        };

        Ok(Self {
            inner,
            sweeper: Mutex::new(sweeper),
        })
    }

    /// Returns the configuration the cache was created with.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Returns the engine cached under `key`, creating it with `factory`
    /// if there is none or the cached one has expired.
    ///
    /// Concurrent callers for the same key wait for a single factory call.
    /// Each hit restarts the idle timer; `idle` overrides the cache's
    /// default timeout for a newly created entry.
    ///
    /// # Errors
    ///
    /// Returns the factory's error, or `ConnectionTypeMismatch` if the key
    /// is already open with a different engine type.
    pub fn get_or_create<E, F>(
        &self,
        key: &Location,
        idle: Option<Duration>,
        factory: F,
    ) -> CoreResult<Arc<E>>
    where
        E: Engine,
        F: FnOnce() -> CoreResult<E>,
    {
        self.inner.purge_expired();

        loop {
            let slot = Arc::clone(self.inner.slots.lock().entry(key.clone()).or_default());
            let mut entry = slot.entry.lock();

            let still_mapped = self
                .inner
                .slots
                .lock()
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current, &slot));
            if !still_mapped {
                // Evicted between the lookup and the lock; start over.
                continue;
            }

            let now = Instant::now();
            if let Some(cached) = entry.as_mut() {
                if !cached.expired(now) {
                    cached.last_access = now;
                    return Arc::clone(&cached.engine).downcast::<E>().map_err(|_| {
                        warn!(connection = %key, "connection requested with a different engine type");
                        CoreError::ConnectionTypeMismatch {
                            key: key.to_string(),
                        }
                    });
                }
                if let Some(expired) = entry.take() {
                    expired.close(key);
                }
            }

            let engine = match factory() {
                Ok(engine) => Arc::new(engine),
                Err(err) => {
                    // Leave no empty slot behind for a key that failed to open.
                    self.inner.unmap(key, &slot);
                    return Err(err);
                }
            };
            *entry = Some(Entry {
                engine: Arc::clone(&engine) as Arc<dyn Any + Send + Sync>,
                closer: Arc::clone(&engine) as Arc<dyn Engine>,
                idle: idle.unwrap_or(self.inner.config.idle_timeout),
                last_access: now,
            });
            debug!(connection = %key, "opened engine");
            return Ok(engine);
        }
    }

    /// Removes and closes the engine cached under `key`.
    ///
    /// Returns whether an engine was cached. Holders of the old instance
    /// see `Closed` errors from then on; the next lookup opens a fresh
    /// one.
    pub fn evict(&self, key: &Location) -> bool {
        let Some(slot) = self.inner.slots.lock().remove(key) else {
            return false;
        };
        let entry = slot.entry.lock().take();
        match entry {
            Some(entry) => {
                entry.close(key);
                true
            }
            None => false,
        }
    }

    /// Evicts every entry that has been idle past its timeout.
    /// Returns how many were evicted.
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    /// Returns true if an engine is cached under `key`.
    #[must_use]
    pub fn contains(&self, key: &Location) -> bool {
        let slot = self.inner.slots.lock().get(key).cloned();
        slot.is_some_and(|slot| slot.entry.lock().is_some())
    }

    /// Number of cached engines.
    #[must_use]
    pub fn len(&self) -> usize {
        let slots: Vec<Arc<Slot>> = self.inner.slots.lock().values().cloned().collect();
        slots.iter().filter(|slot| slot.entry.lock().is_some()).count()
    }

    /// Returns true if no engines are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes and drops every cached engine.
    pub fn clear(&self) {
        self.inner.close_all();
    }
}

impl Drop for ConnectionCache {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.stop();
        }
        self.inner.close_all();
    }
}

impl std::fmt::Debug for ConnectionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCache")
            .field("config", &self.inner.config)
            .field("entries", &self.len())
            .finish()
    }
}

type Factory<E> = Arc<dyn Fn() -> CoreResult<E> + Send + Sync>;

/// A handle to one engine in a [`ConnectionCache`].
///
/// Cloning a connection is cheap; every clone resolves to the same cached
/// engine.
pub struct Connection<E: Engine> {
    cache: Arc<ConnectionCache>,
    key: Location,
    idle: Option<Duration>,
    factory: Factory<E>,
}

impl<E: Engine> Connection<E> {
    /// Creates a connection that opens its engine with `factory`.
    pub fn new(
        cache: &Arc<ConnectionCache>,
        key: Location,
        factory: impl Fn() -> CoreResult<E> + Send + Sync + 'static,
    ) -> Self {
        Self {
            cache: Arc::clone(cache),
            key,
            idle: None,
            factory: Arc::new(factory),
        }
    }

    /// Overrides the cache's idle timeout for this connection's engine.
    #[must_use]
    pub fn idle_timeout(mut self, idle: Duration) -> Self {
        self.idle = Some(idle);
        self
    }

    /// Returns the cache key.
    #[must_use]
    pub fn key(&self) -> &Location {
        &self.key
    }

    /// Returns the live engine, opening it if needed.
    ///
    /// # Errors
    ///
    /// Returns the engine's open error, or `ConnectionTypeMismatch`.
    pub fn get(&self) -> CoreResult<Arc<E>> {
        self.cache
            .get_or_create(&self.key, self.idle, || (self.factory)())
    }

    /// Evicts and closes the engine; the next [`get`](Self::get) reopens
    /// it from disk.
    pub fn kill(&self) -> bool {
        self.cache.evict(&self.key)
    }
}

impl<E: Engine> Clone for Connection<E> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            key: self.key.clone(),
            idle: self.idle,
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<E: Engine> std::fmt::Debug for Connection<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.key)
            .field("idle", &self.idle)
            .finish_non_exhaustive()
    }
}

impl<T, C> Connection<Collection<T, C>>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    C: Codec + Clone,
{
    /// Creates a connection to an append-log collection.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a blank path or name or an invalid
    /// config. Nothing is opened until [`get`](Self::get).
    pub fn collection(
        cache: &Arc<ConnectionCache>,
        base_path: impl AsRef<Path>,
        name: impl Into<String>,
        codec: C,
        accessor: Option<IdAccessor<T>>,
        config: CollectionConfig,
    ) -> CoreResult<Self> {
        config.validate()?;
        let key = Location::new(base_path, name)?;
        let location = key.clone();
        Ok(Self::new(cache, key, move || {
            Collection::open(
                location.base_path(),
                location.name(),
                codec.clone(),
                accessor,
                config.clone(),
            )
        }))
    }
}

impl<T, C> Connection<Database<T, C>>
where
    T: Serialize + DeserializeOwned + 'static,
    C: Codec + Clone,
{
    /// Creates a connection to an indexed database.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a blank path or name. Nothing is opened
    /// until [`get`](Self::get).
    pub fn database(
        cache: &Arc<ConnectionCache>,
        base_path: impl AsRef<Path>,
        name: impl Into<String>,
        codec: C,
        accessor: Option<IdAccessor<T>>,
    ) -> CoreResult<Self> {
        let key = Location::new(base_path, name)?;
        let location = key.clone();
        Ok(Self::new(cache, key, move || {
            Database::open(
                location.base_path(),
                location.name(),
                codec.clone(),
                accessor,
            )
        }))
    }
}
