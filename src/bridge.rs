//! The bridge context: engine lifecycle, session acquisition and crypto calls.
//!
//! All process-wide state lives in one [`Bridge`] value. The C ABI uses a
//! single global instance; tests and Rust embedders build their own.
//!
//! Shared state and its locks:
//! - engine and session [`HandleTable`]s, one mutex each
//! - the configured engine slot, a mutex held across setup and shutdown
//! - the [`SessionCache`] read/write lock
//! - the [`ErrorChannel`] slot
//!
//! Only shutdown nests locks (engine slot, then cache). Native session
//! construction never runs under a lock.

use crate::config::EngineConfig;
use crate::engine::{BuiltinBackend, EngineBackend, NativeEngine, NativeSession};
use crate::error::{BridgeError, BridgeResult, ErrorChannel};
use crate::handles::{Handle, HandleTable, NULL_HANDLE};
use crate::loader::NativeLoader;
use crate::metrics::{BridgeMetrics, MetricsSnapshot};
use crate::session_cache::{CacheOutcome, SessionCache};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

struct EngineEntry {
    engine: Box<dyn NativeEngine>,
    caching: bool,
    service: String,
}

/// Holds its engine so the engine outlives it.
struct SessionEntry {
    // Declared first: dropped before `engine`
    session: Box<dyn NativeSession>,
    partition: String,
    cached: bool,
    engine: Arc<EngineEntry>,
}

struct ConfiguredEngine {
    handle: Handle,
    entry: Arc<EngineEntry>,
}

enum BackendSource {
    Fixed(Arc<dyn EngineBackend>),
    Loader(NativeLoader),
}

/// Explicitly constructed bridge state.
pub struct Bridge {
    source: BackendSource,
    engines: HandleTable<EngineEntry>,
    sessions: HandleTable<SessionEntry>,
    state: Mutex<Option<ConfiguredEngine>>,
    cache: SessionCache<Handle>,
    errors: ErrorChannel,
    metrics: BridgeMetrics,
}

impl Bridge {
    /// Bridge over a fixed backend; `load_library` becomes a no-op.
    pub fn new(backend: Arc<dyn EngineBackend>) -> Self {
        Self::with_source(BackendSource::Fixed(backend))
    }

    /// Bridge over the in-process engine.
    pub fn builtin() -> Self {
        Self::new(Arc::new(BuiltinBackend::new()))
    }

    /// Bridge whose backend is discovered by `loader` on first setup.
    pub fn with_loader(loader: NativeLoader) -> Self {
        Self::with_source(BackendSource::Loader(loader))
    }

    /// Bridge discovering the native library from the process environment.
    pub fn from_env() -> Self {
        Self::with_loader(NativeLoader::from_env())
    }

    fn with_source(source: BackendSource) -> Self {
        Self {
            source,
            engines: HandleTable::new("engines"),
            sessions: HandleTable::new("sessions"),
            state: Mutex::new(None),
            cache: SessionCache::new(),
            errors: ErrorChannel::new(),
            metrics: BridgeMetrics::new(),
        }
    }

    /// Load the native library from `path` (or rerun discovery with `None`).
    pub fn load_library(&self, path: Option<&Path>) -> BridgeResult<()> {
        let result = match &self.source {
            BackendSource::Fixed(_) => Ok(()),
            BackendSource::Loader(loader) => loader.load_from(path).map(|_| ()),
        };
        self.track(result)
    }

    /// Construct and register the engine. Fails `AlreadyConfigured` while one is live.
    pub fn setup(&self, config: &EngineConfig) -> BridgeResult<Handle> {
        let result = self.setup_inner(config);
        self.track(result)
    }

    /// Parse a JSON configuration record and set up from it.
    pub fn setup_json(&self, json: &str) -> BridgeResult<Handle> {
        let result = EngineConfig::from_json(json).and_then(|config| self.setup_inner(&config));
        self.track(result)
    }

    /// Derive configuration from the environment and set up from it.
    pub fn setup_from_env(&self) -> BridgeResult<Handle> {
        let result = EngineConfig::from_env().and_then(|config| self.setup_inner(&config));
        self.track(result)
    }

    fn setup_inner(&self, config: &EngineConfig) -> BridgeResult<Handle> {
        let config = &config.clone().normalized()?;
        if self.lock_state().is_some() {
            return Err(BridgeError::AlreadyConfigured);
        }

        let backend = self.backend()?;
        let engine = backend.new_engine(config)?;
        let entry = Arc::new(EngineEntry {
            engine,
            caching: config.session_caching(),
            service: config.service_name.clone(),
        });

        let mut state = self.lock_state();
        if state.is_some() {
            drop(state);
            // Lost a concurrent setup; dropping the entry frees the native engine
            drop(entry);
            tracing::warn!(
                service = %config.service_name,
                "concurrent setup lost, engine discarded"
            );
            return Err(BridgeError::AlreadyConfigured);
        }
        let handle = self.engines.add_shared(Arc::clone(&entry));
        *state = Some(ConfiguredEngine { handle, entry });
        drop(state);

        if config.verbose() {
            tracing::info!(
                handle,
                backend = backend.name(),
                service = %config.service_name,
                product = %config.product_id,
                metastore = %config.metastore,
                kms = %config.kms,
                session_caching = config.session_caching(),
                "engine configured"
            );
        } else {
            tracing::debug!(handle, backend = backend.name(), "engine configured");
        }
        Ok(handle)
    }

    /// Free every cached session, then the engine. A no-op when nothing is configured.
    pub fn shutdown(&self) -> BridgeResult<()> {
        let mut state = self.lock_state();
        self.shutdown_locked(&mut state);
        drop(state);
        self.track(Ok(()))
    }

    /// Free `handle`, which must be the configured engine; equivalent to shutdown.
    pub fn free_engine(&self, handle: Handle) -> BridgeResult<()> {
        let mut state = self.lock_state();
        let result = if state.as_ref().is_some_and(|c| c.handle == handle) {
            self.shutdown_locked(&mut state);
            Ok(())
        } else {
            Err(BridgeError::InvalidHandle(handle))
        };
        drop(state);
        self.track(result)
    }

    fn shutdown_locked(&self, state: &mut Option<ConfiguredEngine>) {
        let Some(configured) = state.take() else {
            return;
        };

        let detached = self.cache.detach();
        let freed = detached.len();
        for (_, session) in detached {
            drop(self.sessions.remove(session));
        }
        drop(self.engines.remove(configured.handle));
        tracing::info!(
            handle = configured.handle,
            service = %configured.entry.service,
            sessions_freed = freed,
            "engine shut down"
        );
        // Last owner unless uncached sessions are still outstanding
        drop(configured);
    }

    pub fn is_configured(&self) -> bool {
        self.lock_state().is_some()
    }

    /// Handle of the configured engine.
    pub fn engine_handle(&self) -> Option<Handle> {
        self.lock_state().as_ref().map(|c| c.handle)
    }

    /// Session for `partition` on the configured engine.
    ///
    /// With caching enabled the handle is shared and owned by the cache; with
    /// caching disabled it is fresh and must be released with
    /// [`Bridge::free_session`].
    pub fn acquire_session(&self, partition: &str) -> BridgeResult<Handle> {
        let result = self.acquire(partition, None);
        self.track(result)
    }

    /// As [`Bridge::acquire_session`], checking that `engine` is the configured engine.
    pub fn get_session(&self, engine: Handle, partition: &str) -> BridgeResult<Handle> {
        let result = self.acquire(partition, Some(engine));
        self.track(result)
    }

    fn acquire(&self, partition: &str, expected: Option<Handle>) -> BridgeResult<Handle> {
        if partition.is_empty() {
            return Err(BridgeError::invalid("partition id cannot be empty"));
        }

        let (engine_handle, engine, generation) = {
            let state = self.lock_state();
            let configured = match (state.as_ref(), expected) {
                (Some(configured), _) => configured,
                // A handle from before a shutdown
                (None, Some(handle)) if handle != NULL_HANDLE => {
                    return Err(BridgeError::InvalidHandle(handle));
                }
                (None, _) => return Err(BridgeError::NotConfigured),
            };
            (
                configured.handle,
                Arc::clone(&configured.entry),
                self.cache.generation(),
            )
        };
        if let Some(handle) = expected {
            if handle != engine_handle {
                return Err(BridgeError::InvalidHandle(handle));
            }
        }

        if !engine.caching {
            return self.build_session(&engine, partition, false);
        }

        let outcome = self.cache.get_or_insert_with(partition, generation, || {
            self.build_session(&engine, partition, true)
        })?;
        match outcome {
            CacheOutcome::Hit(handle) => {
                self.metrics.cache_hit();
                tracing::debug!(partition, handle, "session cache hit");
                Ok(handle)
            }
            CacheOutcome::Inserted(handle) => {
                self.metrics.cache_miss();
                tracing::debug!(partition, handle, "session cached");
                Ok(handle)
            }
            CacheOutcome::Raced { winner, duplicate } => {
                self.metrics.cache_miss();
                self.metrics.duplicate_discarded();
                drop(self.sessions.remove(duplicate));
                tracing::warn!(partition, winner, duplicate, "duplicate session discarded");
                Ok(winner)
            }
            CacheOutcome::Detached(built) => {
                if let Some(handle) = built {
                    drop(self.sessions.remove(handle));
                }
                Err(BridgeError::NotConfigured)
            }
        }
    }

    fn build_session(
        &self,
        engine: &Arc<EngineEntry>,
        partition: &str,
        cached: bool,
    ) -> BridgeResult<Handle> {
        let started = Instant::now();
        let session = engine.engine.new_session(partition)?;
        self.metrics.session_built();
        let handle = self.sessions.add(SessionEntry {
            session,
            partition: partition.to_string(),
            cached,
            engine: Arc::clone(engine),
        });
        tracing::debug!(
            partition,
            handle,
            cached,
            elapsed_us = started.elapsed().as_micros() as u64,
            "session built"
        );
        Ok(handle)
    }

    /// Release a session. Cached sessions stay owned by the cache, so
    /// releasing one is a successful no-op.
    pub fn free_session(&self, handle: Handle) -> BridgeResult<()> {
        let result = self.release(handle);
        self.track(result)
    }

    fn release(&self, handle: Handle) -> BridgeResult<()> {
        let entry = self
            .sessions
            .get(handle)
            .ok_or(BridgeError::InvalidHandle(handle))?;
        if entry.cached {
            return Ok(());
        }
        drop(entry);
        self.sessions
            .remove(handle)
            .map(drop)
            .ok_or(BridgeError::InvalidHandle(handle))
    }

    /// Encrypt `plaintext` with `session`, returning the opaque record.
    pub fn encrypt(&self, session: Handle, plaintext: &[u8]) -> BridgeResult<Vec<u8>> {
        let result = self.encrypt_inner(session, plaintext);
        self.track(result)
    }

    /// Decrypt a record produced for the same partition.
    pub fn decrypt(&self, session: Handle, record: &[u8]) -> BridgeResult<Vec<u8>> {
        let result = self.decrypt_inner(session, record);
        self.track(result)
    }

    fn encrypt_inner(&self, session: Handle, plaintext: &[u8]) -> BridgeResult<Vec<u8>> {
        let entry = self.session(session)?;
        let started = Instant::now();
        let record = entry.session.encrypt(plaintext)?;
        self.metrics.encrypted(started.elapsed().as_micros() as u64);
        Ok(record)
    }

    fn decrypt_inner(&self, session: Handle, record: &[u8]) -> BridgeResult<Vec<u8>> {
        let entry = self.session(session)?;
        let started = Instant::now();
        let plaintext = entry.session.decrypt(record)?;
        self.metrics.decrypted(started.elapsed().as_micros() as u64);
        Ok(plaintext)
    }

    /// Acquire a session for `partition`, encrypt, and release it if uncached.
    pub fn encrypt_for_partition(
        &self,
        partition: &str,
        plaintext: &[u8],
    ) -> BridgeResult<Vec<u8>> {
        let result = self.with_partition(partition, |handle| self.encrypt_inner(handle, plaintext));
        self.track(result)
    }

    /// Acquire a session for `partition`, decrypt, and release it if uncached.
    pub fn decrypt_for_partition(&self, partition: &str, record: &[u8]) -> BridgeResult<Vec<u8>> {
        let result = self.with_partition(partition, |handle| self.decrypt_inner(handle, record));
        self.track(result)
    }

    fn with_partition<T, F>(&self, partition: &str, op: F) -> BridgeResult<T>
    where
        F: FnOnce(Handle) -> BridgeResult<T>,
    {
        let handle = self.acquire(partition, None)?;
        let result = op(handle);
        if let Some(entry) = self.sessions.get(handle) {
            if !entry.cached {
                drop(entry);
                drop(self.sessions.remove(handle));
            }
        }
        result
    }

    /// Partition a live session handle belongs to.
    pub fn session_partition(&self, handle: Handle) -> BridgeResult<String> {
        self.session(handle).map(|entry| entry.partition.clone())
    }

    /// Message recorded by the most recent failing call, if no call has
    /// succeeded since.
    pub fn last_error(&self) -> Option<String> {
        self.errors.last()
    }

    /// Record a failure detected outside the bridge (e.g. by the C ABI layer).
    pub fn record_error(&self, err: &BridgeError) {
        self.metrics.failed();
        self.errors.record(err);
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Live session handles, cached or not.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn cached_session_count(&self) -> usize {
        self.cache.len()
    }

    fn session(&self, handle: Handle) -> BridgeResult<Arc<SessionEntry>> {
        self.sessions
            .get(handle)
            .ok_or(BridgeError::InvalidHandle(handle))
    }

    fn backend(&self) -> BridgeResult<Arc<dyn EngineBackend>> {
        match &self.source {
            BackendSource::Fixed(backend) => Ok(Arc::clone(backend)),
            BackendSource::Loader(loader) => loader.ensure_loaded(),
        }
    }

    fn track<T>(&self, result: BridgeResult<T>) -> BridgeResult<T> {
        if result.is_err() {
            self.metrics.failed();
        }
        self.errors.track(result)
    }

    fn lock_state(&self) -> MutexGuard<'_, Option<ConfiguredEngine>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("engine", &self.engine_handle())
            .field("sessions", &self.sessions.len())
            .field("cached", &self.cache.len())
            .finish()
    }
}
