//! Partition-keyed session cache with double-checked insertion.
//!
//! Lookups take the read lock. On a miss the caller's builder runs with no
//! lock held, then the write lock re-checks the map: the first insertion for
//! a partition wins and later builders get their value back as a duplicate
//! to dispose of.
//!
//! Every [`SessionCache::detach`] bumps a generation counter. Callers pass the
//! generation they observed alongside their engine; a call whose generation is
//! stale, or that is overtaken by a detach while building, never inserts and
//! gets [`CacheOutcome::Detached`] instead.

use crate::error::BridgeResult;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Result of [`SessionCache::get_or_insert_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome<V> {
    /// Served from the cache; the builder did not run.
    Hit(V),
    /// Built and inserted.
    Inserted(V),
    /// Another caller inserted first. `winner` is cached; `duplicate` is the
    /// value this call built and must be disposed of by the caller.
    Raced { winner: V, duplicate: V },
    /// The cache was detached. Carries the built value when the detach
    /// happened while building, `None` when the generation was already stale.
    Detached(Option<V>),
}

impl<V> CacheOutcome<V> {
    /// Whether the builder ran.
    pub fn built(&self) -> bool {
        !matches!(self, CacheOutcome::Hit(_))
    }
}

#[derive(Debug)]
struct CacheInner<V> {
    generation: u64,
    entries: HashMap<String, V>,
}

/// Map from partition id to a cached value (a session handle in the bridge).
#[derive(Debug)]
pub struct SessionCache<V> {
    inner: RwLock<CacheInner<V>>,
}

impl<V> Default for SessionCache<V> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                generation: 0,
                entries: HashMap::new(),
            }),
        }
    }
}

impl<V: Clone> SessionCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, partition: &str) -> Option<V> {
        self.read().entries.get(partition).cloned()
    }

    pub fn contains(&self, partition: &str) -> bool {
        self.read().entries.contains_key(partition)
    }

    /// Current generation; changes on every detach.
    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    /// Return the cached value for `partition`, or build and insert one.
    ///
    /// `generation` must be the value of [`SessionCache::generation`] observed
    /// together with the engine `build` uses. `build` runs without any cache
    /// lock held. Its error is returned as is and leaves the cache unchanged.
    pub fn get_or_insert_with<F>(
        &self,
        partition: &str,
        generation: u64,
        build: F,
    ) -> BridgeResult<CacheOutcome<V>>
    where
        F: FnOnce() -> BridgeResult<V>,
    {
        {
            let inner = self.read();
            if inner.generation != generation {
                return Ok(CacheOutcome::Detached(None));
            }
            if let Some(existing) = inner.entries.get(partition) {
                return Ok(CacheOutcome::Hit(existing.clone()));
            }
        }

        let built = build()?;

        let mut inner = self.write();
        if inner.generation != generation {
            return Ok(CacheOutcome::Detached(Some(built)));
        }
        if let Some(winner) = inner.entries.get(partition) {
            return Ok(CacheOutcome::Raced {
                winner: winner.clone(),
                duplicate: built,
            });
        }
        inner.entries.insert(partition.to_string(), built.clone());
        Ok(CacheOutcome::Inserted(built))
    }

    /// Atomically take every entry and start a new generation.
    ///
    /// Values are returned for the caller to dispose of outside the lock.
    pub fn detach(&self) -> Vec<(String, V)> {
        let mut inner = self.write();
        inner.generation += 1;
        inner.entries.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheInner<V>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheInner<V>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
