//! Engine and session disposal order, observed through a recording backend.
//!
//! Every engine and session logs its `Drop` into a shared journal, so tests
//! can assert what was freed, when, and in which order.

mod common;

use asherah_bridge::engine::{EngineBackend, NativeEngine, NativeSession};
use asherah_bridge::{Bridge, BridgeError, BridgeResult, EngineConfig, Handle};
use common::fixtures::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

#[derive(Default)]
struct Journal {
    events: Mutex<Vec<String>>,
    engines_built: AtomicUsize,
    engines_dropped: AtomicUsize,
}

impl Journal {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn live_engines(&self) -> usize {
        self.engines_built.load(Ordering::SeqCst) - self.engines_dropped.load(Ordering::SeqCst)
    }
}

struct RecordingBackend {
    journal: Arc<Journal>,
    // Holds every constructor until all racing setups have built an engine
    gate: Option<Arc<Barrier>>,
}

impl EngineBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn new_engine(&self, _config: &EngineConfig) -> BridgeResult<Box<dyn NativeEngine>> {
        let id = self.journal.engines_built.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.wait();
        }
        Ok(Box::new(RecordingEngine {
            id,
            journal: Arc::clone(&self.journal),
        }))
    }
}

struct RecordingEngine {
    id: usize,
    journal: Arc<Journal>,
}

impl NativeEngine for RecordingEngine {
    fn new_session(&self, partition: &str) -> BridgeResult<Box<dyn NativeSession>> {
        Ok(Box::new(RecordingSession {
            partition: partition.to_string(),
            journal: Arc::clone(&self.journal),
        }))
    }
}

impl Drop for RecordingEngine {
    fn drop(&mut self) {
        self.journal.engines_dropped.fetch_add(1, Ordering::SeqCst);
        self.journal.push(format!("engine {}", self.id));
    }
}

struct RecordingSession {
    partition: String,
    journal: Arc<Journal>,
}

impl NativeSession for RecordingSession {
    fn encrypt(&self, plaintext: &[u8]) -> BridgeResult<Vec<u8>> {
        Ok(plaintext.iter().rev().copied().collect())
    }

    fn decrypt(&self, record: &[u8]) -> BridgeResult<Vec<u8>> {
        Ok(record.iter().rev().copied().collect())
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        self.journal.push(format!("session {}", self.partition));
    }
}

fn recording_bridge(gate: Option<Arc<Barrier>>) -> (Bridge, Arc<Journal>) {
    let journal = Arc::new(Journal::default());
    let backend = RecordingBackend {
        journal: Arc::clone(&journal),
        gate,
    };
    (Bridge::new(Arc::new(backend)), journal)
}

fn assert_sessions_then_engine(events: &[String], sessions: usize) {
    assert_eq!(events.len(), sessions + 1, "{events:?}");
    let (engine, freed) = events.split_last().unwrap();
    assert!(freed.iter().all(|e| e.starts_with("session ")), "{events:?}");
    assert_eq!(engine, "engine 0");
}

#[test]
fn test_shutdown_frees_cached_sessions_before_engine() {
    let (bridge, journal) = recording_bridge(None);
    bridge.setup(&test_config()).unwrap();
    for partition in ["a", "b", "c"] {
        bridge.acquire_session(partition).unwrap();
    }
    assert!(journal.events().is_empty());

    bridge.shutdown().unwrap();

    assert_sessions_then_engine(&journal.events(), 3);
    assert_eq!(journal.live_engines(), 0);
    assert_eq!(bridge.session_count(), 0);
}

#[test]
fn test_engine_free_uses_shutdown_order() {
    let (bridge, journal) = recording_bridge(None);
    let engine = bridge.setup(&test_config()).unwrap();
    bridge.get_session(engine, PARTITION_1).unwrap();
    bridge.get_session(engine, PARTITION_2).unwrap();

    bridge.free_engine(engine).unwrap();

    assert_sessions_then_engine(&journal.events(), 2);
    assert_eq!(bridge.free_engine(engine), Err(BridgeError::InvalidHandle(engine)));
}

#[test]
fn test_lost_setup_race_frees_engine() {
    const RACERS: usize = 8;
    let (bridge, journal) = recording_bridge(Some(Arc::new(Barrier::new(RACERS))));
    let bridge = Arc::new(bridge);

    let handles: Vec<_> = (0..RACERS)
        .map(|_| {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || bridge.setup(&test_config()))
        })
        .collect();
    let results: Vec<BridgeResult<Handle>> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| *r == Err(BridgeError::AlreadyConfigured))
    );
    // Every racer built an engine; only the winner's survives
    assert_eq!(journal.engines_built.load(Ordering::SeqCst), RACERS);
    assert_eq!(journal.live_engines(), 1);

    bridge.shutdown().unwrap();
    assert_eq!(journal.live_engines(), 0);
}

#[test]
fn test_uncached_session_keeps_engine_alive() {
    let (bridge, journal) = recording_bridge(None);
    bridge.setup(&test_config().with_session_caching(false)).unwrap();
    let session = bridge.acquire_session(PARTITION_1).unwrap();

    bridge.shutdown().unwrap();
    assert!(journal.events().is_empty());
    assert_eq!(journal.live_engines(), 1);

    bridge.free_session(session).unwrap();
    assert_eq!(
        journal.events(),
        vec![format!("session {PARTITION_1}"), "engine 0".to_string()]
    );
    assert_eq!(journal.live_engines(), 0);
}

#[test]
fn test_raced_duplicate_session_is_freed() {
    const RACERS: usize = 16;
    let (bridge, journal) = recording_bridge(None);
    bridge.setup(&test_config()).unwrap();
    let bridge = Arc::new(bridge);
    let barrier = Arc::new(Barrier::new(RACERS));

    let handles: Vec<_> = (0..RACERS)
        .map(|_| {
            let bridge = Arc::clone(&bridge);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                bridge.acquire_session("shared").unwrap()
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let metrics = bridge.metrics();
    // Each discarded duplicate was dropped; the cached one is still live
    assert_eq!(journal.events().len() as u64, metrics.duplicates_discarded);
    assert_eq!(metrics.sessions_built, metrics.duplicates_discarded + 1);

    bridge.shutdown().unwrap();
    assert_eq!(journal.events().last().map(String::as_str), Some("engine 0"));
}
