//! Native library discovery and one-time loading.
//!
//! Discovery is a pure function from a [`LoaderEnv`] snapshot to an ordered
//! candidate list; [`NativeLoader`] memoizes the outcome of trying them.

use crate::engine::{DylibBackend, EngineBackend};
use crate::error::{BridgeError, BridgeResult};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Stem of the native engine library.
pub const LIBRARY_NAME: &str = "asherah_ffi";

/// Environment variable holding an override path or directory.
pub const OVERRIDE_ENV: &str = "ASHERAH_BRIDGE_NATIVE";

/// Platform file names for library `name` on `os` (`std::env::consts::OS` values).
pub fn library_basenames(os: &str, name: &str) -> Vec<String> {
    match os {
        "windows" => vec![format!("{name}.dll")],
        "macos" => vec![format!("lib{name}.dylib")],
        _ => vec![format!("lib{name}.so")],
    }
}

/// Inputs to candidate discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderEnv {
    /// Explicit library path, or a directory to search.
    pub override_path: Option<PathBuf>,
    /// Cargo's target directory, if set.
    pub cargo_target_dir: Option<PathBuf>,
    /// Directory the bridge crate was built from. It and its parent are
    /// searched for conventional build outputs.
    pub source_dir: Option<PathBuf>,
    /// File names to look for.
    pub basenames: Vec<String>,
}

impl LoaderEnv {
    /// Snapshot the process environment.
    pub fn from_env() -> Self {
        let var = |key: &str| {
            std::env::var_os(key)
                .map(PathBuf::from)
                .filter(|p| !p.as_os_str().is_empty())
        };
        Self {
            override_path: var(OVERRIDE_ENV),
            cargo_target_dir: var("CARGO_TARGET_DIR"),
            source_dir: Some(PathBuf::from(env!("CARGO_MANIFEST_DIR"))),
            basenames: library_basenames(std::env::consts::OS, LIBRARY_NAME),
        }
    }

    pub fn with_override(mut self, path: impl Into<PathBuf>) -> Self {
        self.override_path = Some(path.into());
        self
    }
}

/// Ordered, de-duplicated library candidates.
///
/// 1. override path (expanded with basenames when it is a directory)
/// 2. `$CARGO_TARGET_DIR/{debug,release}`
/// 3. existing build outputs under the bridge's source directory and its
///    parent, including a nested `asherah-ffi` crate's target directory
/// 4. bare basenames for the OS search path
pub fn candidate_paths(env: &LoaderEnv) -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(path) = &env.override_path {
        if path.is_dir() {
            paths.extend(env.basenames.iter().map(|name| path.join(name)));
        } else {
            paths.push(path.clone());
        }
    }

    if let Some(target) = &env.cargo_target_dir {
        for name in &env.basenames {
            paths.push(target.join("debug").join(name));
            paths.push(target.join("release").join(name));
        }
    }

    if let Some(source) = env.source_dir.as_deref() {
        for root in std::iter::once(source).chain(source.parent()) {
            let dirs = [
                root.join("target").join("debug"),
                root.join("target").join("release"),
                root.join("asherah-ffi").join("target").join("debug"),
                root.join("asherah-ffi").join("target").join("release"),
            ];
            for dir in &dirs {
                for name in &env.basenames {
                    let candidate = dir.join(name);
                    if candidate.exists() {
                        paths.push(candidate);
                    }
                }
            }
        }
    }

    paths.extend(env.basenames.iter().map(PathBuf::from));

    let mut seen = HashSet::new();
    paths.retain(|p| !p.as_os_str().is_empty() && seen.insert(p.clone()));
    paths
}

/// Try `candidates` in order with `open`, returning the first success.
pub fn load_first<T, F>(candidates: &[PathBuf], mut open: F) -> BridgeResult<(PathBuf, T)>
where
    F: FnMut(&Path) -> BridgeResult<T>,
{
    if candidates.is_empty() {
        return Err(BridgeError::LoadFailure(
            "no candidate native library paths found".to_string(),
        ));
    }

    let mut attempts = Vec::with_capacity(candidates.len());
    for path in candidates {
        match open(path) {
            Ok(value) => return Ok((path.clone(), value)),
            Err(e) => {
                let reason = match e {
                    BridgeError::LoadFailure(msg) => msg,
                    other => other.to_string(),
                };
                tracing::debug!(
                    path = %path.display(),
                    %reason,
                    "native library candidate rejected"
                );
                attempts.push(format!("{} ({reason})", path.display()));
            }
        }
    }

    Err(BridgeError::LoadFailure(format!(
        "unable to load native library; attempted: {}",
        attempts.join("; ")
    )))
}

/// Opens one candidate path into a backend.
pub type BackendOpener = dyn Fn(&Path) -> BridgeResult<Arc<dyn EngineBackend>> + Send + Sync;

enum LoadState {
    Unloaded,
    Loaded(Arc<dyn EngineBackend>),
    Failed(String),
}

/// Memoized library loader.
///
/// Discovery runs at most once: every later [`NativeLoader::ensure_loaded`]
/// returns the cached backend or the cached failure. Only
/// [`NativeLoader::load_from`] retries after a failure.
pub struct NativeLoader {
    env: LoaderEnv,
    opener: Box<BackendOpener>,
    state: Mutex<LoadState>,
}

impl NativeLoader {
    /// Loader that opens candidates as [`DylibBackend`]s.
    pub fn new(env: LoaderEnv) -> Self {
        Self::with_opener(env, |path| {
            DylibBackend::open(path).map(|backend| Arc::new(backend) as Arc<dyn EngineBackend>)
        })
    }

    pub fn from_env() -> Self {
        Self::new(LoaderEnv::from_env())
    }

    pub fn with_opener<F>(env: LoaderEnv, opener: F) -> Self
    where
        F: Fn(&Path) -> BridgeResult<Arc<dyn EngineBackend>> + Send + Sync + 'static,
    {
        Self {
            env,
            opener: Box::new(opener),
            state: Mutex::new(LoadState::Unloaded),
        }
    }

    /// The loaded backend, running discovery on first use.
    pub fn ensure_loaded(&self) -> BridgeResult<Arc<dyn EngineBackend>> {
        let mut state = self.lock();
        match &*state {
            LoadState::Loaded(backend) => return Ok(Arc::clone(backend)),
            LoadState::Failed(msg) => return Err(BridgeError::LoadFailure(msg.clone())),
            LoadState::Unloaded => {}
        }
        let outcome = self.discover(&self.env);
        *state = Self::settle(&outcome);
        outcome
    }

    /// Load from an explicit path (or rerun default discovery with `None`).
    ///
    /// A no-op when a library is already loaded; otherwise the outcome
    /// replaces any cached failure.
    pub fn load_from(&self, path: Option<&Path>) -> BridgeResult<Arc<dyn EngineBackend>> {
        let mut state = self.lock();
        if let LoadState::Loaded(backend) = &*state {
            return Ok(Arc::clone(backend));
        }
        let env = match path {
            Some(path) => self.env.clone().with_override(path),
            None => self.env.clone(),
        };
        let outcome = self.discover(&env);
        *state = Self::settle(&outcome);
        outcome
    }

    pub fn is_loaded(&self) -> bool {
        matches!(*self.lock(), LoadState::Loaded(_))
    }

    fn discover(&self, env: &LoaderEnv) -> BridgeResult<Arc<dyn EngineBackend>> {
        let candidates = candidate_paths(env);
        match load_first(&candidates, |path| (self.opener)(path)) {
            Ok((path, backend)) => {
                tracing::info!(
                    path = %path.display(),
                    backend = backend.name(),
                    "engine backend ready"
                );
                Ok(backend)
            }
            Err(e) => {
                tracing::warn!(error = %e, "native library discovery failed");
                Err(e)
            }
        }
    }

    fn settle(outcome: &BridgeResult<Arc<dyn EngineBackend>>) -> LoadState {
        match outcome {
            Ok(backend) => LoadState::Loaded(Arc::clone(backend)),
            Err(BridgeError::LoadFailure(msg)) => LoadState::Failed(msg.clone()),
            Err(other) => LoadState::Failed(other.to_string()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LoadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for NativeLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLoader")
            .field("env", &self.env)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
