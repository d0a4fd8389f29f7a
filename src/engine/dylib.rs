//! Engine backend driven through a dynamically loaded `asherah_ffi` library.
//!
//! Every symbol is resolved up front when the library is opened. A library
//! missing any of them is rejected, so later calls never hit a null function
//! pointer.
//!
//! The native factory reads its static master key from the process
//! environment, not from the configuration record. A configured key is
//! therefore exported as [`MASTER_KEY_ENV`] for the duration of factory
//! construction and the previous value restored afterwards.

use super::{EngineBackend, NativeEngine, NativeSession};
use crate::config::EngineConfig;
use crate::error::{BridgeError, BridgeResult};
use libloading::Library;
use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, PoisonError};

/// Environment variable the native static KMS reads its master key from.
pub const MASTER_KEY_ENV: &str = "STATIC_MASTER_KEY_HEX";

/// Serializes the bridge's environment writes around factory construction.
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Byte buffer allocated by the native library; released with `asherah_buffer_free`.
#[repr(C)]
struct AsherahBuffer {
    data: *mut u8,
    len: usize,
}

impl AsherahBuffer {
    fn empty() -> Self {
        Self {
            data: std::ptr::null_mut(),
            len: 0,
        }
    }
}

type FactoryNewWithConfig = unsafe extern "C" fn(*const c_char) -> *mut c_void;
type FactoryFree = unsafe extern "C" fn(*mut c_void);
type FactoryGetSession = unsafe extern "C" fn(*mut c_void, *const c_char) -> *mut c_void;
type SessionFree = unsafe extern "C" fn(*mut c_void);
type CryptFn = unsafe extern "C" fn(*mut c_void, *const u8, usize, *mut AsherahBuffer) -> c_int;
type BufferFree = unsafe extern "C" fn(*mut AsherahBuffer);
type LastErrorMessage = unsafe extern "C" fn() -> *const c_char;

/// Resolved entry points. Function pointers stay valid while `_library` is alive.
struct NativeApi {
    factory_new_with_config: FactoryNewWithConfig,
    factory_free: FactoryFree,
    factory_get_session: FactoryGetSession,
    session_free: SessionFree,
    encrypt_to_json: CryptFn,
    decrypt_from_json: CryptFn,
    buffer_free: BufferFree,
    last_error_message: LastErrorMessage,
    // None only for in-process symbol tables
    _library: Option<Library>,
}

impl NativeApi {
    fn open(path: &Path) -> BridgeResult<Self> {
        // SAFETY: loading runs the library's initializers; the candidate is
        // expected to be an asherah_ffi build
        let library = unsafe { Library::new(path) }
            .map_err(|e| BridgeError::LoadFailure(e.to_string()))?;

        // SAFETY: each symbol is cast to the signature published by asherah_ffi
        unsafe {
            Ok(Self {
                factory_new_with_config: symbol(&library, "asherah_factory_new_with_config")?,
                factory_free: symbol(&library, "asherah_factory_free")?,
                factory_get_session: symbol(&library, "asherah_factory_get_session")?,
                session_free: symbol(&library, "asherah_session_free")?,
                encrypt_to_json: symbol(&library, "asherah_encrypt_to_json")?,
                decrypt_from_json: symbol(&library, "asherah_decrypt_from_json")?,
                buffer_free: symbol(&library, "asherah_buffer_free")?,
                last_error_message: symbol(&library, "asherah_last_error_message")?,
                _library: Some(library),
            })
        }
    }

    /// Message reported by the native library for its most recent failure.
    fn last_error(&self, fallback: &str) -> String {
        // SAFETY: the returned pointer is null or a NUL-terminated string owned
        // by the library, valid until its next call on this thread
        let ptr = unsafe { (self.last_error_message)() };
        if ptr.is_null() {
            return fallback.to_string();
        }
        let message = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
        if message.is_empty() {
            fallback.to_string()
        } else {
            message
        }
    }
}

/// # Safety
/// `T` must be the function pointer type matching the exported symbol.
unsafe fn symbol<T: Copy>(library: &Library, name: &str) -> BridgeResult<T> {
    let symbol = unsafe { library.get::<T>(name.as_bytes()) }
        .map_err(|_| BridgeError::LoadFailure(format!("missing symbol {name}")))?;
    Ok(*symbol)
}

/// Restores the master key variable when factory construction ends.
struct MasterKeyEnv {
    previous: Option<std::ffi::OsString>,
}

impl MasterKeyEnv {
    /// # Safety
    /// Must be called with `ENV_LOCK` held.
    unsafe fn export(key: &str) -> Self {
        let previous = std::env::var_os(MASTER_KEY_ENV);
        // SAFETY: writes are serialized by ENV_LOCK; the native factory reads
        // the variable during construction on this thread
        unsafe { std::env::set_var(MASTER_KEY_ENV, key) };
        Self { previous }
    }
}

impl Drop for MasterKeyEnv {
    fn drop(&mut self) {
        // SAFETY: still under ENV_LOCK, see export
        unsafe {
            match self.previous.take() {
                Some(value) => std::env::set_var(MASTER_KEY_ENV, value),
                None => std::env::remove_var(MASTER_KEY_ENV),
            }
        }
    }
}

/// Backend over a loaded native library.
pub struct DylibBackend {
    path: PathBuf,
    api: Arc<NativeApi>,
}

impl DylibBackend {
    /// Load `path` and resolve the full symbol set.
    pub fn open(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        let api = NativeApi::open(path)?;
        tracing::info!(path = %path.display(), "native library loaded");
        Ok(Self {
            path: path.to_path_buf(),
            api: Arc::new(api),
        })
    }

    /// Path the library was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for DylibBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DylibBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl EngineBackend for DylibBackend {
    fn name(&self) -> &str {
        "dylib"
    }

    fn new_engine(&self, config: &EngineConfig) -> BridgeResult<Box<dyn NativeEngine>> {
        // The native record has no key field; the key travels by environment
        let forwarded = EngineConfig {
            static_master_key_hex: None,
            ..config.clone()
        };
        let json = CString::new(forwarded.to_json()?)
            .map_err(|_| BridgeError::invalid("config JSON contains a NUL byte"))?;
        let key = config
            .static_master_key_hex
            .as_deref()
            .filter(|_| config.kms == "static")
            .map(str::trim);

        let raw = {
            let _lock = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
            // SAFETY: ENV_LOCK is held until the guard is dropped
            let _env = key.map(|key| unsafe { MasterKeyEnv::export(key) });
            // SAFETY: json is a valid NUL-terminated string for the duration of the call
            unsafe { (self.api.factory_new_with_config)(json.as_ptr()) }
        };
        let factory = NonNull::new(raw).ok_or_else(|| {
            BridgeError::native(self.api.last_error("factory construction failed"))
        })?;
        Ok(Box::new(DylibEngine {
            api: Arc::clone(&self.api),
            factory,
        }))
    }
}

struct DylibEngine {
    api: Arc<NativeApi>,
    factory: NonNull<c_void>,
}

// SAFETY: asherah_ffi factories are internally synchronized and may be used
// and freed from any thread
unsafe impl Send for DylibEngine {}
unsafe impl Sync for DylibEngine {}

impl NativeEngine for DylibEngine {
    fn new_session(&self, partition: &str) -> BridgeResult<Box<dyn NativeSession>> {
        let partition_c = CString::new(partition)
            .map_err(|_| BridgeError::invalid("partition id contains a NUL byte"))?;
        // SAFETY: factory is live for as long as self; partition_c outlives the call
        let raw = unsafe {
            (self.api.factory_get_session)(self.factory.as_ptr(), partition_c.as_ptr())
        };
        let session = NonNull::new(raw).ok_or_else(|| {
            BridgeError::native(self.api.last_error("session construction failed"))
        })?;
        Ok(Box::new(DylibSession {
            api: Arc::clone(&self.api),
            session,
        }))
    }
}

impl Drop for DylibEngine {
    fn drop(&mut self) {
        // SAFETY: factory came from factory_new_with_config and is freed once
        unsafe { (self.api.factory_free)(self.factory.as_ptr()) };
    }
}

struct DylibSession {
    api: Arc<NativeApi>,
    session: NonNull<c_void>,
}

// SAFETY: see DylibEngine
unsafe impl Send for DylibSession {}
unsafe impl Sync for DylibSession {}

impl DylibSession {
    fn call(&self, op: CryptFn, input: &[u8], what: &str) -> BridgeResult<Vec<u8>> {
        let mut out = AsherahBuffer::empty();
        // SAFETY: session is live; input is readable for input.len() bytes;
        // out is a valid AsherahBuffer for the callee to fill
        let status = unsafe { op(self.session.as_ptr(), input.as_ptr(), input.len(), &mut out) };
        if status != 0 {
            if !out.data.is_null() {
                unsafe { (self.api.buffer_free)(&mut out) };
            }
            return Err(BridgeError::native(
                self.api.last_error(&format!("{what} failed with status {status}")),
            ));
        }
        let bytes = if out.data.is_null() || out.len == 0 {
            Vec::new()
        } else {
            // SAFETY: on success the callee filled data with len bytes
            unsafe { std::slice::from_raw_parts(out.data, out.len) }.to_vec()
        };
        unsafe { (self.api.buffer_free)(&mut out) };
        Ok(bytes)
    }
}

impl NativeSession for DylibSession {
    fn encrypt(&self, plaintext: &[u8]) -> BridgeResult<Vec<u8>> {
        self.call(self.api.encrypt_to_json, plaintext, "encrypt")
    }

    fn decrypt(&self, record: &[u8]) -> BridgeResult<Vec<u8>> {
        self.call(self.api.decrypt_from_json, record, "decrypt")
    }
}

impl Drop for DylibSession {
    fn drop(&mut self) {
        // SAFETY: session came from factory_get_session and is freed once
        unsafe { (self.api.session_free)(self.session.as_ptr()) };
    }
}
