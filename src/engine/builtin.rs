//! In-process engine with an in-memory metastore and a static KMS.
//!
//! Key hierarchy, per engine:
//! - KMS key: HKDF of the static master key, separated by service/product
//! - System key `_SK_{service}_{product}`: random, sealed under the KMS key
//! - Intermediate key `_IK_{partition}_{service}_{product}`: random, sealed
//!   under the system key, loaded once per session
//! - Data row key: random per encrypt call, sealed under the intermediate key
//!
//! Encrypted records are JSON `DataRowRecord`s using the field names of the
//! other bindings. Records are opaque to the bridge; only this module reads them.

use super::aead::{self, SecretKey};
use super::{EngineBackend, NativeEngine, NativeSession};
use crate::config::EngineConfig;
use crate::error::{BridgeError, BridgeResult};
use ring::rand::SystemRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use zeroize::Zeroizing;

/// Backend that builds [`BuiltinEngine`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinBackend;

impl BuiltinBackend {
    pub fn new() -> Self {
        Self
    }
}

impl EngineBackend for BuiltinBackend {
    fn name(&self) -> &str {
        "builtin"
    }

    fn new_engine(&self, config: &EngineConfig) -> BridgeResult<Box<dyn NativeEngine>> {
        Ok(Box::new(BuiltinEngine::new(config)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct KeyMeta {
    #[serde(rename = "KeyId")]
    id: String,
    #[serde(rename = "Created")]
    created: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct EnvelopeKeyRecord {
    #[serde(rename = "Created")]
    created: i64,
    #[serde(rename = "Key", with = "base64_bytes")]
    encrypted_key: Vec<u8>,
    #[serde(
        rename = "ParentKeyMeta",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    parent_key_meta: Option<KeyMeta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct DataRowRecord {
    #[serde(rename = "Key")]
    key: EnvelopeKeyRecord,
    #[serde(rename = "Data", with = "base64_bytes")]
    data: Vec<u8>,
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(Error::custom)
    }
}

/// Key records by id. One version per id: keys never expire here.
#[derive(Debug, Default)]
struct MemoryMetastore {
    keys: Mutex<HashMap<String, EnvelopeKeyRecord>>,
}

impl MemoryMetastore {
    fn load(&self, id: &str) -> Option<EnvelopeKeyRecord> {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Store `record` unless `id` already exists; returns the record that won.
    fn store_if_absent(&self, id: &str, record: EnvelopeKeyRecord) -> EnvelopeKeyRecord {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.to_string())
            .or_insert(record)
            .clone()
    }

    fn len(&self) -> usize {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct EngineCore {
    service: String,
    product: String,
    kms_key: SecretKey,
    metastore: MemoryMetastore,
    rng: SystemRandom,
}

impl EngineCore {
    fn system_key_id(&self) -> String {
        format!("_SK_{}_{}", self.service, self.product)
    }

    fn intermediate_key_id(&self, partition: &str) -> String {
        format!("_IK_{}_{}_{}", partition, self.service, self.product)
    }

    fn system_key(&self) -> BridgeResult<(KeyMeta, SecretKey)> {
        let id = self.system_key_id();
        let record = match self.metastore.load(&id) {
            Some(record) => record,
            None => {
                let fresh = aead::generate_key(&self.rng)?;
                let record = EnvelopeKeyRecord {
                    created: now_secs(),
                    encrypted_key: aead::seal(&self.rng, &self.kms_key, &fresh[..], id.as_bytes())?,
                    parent_key_meta: None,
                };
                self.metastore.store_if_absent(&id, record)
            }
        };
        let key = aead::open_key(&self.kms_key, &record.encrypted_key, id.as_bytes())
            .map_err(|e| BridgeError::native(format!("kms unable to decrypt system key: {e}")))?;
        Ok((
            KeyMeta {
                id,
                created: record.created,
            },
            key,
        ))
    }

    /// Load or create the intermediate key for `partition`.
    fn intermediate_key(&self, partition: &str) -> BridgeResult<(KeyMeta, SecretKey)> {
        let (sk_meta, sk) = self.system_key()?;
        let id = self.intermediate_key_id(partition);
        let record = match self.metastore.load(&id) {
            Some(record) => record,
            None => {
                let fresh = aead::generate_key(&self.rng)?;
                let record = EnvelopeKeyRecord {
                    created: now_secs(),
                    encrypted_key: aead::seal(&self.rng, &sk, &fresh[..], id.as_bytes())?,
                    parent_key_meta: Some(sk_meta.clone()),
                };
                self.metastore.store_if_absent(&id, record)
            }
        };
        if record.parent_key_meta.as_ref().map(|m| m.id.as_str()) != Some(sk_meta.id.as_str()) {
            return Err(BridgeError::native(format!(
                "metastore record {id} has unexpected parent key"
            )));
        }
        let key = aead::open_key(&sk, &record.encrypted_key, id.as_bytes())?;
        Ok((
            KeyMeta {
                id,
                created: record.created,
            },
            key,
        ))
    }
}

/// Engine built by [`BuiltinBackend`].
pub struct BuiltinEngine {
    core: Arc<EngineCore>,
}

impl BuiltinEngine {
    pub fn new(config: &EngineConfig) -> BridgeResult<Self> {
        if config.metastore != "memory" {
            return Err(BridgeError::native(format!(
                "metastore '{}' is not supported by the built-in engine",
                config.metastore
            )));
        }
        if config.kms != "static" {
            return Err(BridgeError::native(format!(
                "kms '{}' is not supported by the built-in engine",
                config.kms
            )));
        }

        let master_key = match config.master_key()? {
            Some(key) => key,
            None => {
                tracing::warn!(
                    service = %config.service_name,
                    "no static master key configured, using an all-zero key"
                );
                Zeroizing::new([0u8; aead::KEY_SIZE])
            }
        };
        let kms_key = aead::derive_kms_key(&master_key, &config.service_name, &config.product_id)?;

        Ok(Self {
            core: Arc::new(EngineCore {
                service: config.service_name.clone(),
                product: config.product_id.clone(),
                kms_key,
                metastore: MemoryMetastore::default(),
                rng: SystemRandom::new(),
            }),
        })
    }

    /// Number of key records held by the in-memory metastore.
    pub fn stored_key_count(&self) -> usize {
        self.core.metastore.len()
    }
}

impl NativeEngine for BuiltinEngine {
    fn new_session(&self, partition: &str) -> BridgeResult<Box<dyn NativeSession>> {
        if partition.is_empty() {
            return Err(BridgeError::invalid("partition id cannot be empty"));
        }
        let (ik_meta, ik) = self.core.intermediate_key(partition)?;
        Ok(Box::new(BuiltinSession {
            core: Arc::clone(&self.core),
            ik_meta,
            ik,
        }))
    }
}

struct BuiltinSession {
    core: Arc<EngineCore>,
    ik_meta: KeyMeta,
    ik: SecretKey,
}

impl NativeSession for BuiltinSession {
    fn encrypt(&self, plaintext: &[u8]) -> BridgeResult<Vec<u8>> {
        let rng = &self.core.rng;
        let drk = aead::generate_key(rng)?;
        let data = aead::seal(rng, &drk, plaintext, b"")?;
        let created = now_secs();
        let record = DataRowRecord {
            key: EnvelopeKeyRecord {
                created,
                encrypted_key: aead::seal(rng, &self.ik, &drk[..], &created.to_be_bytes())?,
                parent_key_meta: Some(self.ik_meta.clone()),
            },
            data,
        };
        serde_json::to_vec(&record)
            .map_err(|e| BridgeError::native(format!("record encoding failed: {e}")))
    }

    fn decrypt(&self, record: &[u8]) -> BridgeResult<Vec<u8>> {
        let record: DataRowRecord = serde_json::from_slice(record)
            .map_err(|e| BridgeError::native(format!("invalid data row record: {e}")))?;
        let parent = record
            .key
            .parent_key_meta
            .as_ref()
            .ok_or_else(|| BridgeError::native("data row record has no parent key metadata"))?;
        if parent.id != self.ik_meta.id {
            return Err(BridgeError::native(format!(
                "parent key {} does not belong to this partition",
                parent.id
            )));
        }
        if parent.created != self.ik_meta.created {
            return Err(BridgeError::native(format!(
                "intermediate key {} version {} not found",
                parent.id, parent.created
            )));
        }
        let drk = aead::open_key(
            &self.ik,
            &record.key.encrypted_key,
            &record.key.created.to_be_bytes(),
        )?;
        aead::open(&drk, &record.data, b"")
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> BuiltinEngine {
        let config = EngineConfig::new("svc", "prod", "memory", "static")
            .with_static_master_key_hex("41".repeat(32));
        BuiltinEngine::new(&config).unwrap()
    }

    #[test]
    fn test_roundtrip_same_partition() {
        let engine = engine();
        let session = engine.new_session("p1").unwrap();
        let record = session.encrypt(b"Hello, World!").unwrap();
        assert_eq!(session.decrypt(&record).unwrap(), b"Hello, World!");
    }

    #[test]
    fn test_record_uses_binding_field_names() {
        let engine = engine();
        let record = engine.new_session("p1").unwrap().encrypt(b"x").unwrap();
        let text = String::from_utf8(record).unwrap();
        assert!(text.contains(r#""ParentKeyMeta":{"KeyId":"_IK_p1_svc_prod""#));
        assert!(text.contains(r#""Data":""#));
    }

    #[test]
    fn test_other_partition_rejected() {
        let engine = engine();
        let record = engine.new_session("p1").unwrap().encrypt(b"secret").unwrap();
        let err = engine.new_session("p2").unwrap().decrypt(&record).unwrap_err();
        assert!(matches!(err, BridgeError::NativeFailure(_)));
    }

    #[test]
    fn test_sessions_share_intermediate_key() {
        let engine = engine();
        let record = engine.new_session("p1").unwrap().encrypt(b"shared").unwrap();
        let again = engine.new_session("p1").unwrap();
        assert_eq!(again.decrypt(&record).unwrap(), b"shared");
        // System key + one intermediate key
        assert_eq!(engine.stored_key_count(), 2);
    }

    #[test]
    fn test_tampered_record_fails_authentication() {
        let engine = engine();
        let session = engine.new_session("p1").unwrap();
        let record = session.encrypt(b"payload").unwrap();
        let mut parsed: DataRowRecord = serde_json::from_slice(&record).unwrap();
        let last = parsed.data.len() - 1;
        parsed.data[last] ^= 0x01;
        let tampered = serde_json::to_vec(&parsed).unwrap();
        assert!(matches!(
            session.decrypt(&tampered),
            Err(BridgeError::NativeFailure(_))
        ));
    }

    #[test]
    fn test_unsupported_metastore() {
        let config = EngineConfig::new("svc", "prod", "dynamodb", "static");
        assert!(matches!(
            BuiltinEngine::new(&config),
            Err(BridgeError::NativeFailure(_))
        ));
    }

    #[test]
    fn test_garbage_record() {
        let session = engine().new_session("p1").unwrap();
        assert!(matches!(
            session.decrypt(b"not json"),
            Err(BridgeError::NativeFailure(_))
        ));
    }
}
