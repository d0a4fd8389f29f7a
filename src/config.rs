//! Engine configuration record.
//!
//! JSON keys match the configuration accepted by the other language bindings
//! (`ServiceName`, `ProductID`, `Metastore`, `KMS`, ...). Only the required
//! fields and the static master key are validated here; everything else is
//! passed through to the native engine untouched.

use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use zeroize::Zeroizing;

/// Master keys are AES-256 keys.
pub const MASTER_KEY_LEN: usize = 32;

/// Configuration for a long-lived engine.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    #[serde(rename = "ServiceName")]
    pub service_name: String,
    #[serde(rename = "ProductID")]
    pub product_id: String,
    #[serde(rename = "Metastore")]
    pub metastore: String,
    #[serde(rename = "KMS")]
    pub kms: String,
    /// Hex-encoded 32-byte master key, static KMS only.
    #[serde(rename = "StaticMasterKeyHex", skip_serializing_if = "Option::is_none")]
    pub static_master_key_hex: Option<String>,
    #[serde(rename = "ExpireAfter", skip_serializing_if = "Option::is_none")]
    pub expire_after: Option<i64>,
    #[serde(rename = "CheckInterval", skip_serializing_if = "Option::is_none")]
    pub check_interval: Option<i64>,
    #[serde(rename = "ConnectionString", skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,
    #[serde(
        rename = "ReplicaReadConsistency",
        skip_serializing_if = "Option::is_none"
    )]
    pub replica_read_consistency: Option<String>,
    #[serde(rename = "DynamoDBEndpoint", skip_serializing_if = "Option::is_none")]
    pub dynamo_db_endpoint: Option<String>,
    #[serde(rename = "DynamoDBRegion", skip_serializing_if = "Option::is_none")]
    pub dynamo_db_region: Option<String>,
    #[serde(rename = "DynamoDBTableName", skip_serializing_if = "Option::is_none")]
    pub dynamo_db_table_name: Option<String>,
    #[serde(rename = "SessionCacheMaxSize", skip_serializing_if = "Option::is_none")]
    pub session_cache_max_size: Option<u32>,
    #[serde(rename = "SessionCacheDuration", skip_serializing_if = "Option::is_none")]
    pub session_cache_duration: Option<i64>,
    #[serde(rename = "RegionMap", skip_serializing_if = "Option::is_none")]
    pub region_map: Option<HashMap<String, String>>,
    #[serde(rename = "PreferredRegion", skip_serializing_if = "Option::is_none")]
    pub preferred_region: Option<String>,
    #[serde(rename = "EnableRegionSuffix", skip_serializing_if = "Option::is_none")]
    pub enable_region_suffix: Option<bool>,
    #[serde(rename = "EnableSessionCaching", skip_serializing_if = "Option::is_none")]
    pub enable_session_caching: Option<bool>,
    #[serde(rename = "Verbose", skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
}

impl EngineConfig {
    /// Minimal configuration with the four required fields.
    pub fn new(
        service_name: impl Into<String>,
        product_id: impl Into<String>,
        metastore: impl Into<String>,
        kms: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            product_id: product_id.into(),
            metastore: metastore.into(),
            kms: kms.into(),
            ..Self::default()
        }
    }

    pub fn with_static_master_key_hex(mut self, hex_key: impl Into<String>) -> Self {
        self.static_master_key_hex = Some(hex_key.into());
        self
    }

    pub fn with_session_caching(mut self, enabled: bool) -> Self {
        self.enable_session_caching = Some(enabled);
        self
    }

    /// Parse a JSON record and validate it.
    pub fn from_json(json: &str) -> BridgeResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BridgeError::invalid(format!("invalid config JSON: {e}")))?;
        config.normalized()
    }

    /// Derive configuration from process environment variables.
    pub fn from_env() -> BridgeResult<Self> {
        Self::from_env_source(|key| std::env::var(key).ok())
    }

    /// Derive configuration from an arbitrary variable source.
    pub fn from_env_source<F>(lookup: F) -> BridgeResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let int = |key: &str| var(key).and_then(|v| v.trim().parse::<i64>().ok());
        let flag = |key: &str| var(key).map(|v| parse_flag(&v));

        let config = Self {
            service_name: var("SERVICE_NAME").unwrap_or_else(|| "service".to_string()),
            product_id: var("PRODUCT_ID").unwrap_or_else(|| "product".to_string()),
            metastore: var("Metastore").unwrap_or_else(|| "memory".to_string()),
            kms: var("KMS").unwrap_or_else(|| "static".to_string()),
            static_master_key_hex: var("STATIC_MASTER_KEY_HEX"),
            expire_after: int("EXPIRE_AFTER_SECS"),
            check_interval: int("REVOKE_CHECK_INTERVAL_SECS"),
            connection_string: var("CONNECTION_STRING"),
            preferred_region: var("PREFERRED_REGION"),
            enable_session_caching: flag("SESSION_CACHE"),
            verbose: flag("ASHERAH_VERBOSE"),
            ..Self::default()
        };
        config.normalized()
    }

    /// Apply alias normalization and required-field checks.
    pub fn normalized(mut self) -> BridgeResult<Self> {
        self.metastore = normalize_alias(&self.metastore);
        self.kms = normalize_alias(&self.kms);
        self.validate()?;
        Ok(self)
    }

    /// Required-field and master-key checks.
    pub fn validate(&self) -> BridgeResult<()> {
        require("ServiceName", &self.service_name)?;
        require("ProductID", &self.product_id)?;
        require("Metastore", &self.metastore)?;
        require("KMS", &self.kms)?;
        if let Some(hex_key) = &self.static_master_key_hex {
            decode_master_key(hex_key)?;
        }
        Ok(())
    }

    /// Session caching defaults to enabled.
    pub fn session_caching(&self) -> bool {
        self.enable_session_caching.unwrap_or(true)
    }

    pub fn verbose(&self) -> bool {
        self.verbose.unwrap_or(false)
    }

    /// Decoded static master key, if one was configured.
    pub fn master_key(&self) -> BridgeResult<Option<Zeroizing<[u8; MASTER_KEY_LEN]>>> {
        self.static_master_key_hex
            .as_deref()
            .map(decode_master_key)
            .transpose()
    }

    /// Serialize for handing to the native engine.
    pub fn to_json(&self) -> BridgeResult<String> {
        serde_json::to_string(self)
            .map_err(|e| BridgeError::invalid(format!("config encoding failed: {e}")))
    }
}

fn require(field: &str, value: &str) -> BridgeResult<()> {
    if value.trim().is_empty() {
        return Err(BridgeError::invalid(format!("{field} is required")));
    }
    Ok(())
}

/// Legacy debug aliases used by interop harnesses.
fn normalize_alias(value: &str) -> String {
    match value.trim().to_lowercase().as_str() {
        "test-debug-memory" => "memory".to_string(),
        "test-debug-static" => "static".to_string(),
        "test-debug-sqlite" => "sqlite".to_string(),
        other => other.to_string(),
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn decode_master_key(hex_key: &str) -> BridgeResult<Zeroizing<[u8; MASTER_KEY_LEN]>> {
    let bytes = Zeroizing::new(
        hex::decode(hex_key.trim())
            .map_err(|e| BridgeError::invalid(format!("StaticMasterKeyHex is not hex: {e}")))?,
    );
    if bytes.len() != MASTER_KEY_LEN {
        return Err(BridgeError::invalid(format!(
            "StaticMasterKeyHex must decode to {MASTER_KEY_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    let mut key = Zeroizing::new([0u8; MASTER_KEY_LEN]);
    key.copy_from_slice(&bytes);
    Ok(key)
}
