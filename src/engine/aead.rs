//! AES-256-GCM sealing and HKDF key derivation for the built-in engine.
//!
//! Sealed format: `[nonce(12)][ciphertext][auth_tag(16)]`. Every key sealed
//! here is either freshly generated or wraps exactly one child key, so random
//! nonces from `SystemRandom` are sufficient.

use crate::error::{BridgeError, BridgeResult};
use hkdf::Hkdf;
use ring::{
    aead::{AES_256_GCM, Aad, LessSafeKey, Nonce, UnboundKey},
    rand::{SecureRandom, SystemRandom},
};
use sha2::Sha256;
use zeroize::Zeroizing;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;
/// Total overhead added to plaintext: 12-byte nonce + 16-byte authentication tag
pub const SEAL_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// Fixed HKDF salt prefix for the static KMS wrapping key.
const KMS_SALT_PREFIX: &[u8] = b"asherah_bridge_static_kms_v1_";

pub type SecretKey = Zeroizing<[u8; KEY_SIZE]>;

/// Generate a random 256-bit key.
pub fn generate_key(rng: &SystemRandom) -> BridgeResult<SecretKey> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    rng.fill(&mut key[..])
        .map_err(|_| BridgeError::native("random number generation failed"))?;
    Ok(key)
}

/// Encrypt `plaintext` under `key`, binding `aad`.
pub fn seal(
    rng: &SystemRandom,
    key: &[u8; KEY_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> BridgeResult<Vec<u8>> {
    let aead_key = less_safe_key(key)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rng.fill(&mut nonce_bytes)
        .map_err(|_| BridgeError::native("random number generation failed"))?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = Vec::with_capacity(plaintext.len() + TAG_SIZE);
    in_out.extend_from_slice(plaintext);
    aead_key
        .seal_in_place_append_tag(nonce, Aad::from(aad), &mut in_out)
        .map_err(|_| BridgeError::native("AES-GCM encryption failed"))?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + in_out.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&in_out);
    Ok(sealed)
}

/// Decrypt a blob produced by [`seal`] with the same `key` and `aad`.
pub fn open(key: &[u8; KEY_SIZE], sealed: &[u8], aad: &[u8]) -> BridgeResult<Vec<u8>> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(BridgeError::native("ciphertext too short"));
    }
    let aead_key = less_safe_key(key)?;

    let (nonce_bytes, encrypted) = sealed.split_at(NONCE_SIZE);
    let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
        .map_err(|_| BridgeError::native("invalid nonce"))?;

    let mut in_out = encrypted.to_vec();
    let plaintext_len = aead_key
        .open_in_place(nonce, Aad::from(aad), &mut in_out)
        .map_err(|_| BridgeError::native("authentication verification failed"))?
        .len();
    in_out.truncate(plaintext_len);
    Ok(in_out)
}

/// Decrypt a wrapped 256-bit key.
pub fn open_key(key: &[u8; KEY_SIZE], sealed: &[u8], aad: &[u8]) -> BridgeResult<SecretKey> {
    let bytes = Zeroizing::new(open(key, sealed, aad)?);
    if bytes.len() != KEY_SIZE {
        return Err(BridgeError::native(format!(
            "unwrapped key has {} bytes, expected {KEY_SIZE}",
            bytes.len()
        )));
    }
    let mut out = Zeroizing::new([0u8; KEY_SIZE]);
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Derive the static KMS wrapping key from the master key, separated per
/// service and product.
///
/// Salt layout: `[prefix][service_len:u16BE][service][product_len:u16BE][product]`
/// so that (service="ab", product="c") never collides with ("a", "bc").
pub fn derive_kms_key(
    master_key: &[u8; KEY_SIZE],
    service: &str,
    product: &str,
) -> BridgeResult<SecretKey> {
    let mut salt = Vec::with_capacity(KMS_SALT_PREFIX.len() + 4 + service.len() + product.len());
    salt.extend_from_slice(KMS_SALT_PREFIX);
    for part in [service, product] {
        let len = u16::try_from(part.len())
            .map_err(|_| BridgeError::invalid("service or product name too long"))?;
        salt.extend_from_slice(&len.to_be_bytes());
        salt.extend_from_slice(part.as_bytes());
    }

    let hkdf = Hkdf::<Sha256>::new(Some(&salt), master_key);
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(b"kms", &mut key[..])
        .map_err(|_| BridgeError::native("HKDF expand failed"))?;
    Ok(key)
}

fn less_safe_key(key: &[u8; KEY_SIZE]) -> BridgeResult<LessSafeKey> {
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| BridgeError::native("invalid AES-256 key"))?;
    Ok(LessSafeKey::new(unbound))
}
