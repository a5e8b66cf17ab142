//! Password-derived AES-256-GCM sealing of archive blobs and strings.
//!
//! Security model
//! - Confidentiality and integrity come from AES-256-GCM; a fresh random nonce is
//!   drawn for every seal so the same plaintext never produces the same ciphertext
//!   twice, unlike a deterministic-nonce design.
//! - The key is derived from a password via PBKDF2-HMAC-SHA256 with a fixed
//!   iteration count. The wire format (`nonce || ciphertext || tag`) and the KDF
//!   parameters are pinned so a browser's WebCrypto layer can derive the same key
//!   and decrypt the same bytes client-side.
//! - A wrong password is never detected by key derivation alone (PBKDF2 cannot
//!   fail); callers must verify a [`Crypto`] against a known `check_value` before
//!   trusting it (see `dlfi-core::config`).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::Hmac;
use rand::RngCore;
use sha2::Sha256;

/// Size of the random salt, in bytes.
pub const SALT_SIZE: usize = 16;
/// Size of the AES-GCM nonce, in bytes.
pub const NONCE_SIZE: usize = 12;
/// Derived key length, in bytes (AES-256).
pub const KEY_SIZE: usize = 32;
/// PBKDF2 iteration count. Pinned so a browser-side WebCrypto implementation
/// derives an identical key from the same password and salt.
pub const ITERATIONS: u32 = 100_000;

/// A fixed plaintext sealed with a candidate key and compared on archive open to
/// confirm the supplied password before any blob is touched.
pub const VERIFICATION_STRING: &[u8] = b"DLFI_VERIFICATION";

/// Errors raised by encryption and decryption.
#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    /// AEAD authentication failed: wrong key, wrong password, or tampered bytes.
    #[error("authentication failed: wrong key or corrupted ciphertext")]
    Auth,
    /// Sealed input was shorter than a nonce, i.e. clearly not a valid ciphertext.
    #[error("ciphertext truncated")]
    Truncated,
    /// A supplied salt or other base64 payload did not decode.
    #[error("invalid encoding: {0}")]
    Encoding(String),
}

/// AES-256-GCM crypto state for a vault, either active (password-derived key) or
/// disabled (pass-through).
#[derive(Clone)]
pub struct Crypto {
    key: Option<[u8; KEY_SIZE]>,
    salt: Option<[u8; SALT_SIZE]>,
}

impl Crypto {
    /// Construct a disabled instance: `encrypt`/`decrypt` pass bytes through unchanged.
    pub fn disabled() -> Self {
        Self { key: None, salt: None }
    }

    /// Derive a fresh key from `password` with a newly generated random salt.
    pub fn new(password: &str) -> Self {
        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        Self::from_salt(password, salt)
    }

    /// Restore a key from `password` and a previously generated `salt`.
    pub fn from_salt(password: &str, salt: [u8; SALT_SIZE]) -> Self {
        let key = derive_key(password, &salt);
        Self { key: Some(key), salt: Some(salt) }
    }

    /// Restore a key from `password` and a base64-encoded salt, as stored in
    /// `VaultConfig`.
    pub fn from_salt_b64(password: &str, salt_b64: &str) -> Result<Self, CryptoError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(salt_b64)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        let salt: [u8; SALT_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::Encoding("salt must be 16 bytes".into()))?;
        Ok(Self::from_salt(password, salt))
    }

    /// True if this instance holds a derived key (i.e. encryption is active).
    pub fn enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Base64 (URL-safe, no padding) of the salt, for persisting in `VaultConfig`.
    pub fn salt_b64(&self) -> Option<String> {
        self.salt.map(|s| URL_SAFE_NO_PAD.encode(s))
    }

    /// Seal `plaintext`, returning `nonce || ciphertext || tag`. Returns the input
    /// unchanged when encryption is disabled.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let Some(key) = self.key else {
            return Ok(plaintext.to_vec());
        };
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::Auth)?;
        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Reverse [`Crypto::encrypt`]. Returns the input unchanged when encryption is
    /// disabled.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let Some(key) = self.key else {
            return Ok(sealed.to_vec());
        };
        if sealed.len() < NONCE_SIZE {
            return Err(CryptoError::Truncated);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let nonce = Nonce::from_slice(nonce_bytes);
        cipher.decrypt(nonce, ciphertext).map_err(|_| CryptoError::Auth)
    }

    /// Encrypt a UTF-8 string, base64-encoding the sealed bytes (URL-safe, no padding).
    pub fn encrypt_string(&self, plaintext: &str) -> Result<String, CryptoError> {
        let sealed = self.encrypt(plaintext.as_bytes())?;
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Reverse [`Crypto::encrypt_string`].
    pub fn decrypt_string(&self, encoded: &str) -> Result<String, CryptoError> {
        let sealed = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        let plain = self.decrypt(&sealed)?;
        String::from_utf8(plain).map_err(|e| CryptoError::Encoding(e.to_string()))
    }

    /// Seal the fixed [`VERIFICATION_STRING`], producing a `check_value` suitable
    /// for storage in `VaultConfig` and later password verification.
    pub fn seal_check_value(&self) -> Result<Vec<u8>, CryptoError> {
        self.encrypt(VERIFICATION_STRING)
    }

    /// Verify this instance's key against a stored `check_value` by decrypting it
    /// and comparing against [`VERIFICATION_STRING`]. This is the only reliable way
    /// to detect a wrong password, since PBKDF2 derivation itself cannot fail.
    pub fn verify_check_value(&self, check_value: &[u8]) -> Result<(), CryptoError> {
        let plain = self.decrypt(check_value)?;
        if plain == VERIFICATION_STRING {
            Ok(())
        } else {
            Err(CryptoError::Auth)
        }
    }

    /// Configuration a browser-side WebCrypto viewer needs to re-derive this key
    /// from a user-supplied password, for static export (see `dlfi-export`).
    pub fn config_for_static(&self) -> Option<StaticCryptoConfig> {
        self.salt_b64().map(|salt| StaticCryptoConfig {
            salt,
            iterations: ITERATIONS,
            key_length: KEY_SIZE as u32 * 8,
            nonce_length: NONCE_SIZE as u32,
            algorithm: "AES-GCM".to_string(),
        })
    }
}

/// Crypto parameters exposed to a static-export viewer so it can derive the same
/// key client-side. Mirrors the original `get_config_for_static()` contract.
#[derive(Clone, Debug, serde::Serialize)]
pub struct StaticCryptoConfig {
    /// Base64 (URL-safe, no padding) salt.
    pub salt: String,
    /// PBKDF2 iteration count.
    pub iterations: u32,
    /// Derived key length in bits.
    pub key_length: u32,
    /// AES-GCM nonce length in bytes.
    pub nonce_length: u32,
    /// Always `"AES-GCM"`.
    pub algorithm: String,
}

fn derive_key(password: &str, salt: &[u8; SALT_SIZE]) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(password.as_bytes(), salt, ITERATIONS, &mut key)
        .expect("pbkdf2 output length is fixed and always valid");
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let c = Crypto::new("hunter2");
        let sealed = c.encrypt(b"hello world").unwrap();
        assert_ne!(sealed, b"hello world");
        assert_eq!(c.decrypt(&sealed).unwrap(), b"hello world");
    }

    #[test]
    fn disabled_is_pass_through() {
        let c = Crypto::disabled();
        assert!(!c.enabled());
        assert_eq!(c.encrypt(b"hello").unwrap(), b"hello");
        assert_eq!(c.decrypt(b"hello").unwrap(), b"hello");
    }

    #[test]
    fn wrong_password_fails_check_value() {
        let right = Crypto::new("correct horse");
        let check = right.seal_check_value().unwrap();
        let salt_b64 = right.salt_b64().unwrap();
        let wrong = Crypto::from_salt_b64("incorrect horse", &salt_b64).unwrap();
        assert!(wrong.verify_check_value(&check).is_err());
        assert!(right.verify_check_value(&check).is_ok());
    }

    #[test]
    fn nonces_are_not_reused() {
        let c = Crypto::new("pw");
        let a = c.encrypt(b"same plaintext").unwrap();
        let b = c.encrypt(b"same plaintext").unwrap();
        assert_ne!(a, b, "fresh random nonce must vary ciphertext each call");
    }

    #[test]
    fn from_salt_b64_round_trips_salt() {
        let original = Crypto::new("pw");
        let salt_b64 = original.salt_b64().unwrap();
        let restored = Crypto::from_salt_b64("pw", &salt_b64).unwrap();
        let sealed = original.encrypt(b"data").unwrap();
        assert_eq!(restored.decrypt(&sealed).unwrap(), b"data");
    }
}
