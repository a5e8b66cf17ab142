//! Vault configuration and the whole-store transactions that change it:
//! enabling/disabling encryption, changing password, and re-partitioning.
//!
//! Every operation here re-processes every blob in the store. The reference
//! implementation aborts mid-stream on the first failing blob, leaving the
//! config and the on-disk store in disagreement (see `DESIGN.md`). This
//! implementation instead stages every rewritten blob to a scratch directory,
//! commits the catalog's row updates for every blob in one transaction, and
//! only then replays the staged bytes onto the real store. The catalog
//! commit happens before a single real blob file is touched, so the catalog
//! never claims a conversion the store doesn't have; config.json is flipped
//! last, once the store rewrite has also finished.

use std::fs;
use std::path::{Path, PathBuf};

use dlfi_blobstore::{BlobStore, BlobStoreError, Crypto, CryptoError, Partitioner};
use dlfi_catalog::{Catalog, CatalogError};
use serde::{Deserialize, Serialize};

/// Default partition size: 50 MiB, matching [`dlfi_blobstore::partition::DEFAULT_CHUNK_SIZE`].
pub const DEFAULT_PARTITION_SIZE: u64 = dlfi_blobstore::partition::DEFAULT_CHUNK_SIZE;
/// Config schema version. Bumped when the on-disk shape changes.
pub const CURRENT_VERSION: u32 = 2;

/// Persisted vault configuration, stored as `.dlfi/config.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Whether blobs are currently stored encrypted.
    #[serde(default)]
    pub encrypted: bool,
    /// Base64 salt used to derive the active key, present iff `encrypted`.
    #[serde(default)]
    pub salt: Option<String>,
    /// AEAD-sealed known plaintext used to verify a candidate password before
    /// touching any blob, present iff `encrypted`.
    #[serde(default)]
    pub check_value: Option<String>,
    /// `0` disables partitioning; otherwise the chunk size in bytes.
    #[serde(default = "default_partition_size")]
    pub partition_size: u64,
    /// Schema version, for future migrations.
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_partition_size() -> u64 {
    DEFAULT_PARTITION_SIZE
}
fn default_version() -> u32 {
    CURRENT_VERSION
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            encrypted: false,
            salt: None,
            check_value: None,
            partition_size: DEFAULT_PARTITION_SIZE,
            version: CURRENT_VERSION,
        }
    }
}

impl VaultConfig {
    /// Load config from `path`, or return defaults on any missing/corrupt file.
    pub fn load(path: &Path) -> Self {
        let Ok(text) = fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&text).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to parse vault config, using defaults");
            Self::default()
        })
    }

    /// Save config to `path` as pretty-printed JSON, creating parent
    /// directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Consistency check: encryption requires a salt and check value; the
    /// partition size must not be negative (unsigned already guarantees this,
    /// but it must also satisfy the partitioner's minimum-unless-zero rule).
    pub fn validate(&self) -> bool {
        if self.encrypted && (self.salt.is_none() || self.check_value.is_none()) {
            return false;
        }
        self.partition_size == 0 || self.partition_size >= dlfi_blobstore::partition::MIN_CHUNK_SIZE
    }
}

/// Errors raised by configuration transactions.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// Underlying filesystem failure.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// Config (de)serialization failure.
    #[error("config json: {0}")]
    Json(#[from] serde_json::Error),
    /// Underlying catalog failure.
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),
    /// Underlying blob store failure.
    #[error("blob store: {0}")]
    BlobStore(#[from] BlobStoreError),
    /// Underlying crypto failure.
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),
    /// Requested to enable encryption on an already-encrypted vault.
    #[error("vault is already encrypted")]
    AlreadyEncrypted,
    /// Requested to disable/change-password on a plaintext vault.
    #[error("vault is not encrypted")]
    NotEncrypted,
    /// Supplied password did not verify against the stored check value.
    #[error("incorrect password")]
    WrongPassword,
    /// A blob referenced by the catalog was missing on disk mid-transaction.
    #[error("blob {0} missing during reprocessing")]
    MissingBlob(String),
}

/// Re-encrypt or decrypt every blob in the store and flip the `encrypted`
/// flag, as one atomic whole-store operation.
#[tracing::instrument(skip(catalog, store, config, partitioner, password))]
pub fn enable_encryption(
    catalog: &mut Catalog,
    store: &BlobStore,
    config: &mut VaultConfig,
    config_path: &Path,
    partitioner: &Partitioner,
    password: &str,
) -> Result<(), ConfigError> {
    if config.encrypted {
        return Err(ConfigError::AlreadyEncrypted);
    }
    let new_crypto = Crypto::new(password);
    reprocess_all_blobs(catalog, store, partitioner, &Crypto::disabled(), &new_crypto)?;

    config.encrypted = true;
    config.salt = new_crypto.salt_b64();
    config.check_value = new_crypto
        .seal_check_value()
        .ok()
        .map(|cv| base64_encode(&cv));
    config.save(config_path)?;
    Ok(())
}

/// Decrypt every blob in the store and clear the `encrypted` flag.
#[tracing::instrument(skip(catalog, store, config, partitioner, current_password))]
pub fn disable_encryption(
    catalog: &mut Catalog,
    store: &BlobStore,
    config: &mut VaultConfig,
    config_path: &Path,
    partitioner: &Partitioner,
    current_password: &str,
) -> Result<(), ConfigError> {
    let old_crypto = verify_password(config, current_password)?;
    reprocess_all_blobs(catalog, store, partitioner, &old_crypto, &Crypto::disabled())?;

    config.encrypted = false;
    config.salt = None;
    config.check_value = None;
    config.save(config_path)?;
    Ok(())
}

/// Re-encrypt every blob under a new password, rotating both key and salt.
#[tracing::instrument(skip(catalog, store, config, partitioner, old_password, new_password))]
pub fn change_password(
    catalog: &mut Catalog,
    store: &BlobStore,
    config: &mut VaultConfig,
    config_path: &Path,
    partitioner: &Partitioner,
    old_password: &str,
    new_password: &str,
) -> Result<(), ConfigError> {
    let old_crypto = verify_password(config, old_password)?;
    let new_crypto = Crypto::new(new_password);
    reprocess_all_blobs(catalog, store, partitioner, &old_crypto, &new_crypto)?;

    config.salt = new_crypto.salt_b64();
    config.check_value = new_crypto
        .seal_check_value()
        .ok()
        .map(|cv| base64_encode(&cv));
    config.save(config_path)?;
    Ok(())
}

/// Re-split (or re-join) every blob under a new partition size, independent of
/// whether encryption is enabled.
#[tracing::instrument(skip(catalog, store, config))]
pub fn change_partition_size(
    catalog: &mut Catalog,
    store: &BlobStore,
    config: &mut VaultConfig,
    config_path: &Path,
    new_size: u64,
) -> Result<Partitioner, ConfigError> {
    let new_partitioner = Partitioner::new(new_size).map_err(|_| ConfigError::MissingBlob("invalid partition size".into()))?;
    let hashes = catalog.all_blob_hashes()?;
    let mut staged = Vec::new();
    for hash in &hashes {
        let raw = store.read_raw(hash)?;
        let part_count = new_partitioner.part_count(raw.len() as u64);
        staged.push((hash.clone(), raw, part_count));
    }

    // Commit the catalog's row updates before rewriting a single real blob
    // file, so a failure partway through the store rewrite never leaves the
    // catalog claiming a split the store doesn't actually have.
    catalog.transaction::<(), ConfigError>(|tx| {
        for (hash, _, part_count) in &staged {
            tx.execute(
                "UPDATE blobs SET part_count = ?1 WHERE hash = ?2",
                rusqlite::params![part_count, hash],
            )
            .map_err(CatalogError::Sqlite)?;
        }
        Ok(())
    })?;

    for (hash, raw, _) in &staged {
        store.put_raw(hash, raw, &new_partitioner)?;
    }

    config.partition_size = new_size;
    config.save(config_path)?;
    Ok(new_partitioner)
}

fn verify_password(config: &VaultConfig, password: &str) -> Result<Crypto, ConfigError> {
    if !config.encrypted {
        return Err(ConfigError::NotEncrypted);
    }
    let salt = config.salt.as_deref().ok_or(ConfigError::NotEncrypted)?;
    let check_value = config.check_value.as_deref().ok_or(ConfigError::NotEncrypted)?;
    let crypto = Crypto::from_salt_b64(password, salt)?;
    crypto
        .verify_check_value(&base64_decode(check_value)?)
        .map_err(|_| ConfigError::WrongPassword)?;
    Ok(crypto)
}

/// Decrypt with `old_crypto`, re-encrypt with `new_crypto`, and re-partition
/// every blob, staging rewritten bytes under a scratch directory first so a
/// mid-stream failure leaves the store untouched. The catalog's row updates
/// are committed before any real blob file is rewritten, so a failure
/// finalizing the store can never leave the catalog claiming a conversion
/// the store doesn't actually have.
fn reprocess_all_blobs(
    catalog: &mut Catalog,
    store: &BlobStore,
    partitioner: &Partitioner,
    old_crypto: &Crypto,
    new_crypto: &Crypto,
) -> Result<(), ConfigError> {
    let hashes = catalog.all_blob_hashes()?;
    let scratch = store.root().join(".dlfi-reprocess-scratch");
    fs::create_dir_all(&scratch)?;

    let mut staged: Vec<(String, PathBuf, u32)> = Vec::new();
    let result = (|| -> Result<(), ConfigError> {
        for hash in &hashes {
            let raw = store.read_raw(hash).map_err(|_| ConfigError::MissingBlob(hash.clone()))?;
            let plaintext = old_crypto.decrypt(&raw)?;
            let sealed = new_crypto.encrypt(&plaintext)?;
            let part_count = partitioner.part_count(sealed.len() as u64);
            let scratch_path = scratch.join(hash);
            fs::write(&scratch_path, &sealed)?;
            staged.push((hash.clone(), scratch_path, part_count));
        }
        Ok(())
    })();

    if let Err(e) = result {
        let _ = fs::remove_dir_all(&scratch);
        return Err(e);
    }

    let commit = catalog.transaction::<(), ConfigError>(|tx| {
        for (hash, _, part_count) in &staged {
            tx.execute(
                "UPDATE blobs SET part_count = ?1 WHERE hash = ?2",
                rusqlite::params![part_count, hash],
            )
            .map_err(CatalogError::Sqlite)?;
        }
        Ok(())
    });

    if let Err(e) = commit {
        let _ = fs::remove_dir_all(&scratch);
        return Err(e);
    }

    let finalize = (|| -> Result<(), ConfigError> {
        for (hash, scratch_path, _) in &staged {
            let sealed = fs::read(scratch_path)?;
            store.put_raw(hash, &sealed, partitioner)?;
        }
        Ok(())
    })();

    let _ = fs::remove_dir_all(&scratch);
    finalize
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    URL_SAFE_NO_PAD.encode(bytes)
}

fn base64_decode(s: &str) -> Result<Vec<u8>, ConfigError> {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|e| ConfigError::Crypto(CryptoError::Encoding(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlfi_blobstore::Partitioner;

    #[test]
    fn config_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let cfg = VaultConfig { encrypted: true, salt: Some("abc".into()), check_value: Some("def".into()), partition_size: 1024, version: 2 };
        cfg.save(&path).unwrap();
        let loaded = VaultConfig::load(&path);
        assert!(loaded.encrypted);
        assert_eq!(loaded.salt.as_deref(), Some("abc"));
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = VaultConfig::load(&dir.path().join("nope.json"));
        assert!(!loaded.encrypted);
        assert_eq!(loaded.partition_size, DEFAULT_PARTITION_SIZE);
    }

    #[test]
    fn enable_then_disable_round_trips_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::open_in_memory().unwrap();
        let store = BlobStore::new(dir.path().join("blobs")).unwrap();
        let partitioner = Partitioner::new(0).unwrap();
        let crypto = Crypto::disabled();

        crate::resolver::resolve(&catalog, "notes/a", true, dlfi_catalog::NodeType::Record, None).unwrap();
        let link = crate::ingest::append(&mut catalog, &store, &crypto, &partitioner, "notes/a", "a.txt", b"hello").unwrap();

        let mut config = VaultConfig::default();
        let config_path = dir.path().join("config.json");
        enable_encryption(&mut catalog, &store, &mut config, &config_path, &partitioner, "pw").unwrap();
        assert!(config.encrypted);

        let crypto_after = Crypto::from_salt_b64("pw", config.salt.as_deref().unwrap()).unwrap();
        assert_eq!(store.get(&link.blob, &crypto_after).unwrap(), b"hello");

        disable_encryption(&mut catalog, &store, &mut config, &config_path, &partitioner, "pw").unwrap();
        assert!(!config.encrypted);
        assert_eq!(store.get(&link.blob, &Crypto::disabled()).unwrap(), b"hello");
    }

    #[test]
    fn wrong_password_is_rejected_before_touching_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::open_in_memory().unwrap();
        let store = BlobStore::new(dir.path().join("blobs")).unwrap();
        let partitioner = Partitioner::new(0).unwrap();
        let mut config = VaultConfig::default();
        let config_path = dir.path().join("config.json");
        enable_encryption(&mut catalog, &store, &mut config, &config_path, &partitioner, "right").unwrap();

        let err = disable_encryption(&mut catalog, &store, &mut config, &config_path, &partitioner, "wrong").unwrap_err();
        assert!(matches!(err, ConfigError::WrongPassword));
        assert!(config.encrypted, "a rejected password must not mutate config");
    }
}
