//! Content-addressed, sharded storage of (optionally encrypted, optionally
//! partitioned) blobs on the local filesystem.
//!
//! Layout: `<root>/<aa>/<bb>/<hash>` for a single-file blob, or
//! `<root>/<aa>/<bb>/<hash>.001 .. <hash>.<NNN>` for a partitioned one. `aa`/`bb`
//! are the first four hex characters of the hash, split two-and-two.
//!
//! Writes go to a temporary file in the same shard directory and are atomically
//! renamed into place, so a crash mid-write never leaves a half-written blob file
//! visible under its final name.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use sha2::digest::{FixedOutput, Update};
use sha2::Sha256;

use crate::crypto::{Crypto, CryptoError};
use crate::partition::{self, PartitionError, Partitioner};

/// Errors raised by blob store operations.
#[derive(thiserror::Error, Debug)]
pub enum BlobStoreError {
    /// Underlying filesystem failure.
    #[error("io: {0}")]
    Io(#[from] io::Error),
    /// Encryption or decryption failure.
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),
    /// Partitioner misconfiguration.
    #[error("partition: {0}")]
    Partition(#[from] PartitionError),
    /// No blob found for the requested hash.
    #[error("blob not found")]
    NotFound,
    /// Plaintext read back from storage does not hash to the expected digest.
    #[error("integrity: digest mismatch on read")]
    Integrity,
}

/// Outcome of storing a blob: the fields callers persist into the catalog's
/// `blobs` row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredBlob {
    /// Lowercase hex SHA-256 of the plaintext.
    pub hash: String,
    /// Length of the plaintext, in bytes.
    pub size_bytes: u64,
    /// `0` if stored as a single file, else the number of parts.
    pub part_count: u32,
}

/// Content-addressed blob store rooted at a directory.
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open (creating if absent) a blob store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, BlobStoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// SHA-256 of `plaintext`, lowercase hex.
    pub fn hash_of(plaintext: &[u8]) -> String {
        let mut hasher = Sha256::default();
        Update::update(&mut hasher, plaintext);
        hex::encode(FixedOutput::finalize_fixed(hasher))
    }

    fn shard_dir(&self, hash: &str) -> PathBuf {
        self.root.join(&hash[0..2]).join(&hash[2..4])
    }

    /// Write `plaintext` to the store, deduplicating, encrypting (if `crypto` is
    /// enabled), and partitioning (if `partitioner` would split the encrypted
    /// size) as configured. Returns `None` if a blob with this hash already
    /// exists (a dedup hit; no bytes were written).
    #[tracing::instrument(skip(self, plaintext, crypto, partitioner), fields(len = plaintext.len()))]
    pub fn put(
        &self,
        plaintext: &[u8],
        crypto: &Crypto,
        partitioner: &Partitioner,
    ) -> Result<(StoredBlob, bool), BlobStoreError> {
        let hash = Self::hash_of(plaintext);
        let shard = self.shard_dir(&hash);
        let existing = partition::list_parts(&shard, &hash);
        if !existing.is_empty() {
            let part_count = if existing.len() == 1 { 0 } else { existing.len() as u32 };
            return Ok((
                StoredBlob { hash, size_bytes: plaintext.len() as u64, part_count },
                false,
            ));
        }

        fs::create_dir_all(&shard)?;
        let sealed = crypto.encrypt(plaintext)?;
        let parts = partitioner.split(&sealed);

        if parts.len() == 1 {
            write_atomic(&shard.join(&hash), &parts[0])?;
        } else {
            for (i, part) in parts.iter().enumerate() {
                let suffix = partition::part_suffix(i as u32 + 1);
                write_atomic(&shard.join(format!("{hash}.{suffix}")), part)?;
            }
        }

        let part_count = if parts.len() == 1 { 0 } else { parts.len() as u32 };
        Ok((
            StoredBlob { hash, size_bytes: plaintext.len() as u64, part_count },
            true,
        ))
    }

    /// Read and decrypt the blob with the given hash back to plaintext,
    /// verifying its digest.
    #[tracing::instrument(skip(self, crypto))]
    pub fn get(&self, hash: &str, crypto: &Crypto) -> Result<Vec<u8>, BlobStoreError> {
        let shard = self.shard_dir(hash);
        let parts = partition::list_parts(&shard, hash);
        if parts.is_empty() {
            return Err(BlobStoreError::NotFound);
        }
        let mut sealed = Vec::new();
        for part in &parts {
            sealed.extend_from_slice(&fs::read(part)?);
        }
        let plaintext = crypto.decrypt(&sealed)?;
        if Self::hash_of(&plaintext) != hash {
            return Err(BlobStoreError::Integrity);
        }
        Ok(plaintext)
    }

    /// True if any file for this hash (single or partitioned) exists.
    pub fn exists(&self, hash: &str) -> bool {
        !partition::list_parts(&self.shard_dir(hash), hash).is_empty()
    }

    /// Remove every on-disk file for this hash. Used by the config manager when
    /// re-encrypting or re-partitioning a blob in place.
    pub fn remove_all_parts(&self, hash: &str) -> Result<(), BlobStoreError> {
        for part in partition::list_parts(&self.shard_dir(hash), hash) {
            fs::remove_file(part)?;
        }
        Ok(())
    }

    /// Write pre-sealed bytes (already encrypted and/or partitioned by a caller
    /// that manages the encryption transition itself, e.g. the config manager)
    /// under `hash`, replacing whatever is currently stored for it.
    pub fn put_raw(
        &self,
        hash: &str,
        sealed: &[u8],
        partitioner: &Partitioner,
    ) -> Result<u32, BlobStoreError> {
        let shard = self.shard_dir(hash);
        fs::create_dir_all(&shard)?;
        self.remove_all_parts(hash)?;
        let parts = partitioner.split(sealed);
        if parts.len() == 1 {
            write_atomic(&shard.join(hash), &parts[0])?;
            Ok(0)
        } else {
            for (i, part) in parts.iter().enumerate() {
                let suffix = partition::part_suffix(i as u32 + 1);
                write_atomic(&shard.join(format!("{hash}.{suffix}")), part)?;
            }
            Ok(parts.len() as u32)
        }
    }

    /// Read the raw (still sealed, not decrypted) bytes stored for `hash`.
    pub fn read_raw(&self, hash: &str) -> Result<Vec<u8>, BlobStoreError> {
        let shard = self.shard_dir(hash);
        let parts = partition::list_parts(&shard, hash);
        if parts.is_empty() {
            return Err(BlobStoreError::NotFound);
        }
        let mut out = Vec::new();
        for part in &parts {
            out.extend_from_slice(&fs::read(part)?);
        }
        Ok(out)
    }

    /// Root directory this store is backed by.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove any leftover `.incomplete` temp artifacts under the store root.
    /// Safe to call on every archive open.
    pub fn cleanup_incomplete(&self) -> Result<usize, BlobStoreError> {
        fn walk(dir: &Path, count: &mut usize) -> io::Result<()> {
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir() {
                    walk(&path, count)?;
                } else if path.extension().is_some_and(|e| e == "incomplete") {
                    fs::remove_file(&path)?;
                    *count += 1;
                }
            }
            Ok(())
        }
        let mut removed = 0;
        if self.root.exists() {
            walk(&self.root, &mut removed)?;
        }
        Ok(removed)
    }
}

/// Write `data` to `path` via a temp file in the same directory plus atomic
/// rename, so concurrent readers never observe a partially written file.
fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let tmp_path = path.with_extension("incomplete");
    {
        let mut f = fs::File::create(&tmp_path)?;
        f.write_all(data)?;
        f.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    if let Some(parent) = path.parent() {
        if let Ok(dirf) = fs::File::open(parent) {
            let _ = dirf.sync_all();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        let crypto = Crypto::disabled();
        let partitioner = Partitioner::new(0).unwrap();
        let (stored, wrote) = store.put(b"hello", &crypto, &partitioner).unwrap();
        assert!(wrote);
        assert_eq!(stored.part_count, 0);
        assert_eq!(store.get(&stored.hash, &crypto).unwrap(), b"hello");
    }

    #[test]
    fn dedup_skips_second_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        let crypto = Crypto::disabled();
        let partitioner = Partitioner::new(0).unwrap();
        let (a, wrote_a) = store.put(b"same", &crypto, &partitioner).unwrap();
        let (b, wrote_b) = store.put(b"same", &crypto, &partitioner).unwrap();
        assert!(wrote_a);
        assert!(!wrote_b);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn encrypted_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        let crypto = Crypto::new("pw");
        let partitioner = Partitioner::new(0).unwrap();
        let (stored, _) = store.put(b"secret contents", &crypto, &partitioner).unwrap();
        assert_eq!(store.get(&stored.hash, &crypto).unwrap(), b"secret contents");
        let raw = store.read_raw(&stored.hash).unwrap();
        assert_ne!(raw, b"secret contents");
    }

    #[test]
    fn partitioned_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        let crypto = Crypto::disabled();
        let partitioner = Partitioner::new(crate::partition::MIN_CHUNK_SIZE).unwrap();
        let data = crate::deterministic_bytes(crate::partition::MIN_CHUNK_SIZE as usize * 5 / 2);
        let (stored, _) = store.put(&data, &crypto, &partitioner).unwrap();
        assert_eq!(stored.part_count, 3);
        assert_eq!(store.get(&stored.hash, &crypto).unwrap(), data);
    }

    #[test]
    fn missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        let crypto = Crypto::disabled();
        assert!(matches!(
            store.get(&"0".repeat(64), &crypto),
            Err(BlobStoreError::NotFound)
        ));
    }
}
