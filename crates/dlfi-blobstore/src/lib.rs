//! Blob Store (content-addressed storage + encryption-at-rest + partitioning)
//!
//! Overview
//! - Content-addressable identity: SHA-256 computed over plaintext bytes, never
//!   over the stored (possibly encrypted, possibly partitioned) bytes.
//! - Confidentiality: AES-256-GCM with a fresh random nonce per seal, keyed by a
//!   password-derived key (see [`crypto`]). Deterministic nonce reuse is
//!   deliberately avoided here so ciphertexts don't reveal duplicate plaintext
//!   across writes.
//! - Large blobs are split into fixed-size numbered parts after encryption (see
//!   [`partition`]), so no single on-disk file exceeds the configured chunk size.
//! - Atomicity: each part is written to a temp file in its shard directory and
//!   atomically renamed into place; a crash never leaves a half-written file
//!   under its final name.
//!
//! Usage example
//! ```rust
//! use dlfi_blobstore::{BlobStore, Crypto, Partitioner};
//! let dir = tempfile::tempdir().unwrap();
//! let store = BlobStore::new(dir.path()).unwrap();
//! let crypto = Crypto::disabled();
//! let partitioner = Partitioner::new(0).unwrap();
//! let (stored, wrote) = store.put(b"hello", &crypto, &partitioner).unwrap();
//! assert!(wrote);
//! assert!(store.exists(&stored.hash));
//! let got = store.get(&stored.hash, &crypto).unwrap();
//! assert_eq!(got, b"hello");
//! ```

#![warn(missing_docs)]

pub mod crypto;
pub mod partition;
pub mod store;

pub use crypto::{Crypto, CryptoError, StaticCryptoConfig};
pub use partition::{PartitionError, Partitioner};
pub use store::{BlobStore, BlobStoreError, StoredBlob};

/// Build a deterministic test buffer of the given length. Test-only helper
/// shared across this crate's unit tests.
#[doc(hidden)]
pub fn deterministic_bytes(len: usize) -> Vec<u8> {
    let mut v = Vec::with_capacity(len);
    for i in 0..len {
        v.push((i as u8).wrapping_mul(37).wrapping_add(11));
    }
    v
}
