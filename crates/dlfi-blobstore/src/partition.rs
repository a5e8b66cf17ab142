//! Splitting and rejoining large blobs into fixed-size numbered parts.
//!
//! Partitioning operates on whatever bytes the caller hands it (the already
//! encrypted blob, if encryption is enabled) — see [`crate::store::BlobStore`] for
//! how the two compose.

use std::path::{Path, PathBuf};

/// Default chunk size: 50 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 50 * 1024 * 1024;
/// Smallest non-zero chunk size accepted by [`Partitioner::new`].
pub const MIN_CHUNK_SIZE: u64 = 1024 * 1024;

/// Errors raised configuring or using a [`Partitioner`].
#[derive(thiserror::Error, Debug)]
pub enum PartitionError {
    /// A non-zero chunk size below [`MIN_CHUNK_SIZE`] was requested.
    #[error("partition size must be 0 (disabled) or at least {MIN_CHUNK_SIZE} bytes")]
    ChunkSizeTooSmall,
}

/// Splits byte buffers into ordered, fixed-size parts, or rejoins them.
#[derive(Clone, Copy, Debug)]
pub struct Partitioner {
    chunk_size: u64,
}

impl Partitioner {
    /// Build a partitioner with the given chunk size; `0` disables partitioning.
    pub fn new(chunk_size: u64) -> Result<Self, PartitionError> {
        if chunk_size != 0 && chunk_size < MIN_CHUNK_SIZE {
            return Err(PartitionError::ChunkSizeTooSmall);
        }
        Ok(Self { chunk_size })
    }

    /// The configured chunk size, in bytes. `0` means disabled.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// True if partitioning is active at all (chunk size is non-zero).
    pub fn enabled(&self) -> bool {
        self.chunk_size > 0
    }

    /// True if `size` bytes would be split into more than one part under this
    /// partitioner's configuration.
    pub fn needs_partitioning(&self, size: u64) -> bool {
        self.enabled() && size > self.chunk_size
    }

    /// Number of parts `size` bytes would occupy (0 meaning "single file, not
    /// partitioned").
    pub fn part_count(&self, size: u64) -> u32 {
        if !self.needs_partitioning(size) {
            return 0;
        }
        u32::try_from(size.div_ceil(self.chunk_size)).unwrap_or(u32::MAX)
    }

    /// Split `data` into ordered chunks. Returns a single-element vector (a clone
    /// of `data`) when partitioning does not apply.
    pub fn split(&self, data: &[u8]) -> Vec<Vec<u8>> {
        if !self.needs_partitioning(data.len() as u64) {
            return vec![data.to_vec()];
        }
        let chunk = self.chunk_size as usize;
        data.chunks(chunk).map(<[u8]>::to_vec).collect()
    }

    /// Concatenate previously split parts back into the original buffer. Callers
    /// are responsible for supplying parts in the correct order (see
    /// [`list_parts`] for how they are discovered on disk).
    pub fn reassemble(parts: &[Vec<u8>]) -> Vec<u8> {
        let total: usize = parts.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(total);
        for part in parts {
            out.extend_from_slice(part);
        }
        out
    }
}

/// Zero-pad a 1-indexed part number to the on-disk 3-digit suffix, e.g. `7` -> `"007"`.
pub fn part_suffix(part_number: u32) -> String {
    format!("{part_number:03}")
}

/// List the on-disk files that make up the blob with the given hash, in
/// ascending part order. Returns a single-element vector for an unpartitioned
/// blob, or an empty vector if neither form is present.
///
/// `shard_dir` is the `<root>/<aa>/<bb>` directory already specific to this hash.
pub fn list_parts(shard_dir: &Path, hash: &str) -> Vec<PathBuf> {
    let single = shard_dir.join(hash);
    if single.is_file() {
        return vec![single];
    }
    let Ok(entries) = std::fs::read_dir(shard_dir) else {
        return Vec::new();
    };
    let prefix = format!("{hash}.");
    let mut parts: Vec<(u32, PathBuf)> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_str()?;
            let suffix = name.strip_prefix(&prefix)?;
            let number: u32 = suffix.parse().ok()?;
            Some((number, path))
        })
        .collect();
    parts.sort_by_key(|(n, _)| *n);
    parts.into_iter().map(|(_, p)| p).collect()
}

/// Split a filename of the form `<hash>.<NNN>` into `(hash, part_number)`, or
/// `(filename, 0)` if it has no numeric part suffix.
pub fn parse_part_info(filename: &str) -> (String, u32) {
    if let Some((base, suffix)) = filename.rsplit_once('.') {
        if let Ok(n) = suffix.parse::<u32>() {
            return (base.to_string(), n);
        }
    }
    (filename.to_string(), 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_never_partitions() {
        let p = Partitioner::new(0).unwrap();
        assert!(!p.enabled());
        assert!(!p.needs_partitioning(1_000_000_000));
        assert_eq!(p.part_count(1_000_000_000), 0);
    }

    #[test]
    fn split_and_reassemble_round_trip() {
        let p = Partitioner::new(MIN_CHUNK_SIZE).unwrap();
        let data = crate::deterministic_bytes(MIN_CHUNK_SIZE as usize * 5 / 2);
        let parts = p.split(&data);
        assert_eq!(parts.len(), 3);
        assert_eq!(Partitioner::reassemble(&parts), data);
    }

    #[test]
    fn rejects_too_small_chunk_size() {
        assert!(Partitioner::new(10).is_err());
        assert!(Partitioner::new(0).is_ok());
        assert!(Partitioner::new(MIN_CHUNK_SIZE).is_ok());
    }

    #[test]
    fn part_suffix_is_zero_padded() {
        assert_eq!(part_suffix(1), "001");
        assert_eq!(part_suffix(42), "042");
    }

    #[test]
    fn parse_part_info_distinguishes_numeric_suffix() {
        assert_eq!(parse_part_info("abc123.007"), ("abc123".to_string(), 7));
        assert_eq!(parse_part_info("abc123"), ("abc123".to_string(), 0));
        assert_eq!(parse_part_info("abc123.txt"), ("abc123.txt".to_string(), 0));
    }
}
