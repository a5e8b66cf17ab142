//! End-to-end write path: hash -> dedupe -> encrypt -> partition -> link.

use dlfi_blobstore::{BlobStore, BlobStoreError, Crypto, Partitioner};
use dlfi_catalog::{now_unix, Blob, Catalog, CatalogError, Node, NodeFile, NodeType};
use uuid::Uuid;

use crate::resolver::{resolve_existing, ResolverError};

/// Errors raised ingesting a file into the archive.
#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    /// Underlying catalog failure.
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),
    /// Underlying blob store failure.
    #[error("blob store: {0}")]
    BlobStore(#[from] BlobStoreError),
    /// Underlying resolver failure.
    #[error("resolver: {0}")]
    Resolver(#[from] ResolverError),
    /// The target path does not resolve to an existing node.
    #[error("target path not found")]
    TargetNotFound,
    /// The target path resolves to a `Vault`, which cannot own file-links.
    #[error("target is a vault, not a record")]
    WrongType,
}

/// Lowercase, dot-stripped extension from a filename, or empty if none.
pub fn extension_of(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default()
}

/// Ingest `plaintext` (presented under `filename`) into the `Record` node at
/// `target_path`, returning the created file-link. Deduplicates by plaintext
/// hash: if an identical blob already exists, no bytes are written, only a new
/// file-link row.
#[tracing::instrument(skip(catalog, store, crypto, partitioner, plaintext), fields(target_path, filename))]
pub fn append(
    catalog: &mut Catalog,
    store: &BlobStore,
    crypto: &Crypto,
    partitioner: &Partitioner,
    target_path: &str,
    filename: &str,
    plaintext: &[u8],
) -> Result<NodeFile, IngestError> {
    let target = resolve_existing(catalog, target_path)?.ok_or(IngestError::TargetNotFound)?;
    let node = catalog.get_node(target)?.ok_or(IngestError::TargetNotFound)?;
    if node.node_type != NodeType::Record {
        return Err(IngestError::WrongType);
    }

    let hash = BlobStore::hash_of(plaintext);
    let ext = extension_of(filename);
    let now = now_unix();

    catalog.transaction::<NodeFile, IngestError>(|tx| {
        if tx
            .query_row("SELECT 1 FROM blobs WHERE hash = ?1", [&hash], |_| Ok(()))
            .is_err()
        {
            let (stored, _wrote) = store.put(plaintext, crypto, partitioner)?;
            let blob = Blob {
                hash: stored.hash.clone(),
                ext: ext.clone(),
                size_bytes: stored.size_bytes,
                storage_path: format!("{}/{}/{}", &hash[0..2], &hash[2..4], hash),
                part_count: stored.part_count,
            };
            tx.execute(
                "INSERT INTO blobs (hash, ext, size_bytes, storage_path, part_count) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![blob.hash, blob.ext, blob.size_bytes, blob.storage_path, blob.part_count],
            )
            .map_err(CatalogError::Sqlite)?;
        }

        let display_order: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM node_files WHERE node_uuid = ?1",
                [target.to_string()],
                |row| row.get(0),
            )
            .map_err(CatalogError::Sqlite)?;
        let display_order = display_order + 1;

        tx.execute(
            "INSERT INTO node_files (node_uuid, file_hash, original_name, display_order, added_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![target.to_string(), hash, filename, display_order, now],
        )
        .map_err(CatalogError::Sqlite)?;

        let id: i64 = tx
            .query_row("SELECT last_insert_rowid()", [], |row| row.get(0))
            .map_err(CatalogError::Sqlite)?;

        tx.execute(
            "UPDATE nodes SET last_modified = ?1 WHERE uuid = ?2",
            rusqlite::params![now, target.to_string()],
        )
        .map_err(CatalogError::Sqlite)?;

        Ok(NodeFile {
            id,
            node: target,
            blob: hash.clone(),
            original_name: filename.to_string(),
            display_order,
            added_at: now,
        })
    })
}

/// Read and decrypt the plaintext for a file-link's blob.
pub fn read_blob(store: &BlobStore, crypto: &Crypto, hash: &str) -> Result<Vec<u8>, IngestError> {
    Ok(store.get(hash, crypto)?)
}

/// Resolve the node id a fresh import would target, creating the `Vault`
/// ancestry but not the terminal `Record` — callers append to it afterward.
/// Thin convenience used by the facade's `create_record`/`append_*` pair.
pub fn ensure_record(
    catalog: &Catalog,
    path: &str,
    metadata: Option<serde_json::Value>,
) -> Result<Uuid, ResolverError> {
    crate::resolver::resolve(catalog, path, true, NodeType::Record, metadata)?
        .ok_or(ResolverError::EmptyPath)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlfi_catalog::NodeType;

    fn setup() -> (Catalog, BlobStore, Crypto, Partitioner, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        (catalog, store, Crypto::disabled(), Partitioner::new(0).unwrap(), dir)
    }

    #[test]
    fn dedup_creates_one_blob_two_links() {
        let (mut catalog, store, crypto, partitioner, _dir) = setup();
        ensure_record(&catalog, "notes/a", None).unwrap();
        ensure_record(&catalog, "notes/b", None).unwrap();

        let link_a = append(&mut catalog, &store, &crypto, &partitioner, "notes/a", "a.txt", b"hello").unwrap();
        let link_b = append(&mut catalog, &store, &crypto, &partitioner, "notes/b", "b.txt", b"hello").unwrap();

        assert_eq!(link_a.blob, link_b.blob);
        assert_eq!(link_a.display_order, 1);
        assert_eq!(link_b.display_order, 1);
        assert_eq!(BlobStore::hash_of(b"hello"), link_a.blob);
    }

    #[test]
    fn rejects_ingest_into_vault() {
        let (mut catalog, store, crypto, partitioner, _dir) = setup();
        crate::resolver::resolve(&catalog, "folder", true, NodeType::Vault, None).unwrap();
        let err = append(&mut catalog, &store, &crypto, &partitioner, "folder", "a.txt", b"x").unwrap_err();
        assert!(matches!(err, IngestError::WrongType));
    }

    #[test]
    fn second_ingest_increments_display_order() {
        let (mut catalog, store, crypto, partitioner, _dir) = setup();
        ensure_record(&catalog, "notes/a", None).unwrap();
        let first = append(&mut catalog, &store, &crypto, &partitioner, "notes/a", "a1.txt", b"one").unwrap();
        let second = append(&mut catalog, &store, &crypto, &partitioner, "notes/a", "a2.txt", b"two").unwrap();
        assert_eq!(first.display_order, 1);
        assert_eq!(second.display_order, 2);
    }
}
