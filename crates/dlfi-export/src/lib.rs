//! Static manifest export: a single JSON document describing every node and
//! blob, readable by an offline browser viewer without any other archive
//! state.
//!
//! Blob bytes are never copied here — the viewer reads the existing shard
//! layout directly. This crate only emits `manifest.json`, sealed with the
//! same AEAD wire format as the blobs when the vault is encrypted.

#![warn(missing_docs)]

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use dlfi_blobstore::{Crypto, StaticCryptoConfig};
use dlfi_catalog::Catalog;
use serde::Serialize;

/// Current manifest format version.
pub const MANIFEST_VERSION: u32 = 2;

/// Errors raised building or writing a manifest.
#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    /// Underlying catalog failure.
    #[error("catalog: {0}")]
    Catalog(#[from] dlfi_catalog::CatalogError),
    /// Underlying crypto failure sealing the manifest.
    #[error("crypto: {0}")]
    Crypto(#[from] dlfi_blobstore::CryptoError),
    /// Manifest serialization failed.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    /// Writing the manifest file failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// One relationship edge as seen from a node, with the target resolved to
/// its path at export time (not its id, since ids are meaningless to a
/// browser viewer with no catalog access).
#[derive(Debug, Serialize)]
pub struct ManifestRelationship {
    /// Uppercase relation name.
    pub relation: String,
    /// Path of the target node, or `"UNKNOWN"` if the target no longer exists.
    pub target: String,
}

/// One file reference on a node.
#[derive(Debug, Serialize)]
pub struct ManifestFile {
    /// Original filename at ingest time.
    pub name: String,
    /// Blob hash.
    pub hash: String,
    /// Plaintext size in bytes.
    pub size: u64,
    /// Lowercased extension.
    pub ext: String,
}

/// One node entry in the manifest.
#[derive(Debug, Serialize)]
pub struct ManifestNode {
    /// Node id.
    pub uuid: String,
    /// `"VAULT"` or `"RECORD"`.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Node name.
    pub name: String,
    /// Full path from root.
    pub path: String,
    /// Parent id, or `None` for a root.
    pub parent: Option<String>,
    /// Arbitrary metadata document.
    pub metadata: serde_json::Value,
    /// Tags on this node.
    pub tags: Vec<String>,
    /// Outgoing relationships.
    pub relationships: Vec<ManifestRelationship>,
    /// Linked files, in display order.
    pub files: Vec<ManifestFile>,
}

/// One blob entry in the manifest.
#[derive(Debug, Serialize)]
pub struct ManifestBlob {
    /// Plaintext size in bytes.
    pub size: u64,
    /// Lowercased extension.
    pub ext: String,
    /// Number of parts, or 0 if stored as a single file.
    pub parts: u32,
}

/// The full exported document.
#[derive(Debug, Serialize)]
pub struct Manifest {
    /// Format version; see [`MANIFEST_VERSION`].
    pub version: u32,
    /// Whether the vault is encrypted (and therefore whether this manifest,
    /// once serialized, is itself AEAD-sealed on disk).
    pub encrypted: bool,
    /// All nodes, keyed by uuid.
    pub nodes: BTreeMap<String, ManifestNode>,
    /// All blobs, keyed by hash.
    pub blobs: BTreeMap<String, ManifestBlob>,
    /// WebCrypto-compatible key-derivation parameters, present iff `encrypted`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crypto: Option<StaticCryptoConfig>,
}

/// Build the manifest for the whole archive.
#[tracing::instrument(skip(catalog, crypto))]
pub fn build_manifest(catalog: &Catalog, encrypted: bool, crypto: &Crypto) -> Result<Manifest, ExportError> {
    let conn = catalog.connection();

    let mut uuid_to_path: BTreeMap<String, String> = BTreeMap::new();
    {
        let mut stmt = conn.prepare("SELECT uuid, cached_path FROM nodes")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        for row in rows {
            let (uuid, path) = row?;
            uuid_to_path.insert(uuid, path);
        }
    }

    let mut nodes = BTreeMap::new();
    {
        let mut stmt =
            conn.prepare("SELECT uuid, type, name, cached_path, metadata, parent_uuid FROM nodes")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;
        for row in rows {
            let (uuid, node_type, name, path, metadata_json, parent) = row?;
            let metadata = metadata_json
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?
                .unwrap_or(serde_json::Value::Null);

            let mut tags_stmt = conn.prepare("SELECT tag FROM tags WHERE node_uuid = ?1")?;
            let tags: Vec<String> =
                tags_stmt.query_map([&uuid], |r| r.get(0))?.collect::<Result<_, _>>()?;

            let mut edges_stmt =
                conn.prepare("SELECT target_uuid, relation FROM edges WHERE source_uuid = ?1")?;
            let relationships: Vec<ManifestRelationship> = edges_stmt
                .query_map([&uuid], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
                .map(|r| {
                    let (target_uuid, relation) = r?;
                    let target = uuid_to_path.get(&target_uuid).cloned().unwrap_or_else(|| "UNKNOWN".to_string());
                    Ok(ManifestRelationship { relation, target })
                })
                .collect::<Result<_, dlfi_catalog::CatalogError>>()?;

            let mut files_stmt = conn.prepare(
                "SELECT nf.original_name, nf.file_hash, b.size_bytes, b.ext \
                 FROM node_files nf JOIN blobs b ON b.hash = nf.file_hash \
                 WHERE nf.node_uuid = ?1 ORDER BY nf.display_order",
            )?;
            let files: Vec<ManifestFile> = files_stmt
                .query_map([&uuid], |r| {
                    Ok(ManifestFile {
                        name: r.get(0)?,
                        hash: r.get(1)?,
                        size: r.get::<_, i64>(2)?.max(0) as u64,
                        ext: r.get(3)?,
                    })
                })?
                .collect::<Result<_, _>>()?;

            nodes.insert(
                uuid.clone(),
                ManifestNode { uuid, node_type, name, path, parent, metadata, tags, relationships, files },
            );
        }
    }

    let mut blobs = BTreeMap::new();
    {
        let mut stmt = conn.prepare("SELECT hash, size_bytes, ext, part_count FROM blobs")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u32>(3)?,
            ))
        })?;
        for row in rows {
            let (hash, size, ext, parts) = row?;
            blobs.insert(hash, ManifestBlob { size: size.max(0) as u64, ext, parts });
        }
    }

    let crypto_config = if encrypted { crypto.config_for_static() } else { None };

    Ok(Manifest { version: MANIFEST_VERSION, encrypted, nodes, blobs, crypto: crypto_config })
}

/// Serialize `manifest` and write it to `root/manifest.json`, sealing it
/// with `crypto` when `manifest.encrypted` is set.
#[tracing::instrument(skip(manifest, crypto))]
pub fn write_manifest(root: &Path, manifest: &Manifest, crypto: &Crypto) -> Result<(), ExportError> {
    let json = serde_json::to_string_pretty(manifest)?;
    let path = root.join("manifest.json");
    if manifest.encrypted {
        let sealed = crypto.encrypt(json.as_bytes())?;
        fs::write(path, sealed)?;
    } else {
        fs::write(path, json)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlfi_catalog::{Node, NodeType};
    use uuid::Uuid;

    fn make_node(id: Uuid, parent: Option<Uuid>, name: &str, path: &str) -> Node {
        Node {
            id,
            parent,
            node_type: NodeType::Record,
            name: name.to_string(),
            cached_path: path.to_string(),
            metadata: serde_json::json!({"k": "v"}),
            created_at: 0.0,
            last_modified: 0.0,
        }
    }

    #[test]
    fn builds_manifest_with_tags_and_relationships() {
        let catalog = Catalog::open_in_memory().unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        catalog.insert_node(&make_node(a, None, "a", "a")).unwrap();
        catalog.insert_node(&make_node(b, None, "b", "b")).unwrap();
        catalog.add_tag(a, "red").unwrap();
        catalog
            .upsert_edge(&dlfi_catalog::Edge { source: a, target: b, relation: "LIKES".into(), created_at: 0.0 })
            .unwrap();

        let crypto = Crypto::disabled();
        let manifest = build_manifest(&catalog, false, &crypto).unwrap();
        assert_eq!(manifest.nodes.len(), 2);
        let node_a = &manifest.nodes[&a.to_string()];
        assert_eq!(node_a.tags, vec!["red".to_string()]);
        assert_eq!(node_a.relationships.len(), 1);
        assert_eq!(node_a.relationships[0].target, "b");
        assert!(manifest.crypto.is_none());
    }

    #[test]
    fn encrypted_manifest_round_trips() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.insert_node(&make_node(Uuid::new_v4(), None, "a", "a")).unwrap();
        let crypto = Crypto::new("hunter2");

        let manifest = build_manifest(&catalog, true, &crypto).unwrap();
        assert!(manifest.crypto.is_some());

        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), &manifest, &crypto).unwrap();
        let sealed = std::fs::read(dir.path().join("manifest.json")).unwrap();
        let plaintext = crypto.decrypt(&sealed).unwrap();
        let round_tripped: serde_json::Value = serde_json::from_slice(&plaintext).unwrap();
        assert_eq!(round_tripped["version"], MANIFEST_VERSION);
    }
}
