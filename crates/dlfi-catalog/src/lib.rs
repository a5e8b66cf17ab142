//! Relational catalog: nodes, blobs, file-links, edges, and tags.
//!
//! Backed by SQLite via `rusqlite` in WAL mode with foreign keys enforced. The
//! schema and pragmas mirror a single-writer, single-process embedded store;
//! there is no connection pooling because there is only ever one writer.

#![warn(missing_docs)]

pub mod models;

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

pub use models::{now_unix, Blob, Edge, Node, NodeFile, NodeType, Tag};

/// Errors raised by catalog operations.
#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    /// Underlying SQLite failure.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Metadata failed to serialize/deserialize as JSON.
    #[error("metadata json: {0}")]
    Json(#[from] serde_json::Error),
    /// Referenced node does not exist.
    #[error("node not found")]
    NodeNotFound,
    /// Referenced blob does not exist.
    #[error("blob not found")]
    BlobNotFound,
    /// A stored uuid or node type column did not parse.
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

/// The relational store for one open archive.
pub struct Catalog {
    conn: Connection,
}

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS nodes (
    uuid TEXT PRIMARY KEY,
    parent_uuid TEXT,
    type TEXT CHECK(type IN ('VAULT', 'RECORD')) NOT NULL,
    name TEXT NOT NULL,
    cached_path TEXT UNIQUE,
    metadata JSON,
    created_at REAL,
    last_modified REAL,
    FOREIGN KEY(parent_uuid) REFERENCES nodes(uuid) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_uuid);
CREATE INDEX IF NOT EXISTS idx_nodes_path ON nodes(cached_path);

CREATE TABLE IF NOT EXISTS blobs (
    hash TEXT PRIMARY KEY,
    ext TEXT,
    size_bytes INTEGER,
    storage_path TEXT,
    part_count INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS node_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    node_uuid TEXT NOT NULL,
    file_hash TEXT NOT NULL,
    original_name TEXT,
    display_order INTEGER,
    added_at REAL,
    FOREIGN KEY(node_uuid) REFERENCES nodes(uuid) ON DELETE CASCADE,
    FOREIGN KEY(file_hash) REFERENCES blobs(hash)
);
CREATE INDEX IF NOT EXISTS idx_node_files_node ON node_files(node_uuid);

CREATE TABLE IF NOT EXISTS edges (
    source_uuid TEXT,
    target_uuid TEXT,
    relation TEXT,
    created_at REAL,
    PRIMARY KEY (source_uuid, target_uuid, relation),
    FOREIGN KEY(source_uuid) REFERENCES nodes(uuid) ON DELETE CASCADE,
    FOREIGN KEY(target_uuid) REFERENCES nodes(uuid) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_uuid);
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_uuid);

CREATE TABLE IF NOT EXISTS tags (
    node_uuid TEXT,
    tag TEXT,
    PRIMARY KEY (node_uuid, tag),
    FOREIGN KEY(node_uuid) REFERENCES nodes(uuid) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_tags_tag ON tags(tag);
";

impl Catalog {
    /// Open (creating and migrating if absent) the catalog database at `path`.
    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Open an in-memory catalog, for tests.
    pub fn open_in_memory() -> Result<Self, CatalogError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Run `f` inside a SQLite transaction; `f`'s error (if any) rolls it back.
    pub fn transaction<T, E>(
        &mut self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<CatalogError>,
    {
        let tx = self.conn.transaction().map_err(CatalogError::Sqlite)?;
        let result = f(&tx)?;
        tx.commit().map_err(CatalogError::Sqlite)?;
        Ok(result)
    }

    /// Direct access to the underlying connection, for the query engine's
    /// compiled SQL execution.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Look up a node by its exact id.
    pub fn get_node(&self, id: Uuid) -> Result<Option<Node>, CatalogError> {
        self.conn
            .query_row(
                "SELECT uuid, parent_uuid, type, name, cached_path, metadata, created_at, last_modified \
                 FROM nodes WHERE uuid = ?1",
                params![id.to_string()],
                row_to_node,
            )
            .optional()
            .map_err(CatalogError::Sqlite)?
            .transpose()
    }

    /// Look up a node by its full cached path.
    pub fn get_node_by_path(&self, path: &str) -> Result<Option<Node>, CatalogError> {
        self.conn
            .query_row(
                "SELECT uuid, parent_uuid, type, name, cached_path, metadata, created_at, last_modified \
                 FROM nodes WHERE cached_path = ?1",
                params![path],
                row_to_node,
            )
            .optional()
            .map_err(CatalogError::Sqlite)?
            .transpose()
    }

    /// Look up a child of `parent` (or a root, if `parent` is `None`) by name.
    /// Uses `parent_uuid IS ?` so `NULL` parents (roots) match correctly.
    pub fn get_child(&self, parent: Option<Uuid>, name: &str) -> Result<Option<Node>, CatalogError> {
        self.conn
            .query_row(
                "SELECT uuid, parent_uuid, type, name, cached_path, metadata, created_at, last_modified \
                 FROM nodes WHERE parent_uuid IS ?1 AND name = ?2",
                params![parent.map(|u| u.to_string()), name],
                row_to_node,
            )
            .optional()
            .map_err(CatalogError::Sqlite)?
            .transpose()
    }

    /// Insert a new node row.
    pub fn insert_node(&self, node: &Node) -> Result<(), CatalogError> {
        self.conn.execute(
            "INSERT INTO nodes (uuid, parent_uuid, type, name, cached_path, metadata, created_at, last_modified) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                node.id.to_string(),
                node.parent.map(|u| u.to_string()),
                node.node_type.as_sql(),
                node.name,
                node.cached_path,
                serde_json::to_string(&node.metadata)?,
                node.created_at,
                node.last_modified,
            ],
        )?;
        Ok(())
    }

    /// Update `last_modified` for a node to the given timestamp.
    pub fn touch_node(&self, id: Uuid, at: f64) -> Result<(), CatalogError> {
        self.conn.execute(
            "UPDATE nodes SET last_modified = ?1 WHERE uuid = ?2",
            params![at, id.to_string()],
        )?;
        Ok(())
    }

    /// Recursively delete a node and (via `ON DELETE CASCADE`) its descendants,
    /// file-links, tags, and touching edges.
    pub fn delete_node(&self, id: Uuid) -> Result<(), CatalogError> {
        self.conn
            .execute("DELETE FROM nodes WHERE uuid = ?1", params![id.to_string()])?;
        Ok(())
    }

    /// Look up a blob by hash.
    pub fn get_blob(&self, hash: &str) -> Result<Option<Blob>, CatalogError> {
        self.conn
            .query_row(
                "SELECT hash, ext, size_bytes, storage_path, part_count FROM blobs WHERE hash = ?1",
                params![hash],
                row_to_blob,
            )
            .optional()
            .map_err(CatalogError::Sqlite)?
            .transpose()
    }

    /// Insert a new blob row.
    pub fn insert_blob(&self, blob: &Blob) -> Result<(), CatalogError> {
        self.conn.execute(
            "INSERT INTO blobs (hash, ext, size_bytes, storage_path, part_count) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![blob.hash, blob.ext, blob.size_bytes, blob.storage_path, blob.part_count],
        )?;
        Ok(())
    }

    /// Update a blob's `part_count` (and, optionally, `size_bytes`) after a
    /// config-manager re-encryption/re-partition pass. The hash itself never
    /// changes since it is always the plaintext digest.
    pub fn update_blob_parts(&self, hash: &str, part_count: u32) -> Result<(), CatalogError> {
        self.conn.execute(
            "UPDATE blobs SET part_count = ?1 WHERE hash = ?2",
            params![part_count, hash],
        )?;
        Ok(())
    }

    /// All blob hashes, in arbitrary (storage) order — used by the config
    /// manager to walk every blob for a whole-store transaction.
    pub fn all_blob_hashes(&self) -> Result<Vec<String>, CatalogError> {
        let mut stmt = self.conn.prepare("SELECT hash FROM blobs")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Count of existing file-links for a node, used to compute the next
    /// `display_order`.
    pub fn file_count(&self, node: Uuid) -> Result<i64, CatalogError> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM node_files WHERE node_uuid = ?1",
                params![node.to_string()],
                |row| row.get(0),
            )
            .map_err(CatalogError::Sqlite)
    }

    /// Insert a new file-link row.
    pub fn insert_node_file(&self, link: &NodeFile) -> Result<(), CatalogError> {
        self.conn.execute(
            "INSERT INTO node_files (node_uuid, file_hash, original_name, display_order, added_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                link.node.to_string(),
                link.blob,
                link.original_name,
                link.display_order,
                link.added_at,
            ],
        )?;
        Ok(())
    }

    /// All file-links for a node, in display order.
    pub fn node_files(&self, node: Uuid) -> Result<Vec<NodeFile>, CatalogError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, node_uuid, file_hash, original_name, display_order, added_at \
             FROM node_files WHERE node_uuid = ?1 ORDER BY display_order ASC",
        )?;
        let rows = stmt.query_map(params![node.to_string()], row_to_node_file)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    /// Insert or replace an edge (re-inserting refreshes `created_at`).
    pub fn upsert_edge(&self, edge: &Edge) -> Result<(), CatalogError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO edges (source_uuid, target_uuid, relation, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![edge.source.to_string(), edge.target.to_string(), edge.relation, edge.created_at],
        )?;
        Ok(())
    }

    /// Add a tag to a node, ignoring the call if it is already present.
    pub fn add_tag(&self, node: Uuid, tag: &str) -> Result<(), CatalogError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO tags (node_uuid, tag) VALUES (?1, ?2)",
            params![node.to_string(), tag.to_lowercase()],
        )?;
        Ok(())
    }

    /// Tags attached to a node, in insertion-arbitrary (alphabetic) order.
    pub fn node_tags(&self, node: Uuid) -> Result<Vec<String>, CatalogError> {
        let mut stmt = self
            .conn
            .prepare("SELECT tag FROM tags WHERE node_uuid = ?1 ORDER BY tag ASC")?;
        let rows = stmt.query_map(params![node.to_string()], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Node, CatalogError>> {
    let id: String = row.get(0)?;
    let parent: Option<String> = row.get(1)?;
    let node_type: String = row.get(2)?;
    let name: String = row.get(3)?;
    let cached_path: String = row.get(4)?;
    let metadata_json: String = row.get(5)?;
    let created_at: f64 = row.get(6)?;
    let last_modified: f64 = row.get(7)?;
    Ok(parse_node_row(
        &id,
        parent.as_deref(),
        &node_type,
        name,
        cached_path,
        &metadata_json,
        created_at,
        last_modified,
    ))
}

#[allow(clippy::too_many_arguments)]
fn parse_node_row(
    id: &str,
    parent: Option<&str>,
    node_type: &str,
    name: String,
    cached_path: String,
    metadata_json: &str,
    created_at: f64,
    last_modified: f64,
) -> Result<Node, CatalogError> {
    let id = Uuid::parse_str(id).map_err(|e| CatalogError::CorruptRow(e.to_string()))?;
    let parent = parent
        .map(Uuid::parse_str)
        .transpose()
        .map_err(|e| CatalogError::CorruptRow(e.to_string()))?;
    let node_type = NodeType::from_sql(node_type)
        .ok_or_else(|| CatalogError::CorruptRow(format!("unknown node type {node_type}")))?;
    Ok(Node {
        id,
        parent,
        node_type,
        name,
        cached_path,
        metadata: serde_json::from_str(metadata_json)?,
        created_at,
        last_modified,
    })
}

fn row_to_blob(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Blob, CatalogError>> {
    Ok(Ok(Blob {
        hash: row.get(0)?,
        ext: row.get(1)?,
        size_bytes: row.get(2)?,
        storage_path: row.get(3)?,
        part_count: row.get(4)?,
    }))
}

fn row_to_node_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<NodeFile, CatalogError>> {
    let id: i64 = row.get(0)?;
    let node: String = row.get(1)?;
    let blob: String = row.get(2)?;
    let original_name: String = row.get(3)?;
    let display_order: i64 = row.get(4)?;
    let added_at: f64 = row.get(5)?;
    let parsed = Uuid::parse_str(&node).map_err(|e| CatalogError::CorruptRow(e.to_string()));
    Ok(parsed.map(|node| NodeFile { id, node, blob, original_name, display_order, added_at }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_fetch_node() {
        let catalog = Catalog::open_in_memory().unwrap();
        let node = Node {
            id: Uuid::new_v4(),
            parent: None,
            node_type: NodeType::Vault,
            name: "root".into(),
            cached_path: "root".into(),
            metadata: serde_json::json!({}),
            created_at: now_unix(),
            last_modified: now_unix(),
        };
        catalog.insert_node(&node).unwrap();
        let fetched = catalog.get_node(node.id).unwrap().unwrap();
        assert_eq!(fetched.cached_path, "root");
        let by_path = catalog.get_node_by_path("root").unwrap().unwrap();
        assert_eq!(by_path.id, node.id);
    }

    #[test]
    fn cascade_delete_removes_children_and_links() {
        let catalog = Catalog::open_in_memory().unwrap();
        let parent = Node {
            id: Uuid::new_v4(),
            parent: None,
            node_type: NodeType::Vault,
            name: "p".into(),
            cached_path: "p".into(),
            metadata: serde_json::json!({}),
            created_at: now_unix(),
            last_modified: now_unix(),
        };
        catalog.insert_node(&parent).unwrap();
        let child = Node {
            id: Uuid::new_v4(),
            parent: Some(parent.id),
            node_type: NodeType::Record,
            name: "c".into(),
            cached_path: "p/c".into(),
            metadata: serde_json::json!({}),
            created_at: now_unix(),
            last_modified: now_unix(),
        };
        catalog.insert_node(&child).unwrap();
        catalog.add_tag(child.id, "X").unwrap();
        catalog.delete_node(parent.id).unwrap();
        assert!(catalog.get_node(child.id).unwrap().is_none());
        assert!(catalog.node_tags(child.id).unwrap().is_empty());
    }

    #[test]
    fn null_safe_child_lookup() {
        let catalog = Catalog::open_in_memory().unwrap();
        assert!(catalog.get_child(None, "root").unwrap().is_none());
        let node = Node {
            id: Uuid::new_v4(),
            parent: None,
            node_type: NodeType::Vault,
            name: "root".into(),
            cached_path: "root".into(),
            metadata: serde_json::json!({}),
            created_at: now_unix(),
            last_modified: now_unix(),
        };
        catalog.insert_node(&node).unwrap();
        assert_eq!(catalog.get_child(None, "root").unwrap().unwrap().id, node.id);
    }
}
