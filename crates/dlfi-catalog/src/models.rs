//! Row types for the catalog's tables.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether a node may have children (`Vault`) or owns file-links (`Record`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeType {
    /// Interior node; may have children, may not own file-links.
    Vault,
    /// Leaf node; may own file-links, may not have children.
    Record,
}

impl NodeType {
    /// The `CHECK(type IN (...))` spelling used in the `nodes` table.
    pub fn as_sql(self) -> &'static str {
        match self {
            NodeType::Vault => "VAULT",
            NodeType::Record => "RECORD",
        }
    }

    /// Parse the on-disk spelling back into a [`NodeType`].
    pub fn from_sql(s: &str) -> Option<Self> {
        match s {
            "VAULT" => Some(NodeType::Vault),
            "RECORD" => Some(NodeType::Record),
            _ => None,
        }
    }
}

/// A node in the hierarchical namespace: a `Vault` (interior) or `Record` (leaf).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    /// Stable identity.
    pub id: Uuid,
    /// Parent node, or `None` for a root.
    pub parent: Option<Uuid>,
    /// `Vault` or `Record`.
    pub node_type: NodeType,
    /// Display name; unique among siblings, must not contain `/`.
    pub name: String,
    /// `/`-joined path from root to this node; globally unique.
    pub cached_path: String,
    /// Free-form nested metadata document.
    pub metadata: serde_json::Value,
    /// Unix seconds at creation.
    pub created_at: f64,
    /// Unix seconds at last modification.
    pub last_modified: f64,
}

/// An immutable, content-addressed blob of (optionally encrypted, optionally
/// partitioned) bytes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Blob {
    /// Lowercase hex SHA-256 of the plaintext; primary key.
    pub hash: String,
    /// Lowercased, dot-stripped file extension; may be empty.
    pub ext: String,
    /// Length of the plaintext, in bytes.
    pub size_bytes: u64,
    /// Path relative to the blob store root, e.g. `aa/bb/<hash>`.
    pub storage_path: String,
    /// `0` if stored as a single file, else the number of parts.
    pub part_count: u32,
}

/// Association between a `Record` node and a `Blob`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeFile {
    /// Auto-increment id.
    pub id: i64,
    /// Owning node.
    pub node: Uuid,
    /// Referenced blob.
    pub blob: String,
    /// Filename presented at ingest time.
    pub original_name: String,
    /// 1-indexed, append-only position within the node.
    pub display_order: i64,
    /// Unix seconds at link creation.
    pub added_at: f64,
}

/// A directed, labeled relationship between two nodes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Edge {
    /// Source node.
    pub source: Uuid,
    /// Target node.
    pub target: Uuid,
    /// Uppercase relation identifier.
    pub relation: String,
    /// Unix seconds; refreshed on re-insertion of the same (source, target, relation).
    pub created_at: f64,
}

/// A lowercased tag attached to a node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tag {
    /// Tagged node.
    pub node: Uuid,
    /// Lowercased tag text.
    pub tag: String,
}

/// Current wall-clock time as Unix seconds, matching the original's
/// `time.time()` (sub-second precision, no ordering guarantee beyond
/// "later call observes a value >= an earlier call's").
pub fn now_unix() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
