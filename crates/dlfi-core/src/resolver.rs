//! Bijection between `/`-separated hierarchical paths and node identities.

use dlfi_catalog::{now_unix, Catalog, CatalogError, Node, NodeType};
use uuid::Uuid;

/// Errors raised resolving or creating paths.
#[derive(thiserror::Error, Debug)]
pub enum ResolverError {
    /// Underlying catalog failure.
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),
    /// The path was empty after normalization.
    #[error("path has no segments")]
    EmptyPath,
}

/// Resolve `path` to a node id, optionally creating intermediate `Vault`
/// segments and the terminal segment as needed.
///
/// Intermediate segments are always created as `Vault`. Only the terminal
/// segment takes `node_type`/`metadata`, and only if it is being created in
/// this call — an existing terminal node's metadata is never overwritten by a
/// re-resolve.
pub fn resolve(
    catalog: &Catalog,
    path: &str,
    create_if_missing: bool,
    node_type: NodeType,
    metadata: Option<serde_json::Value>,
) -> Result<Option<Uuid>, ResolverError> {
    let raw = path.replace('\\', "/");
    let parts: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();
    if parts.is_empty() {
        return Err(ResolverError::EmptyPath);
    }

    let mut parent: Option<Uuid> = None;
    let mut current_path = String::new();

    for (i, segment) in parts.iter().enumerate() {
        current_path = if current_path.is_empty() {
            (*segment).to_string()
        } else {
            format!("{current_path}/{segment}")
        };
        let is_terminal = i == parts.len() - 1;

        match catalog.get_child(parent, segment)? {
            Some(existing) => {
                parent = Some(existing.id);
            }
            None => {
                if !create_if_missing {
                    return Ok(None);
                }
                let id = Uuid::new_v4();
                let now = now_unix();
                let new_node = Node {
                    id,
                    parent,
                    node_type: if is_terminal { node_type } else { NodeType::Vault },
                    name: (*segment).to_string(),
                    cached_path: current_path.clone(),
                    metadata: if is_terminal {
                        metadata.clone().unwrap_or(serde_json::json!({}))
                    } else {
                        serde_json::json!({})
                    },
                    created_at: now,
                    last_modified: now,
                };
                catalog.insert_node(&new_node)?;
                parent = Some(id);
            }
        }
    }

    Ok(parent)
}

/// Resolve `path` without creating anything, failing (returning `None`) if any
/// segment is missing. Used by operations like `link`/`add_tag` that require
/// both endpoints to already exist.
pub fn resolve_existing(catalog: &Catalog, path: &str) -> Result<Option<Uuid>, ResolverError> {
    resolve(catalog, path, false, NodeType::Record, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_intermediate_vaults() {
        let catalog = Catalog::open_in_memory().unwrap();
        let id = resolve(&catalog, "a/b/c", true, NodeType::Record, None)
            .unwrap()
            .unwrap();
        let node = catalog.get_node(id).unwrap().unwrap();
        assert_eq!(node.node_type, NodeType::Record);
        assert_eq!(node.cached_path, "a/b/c");

        let a = catalog.get_node_by_path("a").unwrap().unwrap();
        assert_eq!(a.node_type, NodeType::Vault);
        let ab = catalog.get_node_by_path("a/b").unwrap().unwrap();
        assert_eq!(ab.node_type, NodeType::Vault);
    }

    #[test]
    fn idempotent_and_does_not_overwrite_metadata() {
        let catalog = Catalog::open_in_memory().unwrap();
        let meta1 = serde_json::json!({"k": 1});
        let id1 = resolve(&catalog, "x/y/z", true, NodeType::Record, Some(meta1.clone()))
            .unwrap()
            .unwrap();
        let meta2 = serde_json::json!({"k": 2});
        let id2 = resolve(&catalog, "x/y/z", true, NodeType::Record, Some(meta2))
            .unwrap()
            .unwrap();
        assert_eq!(id1, id2);
        let node = catalog.get_node(id1).unwrap().unwrap();
        assert_eq!(node.metadata, meta1);
    }

    #[test]
    fn non_creating_resolve_returns_none_when_missing() {
        let catalog = Catalog::open_in_memory().unwrap();
        assert!(resolve_existing(&catalog, "missing/path").unwrap().is_none());
    }

    #[test]
    fn backslashes_and_slashes_normalize_the_same() {
        let catalog = Catalog::open_in_memory().unwrap();
        let id1 = resolve(&catalog, "/a/b/", true, NodeType::Record, None).unwrap().unwrap();
        let id2 = resolve(&catalog, "a\\b", true, NodeType::Record, None).unwrap().unwrap();
        assert_eq!(id1, id2);
    }
}
