//! Path resolution (C5), the ingest pipeline (C6), and configuration
//! transactions (C7) layered over [`dlfi_catalog`] and [`dlfi_blobstore`].

#![warn(missing_docs)]

pub mod config;
pub mod ingest;
pub mod resolver;

use dlfi_catalog::{now_unix, Catalog, CatalogError, Edge};

pub use config::{ConfigError, VaultConfig};
pub use ingest::IngestError;
pub use resolver::ResolverError;

/// Errors raised by the relationship/tagging helpers in this crate.
#[derive(thiserror::Error, Debug)]
pub enum RelationError {
    /// Underlying catalog failure.
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),
    /// Underlying resolver failure.
    #[error("resolver: {0}")]
    Resolver(#[from] ResolverError),
    /// One or both endpoints do not resolve to existing nodes.
    #[error("endpoint not found: {0}")]
    EndpointNotFound(String),
}

/// Create a directed, labeled relationship between two existing paths.
/// `relation` is upper-cased before storage.
pub fn link(catalog: &Catalog, source_path: &str, target_path: &str, relation: &str) -> Result<(), RelationError> {
    let source = resolver::resolve_existing(catalog, source_path)?
        .ok_or_else(|| RelationError::EndpointNotFound(source_path.to_string()))?;
    let target = resolver::resolve_existing(catalog, target_path)?
        .ok_or_else(|| RelationError::EndpointNotFound(target_path.to_string()))?;
    catalog.upsert_edge(&Edge {
        source,
        target,
        relation: relation.to_uppercase(),
        created_at: now_unix(),
    })?;
    Ok(())
}

/// Attach a lowercased tag to an existing node path.
pub fn add_tag(catalog: &Catalog, path: &str, tag: &str) -> Result<(), RelationError> {
    let node = resolver::resolve_existing(catalog, path)?
        .ok_or_else(|| RelationError::EndpointNotFound(path.to_string()))?;
    catalog.add_tag(node, tag)?;
    Ok(())
}

/// Delete a node (and, via catalog cascade, its descendants, file-links, tags,
/// and touching edges).
pub fn delete_path(catalog: &Catalog, path: &str) -> Result<(), RelationError> {
    let node = resolver::resolve_existing(catalog, path)?
        .ok_or_else(|| RelationError::EndpointNotFound(path.to_string()))?;
    catalog.delete_node(node)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlfi_catalog::NodeType;

    #[test]
    fn link_and_add_tag_require_existing_endpoints() {
        let catalog = Catalog::open_in_memory().unwrap();
        resolver::resolve(&catalog, "a", true, NodeType::Record, None).unwrap();
        assert!(matches!(
            link(&catalog, "a", "missing", "LIKES"),
            Err(RelationError::EndpointNotFound(_))
        ));

        resolver::resolve(&catalog, "b", true, NodeType::Record, None).unwrap();
        link(&catalog, "a", "b", "likes").unwrap();
        let a = catalog.get_node_by_path("a").unwrap().unwrap();
        let b = catalog.get_node_by_path("b").unwrap().unwrap();
        let edges: Vec<String> = catalog
            .connection()
            .prepare("SELECT relation FROM edges WHERE source_uuid = ?1 AND target_uuid = ?2")
            .unwrap()
            .query_map([a.id.to_string(), b.id.to_string()], |row| row.get(0))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(edges, vec!["LIKES".to_string()]);
    }

    #[test]
    fn delete_cascades() {
        let catalog = Catalog::open_in_memory().unwrap();
        resolver::resolve(&catalog, "p/c", true, NodeType::Record, None).unwrap();
        delete_path(&catalog, "p").unwrap();
        assert!(catalog.get_node_by_path("p/c").unwrap().is_none());
    }
}
