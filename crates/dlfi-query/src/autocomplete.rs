//! Cursor-aware suggestions for the query language.
//!
//! Works directly off the token stream rather than the parsed [`crate::ast::Query`]
//! so that a query which doesn't yet parse (the common case while typing)
//! still gets sensible completions.

use std::cell::RefCell;
use std::collections::HashMap;

use dlfi_catalog::Catalog;

use crate::lexer::{tokenize, TokenKind};

const RESERVED_KEYS: &[&str] =
    &["tag", "inside", "path", "ext", "files", "size", "type", "preview", "limit", "sort"];
const NODE_TYPES: &[&str] = &["VAULT", "RECORD"];
const SORT_COLUMNS: &[&str] = &["path", "name", "type", "created", "modified"];

const TAG_LIMIT: usize = 100;
const EXTENSION_LIMIT: usize = 50;
const PATH_LIMIT: usize = 200;
const RELATION_LIMIT: usize = 50;
const METADATA_SCAN_CAP: usize = 500;
const METADATA_KEEP: usize = 50;
const MAX_SUGGESTIONS: usize = 25;

/// What kind of thing a [`Suggestion`] completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuggestionKind {
    /// A reserved query keyword (`tag`, `size`, ...).
    Keyword,
    /// A metadata key seen in at least one node.
    MetadataKey,
    /// A tag value.
    Tag,
    /// A file extension.
    Extension,
    /// `VAULT` or `RECORD`.
    NodeType,
    /// A relation/edge type.
    Relation,
    /// A node path.
    Path,
    /// A `sort:` column name.
    SortColumn,
}

/// One candidate completion.
#[derive(Clone, Debug, PartialEq)]
pub struct Suggestion {
    /// The text to insert.
    pub text: String,
    /// What kind of value this completes.
    pub kind: SuggestionKind,
}

/// Caches the catalog-derived suggestion pools (tags, extensions, relation
/// types, metadata keys) so repeated keystrokes don't re-scan the catalog.
/// Call [`AutocompleteCache::invalidate`] after any write to the catalog.
#[derive(Default)]
pub struct AutocompleteCache {
    tags: RefCell<Option<Vec<String>>>,
    extensions: RefCell<Option<Vec<String>>>,
    relations: RefCell<Option<Vec<String>>>,
    metadata_keys: RefCell<Option<Vec<String>>>,
}

impl AutocompleteCache {
    /// A fresh, empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all cached pools; the next lookup re-scans the catalog.
    pub fn invalidate(&self) {
        *self.tags.borrow_mut() = None;
        *self.extensions.borrow_mut() = None;
        *self.relations.borrow_mut() = None;
        *self.metadata_keys.borrow_mut() = None;
    }

    fn tags(&self, catalog: &Catalog) -> Vec<String> {
        self.cached(&self.tags, || {
            query_distinct(catalog, "SELECT DISTINCT tag FROM tags ORDER BY tag", TAG_LIMIT)
        })
    }

    fn extensions(&self, catalog: &Catalog) -> Vec<String> {
        self.cached(&self.extensions, || {
            query_distinct(catalog, "SELECT DISTINCT ext FROM blobs ORDER BY ext", EXTENSION_LIMIT)
        })
    }

    fn relations(&self, catalog: &Catalog) -> Vec<String> {
        self.cached(&self.relations, || {
            query_distinct(catalog, "SELECT DISTINCT relation FROM edges ORDER BY relation", RELATION_LIMIT)
        })
    }

    fn metadata_keys(&self, catalog: &Catalog) -> Vec<String> {
        self.cached(&self.metadata_keys, || scan_metadata_keys(catalog))
    }

    fn cached(&self, slot: &RefCell<Option<Vec<String>>>, compute: impl FnOnce() -> Vec<String>) -> Vec<String> {
        if let Some(v) = slot.borrow().as_ref() {
            return v.clone();
        }
        let v = compute();
        *slot.borrow_mut() = Some(v.clone());
        v
    }
}

fn query_distinct(catalog: &Catalog, sql: &str, limit: usize) -> Vec<String> {
    let conn = catalog.connection();
    let Ok(mut stmt) = conn.prepare(sql) else { return Vec::new() };
    let Ok(rows) = stmt.query_map([], |row| row.get::<_, String>(0)) else { return Vec::new() };
    rows.filter_map(Result::ok).filter(|s| !s.is_empty()).take(limit).collect()
}

/// Scans up to [`METADATA_SCAN_CAP`] nodes' metadata blobs and returns the
/// [`METADATA_KEEP`] most frequently occurring top-level keys.
fn scan_metadata_keys(catalog: &Catalog) -> Vec<String> {
    let conn = catalog.connection();
    let Ok(mut stmt) = conn.prepare("SELECT metadata FROM nodes LIMIT ?1") else { return Vec::new() };
    let Ok(rows) = stmt.query_map([METADATA_SCAN_CAP as i64], |row| row.get::<_, String>(0)) else {
        return Vec::new();
    };
    let mut counts: HashMap<String, usize> = HashMap::new();
    for blob in rows.filter_map(Result::ok) {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(&blob) {
            for key in map.keys() {
                *counts.entry(key.clone()).or_insert(0) += 1;
            }
        }
    }
    let mut keys: Vec<(String, usize)> = counts.into_iter().collect();
    keys.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    keys.into_iter().take(METADATA_KEEP).map(|(k, _)| k).collect()
}

fn paths(catalog: &Catalog, prefix: &str) -> Vec<String> {
    let conn = catalog.connection();
    let Ok(mut stmt) =
        conn.prepare("SELECT cached_path FROM nodes WHERE cached_path LIKE ?1 ORDER BY cached_path LIMIT ?2")
    else {
        return Vec::new();
    };
    let like = format!("{}%", prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_"));
    let Ok(rows) = stmt.query_map(rusqlite::params![like, PATH_LIMIT as i64], |row| row.get::<_, String>(0)) else {
        return Vec::new();
    };
    rows.filter_map(Result::ok).collect()
}

/// Suggest completions for `source` with the cursor at byte offset `cursor`.
pub fn suggest(catalog: &Catalog, cache: &AutocompleteCache, source: &str, cursor: usize) -> Vec<Suggestion> {
    let tokens = tokenize(&source[..cursor.min(source.len())]);
    let last_two: Vec<&TokenKind> = tokens.iter().rev().take(2).map(|t| &t.kind).collect();

    let partial = match tokens.last() {
        Some(t) if matches!(t.kind, TokenKind::Text(_)) && t.position + text_len(&t.kind) >= cursor => {
            if let TokenKind::Text(s) = &t.kind {
                Some(s.clone())
            } else {
                None
            }
        }
        _ => None,
    };

    let mut out = match last_two.as_slice() {
        // `!partial-path`
        [TokenKind::Text(_), TokenKind::Bang] | [TokenKind::Bang] => {
            paths(catalog, partial.as_deref().unwrap_or(""))
                .into_iter()
                .map(|p| Suggestion { text: p, kind: SuggestionKind::Path })
                .collect()
        }
        // `!path:partial-relation`
        [TokenKind::Text(_), TokenKind::Colon] if preceded_by_bang(&tokens) => cache
            .relations(catalog)
            .into_iter()
            .map(|r| Suggestion { text: r, kind: SuggestionKind::Relation })
            .collect(),
        // `key:partial-value` for a handful of reserved keys with known pools.
        [TokenKind::Text(_), TokenKind::Colon] => match key_before_colon(&tokens).as_deref() {
            Some("tag") => cache
                .tags(catalog)
                .into_iter()
                .map(|t| Suggestion { text: t, kind: SuggestionKind::Tag })
                .collect(),
            Some("ext") => cache
                .extensions(catalog)
                .into_iter()
                .map(|e| Suggestion { text: e, kind: SuggestionKind::Extension })
                .collect(),
            Some("type") => {
                NODE_TYPES.iter().map(|t| Suggestion { text: (*t).to_string(), kind: SuggestionKind::NodeType }).collect()
            }
            Some("sort") => SORT_COLUMNS
                .iter()
                .map(|c| Suggestion { text: (*c).to_string(), kind: SuggestionKind::SortColumn })
                .collect(),
            Some("inside") | Some("path") => paths(catalog, "")
                .into_iter()
                .map(|p| Suggestion { text: p, kind: SuggestionKind::Path })
                .collect(),
            Some(key) => cache
                .metadata_keys(catalog)
                .into_iter()
                .find(|k| k == key)
                .map(|_| Vec::new())
                .unwrap_or_default(),
            None => Vec::new(),
        },
        // Starting a new term, or partway through typing a bare word: suggest
        // reserved keywords and known metadata keys.
        _ => {
            let prefix = partial.clone().unwrap_or_default();
            RESERVED_KEYS
                .iter()
                .map(|k| (*k).to_string())
                .chain(cache.metadata_keys(catalog))
                .filter(|k| k.starts_with(&prefix))
                .map(|k| Suggestion { text: k, kind: SuggestionKind::Keyword })
                .collect()
        }
    };

    out.truncate(MAX_SUGGESTIONS);
    out
}

fn text_len(kind: &TokenKind) -> usize {
    match kind {
        TokenKind::Text(s) | TokenKind::Quoted(s) => s.chars().count(),
        _ => 1,
    }
}

fn key_before_colon(tokens: &[crate::lexer::Token]) -> Option<String> {
    let idx = tokens.len().checked_sub(2)?;
    match &tokens.get(idx)?.kind {
        TokenKind::Text(s) => Some(s.clone()),
        _ => None,
    }
}

fn preceded_by_bang(tokens: &[crate::lexer::Token]) -> bool {
    tokens.len() >= 3 && matches!(tokens[tokens.len() - 3].kind, TokenKind::Bang)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggests_reserved_keywords_at_start() {
        let cat = Catalog::open_in_memory().unwrap();
        let cache = AutocompleteCache::new();
        let suggestions = suggest(&cat, &cache, "ta", 2);
        assert!(suggestions.iter().any(|s| s.text == "tag"));
    }

    #[test]
    fn suggests_node_types_after_type_colon() {
        let cat = Catalog::open_in_memory().unwrap();
        let cache = AutocompleteCache::new();
        let suggestions = suggest(&cat, &cache, "type:", 5);
        let texts: Vec<&str> = suggestions.iter().map(|s| s.text.as_str()).collect();
        assert!(texts.contains(&"VAULT"));
        assert!(texts.contains(&"RECORD"));
    }

    #[test]
    fn cache_invalidate_forces_rescan() {
        let cat = Catalog::open_in_memory().unwrap();
        let cache = AutocompleteCache::new();
        assert!(cache.tags(&cat).is_empty());
        cat.insert_node(&dlfi_catalog::Node {
            id: uuid::Uuid::new_v4(),
            parent: None,
            node_type: dlfi_catalog::NodeType::Record,
            name: "a".into(),
            cached_path: "a".into(),
            metadata: serde_json::json!({}),
            created_at: 0.0,
            last_modified: 0.0,
        })
        .unwrap();
        cat.add_tag(uuid::Uuid::new_v4(), "ignored").ok();
        cache.invalidate();
        // Re-querying after invalidate should not panic or use stale state.
        let _ = cache.tags(&cat);
    }
}
