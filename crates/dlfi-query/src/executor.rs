//! Compiles a parsed [`Query`] to SQL and runs it against a [`Catalog`].
//!
//! Conditions are compiled to boolean SQL fragments rather than joined once
//! up front: each term that needs a related table (tags, edges, node_files)
//! gets its own `EXISTS (...)` subquery, scoped to whichever node alias it
//! applies to. This keeps deep/reverse-deep modifiers — which re-scope a
//! whole subtree onto a second alias — compositional without needing to
//! thread extra joins through every other term.

use std::fmt::Write as _;

use dlfi_catalog::{Catalog, CatalogError, Node, NodeType};
use rusqlite::types::Value as SqlValue;

use crate::ast::{Direction, Operator, OrGroup, Query, SortColumn, Term, TermType, Value};

/// A matched node, enriched with the data autocomplete/display callers
/// usually want alongside it.
#[derive(Clone, Debug)]
pub struct NodeResult {
    /// The matched node.
    pub node: Node,
    /// Tags on this node.
    pub tags: Vec<String>,
    /// Number of files linked to this node.
    pub file_count: i64,
    /// Sum of linked blob sizes, in bytes.
    pub total_size: u64,
    /// Number of direct children.
    pub child_count: i64,
}

/// Errors raised compiling or executing a query.
#[derive(thiserror::Error, Debug)]
pub enum ExecError {
    /// Underlying catalog failure.
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),
    /// A query term referenced something the compiler cannot express.
    #[error("unsupported query: {0}")]
    Unsupported(String),
}

const PREVIEW_EXTENSIONS: &[&str] =
    &["jpg", "jpeg", "png", "gif", "webp", "bmp", "mp3", "wav", "flac", "mp4", "mov", "webm"];

/// Run `query` against `catalog` and return matching nodes, enriched and
/// ordered/limited per any `sort:`/`limit:` terms present.
#[tracing::instrument(skip(catalog, query))]
pub fn execute(catalog: &Catalog, query: &Query) -> Result<Vec<NodeResult>, ExecError> {
    let (filters, limit, sort) = split_control_terms(query);

    let mut params: Vec<SqlValue> = Vec::new();
    let where_clause = compile_query(catalog, &filters, "n", &mut params)?;

    let mut sql = String::from("SELECT n.uuid FROM nodes n");
    if !where_clause.is_empty() {
        let _ = write!(sql, " WHERE {where_clause}");
    }
    let (column, descending) = sort.unwrap_or((SortColumn::Path, false));
    let order_col = match column {
        SortColumn::Path => "n.cached_path",
        SortColumn::Name => "n.name",
        SortColumn::Type => "n.type",
        SortColumn::Created => "n.created_at",
        SortColumn::Modified => "n.last_modified",
    };
    let _ = write!(sql, " ORDER BY {order_col} {}", if descending { "DESC" } else { "ASC" });
    if let Some(n) = limit {
        let _ = write!(sql, " LIMIT {n}");
    }

    let conn = catalog.connection();
    let mut stmt = conn.prepare(&sql).map_err(CatalogError::from)?;
    let ids: Vec<String> = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| row.get(0))
        .map_err(CatalogError::from)?
        .collect::<Result<_, _>>()
        .map_err(CatalogError::from)?;

    let mut results = Vec::with_capacity(ids.len());
    for id in ids {
        let uuid = uuid::Uuid::parse_str(&id)
            .map_err(|e| ExecError::Catalog(CatalogError::CorruptRow(e.to_string())))?;
        if let Some(node) = catalog.get_node(uuid)? {
            results.push(enrich(catalog, node)?);
        }
    }
    Ok(results)
}

fn enrich(catalog: &Catalog, node: Node) -> Result<NodeResult, ExecError> {
    let tags = catalog.node_tags(node.id)?;
    let file_count = catalog.file_count(node.id)?;
    let conn = catalog.connection();
    let total_size: i64 = conn
        .query_row(
            "SELECT COALESCE(SUM(b.size_bytes), 0) FROM node_files nf \
             JOIN blobs b ON b.hash = nf.file_hash WHERE nf.node_uuid = ?1",
            [node.id.to_string()],
            |row| row.get(0),
        )
        .map_err(CatalogError::from)?;
    let child_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM nodes WHERE parent_uuid = ?1",
            [node.id.to_string()],
            |row| row.get(0),
        )
        .map_err(CatalogError::from)?;
    Ok(NodeResult { node, tags, file_count, total_size: total_size.max(0) as u64, child_count })
}

/// Pulls top-level bare `limit:`/`sort:` terms out of the query; these are
/// query-wide controls, not per-node filters, so they never belong inside a
/// `WHERE` clause.
fn split_control_terms(query: &Query) -> (Query, Option<u32>, Option<(SortColumn, bool)>) {
    let mut filters = Vec::new();
    let mut limit = None;
    let mut sort = None;
    for group in query {
        if group.len() == 1 {
            if let Term::Atom { kind, modifiers } = &group[0] {
                if *modifiers == crate::ast::Modifiers::default() {
                    match kind {
                        TermType::Limit { value } => {
                            limit = Some(*value);
                            continue;
                        }
                        TermType::Sort { column, descending } => {
                            sort = Some((*column, *descending));
                            continue;
                        }
                        _ => {}
                    }
                }
            }
        }
        filters.push(group.clone());
    }
    (filters, limit, sort)
}

fn compile_query(
    catalog: &Catalog,
    query: &Query,
    alias: &str,
    params: &mut Vec<SqlValue>,
) -> Result<String, ExecError> {
    let mut clauses = Vec::new();
    for group in query {
        let clause = compile_or_group(catalog, group, alias, params)?;
        if !clause.is_empty() {
            clauses.push(format!("({clause})"));
        }
    }
    Ok(clauses.join(" AND "))
}

fn compile_or_group(
    catalog: &Catalog,
    group: &OrGroup,
    alias: &str,
    params: &mut Vec<SqlValue>,
) -> Result<String, ExecError> {
    let mut parts = Vec::new();
    for term in group {
        parts.push(compile_term(catalog, term, alias, params)?);
    }
    Ok(parts.join(" OR "))
}

fn compile_term(
    catalog: &Catalog,
    term: &Term,
    alias: &str,
    params: &mut Vec<SqlValue>,
) -> Result<String, ExecError> {
    let (modifiers, inner) = match term {
        Term::Atom { kind, modifiers } => (*modifiers, compile_atom(catalog, kind, alias, params)?),
        Term::Group { query, modifiers } => {
            let scoped_alias = if modifiers.deep || modifiers.reverse_deep { next_alias(alias) } else { alias.to_string() };
            let inner = compile_query(catalog, query, &scoped_alias, params)?;
            (*modifiers, inner)
        }
    };

    let scoped = if modifiers.deep {
        let c = next_alias(alias);
        format!(
            "EXISTS (SELECT 1 FROM nodes {c} WHERE ({c}.cached_path = {alias}.cached_path \
             OR {c}.cached_path LIKE {alias}.cached_path || '/%') AND ({inner}))",
        )
    } else if modifiers.reverse_deep {
        let c = next_alias(alias);
        format!(
            "EXISTS (SELECT 1 FROM nodes {c} WHERE ({c}.cached_path = {alias}.cached_path \
             OR {alias}.cached_path LIKE {c}.cached_path || '/%') AND ({inner}))",
        )
    } else {
        inner
    };

    Ok(if modifiers.negated { format!("NOT ({scoped})") } else { scoped })
}

fn next_alias(alias: &str) -> String {
    format!("{alias}x")
}

fn compile_atom(
    catalog: &Catalog,
    kind: &TermType,
    alias: &str,
    params: &mut Vec<SqlValue>,
) -> Result<String, ExecError> {
    match kind {
        TermType::GlobalSearch { text, exact } => {
            if *exact {
                params.push(SqlValue::Text(text.clone()));
                params.push(SqlValue::Text(text.clone()));
                params.push(SqlValue::Text(text.to_lowercase()));
                let p = placeholder_group(3, params.len());
                Ok(format!(
                    "{alias}.name = {a} OR {alias}.cached_path = {b} \
                     OR EXISTS (SELECT 1 FROM tags t WHERE t.node_uuid = {alias}.uuid AND t.tag = {c})",
                    a = p[0],
                    b = p[1],
                    c = p[2],
                ))
            } else {
                let like = format!("%{}%", escape_like(text));
                params.push(SqlValue::Text(like.clone()));
                params.push(SqlValue::Text(like.clone()));
                params.push(SqlValue::Text(like.clone()));
                let p = placeholder_group(3, params.len());
                Ok(format!(
                    "{alias}.name LIKE {a} ESCAPE '\\' OR {alias}.cached_path LIKE {b} ESCAPE '\\' \
                     OR {alias}.metadata LIKE {c} ESCAPE '\\'",
                    a = p[0],
                    b = p[1],
                    c = p[2],
                ))
            }
        }
        TermType::Tag { value } => {
            if value.is_empty() {
                Ok(format!("EXISTS (SELECT 1 FROM tags t WHERE t.node_uuid = {alias}.uuid)"))
            } else {
                params.push(SqlValue::Text(value.to_lowercase()));
                let p = ph(params.len());
                Ok(format!("EXISTS (SELECT 1 FROM tags t WHERE t.node_uuid = {alias}.uuid AND t.tag = {p})"))
            }
        }
        TermType::Inside { path } => match catalog.get_node_by_path(path)? {
            Some(node) => {
                params.push(SqlValue::Text(node.cached_path.clone()));
                params.push(SqlValue::Text(format!("{}/%", node.cached_path)));
                let p = placeholder_group(2, params.len());
                Ok(format!("{alias}.cached_path = {} OR {alias}.cached_path LIKE {}", p[0], p[1]))
            }
            None => Ok("1=0".to_string()),
        },
        TermType::PathPattern { pattern } => {
            let like = glob_to_like(pattern);
            params.push(SqlValue::Text(like));
            let p = ph(params.len());
            Ok(format!("{alias}.cached_path LIKE {p} ESCAPE '\\'"))
        }
        TermType::Extension { value } => {
            params.push(SqlValue::Text(value.clone()));
            let p = ph(params.len());
            Ok(format!(
                "EXISTS (SELECT 1 FROM node_files nf JOIN blobs b ON b.hash = nf.file_hash \
                 WHERE nf.node_uuid = {alias}.uuid AND b.ext = {p})"
            ))
        }
        TermType::FileCount { op, value } => {
            let subject = format!("(SELECT COUNT(*) FROM node_files nf WHERE nf.node_uuid = {alias}.uuid)");
            compile_comparison(&subject, *op, &Value::Number(*value), params)
        }
        TermType::Size { op, value } => {
            let subject = format!(
                "(SELECT COALESCE(SUM(b.size_bytes), 0) FROM node_files nf \
                 JOIN blobs b ON b.hash = nf.file_hash WHERE nf.node_uuid = {alias}.uuid)"
            );
            compile_comparison(&subject, *op, value, params)
        }
        TermType::Type { node_type } => {
            params.push(SqlValue::Text(node_type.as_sql().to_string()));
            let p = ph(params.len());
            Ok(format!("{alias}.type = {p}"))
        }
        TermType::Preview => {
            let list = PREVIEW_EXTENSIONS.iter().map(|e| format!("'{e}'")).collect::<Vec<_>>().join(", ");
            Ok(format!(
                "EXISTS (SELECT 1 FROM node_files nf JOIN blobs b ON b.hash = nf.file_hash \
                 WHERE nf.node_uuid = {alias}.uuid AND b.ext IN ({list}))"
            ))
        }
        TermType::Metadata { key, op, value } => {
            let path = json_path(key);
            params.push(SqlValue::Text(path));
            let subject = format!("json_extract({alias}.metadata, {})", ph(params.len()));
            compile_comparison(&subject, *op, value, params)
        }
        TermType::MetaExists { key } => {
            let path = json_path(key);
            params.push(SqlValue::Text(path));
            let p = ph(params.len());
            Ok(format!("json_extract({alias}.metadata, {p}) IS NOT NULL"))
        }
        TermType::Relation { path, relation, direction } => match catalog.get_node_by_path(path)? {
            Some(target) => {
                let target_id = target.id.to_string();
                let endpoint_clause = match direction {
                    Some(Direction::Outgoing) => {
                        params.push(SqlValue::Text(target_id));
                        format!("e.source_uuid = {alias}.uuid AND e.target_uuid = {}", ph(params.len()))
                    }
                    Some(Direction::Incoming) => {
                        params.push(SqlValue::Text(target_id));
                        format!("e.target_uuid = {alias}.uuid AND e.source_uuid = {}", ph(params.len()))
                    }
                    None => {
                        params.push(SqlValue::Text(target_id.clone()));
                        let p_a = ph(params.len());
                        params.push(SqlValue::Text(target_id));
                        let p_b = ph(params.len());
                        format!(
                            "((e.source_uuid = {alias}.uuid AND e.target_uuid = {p_a}) \
                             OR (e.target_uuid = {alias}.uuid AND e.source_uuid = {p_b}))"
                        )
                    }
                };
                let relation_clause = match relation {
                    Some(rel) => {
                        params.push(SqlValue::Text(rel.clone()));
                        format!(" AND e.relation = {}", ph(params.len()))
                    }
                    None => String::new(),
                };
                Ok(format!("EXISTS (SELECT 1 FROM edges e WHERE {endpoint_clause}{relation_clause})"))
            }
            None => Ok("1=0".to_string()),
        },
        TermType::RelationType { relation } => {
            params.push(SqlValue::Text(relation.clone()));
            let p = ph(params.len());
            Ok(format!(
                "EXISTS (SELECT 1 FROM edges e WHERE (e.source_uuid = {alias}.uuid OR e.target_uuid = {alias}.uuid) \
                 AND e.relation = {p})"
            ))
        }
        TermType::Limit { .. } | TermType::Sort { .. } => {
            // Only meaningful as a bare top-level term; nested occurrences are no-ops.
            Ok("1=1".to_string())
        }
    }
}

/// Builds `subject <op> value`, repeating `subject` on both sides of a range
/// comparison (`subject >= lo AND subject <= hi`).
fn compile_comparison(
    subject: &str,
    op: Operator,
    value: &Value,
    params: &mut Vec<SqlValue>,
) -> Result<String, ExecError> {
    match value {
        Value::Range(lo, hi) => {
            let mut parts = Vec::new();
            if let Some(lo) = lo {
                params.push(SqlValue::Real(*lo));
                parts.push(format!("{subject} >= {}", ph(params.len())));
            }
            if let Some(hi) = hi {
                params.push(SqlValue::Real(*hi));
                parts.push(format!("{subject} <= {}", ph(params.len())));
            }
            if parts.is_empty() {
                Ok(format!("{subject} IS NOT NULL"))
            } else {
                Ok(parts.join(" AND "))
            }
        }
        Value::Star => Ok(format!("{subject} IS NOT NULL")),
        _ if op == Operator::Exists => Ok(format!("{subject} IS NOT NULL")),
        Value::Number(n) => {
            params.push(SqlValue::Real(*n));
            Ok(format!("{subject} {} {}", sql_op(op), ph(params.len())))
        }
        Value::Text(s) => {
            params.push(SqlValue::Text(s.clone()));
            Ok(format!("{subject} {} {}", sql_op(op), ph(params.len())))
        }
    }
}

fn sql_op(op: Operator) -> &'static str {
    match op {
        Operator::Contains => "LIKE",
        Operator::Equals => "=",
        Operator::GreaterThan => ">",
        Operator::LessThan => "<",
        Operator::GreaterOrEqual => ">=",
        Operator::LessOrEqual => "<=",
        Operator::Range => ">=",
        Operator::Exists => "IS NOT NULL",
    }
}

fn json_path(key: &str) -> String {
    format!("$.{}", key.replace('\'', ""))
}

fn glob_to_like(pattern: &str) -> String {
    let mut out = String::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    out.push('%');
                } else {
                    out.push('%');
                }
            }
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            other => out.push(other),
        }
    }
    out
}

fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn ph(count: usize) -> String {
    format!("?{count}")
}

fn placeholder_group(n: usize, end: usize) -> Vec<String> {
    ((end - n + 1)..=end).map(|i| format!("?{i}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlfi_catalog::{Blob, Node, NodeFile};
    use uuid::Uuid;

    fn setup() -> Catalog {
        Catalog::open_in_memory().unwrap()
    }

    fn make_node(id: Uuid, parent: Option<Uuid>, name: &str, path: &str, node_type: NodeType) -> Node {
        Node {
            id,
            parent,
            node_type,
            name: name.to_string(),
            cached_path: path.to_string(),
            metadata: serde_json::json!({}),
            created_at: 0.0,
            last_modified: 0.0,
        }
    }

    #[test]
    fn finds_node_by_tag() {
        let cat = setup();
        let id = Uuid::new_v4();
        cat.insert_node(&make_node(id, None, "a", "a", NodeType::Record)).unwrap();
        cat.add_tag(id, "red").unwrap();

        let query = crate::parser::parse("tag:red").unwrap();
        let results = execute(&cat, &query).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].node.id, id);
    }

    #[test]
    fn deep_modifier_matches_descendants() {
        let cat = setup();
        let root = Uuid::new_v4();
        let child = Uuid::new_v4();
        cat.insert_node(&make_node(root, None, "vault", "vault", NodeType::Vault)).unwrap();
        cat.insert_node(&make_node(child, Some(root), "leaf", "vault/leaf", NodeType::Record)).unwrap();
        cat.add_tag(child, "red").unwrap();

        let query = crate::parser::parse("^tag:red").unwrap();
        let results = execute(&cat, &query).unwrap();
        let ids: Vec<Uuid> = results.iter().map(|r| r.node.id).collect();
        assert!(ids.contains(&root));
        assert!(ids.contains(&child));
    }

    #[test]
    fn negated_extension_excludes_matching_nodes() {
        let cat = setup();
        let id = Uuid::new_v4();
        cat.insert_node(&make_node(id, None, "a", "a", NodeType::Record)).unwrap();
        cat.insert_blob(&Blob {
            hash: "h1".into(),
            ext: "png".into(),
            size_bytes: 10,
            storage_path: "aa/h1".into(),
            part_count: 1,
        })
        .unwrap();
        cat.insert_node_file(&NodeFile {
            id: 0,
            node: id,
            blob: "h1".into(),
            original_name: "a.png".into(),
            display_order: 0,
            added_at: 0.0,
        })
        .unwrap();

        let query = crate::parser::parse("-ext:png").unwrap();
        let results = execute(&cat, &query).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn limit_term_caps_results() {
        let cat = setup();
        for i in 0..5 {
            cat.insert_node(&make_node(Uuid::new_v4(), None, &format!("n{i}"), &format!("n{i}"), NodeType::Record))
                .unwrap();
        }
        let query = crate::parser::parse("limit:2").unwrap();
        let results = execute(&cat, &query).unwrap();
        assert_eq!(results.len(), 2);
    }
}
