//! The parsed shape of a query: terms, groups, modifiers, and operators.

/// A comparison or membership operator applied to a key/value atom.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    /// `key:value` — substring/contains.
    Contains,
    /// `key=value` — exact equality.
    Equals,
    /// `key>value`
    GreaterThan,
    /// `key<value`
    LessThan,
    /// `key>=value`
    GreaterOrEqual,
    /// `key<=value`
    LessOrEqual,
    /// `key:a..b` — inclusive range.
    Range,
    /// `key?` — key existence.
    Exists,
}

/// A resolved query value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// A bare or quoted string.
    Text(String),
    /// An integer or float literal.
    Number(f64),
    /// A `lo..hi` range; either bound `None` means open-ended.
    Range(Option<f64>, Option<f64>),
    /// The sort-direction/width of a wildcard, `*`.
    Star,
}

/// Which kind of condition a [`Term`] compiles to.
#[derive(Clone, Debug, PartialEq)]
pub enum TermType {
    /// Bare word or quoted phrase: substring (word) or exact (phrase) search
    /// across name, path, tags, and metadata.
    GlobalSearch { text: String, exact: bool },
    /// `tag:value` — membership in the tags table. (`tag?` checked via `Exists`.)
    Tag { value: String },
    /// `inside:path` — descendant of `path`.
    Inside { path: String },
    /// `path:pattern` — `*`/`**` glob against `cached_path`.
    PathPattern { pattern: String },
    /// `ext:value`
    Extension { value: String },
    /// `files>N`, `files<N`, etc. — file count on the node.
    FileCount { op: Operator, value: f64 },
    /// `size>N`, `size:a..b`, etc. — total size of the node's files.
    Size { op: Operator, value: Value },
    /// `type:VAULT` / `type:RECORD`.
    Type { node_type: dlfi_catalog::NodeType },
    /// `preview` — node has at least one previewable (image/audio/video) file.
    Preview,
    /// `key:value` / `key=value` / `key>value` / ... against `metadata`.
    Metadata { key: String, op: Operator, value: Value },
    /// `key?` — metadata key exists.
    MetaExists { key: String },
    /// `!path`, `!path:REL`, `!path:REL>`, `!path:REL<` — relationship queries.
    Relation { path: String, relation: Option<String>, direction: Option<Direction> },
    /// Bare uppercase word: nodes with any edge of that relation type.
    RelationType { relation: String },
    /// `limit:N` — caps the result count. Only meaningful at top level.
    Limit { value: u32 },
    /// `sort:column` / `sort:-column`.
    Sort { column: SortColumn, descending: bool },
}

/// Direction restriction on a relation query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// `!path:REL>` — outgoing edges only (this node is the source).
    Outgoing,
    /// `!path:REL<` — incoming edges only (this node is the target).
    Incoming,
}

/// Columns `sort:` may reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortColumn {
    /// `cached_path`, the default.
    Path,
    /// `name`.
    Name,
    /// `type`.
    Type,
    /// `created_at`.
    Created,
    /// `last_modified`.
    Modified,
}

/// Prefix modifiers, composable, applied left-to-right as written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Modifiers {
    /// `-`: negate.
    pub negated: bool,
    /// `^`: deep (self-or-descendants).
    pub deep: bool,
    /// `%`: reverse-deep (self-or-ancestors).
    pub reverse_deep: bool,
}

/// One atomic term, or a parenthesized sub-query, with its modifiers.
#[derive(Clone, Debug)]
pub enum Term {
    /// A leaf condition.
    Atom { kind: TermType, modifiers: Modifiers },
    /// `(...)` — a parenthesized sub-query, itself a full [`Query`].
    Group { query: Query, modifiers: Modifiers },
}

/// `term (| term)*` — an OR group; all terms in the group are ORed together.
pub type OrGroup = Vec<Term>;

/// `(or_group)*` — implicit AND between OR-groups. The whole parsed query.
pub type Query = Vec<OrGroup>;
