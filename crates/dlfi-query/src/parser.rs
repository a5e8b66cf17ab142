//! Recursive-descent parser from tokens to the AST in [`crate::ast`].

use crate::ast::{
    Direction, Modifiers, Operator, OrGroup, Query, SortColumn, Term, TermType, Value,
};
use crate::lexer::{tokenize, Token, TokenKind};
use dlfi_catalog::NodeType;

/// A query failed to parse.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("parse error at byte {position}: {message}")]
pub struct ParseError {
    /// Human-readable description.
    pub message: String,
    /// Byte offset into the source string.
    pub position: usize,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

/// Parse `src` into a [`Query`]. An empty or whitespace-only string parses to
/// an empty query (matched as "all nodes" by the executor).
pub fn parse(src: &str) -> Result<Query, ParseError> {
    let tokens = tokenize(src);
    let mut parser = Parser { tokens, pos: 0 };
    let query = parser.parse_query()?;
    if !parser.at_end() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(query)
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or_else(
            || self.tokens.last().map_or(0, |t| t.position + 1),
            |t| t.position,
        )
    }

    fn advance(&mut self) -> Option<TokenKind> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok.map(|t| t.kind)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError { message: message.into(), position: self.position() }
    }

    fn parse_query(&mut self) -> Result<Query, ParseError> {
        let mut groups = Vec::new();
        while !self.at_end() && !matches!(self.peek(), Some(TokenKind::RParen)) {
            groups.push(self.parse_or_group()?);
        }
        Ok(groups)
    }

    fn parse_or_group(&mut self) -> Result<OrGroup, ParseError> {
        let mut terms = vec![self.parse_term()?];
        while matches!(self.peek(), Some(TokenKind::Pipe)) {
            self.advance();
            terms.push(self.parse_term()?);
        }
        Ok(terms)
    }

    fn parse_term(&mut self) -> Result<Term, ParseError> {
        let mut modifiers = Modifiers::default();
        loop {
            match self.peek() {
                Some(TokenKind::Minus) => {
                    modifiers.negated = true;
                    self.advance();
                }
                Some(TokenKind::Caret) => {
                    modifiers.deep = true;
                    self.advance();
                }
                Some(TokenKind::Percent) => {
                    modifiers.reverse_deep = true;
                    self.advance();
                }
                _ => break,
            }
        }

        if matches!(self.peek(), Some(TokenKind::LParen)) {
            self.advance();
            let query = self.parse_query()?;
            match self.advance() {
                Some(TokenKind::RParen) => {}
                _ => return Err(self.error("expected closing ')'")),
            }
            return Ok(Term::Group { query, modifiers });
        }

        let kind = self.parse_atom()?;
        Ok(Term::Atom { kind, modifiers })
    }

    fn parse_atom(&mut self) -> Result<TermType, ParseError> {
        if matches!(self.peek(), Some(TokenKind::Bang)) {
            self.advance();
            return self.parse_relation();
        }
        self.parse_key_value()
    }

    fn parse_relation(&mut self) -> Result<TermType, ParseError> {
        let path = match self.advance() {
            Some(TokenKind::Text(s)) => s,
            _ => return Err(self.error("expected a path after '!'")),
        };
        let mut relation = None;
        let mut direction = None;
        if matches!(self.peek(), Some(TokenKind::Colon)) {
            self.advance();
            let rel = match self.advance() {
                Some(TokenKind::Text(s)) => s,
                _ => return Err(self.error("expected relation name after ':'")),
            };
            relation = Some(rel.to_uppercase());
            match self.peek() {
                Some(TokenKind::Gt) => {
                    self.advance();
                    direction = Some(Direction::Outgoing);
                }
                Some(TokenKind::Lt) => {
                    self.advance();
                    direction = Some(Direction::Incoming);
                }
                _ => {}
            }
        }
        Ok(TermType::Relation { path, relation, direction })
    }

    fn parse_key_value(&mut self) -> Result<TermType, ParseError> {
        match self.peek().cloned() {
            Some(TokenKind::Quoted(s)) => {
                self.advance();
                Ok(TermType::GlobalSearch { text: s, exact: true })
            }
            Some(TokenKind::Number(n)) => {
                self.advance();
                Ok(TermType::GlobalSearch { text: format_number(n), exact: false })
            }
            Some(TokenKind::Text(word)) => {
                if is_relation_type_word(&word) && !self.next_is_operator_at(self.pos + 1) {
                    self.advance();
                    return Ok(TermType::RelationType { relation: word });
                }
                self.advance();
                self.parse_after_key(word)
            }
            _ => Err(self.error("expected a term")),
        }
    }

    fn next_is_operator_at(&self, idx: usize) -> bool {
        matches!(
            self.tokens.get(idx).map(|t| &t.kind),
            Some(TokenKind::Colon)
                | Some(TokenKind::Equals)
                | Some(TokenKind::Gt)
                | Some(TokenKind::Lt)
                | Some(TokenKind::Ge)
                | Some(TokenKind::Le)
                | Some(TokenKind::Question)
        )
    }

    fn parse_after_key(&mut self, key: String) -> Result<TermType, ParseError> {
        if matches!(self.peek(), Some(TokenKind::Question)) {
            self.advance();
            if key.eq_ignore_ascii_case("tag") {
                return Ok(TermType::Tag { value: String::new() });
            }
            return Ok(TermType::MetaExists { key });
        }

        let operator = match self.peek() {
            Some(TokenKind::Colon) => Some(Operator::Contains),
            Some(TokenKind::Equals) => Some(Operator::Equals),
            Some(TokenKind::Gt) => Some(Operator::GreaterThan),
            Some(TokenKind::Lt) => Some(Operator::LessThan),
            Some(TokenKind::Ge) => Some(Operator::GreaterOrEqual),
            Some(TokenKind::Le) => Some(Operator::LessOrEqual),
            _ => None,
        };

        let Some(operator) = operator else {
            // Bare key with no operator and no '?': existence check.
            return Ok(TermType::MetaExists { key });
        };
        self.advance();
        self.parse_value(&key, operator)
    }

    fn parse_value(&mut self, key: &str, operator: Operator) -> Result<TermType, ParseError> {
        let reserved = !key.contains('.');
        let lower = key.to_lowercase();

        if reserved && lower == "limit" {
            let n = self.read_number()?;
            return Ok(TermType::Limit { value: n.max(0.0) as u32 });
        }
        if reserved && lower == "sort" {
            let descending = matches!(self.peek(), Some(TokenKind::Minus));
            if descending {
                self.advance();
            }
            let text = self.read_text_like()?;
            let column = match text.to_lowercase().as_str() {
                "name" => SortColumn::Name,
                "path" => SortColumn::Path,
                "type" => SortColumn::Type,
                "created" | "created_at" => SortColumn::Created,
                "modified" | "last_modified" => SortColumn::Modified,
                other => return Err(self.error(format!("unknown sort column '{other}'"))),
            };
            return Ok(TermType::Sort { column, descending });
        }
        if reserved && lower == "tag" {
            let text = self.read_text_like()?;
            return Ok(TermType::Tag { value: text });
        }
        if reserved && lower == "inside" {
            let text = self.read_text_like()?;
            return Ok(TermType::Inside { path: text });
        }
        if reserved && lower == "path" {
            let text = self.read_text_like_pattern()?;
            return Ok(TermType::PathPattern { pattern: text });
        }
        if reserved && lower == "ext" {
            let text = self.read_text_like()?;
            return Ok(TermType::Extension { value: text.to_lowercase() });
        }
        if reserved && lower == "type" {
            let text = self.read_text_like()?;
            let node_type = NodeType::from_sql(&text.to_uppercase())
                .ok_or_else(|| self.error(format!("unknown node type '{text}'")))?;
            return Ok(TermType::Type { node_type });
        }
        if reserved && lower == "preview" {
            return Ok(TermType::Preview);
        }
        if reserved && lower == "files" {
            let n = self.read_number()?;
            return Ok(TermType::FileCount { op: operator, value: n });
        }
        if reserved && lower == "size" {
            let value = self.read_size_value(operator)?;
            return Ok(TermType::Size { op: operator, value });
        }

        // Anything else, including dotted keys, is a metadata lookup.
        let value = self.read_generic_value()?;
        Ok(TermType::Metadata { key: key.to_string(), op: operator, value })
    }

    fn read_number(&mut self) -> Result<f64, ParseError> {
        match self.advance() {
            Some(TokenKind::Number(n)) => Ok(n),
            Some(TokenKind::Text(s)) => s.parse().map_err(|_| self.error("expected a number")),
            _ => Err(self.error("expected a number")),
        }
    }

    fn read_text_like(&mut self) -> Result<String, ParseError> {
        match self.advance() {
            Some(TokenKind::Text(s)) => Ok(s),
            Some(TokenKind::Quoted(s)) => Ok(s),
            Some(TokenKind::Number(n)) => Ok(format_number(n)),
            _ => Err(self.error("expected a value")),
        }
    }

    fn read_text_like_pattern(&mut self) -> Result<String, ParseError> {
        // Patterns may be split across Text/Star/DoubleStar tokens, e.g.
        // `path:photos/**` lexes as Text("photos/"), DoubleStar.
        let mut out = String::new();
        loop {
            match self.peek() {
                Some(TokenKind::Text(_)) => {
                    if let Some(TokenKind::Text(s)) = self.advance() {
                        out.push_str(&s);
                    }
                }
                Some(TokenKind::Star) => {
                    out.push('*');
                    self.advance();
                }
                Some(TokenKind::DoubleStar) => {
                    out.push_str("**");
                    self.advance();
                }
                _ => break,
            }
        }
        if out.is_empty() {
            return Err(self.error("expected a path pattern"));
        }
        Ok(out)
    }

    fn read_generic_value(&mut self) -> Result<Value, ParseError> {
        match self.peek().cloned() {
            Some(TokenKind::Star) => {
                self.advance();
                Ok(Value::Star)
            }
            Some(TokenKind::Quoted(s)) => {
                self.advance();
                Ok(Value::Text(s))
            }
            Some(TokenKind::Number(n)) => {
                self.advance();
                if matches!(self.peek(), Some(TokenKind::DotDot)) {
                    self.advance();
                    let hi = self.read_range_bound()?;
                    return Ok(Value::Range(Some(n), hi));
                }
                Ok(Value::Number(n))
            }
            Some(TokenKind::Text(s)) => {
                self.advance();
                Ok(Value::Text(s))
            }
            _ => Err(self.error("expected a value")),
        }
    }

    fn read_range_bound(&mut self) -> Result<Option<f64>, ParseError> {
        match self.peek().cloned() {
            Some(TokenKind::Star) => {
                self.advance();
                Ok(None)
            }
            Some(TokenKind::Number(n)) => {
                self.advance();
                Ok(Some(n))
            }
            _ => Err(self.error("expected a range bound")),
        }
    }

    fn read_size_value(&mut self, operator: Operator) -> Result<Value, ParseError> {
        let lo = self.read_size_operand()?;
        if operator == Operator::Range || matches!(self.peek(), Some(TokenKind::DotDot)) {
            if matches!(self.peek(), Some(TokenKind::DotDot)) {
                self.advance();
            }
            let hi = match self.peek().cloned() {
                Some(TokenKind::Star) => {
                    self.advance();
                    None
                }
                _ => Some(self.read_size_operand()?),
            };
            return Ok(Value::Range(lo, hi));
        }
        Ok(Value::Number(lo.unwrap_or(0.0)))
    }

    fn read_size_operand(&mut self) -> Result<Option<f64>, ParseError> {
        match self.advance() {
            Some(TokenKind::Number(n)) => Ok(Some(n)),
            Some(TokenKind::Text(s)) => parse_size(&s).map(Some).ok_or_else(|| self.error(format!("invalid size '{s}'"))),
            Some(TokenKind::Star) => Ok(None),
            _ => Err(self.error("expected a size")),
        }
    }
}

fn is_relation_type_word(word: &str) -> bool {
    word.len() > 2 && word.chars().all(|c| c.is_ascii_uppercase() || c == '_')
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{n}")
    } else {
        n.to_string()
    }
}

/// Parse a size literal with an optional unit suffix (`b`, `kb`, `mb`, `gb`,
/// `tb`, case-insensitive); a bare number is bytes.
pub fn parse_size(text: &str) -> Option<f64> {
    let lower = text.to_lowercase();
    let (number_part, multiplier) = if let Some(n) = lower.strip_suffix("tb") {
        (n, 1024f64.powi(4))
    } else if let Some(n) = lower.strip_suffix("gb") {
        (n, 1024f64.powi(3))
    } else if let Some(n) = lower.strip_suffix("mb") {
        (n, 1024f64.powi(2))
    } else if let Some(n) = lower.strip_suffix("kb") {
        (n, 1024f64)
    } else if let Some(n) = lower.strip_suffix('b') {
        (n, 1.0)
    } else {
        (lower.as_str(), 1.0)
    };
    number_part.trim().parse::<f64>().ok().map(|n| n * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_empty_query() {
        assert_eq!(parse("").unwrap(), Vec::<OrGroup>::new());
        assert_eq!(parse("   ").unwrap(), Vec::<OrGroup>::new());
    }

    #[test]
    fn parses_tag_and_deep_metadata() {
        let q = parse("tag:red ^year>=2020").unwrap();
        assert_eq!(q.len(), 2);
        match &q[0][0] {
            Term::Atom { kind: TermType::Tag { value }, modifiers } => {
                assert_eq!(value, "red");
                assert_eq!(*modifiers, Modifiers::default());
            }
            other => panic!("unexpected term: {other:?}"),
        }
        match &q[1][0] {
            Term::Atom { kind: TermType::Metadata { key, op, value }, modifiers } => {
                assert_eq!(key, "year");
                assert_eq!(*op, Operator::GreaterOrEqual);
                assert_eq!(*value, Value::Number(2020.0));
                assert!(modifiers.deep);
            }
            other => panic!("unexpected term: {other:?}"),
        }
    }

    #[test]
    fn parses_relation_with_direction() {
        let q = parse("!art/a:LIKES>").unwrap();
        match &q[0][0] {
            Term::Atom { kind: TermType::Relation { path, relation, direction }, .. } => {
                assert_eq!(path, "art/a");
                assert_eq!(relation.as_deref(), Some("LIKES"));
                assert_eq!(*direction, Some(Direction::Outgoing));
            }
            other => panic!("unexpected term: {other:?}"),
        }
    }

    #[test]
    fn parses_negated_file_count() {
        let q = parse("type:VAULT -files>0").unwrap();
        assert_eq!(q.len(), 2);
        match &q[1][0] {
            Term::Atom { kind: TermType::FileCount { op, value }, modifiers } => {
                assert_eq!(*op, Operator::GreaterThan);
                assert_eq!(*value, 0.0);
                assert!(modifiers.negated);
            }
            other => panic!("unexpected term: {other:?}"),
        }
    }

    #[test]
    fn parses_size_with_units_and_range() {
        let q = parse("size:10mb..1gb").unwrap();
        match &q[0][0] {
            Term::Atom { kind: TermType::Size { value, .. }, .. } => {
                assert_eq!(*value, Value::Range(Some(10.0 * 1024.0 * 1024.0), Some(1024.0 * 1024.0 * 1024.0)));
            }
            other => panic!("unexpected term: {other:?}"),
        }
    }

    #[test]
    fn parses_or_group_and_parens() {
        let q = parse("(tag:red | tag:blue) type:RECORD").unwrap();
        assert_eq!(q.len(), 2);
        assert_eq!(q[0].len(), 1);
        match &q[0][0] {
            Term::Group { query, .. } => assert_eq!(query.len(), 2),
            other => panic!("unexpected term: {other:?}"),
        }
    }

    #[test]
    fn parses_quoted_phrase_as_exact_global_search() {
        let q = parse(r#""hello world""#).unwrap();
        match &q[0][0] {
            Term::Atom { kind: TermType::GlobalSearch { text, exact }, .. } => {
                assert_eq!(text, "hello world");
                assert!(*exact);
            }
            other => panic!("unexpected term: {other:?}"),
        }
    }
}
