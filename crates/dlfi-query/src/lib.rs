//! The query language: tokenizer, parser, SQL compiler, and autocomplete.
//!
//! A query string goes `tokenize` -> `parse` -> [`ast::Query`] -> `execute`.
//! Autocomplete works directly off the token stream, independent of whether
//! the query currently parses.

#![warn(missing_docs)]

pub mod ast;
pub mod autocomplete;
pub mod executor;
pub mod lexer;
pub mod parser;

pub use autocomplete::{suggest, Suggestion};
pub use executor::{execute, ExecError, NodeResult};
pub use parser::{parse, ParseError};

/// Parse and execute `source` against `catalog` in one call.
pub fn run(catalog: &dlfi_catalog::Catalog, source: &str) -> Result<Vec<NodeResult>, RunError> {
    let query = parse(source)?;
    Ok(execute(catalog, &query)?)
}

/// Errors from [`run`], covering both the parse and execution stages.
#[derive(thiserror::Error, Debug)]
pub enum RunError {
    /// The query text could not be parsed.
    #[error("parse: {0}")]
    Parse(#[from] ParseError),
    /// The parsed query could not be executed.
    #[error("execute: {0}")]
    Execute(#[from] ExecError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_rejects_malformed_query() {
        let cat = dlfi_catalog::Catalog::open_in_memory().unwrap();
        let err = run(&cat, "tag:").unwrap_err();
        assert!(matches!(err, RunError::Parse(_)));
    }

    #[test]
    fn run_executes_empty_query_against_empty_catalog() {
        let cat = dlfi_catalog::Catalog::open_in_memory().unwrap();
        let results = run(&cat, "").unwrap();
        assert!(results.is_empty());
    }
}
