//! Front end for the runtime's Python-like surface syntax.
//!
//! source → lex → parse → [`ast::Module`] / [`ast::Expr`]. Used to prove
//! emitted programs safe, to decide whether a pattern is a bare expression,
//! and to read existing song files.

#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::match_same_arms,
    clippy::module_name_repetitions
)]
pub mod ast;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::module_name_repetitions
)]
pub mod error;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::module_name_repetitions
)]
pub mod lexer;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
    clippy::too_many_lines
)]
pub mod parser;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::module_name_repetitions
)]
pub mod unparse;

use ast::{Expr, Module};
use error::ParseError;

/// Parse a whole program (simple statements only).
pub fn parse_module(source: &str) -> Result<Module, Vec<ParseError>> {
    let tokens = lexer::lex(source)?;
    parser::parse_module(tokens)
}

/// Parse `source` as one expression.
pub fn parse_expression(source: &str) -> Result<Expr, Vec<ParseError>> {
    let tokens = lexer::lex(source)?;
    parser::parse_expression(tokens)
}

/// True when `source` is a single-line, syntactically valid expression.
pub fn is_bare_expression(source: &str) -> bool {
    !source.contains(['\n', '\r']) && parse_expression(source).is_ok()
}
