//! The formula language: a small expression grammar over field references.
pub mod ast;
pub mod lexer;
pub mod parser;

pub use ast::{Aggregate, AggregateOp, BinaryOp, BoundExpr, Expr, Function, Reference, UnaryOp};
pub use parser::parse;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("at offset {position}: {message}")]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(position: usize, message: impl Into<String>) -> Self {
        Self { position, message: message.into() }
    }
}
