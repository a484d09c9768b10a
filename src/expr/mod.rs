//! Embedded boolean/comparison expression sub-language.
//!
//! A small language evaluated by the System target's `EvaluateExpr` command:
//! fully parenthesized binary expressions where `AND`/`OR`/`XOR` connect
//! parenthesized sub-expressions and the six comparison operators compare
//! terminal values (literals, `$(moniker.field)` field references,
//! `%(name)` variable references). The two forms never mix at one level.
//!
//! The pipeline is tokenizer → recursive-descent parser → typed evaluator;
//! see [`parse`] and [`eval::evaluate`].

/// Expression tree definitions.
pub mod ast;
/// Typed evaluator with short-circuiting.
pub mod eval;
/// Recursive-descent parser over the token stream.
pub mod parser;
/// Tokenizer for expression source text.
pub mod token;

pub use ast::{BinOp, ExprNode};
pub use eval::{EvalOutcome, evaluate};
pub use parser::parse;

use thiserror::Error;

use crate::engine::vars::VarError;
use crate::value::ConvertError;

/// Errors surfaced by the expression pipeline.
#[derive(Debug, Error)]
pub enum ExprError {
    /// Tokenizing or parsing failed.
    #[error("expression syntax error at byte {pos}: {message}")]
    Syntax {
        /// Byte offset of the offending input.
        pos: usize,
        /// What went wrong.
        message: String,
    },

    /// The expression is well-formed but structurally invalid (operator
    /// family mismatch).
    #[error("invalid expression structure: {0}")]
    Structure(String),

    /// A field reference could not be read.
    #[error("field read failed: {0}")]
    Field(#[source] anyhow::Error),

    /// A variable reference could not be resolved.
    #[error(transparent)]
    Var(#[from] VarError),

    /// A value could not be converted to a required kind.
    #[error(transparent)]
    Convert(#[from] ConvertError),
}

/// Convenience result alias for expression operations.
pub type ExprResult<T> = std::result::Result<T, ExprError>;
