//! Translation from the Forth-like source dialect to a program image.
//!
//! The pipeline is two lexical passes followed by code generation:
//!
//! 1. strip line comments, tokenize (string literals stay whole), drop
//!    signature comments in `( ... )`, check pair balancing;
//! 2. allocate variables, collect word definitions;
//! 3. emit one instruction list per token, patch jump and call targets, append
//!    `halt`.

pub mod codegen;
pub mod lexer;

use crate::isa::Image;

/// Everything that can be wrong with a source program.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("Unbalanced begin-until!")]
    UnbalancedLoop,
    #[error("Unbalanced if-then!")]
    UnbalancedConditional,
    #[error("Unbalanced colon definition!")]
    UnbalancedDefinition,
    #[error("Unbalanced signature comment!")]
    UnbalancedComment,
    #[error("Sub-functions not allowed")]
    NestedDefinition,
    #[error("unterminated string literal: {0}")]
    UnterminatedString(String),
    #[error("`variable` needs a name")]
    MissingVariableName,
    #[error("variable `{0}` is already defined")]
    DuplicateVariable(String),
    #[error("bad allot count: {0}")]
    BadAllotCount(String),
    #[error("unknown word: {0}")]
    UnknownWord(String),
}

/// Translate a source program into an image.
pub fn translate(source: &str) -> Result<Image, SourceError> {
    let tokens = lexer::tokenize(source)?;
    lexer::check_balance(&tokens)?;
    tracing::debug!(token_count = tokens.len(), "lexing finished");
    codegen::generate(tokens)
}
