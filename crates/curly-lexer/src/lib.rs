//! Curly directive lexer.
//!
//! Tokenizes the body of a `{...}` directive into a flat token stream and
//! provides the `Cursor` the compiler's parsers consume it through. The
//! outer template scanner (which splits literal text from directives)
//! lives in the compiler crate; this crate only sees directive bodies.

pub mod cursor;
pub mod token;
pub mod tokenizer;

pub use cursor::Cursor;
pub use token::{Token, TokenKind};
pub use tokenizer::Tokenizer;

/// Lexer error with the char offset inside the directive body.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message} at offset {offset}")]
pub struct LexError {
    pub message: String,
    pub offset: usize,
}
