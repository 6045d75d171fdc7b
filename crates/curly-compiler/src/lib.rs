//! Curly template compiler.
//!
//! Compiles `{...}` template source into a `curly_runtime::Program`:
//! the scanner splits literal text from directives, the tag router
//! classifies each directive, and the recursive-descent parsers turn
//! directive bodies into expression trees and ops. Block structure is
//! tracked on a scope stack whose handlers live in `scope` / `tags`.

pub mod engine;
pub mod expr;
pub mod scope;
pub mod tags;
pub mod template;

pub use engine::{Engine, FileProvider, MapProvider, Options, Provider, TagDecl};
pub use scope::{BlockCompiler, Scope, ScopeInfo};
pub use template::Template;

use curly_lexer::LexError;

/// Failure classification, kept on every error the compiler raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// End of input before a required closing delimiter.
    Unterminated,
    /// No grammar transition for the current token.
    UnexpectedToken,
    /// Unregistered action, modifier, constant or macro name.
    UnknownIdentifier,
    /// Closing tag mismatch or unclosed blocks at end of compile.
    Mismatch,
    /// Construct disabled by configuration, not malformed input.
    Security,
    /// Macro call missing a required argument.
    MacroArgument,
}

/// Parser-internal error. The tag router wraps it into a `CompileError`
/// carrying the template name and line before it leaves the compiler.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct SyntaxError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SyntaxError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnexpectedToken, message)
    }

    pub fn unterminated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unterminated, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownIdentifier, message)
    }

    pub fn mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Mismatch, message)
    }

    pub fn security(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Security, message)
    }

    pub fn macro_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MacroArgument, message)
    }
}

impl From<LexError> for SyntaxError {
    fn from(err: LexError) -> Self {
        Self::unexpected(err.message)
    }
}

/// Compile failure surfaced to callers: always carries the template
/// name and the source line of the directive being compiled.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Compile error in '{name}' at line {line}: {message}")]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    pub name: String,
    pub line: usize,
}
