//! Block scopes.
//!
//! Every open block directive sits on the template's scope stack as a
//! `Scope`: bookkeeping in `ScopeInfo`, behavior in a `BlockCompiler`
//! implementation. The handler sees the template through `&mut
//! Template` so it can run the expression parsers and emit ops; the
//! `mark` snapshot lets `close` (and mid-block tags like `else`) wrap
//! everything emitted since the block opened.

use curly_lexer::Cursor;

use crate::template::Template;
use crate::SyntaxError;

/// Bookkeeping for one open block.
pub struct ScopeInfo {
    pub name: String,
    /// Line the opening tag sits on.
    pub line: usize,
    /// Nesting depth at open time.
    pub depth: usize,
    /// Op-buffer length at open time.
    pub mark: usize,
}

/// Handler for one kind of block directive.
pub trait BlockCompiler {
    /// Parse the opening tag.
    fn open(
        &mut self,
        info: &mut ScopeInfo,
        tpl: &mut Template<'_>,
        tokens: &mut Cursor,
    ) -> Result<(), SyntaxError>;

    /// Does this block own the sub-tag `name` when it sits `depth`
    /// levels below the top of the stack?
    fn has_tag(&self, _name: &str, _depth: usize) -> bool {
        false
    }

    /// Compile an owned sub-tag.
    fn tag(
        &mut self,
        name: &str,
        _info: &mut ScopeInfo,
        _tpl: &mut Template<'_>,
        _tokens: &mut Cursor,
    ) -> Result<(), SyntaxError> {
        Err(SyntaxError::unexpected(format!("Unexpected tag '{name}'")))
    }

    /// Parse the closing tag and emit the finished block.
    fn close(
        &mut self,
        info: &mut ScopeInfo,
        tpl: &mut Template<'_>,
        tokens: &mut Cursor,
    ) -> Result<(), SyntaxError>;
}

/// One entry of the open-block stack.
pub struct Scope {
    pub info: ScopeInfo,
    pub compiler: Box<dyn BlockCompiler>,
}
