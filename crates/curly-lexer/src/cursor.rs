//! Token cursor over one directive body.
//!
//! Parsers consume tokens left to right through this cursor. It keeps the
//! raw directive text alongside the tokens so it can re-lex a suffix when
//! the scanner hands over more source (`splice_from`), and so error
//! messages can quote the text near the failure (`snippet`).

use crate::token::{Token, TokenKind};
use crate::tokenizer::Tokenizer;
use crate::LexError;

pub struct Cursor {
    raw: String,
    tokens: Vec<Token>,
    pos: usize,
}

impl Cursor {
    pub fn new(source: &str) -> Result<Self, LexError> {
        Ok(Self {
            raw: source.to_string(),
            tokens: Tokenizer::tokenize(source)?,
            pos: 0,
        })
    }

    /// The raw directive text backing this cursor.
    pub fn source(&self) -> &str {
        &self.raw
    }

    /// Kind of the current token, or `None` past the end.
    pub fn kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    pub fn valid(&self) -> bool {
        self.pos < self.tokens.len()
    }

    /// True when the current token is the final one.
    pub fn is_last(&self) -> bool {
        self.pos + 1 == self.tokens.len()
    }

    /// Index of the current token.
    pub fn at(&self) -> usize {
        self.pos
    }

    /// Char offset of the current token in the directive text.
    pub fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|t| t.start)
            .unwrap_or_else(|| self.raw.chars().count())
    }

    /// Advance one token and return the kind just consumed.
    pub fn next(&mut self) -> Option<&TokenKind> {
        if self.pos < self.tokens.len() {
            self.pos += 1;
            self.tokens.get(self.pos - 1).map(|t| &t.kind)
        } else {
            None
        }
    }

    /// Step back one token.
    pub fn back(&mut self) {
        if self.pos > 0 {
            self.pos -= 1;
        }
    }

    pub fn peek_next(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos + 1).map(|t| &t.kind)
    }

    /// Consume the current token when `pred` matches it.
    pub fn eat(&mut self, pred: impl Fn(&TokenKind) -> bool) -> bool {
        if self.kind().is_some_and(&pred) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Require the current token to match `pred` without consuming it.
    pub fn demand(
        &self,
        pred: impl Fn(&TokenKind) -> bool,
        expected: &str,
    ) -> Result<(), LexError> {
        match self.kind() {
            Some(kind) if pred(kind) => Ok(()),
            _ => Err(self.unexpected(expected)),
        }
    }

    /// Consume an identifier and return its name.
    pub fn expect_ident(&mut self) -> Result<String, LexError> {
        match self.kind() {
            Some(TokenKind::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    /// Consume a variable token and return its name.
    pub fn expect_var(&mut self) -> Result<String, LexError> {
        match self.kind() {
            Some(TokenKind::Var(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected("variable")),
        }
    }

    pub fn unexpected(&self, expected: &str) -> LexError {
        let found = match self.kind() {
            Some(kind) => format!("'{}'", kind.describe()),
            None => "end of tag".to_string(),
        };
        LexError {
            message: format!("Expected {expected}, found {found}"),
            offset: self.offset(),
        }
    }

    /// Directive text from the current token onward, shortened for
    /// error messages.
    pub fn snippet(&self) -> String {
        let rest: String = self.raw.chars().skip(self.offset()).collect();
        let mut out: String = rest.chars().take(30).collect();
        if rest.chars().count() > 30 {
            out.push_str("...");
        }
        out
    }

    /// Throw away everything from token index `at` on, append `extra` to
    /// the corresponding raw text, re-lex the combined tail and position
    /// the cursor at its first token.
    ///
    /// This is how under-scanned strings are repaired: the scanner found
    /// more template source for a directive it cut short at a `}` inside a
    /// quoted string, and the string must be lexed again from its opening
    /// quote with the longer text.
    pub fn splice_from(&mut self, at: usize, extra: &str) -> Result<(), LexError> {
        let cut = self
            .tokens
            .get(at)
            .map(|t| t.start)
            .unwrap_or_else(|| self.raw.chars().count());
        let byte = self
            .raw
            .char_indices()
            .nth(cut)
            .map(|(i, _)| i)
            .unwrap_or(self.raw.len());
        let mut tail = self.raw[byte..].to_string();
        tail.push_str(extra);
        let new_tokens = Tokenizer::tokenize_at(&tail, cut)?;
        self.raw.truncate(byte);
        self.raw.push_str(&tail);
        self.tokens.truncate(at);
        self.tokens.extend(new_tokens);
        self.pos = at;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_walk() {
        let mut cur = Cursor::new("$a + 1").unwrap();
        assert!(cur.valid());
        assert_eq!(cur.kind(), Some(&TokenKind::Var("a".into())));
        assert_eq!(cur.peek_next(), Some(&TokenKind::Plus));
        cur.next();
        cur.next();
        assert_eq!(cur.kind(), Some(&TokenKind::Int(1)));
        assert!(cur.is_last());
        cur.next();
        assert!(!cur.valid());
        assert_eq!(cur.kind(), None);
        cur.back();
        assert_eq!(cur.kind(), Some(&TokenKind::Int(1)));
    }

    #[test]
    fn test_expect_helpers() {
        let mut cur = Cursor::new("foreach $list").unwrap();
        assert_eq!(cur.expect_ident().unwrap(), "foreach");
        assert_eq!(cur.expect_var().unwrap(), "list");
        let err = cur.expect_ident().unwrap_err();
        assert_eq!(err.message, "Expected identifier, found end of tag");
    }

    #[test]
    fn test_demand_and_eat() {
        let mut cur = Cursor::new("( )").unwrap();
        cur.demand(|k| *k == TokenKind::LParen, "'('").unwrap();
        assert!(cur.eat(|k| *k == TokenKind::LParen));
        assert!(!cur.eat(|k| *k == TokenKind::Comma));
        assert!(cur.eat(|k| *k == TokenKind::RParen));
    }

    #[test]
    fn test_snippet_truncates() {
        let cur = Cursor::new("$abcdefghijklmnopqrstuvwxyz + 123456").unwrap();
        let snip = cur.snippet();
        assert!(snip.ends_with("..."));
        assert!(snip.starts_with("$abcdefghij"));
    }

    #[test]
    fn test_splice_replaces_tail() {
        // The directive was cut at a `}` inside the string. Splicing from
        // the opening quote with the recovered text re-lexes the whole
        // string as one literal.
        let mut cur = Cursor::new("$a = \"x ").unwrap();
        cur.next();
        cur.next();
        let open = cur.at();
        assert_eq!(cur.kind(), Some(&TokenKind::Quote('"')));
        cur.splice_from(open, "} y\"").unwrap();
        assert_eq!(cur.kind(), Some(&TokenKind::Str("x } y".into())));
        assert_eq!(cur.source(), "$a = \"x } y\"");
    }
}
