//! Directive tokenizer.
//!
//! Turns one directive body (the text between `{` and `}`) into a flat
//! token stream. Strings get special treatment: a terminated string with
//! no interpolation becomes a single `Str` token, while interpolated or
//! unterminated strings are exploded into `Quote` / `StrFragment` /
//! `Var` / `CurlyOpen` runs so the interpolation parser can walk them.
//!
//! An unterminated string is not a tokenizer error. The outer scanner
//! cuts a directive at the first `}` it sees, which may sit inside a
//! quoted string; the interpolation parser detects the missing closing
//! quote and asks the scanner for more source.

use crate::token::{Token, TokenKind};
use crate::LexError;

pub struct Tokenizer {
    chars: Vec<char>,
    pos: usize,
    base: usize,
    tokens: Vec<Token>,
}

impl Tokenizer {
    fn new(source: &str, base: usize) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            base,
            tokens: Vec::new(),
        }
    }

    /// Tokenize a directive body. Offsets start at zero.
    pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
        Self::tokenize_at(source, 0)
    }

    /// Tokenize with offsets shifted by `base`, for re-lexing a suffix of
    /// an already-lexed directive.
    pub fn tokenize_at(source: &str, base: usize) -> Result<Vec<Token>, LexError> {
        let mut tokenizer = Self::new(source, base);
        while tokenizer.pos < tokenizer.chars.len() {
            tokenizer.scan_token()?;
        }
        Ok(tokenizer.tokens)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        self.tokens.push(Token::new(kind, self.base + start));
    }

    fn error_at(&self, message: impl Into<String>, offset: usize) -> LexError {
        LexError {
            message: message.into(),
            offset: self.base + offset,
        }
    }

    fn scan_token(&mut self) -> Result<(), LexError> {
        let start = self.pos;
        let ch = match self.bump() {
            Some(ch) => ch,
            None => return Ok(()),
        };
        match ch {
            c if c.is_whitespace() => {}
            '\'' | '"' | '`' => self.scan_string(ch, start)?,
            '$' => {
                let name = self.scan_ident_tail();
                if name.is_empty() {
                    return Err(self.error_at("Expected variable name after '$'", start));
                }
                self.push(TokenKind::Var(name), start);
            }
            c if c.is_ascii_digit() => self.scan_number(start)?,
            c if c.is_ascii_alphabetic() || c == '_' => {
                self.pos = start;
                let name = self.scan_ident_tail();
                let kind = match name.as_str() {
                    "isset" => TokenKind::Isset,
                    "empty" => TokenKind::Empty,
                    _ => TokenKind::Ident(name),
                };
                self.push(kind, start);
            }
            '.' => {
                // `$a.0` reads as dot access on element 0, not a float tail.
                self.push(TokenKind::Dot, start);
                if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    let digits_start = self.pos;
                    let digits = self.scan_digits();
                    let value: i64 = digits
                        .parse()
                        .map_err(|_| self.error_at("Integer literal out of range", start))?;
                    self.push(TokenKind::Int(value), digits_start);
                }
            }
            '+' => {
                if self.eat('+') {
                    self.push(TokenKind::Incr, start);
                } else if self.eat('=') {
                    self.push(TokenKind::PlusEq, start);
                } else {
                    self.push(TokenKind::Plus, start);
                }
            }
            '-' => {
                if self.eat('-') {
                    self.push(TokenKind::Decr, start);
                } else if self.eat('=') {
                    self.push(TokenKind::MinusEq, start);
                } else if self.eat('>') {
                    self.push(TokenKind::Arrow, start);
                } else {
                    self.push(TokenKind::Minus, start);
                }
            }
            '*' => {
                if self.eat('=') {
                    self.push(TokenKind::StarEq, start);
                } else {
                    self.push(TokenKind::Star, start);
                }
            }
            '/' => {
                if self.eat('=') {
                    self.push(TokenKind::SlashEq, start);
                } else {
                    self.push(TokenKind::Slash, start);
                }
            }
            '%' => self.push(TokenKind::Percent, start),
            '=' => {
                if self.eat('=') {
                    // Strict comparison reads the same as loose here.
                    self.eat('=');
                    self.push(TokenKind::EqEq, start);
                } else if self.eat('>') {
                    self.push(TokenKind::DoubleArrow, start);
                } else {
                    self.push(TokenKind::Eq, start);
                }
            }
            '!' => {
                if self.eat('=') {
                    self.eat('=');
                    self.push(TokenKind::NotEq, start);
                } else {
                    self.push(TokenKind::Bang, start);
                }
            }
            '<' => {
                if self.eat('=') {
                    self.push(TokenKind::Le, start);
                } else {
                    self.push(TokenKind::Lt, start);
                }
            }
            '>' => {
                if self.eat('=') {
                    self.push(TokenKind::Ge, start);
                } else {
                    self.push(TokenKind::Gt, start);
                }
            }
            '&' => {
                if self.eat('&') {
                    self.push(TokenKind::AndAnd, start);
                } else {
                    return Err(self.error_at("Unexpected character '&'", start));
                }
            }
            '|' => {
                if self.eat('|') {
                    self.push(TokenKind::OrOr, start);
                } else {
                    self.push(TokenKind::Pipe, start);
                }
            }
            '?' => self.push(TokenKind::Question, start),
            ':' => {
                if self.eat(':') {
                    self.push(TokenKind::DoubleColon, start);
                } else {
                    self.push(TokenKind::Colon, start);
                }
            }
            ',' => self.push(TokenKind::Comma, start),
            '\\' => self.push(TokenKind::Backslash, start),
            '#' => self.push(TokenKind::Hash, start),
            '(' => self.push(TokenKind::LParen, start),
            ')' => self.push(TokenKind::RParen, start),
            '[' => self.push(TokenKind::LBracket, start),
            ']' => self.push(TokenKind::RBracket, start),
            '{' => self.push(TokenKind::LBrace, start),
            '}' => self.push(TokenKind::RBrace, start),
            other => return Err(self.error_at(format!("Unexpected character '{other}'"), start)),
        }
        Ok(())
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn scan_ident_tail(&mut self) -> String {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn scan_digits(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn scan_number(&mut self, start: usize) -> Result<(), LexError> {
        self.pos = start;
        let mut text = self.scan_digits();
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
            text.push('.');
            text.push_str(&self.scan_digits());
            let value: f64 = text
                .parse()
                .map_err(|_| self.error_at("Malformed float literal", start))?;
            self.push(TokenKind::Float(value), start);
        } else {
            let value: i64 = text
                .parse()
                .map_err(|_| self.error_at("Integer literal out of range", start))?;
            self.push(TokenKind::Int(value), start);
        }
        Ok(())
    }

    /// Scan a quoted string starting after its opening quote.
    ///
    /// Emits the exploded token run, then collapses it back into a single
    /// `Str` when the string turned out to be terminated and literal.
    fn scan_string(&mut self, quote: char, start: usize) -> Result<(), LexError> {
        let first = self.tokens.len();
        self.push(TokenKind::Quote(quote), start);
        let mut fragment = String::new();
        let mut frag_start = self.pos;
        let mut terminated = false;
        while let Some(ch) = self.peek() {
            if ch == quote {
                self.pos += 1;
                terminated = true;
                break;
            }
            if ch == '\\' {
                self.pos += 1;
                match self.bump() {
                    Some(escaped) => fragment.push_str(&unescape(quote, escaped)),
                    None => fragment.push('\\'),
                }
                continue;
            }
            if quote != '\'' && ch == '$' {
                if self
                    .peek_at(1)
                    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                {
                    self.flush_fragment(&mut fragment, frag_start);
                    let var_start = self.pos;
                    self.pos += 1;
                    let name = self.scan_ident_tail();
                    self.push(TokenKind::Var(name), var_start);
                    frag_start = self.pos;
                    continue;
                }
            }
            if quote != '\'' && ch == '{' && self.peek_at(1) == Some('$') {
                self.flush_fragment(&mut fragment, frag_start);
                self.push(TokenKind::CurlyOpen, self.pos);
                self.pos += 1;
                self.scan_embedded()?;
                frag_start = self.pos;
                continue;
            }
            self.pos += 1;
            fragment.push(ch);
        }
        self.flush_fragment(&mut fragment, frag_start);
        if terminated {
            self.push(TokenKind::Quote(quote), self.pos - 1);
            self.collapse_literal(first, quote);
        }
        Ok(())
    }

    fn flush_fragment(&mut self, fragment: &mut String, start: usize) {
        if !fragment.is_empty() {
            let text = std::mem::take(fragment);
            self.push(TokenKind::StrFragment(text), start);
        }
    }

    /// Scan `{$expr}` embedded in a string: ordinary code tokens up to the
    /// matching `}`. Hitting end of input just stops; the interpolation
    /// parser treats the truncated stream as an under-scanned directive.
    fn scan_embedded(&mut self) -> Result<(), LexError> {
        let mut depth = 0usize;
        while self.pos < self.chars.len() {
            let before = self.tokens.len();
            self.scan_token()?;
            for i in before..self.tokens.len() {
                match self.tokens[i].kind {
                    TokenKind::LBrace => depth += 1,
                    TokenKind::RBrace => {
                        if depth == 0 {
                            return Ok(());
                        }
                        depth -= 1;
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Replace `Quote [StrFragment] Quote` with a single `Str` token.
    fn collapse_literal(&mut self, first: usize, quote: char) {
        let run = &self.tokens[first..];
        let literal = match run {
            [open, close]
                if open.kind == TokenKind::Quote(quote)
                    && close.kind == TokenKind::Quote(quote) =>
            {
                Some(String::new())
            }
            [open, mid, close]
                if open.kind == TokenKind::Quote(quote)
                    && close.kind == TokenKind::Quote(quote) =>
            {
                match &mid.kind {
                    TokenKind::StrFragment(text) => Some(text.clone()),
                    _ => None,
                }
            }
            _ => None,
        };
        if let Some(text) = literal {
            let start = self.tokens[first].start;
            self.tokens.truncate(first);
            self.tokens.push(Token::new(TokenKind::Str(text), start));
        }
    }
}

fn unescape(quote: char, escaped: char) -> String {
    if quote == '\'' {
        // Single quotes only honor \\ and \'.
        return match escaped {
            '\\' => "\\".into(),
            '\'' => "'".into(),
            other => format!("\\{other}"),
        };
    }
    match escaped {
        'n' => "\n".into(),
        't' => "\t".into(),
        'r' => "\r".into(),
        '\\' => "\\".into(),
        '$' => "$".into(),
        '{' => "{".into(),
        '}' => "}".into(),
        '"' => "\"".into(),
        '`' => "`".into(),
        other => format!("\\{other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Tokenizer::tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_variables_and_idents() {
        assert_eq!(
            kinds("$user.name|upper"),
            vec![
                TokenKind::Var("user".into()),
                TokenKind::Dot,
                TokenKind::Ident("name".into()),
                TokenKind::Pipe,
                TokenKind::Ident("upper".into()),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("1 2.5 10%3"),
            vec![
                TokenKind::Int(1),
                TokenKind::Float(2.5),
                TokenKind::Int(10),
                TokenKind::Percent,
                TokenKind::Int(3),
            ]
        );
    }

    #[test]
    fn test_dot_digit_is_index_access() {
        assert_eq!(
            kinds("$a.0"),
            vec![
                TokenKind::Var("a".into()),
                TokenKind::Dot,
                TokenKind::Int(0),
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("$a+=1 && $b-- != $c->d"),
            vec![
                TokenKind::Var("a".into()),
                TokenKind::PlusEq,
                TokenKind::Int(1),
                TokenKind::AndAnd,
                TokenKind::Var("b".into()),
                TokenKind::Decr,
                TokenKind::NotEq,
                TokenKind::Var("c".into()),
                TokenKind::Arrow,
                TokenKind::Ident("d".into()),
            ]
        );
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            kinds("isset($a) empty($b)"),
            vec![
                TokenKind::Isset,
                TokenKind::LParen,
                TokenKind::Var("a".into()),
                TokenKind::RParen,
                TokenKind::Empty,
                TokenKind::LParen,
                TokenKind::Var("b".into()),
                TokenKind::RParen,
            ]
        );
    }

    #[test]
    fn test_literal_string_collapses() {
        assert_eq!(kinds("'hello'"), vec![TokenKind::Str("hello".into())]);
        assert_eq!(kinds("\"hi\\n\""), vec![TokenKind::Str("hi\n".into())]);
        assert_eq!(kinds("\"\""), vec![TokenKind::Str(String::new())]);
    }

    #[test]
    fn test_single_quote_keeps_unknown_escape() {
        assert_eq!(kinds("'a\\nb'"), vec![TokenKind::Str("a\\nb".into())]);
        assert_eq!(kinds("'it\\'s'"), vec![TokenKind::Str("it's".into())]);
    }

    #[test]
    fn test_interpolated_string_explodes() {
        assert_eq!(
            kinds("\"hi $name!\""),
            vec![
                TokenKind::Quote('"'),
                TokenKind::StrFragment("hi ".into()),
                TokenKind::Var("name".into()),
                TokenKind::StrFragment("!".into()),
                TokenKind::Quote('"'),
            ]
        );
    }

    #[test]
    fn test_curly_interpolation() {
        assert_eq!(
            kinds("\"x{$a.b}y\""),
            vec![
                TokenKind::Quote('"'),
                TokenKind::StrFragment("x".into()),
                TokenKind::CurlyOpen,
                TokenKind::Var("a".into()),
                TokenKind::Dot,
                TokenKind::Ident("b".into()),
                TokenKind::RBrace,
                TokenKind::StrFragment("y".into()),
                TokenKind::Quote('"'),
            ]
        );
    }

    #[test]
    fn test_single_quote_never_interpolates() {
        assert_eq!(
            kinds("'hi $name'"),
            vec![TokenKind::Str("hi $name".into())]
        );
    }

    #[test]
    fn test_unterminated_string_stays_open() {
        assert_eq!(
            kinds("\"hi "),
            vec![TokenKind::Quote('"'), TokenKind::StrFragment("hi ".into())]
        );
    }

    #[test]
    fn test_escaped_dollar_stays_literal() {
        assert_eq!(kinds("\"a\\$b\""), vec![TokenKind::Str("a$b".into())]);
    }

    #[test]
    fn test_unexpected_character() {
        let err = Tokenizer::tokenize("$a @ $b").unwrap_err();
        assert!(err.message.contains('@'));
        assert_eq!(err.offset, 3);
    }

    #[test]
    fn test_offsets() {
        let tokens = Tokenizer::tokenize("$ab + 1").unwrap();
        let starts: Vec<usize> = tokens.iter().map(|t| t.start).collect();
        assert_eq!(starts, vec![0, 4, 6]);
    }
}
