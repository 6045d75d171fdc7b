/// A token in directive text, positioned by char offset.
///
/// Directive text is short (one tag body), so a single offset is enough;
/// the compiler maps it back to a template line when reporting errors.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
}

impl Token {
    pub fn new(kind: TokenKind, start: usize) -> Self {
        Self { kind, start }
    }
}

/// Token classification for directive text.
///
/// Data-carrying variants embed their value directly. Interpolated or
/// unterminated strings are emitted as a run of `Quote` / `StrFragment` /
/// `Var` / `CurlyOpen` tokens; fully literal terminated strings collapse
/// into a single `Str`.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Values
    Var(String),
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    StrFragment(String),
    Quote(char),
    CurlyOpen,

    // Keywords
    Isset,
    Empty,

    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    Percent,

    // Comparison
    EqEq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,

    // Boolean
    AndAnd,
    OrOr,
    Bang,

    // Assignment
    Eq,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,

    // Increment / decrement
    Incr,
    Decr,

    // Punctuation
    Question,
    Colon,
    Comma,
    Dot,
    Pipe,
    Arrow,
    DoubleArrow,
    DoubleColon,
    Backslash,
    Hash,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
}

impl TokenKind {
    /// Scalar literal: number or fully-lexed string.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            TokenKind::Int(_) | TokenKind::Float(_) | TokenKind::Str(_)
        )
    }

    /// A token that opens (or resumes) a string needing the
    /// interpolation parser.
    pub fn is_string_open(&self) -> bool {
        matches!(self, TokenKind::Quote(_) | TokenKind::StrFragment(_))
    }

    pub fn is_unary(&self) -> bool {
        matches!(self, TokenKind::Bang | TokenKind::Minus)
    }

    /// Comparison operators. At most one may appear per expression until
    /// a boolean operator resets the restriction.
    pub fn is_cond(&self) -> bool {
        matches!(
            self,
            TokenKind::EqEq
                | TokenKind::NotEq
                | TokenKind::Lt
                | TokenKind::Gt
                | TokenKind::Le
                | TokenKind::Ge
        )
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, TokenKind::AndAnd | TokenKind::OrOr)
    }

    pub fn is_math(&self) -> bool {
        matches!(
            self,
            TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Star
                | TokenKind::Slash
                | TokenKind::Percent
        )
    }

    /// Any binary operator the expression parser accepts.
    pub fn is_binary(&self) -> bool {
        self.is_math() || self.is_cond() || self.is_boolean()
    }

    pub fn is_assign(&self) -> bool {
        matches!(
            self,
            TokenKind::Eq
                | TokenKind::PlusEq
                | TokenKind::MinusEq
                | TokenKind::StarEq
                | TokenKind::SlashEq
        )
    }

    pub fn is_incdec(&self) -> bool {
        matches!(self, TokenKind::Incr | TokenKind::Decr)
    }

    /// `true`, `false` and `null` stay identifiers in the token stream;
    /// the expression parser turns them into literals.
    pub fn is_special_val(&self) -> bool {
        match self {
            TokenKind::Ident(name) => {
                name.eq_ignore_ascii_case("true")
                    || name.eq_ignore_ascii_case("false")
                    || name.eq_ignore_ascii_case("null")
            }
            _ => false,
        }
    }

    pub fn is_ident(&self) -> bool {
        matches!(self, TokenKind::Ident(_))
    }

    pub fn is_var(&self) -> bool {
        matches!(self, TokenKind::Var(_))
    }

    /// Short human-readable form for error messages.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Var(name) => format!("${name}"),
            TokenKind::Ident(name) => name.clone(),
            TokenKind::Int(n) => n.to_string(),
            TokenKind::Float(n) => n.to_string(),
            TokenKind::Str(s) => format!("'{s}'"),
            TokenKind::StrFragment(s) => format!("'{s}"),
            TokenKind::Quote(q) => q.to_string(),
            TokenKind::CurlyOpen | TokenKind::LBrace => "{".into(),
            TokenKind::Isset => "isset".into(),
            TokenKind::Empty => "empty".into(),
            TokenKind::Plus => "+".into(),
            TokenKind::Minus => "-".into(),
            TokenKind::Star => "*".into(),
            TokenKind::Slash => "/".into(),
            TokenKind::Percent => "%".into(),
            TokenKind::EqEq => "==".into(),
            TokenKind::NotEq => "!=".into(),
            TokenKind::Lt => "<".into(),
            TokenKind::Gt => ">".into(),
            TokenKind::Le => "<=".into(),
            TokenKind::Ge => ">=".into(),
            TokenKind::AndAnd => "&&".into(),
            TokenKind::OrOr => "||".into(),
            TokenKind::Bang => "!".into(),
            TokenKind::Eq => "=".into(),
            TokenKind::PlusEq => "+=".into(),
            TokenKind::MinusEq => "-=".into(),
            TokenKind::StarEq => "*=".into(),
            TokenKind::SlashEq => "/=".into(),
            TokenKind::Incr => "++".into(),
            TokenKind::Decr => "--".into(),
            TokenKind::Question => "?".into(),
            TokenKind::Colon => ":".into(),
            TokenKind::Comma => ",".into(),
            TokenKind::Dot => ".".into(),
            TokenKind::Pipe => "|".into(),
            TokenKind::Arrow => "->".into(),
            TokenKind::DoubleArrow => "=>".into(),
            TokenKind::DoubleColon => "::".into(),
            TokenKind::Backslash => "\\".into(),
            TokenKind::Hash => "#".into(),
            TokenKind::LParen => "(".into(),
            TokenKind::RParen => ")".into(),
            TokenKind::LBracket => "[".into(),
            TokenKind::RBracket => "]".into(),
            TokenKind::RBrace => "}".into(),
        }
    }
}
