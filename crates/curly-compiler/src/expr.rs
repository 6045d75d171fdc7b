//! Directive-body parsers.
//!
//! A single-pass consumption grammar over the token cursor: a
//! term/operator state machine for expressions, an accessor chain
//! parser for variables, the string interpolation parser with its
//! refill loop, and the small grammars for modifier pipelines, array
//! literals, call arguments and `name=value` parameter lists.
//!
//! Token consumption never backtracks past a term: when no transition
//! fits, the expression simply ends and the caller decides whether the
//! leftover tokens are an error. Operator precedence only matters for
//! tree building, which runs over the collected atoms afterwards.

use std::collections::BTreeMap;

use curly_lexer::{Cursor, TokenKind};
use curly_runtime::{Access, AssignOp, BinaryOp, Expr, UnaryOp, VarRef};

use crate::engine::{DENY_ARRAY, DENY_MODS};
use crate::template::Template;
use crate::SyntaxError;

/// Parsed tag parameters: `name=value` pairs plus positional values.
#[derive(Debug)]
pub struct Params {
    pub named: BTreeMap<String, Expr>,
    pub positional: Vec<Expr>,
}

impl Params {
    /// Flatten into ordered pairs, positional values keyed by index.
    pub fn into_pairs(self) -> Vec<(String, Expr)> {
        let mut pairs: Vec<(String, Expr)> = self
            .positional
            .into_iter()
            .enumerate()
            .map(|(index, value)| (index.to_string(), value))
            .collect();
        pairs.extend(self.named);
        pairs
    }
}

enum StackOp {
    Bin(BinaryOp),
    Un(UnaryOp),
    Paren,
}

enum RpnItem {
    Operand(Expr),
    Bin(BinaryOp),
    Un(UnaryOp),
}

fn prec(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Or => 1,
        BinaryOp::And => 2,
        BinaryOp::Eq
        | BinaryOp::Ne
        | BinaryOp::Lt
        | BinaryOp::Gt
        | BinaryOp::Le
        | BinaryOp::Ge => 3,
        BinaryOp::Add | BinaryOp::Sub => 4,
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 5,
    }
}

fn bin_op(kind: &TokenKind) -> Option<BinaryOp> {
    Some(match kind {
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Percent => BinaryOp::Mod,
        TokenKind::EqEq => BinaryOp::Eq,
        TokenKind::NotEq => BinaryOp::Ne,
        TokenKind::Lt => BinaryOp::Lt,
        TokenKind::Gt => BinaryOp::Gt,
        TokenKind::Le => BinaryOp::Le,
        TokenKind::Ge => BinaryOp::Ge,
        TokenKind::AndAnd => BinaryOp::And,
        TokenKind::OrOr => BinaryOp::Or,
        _ => return None,
    })
}

fn assign_op(kind: &TokenKind) -> Option<AssignOp> {
    Some(match kind {
        TokenKind::Eq => AssignOp::Assign,
        TokenKind::PlusEq => AssignOp::Add,
        TokenKind::MinusEq => AssignOp::Sub,
        TokenKind::StarEq => AssignOp::Mul,
        TokenKind::SlashEq => AssignOp::Div,
        _ => return None,
    })
}

fn scalar_expr(kind: &TokenKind) -> Option<Expr> {
    Some(match kind {
        TokenKind::Int(n) => Expr::Int(*n),
        TokenKind::Float(n) => Expr::Float(*n),
        TokenKind::Str(s) => Expr::Str(s.clone()),
        _ => return None,
    })
}

fn special_expr(kind: &TokenKind) -> Option<Expr> {
    match kind {
        TokenKind::Ident(name) => {
            if name.eq_ignore_ascii_case("true") {
                Some(Expr::Bool(true))
            } else if name.eq_ignore_ascii_case("false") {
                Some(Expr::Bool(false))
            } else if name.eq_ignore_ascii_case("null") {
                Some(Expr::Null)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Can `kind` begin a term?
fn starts_term(kind: &TokenKind) -> bool {
    kind.is_scalar()
        || kind.is_var()
        || kind.is_string_open()
        || kind.is_special_val()
        || kind.is_unary()
        || matches!(
            kind,
            TokenKind::Isset
                | TokenKind::Empty
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::Ident(_)
        )
}

fn push_binary(stack: &mut Vec<StackOp>, output: &mut Vec<RpnItem>, op: BinaryOp) {
    while let Some(top) = stack.last() {
        match top {
            StackOp::Paren => break,
            StackOp::Un(un) => {
                output.push(RpnItem::Un(*un));
                stack.pop();
            }
            StackOp::Bin(bin) if prec(*bin) >= prec(op) => {
                output.push(RpnItem::Bin(*bin));
                stack.pop();
            }
            StackOp::Bin(_) => break,
        }
    }
    stack.push(StackOp::Bin(op));
}

fn pop_group(stack: &mut Vec<StackOp>, output: &mut Vec<RpnItem>) -> Result<(), SyntaxError> {
    loop {
        match stack.pop() {
            Some(StackOp::Paren) => return Ok(()),
            Some(StackOp::Bin(op)) => output.push(RpnItem::Bin(op)),
            Some(StackOp::Un(op)) => output.push(RpnItem::Un(op)),
            None => return Err(SyntaxError::unexpected("Brackets don't match")),
        }
    }
}

/// Fold the RPN sequence into one expression tree.
fn fold(output: Vec<RpnItem>) -> Result<Option<Expr>, SyntaxError> {
    let mut values: Vec<Expr> = Vec::new();
    for item in output {
        match item {
            RpnItem::Operand(expr) => values.push(expr),
            RpnItem::Un(op) => {
                let expr = values
                    .pop()
                    .ok_or_else(|| SyntaxError::unexpected("Dangling unary operator"))?;
                values.push(Expr::Unary {
                    op,
                    expr: Box::new(expr),
                });
            }
            RpnItem::Bin(op) => {
                let right = values
                    .pop()
                    .ok_or_else(|| SyntaxError::unexpected("Dangling operator"))?;
                let left = values
                    .pop()
                    .ok_or_else(|| SyntaxError::unexpected("Dangling operator"))?;
                values.push(Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                });
            }
        }
    }
    match values.len() {
        0 => Ok(None),
        1 => Ok(values.pop()),
        _ => Err(SyntaxError::unexpected("Malformed expression")),
    }
}

impl Template<'_> {
    fn nest(&mut self) -> Result<(), SyntaxError> {
        self.nesting += 1;
        if self.nesting > self.engine.options.max_nesting {
            return Err(SyntaxError::unexpected("Expression is too deeply nested"));
        }
        Ok(())
    }

    fn unnest(&mut self) {
        self.nesting = self.nesting.saturating_sub(1);
    }

    /// Parse an expression; `None` when the cursor does not start one.
    /// Tokens that do not fit are left for the caller.
    pub(crate) fn parse_exp(
        &mut self,
        tokens: &mut Cursor,
    ) -> Result<Option<Expr>, SyntaxError> {
        self.nest()?;
        let result = self.parse_exp_inner(tokens);
        self.unnest();
        result
    }

    pub(crate) fn parse_exp_req(&mut self, tokens: &mut Cursor) -> Result<Expr, SyntaxError> {
        match self.parse_exp(tokens)? {
            Some(expr) => Ok(expr),
            None => Err(tokens.unexpected("expression").into()),
        }
    }

    fn parse_exp_inner(&mut self, tokens: &mut Cursor) -> Result<Option<Expr>, SyntaxError> {
        let mut output: Vec<RpnItem> = Vec::new();
        let mut stack: Vec<StackOp> = Vec::new();
        // 0 = no term pending, 1 = term, 2 = addressable term
        let mut term = 0u8;
        let mut cond_used = false;
        let mut brackets = 0usize;
        while tokens.valid() {
            let kind = match tokens.kind() {
                Some(kind) => kind.clone(),
                None => break,
            };
            if term == 0 {
                if let Some(expr) = scalar_expr(&kind) {
                    tokens.next();
                    let expr = self.maybe_modifier(tokens, expr)?;
                    output.push(RpnItem::Operand(expr));
                    term = 1;
                } else if let Some(expr) = special_expr(&kind) {
                    tokens.next();
                    let expr = self.maybe_modifier(tokens, expr)?;
                    output.push(RpnItem::Operand(expr));
                    term = 1;
                } else if kind.is_string_open() {
                    let expr = self.parse_substr(tokens)?;
                    let expr = self.maybe_modifier(tokens, expr)?;
                    output.push(RpnItem::Operand(expr));
                    term = 1;
                } else if kind == TokenKind::Hash {
                    tokens.next();
                    let expr = self.parse_const(tokens)?;
                    output.push(RpnItem::Operand(expr));
                    term = 1;
                } else if kind.is_var() {
                    let (expr, pure) = self.parse_var(tokens, 0)?;
                    // A unary in flight makes the result non-addressable.
                    let under_unary = matches!(stack.last(), Some(StackOp::Un(_)));
                    term = if pure && !under_unary { 2 } else { 1 };
                    output.push(RpnItem::Operand(expr));
                } else if kind == TokenKind::LParen {
                    stack.push(StackOp::Paren);
                    brackets += 1;
                    tokens.next();
                } else if kind.is_unary() {
                    let before_term = matches!(tokens.peek_next(), Some(next) if starts_term(next));
                    if !before_term {
                        break;
                    }
                    let op = if kind == TokenKind::Bang {
                        UnaryOp::Not
                    } else {
                        UnaryOp::Neg
                    };
                    stack.push(StackOp::Un(op));
                    tokens.next();
                } else if matches!(kind, TokenKind::Isset | TokenKind::Empty) {
                    let expr = self.parse_isset(tokens)?;
                    output.push(RpnItem::Operand(expr));
                    term = 1;
                } else if kind == TokenKind::LBracket {
                    let expr = self.parse_array(tokens)?;
                    output.push(RpnItem::Operand(expr));
                    term = 1;
                } else if kind.is_incdec() {
                    if !matches!(tokens.peek_next(), Some(TokenKind::Var(_))) {
                        break;
                    }
                    let decr = kind == TokenKind::Decr;
                    tokens.next();
                    let (expr, pure) = self.parse_var(tokens, 0)?;
                    let var = match (expr, pure) {
                        (Expr::Var(var), true) => var,
                        _ => {
                            return Err(SyntaxError::unexpected(
                                "Increment needs a plain variable",
                            ))
                        }
                    };
                    output.push(RpnItem::Operand(Expr::Step {
                        var,
                        decr,
                        postfix: false,
                    }));
                    term = 1;
                } else if let TokenKind::Ident(name) = &kind {
                    if matches!(tokens.peek_next(), Some(TokenKind::LParen)) {
                        let name = self.engine.modifier(name)?;
                        tokens.next();
                        let args = self.parse_args(tokens)?;
                        output.push(RpnItem::Operand(Expr::Call { name, args }));
                        term = 1;
                    } else {
                        // The identifier belongs to the caller's grammar.
                        break;
                    }
                } else {
                    break;
                }
            } else if kind == TokenKind::RParen {
                if brackets == 0 {
                    break;
                }
                pop_group(&mut stack, &mut output)?;
                brackets -= 1;
                term = 1;
                tokens.next();
            } else if kind.is_binary() {
                if kind.is_cond() {
                    // One comparison per expression until a boolean
                    // operator resets it.
                    if cond_used {
                        break;
                    }
                    cond_used = true;
                }
                if kind.is_boolean() {
                    cond_used = false;
                }
                if tokens.is_last() {
                    return Err(SyntaxError::unexpected(format!(
                        "Dangling operator '{}'",
                        kind.describe()
                    )));
                }
                if let Some(op) = bin_op(&kind) {
                    push_binary(&mut stack, &mut output, op);
                }
                term = 0;
                tokens.next();
            } else if kind.is_incdec() {
                if term != 2 {
                    break;
                }
                let var = match output.pop() {
                    Some(RpnItem::Operand(Expr::Var(var))) => var,
                    other => {
                        if let Some(item) = other {
                            output.push(item);
                        }
                        break;
                    }
                };
                output.push(RpnItem::Operand(Expr::Step {
                    var,
                    decr: kind == TokenKind::Decr,
                    postfix: true,
                }));
                term = 1;
                tokens.next();
            } else if kind.is_assign() {
                if term != 2 || tokens.is_last() {
                    break;
                }
                let var = match output.pop() {
                    Some(RpnItem::Operand(Expr::Var(var))) => var,
                    other => {
                        if let Some(item) = other {
                            output.push(item);
                        }
                        break;
                    }
                };
                let Some(op) = assign_op(&kind) else { break };
                tokens.next();
                let value = self.parse_exp_req(tokens)?;
                output.push(RpnItem::Operand(Expr::Assign {
                    var,
                    op,
                    value: Box::new(value),
                }));
                term = 1;
            } else {
                break;
            }
        }
        if brackets > 0 {
            return Err(SyntaxError::unexpected("Brackets don't match"));
        }
        if term == 0 && !(output.is_empty() && stack.is_empty()) {
            return Err(tokens.unexpected("expression term").into());
        }
        while let Some(op) = stack.pop() {
            match op {
                StackOp::Paren => return Err(SyntaxError::unexpected("Brackets don't match")),
                StackOp::Bin(op) => output.push(RpnItem::Bin(op)),
                StackOp::Un(op) => output.push(RpnItem::Un(op)),
            }
        }
        fold(output)
    }

    fn parse_isset(&mut self, tokens: &mut Cursor) -> Result<Expr, SyntaxError> {
        let empty = matches!(tokens.kind(), Some(TokenKind::Empty));
        tokens.next();
        tokens.demand(|k| *k == TokenKind::LParen, "'('")?;
        tokens.next();
        let mut subjects = Vec::new();
        loop {
            tokens.demand(TokenKind::is_var, "variable")?;
            let (expr, _) = self.parse_var(tokens, 0)?;
            subjects.push(expr);
            if tokens.eat(|k| *k == TokenKind::Comma) {
                continue;
            }
            tokens.demand(|k| *k == TokenKind::RParen, "')'")?;
            tokens.next();
            break;
        }
        Ok(if empty {
            Expr::Empty(subjects)
        } else {
            Expr::Isset(subjects)
        })
    }

    /// Parse a variable reference with its accessor chain. Returns the
    /// expression and whether it is still a pure, addressable reference.
    pub(crate) fn parse_var(
        &mut self,
        tokens: &mut Cursor,
        deny: u8,
    ) -> Result<(Expr, bool), SyntaxError> {
        let deny = deny | self.engine.options.deny;
        let name = tokens.expect_var()?;
        let mut var = VarRef::bare(name);
        let mut pure = true;
        loop {
            let kind = match tokens.kind() {
                Some(kind) => kind.clone(),
                None => break,
            };
            match kind {
                TokenKind::Dot if deny & DENY_ARRAY == 0 => {
                    tokens.next();
                    match tokens.kind() {
                        Some(TokenKind::Ident(key)) => {
                            if matches!(tokens.peek_next(), Some(TokenKind::LParen)) {
                                // `$a.name(...)`: the key is a full
                                // sub-expression.
                                let key = self.parse_exp_req(tokens)?;
                                var.path.push(Access::Index(key));
                            } else {
                                var.path.push(Access::Index(Expr::Str(key.clone())));
                                tokens.next();
                            }
                        }
                        Some(TokenKind::Int(n)) => {
                            var.path.push(Access::Index(Expr::Int(*n)));
                            tokens.next();
                        }
                        Some(TokenKind::Var(_)) => {
                            let (key, _) = self.parse_var(tokens, DENY_MODS)?;
                            var.path.push(Access::Index(key));
                        }
                        Some(TokenKind::Str(_)) | Some(TokenKind::Quote(_)) => {
                            let key = self.parse_substr(tokens)?;
                            var.path.push(Access::Index(key));
                        }
                        _ => return Err(tokens.unexpected("key after '.'").into()),
                    }
                }
                TokenKind::LBracket if deny & DENY_ARRAY == 0 => {
                    tokens.next();
                    // A bare word not starting a call reads as a string
                    // key: `$a[b]` is `$a["b"]`.
                    let key = match tokens.kind() {
                        Some(TokenKind::Ident(name))
                            if !matches!(tokens.peek_next(), Some(TokenKind::LParen)) =>
                        {
                            let name = name.clone();
                            tokens.next();
                            Expr::Str(name)
                        }
                        _ => self.parse_exp_req(tokens)?,
                    };
                    tokens.demand(|k| *k == TokenKind::RBracket, "']'")?;
                    tokens.next();
                    var.path.push(Access::Index(key));
                }
                TokenKind::Arrow => {
                    tokens.next();
                    let prop = tokens.expect_ident()?;
                    if matches!(tokens.kind(), Some(TokenKind::LParen)) {
                        if self.engine.options.deny_methods {
                            return Err(SyntaxError::security("Method calls are disabled"));
                        }
                        let args = self.parse_args(tokens)?;
                        var.path.push(Access::Method { name: prop, args });
                        pure = false;
                    } else {
                        var.path.push(Access::Prop(prop));
                    }
                }
                TokenKind::Pipe if deny & DENY_MODS == 0 => {
                    let expr = self.parse_modifier(tokens, Expr::Var(var))?;
                    return Ok((expr, false));
                }
                TokenKind::Question => return self.parse_shortcut(tokens, var, false),
                // A lone `!` (never `!=`, that lexes as one token) is
                // the isset shortcut.
                TokenKind::Bang => return self.parse_shortcut(tokens, var, true),
                _ => break,
            }
        }
        Ok((Expr::Var(var), pure))
    }

    /// The `?` / `!` shortcut forms ending an accessor chain.
    ///
    /// `$a?` reads as `!empty($a)`, `$a!` as `isset($a)`; with `:v` or
    /// `v1:v2` they become the corresponding ternaries.
    fn parse_shortcut(
        &mut self,
        tokens: &mut Cursor,
        var: VarRef,
        bang: bool,
    ) -> Result<(Expr, bool), SyntaxError> {
        tokens.next();
        let subject = Expr::Var(var);
        let test = if bang {
            Expr::Isset(vec![subject.clone()])
        } else {
            Expr::Empty(vec![subject.clone()])
        };
        let expr = if tokens.eat(|k| *k == TokenKind::Colon) {
            let value = self.parse_branch_value(tokens)?;
            if bang {
                // isset(x) ? x : v
                Expr::Ternary {
                    cond: Box::new(test),
                    then: Box::new(subject),
                    otherwise: Box::new(value),
                }
            } else {
                // empty(x) ? v : x
                Expr::Ternary {
                    cond: Box::new(test),
                    then: Box::new(value),
                    otherwise: Box::new(subject),
                }
            }
        } else if matches!(tokens.kind(), Some(kind) if starts_term(kind)) {
            let first = self.parse_branch_value(tokens)?;
            tokens.demand(|k| *k == TokenKind::Colon, "':'")?;
            tokens.next();
            let second = self.parse_branch_value(tokens)?;
            if bang {
                // isset(x) ? v1 : v2
                Expr::Ternary {
                    cond: Box::new(test),
                    then: Box::new(first),
                    otherwise: Box::new(second),
                }
            } else {
                // empty(x) ? v2 : v1
                Expr::Ternary {
                    cond: Box::new(test),
                    then: Box::new(second),
                    otherwise: Box::new(first),
                }
            }
        } else if bang {
            test
        } else {
            Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(test),
            }
        };
        Ok((expr, false))
    }

    /// A shortcut-ternary branch: a bare word reads as a string, else a
    /// full expression.
    fn parse_branch_value(&mut self, tokens: &mut Cursor) -> Result<Expr, SyntaxError> {
        let bare = match tokens.kind() {
            Some(kind @ TokenKind::Ident(_))
                if !kind.is_special_val()
                    && !matches!(tokens.peek_next(), Some(TokenKind::LParen)) =>
            {
                match kind {
                    TokenKind::Ident(name) => Some(name.clone()),
                    _ => None,
                }
            }
            _ => None,
        };
        if let Some(word) = bare {
            tokens.next();
            return Ok(Expr::Str(word));
        }
        self.parse_exp_req(tokens)
    }

    /// String interpolation. Retries from the opening quote whenever the
    /// token stream ran out before the string closed, splicing in more
    /// raw source from the scanner.
    pub(crate) fn parse_substr(&mut self, tokens: &mut Cursor) -> Result<Expr, SyntaxError> {
        'retry: loop {
            if let Some(TokenKind::Str(text)) = tokens.kind() {
                let text = text.clone();
                tokens.next();
                return Ok(Expr::Str(text));
            }
            let start = tokens.at();
            let quote = match tokens.kind() {
                Some(TokenKind::Quote(q)) => *q,
                _ => return Err(tokens.unexpected("string").into()),
            };
            tokens.next();
            let mut parts: Vec<Expr> = Vec::new();
            loop {
                match tokens.kind() {
                    Some(TokenKind::StrFragment(text)) => {
                        parts.push(Expr::Str(text.clone()));
                        tokens.next();
                    }
                    Some(TokenKind::Var(name)) => {
                        parts.push(Expr::Var(VarRef::bare(name.clone())));
                        tokens.next();
                    }
                    Some(TokenKind::CurlyOpen) => {
                        tokens.next();
                        let expr = self.parse_exp_req(tokens)?;
                        tokens.demand(|k| *k == TokenKind::RBrace, "'}'")?;
                        tokens.next();
                        parts.push(expr);
                    }
                    Some(TokenKind::Quote(q)) if *q == quote => {
                        tokens.next();
                        return Ok(if parts.is_empty() {
                            Expr::Str(String::new())
                        } else if parts.len() == 1 {
                            match parts.pop() {
                                Some(part) => part,
                                None => Expr::Str(String::new()),
                            }
                        } else {
                            Expr::Concat(parts)
                        });
                    }
                    _ => {
                        // The stream ran dry inside the string: the `}`
                        // that ended the directive belongs to it. Fetch
                        // more source, put the `}` back, relex, retry.
                        let more = self.more_substr(quote).ok_or_else(|| {
                            SyntaxError::unterminated("Unterminated string")
                        })?;
                        let mut extra = String::from("}");
                        extra.push_str(&more);
                        tokens.splice_from(start, &extra)?;
                        continue 'retry;
                    }
                }
            }
        }
    }

    /// Hand a finished term to the modifier parser when a pipeline
    /// follows it.
    fn maybe_modifier(
        &mut self,
        tokens: &mut Cursor,
        expr: Expr,
    ) -> Result<Expr, SyntaxError> {
        if self.engine.options.deny & DENY_MODS == 0
            && matches!(tokens.kind(), Some(TokenKind::Pipe))
        {
            return self.parse_modifier(tokens, expr);
        }
        Ok(expr)
    }

    /// `|name[:arg...]` pipeline stages, left to right.
    pub(crate) fn parse_modifier(
        &mut self,
        tokens: &mut Cursor,
        mut subject: Expr,
    ) -> Result<Expr, SyntaxError> {
        while tokens.eat(|k| *k == TokenKind::Pipe) {
            let name = tokens.expect_ident()?;
            let name = self.engine.modifier(&name)?;
            let mut args = vec![subject];
            while tokens.eat(|k| *k == TokenKind::Colon) {
                args.push(self.parse_mod_arg(tokens)?);
            }
            subject = Expr::Call { name, args };
        }
        Ok(subject)
    }

    fn parse_mod_arg(&mut self, tokens: &mut Cursor) -> Result<Expr, SyntaxError> {
        let kind = match tokens.kind() {
            Some(kind) => kind.clone(),
            None => return Err(tokens.unexpected("modifier argument").into()),
        };
        if let Some(expr) = scalar_expr(&kind) {
            tokens.next();
            return Ok(expr);
        }
        if let Some(expr) = special_expr(&kind) {
            tokens.next();
            return Ok(expr);
        }
        if kind.is_string_open() {
            return self.parse_substr(tokens);
        }
        if kind.is_var() {
            // Nested pipelines inside arguments are not allowed.
            return Ok(self.parse_var(tokens, DENY_MODS)?.0);
        }
        if kind == TokenKind::LBracket {
            return self.parse_array(tokens);
        }
        match kind {
            TokenKind::LParen | TokenKind::Isset | TokenKind::Empty => {
                self.parse_exp_req(tokens)
            }
            TokenKind::Ident(_) if matches!(tokens.peek_next(), Some(TokenKind::LParen)) => {
                self.parse_exp_req(tokens)
            }
            kind if kind.is_unary() => self.parse_exp_req(tokens),
            _ => Err(tokens.unexpected("modifier argument").into()),
        }
    }

    /// `[v, k => v, ...]`
    pub(crate) fn parse_array(&mut self, tokens: &mut Cursor) -> Result<Expr, SyntaxError> {
        self.nest()?;
        let result = self.parse_array_inner(tokens);
        self.unnest();
        result
    }

    fn parse_array_inner(&mut self, tokens: &mut Cursor) -> Result<Expr, SyntaxError> {
        tokens.demand(|k| *k == TokenKind::LBracket, "'['")?;
        tokens.next();
        let mut entries: Vec<(Option<Expr>, Expr)> = Vec::new();
        if tokens.eat(|k| *k == TokenKind::RBracket) {
            return Ok(Expr::Array(entries));
        }
        loop {
            let value = self.parse_exp_req(tokens)?;
            if tokens.eat(|k| *k == TokenKind::DoubleArrow) {
                let keyed = self.parse_exp_req(tokens)?;
                entries.push((Some(value), keyed));
            } else {
                entries.push((None, value));
            }
            if tokens.eat(|k| *k == TokenKind::Comma) {
                if matches!(tokens.kind(), Some(TokenKind::RBracket)) {
                    return Err(tokens.unexpected("array element").into());
                }
                continue;
            }
            tokens.demand(|k| *k == TokenKind::RBracket, "']'")?;
            tokens.next();
            return Ok(Expr::Array(entries));
        }
    }

    /// `( expr, expr, ... )`
    pub(crate) fn parse_args(&mut self, tokens: &mut Cursor) -> Result<Vec<Expr>, SyntaxError> {
        tokens.demand(|k| *k == TokenKind::LParen, "'('")?;
        tokens.next();
        let mut args = Vec::new();
        if tokens.eat(|k| *k == TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_exp_req(tokens)?);
            if tokens.eat(|k| *k == TokenKind::Comma) {
                continue;
            }
            tokens.demand(|k| *k == TokenKind::RParen, "')'")?;
            tokens.next();
            return Ok(args);
        }
    }

    /// `{#NAME}` / `{#Ns\Class::NAME}` constant reference.
    pub(crate) fn parse_const(&mut self, tokens: &mut Cursor) -> Result<Expr, SyntaxError> {
        let mut name = tokens.expect_ident()?;
        loop {
            if tokens.eat(|k| *k == TokenKind::Backslash) {
                name.push('\\');
                name.push_str(&tokens.expect_ident()?);
            } else if tokens.eat(|k| *k == TokenKind::DoubleColon) {
                name.push_str("::");
                name.push_str(&tokens.expect_ident()?);
            } else {
                break;
            }
        }
        if self.engine.constant(&name).is_none() {
            return Err(SyntaxError::unknown(format!("Undefined constant '{name}'")));
        }
        Ok(Expr::Const(name))
    }

    /// First tag argument: a quoted string (with an optional modifier
    /// pipeline), a bare dotted name like `news.tpl`, or any expression.
    /// The second value is the name when it is static.
    pub(crate) fn parse_first_arg(
        &mut self,
        tokens: &mut Cursor,
    ) -> Result<(Expr, Option<String>), SyntaxError> {
        let expr = match tokens.kind() {
            Some(kind) if kind.is_string_open() || matches!(kind, TokenKind::Str(_)) => {
                let expr = self.parse_substr(tokens)?;
                self.maybe_modifier(tokens, expr)?
            }
            Some(TokenKind::Ident(_))
                if !matches!(tokens.peek_next(), Some(TokenKind::LParen)) =>
            {
                let mut name = tokens.expect_ident()?;
                while tokens.eat(|k| *k == TokenKind::Dot) {
                    name.push('.');
                    name.push_str(&tokens.expect_ident()?);
                }
                Expr::Str(name)
            }
            _ => self.parse_exp_req(tokens)?,
        };
        let fixed = match &expr {
            Expr::Str(text) => Some(text.clone()),
            _ => None,
        };
        Ok((expr, fixed))
    }

    /// Whitespace-separated `name=value` and positional parameters.
    /// Bare names read as boolean-true flags. With `allowed` given, an
    /// unknown name is a hard error.
    pub(crate) fn parse_params(
        &mut self,
        tokens: &mut Cursor,
        allowed: Option<&[String]>,
    ) -> Result<Params, SyntaxError> {
        let mut params = Params {
            named: BTreeMap::new(),
            positional: Vec::new(),
        };
        while tokens.valid() {
            if tokens.eat(|k| *k == TokenKind::Comma) {
                continue;
            }
            let bare = match tokens.kind() {
                Some(kind) if kind.is_ident() && !kind.is_special_val() => match kind {
                    TokenKind::Ident(name) => Some(name.clone()),
                    _ => None,
                },
                _ => None,
            };
            match bare {
                Some(name) => {
                    if let Some(allowed) = allowed {
                        if !allowed.iter().any(|a| a == &name) {
                            return Err(SyntaxError::unexpected(format!(
                                "Unknown parameter '{name}'"
                            )));
                        }
                    }
                    tokens.next();
                    if tokens.eat(|k| *k == TokenKind::Eq) {
                        let value = self.parse_exp_req(tokens)?;
                        params.named.insert(name, value);
                    } else {
                        params.named.insert(name, Expr::Bool(true));
                    }
                }
                None => {
                    let value = self.parse_exp_req(tokens)?;
                    params.positional.push(value);
                }
            }
        }
        Ok(params)
    }
}
