//! Compiled template artifact.
//!
//! The compiler lowers a template into a `Program`: metadata for cache
//! invalidation plus a flat list of ops. Literal text is carried as data
//! (`Op::Text`), never re-parsed, so template output cannot smuggle
//! instructions back into the artifact.

use std::collections::BTreeMap;

/// A compiled template plus the metadata a host cache needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// Full template name, scheme prefix included.
    pub name: String,
    /// Provider scheme the source came from, if any.
    pub scm: Option<String>,
    /// Template name without the scheme prefix.
    pub base_name: String,
    /// Source timestamp at compile time.
    pub time: u64,
    /// scheme -> template name -> timestamp, for every template this one
    /// incorporates.
    pub depends: BTreeMap<String, BTreeMap<String, u64>>,
    pub ops: Vec<Op>,
}

/// One renderable instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Emit literal text verbatim.
    Text(String),
    /// Evaluate and emit.
    Echo(Expr),
    /// Evaluate for side effects only.
    Stmt(Expr),
    If {
        branches: Vec<(Expr, Vec<Op>)>,
        otherwise: Vec<Op>,
    },
    Foreach {
        key: Option<String>,
        value: String,
        over: Expr,
        body: Vec<Op>,
        /// Runs when the subject is empty or not iterable.
        otherwise: Vec<Op>,
    },
    Break,
    Continue,
    /// Run `body` against a fresh scope holding only `vars` (evaluated in
    /// the caller's scope first). Macro call sites expand to this.
    Scoped {
        vars: Vec<(String, Expr)>,
        body: Vec<Op>,
    },
    /// Render another compiled template against a copy of the current
    /// scope with `vars` overrides.
    Include {
        program: Box<Program>,
        vars: Vec<(String, Expr)>,
    },
    /// Registered template function, inline (`body` = None) or block.
    FuncTag {
        name: String,
        params: Vec<(String, Expr)>,
        body: Option<Vec<Op>>,
    },
}

/// A value expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Named constant, resolved through the registry at render time.
    Const(String),
    Var(VarRef),
    /// String interpolation: literal and expression pieces in order.
    Concat(Vec<Expr>),
    /// `[v, k => v, ...]`; entries without a key get the next list index.
    Array(Vec<(Option<Expr>, Expr)>),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Isset(Vec<Expr>),
    Empty(Vec<Expr>),
    /// `++$a` / `$a--` and friends.
    Step {
        var: VarRef,
        decr: bool,
        postfix: bool,
    },
    Assign {
        var: VarRef,
        op: AssignOp,
        value: Box<Expr>,
    },
    /// Modifier or function call through the registry.
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

/// A variable with its accessor chain.
#[derive(Debug, Clone, PartialEq)]
pub struct VarRef {
    pub name: String,
    pub path: Vec<Access>,
}

impl VarRef {
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Access {
    /// `.key` / `[key]`
    Index(Expr),
    /// `->prop`
    Prop(String),
    /// `->method(args)`
    Method { name: String, args: Vec<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
}
