//! Curly runtime.
//!
//! Everything a compiled template needs to run: the `Value` model, the
//! variable `Context`, the `Program` op-code artifact the compiler
//! emits, the modifier/function `Registry`, and the renderer that
//! interprets a `Program` against a context.

pub mod builtins;
pub mod context;
pub mod program;
pub mod render;
pub mod value;

pub use context::Context;
pub use program::{Access, AssignOp, BinaryOp, Expr, Op, Program, UnaryOp, VarRef};
pub use render::render;
pub use value::Value;

use std::collections::BTreeMap;

/// Render-time failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Runtime error: {message}")]
pub struct RuntimeError {
    pub message: String,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A modifier: the subject value first, then the modifier arguments.
pub type ModifierFn = fn(&[Value]) -> Result<Value, RuntimeError>;

/// A template function: named parameters plus the rendered body for
/// block forms (`None` for inline forms).
pub type TagFn = fn(&BTreeMap<String, Value>, Option<&str>) -> Result<Value, RuntimeError>;

/// Named modifiers, template functions and constants available to a
/// running template.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    modifiers: BTreeMap<String, ModifierFn>,
    tag_functions: BTreeMap<String, TagFn>,
    constants: BTreeMap<String, Value>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the builtin modifiers installed.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtins::install(&mut registry);
        registry
    }

    pub fn add_modifier(&mut self, name: impl Into<String>, function: ModifierFn) {
        self.modifiers.insert(name.into(), function);
    }

    pub fn modifier(&self, name: &str) -> Option<ModifierFn> {
        self.modifiers.get(name).copied()
    }

    pub fn add_tag_function(&mut self, name: impl Into<String>, function: TagFn) {
        self.tag_functions.insert(name.into(), function);
    }

    pub fn tag_function(&self, name: &str) -> Option<TagFn> {
        self.tag_functions.get(name).copied()
    }

    pub fn set_constant(&mut self, name: impl Into<String>, value: Value) {
        self.constants.insert(name.into(), value);
    }

    pub fn constant(&self, name: &str) -> Option<&Value> {
        self.constants.get(name)
    }
}
