//! Render-time variable scope.

use std::collections::BTreeMap;

use crate::value::Value;

/// Named variables for one render pass. Template code reads missing
/// names as `Null` and may create nested structure on assignment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    vars: BTreeMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    /// Mutable slot for a top-level name, created as `Null` when absent.
    pub fn slot(&mut self, name: &str) -> &mut Value {
        self.vars.entry(name.to_string()).or_insert(Value::Null)
    }

    pub fn has(&self, name: &str) -> bool {
        matches!(self.vars.get(name), Some(v) if *v != Value::Null)
    }
}

impl FromIterator<(String, Value)> for Context {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_get_set() {
        let mut ctx = Context::new();
        assert_eq!(ctx.get("x"), None);
        ctx.set("x", Value::Int(1));
        assert_eq!(ctx.get("x"), Some(&Value::Int(1)));
        assert!(ctx.has("x"));
        assert!(!ctx.has("y"));
    }

    #[test]
    fn test_slot_vivifies() {
        let mut ctx = Context::new();
        *ctx.slot("a").slot(&Value::Str("b".into())) = Value::Int(2);
        let expected = Value::Map(
            [("b".to_string(), Value::Int(2))].into_iter().collect(),
        );
        assert_eq!(ctx.get("a"), Some(&expected));
    }
}
