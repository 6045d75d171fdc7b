//! Runtime values.
//!
//! Loose dynamic typing in the tradition of template engines: numeric
//! strings take part in arithmetic, emptiness drives conditionals and
//! the `?` / `!` shortcut forms, and every value knows how to print
//! itself into rendered output.

use std::collections::BTreeMap;

use crate::RuntimeError;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// Numeric view of a value, for arithmetic and comparisons.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(n) => n,
        }
    }
}

impl Value {
    /// Empty means: null, false, zero, the empty string, the string
    /// `"0"`, or a container with no elements.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(b) => !b,
            Value::Int(n) => *n == 0,
            Value::Float(n) => *n == 0.0,
            Value::Str(s) => s.is_empty() || s == "0",
            Value::List(items) => items.is_empty(),
            Value::Map(entries) => entries.is_empty(),
        }
    }

    pub fn truthy(&self) -> bool {
        !self.is_empty()
    }

    /// The echoed form of this value.
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(true) => "1".to_string(),
            Value::Bool(false) => String::new(),
            Value::Int(n) => n.to_string(),
            Value::Float(n) => format_float(*n),
            Value::Str(s) => s.clone(),
            Value::List(_) | Value::Map(_) => "Array".to_string(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Numeric coercion. Numeric strings count; containers do not.
    pub fn as_num(&self) -> Option<Num> {
        match self {
            Value::Null => Some(Num::Int(0)),
            Value::Bool(b) => Some(Num::Int(*b as i64)),
            Value::Int(n) => Some(Num::Int(*n)),
            Value::Float(n) => Some(Num::Float(*n)),
            Value::Str(s) => {
                let trimmed = s.trim();
                if let Ok(n) = trimmed.parse::<i64>() {
                    Some(Num::Int(n))
                } else {
                    trimmed.parse::<f64>().ok().map(Num::Float)
                }
            }
            Value::List(_) | Value::Map(_) => None,
        }
    }

    /// Addition, or string concatenation when either side has no
    /// numeric reading.
    pub fn add(&self, other: &Value) -> Value {
        match (self.as_num(), other.as_num()) {
            (Some(a), Some(b)) => num_add(a, b),
            _ => Value::Str(format!("{}{}", self.render(), other.render())),
        }
    }

    pub fn sub(&self, other: &Value) -> Result<Value, RuntimeError> {
        let (a, b) = self.num_pair(other, "-")?;
        Ok(match (a, b) {
            (Num::Int(x), Num::Int(y)) => match x.checked_sub(y) {
                Some(n) => Value::Int(n),
                None => Value::Float(x as f64 - y as f64),
            },
            (a, b) => Value::Float(a.as_f64() - b.as_f64()),
        })
    }

    pub fn mul(&self, other: &Value) -> Result<Value, RuntimeError> {
        let (a, b) = self.num_pair(other, "*")?;
        Ok(match (a, b) {
            (Num::Int(x), Num::Int(y)) => match x.checked_mul(y) {
                Some(n) => Value::Int(n),
                None => Value::Float(x as f64 * y as f64),
            },
            (a, b) => Value::Float(a.as_f64() * b.as_f64()),
        })
    }

    /// Division. Integer division stays an integer only when exact.
    pub fn div(&self, other: &Value) -> Result<Value, RuntimeError> {
        let (a, b) = self.num_pair(other, "/")?;
        if b.as_f64() == 0.0 {
            return Err(RuntimeError::new("Division by zero"));
        }
        Ok(match (a, b) {
            (Num::Int(x), Num::Int(y)) if x % y == 0 => Value::Int(x / y),
            (a, b) => Value::Float(a.as_f64() / b.as_f64()),
        })
    }

    pub fn rem(&self, other: &Value) -> Result<Value, RuntimeError> {
        let (a, b) = self.num_pair(other, "%")?;
        match (a, b) {
            (_, Num::Int(0)) => Err(RuntimeError::new("Modulo by zero")),
            (Num::Int(x), Num::Int(y)) => Ok(Value::Int(x % y)),
            (a, b) => {
                if b.as_f64() == 0.0 {
                    Err(RuntimeError::new("Modulo by zero"))
                } else {
                    Ok(Value::Float(a.as_f64() % b.as_f64()))
                }
            }
        }
    }

    pub fn neg(&self) -> Result<Value, RuntimeError> {
        match self.as_num() {
            Some(Num::Int(n)) => Ok(Value::Int(-n)),
            Some(Num::Float(n)) => Ok(Value::Float(-n)),
            None => Err(RuntimeError::new(format!(
                "Cannot negate a {}",
                self.type_name()
            ))),
        }
    }

    /// Loose equality: numeric when both sides read as numbers, string
    /// comparison otherwise.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self.as_num(), other.as_num()) {
            (Some(a), Some(b)) => a.as_f64() == b.as_f64(),
            _ => self.render() == other.render(),
        }
    }

    pub fn loose_cmp(&self, other: &Value) -> std::cmp::Ordering {
        match (self.as_num(), other.as_num()) {
            (Some(a), Some(b)) => a
                .as_f64()
                .partial_cmp(&b.as_f64())
                .unwrap_or(std::cmp::Ordering::Equal),
            _ => self.render().cmp(&other.render()),
        }
    }

    /// Read an element by key. Missing keys and non-containers read
    /// as `Null`.
    pub fn index(&self, key: &Value) -> Value {
        match self {
            Value::List(items) => match key.as_num() {
                Some(Num::Int(i)) if i >= 0 => {
                    items.get(i as usize).cloned().unwrap_or(Value::Null)
                }
                _ => Value::Null,
            },
            Value::Map(entries) => entries.get(&key.render()).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    /// True when the key exists with a non-null value.
    pub fn has_index(&self, key: &Value) -> bool {
        match self {
            Value::List(items) => match key.as_num() {
                Some(Num::Int(i)) if i >= 0 => {
                    matches!(items.get(i as usize), Some(v) if *v != Value::Null)
                }
                _ => false,
            },
            Value::Map(entries) => {
                matches!(entries.get(&key.render()), Some(v) if *v != Value::Null)
            }
            _ => false,
        }
    }

    /// Mutable slot for a key, growing the container as needed. A null
    /// or non-container value is replaced with a map first; a list keyed
    /// by a non-index becomes a map keeping its elements.
    pub fn slot(&mut self, key: &Value) -> &mut Value {
        let list_index = match (&*self, key.as_num()) {
            (Value::List(_), Some(Num::Int(i))) if i >= 0 => Some(i as usize),
            _ => None,
        };
        match list_index {
            Some(i) => match self {
                Value::List(items) => {
                    if i >= items.len() {
                        items.resize(i + 1, Value::Null);
                    }
                    &mut items[i]
                }
                other => other,
            },
            None => {
                if let Value::List(items) = self {
                    let items = std::mem::take(items);
                    *self = Value::Map(
                        items
                            .into_iter()
                            .enumerate()
                            .map(|(i, v)| (i.to_string(), v))
                            .collect(),
                    );
                } else if !matches!(self, Value::Map(_)) {
                    *self = Value::Map(BTreeMap::new());
                }
                match self {
                    Value::Map(entries) => entries.entry(key.render()).or_insert(Value::Null),
                    other => other,
                }
            }
        }
    }

    fn num_pair(&self, other: &Value, op: &str) -> Result<(Num, Num), RuntimeError> {
        match (self.as_num(), other.as_num()) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(RuntimeError::new(format!(
                "Unsupported operand types for '{op}': {} and {}",
                self.type_name(),
                other.type_name()
            ))),
        }
    }
}

fn num_add(a: Num, b: Num) -> Value {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => match x.checked_add(y) {
            Some(n) => Value::Int(n),
            None => Value::Float(x as f64 + y as f64),
        },
        (a, b) => Value::Float(a.as_f64() + b.as_f64()),
    }
}

/// Floats print without a trailing `.0` so whole values echo like
/// integers.
fn format_float(n: f64) -> String {
    if n == n.trunc() && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        let mut s = format!("{n}");
        if s.ends_with(".0") {
            s.truncate(s.len() - 2);
        }
        s
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_emptiness() {
        assert!(Value::Null.is_empty());
        assert!(Value::Bool(false).is_empty());
        assert!(Value::Int(0).is_empty());
        assert!(Value::Float(0.0).is_empty());
        assert!(Value::Str("".into()).is_empty());
        assert!(Value::Str("0".into()).is_empty());
        assert!(Value::List(vec![]).is_empty());
        assert!(!Value::Str("00".into()).is_empty());
        assert!(!Value::Int(-1).is_empty());
        assert!(!Value::Bool(true).is_empty());
    }

    #[test]
    fn test_render() {
        assert_eq!(Value::Null.render(), "");
        assert_eq!(Value::Bool(true).render(), "1");
        assert_eq!(Value::Bool(false).render(), "");
        assert_eq!(Value::Float(2.5).render(), "2.5");
        assert_eq!(Value::Float(2.0).render(), "2");
        assert_eq!(Value::List(vec![Value::Int(1)]).render(), "Array");
    }

    #[test]
    fn test_numeric_strings() {
        let a = Value::Str("5".into());
        let b = Value::Int(2);
        assert_eq!(a.add(&b), Value::Int(7));
        assert_eq!(a.mul(&b).unwrap(), Value::Int(10));
    }

    #[test]
    fn test_string_concat_via_plus() {
        let a = Value::Str("foo".into());
        let b = Value::Str("bar".into());
        assert_eq!(a.add(&b), Value::Str("foobar".into()));
    }

    #[test]
    fn test_division() {
        assert_eq!(
            Value::Int(10).div(&Value::Int(2)).unwrap(),
            Value::Int(5)
        );
        assert_eq!(
            Value::Int(7).div(&Value::Int(2)).unwrap(),
            Value::Float(3.5)
        );
        assert!(Value::Int(1).div(&Value::Int(0)).is_err());
    }

    #[test]
    fn test_index_and_slot() {
        let mut v = Value::Null;
        *v.slot(&Value::Str("a".into())) = Value::Int(1);
        assert_eq!(v.index(&Value::Str("a".into())), Value::Int(1));
        assert_eq!(v.index(&Value::Str("b".into())), Value::Null);

        let mut list = Value::List(vec![Value::Int(9)]);
        assert_eq!(list.index(&Value::Int(0)), Value::Int(9));
        *list.slot(&Value::Int(2)) = Value::Int(3);
        assert_eq!(list.index(&Value::Int(1)), Value::Null);
        assert_eq!(list.index(&Value::Int(2)), Value::Int(3));
    }

    #[test]
    fn test_slot_string_key_keeps_list_elements() {
        let mut list = Value::List(vec![Value::Int(7), Value::Int(8)]);
        *list.slot(&Value::Str("x".into())) = Value::Int(9);
        assert_eq!(list.index(&Value::Int(0)), Value::Int(7));
        assert_eq!(list.index(&Value::Str("1".into())), Value::Int(8));
        assert_eq!(list.index(&Value::Str("x".into())), Value::Int(9));
    }

    #[test]
    fn test_loose_compare() {
        assert!(Value::Str("10".into()).loose_eq(&Value::Int(10)));
        assert_eq!(
            Value::Int(2).loose_cmp(&Value::Float(2.5)),
            std::cmp::Ordering::Less
        );
    }
}
