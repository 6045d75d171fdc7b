//! Builtin modifiers.
//!
//! Every modifier receives the subject value first, then its arguments
//! in pipeline order (`$x|truncate:3:"…"` calls `truncate` with three
//! values).

use crate::value::Value;
use crate::{Registry, RuntimeError};

pub fn install(registry: &mut Registry) {
    registry.add_modifier("upper", upper);
    registry.add_modifier("lower", lower);
    registry.add_modifier("truncate", truncate);
    registry.add_modifier("length", length);
    registry.add_modifier("join", join);
    registry.add_modifier("default", default);
    registry.add_modifier("replace", replace);
    registry.add_modifier("trim", trim);
}

fn subject<'a>(args: &'a [Value], name: &str) -> Result<&'a Value, RuntimeError> {
    args.first()
        .ok_or_else(|| RuntimeError::new(format!("Modifier '{name}' called without a value")))
}

fn upper(args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Str(subject(args, "upper")?.render().to_uppercase()))
}

fn lower(args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Str(subject(args, "lower")?.render().to_lowercase()))
}

/// `truncate:length[:suffix]` cuts to `length` chars and appends the
/// suffix (default `...`) when anything was removed.
fn truncate(args: &[Value]) -> Result<Value, RuntimeError> {
    let text = subject(args, "truncate")?.render();
    let limit = match args.get(1).and_then(Value::as_num) {
        Some(crate::value::Num::Int(n)) if n >= 0 => n as usize,
        Some(_) | None => {
            return Err(RuntimeError::new(
                "Modifier 'truncate' needs a non-negative length",
            ))
        }
    };
    let suffix = args.get(2).map(Value::render).unwrap_or_else(|| "...".to_string());
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= limit {
        return Ok(Value::Str(text));
    }
    let mut out: String = chars[..limit].iter().collect();
    out.push_str(&suffix);
    Ok(Value::Str(out))
}

/// Element count for containers, char count for everything else.
fn length(args: &[Value]) -> Result<Value, RuntimeError> {
    let len = match subject(args, "length")? {
        Value::List(items) => items.len(),
        Value::Map(entries) => entries.len(),
        other => other.render().chars().count(),
    };
    Ok(Value::Int(len as i64))
}

fn join(args: &[Value]) -> Result<Value, RuntimeError> {
    let sep = args.get(1).map(Value::render).unwrap_or_else(|| ",".to_string());
    let joined = match subject(args, "join")? {
        Value::List(items) => items
            .iter()
            .map(Value::render)
            .collect::<Vec<_>>()
            .join(&sep),
        Value::Map(entries) => entries
            .values()
            .map(Value::render)
            .collect::<Vec<_>>()
            .join(&sep),
        other => other.render(),
    };
    Ok(Value::Str(joined))
}

/// The value itself, or the fallback argument when it is empty.
fn default(args: &[Value]) -> Result<Value, RuntimeError> {
    let value = subject(args, "default")?;
    if value.is_empty() {
        Ok(args.get(1).cloned().unwrap_or(Value::Null))
    } else {
        Ok(value.clone())
    }
}

fn replace(args: &[Value]) -> Result<Value, RuntimeError> {
    let text = subject(args, "replace")?.render();
    let from = args
        .get(1)
        .ok_or_else(|| RuntimeError::new("Modifier 'replace' needs a search string"))?
        .render();
    let to = args.get(2).map(Value::render).unwrap_or_default();
    if from.is_empty() {
        return Ok(Value::Str(text));
    }
    Ok(Value::Str(text.replace(&from, &to)))
}

fn trim(args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Str(subject(args, "trim")?.render().trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_case_modifiers() {
        assert_eq!(
            upper(&[Value::Str("hi".into())]).unwrap(),
            Value::Str("HI".into())
        );
        assert_eq!(
            lower(&[Value::Str("Hi".into())]).unwrap(),
            Value::Str("hi".into())
        );
    }

    #[test]
    fn test_truncate() {
        assert_eq!(
            truncate(&[Value::Str("HELLO".into()), Value::Int(3)]).unwrap(),
            Value::Str("HEL...".into())
        );
        assert_eq!(
            truncate(&[
                Value::Str("HELLO".into()),
                Value::Int(3),
                Value::Str("!".into())
            ])
            .unwrap(),
            Value::Str("HEL!".into())
        );
        assert_eq!(
            truncate(&[Value::Str("HI".into()), Value::Int(5)]).unwrap(),
            Value::Str("HI".into())
        );
        assert!(truncate(&[Value::Str("x".into())]).is_err());
    }

    #[test]
    fn test_length() {
        assert_eq!(
            length(&[Value::List(vec![Value::Int(1), Value::Int(2)])]).unwrap(),
            Value::Int(2)
        );
        assert_eq!(length(&[Value::Str("abc".into())]).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_join() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(
            join(&[list, Value::Str("-".into())]).unwrap(),
            Value::Str("1-2".into())
        );
    }

    #[test]
    fn test_default() {
        assert_eq!(
            default(&[Value::Null, Value::Str("x".into())]).unwrap(),
            Value::Str("x".into())
        );
        assert_eq!(
            default(&[Value::Int(5), Value::Str("x".into())]).unwrap(),
            Value::Int(5)
        );
    }

    #[test]
    fn test_replace_and_trim() {
        assert_eq!(
            replace(&[
                Value::Str("a-b".into()),
                Value::Str("-".into()),
                Value::Str("+".into())
            ])
            .unwrap(),
            Value::Str("a+b".into())
        );
        assert_eq!(
            trim(&[Value::Str("  x  ".into())]).unwrap(),
            Value::Str("x".into())
        );
    }
}
