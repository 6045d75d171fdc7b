//! Program interpreter.
//!
//! Walks a compiled `Program` op by op against a `Context`, appending
//! rendered text to an output buffer. Loop control travels back up as a
//! `Flow` result instead of unwinding.

use std::collections::BTreeMap;

use crate::program::{Access, AssignOp, BinaryOp, Expr, Op, Program, UnaryOp, VarRef};
use crate::value::{Num, Value};
use crate::{Context, Registry, RuntimeError};

/// Render a compiled template against a context.
pub fn render(
    program: &Program,
    registry: &Registry,
    ctx: &mut Context,
) -> Result<String, RuntimeError> {
    let renderer = Renderer { registry };
    let mut out = String::new();
    renderer.run(&program.ops, ctx, &mut out)?;
    Ok(out)
}

enum Flow {
    Normal,
    Break,
    Continue,
}

struct Renderer<'a> {
    registry: &'a Registry,
}

impl Renderer<'_> {
    fn run(&self, ops: &[Op], ctx: &mut Context, out: &mut String) -> Result<Flow, RuntimeError> {
        for op in ops {
            match op {
                Op::Text(text) => out.push_str(text),
                Op::Echo(expr) => {
                    let value = self.eval(expr, ctx)?;
                    out.push_str(&value.render());
                }
                Op::Stmt(expr) => {
                    self.eval(expr, ctx)?;
                }
                Op::If {
                    branches,
                    otherwise,
                } => {
                    let mut taken = false;
                    for (cond, body) in branches {
                        if self.eval(cond, ctx)?.truthy() {
                            match self.run(body, ctx, out)? {
                                Flow::Normal => {}
                                flow => return Ok(flow),
                            }
                            taken = true;
                            break;
                        }
                    }
                    if !taken {
                        match self.run(otherwise, ctx, out)? {
                            Flow::Normal => {}
                            flow => return Ok(flow),
                        }
                    }
                }
                Op::Foreach {
                    key,
                    value,
                    over,
                    body,
                    otherwise,
                } => {
                    let subject = self.eval(over, ctx)?;
                    let entries: Vec<(Value, Value)> = match subject {
                        Value::List(items) => items
                            .into_iter()
                            .enumerate()
                            .map(|(i, v)| (Value::Int(i as i64), v))
                            .collect(),
                        Value::Map(map) => {
                            map.into_iter().map(|(k, v)| (Value::Str(k), v)).collect()
                        }
                        _ => Vec::new(),
                    };
                    if entries.is_empty() {
                        match self.run(otherwise, ctx, out)? {
                            Flow::Normal => {}
                            flow => return Ok(flow),
                        }
                    } else {
                        for (k, v) in entries {
                            if let Some(key_name) = key {
                                ctx.set(key_name.clone(), k);
                            }
                            ctx.set(value.clone(), v);
                            match self.run(body, ctx, out)? {
                                Flow::Normal | Flow::Continue => {}
                                Flow::Break => break,
                            }
                        }
                    }
                }
                Op::Break => return Ok(Flow::Break),
                Op::Continue => return Ok(Flow::Continue),
                Op::Scoped { vars, body } => {
                    // Bindings evaluate in the caller's scope; the body
                    // runs against a fresh one and cannot write back.
                    let mut scope = Context::new();
                    for (name, expr) in vars {
                        let value = self.eval(expr, ctx)?;
                        scope.set(name.clone(), value);
                    }
                    self.run(body, &mut scope, out)?;
                }
                Op::Include { program, vars } => {
                    let mut scope = ctx.clone();
                    for (name, expr) in vars {
                        let value = self.eval(expr, ctx)?;
                        scope.set(name.clone(), value);
                    }
                    self.run(&program.ops, &mut scope, out)?;
                }
                Op::FuncTag { name, params, body } => {
                    let function = self.registry.tag_function(name).ok_or_else(|| {
                        RuntimeError::new(format!("Unknown template function '{name}'"))
                    })?;
                    let mut named = BTreeMap::new();
                    for (name, expr) in params {
                        named.insert(name.clone(), self.eval(expr, ctx)?);
                    }
                    let rendered = match body {
                        Some(ops) => {
                            let mut buffer = String::new();
                            self.run(ops, ctx, &mut buffer)?;
                            Some(buffer)
                        }
                        None => None,
                    };
                    let value = function(&named, rendered.as_deref())?;
                    out.push_str(&value.render());
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn eval(&self, expr: &Expr, ctx: &mut Context) -> Result<Value, RuntimeError> {
        Ok(match expr {
            Expr::Null => Value::Null,
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Int(n) => Value::Int(*n),
            Expr::Float(n) => Value::Float(*n),
            Expr::Str(s) => Value::Str(s.clone()),
            Expr::Const(name) => self
                .registry
                .constant(name)
                .cloned()
                .ok_or_else(|| RuntimeError::new(format!("Undefined constant '{name}'")))?,
            Expr::Var(var) => self.read_var(var, ctx)?,
            Expr::Concat(parts) => {
                let mut text = String::new();
                for part in parts {
                    text.push_str(&self.eval(part, ctx)?.render());
                }
                Value::Str(text)
            }
            Expr::Array(entries) => self.build_array(entries, ctx)?,
            Expr::Unary { op, expr } => {
                let value = self.eval(expr, ctx)?;
                match op {
                    UnaryOp::Not => Value::Bool(!value.truthy()),
                    UnaryOp::Neg => value.neg()?,
                }
            }
            Expr::Binary { op, left, right } => match op {
                BinaryOp::And => {
                    if !self.eval(left, ctx)?.truthy() {
                        Value::Bool(false)
                    } else {
                        Value::Bool(self.eval(right, ctx)?.truthy())
                    }
                }
                BinaryOp::Or => {
                    if self.eval(left, ctx)?.truthy() {
                        Value::Bool(true)
                    } else {
                        Value::Bool(self.eval(right, ctx)?.truthy())
                    }
                }
                _ => {
                    let l = self.eval(left, ctx)?;
                    let r = self.eval(right, ctx)?;
                    match op {
                        BinaryOp::Add => l.add(&r),
                        BinaryOp::Sub => l.sub(&r)?,
                        BinaryOp::Mul => l.mul(&r)?,
                        BinaryOp::Div => l.div(&r)?,
                        BinaryOp::Mod => l.rem(&r)?,
                        BinaryOp::Eq => Value::Bool(l.loose_eq(&r)),
                        BinaryOp::Ne => Value::Bool(!l.loose_eq(&r)),
                        BinaryOp::Lt => Value::Bool(l.loose_cmp(&r).is_lt()),
                        BinaryOp::Gt => Value::Bool(l.loose_cmp(&r).is_gt()),
                        BinaryOp::Le => Value::Bool(l.loose_cmp(&r).is_le()),
                        BinaryOp::Ge => Value::Bool(l.loose_cmp(&r).is_ge()),
                        // Short-circuit forms are handled above.
                        BinaryOp::And => Value::Bool(l.truthy() && r.truthy()),
                        BinaryOp::Or => Value::Bool(l.truthy() || r.truthy()),
                    }
                }
            },
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond, ctx)?.truthy() {
                    self.eval(then, ctx)?
                } else {
                    self.eval(otherwise, ctx)?
                }
            }
            Expr::Isset(subjects) => {
                let mut all = true;
                for subject in subjects {
                    let set = match subject {
                        Expr::Var(var) => self.var_isset(var, ctx)?,
                        other => self.eval(other, ctx)? != Value::Null,
                    };
                    if !set {
                        all = false;
                        break;
                    }
                }
                Value::Bool(all)
            }
            Expr::Empty(subjects) => {
                let mut all = true;
                for subject in subjects {
                    if !self.eval(subject, ctx)?.is_empty() {
                        all = false;
                        break;
                    }
                }
                Value::Bool(all)
            }
            Expr::Step { var, decr, postfix } => {
                let step = if *decr { Value::Int(-1) } else { Value::Int(1) };
                let postfix = *postfix;
                self.write_var(var, ctx, |slot| {
                    let old = slot.clone();
                    *slot = old.add(&step);
                    Ok(if postfix { old } else { slot.clone() })
                })?
            }
            Expr::Assign { var, op, value } => {
                let value = self.eval(value, ctx)?;
                let op = *op;
                self.write_var(var, ctx, |slot| {
                    *slot = match op {
                        AssignOp::Assign => value,
                        AssignOp::Add => slot.add(&value),
                        AssignOp::Sub => slot.sub(&value)?,
                        AssignOp::Mul => slot.mul(&value)?,
                        AssignOp::Div => slot.div(&value)?,
                    };
                    Ok(slot.clone())
                })?
            }
            Expr::Call { name, args } => {
                let function = self
                    .registry
                    .modifier(name)
                    .ok_or_else(|| RuntimeError::new(format!("Unknown modifier '{name}'")))?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, ctx)?);
                }
                function(&values)?
            }
        })
    }

    fn read_var(&self, var: &VarRef, ctx: &mut Context) -> Result<Value, RuntimeError> {
        let mut current = ctx.get(&var.name).cloned().unwrap_or(Value::Null);
        for access in &var.path {
            current = match access {
                Access::Index(key) => {
                    let key = self.eval(key, ctx)?;
                    current.index(&key)
                }
                Access::Prop(name) => current.index(&Value::Str(name.clone())),
                Access::Method { name, args } => self.call_method(current, name, args, ctx)?,
            };
        }
        Ok(current)
    }

    /// Methods dispatch through the modifier table with the receiver as
    /// the first argument.
    fn call_method(
        &self,
        receiver: Value,
        name: &str,
        args: &[Expr],
        ctx: &mut Context,
    ) -> Result<Value, RuntimeError> {
        let function = self
            .registry
            .modifier(name)
            .ok_or_else(|| RuntimeError::new(format!("Unknown method '{name}'")))?;
        let mut values = Vec::with_capacity(args.len() + 1);
        values.push(receiver);
        for arg in args {
            values.push(self.eval(arg, ctx)?);
        }
        function(&values)
    }

    fn var_isset(&self, var: &VarRef, ctx: &mut Context) -> Result<bool, RuntimeError> {
        if var.path.is_empty() {
            return Ok(ctx.has(&var.name));
        }
        let mut current = match ctx.get(&var.name) {
            Some(value) => value.clone(),
            None => return Ok(false),
        };
        let mut path = var.path.iter().peekable();
        while let Some(access) = path.next() {
            let last = path.peek().is_none();
            match access {
                Access::Index(key) => {
                    let key = self.eval(key, ctx)?;
                    if last {
                        return Ok(current.has_index(&key));
                    }
                    current = current.index(&key);
                }
                Access::Prop(name) => {
                    let key = Value::Str(name.clone());
                    if last {
                        return Ok(current.has_index(&key));
                    }
                    current = current.index(&key);
                }
                Access::Method { name, args } => {
                    current = self.call_method(current, name, args, ctx)?;
                }
            }
        }
        Ok(current != Value::Null)
    }

    /// Resolve the slot a variable reference points at, creating
    /// intermediate containers, and apply `mutate` to it.
    fn write_var(
        &self,
        var: &VarRef,
        ctx: &mut Context,
        mutate: impl FnOnce(&mut Value) -> Result<Value, RuntimeError>,
    ) -> Result<Value, RuntimeError> {
        let mut keys = Vec::with_capacity(var.path.len());
        for access in &var.path {
            match access {
                Access::Index(key) => keys.push(self.eval(key, ctx)?),
                Access::Prop(name) => keys.push(Value::Str(name.clone())),
                Access::Method { name, .. } => {
                    return Err(RuntimeError::new(format!(
                        "Cannot assign through method call '{name}'"
                    )))
                }
            }
        }
        let mut slot = ctx.slot(&var.name);
        for key in &keys {
            slot = slot.slot(key);
        }
        mutate(slot)
    }

    fn build_array(
        &self,
        entries: &[(Option<Expr>, Expr)],
        ctx: &mut Context,
    ) -> Result<Value, RuntimeError> {
        if entries.iter().all(|(key, _)| key.is_none()) {
            let mut items = Vec::with_capacity(entries.len());
            for (_, expr) in entries {
                items.push(self.eval(expr, ctx)?);
            }
            return Ok(Value::List(items));
        }
        let mut map = BTreeMap::new();
        let mut next_index = 0i64;
        for (key, expr) in entries {
            let key = match key {
                Some(key_expr) => {
                    let value = self.eval(key_expr, ctx)?;
                    if let Some(Num::Int(n)) = value.as_num() {
                        next_index = next_index.max(n + 1);
                    }
                    value.render()
                }
                None => {
                    let index = next_index.to_string();
                    next_index += 1;
                    index
                }
            };
            map.insert(key, self.eval(expr, ctx)?);
        }
        Ok(Value::Map(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn program(ops: Vec<Op>) -> Program {
        Program {
            name: "test.tpl".into(),
            scm: None,
            base_name: "test.tpl".into(),
            time: 0,
            depends: BTreeMap::new(),
            ops,
        }
    }

    fn var(name: &str) -> Expr {
        Expr::Var(VarRef::bare(name))
    }

    #[test]
    fn test_text_and_echo() {
        let prog = program(vec![
            Op::Text("Hello ".into()),
            Op::Echo(var("name")),
            Op::Text("!".into()),
        ]);
        let registry = Registry::new();
        let mut ctx = Context::new();
        ctx.set("name", Value::Str("World".into()));
        assert_eq!(render(&prog, &registry, &mut ctx).unwrap(), "Hello World!");
    }

    #[test]
    fn test_if_branches() {
        let prog = program(vec![Op::If {
            branches: vec![
                (var("a"), vec![Op::Text("A".into())]),
                (var("b"), vec![Op::Text("B".into())]),
            ],
            otherwise: vec![Op::Text("C".into())],
        }]);
        let registry = Registry::new();
        let mut ctx = Context::new();
        ctx.set("b", Value::Bool(true));
        assert_eq!(render(&prog, &registry, &mut ctx).unwrap(), "B");
        let mut empty = Context::new();
        assert_eq!(render(&prog, &registry, &mut empty).unwrap(), "C");
    }

    #[test]
    fn test_foreach_with_break() {
        let prog = program(vec![Op::Foreach {
            key: None,
            value: "item".into(),
            over: var("items"),
            body: vec![
                Op::If {
                    branches: vec![(
                        Expr::Binary {
                            op: BinaryOp::Gt,
                            left: Box::new(var("item")),
                            right: Box::new(Expr::Int(2)),
                        },
                        vec![Op::Break],
                    )],
                    otherwise: vec![],
                },
                Op::Echo(var("item")),
            ],
            otherwise: vec![Op::Text("none".into())],
        }]);
        let registry = Registry::new();
        let mut ctx = Context::new();
        ctx.set(
            "items",
            Value::List(vec![
                Value::Int(1),
                Value::Int(2),
                Value::Int(3),
                Value::Int(1),
            ]),
        );
        assert_eq!(render(&prog, &registry, &mut ctx).unwrap(), "12");
        let mut empty = Context::new();
        assert_eq!(render(&prog, &registry, &mut empty).unwrap(), "none");
    }

    #[test]
    fn test_scoped_isolation() {
        // The scope sees only its own bindings and writes stay inside.
        let prog = program(vec![
            Op::Scoped {
                vars: vec![("x".into(), Expr::Str("inner".into()))],
                body: vec![
                    Op::Echo(var("x")),
                    Op::Echo(var("outer_only")),
                    Op::Stmt(Expr::Assign {
                        var: VarRef::bare("x"),
                        op: AssignOp::Assign,
                        value: Box::new(Expr::Str("changed".into())),
                    }),
                ],
            },
            Op::Echo(var("x")),
        ]);
        let registry = Registry::new();
        let mut ctx = Context::new();
        ctx.set("x", Value::Str("outer".into()));
        ctx.set("outer_only", Value::Str("hidden".into()));
        assert_eq!(render(&prog, &registry, &mut ctx).unwrap(), "innerouter");
        assert_eq!(ctx.get("x"), Some(&Value::Str("outer".into())));
    }

    #[test]
    fn test_include_copies_scope() {
        let inner = program(vec![
            Op::Echo(var("x")),
            Op::Stmt(Expr::Assign {
                var: VarRef::bare("x"),
                op: AssignOp::Assign,
                value: Box::new(Expr::Int(9)),
            }),
        ]);
        let prog = program(vec![
            Op::Include {
                program: Box::new(inner),
                vars: vec![("x".into(), Expr::Int(5))],
            },
            Op::Echo(var("x")),
        ]);
        let registry = Registry::new();
        let mut ctx = Context::new();
        ctx.set("x", Value::Int(1));
        assert_eq!(render(&prog, &registry, &mut ctx).unwrap(), "51");
    }

    #[test]
    fn test_assignment_and_steps() {
        let prog = program(vec![
            Op::Stmt(Expr::Assign {
                var: VarRef::bare("n"),
                op: AssignOp::Assign,
                value: Box::new(Expr::Int(4)),
            }),
            Op::Echo(Expr::Step {
                var: VarRef::bare("n"),
                decr: false,
                postfix: true,
            }),
            Op::Echo(Expr::Step {
                var: VarRef::bare("n"),
                decr: false,
                postfix: false,
            }),
        ]);
        let registry = Registry::new();
        let mut ctx = Context::new();
        assert_eq!(render(&prog, &registry, &mut ctx).unwrap(), "46");
        assert_eq!(ctx.get("n"), Some(&Value::Int(6)));
    }

    #[test]
    fn test_nested_path_read_and_write() {
        let prog = program(vec![
            Op::Stmt(Expr::Assign {
                var: VarRef {
                    name: "a".into(),
                    path: vec![
                        Access::Index(Expr::Str("b".into())),
                        Access::Index(Expr::Str("c".into())),
                    ],
                },
                op: AssignOp::Assign,
                value: Box::new(Expr::Int(7)),
            }),
            Op::Echo(Expr::Var(VarRef {
                name: "a".into(),
                path: vec![
                    Access::Index(Expr::Str("b".into())),
                    Access::Prop("c".into()),
                ],
            })),
        ]);
        let registry = Registry::new();
        let mut ctx = Context::new();
        assert_eq!(render(&prog, &registry, &mut ctx).unwrap(), "7");
    }

    #[test]
    fn test_method_calls_modifier() {
        let prog = program(vec![Op::Echo(Expr::Var(VarRef {
            name: "s".into(),
            path: vec![Access::Method {
                name: "upper".into(),
                args: vec![],
            }],
        }))]);
        let registry = Registry::with_builtins();
        let mut ctx = Context::new();
        ctx.set("s", Value::Str("hi".into()));
        assert_eq!(render(&prog, &registry, &mut ctx).unwrap(), "HI");
    }

    #[test]
    fn test_isset_and_empty() {
        let registry = Registry::new();
        let mut ctx = Context::new();
        ctx.set("set", Value::Int(0));
        ctx.set("null", Value::Null);
        let prog = program(vec![
            Op::Echo(Expr::Isset(vec![var("set")])),
            Op::Echo(Expr::Isset(vec![var("missing")])),
            Op::Echo(Expr::Isset(vec![var("null")])),
            Op::Echo(Expr::Empty(vec![var("set")])),
        ]);
        // "1" for isset($set), "" for the missing and null names, "1"
        // for empty($set)
        assert_eq!(render(&prog, &registry, &mut ctx).unwrap(), "11");
    }

    #[test]
    fn test_unknown_constant_fails() {
        let prog = program(vec![Op::Echo(Expr::Const("VERSION".into()))]);
        let registry = Registry::new();
        let mut ctx = Context::new();
        let err = render(&prog, &registry, &mut ctx).unwrap_err();
        assert!(err.message.contains("VERSION"));
    }
}
