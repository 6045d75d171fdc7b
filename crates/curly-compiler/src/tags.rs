//! Standard tags.
//!
//! The block handlers behind `{if}`, `{foreach}` and `{macro}`, the
//! generic block-function adapter, and the `{include}` inline tag.
//! `install` registers them all on an engine.

use std::collections::BTreeMap;

use curly_lexer::{Cursor, TokenKind};
use curly_runtime::{Expr, Op};

use crate::engine::{Engine, TagDecl};
use crate::scope::{BlockCompiler, ScopeInfo};
use crate::template::{MacroDef, Template};
use crate::SyntaxError;

pub fn install(engine: &mut Engine) {
    engine.add_tag(
        "if",
        TagDecl::BlockCompiler {
            make: || Box::new(IfBlock::new()),
            owns: &["elseif", "else"],
        },
    );
    engine.add_tag(
        "foreach",
        TagDecl::BlockCompiler {
            make: || Box::new(ForeachBlock::new()),
            owns: &["foreachelse", "break", "continue"],
        },
    );
    engine.add_tag(
        "macro",
        TagDecl::BlockCompiler {
            make: || Box::new(MacroBlock::new()),
            owns: &[],
        },
    );
    engine.add_tag("include", TagDecl::InlineCompiler(include_tag));
}

/// `{if}` with `{elseif}` / `{else}` branches.
pub struct IfBlock {
    /// Condition of the branch currently collecting ops. `None` once
    /// `{else}` has been seen.
    cond: Option<Expr>,
    branches: Vec<(Expr, Vec<Op>)>,
}

impl IfBlock {
    pub fn new() -> Self {
        Self {
            cond: None,
            branches: Vec::new(),
        }
    }
}

impl Default for IfBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockCompiler for IfBlock {
    fn open(
        &mut self,
        _info: &mut ScopeInfo,
        tpl: &mut Template<'_>,
        tokens: &mut Cursor,
    ) -> Result<(), SyntaxError> {
        self.cond = Some(tpl.parse_exp_req(tokens)?);
        Ok(())
    }

    fn has_tag(&self, name: &str, depth: usize) -> bool {
        depth == 0 && matches!(name, "elseif" | "else")
    }

    fn tag(
        &mut self,
        name: &str,
        info: &mut ScopeInfo,
        tpl: &mut Template<'_>,
        tokens: &mut Cursor,
    ) -> Result<(), SyntaxError> {
        let body = tpl.drain_body(info.mark);
        match self.cond.take() {
            Some(cond) => self.branches.push((cond, body)),
            None => {
                return Err(SyntaxError::mismatch(format!(
                    "Tag '{name}' cannot follow 'else'"
                )))
            }
        }
        if name == "elseif" {
            self.cond = Some(tpl.parse_exp_req(tokens)?);
        }
        Ok(())
    }

    fn close(
        &mut self,
        info: &mut ScopeInfo,
        tpl: &mut Template<'_>,
        _tokens: &mut Cursor,
    ) -> Result<(), SyntaxError> {
        let body = tpl.drain_body(info.mark);
        let otherwise = match self.cond.take() {
            Some(cond) => {
                self.branches.push((cond, body));
                Vec::new()
            }
            None => body,
        };
        tpl.emit(Op::If {
            branches: std::mem::take(&mut self.branches),
            otherwise,
        });
        Ok(())
    }
}

/// `{foreach $over as $k => $v}` with `{foreachelse}`, `{break}` and
/// `{continue}`.
pub struct ForeachBlock {
    over: Option<Expr>,
    key: Option<String>,
    value: String,
    /// Loop body, captured when `{foreachelse}` splits it off.
    body: Option<Vec<Op>>,
}

impl ForeachBlock {
    pub fn new() -> Self {
        Self {
            over: None,
            key: None,
            value: String::new(),
            body: None,
        }
    }
}

impl Default for ForeachBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockCompiler for ForeachBlock {
    fn open(
        &mut self,
        _info: &mut ScopeInfo,
        tpl: &mut Template<'_>,
        tokens: &mut Cursor,
    ) -> Result<(), SyntaxError> {
        self.over = Some(tpl.parse_exp_req(tokens)?);
        let word = tokens.expect_ident()?;
        if word != "as" {
            return Err(SyntaxError::unexpected(format!(
                "Expected 'as', found '{word}'"
            )));
        }
        let first = tokens.expect_var()?;
        if tokens.eat(|k| *k == TokenKind::DoubleArrow) {
            self.key = Some(first);
            self.value = tokens.expect_var()?;
        } else {
            self.value = first;
        }
        Ok(())
    }

    fn has_tag(&self, name: &str, depth: usize) -> bool {
        match name {
            "foreachelse" => depth == 0 && self.body.is_none(),
            // Loop control works from any depth inside the loop.
            "break" | "continue" => true,
            _ => false,
        }
    }

    fn tag(
        &mut self,
        name: &str,
        info: &mut ScopeInfo,
        tpl: &mut Template<'_>,
        _tokens: &mut Cursor,
    ) -> Result<(), SyntaxError> {
        match name {
            "foreachelse" => self.body = Some(tpl.drain_body(info.mark)),
            "break" => tpl.emit(Op::Break),
            "continue" => tpl.emit(Op::Continue),
            _ => return Err(SyntaxError::unexpected(format!("Unexpected tag '{name}'"))),
        }
        Ok(())
    }

    fn close(
        &mut self,
        info: &mut ScopeInfo,
        tpl: &mut Template<'_>,
        _tokens: &mut Cursor,
    ) -> Result<(), SyntaxError> {
        let tail = tpl.drain_body(info.mark);
        let (body, otherwise) = match self.body.take() {
            Some(body) => (body, tail),
            None => (tail, Vec::new()),
        };
        let over = self
            .over
            .take()
            .ok_or_else(|| SyntaxError::unexpected("Foreach block never opened"))?;
        tpl.emit(Op::Foreach {
            key: self.key.take(),
            value: std::mem::take(&mut self.value),
            over,
            body,
            otherwise,
        });
        Ok(())
    }
}

/// `{macro name arg arg=default}`: registers the body in the template's
/// macro table and emits nothing.
pub struct MacroBlock {
    name: String,
    args: Vec<String>,
    defaults: BTreeMap<String, Expr>,
}

impl MacroBlock {
    pub fn new() -> Self {
        Self {
            name: String::new(),
            args: Vec::new(),
            defaults: BTreeMap::new(),
        }
    }
}

impl Default for MacroBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockCompiler for MacroBlock {
    fn open(
        &mut self,
        _info: &mut ScopeInfo,
        tpl: &mut Template<'_>,
        tokens: &mut Cursor,
    ) -> Result<(), SyntaxError> {
        self.name = tokens.expect_ident()?;
        while tokens.valid() {
            if tokens.eat(|k| *k == TokenKind::Comma) {
                continue;
            }
            let arg = tokens.expect_ident()?;
            if tokens.eat(|k| *k == TokenKind::Eq) {
                let default = tpl.parse_exp_req(tokens)?;
                self.defaults.insert(arg.clone(), default);
            }
            self.args.push(arg);
        }
        Ok(())
    }

    fn close(
        &mut self,
        info: &mut ScopeInfo,
        tpl: &mut Template<'_>,
        _tokens: &mut Cursor,
    ) -> Result<(), SyntaxError> {
        let body = tpl.drain_body(info.mark);
        tpl.register_macro(
            std::mem::take(&mut self.name),
            MacroDef {
                args: std::mem::take(&mut self.args),
                defaults: std::mem::take(&mut self.defaults),
                body,
            },
        );
        Ok(())
    }
}

/// Adapter compiling `{name args}...{/name}` into a call of a registered
/// template function with the body attached.
pub struct FuncBlock {
    function: String,
    params: Vec<(String, Expr)>,
}

impl FuncBlock {
    pub fn new(function: String) -> Self {
        Self {
            function,
            params: Vec::new(),
        }
    }
}

impl BlockCompiler for FuncBlock {
    fn open(
        &mut self,
        _info: &mut ScopeInfo,
        tpl: &mut Template<'_>,
        tokens: &mut Cursor,
    ) -> Result<(), SyntaxError> {
        self.params = tpl.parse_params(tokens, None)?.into_pairs();
        Ok(())
    }

    fn close(
        &mut self,
        info: &mut ScopeInfo,
        tpl: &mut Template<'_>,
        _tokens: &mut Cursor,
    ) -> Result<(), SyntaxError> {
        let body = tpl.drain_body(info.mark);
        tpl.emit(Op::FuncTag {
            name: std::mem::take(&mut self.function),
            params: std::mem::take(&mut self.params),
            body: Some(body),
        });
        Ok(())
    }
}

/// `{include 'name' var=value ...}`: compiles the named template now and
/// embeds the result.
pub fn include_tag(tpl: &mut Template<'_>, tokens: &mut Cursor) -> Result<(), SyntaxError> {
    let (_, fixed) = tpl.parse_first_arg(tokens)?;
    let name = fixed.ok_or_else(|| {
        SyntaxError::unexpected("Include needs a constant string template name")
    })?;
    let params = tpl.parse_params(tokens, None)?;
    let engine = tpl.engine;
    let program = Template::load(engine, &name)
        .and_then(Template::compile)
        .map_err(|err| SyntaxError::new(err.kind, err.message))?;
    tpl.add_depend(&program);
    tpl.emit(Op::Include {
        program: Box::new(program),
        vars: params.into_pairs(),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MapProvider;
    use crate::{CompileError, ErrorKind};
    use curly_runtime::{render, Context, Program, RuntimeError, Value};
    use pretty_assertions::assert_eq;

    fn compile(source: &str) -> Result<Program, CompileError> {
        let engine = Engine::new();
        Template::source(&engine, "test.tpl", source).compile()
    }

    fn render_with(source: &str, vars: &[(&str, Value)]) -> String {
        let engine = Engine::new();
        render_on(&engine, source, vars)
    }

    fn render_on(engine: &Engine, source: &str, vars: &[(&str, Value)]) -> String {
        let program = Template::source(engine, "test.tpl", source)
            .compile()
            .unwrap();
        let mut ctx = Context::new();
        for (name, value) in vars {
            ctx.set(*name, value.clone());
        }
        render(&program, engine.registry(), &mut ctx).unwrap()
    }

    fn list(items: &[i64]) -> Value {
        Value::List(items.iter().map(|&n| Value::Int(n)).collect())
    }

    #[test]
    fn test_if_else_chain() {
        let source = "{if $a}A{elseif $b}B{else}C{/if}";
        assert_eq!(render_with(source, &[("a", Value::Int(1))]), "A");
        assert_eq!(render_with(source, &[("b", Value::Int(1))]), "B");
        assert_eq!(render_with(source, &[]), "C");
    }

    #[test]
    fn test_if_without_else() {
        let source = "x{if $a}A{/if}y";
        assert_eq!(render_with(source, &[("a", Value::Int(1))]), "xAy");
        assert_eq!(render_with(source, &[]), "xy");
    }

    #[test]
    fn test_nested_if() {
        let source = "{if $a}{if $b}AB{else}A{/if}{/if}";
        assert_eq!(
            render_with(source, &[("a", Value::Int(1)), ("b", Value::Int(1))]),
            "AB"
        );
        assert_eq!(render_with(source, &[("a", Value::Int(1))]), "A");
    }

    #[test]
    fn test_elseif_after_else_is_error() {
        let err = compile("{if $a}A{else}B{elseif $c}C{/if}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Mismatch);
    }

    #[test]
    fn test_foreach_value() {
        assert_eq!(
            render_with(
                "{foreach $items as $v}{$v};{/foreach}",
                &[("items", list(&[1, 2, 3]))]
            ),
            "1;2;3;"
        );
    }

    #[test]
    fn test_foreach_key_value() {
        let mut map = std::collections::BTreeMap::new();
        map.insert("a".to_string(), Value::Int(1));
        map.insert("b".to_string(), Value::Int(2));
        assert_eq!(
            render_with(
                "{foreach $map as $k => $v}{$k}={$v};{/foreach}",
                &[("map", Value::Map(map))]
            ),
            "a=1;b=2;"
        );
    }

    #[test]
    fn test_foreachelse() {
        let source = "{foreach $items as $v}{$v}{foreachelse}none{/foreach}";
        assert_eq!(render_with(source, &[("items", list(&[7]))]), "7");
        assert_eq!(render_with(source, &[("items", list(&[]))]), "none");
        assert_eq!(render_with(source, &[]), "none");
    }

    #[test]
    fn test_break_and_continue() {
        assert_eq!(
            render_with(
                "{foreach $items as $v}{if $v == 2}{continue}{/if}{if $v > 3}{break}{/if}{$v}{/foreach}",
                &[("items", list(&[1, 2, 3, 4, 5]))]
            ),
            "13"
        );
    }

    #[test]
    fn test_break_outside_loop_is_error() {
        let err = compile("{break}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Mismatch);
        assert!(err.message.contains("foreach"));
    }

    #[test]
    fn test_foreach_requires_as() {
        let err = compile("{foreach $items in $v}{/foreach}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnexpectedToken);
    }

    #[test]
    fn test_macro_emits_nothing_at_definition() {
        let program = compile("{macro m a}{$a}{/macro}").unwrap();
        assert!(program.ops.is_empty());
    }

    #[test]
    fn test_include() {
        let mut engine = Engine::new();
        let mut provider = MapProvider::new();
        provider.add("inner.tpl", "[{$x}]", 42);
        engine.set_provider(None, Box::new(provider));
        let program = Template::source(&engine, "outer.tpl", "a{include 'inner.tpl' x=5}b")
            .compile()
            .unwrap();
        assert_eq!(
            program
                .depends
                .get("")
                .and_then(|names| names.get("inner.tpl")),
            Some(&42)
        );
        let mut ctx = Context::new();
        assert_eq!(
            render(&program, engine.registry(), &mut ctx).unwrap(),
            "a[5]b"
        );
    }

    #[test]
    fn test_include_bare_name() {
        let mut engine = Engine::new();
        let mut provider = MapProvider::new();
        provider.add("inner.tpl", "[{$x}]", 1);
        engine.set_provider(None, Box::new(provider));
        let program = Template::source(&engine, "outer.tpl", "{include inner.tpl x=5}")
            .compile()
            .unwrap();
        let mut ctx = Context::new();
        assert_eq!(render(&program, engine.registry(), &mut ctx).unwrap(), "[5]");
    }

    #[test]
    fn test_include_needs_static_name() {
        let mut engine = Engine::new();
        engine.set_provider(None, Box::new(MapProvider::new()));
        let err = Template::source(&engine, "outer.tpl", "{include $name}")
            .compile()
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnexpectedToken);
    }

    #[test]
    fn test_include_missing_template() {
        let mut engine = Engine::new();
        engine.set_provider(None, Box::new(MapProvider::new()));
        let err = Template::source(&engine, "outer.tpl", "{include 'nope.tpl'}")
            .compile()
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownIdentifier);
    }

    fn wrap(
        params: &BTreeMap<String, Value>,
        body: Option<&str>,
    ) -> Result<Value, RuntimeError> {
        let tag = params
            .get("tag")
            .cloned()
            .unwrap_or_else(|| Value::Str("div".into()))
            .render();
        Ok(Value::Str(format!(
            "<{tag}>{}</{tag}>",
            body.unwrap_or("")
        )))
    }

    #[test]
    fn test_block_function() {
        let mut engine = Engine::new();
        engine.registry_mut().add_tag_function("wrap", wrap);
        engine.add_tag(
            "wrap",
            TagDecl::BlockFunction {
                function: "wrap".into(),
            },
        );
        assert_eq!(
            render_on(
                &engine,
                "{wrap tag='b'}hi {$name}{/wrap}",
                &[("name", Value::Str("x".into()))]
            ),
            "<b>hi x</b>"
        );
    }

    #[test]
    fn test_inline_function() {
        fn stamp(
            params: &BTreeMap<String, Value>,
            body: Option<&str>,
        ) -> Result<Value, RuntimeError> {
            assert!(body.is_none());
            Ok(params.get("n").cloned().unwrap_or(Value::Null))
        }
        let mut engine = Engine::new();
        engine.registry_mut().add_tag_function("stamp", stamp);
        engine.add_tag(
            "stamp",
            TagDecl::InlineFunction {
                function: "stamp".into(),
            },
        );
        assert_eq!(render_on(&engine, "{stamp n=3}", &[]), "3");
    }
}
