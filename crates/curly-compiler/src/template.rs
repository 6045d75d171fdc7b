//! One template compilation.
//!
//! `Template` owns the source for the duration of a compile: the
//! scanner walks it splitting literal text from `{...}` directives, the
//! tag router classifies each directive and dispatches into the parsers
//! (`expr`) and block handlers (`tags`), and `compile` finishes the
//! pass into a `Program`.

use std::collections::BTreeMap;

use curly_lexer::{Cursor, TokenKind};
use curly_runtime::{Expr, Op, Program};

use crate::engine::{Engine, TagDecl};
use crate::scope::{BlockCompiler, Scope, ScopeInfo};
use crate::{CompileError, ErrorKind, SyntaxError};

/// A registered macro: parameter names, per-name defaults, compiled
/// body. Fixed once registered.
#[derive(Debug, Clone)]
pub struct MacroDef {
    pub args: Vec<String>,
    pub defaults: BTreeMap<String, Expr>,
    pub body: Vec<Op>,
}

pub struct Template<'e> {
    pub(crate) engine: &'e Engine,
    pub name: String,
    scm: Option<String>,
    base_name: String,
    source: Vec<char>,
    /// Scan position, advanced past each consumed directive. String
    /// refills read from here.
    pos: usize,
    pub(crate) line: usize,
    time: u64,
    pub(crate) ops: Vec<Op>,
    scopes: Vec<Scope>,
    macros: BTreeMap<String, MacroDef>,
    depends: BTreeMap<String, BTreeMap<String, u64>>,
    post_hooks: Vec<fn(&mut Vec<Op>)>,
    ignore: bool,
    pub(crate) nesting: usize,
}

fn split_name(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((scm, base)) if !scm.is_empty() => (Some(scm), base),
        _ => (None, name),
    }
}

impl<'e> Template<'e> {
    /// A template from source text already in hand.
    pub fn source(engine: &'e Engine, name: &str, source: &str) -> Self {
        let (scm, base_name) = split_name(name);
        Self {
            engine,
            name: name.to_string(),
            scm: scm.map(String::from),
            base_name: base_name.to_string(),
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            time: 0,
            ops: Vec::new(),
            scopes: Vec::new(),
            macros: BTreeMap::new(),
            depends: BTreeMap::new(),
            post_hooks: Vec::new(),
            ignore: false,
            nesting: 0,
        }
    }

    /// A template loaded through the engine's provider for its scheme.
    pub fn load(engine: &'e Engine, name: &str) -> Result<Self, CompileError> {
        let (scm, base_name) = split_name(name);
        let provider = engine.provider(scm).ok_or_else(|| CompileError {
            kind: ErrorKind::UnknownIdentifier,
            message: match scm {
                Some(scm) => format!("No provider for scheme '{scm}'"),
                None => "No default template provider configured".to_string(),
            },
            name: name.to_string(),
            line: 1,
        })?;
        let (source, time) = provider.source(base_name).map_err(|err| CompileError {
            kind: err.kind,
            message: err.message,
            name: name.to_string(),
            line: 1,
        })?;
        let mut template = Self::source(engine, name, &source);
        template.time = time;
        Ok(template)
    }

    /// Run registered hooks over the finished op buffer, after scopes
    /// close.
    pub fn add_post_compile(&mut self, hook: fn(&mut Vec<Op>)) {
        self.post_hooks.push(hook);
    }

    pub fn compile(mut self) -> Result<Program, CompileError> {
        if let Err(err) = self.scan() {
            return Err(self.fail(err));
        }
        if !self.scopes.is_empty() {
            let frames: Vec<String> = self
                .scopes
                .iter()
                .map(|s| format!("'{}' opened on line {}", s.info.name, s.info.line))
                .collect();
            let line = self.scopes[0].info.line;
            return Err(CompileError {
                kind: ErrorKind::Mismatch,
                message: format!("Unclosed tag(s): {}", frames.join(", ")),
                name: self.name,
                line,
            });
        }
        for hook in &self.post_hooks {
            hook(&mut self.ops);
        }
        Ok(Program {
            name: self.name,
            scm: self.scm,
            base_name: self.base_name,
            time: self.time,
            depends: self.depends,
            ops: self.ops,
        })
    }

    fn fail(&self, err: SyntaxError) -> CompileError {
        CompileError {
            kind: err.kind,
            message: err.message,
            name: self.name.clone(),
            line: self.line,
        }
    }

    // ----- scanner ---------------------------------------------------

    fn scan(&mut self) -> Result<(), SyntaxError> {
        let mut frag_start = 0usize;
        let mut scan = 0usize;
        while let Some(start) = self.find_char('{', scan) {
            if self.ignore {
                if let Some(end) = self.find_char('}', start + 1) {
                    let body: String = self.source[start + 1..end].iter().collect();
                    if body.trim() == "/ignore" {
                        self.flush_text(frag_start, start, false);
                        self.ignore = false;
                        self.line += body.matches('\n').count();
                        scan = end + 1;
                        frag_start = scan;
                        continue;
                    }
                }
                scan = start + 1;
                continue;
            }
            let next = self.source.get(start + 1).copied();
            let literal_brace = match next {
                None => true,
                Some(c) => c.is_whitespace() || c == '}',
            };
            if literal_brace {
                // Not a directive; the text run flows through it.
                scan = start + 1;
                continue;
            }
            if next == Some('*') {
                self.flush_text(frag_start, start, false);
                let close = self
                    .find_seq("*}", start + 2)
                    .ok_or_else(|| SyntaxError::unterminated("Unclosed comment"))?;
                self.count_lines(start, close + 2);
                scan = close + 2;
                frag_start = scan;
                continue;
            }
            let end = match self.find_char('}', start + 1) {
                Some(end) => end,
                None => {
                    // Count the pending text so the error cites the line
                    // the tag starts on.
                    self.count_lines(frag_start, start);
                    return Err(SyntaxError::unterminated("Unclosed tag: expected '}'"));
                }
            };
            let mut body: String = self.source[start + 1..end].iter().collect();
            let trim = body.ends_with('-');
            if trim {
                body.pop();
            }
            self.flush_text(frag_start, start, trim);
            self.pos = end + 1;
            if body.trim() == "ignore" {
                self.ignore = true;
            } else {
                let mut tokens = Cursor::new(&body)?;
                self.route(&mut tokens)?;
            }
            self.line += body.matches('\n').count();
            scan = self.pos;
            frag_start = scan;
        }
        let len = self.source.len();
        self.flush_text(frag_start, len, false);
        Ok(())
    }

    fn find_char(&self, needle: char, from: usize) -> Option<usize> {
        self.source[from.min(self.source.len())..]
            .iter()
            .position(|&c| c == needle)
            .map(|i| from + i)
    }

    fn find_seq(&self, needle: &str, from: usize) -> Option<usize> {
        let pattern: Vec<char> = needle.chars().collect();
        let mut at = from;
        while at + pattern.len() <= self.source.len() {
            if self.source[at..at + pattern.len()] == pattern[..] {
                return Some(at);
            }
            at += 1;
        }
        None
    }

    fn count_lines(&mut self, from: usize, to: usize) {
        self.line += self.source[from.min(to)..to.min(self.source.len())]
            .iter()
            .filter(|&&c| c == '\n')
            .count();
    }

    /// Append a literal run, merging into a preceding text op. Runs
    /// never merge across the innermost open block's mark, so a block
    /// body keeps its own ops.
    fn flush_text(&mut self, from: usize, to: usize, trim: bool) {
        if from >= to {
            return;
        }
        let mut text: String = self.source[from..to].iter().collect();
        self.line += text.matches('\n').count();
        if trim {
            text.truncate(text.trim_end().len());
        }
        if text.is_empty() {
            return;
        }
        let barrier = self.scopes.last().map(|s| s.info.mark).unwrap_or(0);
        if self.ops.len() > barrier {
            if let Some(Op::Text(prev)) = self.ops.last_mut() {
                prev.push_str(&text);
                return;
            }
        }
        self.ops.push(Op::Text(text));
    }

    /// More raw source for an under-scanned string: everything from the
    /// current scan position up to the first `}` after the next `quote`,
    /// exclusive. Advances the scan position past that `}`.
    pub(crate) fn more_substr(&mut self, quote: char) -> Option<String> {
        let next_quote = self.find_char(quote, self.pos)?;
        let end = self.find_char('}', next_quote)?;
        let fragment: String = self.source[self.pos..end].iter().collect();
        self.line += fragment.matches('\n').count();
        self.pos = end + 1;
        Some(fragment)
    }

    // ----- op buffer -------------------------------------------------

    pub(crate) fn emit(&mut self, op: Op) {
        self.ops.push(op);
    }

    /// Take every op emitted since `mark` (a block body).
    pub(crate) fn drain_body(&mut self, mark: usize) -> Vec<Op> {
        self.ops.split_off(mark)
    }

    // ----- macro table -----------------------------------------------

    /// Register a macro under a fixed name. Hosts may call this before
    /// `compile` to provide macros the source itself does not define,
    /// including namespaced names such as `ns.m`.
    pub fn register_macro(&mut self, name: String, def: MacroDef) {
        self.macros.insert(name, def);
    }

    /// Record that this template incorporates another compiled one.
    pub fn add_depend(&mut self, program: &Program) {
        self.depends
            .entry(program.scm.clone().unwrap_or_default())
            .or_default()
            .insert(program.base_name.clone(), program.time);
    }

    // ----- tag router ------------------------------------------------

    pub(crate) fn route(&mut self, tokens: &mut Cursor) -> Result<(), SyntaxError> {
        let first = match tokens.kind() {
            Some(kind) => kind.clone(),
            None => return Err(SyntaxError::unexpected("Empty tag")),
        };
        match first {
            TokenKind::Slash => {
                tokens.next();
                let name = tokens.expect_ident()?;
                self.close_block(&name, tokens)?;
            }
            TokenKind::Ident(_) if !first.is_special_val() => self.parse_act(tokens)?,
            _ => {
                // Every expression tag echoes its value, assignments
                // and steps included.
                let expr = self.parse_exp_req(tokens)?;
                self.emit(Op::Echo(expr));
            }
        }
        if tokens.valid() {
            return Err(SyntaxError::unexpected(format!(
                "Unexpected token '{}'",
                tokens.snippet()
            )));
        }
        Ok(())
    }

    fn parse_act(&mut self, tokens: &mut Cursor) -> Result<(), SyntaxError> {
        let name = tokens.expect_ident()?;
        match tokens.kind() {
            Some(TokenKind::LParen) => {
                // Function-call syntax compiles as a plain expression.
                tokens.back();
                let expr = self.parse_exp_req(tokens)?;
                self.emit(Op::Echo(expr));
                return Ok(());
            }
            Some(TokenKind::Dot) => {
                tokens.next();
                let sub = tokens.expect_ident()?;
                // `macro.x` strips the prefix; any other prefix is a
                // namespace qualifier kept in the lookup key.
                let macro_name = if name == "macro" {
                    sub
                } else {
                    format!("{name}.{sub}")
                };
                return self.expand_macro(&macro_name, tokens);
            }
            _ => {}
        }
        let engine = self.engine;
        match engine.function(&name) {
            Some(TagDecl::BlockCompiler { make, .. }) => {
                let mut info = ScopeInfo {
                    name: name.clone(),
                    line: self.line,
                    depth: self.scopes.len(),
                    mark: self.ops.len(),
                };
                let mut compiler = make();
                compiler.open(&mut info, self, tokens)?;
                self.scopes.push(Scope { info, compiler });
            }
            Some(TagDecl::InlineCompiler(handler)) => {
                let handler = *handler;
                handler(self, tokens)?;
            }
            Some(TagDecl::InlineFunction { function }) => {
                let function = function.clone();
                let params = self.parse_params(tokens, None)?;
                self.emit(Op::FuncTag {
                    name: function,
                    params: params.into_pairs(),
                    body: None,
                });
            }
            Some(TagDecl::BlockFunction { function }) => {
                let function = function.clone();
                let mut info = ScopeInfo {
                    name: name.clone(),
                    line: self.line,
                    depth: self.scopes.len(),
                    mark: self.ops.len(),
                };
                let mut compiler: Box<dyn BlockCompiler> =
                    Box::new(crate::tags::FuncBlock::new(function));
                compiler.open(&mut info, self, tokens)?;
                self.scopes.push(Scope { info, compiler });
            }
            None => self.owned_tag(&name, tokens)?,
        }
        Ok(())
    }

    /// Route an unregistered tag to the innermost open block that owns
    /// it.
    fn owned_tag(&mut self, name: &str, tokens: &mut Cursor) -> Result<(), SyntaxError> {
        let top = self.scopes.len();
        for idx in (0..top).rev() {
            let depth = top - 1 - idx;
            if self.scopes[idx].compiler.has_tag(name, depth) {
                let mut scope = self.scopes.remove(idx);
                let result = scope.compiler.tag(name, &mut scope.info, self, tokens);
                self.scopes.insert(idx, scope);
                return result;
            }
        }
        let owners = self.engine.tag_owners(name);
        if owners.is_empty() {
            Err(SyntaxError::unknown(format!("Unexpected tag '{name}'")))
        } else {
            Err(SyntaxError::mismatch(format!(
                "Tag '{name}' can be used only within: {}",
                owners.join(", ")
            )))
        }
    }

    fn close_block(&mut self, name: &str, tokens: &mut Cursor) -> Result<(), SyntaxError> {
        let mut scope = match self.scopes.pop() {
            Some(scope) => scope,
            None => {
                return Err(SyntaxError::mismatch(format!(
                    "Unexpected closing of the tag '{name}'"
                )))
            }
        };
        if scope.info.name != name {
            return Err(SyntaxError::mismatch(format!(
                "Unexpected closing of the tag '{name}' (expecting closing of the tag '{}', opened on line {})",
                scope.info.name, scope.info.line
            )));
        }
        scope.compiler.close(&mut scope.info, self, tokens)
    }

    pub(crate) fn expand_macro(
        &mut self,
        name: &str,
        tokens: &mut Cursor,
    ) -> Result<(), SyntaxError> {
        let def = match self.macros.get(name) {
            Some(def) => def.clone(),
            None => {
                return Err(SyntaxError::unknown(format!("Undefined macro '{name}'")))
            }
        };
        let params = self.parse_params(tokens, Some(&def.args))?;
        let mut vars = Vec::with_capacity(def.args.len());
        for arg in &def.args {
            let value = if let Some(expr) = params.named.get(arg) {
                expr.clone()
            } else if let Some(expr) = def.defaults.get(arg) {
                expr.clone()
            } else {
                return Err(SyntaxError::macro_argument(format!(
                    "Macro '{name}' requires the argument '{arg}'"
                )));
            };
            vars.push((arg.clone(), value));
        }
        self.emit(Op::Scoped {
            vars,
            body: def.body,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use curly_runtime::{render, Context, Value, VarRef};
    use pretty_assertions::assert_eq;

    fn compile(source: &str) -> Result<Program, CompileError> {
        let engine = Engine::new();
        Template::source(&engine, "test.tpl", source).compile()
    }

    fn render_with(source: &str, vars: &[(&str, Value)]) -> String {
        let engine = Engine::new();
        let program = Template::source(&engine, "test.tpl", source)
            .compile()
            .unwrap();
        let mut ctx = Context::new();
        for (name, value) in vars {
            ctx.set(*name, value.clone());
        }
        render(&program, engine.registry(), &mut ctx).unwrap()
    }

    #[test]
    fn test_identity_law() {
        let text = "plain text\nwith lines, no directives";
        assert_eq!(render_with(text, &[]), text);
    }

    #[test]
    fn test_literal_brace_passthrough() {
        assert_eq!(render_with("a { b {} c", &[]), "a { b {} c");
    }

    #[test]
    fn test_comment_elision() {
        assert_eq!(render_with("A{* anything {$x} here *}B", &[]), "AB");
    }

    #[test]
    fn test_unterminated_comment() {
        let err = compile("A{* no end").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unterminated);
    }

    #[test]
    fn test_ignore_passthrough() {
        assert_eq!(
            render_with("{ignore}{$x} {foo}{/ignore}", &[]),
            "{$x} {foo}"
        );
    }

    #[test]
    fn test_hello_world_round_trip() {
        assert_eq!(
            render_with("Hello {$name}!", &[("name", Value::Str("World".into()))]),
            "Hello World!"
        );
    }

    #[test]
    fn test_trim_suffix() {
        assert_eq!(
            render_with("A {$x-} B", &[("x", Value::Str("Z".into()))]),
            "AZ B"
        );
    }

    #[test]
    fn test_modifier_chaining() {
        assert_eq!(
            render_with(
                "{$x|upper|truncate:3}",
                &[("x", Value::Str("hello".into()))]
            ),
            "HEL..."
        );
    }

    #[test]
    fn test_block_mismatch() {
        let err = compile("line one\n{if $a}body{/foreach}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Mismatch);
        assert!(err.message.contains("'if'"));
        assert!(err.message.contains("line 2"));
        assert!(err.message.contains("'foreach'"));
    }

    #[test]
    fn test_unclosed_blocks_listed() {
        let err = compile("{if $a}\n{foreach $b as $c}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Mismatch);
        assert!(err.message.contains("'if' opened on line 1"));
        assert!(err.message.contains("'foreach' opened on line 2"));
    }

    #[test]
    fn test_unclosed_tag_cites_line() {
        let err = compile("line one\nline two {$x").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unterminated);
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_error_line_tracks_comments_and_tags() {
        let err = compile("{* a\nb *}\n{if $x}\n{$y").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unterminated);
        assert_eq!(err.line, 4);
    }

    #[test]
    fn test_macro_isolation() {
        let source = "{macro greet name}Hello {$name}{/macro}{macro.greet name=$other}-{$name}";
        let out = render_with(
            source,
            &[
                ("name", Value::Str("caller".into())),
                ("other", Value::Str("macro".into())),
            ],
        );
        assert_eq!(out, "Hello macro-caller");
    }

    #[test]
    fn test_macro_default_and_missing_argument() {
        assert_eq!(
            render_with("{macro m a b=2}{$a}:{$b}{/macro}{macro.m a=1}", &[]),
            "1:2"
        );
        let err = compile("{macro m a}{$a}{/macro}{macro.m}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MacroArgument);
        assert!(err.message.contains("'a'"));
    }

    #[test]
    fn test_macro_namespace_lookup() {
        // `macro.x` strips the prefix, `ns.x` keeps it.
        let source = "{macro ns.m}A{/macro}{ns.m}";
        let err = compile(source).unwrap_err();
        // Definition registered the name 'ns.m'? The macro tag declares
        // plain names, so `{macro ns.m}` is a parse error instead.
        assert_eq!(err.kind, ErrorKind::UnexpectedToken);
    }

    #[test]
    fn test_undefined_macro() {
        let err = compile("{macro.nope}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownIdentifier);
    }

    #[test]
    fn test_unknown_tag() {
        let err = compile("{bogus $x}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownIdentifier);
    }

    #[test]
    fn test_owned_tag_outside_owner() {
        let err = compile("{foreachelse}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Mismatch);
        assert!(err.message.contains("foreach"));
    }

    #[test]
    fn test_close_without_open() {
        let err = compile("{/if}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Mismatch);
    }

    #[test]
    fn test_ternary_shortcuts() {
        assert_eq!(
            render_with("{$a?b:c}", &[("a", Value::Int(1))]),
            "b"
        );
        assert_eq!(render_with("{$a?b:c}", &[("a", Value::Int(0))]), "c");
        assert_eq!(render_with("{$a!b:c}", &[("a", Value::Int(0))]), "b");
        assert_eq!(render_with("{$a!b:c}", &[]), "c");
    }

    #[test]
    fn test_interpolation_refill() {
        // The first `}` sits inside the quoted string, so the scanner
        // under-cuts the directive and the parser refills it.
        assert_eq!(
            render_with("{$x=\"a}b\"}{$x}", &[]),
            "a}ba}b"
        );
    }

    #[test]
    fn test_assignment_echoes() {
        assert_eq!(render_with("{$x=5}{$x}", &[]), "55");
        assert_eq!(render_with("{$x=5}{$x++}{$x}", &[]), "556");
    }

    #[test]
    fn test_constant_reference() {
        let mut engine = Engine::new();
        engine
            .registry_mut()
            .set_constant("VERSION", Value::Str("1.2".into()));
        let program = Template::source(&engine, "t.tpl", "v{#VERSION}")
            .compile()
            .unwrap();
        let mut ctx = Context::new();
        assert_eq!(render(&program, engine.registry(), &mut ctx).unwrap(), "v1.2");

        engine
            .registry_mut()
            .set_constant("SIZE", Value::Int(4));
        let program = Template::source(&engine, "t.tpl", "{#SIZE + 1}")
            .compile()
            .unwrap();
        let mut ctx = Context::new();
        assert_eq!(render(&program, engine.registry(), &mut ctx).unwrap(), "5");

        let err = Template::source(&engine, "t.tpl", "{#MISSING}")
            .compile()
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownIdentifier);
    }

    #[test]
    fn test_error_carries_template_name() {
        let err = compile("{bogus}").unwrap_err();
        assert_eq!(err.name, "test.tpl");
        assert!(err.to_string().contains("test.tpl"));
    }

    #[test]
    fn test_post_compile_hook() {
        fn strip_text(ops: &mut Vec<Op>) {
            ops.retain(|op| !matches!(op, Op::Text(_)));
        }
        let engine = Engine::new();
        let mut template = Template::source(&engine, "t.tpl", "text{$x}text");
        template.add_post_compile(strip_text);
        let program = template.compile().unwrap();
        assert_eq!(program.ops.len(), 1);
        assert!(matches!(program.ops[0], Op::Echo(_)));
    }

    #[test]
    fn test_block_body_text_stays_in_block() {
        let program = compile("x{if $a}A{/if}y").unwrap();
        assert_eq!(program.ops.len(), 3);
        assert_eq!(program.ops[0], Op::Text("x".into()));
        assert!(matches!(
            &program.ops[1],
            Op::If { branches, .. } if branches[0].1 == vec![Op::Text("A".into())]
        ));
        assert_eq!(program.ops[2], Op::Text("y".into()));
    }

    #[test]
    fn test_registered_namespaced_macro() {
        let engine = Engine::new();
        let mut template = Template::source(&engine, "t.tpl", "{ns.m a=1}");
        template.register_macro(
            "ns.m".into(),
            MacroDef {
                args: vec!["a".into()],
                defaults: BTreeMap::new(),
                body: vec![Op::Echo(Expr::Var(VarRef::bare("a")))],
            },
        );
        let program = template.compile().unwrap();
        let mut ctx = Context::new();
        assert_eq!(render(&program, engine.registry(), &mut ctx).unwrap(), "1");
    }

    #[test]
    fn test_adjacent_text_merges() {
        let program = compile("A{* c *}B{ }C").unwrap();
        assert_eq!(program.ops, vec![Op::Text("AB{ }C".into())]);
    }

    #[test]
    fn test_security_deny_methods() {
        let mut engine = Engine::new();
        engine.options.deny_methods = true;
        let err = Template::source(&engine, "t.tpl", "{$a->save()}")
            .compile()
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Security);
    }
}
