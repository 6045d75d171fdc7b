//! Compile-time registry facade.
//!
//! An `Engine` is the read-mostly environment a compilation runs
//! against: the runtime `Registry` (modifiers, template functions,
//! constants), the tag table, source providers keyed by scheme, and
//! the security/limit options. Hosts configure one engine and compile
//! any number of templates through it.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use curly_runtime::{Registry, Value};

use crate::scope::BlockCompiler;
use crate::template::Template;
use crate::SyntaxError;

use curly_lexer::Cursor;

/// Forbid `.key` / `[key]` accessors.
pub const DENY_ARRAY: u8 = 1;
/// Forbid `|modifier` pipelines.
pub const DENY_MODS: u8 = 2;

/// Security and resource limits for one engine.
#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// Accessor deny bits, OR'd with per-call flags inside the parsers.
    pub deny: u8,
    /// Reject `->method(...)` calls with a security error.
    pub deny_methods: bool,
    /// Expression/array nesting limit.
    pub max_nesting: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            deny: 0,
            deny_methods: false,
            max_nesting: 64,
        }
    }
}

/// An inline tag handler: consumes the directive tokens and appends ops
/// to the template.
pub type InlineTagFn = fn(&mut Template<'_>, &mut Cursor) -> Result<(), SyntaxError>;

/// How a registered tag name compiles.
pub enum TagDecl {
    /// Opens a block with its own scope handler. `owns` lists the
    /// sub-tag names for "can be used with" error messages.
    BlockCompiler {
        make: fn() -> Box<dyn BlockCompiler>,
        owns: &'static [&'static str],
    },
    /// Consumes the directive itself.
    InlineCompiler(InlineTagFn),
    /// `{name args}` compiles to a call of a registered template
    /// function.
    InlineFunction { function: String },
    /// `{name args}...{/name}` compiles to a call with the rendered
    /// body attached.
    BlockFunction { function: String },
}

/// Template source access for one naming scheme.
pub trait Provider {
    /// Source text and timestamp for a template name (scheme stripped).
    fn source(&self, name: &str) -> Result<(String, u64), SyntaxError>;
}

/// Loads templates from files under a root directory.
pub struct FileProvider {
    root: PathBuf,
}

impl FileProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Provider for FileProvider {
    fn source(&self, name: &str) -> Result<(String, u64), SyntaxError> {
        let path = self.root.join(name);
        let source = std::fs::read_to_string(&path).map_err(|err| {
            SyntaxError::unknown(format!("Cannot read template '{name}': {err}"))
        })?;
        let time = std::fs::metadata(&path)
            .ok()
            .and_then(|meta| meta.modified().ok())
            .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
            .map(|age| age.as_secs())
            .unwrap_or(0);
        Ok((source, time))
    }
}

/// In-memory sources, mainly for tests and embedded templates.
#[derive(Default)]
pub struct MapProvider {
    sources: BTreeMap<String, (String, u64)>,
}

impl MapProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, source: impl Into<String>, time: u64) {
        self.sources.insert(name.into(), (source.into(), time));
    }
}

impl Provider for MapProvider {
    fn source(&self, name: &str) -> Result<(String, u64), SyntaxError> {
        self.sources
            .get(name)
            .cloned()
            .ok_or_else(|| SyntaxError::unknown(format!("Template '{name}' is not defined")))
    }
}

pub struct Engine {
    registry: Registry,
    tags: BTreeMap<String, TagDecl>,
    providers: BTreeMap<String, Box<dyn Provider>>,
    base_provider: Option<Box<dyn Provider>>,
    pub options: Options,
}

impl Engine {
    /// An engine with the standard tags and builtin modifiers.
    pub fn new() -> Self {
        let mut engine = Self::bare();
        engine.registry = Registry::with_builtins();
        crate::tags::install(&mut engine);
        engine
    }

    /// An empty engine: no tags, no modifiers, no providers.
    pub fn bare() -> Self {
        Self {
            registry: Registry::new(),
            tags: BTreeMap::new(),
            providers: BTreeMap::new(),
            base_provider: None,
            options: Options::default(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn add_tag(&mut self, name: impl Into<String>, decl: TagDecl) {
        self.tags.insert(name.into(), decl);
    }

    pub fn function(&self, name: &str) -> Option<&TagDecl> {
        self.tags.get(name)
    }

    /// Names of block tags that own `name` as a sub-tag.
    pub fn tag_owners(&self, name: &str) -> Vec<&str> {
        self.tags
            .iter()
            .filter(|(_, decl)| match decl {
                TagDecl::BlockCompiler { owns, .. } => owns.contains(&name),
                _ => false,
            })
            .map(|(owner, _)| owner.as_str())
            .collect()
    }

    /// Resolve a modifier name, failing when it is not registered.
    pub fn modifier(&self, name: &str) -> Result<String, SyntaxError> {
        if self.registry.modifier(name).is_some() {
            Ok(name.to_string())
        } else {
            Err(SyntaxError::unknown(format!("Unknown modifier '{name}'")))
        }
    }

    pub fn constant(&self, name: &str) -> Option<&Value> {
        self.registry.constant(name)
    }

    /// Register a provider, under a scheme or as the default.
    pub fn set_provider(&mut self, scm: Option<&str>, provider: Box<dyn Provider>) {
        match scm {
            Some(scm) => {
                self.providers.insert(scm.to_string(), provider);
            }
            None => self.base_provider = Some(provider),
        }
    }

    pub fn provider(&self, scm: Option<&str>) -> Option<&dyn Provider> {
        match scm {
            Some(scm) => self.providers.get(scm).map(|p| p.as_ref()),
            None => self.base_provider.as_deref(),
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
