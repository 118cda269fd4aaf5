//! Module loading hooks.

use std::collections::BTreeMap;
use std::rc::Rc;

/// Import attributes (`import x from "y" with { type: "json" }`).
pub type ModuleAttributes = BTreeMap<String, String>;

/// What a loader hands back for a module name.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleSource {
    Source(String),
    /// A module definition pointer inside the engine, e.g. from evaluating
    /// bytecode with `load_only`.
    Precompiled(u32),
    /// The module does not exist; the import fails with a ReferenceError.
    Error,
}

impl From<String> for ModuleSource {
    fn from(source: String) -> Self {
        Self::Source(source)
    }
}

impl From<&str> for ModuleSource {
    fn from(source: &str) -> Self {
        Self::Source(source.to_string())
    }
}

/// Supplies module source. Returning `None` fails the import.
///
/// Loaders run synchronously inside the engine's import machinery.
pub trait ModuleLoader {
    fn load(&self, name: &str, attributes: Option<&ModuleAttributes>) -> Option<ModuleSource>;
}

impl<F> ModuleLoader for F
where
    F: Fn(&str, Option<&ModuleAttributes>) -> Option<ModuleSource>,
{
    fn load(&self, name: &str, attributes: Option<&ModuleAttributes>) -> Option<ModuleSource> {
        self(name, attributes)
    }
}

/// Turns a specifier relative to `base` into the name passed to the loader.
pub trait ModuleNormalizer {
    fn normalize(&self, base: &str, name: &str) -> String;
}

impl<F> ModuleNormalizer for F
where
    F: Fn(&str, &str) -> String,
{
    fn normalize(&self, base: &str, name: &str) -> String {
        self(base, name)
    }
}

/// Maps a specifier to a path, given the importing module if known.
pub trait ModuleResolver {
    fn resolve(&self, name: &str, current: Option<&str>) -> Option<String>;
}

impl<F> ModuleResolver for F
where
    F: Fn(&str, Option<&str>) -> Option<String>,
{
    fn resolve(&self, name: &str, current: Option<&str>) -> Option<String> {
        self(name, current)
    }
}

/// The hooks installed with [`crate::Runtime::enable_module_loader`].
#[derive(Clone)]
pub struct ModuleHooks {
    pub loader: Rc<dyn ModuleLoader>,
    pub normalizer: Option<Rc<dyn ModuleNormalizer>>,
    pub resolver: Option<Rc<dyn ModuleResolver>>,
}

impl ModuleHooks {
    pub fn new(loader: impl ModuleLoader + 'static) -> Self {
        Self {
            loader: Rc::new(loader),
            normalizer: None,
            resolver: None,
        }
    }

    pub fn with_normalizer(mut self, normalizer: impl ModuleNormalizer + 'static) -> Self {
        self.normalizer = Some(Rc::new(normalizer));
        self
    }

    pub fn with_resolver(mut self, resolver: impl ModuleResolver + 'static) -> Self {
        self.resolver = Some(Rc::new(resolver));
        self
    }
}

/// A loader over a fixed set of in-memory modules.
#[derive(Debug, Clone, Default)]
pub struct StaticModules {
    modules: BTreeMap<String, String>,
}

impl StaticModules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.modules.insert(name.into(), source.into());
        self
    }
}

impl ModuleLoader for StaticModules {
    fn load(&self, name: &str, _attributes: Option<&ModuleAttributes>) -> Option<ModuleSource> {
        self.modules.get(name).cloned().map(ModuleSource::Source)
    }
}
