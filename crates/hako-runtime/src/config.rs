use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::ModuleCache;
use crate::context::ContextOptions;
use crate::error::{HakoError, Result};
use crate::ffi::wasm::{DEFAULT_INITIAL_PAGES, DEFAULT_MAXIMUM_PAGES, WasmOptions};
use crate::ffi::{Intrinsics, StripOptions};
use crate::interrupt::{InterruptHandler, ResourceLimits};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HakoConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub context: ContextConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Path to `hako.wasm`.
    pub wasm_path: Option<PathBuf>,
    #[serde(default = "default_initial_pages")]
    pub initial_pages: u32,
    #[serde(default = "default_maximum_pages")]
    pub maximum_pages: u32,
    /// Where precompiled modules go. Defaults to the user cache directory.
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub cache: bool,
    #[serde(default = "default_true")]
    pub inherit_stdio: bool,
}

fn default_initial_pages() -> u32 {
    DEFAULT_INITIAL_PAGES
}
fn default_maximum_pages() -> u32 {
    DEFAULT_MAXIMUM_PAGES
}
fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wasm_path: None,
            initial_pages: default_initial_pages(),
            maximum_pages: default_maximum_pages(),
            cache_dir: None,
            cache: true,
            inherit_stdio: true,
        }
    }
}

impl EngineConfig {
    pub fn wasm_options(&self) -> WasmOptions {
        let cache_dir = self
            .cache
            .then(|| self.cache_dir.clone().unwrap_or_else(ModuleCache::default_path));
        WasmOptions {
            initial_pages: self.initial_pages,
            maximum_pages: self.maximum_pages,
            inherit_stdio: self.inherit_stdio,
            cache_dir,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeConfig {
    /// Engine heap cap in bytes. Unlimited when unset.
    pub memory_limit: Option<u32>,
    pub max_stack_size: Option<u32>,
    #[serde(default)]
    pub strip: StripOptions,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitsConfig {
    pub max_steps: Option<u64>,
    pub max_time_ms: Option<u64>,
    pub max_memory_bytes: Option<i64>,
    pub memory_check_interval: Option<u64>,
}

impl LimitsConfig {
    pub fn resource_limits(&self) -> ResourceLimits {
        ResourceLimits {
            max_time: self.max_time_ms.map(Duration::from_millis),
            max_steps: self.max_steps,
            max_memory_bytes: self.max_memory_bytes,
            memory_check_interval: self.memory_check_interval,
        }
    }

    pub fn interrupt_handler(&self) -> Option<Rc<dyn InterruptHandler>> {
        self.resource_limits().handler()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextConfig {
    /// Built-in groups to install, e.g. `["BaseObjects", "JSON", "Promise"]`.
    /// Empty means the engine's default set.
    #[serde(default)]
    pub intrinsics: Vec<String>,
}

impl ContextConfig {
    pub fn intrinsics(&self) -> Result<Intrinsics> {
        if self.intrinsics.is_empty() {
            return Ok(Intrinsics::default());
        }
        self.intrinsics.iter().try_fold(Intrinsics::empty(), |acc, name| {
            Intrinsics::from_name(name)
                .map(|flag| acc | flag)
                .ok_or_else(|| HakoError::configuration(format!("unknown intrinsic '{name}'")))
        })
    }
}

impl HakoConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn context_options(&self) -> Result<ContextOptions> {
        Ok(ContextOptions {
            intrinsics: Some(self.context.intrinsics()?),
            max_stack_size: self.runtime.max_stack_size,
        })
    }
}
