//! The loaded engine: one wasm instance shared by every runtime created
//! from it.

use std::cell::OnceCell;
use std::path::Path;
use std::rc::{Rc, Weak};

use serde::Serialize;
use tracing::info;

use crate::callback::CallbackManager;
use crate::config::EngineConfig;
use crate::error::{HakoError, Result};
use crate::ffi::abi::BUILD_FLAG_BIGNUM;
use crate::ffi::wasm::{WasmFfi, WasmOptions};
use crate::ffi::{Ffi, HostImports};
use crate::mem::MemoryManager;
use crate::runtime::Runtime;

const BUILD_INFO_FIELDS: usize = 8;

/// Compile-time facts about the engine binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildInfo {
    pub version: String,
    pub flags: u32,
    pub build_date: String,
    pub wasi_sdk_version: String,
    pub wasi_libc: String,
    pub llvm: String,
    pub llvm_version: String,
    pub config: String,
}

impl BuildInfo {
    pub fn has_bignum(&self) -> bool {
        self.flags & BUILD_FLAG_BIGNUM != 0
    }
}

struct HakoInner {
    ffi: Rc<dyn Ffi>,
    memory: MemoryManager,
    bridge: Rc<CallbackManager>,
    build: OnceCell<BuildInfo>,
}

/// A loaded engine. Cloning shares the instance.
#[derive(Clone)]
pub struct Hako {
    inner: Rc<HakoInner>,
}

impl Hako {
    /// Wraps an engine implementation and wires its imports to a fresh
    /// callback bridge.
    pub fn new(ffi: Rc<dyn Ffi>) -> Self {
        let memory = MemoryManager::new(ffi.clone());
        let bridge = Rc::new(CallbackManager::new(memory.clone()));
        let imports: Weak<dyn HostImports> = Rc::downgrade(&bridge) as Weak<dyn HostImports>;
        ffi.set_host_imports(imports);
        Self {
            inner: Rc::new(HakoInner {
                ffi,
                memory,
                bridge,
                build: OnceCell::new(),
            }),
        }
    }

    /// Instantiates an engine binary.
    pub fn load(wasm: &[u8], options: &WasmOptions) -> Result<Self> {
        let ffi: Rc<dyn Ffi> = WasmFfi::new(wasm, options)?;
        Ok(Self::new(ffi))
    }

    pub fn from_file(path: &Path, options: &WasmOptions) -> Result<Self> {
        let wasm = std::fs::read(path).map_err(|e| {
            HakoError::Anyhow(anyhow::Error::new(e).context(format!("reading engine binary {}", path.display())))
        })?;
        let hako = Self::load(&wasm, options)?;
        info!(path = %path.display(), bytes = wasm.len(), "Engine loaded");
        Ok(hako)
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let path = config
            .wasm_path
            .as_deref()
            .ok_or_else(|| HakoError::configuration("engine.wasm_path is not set"))?;
        Self::from_file(path, &config.wasm_options())
    }

    pub fn create_runtime(&self) -> Result<Runtime> {
        Runtime::new(self)
    }

    /// Reads the engine's build info once and caches it.
    pub fn build_info(&self) -> Result<&BuildInfo> {
        if let Some(info) = self.inner.build.get() {
            return Ok(info);
        }
        let info = self.read_build_info()?;
        Ok(self.inner.build.get_or_init(|| info))
    }

    fn read_build_info(&self) -> Result<BuildInfo> {
        let ptr = self.inner.ffi.build_info()?;
        if ptr == 0 {
            return Err(HakoError::Memory("engine returned no build info".into()));
        }
        let memory = &self.inner.memory;
        let fields = memory.read_pointer_array(ptr, BUILD_INFO_FIELDS)?;
        let text = |i: usize| match fields[i] {
            0 => Ok(String::new()),
            p => memory.read_cstring(p),
        };
        Ok(BuildInfo {
            version: text(0)?,
            flags: fields[1],
            build_date: text(2)?,
            wasi_sdk_version: text(3)?,
            wasi_libc: text(4)?,
            llvm: text(5)?,
            llvm_version: text(6)?,
            config: text(7)?,
        })
    }

    pub fn has_bignum(&self) -> Result<bool> {
        Ok(self.build_info()?.has_bignum())
    }

    /// Asks a leak-checking engine build whether any allocation is still
    /// live. Release builds always answer `false`.
    pub fn recoverable_leak_check(&self) -> Result<bool> {
        Ok(self.inner.ffi.recoverable_leak_check()? != 0)
    }

    pub(crate) fn ffi(&self) -> &Rc<dyn Ffi> {
        &self.inner.ffi
    }

    pub(crate) fn memory(&self) -> &MemoryManager {
        &self.inner.memory
    }

    pub(crate) fn bridge(&self) -> &Rc<CallbackManager> {
        &self.inner.bridge
    }
}

impl std::fmt::Debug for Hako {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hako")
            .field("memory_size", &self.inner.ffi.memory_size())
            .finish_non_exhaustive()
    }
}
