use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use wasmtime::{Engine, Module};

use crate::error::{HakoError, Result};

const PRECOMPILED_EXT: &str = "cwasm";

/// Disk cache of precompiled engine binaries.
///
/// Artefacts are keyed by the SHA-256 of the source bytes, so a new engine
/// build never picks up a stale artefact:
/// ```text
/// {base_dir}/
///   {sha256}.cwasm   - wasmtime-serialized module
/// ```
pub struct ModuleCache {
    base_dir: PathBuf,
}

impl ModuleCache {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn default_path() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hako")
            .join("modules")
    }

    pub fn cwasm_path(&self, hash: &str) -> PathBuf {
        self.base_dir.join(format!("{hash}.{PRECOMPILED_EXT}"))
    }

    /// Load a precompiled module for `wasm`, compiling and caching it on a miss.
    pub fn load_or_compile(&self, engine: &Engine, wasm: &[u8]) -> Result<Module> {
        let hash = hash_bytes(wasm);
        let cwasm_path = self.cwasm_path(&hash);

        if cwasm_path.exists() {
            match load_precompiled(&cwasm_path, engine) {
                Ok(module) => {
                    tracing::debug!(hash = %hash, "Loaded engine from precompiled cache");
                    return Ok(module);
                }
                Err(e) => {
                    tracing::debug!(hash = %hash, error = %e, "Precompiled cache invalid, recompiling");
                }
            }
        }

        let module = Module::new(engine, wasm)
            .map_err(|e| HakoError::Anyhow(e.context("compiling engine binary")))?;

        match module.serialize() {
            Ok(serialized) => {
                if let Err(e) = self.store(&cwasm_path, &serialized) {
                    tracing::warn!(path = %cwasm_path.display(), error = %e, "Failed to save precompiled cache");
                } else {
                    tracing::debug!(hash = %hash, "Saved precompiled cache");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Engine module cannot be serialized"),
        }

        Ok(module)
    }

    fn store(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Remove every cached artefact.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        if !self.base_dir.exists() {
            return Ok(removed);
        }
        for entry in std::fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == PRECOMPILED_EXT) {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn load_precompiled(path: &Path, engine: &Engine) -> anyhow::Result<Module> {
    // SAFETY: artefacts are only written by `load_or_compile` from a module
    // this process compiled, and are named by the hash of their source.
    // wasmtime additionally rejects artefacts from other versions/configs.
    unsafe { Module::deserialize_file(engine, path) }
}

/// Hex SHA-256 of an engine binary.
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
