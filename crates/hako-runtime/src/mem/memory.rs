use std::rc::Rc;

use crate::error::{HakoError, Result};
use crate::ffi::Ffi;

const SCAN_CHUNK: usize = 256;

/// A NUL-terminated string written into engine memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapString {
    pub ptr: u32,
    /// Byte length, excluding the terminator.
    pub len: u32,
}

/// Raw reads, writes and allocations over the engine's linear memory.
///
/// Every pointer handed out by the `allocate*`/`write*` methods must be
/// returned with [`MemoryManager::free`] (or `free_runtime` for runtime
/// allocations); callers register that with a [`crate::Scope`].
#[derive(Clone)]
pub struct MemoryManager {
    ffi: Rc<dyn Ffi>,
}

impl MemoryManager {
    pub fn new(ffi: Rc<dyn Ffi>) -> Self {
        Self { ffi }
    }

    pub fn ffi(&self) -> &Rc<dyn Ffi> {
        &self.ffi
    }

    pub fn allocate(&self, ctx: u32, size: u32) -> Result<u32> {
        if size == 0 {
            return Err(HakoError::Memory("refusing to allocate 0 bytes".into()));
        }
        let ptr = self.ffi.malloc(ctx, size)?;
        if ptr == 0 {
            return Err(HakoError::Memory(format!("allocation of {size} bytes failed")));
        }
        Ok(ptr)
    }

    pub fn free(&self, ctx: u32, ptr: u32) -> Result<()> {
        if ptr != 0 {
            self.ffi.free(ctx, ptr)?;
        }
        Ok(())
    }

    pub fn allocate_runtime(&self, rt: u32, size: u32) -> Result<u32> {
        let ptr = self.ffi.runtime_malloc(rt, size.max(1))?;
        if ptr == 0 {
            return Err(HakoError::Memory(format!(
                "runtime allocation of {size} bytes failed"
            )));
        }
        Ok(ptr)
    }

    pub fn free_runtime(&self, rt: u32, ptr: u32) -> Result<()> {
        if ptr != 0 {
            self.ffi.runtime_free(rt, ptr)?;
        }
        Ok(())
    }

    pub fn write_cstring(&self, ctx: u32, s: &str) -> Result<HeapString> {
        let len = len_u32(s.len())?;
        let ptr = self.allocate(ctx, len + 1)?;
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        if let Err(e) = self.ffi.write_memory(ptr, &bytes) {
            let _ = self.free(ctx, ptr);
            return Err(e);
        }
        Ok(HeapString { ptr, len })
    }

    /// Like [`write_cstring`](Self::write_cstring) but allocated from the
    /// runtime allocator, for data that outlives any one context.
    pub fn write_runtime_cstring(&self, rt: u32, s: &str) -> Result<u32> {
        let ptr = self.allocate_runtime(rt, len_u32(s.len())? + 1)?;
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.ffi.write_memory(ptr, &bytes)?;
        Ok(ptr)
    }

    /// Reads the NUL-terminated UTF-8 string at `ptr`. Invalid UTF-8 is
    /// replaced rather than rejected.
    pub fn read_cstring(&self, ptr: u32) -> Result<String> {
        if ptr == 0 {
            return Err(HakoError::Memory("read of a null string".into()));
        }
        let limit = self.ffi.memory_size();
        let mut bytes = Vec::new();
        let mut offset = ptr as usize;
        loop {
            if offset >= limit {
                return Err(HakoError::Memory(format!(
                    "unterminated string at {ptr:#x}"
                )));
            }
            let mut chunk = vec![0u8; SCAN_CHUNK.min(limit - offset)];
            self.ffi.read_memory(offset as u32, &mut chunk)?;
            if let Some(end) = chunk.iter().position(|b| *b == 0) {
                bytes.extend_from_slice(&chunk[..end]);
                break;
            }
            offset += chunk.len();
            bytes.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Reads a string returned by `HAKO_ToCString`/`HAKO_Dump` and frees it.
    pub fn take_cstring(&self, ctx: u32, ptr: u32) -> Result<String> {
        let result = self.read_cstring(ptr);
        if ptr != 0 {
            self.ffi.free_cstring(ctx, ptr)?;
        }
        result
    }

    /// Reads a heap string owned by the caller (e.g. `HAKO_Typeof`) and frees it.
    pub fn take_heap_string(&self, ctx: u32, ptr: u32) -> Result<String> {
        let result = self.read_cstring(ptr);
        self.free(ctx, ptr)?;
        result
    }

    pub fn read_bytes(&self, ptr: u32, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        if len > 0 {
            self.ffi.read_memory(ptr, &mut buf)?;
        }
        Ok(buf)
    }

    /// Copies `bytes` into a fresh allocation.
    pub fn write_bytes(&self, ctx: u32, bytes: &[u8]) -> Result<u32> {
        let ptr = self.allocate(ctx, len_u32(bytes.len())?.max(1))?;
        if let Err(e) = self.ffi.write_memory(ptr, bytes) {
            let _ = self.free(ctx, ptr);
            return Err(e);
        }
        Ok(ptr)
    }

    pub fn read_u32(&self, ptr: u32) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.ffi.read_memory(ptr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn write_u32(&self, ptr: u32, value: u32) -> Result<()> {
        self.ffi.write_memory(ptr, &value.to_le_bytes())
    }

    /// Allocates a zeroed array of `count` wasm32 pointers.
    pub fn allocate_pointer_array(&self, ctx: u32, count: usize) -> Result<u32> {
        let size = len_u32(count.max(1) * 4)?;
        let ptr = self.allocate(ctx, size)?;
        self.ffi.write_memory(ptr, &vec![0u8; size as usize])?;
        Ok(ptr)
    }

    pub fn write_pointer_array(&self, ctx: u32, pointers: &[u32]) -> Result<u32> {
        let ptr = self.allocate_pointer_array(ctx, pointers.len())?;
        let bytes: Vec<u8> = pointers.iter().flat_map(|p| p.to_le_bytes()).collect();
        self.ffi.write_memory(ptr, &bytes)?;
        Ok(ptr)
    }

    pub fn read_pointer_array(&self, ptr: u32, count: usize) -> Result<Vec<u32>> {
        let bytes = self.read_bytes(ptr, count * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    pub fn dup_value(&self, ctx: u32, value: u32) -> Result<u32> {
        self.ffi.dup_value(ctx, value)
    }

    pub fn free_value(&self, ctx: u32, value: u32) -> Result<()> {
        if value != 0 {
            self.ffi.free_value(ctx, value)?;
        }
        Ok(())
    }
}

fn len_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| HakoError::Memory(format!("{len} bytes exceeds wasm32")))
}
