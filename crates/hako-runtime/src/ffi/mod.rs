//! The boundary to the engine binary.
//!
//! [`Ffi`] is the outbound direction: every engine export the host uses,
//! operating on raw `u32` pointers into the engine's linear memory.
//! [`HostImports`] is the inbound direction: the functions the engine
//! calls back into while it runs.
//!
//! Nothing in this module knows about ownership. Pointers returned here are
//! wrapped into [`crate::Value`]s (or freed) by the layers above.

use std::rc::Weak;

use crate::error::Result;

pub mod abi;
#[cfg(test)]
pub(crate) mod fake;
pub mod wasm;

pub use abi::{
    EqualOp, EvalFlags, Intrinsics, ModuleSourceTag, PromiseState, PropertyEnumFlags,
    StripOptions, TypedArrayType,
};
pub use wasm::{WasmFfi, WasmOptions};

/// Functions the engine imports from the `hako` namespace.
///
/// Implementations must not panic or return errors across this boundary:
/// anything that goes wrong is reported to the engine as `undefined`, an
/// engine exception or a null pointer.
pub trait HostImports {
    /// Invoke host function `func_id`. Returns a value pointer owned by the engine.
    fn call_function(&self, ctx: u32, this: u32, argc: i32, argv: u32, func_id: i32) -> u32;

    /// Return 1 to abort the running guest code.
    fn interrupt_handler(&self, rt: u32, ctx: u32, opaque: u32) -> i32;

    /// Returns a pointer to a module source struct, or 0.
    fn load_module(&self, rt: u32, ctx: u32, name: u32, opaque: u32, attributes: u32) -> u32;

    /// Returns a malloc'd C string with the normalized module name.
    fn normalize_module(&self, rt: u32, ctx: u32, base: u32, name: u32, opaque: u32) -> u32;

    /// Returns a malloc'd C string with the resolved module path, or 0.
    fn resolve_module(&self, rt: u32, ctx: u32, name: u32, current: u32, opaque: u32) -> u32;

    fn profile_function_start(&self, ctx: u32, event: u32, opaque: u32);

    fn profile_function_end(&self, ctx: u32, event: u32, opaque: u32);
}

/// Exports of the engine binary.
///
/// Pointers are wasm32 addresses. Methods that the engine declares as
/// returning `LEPUS_BOOL` return the raw `i32`.
pub trait Ffi {
    // Linear memory

    fn memory_size(&self) -> usize;
    fn read_memory(&self, ptr: u32, buf: &mut [u8]) -> Result<()>;
    fn write_memory(&self, ptr: u32, data: &[u8]) -> Result<()>;

    /// Wires the inbound direction. Held weakly: the owner of the imports
    /// keeps the FFI alive, never the other way round.
    fn set_host_imports(&self, imports: Weak<dyn HostImports>);

    fn malloc(&self, ctx: u32, size: u32) -> Result<u32>;
    fn free(&self, ctx: u32, ptr: u32) -> Result<()>;
    fn runtime_malloc(&self, rt: u32, size: u32) -> Result<u32>;
    fn runtime_free(&self, rt: u32, ptr: u32) -> Result<()>;
    fn free_cstring(&self, ctx: u32, ptr: u32) -> Result<()>;

    // Runtime

    fn new_runtime(&self) -> Result<u32>;
    fn free_runtime(&self, rt: u32) -> Result<()>;
    fn set_strip_info(&self, rt: u32, flags: i32) -> Result<()>;
    fn get_strip_info(&self, rt: u32) -> Result<i32>;
    fn runtime_set_memory_limit(&self, rt: u32, limit: u32) -> Result<()>;
    fn runtime_compute_memory_usage(&self, rt: u32, ctx: u32) -> Result<u32>;
    fn runtime_dump_memory_usage(&self, rt: u32) -> Result<u32>;
    fn is_job_pending(&self, rt: u32) -> Result<i32>;
    fn execute_pending_job(&self, rt: u32, max_jobs: i32, last_ctx_out: u32) -> Result<u32>;
    fn enable_interrupt_handler(&self, rt: u32, opaque: u32) -> Result<()>;
    fn disable_interrupt_handler(&self, rt: u32) -> Result<()>;
    fn enable_module_loader(&self, rt: u32, use_custom_normalize: i32) -> Result<()>;
    fn disable_module_loader(&self, rt: u32) -> Result<()>;
    fn enable_profile_calls(&self, rt: u32, sampling: u32, opaque: u32) -> Result<()>;

    // Context

    fn new_context(&self, rt: u32, intrinsics: u32) -> Result<u32>;
    fn free_context(&self, ctx: u32) -> Result<()>;
    fn set_context_data(&self, ctx: u32, data: u32) -> Result<()>;
    fn get_context_data(&self, ctx: u32) -> Result<u32>;
    fn set_no_strict_mode(&self, ctx: u32) -> Result<()>;
    fn set_virtual_stack_size(&self, ctx: u32, size: u32) -> Result<()>;
    fn context_set_max_stack_size(&self, ctx: u32, size: u32) -> Result<()>;
    fn set_gc_threshold(&self, ctx: u32, threshold: i64) -> Result<()>;

    // Constants: static pointers that are never freed.

    fn get_undefined(&self) -> Result<u32>;
    fn get_null(&self) -> Result<u32>;
    fn get_false(&self) -> Result<u32>;
    fn get_true(&self) -> Result<u32>;

    // Values

    fn dup_value(&self, ctx: u32, value: u32) -> Result<u32>;
    fn free_value(&self, ctx: u32, value: u32) -> Result<()>;
    fn free_value_runtime(&self, rt: u32, value: u32) -> Result<()>;
    fn throw(&self, ctx: u32, error: u32) -> Result<u32>;
    fn new_error(&self, ctx: u32) -> Result<u32>;
    /// Takes the pending exception. Pass 0, or the value an engine call
    /// returned to only take it when that value is the exception sentinel.
    fn get_last_error(&self, ctx: u32, maybe_exception: u32) -> Result<u32>;
    fn new_object(&self, ctx: u32) -> Result<u32>;
    fn new_object_proto(&self, ctx: u32, proto: u32) -> Result<u32>;
    fn new_array(&self, ctx: u32) -> Result<u32>;
    /// Takes ownership of `buffer`, which must come from [`Ffi::malloc`].
    fn new_array_buffer(&self, ctx: u32, buffer: u32, len: u32) -> Result<u32>;
    fn get_prop(&self, ctx: u32, this: u32, key: u32) -> Result<u32>;
    fn get_prop_number(&self, ctx: u32, this: u32, index: i32) -> Result<u32>;
    fn set_prop(&self, ctx: u32, this: u32, key: u32, value: u32) -> Result<i32>;
    #[allow(clippy::too_many_arguments)]
    fn define_prop(
        &self,
        ctx: u32,
        this: u32,
        key: u32,
        value: u32,
        get: u32,
        set: u32,
        configurable: i32,
        enumerable: i32,
        has_value: i32,
    ) -> Result<i32>;
    fn get_own_property_names(
        &self,
        ctx: u32,
        out_ptrs: u32,
        out_len: u32,
        obj: u32,
        flags: i32,
    ) -> Result<u32>;
    fn get_global_object(&self, ctx: u32) -> Result<u32>;
    fn get_length(&self, ctx: u32, out_len: u32, value: u32) -> Result<i32>;
    fn new_float64(&self, ctx: u32, num: f64) -> Result<u32>;
    fn new_bigint(&self, ctx: u32, low: u32, high: u32) -> Result<u32>;
    fn new_biguint(&self, ctx: u32, low: u32, high: u32) -> Result<u32>;
    fn get_float64(&self, ctx: u32, value: u32) -> Result<f64>;
    fn new_string(&self, ctx: u32, string: u32) -> Result<u32>;
    /// Returns a C string freed with [`Ffi::free_cstring`].
    fn to_cstring(&self, ctx: u32, value: u32) -> Result<u32>;
    fn new_symbol(&self, ctx: u32, description: u32, is_global: i32) -> Result<u32>;
    fn get_symbol_description_or_key(&self, ctx: u32, value: u32) -> Result<u32>;
    fn is_global_symbol(&self, ctx: u32, value: u32) -> Result<i32>;
    /// Returns a C string freed with [`Ffi::free`].
    fn type_of(&self, ctx: u32, value: u32) -> Result<u32>;
    fn is_array(&self, ctx: u32, value: u32) -> Result<i32>;
    fn is_typed_array(&self, ctx: u32, value: u32) -> Result<i32>;
    fn get_typed_array_type(&self, ctx: u32, value: u32) -> Result<i32>;
    fn is_array_buffer(&self, value: u32) -> Result<i32>;
    fn is_equal(&self, ctx: u32, a: u32, b: u32, op: i32) -> Result<i32>;
    fn copy_array_buffer(&self, ctx: u32, value: u32, out_len: u32) -> Result<u32>;
    fn copy_typed_array_buffer(&self, ctx: u32, value: u32, out_len: u32) -> Result<u32>;
    fn new_function(&self, ctx: u32, func_id: i32, name: u32) -> Result<u32>;
    fn call(&self, ctx: u32, func: u32, this: u32, argc: i32, argv: u32) -> Result<u32>;
    fn argv_get(&self, argv: u32, index: i32) -> Result<u32>;
    fn eval(
        &self,
        ctx: u32,
        code: u32,
        len: u32,
        filename: u32,
        detect_module: i32,
        flags: i32,
    ) -> Result<u32>;
    #[allow(clippy::too_many_arguments)]
    fn compile_to_byte_code(
        &self,
        ctx: u32,
        code: u32,
        len: u32,
        filename: u32,
        detect_module: i32,
        flags: i32,
        out_len: u32,
    ) -> Result<u32>;
    fn eval_byte_code(&self, ctx: u32, buffer: u32, len: u32, load_only: i32) -> Result<u32>;
    fn new_promise_capability(&self, ctx: u32, resolve_funcs_out: u32) -> Result<u32>;
    fn is_promise(&self, ctx: u32, value: u32) -> Result<i32>;
    fn promise_state(&self, ctx: u32, value: u32) -> Result<i32>;
    fn promise_result(&self, ctx: u32, value: u32) -> Result<u32>;
    fn get_module_namespace(&self, ctx: u32, module: u32) -> Result<u32>;
    /// Returns a C string freed with [`Ffi::free_cstring`].
    fn dump(&self, ctx: u32, value: u32) -> Result<u32>;
    fn to_json(&self, ctx: u32, value: u32, indent: i32) -> Result<u32>;
    fn bjson_encode(&self, ctx: u32, value: u32) -> Result<u32>;
    fn bjson_decode(&self, ctx: u32, buffer: u32) -> Result<u32>;
    fn is_error(&self, ctx: u32, value: u32) -> Result<i32>;
    fn is_exception(&self, value: u32) -> Result<i32>;
    fn new_date(&self, ctx: u32, time: f64) -> Result<u32>;
    fn get_class_id(&self, ctx: u32, value: u32) -> Result<i32>;
    fn is_instance_of(&self, ctx: u32, value: u32, ctor: u32) -> Result<i32>;

    // Build

    fn build_info(&self) -> Result<u32>;
    fn recoverable_leak_check(&self) -> Result<i32>;
}
