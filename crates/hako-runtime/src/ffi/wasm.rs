use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::{Rc, Weak};

use anyhow::Context as _;
use wasmtime::{
    AsContextMut, Caller, Config, Engine, Instance, Linker, Memory, MemoryType, Module, Store,
    StoreContextMut, TypedFunc, WasmParams, WasmResults,
};
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::preview1::{self as p1, WasiP1Ctx};

use super::{Ffi, HostImports};
use crate::cache::ModuleCache;
use crate::error::{HakoError, Result};

/// 24 MiB.
pub const DEFAULT_INITIAL_PAGES: u32 = 384;
/// 256 MiB.
pub const DEFAULT_MAXIMUM_PAGES: u32 = 4096;

/// How the engine binary is instantiated.
#[derive(Debug, Clone)]
pub struct WasmOptions {
    pub initial_pages: u32,
    pub maximum_pages: u32,
    /// Forward the guest's stdout/stderr to the host process.
    pub inherit_stdio: bool,
    /// Directory for precompiled modules. `None` compiles on every load.
    pub cache_dir: Option<PathBuf>,
}

impl Default for WasmOptions {
    fn default() -> Self {
        Self {
            initial_pages: DEFAULT_INITIAL_PAGES,
            maximum_pages: DEFAULT_MAXIMUM_PAGES,
            inherit_stdio: true,
            cache_dir: None,
        }
    }
}

/// Store data for one engine instance.
pub struct HostState {
    wasi: WasiP1Ctx,
    link: HostLink,
}

/// Back-reference from the store to the FFI that owns it, used by import
/// callbacks to find the host side.
struct HostLink(Weak<WasmFfi>);

// SAFETY: the WASI linker requires `Send` store data. The store is owned by
// a `WasmFfi`, which holds `Rc`s and `RefCell`s and is therefore `!Send`, so
// the store and this link never leave the thread that created them.
unsafe impl Send for HostLink {}

macro_rules! exports {
    ($( $field:ident = $export:literal : ($($param:ty),*) -> $ret:ty; )*) => {
        struct Exports {
            $( $field: TypedFunc<($($param,)*), $ret>, )*
        }

        impl Exports {
            fn load(instance: &Instance, store: &mut Store<HostState>) -> anyhow::Result<Self> {
                Ok(Self {
                    $(
                        $field: instance
                            .get_typed_func::<($($param,)*), $ret>(&mut *store, $export)
                            .with_context(|| format!("engine export {}", $export))?,
                    )*
                })
            }
        }
    };
}

exports! {
    new_runtime = "HAKO_NewRuntime": () -> u32;
    free_runtime = "HAKO_FreeRuntime": (u32) -> ();
    set_strip_info = "HAKO_SetStripInfo": (u32, i32) -> ();
    get_strip_info = "HAKO_GetStripInfo": (u32) -> i32;
    runtime_set_memory_limit = "HAKO_RuntimeSetMemoryLimit": (u32, u32) -> ();
    runtime_compute_memory_usage = "HAKO_RuntimeComputeMemoryUsage": (u32, u32) -> u32;
    runtime_dump_memory_usage = "HAKO_RuntimeDumpMemoryUsage": (u32) -> u32;
    is_job_pending = "HAKO_IsJobPending": (u32) -> i32;
    execute_pending_job = "HAKO_ExecutePendingJob": (u32, i32, u32) -> u32;
    enable_interrupt_handler = "HAKO_RuntimeEnableInterruptHandler": (u32, u32) -> ();
    disable_interrupt_handler = "HAKO_RuntimeDisableInterruptHandler": (u32) -> ();
    enable_module_loader = "HAKO_RuntimeEnableModuleLoader": (u32, i32) -> ();
    disable_module_loader = "HAKO_RuntimeDisableModuleLoader": (u32) -> ();
    enable_profile_calls = "HAKO_EnableProfileCalls": (u32, u32, u32) -> ();
    malloc = "HAKO_Malloc": (u32, u32) -> u32;
    free = "HAKO_Free": (u32, u32) -> ();
    runtime_malloc = "HAKO_RuntimeMalloc": (u32, u32) -> u32;
    runtime_free = "HAKO_RuntimeFree": (u32, u32) -> ();
    free_cstring = "HAKO_FreeCString": (u32, u32) -> ();
    new_context = "HAKO_NewContext": (u32, u32) -> u32;
    free_context = "HAKO_FreeContext": (u32) -> ();
    set_context_data = "HAKO_SetContextData": (u32, u32) -> ();
    get_context_data = "HAKO_GetContextData": (u32) -> u32;
    set_no_strict_mode = "HAKO_SetNoStrictMode": (u32) -> ();
    set_virtual_stack_size = "HAKO_SetVirtualStackSize": (u32, u32) -> ();
    context_set_max_stack_size = "HAKO_ContextSetMaxStackSize": (u32, u32) -> ();
    set_gc_threshold = "HAKO_SetGCThreshold": (u32, i64) -> ();
    get_undefined = "HAKO_GetUndefined": () -> u32;
    get_null = "HAKO_GetNull": () -> u32;
    get_false = "HAKO_GetFalse": () -> u32;
    get_true = "HAKO_GetTrue": () -> u32;
    dup_value = "HAKO_DupValuePointer": (u32, u32) -> u32;
    free_value = "HAKO_FreeValuePointer": (u32, u32) -> ();
    free_value_runtime = "HAKO_FreeValuePointerRuntime": (u32, u32) -> ();
    throw = "HAKO_Throw": (u32, u32) -> u32;
    new_error = "HAKO_NewError": (u32) -> u32;
    get_last_error = "HAKO_GetLastError": (u32, u32) -> u32;
    new_object = "HAKO_NewObject": (u32) -> u32;
    new_object_proto = "HAKO_NewObjectProto": (u32, u32) -> u32;
    new_array = "HAKO_NewArray": (u32) -> u32;
    new_array_buffer = "HAKO_NewArrayBuffer": (u32, u32, u32) -> u32;
    get_prop = "HAKO_GetProp": (u32, u32, u32) -> u32;
    get_prop_number = "HAKO_GetPropNumber": (u32, u32, i32) -> u32;
    set_prop = "HAKO_SetProp": (u32, u32, u32, u32) -> i32;
    define_prop = "HAKO_DefineProp": (u32, u32, u32, u32, u32, u32, i32, i32, i32) -> i32;
    get_own_property_names = "HAKO_GetOwnPropertyNames": (u32, u32, u32, u32, i32) -> u32;
    get_global_object = "HAKO_GetGlobalObject": (u32) -> u32;
    get_length = "HAKO_GetLength": (u32, u32, u32) -> i32;
    new_float64 = "HAKO_NewFloat64": (u32, f64) -> u32;
    new_bigint = "HAKO_NewBigInt": (u32, u32, u32) -> u32;
    new_biguint = "HAKO_NewBigUInt": (u32, u32, u32) -> u32;
    get_float64 = "HAKO_GetFloat64": (u32, u32) -> f64;
    new_string = "HAKO_NewString": (u32, u32) -> u32;
    to_cstring = "HAKO_ToCString": (u32, u32) -> u32;
    new_symbol = "HAKO_NewSymbol": (u32, u32, i32) -> u32;
    get_symbol_description_or_key = "HAKO_GetSymbolDescriptionOrKey": (u32, u32) -> u32;
    is_global_symbol = "HAKO_IsGlobalSymbol": (u32, u32) -> i32;
    type_of = "HAKO_Typeof": (u32, u32) -> u32;
    is_array = "HAKO_IsArray": (u32, u32) -> i32;
    is_typed_array = "HAKO_IsTypedArray": (u32, u32) -> i32;
    get_typed_array_type = "HAKO_GetTypedArrayType": (u32, u32) -> i32;
    is_array_buffer = "HAKO_IsArrayBuffer": (u32) -> i32;
    is_equal = "HAKO_IsEqual": (u32, u32, u32, i32) -> i32;
    copy_array_buffer = "HAKO_CopyArrayBuffer": (u32, u32, u32) -> u32;
    copy_typed_array_buffer = "HAKO_CopyTypedArrayBuffer": (u32, u32, u32) -> u32;
    new_function = "HAKO_NewFunction": (u32, i32, u32) -> u32;
    call = "HAKO_Call": (u32, u32, u32, i32, u32) -> u32;
    argv_get = "HAKO_ArgvGetJSValueConstPointer": (u32, i32) -> u32;
    eval = "HAKO_Eval": (u32, u32, u32, u32, i32, i32) -> u32;
    compile_to_byte_code = "HAKO_CompileToByteCode": (u32, u32, u32, u32, i32, i32, u32) -> u32;
    eval_byte_code = "HAKO_EvalByteCode": (u32, u32, u32, i32) -> u32;
    new_promise_capability = "HAKO_NewPromiseCapability": (u32, u32) -> u32;
    is_promise = "HAKO_IsPromise": (u32, u32) -> i32;
    promise_state = "HAKO_PromiseState": (u32, u32) -> i32;
    promise_result = "HAKO_PromiseResult": (u32, u32) -> u32;
    get_module_namespace = "HAKO_GetModuleNamespace": (u32, u32) -> u32;
    dump = "HAKO_Dump": (u32, u32) -> u32;
    to_json = "HAKO_ToJson": (u32, u32, i32) -> u32;
    bjson_encode = "HAKO_bjson_encode": (u32, u32) -> u32;
    bjson_decode = "HAKO_bjson_decode": (u32, u32) -> u32;
    is_error = "HAKO_IsError": (u32, u32) -> i32;
    is_exception = "HAKO_IsException": (u32) -> i32;
    new_date = "HAKO_NewDate": (u32, f64) -> u32;
    get_class_id = "HAKO_GetClassID": (u32, u32) -> i32;
    is_instance_of = "HAKO_IsInstanceOf": (u32, u32, u32) -> i32;
    build_info = "HAKO_BuildInfo": () -> u32;
    recoverable_leak_check = "HAKO_RecoverableLeakCheck": () -> i32;
}

/// One instantiated engine binary.
///
/// Engine calls are re-entrant: while the engine runs, it calls host
/// imports, and those imports call back into the engine. Outside of any
/// import the store is borrowed from `store`; inside one it is reached
/// through the innermost active [`Caller`].
pub struct WasmFfi {
    store: RefCell<Store<HostState>>,
    memory: Memory,
    exports: Exports,
    imports: RefCell<Option<Weak<dyn HostImports>>>,
    callers: RefCell<Vec<*mut Caller<'static, HostState>>>,
}

impl WasmFfi {
    /// Compiles (or loads from cache) and instantiates an engine binary.
    pub fn new(wasm: &[u8], options: &WasmOptions) -> Result<Rc<Self>> {
        let engine = Engine::new(&Config::new())?;

        let module = match &options.cache_dir {
            Some(dir) => ModuleCache::new(dir.clone()).load_or_compile(&engine, wasm)?,
            None => Module::new(&engine, wasm)
                .map_err(|e| HakoError::Anyhow(e.context("compiling engine binary")))?,
        };
        Self::from_module(&engine, &module, options)
    }

    pub fn from_module(engine: &Engine, module: &Module, options: &WasmOptions) -> Result<Rc<Self>> {
        let mut wasi = WasiCtxBuilder::new();
        // No preopens, no environment.
        if options.inherit_stdio {
            wasi.inherit_stdout().inherit_stderr();
        }
        let state = HostState {
            wasi: wasi.build_p1(),
            link: HostLink(Weak::new()),
        };
        let mut store = Store::new(engine, state);

        let mut linker: Linker<HostState> = Linker::new(engine);
        p1::add_to_linker_sync(&mut linker, |s: &mut HostState| &mut s.wasi)?;
        let memory = Memory::new(
            &mut store,
            MemoryType::new(options.initial_pages, Some(options.maximum_pages)),
        )?;
        linker.define(&store, "env", "memory", memory)?;
        define_imports(&mut linker)?;

        let instance = linker
            .instantiate(&mut store, module)
            .context("instantiating engine binary")?;
        if let Ok(init) = instance.get_typed_func::<(), ()>(&mut store, "_initialize") {
            init.call(&mut store, ()).context("running _initialize")?;
        }
        let exports = Exports::load(&instance, &mut store)?;

        tracing::debug!(
            initial_pages = options.initial_pages,
            maximum_pages = options.maximum_pages,
            "Engine instantiated"
        );

        Ok(Rc::new_cyclic(|weak| {
            store.data_mut().link = HostLink(weak.clone());
            Self {
                store: RefCell::new(store),
                memory,
                exports,
                imports: RefCell::new(None),
                callers: RefCell::new(Vec::new()),
            }
        }))
    }

    fn host_imports(&self) -> Option<Rc<dyn HostImports>> {
        self.imports.borrow().as_ref().and_then(Weak::upgrade)
    }

    /// Makes `caller` the store used by engine calls until the frame drops.
    fn enter(&self, caller: &mut Caller<'_, HostState>) -> CallerFrame<'_> {
        let ptr = (caller as *mut Caller<'_, HostState>).cast::<Caller<'static, HostState>>();
        self.callers.borrow_mut().push(ptr);
        CallerFrame { ffi: self }
    }

    fn with_store<R>(&self, f: impl FnOnce(StoreContextMut<'_, HostState>) -> R) -> Result<R> {
        let active = self.callers.borrow().last().copied();
        if let Some(caller) = active {
            // SAFETY: the pointer was pushed by `enter` from a `&mut Caller`
            // that outlives its `CallerFrame`; the frame is still on the
            // stack (it pops on drop) and nothing else touches the caller
            // while the import runs.
            let caller = unsafe { &mut *caller };
            return Ok(f(caller.as_context_mut()));
        }
        let mut store = self
            .store
            .try_borrow_mut()
            .map_err(|_| HakoError::Memory("engine store is already in use".into()))?;
        Ok(f(store.as_context_mut()))
    }

    fn invoke<P: WasmParams, R: WasmResults>(&self, func: &TypedFunc<P, R>, params: P) -> Result<R> {
        self.with_store(|mut store| func.call(&mut store, params))?
            .map_err(HakoError::Anyhow)
    }
}

struct CallerFrame<'a> {
    ffi: &'a WasmFfi,
}

impl Drop for CallerFrame<'_> {
    fn drop(&mut self) {
        self.ffi.callers.borrow_mut().pop();
    }
}

fn dispatch<R>(
    caller: &mut Caller<'_, HostState>,
    fallback: R,
    f: impl FnOnce(&dyn HostImports) -> R,
) -> R {
    let Some(ffi) = caller.data().link.0.upgrade() else {
        tracing::error!("Engine called an import after the host was dropped");
        return fallback;
    };
    let Some(imports) = ffi.host_imports() else {
        tracing::warn!("Engine called an import before host imports were wired");
        return fallback;
    };
    let _frame = ffi.enter(caller);
    f(imports.as_ref())
}

fn define_imports(linker: &mut Linker<HostState>) -> anyhow::Result<()> {
    linker.func_wrap(
        "hako",
        "call_function",
        |mut caller: Caller<'_, HostState>, ctx: u32, this: u32, argc: i32, argv: u32, id: i32| {
            dispatch(&mut caller, 0u32, |h| h.call_function(ctx, this, argc, argv, id))
        },
    )?;
    linker.func_wrap(
        "hako",
        "interrupt_handler",
        |mut caller: Caller<'_, HostState>, rt: u32, ctx: u32, opaque: u32| {
            // No host to ask: stop the guest.
            dispatch(&mut caller, 1i32, |h| h.interrupt_handler(rt, ctx, opaque))
        },
    )?;
    linker.func_wrap(
        "hako",
        "load_module",
        |mut caller: Caller<'_, HostState>, rt: u32, ctx: u32, name: u32, opaque: u32, attrs: u32| {
            dispatch(&mut caller, 0u32, |h| h.load_module(rt, ctx, name, opaque, attrs))
        },
    )?;
    linker.func_wrap(
        "hako",
        "normalize_module",
        |mut caller: Caller<'_, HostState>, rt: u32, ctx: u32, base: u32, name: u32, opaque: u32| {
            dispatch(&mut caller, 0u32, |h| h.normalize_module(rt, ctx, base, name, opaque))
        },
    )?;
    linker.func_wrap(
        "hako",
        "resolve_module",
        |mut caller: Caller<'_, HostState>, rt: u32, ctx: u32, name: u32, current: u32, opaque: u32| {
            dispatch(&mut caller, 0u32, |h| h.resolve_module(rt, ctx, name, current, opaque))
        },
    )?;
    linker.func_wrap(
        "hako",
        "profile_function_start",
        |mut caller: Caller<'_, HostState>, ctx: u32, event: u32, opaque: u32| {
            dispatch(&mut caller, (), |h| h.profile_function_start(ctx, event, opaque))
        },
    )?;
    linker.func_wrap(
        "hako",
        "profile_function_end",
        |mut caller: Caller<'_, HostState>, ctx: u32, event: u32, opaque: u32| {
            dispatch(&mut caller, (), |h| h.profile_function_end(ctx, event, opaque))
        },
    )?;
    Ok(())
}

impl Ffi for WasmFfi {
    fn memory_size(&self) -> usize {
        let memory = self.memory;
        self.with_store(|store| memory.data_size(&store)).unwrap_or(0)
    }

    fn read_memory(&self, ptr: u32, buf: &mut [u8]) -> Result<()> {
        let memory = self.memory;
        let len = buf.len();
        self.with_store(|store| memory.read(&store, ptr as usize, buf))?
            .map_err(|e| HakoError::Memory(format!("read of {len} bytes at {ptr:#x}: {e}")))
    }

    fn write_memory(&self, ptr: u32, data: &[u8]) -> Result<()> {
        let memory = self.memory;
        self.with_store(|mut store| memory.write(&mut store, ptr as usize, data))?
            .map_err(|e| {
                HakoError::Memory(format!("write of {} bytes at {ptr:#x}: {e}", data.len()))
            })
    }

    fn set_host_imports(&self, imports: Weak<dyn HostImports>) {
        *self.imports.borrow_mut() = Some(imports);
    }

    fn malloc(&self, ctx: u32, size: u32) -> Result<u32> {
        self.invoke(&self.exports.malloc, (ctx, size))
    }
    fn free(&self, ctx: u32, ptr: u32) -> Result<()> {
        self.invoke(&self.exports.free, (ctx, ptr))
    }
    fn runtime_malloc(&self, rt: u32, size: u32) -> Result<u32> {
        self.invoke(&self.exports.runtime_malloc, (rt, size))
    }
    fn runtime_free(&self, rt: u32, ptr: u32) -> Result<()> {
        self.invoke(&self.exports.runtime_free, (rt, ptr))
    }
    fn free_cstring(&self, ctx: u32, ptr: u32) -> Result<()> {
        self.invoke(&self.exports.free_cstring, (ctx, ptr))
    }

    fn new_runtime(&self) -> Result<u32> {
        self.invoke(&self.exports.new_runtime, ())
    }
    fn free_runtime(&self, rt: u32) -> Result<()> {
        self.invoke(&self.exports.free_runtime, (rt,))
    }
    fn set_strip_info(&self, rt: u32, flags: i32) -> Result<()> {
        self.invoke(&self.exports.set_strip_info, (rt, flags))
    }
    fn get_strip_info(&self, rt: u32) -> Result<i32> {
        self.invoke(&self.exports.get_strip_info, (rt,))
    }
    fn runtime_set_memory_limit(&self, rt: u32, limit: u32) -> Result<()> {
        self.invoke(&self.exports.runtime_set_memory_limit, (rt, limit))
    }
    fn runtime_compute_memory_usage(&self, rt: u32, ctx: u32) -> Result<u32> {
        self.invoke(&self.exports.runtime_compute_memory_usage, (rt, ctx))
    }
    fn runtime_dump_memory_usage(&self, rt: u32) -> Result<u32> {
        self.invoke(&self.exports.runtime_dump_memory_usage, (rt,))
    }
    fn is_job_pending(&self, rt: u32) -> Result<i32> {
        self.invoke(&self.exports.is_job_pending, (rt,))
    }
    fn execute_pending_job(&self, rt: u32, max_jobs: i32, last_ctx_out: u32) -> Result<u32> {
        self.invoke(&self.exports.execute_pending_job, (rt, max_jobs, last_ctx_out))
    }
    fn enable_interrupt_handler(&self, rt: u32, opaque: u32) -> Result<()> {
        self.invoke(&self.exports.enable_interrupt_handler, (rt, opaque))
    }
    fn disable_interrupt_handler(&self, rt: u32) -> Result<()> {
        self.invoke(&self.exports.disable_interrupt_handler, (rt,))
    }
    fn enable_module_loader(&self, rt: u32, use_custom_normalize: i32) -> Result<()> {
        self.invoke(&self.exports.enable_module_loader, (rt, use_custom_normalize))
    }
    fn disable_module_loader(&self, rt: u32) -> Result<()> {
        self.invoke(&self.exports.disable_module_loader, (rt,))
    }
    fn enable_profile_calls(&self, rt: u32, sampling: u32, opaque: u32) -> Result<()> {
        self.invoke(&self.exports.enable_profile_calls, (rt, sampling, opaque))
    }

    fn new_context(&self, rt: u32, intrinsics: u32) -> Result<u32> {
        self.invoke(&self.exports.new_context, (rt, intrinsics))
    }
    fn free_context(&self, ctx: u32) -> Result<()> {
        self.invoke(&self.exports.free_context, (ctx,))
    }
    fn set_context_data(&self, ctx: u32, data: u32) -> Result<()> {
        self.invoke(&self.exports.set_context_data, (ctx, data))
    }
    fn get_context_data(&self, ctx: u32) -> Result<u32> {
        self.invoke(&self.exports.get_context_data, (ctx,))
    }
    fn set_no_strict_mode(&self, ctx: u32) -> Result<()> {
        self.invoke(&self.exports.set_no_strict_mode, (ctx,))
    }
    fn set_virtual_stack_size(&self, ctx: u32, size: u32) -> Result<()> {
        self.invoke(&self.exports.set_virtual_stack_size, (ctx, size))
    }
    fn context_set_max_stack_size(&self, ctx: u32, size: u32) -> Result<()> {
        self.invoke(&self.exports.context_set_max_stack_size, (ctx, size))
    }
    fn set_gc_threshold(&self, ctx: u32, threshold: i64) -> Result<()> {
        self.invoke(&self.exports.set_gc_threshold, (ctx, threshold))
    }

    fn get_undefined(&self) -> Result<u32> {
        self.invoke(&self.exports.get_undefined, ())
    }
    fn get_null(&self) -> Result<u32> {
        self.invoke(&self.exports.get_null, ())
    }
    fn get_false(&self) -> Result<u32> {
        self.invoke(&self.exports.get_false, ())
    }
    fn get_true(&self) -> Result<u32> {
        self.invoke(&self.exports.get_true, ())
    }

    fn dup_value(&self, ctx: u32, value: u32) -> Result<u32> {
        self.invoke(&self.exports.dup_value, (ctx, value))
    }
    fn free_value(&self, ctx: u32, value: u32) -> Result<()> {
        self.invoke(&self.exports.free_value, (ctx, value))
    }
    fn free_value_runtime(&self, rt: u32, value: u32) -> Result<()> {
        self.invoke(&self.exports.free_value_runtime, (rt, value))
    }
    fn throw(&self, ctx: u32, error: u32) -> Result<u32> {
        self.invoke(&self.exports.throw, (ctx, error))
    }
    fn new_error(&self, ctx: u32) -> Result<u32> {
        self.invoke(&self.exports.new_error, (ctx,))
    }
    fn get_last_error(&self, ctx: u32, maybe_exception: u32) -> Result<u32> {
        self.invoke(&self.exports.get_last_error, (ctx, maybe_exception))
    }
    fn new_object(&self, ctx: u32) -> Result<u32> {
        self.invoke(&self.exports.new_object, (ctx,))
    }
    fn new_object_proto(&self, ctx: u32, proto: u32) -> Result<u32> {
        self.invoke(&self.exports.new_object_proto, (ctx, proto))
    }
    fn new_array(&self, ctx: u32) -> Result<u32> {
        self.invoke(&self.exports.new_array, (ctx,))
    }
    fn new_array_buffer(&self, ctx: u32, buffer: u32, len: u32) -> Result<u32> {
        self.invoke(&self.exports.new_array_buffer, (ctx, buffer, len))
    }
    fn get_prop(&self, ctx: u32, this: u32, key: u32) -> Result<u32> {
        self.invoke(&self.exports.get_prop, (ctx, this, key))
    }
    fn get_prop_number(&self, ctx: u32, this: u32, index: i32) -> Result<u32> {
        self.invoke(&self.exports.get_prop_number, (ctx, this, index))
    }
    fn set_prop(&self, ctx: u32, this: u32, key: u32, value: u32) -> Result<i32> {
        self.invoke(&self.exports.set_prop, (ctx, this, key, value))
    }
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
    ) -> Result<i32> {
        self.invoke(
            &self.exports.define_prop,
            (ctx, this, key, value, get, set, configurable, enumerable, has_value),
        )
    }
    fn get_own_property_names(
        &self,
        ctx: u32,
        out_ptrs: u32,
        out_len: u32,
        obj: u32,
        flags: i32,
    ) -> Result<u32> {
        self.invoke(
            &self.exports.get_own_property_names,
            (ctx, out_ptrs, out_len, obj, flags),
        )
    }
    fn get_global_object(&self, ctx: u32) -> Result<u32> {
        self.invoke(&self.exports.get_global_object, (ctx,))
    }
    fn get_length(&self, ctx: u32, out_len: u32, value: u32) -> Result<i32> {
        self.invoke(&self.exports.get_length, (ctx, out_len, value))
    }
    fn new_float64(&self, ctx: u32, num: f64) -> Result<u32> {
        self.invoke(&self.exports.new_float64, (ctx, num))
    }
    fn new_bigint(&self, ctx: u32, low: u32, high: u32) -> Result<u32> {
        self.invoke(&self.exports.new_bigint, (ctx, low, high))
    }
    fn new_biguint(&self, ctx: u32, low: u32, high: u32) -> Result<u32> {
        self.invoke(&self.exports.new_biguint, (ctx, low, high))
    }
    fn get_float64(&self, ctx: u32, value: u32) -> Result<f64> {
        self.invoke(&self.exports.get_float64, (ctx, value))
    }
    fn new_string(&self, ctx: u32, string: u32) -> Result<u32> {
        self.invoke(&self.exports.new_string, (ctx, string))
    }
    fn to_cstring(&self, ctx: u32, value: u32) -> Result<u32> {
        self.invoke(&self.exports.to_cstring, (ctx, value))
    }
    fn new_symbol(&self, ctx: u32, description: u32, is_global: i32) -> Result<u32> {
        self.invoke(&self.exports.new_symbol, (ctx, description, is_global))
    }
    fn get_symbol_description_or_key(&self, ctx: u32, value: u32) -> Result<u32> {
        self.invoke(&self.exports.get_symbol_description_or_key, (ctx, value))
    }
    fn is_global_symbol(&self, ctx: u32, value: u32) -> Result<i32> {
        self.invoke(&self.exports.is_global_symbol, (ctx, value))
    }
    fn type_of(&self, ctx: u32, value: u32) -> Result<u32> {
        self.invoke(&self.exports.type_of, (ctx, value))
    }
    fn is_array(&self, ctx: u32, value: u32) -> Result<i32> {
        self.invoke(&self.exports.is_array, (ctx, value))
    }
    fn is_typed_array(&self, ctx: u32, value: u32) -> Result<i32> {
        self.invoke(&self.exports.is_typed_array, (ctx, value))
    }
    fn get_typed_array_type(&self, ctx: u32, value: u32) -> Result<i32> {
        self.invoke(&self.exports.get_typed_array_type, (ctx, value))
    }
    fn is_array_buffer(&self, value: u32) -> Result<i32> {
        self.invoke(&self.exports.is_array_buffer, (value,))
    }
    fn is_equal(&self, ctx: u32, a: u32, b: u32, op: i32) -> Result<i32> {
        self.invoke(&self.exports.is_equal, (ctx, a, b, op))
    }
    fn copy_array_buffer(&self, ctx: u32, value: u32, out_len: u32) -> Result<u32> {
        self.invoke(&self.exports.copy_array_buffer, (ctx, value, out_len))
    }
    fn copy_typed_array_buffer(&self, ctx: u32, value: u32, out_len: u32) -> Result<u32> {
        self.invoke(&self.exports.copy_typed_array_buffer, (ctx, value, out_len))
    }
    fn new_function(&self, ctx: u32, func_id: i32, name: u32) -> Result<u32> {
        self.invoke(&self.exports.new_function, (ctx, func_id, name))
    }
    fn call(&self, ctx: u32, func: u32, this: u32, argc: i32, argv: u32) -> Result<u32> {
        self.invoke(&self.exports.call, (ctx, func, this, argc, argv))
    }
    fn argv_get(&self, argv: u32, index: i32) -> Result<u32> {
        self.invoke(&self.exports.argv_get, (argv, index))
    }
    fn eval(
        &self,
        ctx: u32,
        code: u32,
        len: u32,
        filename: u32,
        detect_module: i32,
        flags: i32,
    ) -> Result<u32> {
        self.invoke(
            &self.exports.eval,
            (ctx, code, len, filename, detect_module, flags),
        )
    }
    fn compile_to_byte_code(
        &self,
        ctx: u32,
        code: u32,
        len: u32,
        filename: u32,
        detect_module: i32,
        flags: i32,
        out_len: u32,
    ) -> Result<u32> {
        self.invoke(
            &self.exports.compile_to_byte_code,
            (ctx, code, len, filename, detect_module, flags, out_len),
        )
    }
    fn eval_byte_code(&self, ctx: u32, buffer: u32, len: u32, load_only: i32) -> Result<u32> {
        self.invoke(&self.exports.eval_byte_code, (ctx, buffer, len, load_only))
    }
    fn new_promise_capability(&self, ctx: u32, resolve_funcs_out: u32) -> Result<u32> {
        self.invoke(&self.exports.new_promise_capability, (ctx, resolve_funcs_out))
    }
    fn is_promise(&self, ctx: u32, value: u32) -> Result<i32> {
        self.invoke(&self.exports.is_promise, (ctx, value))
    }
    fn promise_state(&self, ctx: u32, value: u32) -> Result<i32> {
        self.invoke(&self.exports.promise_state, (ctx, value))
    }
    fn promise_result(&self, ctx: u32, value: u32) -> Result<u32> {
        self.invoke(&self.exports.promise_result, (ctx, value))
    }
    fn get_module_namespace(&self, ctx: u32, module: u32) -> Result<u32> {
        self.invoke(&self.exports.get_module_namespace, (ctx, module))
    }
    fn dump(&self, ctx: u32, value: u32) -> Result<u32> {
        self.invoke(&self.exports.dump, (ctx, value))
    }
    fn to_json(&self, ctx: u32, value: u32, indent: i32) -> Result<u32> {
        self.invoke(&self.exports.to_json, (ctx, value, indent))
    }
    fn bjson_encode(&self, ctx: u32, value: u32) -> Result<u32> {
        self.invoke(&self.exports.bjson_encode, (ctx, value))
    }
    fn bjson_decode(&self, ctx: u32, buffer: u32) -> Result<u32> {
        self.invoke(&self.exports.bjson_decode, (ctx, buffer))
    }
    fn is_error(&self, ctx: u32, value: u32) -> Result<i32> {
        self.invoke(&self.exports.is_error, (ctx, value))
    }
    fn is_exception(&self, value: u32) -> Result<i32> {
        self.invoke(&self.exports.is_exception, (value,))
    }
    fn new_date(&self, ctx: u32, time: f64) -> Result<u32> {
        self.invoke(&self.exports.new_date, (ctx, time))
    }
    fn get_class_id(&self, ctx: u32, value: u32) -> Result<i32> {
        self.invoke(&self.exports.get_class_id, (ctx, value))
    }
    fn is_instance_of(&self, ctx: u32, value: u32, ctor: u32) -> Result<i32> {
        self.invoke(&self.exports.is_instance_of, (ctx, value, ctor))
    }

    fn build_info(&self) -> Result<u32> {
        self.invoke(&self.exports.build_info, ())
    }
    fn recoverable_leak_check(&self) -> Result<i32> {
        self.invoke(&self.exports.recoverable_leak_check, ())
    }
}
