//! The function-call relay between the engine and the host.
//!
//! Host closures are registered under integer IDs; the engine only ever sees
//! the ID. The same manager answers every other inbound import (interrupts,
//! module loading, profiling) by looking the runtime or context wrapper up
//! from the raw pointer the engine passes.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::context::{Context, ContextInner};
use crate::error::{HakoError, Result};
use crate::ffi::{HostImports, ModuleSourceTag};
use crate::ffi::abi::MODULE_SOURCE_STRUCT_SIZE;
use crate::loader::ModuleSource;
use crate::mem::{MaybeAsync, MemoryManager, Scope};
use crate::native::{NativeError, NativeValue};
use crate::profiler::TraceEvent;
use crate::runtime::{Runtime, RuntimeInner};
use crate::value::{JsResult, Value};

/// A host function as the bridge stores it.
///
/// Receives the calling context, `this` (borrowed from the engine) and the
/// arguments (owned by the bridge for the duration of the call; `dup` one to
/// keep it). Build these with [`host_function`] or [`async_host_function`].
pub type HostFunction = Rc<dyn Fn(&Context, &Value, &[Value]) -> MaybeAsync<Result<HostReturn>>>;

/// What a host function hands back to guest code.
pub enum HostReturn {
    Undefined,
    Value(Value),
    /// A failure is thrown into the engine.
    Result(JsResult<Value>),
    Native(NativeValue),
}

impl HostReturn {
    pub(crate) fn into_value(self, ctx: &Context) -> Result<Value> {
        match self {
            Self::Undefined => ctx.undefined(),
            Self::Value(value) => Ok(value),
            Self::Result(result) => result.unwrap(),
            Self::Native(native) => ctx.new_value(&native),
        }
    }
}

impl From<()> for HostReturn {
    fn from(_: ()) -> Self {
        Self::Undefined
    }
}

impl From<Value> for HostReturn {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<JsResult<Value>> for HostReturn {
    fn from(result: JsResult<Value>) -> Self {
        Self::Result(result)
    }
}

impl From<NativeValue> for HostReturn {
    fn from(native: NativeValue) -> Self {
        Self::Native(native)
    }
}

impl From<bool> for HostReturn {
    fn from(b: bool) -> Self {
        Self::Native(b.into())
    }
}

impl From<f64> for HostReturn {
    fn from(n: f64) -> Self {
        Self::Native(n.into())
    }
}

impl From<String> for HostReturn {
    fn from(s: String) -> Self {
        Self::Native(s.into())
    }
}

/// Wraps a synchronous closure as a [`HostFunction`].
pub fn host_function<F, R>(f: F) -> HostFunction
where
    F: Fn(&Context, &Value, &[Value]) -> Result<R> + 'static,
    R: Into<HostReturn>,
{
    Rc::new(move |ctx: &Context, this: &Value, args: &[Value]| {
        MaybeAsync::Immediate(f(ctx, this, args).map(Into::into))
    })
}

/// Wraps an async closure as a [`HostFunction`]. Guest code receives a
/// promise settled with the future's outcome.
///
/// `this` and the arguments are duplicated before the future starts, so
/// the future owns them.
pub fn async_host_function<F, Fut, R>(f: F) -> HostFunction
where
    F: Fn(Context, Value, Vec<Value>) -> Fut + 'static,
    Fut: Future<Output = Result<R>> + 'static,
    R: Into<HostReturn> + 'static,
{
    Rc::new(move |ctx: &Context, this: &Value, args: &[Value]| {
        let owned = this
            .dup()
            .and_then(|this| Ok((this, args.iter().map(Value::dup).collect::<Result<Vec<_>>>()?)));
        match owned {
            Ok((this, args)) => {
                let future = f(ctx.clone(), this, args);
                MaybeAsync::pending(async move { future.await.map(Into::into) })
            }
            Err(e) => MaybeAsync::Immediate(Err(e)),
        }
    })
}

struct Registration {
    ctx: u32,
    name: String,
    callback: HostFunction,
}

pub(crate) struct CallbackManager {
    memory: MemoryManager,
    next_id: Cell<i32>,
    functions: RefCell<HashMap<i32, Registration>>,
    contexts: RefCell<HashMap<u32, Weak<ContextInner>>>,
    runtimes: RefCell<HashMap<u32, Weak<RuntimeInner>>>,
}

/// Function IDs start here and only count up.
const FIRST_FUNCTION_ID: i32 = -32768;

impl CallbackManager {
    pub(crate) fn new(memory: MemoryManager) -> Self {
        Self {
            memory,
            next_id: Cell::new(FIRST_FUNCTION_ID),
            functions: RefCell::new(HashMap::new()),
            contexts: RefCell::new(HashMap::new()),
            runtimes: RefCell::new(HashMap::new()),
        }
    }

    // Registries

    pub(crate) fn register(&self, ctx: u32, name: &str, callback: HostFunction) -> Result<i32> {
        let id = self.next_id.get();
        let next = id
            .checked_add(1)
            .ok_or_else(|| HakoError::configuration("host function IDs exhausted"))?;
        self.next_id.set(next);
        self.functions.borrow_mut().insert(
            id,
            Registration {
                ctx,
                name: name.to_string(),
                callback,
            },
        );
        debug!(ctx, func_id = id, name, "Registered host function");
        Ok(id)
    }

    pub(crate) fn unregister(&self, id: i32) -> bool {
        let removed = self.functions.borrow_mut().remove(&id);
        removed.is_some()
    }

    pub(crate) fn register_context(&self, ptr: u32, ctx: &Rc<ContextInner>) {
        self.contexts.borrow_mut().insert(ptr, Rc::downgrade(ctx));
    }

    /// Forgets the context and every function registered for it.
    pub(crate) fn unregister_context(&self, ptr: u32) {
        self.contexts.borrow_mut().remove(&ptr);
        let removed: Vec<Registration> = {
            let mut functions = self.functions.borrow_mut();
            let ids: Vec<i32> = functions
                .iter()
                .filter(|(_, r)| r.ctx == ptr)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| functions.remove(&id)).collect()
        };
        if !removed.is_empty() {
            debug!(ctx = ptr, count = removed.len(), "Dropped host functions of released context");
        }
    }

    pub(crate) fn register_runtime(&self, ptr: u32, rt: &Rc<RuntimeInner>) {
        self.runtimes.borrow_mut().insert(ptr, Rc::downgrade(rt));
    }

    pub(crate) fn unregister_runtime(&self, ptr: u32) {
        self.runtimes.borrow_mut().remove(&ptr);
    }

    #[cfg(test)]
    pub(crate) fn function_count(&self) -> usize {
        self.functions.borrow().len()
    }

    pub(crate) fn function_name(&self, id: i32) -> Option<String> {
        self.functions.borrow().get(&id).map(|r| r.name.clone())
    }

    pub(crate) fn context(&self, ptr: u32) -> Option<Context> {
        let inner = self.contexts.borrow().get(&ptr).and_then(Weak::upgrade)?;
        Some(Context::from_inner(inner))
    }

    pub(crate) fn runtime(&self, ptr: u32) -> Option<Runtime> {
        let inner = self.runtimes.borrow().get(&ptr).and_then(Weak::upgrade)?;
        Some(Runtime::from_inner(inner))
    }

    fn undefined(&self) -> u32 {
        self.memory.ffi().get_undefined().unwrap_or(0)
    }

    // Host function calls

    fn invoke(
        &self,
        ctx: &Context,
        callback: &HostFunction,
        this: u32,
        argc: i32,
        argv: u32,
    ) -> Result<u32> {
        Scope::with_scope(|scope| {
            let this = scope.manage(Value::borrowed(ctx, this))?;
            let ptr = ctx.ptr()?;
            let ffi = self.memory.ffi();
            let args = (0..argc.max(0))
                .map(|i| {
                    let arg = ffi.argv_get(argv, i)?;
                    Ok(Value::owned(ctx, self.memory.dup_value(ptr, arg)?))
                })
                .collect::<Result<Vec<_>>>()?;
            let args = scope.manage(args)?;

            let value = match callback(ctx, &this, args.as_slice()) {
                MaybeAsync::Immediate(outcome) => outcome?.into_value(ctx)?,
                MaybeAsync::Pending(future) => ctx.new_promise_from(future)?,
            };
            // The wrapper goes away with this call; the engine gets its own
            // reference.
            let raw = self.memory.dup_value(ptr, value.handle()?)?;
            drop(value);
            Ok(raw)
        })
    }

    /// Throws `error` into the engine. If even that fails, the caller gets
    /// `undefined`.
    fn throw_into(&self, ctx: &Context, error: &HakoError) -> u32 {
        let thrown = ctx
            .new_value(&NativeValue::from(NativeError::from_error(error)))
            .and_then(|value| ctx.throw_error(&value));
        match thrown {
            Ok(sentinel) => sentinel,
            Err(e) => {
                warn!(error = %e, original = %error, "Failed to throw host error into the engine");
                self.undefined()
            }
        }
    }

    // Module loading

    fn module_source(&self, ctx: u32, source: Option<ModuleSource>) -> Result<u32> {
        let (tag, data) = match source {
            Some(ModuleSource::Source(code)) => {
                (ModuleSourceTag::String, self.memory.write_cstring(ctx, &code)?.ptr)
            }
            Some(ModuleSource::Precompiled(module)) => (ModuleSourceTag::Precompiled, module),
            Some(ModuleSource::Error) | None => (ModuleSourceTag::Error, 0),
        };
        let ptr = match self.memory.allocate(ctx, MODULE_SOURCE_STRUCT_SIZE) {
            Ok(ptr) => ptr,
            Err(e) => {
                if tag == ModuleSourceTag::String {
                    self.memory.free(ctx, data)?;
                }
                return Err(e);
            }
        };
        self.memory.write_u32(ptr, tag as u32)?;
        self.memory.write_u32(ptr + 4, data)?;
        Ok(ptr)
    }

    fn error_source(&self, ctx: u32) -> u32 {
        self.module_source(ctx, None).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to allocate module error record");
            0
        })
    }

    fn read_attributes(ctx: &Context, attributes: u32) -> Result<Option<BTreeMap<String, String>>> {
        if attributes == 0 {
            return Ok(None);
        }
        let value = Value::borrowed(ctx, attributes);
        if !value.is_object()? {
            return Ok(None);
        }
        let native = value.to_native_value()?.into_value();
        let NativeValue::Object(entries) = native else {
            return Ok(None);
        };
        let map = entries
            .borrow()
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
            .collect();
        Ok(Some(map))
    }

    fn string_arg(&self, ptr: u32) -> Option<String> {
        if ptr == 0 {
            return None;
        }
        match self.memory.read_cstring(ptr) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(error = %e, "Failed to read string from the engine");
                None
            }
        }
    }

    fn profile(&self, ctx: u32, event: u32, opaque: u32, start: bool) {
        let Some(context) = self.context(ctx) else {
            return;
        };
        let Some(runtime) = context.runtime() else {
            return;
        };
        let Some(handler) = runtime.profiler() else {
            return;
        };
        let Some(raw) = self.string_arg(event) else {
            return;
        };
        let event = match serde_json::from_str::<TraceEvent>(&raw) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, "Dropped undecodable profile event");
                return;
            }
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            if start {
                handler.on_function_start(&context, &event, opaque);
            } else {
                handler.on_function_end(&context, &event, opaque);
            }
        }));
        if outcome.is_err() {
            warn!("Profiler handler panicked");
        }
    }
}

impl HostImports for CallbackManager {
    fn call_function(&self, ctx: u32, this: u32, argc: i32, argv: u32, func_id: i32) -> u32 {
        let callback = self.functions.borrow().get(&func_id).map(|r| r.callback.clone());
        let Some(callback) = callback else {
            warn!(ctx, func_id, "Call to unregistered host function");
            return self.undefined();
        };
        let Some(context) = self.context(ctx) else {
            warn!(ctx, func_id, "Host function called from an unknown context");
            return self.undefined();
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.invoke(&context, &callback, this, argc, argv)
        }));
        match outcome {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => self.throw_into(&context, &e),
            Err(_) => {
                let name = self.function_name(func_id).unwrap_or_default();
                warn!(ctx, func_id, name = %name, "Host function panicked");
                let error = HakoError::configuration(format!("host function '{name}' panicked"));
                self.throw_into(&context, &error)
            }
        }
    }

    fn interrupt_handler(&self, rt: u32, ctx: u32, _opaque: u32) -> i32 {
        let Some(runtime) = self.runtime(rt) else {
            return 1;
        };
        let Some(handler) = runtime.interrupt() else {
            return 0;
        };
        let Some(context) = self.context(ctx) else {
            return 1;
        };
        match catch_unwind(AssertUnwindSafe(|| handler.interrupt(&runtime, &context))) {
            Ok(stop) => i32::from(stop),
            Err(_) => {
                warn!(rt, "Interrupt handler panicked, stopping execution");
                1
            }
        }
    }

    fn load_module(&self, rt: u32, ctx: u32, name: u32, _opaque: u32, attributes: u32) -> u32 {
        let hooks = self.runtime(rt).and_then(|r| r.module_hooks());
        let (Some(hooks), Some(context)) = (hooks, self.context(ctx)) else {
            return self.error_source(ctx);
        };
        let Some(name) = self.string_arg(name) else {
            return self.error_source(ctx);
        };
        let attributes = match Self::read_attributes(&context, attributes) {
            Ok(attributes) => attributes,
            Err(e) => {
                warn!(module = %name, error = %e, "Failed to read import attributes");
                None
            }
        };
        let source = catch_unwind(AssertUnwindSafe(|| hooks.loader.load(&name, attributes.as_ref())))
            .unwrap_or_else(|_| {
                warn!(module = %name, "Module loader panicked");
                None
            });
        if source.is_none() {
            debug!(module = %name, "Module loader returned nothing");
        }
        self.module_source(ctx, source).unwrap_or_else(|e| {
            warn!(module = %name, error = %e, "Failed to hand module source to the engine");
            0
        })
    }

    fn normalize_module(&self, rt: u32, ctx: u32, base: u32, name: u32, _opaque: u32) -> u32 {
        let normalizer = self
            .runtime(rt)
            .and_then(|r| r.module_hooks())
            .and_then(|h| h.normalizer.clone());
        let Some(normalizer) = normalizer else {
            return name;
        };
        let (Some(base_name), Some(module_name)) = (self.string_arg(base), self.string_arg(name)) else {
            return name;
        };
        let normalized = catch_unwind(AssertUnwindSafe(|| normalizer.normalize(&base_name, &module_name)))
            .unwrap_or_else(|_| {
                warn!(module = %module_name, "Module normalizer panicked");
                module_name.clone()
            });
        match self.memory.write_cstring(ctx, &normalized) {
            Ok(s) => s.ptr,
            Err(e) => {
                warn!(error = %e, "Failed to hand normalized module name to the engine");
                name
            }
        }
    }

    fn resolve_module(&self, rt: u32, ctx: u32, name: u32, current: u32, _opaque: u32) -> u32 {
        let resolver = self
            .runtime(rt)
            .and_then(|r| r.module_hooks())
            .and_then(|h| h.resolver.clone());
        let Some(resolver) = resolver else {
            return 0;
        };
        let Some(module_name) = self.string_arg(name) else {
            return 0;
        };
        let current = self.string_arg(current);
        let resolved = catch_unwind(AssertUnwindSafe(|| resolver.resolve(&module_name, current.as_deref())))
            .unwrap_or_else(|_| {
                warn!(module = %module_name, "Module resolver panicked");
                None
            });
        let Some(resolved) = resolved else {
            return 0;
        };
        self.memory
            .write_cstring(ctx, &resolved)
            .map(|s| s.ptr)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to hand resolved module path to the engine");
                0
            })
    }

    fn profile_function_start(&self, ctx: u32, event: u32, opaque: u32) {
        self.profile(ctx, event, opaque, true);
    }

    fn profile_function_end(&self, ctx: u32, event: u32, opaque: u32) {
        self.profile(ctx, event, opaque, false);
    }
}
