//! Execution contexts.
//!
//! A [`Context`] is one JavaScript realm inside a [`Runtime`]. The runtime
//! owns its contexts; a context only keeps a weak link back, so dropping the
//! runtime tears every context down with it.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::rc::{Rc, Weak};

use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::callback::{CallbackManager, HostFunction, HostReturn, async_host_function, host_function};
use crate::engine::Hako;
use crate::error::{ConversionError, HakoError, Result};
use crate::exception::fail;
use crate::factory::{ValueFactory, ValueOptions};
use crate::ffi::{EvalFlags, Ffi, PromiseState};
use crate::iterator::JsIterator;
use crate::mem::{DisposableResult, MemoryManager, Scope};
use crate::native::{NativeSymbol, NativeValue};
use crate::promise::DeferredPromise;
use crate::runtime::{Runtime, RuntimeInner};
use crate::value::{JsResult, Value};

const DEFAULT_FILE_NAME: &str = "file://eval";

/// How source text is evaluated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvalType {
    #[default]
    Global,
    Module,
}

/// Options for [`Context::eval_code`] and [`Context::compile_to_byte_code`].
#[derive(Debug, Clone, Default)]
pub struct EvalOptions {
    /// Shown in stack traces. `file://` is prepended when missing.
    pub file_name: Option<String>,
    pub eval_type: EvalType,
    pub strict: bool,
    pub compile_only: bool,
    /// Let the engine decide between global and module code. Defaults to
    /// off for evaluation and on for compilation.
    pub detect_module: Option<bool>,
}

impl EvalOptions {
    pub fn module() -> Self {
        Self {
            eval_type: EvalType::Module,
            ..Self::default()
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    fn file_name(&self) -> String {
        match self.file_name.as_deref() {
            None | Some("") => DEFAULT_FILE_NAME.to_string(),
            Some(name) if name.starts_with("file://") => name.to_string(),
            Some(name) => format!("file://{name}"),
        }
    }

    fn flags(&self) -> EvalFlags {
        let mut flags = match self.eval_type {
            EvalType::Global => EvalFlags::GLOBAL,
            EvalType::Module => EvalFlags::MODULE,
        };
        if self.strict {
            flags = flags | EvalFlags::STRICT;
        }
        if self.compile_only {
            flags = flags | EvalFlags::COMPILE_ONLY;
        }
        flags
    }
}

/// Options for [`Runtime::create_context`].
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    /// Built-ins to install. `None` installs the default set.
    pub intrinsics: Option<crate::ffi::Intrinsics>,
    pub max_stack_size: Option<u32>,
}

pub(crate) struct ContextInner {
    ptr: Cell<u32>,
    rt_ptr: u32,
    hako: Hako,
    runtime: Weak<RuntimeInner>,
    /// Well-known symbols, owned by the context until release.
    symbols: RefCell<HashMap<String, u32>>,
    /// Runtime-allocated C string attached with `set_opaque_data`.
    opaque: Cell<u32>,
}

impl ContextInner {
    fn release(&self) {
        let ptr = self.ptr.replace(0);
        if ptr == 0 {
            return;
        }
        let memory = self.hako.memory();

        for (name, raw) in self.symbols.borrow_mut().drain() {
            if let Err(e) = memory.free_value(ptr, raw) {
                error!(ctx = ptr, symbol = %name, error = %e, "Failed to free cached symbol");
            }
        }

        let opaque = self.opaque.replace(0);
        if opaque != 0 {
            if let Err(e) = memory.free_runtime(self.rt_ptr, opaque) {
                error!(ctx = ptr, error = %e, "Failed to free context opaque data");
            }
        }

        if let Some(runtime) = self.runtime.upgrade() {
            let removed = Runtime::from_inner(runtime).forget_context(ptr);
            drop(removed);
        }
        self.hako.bridge().unregister_context(ptr);

        if let Err(e) = self.hako.ffi().free_context(ptr) {
            error!(ctx = ptr, error = %e, "Failed to free context");
        }
        debug!(ctx = ptr, "Context released");
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        self.release();
    }
}

/// One JavaScript realm. Cloning is cheap and shares the same realm.
#[derive(Clone)]
pub struct Context {
    inner: Rc<ContextInner>,
}

impl Context {
    pub(crate) fn new(hako: Hako, runtime: &Rc<RuntimeInner>, rt_ptr: u32, ptr: u32) -> Self {
        Self {
            inner: Rc::new(ContextInner {
                ptr: Cell::new(ptr),
                rt_ptr,
                hako,
                runtime: Rc::downgrade(runtime),
                symbols: RefCell::new(HashMap::new()),
                opaque: Cell::new(0),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<ContextInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Rc<ContextInner> {
        &self.inner
    }

    /// The engine pointer, or a use-after-free error once released.
    pub(crate) fn ptr(&self) -> Result<u32> {
        match self.inner.ptr.get() {
            0 => Err(HakoError::use_after_free("context is released")),
            ptr => Ok(ptr),
        }
    }

    /// The engine pointer; 0 once released.
    pub(crate) fn raw_ptr(&self) -> u32 {
        self.inner.ptr.get()
    }

    pub(crate) fn hako(&self) -> &Hako {
        &self.inner.hako
    }

    pub(crate) fn ffi(&self) -> &Rc<dyn Ffi> {
        self.inner.hako.ffi()
    }

    pub(crate) fn memory(&self) -> &MemoryManager {
        self.inner.hako.memory()
    }

    /// The owning runtime, unless it is already gone.
    pub fn runtime(&self) -> Option<Runtime> {
        self.inner.runtime.upgrade().map(Runtime::from_inner)
    }

    pub fn alive(&self) -> bool {
        self.raw_ptr() != 0
    }

    /// Frees the context, its cached symbols and every host function
    /// registered for it. Values created here turn into use-after-free
    /// errors. Releasing twice does nothing.
    pub fn release(&self) {
        self.inner.release();
    }

    // Evaluation

    /// Evaluates source text. Guest exceptions come back as a failed result.
    pub fn eval_code(&self, code: &str, options: &EvalOptions) -> Result<JsResult<Value>> {
        let ctx = self.ptr()?;
        if code.is_empty() {
            return Ok(DisposableResult::success(self.undefined()?));
        }
        let memory = self.memory();
        let detect_module = i32::from(options.detect_module.unwrap_or(false));
        Scope::with_scope(|scope| {
            let source = memory.write_cstring(ctx, code)?;
            let m = memory.clone();
            scope.add(move || m.free(ctx, source.ptr))?;
            let file = memory.write_cstring(ctx, &options.file_name())?;
            let m = memory.clone();
            scope.add(move || m.free(ctx, file.ptr))?;

            let raw = self.ffi().eval(
                ctx,
                source.ptr,
                source.len,
                file.ptr,
                detect_module,
                options.flags().0 as i32,
            )?;
            self.exception_result(raw)
        })
    }

    /// Evaluates global code and unwraps the result.
    pub fn eval(&self, code: &str) -> Result<Value> {
        self.eval_code(code, &EvalOptions::default())?.unwrap()
    }

    /// Compiles source to engine bytecode without running it.
    pub fn compile_to_byte_code(
        &self,
        code: &str,
        options: &EvalOptions,
    ) -> Result<DisposableResult<Vec<u8>>> {
        let ctx = self.ptr()?;
        let memory = self.memory();
        let detect_module = i32::from(options.detect_module.unwrap_or(true));
        Scope::with_scope(|scope| {
            let source = memory.write_cstring(ctx, code)?;
            let m = memory.clone();
            scope.add(move || m.free(ctx, source.ptr))?;
            let file = memory.write_cstring(ctx, &options.file_name())?;
            let m = memory.clone();
            scope.add(move || m.free(ctx, file.ptr))?;
            let out_len = memory.allocate(ctx, 4)?;
            let m = memory.clone();
            scope.add(move || m.free(ctx, out_len))?;

            let buffer = self.ffi().compile_to_byte_code(
                ctx,
                source.ptr,
                source.len,
                file.ptr,
                detect_module,
                options.flags().0 as i32,
                out_len,
            )?;
            if buffer == 0 {
                return match self.take_exception(0)? {
                    Some(exception) => Ok(fail(exception)),
                    None => Err(HakoError::Memory("compilation produced no bytecode".into())),
                };
            }
            let m = memory.clone();
            scope.add(move || m.free(ctx, buffer))?;
            let len = memory.read_u32(out_len)? as usize;
            Ok(DisposableResult::success(memory.read_bytes(buffer, len)?))
        })
    }

    /// Runs bytecode from [`compile_to_byte_code`](Self::compile_to_byte_code).
    /// With `load_only` a module is linked but not evaluated.
    pub fn eval_byte_code(&self, bytecode: &[u8], load_only: bool) -> Result<JsResult<Value>> {
        let ctx = self.ptr()?;
        if bytecode.is_empty() {
            return Ok(DisposableResult::success(self.undefined()?));
        }
        let len = u32::try_from(bytecode.len())
            .map_err(|_| HakoError::Memory(format!("{} byte bytecode buffer", bytecode.len())))?;
        let memory = self.memory();
        Scope::with_scope(|scope| {
            let buffer = memory.write_bytes(ctx, bytecode)?;
            let m = memory.clone();
            scope.add(move || m.free(ctx, buffer))?;
            let raw = self.ffi().eval_byte_code(ctx, buffer, len, i32::from(load_only))?;
            self.exception_result(raw)
        })
    }

    /// Calls `func` with `this` (undefined when `None`).
    pub fn call_function(
        &self,
        func: &Value,
        this: Option<&Value>,
        args: &[&Value],
    ) -> Result<JsResult<Value>> {
        let ctx = self.ptr()?;
        let memory = self.memory();
        Scope::with_scope(|scope| {
            let this = match this {
                Some(value) => value.handle()?,
                None => self.ffi().get_undefined()?,
            };
            let handles = args.iter().map(|a| a.handle()).collect::<Result<Vec<_>>>()?;
            let argv = if handles.is_empty() {
                0
            } else {
                let argv = memory.write_pointer_array(ctx, &handles)?;
                let m = memory.clone();
                scope.add(move || m.free(ctx, argv))?;
                argv
            };
            let argc = i32::try_from(handles.len())
                .map_err(|_| ConversionError::Unsupported(format!("{} arguments", handles.len())))?;
            let raw = self.ffi().call(ctx, func.handle()?, this, argc, argv)?;
            self.exception_result(raw)
        })
    }

    /// The namespace object of an evaluated module.
    pub fn get_module_namespace(&self, module: &Value) -> Result<JsResult<Value>> {
        let ctx = self.ptr()?;
        let raw = self.ffi().get_module_namespace(ctx, module.handle()?)?;
        self.exception_result(raw)
    }

    // Constants

    pub fn undefined(&self) -> Result<Value> {
        self.ptr()?;
        Ok(Value::borrowed(self, self.ffi().get_undefined()?))
    }

    pub fn null(&self) -> Result<Value> {
        self.ptr()?;
        Ok(Value::borrowed(self, self.ffi().get_null()?))
    }

    pub fn true_value(&self) -> Result<Value> {
        self.ptr()?;
        Ok(Value::borrowed(self, self.ffi().get_true()?))
    }

    pub fn false_value(&self) -> Result<Value> {
        self.ptr()?;
        Ok(Value::borrowed(self, self.ffi().get_false()?))
    }

    pub fn global_object(&self) -> Result<Value> {
        let ctx = self.ptr()?;
        Ok(Value::owned(self, self.ffi().get_global_object(ctx)?))
    }

    // Value construction

    pub fn new_value(&self, value: &NativeValue) -> Result<Value> {
        self.new_value_with(value, &ValueOptions::default())
    }

    pub fn new_value_with(&self, value: &NativeValue, options: &ValueOptions<'_>) -> Result<Value> {
        ValueFactory::new(self).from_native(value, options)
    }

    pub fn new_object(&self) -> Result<Value> {
        let ctx = self.ptr()?;
        Ok(Value::owned(self, self.ffi().new_object(ctx)?))
    }

    pub fn new_object_with_prototype(&self, proto: &Value) -> Result<Value> {
        let ctx = self.ptr()?;
        Ok(Value::owned(self, self.ffi().new_object_proto(ctx, proto.handle()?)?))
    }

    pub fn new_array(&self) -> Result<Value> {
        let ctx = self.ptr()?;
        Ok(Value::owned(self, self.ffi().new_array(ctx)?))
    }

    pub fn new_string(&self, s: &str) -> Result<Value> {
        ValueFactory::new(self).string(s)
    }

    pub fn new_number(&self, n: f64) -> Result<Value> {
        let ctx = self.ptr()?;
        Ok(Value::owned(self, self.ffi().new_float64(ctx, n)?))
    }

    pub fn new_bool(&self, b: bool) -> Result<Value> {
        if b { self.true_value() } else { self.false_value() }
    }

    /// A new symbol, or the registry symbol for `description` when `global`.
    pub fn new_symbol(&self, description: &str, global: bool) -> Result<Value> {
        let symbol = NativeValue::Symbol(NativeSymbol {
            description: description.to_string(),
            global,
        });
        self.new_value(&symbol)
    }

    pub fn new_bigint(&self, n: i128) -> Result<Value> {
        ValueFactory::new(self).bigint(n)
    }

    /// A `Date` at `epoch_ms` milliseconds since the Unix epoch.
    pub fn new_date(&self, epoch_ms: f64) -> Result<Value> {
        let ctx = self.ptr()?;
        Ok(Value::owned(self, self.ffi().new_date(ctx, epoch_ms)?))
    }

    pub fn new_array_buffer(&self, bytes: &[u8]) -> Result<Value> {
        ValueFactory::new(self).array_buffer(bytes)
    }

    pub fn new_error(&self, name: &str, message: &str) -> Result<Value> {
        ValueFactory::new(self).error(&crate::native::NativeError::new(name, message))
    }

    // Host functions

    /// Exposes a synchronous host closure as a guest function.
    pub fn new_function<F, R>(&self, name: &str, f: F) -> Result<Value>
    where
        F: Fn(&Context, &Value, &[Value]) -> Result<R> + 'static,
        R: Into<HostReturn>,
    {
        self.new_host_function(name, host_function(f)).map(|(value, _)| value)
    }

    /// Exposes an async host closure as a guest function returning a
    /// promise. The promise settles as the runtime is driven.
    pub fn new_async_function<F, Fut, R>(&self, name: &str, f: F) -> Result<Value>
    where
        F: Fn(Context, Value, Vec<Value>) -> Fut + 'static,
        Fut: Future<Output = Result<R>> + 'static,
        R: Into<HostReturn> + 'static,
    {
        self.new_host_function(name, async_host_function(f)).map(|(value, _)| value)
    }

    /// Registers `callback` with the bridge and creates the guest function
    /// for it. Returns the function and its bridge ID.
    pub(crate) fn new_host_function(&self, name: &str, callback: HostFunction) -> Result<(Value, i32)> {
        if name.is_empty() {
            return Err(HakoError::configuration("host functions need a name"));
        }
        let ctx = self.ptr()?;
        let bridge = self.hako().bridge();
        let id = bridge.register(ctx, name, callback)?;
        let memory = self.memory();
        let created = Scope::with_scope(|scope| {
            let label = memory.write_cstring(ctx, name)?;
            let m = memory.clone();
            scope.add(move || m.free(ctx, label.ptr))?;
            let raw = self.ffi().new_function(ctx, id, label.ptr)?;
            self.exception_result(raw)?.unwrap()
        });
        match created {
            Ok(value) => Ok((value, id)),
            Err(e) => {
                bridge.unregister(id);
                Err(e)
            }
        }
    }

    // Promises

    /// A new pending promise with its resolving functions.
    pub fn new_promise(&self) -> Result<DeferredPromise> {
        let ctx = self.ptr()?;
        let memory = self.memory();
        Scope::with_scope(|scope| {
            let out = memory.allocate_pointer_array(ctx, 2)?;
            let m = memory.clone();
            scope.add(move || m.free(ctx, out))?;
            let raw = self.ffi().new_promise_capability(ctx, out)?;
            if raw == 0 {
                self.check_exception(0)?;
                return Err(HakoError::Memory("promise capability".into()));
            }
            let promise = self.exception_result(raw)?.unwrap()?;
            let funcs = memory.read_pointer_array(out, 2)?;
            let resolve = Value::owned(self, funcs[0]);
            let reject = Value::owned(self, funcs[1]);
            Ok(DeferredPromise::new(self, promise, resolve, reject))
        })
    }

    /// A guest promise settled with the outcome of `future`.
    ///
    /// The future is queued on the runtime and makes progress whenever the
    /// runtime is driven ([`Runtime::drive`], [`Context::await_promise`]).
    pub fn new_promise_from<F, R>(&self, future: F) -> Result<Value>
    where
        F: Future<Output = Result<R>> + 'static,
        R: Into<HostReturn> + 'static,
    {
        let runtime = self
            .runtime()
            .ok_or_else(|| HakoError::use_after_free("runtime is released"))?;
        let deferred = self.new_promise()?;
        let promise = deferred.promise().dup()?;
        let ctx = self.clone();
        runtime.spawn(async move {
            let outcome = future.await.and_then(|r| r.into().into_value(&ctx));
            let settled = match outcome {
                Ok(value) => deferred.resolve(Some(&value)),
                Err(e) => deferred.reject_error(&e),
            };
            if let Err(e) = settled {
                warn!(ctx = ctx.raw_ptr(), error = %e, "Failed to settle host promise");
            }
        });
        Ok(promise)
    }

    /// Waits for `value` to settle. Non-promises resolve to themselves.
    ///
    /// An already-settled promise is answered without a round trip through
    /// the job queue. A pending one is driven together with the runtime's
    /// queued host futures until it settles.
    pub async fn resolve_promise(&self, value: &Value) -> Result<JsResult<Value>> {
        let promise = match self.promise_resolve(value)? {
            DisposableResult::Success(promise) => promise,
            failed => return Ok(failed),
        };
        match promise.promise_state()? {
            PromiseState::Fulfilled => {
                let result = promise.promise_result()?;
                Ok(DisposableResult::success(self.or_undefined(result)?))
            }
            PromiseState::Rejected => {
                let result = promise.promise_result()?;
                Ok(fail(self.or_undefined(result)?))
            }
            PromiseState::Pending => self.settle_pending(&promise).await,
        }
    }

    /// [`resolve_promise`](Self::resolve_promise), with a rejection turned
    /// into an error.
    pub async fn await_promise(&self, value: &Value) -> Result<Value> {
        self.resolve_promise(value).await?.unwrap()
    }

    fn or_undefined(&self, value: Option<Value>) -> Result<Value> {
        match value {
            Some(value) => Ok(value),
            None => self.undefined(),
        }
    }

    fn promise_resolve(&self, value: &Value) -> Result<JsResult<Value>> {
        let global = self.global_object()?;
        let ctor = global.get_property("Promise")?;
        let resolve = ctor.get_property("resolve")?;
        self.call_function(&resolve, Some(&ctor), &[value])
    }

    async fn settle_pending(&self, promise: &Value) -> Result<JsResult<Value>> {
        let runtime = self
            .runtime()
            .ok_or_else(|| HakoError::use_after_free("runtime is released"))?;
        let (tx, rx) = oneshot::channel::<JsResult<Value>>();
        let tx = Rc::new(RefCell::new(Some(tx)));

        let on_fulfilled = {
            let tx = tx.clone();
            host_function(move |ctx, _, args| {
                let value = match args.first() {
                    Some(arg) => arg.dup()?,
                    None => ctx.undefined()?,
                };
                if let Some(tx) = tx.borrow_mut().take() {
                    let _ = tx.send(DisposableResult::success(value));
                }
                Ok(())
            })
        };
        let on_rejected = host_function(move |ctx, _, args| {
            let reason = match args.first() {
                Some(arg) => arg.dup()?,
                None => ctx.undefined()?,
            };
            if let Some(tx) = tx.borrow_mut().take() {
                let _ = tx.send(fail(reason));
            }
            Ok(())
        });

        // Unregisters on every exit, including a dropped future.
        let mut registered = Registered::new(self.hako().bridge().clone());
        let (on_fulfilled, ok_id) = self.new_host_function("resolve", on_fulfilled)?;
        registered.ids.push(ok_id);
        let (on_rejected, err_id) = self.new_host_function("reject", on_rejected)?;
        registered.ids.push(err_id);

        let then = promise.get_property("then")?;
        self.call_function(&then, Some(promise), &[&on_fulfilled, &on_rejected])?
            .unwrap()?;
        runtime.drive_until(rx).await
    }

    // Iteration and symbols

    /// Iterates `iterable` through its `Symbol.iterator` method.
    pub fn get_iterator(&self, iterable: &Value) -> Result<JsIterator> {
        let symbol = self.get_well_known_symbol("iterator")?;
        let method = iterable.get_property(&symbol)?;
        if !method.is_function()? {
            return Err(ConversionError::TypeMismatch { expected: "iterable" }.into());
        }
        let iterator = self.call_function(&method, Some(iterable), &[])?.unwrap()?;
        JsIterator::new(self, iterator)
    }

    /// `Symbol.<name>`, cached for the life of the context.
    pub fn get_well_known_symbol(&self, name: &str) -> Result<Value> {
        self.ptr()?;
        if let Some(raw) = self.inner.symbols.borrow().get(name) {
            return Ok(Value::borrowed(self, *raw));
        }
        let global = self.global_object()?;
        let symbol = global.get_property("Symbol")?.get_property(name)?;
        if !symbol.is_symbol()? {
            return Err(ConversionError::TypeMismatch {
                expected: "a well-known symbol",
            }
            .into());
        }
        let raw = symbol.into_raw();
        self.inner.symbols.borrow_mut().insert(name.to_string(), raw);
        Ok(Value::borrowed(self, raw))
    }

    // Serialisation

    /// The engine's JSON dump of `value`. Values the engine cannot render as
    /// JSON come back as a string.
    pub fn dump(&self, value: &Value) -> Result<serde_json::Value> {
        let ctx = self.ptr()?;
        let ptr = self.ffi().dump(ctx, value.handle()?)?;
        let raw = self.memory().take_cstring(ctx, ptr)?;
        Ok(serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw)))
    }

    /// Encodes `value` in the engine's binary JSON format.
    pub fn bjson_encode(&self, value: &Value) -> Result<Vec<u8>> {
        let ctx = self.ptr()?;
        let raw = self.ffi().bjson_encode(ctx, value.handle()?)?;
        let buffer = self.exception_result(raw)?.unwrap()?;
        buffer.copy_array_buffer()
    }

    pub fn bjson_decode(&self, bytes: &[u8]) -> Result<Value> {
        let ctx = self.ptr()?;
        let buffer = self.new_array_buffer(bytes)?;
        let raw = self.ffi().bjson_decode(ctx, buffer.handle()?)?;
        self.exception_result(raw)?.unwrap()
    }

    // Engine settings

    pub fn set_max_stack_size(&self, size: u32) -> Result<()> {
        self.ffi().context_set_max_stack_size(self.ptr()?, size)
    }

    pub fn set_virtual_stack_size(&self, size: u32) -> Result<()> {
        self.ffi().set_virtual_stack_size(self.ptr()?, size)
    }

    pub fn set_no_strict_mode(&self) -> Result<()> {
        self.ffi().set_no_strict_mode(self.ptr()?)
    }

    pub fn set_gc_threshold(&self, threshold: i64) -> Result<()> {
        self.ffi().set_gc_threshold(self.ptr()?, threshold)
    }

    // Opaque data

    /// Attaches a string to the context, replacing any previous one.
    pub fn set_opaque_data(&self, data: &str) -> Result<()> {
        let ctx = self.ptr()?;
        self.free_opaque_data()?;
        let ptr = self.memory().write_runtime_cstring(self.inner.rt_ptr, data)?;
        if let Err(e) = self.ffi().set_context_data(ctx, ptr) {
            self.memory().free_runtime(self.inner.rt_ptr, ptr)?;
            return Err(e);
        }
        self.inner.opaque.set(ptr);
        Ok(())
    }

    pub fn opaque_data(&self) -> Result<Option<String>> {
        let ctx = self.ptr()?;
        match self.ffi().get_context_data(ctx)? {
            0 => Ok(None),
            ptr => self.memory().read_cstring(ptr).map(Some),
        }
    }

    pub fn free_opaque_data(&self) -> Result<()> {
        let ctx = self.ptr()?;
        let ptr = self.inner.opaque.replace(0);
        if ptr == 0 {
            return Ok(());
        }
        self.ffi().set_context_data(ctx, 0)?;
        self.memory().free_runtime(self.inner.rt_ptr, ptr)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("ptr", &self.raw_ptr())
            .field("rt", &self.inner.rt_ptr)
            .finish()
    }
}

/// Host functions registered for the duration of one call.
struct Registered {
    bridge: Rc<CallbackManager>,
    ids: Vec<i32>,
}

impl Registered {
    fn new(bridge: Rc<CallbackManager>) -> Self {
        Self { bridge, ids: Vec::new() }
    }
}

impl Drop for Registered {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            self.bridge.unregister(id);
        }
    }
}
