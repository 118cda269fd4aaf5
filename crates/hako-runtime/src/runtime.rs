//! Runtimes: the engine-side heap, job queue and host hooks that a set of
//! contexts share.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::{Future, poll_fn};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{self, Poll};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::context::{Context, ContextOptions};
use crate::engine::Hako;
use crate::error::{HakoError, Result};
use crate::exception::fail;
use crate::ffi::StripOptions;
use crate::interrupt::InterruptHandler;
use crate::loader::ModuleHooks;
use crate::mem::{DisposableResult, LocalBoxFuture, Scope};
use crate::profiler::ProfilerEventHandler;
use crate::value::{JsResult, Value};

/// Engine heap statistics from [`Runtime::compute_memory_usage`].
///
/// The field set is defined by the engine; missing fields read as 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryUsage {
    /// -1 when unlimited.
    pub malloc_limit: i64,
    pub memory_used_size: i64,
    pub malloc_count: i64,
    pub memory_used_count: i64,
    pub atom_count: i64,
    pub atom_size: i64,
    pub str_count: i64,
    pub str_size: i64,
    pub obj_count: i64,
    pub obj_size: i64,
    pub prop_count: i64,
    pub prop_size: i64,
    pub shape_count: i64,
    pub shape_size: i64,
    pub lepus_func_count: i64,
    pub lepus_func_size: i64,
    pub lepus_func_code_size: i64,
    pub lepus_func_pc2line_count: i64,
    pub lepus_func_pc2line_size: i64,
    pub c_func_count: i64,
    pub array_count: i64,
    pub fast_array_count: i64,
    pub fast_array_elements: i64,
    pub binary_object_count: i64,
    pub binary_object_size: i64,
}

pub(crate) struct RuntimeInner {
    ptr: Cell<u32>,
    hako: Hako,
    contexts: RefCell<HashMap<u32, Context>>,
    system_context: Cell<u32>,
    interrupt: RefCell<Option<Rc<dyn InterruptHandler>>>,
    modules: RefCell<Option<Rc<ModuleHooks>>>,
    profiler: RefCell<Option<Rc<dyn ProfilerEventHandler>>>,
    /// Host futures backing guest promises, polled by `drive`.
    pending: RefCell<Vec<LocalBoxFuture<()>>>,
}

impl RuntimeInner {
    fn release(&self) {
        let ptr = self.ptr.replace(0);
        if ptr == 0 {
            return;
        }
        let ffi = self.hako.ffi();
        if let Err(e) = ffi.disable_interrupt_handler(ptr) {
            error!(rt = ptr, error = %e, "Failed to disable interrupt handler");
        }
        self.hako.bridge().unregister_runtime(ptr);
        self.interrupt.borrow_mut().take();
        self.modules.borrow_mut().take();
        self.profiler.borrow_mut().take();

        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        if !pending.is_empty() {
            debug!(rt = ptr, count = pending.len(), "Dropped unfinished host futures");
        }
        drop(pending);

        let contexts = std::mem::take(&mut *self.contexts.borrow_mut());
        for ctx in contexts.values() {
            ctx.release();
        }
        drop(contexts);
        self.system_context.set(0);

        if let Err(e) = ffi.free_runtime(ptr) {
            error!(rt = ptr, error = %e, "Failed to free runtime");
        }
        debug!(rt = ptr, "Runtime released");
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        self.release();
    }
}

/// An engine runtime. Owns its contexts; cloning shares the same runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    pub fn new(hako: &Hako) -> Result<Self> {
        let ptr = hako.ffi().new_runtime()?;
        if ptr == 0 {
            return Err(HakoError::Memory("engine could not allocate a runtime".into()));
        }
        let inner = Rc::new(RuntimeInner {
            ptr: Cell::new(ptr),
            hako: hako.clone(),
            contexts: RefCell::new(HashMap::new()),
            system_context: Cell::new(0),
            interrupt: RefCell::new(None),
            modules: RefCell::new(None),
            profiler: RefCell::new(None),
            pending: RefCell::new(Vec::new()),
        });
        hako.bridge().register_runtime(ptr, &inner);
        debug!(rt = ptr, "Runtime created");
        Ok(Self { inner })
    }

    pub(crate) fn from_inner(inner: Rc<RuntimeInner>) -> Self {
        Self { inner }
    }

    fn ptr(&self) -> Result<u32> {
        match self.inner.ptr.get() {
            0 => Err(HakoError::use_after_free("runtime is released")),
            ptr => Ok(ptr),
        }
    }

    pub fn hako(&self) -> &Hako {
        &self.inner.hako
    }

    pub fn alive(&self) -> bool {
        self.inner.ptr.get() != 0
    }

    /// Releases every context, drops queued host futures and frees the
    /// runtime. Releasing twice does nothing.
    pub fn release(&self) {
        self.inner.release();
    }

    // Contexts

    pub fn create_context(&self, options: ContextOptions) -> Result<Context> {
        let rt = self.ptr()?;
        let intrinsics = options.intrinsics.unwrap_or_default();
        let ptr = self.hako().ffi().new_context(rt, intrinsics.0)?;
        if ptr == 0 {
            return Err(HakoError::Memory("engine could not allocate a context".into()));
        }
        let ctx = Context::new(self.hako().clone(), &self.inner, rt, ptr);
        self.hako().bridge().register_context(ptr, ctx.inner());
        self.inner.contexts.borrow_mut().insert(ptr, ctx.clone());
        if let Some(size) = options.max_stack_size {
            ctx.set_max_stack_size(size)?;
        }
        debug!(rt, ctx = ptr, intrinsics = intrinsics.0, "Context created");
        Ok(ctx)
    }

    /// A default context created on first use and kept for the life of the
    /// runtime.
    pub fn system_context(&self) -> Result<Context> {
        if let Some(ctx) = self.context_for(self.inner.system_context.get()) {
            return Ok(ctx);
        }
        let ctx = self.create_context(ContextOptions::default())?;
        self.inner.system_context.set(ctx.raw_ptr());
        Ok(ctx)
    }

    pub(crate) fn context_for(&self, ptr: u32) -> Option<Context> {
        self.inner.contexts.borrow().get(&ptr).cloned()
    }

    /// Removes a context from the runtime. The caller drops the returned
    /// context after the map borrow has ended.
    pub(crate) fn forget_context(&self, ptr: u32) -> Option<Context> {
        let removed = self.inner.contexts.borrow_mut().remove(&ptr);
        if self.inner.system_context.get() == ptr {
            self.inner.system_context.set(0);
        }
        removed
    }

    pub fn context_count(&self) -> usize {
        self.inner.contexts.borrow().len()
    }

    // Limits and engine settings

    /// Caps the engine heap. `None` removes the cap.
    pub fn set_memory_limit(&self, limit: Option<u32>) -> Result<()> {
        let rt = self.ptr()?;
        self.hako()
            .ffi()
            .runtime_set_memory_limit(rt, limit.unwrap_or(u32::MAX))
    }

    pub fn set_strip_info(&self, options: StripOptions) -> Result<()> {
        self.hako().ffi().set_strip_info(self.ptr()?, options.to_flags())
    }

    pub fn strip_info(&self) -> Result<StripOptions> {
        let flags = self.hako().ffi().get_strip_info(self.ptr()?)?;
        Ok(StripOptions::from_flags(flags))
    }

    // Hooks

    pub fn enable_module_loader(&self, hooks: ModuleHooks) -> Result<()> {
        let rt = self.ptr()?;
        let custom_normalize = i32::from(hooks.normalizer.is_some());
        *self.inner.modules.borrow_mut() = Some(Rc::new(hooks));
        self.hako().ffi().enable_module_loader(rt, custom_normalize)
    }

    pub fn disable_module_loader(&self) -> Result<()> {
        let rt = self.ptr()?;
        self.inner.modules.borrow_mut().take();
        self.hako().ffi().disable_module_loader(rt)
    }

    /// Installs `handler`, replacing any previous one. Safe to call from
    /// inside a running handler.
    pub fn enable_interrupt_handler(&self, handler: Rc<dyn InterruptHandler>, opaque: u32) -> Result<()> {
        let rt = self.ptr()?;
        *self.inner.interrupt.borrow_mut() = Some(handler);
        self.hako().ffi().enable_interrupt_handler(rt, opaque)
    }

    pub fn disable_interrupt_handler(&self) -> Result<()> {
        let rt = self.ptr()?;
        self.inner.interrupt.borrow_mut().take();
        self.hako().ffi().disable_interrupt_handler(rt)
    }

    pub fn enable_profiler(
        &self,
        handler: Rc<dyn ProfilerEventHandler>,
        sampling: u32,
        opaque: u32,
    ) -> Result<()> {
        let rt = self.ptr()?;
        *self.inner.profiler.borrow_mut() = Some(handler);
        self.hako().ffi().enable_profile_calls(rt, sampling, opaque)
    }

    pub(crate) fn interrupt(&self) -> Option<Rc<dyn InterruptHandler>> {
        self.inner.interrupt.borrow().clone()
    }

    pub(crate) fn module_hooks(&self) -> Option<Rc<ModuleHooks>> {
        self.inner.modules.borrow().clone()
    }

    pub(crate) fn profiler(&self) -> Option<Rc<dyn ProfilerEventHandler>> {
        self.inner.profiler.borrow().clone()
    }

    // Jobs

    pub fn is_job_pending(&self) -> Result<bool> {
        Ok(self.hako().ffi().is_job_pending(self.ptr()?)? != 0)
    }

    /// Runs up to `max_jobs` queued jobs (-1 for all). Returns how many ran,
    /// or the exception the failing job threw.
    pub fn execute_pending_jobs(&self, max_jobs: i32) -> Result<JsResult<i32>> {
        let rt = self.ptr()?;
        let memory = self.hako().memory();
        let (raw, ctx_ptr) = Scope::with_scope(|scope| {
            let out = memory.allocate_runtime(rt, 4)?;
            let m = memory.clone();
            scope.add(move || m.free_runtime(rt, out))?;
            memory.write_u32(out, 0)?;
            let raw = self.hako().ffi().execute_pending_job(rt, max_jobs, out)?;
            Ok((raw, memory.read_u32(out)?))
        })?;

        if ctx_ptr == 0 {
            self.hako().ffi().free_value_runtime(rt, raw)?;
            return Ok(DisposableResult::success(0));
        }
        let Some(ctx) = self.context_for(ctx_ptr) else {
            self.hako().ffi().free_value_runtime(rt, raw)?;
            return Err(HakoError::configuration(format!(
                "pending job ran in unknown context {ctx_ptr:#x}"
            )));
        };
        let value = Value::owned(&ctx, raw);
        if value.is_number()? {
            Ok(DisposableResult::success(value.as_number()? as i32))
        } else {
            Ok(fail(value))
        }
    }

    // Host futures

    /// Queues a host future to be polled whenever the runtime is driven.
    pub(crate) fn spawn(&self, future: impl Future<Output = ()> + 'static) {
        self.inner.pending.borrow_mut().push(Box::pin(future));
    }

    pub fn pending_futures(&self) -> usize {
        self.inner.pending.borrow().len()
    }

    /// Polls queued host futures once. Returns whether any finished or new
    /// ones were queued meanwhile.
    fn poll_pending(&self, cx: &mut task::Context<'_>) -> bool {
        let mut futures = std::mem::take(&mut *self.inner.pending.borrow_mut());
        if futures.is_empty() {
            return false;
        }
        let before = futures.len();
        futures.retain_mut(|future| Pin::as_mut(future).poll(cx).is_pending());
        let finished = futures.len() != before;

        let mut pending = self.inner.pending.borrow_mut();
        let queued = !pending.is_empty();
        futures.append(&mut pending);
        *pending = futures;
        finished || queued
    }

    /// Runs all queued jobs. Returns whether any ran.
    fn run_jobs(&self) -> Result<bool> {
        match self.execute_pending_jobs(-1)? {
            DisposableResult::Success(count) => Ok(count > 0),
            failed => {
                if let Err(e) = failed.unwrap() {
                    warn!(error = %e, "Pending job threw");
                }
                Ok(true)
            }
        }
    }

    /// Drives queued host futures and the job queue until both are empty.
    pub async fn drive(&self) -> Result<()> {
        poll_fn(|cx| {
            loop {
                let polled = self.poll_pending(cx);
                let ran = match self.run_jobs() {
                    Ok(ran) => ran,
                    Err(e) => return Poll::Ready(Err(e)),
                };
                let idle = match self.is_job_pending() {
                    Ok(jobs) => !jobs && self.inner.pending.borrow().is_empty(),
                    Err(e) => return Poll::Ready(Err(e)),
                };
                if idle {
                    return Poll::Ready(Ok(()));
                }
                if !polled && !ran {
                    return Poll::Pending;
                }
            }
        })
        .await
    }

    /// Drives the runtime until `rx` yields.
    pub(crate) async fn drive_until<T>(&self, mut rx: oneshot::Receiver<T>) -> Result<T> {
        poll_fn(|cx| {
            loop {
                if let Poll::Ready(outcome) = Pin::new(&mut rx).poll(cx) {
                    return Poll::Ready(
                        outcome.map_err(|_| HakoError::configuration("promise was dropped before settling")),
                    );
                }
                let polled = self.poll_pending(cx);
                let ran = match self.run_jobs() {
                    Ok(ran) => ran,
                    Err(e) => return Poll::Ready(Err(e)),
                };
                if !polled && !ran {
                    return Poll::Pending;
                }
            }
        })
        .await
    }

    // Memory reports

    /// Heap statistics, computed in `ctx` (the system context by default).
    pub fn compute_memory_usage(&self, ctx: Option<&Context>) -> Result<MemoryUsage> {
        let rt = self.ptr()?;
        let ctx = match ctx {
            Some(ctx) => ctx.clone(),
            None => self.system_context()?,
        };
        let raw = self.hako().ffi().runtime_compute_memory_usage(rt, ctx.ptr()?)?;
        if raw == 0 {
            ctx.check_exception(0)?;
            return Err(HakoError::Memory("engine returned no memory usage".into()));
        }
        let report = Value::owned(&ctx, raw).stringify(0)?;
        let json = integral(serde_json::from_str(&report)?);
        Ok(serde_json::from_value(json)?)
    }

    /// The engine's human-readable memory report.
    pub fn dump_memory_usage(&self) -> Result<String> {
        let rt = self.ptr()?;
        let ptr = self.hako().ffi().runtime_dump_memory_usage(rt)?;
        let memory = self.hako().memory();
        let report = memory.read_cstring(ptr);
        memory.free_runtime(rt, ptr)?;
        report
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("ptr", &self.inner.ptr.get())
            .field("contexts", &self.context_count())
            .finish()
    }
}

/// The engine renders every number as a double; integral ones are turned
/// back into integers so they deserialise into `i64` fields.
fn integral(json: serde_json::Value) -> serde_json::Value {
    use serde_json::Value as J;
    match json {
        J::Number(n) => match n.as_f64() {
            Some(f) if n.as_i64().is_none() && f.fract() == 0.0 && f.abs() < 9.0e15 => {
                J::from(f as i64)
            }
            _ => J::Number(n),
        },
        J::Array(items) => J::Array(items.into_iter().map(integral).collect()),
        J::Object(map) => J::Object(map.into_iter().map(|(k, v)| (k, integral(v))).collect()),
        other => other,
    }
}
