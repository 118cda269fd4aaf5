use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::rc::Rc;

use crate::error::{HakoError, Result};
use crate::value::Value;

/// Anything that holds an engine resource and must be released explicitly.
///
/// `dispose` is idempotent: a second call is a no-op.
pub trait Disposable {
    fn alive(&self) -> bool;
    fn dispose(&self) -> Result<()>;
}

impl<T: Disposable> Disposable for Vec<T> {
    fn alive(&self) -> bool {
        self.iter().any(Disposable::alive)
    }

    /// Disposes elements last-to-first. Every element is attempted; the
    /// first failure is returned.
    fn dispose(&self) -> Result<()> {
        let mut first = None;
        for item in self.iter().rev() {
            if let Err(e) = item.dispose() {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl<T: Disposable> Disposable for Option<T> {
    fn alive(&self) -> bool {
        self.as_ref().is_some_and(Disposable::alive)
    }

    fn dispose(&self) -> Result<()> {
        self.as_ref().map_or(Ok(()), Disposable::dispose)
    }
}

pub type LocalBoxFuture<T> = Pin<Box<dyn Future<Output = T>>>;

/// The outcome of an operation that may or may not need to wait.
///
/// Callers check the tag instead of always going through an executor, so
/// the synchronous path stays synchronous.
pub enum MaybeAsync<T> {
    Immediate(T),
    Pending(LocalBoxFuture<T>),
}

impl<T: 'static> MaybeAsync<T> {
    pub fn pending(future: impl Future<Output = T> + 'static) -> Self {
        Self::Pending(Box::pin(future))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub async fn resolve(self) -> T {
        match self {
            Self::Immediate(v) => v,
            Self::Pending(f) => f.await,
        }
    }

    pub fn map<U: 'static>(self, f: impl FnOnce(T) -> U + 'static) -> MaybeAsync<U> {
        match self {
            Self::Immediate(v) => MaybeAsync::Immediate(f(v)),
            Self::Pending(fut) => MaybeAsync::Pending(Box::pin(async move { f(fut.await) })),
        }
    }
}

impl<T> From<T> for MaybeAsync<T> {
    fn from(value: T) -> Self {
        Self::Immediate(value)
    }
}

type Cleanup = Box<dyn FnOnce() -> Result<()>>;

enum Entry {
    Cleanup(Cleanup),
    Managed(Rc<dyn Disposable>),
}

/// A LIFO list of cleanups, run exactly once.
///
/// Values handed to [`Scope::manage`] are shared with the caller and
/// disposed when the scope is released; touching them afterwards is a
/// use-after-free error.
pub struct Scope {
    entries: RefCell<Vec<Entry>>,
    released: Cell<bool>,
}

impl Scope {
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
            released: Cell::new(false),
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.get()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.released.get() {
            return Err(HakoError::use_after_free("scope already released"));
        }
        Ok(())
    }

    pub fn add(&self, cleanup: impl FnOnce() -> Result<()> + 'static) -> Result<()> {
        self.ensure_open()?;
        self.entries
            .borrow_mut()
            .push(Entry::Cleanup(Box::new(cleanup)));
        Ok(())
    }

    /// Schedules `value` for disposal and hands back a shared handle to it.
    pub fn manage<T: Disposable + 'static>(&self, value: T) -> Result<Rc<T>> {
        self.ensure_open()?;
        let value = Rc::new(value);
        self.entries.borrow_mut().push(Entry::Managed(value.clone()));
        Ok(value)
    }

    /// Runs every cleanup last-to-first. Failures are logged, not returned.
    pub fn release(&self) {
        self.run_cleanups();
    }

    fn run_cleanups(&self) -> Vec<HakoError> {
        if self.released.replace(true) {
            return Vec::new();
        }
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        let mut failures = Vec::new();
        for entry in entries.into_iter().rev() {
            let outcome = match entry {
                Entry::Cleanup(cleanup) => guarded(cleanup),
                Entry::Managed(resource) if resource.alive() => guarded(|| resource.dispose()),
                Entry::Managed(_) => Ok(()),
            };
            if let Err(e) = outcome {
                tracing::error!(error = %e, "Scope cleanup failed");
                failures.push(e);
            }
        }
        failures
    }

    /// Runs `f` with a fresh scope that is released on every exit path.
    ///
    /// If `f` fails and a cleanup also fails, the first cleanup failure is
    /// attached to the returned error.
    pub fn with_scope<T>(f: impl FnOnce(&Scope) -> Result<T>) -> Result<T> {
        let scope = Scope::new();
        let result = f(&scope);
        let failures = scope.run_cleanups();
        attach_failures(result, failures)
    }

    /// [`with_scope`](Self::with_scope) for a block that awaits.
    ///
    /// The scope is shared with the block; if the returned future is dropped
    /// before completion, the scope is released when its last reference goes.
    pub async fn with_scope_async<T, F, Fut>(f: F) -> Result<T>
    where
        F: FnOnce(Rc<Scope>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let scope = Rc::new(Scope::new());
        let result = f(scope.clone()).await;
        let failures = scope.run_cleanups();
        attach_failures(result, failures)
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.run_cleanups();
    }
}

fn guarded(f: impl FnOnce() -> Result<()>) -> Result<()> {
    catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|_| Err(HakoError::Anyhow(anyhow::anyhow!("cleanup panicked"))))
}

fn attach_failures<T>(result: Result<T>, failures: Vec<HakoError>) -> Result<T> {
    match (result, failures.into_iter().next()) {
        (Err(e), Some(dispose)) => Err(e.with_dispose_error(dispose)),
        (result, _) => result,
    }
}

type OnUnwrap<F> = Box<dyn FnOnce(F) -> HakoError>;

/// Success or failure of an engine operation, where either side may hold
/// engine resources.
///
/// The failure side carries a callback that turns the raw error (usually an
/// exception handle) into a [`HakoError`]; it runs once, when the result is
/// unwrapped.
pub enum DisposableResult<S, F = Value> {
    Success(S),
    Fail(F, OnUnwrap<F>),
}

impl<S, F> DisposableResult<S, F> {
    pub fn success(value: S) -> Self {
        Self::Success(value)
    }

    pub fn fail(error: F, on_unwrap: impl FnOnce(F) -> HakoError + 'static) -> Self {
        Self::Fail(error, Box::new(on_unwrap))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_fail(&self) -> bool {
        !self.is_success()
    }

    pub fn value(&self) -> Option<&S> {
        match self {
            Self::Success(v) => Some(v),
            Self::Fail(..) => None,
        }
    }

    pub fn error(&self) -> Option<&F> {
        match self {
            Self::Success(_) => None,
            Self::Fail(e, _) => Some(e),
        }
    }

    /// Takes the value. On failure, resolves the error through the
    /// unwrap callback.
    pub fn unwrap(self) -> Result<S> {
        match self {
            Self::Success(v) => Ok(v),
            Self::Fail(error, on_unwrap) => Err(on_unwrap(error)),
        }
    }

    /// Takes the value, or `fallback` on failure. The error is dropped.
    pub fn unwrap_or(self, fallback: S) -> S {
        match self {
            Self::Success(v) => v,
            Self::Fail(..) => fallback,
        }
    }

    /// The raw outcome, without running the unwrap callback.
    pub fn into_inner(self) -> std::result::Result<S, F> {
        match self {
            Self::Success(v) => Ok(v),
            Self::Fail(e, _) => Err(e),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(S) -> U) -> DisposableResult<U, F> {
        match self {
            Self::Success(v) => DisposableResult::Success(f(v)),
            Self::Fail(e, cb) => DisposableResult::Fail(e, cb),
        }
    }
}

impl<S: Disposable, F: Disposable> Disposable for DisposableResult<S, F> {
    fn alive(&self) -> bool {
        match self {
            Self::Success(v) => v.alive(),
            Self::Fail(e, _) => e.alive(),
        }
    }

    fn dispose(&self) -> Result<()> {
        match self {
            Self::Success(v) => v.dispose(),
            Self::Fail(e, _) => e.dispose(),
        }
    }
}

impl<S: fmt::Debug, F: fmt::Debug> fmt::Debug for DisposableResult<S, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(v) => f.debug_tuple("Success").field(v).finish(),
            Self::Fail(e, _) => f.debug_tuple("Fail").field(e).finish(),
        }
    }
}
