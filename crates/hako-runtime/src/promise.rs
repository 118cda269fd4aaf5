use tokio::sync::watch;

use crate::context::Context;
use crate::error::{HakoError, Result};
use crate::mem::Disposable;
use crate::native::NativeError;
use crate::value::Value;

/// A guest promise together with the functions that settle it.
///
/// Settling disposes both resolving functions; the promise handle lives
/// until the deferred is dropped. Reactions queued by settling run the next
/// time the runtime's jobs are executed.
pub struct DeferredPromise {
    ctx: Context,
    promise: Value,
    resolve: Value,
    reject: Value,
    settled: watch::Sender<bool>,
}

impl DeferredPromise {
    pub(crate) fn new(ctx: &Context, promise: Value, resolve: Value, reject: Value) -> Self {
        Self {
            ctx: ctx.clone(),
            promise,
            resolve,
            reject,
            settled: watch::Sender::new(false),
        }
    }

    pub fn promise(&self) -> &Value {
        &self.promise
    }

    pub fn resolve(&self, value: Option<&Value>) -> Result<()> {
        self.settle(&self.resolve, value)
    }

    pub fn reject(&self, reason: Option<&Value>) -> Result<()> {
        self.settle(&self.reject, reason)
    }

    /// Rejects with a guest error built from `error`.
    pub fn reject_error(&self, error: &HakoError) -> Result<()> {
        let reason = self.ctx.new_value(&NativeError::from_error(error).into())?;
        self.reject(Some(&reason))
    }

    fn settle(&self, func: &Value, value: Option<&Value>) -> Result<()> {
        if !func.alive() {
            return Ok(());
        }
        let undefined;
        let arg = match value {
            Some(value) => value,
            None => {
                undefined = self.ctx.undefined()?;
                &undefined
            }
        };
        self.ctx.call_function(func, None, &[arg])?.unwrap()?;
        self.dispose_resolvers()?;
        self.settled.send_replace(true);
        Ok(())
    }

    fn dispose_resolvers(&self) -> Result<()> {
        self.resolve.dispose()?;
        self.reject.dispose()
    }

    pub fn is_settled(&self) -> bool {
        *self.settled.borrow()
    }

    /// Completes once `resolve` or `reject` has been called.
    pub async fn settled(&self) {
        let mut rx = self.settled.subscribe();
        // The sender lives in `self`, so the channel cannot close while
        // this future is borrowed from it.
        let _ = rx.wait_for(|settled| *settled).await;
    }
}

impl Disposable for DeferredPromise {
    fn alive(&self) -> bool {
        self.promise.alive() || self.resolve.alive() || self.reject.alive()
    }

    fn dispose(&self) -> Result<()> {
        self.promise.dispose()?;
        self.dispose_resolvers()
    }
}

impl std::fmt::Debug for DeferredPromise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredPromise")
            .field("promise", &self.promise)
            .field("settled", &self.is_settled())
            .finish()
    }
}
