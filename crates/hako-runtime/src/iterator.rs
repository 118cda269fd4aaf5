//! Host-side iteration over guest iterators.

use tracing::warn;

use crate::context::Context;
use crate::error::{HakoError, Result};
use crate::value::Value;

/// A guest iterator driven from Rust.
///
/// Yields each `value` until the guest reports `done`. Dropping or closing
/// it before then calls the guest's `return()` so generators run their
/// cleanup. A guest exception ends iteration without calling `return()`.
#[derive(Debug)]
pub struct JsIterator {
    ctx: Context,
    iterator: Value,
    next: Value,
    done: bool,
}

impl JsIterator {
    pub(crate) fn new(ctx: &Context, iterator: Value) -> Result<Self> {
        let next = iterator.get_property("next")?;
        Ok(Self {
            ctx: ctx.clone(),
            iterator,
            next,
            done: false,
        })
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Ends iteration early, calling the guest's `return()`.
    pub fn close(mut self) -> Result<()> {
        self.call_return()
    }

    /// Injects `error` at the iterator's current position via the guest's
    /// `throw()`. Iterators without one are closed and the call fails.
    pub fn throw(&mut self, error: &Value) -> Result<Option<Value>> {
        if self.done {
            return Ok(None);
        }
        let method = self.iterator.get_property("throw")?;
        if !method.is_function()? {
            self.call_return()?;
            return Err(HakoError::configuration("iterator has no throw method"));
        }
        let outcome = self
            .ctx
            .call_function(&method, Some(&self.iterator), &[error])
            .and_then(|result| result.unwrap())
            .and_then(|result| self.read_step(result));
        if !matches!(outcome, Ok(Some(_))) {
            self.finish();
        }
        outcome
    }

    fn step(&mut self) -> Result<Option<Value>> {
        let result = self
            .ctx
            .call_function(&self.next, Some(&self.iterator), &[])?
            .unwrap()?;
        self.read_step(result)
    }

    fn read_step(&self, result: Value) -> Result<Option<Value>> {
        if result.get_property("done")?.as_boolean()? {
            return Ok(None);
        }
        result.get_property("value").map(Some)
    }

    fn call_return(&mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        self.done = true;
        let method = self.iterator.get_property("return")?;
        if method.is_function()? {
            self.ctx
                .call_function(&method, Some(&self.iterator), &[])?
                .unwrap()?;
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.done = true;
        for handle in [&self.next, &self.iterator] {
            if let Err(e) = handle.dispose() {
                warn!(error = %e, "Failed to dispose guest iterator");
            }
        }
    }
}

impl Iterator for JsIterator {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(value)) => Some(Ok(value)),
            Ok(None) => {
                self.finish();
                None
            }
            Err(e) => {
                self.finish();
                Some(Err(e))
            }
        }
    }
}

impl Drop for JsIterator {
    fn drop(&mut self) {
        if !self.ctx.alive() {
            return;
        }
        if let Err(e) = self.call_return() {
            warn!(error = %e, "Iterator return() failed");
        }
    }
}
