//! Moving exceptions between the engine and the host.
//!
//! The engine keeps at most one pending exception per context. Calls that
//! throw either return 0 (property access, length, enumeration) or a tagged
//! sentinel handle (eval, call, JSON); both are resolved through
//! [`Context::take_exception`], which consumes the pending slot.

use crate::context::Context;
use crate::error::{HakoError, JsException, Result};
use crate::mem::DisposableResult;
use crate::native::{NativeError, NativeValue};
use crate::value::{JsResult, Value};

impl Context {
    /// Takes the pending exception, if any.
    ///
    /// Pass 0 to take whatever is pending, or the handle an engine call
    /// returned to only take it when that handle is the exception sentinel.
    /// A sentinel handle is freed here; any other handle is left alone.
    pub(crate) fn take_exception(&self, maybe_exception: u32) -> Result<Option<Value>> {
        let ctx = self.ptr()?;
        let raw = self.ffi().get_last_error(ctx, maybe_exception)?;
        if raw == 0 {
            return Ok(None);
        }
        if maybe_exception != 0 {
            self.memory().free_value(ctx, maybe_exception)?;
        }
        Ok(Some(Value::owned(self, raw)))
    }

    /// Fails with the pending exception, if any. See
    /// [`take_exception`](Self::take_exception).
    pub(crate) fn check_exception(&self, maybe_exception: u32) -> Result<()> {
        match self.take_exception(maybe_exception)? {
            Some(exception) => Err(into_error(exception)),
            None => Ok(()),
        }
    }

    /// Wraps the handle an engine call returned: the pending exception on
    /// failure, otherwise the handle itself as an owned value.
    pub(crate) fn exception_result(&self, raw: u32) -> Result<JsResult<Value>> {
        Ok(match self.take_exception(raw)? {
            Some(exception) => fail(exception),
            None => DisposableResult::success(Value::owned(self, raw)),
        })
    }

    /// Reads name, message, stack and cause of a thrown value.
    ///
    /// Thrown values are not always errors, and the engine cannot always
    /// serialise them; anything that does not decode becomes the message.
    pub fn exception_details(&self, exception: &Value) -> Result<JsException> {
        let ctx = self.ptr()?;
        let ptr = self.ffi().dump(ctx, exception.handle()?)?;
        let raw = self.memory().take_cstring(ctx, ptr)?;
        Ok(JsException::from_dump(&raw))
    }

    /// Turns a failed result into a host error. Successes pass through.
    pub fn unwrap_result<T>(&self, result: DisposableResult<T, Value>) -> Result<T> {
        result.unwrap()
    }

    /// Creates an engine error value from a host error, keeping the guest
    /// details when the error came from the engine in the first place.
    pub fn error_from(&self, error: &HakoError) -> Result<Value> {
        self.new_value(&NativeValue::from(NativeError::from_error(error)))
    }

    /// Throws `error` into the engine. The returned handle is the exception
    /// sentinel a host function hands back to its caller.
    pub fn throw_error(&self, error: &Value) -> Result<u32> {
        let ctx = self.ptr()?;
        self.ffi().throw(ctx, error.handle()?)
    }
}

/// A failed result whose unwrap reads the exception details and frees it.
pub(crate) fn fail<T>(exception: Value) -> JsResult<T> {
    DisposableResult::fail(exception, into_error)
}

/// Reads the details of `exception` into a host error and frees it.
pub(crate) fn into_error(exception: Value) -> HakoError {
    let details = exception.context().exception_details(&exception);
    let freed = exception.dispose();
    let error = match details {
        Ok(details) => HakoError::from_exception(details),
        Err(e) => e,
    };
    match freed {
        Ok(()) => error,
        Err(dispose) => error.with_dispose_error(dispose),
    }
}
