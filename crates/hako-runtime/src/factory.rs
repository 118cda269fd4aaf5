//! Host values into engine values.

use crate::context::Context;
use crate::error::{ConversionError, HakoError, Result};
use crate::mem::Scope;
use crate::native::{NativeError, NativeFunction, NativeSymbol, NativeValue};
use crate::value::Value;

/// Options for [`Context::new_value_with`].
#[derive(Default, Clone, Copy)]
pub struct ValueOptions<'a> {
    /// Name of a host function; overrides the name it was created with.
    pub name: Option<&'a str>,
    /// Register symbols with `Symbol.for`.
    pub global: bool,
    /// Prototype for plain objects.
    pub proto: Option<&'a Value>,
}

pub(crate) struct ValueFactory<'a> {
    ctx: &'a Context,
}

impl<'a> ValueFactory<'a> {
    pub(crate) fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Converts `value`. Cyclic input is rejected before the engine sees
    /// any of it.
    pub(crate) fn from_native(&self, value: &NativeValue, options: &ValueOptions<'_>) -> Result<Value> {
        value.check_cycles()?;
        self.convert(value, options)
    }

    fn convert(&self, value: &NativeValue, options: &ValueOptions<'_>) -> Result<Value> {
        let ctx = self.ctx.ptr()?;
        let ffi = self.ctx.ffi();
        match value {
            NativeValue::Undefined => self.ctx.undefined(),
            NativeValue::Null => self.ctx.null(),
            NativeValue::Boolean(true) => self.ctx.true_value(),
            NativeValue::Boolean(false) => self.ctx.false_value(),
            NativeValue::Number(n) => Ok(Value::owned(self.ctx, ffi.new_float64(ctx, *n)?)),
            NativeValue::String(s) => self.string(s),
            NativeValue::BigInt(i) => self.bigint(*i),
            NativeValue::Symbol(symbol) => self.symbol(symbol, options.global),
            NativeValue::Date(ms) => Ok(Value::owned(self.ctx, ffi.new_date(ctx, *ms)?)),
            NativeValue::Bytes(bytes) => self.array_buffer(bytes),
            NativeValue::Error(error) => self.error(error),
            NativeValue::Function(function) => self.function(function, options.name),
            NativeValue::Array(items) => {
                let array = Value::owned(self.ctx, ffi.new_array(ctx)?);
                for (i, item) in items.borrow().iter().enumerate() {
                    let index = u32::try_from(i)
                        .map_err(|_| ConversionError::Unsupported(format!("array index {i}")))?;
                    let element = self.convert(item, &ValueOptions::default())?;
                    array.set_property(index, &element)?;
                }
                Ok(array)
            }
            NativeValue::Object(entries) => {
                let raw = match options.proto {
                    Some(proto) => ffi.new_object_proto(ctx, proto.handle()?)?,
                    None => ffi.new_object(ctx)?,
                };
                let object = Value::owned(self.ctx, raw);
                for (key, item) in entries.borrow().iter() {
                    let property = self.convert(item, &ValueOptions::default())?;
                    object.set_property(key.as_str(), &property)?;
                }
                Ok(object)
            }
        }
    }

    pub(crate) fn string(&self, s: &str) -> Result<Value> {
        let ctx = self.ctx.ptr()?;
        let memory = self.ctx.memory();
        Scope::with_scope(|scope| {
            let text = memory.write_cstring(ctx, s)?;
            let m = memory.clone();
            scope.add(move || m.free(ctx, text.ptr))?;
            Ok(Value::owned(self.ctx, self.ctx.ffi().new_string(ctx, text.ptr)?))
        })
    }

    /// The engine takes a 64-bit integer as two 32-bit halves. Negative
    /// values go through the signed constructor in two's complement.
    pub(crate) fn bigint(&self, value: i128) -> Result<Value> {
        if !self.ctx.hako().has_bignum()? {
            return Err(HakoError::configuration(
                "BigInt is not supported by this engine build",
            ));
        }
        let ctx = self.ctx.ptr()?;
        let ffi = self.ctx.ffi();
        let raw = if value < 0 {
            let signed = i64::try_from(value).map_err(|_| {
                ConversionError::Unsupported(format!("BigInt {value} does not fit in 64 bits"))
            })?;
            let bits = signed as u64;
            ffi.new_bigint(ctx, bits as u32, (bits >> 32) as u32)?
        } else {
            let unsigned = u64::try_from(value).map_err(|_| {
                ConversionError::Unsupported(format!("BigInt {value} does not fit in 64 bits"))
            })?;
            ffi.new_biguint(ctx, unsigned as u32, (unsigned >> 32) as u32)?
        };
        Ok(Value::owned(self.ctx, raw))
    }

    fn symbol(&self, symbol: &NativeSymbol, global: bool) -> Result<Value> {
        let ctx = self.ctx.ptr()?;
        let memory = self.ctx.memory();
        Scope::with_scope(|scope| {
            let description = memory.write_cstring(ctx, &symbol.description)?;
            let m = memory.clone();
            scope.add(move || m.free(ctx, description.ptr))?;
            let global = i32::from(global || symbol.global);
            let raw = self.ctx.ffi().new_symbol(ctx, description.ptr, global)?;
            Ok(Value::owned(self.ctx, raw))
        })
    }

    pub(crate) fn array_buffer(&self, bytes: &[u8]) -> Result<Value> {
        let ctx = self.ctx.ptr()?;
        let len = u32::try_from(bytes.len())
            .map_err(|_| ConversionError::Unsupported(format!("{} byte buffer", bytes.len())))?;
        let buffer = self.ctx.memory().write_bytes(ctx, bytes)?;
        // The engine owns `buffer` from here on.
        let raw = self.ctx.ffi().new_array_buffer(ctx, buffer, len)?;
        if raw == 0 {
            self.ctx.check_exception(0)?;
            return Err(HakoError::Memory(format!("ArrayBuffer of {len} bytes")));
        }
        Ok(Value::owned(self.ctx, raw))
    }

    /// Engine errors do not pick up host metadata on construction, so every
    /// field is set explicitly.
    pub(crate) fn error(&self, error: &NativeError) -> Result<Value> {
        let ctx = self.ctx.ptr()?;
        let value = Value::owned(self.ctx, self.ctx.ffi().new_error(ctx)?);
        value.set_property("message", &self.string(&error.message)?)?;
        value.set_property("name", &self.string(&error.name)?)?;
        if let Some(stack) = &error.stack {
            value.set_property("stack", &self.string(stack)?)?;
        }
        if let Some(cause) = &error.cause {
            value.set_property("cause", &self.convert(cause, &ValueOptions::default())?)?;
        }
        Ok(value)
    }

    fn function(&self, function: &NativeFunction, name: Option<&str>) -> Result<Value> {
        match function {
            NativeFunction::Host { name: own, callback } => {
                let name = name.unwrap_or(own);
                if name.is_empty() {
                    return Err(HakoError::configuration("host functions need a name"));
                }
                self.ctx
                    .new_host_function(name, callback.clone())
                    .map(|(value, _)| value)
            }
            NativeFunction::Guest(guest) => {
                if guest.value().context().raw_ptr() != self.ctx.raw_ptr() {
                    return Err(HakoError::configuration(
                        "guest function belongs to another context",
                    ));
                }
                guest.value().dup()
            }
        }
    }
}
