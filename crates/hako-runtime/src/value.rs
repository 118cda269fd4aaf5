use std::cell::Cell;
use std::fmt;

use crate::context::Context;
use crate::error::{ConversionError, HakoError, Result};
use crate::ffi::{EqualOp, PromiseState, PropertyEnumFlags, TypedArrayType};
use crate::mem::{Disposable, DisposableResult, Scope};
use crate::native::{GuestFunction, NativeError, NativeFunction, NativeSymbol, NativeValue};

/// Outcome of an engine operation that can throw. The failure side holds
/// the thrown value; unwrapping it produces a [`HakoError`] with the guest's
/// name, message, stack and cause.
pub type JsResult<T> = DisposableResult<T, Value>;

/// Whether a [`Value`] is responsible for releasing its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Released with `HAKO_FreeValuePointer` on dispose.
    Owned,
    /// Someone else (usually the engine) owns the handle; dispose only
    /// forgets it.
    Borrowed,
}

/// The three ways to name a property.
#[derive(Clone, Copy)]
pub enum PropertyKey<'a> {
    Name(&'a str),
    Index(u32),
    Value(&'a Value),
}

impl<'a> From<&'a str> for PropertyKey<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

impl<'a> From<&'a String> for PropertyKey<'a> {
    fn from(name: &'a String) -> Self {
        Self::Name(name)
    }
}

impl From<u32> for PropertyKey<'_> {
    fn from(index: u32) -> Self {
        Self::Index(index)
    }
}

impl<'a> From<&'a Value> for PropertyKey<'a> {
    fn from(value: &'a Value) -> Self {
        Self::Value(value)
    }
}

/// A property descriptor for [`Value::define_property`].
#[derive(Default)]
pub struct PropertyDescriptor<'a> {
    pub value: Option<&'a Value>,
    pub get: Option<&'a Value>,
    pub set: Option<&'a Value>,
    pub configurable: bool,
    pub enumerable: bool,
}

/// One engine value.
///
/// A `Value` is the unit of ownership across the boundary. An owned value
/// frees its handle exactly once, on [`dispose`](Value::dispose) or on drop;
/// a borrowed one never does. Once disposed, every accessor fails with
/// [`HakoError::UseAfterFree`].
///
/// Values are only meaningful inside the [`Context`] that produced them.
pub struct Value {
    ctx: Context,
    handle: Cell<u32>,
    lifecycle: Lifecycle,
}

impl Value {
    pub(crate) fn owned(ctx: &Context, handle: u32) -> Self {
        Self {
            ctx: ctx.clone(),
            handle: Cell::new(handle),
            lifecycle: Lifecycle::Owned,
        }
    }

    pub(crate) fn borrowed(ctx: &Context, handle: u32) -> Self {
        Self {
            ctx: ctx.clone(),
            handle: Cell::new(handle),
            lifecycle: Lifecycle::Borrowed,
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// The raw engine handle, for passing to [`crate::ffi::Ffi`] directly.
    pub fn handle(&self) -> Result<u32> {
        self.live("handle").map(|(_, h)| h)
    }

    /// Gives up ownership of the handle without releasing it.
    pub(crate) fn into_raw(self) -> u32 {
        self.handle.replace(0)
    }

    fn live(&self, op: &str) -> Result<(u32, u32)> {
        let handle = self.handle.get();
        if handle == 0 {
            return Err(HakoError::use_after_free(format!("{op} on a disposed value")));
        }
        let ctx = self.ctx.raw_ptr();
        if ctx == 0 {
            return Err(HakoError::use_after_free(format!(
                "{op} on a value of a released context"
            )));
        }
        Ok((ctx, handle))
    }

    /// A new owned reference to the same engine value.
    pub fn dup(&self) -> Result<Value> {
        let (ctx, handle) = self.live("dup")?;
        let dup = self.ctx.memory().dup_value(ctx, handle)?;
        Ok(Value::owned(&self.ctx, dup))
    }

    /// A borrowed view of the same handle. Disposing it never touches the
    /// engine; it must not outlive `self`.
    pub fn borrow(&self) -> Result<Value> {
        let (_, handle) = self.live("borrow")?;
        Ok(Value::borrowed(&self.ctx, handle))
    }

    /// Runs `f` on this value, then disposes it.
    pub fn consume<T>(self, f: impl FnOnce(&Value) -> Result<T>) -> Result<T> {
        let result = f(&self);
        match (result, self.dispose()) {
            (Err(e), Err(dispose)) => Err(e.with_dispose_error(dispose)),
            (result, Ok(())) => result,
            (Ok(_), Err(dispose)) => Err(dispose),
        }
    }

    // Type checks

    /// The `typeof` of this value.
    pub fn type_of(&self) -> Result<String> {
        let (ctx, handle) = self.live("type_of")?;
        let ptr = self.ctx.ffi().type_of(ctx, handle)?;
        self.ctx.memory().take_heap_string(ctx, ptr)
    }

    fn strict_equals_raw(&self, op: &str, other: u32) -> Result<bool> {
        let (ctx, handle) = self.live(op)?;
        let raw = self
            .ctx
            .ffi()
            .is_equal(ctx, handle, other, EqualOp::StrictEquals as i32)?;
        Ok(raw == 1)
    }

    pub fn is_undefined(&self) -> Result<bool> {
        let undefined = self.ctx.ffi().get_undefined()?;
        self.strict_equals_raw("is_undefined", undefined)
    }

    pub fn is_null(&self) -> Result<bool> {
        let null = self.ctx.ffi().get_null()?;
        self.strict_equals_raw("is_null", null)
    }

    pub fn is_null_or_undefined(&self) -> Result<bool> {
        Ok(self.is_null()? || self.is_undefined()?)
    }

    pub fn is_boolean(&self) -> Result<bool> {
        Ok(self.type_of()? == "boolean")
    }

    pub fn is_number(&self) -> Result<bool> {
        Ok(self.type_of()? == "number")
    }

    pub fn is_string(&self) -> Result<bool> {
        Ok(self.type_of()? == "string")
    }

    pub fn is_symbol(&self) -> Result<bool> {
        Ok(self.type_of()? == "symbol")
    }

    pub fn is_bigint(&self) -> Result<bool> {
        Ok(self.type_of()? == "bigint")
    }

    pub fn is_object(&self) -> Result<bool> {
        Ok(self.type_of()? == "object")
    }

    pub fn is_function(&self) -> Result<bool> {
        Ok(self.type_of()? == "function")
    }

    pub fn is_array(&self) -> Result<bool> {
        let (ctx, handle) = self.live("is_array")?;
        Ok(self.ctx.ffi().is_array(ctx, handle)? != 0)
    }

    pub fn is_error(&self) -> Result<bool> {
        let (ctx, handle) = self.live("is_error")?;
        Ok(self.ctx.ffi().is_error(ctx, handle)? != 0)
    }

    pub fn is_exception(&self) -> Result<bool> {
        let (_, handle) = self.live("is_exception")?;
        Ok(self.ctx.ffi().is_exception(handle)? != 0)
    }

    pub fn is_promise(&self) -> Result<bool> {
        let (ctx, handle) = self.live("is_promise")?;
        Ok(self.ctx.ffi().is_promise(ctx, handle)? != 0)
    }

    pub fn is_typed_array(&self) -> Result<bool> {
        let (ctx, handle) = self.live("is_typed_array")?;
        Ok(self.ctx.ffi().is_typed_array(ctx, handle)? != 0)
    }

    pub fn is_array_buffer(&self) -> Result<bool> {
        let (_, handle) = self.live("is_array_buffer")?;
        Ok(self.ctx.ffi().is_array_buffer(handle)? != 0)
    }

    pub fn is_global_symbol(&self) -> Result<bool> {
        let (ctx, handle) = self.live("is_global_symbol")?;
        Ok(self.ctx.ffi().is_global_symbol(ctx, handle)? == 1)
    }

    pub fn typed_array_type(&self) -> Result<TypedArrayType> {
        if !self.is_typed_array()? {
            return Err(ConversionError::TypeMismatch {
                expected: "a typed array",
            }
            .into());
        }
        let (ctx, handle) = self.live("typed_array_type")?;
        let raw = self.ctx.ffi().get_typed_array_type(ctx, handle)?;
        TypedArrayType::from_raw(raw).ok_or_else(|| {
            ConversionError::Unsupported(format!("typed array type {raw}")).into()
        })
    }

    pub fn class_id(&self) -> Result<i32> {
        let (ctx, handle) = self.live("class_id")?;
        self.ctx.ffi().get_class_id(ctx, handle)
    }

    /// `self instanceof ctor`.
    pub fn instance_of(&self, ctor: &Value) -> Result<bool> {
        let (ctx, handle) = self.live("instance_of")?;
        let ctor = ctor.live("instance_of")?.1;
        match self.ctx.ffi().is_instance_of(ctx, handle, ctor)? {
            -1 => {
                self.ctx.check_exception(0)?;
                Ok(false)
            }
            raw => Ok(raw == 1),
        }
    }

    // Conversions

    pub fn as_number(&self) -> Result<f64> {
        let (ctx, handle) = self.live("as_number")?;
        self.ctx.ffi().get_float64(ctx, handle)
    }

    pub fn as_string(&self) -> Result<String> {
        let (ctx, handle) = self.live("as_string")?;
        let ptr = self.ctx.ffi().to_cstring(ctx, handle)?;
        self.ctx.memory().take_cstring(ctx, ptr)
    }

    /// JavaScript truthiness.
    pub fn as_boolean(&self) -> Result<bool> {
        match self.type_of()?.as_str() {
            "boolean" => {
                let truth = self.ctx.ffi().get_true()?;
                self.strict_equals_raw("as_boolean", truth)
            }
            "undefined" | "null" => Ok(false),
            "number" => {
                let n = self.as_number()?;
                Ok(n != 0.0 && !n.is_nan())
            }
            "string" => Ok(!self.as_string()?.is_empty()),
            _ => Ok(true),
        }
    }

    pub fn as_bigint(&self) -> Result<i128> {
        if !self.ctx.hako().has_bignum()? {
            return Err(HakoError::configuration(
                "this engine build does not support BigInt",
            ));
        }
        if !self.is_bigint()? {
            return Err(ConversionError::TypeMismatch { expected: "a BigInt" }.into());
        }
        let text = self.as_string()?;
        text.parse::<i128>().map_err(|_| {
            ConversionError::Unsupported(format!("BigInt {text} does not fit in 128 bits")).into()
        })
    }

    /// `JSON.stringify(self, null, indent)`.
    pub fn stringify(&self, indent: i32) -> Result<String> {
        let (ctx, handle) = self.live("stringify")?;
        let json = self.ctx.ffi().to_json(ctx, handle, indent)?;
        self.ctx.check_exception(json)?;
        Value::owned(&self.ctx, json).consume(Value::as_string)
    }

    // Equality

    fn equals(&self, other: &Value, op: EqualOp) -> Result<bool> {
        let (ctx, a) = self.live("equals")?;
        let (_, b) = other.live("equals")?;
        Ok(self.ctx.ffi().is_equal(ctx, a, b, op as i32)? == 1)
    }

    /// `===`.
    pub fn eq(&self, other: &Value) -> Result<bool> {
        self.equals(other, EqualOp::StrictEquals)
    }

    /// `Object.is`.
    pub fn same_value(&self, other: &Value) -> Result<bool> {
        self.equals(other, EqualOp::SameValue)
    }

    /// Like `Object.is`, except `+0` and `-0` are equal.
    pub fn same_value_zero(&self, other: &Value) -> Result<bool> {
        self.equals(other, EqualOp::SameValueZero)
    }

    // Properties

    pub fn get_property<'k>(&self, key: impl Into<PropertyKey<'k>>) -> Result<Value> {
        let (ctx, handle) = self.live("get_property")?;
        let ffi = self.ctx.ffi();
        let raw = match key.into() {
            PropertyKey::Index(i) if i32::try_from(i).is_ok() => {
                ffi.get_prop_number(ctx, handle, i as i32)?
            }
            PropertyKey::Index(i) => {
                let key = self.ctx.new_string(&i.to_string())?;
                ffi.get_prop(ctx, handle, key.handle()?)?
            }
            PropertyKey::Name(name) => Scope::with_scope(|scope| {
                let key = scope.manage(self.ctx.new_string(name)?)?;
                ffi.get_prop(ctx, handle, key.handle()?)
            })?,
            PropertyKey::Value(key) => ffi.get_prop(ctx, handle, key.live("get_property")?.1)?,
        };
        if raw == 0 {
            self.ctx.check_exception(0)?;
            return Err(HakoError::Memory("property read returned a null handle".into()));
        }
        Ok(Value::owned(&self.ctx, raw))
    }

    /// Sets `self[key] = value`. Returns whether the engine accepted it.
    pub fn set_property<'k>(&self, key: impl Into<PropertyKey<'k>>, value: &Value) -> Result<bool> {
        let (ctx, handle) = self.live("set_property")?;
        let (_, value) = value.live("set_property")?;
        Scope::with_scope(|scope| {
            let key = match key.into() {
                PropertyKey::Name(name) => scope.manage(self.ctx.new_string(name)?)?.handle()?,
                PropertyKey::Index(i) => scope.manage(self.ctx.new_number(f64::from(i))?)?.handle()?,
                PropertyKey::Value(key) => key.live("set_property")?.1,
            };
            let result = self.ctx.ffi().set_prop(ctx, handle, key, value)?;
            if result == -1 {
                self.ctx.check_exception(0)?;
            }
            Ok(result == 1)
        })
    }

    /// Converts `value` into this value's context and sets it.
    pub fn set<'k>(&self, key: impl Into<PropertyKey<'k>>, value: impl Into<NativeValue>) -> Result<bool> {
        let value = self.ctx.new_value(&value.into())?;
        self.set_property(key, &value)
    }

    pub fn define_property<'k>(
        &self,
        key: impl Into<PropertyKey<'k>>,
        descriptor: PropertyDescriptor<'_>,
    ) -> Result<bool> {
        let (ctx, handle) = self.live("define_property")?;
        let undefined = self.ctx.ffi().get_undefined()?;
        let raw = |v: Option<&Value>| -> Result<u32> {
            v.map_or(Ok(undefined), |v| v.live("define_property").map(|(_, h)| h))
        };
        let value = raw(descriptor.value)?;
        let get = raw(descriptor.get)?;
        let set = raw(descriptor.set)?;
        Scope::with_scope(|scope| {
            let key = match key.into() {
                PropertyKey::Name(name) => scope.manage(self.ctx.new_string(name)?)?.handle()?,
                PropertyKey::Index(i) => scope.manage(self.ctx.new_number(f64::from(i))?)?.handle()?,
                PropertyKey::Value(key) => key.live("define_property")?.1,
            };
            let result = self.ctx.ffi().define_prop(
                ctx,
                handle,
                key,
                value,
                get,
                set,
                i32::from(descriptor.configurable),
                i32::from(descriptor.enumerable),
                i32::from(descriptor.value.is_some()),
            )?;
            if result == -1 {
                self.ctx.check_exception(0)?;
            }
            Ok(result == 1)
        })
    }

    /// Array length.
    pub fn get_length(&self) -> Result<u32> {
        if !self.is_array()? {
            return Err(ConversionError::TypeMismatch { expected: "an array" }.into());
        }
        let (ctx, handle) = self.live("get_length")?;
        let memory = self.ctx.memory();
        Scope::with_scope(|scope| {
            let out = memory.allocate(ctx, 4)?;
            let m = memory.clone();
            scope.add(move || m.free(ctx, out))?;
            if self.ctx.ffi().get_length(ctx, out, handle)? != 0 {
                self.ctx.check_exception(0)?;
                return Err(ConversionError::TypeMismatch { expected: "an array" }.into());
            }
            memory.read_u32(out)
        })
    }

    /// A snapshot of this object's own property names. Every name is an
    /// owned value.
    pub fn get_own_property_names(&self, flags: PropertyEnumFlags) -> Result<Vec<Value>> {
        let (ctx, handle) = self.live("get_own_property_names")?;
        let memory = self.ctx.memory();
        Scope::with_scope(|scope| {
            let out_ptrs = memory.allocate_pointer_array(ctx, 1)?;
            let out_len = memory.allocate(ctx, 4)?;
            let m = memory.clone();
            scope.add(move || {
                m.free(ctx, out_ptrs)?;
                m.free(ctx, out_len)
            })?;
            memory.write_u32(out_len, 0)?;

            let error = self
                .ctx
                .ffi()
                .get_own_property_names(ctx, out_ptrs, out_len, handle, flags.0)?;
            if error != 0 {
                match self.ctx.take_exception(error)? {
                    Some(exception) => return Err(crate::exception::into_error(exception)),
                    None => memory.free_value(ctx, error)?,
                }
            }

            let len = memory.read_u32(out_len)? as usize;
            let base = memory.read_u32(out_ptrs)?;
            if base == 0 {
                return Ok(Vec::new());
            }
            let names = memory
                .read_pointer_array(base, len)?
                .into_iter()
                .map(|ptr| Value::owned(&self.ctx, ptr))
                .collect();
            memory.free(ctx, base)?;
            Ok(names)
        })
    }

    // Promises

    pub fn promise_state(&self) -> Result<PromiseState> {
        if !self.is_promise()? {
            return Err(ConversionError::TypeMismatch { expected: "a promise" }.into());
        }
        let (ctx, handle) = self.live("promise_state")?;
        Ok(PromiseState::from_raw(self.ctx.ffi().promise_state(ctx, handle)?))
    }

    /// The settled value, or `None` while pending.
    pub fn promise_result(&self) -> Result<Option<Value>> {
        if self.promise_state()? == PromiseState::Pending {
            return Ok(None);
        }
        let (ctx, handle) = self.live("promise_result")?;
        let raw = self.ctx.ffi().promise_result(ctx, handle)?;
        Ok(Some(Value::owned(&self.ctx, raw)))
    }

    // Binary data

    fn copy_buffer(&self, op: &str, typed: bool) -> Result<Vec<u8>> {
        let (ctx, handle) = self.live(op)?;
        let memory = self.ctx.memory();
        let ffi = self.ctx.ffi();
        Scope::with_scope(|scope| {
            let out_len = memory.allocate(ctx, 4)?;
            let m = memory.clone();
            scope.add(move || m.free(ctx, out_len))?;
            memory.write_u32(out_len, 0)?;

            let buffer = if typed {
                ffi.copy_typed_array_buffer(ctx, handle, out_len)?
            } else {
                ffi.copy_array_buffer(ctx, handle, out_len)?
            };
            if buffer == 0 {
                self.ctx.check_exception(0)?;
                return Ok(Vec::new());
            }
            let m = memory.clone();
            scope.add(move || m.free(ctx, buffer))?;
            let len = memory.read_u32(out_len)? as usize;
            memory.read_bytes(buffer, len)
        })
    }

    pub fn copy_array_buffer(&self) -> Result<Vec<u8>> {
        if !self.is_array_buffer()? {
            return Err(ConversionError::TypeMismatch {
                expected: "an ArrayBuffer",
            }
            .into());
        }
        self.copy_buffer("copy_array_buffer", false)
    }

    /// The bytes viewed by a typed array.
    pub fn copy_typed_array(&self) -> Result<Vec<u8>> {
        if !self.is_typed_array()? {
            return Err(ConversionError::TypeMismatch {
                expected: "a typed array",
            }
            .into());
        }
        self.copy_buffer("copy_typed_array", true)
    }

    // Native conversion

    /// Materialises this value and everything reachable from it as a
    /// [`NativeValue`].
    ///
    /// Every handle opened during the walk (property names, property values,
    /// array elements) is kept in the returned box and released with it.
    /// `self` is not consumed.
    pub fn to_native_value(&self) -> Result<NativeBox> {
        self.live("to_native_value")?;
        let mut touched = Vec::new();
        let mut ancestors = Vec::new();
        match self.native_walk(&mut ancestors, &mut touched, "$") {
            Ok(value) => Ok(NativeBox {
                value,
                touched,
                alive: Cell::new(true),
            }),
            Err(e) => {
                if let Err(dispose) = touched.dispose() {
                    return Err(e.with_dispose_error(dispose));
                }
                Err(e)
            }
        }
    }

    fn native_walk(&self, ancestors: &mut Vec<u32>, touched: &mut Vec<Value>, path: &str) -> Result<NativeValue> {
        let kind = self.type_of()?;
        Ok(match kind.as_str() {
            "undefined" => NativeValue::Undefined,
            "null" => NativeValue::Null,
            "boolean" => NativeValue::Boolean(self.as_boolean()?),
            "number" => NativeValue::Number(self.as_number()?),
            "string" => NativeValue::String(self.as_string()?),
            "bigint" => NativeValue::BigInt(self.as_bigint()?),
            "symbol" => {
                let (ctx, handle) = self.live("to_native_value")?;
                let ptr = self.ctx.ffi().get_symbol_description_or_key(ctx, handle)?;
                let description = if ptr == 0 {
                    String::new()
                } else {
                    self.ctx.memory().take_cstring(ctx, ptr)?
                };
                NativeValue::Symbol(NativeSymbol {
                    description,
                    global: self.is_global_symbol()?,
                })
            }
            "function" => {
                let name = self.get_property("name")?;
                let name = if name.is_string()? {
                    Some(name.as_string()?)
                } else {
                    None
                };
                NativeValue::Function(NativeFunction::Guest(GuestFunction::new(self.dup()?, name)))
            }
            "object" => {
                for ancestor in ancestors.iter() {
                    let (ctx, handle) = self.live("to_native_value")?;
                    if self.ctx.ffi().is_equal(ctx, handle, *ancestor, EqualOp::StrictEquals as i32)? == 1 {
                        return Err(ConversionError::Circular { path: path.to_string() }.into());
                    }
                }
                ancestors.push(self.handle()?);
                let result = self.native_object(ancestors, touched, path);
                ancestors.pop();
                result?
            }
            other => return Err(ConversionError::Unsupported(format!("typeof {other}")).into()),
        })
    }

    fn native_object(&self, ancestors: &mut Vec<u32>, touched: &mut Vec<Value>, path: &str) -> Result<NativeValue> {
        if self.is_error()? {
            let text = |key: &str, touched: &mut Vec<Value>| -> Result<Option<String>> {
                let v = self.get_property(key)?;
                let s = if v.is_string()? { Some(v.as_string()?) } else { None };
                touched.push(v);
                Ok(s)
            };
            let name = text("name", touched)?.unwrap_or_else(|| "Error".into());
            let message = text("message", touched)?.unwrap_or_default();
            let stack = text("stack", touched)?;
            let cause = self.get_property("cause")?;
            let cause_native = if cause.is_undefined()? {
                None
            } else {
                Some(cause.native_walk(ancestors, touched, &format!("{path}.cause"))?)
            };
            touched.push(cause);
            return Ok(NativeValue::Error(Box::new(NativeError {
                name,
                message,
                stack,
                cause: cause_native,
            })));
        }

        if self.is_array()? {
            let len = self.get_length()?;
            let mut items = Vec::with_capacity(len as usize);
            for i in 0..len {
                let item = self.get_property(i)?;
                let native = item.native_walk(ancestors, touched, &format!("{path}[{i}]"));
                touched.push(item);
                items.push(native?);
            }
            return Ok(NativeValue::array(items));
        }

        if self.is_array_buffer()? {
            return Ok(NativeValue::Bytes(self.copy_array_buffer()?));
        }
        if self.is_typed_array()? {
            return Ok(NativeValue::Bytes(self.copy_typed_array()?));
        }

        let names = self.get_own_property_names(PropertyEnumFlags::default())?;
        let mut entries = Vec::with_capacity(names.len());
        let mut names = names.into_iter();
        let outcome = names.try_for_each(|name| {
            let key = name.as_string()?;
            let value = self.get_property(&name);
            touched.push(name);
            let value = value?;
            let native = value.native_walk(ancestors, touched, &format!("{path}.{key}"));
            touched.push(value);
            entries.push((key, native?));
            Ok::<_, HakoError>(())
        });
        // Unvisited names after a failure are still released.
        touched.extend(names);
        outcome?;
        Ok(NativeValue::object(entries))
    }
}

impl Disposable for Value {
    fn alive(&self) -> bool {
        self.handle.get() != 0
    }

    /// Owned handles are freed once; later calls do nothing. If the context
    /// is already released the engine has dropped the value with it, so only
    /// the local handle is cleared.
    fn dispose(&self) -> Result<()> {
        let handle = self.handle.replace(0);
        if handle == 0 || self.lifecycle == Lifecycle::Borrowed {
            return Ok(());
        }
        match self.ctx.raw_ptr() {
            0 => Ok(()),
            ctx => self.ctx.memory().free_value(ctx, handle),
        }
    }
}

impl Drop for Value {
    fn drop(&mut self) {
        if let Err(e) = Disposable::dispose(self) {
            tracing::error!(error = %e, "Failed to free engine value");
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value")
            .field("ctx", &self.ctx.raw_ptr())
            .field("handle", &self.handle.get())
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

impl Value {
    /// Releases the handle now. See [`Disposable::dispose`].
    pub fn dispose(&self) -> Result<()> {
        Disposable::dispose(self)
    }

    pub fn alive(&self) -> bool {
        Disposable::alive(self)
    }
}

/// The result of [`Value::to_native_value`]: the native tree plus every
/// engine handle opened to build it.
pub struct NativeBox {
    pub value: NativeValue,
    touched: Vec<Value>,
    alive: Cell<bool>,
}

impl NativeBox {
    /// Takes the native value, releasing the handles.
    pub fn into_value(self) -> NativeValue {
        if let Err(e) = self.touched.dispose() {
            tracing::error!(error = %e, "Failed to release native conversion handles");
        }
        self.value
    }

    /// Number of engine handles held by the box.
    pub fn handle_count(&self) -> usize {
        self.touched.iter().filter(|v| v.alive()).count()
    }
}

impl Disposable for NativeBox {
    fn alive(&self) -> bool {
        self.alive.get()
    }

    fn dispose(&self) -> Result<()> {
        if !self.alive.replace(false) {
            return Ok(());
        }
        self.touched.dispose()
    }
}

impl fmt::Debug for NativeBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeBox")
            .field("value", &self.value)
            .field("handles", &self.touched.len())
            .finish()
    }
}
