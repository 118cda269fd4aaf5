//! Host-side representation of JavaScript values.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::callback::HostFunction;
use crate::error::{ConversionError, HakoError, Result};
use crate::value::Value;

/// A JavaScript value materialised on the host.
///
/// Arrays and objects are shared and mutable so host code can build graphs
/// the way JavaScript does, which also means they can be cyclic. Cycles are
/// rejected when converting into the engine.
#[derive(Clone)]
pub enum NativeValue {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    BigInt(i128),
    Symbol(NativeSymbol),
    Array(Rc<RefCell<Vec<NativeValue>>>),
    /// Own enumerable properties in insertion order.
    Object(Rc<RefCell<Vec<(String, NativeValue)>>>),
    /// Milliseconds since the epoch.
    Date(f64),
    Error(Box<NativeError>),
    Bytes(Vec<u8>),
    Function(NativeFunction),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeSymbol {
    pub description: String,
    /// Registered with `Symbol.for`.
    pub global: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeError {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
    pub cause: Option<NativeValue>,
}

impl NativeError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            cause: None,
        }
    }

    /// The host-side view of a failure, as thrown into guest code.
    pub fn from_error(error: &HakoError) -> Self {
        match error.exception() {
            Some(exception) => Self {
                name: exception.name.clone(),
                message: exception.message.clone(),
                stack: exception.stack.clone(),
                cause: exception.cause.clone().map(NativeValue::from),
            },
            None => Self::new("Error", error.to_string()),
        }
    }
}

#[derive(Clone)]
pub enum NativeFunction {
    /// A host closure, registered with the callback bridge on conversion.
    Host { name: String, callback: HostFunction },
    Guest(GuestFunction),
}

impl NativeFunction {
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Host { name, .. } => Some(name),
            Self::Guest(f) => f.name(),
        }
    }
}

/// A guest function seen from the host. Holds its own reference to the
/// function, so it stays callable after the conversion that produced it is
/// released.
#[derive(Clone)]
pub struct GuestFunction {
    value: Rc<Value>,
    name: Option<String>,
}

impl GuestFunction {
    pub(crate) fn new(value: Value, name: Option<String>) -> Self {
        Self {
            value: Rc::new(value),
            name,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Calls the function with `this` undefined and converts the result.
    pub fn call(&self, args: &[NativeValue]) -> Result<NativeValue> {
        let ctx = self.value.context();
        let args = args
            .iter()
            .map(|a| ctx.new_value(a))
            .collect::<Result<Vec<_>>>()?;
        let refs: Vec<&Value> = args.iter().collect();
        let result = ctx.call_function(&self.value, None, &refs)?.unwrap()?;
        Ok(result.to_native_value()?.into_value())
    }
}

impl NativeValue {
    pub fn array(items: Vec<NativeValue>) -> Self {
        Self::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(entries: Vec<(String, NativeValue)>) -> Self {
        Self::Object(Rc::new(RefCell::new(entries)))
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(Box::new(NativeError::new(name, message)))
    }

    pub fn symbol(description: impl Into<String>) -> Self {
        Self::Symbol(NativeSymbol {
            description: description.into(),
            global: false,
        })
    }

    /// A host function. See [`crate::Context::new_function`] for the
    /// calling convention.
    pub fn function(name: impl Into<String>, callback: HostFunction) -> Self {
        Self::Function(NativeFunction::Host {
            name: name.into(),
            callback,
        })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::BigInt(_) => "bigint",
            Self::Symbol(_) => "symbol",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Date(_) => "date",
            Self::Error(_) => "error",
            Self::Bytes(_) => "bytes",
            Self::Function(_) => "function",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Looks up an own property of an object.
    pub fn get(&self, key: &str) -> Option<NativeValue> {
        match self {
            Self::Object(entries) => entries
                .borrow()
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone()),
            _ => None,
        }
    }

    /// Fails with a circular-reference error naming the first property path
    /// that leads back to one of its own ancestors.
    pub fn check_cycles(&self) -> std::result::Result<(), ConversionError> {
        let mut ancestors = Vec::new();
        walk_cycles(self, &mut ancestors, "$".to_string())
    }

    /// Renders as JSON. `undefined`, functions and symbols have no JSON form;
    /// they are dropped from objects and become `null` inside arrays.
    /// BigInts are rendered as decimal strings and bytes as number arrays.
    ///
    /// Cyclic values must be checked with [`check_cycles`](Self::check_cycles)
    /// first.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        use serde_json::Value as J;
        Some(match self {
            Self::Undefined | Self::Symbol(_) | Self::Function(_) => return None,
            Self::Null => J::Null,
            Self::Boolean(b) => J::Bool(*b),
            Self::Number(n) | Self::Date(n) => json_number(*n),
            Self::String(s) => J::String(s.clone()),
            Self::BigInt(i) => J::String(i.to_string()),
            Self::Bytes(b) => J::Array(b.iter().map(|x| J::from(*x)).collect()),
            Self::Array(items) => J::Array(
                items
                    .borrow()
                    .iter()
                    .map(|v| v.to_json().unwrap_or(J::Null))
                    .collect(),
            ),
            Self::Object(entries) => J::Object(
                entries
                    .borrow()
                    .iter()
                    .filter_map(|(k, v)| v.to_json().map(|v| (k.clone(), v)))
                    .collect(),
            ),
            Self::Error(e) => {
                let mut map = serde_json::Map::new();
                map.insert("name".into(), J::String(e.name.clone()));
                map.insert("message".into(), J::String(e.message.clone()));
                if let Some(stack) = &e.stack {
                    map.insert("stack".into(), J::String(stack.clone()));
                }
                if let Some(cause) = e.cause.as_ref().and_then(NativeValue::to_json) {
                    map.insert("cause".into(), cause);
                }
                J::Object(map)
            }
        })
    }
}

fn walk_cycles(
    value: &NativeValue,
    ancestors: &mut Vec<*const ()>,
    path: String,
) -> std::result::Result<(), ConversionError> {
    let id = match value {
        NativeValue::Array(items) => Rc::as_ptr(items) as *const (),
        NativeValue::Object(entries) => Rc::as_ptr(entries) as *const (),
        NativeValue::Error(e) => {
            return match &e.cause {
                Some(cause) => walk_cycles(cause, ancestors, format!("{path}.cause")),
                None => Ok(()),
            };
        }
        _ => return Ok(()),
    };
    if ancestors.contains(&id) {
        return Err(ConversionError::Circular { path });
    }
    ancestors.push(id);
    let result = match value {
        NativeValue::Array(items) => items
            .borrow()
            .iter()
            .enumerate()
            .try_for_each(|(i, item)| walk_cycles(item, ancestors, format!("{path}[{i}]"))),
        NativeValue::Object(entries) => entries
            .borrow()
            .iter()
            .try_for_each(|(k, v)| walk_cycles(v, ancestors, format!("{path}.{k}"))),
        _ => Ok(()),
    };
    ancestors.pop();
    result
}

impl PartialEq for NativeValue {
    /// Structural equality; functions compare by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Number(a), Self::Number(b)) | (Self::Date(a), Self::Date(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::BigInt(a), Self::BigInt(b)) => a == b,
            (Self::Symbol(a), Self::Symbol(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Self::Error(a), Self::Error(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Function(NativeFunction::Host { callback: a, .. }), Self::Function(NativeFunction::Host { callback: b, .. })) => {
                Rc::ptr_eq(a, b)
            }
            (Self::Function(NativeFunction::Guest(a)), Self::Function(NativeFunction::Guest(b))) => {
                Rc::ptr_eq(&a.value, &b.value)
            }
            _ => false,
        }
    }
}

impl fmt::Debug for NativeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::BigInt(i) => write!(f, "{i}n"),
            Self::Symbol(s) => write!(f, "Symbol({})", s.description),
            // Shallow, so cyclic graphs still print.
            Self::Array(items) => write!(f, "[array; {}]", items.borrow().len()),
            Self::Object(entries) => {
                let keys: Vec<String> = entries.borrow().iter().map(|(k, _)| k.clone()).collect();
                write!(f, "{{{}}}", keys.join(", "))
            }
            Self::Date(ms) => write!(f, "Date({ms})"),
            Self::Error(e) => write!(f, "{}: {}", e.name, e.message),
            Self::Bytes(b) => write!(f, "bytes[{}]", b.len()),
            Self::Function(func) => write!(f, "function {}", func.name().unwrap_or("<anonymous>")),
        }
    }
}

impl From<serde_json::Value> for NativeValue {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as J;
        match json {
            J::Null => Self::Null,
            J::Bool(b) => Self::Boolean(b),
            J::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            J::String(s) => Self::String(s),
            J::Array(items) => Self::array(items.into_iter().map(Self::from).collect()),
            J::Object(map) => Self::object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
        }
    }
}

impl From<()> for NativeValue {
    fn from(_: ()) -> Self {
        Self::Undefined
    }
}

impl From<bool> for NativeValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<f64> for NativeValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for NativeValue {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u32> for NativeValue {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<&str> for NativeValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for NativeValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<NativeValue>> for NativeValue {
    fn from(items: Vec<NativeValue>) -> Self {
        Self::array(items)
    }
}

impl From<Vec<u8>> for NativeValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<NativeError> for NativeValue {
    fn from(e: NativeError) -> Self {
        Self::Error(Box::new(e))
    }
}

impl<T: Into<NativeValue>> From<Option<T>> for NativeValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// A number as `JSON.stringify` writes it: integers without a fraction,
/// `null` for NaN and the infinities.
pub(crate) fn json_number(n: f64) -> serde_json::Value {
    const MAX_SAFE: f64 = 9_007_199_254_740_991.0;
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
    }
}
