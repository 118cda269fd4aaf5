use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T, E = HakoError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum HakoError {
    /// Host misuse: a missing option, an operation before setup, or a
    /// feature the loaded engine build does not have.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An operation on a disposed handle, context or runtime.
    #[error("Use after free: {0}")]
    UseAfterFree(String),

    /// A JavaScript error thrown by guest code.
    #[error("{0}")]
    Engine(JsException),

    /// Guest execution aborted by the interrupt handler.
    #[error("Interrupted: {0}")]
    Interrupted(JsException),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Memory error: {0}")]
    Memory(String),

    /// The block failed and so did the cleanup that followed it.
    #[error("{error} (cleanup also failed: {dispose})")]
    WithDisposeError {
        error: Box<HakoError>,
        dispose: Box<HakoError>,
    },

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
}

impl HakoError {
    pub fn use_after_free(what: impl Into<String>) -> Self {
        Self::UseAfterFree(what.into())
    }

    pub fn configuration(what: impl Into<String>) -> Self {
        Self::Configuration(what.into())
    }

    /// Builds the right variant for an exception reported by the engine.
    /// The engine reports interruption as `InternalError: interrupted`.
    pub fn from_exception(exception: JsException) -> Self {
        if exception.is_interrupted() {
            Self::Interrupted(exception)
        } else {
            Self::Engine(exception)
        }
    }

    /// Attaches a cleanup failure to this error.
    pub fn with_dispose_error(self, dispose: HakoError) -> Self {
        Self::WithDisposeError {
            error: Box::new(self),
            dispose: Box::new(dispose),
        }
    }

    /// The guest exception carried by this error, if any.
    pub fn exception(&self) -> Option<&JsException> {
        match self {
            Self::Engine(e) | Self::Interrupted(e) => Some(e),
            Self::WithDisposeError { error, .. } => error.exception(),
            _ => None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        match self {
            Self::Interrupted(_) => true,
            Self::WithDisposeError { error, .. } => error.is_interrupted(),
            _ => false,
        }
    }

    pub fn is_use_after_free(&self) -> bool {
        matches!(self, Self::UseAfterFree(_))
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConversionError {
    #[error("TypeError: circular reference detected at {path}")]
    Circular { path: String },

    #[error("unsupported value: {0}")]
    Unsupported(String),

    #[error("value is not {expected}")]
    TypeMismatch { expected: &'static str },
}

/// Details of a JavaScript exception, decoded from the engine's dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsException {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<serde_json::Value>,
}

fn default_name() -> String {
    "Error".into()
}

impl JsException {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            cause: None,
        }
    }

    /// Decodes an engine dump. Thrown values are not always objects, so
    /// anything that is not an error-shaped JSON object degrades to a
    /// plain message instead of failing.
    pub fn from_dump(raw: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Object(map)) => {
                let field = |key: &str| {
                    map.get(key)
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                };
                Self {
                    name: field("name").unwrap_or_else(default_name),
                    message: field("message").unwrap_or_else(|| raw.to_string()),
                    stack: field("stack"),
                    cause: map.get("cause").filter(|c| !c.is_null()).cloned(),
                }
            }
            Ok(serde_json::Value::String(message)) => Self::new("Error", message),
            _ => Self::new("Error", raw),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.name == "InternalError" && self.message == "interrupted"
    }
}

impl fmt::Display for JsException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}
