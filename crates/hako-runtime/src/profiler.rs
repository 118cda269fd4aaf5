//! Function-call profiling events.

use serde::{Deserialize, Serialize};

use crate::context::Context;

/// One Chrome trace-format event emitted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub name: String,
    #[serde(default)]
    pub cat: String,
    /// `B` on entry, `E` on exit.
    pub ph: String,
    #[serde(default)]
    pub ts: f64,
    #[serde(default)]
    pub pid: u64,
    #[serde(default)]
    pub tid: u64,
}

/// Receives profiling events for a runtime. See
/// [`crate::Runtime::enable_profiler`].
pub trait ProfilerEventHandler {
    fn on_function_start(&self, ctx: &Context, event: &TraceEvent, opaque: u32);
    fn on_function_end(&self, ctx: &Context, event: &TraceEvent, opaque: u32);
}
