//! Host binding for the hako JavaScript engine, compiled to WebAssembly.
//!
//! A [`Hako`] owns one engine instance. It hands out [`Runtime`]s (a heap,
//! job queue and hook set each), which in turn hand out [`Context`]s (a
//! global object and realm each). Guest values come back as [`Value`]
//! handles that free themselves on drop.
//!
//! Host functions registered through [`Context::new_function`] and
//! [`Context::new_async_function`] are called by the guest through an
//! integer-ID bridge; async ones return a guest promise that settles while
//! the runtime is [driven](Runtime::drive).
//!
//! # Quick start
//!
//! ```rust,no_run
//! use hako_runtime::{Hako, ContextOptions, WasmOptions};
//! use std::path::Path;
//!
//! # async fn run() -> hako_runtime::Result<()> {
//! let hako = Hako::from_file(Path::new("hako.wasm"), &WasmOptions::default())?;
//! let runtime = hako.create_runtime()?;
//! let ctx = runtime.create_context(ContextOptions::default())?;
//!
//! ctx.global_object()?.set_property(
//!     "greet",
//!     &ctx.new_function("greet", |_ctx, _this, args| {
//!         let name = args.first().map(|a| a.as_string()).transpose()?;
//!         Ok(format!("hello, {}", name.unwrap_or_default()))
//!     })?,
//! )?;
//!
//! let result = ctx.eval("Promise.resolve(greet('hako'))")?;
//! let greeting = ctx.await_promise(&result).await?;
//! assert_eq!(greeting.as_string()?, "hello, hako");
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod callback;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
mod exception;
pub mod factory;
pub mod ffi;
pub mod interrupt;
pub mod iterator;
pub mod loader;
pub mod mem;
pub mod native;
pub mod profiler;
pub mod promise;
pub mod runtime;
pub mod value;


pub use cache::ModuleCache;
pub use callback::{HostFunction, HostReturn, async_host_function, host_function};
pub use config::{ContextConfig, EngineConfig, HakoConfig, LimitsConfig, RuntimeConfig};
pub use context::{Context, ContextOptions, EvalOptions, EvalType};
pub use engine::{BuildInfo, Hako};
pub use error::{ConversionError, HakoError, JsException, Result};
pub use factory::ValueOptions;
pub use ffi::{EvalFlags, Intrinsics, PromiseState, StripOptions, WasmOptions};
pub use interrupt::{InterruptHandler, Pausable, ResourceLimits};
pub use iterator::JsIterator;
pub use loader::{
    ModuleAttributes, ModuleHooks, ModuleLoader, ModuleNormalizer, ModuleResolver, ModuleSource,
    StaticModules,
};
pub use mem::{Disposable, DisposableResult, MaybeAsync, Scope};
pub use native::{NativeError, NativeFunction, NativeSymbol, NativeValue};
pub use profiler::{ProfilerEventHandler, TraceEvent};
pub use promise::DeferredPromise;
pub use runtime::{MemoryUsage, Runtime};
pub use value::{JsResult, NativeBox, PropertyKey, Value};
