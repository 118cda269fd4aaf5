pub mod lifetime;
pub mod memory;

pub use lifetime::{Disposable, DisposableResult, LocalBoxFuture, MaybeAsync, Scope};
pub use memory::{HeapString, MemoryManager};
