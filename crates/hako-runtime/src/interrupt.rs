//! Interrupt handlers: the engine polls these while guest code runs and
//! aborts execution with an `InternalError: interrupted` when one answers
//! `true`.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::context::Context;
use crate::runtime::Runtime;

const DEFAULT_MEMORY_CHECK_INTERVAL: u64 = 1000;

/// Decides whether running guest code should stop.
pub trait InterruptHandler {
    fn interrupt(&self, runtime: &Runtime, ctx: &Context) -> bool;
}

impl<F> InterruptHandler for F
where
    F: Fn(&Runtime, &Context) -> bool,
{
    fn interrupt(&self, runtime: &Runtime, ctx: &Context) -> bool {
        self(runtime, ctx)
    }
}

/// Stops once `max_time` has passed since the handler was built.
pub fn deadline(max_time: Duration) -> Rc<dyn InterruptHandler> {
    let deadline = Instant::now() + max_time;
    Rc::new(move |_: &Runtime, _: &Context| Instant::now() >= deadline)
}

/// Stops on the `max_steps`-th poll.
pub fn gas(max_steps: u64) -> Rc<dyn InterruptHandler> {
    let steps = Cell::new(0u64);
    Rc::new(move |_: &Runtime, _: &Context| {
        let n = steps.get() + 1;
        steps.set(n);
        n >= max_steps
    })
}

/// Stops once the engine heap grows past `max_bytes`. The heap is only
/// measured every `check_every` polls.
pub fn memory_ceiling(max_bytes: i64, check_every: u64) -> Rc<dyn InterruptHandler> {
    let check_every = check_every.max(1);
    let steps = Cell::new(0u64);
    Rc::new(move |runtime: &Runtime, _: &Context| {
        let n = steps.get() + 1;
        steps.set(n);
        if n % check_every != 0 {
            return false;
        }
        match runtime.compute_memory_usage(None) {
            Ok(usage) if usage.memory_used_size > max_bytes => {
                debug!(used = usage.memory_used_size, max_bytes, "Memory ceiling reached");
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(error = %e, "Failed to measure engine memory");
                false
            }
        }
    })
}

/// Stops as soon as any of `handlers` does.
pub fn combine(handlers: Vec<Rc<dyn InterruptHandler>>) -> Rc<dyn InterruptHandler> {
    Rc::new(move |runtime: &Runtime, ctx: &Context| {
        handlers.iter().any(|h| h.interrupt(runtime, ctx))
    })
}

/// Budgets enforced through a single combined handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceLimits {
    pub max_time: Option<Duration>,
    pub max_steps: Option<u64>,
    pub max_memory_bytes: Option<i64>,
    /// Polls between heap measurements. Defaults to 1000.
    pub memory_check_interval: Option<u64>,
}

impl ResourceLimits {
    /// The handler enforcing these limits, or `None` when none are set.
    pub fn handler(&self) -> Option<Rc<dyn InterruptHandler>> {
        let mut handlers = Vec::new();
        if let Some(max_time) = self.max_time {
            handlers.push(deadline(max_time));
        }
        if let Some(max_steps) = self.max_steps {
            handlers.push(gas(max_steps));
        }
        if let Some(max_bytes) = self.max_memory_bytes {
            let every = self.memory_check_interval.unwrap_or(DEFAULT_MEMORY_CHECK_INTERVAL);
            handlers.push(memory_ceiling(max_bytes, every));
        }
        match handlers.len() {
            0 => None,
            1 => handlers.pop(),
            _ => Some(combine(handlers)),
        }
    }
}

/// Wraps a handler so it can be switched off temporarily, e.g. while the
/// host runs trusted setup code.
pub struct Pausable {
    inner: Rc<dyn InterruptHandler>,
    paused: Cell<bool>,
}

impl Pausable {
    pub fn new(inner: Rc<dyn InterruptHandler>) -> Rc<Self> {
        Rc::new(Self {
            inner,
            paused: Cell::new(false),
        })
    }

    pub fn pause(&self) {
        self.paused.set(true);
    }

    pub fn resume(&self) {
        self.paused.set(false);
    }

    /// Flips the state and returns whether the handler is now paused.
    pub fn toggle(&self) -> bool {
        let paused = !self.paused.get();
        self.paused.set(paused);
        paused
    }

    pub fn is_paused(&self) -> bool {
        self.paused.get()
    }
}

impl InterruptHandler for Pausable {
    fn interrupt(&self, runtime: &Runtime, ctx: &Context) -> bool {
        !self.paused.get() && self.inner.interrupt(runtime, ctx)
    }
}
