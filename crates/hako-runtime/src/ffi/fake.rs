//! An in-process stand-in for the engine binary.
//!
//! It understands just enough JavaScript to drive the host layers: JSON-ish
//! literals, `a + b`, `throw "msg"`, unbounded loops that poll the interrupt
//! handler, and `import "name"` through the module hooks. Values live in a
//! handle table so tests can count dups, frees and leaks.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};

use super::{Ffi, HostImports};
use crate::error::{HakoError, Result};
use crate::native::json_number;

const MEMORY_SIZE: usize = 1 << 20;
const HEAP_BASE: u32 = 4096;
const HANDLE_BASE: u32 = 0x0100_0000;

const UNDEFINED: u32 = 1;
const NULL: u32 = 2;
const FALSE: u32 = 3;
const TRUE: u32 = 4;

const LOOP_LIMIT: u64 = 1_000_000;
const BYTECODE_MAGIC: &[u8] = b"FAKEBC\0";

struct Symbol {
    description: String,
    global: bool,
}

#[derive(Clone)]
enum Fake {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    BigInt(i128),
    Symbol(Rc<Symbol>),
    Object(Rc<RefCell<Obj>>),
    /// The tag value engine calls return when they throw.
    Exception,
}

#[derive(Clone)]
enum Key {
    Str(String),
    Sym(Rc<Symbol>),
}

impl Key {
    fn same(&self, other: &Key) -> bool {
        match (self, other) {
            (Key::Str(a), Key::Str(b)) => a == b,
            (Key::Sym(a), Key::Sym(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

struct Obj {
    kind: Kind,
    props: Vec<(Key, Fake)>,
}

enum Kind {
    Plain,
    Array(Vec<Fake>),
    Error,
    Date(f64),
    Buffer(Vec<u8>),
    Function(Func),
    Promise(PromiseSlot),
    Iterator {
        items: Rc<RefCell<Obj>>,
        next: usize,
        returned: bool,
    },
}

#[derive(Clone)]
enum Func {
    Host(i32),
    Resolve(Rc<RefCell<Obj>>),
    Reject(Rc<RefCell<Obj>>),
    Then(Rc<RefCell<Obj>>),
    PromiseResolve,
    ArrayValues(Rc<RefCell<Obj>>),
    IterNext(Rc<RefCell<Obj>>),
    IterReturn(Rc<RefCell<Obj>>),
}

struct PromiseSlot {
    state: i32,
    result: Fake,
    reactions: Vec<(Fake, Fake)>,
}

#[derive(Default)]
struct RuntimeState {
    interrupt: Option<u32>,
    loader: Option<bool>,
    profile: Option<u32>,
    strip: i32,
    limit: Option<u32>,
}

struct Job {
    ctx: u32,
    handler: Fake,
    arg: Fake,
}

enum Expr {
    Value(Fake),
    Add(f64, f64),
    Throw(String),
    Loop,
    Import(String),
}

pub(crate) struct FakeEngine {
    memory: RefCell<Vec<u8>>,
    heap_top: Cell<u32>,
    allocations: RefCell<HashMap<u32, u32>>,
    values: RefCell<HashMap<u32, Fake>>,
    next_handle: Cell<u32>,
    pending_exception: RefCell<Option<Fake>>,
    jobs: RefCell<VecDeque<Job>>,
    imports: RefCell<Option<Weak<dyn HostImports>>>,
    global: Rc<RefCell<Obj>>,
    iterator_symbol: Rc<Symbol>,
    global_symbols: RefCell<HashMap<String, Rc<Symbol>>>,
    runtimes: RefCell<HashMap<u32, RuntimeState>>,
    contexts: RefCell<HashMap<u32, u32>>,
    context_data: RefCell<HashMap<u32, u32>>,
    next_pointer: Cell<u32>,
    build_info: Cell<u32>,
    build_flags: Cell<u32>,
    free_value_calls: Cell<usize>,
    dup_calls: Cell<usize>,
    double_frees: Cell<usize>,
    created_values: Cell<usize>,
    interrupt_polls: Cell<u64>,
    iterator_returns: Cell<usize>,
}

impl FakeEngine {
    pub(crate) fn new() -> Rc<Self> {
        Self::with_build_flags(crate::ffi::abi::BUILD_FLAG_BIGNUM)
    }

    pub(crate) fn with_build_flags(flags: u32) -> Rc<Self> {
        let iterator_symbol = Rc::new(Symbol {
            description: "Symbol.iterator".into(),
            global: false,
        });
        let async_iterator = Rc::new(Symbol {
            description: "Symbol.asyncIterator".into(),
            global: false,
        });
        let promise_ctor = object(
            Kind::Plain,
            vec![(
                Key::Str("resolve".into()),
                function(Func::PromiseResolve, "resolve"),
            )],
        );
        let symbol_ctor = object(
            Kind::Plain,
            vec![
                (Key::Str("iterator".into()), Fake::Symbol(iterator_symbol.clone())),
                (Key::Str("asyncIterator".into()), Fake::Symbol(async_iterator)),
            ],
        );
        let global = Rc::new(RefCell::new(Obj {
            kind: Kind::Plain,
            props: vec![
                (Key::Str("Promise".into()), promise_ctor),
                (Key::Str("Symbol".into()), symbol_ctor),
            ],
        }));

        let engine = Rc::new(Self {
            memory: RefCell::new(vec![0; MEMORY_SIZE]),
            heap_top: Cell::new(HEAP_BASE),
            allocations: RefCell::new(HashMap::new()),
            values: RefCell::new(HashMap::new()),
            next_handle: Cell::new(HANDLE_BASE),
            pending_exception: RefCell::new(None),
            jobs: RefCell::new(VecDeque::new()),
            imports: RefCell::new(None),
            global,
            iterator_symbol,
            global_symbols: RefCell::new(HashMap::new()),
            runtimes: RefCell::new(HashMap::new()),
            contexts: RefCell::new(HashMap::new()),
            context_data: RefCell::new(HashMap::new()),
            next_pointer: Cell::new(0x100),
            build_info: Cell::new(0),
            build_flags: Cell::new(flags),
            free_value_calls: Cell::new(0),
            dup_calls: Cell::new(0),
            double_frees: Cell::new(0),
            created_values: Cell::new(0),
            interrupt_polls: Cell::new(0),
            iterator_returns: Cell::new(0),
        });
        engine.write_static_build_info();
        engine
    }

    // Counters

    pub(crate) fn live_allocations(&self) -> usize {
        self.allocations.borrow().len()
    }

    pub(crate) fn live_values(&self) -> usize {
        self.values.borrow().len()
    }

    pub(crate) fn free_value_calls(&self) -> usize {
        self.free_value_calls.get()
    }

    pub(crate) fn dup_calls(&self) -> usize {
        self.dup_calls.get()
    }

    pub(crate) fn double_frees(&self) -> usize {
        self.double_frees.get()
    }

    pub(crate) fn created_values(&self) -> usize {
        self.created_values.get()
    }

    pub(crate) fn interrupt_polls(&self) -> u64 {
        self.interrupt_polls.get()
    }

    pub(crate) fn iterator_returns(&self) -> usize {
        self.iterator_returns.get()
    }

    pub(crate) fn live_contexts(&self) -> usize {
        self.contexts.borrow().len()
    }

    pub(crate) fn has_pending_exception(&self) -> bool {
        self.pending_exception.borrow().is_some()
    }

    // Memory

    fn bump(&self, size: u32) -> u32 {
        let ptr = self.heap_top.get();
        let end = ptr as u64 + size as u64;
        if end > MEMORY_SIZE as u64 {
            return 0;
        }
        self.heap_top.set((end as u32 + 7) & !7);
        ptr
    }

    fn alloc(&self, size: u32) -> u32 {
        let ptr = self.bump(size.max(1));
        if ptr != 0 {
            self.allocations.borrow_mut().insert(ptr, size);
        }
        ptr
    }

    fn release(&self, ptr: u32) -> Result<()> {
        if self.allocations.borrow_mut().remove(&ptr).is_none() {
            return Err(HakoError::Memory(format!(
                "fake engine: free of unknown pointer {ptr:#x}"
            )));
        }
        Ok(())
    }

    fn poke(&self, ptr: u32, data: &[u8]) {
        let start = ptr as usize;
        self.memory.borrow_mut()[start..start + data.len()].copy_from_slice(data);
    }

    fn poke_u32(&self, ptr: u32, value: u32) {
        self.poke(ptr, &value.to_le_bytes());
    }

    fn peek(&self, ptr: u32, len: usize) -> Vec<u8> {
        let start = ptr as usize;
        self.memory.borrow()[start..start + len].to_vec()
    }

    fn peek_u32(&self, ptr: u32) -> u32 {
        let b = self.peek(ptr, 4);
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    fn write_c(&self, s: &str) -> u32 {
        let ptr = self.alloc(s.len() as u32 + 1);
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.poke(ptr, &bytes);
        ptr
    }

    fn read_c(&self, ptr: u32) -> String {
        let memory = self.memory.borrow();
        let start = ptr as usize;
        let end = memory[start..]
            .iter()
            .position(|b| *b == 0)
            .map_or(memory.len(), |n| start + n);
        String::from_utf8_lossy(&memory[start..end]).into_owned()
    }

    fn write_static_build_info(&self) {
        let strings = ["0.0.0-fake", "2026-01-01", "wasi-sdk-fake", "wasi-libc", "clang", "19.0", "Release"];
        let mut cursor = 64u32;
        let mut pointers = Vec::new();
        for s in strings {
            let mut bytes = s.as_bytes().to_vec();
            bytes.push(0);
            self.poke(cursor, &bytes);
            pointers.push(cursor);
            cursor += bytes.len() as u32;
        }
        let info = (cursor + 7) & !7;
        let fields = [
            pointers[0],
            self.build_flags.get(),
            pointers[1],
            pointers[2],
            pointers[3],
            pointers[4],
            pointers[5],
            pointers[6],
        ];
        for (i, field) in fields.iter().enumerate() {
            self.poke_u32(info + 4 * i as u32, *field);
        }
        self.build_info.set(info);
    }

    // Handles

    fn handle(&self, value: Fake) -> u32 {
        let h = self.next_handle.get();
        self.next_handle.set(h + 1);
        self.values.borrow_mut().insert(h, value);
        self.created_values.set(self.created_values.get() + 1);
        h
    }

    fn get(&self, handle: u32) -> Result<Fake> {
        match handle {
            UNDEFINED => Ok(Fake::Undefined),
            NULL => Ok(Fake::Null),
            FALSE => Ok(Fake::Bool(false)),
            TRUE => Ok(Fake::Bool(true)),
            h => self.values.borrow().get(&h).cloned().ok_or_else(|| {
                HakoError::Memory(format!("fake engine: unknown value handle {h:#x}"))
            }),
        }
    }

    fn drop_handle(&self, handle: u32) -> Result<()> {
        if handle <= TRUE {
            return Ok(());
        }
        if self.values.borrow_mut().remove(&handle).is_none() {
            self.double_frees.set(self.double_frees.get() + 1);
            return Err(HakoError::Memory(format!(
                "fake engine: double free of value handle {handle:#x}"
            )));
        }
        Ok(())
    }

    fn throw_value(&self, value: Fake) -> u32 {
        *self.pending_exception.borrow_mut() = Some(value);
        self.handle(Fake::Exception)
    }

    fn host(&self) -> Option<Rc<dyn HostImports>> {
        self.imports.borrow().as_ref().and_then(Weak::upgrade)
    }

    fn runtime_of(&self, ctx: u32) -> u32 {
        self.contexts.borrow().get(&ctx).copied().unwrap_or(0)
    }

    fn key_of(&self, value: &Fake) -> Key {
        match value {
            Fake::Symbol(s) => Key::Sym(s.clone()),
            other => Key::Str(display(other)),
        }
    }

    fn property(&self, target: &Fake, key: &Key) -> Fake {
        let Fake::Object(obj) = target else {
            return Fake::Undefined;
        };
        if let Key::Sym(sym) = key {
            if Rc::ptr_eq(sym, &self.iterator_symbol) && matches!(obj.borrow().kind, Kind::Array(_)) {
                return function(Func::ArrayValues(obj.clone()), "values");
            }
        }
        if let Key::Str(name) = key {
            let special = match (&obj.borrow().kind, name.as_str()) {
                (Kind::Array(items), "length") => Some(Fake::Number(items.len() as f64)),
                (Kind::Array(items), index) => index
                    .parse::<usize>()
                    .ok()
                    .map(|i| items.get(i).cloned().unwrap_or(Fake::Undefined)),
                (Kind::Promise(_), "then") => Some(function(Func::Then(obj.clone()), "then")),
                (Kind::Iterator { .. }, "next") => {
                    Some(function(Func::IterNext(obj.clone()), "next"))
                }
                (Kind::Iterator { .. }, "return") => {
                    Some(function(Func::IterReturn(obj.clone()), "return"))
                }
                _ => None,
            };
            if let Some(value) = special {
                return value;
            }
        }
        obj.borrow()
            .props
            .iter()
            .find(|(k, _)| k.same(key))
            .map(|(_, v)| v.clone())
            .unwrap_or(Fake::Undefined)
    }

    fn set_property(&self, target: &Fake, key: Key, value: Fake) -> bool {
        let Fake::Object(obj) = target else {
            return false;
        };
        let mut o = obj.borrow_mut();
        if let (Kind::Array(items), Key::Str(name)) = (&mut o.kind, &key) {
            if let Ok(i) = name.parse::<usize>() {
                if items.len() <= i {
                    items.resize(i + 1, Fake::Undefined);
                }
                items[i] = value;
                return true;
            }
        }
        match o.props.iter_mut().find(|(k, _)| k.same(&key)) {
            Some(slot) => slot.1 = value,
            None => o.props.push((key, value)),
        }
        true
    }

    // Calls

    fn invoke(&self, ctx: u32, func: &Fake, this: Fake, args: Vec<Fake>) -> std::result::Result<Fake, Fake> {
        let Fake::Object(obj) = func else {
            return Err(error_value("TypeError", "not a function"));
        };
        let f = match &obj.borrow().kind {
            Kind::Function(f) => f.clone(),
            _ => return Err(error_value("TypeError", "not a function")),
        };
        let arg0 = args.first().cloned().unwrap_or(Fake::Undefined);
        match f {
            Func::Host(id) => self.invoke_host(ctx, id, this, args),
            Func::Resolve(p) => {
                self.settle(ctx, &p, 1, arg0);
                Ok(Fake::Undefined)
            }
            Func::Reject(p) => {
                self.settle(ctx, &p, 2, arg0);
                Ok(Fake::Undefined)
            }
            Func::Then(p) => {
                let on_ok = arg0;
                let on_err = args.get(1).cloned().unwrap_or(Fake::Undefined);
                let settled = match &mut p.borrow_mut().kind {
                    Kind::Promise(slot) if slot.state == 0 => {
                        slot.reactions.push((on_ok.clone(), on_err.clone()));
                        None
                    }
                    Kind::Promise(slot) => Some((slot.state, slot.result.clone())),
                    _ => None,
                };
                if let Some((state, result)) = settled {
                    let handler = if state == 1 { on_ok } else { on_err };
                    self.jobs.borrow_mut().push_back(Job { ctx, handler, arg: result });
                }
                Ok(promise(0, Fake::Undefined))
            }
            Func::PromiseResolve => match &arg0 {
                Fake::Object(o) if matches!(o.borrow().kind, Kind::Promise(_)) => Ok(arg0.clone()),
                _ => Ok(promise(1, arg0)),
            },
            Func::ArrayValues(items) => Ok(object(
                Kind::Iterator {
                    items,
                    next: 0,
                    returned: false,
                },
                Vec::new(),
            )),
            Func::IterNext(it) => {
                let mut o = it.borrow_mut();
                let Kind::Iterator { items, next, returned } = &mut o.kind else {
                    return Err(error_value("TypeError", "not an iterator"));
                };
                let item = match &items.borrow().kind {
                    Kind::Array(values) if !*returned => values.get(*next).cloned(),
                    _ => None,
                };
                *next += 1;
                Ok(match item {
                    Some(value) => iter_result(value, false),
                    None => iter_result(Fake::Undefined, true),
                })
            }
            Func::IterReturn(it) => {
                if let Kind::Iterator { returned, .. } = &mut it.borrow_mut().kind {
                    *returned = true;
                }
                self.iterator_returns.set(self.iterator_returns.get() + 1);
                Ok(iter_result(arg0, true))
            }
        }
    }

    fn invoke_host(&self, ctx: u32, id: i32, this: Fake, args: Vec<Fake>) -> std::result::Result<Fake, Fake> {
        let Some(host) = self.host() else {
            return Err(error_value("InternalError", "no host imports"));
        };
        let rt = self.runtime_of(ctx);
        let profile = self
            .runtimes
            .borrow()
            .get(&rt)
            .and_then(|r| r.profile);
        if let Some(opaque) = profile {
            self.emit_profile(&*host, ctx, opaque, id, "B");
        }

        let this_handle = self.handle(this);
        let handles: Vec<u32> = args.into_iter().map(|a| self.handle(a)).collect();
        let argv = self.alloc(4 * handles.len().max(1) as u32);
        for (i, h) in handles.iter().enumerate() {
            self.poke_u32(argv + 4 * i as u32, *h);
        }

        let result = host.call_function(ctx, this_handle, handles.len() as i32, argv, id);

        let _ = self.release(argv);
        for h in handles.iter().chain(std::iter::once(&this_handle)) {
            self.values.borrow_mut().remove(h);
        }
        if let Some(opaque) = profile {
            self.emit_profile(&*host, ctx, opaque, id, "E");
        }

        let value = self.get(result).unwrap_or(Fake::Undefined);
        let _ = self.drop_handle(result);
        match value {
            Fake::Exception => Err(self
                .pending_exception
                .borrow_mut()
                .take()
                .unwrap_or(Fake::Undefined)),
            v => Ok(v),
        }
    }

    fn emit_profile(&self, host: &dyn HostImports, ctx: u32, opaque: u32, id: i32, phase: &str) {
        let event = serde_json::json!({
            "name": format!("host#{id}"),
            "cat": "js",
            "ph": phase,
            "ts": 0,
            "pid": 1,
            "tid": 1,
        });
        let ptr = self.write_c(&event.to_string());
        if phase == "B" {
            host.profile_function_start(ctx, ptr, opaque);
        } else {
            host.profile_function_end(ctx, ptr, opaque);
        }
        let _ = self.release(ptr);
    }

    fn settle(&self, ctx: u32, p: &Rc<RefCell<Obj>>, state: i32, value: Fake) {
        let reactions = match &mut p.borrow_mut().kind {
            Kind::Promise(slot) if slot.state == 0 => {
                slot.state = state;
                slot.result = value.clone();
                std::mem::take(&mut slot.reactions)
            }
            _ => return,
        };
        let mut jobs = self.jobs.borrow_mut();
        for (on_ok, on_err) in reactions {
            let handler = if state == 1 { on_ok } else { on_err };
            jobs.push_back(Job {
                ctx,
                handler,
                arg: value.clone(),
            });
        }
    }

    // Evaluation

    fn parse(&self, code: &str) -> std::result::Result<Expr, Fake> {
        let code = code.trim().trim_end_matches(';').trim();
        if let Some(rest) = code.strip_prefix("throw ") {
            return Ok(Expr::Throw(unquote(rest.trim()).to_string()));
        }
        if code == "while (true) {}" || code == "for (;;) {}" {
            return Ok(Expr::Loop);
        }
        if let Some(rest) = code.strip_prefix("import ") {
            return Ok(Expr::Import(unquote(rest.trim()).to_string()));
        }
        match code {
            "undefined" => return Ok(Expr::Value(Fake::Undefined)),
            "null" => return Ok(Expr::Value(Fake::Null)),
            "true" => return Ok(Expr::Value(Fake::Bool(true))),
            "false" => return Ok(Expr::Value(Fake::Bool(false))),
            _ => {}
        }
        if let Ok(n) = code.parse::<f64>() {
            return Ok(Expr::Value(Fake::Number(n)));
        }
        if let Some((a, b)) = code.split_once('+') {
            if let (Ok(a), Ok(b)) = (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
                return Ok(Expr::Add(a, b));
            }
        }
        if code.starts_with('\'') && code.ends_with('\'') && code.len() >= 2 {
            return Ok(Expr::Value(Fake::Str(code[1..code.len() - 1].to_string())));
        }
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(code) {
            return Ok(Expr::Value(from_json(&json)));
        }
        Err(error_value("SyntaxError", "unexpected token"))
    }

    fn run(&self, ctx: u32, expr: Expr) -> std::result::Result<Fake, Fake> {
        match expr {
            Expr::Value(v) => Ok(v),
            Expr::Add(a, b) => Ok(Fake::Number(a + b)),
            Expr::Throw(message) => Err(error_value("Error", &message)),
            Expr::Loop => self.spin(ctx),
            Expr::Import(name) => self.import(ctx, name),
        }
    }

    fn evaluate(&self, ctx: u32, code: &str) -> std::result::Result<Fake, Fake> {
        let expr = self.parse(code)?;
        self.run(ctx, expr)
    }

    fn spin(&self, ctx: u32) -> std::result::Result<Fake, Fake> {
        let rt = self.runtime_of(ctx);
        for _ in 0..LOOP_LIMIT {
            let opaque = self.runtimes.borrow().get(&rt).and_then(|r| r.interrupt);
            let Some(opaque) = opaque else { continue };
            let Some(host) = self.host() else { continue };
            self.interrupt_polls.set(self.interrupt_polls.get() + 1);
            if host.interrupt_handler(rt, ctx, opaque) != 0 {
                return Err(error_value("InternalError", "interrupted"));
            }
        }
        Err(error_value("RangeError", "fake engine loop limit reached"))
    }

    fn import(&self, ctx: u32, mut name: String) -> std::result::Result<Fake, Fake> {
        let rt = self.runtime_of(ctx);
        let loader = self.runtimes.borrow().get(&rt).and_then(|r| r.loader);
        let (Some(custom_normalize), Some(host)) = (loader, self.host()) else {
            return Err(error_value("ReferenceError", "could not load module"));
        };
        if custom_normalize {
            let base = self.write_c("file://eval");
            let raw = self.write_c(&name);
            let normalized = host.normalize_module(rt, ctx, base, raw, 0);
            if normalized != raw && normalized != 0 {
                name = self.read_c(normalized);
                let _ = self.release(normalized);
            }
            let _ = self.release(base);
            let _ = self.release(raw);
        }
        let raw = self.write_c(&name);
        let source = host.load_module(rt, ctx, raw, 0, 0);
        let _ = self.release(raw);
        if source == 0 {
            return Err(error_value("ReferenceError", "module loader returned nothing"));
        }
        let tag = self.peek_u32(source);
        let data = self.peek_u32(source + 4);
        let _ = self.release(source);
        match tag {
            0 => {
                let code = self.read_c(data);
                let _ = self.release(data);
                self.evaluate(ctx, &code)
            }
            1 => Ok(Fake::Number(data as f64)),
            _ => Err(error_value("ReferenceError", &format!("could not load module '{name}'"))),
        }
    }

    fn exception_slot(&self, result: std::result::Result<Fake, Fake>) -> u32 {
        match result {
            Ok(v) => self.handle(v),
            Err(e) => self.throw_value(e),
        }
    }

    fn string_handle(&self, s: &str) -> u32 {
        self.handle(Fake::Str(s.to_string()))
    }
}

fn object(kind: Kind, props: Vec<(Key, Fake)>) -> Fake {
    Fake::Object(Rc::new(RefCell::new(Obj { kind, props })))
}

fn function(f: Func, name: &str) -> Fake {
    object(
        Kind::Function(f),
        vec![(Key::Str("name".into()), Fake::Str(name.into()))],
    )
}

fn promise(state: i32, result: Fake) -> Fake {
    object(
        Kind::Promise(PromiseSlot {
            state,
            result,
            reactions: Vec::new(),
        }),
        Vec::new(),
    )
}

fn iter_result(value: Fake, done: bool) -> Fake {
    object(
        Kind::Plain,
        vec![
            (Key::Str("value".into()), value),
            (Key::Str("done".into()), Fake::Bool(done)),
        ],
    )
}

fn error_value(name: &str, message: &str) -> Fake {
    object(
        Kind::Error,
        vec![
            (Key::Str("name".into()), Fake::Str(name.into())),
            (Key::Str("message".into()), Fake::Str(message.into())),
            (Key::Str("stack".into()), Fake::Str("    at <eval>\n".into())),
        ],
    )
}

fn unquote(s: &str) -> &str {
    s.trim_matches(|c| c == '"' || c == '\'')
}

fn number_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".into()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".into() } else { "-Infinity".into() }
    } else if n == 0.0 {
        "0".into()
    } else {
        format!("{n}")
    }
}

fn display(value: &Fake) -> String {
    match value {
        Fake::Undefined => "undefined".into(),
        Fake::Null => "null".into(),
        Fake::Bool(b) => b.to_string(),
        Fake::Number(n) => number_string(*n),
        Fake::Str(s) => s.clone(),
        Fake::BigInt(i) => i.to_string(),
        Fake::Symbol(s) => format!("Symbol({})", s.description),
        Fake::Exception => "[exception]".into(),
        Fake::Object(o) => {
            let o = o.borrow();
            match &o.kind {
                Kind::Array(items) => items.iter().map(display).collect::<Vec<_>>().join(","),
                Kind::Error => {
                    let field = |k: &str| {
                        o.props
                            .iter()
                            .find(|(key, _)| key.same(&Key::Str(k.into())))
                            .map(|(_, v)| display(v))
                            .unwrap_or_default()
                    };
                    format!("{}: {}", field("name"), field("message"))
                }
                Kind::Function(_) => "function () { [native code] }".into(),
                _ => "[object Object]".into(),
            }
        }
    }
}

fn to_json(value: &Fake) -> Option<serde_json::Value> {
    use serde_json::Value as J;
    Some(match value {
        Fake::Undefined | Fake::Exception | Fake::Symbol(_) => return None,
        Fake::Null => J::Null,
        Fake::Bool(b) => J::Bool(*b),
        Fake::Number(n) => json_number(*n),
        Fake::Str(s) => J::String(s.clone()),
        Fake::BigInt(i) => J::String(i.to_string()),
        Fake::Object(o) => {
            let o = o.borrow();
            match &o.kind {
                Kind::Function(_) => return None,
                Kind::Array(items) => J::Array(items.iter().map(|v| to_json(v).unwrap_or(J::Null)).collect()),
                Kind::Date(ms) => iso_date(*ms).map_or(J::Null, J::String),
                _ => J::Object(
                    o.props
                        .iter()
                        .filter_map(|(k, v)| match k {
                            Key::Str(k) => to_json(v).map(|v| (k.clone(), v)),
                            Key::Sym(_) => None,
                        })
                        .collect(),
                ),
            }
        }
    })
}

/// `Date.prototype.toISOString` for years 0..=9999; `None` for an invalid
/// date.
fn iso_date(ms: f64) -> Option<String> {
    if !ms.is_finite() {
        return None;
    }
    let ms = ms as i64;
    let days = ms.div_euclid(86_400_000);
    let time = ms.rem_euclid(86_400_000);
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    Some(format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
        time / 3_600_000,
        time / 60_000 % 60,
        time / 1000 % 60,
        time % 1000
    ))
}

fn from_json(json: &serde_json::Value) -> Fake {
    use serde_json::Value as J;
    match json {
        J::Null => Fake::Null,
        J::Bool(b) => Fake::Bool(*b),
        J::Number(n) => Fake::Number(n.as_f64().unwrap_or(f64::NAN)),
        J::String(s) => Fake::Str(s.clone()),
        J::Array(items) => object(Kind::Array(items.iter().map(from_json).collect()), Vec::new()),
        J::Object(map) => object(
            Kind::Plain,
            map.iter()
                .map(|(k, v)| (Key::Str(k.clone()), from_json(v)))
                .collect(),
        ),
    }
}

fn type_name(value: &Fake) -> &'static str {
    match value {
        Fake::Undefined => "undefined",
        Fake::Null => "null",
        Fake::Exception => "unknown",
        Fake::Bool(_) => "boolean",
        Fake::Number(_) => "number",
        Fake::Str(_) => "string",
        Fake::BigInt(_) => "bigint",
        Fake::Symbol(_) => "symbol",
        Fake::Object(o) => match o.borrow().kind {
            Kind::Function(_) => "function",
            _ => "object",
        },
    }
}

fn strict_equals(a: &Fake, b: &Fake, op: i32) -> bool {
    match (a, b) {
        (Fake::Undefined, Fake::Undefined) | (Fake::Null, Fake::Null) => true,
        (Fake::Bool(x), Fake::Bool(y)) => x == y,
        (Fake::Number(x), Fake::Number(y)) => match op {
            1 => (x.is_nan() && y.is_nan()) || (x == y && x.is_sign_negative() == y.is_sign_negative()),
            2 => (x.is_nan() && y.is_nan()) || x == y,
            _ => x == y,
        },
        (Fake::Str(x), Fake::Str(y)) => x == y,
        (Fake::BigInt(x), Fake::BigInt(y)) => x == y,
        (Fake::Symbol(x), Fake::Symbol(y)) => Rc::ptr_eq(x, y),
        (Fake::Object(x), Fake::Object(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

fn with_kind<R>(value: &Fake, f: impl FnOnce(&Kind) -> R) -> Option<R> {
    match value {
        Fake::Object(o) => Some(f(&o.borrow().kind)),
        _ => None,
    }
}

impl Ffi for FakeEngine {
    fn memory_size(&self) -> usize {
        MEMORY_SIZE
    }

    fn read_memory(&self, ptr: u32, buf: &mut [u8]) -> Result<()> {
        if ptr as usize + buf.len() > MEMORY_SIZE {
            return Err(HakoError::Memory("fake engine: read out of bounds".into()));
        }
        buf.copy_from_slice(&self.peek(ptr, buf.len()));
        Ok(())
    }

    fn write_memory(&self, ptr: u32, data: &[u8]) -> Result<()> {
        if ptr as usize + data.len() > MEMORY_SIZE {
            return Err(HakoError::Memory("fake engine: write out of bounds".into()));
        }
        self.poke(ptr, data);
        Ok(())
    }

    fn set_host_imports(&self, imports: Weak<dyn HostImports>) {
        *self.imports.borrow_mut() = Some(imports);
    }

    fn malloc(&self, _ctx: u32, size: u32) -> Result<u32> {
        Ok(self.alloc(size))
    }

    fn free(&self, _ctx: u32, ptr: u32) -> Result<()> {
        self.release(ptr)
    }

    fn runtime_malloc(&self, _rt: u32, size: u32) -> Result<u32> {
        Ok(self.alloc(size))
    }

    fn runtime_free(&self, _rt: u32, ptr: u32) -> Result<()> {
        self.release(ptr)
    }

    fn free_cstring(&self, _ctx: u32, ptr: u32) -> Result<()> {
        self.release(ptr)
    }

    fn new_runtime(&self) -> Result<u32> {
        let ptr = self.next_pointer.get();
        self.next_pointer.set(ptr + 0x10);
        self.runtimes.borrow_mut().insert(ptr, RuntimeState::default());
        Ok(ptr)
    }

    fn free_runtime(&self, rt: u32) -> Result<()> {
        self.runtimes.borrow_mut().remove(&rt);
        Ok(())
    }

    fn set_strip_info(&self, rt: u32, flags: i32) -> Result<()> {
        if let Some(r) = self.runtimes.borrow_mut().get_mut(&rt) {
            r.strip = flags;
        }
        Ok(())
    }

    fn get_strip_info(&self, rt: u32) -> Result<i32> {
        Ok(self.runtimes.borrow().get(&rt).map_or(0, |r| r.strip))
    }

    fn runtime_set_memory_limit(&self, rt: u32, limit: u32) -> Result<()> {
        if let Some(r) = self.runtimes.borrow_mut().get_mut(&rt) {
            r.limit = Some(limit);
        }
        Ok(())
    }

    fn runtime_compute_memory_usage(&self, rt: u32, _ctx: u32) -> Result<u32> {
        let limit = self
            .runtimes
            .borrow()
            .get(&rt)
            .and_then(|r| r.limit)
            .map_or(-1.0, |l| if l == u32::MAX { -1.0 } else { l as f64 });
        let fields = [
            ("malloc_limit", limit),
            ("memory_used_size", (self.heap_top.get() - HEAP_BASE) as f64),
            ("malloc_count", self.allocations.borrow().len() as f64),
            ("memory_used_count", self.allocations.borrow().len() as f64),
            ("obj_count", self.values.borrow().len() as f64),
        ];
        let props = fields
            .into_iter()
            .map(|(k, v)| (Key::Str(k.into()), Fake::Number(v)))
            .collect();
        Ok(self.handle(object(Kind::Plain, props)))
    }

    fn runtime_dump_memory_usage(&self, _rt: u32) -> Result<u32> {
        Ok(self.write_c(&format!(
            "fake engine: {} bytes in {} allocations",
            self.heap_top.get() - HEAP_BASE,
            self.allocations.borrow().len()
        )))
    }

    fn is_job_pending(&self, _rt: u32) -> Result<i32> {
        Ok(i32::from(!self.jobs.borrow().is_empty()))
    }

    fn execute_pending_job(&self, _rt: u32, max_jobs: i32, last_ctx_out: u32) -> Result<u32> {
        let mut executed = 0;
        while executed != max_jobs {
            let job = self.jobs.borrow_mut().pop_front();
            let Some(job) = job else { break };
            self.poke_u32(last_ctx_out, job.ctx);
            if let Err(e) = self.invoke(job.ctx, &job.handler, Fake::Undefined, vec![job.arg]) {
                return Ok(self.handle(e));
            }
            executed += 1;
        }
        Ok(self.handle(Fake::Number(executed as f64)))
    }

    fn enable_interrupt_handler(&self, rt: u32, opaque: u32) -> Result<()> {
        if let Some(r) = self.runtimes.borrow_mut().get_mut(&rt) {
            r.interrupt = Some(opaque);
        }
        Ok(())
    }

    fn disable_interrupt_handler(&self, rt: u32) -> Result<()> {
        if let Some(r) = self.runtimes.borrow_mut().get_mut(&rt) {
            r.interrupt = None;
        }
        Ok(())
    }

    fn enable_module_loader(&self, rt: u32, use_custom_normalize: i32) -> Result<()> {
        if let Some(r) = self.runtimes.borrow_mut().get_mut(&rt) {
            r.loader = Some(use_custom_normalize != 0);
        }
        Ok(())
    }

    fn disable_module_loader(&self, rt: u32) -> Result<()> {
        if let Some(r) = self.runtimes.borrow_mut().get_mut(&rt) {
            r.loader = None;
        }
        Ok(())
    }

    fn enable_profile_calls(&self, rt: u32, _sampling: u32, opaque: u32) -> Result<()> {
        if let Some(r) = self.runtimes.borrow_mut().get_mut(&rt) {
            r.profile = Some(opaque);
        }
        Ok(())
    }

    fn new_context(&self, rt: u32, _intrinsics: u32) -> Result<u32> {
        if !self.runtimes.borrow().contains_key(&rt) {
            return Ok(0);
        }
        let ptr = self.next_pointer.get();
        self.next_pointer.set(ptr + 0x10);
        self.contexts.borrow_mut().insert(ptr, rt);
        Ok(ptr)
    }

    fn free_context(&self, ctx: u32) -> Result<()> {
        self.contexts.borrow_mut().remove(&ctx);
        self.context_data.borrow_mut().remove(&ctx);
        Ok(())
    }

    fn set_context_data(&self, ctx: u32, data: u32) -> Result<()> {
        self.context_data.borrow_mut().insert(ctx, data);
        Ok(())
    }

    fn get_context_data(&self, ctx: u32) -> Result<u32> {
        Ok(self.context_data.borrow().get(&ctx).copied().unwrap_or(0))
    }

    fn set_no_strict_mode(&self, _ctx: u32) -> Result<()> {
        Ok(())
    }

    fn set_virtual_stack_size(&self, _ctx: u32, _size: u32) -> Result<()> {
        Ok(())
    }

    fn context_set_max_stack_size(&self, _ctx: u32, _size: u32) -> Result<()> {
        Ok(())
    }

    fn set_gc_threshold(&self, _ctx: u32, _threshold: i64) -> Result<()> {
        Ok(())
    }

    fn get_undefined(&self) -> Result<u32> {
        Ok(UNDEFINED)
    }

    fn get_null(&self) -> Result<u32> {
        Ok(NULL)
    }

    fn get_false(&self) -> Result<u32> {
        Ok(FALSE)
    }

    fn get_true(&self) -> Result<u32> {
        Ok(TRUE)
    }

    fn dup_value(&self, _ctx: u32, value: u32) -> Result<u32> {
        self.dup_calls.set(self.dup_calls.get() + 1);
        let v = self.get(value)?;
        Ok(self.handle(v))
    }

    fn free_value(&self, _ctx: u32, value: u32) -> Result<()> {
        self.free_value_calls.set(self.free_value_calls.get() + 1);
        self.drop_handle(value)
    }

    fn free_value_runtime(&self, _rt: u32, value: u32) -> Result<()> {
        self.free_value_calls.set(self.free_value_calls.get() + 1);
        self.drop_handle(value)
    }

    fn throw(&self, _ctx: u32, error: u32) -> Result<u32> {
        let v = self.get(error)?;
        Ok(self.throw_value(v))
    }

    fn new_error(&self, _ctx: u32) -> Result<u32> {
        Ok(self.handle(object(Kind::Error, Vec::new())))
    }

    fn get_last_error(&self, _ctx: u32, maybe_exception: u32) -> Result<u32> {
        if maybe_exception != 0 && !matches!(self.get(maybe_exception)?, Fake::Exception) {
            return Ok(0);
        }
        let pending = self.pending_exception.borrow_mut().take();
        Ok(pending.map_or(0, |e| self.handle(e)))
    }

    fn new_object(&self, _ctx: u32) -> Result<u32> {
        Ok(self.handle(object(Kind::Plain, Vec::new())))
    }

    fn new_object_proto(&self, _ctx: u32, proto: u32) -> Result<u32> {
        let proto = self.get(proto)?;
        Ok(self.handle(object(
            Kind::Plain,
            vec![(Key::Str("__proto__".into()), proto)],
        )))
    }

    fn new_array(&self, _ctx: u32) -> Result<u32> {
        Ok(self.handle(object(Kind::Array(Vec::new()), Vec::new())))
    }

    fn new_array_buffer(&self, _ctx: u32, buffer: u32, len: u32) -> Result<u32> {
        let bytes = self.peek(buffer, len as usize);
        self.release(buffer)?;
        Ok(self.handle(object(Kind::Buffer(bytes), Vec::new())))
    }

    fn get_prop(&self, _ctx: u32, this: u32, key: u32) -> Result<u32> {
        let target = self.get(this)?;
        if matches!(target, Fake::Undefined | Fake::Null) {
            *self.pending_exception.borrow_mut() =
                Some(error_value("TypeError", "cannot read property of undefined"));
            return Ok(0);
        }
        let key = self.key_of(&self.get(key)?);
        let value = self.property(&target, &key);
        Ok(self.handle(value))
    }

    fn get_prop_number(&self, _ctx: u32, this: u32, index: i32) -> Result<u32> {
        let target = self.get(this)?;
        if matches!(target, Fake::Undefined | Fake::Null) {
            *self.pending_exception.borrow_mut() =
                Some(error_value("TypeError", "cannot read property of undefined"));
            return Ok(0);
        }
        let value = self.property(&target, &Key::Str(index.to_string()));
        Ok(self.handle(value))
    }

    fn set_prop(&self, _ctx: u32, this: u32, key: u32, value: u32) -> Result<i32> {
        let target = self.get(this)?;
        if !matches!(target, Fake::Object(_)) {
            *self.pending_exception.borrow_mut() =
                Some(error_value("TypeError", "cannot set property on a primitive"));
            return Ok(-1);
        }
        let key = self.key_of(&self.get(key)?);
        let value = self.get(value)?;
        Ok(i32::from(self.set_property(&target, key, value)))
    }

    fn define_prop(
        &self,
        ctx: u32,
        this: u32,
        key: u32,
        value: u32,
        get: u32,
        _set: u32,
        _configurable: i32,
        _enumerable: i32,
        has_value: i32,
    ) -> Result<i32> {
        if has_value != 0 {
            return self.set_prop(ctx, this, key, value);
        }
        self.set_prop(ctx, this, key, get)
    }

    fn get_own_property_names(
        &self,
        _ctx: u32,
        out_ptrs: u32,
        out_len: u32,
        obj: u32,
        _flags: i32,
    ) -> Result<u32> {
        let target = self.get(obj)?;
        let mut names = Vec::new();
        if let Fake::Object(o) = &target {
            let o = o.borrow();
            if let Kind::Array(items) = &o.kind {
                names.extend((0..items.len()).map(|i| i.to_string()));
            }
            for (k, _) in &o.props {
                if let Key::Str(k) = k {
                    names.push(k.clone());
                }
            }
        }
        let handles: Vec<u32> = names.iter().map(|n| self.string_handle(n)).collect();
        let array = self.alloc(4 * handles.len().max(1) as u32);
        for (i, h) in handles.iter().enumerate() {
            self.poke_u32(array + 4 * i as u32, *h);
        }
        self.poke_u32(out_ptrs, array);
        self.poke_u32(out_len, handles.len() as u32);
        Ok(0)
    }

    fn get_global_object(&self, _ctx: u32) -> Result<u32> {
        Ok(self.handle(Fake::Object(self.global.clone())))
    }

    fn get_length(&self, _ctx: u32, out_len: u32, value: u32) -> Result<i32> {
        match with_kind(&self.get(value)?, |k| match k {
            Kind::Array(items) => Some(items.len()),
            _ => None,
        })
        .flatten()
        {
            Some(len) => {
                self.poke_u32(out_len, len as u32);
                Ok(0)
            }
            None => Ok(-1),
        }
    }

    fn new_float64(&self, _ctx: u32, num: f64) -> Result<u32> {
        Ok(self.handle(Fake::Number(num)))
    }

    fn new_bigint(&self, _ctx: u32, low: u32, high: u32) -> Result<u32> {
        let combined = (((high as u64) << 32) | low as u64) as i64;
        Ok(self.handle(Fake::BigInt(combined as i128)))
    }

    fn new_biguint(&self, _ctx: u32, low: u32, high: u32) -> Result<u32> {
        Ok(self.handle(Fake::BigInt(((high as i128) << 32) | low as i128)))
    }

    fn get_float64(&self, _ctx: u32, value: u32) -> Result<f64> {
        Ok(match self.get(value)? {
            Fake::Number(n) => n,
            Fake::Bool(b) => f64::from(u8::from(b)),
            Fake::Str(s) => s.trim().parse().unwrap_or(f64::NAN),
            Fake::Null => 0.0,
            _ => f64::NAN,
        })
    }

    fn new_string(&self, _ctx: u32, string: u32) -> Result<u32> {
        let s = self.read_c(string);
        Ok(self.handle(Fake::Str(s)))
    }

    fn to_cstring(&self, _ctx: u32, value: u32) -> Result<u32> {
        let s = display(&self.get(value)?);
        Ok(self.write_c(&s))
    }

    fn new_symbol(&self, _ctx: u32, description: u32, is_global: i32) -> Result<u32> {
        let description = self.read_c(description);
        let symbol = if is_global != 0 {
            self.global_symbols
                .borrow_mut()
                .entry(description.clone())
                .or_insert_with(|| {
                    Rc::new(Symbol {
                        description,
                        global: true,
                    })
                })
                .clone()
        } else {
            Rc::new(Symbol {
                description,
                global: false,
            })
        };
        Ok(self.handle(Fake::Symbol(symbol)))
    }

    fn get_symbol_description_or_key(&self, _ctx: u32, value: u32) -> Result<u32> {
        match self.get(value)? {
            Fake::Symbol(s) => Ok(self.write_c(&s.description)),
            _ => Ok(0),
        }
    }

    fn is_global_symbol(&self, _ctx: u32, value: u32) -> Result<i32> {
        Ok(match self.get(value)? {
            Fake::Symbol(s) => i32::from(s.global),
            _ => 0,
        })
    }

    fn type_of(&self, _ctx: u32, value: u32) -> Result<u32> {
        let name = type_name(&self.get(value)?);
        Ok(self.write_c(name))
    }

    fn is_array(&self, _ctx: u32, value: u32) -> Result<i32> {
        Ok(i32::from(
            with_kind(&self.get(value)?, |k| matches!(k, Kind::Array(_))).unwrap_or(false),
        ))
    }

    fn is_typed_array(&self, _ctx: u32, _value: u32) -> Result<i32> {
        Ok(0)
    }

    fn get_typed_array_type(&self, _ctx: u32, _value: u32) -> Result<i32> {
        Ok(0)
    }

    fn is_array_buffer(&self, value: u32) -> Result<i32> {
        Ok(i32::from(
            with_kind(&self.get(value)?, |k| matches!(k, Kind::Buffer(_))).unwrap_or(false),
        ))
    }

    fn is_equal(&self, _ctx: u32, a: u32, b: u32, op: i32) -> Result<i32> {
        Ok(i32::from(strict_equals(&self.get(a)?, &self.get(b)?, op)))
    }

    fn copy_array_buffer(&self, _ctx: u32, value: u32, out_len: u32) -> Result<u32> {
        let bytes = with_kind(&self.get(value)?, |k| match k {
            Kind::Buffer(b) => Some(b.clone()),
            _ => None,
        })
        .flatten();
        let Some(bytes) = bytes else {
            *self.pending_exception.borrow_mut() =
                Some(error_value("TypeError", "not an ArrayBuffer"));
            return Ok(0);
        };
        self.poke_u32(out_len, bytes.len() as u32);
        if bytes.is_empty() {
            return Ok(0);
        }
        let ptr = self.alloc(bytes.len() as u32);
        self.poke(ptr, &bytes);
        Ok(ptr)
    }

    fn copy_typed_array_buffer(&self, _ctx: u32, _value: u32, out_len: u32) -> Result<u32> {
        self.poke_u32(out_len, 0);
        *self.pending_exception.borrow_mut() =
            Some(error_value("TypeError", "not a typed array"));
        Ok(0)
    }

    fn new_function(&self, _ctx: u32, func_id: i32, name: u32) -> Result<u32> {
        let name = self.read_c(name);
        Ok(self.handle(function(Func::Host(func_id), &name)))
    }

    fn call(&self, ctx: u32, func: u32, this: u32, argc: i32, argv: u32) -> Result<u32> {
        let func = self.get(func)?;
        let this = self.get(this)?;
        let mut args = Vec::with_capacity(argc.max(0) as usize);
        for i in 0..argc.max(0) as u32 {
            args.push(self.get(self.peek_u32(argv + 4 * i))?);
        }
        let outcome = self.invoke(ctx, &func, this, args);
        Ok(self.exception_slot(outcome))
    }

    fn argv_get(&self, argv: u32, index: i32) -> Result<u32> {
        Ok(self.peek_u32(argv + 4 * index as u32))
    }

    fn eval(&self, ctx: u32, code: u32, len: u32, _filename: u32, _detect_module: i32, _flags: i32) -> Result<u32> {
        let code = String::from_utf8_lossy(&self.peek(code, len as usize)).into_owned();
        let outcome = self.evaluate(ctx, &code);
        Ok(self.exception_slot(outcome))
    }

    fn compile_to_byte_code(
        &self,
        _ctx: u32,
        code: u32,
        len: u32,
        _filename: u32,
        _detect_module: i32,
        _flags: i32,
        out_len: u32,
    ) -> Result<u32> {
        let code = self.peek(code, len as usize);
        if let Err(e) = self.parse(&String::from_utf8_lossy(&code)) {
            *self.pending_exception.borrow_mut() = Some(e);
            return Ok(0);
        }
        let mut bytes = BYTECODE_MAGIC.to_vec();
        bytes.extend_from_slice(&code);
        let ptr = self.alloc(bytes.len() as u32);
        self.poke(ptr, &bytes);
        self.poke_u32(out_len, bytes.len() as u32);
        Ok(ptr)
    }

    fn eval_byte_code(&self, ctx: u32, buffer: u32, len: u32, load_only: i32) -> Result<u32> {
        let bytes = self.peek(buffer, len as usize);
        let Some(code) = bytes.strip_prefix(BYTECODE_MAGIC) else {
            return Ok(self.throw_value(error_value("SyntaxError", "invalid bytecode")));
        };
        if load_only != 0 {
            return Ok(UNDEFINED);
        }
        let outcome = self.evaluate(ctx, &String::from_utf8_lossy(code));
        Ok(self.exception_slot(outcome))
    }

    fn new_promise_capability(&self, _ctx: u32, resolve_funcs_out: u32) -> Result<u32> {
        let p = promise(0, Fake::Undefined);
        let Fake::Object(rc) = &p else {
            return Ok(0);
        };
        let resolve = self.handle(function(Func::Resolve(rc.clone()), "resolve"));
        let reject = self.handle(function(Func::Reject(rc.clone()), "reject"));
        self.poke_u32(resolve_funcs_out, resolve);
        self.poke_u32(resolve_funcs_out + 4, reject);
        Ok(self.handle(p))
    }

    fn is_promise(&self, _ctx: u32, value: u32) -> Result<i32> {
        Ok(i32::from(
            with_kind(&self.get(value)?, |k| matches!(k, Kind::Promise(_))).unwrap_or(false),
        ))
    }

    fn promise_state(&self, _ctx: u32, value: u32) -> Result<i32> {
        Ok(with_kind(&self.get(value)?, |k| match k {
            Kind::Promise(slot) => slot.state,
            _ => -1,
        })
        .unwrap_or(-1))
    }

    fn promise_result(&self, _ctx: u32, value: u32) -> Result<u32> {
        let result = with_kind(&self.get(value)?, |k| match k {
            Kind::Promise(slot) => slot.result.clone(),
            _ => Fake::Undefined,
        })
        .unwrap_or(Fake::Undefined);
        Ok(self.handle(result))
    }

    fn get_module_namespace(&self, _ctx: u32, _module: u32) -> Result<u32> {
        Ok(self.throw_value(error_value("TypeError", "not a module")))
    }

    fn dump(&self, _ctx: u32, value: u32) -> Result<u32> {
        let v = self.get(value)?;
        let text = match &v {
            Fake::Object(o) if matches!(o.borrow().kind, Kind::Error) => {
                let o = o.borrow();
                let mut map = serde_json::Map::new();
                for (k, val) in &o.props {
                    if let (Key::Str(k), Some(json)) = (k, to_json(val)) {
                        map.insert(k.clone(), json);
                    }
                }
                serde_json::Value::Object(map).to_string()
            }
            other => to_json(other).map_or_else(|| display(other), |j| j.to_string()),
        };
        Ok(self.write_c(&text))
    }

    fn to_json(&self, _ctx: u32, value: u32, indent: i32) -> Result<u32> {
        let v = self.get(value)?;
        let text = match to_json(&v) {
            Some(j) if indent > 0 => serde_json::to_string_pretty(&j)?,
            Some(j) => j.to_string(),
            None => "undefined".into(),
        };
        Ok(self.string_handle(&text))
    }

    fn bjson_encode(&self, _ctx: u32, value: u32) -> Result<u32> {
        let v = self.get(value)?;
        let Some(json) = to_json(&v) else {
            return Ok(self.throw_value(error_value("TypeError", "value cannot be encoded")));
        };
        Ok(self.handle(object(Kind::Buffer(json.to_string().into_bytes()), Vec::new())))
    }

    fn bjson_decode(&self, _ctx: u32, buffer: u32) -> Result<u32> {
        let bytes = with_kind(&self.get(buffer)?, |k| match k {
            Kind::Buffer(b) => Some(b.clone()),
            _ => None,
        })
        .flatten();
        let decoded = bytes.and_then(|b| serde_json::from_slice::<serde_json::Value>(&b).ok());
        Ok(match decoded {
            Some(json) => self.handle(from_json(&json)),
            None => self.throw_value(error_value("SyntaxError", "invalid binary JSON")),
        })
    }

    fn is_error(&self, _ctx: u32, value: u32) -> Result<i32> {
        Ok(i32::from(
            with_kind(&self.get(value)?, |k| matches!(k, Kind::Error)).unwrap_or(false),
        ))
    }

    fn is_exception(&self, value: u32) -> Result<i32> {
        Ok(i32::from(matches!(self.get(value)?, Fake::Exception)))
    }

    fn new_date(&self, _ctx: u32, time: f64) -> Result<u32> {
        Ok(self.handle(object(Kind::Date(time), Vec::new())))
    }

    fn get_class_id(&self, _ctx: u32, value: u32) -> Result<i32> {
        Ok(with_kind(&self.get(value)?, |k| match k {
            Kind::Plain | Kind::Iterator { .. } => 1,
            Kind::Array(_) => 2,
            Kind::Error => 3,
            Kind::Function(_) => 12,
            Kind::Buffer(_) => 19,
            Kind::Date(_) => 10,
            Kind::Promise(_) => 44,
        })
        .unwrap_or(0))
    }

    fn is_instance_of(&self, _ctx: u32, _value: u32, _ctor: u32) -> Result<i32> {
        Ok(0)
    }

    fn build_info(&self) -> Result<u32> {
        Ok(self.build_info.get())
    }

    fn recoverable_leak_check(&self) -> Result<i32> {
        Ok(0)
    }
}
