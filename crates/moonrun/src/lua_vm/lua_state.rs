// LuaVM: execution state, object factories, coroutine driver.
//
// The VM owns one live execution context (value stack, frame stack, open
// upvalues); suspended coroutines park theirs in their thread object and a
// resume swaps contexts in place.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use ahash::RandomState;

use crate::compiler::Compiler;
use crate::gc::{GC, GcMode, GcStats};
use crate::lua_value::{
    Chunk, CoroutineStatus, LuaFunction, LuaStr, LuaTable, LuaThread, LuaUpvalue, LuaUserdata,
    LuaValue, NativeFn, ThreadContext, str_hash,
};
use crate::lua_vm::call_frame::CallFrame;
use crate::lua_vm::lua_error::{LuaError, LuaResult};
use crate::optimizer::OptLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmStatus {
    Ready,
    Running,
    Suspended,
    Finished,
    Error,
}

#[derive(Debug, Clone)]
pub struct VmOptions {
    /// Maximum call-stack depth before a stack-overflow error
    pub call_depth_limit: usize,
    pub gc_mode: GcMode,
    /// Live-object count that triggers a cycle collection
    pub gc_threshold: usize,
    pub opt_level: OptLevel,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions {
            call_depth_limit: 200,
            gc_mode: GcMode::Hybrid,
            gc_threshold: 1024,
            opt_level: OptLevel::Standard,
        }
    }
}

/// Where `print` writes: the process stdout or a capture buffer for tests.
pub(crate) enum PrintSink {
    Stdout,
    Buffer(String),
}

/// xoshiro256** generator backing `math.random`, one per VM.
pub struct LuaRng {
    state: [u64; 4],
}

impl LuaRng {
    pub fn new() -> Self {
        Self::from_seed(0x2545F4914F6CDD1D, 0x9E3779B97F4A7C15)
    }

    pub fn from_seed(s1: u64, s2: u64) -> Self {
        // SplitMix64 expansion of the two seed words
        let mut seed = s1 ^ s2.rotate_left(32);
        let mut next = || {
            seed = seed.wrapping_add(0x9E3779B97F4A7C15);
            let mut z = seed;
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
            z ^ (z >> 31)
        };
        let state = [next(), next(), next(), next()];
        LuaRng { state }
    }

    pub fn next_rand(&mut self) -> i64 {
        let s = &mut self.state;
        let result = s[1].wrapping_mul(5).rotate_left(7).wrapping_mul(9);
        let t = s[1] << 17;
        s[2] ^= s[0];
        s[3] ^= s[1];
        s[1] ^= s[2];
        s[0] ^= s[3];
        s[2] ^= t;
        s[3] = s[3].rotate_left(45);
        result as i64
    }

    /// Uniform float in [0, 1).
    pub fn next_float(&mut self) -> f64 {
        ((self.next_rand() as u64) >> 11) as f64 / (1u64 << 53) as f64
    }
}

impl Default for LuaRng {
    fn default() -> Self {
        Self::new()
    }
}

/// Short-string interner: identical content yields the same Rc.
struct StringInterner {
    map: HashMap<u64, Vec<Rc<LuaStr>>, RandomState>,
    short_limit: usize,
}

impl StringInterner {
    fn new() -> Self {
        StringInterner {
            map: HashMap::with_capacity_and_hasher(256, RandomState::new()),
            short_limit: 40,
        }
    }

    fn intern(&mut self, s: &str) -> Rc<LuaStr> {
        if s.len() > self.short_limit {
            return Rc::new(LuaStr::new(s.to_string()));
        }
        let hash = str_hash(s);
        if let Some(bucket) = self.map.get(&hash) {
            for existing in bucket {
                if existing.as_str() == s {
                    return Rc::clone(existing);
                }
            }
        }
        let new = Rc::new(LuaStr::new(s.to_string()));
        self.map.entry(hash).or_default().push(Rc::clone(&new));
        new
    }

    /// Drop interner entries nothing else references.
    fn sweep(&mut self) {
        self.map.retain(|_, bucket| {
            bucket.retain(|s| Rc::strong_count(s) > 1);
            !bucket.is_empty()
        });
    }
}

pub struct LuaVM {
    // Live execution context
    pub(crate) stack: Vec<LuaValue>,
    pub(crate) top: usize,
    pub(crate) frames: Vec<CallFrame>,
    pub(crate) open_upvalues: std::collections::BTreeMap<usize, Rc<LuaUpvalue>>,
    pub(crate) tbc_slots: Vec<usize>,

    globals: Rc<RefCell<LuaTable>>,
    pub(crate) gc: GC,
    interner: StringInterner,
    pub rng: LuaRng,
    status: VmStatus,
    error_slot: Option<LuaError>,
    /// Error payload carried across the unwind for pcall (`error(obj)`)
    pub(crate) error_value: Option<LuaValue>,
    /// Values handed to the resume driver by a yield
    pub(crate) yield_values: Option<Vec<LuaValue>>,
    /// Result slot of the call a yield interrupted
    pub(crate) pending_yield_dst: Option<(usize, i32)>,
    /// Thread stack: main thread at the bottom, resumed coroutines above
    pub(crate) thread_stack: Vec<Rc<RefCell<LuaThread>>>,
    /// Native-nesting level recorded per active resume; yields must not
    /// cross a native boundary established after the resume
    resume_nesting: Vec<usize>,
    pub(crate) native_nesting: usize,
    /// Metatable shared by every string value
    pub(crate) string_metatable: Option<Rc<RefCell<LuaTable>>>,
    pub(crate) print_sink: PrintSink,
    options: VmOptions,
}

impl LuaVM {
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    pub fn with_options(options: VmOptions) -> Self {
        let globals = Rc::new(RefCell::new(LuaTable::new()));
        let main = Rc::new(RefCell::new(LuaThread::main()));
        let mut vm = LuaVM {
            stack: Vec::with_capacity(64),
            top: 0,
            frames: Vec::new(),
            open_upvalues: std::collections::BTreeMap::new(),
            tbc_slots: Vec::new(),
            globals: Rc::clone(&globals),
            gc: GC::new(options.gc_mode, options.gc_threshold),
            interner: StringInterner::new(),
            rng: LuaRng::new(),
            status: VmStatus::Ready,
            error_slot: None,
            error_value: None,
            yield_values: None,
            pending_yield_dst: None,
            thread_stack: vec![main],
            resume_nesting: Vec::new(),
            native_nesting: 0,
            string_metatable: None,
            print_sink: PrintSink::Stdout,
            options,
        };
        let g = LuaValue::Table(Rc::clone(&globals));
        vm.set_global("_G", g);
        vm
    }

    /// Install the standard libraries into the globals table.
    pub fn open_libs(&mut self) -> crate::lua_vm::LuaResult<()> {
        crate::stdlib::open_all(self)
    }

    // ---- accessors ----

    pub fn status(&self) -> VmStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&LuaError> {
        self.error_slot.as_ref()
    }

    /// Clear an error state so the VM can run again.
    pub fn reset(&mut self) {
        self.status = VmStatus::Ready;
        self.error_slot = None;
        self.error_value = None;
        self.frames.clear();
        self.stack.clear();
        self.top = 0;
        self.open_upvalues.clear();
        self.tbc_slots.clear();
    }

    pub fn globals(&self) -> Rc<RefCell<LuaTable>> {
        Rc::clone(&self.globals)
    }

    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    pub fn set_global(&mut self, name: &str, value: LuaValue) {
        let key = LuaValue::String(self.intern(name));
        self.globals.borrow_mut().raw_set(key, value);
    }

    pub fn get_global(&self, name: &str) -> LuaValue {
        self.globals.borrow().get_str(name)
    }

    pub fn register_native(&mut self, name: &'static str, func: NativeFn) {
        let value = LuaValue::function(LuaFunction::native(name, func));
        self.set_global(name, value);
    }

    // ---- print sink ----

    /// Redirect `print` into an internal buffer (tests).
    pub fn capture_print(&mut self) {
        self.print_sink = PrintSink::Buffer(String::new());
    }

    pub fn take_captured_output(&mut self) -> String {
        match &mut self.print_sink {
            PrintSink::Buffer(buffer) => std::mem::take(buffer),
            PrintSink::Stdout => String::new(),
        }
    }

    pub(crate) fn print_line(&mut self, line: &str) {
        match &mut self.print_sink {
            PrintSink::Stdout => println!("{}", line),
            PrintSink::Buffer(buffer) => {
                buffer.push_str(line);
                buffer.push('\n');
            }
        }
    }

    // ---- object factories (GC-registered) ----

    pub fn intern(&mut self, s: &str) -> Rc<LuaStr> {
        self.interner.intern(s)
    }

    pub fn create_string(&mut self, s: &str) -> LuaValue {
        LuaValue::String(self.intern(s))
    }

    pub fn create_string_owned(&mut self, s: String) -> LuaValue {
        if s.len() <= 40 {
            LuaValue::String(self.intern(&s))
        } else {
            LuaValue::String(Rc::new(LuaStr::new(s)))
        }
    }

    pub fn create_table(&mut self) -> LuaValue {
        self.create_table_with(0, 0)
    }

    pub fn create_table_with(&mut self, asize: usize, hsize: usize) -> LuaValue {
        let value = LuaValue::Table(Rc::new(RefCell::new(LuaTable::with_capacity(asize, hsize))));
        self.gc.register(&value);
        value
    }

    pub fn create_function(&mut self, f: LuaFunction) -> LuaValue {
        let value = LuaValue::function(f);
        self.gc.register(&value);
        value
    }

    pub fn create_userdata(&mut self, size: usize, tag: &str) -> LuaValue {
        let value = LuaValue::Userdata(Rc::new(LuaUserdata::new(size, tag)));
        self.gc.register(&value);
        value
    }

    pub fn create_coroutine(&mut self, entry: Rc<LuaFunction>) -> LuaValue {
        let value = LuaValue::Thread(Rc::new(RefCell::new(LuaThread::new(entry))));
        self.gc.register(&value);
        value
    }

    // ---- garbage collection ----

    pub fn gc_stats(&self) -> GcStats {
        self.gc.stats()
    }

    /// Run a full cycle collection, then any queued finalizers.
    pub fn collect_garbage(&mut self) -> usize {
        // Stale slots above the live extent hold dead references; drop them
        // so refcounts reflect reality before tracing
        let extent = self
            .frames
            .iter()
            .map(|f| f.base + f.chunk.max_stack_size as usize)
            .max()
            .unwrap_or(0)
            .max(self.top)
            .min(self.stack.len());
        self.stack.truncate(extent);
        let roots = self.gc_roots();
        let outcome = self.gc.collect_cycles(&roots);
        for (object, finalizer) in outcome.finalizers {
            // A failing __gc finalizer is swallowed; collection must finish
            let _ = self.call_value(finalizer, vec![object]);
        }
        self.interner.sweep();
        outcome.freed
    }

    pub(crate) fn maybe_collect_garbage(&mut self) {
        if self.gc.should_collect() {
            self.collect_garbage();
        }
    }

    fn gc_roots(&self) -> Vec<LuaValue> {
        // Live stack extent: the logical top, extended to cover every active
        // frame window. Slots beyond it are stale and must not root anything.
        let extent = self
            .frames
            .iter()
            .map(|f| f.base + f.chunk.max_stack_size as usize)
            .max()
            .unwrap_or(0)
            .max(self.top)
            .min(self.stack.len());
        let mut roots = Vec::with_capacity(extent + 8);
        roots.push(LuaValue::Table(Rc::clone(&self.globals)));
        roots.extend(self.stack[..extent].iter().cloned());
        for frame in &self.frames {
            roots.push(LuaValue::Function(Rc::clone(&frame.closure)));
            roots.extend(frame.varargs.iter().cloned());
        }
        for cell in self.open_upvalues.values() {
            if let Some(v) = cell.closed_value() {
                roots.push(v);
            }
        }
        for thread in &self.thread_stack {
            roots.push(LuaValue::Thread(Rc::clone(thread)));
        }
        if let Some(mt) = &self.string_metatable {
            roots.push(LuaValue::Table(Rc::clone(mt)));
        }
        if let Some(v) = &self.error_value {
            roots.push(v.clone());
        }
        roots.extend(self.gc.temp_roots());
        roots
    }

    // ---- compile and execute ----

    pub fn compile(&mut self, source: &str) -> LuaResult<Chunk> {
        self.compile_named(source, "chunk")
    }

    pub fn compile_named(&mut self, source: &str, chunk_name: &str) -> LuaResult<Chunk> {
        Compiler::compile_with_level(source, chunk_name, self.options.opt_level)
    }

    /// Compile and run a source string; returns the first result value.
    pub fn execute_string(&mut self, source: &str) -> LuaResult<LuaValue> {
        let results = self.execute_string_multi(source)?;
        Ok(results.into_iter().next().unwrap_or(LuaValue::Nil))
    }

    pub fn execute_string_multi(&mut self, source: &str) -> LuaResult<Vec<LuaValue>> {
        let chunk = self.compile_named(source, "chunk")?;
        self.execute(Rc::new(chunk))
    }

    /// Read and run a source file.
    pub fn execute_file(&mut self, path: &str) -> LuaResult<LuaValue> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| LuaError::io(format!("cannot open {}: {}", path, e)))?;
        let chunk = self.compile_named(&source, path)?;
        let results = self.execute(Rc::new(chunk))?;
        Ok(results.into_iter().next().unwrap_or(LuaValue::Nil))
    }

    /// Run a compiled main chunk to completion.
    pub fn execute(&mut self, chunk: Rc<Chunk>) -> LuaResult<Vec<LuaValue>> {
        self.status = VmStatus::Running;
        let env = LuaUpvalue::new_closed(LuaValue::Table(Rc::clone(&self.globals)));
        let main = LuaFunction::closure(chunk, vec![env]);
        let main_value = self.create_function(main);
        let result = self.call_value(main_value, Vec::new());
        match &result {
            Ok(_) => self.status = VmStatus::Finished,
            Err(e) => {
                self.status = VmStatus::Error;
                self.error_slot = Some(e.clone());
            }
        }
        result
    }

    /// Call any callable with an argument vector, running nested dispatch
    /// for Lua closures. This is the protected-call workhorse and the
    /// native/metamethod reentry point.
    pub fn call_value(&mut self, func: LuaValue, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        match &func {
            LuaValue::Function(f) => match f.as_ref() {
                LuaFunction::Native(native) => {
                    self.native_nesting += 1;
                    let result = (native.func)(self, args);
                    self.native_nesting -= 1;
                    result
                }
                LuaFunction::Closure { .. } => {
                    let entry_depth = self.frames.len();
                    let func_slot = self.stack_room_for_call(args.len());
                    self.stack[func_slot] = func.clone();
                    for (i, arg) in args.into_iter().enumerate() {
                        self.stack[func_slot + 1 + i] = arg;
                    }
                    let nargs = self.stack_args_count(func_slot);
                    self.push_lua_frame(Rc::clone(f), func_slot, nargs, -1)?;
                    self.native_nesting += 1;
                    let result = self.run_nested(entry_depth);
                    self.native_nesting -= 1;
                    if result.is_err() {
                        self.unwind_to(entry_depth, func_slot);
                    }
                    result
                }
                LuaFunction::Proto(proto) => {
                    // Bare prototype: instantiate with the default environment
                    let env = LuaUpvalue::new_closed(LuaValue::Table(Rc::clone(&self.globals)));
                    let closure = LuaFunction::closure(Rc::clone(proto), vec![env]);
                    let value = self.create_function(closure);
                    self.call_value(value, args)
                }
            },
            _ => {
                // Callable through __call?
                let mm = self.get_metamethod(&func, crate::lua_vm::MetaMethod::Call);
                match mm {
                    Some(handler) => {
                        let mut full_args = Vec::with_capacity(args.len() + 1);
                        full_args.push(func);
                        full_args.extend(args);
                        self.call_value(handler, full_args)
                    }
                    None => Err(LuaError::type_error(format!(
                        "attempt to call a {} value",
                        func.type_name()
                    ))),
                }
            }
        }
    }

    /// Reserve a fresh region above every live frame for an out-of-band call.
    fn stack_room_for_call(&mut self, nargs: usize) -> usize {
        let func_slot = match self.frames.last() {
            Some(f) => (f.base + f.chunk.max_stack_size as usize).max(self.top),
            None => self.top,
        };
        let needed = func_slot + 1 + nargs;
        if self.stack.len() < needed {
            self.stack.resize(needed, LuaValue::Nil);
        }
        self.top = needed;
        func_slot
    }

    fn stack_args_count(&self, func_slot: usize) -> usize {
        self.top - (func_slot + 1)
    }

    /// Push an activation record for a Lua closure whose callee value sits at
    /// `func_slot` with its arguments right after it.
    pub(crate) fn push_lua_frame(
        &mut self,
        closure: Rc<LuaFunction>,
        func_slot: usize,
        nargs: usize,
        nresults: i32,
    ) -> LuaResult<()> {
        if self.frames.len() >= self.options.call_depth_limit {
            return Err(LuaError::stack_overflow());
        }
        let chunk = closure.proto().expect("closure without prototype");
        let base = func_slot + 1;
        let needed = base + chunk.max_stack_size as usize;
        if self.stack.len() < needed {
            self.stack.resize(needed, LuaValue::Nil);
        }
        // Registers beyond the arguments start out nil; the region may hold
        // junk from an earlier frame
        for slot in (base + nargs)..needed {
            self.stack[slot] = LuaValue::Nil;
        }
        self.top = base + nargs;
        self.frames.push(CallFrame::new(
            closure, chunk, base, nresults, nargs, func_slot,
        ));
        Ok(())
    }

    // ---- upvalues and to-be-closed ----

    /// The thread whose context is currently installed in the VM.
    pub(crate) fn current_thread(&self) -> Rc<RefCell<LuaThread>> {
        Rc::clone(self.thread_stack.last().expect("thread stack empty"))
    }

    /// Canonical open cell for an absolute stack slot of the running thread.
    pub(crate) fn find_or_create_upvalue(&mut self, slot: usize) -> Rc<LuaUpvalue> {
        if let Some(cell) = self.open_upvalues.get(&slot) {
            return Rc::clone(cell);
        }
        let owner = self.current_thread();
        let cell = LuaUpvalue::new_open(&owner, slot);
        self.open_upvalues.insert(slot, Rc::clone(&cell));
        cell
    }

    /// Close every open cell aliasing a slot >= `from`.
    pub(crate) fn close_upvalues_from(&mut self, from: usize) {
        let closing = self.open_upvalues.split_off(&from);
        for (slot, cell) in closing {
            let value = self.stack.get(slot).cloned().unwrap_or(LuaValue::Nil);
            cell.close(value);
        }
    }

    /// Run `__close` for to-be-closed slots >= `from`, reverse declaration
    /// order.
    pub(crate) fn close_tbc_from(&mut self, from: usize) -> LuaResult<()> {
        while let Some(&slot) = self.tbc_slots.last() {
            if slot < from {
                break;
            }
            self.tbc_slots.pop();
            let value = self.stack.get(slot).cloned().unwrap_or(LuaValue::Nil);
            if value.is_nil() || value == LuaValue::Boolean(false) {
                continue;
            }
            let mm = self.get_metamethod(&value, crate::lua_vm::MetaMethod::Close);
            match mm {
                Some(close) => {
                    self.call_value(close, vec![value, LuaValue::Nil])?;
                }
                None => {
                    return Err(LuaError::type_error(format!(
                        "variable of type {} has no '__close' metamethod",
                        value.type_name()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Abandon frames above `entry_depth` after an error, closing what they
    /// left open.
    pub(crate) fn unwind_to(&mut self, entry_depth: usize, stack_floor: usize) {
        self.close_upvalues_from(stack_floor);
        // Close-on-error must not raise again; drop secondary failures
        let _ = self.close_tbc_from(stack_floor);
        self.frames.truncate(entry_depth);
        self.top = stack_floor;
    }

    // ---- coroutines ----

    fn take_context(&mut self) -> ThreadContext {
        ThreadContext {
            stack: std::mem::take(&mut self.stack),
            top: std::mem::replace(&mut self.top, 0),
            frames: std::mem::take(&mut self.frames),
            open_upvalues: std::mem::take(&mut self.open_upvalues),
            tbc_slots: std::mem::take(&mut self.tbc_slots),
        }
    }

    fn install_context(&mut self, ctx: ThreadContext) {
        self.stack = ctx.stack;
        self.top = ctx.top;
        self.frames = ctx.frames;
        self.open_upvalues = ctx.open_upvalues;
        self.tbc_slots = ctx.tbc_slots;
    }

    /// Resume a coroutine with `args`. Returns its yielded values or final
    /// results; invalid transitions and in-coroutine errors come back as
    /// errors for the caller to package.
    pub fn resume_coroutine(
        &mut self,
        co: Rc<RefCell<LuaThread>>,
        args: Vec<LuaValue>,
    ) -> LuaResult<Vec<LuaValue>> {
        {
            let co_ref = co.borrow();
            if !co_ref.is_resumable() {
                return Err(LuaError::coroutine(format!(
                    "cannot resume {} coroutine",
                    co_ref.status.name()
                )));
            }
        }
        if self.thread_stack.iter().any(|t| Rc::ptr_eq(t, &co)) {
            return Err(LuaError::coroutine("cannot resume running coroutine"));
        }

        // Park the caller's live context in its thread object, so open
        // upvalues into its stack stay reachable while it waits
        let caller = self.current_thread();
        let caller_ctx = self.take_context();
        {
            let mut caller_mut = caller.borrow_mut();
            caller_mut.context = caller_ctx;
            if caller_mut.status == CoroutineStatus::Running {
                caller_mut.status = CoroutineStatus::Normal;
            }
        }

        let first_resume = !co.borrow().started;
        if first_resume {
            let entry = {
                let mut co_mut = co.borrow_mut();
                co_mut.started = true;
                co_mut.status = CoroutineStatus::Running;
                co_mut.entry.take()
            };
            self.install_context(ThreadContext::new());
            let Some(entry) = entry else {
                self.restore_caller(&co, &caller, CoroutineStatus::Dead);
                return Err(LuaError::coroutine("coroutine has no body"));
            };
            // Seed the fresh context with the body call
            self.stack.push(LuaValue::Function(Rc::clone(&entry)));
            let nargs = args.len();
            self.stack.extend(args);
            self.top = 1 + nargs;
            let native_body = match entry.as_ref() {
                LuaFunction::Native(native) => Some(native.func),
                _ => None,
            };
            match native_body {
                Some(func) => {
                    // A native body runs to completion in one hop; a yield
                    // from inside it cannot be continued, so the boundary
                    // marker forbids it
                    let call_args = self.stack[1..1 + nargs].to_vec();
                    self.thread_stack.push(Rc::clone(&co));
                    self.resume_nesting.push(usize::MAX);
                    let result = func(self, call_args);
                    self.resume_nesting.pop();
                    self.thread_stack.pop();
                    return self.finish_resume(co, caller, result);
                }
                None => {
                    if let Err(e) = self.push_lua_frame(entry, 0, nargs, -1) {
                        self.restore_caller(&co, &caller, CoroutineStatus::Dead);
                        return Err(e);
                    }
                }
            }
        } else {
            let (ctx, resume_dst) = {
                let mut co_mut = co.borrow_mut();
                co_mut.status = CoroutineStatus::Running;
                (
                    std::mem::take(&mut co_mut.context),
                    co_mut.pending_resume_dst.take(),
                )
            };
            self.install_context(ctx);
            // Deliver the resume arguments to the call the yield interrupted
            if let Some((dst, nresults)) = resume_dst {
                self.write_call_results(dst, args, nresults);
            }
        }

        self.thread_stack.push(Rc::clone(&co));
        self.resume_nesting.push(self.native_nesting);
        let result = self.run_nested(0);
        self.resume_nesting.pop();
        self.thread_stack.pop();
        self.finish_resume(co, caller, result)
    }

    fn finish_resume(
        &mut self,
        co: Rc<RefCell<LuaThread>>,
        caller: Rc<RefCell<LuaThread>>,
        result: LuaResult<Vec<LuaValue>>,
    ) -> LuaResult<Vec<LuaValue>> {
        match result {
            Ok(results) => {
                self.restore_caller(&co, &caller, CoroutineStatus::Dead);
                Ok(results)
            }
            Err(e) if e.is_yield() => {
                let co_ctx = self.take_context();
                {
                    let mut co_mut = co.borrow_mut();
                    co_mut.context = co_ctx;
                    co_mut.status = CoroutineStatus::Suspended;
                    co_mut.pending_resume_dst = self.pending_yield_dst.take();
                }
                let caller_ctx = std::mem::take(&mut caller.borrow_mut().context);
                self.install_context(caller_ctx);
                caller.borrow_mut().status = CoroutineStatus::Running;
                Ok(self.yield_values.take().unwrap_or_default())
            }
            Err(e) => {
                // The dead coroutine's context is still installed: close its
                // open cells over their final values before discarding it
                let mut dead_ctx = self.take_context();
                close_context_upvalues(&mut dead_ctx);
                let payload = self.error_value.take();
                self.restore_caller(&co, &caller, CoroutineStatus::Dead);
                self.error_value = payload;
                Err(e)
            }
        }
    }

    fn restore_caller(
        &mut self,
        co: &Rc<RefCell<LuaThread>>,
        caller: &Rc<RefCell<LuaThread>>,
        co_status: CoroutineStatus,
    ) {
        {
            let mut co_mut = co.borrow_mut();
            co_mut.status = co_status;
            co_mut.context.clear();
            co_mut.pending_resume_dst = None;
        }
        let caller_ctx = std::mem::take(&mut caller.borrow_mut().context);
        self.install_context(caller_ctx);
        caller.borrow_mut().status = CoroutineStatus::Running;
    }

    /// Suspend the running coroutine, handing `values` to its resumer.
    pub fn yield_coroutine(&mut self, values: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        if self.thread_stack.len() <= 1 {
            return Err(LuaError::coroutine(
                "attempt to yield from outside a coroutine",
            ));
        }
        match self.resume_nesting.last() {
            Some(&entry_nesting) if entry_nesting == self.native_nesting => {}
            _ => {
                return Err(LuaError::coroutine(
                    "attempt to yield across a native call boundary",
                ));
            }
        }
        self.yield_values = Some(values);
        Err(LuaError::yield_signal())
    }

    pub fn current_coroutine(&self) -> Option<Rc<RefCell<LuaThread>>> {
        if self.thread_stack.len() > 1 {
            self.thread_stack.last().cloned()
        } else {
            None
        }
    }

    /// Copy call results into their destination window, honoring the
    /// expected-result count (-1 keeps all).
    pub(crate) fn write_call_results(
        &mut self,
        dst: usize,
        results: Vec<LuaValue>,
        nresults: i32,
    ) {
        let count = if nresults < 0 {
            results.len()
        } else {
            nresults as usize
        };
        let needed = dst + count;
        if self.stack.len() < needed {
            self.stack.resize(needed, LuaValue::Nil);
        }
        for i in 0..count {
            self.stack[dst + i] = results.get(i).cloned().unwrap_or(LuaValue::Nil);
        }
        self.top = dst + count;
    }
}

impl Default for LuaVM {
    fn default() -> Self {
        Self::new()
    }
}

/// Close every open cell of a context over its final stack values. Used when
/// a coroutine dies with its context still installed.
fn close_context_upvalues(ctx: &mut ThreadContext) {
    let cells = std::mem::take(&mut ctx.open_upvalues);
    for (slot, cell) in cells {
        let value = ctx.stack.get(slot).cloned().unwrap_or(LuaValue::Nil);
        cell.close(value);
    }
}
