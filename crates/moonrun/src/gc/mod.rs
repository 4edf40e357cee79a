// Hybrid garbage collector.
//
// Reference counts (Rc) reclaim the acyclic common case the moment the last
// handle drops. The collector's own job is cycles: it keeps a weak handle to
// every VM-allocated object, traces reachability from the roots, and breaks
// unreachable-but-alive clusters by draining their contents so the counts
// unwind. Objects with a __gc metamethod are handed back for finalization
// first and reclaimed on a later cycle.
//
// The collector is per-VM and therefore per-thread; a `collecting` flag
// guards its bookkeeping against reentry from finalizers.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use crate::lua_value::{LuaFunction, LuaTable, LuaThread, LuaUserdata, LuaValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcMode {
    /// Reference counting only; cycles are never reclaimed
    RefCountOnly,
    /// Refcounts plus a threshold-triggered cycle pass
    Hybrid,
    /// Trace-only: every collect() runs the full pass
    MarkSweep,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GcStats {
    /// Objects currently registered and alive
    pub live: usize,
    /// Objects reclaimed by cycle collection
    pub collected_cycles: usize,
    /// Cycle passes run
    pub cycles_run: usize,
}

enum WeakObj {
    Table(Weak<RefCell<LuaTable>>),
    Function(Weak<LuaFunction>),
    Userdata(Weak<LuaUserdata>),
    Thread(Weak<RefCell<LuaThread>>),
}

impl WeakObj {
    fn upgrade(&self) -> Option<LuaValue> {
        match self {
            WeakObj::Table(w) => w.upgrade().map(LuaValue::Table),
            WeakObj::Function(w) => w.upgrade().map(LuaValue::Function),
            WeakObj::Userdata(w) => w.upgrade().map(LuaValue::Userdata),
            WeakObj::Thread(w) => w.upgrade().map(LuaValue::Thread),
        }
    }

    fn is_dead(&self) -> bool {
        match self {
            WeakObj::Table(w) => w.strong_count() == 0,
            WeakObj::Function(w) => w.strong_count() == 0,
            WeakObj::Userdata(w) => w.strong_count() == 0,
            WeakObj::Thread(w) => w.strong_count() == 0,
        }
    }
}

/// What a cycle pass hands back to the VM.
pub struct CollectOutcome {
    /// (object, __gc handler) pairs to finalize, in registration order
    pub finalizers: Vec<(LuaValue, LuaValue)>,
    /// Objects whose cycles were broken this pass
    pub freed: usize,
}

pub struct GC {
    mode: GcMode,
    registry: Vec<WeakObj>,
    threshold: usize,
    collecting: bool,
    /// Objects already finalized, never finalized twice
    finalized: HashSet<usize>,
    /// Values pinned by RootGuard while a native holds them outside any
    /// other root
    temp_roots: Rc<RefCell<Vec<LuaValue>>>,
    stats: GcStats,
}

/// RAII pin: the guarded values count as roots until the guard drops, so
/// add and remove always pair up.
pub struct RootGuard {
    roots: Rc<RefCell<Vec<LuaValue>>>,
    floor: usize,
}

impl Drop for RootGuard {
    fn drop(&mut self) {
        self.roots.borrow_mut().truncate(self.floor);
    }
}

impl GC {
    pub fn new(mode: GcMode, threshold: usize) -> Self {
        GC {
            mode,
            registry: Vec::new(),
            threshold: threshold.max(16),
            collecting: false,
            finalized: HashSet::new(),
            temp_roots: Rc::new(RefCell::new(Vec::new())),
            stats: GcStats::default(),
        }
    }

    /// Pin values as roots for the guard's lifetime.
    pub fn guard_roots(&self, values: impl IntoIterator<Item = LuaValue>) -> RootGuard {
        let mut roots = self.temp_roots.borrow_mut();
        let floor = roots.len();
        roots.extend(values);
        RootGuard {
            roots: Rc::clone(&self.temp_roots),
            floor,
        }
    }

    /// Currently pinned temporaries.
    pub fn temp_roots(&self) -> Vec<LuaValue> {
        self.temp_roots.borrow().clone()
    }

    pub fn mode(&self) -> GcMode {
        self.mode
    }

    pub fn stats(&self) -> GcStats {
        let mut stats = self.stats;
        stats.live = self.registry.iter().filter(|w| !w.is_dead()).count();
        stats
    }

    /// Track a freshly allocated collectable object.
    pub fn register(&mut self, value: &LuaValue) {
        let weak = match value {
            LuaValue::Table(t) => WeakObj::Table(Rc::downgrade(t)),
            LuaValue::Function(f) => WeakObj::Function(Rc::downgrade(f)),
            LuaValue::Userdata(u) => WeakObj::Userdata(Rc::downgrade(u)),
            LuaValue::Thread(t) => WeakObj::Thread(Rc::downgrade(t)),
            _ => return,
        };
        self.registry.push(weak);
    }

    pub fn should_collect(&self) -> bool {
        !self.collecting
            && self.mode != GcMode::RefCountOnly
            && self.registry.len() > self.threshold
    }

    /// Trace from the roots and break unreachable cycles. Returns finalizers
    /// for the VM to run; those objects stay alive until a later pass.
    pub fn collect_cycles(&mut self, roots: &[LuaValue]) -> CollectOutcome {
        if self.collecting || self.mode == GcMode::RefCountOnly {
            self.prune_dead();
            return CollectOutcome {
                finalizers: Vec::new(),
                freed: 0,
            };
        }
        self.collecting = true;
        self.stats.cycles_run += 1;

        // Mark phase
        let mut marked: HashSet<usize> = HashSet::new();
        let mut worklist: Vec<LuaValue> = roots.to_vec();
        while let Some(value) = worklist.pop() {
            let Some(id) = value.object_id() else { continue };
            if !marked.insert(id) {
                continue;
            }
            traverse(&value, &mut worklist);
        }

        // Sweep phase: surviving-but-unmarked objects are cyclic garbage
        let mut finalizers = Vec::new();
        let mut freed = 0;
        for weak in &self.registry {
            let Some(value) = weak.upgrade() else { continue };
            let id = value.object_id().expect("collectable without identity");
            if marked.contains(&id) {
                continue;
            }
            if let Some(gc_handler) = gc_metamethod(&value) {
                if self.finalized.insert(id) {
                    // Finalize now, reclaim on a later pass
                    finalizers.push((value, gc_handler));
                    continue;
                }
            }
            clear_object(&value);
            freed += 1;
        }

        self.prune_dead();
        self.stats.collected_cycles += freed;
        // Back off the next trigger to twice the surviving population
        self.threshold = (self.registry.len() * 2).max(16);
        self.collecting = false;
        CollectOutcome { finalizers, freed }
    }

    fn prune_dead(&mut self) {
        self.registry.retain(|w| !w.is_dead());
    }
}

/// Report a collectable object's outgoing references.
fn traverse(value: &LuaValue, out: &mut Vec<LuaValue>) {
    match value {
        LuaValue::Table(t) => {
            let t = t.borrow();
            if let Some(mt) = t.get_metatable() {
                out.push(LuaValue::Table(mt));
            }
            for (k, v) in t.iter_all() {
                out.push(k);
                out.push(v);
            }
        }
        LuaValue::Function(f) => match f.as_ref() {
            LuaFunction::Closure { proto, upvalues } => {
                for constant in &proto.constants {
                    out.push(constant.clone());
                }
                for cell in upvalues.borrow().iter() {
                    if let Some(v) = cell.closed_value() {
                        out.push(v);
                    }
                }
            }
            LuaFunction::Proto(proto) => {
                for constant in &proto.constants {
                    out.push(constant.clone());
                }
            }
            LuaFunction::Native(_) => {}
        },
        LuaValue::Userdata(u) => {
            if let Some(mt) = u.get_metatable() {
                out.push(LuaValue::Table(mt));
            }
            out.extend(u.user_values_snapshot());
        }
        LuaValue::Thread(t) => {
            let t = t.borrow();
            if let Some(entry) = &t.entry {
                out.push(LuaValue::Function(Rc::clone(entry)));
            }
            if let Some(e) = &t.pending_error {
                out.push(e.clone());
            }
            out.extend(t.context.stack.iter().cloned());
            for frame in &t.context.frames {
                out.push(LuaValue::Function(Rc::clone(&frame.closure)));
                out.extend(frame.varargs.iter().cloned());
            }
            for cell in t.context.open_upvalues.values() {
                if let Some(v) = cell.closed_value() {
                    out.push(v);
                }
            }
        }
        _ => {}
    }
}

fn gc_metamethod(value: &LuaValue) -> Option<LuaValue> {
    let mt = match value {
        LuaValue::Table(t) => t.borrow().get_metatable(),
        LuaValue::Userdata(u) => u.get_metatable(),
        _ => None,
    }?;
    let handler = mt.borrow().get_str("__gc");
    if handler.is_nil() { None } else { Some(handler) }
}

/// Break a cyclic object by draining everything it references.
fn clear_object(value: &LuaValue) {
    match value {
        LuaValue::Table(t) => t.borrow_mut().clear_all(),
        LuaValue::Function(f) => {
            if let LuaFunction::Closure { upvalues, .. } = f.as_ref() {
                upvalues.borrow_mut().clear();
            }
        }
        LuaValue::Userdata(u) => u.clear_all(),
        LuaValue::Thread(t) => t.borrow_mut().clear_all(),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_refcount_reclaims_acyclic() {
        let mut gc = GC::new(GcMode::Hybrid, 16);
        {
            let t = LuaValue::Table(Rc::new(RefCell::new(LuaTable::new())));
            gc.register(&t);
            assert_eq!(gc.stats().live, 1);
        }
        // Dropped by refcount alone
        assert_eq!(gc.stats().live, 0);
    }

    #[test]
    fn test_cycle_pass_breaks_cycles() {
        let mut gc = GC::new(GcMode::Hybrid, 16);
        let held;
        {
            let a = Rc::new(RefCell::new(LuaTable::new()));
            let b = Rc::new(RefCell::new(LuaTable::new()));
            a.borrow_mut()
                .raw_set(LuaValue::integer(1), LuaValue::Table(Rc::clone(&b)));
            b.borrow_mut()
                .raw_set(LuaValue::integer(1), LuaValue::Table(Rc::clone(&a)));
            gc.register(&LuaValue::Table(Rc::clone(&a)));
            gc.register(&LuaValue::Table(Rc::clone(&b)));
            held = Rc::downgrade(&a);
        }
        // The cycle keeps both alive without the collector
        assert!(held.upgrade().is_some());
        let outcome = gc.collect_cycles(&[]);
        assert_eq!(outcome.freed, 2);
        assert!(held.upgrade().is_none());
        assert_eq!(gc.stats().live, 0);
    }

    #[test]
    fn test_rooted_objects_survive() {
        let mut gc = GC::new(GcMode::Hybrid, 16);
        let a = Rc::new(RefCell::new(LuaTable::new()));
        let b = Rc::new(RefCell::new(LuaTable::new()));
        a.borrow_mut()
            .raw_set(LuaValue::integer(1), LuaValue::Table(Rc::clone(&b)));
        b.borrow_mut()
            .raw_set(LuaValue::integer(1), LuaValue::Table(Rc::clone(&a)));
        let root = LuaValue::Table(Rc::clone(&a));
        gc.register(&root);
        gc.register(&LuaValue::Table(Rc::clone(&b)));
        let outcome = gc.collect_cycles(std::slice::from_ref(&root));
        assert_eq!(outcome.freed, 0);
        assert_eq!(gc.stats().live, 2);
        assert_eq!(a.borrow().len(), 1);
    }

    #[test]
    fn test_root_guard_pins_and_unpins() {
        let mut gc = GC::new(GcMode::Hybrid, 16);
        let t = Rc::new(RefCell::new(LuaTable::new()));
        t.borrow_mut()
            .raw_set(LuaValue::integer(1), LuaValue::Table(Rc::clone(&t)));
        let value = LuaValue::Table(Rc::clone(&t));
        gc.register(&value);
        {
            let _guard = gc.guard_roots([value.clone()]);
            let temp = gc.temp_roots();
            let outcome = gc.collect_cycles(&temp);
            assert_eq!(outcome.freed, 0);
        }
        // Guard dropped: the cycle is fair game now
        assert!(gc.temp_roots().is_empty());
        drop(value);
        drop(t);
        let outcome = gc.collect_cycles(&[]);
        assert_eq!(outcome.freed, 1);
    }

    #[test]
    fn test_refcount_only_never_traces() {
        let mut gc = GC::new(GcMode::RefCountOnly, 16);
        let a = Rc::new(RefCell::new(LuaTable::new()));
        a.borrow_mut()
            .raw_set(LuaValue::integer(1), LuaValue::Table(Rc::clone(&a)));
        gc.register(&LuaValue::Table(Rc::clone(&a)));
        let outcome = gc.collect_cycles(&[]);
        assert_eq!(outcome.freed, 0);
        assert_eq!(gc.stats().live, 1);
    }
}
