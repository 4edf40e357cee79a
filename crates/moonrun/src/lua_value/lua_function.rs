// Function prototypes, closures and upvalue cells.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use smol_str::SmolStr;

use super::lua_thread::LuaThread;
use super::lua_value::LuaValue;
use crate::lua_vm::{LuaResult, LuaVM};

/// Native callable contract: an argument vector in, a result vector out.
pub type NativeFn = fn(&mut LuaVM, Vec<LuaValue>) -> LuaResult<Vec<LuaValue>>;

/// A native function together with its registration name (for error messages
/// and tracebacks).
#[derive(Clone, Copy)]
pub struct NativeFunction {
    pub name: &'static str,
    pub func: NativeFn,
}

/// Where a closure captures an upvalue from: the parent's register window
/// (`in_stack`) or the parent's own upvalue list.
#[derive(Debug, Clone)]
pub struct UpvalueDesc {
    pub in_stack: bool,
    pub index: u8,
    pub name: SmolStr,
}

/// Compiled function prototype: bytecode plus everything the VM needs to
/// instantiate and run it.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub code: Vec<u32>,
    pub constants: Vec<LuaValue>,
    pub child_protos: Vec<Rc<Chunk>>,
    pub upvalue_descs: Vec<UpvalueDesc>,
    pub param_count: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,
    pub source_name: SmolStr,
    /// Line of the `function` keyword; 0 for a main chunk
    pub line_defined: u32,
    /// One source line per instruction
    pub line_info: Vec<u32>,
}

impl Chunk {
    pub fn new() -> Self {
        Chunk {
            code: Vec::new(),
            constants: Vec::new(),
            child_protos: Vec::new(),
            upvalue_descs: Vec::new(),
            param_count: 0,
            is_vararg: false,
            max_stack_size: 2,
            source_name: SmolStr::new_static("?"),
            line_defined: 0,
            line_info: Vec::new(),
        }
    }

    /// Source line for an instruction index, when line info is present.
    pub fn line_at(&self, pc: usize) -> u32 {
        self.line_info.get(pc).copied().unwrap_or(0)
    }
}

impl Default for Chunk {
    fn default() -> Self {
        Self::new()
    }
}

/// Upvalue cell. Open while the enclosing frame is live - it aliases an
/// absolute stack slot of its OWNING thread, which matters because each
/// coroutine has its own stack. Closed once the scope exits. Transitions
/// open -> closed exactly once and never back.
pub struct LuaUpvalue {
    state: RefCell<UpvalueState>,
}

enum UpvalueState {
    Open {
        thread: Weak<RefCell<LuaThread>>,
        slot: usize,
    },
    Closed(LuaValue),
}

impl LuaUpvalue {
    pub fn new_open(thread: &Rc<RefCell<LuaThread>>, slot: usize) -> Rc<Self> {
        Rc::new(LuaUpvalue {
            state: RefCell::new(UpvalueState::Open {
                thread: Rc::downgrade(thread),
                slot,
            }),
        })
    }

    pub fn new_closed(value: LuaValue) -> Rc<Self> {
        Rc::new(LuaUpvalue {
            state: RefCell::new(UpvalueState::Closed(value)),
        })
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.borrow(), UpvalueState::Open { .. })
    }

    /// The aliased absolute stack slot, while open.
    pub fn open_slot(&self) -> Option<usize> {
        match *self.state.borrow() {
            UpvalueState::Open { slot, .. } => Some(slot),
            UpvalueState::Closed(_) => None,
        }
    }

    /// The thread whose stack the open cell aliases.
    pub fn open_thread(&self) -> Option<Weak<RefCell<LuaThread>>> {
        match &*self.state.borrow() {
            UpvalueState::Open { thread, .. } => Some(thread.clone()),
            UpvalueState::Closed(_) => None,
        }
    }

    /// Migrate the stack value into the cell.
    pub fn close(&self, value: LuaValue) {
        let mut state = self.state.borrow_mut();
        if matches!(*state, UpvalueState::Open { .. }) {
            *state = UpvalueState::Closed(value);
        }
    }

    pub fn closed_value(&self) -> Option<LuaValue> {
        match &*self.state.borrow() {
            UpvalueState::Closed(v) => Some(v.clone()),
            UpvalueState::Open { .. } => None,
        }
    }

    pub fn set_closed_value(&self, value: LuaValue) {
        *self.state.borrow_mut() = UpvalueState::Closed(value);
    }
}

impl std::fmt::Debug for LuaUpvalue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &*self.state.borrow() {
            UpvalueState::Open { slot, .. } => write!(f, "upvalue(open @{})", slot),
            UpvalueState::Closed(v) => write!(f, "upvalue(closed {:?})", v),
        }
    }
}

/// The three callable shapes: a native function, a Lua closure (prototype +
/// captured cells), or a bare prototype that has not captured anything yet.
pub enum LuaFunction {
    Native(NativeFunction),
    Closure {
        proto: Rc<Chunk>,
        upvalues: RefCell<Vec<Rc<LuaUpvalue>>>,
    },
    Proto(Rc<Chunk>),
}

impl LuaFunction {
    pub fn native(name: &'static str, func: NativeFn) -> Self {
        LuaFunction::Native(NativeFunction { name, func })
    }

    pub fn closure(proto: Rc<Chunk>, upvalues: Vec<Rc<LuaUpvalue>>) -> Self {
        LuaFunction::Closure {
            proto,
            upvalues: RefCell::new(upvalues),
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, LuaFunction::Native(_))
    }

    pub fn proto(&self) -> Option<Rc<Chunk>> {
        match self {
            LuaFunction::Closure { proto, .. } => Some(Rc::clone(proto)),
            LuaFunction::Proto(proto) => Some(Rc::clone(proto)),
            LuaFunction::Native(_) => None,
        }
    }

    pub fn upvalue(&self, index: usize) -> Option<Rc<LuaUpvalue>> {
        match self {
            LuaFunction::Closure { upvalues, .. } => upvalues.borrow().get(index).cloned(),
            _ => None,
        }
    }
}

impl std::fmt::Debug for LuaFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LuaFunction::Native(n) => write!(f, "native<{}>", n.name),
            LuaFunction::Closure { proto, .. } => {
                write!(f, "closure<{}:{}>", proto.source_name, proto.line_defined)
            }
            LuaFunction::Proto(proto) => write!(f, "proto<{}>", proto.source_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upvalue_lifecycle() {
        let owner = Rc::new(RefCell::new(LuaThread::main()));
        let uv = LuaUpvalue::new_open(&owner, 5);
        assert!(uv.is_open());
        assert_eq!(uv.open_slot(), Some(5));
        uv.close(LuaValue::integer(99));
        assert!(!uv.is_open());
        assert_eq!(uv.closed_value(), Some(LuaValue::integer(99)));
        // Closing twice is a no-op
        uv.close(LuaValue::integer(1));
        assert_eq!(uv.closed_value(), Some(LuaValue::integer(99)));
    }

    #[test]
    fn test_shared_cell_visibility() {
        let cell = LuaUpvalue::new_closed(LuaValue::integer(1));
        let other = Rc::clone(&cell);
        cell.set_closed_value(LuaValue::integer(2));
        assert_eq!(other.closed_value(), Some(LuaValue::integer(2)));
    }
}
