// Activation record for a Lua function call.

use std::rc::Rc;

use crate::lua_value::{Chunk, LuaFunction, LuaValue};

pub struct CallFrame {
    /// The closure being executed (always a Lua closure)
    pub closure: Rc<LuaFunction>,
    /// Cached prototype, avoids re-borrowing the closure per fetch
    pub chunk: Rc<Chunk>,
    /// Next instruction index
    pub pc: usize,
    /// Absolute stack index of this frame's register 0
    pub base: usize,
    /// Results the caller expects; -1 keeps everything
    pub nresults: i32,
    /// Arguments actually passed
    pub nargs: usize,
    /// Extra arguments parked by VARARGPREP
    pub varargs: Vec<LuaValue>,
    /// Absolute stack index the results are copied to
    pub ret_dst: usize,
}

impl CallFrame {
    pub fn new(
        closure: Rc<LuaFunction>,
        chunk: Rc<Chunk>,
        base: usize,
        nresults: i32,
        nargs: usize,
        ret_dst: usize,
    ) -> Self {
        CallFrame {
            closure,
            chunk,
            pc: 0,
            base,
            nresults,
            nargs,
            varargs: Vec::new(),
            ret_dst,
        }
    }

    /// One line of a traceback for this frame.
    pub fn describe(&self) -> String {
        let line = self.chunk.line_at(self.pc.saturating_sub(1));
        if self.chunk.line_defined == 0 {
            format!("{}:{}: in main chunk", self.chunk.source_name, line)
        } else {
            format!(
                "{}:{}: in function <{}:{}>",
                self.chunk.source_name, line, self.chunk.source_name, self.chunk.line_defined
            )
        }
    }
}
