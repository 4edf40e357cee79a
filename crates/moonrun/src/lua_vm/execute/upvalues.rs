// Upvalue and closure handlers, plus the vararg plumbing.

use std::rc::Rc;

use crate::lua_value::{LuaFunction, LuaValue};
use crate::lua_vm::lua_state::LuaVM;
use crate::lua_vm::opcode::Instruction;
use crate::lua_vm::{LuaError, LuaResult};

impl LuaVM {
    /// Current closure's upvalue cell.
    fn upvalue_cell(&self, index: u32) -> LuaResult<Rc<crate::lua_value::LuaUpvalue>> {
        let frame = self.frames.last().expect("no frame");
        frame
            .closure
            .upvalue(index as usize)
            .ok_or_else(|| LuaError::runtime(format!("upvalue {} out of range", index)))
    }

    /// Read an upvalue. An open cell aliases a stack slot of its OWNING
    /// thread: the live VM stack when that thread is running, the thread's
    /// parked context otherwise.
    pub(crate) fn read_upvalue(&self, index: u32) -> LuaResult<LuaValue> {
        let cell = self.upvalue_cell(index)?;
        let Some(slot) = cell.open_slot() else {
            return Ok(cell.closed_value().unwrap_or(LuaValue::Nil));
        };
        let owner = cell.open_thread().and_then(|w| w.upgrade());
        let value = match owner {
            Some(owner) if Rc::ptr_eq(&owner, &self.current_thread()) => {
                self.stack.get(slot).cloned().unwrap_or(LuaValue::Nil)
            }
            Some(owner) => owner
                .borrow()
                .context
                .stack
                .get(slot)
                .cloned()
                .unwrap_or(LuaValue::Nil),
            // Owning thread collected without closing: nothing left to read
            None => LuaValue::Nil,
        };
        Ok(value)
    }

    pub(crate) fn write_upvalue(&mut self, index: u32, value: LuaValue) -> LuaResult<()> {
        let cell = self.upvalue_cell(index)?;
        let Some(slot) = cell.open_slot() else {
            cell.set_closed_value(value);
            return Ok(());
        };
        let owner = cell.open_thread().and_then(|w| w.upgrade());
        match owner {
            Some(owner) if Rc::ptr_eq(&owner, &self.current_thread()) => {
                if self.stack.len() <= slot {
                    self.stack.resize(slot + 1, LuaValue::Nil);
                }
                self.stack[slot] = value;
            }
            Some(owner) => {
                let mut owner = owner.borrow_mut();
                if owner.context.stack.len() <= slot {
                    owner.context.stack.resize(slot + 1, LuaValue::Nil);
                }
                owner.context.stack[slot] = value;
            }
            None => cell.set_closed_value(value),
        }
        Ok(())
    }

    pub(super) fn op_getupval(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let b = Instruction::get_b(instr);
        let value = self.read_upvalue(b)?;
        self.set_reg(a, value);
        Ok(())
    }

    pub(super) fn op_setupval(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let b = Instruction::get_b(instr);
        let value = self.reg_clone(a);
        self.write_upvalue(b, value)
    }

    /// Build a closure from a child prototype. Stack captures share one open
    /// cell per slot; upvalue captures share the parent's cell.
    pub(super) fn op_closure(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let bx = Instruction::get_bx(instr);
        let base = self.frame_base();
        let proto = {
            let frame = self.frames.last().expect("no frame");
            Rc::clone(&frame.chunk.child_protos[bx as usize])
        };
        let mut upvalues = Vec::with_capacity(proto.upvalue_descs.len());
        for desc in &proto.upvalue_descs {
            let cell = if desc.in_stack {
                self.find_or_create_upvalue(base + desc.index as usize)
            } else {
                let frame = self.frames.last().expect("no frame");
                frame.closure.upvalue(desc.index as usize).ok_or_else(|| {
                    LuaError::runtime(format!("upvalue {} out of range", desc.index))
                })?
            };
            upvalues.push(cell);
        }
        self.maybe_collect_garbage();
        let closure = self.create_function(LuaFunction::closure(proto, upvalues));
        self.set_reg(a, closure);
        Ok(())
    }

    /// Park arguments beyond the declared parameters in the frame.
    pub(super) fn op_varargprep(&mut self, instr: u32) -> LuaResult<()> {
        let nparams = Instruction::get_a(instr) as usize;
        let (base, nargs) = {
            let frame = self.frames.last().expect("no frame");
            (frame.base, frame.nargs)
        };
        if nargs > nparams {
            let extras: Vec<LuaValue> = self.stack[base + nparams..base + nargs]
                .iter()
                .cloned()
                .collect();
            for slot in base + nparams..base + nargs {
                self.stack[slot] = LuaValue::Nil;
            }
            self.frames.last_mut().expect("no frame").varargs = extras;
        }
        Ok(())
    }

    /// Expand `...`: C-1 values (nil padded), or all of them when C is 0.
    pub(super) fn op_vararg(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let c = Instruction::get_c(instr);
        let (base, varargs) = {
            let frame = self.frames.last().expect("no frame");
            (frame.base, frame.varargs.clone())
        };
        let dst = base + a as usize;
        let wanted = if c > 0 {
            c as usize - 1
        } else {
            varargs.len()
        };
        let needed = dst + wanted;
        if self.stack.len() < needed {
            self.stack.resize(needed, LuaValue::Nil);
        }
        for i in 0..wanted {
            self.stack[dst + i] = varargs.get(i).cloned().unwrap_or(LuaValue::Nil);
        }
        if c == 0 {
            self.top = dst + wanted;
        }
        Ok(())
    }
}
