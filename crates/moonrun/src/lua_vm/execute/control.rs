// Call, return and jump handlers.

use std::rc::Rc;

use crate::lua_value::{LuaFunction, LuaUpvalue, LuaValue};
use crate::lua_vm::lua_state::LuaVM;
use crate::lua_vm::metamethod::MetaMethod;
use crate::lua_vm::opcode::Instruction;
use crate::lua_vm::{LuaError, LuaResult};

impl LuaVM {
    pub(super) fn op_jmp(&mut self, instr: u32) -> LuaResult<()> {
        let sj = Instruction::get_sj(instr);
        let frame = self.frames.last_mut().expect("no frame");
        frame.pc = (frame.pc as i64 + sj as i64) as usize;
        Ok(())
    }

    pub(super) fn op_call(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let b = Instruction::get_b(instr);
        let c = Instruction::get_c(instr);
        let base = self.frame_base();
        let func_idx = base + a as usize;
        let nargs = if b > 0 {
            b as usize - 1
        } else {
            self.top - (func_idx + 1)
        };
        let nresults = c as i32 - 1;
        self.call_at(func_idx, nargs, nresults)
    }

    /// Call the value at `func_idx` with `nargs` arguments laid out after
    /// it. Lua closures get a frame pushed; natives run inline and have
    /// their results written back.
    pub(crate) fn call_at(
        &mut self,
        func_idx: usize,
        nargs: usize,
        nresults: i32,
    ) -> LuaResult<()> {
        let callee = self.stack[func_idx].clone();
        match &callee {
            LuaValue::Function(f) => match f.as_ref() {
                LuaFunction::Native(native) => {
                    let args = self.stack[func_idx + 1..func_idx + 1 + nargs].to_vec();
                    match (native.func)(self, args) {
                        Ok(results) => {
                            self.write_call_results(func_idx, results, nresults);
                            Ok(())
                        }
                        Err(e) if e.is_yield() => {
                            // Remember where the resume values belong
                            self.pending_yield_dst = Some((func_idx, nresults));
                            Err(e)
                        }
                        Err(e) => Err(e),
                    }
                }
                LuaFunction::Closure { .. } => {
                    self.push_lua_frame(Rc::clone(f), func_idx, nargs, nresults)
                }
                LuaFunction::Proto(proto) => {
                    // Instantiate on the fly with the default environment
                    let env = LuaUpvalue::new_closed(LuaValue::Table(self.globals()));
                    let closure = LuaFunction::closure(Rc::clone(proto), vec![env]);
                    let wrapped = self.create_function(closure);
                    self.stack[func_idx] = wrapped;
                    self.call_at(func_idx, nargs, nresults)
                }
            },
            _ => {
                let handler = self
                    .get_metamethod(&callee, MetaMethod::Call)
                    .ok_or_else(|| {
                        LuaError::type_error(format!(
                            "attempt to call a {} value",
                            callee.type_name()
                        ))
                    })?;
                // The original callee becomes the handler's first argument
                self.stack.insert(func_idx, handler);
                self.top = func_idx + 1 + nargs + 1;
                self.call_at(func_idx, nargs + 1, nresults)
            }
        }
    }

    /// TAILCALL reuses the caller's frame window. A native tail target
    /// completes the frame immediately; the returned results flow to the
    /// dispatch loop like a RETURN.
    pub(super) fn op_tailcall(&mut self, instr: u32) -> LuaResult<Option<Vec<LuaValue>>> {
        let a = Instruction::get_a(instr);
        let b = Instruction::get_b(instr);
        let base = self.frame_base();
        let func_idx = base + a as usize;
        let nargs = if b > 0 {
            b as usize - 1
        } else {
            self.top - (func_idx + 1)
        };
        // The current frame's window dies here
        self.close_upvalues_from(base);
        self.close_tbc_from(base)?;

        let mut callee = self.stack[func_idx].clone();
        let args_start = func_idx + 1;
        let mut nargs = nargs;
        // Resolve __call chains up front
        for _ in 0..8 {
            if callee.is_function() {
                break;
            }
            let handler = self
                .get_metamethod(&callee, MetaMethod::Call)
                .ok_or_else(|| {
                    LuaError::type_error(format!(
                        "attempt to call a {} value",
                        callee.type_name()
                    ))
                })?;
            self.stack.insert(args_start - 1, handler);
            nargs += 1;
            callee = self.stack[args_start - 1].clone();
        }
        let LuaValue::Function(f) = callee.clone() else {
            return Err(LuaError::type_error("attempt to call a non-function value"));
        };

        let frame = self.frames.last().expect("no frame");
        let ret_dst = frame.ret_dst;
        let nresults = frame.nresults;

        match f.as_ref() {
            LuaFunction::Native(native) => {
                let args = self.stack[args_start..args_start + nargs].to_vec();
                self.frames.pop();
                match (native.func)(self, args) {
                    Ok(results) => {
                        self.write_call_results(ret_dst, results.clone(), nresults);
                        Ok(Some(results))
                    }
                    Err(e) if e.is_yield() => {
                        self.pending_yield_dst = Some((ret_dst, nresults));
                        Err(e)
                    }
                    Err(e) => Err(e),
                }
            }
            LuaFunction::Closure { .. } => {
                // Slide callee and arguments down into the dead window
                self.stack[ret_dst] = LuaValue::Function(Rc::clone(&f));
                for i in 0..nargs {
                    let value = self.stack[args_start + i].clone();
                    self.stack[ret_dst + 1 + i] = value;
                }
                self.frames.pop();
                self.top = ret_dst + 1 + nargs;
                self.push_lua_frame(f, ret_dst, nargs, nresults)?;
                Ok(None)
            }
            LuaFunction::Proto(proto) => {
                let env = LuaUpvalue::new_closed(LuaValue::Table(self.globals()));
                let closure = LuaFunction::closure(Rc::clone(proto), vec![env]);
                let wrapped = self.create_function(closure);
                self.stack[func_idx] = wrapped;
                self.op_tailcall(instr)
            }
        }
    }

    /// Shared body of the RETURN family: close the frame window, pop, and
    /// deliver results to the caller's window.
    pub(crate) fn op_return_values(
        &mut self,
        a: u32,
        b: u32,
        _k: bool,
    ) -> LuaResult<Vec<LuaValue>> {
        let (base, first) = {
            let frame = self.frames.last().expect("no frame");
            (frame.base, frame.base + a as usize)
        };
        let nret = if b > 0 {
            b as usize - 1
        } else {
            self.top.saturating_sub(first)
        };
        let results: Vec<LuaValue> = self.stack[first..first + nret].to_vec();
        // Frame exit closes anything still open in its window
        self.close_upvalues_from(base);
        self.close_tbc_from(base)?;
        let frame = self.frames.pop().expect("no frame");
        self.write_call_results(frame.ret_dst, results.clone(), frame.nresults);
        Ok(results)
    }

    pub(super) fn op_close(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let from = self.frame_base() + a as usize;
        self.close_upvalues_from(from);
        self.close_tbc_from(from)
    }

    /// Mark R[A] to-be-closed; its value must be closable (or nil/false).
    pub(super) fn op_tbc(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let slot = self.frame_base() + a as usize;
        let value = self.stack[slot].clone();
        if value.is_nil() || value == LuaValue::Boolean(false) {
            return Ok(());
        }
        if self.get_metamethod(&value, MetaMethod::Close).is_none() {
            return Err(LuaError::type_error(format!(
                "variable of type {} has no '__close' metamethod",
                value.type_name()
            )));
        }
        self.tbc_slots.push(slot);
        Ok(())
    }
}
