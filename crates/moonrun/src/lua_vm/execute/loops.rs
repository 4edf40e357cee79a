// Numeric and generic for-loop handlers.
//
// Numeric for keeps its three control values in R[A..A+2] and mirrors the
// counter into the user-visible R[A+3]. The direction comes from the step's
// sign at FORPREP; a zero step is an error. Integer counters that would
// overflow terminate the loop instead of wrapping.

use crate::lua_value::LuaValue;
use crate::lua_vm::lua_state::LuaVM;
use crate::lua_vm::metamethod::MetaMethod;
use crate::lua_vm::number_ops::{Number, num_le};
use crate::lua_vm::opcode::Instruction;
use crate::lua_vm::{LuaError, LuaResult};

fn for_number(value: &LuaValue, what: &str) -> LuaResult<Number> {
    Number::of(value).ok_or_else(|| {
        LuaError::runtime(format!("'for' {} must be a number", what))
    })
}

impl LuaVM {
    pub(super) fn op_forprep(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let bx = Instruction::get_bx(instr);
        let base = self.frame_base();
        let slot = base + a as usize;

        let init = for_number(&self.stack[slot], "initial value")?;
        let limit = for_number(&self.stack[slot + 1], "limit")?;
        let step = for_number(&self.stack[slot + 2], "step")?;

        let zero_step = match step {
            Number::Int(0) => true,
            Number::Float(f) => f == 0.0,
            _ => false,
        };
        if zero_step {
            return Err(LuaError::runtime("'for' step is zero"));
        }

        // An all-integer loop stays integer; any float makes it a float loop
        let (init, limit, step) = match (init, limit, step) {
            (Number::Int(i), Number::Int(l), Number::Int(s)) => {
                (Number::Int(i), Number::Int(l), Number::Int(s))
            }
            (i, l, s) => (
                Number::Float(i.as_float()),
                Number::Float(l.as_float()),
                Number::Float(s.as_float()),
            ),
        };

        let ascending = match step {
            Number::Int(s) => s > 0,
            Number::Float(s) => s > 0.0,
        };
        let runs = if ascending {
            num_le(init, limit)
        } else {
            num_le(limit, init)
        };

        self.stack[slot] = init.to_value();
        self.stack[slot + 1] = limit.to_value();
        self.stack[slot + 2] = step.to_value();
        self.stack[slot + 3] = init.to_value();

        if !runs {
            let frame = self.frames.last_mut().expect("no frame");
            frame.pc += bx as usize + 1;
        }
        Ok(())
    }

    pub(super) fn op_forloop(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let bx = Instruction::get_bx(instr);
        let base = self.frame_base();
        let slot = base + a as usize;

        // Each finished iteration closes cells over the loop variable, so
        // closures capture per-iteration values
        self.close_upvalues_from(slot + 3);

        let counter = Number::of(&self.stack[slot]).expect("corrupt for counter");
        let limit = Number::of(&self.stack[slot + 1]).expect("corrupt for limit");
        let step = Number::of(&self.stack[slot + 2]).expect("corrupt for step");

        let next = match (counter, step) {
            (Number::Int(c), Number::Int(s)) => c.checked_add(s).map(Number::Int),
            (c, s) => Some(Number::Float(c.as_float() + s.as_float())),
        };
        let Some(next) = next else {
            // Integer counter overflow: the loop is over
            return Ok(());
        };

        let ascending = match step {
            Number::Int(s) => s > 0,
            Number::Float(s) => s > 0.0,
        };
        let continues = if ascending {
            num_le(next, limit)
        } else {
            num_le(limit, next)
        };
        if continues {
            self.stack[slot] = next.to_value();
            self.stack[slot + 3] = next.to_value();
            let frame = self.frames.last_mut().expect("no frame");
            frame.pc -= bx as usize;
        }
        Ok(())
    }

    /// Jump to the TFORCALL at the loop's end, marking the closing slot
    /// to-be-closed when the iterator supplied one.
    pub(super) fn op_tforprep(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let bx = Instruction::get_bx(instr);
        let base = self.frame_base();
        let closing_slot = base + a as usize + 3;
        let closing = self.stack[closing_slot].clone();
        if !closing.is_nil() && closing != LuaValue::Boolean(false) {
            if self.get_metamethod(&closing, MetaMethod::Close).is_none() {
                return Err(LuaError::type_error(format!(
                    "variable of type {} has no '__close' metamethod",
                    closing.type_name()
                )));
            }
            self.tbc_slots.push(closing_slot);
        }
        let frame = self.frames.last_mut().expect("no frame");
        frame.pc += bx as usize;
        Ok(())
    }

    /// Call the iterator: results land at R[A+4..]; the call window reuses
    /// the scratch registers above the loop state.
    pub(super) fn op_tforcall(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let nvars = Instruction::get_c(instr) as i32;
        let base = self.frame_base();
        let slot = base + a as usize;

        let func_idx = slot + 4;
        let needed = func_idx + 3;
        if self.stack.len() < needed {
            self.stack.resize(needed, LuaValue::Nil);
        }
        self.stack[func_idx] = self.stack[slot].clone();
        self.stack[func_idx + 1] = self.stack[slot + 1].clone();
        self.stack[func_idx + 2] = self.stack[slot + 2].clone();
        self.top = func_idx + 3;
        self.call_at(func_idx, 2, nvars)
    }

    /// Continue while the iterator's first result is non-nil.
    pub(super) fn op_tforloop(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let bx = Instruction::get_bx(instr);
        let base = self.frame_base();
        let slot = base + a as usize;

        // Per-iteration close over the user variables
        self.close_upvalues_from(slot + 2);

        let control = self.stack[slot + 2].clone();
        if !control.is_nil() {
            self.stack[slot] = control;
            let frame = self.frames.last_mut().expect("no frame");
            frame.pc -= bx as usize;
        }
        Ok(())
    }
}
