// Instruction dispatch: fetch, decode, jump to the handler for the opcode.
// Handlers live in the sibling modules, grouped by instruction family.

mod arith;
mod compare;
mod concat;
mod control;
mod load;
mod loops;
mod metamethod;
mod table_ops;
mod upvalues;

pub mod coercion;

use crate::lua_value::LuaValue;
use crate::lua_vm::lua_error::{LuaError, LuaResult, SourceLocation};
use crate::lua_vm::lua_state::LuaVM;
use crate::lua_vm::number_ops::ArithOp;
use crate::lua_vm::opcode::{Instruction, OpCode};

impl LuaVM {
    /// Run until the frame that was on top at `entry_depth` returns; yields
    /// propagate as the internal signal. On error the frames are left in
    /// place for the caller to unwind (it knows the stack floor).
    pub(crate) fn run_nested(&mut self, entry_depth: usize) -> LuaResult<Vec<LuaValue>> {
        loop {
            if self.frames.len() <= entry_depth {
                return Ok(Vec::new());
            }
            let pc_past_end = {
                let frame = self.frames.last().expect("no frame");
                frame.pc >= frame.chunk.code.len()
            };
            if pc_past_end {
                // Codegen always terminates with a return; treat running off
                // the end as an empty return anyway
                let results = self.op_return_values(0, 1, false)?;
                if self.frames.len() <= entry_depth {
                    return Ok(results);
                }
                continue;
            }
            let instr = {
                let frame = self.frames.last_mut().expect("no frame");
                let instr = frame.chunk.code[frame.pc];
                frame.pc += 1;
                instr
            };

            let op = Instruction::get_opcode(instr);
            let step: LuaResult<()> = match op {
                OpCode::Move => self.op_move(instr),
                OpCode::LoadI => self.op_loadi(instr),
                OpCode::LoadF => self.op_loadf(instr),
                OpCode::LoadK => self.op_loadk(instr),
                OpCode::LoadKX => self.op_loadkx(instr),
                OpCode::LoadFalse => self.op_loadfalse(instr),
                OpCode::LFalseSkip => self.op_lfalseskip(instr),
                OpCode::LoadTrue => self.op_loadtrue(instr),
                OpCode::LoadNil => self.op_loadnil(instr),
                OpCode::GetUpval => self.op_getupval(instr),
                OpCode::SetUpval => self.op_setupval(instr),
                OpCode::GetTabUp => self.op_gettabup(instr),
                OpCode::GetTable => self.op_gettable(instr),
                OpCode::GetI => self.op_geti(instr),
                OpCode::GetField => self.op_getfield(instr),
                OpCode::SetTabUp => self.op_settabup(instr),
                OpCode::SetTable => self.op_settable(instr),
                OpCode::SetI => self.op_seti(instr),
                OpCode::SetField => self.op_setfield(instr),
                OpCode::NewTable => self.op_newtable(instr),
                OpCode::Self_ => self.op_self(instr),
                OpCode::AddI => self.op_arith_imm(instr, ArithOp::Add),
                OpCode::ShrI => self.op_arith_imm(instr, ArithOp::Shr),
                OpCode::ShlI => self.op_shli(instr),
                OpCode::AddK => self.op_arith_k(instr, ArithOp::Add),
                OpCode::SubK => self.op_arith_k(instr, ArithOp::Sub),
                OpCode::MulK => self.op_arith_k(instr, ArithOp::Mul),
                OpCode::ModK => self.op_arith_k(instr, ArithOp::Mod),
                OpCode::PowK => self.op_arith_k(instr, ArithOp::Pow),
                OpCode::DivK => self.op_arith_k(instr, ArithOp::Div),
                OpCode::IDivK => self.op_arith_k(instr, ArithOp::IDiv),
                OpCode::BAndK => self.op_arith_k(instr, ArithOp::BAnd),
                OpCode::BOrK => self.op_arith_k(instr, ArithOp::BOr),
                OpCode::BXorK => self.op_arith_k(instr, ArithOp::BXor),
                OpCode::Add => self.op_arith_rr(instr, ArithOp::Add),
                OpCode::Sub => self.op_arith_rr(instr, ArithOp::Sub),
                OpCode::Mul => self.op_arith_rr(instr, ArithOp::Mul),
                OpCode::Mod => self.op_arith_rr(instr, ArithOp::Mod),
                OpCode::Pow => self.op_arith_rr(instr, ArithOp::Pow),
                OpCode::Div => self.op_arith_rr(instr, ArithOp::Div),
                OpCode::IDiv => self.op_arith_rr(instr, ArithOp::IDiv),
                OpCode::BAnd => self.op_arith_rr(instr, ArithOp::BAnd),
                OpCode::BOr => self.op_arith_rr(instr, ArithOp::BOr),
                OpCode::BXor => self.op_arith_rr(instr, ArithOp::BXor),
                OpCode::Shl => self.op_arith_rr(instr, ArithOp::Shl),
                OpCode::Shr => self.op_arith_rr(instr, ArithOp::Shr),
                OpCode::MmBin => self.op_mmbin(instr),
                OpCode::MmBinI => self.op_mmbin_i(instr),
                OpCode::MmBinK => self.op_mmbin_k(instr),
                OpCode::Unm => self.op_unm(instr),
                OpCode::BNot => self.op_bnot(instr),
                OpCode::Not => self.op_not(instr),
                OpCode::Len => self.op_len(instr),
                OpCode::Concat => self.op_concat(instr),
                OpCode::Close => self.op_close(instr),
                OpCode::Tbc => self.op_tbc(instr),
                OpCode::Jmp => self.op_jmp(instr),
                OpCode::Eq => self.op_eq(instr),
                OpCode::Lt => self.op_lt(instr),
                OpCode::Le => self.op_le(instr),
                OpCode::EqK => self.op_eqk(instr),
                OpCode::EqI => self.op_eqi(instr),
                OpCode::LtI => self.op_cmp_imm(instr, CmpImm::Lt),
                OpCode::LeI => self.op_cmp_imm(instr, CmpImm::Le),
                OpCode::GtI => self.op_cmp_imm(instr, CmpImm::Gt),
                OpCode::GeI => self.op_cmp_imm(instr, CmpImm::Ge),
                OpCode::Test => self.op_test(instr),
                OpCode::TestSet => self.op_testset(instr),
                OpCode::Call => self.op_call(instr),
                OpCode::ForLoop => self.op_forloop(instr),
                OpCode::ForPrep => self.op_forprep(instr),
                OpCode::TForPrep => self.op_tforprep(instr),
                OpCode::TForCall => self.op_tforcall(instr),
                OpCode::TForLoop => self.op_tforloop(instr),
                OpCode::SetList => self.op_setlist(instr),
                OpCode::Closure => self.op_closure(instr),
                OpCode::Vararg => self.op_vararg(instr),
                OpCode::VarargPrep => self.op_varargprep(instr),
                OpCode::ExtraArg => Ok(()),
                OpCode::TailCall => {
                    match self.op_tailcall(instr) {
                        Ok(Some(results)) => {
                            if self.frames.len() <= entry_depth {
                                return Ok(results);
                            }
                            Ok(())
                        }
                        Ok(None) => Ok(()),
                        Err(e) => Err(e),
                    }
                }
                OpCode::Return | OpCode::Return0 | OpCode::Return1 => {
                    let result = match op {
                        OpCode::Return => {
                            let a = Instruction::get_a(instr);
                            let b = Instruction::get_b(instr);
                            let k = Instruction::get_k(instr);
                            self.op_return_values(a, b, k)
                        }
                        OpCode::Return0 => self.op_return_values(0, 1, false),
                        _ => {
                            let a = Instruction::get_a(instr);
                            self.op_return_values(a, 2, false)
                        }
                    };
                    match result {
                        Ok(results) => {
                            if self.frames.len() <= entry_depth {
                                return Ok(results);
                            }
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                }
            };

            if let Err(e) = step {
                if e.is_yield() {
                    return Err(e);
                }
                return Err(self.decorate_error(e));
            }
        }
    }

    /// Attach the current source location and a call-stack snapshot.
    pub(crate) fn decorate_error(&self, mut e: LuaError) -> LuaError {
        if e.location.is_none() {
            if let Some(frame) = self.frames.last() {
                e.location = Some(SourceLocation::new(
                    frame.chunk.source_name.clone(),
                    frame.chunk.line_at(frame.pc.saturating_sub(1)),
                    0,
                ));
            }
        }
        if e.traceback.is_empty() {
            e.traceback = self.frames.iter().rev().map(|f| f.describe()).collect();
        }
        e
    }

    // ---- register plumbing shared by the handlers ----

    #[inline(always)]
    pub(crate) fn frame_base(&self) -> usize {
        self.frames.last().map(|f| f.base).unwrap_or(0)
    }

    #[inline(always)]
    pub(crate) fn reg(&self, i: u32) -> &LuaValue {
        &self.stack[self.frame_base() + i as usize]
    }

    #[inline(always)]
    pub(crate) fn reg_clone(&self, i: u32) -> LuaValue {
        self.reg(i).clone()
    }

    #[inline(always)]
    pub(crate) fn set_reg(&mut self, i: u32, value: LuaValue) {
        let idx = self.frame_base() + i as usize;
        self.stack[idx] = value;
    }

    /// Constant from the running prototype's pool.
    #[inline(always)]
    pub(crate) fn kst(&self, i: u32) -> LuaValue {
        self.frames.last().expect("no frame").chunk.constants[i as usize].clone()
    }

    /// Conditional-skip helper: skip the paired JMP when `cond != k`.
    #[inline(always)]
    pub(crate) fn cond_skip(&mut self, cond: bool, k: bool) {
        if cond != k {
            self.frames.last_mut().expect("no frame").pc += 1;
        }
    }

    /// Skip the following fallback/extra instruction unconditionally.
    #[inline(always)]
    pub(crate) fn skip_next(&mut self) {
        self.frames.last_mut().expect("no frame").pc += 1;
    }
}

/// Immediate comparison flavors (the LTI/LEI/GTI/GEI family).
#[derive(Debug, Clone, Copy)]
pub(crate) enum CmpImm {
    Lt,
    Le,
    Gt,
    Ge,
}
