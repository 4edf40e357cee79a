// Arithmetic and bitwise handlers. The fast path handles number operands
// and skips the MMBIN fallback that follows; a failed fast path falls
// through so the MMBIN handler can try string coercion and metamethods.
//
// Integer overflow wraps (two's complement); that is this implementation's
// documented overflow policy.

use crate::lua_value::LuaValue;
use crate::lua_vm::lua_state::LuaVM;
use crate::lua_vm::metamethod::MetaMethod;
use crate::lua_vm::number_ops::{self, ArithOp, Number};
use crate::lua_vm::opcode::Instruction;
use crate::lua_vm::{LuaError, LuaResult};

use super::coercion;

fn arith_error_check(op: ArithOp, a: Number, b: Number) -> Option<LuaError> {
    // Numeric operands that still fail: integer division/modulo by zero,
    // or bitwise on a fractional float
    match op {
        ArithOp::IDiv | ArithOp::Mod => {
            if matches!((a, b), (Number::Int(_), Number::Int(0))) {
                return Some(LuaError::runtime("attempt to perform 'n//0'"));
            }
            None
        }
        ArithOp::BAnd | ArithOp::BOr | ArithOp::BXor | ArithOp::Shl | ArithOp::Shr => {
            if a.as_int().is_none() || b.as_int().is_none() {
                return Some(LuaError::runtime(
                    "number has no integer representation",
                ));
            }
            None
        }
        _ => None,
    }
}

impl LuaVM {
    /// R[A] := R[B] op R[C]; on success skip the MMBIN that follows.
    pub(super) fn op_arith_rr(&mut self, instr: u32, op: ArithOp) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let b = Instruction::get_b(instr);
        let c = Instruction::get_c(instr);
        let lhs = Number::of(self.reg(b));
        let rhs = Number::of(self.reg(c));
        self.arith_fast_path(a, op, lhs, rhs)
    }

    /// R[A] := R[B] op K[C].
    pub(super) fn op_arith_k(&mut self, instr: u32, op: ArithOp) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let b = Instruction::get_b(instr);
        let c = Instruction::get_c(instr);
        let lhs = Number::of(self.reg(b));
        let rhs = Number::of(&self.kst(c));
        self.arith_fast_path(a, op, lhs, rhs)
    }

    /// R[A] := R[B] op sC (ADDI, SHRI).
    pub(super) fn op_arith_imm(&mut self, instr: u32, op: ArithOp) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let b = Instruction::get_b(instr);
        let imm = Instruction::get_sc(instr) as i64;
        let lhs = Number::of(self.reg(b));
        self.arith_fast_path(a, op, lhs, Some(Number::Int(imm)))
    }

    /// R[A] := sC << R[B] (immediate on the left).
    pub(super) fn op_shli(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let b = Instruction::get_b(instr);
        let imm = Instruction::get_sc(instr) as i64;
        let rhs = Number::of(self.reg(b));
        self.arith_fast_path(a, ArithOp::Shl, Some(Number::Int(imm)), rhs)
    }

    fn arith_fast_path(
        &mut self,
        dst: u32,
        op: ArithOp,
        lhs: Option<Number>,
        rhs: Option<Number>,
    ) -> LuaResult<()> {
        if let (Some(x), Some(y)) = (lhs, rhs) {
            if let Some(e) = arith_error_check(op, x, y) {
                return Err(e);
            }
            match number_ops::arith(op, x, y) {
                Some(result) => {
                    self.set_reg(dst, result.to_value());
                    self.skip_next();
                    return Ok(());
                }
                None => unreachable!("arith failure not caught by the error check"),
            }
        }
        // Fall through to the MMBIN fallback instruction
        Ok(())
    }

    // ---- MMBIN fallbacks ----

    /// The arithmetic event an MMBIN carries maps straight onto ArithOp.
    fn event_arith(event: MetaMethod) -> Option<ArithOp> {
        let op = match event {
            MetaMethod::Add => ArithOp::Add,
            MetaMethod::Sub => ArithOp::Sub,
            MetaMethod::Mul => ArithOp::Mul,
            MetaMethod::Div => ArithOp::Div,
            MetaMethod::Mod => ArithOp::Mod,
            MetaMethod::Pow => ArithOp::Pow,
            MetaMethod::IDiv => ArithOp::IDiv,
            MetaMethod::BAnd => ArithOp::BAnd,
            MetaMethod::BOr => ArithOp::BOr,
            MetaMethod::BXor => ArithOp::BXor,
            MetaMethod::Shl => ArithOp::Shl,
            MetaMethod::Shr => ArithOp::Shr,
            _ => return None,
        };
        Some(op)
    }

    /// Destination register of the instruction the fallback belongs to.
    fn mmbin_dst(&self) -> u32 {
        let frame = self.frames.last().expect("no frame");
        Instruction::get_a(frame.chunk.code[frame.pc - 2])
    }

    pub(super) fn op_mmbin(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let b = Instruction::get_b(instr);
        let event = MetaMethod::from_u8(Instruction::get_c(instr) as u8)
            .expect("bad metamethod event");
        let lhs = self.reg_clone(a);
        let rhs = self.reg_clone(b);
        let dst = self.mmbin_dst();
        let result = self.arith_fallback(event, lhs, rhs)?;
        self.set_reg(dst, result);
        Ok(())
    }

    pub(super) fn op_mmbin_i(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let imm = LuaValue::Integer(Instruction::get_sb(instr) as i64);
        let event = MetaMethod::from_u8(Instruction::get_c(instr) as u8)
            .expect("bad metamethod event");
        let flip = Instruction::get_k(instr);
        let reg = self.reg_clone(a);
        let (lhs, rhs) = if flip { (imm, reg) } else { (reg, imm) };
        let dst = self.mmbin_dst();
        let result = self.arith_fallback(event, lhs, rhs)?;
        self.set_reg(dst, result);
        Ok(())
    }

    pub(super) fn op_mmbin_k(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let konst = self.kst(Instruction::get_b(instr));
        let event = MetaMethod::from_u8(Instruction::get_c(instr) as u8)
            .expect("bad metamethod event");
        let flip = Instruction::get_k(instr);
        let reg = self.reg_clone(a);
        let (lhs, rhs) = if flip { (konst, reg) } else { (reg, konst) };
        let dst = self.mmbin_dst();
        let result = self.arith_fallback(event, lhs, rhs)?;
        self.set_reg(dst, result);
        Ok(())
    }

    /// Slow arithmetic: numeric-string coercion first, then the metamethod
    /// on either operand, then a type error naming the offender.
    pub(crate) fn arith_fallback(
        &mut self,
        event: MetaMethod,
        lhs: LuaValue,
        rhs: LuaValue,
    ) -> LuaResult<LuaValue> {
        if let Some(op) = Self::event_arith(event) {
            let bitwise = matches!(
                op,
                ArithOp::BAnd | ArithOp::BOr | ArithOp::BXor | ArithOp::Shl | ArithOp::Shr
            );
            let lnum = coercion::to_number(&lhs);
            let rnum = coercion::to_number(&rhs);
            if let (Some(x), Some(y)) = (lnum, rnum) {
                if let Some(e) = arith_error_check(op, x, y) {
                    return Err(e);
                }
                if !bitwise || (x.as_int().is_some() && y.as_int().is_some()) {
                    if let Some(result) = number_ops::arith(op, x, y) {
                        return Ok(result.to_value());
                    }
                }
            }
        }
        if let Some(mm) = self
            .get_metamethod(&lhs, event)
            .or_else(|| self.get_metamethod(&rhs, event))
        {
            let results = self.call_value(mm, vec![lhs, rhs])?;
            return Ok(results.into_iter().next().unwrap_or(LuaValue::Nil));
        }
        let offender = if coercion::to_number(&lhs).is_none() { &lhs } else { &rhs };
        Err(LuaError::type_error(format!(
            "attempt to {} a {} value",
            event.describe(),
            offender.type_name()
        )))
    }

    // ---- unary operators ----

    pub(super) fn op_unm(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let b = Instruction::get_b(instr);
        let operand = self.reg_clone(b);
        let result = match coercion::to_number(&operand) {
            Some(n) => number_ops::negate(n).to_value(),
            None => {
                let mm = self.get_metamethod(&operand, MetaMethod::Unm);
                match mm {
                    Some(mm) => {
                        let results = self.call_value(mm, vec![operand.clone(), operand])?;
                        results.into_iter().next().unwrap_or(LuaValue::Nil)
                    }
                    None => {
                        return Err(LuaError::type_error(format!(
                            "attempt to perform arithmetic on a {} value",
                            operand.type_name()
                        )));
                    }
                }
            }
        };
        self.set_reg(a, result);
        Ok(())
    }

    pub(super) fn op_bnot(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let b = Instruction::get_b(instr);
        let operand = self.reg_clone(b);
        let int = coercion::to_number(&operand).and_then(|n| n.as_int());
        let result = match int {
            Some(i) => LuaValue::Integer(!i),
            None => {
                let mm = self.get_metamethod(&operand, MetaMethod::BNot);
                match mm {
                    Some(mm) => {
                        let results = self.call_value(mm, vec![operand.clone(), operand])?;
                        results.into_iter().next().unwrap_or(LuaValue::Nil)
                    }
                    None => {
                        return Err(LuaError::type_error(format!(
                            "attempt to perform bitwise operation on a {} value",
                            operand.type_name()
                        )));
                    }
                }
            }
        };
        self.set_reg(a, result);
        Ok(())
    }

    pub(super) fn op_not(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let b = Instruction::get_b(instr);
        let result = LuaValue::Boolean(!self.reg(b).is_truthy());
        self.set_reg(a, result);
        Ok(())
    }

    pub(super) fn op_len(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let b = Instruction::get_b(instr);
        let operand = self.reg_clone(b);
        let result = match &operand {
            LuaValue::String(s) => LuaValue::Integer(s.len() as i64),
            LuaValue::Table(t) => {
                // __len wins over the raw border when present
                match self.get_metamethod(&operand, MetaMethod::Len) {
                    Some(mm) => {
                        let results = self.call_value(mm, vec![operand.clone()])?;
                        results.into_iter().next().unwrap_or(LuaValue::Nil)
                    }
                    None => LuaValue::Integer(t.borrow().len()),
                }
            }
            _ => match self.get_metamethod(&operand, MetaMethod::Len) {
                Some(mm) => {
                    let results = self.call_value(mm, vec![operand.clone()])?;
                    results.into_iter().next().unwrap_or(LuaValue::Nil)
                }
                None => {
                    return Err(LuaError::type_error(format!(
                        "attempt to get length of a {} value",
                        operand.type_name()
                    )));
                }
            },
        };
        self.set_reg(a, result);
        Ok(())
    }
}
