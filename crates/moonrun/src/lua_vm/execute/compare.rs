// Comparison and test handlers. Comparison instructions conditionally skip
// the JMP that follows them: the jump is taken when the condition equals
// the instruction's k flag.

use crate::lua_value::LuaValue;
use crate::lua_vm::lua_state::LuaVM;
use crate::lua_vm::metamethod::MetaMethod;
use crate::lua_vm::number_ops::{self, Number};
use crate::lua_vm::opcode::Instruction;
use crate::lua_vm::{LuaError, LuaResult};

use super::CmpImm;

impl LuaVM {
    /// Equality with __eq: the metamethod applies only when both operands
    /// are tables or both are userdata and raw equality failed.
    pub(crate) fn values_equal(&mut self, lhs: &LuaValue, rhs: &LuaValue) -> LuaResult<bool> {
        if lhs == rhs {
            return Ok(true);
        }
        let both_tables = lhs.is_table() && rhs.is_table();
        let both_userdata = lhs.is_userdata() && rhs.is_userdata();
        if both_tables || both_userdata {
            if let Some(mm) = self
                .get_metamethod(lhs, MetaMethod::Eq)
                .or_else(|| self.get_metamethod(rhs, MetaMethod::Eq))
            {
                let results = self.call_value(mm, vec![lhs.clone(), rhs.clone()])?;
                return Ok(results.first().map(|v| v.is_truthy()).unwrap_or(false));
            }
        }
        Ok(false)
    }

    /// Ordering with the comparison metamethods sought on the LEFT operand.
    pub(crate) fn values_less(
        &mut self,
        lhs: &LuaValue,
        rhs: &LuaValue,
        or_equal: bool,
    ) -> LuaResult<bool> {
        if let (Some(a), Some(b)) = (Number::of(lhs), Number::of(rhs)) {
            return Ok(if or_equal {
                number_ops::num_le(a, b)
            } else {
                number_ops::num_lt(a, b)
            });
        }
        if let (LuaValue::String(a), LuaValue::String(b)) = (lhs, rhs) {
            return Ok(if or_equal {
                a.as_str() <= b.as_str()
            } else {
                a.as_str() < b.as_str()
            });
        }
        let event = if or_equal { MetaMethod::Le } else { MetaMethod::Lt };
        if let Some(mm) = self.get_metamethod(lhs, event) {
            let results = self.call_value(mm, vec![lhs.clone(), rhs.clone()])?;
            return Ok(results.first().map(|v| v.is_truthy()).unwrap_or(false));
        }
        Err(LuaError::type_error(format!(
            "attempt to compare {} with {}",
            lhs.type_name(),
            rhs.type_name()
        )))
    }

    pub(super) fn op_eq(&mut self, instr: u32) -> LuaResult<()> {
        let lhs = self.reg_clone(Instruction::get_a(instr));
        let rhs = self.reg_clone(Instruction::get_b(instr));
        let cond = self.values_equal(&lhs, &rhs)?;
        self.cond_skip(cond, Instruction::get_k(instr));
        Ok(())
    }

    pub(super) fn op_lt(&mut self, instr: u32) -> LuaResult<()> {
        let lhs = self.reg_clone(Instruction::get_a(instr));
        let rhs = self.reg_clone(Instruction::get_b(instr));
        let cond = self.values_less(&lhs, &rhs, false)?;
        self.cond_skip(cond, Instruction::get_k(instr));
        Ok(())
    }

    pub(super) fn op_le(&mut self, instr: u32) -> LuaResult<()> {
        let lhs = self.reg_clone(Instruction::get_a(instr));
        let rhs = self.reg_clone(Instruction::get_b(instr));
        let cond = self.values_less(&lhs, &rhs, true)?;
        self.cond_skip(cond, Instruction::get_k(instr));
        Ok(())
    }

    pub(super) fn op_eqk(&mut self, instr: u32) -> LuaResult<()> {
        let lhs = self.reg_clone(Instruction::get_a(instr));
        let rhs = self.kst(Instruction::get_b(instr));
        // Constants are primitives; raw equality suffices
        let cond = lhs == rhs;
        self.cond_skip(cond, Instruction::get_k(instr));
        Ok(())
    }

    pub(super) fn op_eqi(&mut self, instr: u32) -> LuaResult<()> {
        let lhs = self.reg_clone(Instruction::get_a(instr));
        let imm = LuaValue::Integer(Instruction::get_sb(instr) as i64);
        let cond = lhs == imm;
        self.cond_skip(cond, Instruction::get_k(instr));
        Ok(())
    }

    pub(super) fn op_cmp_imm(&mut self, instr: u32, flavor: CmpImm) -> LuaResult<()> {
        let lhs = self.reg_clone(Instruction::get_a(instr));
        let imm = LuaValue::Integer(Instruction::get_sb(instr) as i64);
        let cond = match flavor {
            CmpImm::Lt => self.values_less(&lhs, &imm, false)?,
            CmpImm::Le => self.values_less(&lhs, &imm, true)?,
            // a > i  <=>  i < a ; a >= i  <=>  i <= a
            CmpImm::Gt => self.values_less(&imm, &lhs, false)?,
            CmpImm::Ge => self.values_less(&imm, &lhs, true)?,
        };
        self.cond_skip(cond, Instruction::get_k(instr));
        Ok(())
    }

    pub(super) fn op_test(&mut self, instr: u32) -> LuaResult<()> {
        let cond = self.reg(Instruction::get_a(instr)).is_truthy();
        self.cond_skip(cond, Instruction::get_k(instr));
        Ok(())
    }

    pub(super) fn op_testset(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let b = Instruction::get_b(instr);
        let k = Instruction::get_k(instr);
        let value = self.reg_clone(b);
        if value.is_truthy() == k {
            self.set_reg(a, value);
        } else {
            self.skip_next();
        }
        Ok(())
    }
}
