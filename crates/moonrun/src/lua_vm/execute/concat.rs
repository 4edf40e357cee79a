// CONCAT: fold R[A]..R[A+B-1] right to left, with __concat for operands
// that are neither strings nor numbers.

use crate::lua_value::LuaValue;
use crate::lua_vm::lua_state::LuaVM;
use crate::lua_vm::metamethod::MetaMethod;
use crate::lua_vm::opcode::Instruction;
use crate::lua_vm::{LuaError, LuaResult};

use super::coercion;

fn concat_text(value: &LuaValue) -> Option<String> {
    match value {
        LuaValue::String(s) => Some(s.as_str().to_string()),
        LuaValue::Integer(_) | LuaValue::Float(_) => Some(coercion::display_value(value)),
        _ => None,
    }
}

impl LuaVM {
    pub(crate) fn concat_values(
        &mut self,
        lhs: LuaValue,
        rhs: LuaValue,
    ) -> LuaResult<LuaValue> {
        if let (Some(a), Some(b)) = (concat_text(&lhs), concat_text(&rhs)) {
            let mut joined = String::with_capacity(a.len() + b.len());
            joined.push_str(&a);
            joined.push_str(&b);
            return Ok(self.create_string_owned(joined));
        }
        if let Some(mm) = self
            .get_metamethod(&lhs, MetaMethod::Concat)
            .or_else(|| self.get_metamethod(&rhs, MetaMethod::Concat))
        {
            let results = self.call_value(mm, vec![lhs, rhs])?;
            return Ok(results.into_iter().next().unwrap_or(LuaValue::Nil));
        }
        let offender = if concat_text(&lhs).is_none() { &lhs } else { &rhs };
        Err(LuaError::type_error(format!(
            "attempt to concatenate a {} value",
            offender.type_name()
        )))
    }

    pub(super) fn op_concat(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let b = Instruction::get_b(instr);
        debug_assert!(b >= 1);
        let base = self.frame_base();
        let first = base + a as usize;
        let mut acc = self.stack[first + b as usize - 1].clone();
        for i in (0..b as usize - 1).rev() {
            let lhs = self.stack[first + i].clone();
            acc = self.concat_values(lhs, acc)?;
        }
        self.stack[first] = acc;
        Ok(())
    }
}
