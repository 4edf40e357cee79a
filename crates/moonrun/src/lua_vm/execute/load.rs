// Load-family handlers.

use crate::lua_value::LuaValue;
use crate::lua_vm::lua_state::LuaVM;
use crate::lua_vm::opcode::Instruction;
use crate::lua_vm::LuaResult;

impl LuaVM {
    pub(super) fn op_move(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let b = Instruction::get_b(instr);
        let value = self.reg_clone(b);
        self.set_reg(a, value);
        Ok(())
    }

    pub(super) fn op_loadi(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let sbx = Instruction::get_sbx(instr);
        self.set_reg(a, LuaValue::Integer(sbx as i64));
        Ok(())
    }

    pub(super) fn op_loadf(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let sbx = Instruction::get_sbx(instr);
        self.set_reg(a, LuaValue::Float(sbx as f64));
        Ok(())
    }

    pub(super) fn op_loadk(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let bx = Instruction::get_bx(instr);
        let value = self.kst(bx);
        self.set_reg(a, value);
        Ok(())
    }

    pub(super) fn op_loadkx(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let idx = {
            let frame = self.frames.last().expect("no frame");
            Instruction::get_ax(frame.chunk.code[frame.pc])
        };
        let value = self.kst(idx);
        self.set_reg(a, value);
        self.skip_next();
        Ok(())
    }

    pub(super) fn op_loadfalse(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        self.set_reg(a, LuaValue::Boolean(false));
        Ok(())
    }

    pub(super) fn op_lfalseskip(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        self.set_reg(a, LuaValue::Boolean(false));
        self.skip_next();
        Ok(())
    }

    pub(super) fn op_loadtrue(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        self.set_reg(a, LuaValue::Boolean(true));
        Ok(())
    }

    pub(super) fn op_loadnil(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let b = Instruction::get_b(instr);
        for i in a..=a + b {
            self.set_reg(i, LuaValue::Nil);
        }
        Ok(())
    }
}
