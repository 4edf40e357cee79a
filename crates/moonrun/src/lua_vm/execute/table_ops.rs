// Table access handlers: raw access first, then the __index/__newindex
// chain, bounded so metatable loops turn into errors instead of hangs.

use crate::lua_value::LuaValue;
use crate::lua_vm::lua_state::LuaVM;
use crate::lua_vm::metamethod::MetaMethod;
use crate::lua_vm::opcode::{Instruction, OpCode};
use crate::lua_vm::{LuaError, LuaResult};

/// Longest accepted __index/__newindex chain.
const META_CHAIN_LIMIT: usize = 100;

impl LuaVM {
    /// Full `obj[key]` semantics.
    pub fn index_get(&mut self, obj: &LuaValue, key: &LuaValue) -> LuaResult<LuaValue> {
        let mut current = obj.clone();
        for _ in 0..META_CHAIN_LIMIT {
            match &current {
                LuaValue::Table(t) => {
                    let raw = t.borrow().raw_get(key);
                    if !raw.is_nil() {
                        return Ok(raw);
                    }
                    let handler = self.get_metamethod(&current, MetaMethod::Index);
                    match handler {
                        None => return Ok(LuaValue::Nil),
                        Some(h) if h.is_function() => {
                            let results = self.call_value(h, vec![current, key.clone()])?;
                            return Ok(results.into_iter().next().unwrap_or(LuaValue::Nil));
                        }
                        Some(h) => current = h,
                    }
                }
                _ => {
                    let handler = self.get_metamethod(&current, MetaMethod::Index);
                    match handler {
                        None => {
                            return Err(LuaError::type_error(format!(
                                "attempt to index a {} value",
                                current.type_name()
                            )));
                        }
                        Some(h) if h.is_function() => {
                            let results = self.call_value(h, vec![current, key.clone()])?;
                            return Ok(results.into_iter().next().unwrap_or(LuaValue::Nil));
                        }
                        Some(h) => current = h,
                    }
                }
            }
        }
        Err(LuaError::runtime("'__index' chain too long; possible loop"))
    }

    /// Full `obj[key] = value` semantics. __newindex applies only when the
    /// key is absent from the raw table.
    pub fn index_set(&mut self, obj: &LuaValue, key: LuaValue, value: LuaValue) -> LuaResult<()> {
        if key.is_nil() {
            return Err(LuaError::runtime("table index is nil"));
        }
        if matches!(key, LuaValue::Float(f) if f.is_nan()) {
            return Err(LuaError::runtime("table index is NaN"));
        }
        let mut current = obj.clone();
        for _ in 0..META_CHAIN_LIMIT {
            match &current {
                LuaValue::Table(t) => {
                    let exists = !t.borrow().raw_get(&key).is_nil();
                    if exists {
                        t.borrow_mut().raw_set(key, value);
                        return Ok(());
                    }
                    let handler = self.get_metamethod(&current, MetaMethod::NewIndex);
                    match handler {
                        None => {
                            t.borrow_mut().raw_set(key, value);
                            return Ok(());
                        }
                        Some(h) if h.is_function() => {
                            self.call_value(h, vec![current, key, value])?;
                            return Ok(());
                        }
                        Some(h) => current = h,
                    }
                }
                _ => {
                    let handler = self.get_metamethod(&current, MetaMethod::NewIndex);
                    match handler {
                        None => {
                            return Err(LuaError::type_error(format!(
                                "attempt to index a {} value",
                                current.type_name()
                            )));
                        }
                        Some(h) if h.is_function() => {
                            self.call_value(h, vec![current, key, value])?;
                            return Ok(());
                        }
                        Some(h) => current = h,
                    }
                }
            }
        }
        Err(LuaError::runtime(
            "'__newindex' chain too long; possible loop",
        ))
    }

    // ---- opcode handlers ----

    pub(super) fn op_gettable(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let obj = self.reg_clone(Instruction::get_b(instr));
        let key = self.reg_clone(Instruction::get_c(instr));
        let value = self.index_get(&obj, &key)?;
        self.set_reg(a, value);
        Ok(())
    }

    pub(super) fn op_geti(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let obj = self.reg_clone(Instruction::get_b(instr));
        let key = LuaValue::Integer(Instruction::get_c(instr) as i64);
        let value = self.index_get(&obj, &key)?;
        self.set_reg(a, value);
        Ok(())
    }

    pub(super) fn op_getfield(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let obj = self.reg_clone(Instruction::get_b(instr));
        let key = self.kst(Instruction::get_c(instr));
        let value = self.index_get(&obj, &key)?;
        self.set_reg(a, value);
        Ok(())
    }

    pub(super) fn op_gettabup(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let b = Instruction::get_b(instr);
        let obj = self.read_upvalue(b)?;
        let key = self.kst(Instruction::get_c(instr));
        let value = self.index_get(&obj, &key)?;
        self.set_reg(a, value);
        Ok(())
    }

    pub(super) fn op_settable(&mut self, instr: u32) -> LuaResult<()> {
        let obj = self.reg_clone(Instruction::get_a(instr));
        let key = self.reg_clone(Instruction::get_b(instr));
        let value = self.reg_clone(Instruction::get_c(instr));
        self.index_set(&obj, key, value)
    }

    pub(super) fn op_seti(&mut self, instr: u32) -> LuaResult<()> {
        let obj = self.reg_clone(Instruction::get_a(instr));
        let key = LuaValue::Integer(Instruction::get_b(instr) as i64);
        let value = self.reg_clone(Instruction::get_c(instr));
        self.index_set(&obj, key, value)
    }

    pub(super) fn op_setfield(&mut self, instr: u32) -> LuaResult<()> {
        let obj = self.reg_clone(Instruction::get_a(instr));
        let key = self.kst(Instruction::get_b(instr));
        let value = self.reg_clone(Instruction::get_c(instr));
        self.index_set(&obj, key, value)
    }

    pub(super) fn op_settabup(&mut self, instr: u32) -> LuaResult<()> {
        let obj = self.read_upvalue(Instruction::get_a(instr))?;
        let key = self.kst(Instruction::get_b(instr));
        let value = self.reg_clone(Instruction::get_c(instr));
        self.index_set(&obj, key, value)
    }

    pub(super) fn op_newtable(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let hsize = Instruction::get_b(instr) as usize;
        let asize = Instruction::get_c(instr) as usize;
        self.maybe_collect_garbage();
        let table = self.create_table_with(asize, hsize);
        self.set_reg(a, table);
        // Skip the EXTRAARG that always follows
        self.skip_next();
        Ok(())
    }

    /// R[A+1] := R[B]; R[A] := R[B][key] - receiver plus method in adjacent
    /// registers for the CALL that follows.
    pub(super) fn op_self(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let b = Instruction::get_b(instr);
        let c = Instruction::get_c(instr);
        let obj = self.reg_clone(b);
        let key = if Instruction::get_k(instr) {
            self.kst(c)
        } else {
            self.reg_clone(c)
        };
        let method = self.index_get(&obj, &key)?;
        self.set_reg(a + 1, obj);
        self.set_reg(a, method);
        Ok(())
    }

    pub(super) fn op_setlist(&mut self, instr: u32) -> LuaResult<()> {
        let a = Instruction::get_a(instr);
        let b = Instruction::get_b(instr);
        let base = self.frame_base();
        let start = if Instruction::get_k(instr) {
            let frame = self.frames.last().expect("no frame");
            let extra = frame.chunk.code[frame.pc];
            debug_assert_eq!(Instruction::get_opcode(extra), OpCode::ExtraArg);
            self.skip_next();
            Instruction::get_ax(extra) as i64
        } else {
            Instruction::get_c(instr) as i64
        };
        let count = if b > 0 {
            b as usize
        } else {
            self.top - (base + a as usize) - 1
        };
        let table = self.reg_clone(a);
        let LuaValue::Table(t) = &table else {
            return Err(LuaError::type_error("SETLIST target is not a table"));
        };
        {
            let mut t = t.borrow_mut();
            for i in 1..=count {
                let value = self.stack[base + a as usize + i].clone();
                t.set_int(start + i as i64, value);
            }
        }
        Ok(())
    }
}
