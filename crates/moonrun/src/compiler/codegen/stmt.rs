// Statement lowering: control flow, scopes, loops, assignments.

use smol_str::SmolStr;

use super::{CodeGen, LabelDesc, LoopInfo, PendingGoto, VarKind};
use crate::compiler::ast::{Block, Expr, FunctionBody, LocalAttrib, Stat};
use crate::lua_vm::opcode::{Instruction, OpCode};
use crate::lua_vm::LuaResult;

/// Where an assignment target stores to. Registers referenced here stay
/// reserved until the store happens.
enum AssignTarget {
    Local(u8),
    Upvalue(u8),
    /// _ENV upvalue index + key constant
    Global(u8, u32),
    /// object register + key register
    IndexRR(u8, u8),
    /// object register + string constant index
    IndexField(u8, u32),
    /// object register + small integer key
    IndexInt(u8, u32),
}

impl CodeGen {
    pub(crate) fn compile_block(&mut self, block: &Block) -> LuaResult<()> {
        for stat in &block.stats {
            self.compile_stat(stat)?;
            // Statement boundary: temporaries die here
            self.fs.freereg = self.barrier();
        }
        Ok(())
    }

    fn compile_stat(&mut self, stat: &Stat) -> LuaResult<()> {
        self.fs.line = stat.span().line;
        match stat {
            Stat::ExprStat(e) => {
                self.compile_call(e, 0)?;
                Ok(())
            }
            Stat::Local { names, values, .. } => self.compile_local(names, values),
            Stat::LocalFunction { name, body, .. } => {
                // The local is visible inside its own body, so recursion
                // resolves to it
                let reg = self.declare_local(name.clone(), LocalAttrib::None)?;
                let idx = self.compile_function_body(body)?;
                self.emit(Instruction::create_abx(OpCode::Closure, reg as u32, idx));
                Ok(())
            }
            Stat::FunctionDecl { target, body, .. } => {
                let targets = [self.prepare_target(target)?];
                let base = self.reserve_regs(1)?;
                let idx = self.compile_function_body(body)?;
                self.emit(Instruction::create_abx(OpCode::Closure, base as u32, idx));
                self.store_targets(&targets, base)
            }
            Stat::Assign {
                targets, values, ..
            } => self.compile_assign(targets, values),
            Stat::Do(block, _) => {
                self.enter_block();
                self.compile_block(block)?;
                self.leave_block()
            }
            Stat::If {
                arms, else_block, ..
            } => self.compile_if(arms, else_block.as_ref()),
            Stat::While {
                condition, body, ..
            } => self.compile_while(condition, body),
            Stat::Repeat {
                body, condition, ..
            } => self.compile_repeat(body, condition),
            Stat::NumericFor {
                var,
                start,
                limit,
                step,
                body,
                ..
            } => self.compile_numeric_for(var, start, limit, step.as_ref(), body),
            Stat::GenericFor {
                names,
                exprs,
                body,
                ..
            } => self.compile_generic_for(names, exprs, body),
            Stat::Return { values, .. } => self.compile_return(values),
            Stat::Break(_) => self.compile_break(),
            Stat::Goto(name, span) => self.compile_goto(name, span.line),
            Stat::Label(name, _) => self.compile_label(name),
        }
    }

    // ---- declarations and assignment ----

    /// Evaluate an expression list into `want` consecutive registers starting
    /// at the current watermark, padding with nils / dropping extras.
    fn explist_to_regs(&mut self, values: &[Expr], want: usize) -> LuaResult<u8> {
        let base = self.fs.freereg;
        if values.is_empty() {
            if want > 0 {
                let first = self.reserve_regs(want as u8)?;
                self.emit(Instruction::create_abc(
                    OpCode::LoadNil,
                    first as u32,
                    want as u32 - 1,
                    0,
                ));
            }
            return Ok(base);
        }
        let have = values.len();
        for value in &values[..have - 1] {
            let reg = self.reserve_regs(1)?;
            self.expr_to_reg(value, reg)?;
        }
        let last = &values[have - 1];
        let provided;
        if last.is_multi_value() && want >= have {
            let needed = (want - (have - 1)) as i32;
            match last {
                Expr::Vararg(_) => {
                    let first = self.reserve_regs(needed.max(1) as u8)?;
                    self.emit(Instruction::create_abc(
                        OpCode::Vararg,
                        first as u32,
                        0,
                        needed as u32 + 1,
                    ));
                }
                _ => {
                    self.compile_call(last, needed)?;
                }
            }
            provided = want;
        } else {
            let reg = self.reserve_regs(1)?;
            self.expr_to_reg(last, reg)?;
            provided = have;
        }
        if provided < want {
            let first = self.reserve_regs((want - provided) as u8)?;
            self.emit(Instruction::create_abc(
                OpCode::LoadNil,
                first as u32,
                (want - provided) as u32 - 1,
                0,
            ));
        } else if provided > want {
            self.free_to(base + want as u8);
        }
        Ok(base)
    }

    fn compile_local(
        &mut self,
        names: &[crate::compiler::ast::LocalName],
        values: &[Expr],
    ) -> LuaResult<()> {
        debug_assert!(self.fs.freereg == self.barrier());
        self.explist_to_regs(values, names.len())?;
        for name in names {
            self.declare_local(name.name.clone(), name.attrib)?;
        }
        Ok(())
    }

    fn prepare_target(&mut self, target: &Expr) -> LuaResult<AssignTarget> {
        match target {
            Expr::Name(name, _) => match self.resolve_var(name) {
                VarKind::Local(reg) => {
                    if let Some(local) = self.find_local(name) {
                        if local.attrib != LocalAttrib::None {
                            return Err(self.error(format!(
                                "attempt to assign to const variable '{}'",
                                name
                            )));
                        }
                    }
                    Ok(AssignTarget::Local(reg))
                }
                VarKind::Upvalue(idx) => Ok(AssignTarget::Upvalue(idx)),
                VarKind::Global => {
                    let env = self.env_upvalue()?;
                    let key = self.string_constant(name)?;
                    Ok(AssignTarget::Global(env, key))
                }
            },
            Expr::Index { object, key, .. } => {
                let obj = self.expr_to_any(object)?;
                match key.as_ref() {
                    Expr::Str(s, _) => {
                        let kidx = self.string_constant(s)?;
                        if kidx <= Instruction::MAX_B {
                            return Ok(AssignTarget::IndexField(obj, kidx));
                        }
                        let kreg = self.expr_to_next(key)?;
                        Ok(AssignTarget::IndexRR(obj, kreg))
                    }
                    Expr::Int(i, _) if *i >= 0 && *i <= Instruction::MAX_B as i64 => {
                        Ok(AssignTarget::IndexInt(obj, *i as u32))
                    }
                    _ => {
                        let kreg = self.expr_to_any(key)?;
                        Ok(AssignTarget::IndexRR(obj, kreg))
                    }
                }
            }
            _ => Err(self.error("cannot assign to this expression")),
        }
    }

    fn store_targets(&mut self, targets: &[AssignTarget], values_base: u8) -> LuaResult<()> {
        for (i, target) in targets.iter().enumerate() {
            let src = values_base + i as u8;
            match target {
                AssignTarget::Local(reg) => {
                    if *reg != src {
                        self.emit(Instruction::create_abc(
                            OpCode::Move,
                            *reg as u32,
                            src as u32,
                            0,
                        ));
                    }
                }
                AssignTarget::Upvalue(idx) => {
                    self.emit(Instruction::create_abc(
                        OpCode::SetUpval,
                        src as u32,
                        *idx as u32,
                        0,
                    ));
                }
                AssignTarget::Global(env, key) => {
                    if *key <= Instruction::MAX_B {
                        self.emit(Instruction::create_abc(
                            OpCode::SetTabUp,
                            *env as u32,
                            *key,
                            src as u32,
                        ));
                    } else {
                        let saved = self.fs.freereg;
                        let tmp = self.reserve_regs(2)?;
                        self.emit(Instruction::create_abc(
                            OpCode::GetUpval,
                            tmp as u32,
                            *env as u32,
                            0,
                        ));
                        self.emit_load_constant(tmp + 1, *key);
                        self.emit(Instruction::create_abc(
                            OpCode::SetTable,
                            tmp as u32,
                            tmp as u32 + 1,
                            src as u32,
                        ));
                        self.free_to(saved);
                    }
                }
                AssignTarget::IndexRR(obj, key) => {
                    self.emit(Instruction::create_abc(
                        OpCode::SetTable,
                        *obj as u32,
                        *key as u32,
                        src as u32,
                    ));
                }
                AssignTarget::IndexField(obj, kidx) => {
                    self.emit(Instruction::create_abck(
                        OpCode::SetField,
                        *obj as u32,
                        *kidx,
                        src as u32,
                        true,
                    ));
                }
                AssignTarget::IndexInt(obj, i) => {
                    self.emit(Instruction::create_abc(
                        OpCode::SetI,
                        *obj as u32,
                        *i,
                        src as u32,
                    ));
                }
            }
        }
        Ok(())
    }

    fn compile_assign(&mut self, targets: &[Expr], values: &[Expr]) -> LuaResult<()> {
        // Fast path: one local target, one value. Table constructors write
        // their destination before evaluating entries, so they go through a
        // temporary instead
        if let ([Expr::Name(name, _)], [value]) = (targets, values) {
            if matches!(value, Expr::Table { .. }) {
                // general path below
            } else if let Some(local) = self.find_local(name) {
                if local.attrib != LocalAttrib::None {
                    return Err(
                        self.error(format!("attempt to assign to const variable '{}'", name))
                    );
                }
                let reg = local.reg;
                return self.expr_to_reg(value, reg);
            }
        }
        // Target sub-expressions evaluate before the value list
        let mut prepared = Vec::with_capacity(targets.len());
        for target in targets {
            prepared.push(self.prepare_target(target)?);
        }
        let base = self.explist_to_regs(values, targets.len())?;
        self.store_targets(&prepared, base)
    }

    // ---- control flow ----

    fn compile_if(&mut self, arms: &[(Expr, Block)], else_block: Option<&Block>) -> LuaResult<()> {
        let mut end_jumps = Vec::new();
        let last = arms.len() - 1;
        for (i, (condition, block)) in arms.iter().enumerate() {
            let false_jumps = self.cond_false_jumps(condition)?;
            self.enter_block();
            self.compile_block(block)?;
            self.leave_block()?;
            if i != last || else_block.is_some() {
                end_jumps.push(self.emit_jump());
            }
            self.patch_jumps_here(false_jumps)?;
        }
        if let Some(block) = else_block {
            self.enter_block();
            self.compile_block(block)?;
            self.leave_block()?;
        }
        self.patch_jumps_here(end_jumps)
    }

    fn enter_loop(&mut self) {
        self.fs.loops.push(LoopInfo {
            break_jumps: Vec::new(),
            first_reg: self.barrier(),
            block_depth: self.fs.blocks.len(),
        });
    }

    /// Patch breaks to land on the next instruction (the loop exit).
    fn leave_loop(&mut self) -> LuaResult<()> {
        let info = self.fs.loops.pop().expect("unbalanced loop nesting");
        self.patch_jumps_here(info.break_jumps)
    }

    fn compile_while(&mut self, condition: &Expr, body: &Block) -> LuaResult<()> {
        let start = self.pc();
        let false_jumps = self.cond_false_jumps(condition)?;
        self.enter_loop();
        self.enter_block();
        self.compile_block(body)?;
        self.leave_block()?;
        self.emit_jump_to(start)?;
        self.patch_jumps_here(false_jumps)?;
        self.leave_loop()
    }

    fn compile_repeat(&mut self, body: &Block, condition: &Expr) -> LuaResult<()> {
        let start = self.pc();
        self.enter_loop();
        // The until condition sees the body's locals: the block stays open
        // across it
        self.enter_block();
        self.compile_block(body)?;
        self.fs.line = condition.span().line;
        let exit_jumps = self.cond_true_jumps(condition)?;
        // Looping leaves the block scope: close captured/to-be-closed locals
        // before going around again
        let first_local = self.fs.blocks.last().map(|b| b.first_local).unwrap_or(0);
        let needs_close = self.fs.blocks.last().map(|b| b.has_tbc).unwrap_or(false)
            || self.fs.locals[first_local..].iter().any(|l| l.captured);
        if needs_close {
            self.emit(Instruction::create_abc(
                OpCode::Close,
                first_local as u32,
                0,
                0,
            ));
        }
        self.emit_jump_to(start)?;
        self.patch_jumps_here(exit_jumps)?;
        self.leave_block()?;
        self.leave_loop()
    }

    fn compile_numeric_for(
        &mut self,
        var: &SmolStr,
        start: &Expr,
        limit: &Expr,
        step: Option<&Expr>,
        body: &Block,
    ) -> LuaResult<()> {
        self.enter_block();
        debug_assert!(self.fs.freereg == self.barrier());
        let base = self.fs.freereg;

        let r = self.reserve_regs(1)?;
        self.expr_to_reg(start, r)?;
        let r = self.reserve_regs(1)?;
        self.expr_to_reg(limit, r)?;
        let r = self.reserve_regs(1)?;
        match step {
            Some(e) => self.expr_to_reg(e, r)?,
            None => {
                self.emit(Instruction::create_asbx(OpCode::LoadI, r as u32, 1));
            }
        }
        // Hidden control variables, then the user-visible one
        self.fs.freereg = base;
        self.declare_local(SmolStr::new_static("(for start)"), LocalAttrib::None)?;
        self.declare_local(SmolStr::new_static("(for limit)"), LocalAttrib::None)?;
        self.declare_local(SmolStr::new_static("(for step)"), LocalAttrib::None)?;
        self.declare_local(var.clone(), LocalAttrib::None)?;

        let prep_pc = self.emit(Instruction::create_abx(OpCode::ForPrep, base as u32, 0));
        self.enter_loop();
        self.enter_block();
        self.compile_block(body)?;
        self.leave_block()?;
        let loop_pc = self.emit(Instruction::create_abx(
            OpCode::ForLoop,
            base as u32,
            (self.pc() - prep_pc) as u32,
        ));
        let prep_bx = (loop_pc - (prep_pc + 1)) as u32;
        Instruction::set_bx(&mut self.fs.chunk.code[prep_pc], prep_bx);
        self.leave_loop()?;
        self.leave_block()
    }

    fn compile_generic_for(
        &mut self,
        names: &[SmolStr],
        exprs: &[Expr],
        body: &Block,
    ) -> LuaResult<()> {
        self.enter_block();
        debug_assert!(self.fs.freereg == self.barrier());
        let base = self.fs.freereg;

        // Iterator function, state, control value, closing value
        self.explist_to_regs(exprs, 4)?;
        self.fs.freereg = base;
        self.declare_local(SmolStr::new_static("(for iterator)"), LocalAttrib::None)?;
        self.declare_local(SmolStr::new_static("(for state)"), LocalAttrib::None)?;
        self.declare_local(SmolStr::new_static("(for control)"), LocalAttrib::None)?;
        self.declare_local(SmolStr::new_static("(for closing)"), LocalAttrib::None)?;
        // The closing slot may hold a to-be-closed value at runtime
        if let Some(block) = self.fs.blocks.last_mut() {
            block.has_tbc = true;
        }
        self.fs.needclose = true;
        for name in names {
            self.declare_local(name.clone(), LocalAttrib::None)?;
        }

        let prep_pc = self.emit(Instruction::create_abx(OpCode::TForPrep, base as u32, 0));
        self.enter_loop();
        self.enter_block();
        self.compile_block(body)?;
        self.leave_block()?;
        let call_pc = self.pc();
        Instruction::set_bx(
            &mut self.fs.chunk.code[prep_pc],
            (call_pc - (prep_pc + 1)) as u32,
        );
        self.emit(Instruction::create_abc(
            OpCode::TForCall,
            base as u32,
            0,
            names.len() as u32,
        ));
        let loop_pc = self.pc();
        self.emit(Instruction::create_abx(
            OpCode::TForLoop,
            base as u32 + 2,
            (loop_pc - prep_pc) as u32,
        ));
        self.leave_loop()?;
        self.leave_block()
    }

    fn compile_return(&mut self, values: &[Expr]) -> LuaResult<()> {
        let needclose = self.fs.needclose;
        match values {
            [] => {
                if needclose {
                    self.emit(Instruction::create_abck(
                        OpCode::Return,
                        self.barrier() as u32,
                        1,
                        0,
                        true,
                    ));
                } else {
                    self.emit(Instruction::create_abc(OpCode::Return0, 0, 0, 0));
                }
            }
            [single] if !single.is_multi_value() => {
                let saved = self.fs.freereg;
                let reg = self.expr_to_any(single)?;
                if needclose {
                    self.emit(Instruction::create_abck(
                        OpCode::Return,
                        reg as u32,
                        2,
                        0,
                        true,
                    ));
                } else {
                    self.emit(Instruction::create_abc(OpCode::Return1, reg as u32, 0, 0));
                }
                self.free_to(saved);
            }
            _ => {
                let base = self.fs.freereg;
                let have = values.len();
                for value in &values[..have - 1] {
                    let reg = self.reserve_regs(1)?;
                    self.expr_to_reg(value, reg)?;
                }
                let last = &values[have - 1];
                let b = if last.is_multi_value() {
                    self.expr_multi_open(last)?;
                    0
                } else {
                    let reg = self.reserve_regs(1)?;
                    self.expr_to_reg(last, reg)?;
                    have as u32 + 1
                };
                self.emit(Instruction::create_abck(
                    OpCode::Return,
                    base as u32,
                    b,
                    0,
                    needclose,
                ));
                self.free_to(base);
            }
        }
        Ok(())
    }

    fn compile_break(&mut self) -> LuaResult<()> {
        let Some(info) = self.fs.loops.last() else {
            return Err(self.error("break outside a loop"));
        };
        let first_reg = info.first_reg;
        let block_depth = info.block_depth;
        // Leaving the loop body: close anything captured or to-be-closed
        // between here and the loop entry
        let first_local = first_reg as usize;
        let needs_close = self.fs.locals[first_local.min(self.fs.locals.len())..]
            .iter()
            .any(|l| l.captured)
            || self.fs.blocks[block_depth.min(self.fs.blocks.len())..]
                .iter()
                .any(|b| b.has_tbc);
        if needs_close {
            self.emit(Instruction::create_abc(
                OpCode::Close,
                first_reg as u32,
                0,
                0,
            ));
        }
        let jump = self.emit_jump();
        self.fs
            .loops
            .last_mut()
            .expect("loop disappeared")
            .break_jumps
            .push(jump);
        Ok(())
    }

    fn compile_goto(&mut self, name: &SmolStr, line: u32) -> LuaResult<()> {
        // Backward goto to a visible label
        let found = self
            .fs
            .labels
            .iter()
            .rev()
            .find(|l| l.name == *name)
            .map(|l| (l.pc, l.nactive));
        if let Some((target, label_nactive)) = found {
            let needs_close = self.fs.locals[label_nactive.min(self.fs.locals.len())..]
                .iter()
                .any(|l| l.captured)
                || self.fs.blocks.last().map(|b| b.has_tbc).unwrap_or(false);
            if needs_close {
                self.emit(Instruction::create_abc(
                    OpCode::Close,
                    label_nactive as u32,
                    0,
                    0,
                ));
            }
            return self.emit_jump_to(target);
        }
        // Forward goto: pending until the label shows up
        let jump_pc = self.emit_jump();
        self.fs.gotos.push(PendingGoto {
            name: name.clone(),
            jump_pc,
            nactive: self.fs.locals.len(),
            line,
        });
        Ok(())
    }

    fn compile_label(&mut self, name: &SmolStr) -> LuaResult<()> {
        if self.fs.labels.iter().any(|l| l.name == *name) {
            return Err(self.error(format!("label '{}' already defined", name)));
        }
        let pc = self.pc();
        let nactive = self.fs.locals.len();
        // Resolve matching pending gotos
        let mut resolved = Vec::new();
        let mut i = 0;
        while i < self.fs.gotos.len() {
            if self.fs.gotos[i].name == *name {
                let goto = self.fs.gotos.remove(i);
                if nactive > goto.nactive {
                    return Err(self.error(format!(
                        "goto '{}' jumps into the scope of a local variable",
                        name
                    )));
                }
                resolved.push(goto.jump_pc);
            } else {
                i += 1;
            }
        }
        for jump_pc in resolved {
            self.patch_jump(jump_pc, pc)?;
        }
        self.fs.labels.push(LabelDesc {
            name: name.clone(),
            pc,
            nactive,
        });
        Ok(())
    }

    // ---- functions ----

    /// Compile a nested function body; returns its child-prototype index in
    /// the enclosing function.
    pub(crate) fn compile_function_body(&mut self, body: &FunctionBody) -> LuaResult<u32> {
        self.enter_function(body.span.line);
        self.fs.chunk.param_count = body.params.len() as u8;
        self.fs.chunk.is_vararg = body.is_vararg;
        for param in &body.params {
            self.declare_local(param.clone(), LocalAttrib::None)?;
        }
        if body.is_vararg {
            self.emit(Instruction::create_abc(
                OpCode::VarargPrep,
                body.params.len() as u32,
                0,
                0,
            ));
        }
        self.enter_block();
        self.compile_block(&body.block)?;
        self.leave_block()?;
        self.leave_function()
    }
}
