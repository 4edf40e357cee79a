// Expression lowering. Every entry point leaves the expression's value in a
// register the caller picked (or the next free one) and restores the
// register watermark it found.

use super::{CodeGen, FIELDS_PER_FLUSH, VarKind};
use crate::compiler::ast::{BinOp, Expr, TableEntry, UnOp};
use crate::lua_vm::MetaMethod;
use crate::lua_vm::opcode::{Instruction, OpCode};
use crate::lua_vm::LuaResult;

impl CodeGen {
    /// Evaluate `e` into the (already reserved) register `dst`.
    pub(crate) fn expr_to_reg(&mut self, e: &Expr, dst: u8) -> LuaResult<()> {
        self.fs.line = e.span().line;
        match e {
            Expr::Nil(_) => {
                self.emit(Instruction::create_abc(OpCode::LoadNil, dst as u32, 0, 0));
            }
            Expr::True(_) => {
                self.emit(Instruction::create_abc(OpCode::LoadTrue, dst as u32, 0, 0));
            }
            Expr::False(_) => {
                self.emit(Instruction::create_abc(OpCode::LoadFalse, dst as u32, 0, 0));
            }
            Expr::Int(i, _) => self.load_int(dst, *i)?,
            Expr::Float(f, _) => self.load_float(dst, *f)?,
            Expr::Str(s, _) => {
                let idx = self.string_constant(s)?;
                self.emit_load_constant(dst, idx);
            }
            Expr::Vararg(_) => {
                // One value wanted
                self.emit(Instruction::create_abc(OpCode::Vararg, dst as u32, 0, 2));
            }
            Expr::Paren(inner, _) => self.expr_to_reg(inner, dst)?,
            Expr::Name(name, _) => match self.resolve_var(name) {
                VarKind::Local(reg) => {
                    if reg != dst {
                        self.emit(Instruction::create_abc(
                            OpCode::Move,
                            dst as u32,
                            reg as u32,
                            0,
                        ));
                    }
                }
                VarKind::Upvalue(idx) => {
                    self.emit(Instruction::create_abc(
                        OpCode::GetUpval,
                        dst as u32,
                        idx as u32,
                        0,
                    ));
                }
                VarKind::Global => {
                    let env = self.env_upvalue()?;
                    let key = self.string_constant(name)?;
                    if key <= Instruction::MAX_C {
                        self.emit(Instruction::create_abck(
                            OpCode::GetTabUp,
                            dst as u32,
                            env as u32,
                            key,
                            true,
                        ));
                    } else {
                        // Pool overflow path: load _ENV and the key explicitly
                        let saved = self.fs.freereg;
                        let tmp = self.reserve_regs(1)?;
                        self.emit(Instruction::create_abc(
                            OpCode::GetUpval,
                            tmp as u32,
                            env as u32,
                            0,
                        ));
                        let kreg = self.reserve_regs(1)?;
                        self.emit_load_constant(kreg, key);
                        self.emit(Instruction::create_abc(
                            OpCode::GetTable,
                            dst as u32,
                            tmp as u32,
                            kreg as u32,
                        ));
                        self.free_to(saved);
                    }
                }
            },
            Expr::Index { object, key, .. } => {
                let saved = self.fs.freereg;
                let obj = self.expr_to_any(object)?;
                self.emit_index_get(dst, obj, key)?;
                self.free_to(saved);
            }
            Expr::Call { .. } | Expr::MethodCall { .. } => {
                let saved = self.fs.freereg;
                let base = self.compile_call(e, 1)?;
                if base != dst {
                    self.emit(Instruction::create_abc(
                        OpCode::Move,
                        dst as u32,
                        base as u32,
                        0,
                    ));
                }
                self.free_to(saved);
            }
            Expr::Function(body) => {
                let idx = self.compile_function_body(body)?;
                self.emit(Instruction::create_abx(OpCode::Closure, dst as u32, idx));
            }
            Expr::Table { entries, .. } => self.table_constructor(entries, dst)?,
            Expr::Unary { op, operand, .. } => self.unary_to_reg(*op, operand, dst)?,
            Expr::Binary { op, lhs, rhs, .. } => self.binary_to_reg(*op, lhs, rhs, dst)?,
        }
        Ok(())
    }

    /// Reserve the next register and evaluate into it.
    pub(crate) fn expr_to_next(&mut self, e: &Expr) -> LuaResult<u8> {
        let dst = self.reserve_regs(1)?;
        self.expr_to_reg(e, dst)?;
        Ok(dst)
    }

    /// Like expr_to_next, but a plain local read stays in its home register.
    pub(crate) fn expr_to_any(&mut self, e: &Expr) -> LuaResult<u8> {
        if let Expr::Name(name, _) = e {
            if let Some(local) = self.find_local(name) {
                return Ok(local.reg);
            }
        }
        self.expr_to_next(e)
    }

    fn load_int(&mut self, dst: u8, value: i64) -> LuaResult<()> {
        if Instruction::fits_sbx(value) {
            self.emit(Instruction::create_asbx(
                OpCode::LoadI,
                dst as u32,
                value as i32,
            ));
        } else {
            let idx = self.int_constant(value)?;
            self.emit_load_constant(dst, idx);
        }
        Ok(())
    }

    fn load_float(&mut self, dst: u8, value: f64) -> LuaResult<()> {
        // Integral floats in sBx range load immediately
        if value.fract() == 0.0 && Instruction::fits_sbx(value as i64) && value.is_finite() {
            self.emit(Instruction::create_asbx(
                OpCode::LoadF,
                dst as u32,
                value as i32,
            ));
        } else {
            let idx = self.float_constant(value)?;
            self.emit_load_constant(dst, idx);
        }
        Ok(())
    }

    /// R[dst] := obj[key], picking GETI/GETFIELD/GETTABLE by key shape.
    pub(crate) fn emit_index_get(&mut self, dst: u8, obj: u8, key: &Expr) -> LuaResult<()> {
        match key {
            Expr::Int(i, _) if *i >= 0 && *i <= Instruction::MAX_C as i64 => {
                self.emit(Instruction::create_abc(
                    OpCode::GetI,
                    dst as u32,
                    obj as u32,
                    *i as u32,
                ));
            }
            Expr::Str(s, _) => {
                let idx = self.string_constant(s)?;
                if idx <= Instruction::MAX_C {
                    self.emit(Instruction::create_abck(
                        OpCode::GetField,
                        dst as u32,
                        obj as u32,
                        idx,
                        true,
                    ));
                } else {
                    let saved = self.fs.freereg;
                    let kreg = self.reserve_regs(1)?;
                    self.emit_load_constant(kreg, idx);
                    self.emit(Instruction::create_abc(
                        OpCode::GetTable,
                        dst as u32,
                        obj as u32,
                        kreg as u32,
                    ));
                    self.free_to(saved);
                }
            }
            _ => {
                let saved = self.fs.freereg;
                let kreg = self.expr_to_any(key)?;
                self.emit(Instruction::create_abc(
                    OpCode::GetTable,
                    dst as u32,
                    obj as u32,
                    kreg as u32,
                ));
                self.free_to(saved);
            }
        }
        Ok(())
    }

    // ---- unary operators ----

    fn unary_to_reg(&mut self, op: UnOp, operand: &Expr, dst: u8) -> LuaResult<()> {
        // Negated literals load directly; `for i = 10, 1, -1` depends on it
        if op == UnOp::Neg {
            match operand {
                Expr::Int(i, _) => return self.load_int(dst, i.wrapping_neg()),
                Expr::Float(f, _) => return self.load_float(dst, -f),
                _ => {}
            }
        }
        let saved = self.fs.freereg;
        let src = self.expr_to_any(operand)?;
        let opcode = match op {
            UnOp::Neg => OpCode::Unm,
            UnOp::Not => OpCode::Not,
            UnOp::Len => OpCode::Len,
            UnOp::BNot => OpCode::BNot,
        };
        self.emit(Instruction::create_abc(opcode, dst as u32, src as u32, 0));
        self.free_to(saved);
        Ok(())
    }

    // ---- binary operators ----

    fn binary_to_reg(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, dst: u8) -> LuaResult<()> {
        match op {
            BinOp::And | BinOp::Or => {
                // TESTSET keeps dst untouched until the short-circuit
                // decision, so `x = y and x` reads the original x
                let saved = self.fs.freereg;
                let rb = self.expr_to_any(lhs)?;
                self.free_to(saved);
                self.emit(Instruction::create_abck(
                    OpCode::TestSet,
                    dst as u32,
                    rb as u32,
                    0,
                    op == BinOp::Or,
                ));
                let skip = self.emit_jump();
                self.expr_to_reg(rhs, dst)?;
                self.patch_jump_here(skip)
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                // Materialize the comparison as a boolean
                let saved = self.fs.freereg;
                self.emit_comparison(op, lhs, rhs, true)?;
                self.free_to(saved);
                let jtrue = self.emit_jump();
                self.emit(Instruction::create_abc(OpCode::LFalseSkip, dst as u32, 0, 0));
                self.patch_jump_here(jtrue)?;
                self.emit(Instruction::create_abc(OpCode::LoadTrue, dst as u32, 0, 0));
                Ok(())
            }
            BinOp::Concat => self.concat_to_reg(lhs, rhs, dst),
            _ => self.arith_to_reg(op, lhs, rhs, dst),
        }
    }

    fn arith_event(op: BinOp) -> MetaMethod {
        match op {
            BinOp::Add => MetaMethod::Add,
            BinOp::Sub => MetaMethod::Sub,
            BinOp::Mul => MetaMethod::Mul,
            BinOp::Div => MetaMethod::Div,
            BinOp::IDiv => MetaMethod::IDiv,
            BinOp::Mod => MetaMethod::Mod,
            BinOp::Pow => MetaMethod::Pow,
            BinOp::BAnd => MetaMethod::BAnd,
            BinOp::BOr => MetaMethod::BOr,
            BinOp::BXor => MetaMethod::BXor,
            BinOp::Shl => MetaMethod::Shl,
            BinOp::Shr => MetaMethod::Shr,
            _ => unreachable!("not an arithmetic operator"),
        }
    }

    /// Arithmetic and bitwise operators. Emits the fast-path instruction and
    /// the MMBIN* fallback the VM runs only when the fast path fails.
    fn arith_to_reg(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, dst: u8) -> LuaResult<()> {
        let event = Self::arith_event(op);
        let saved = self.fs.freereg;

        // a + imm / imm + a
        if op == BinOp::Add {
            if let Some(imm) = small_int(rhs) {
                let rb = self.expr_to_any(lhs)?;
                self.emit(Instruction::create_abc(
                    OpCode::AddI,
                    dst as u32,
                    rb as u32,
                    (imm + Instruction::OFFSET_SC as i64) as u32,
                ));
                self.emit_mmbin_i(rb, imm, event, false);
                self.free_to(saved);
                return Ok(());
            }
            if let Some(imm) = small_int(lhs) {
                let rb = self.expr_to_any(rhs)?;
                self.emit(Instruction::create_abc(
                    OpCode::AddI,
                    dst as u32,
                    rb as u32,
                    (imm + Instruction::OFFSET_SC as i64) as u32,
                ));
                self.emit_mmbin_i(rb, imm, event, true);
                self.free_to(saved);
                return Ok(());
            }
        }

        // Shift immediates: a >> n, a << n (as a >> -n), n << a
        if op == BinOp::Shr {
            if let Some(imm) = small_int(rhs) {
                let rb = self.expr_to_any(lhs)?;
                self.emit(Instruction::create_abc(
                    OpCode::ShrI,
                    dst as u32,
                    rb as u32,
                    (imm + Instruction::OFFSET_SC as i64) as u32,
                ));
                self.emit_mmbin_i(rb, imm, event, false);
                self.free_to(saved);
                return Ok(());
            }
        }
        if op == BinOp::Shl {
            if let Some(imm) = small_int(rhs) {
                if let Some(neg) = imm.checked_neg().filter(|n| Instruction::fits_sc(*n)) {
                    let rb = self.expr_to_any(lhs)?;
                    self.emit(Instruction::create_abc(
                        OpCode::ShrI,
                        dst as u32,
                        rb as u32,
                        (neg + Instruction::OFFSET_SC as i64) as u32,
                    ));
                    self.emit_mmbin_i(rb, imm, event, false);
                    self.free_to(saved);
                    return Ok(());
                }
            }
            if let Some(imm) = small_int(lhs) {
                let rb = self.expr_to_any(rhs)?;
                self.emit(Instruction::create_abc(
                    OpCode::ShlI,
                    dst as u32,
                    rb as u32,
                    (imm + Instruction::OFFSET_SC as i64) as u32,
                ));
                self.emit_mmbin_i(rb, imm, event, true);
                self.free_to(saved);
                return Ok(());
            }
        }

        // K variants: one operand is a numeric constant in C range
        if let Some(kop) = const_variant(op) {
            if let Some(kidx) = self.numeric_constant(rhs)? {
                if kidx <= Instruction::MAX_C {
                    let rb = self.expr_to_any(lhs)?;
                    self.emit(Instruction::create_abck(
                        kop,
                        dst as u32,
                        rb as u32,
                        kidx,
                        true,
                    ));
                    self.emit_mmbin_k(rb, kidx, event, false);
                    self.free_to(saved);
                    return Ok(());
                }
            }
            if commutative(op) {
                if let Some(kidx) = self.numeric_constant(lhs)? {
                    if kidx <= Instruction::MAX_C {
                        let rb = self.expr_to_any(rhs)?;
                        self.emit(Instruction::create_abck(
                            kop,
                            dst as u32,
                            rb as u32,
                            kidx,
                            true,
                        ));
                        self.emit_mmbin_k(rb, kidx, event, true);
                        self.free_to(saved);
                        return Ok(());
                    }
                }
            }
        }

        // Register-register path
        let rb = self.expr_to_any(lhs)?;
        let rc = self.expr_to_any(rhs)?;
        let opcode = match op {
            BinOp::Add => OpCode::Add,
            BinOp::Sub => OpCode::Sub,
            BinOp::Mul => OpCode::Mul,
            BinOp::Div => OpCode::Div,
            BinOp::IDiv => OpCode::IDiv,
            BinOp::Mod => OpCode::Mod,
            BinOp::Pow => OpCode::Pow,
            BinOp::BAnd => OpCode::BAnd,
            BinOp::BOr => OpCode::BOr,
            BinOp::BXor => OpCode::BXor,
            BinOp::Shl => OpCode::Shl,
            BinOp::Shr => OpCode::Shr,
            _ => unreachable!(),
        };
        self.emit(Instruction::create_abc(
            opcode,
            dst as u32,
            rb as u32,
            rc as u32,
        ));
        self.emit(Instruction::create_abc(
            OpCode::MmBin,
            rb as u32,
            rc as u32,
            event as u32,
        ));
        self.free_to(saved);
        Ok(())
    }

    fn emit_mmbin_i(&mut self, ra: u8, imm: i64, event: MetaMethod, flip: bool) {
        self.emit(Instruction::create_abck(
            OpCode::MmBinI,
            ra as u32,
            (imm + Instruction::OFFSET_SB as i64) as u32,
            event as u32,
            flip,
        ));
    }

    fn emit_mmbin_k(&mut self, ra: u8, kidx: u32, event: MetaMethod, flip: bool) {
        self.emit(Instruction::create_abck(
            OpCode::MmBinK,
            ra as u32,
            kidx,
            event as u32,
            flip,
        ));
    }

    /// Pool index for a numeric literal operand, if it is one.
    fn numeric_constant(&mut self, e: &Expr) -> LuaResult<Option<u32>> {
        match e {
            Expr::Int(i, _) => Ok(Some(self.int_constant(*i)?)),
            Expr::Float(f, _) => Ok(Some(self.float_constant(*f)?)),
            _ => Ok(None),
        }
    }

    /// Concatenation: flatten the right-leaning chain into consecutive
    /// registers and emit a single CONCAT.
    fn concat_to_reg(&mut self, lhs: &Expr, rhs: &Expr, dst: u8) -> LuaResult<()> {
        let mut operands = Vec::new();
        flatten_concat(lhs, &mut operands);
        flatten_concat(rhs, &mut operands);
        let saved = self.fs.freereg;
        let base = self.reserve_regs(operands.len() as u8)?;
        for (i, operand) in operands.iter().enumerate() {
            self.expr_to_reg(operand, base + i as u8)?;
        }
        self.emit(Instruction::create_abc(
            OpCode::Concat,
            base as u32,
            operands.len() as u32,
            0,
        ));
        if base != dst {
            self.emit(Instruction::create_abc(
                OpCode::Move,
                dst as u32,
                base as u32,
                0,
            ));
        }
        self.free_to(saved);
        Ok(())
    }

    // ---- comparisons ----

    /// Emit the comparison instruction such that the following JMP is taken
    /// when the comparison's truth equals `jump_when`.
    pub(crate) fn emit_comparison(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        jump_when: bool,
    ) -> LuaResult<()> {
        // Normalize > and >= by swapping operands
        let (op, lhs, rhs) = match op {
            BinOp::Gt => (BinOp::Lt, rhs, lhs),
            BinOp::Ge => (BinOp::Le, rhs, lhs),
            other => (other, lhs, rhs),
        };
        // Ne is Eq with inverted jump sense
        let (op, k) = match op {
            BinOp::Ne => (BinOp::Eq, !jump_when),
            other => (other, jump_when),
        };

        // Immediate forms
        if let Some(imm) = small_int(rhs) {
            let ra = self.expr_to_any(lhs)?;
            let opcode = match op {
                BinOp::Eq => OpCode::EqI,
                BinOp::Lt => OpCode::LtI,
                BinOp::Le => OpCode::LeI,
                _ => unreachable!(),
            };
            self.emit(Instruction::create_abck(
                opcode,
                ra as u32,
                (imm + Instruction::OFFSET_SB as i64) as u32,
                0,
                k,
            ));
            return Ok(());
        }
        if let Some(imm) = small_int(lhs) {
            // imm < a  <=>  a > imm ; imm <= a  <=>  a >= imm
            let ra = self.expr_to_any(rhs)?;
            let opcode = match op {
                BinOp::Eq => OpCode::EqI,
                BinOp::Lt => OpCode::GtI,
                BinOp::Le => OpCode::GeI,
                _ => unreachable!(),
            };
            self.emit(Instruction::create_abck(
                opcode,
                ra as u32,
                (imm + Instruction::OFFSET_SB as i64) as u32,
                0,
                k,
            ));
            return Ok(());
        }
        // EQK for non-numeric constants
        if op == BinOp::Eq {
            if let Expr::Str(s, _) = rhs {
                let kidx = self.string_constant(s)?;
                if kidx <= Instruction::MAX_B {
                    let ra = self.expr_to_any(lhs)?;
                    self.emit(Instruction::create_abck(OpCode::EqK, ra as u32, kidx, 0, k));
                    return Ok(());
                }
            }
        }

        let ra = self.expr_to_any(lhs)?;
        let rb = self.expr_to_any(rhs)?;
        let opcode = match op {
            BinOp::Eq => OpCode::Eq,
            BinOp::Lt => OpCode::Lt,
            BinOp::Le => OpCode::Le,
            _ => unreachable!(),
        };
        self.emit(Instruction::create_abck(
            opcode,
            ra as u32,
            rb as u32,
            0,
            k,
        ));
        Ok(())
    }

    // ---- conditions (jump lists) ----

    /// Compile a condition; returns jumps taken when it is FALSE. The code
    /// falls through when the condition holds.
    pub(crate) fn cond_false_jumps(&mut self, e: &Expr) -> LuaResult<Vec<usize>> {
        self.fs.line = e.span().line;
        match e {
            // Constant conditions
            Expr::True(_) | Expr::Int(..) | Expr::Float(..) | Expr::Str(..)
            | Expr::Function(_) => Ok(Vec::new()),
            Expr::Nil(_) | Expr::False(_) => Ok(vec![self.emit_jump()]),
            Expr::Binary {
                op: BinOp::And,
                lhs,
                rhs,
                ..
            } => {
                let mut jumps = self.cond_false_jumps(lhs)?;
                jumps.extend(self.cond_false_jumps(rhs)?);
                Ok(jumps)
            }
            Expr::Binary {
                op: BinOp::Or,
                lhs,
                rhs,
                ..
            } => {
                let true_jumps = self.cond_true_jumps(lhs)?;
                let false_jumps = self.cond_false_jumps(rhs)?;
                self.patch_jumps_here(true_jumps)?;
                Ok(false_jumps)
            }
            Expr::Binary { op, lhs, rhs, .. } if is_comparison(*op) => {
                let saved = self.fs.freereg;
                // Jump (to else) when the comparison is false
                self.emit_comparison(*op, lhs, rhs, false)?;
                self.free_to(saved);
                Ok(vec![self.emit_jump()])
            }
            Expr::Unary {
                op: UnOp::Not,
                operand,
                ..
            } => self.cond_true_jumps(operand),
            _ => {
                let saved = self.fs.freereg;
                let reg = self.expr_to_any(e)?;
                self.free_to(saved);
                self.emit(Instruction::create_abck(
                    OpCode::Test,
                    reg as u32,
                    0,
                    0,
                    false,
                ));
                Ok(vec![self.emit_jump()])
            }
        }
    }

    /// Compile a condition; returns jumps taken when it is TRUE.
    pub(crate) fn cond_true_jumps(&mut self, e: &Expr) -> LuaResult<Vec<usize>> {
        match e {
            Expr::Nil(_) | Expr::False(_) => Ok(Vec::new()),
            Expr::True(_) | Expr::Int(..) | Expr::Float(..) | Expr::Str(..) => {
                Ok(vec![self.emit_jump()])
            }
            Expr::Binary {
                op: BinOp::Or,
                lhs,
                rhs,
                ..
            } => {
                let mut jumps = self.cond_true_jumps(lhs)?;
                jumps.extend(self.cond_true_jumps(rhs)?);
                Ok(jumps)
            }
            Expr::Binary {
                op: BinOp::And,
                lhs,
                rhs,
                ..
            } => {
                let false_jumps = self.cond_false_jumps(lhs)?;
                let true_jumps = self.cond_true_jumps(rhs)?;
                self.patch_jumps_here(false_jumps)?;
                Ok(true_jumps)
            }
            Expr::Binary { op, lhs, rhs, .. } if is_comparison(*op) => {
                let saved = self.fs.freereg;
                self.emit_comparison(*op, lhs, rhs, true)?;
                self.free_to(saved);
                Ok(vec![self.emit_jump()])
            }
            Expr::Unary {
                op: UnOp::Not,
                operand,
                ..
            } => self.cond_false_jumps(operand),
            _ => {
                let saved = self.fs.freereg;
                let reg = self.expr_to_any(e)?;
                self.free_to(saved);
                self.emit(Instruction::create_abck(
                    OpCode::Test,
                    reg as u32,
                    0,
                    0,
                    true,
                ));
                Ok(vec![self.emit_jump()])
            }
        }
    }

    // ---- calls ----

    /// Compile a call with `nresults` expected results (-1 = all). Returns
    /// the base register: the results land there. The caller decides whether
    /// to keep or release the window.
    pub(crate) fn compile_call(&mut self, e: &Expr, nresults: i32) -> LuaResult<u8> {
        match e {
            Expr::Call { func, args, span } => {
                self.fs.line = span.line;
                let base = self.reserve_regs(1)?;
                self.expr_to_reg(func, base)?;
                let nargs = self.compile_args(args, base)?;
                self.fs.line = span.line;
                let b = match nargs {
                    Some(n) => n as u32 + 1,
                    None => 0,
                };
                let c = (nresults + 1).max(0) as u32;
                self.emit(Instruction::create_abc(OpCode::Call, base as u32, b, c));
                self.after_call(base, nresults)?;
                Ok(base)
            }
            Expr::MethodCall {
                object,
                method,
                args,
                span,
            } => {
                self.fs.line = span.line;
                let saved = self.fs.freereg;
                let obj = self.expr_to_any(object)?;
                self.free_to(saved);
                let base = self.reserve_regs(2)?;
                let kidx = self.string_constant(method)?;
                if kidx <= Instruction::MAX_C {
                    self.emit(Instruction::create_abck(
                        OpCode::Self_,
                        base as u32,
                        obj as u32,
                        kidx,
                        true,
                    ));
                } else {
                    let kreg = self.reserve_regs(1)?;
                    self.emit_load_constant(kreg, kidx);
                    self.emit(Instruction::create_abc(
                        OpCode::Self_,
                        base as u32,
                        obj as u32,
                        kreg as u32,
                    ));
                    self.free_to(base + 2);
                }
                let nargs = self.compile_args(args, base + 1)?;
                self.fs.line = span.line;
                let b = match nargs {
                    Some(n) => n as u32 + 2,
                    None => 0,
                };
                let c = (nresults + 1).max(0) as u32;
                self.emit(Instruction::create_abc(OpCode::Call, base as u32, b, c));
                self.after_call(base, nresults)?;
                Ok(base)
            }
            _ => unreachable!("compile_call on a non-call expression"),
        }
    }

    fn after_call(&mut self, base: u8, nresults: i32) -> LuaResult<()> {
        if nresults >= 0 {
            let top = base as u32 + nresults as u32;
            if top > self.fs.freereg as u32 {
                let extra = (top - self.fs.freereg as u32) as u8;
                self.reserve_regs(extra)?;
            } else {
                self.free_to(top.max(self.barrier() as u32) as u8);
            }
        }
        Ok(())
    }

    /// Arguments laid out right after `func_reg`. Returns the fixed argument
    /// count, or None when the last argument expands (call/vararg).
    fn compile_args(&mut self, args: &[Expr], func_reg: u8) -> LuaResult<Option<usize>> {
        debug_assert!(self.fs.freereg == func_reg + 1);
        if args.is_empty() {
            return Ok(Some(0));
        }
        for arg in &args[..args.len() - 1] {
            let reg = self.reserve_regs(1)?;
            self.expr_to_reg(arg, reg)?;
        }
        let last = &args[args.len() - 1];
        if last.is_multi_value() {
            self.expr_multi_open(last)?;
            Ok(None)
        } else {
            let reg = self.reserve_regs(1)?;
            self.expr_to_reg(last, reg)?;
            Ok(Some(args.len()))
        }
    }

    /// Evaluate a multi-value expression leaving ALL its results at the
    /// current free-register watermark (B/C = 0 form).
    pub(crate) fn expr_multi_open(&mut self, e: &Expr) -> LuaResult<()> {
        match e {
            Expr::Call { .. } | Expr::MethodCall { .. } => {
                let base = self.compile_call(e, -1)?;
                // Results are open-ended; keep the window from base
                self.fs.freereg = base + 1;
                if self.fs.freereg > self.fs.peak_freereg {
                    self.fs.peak_freereg = self.fs.freereg;
                }
                Ok(())
            }
            Expr::Vararg(_) => {
                let base = self.reserve_regs(1)?;
                self.emit(Instruction::create_abc(OpCode::Vararg, base as u32, 0, 0));
                Ok(())
            }
            _ => unreachable!("expr_multi_open on a single-value expression"),
        }
    }

    // ---- table constructors ----

    fn table_constructor(&mut self, entries: &[TableEntry], dst: u8) -> LuaResult<()> {
        let array_hint = entries
            .iter()
            .filter(|e| matches!(e, TableEntry::Item(_)))
            .count()
            .min(Instruction::MAX_C as usize) as u32;
        let hash_hint = (entries.len() - array_hint as usize).min(Instruction::MAX_B as usize) as u32;
        self.emit(Instruction::create_abc(
            OpCode::NewTable,
            dst as u32,
            hash_hint,
            array_hint,
        ));
        self.emit(Instruction::create_ax(OpCode::ExtraArg, 0));

        let mut pending = 0usize; // items staged for the next SETLIST
        let mut flushed = 0usize; // array slots already written
        let n_items = entries
            .iter()
            .filter(|e| matches!(e, TableEntry::Item(_)))
            .count();
        let mut item_index = 0usize;
        let saved = self.fs.freereg;

        for entry in entries {
            match entry {
                TableEntry::Item(value) => {
                    item_index += 1;
                    let is_last = item_index == n_items;
                    if is_last && value.is_multi_value() {
                        self.expr_multi_open(value)?;
                        self.emit_setlist(dst, 0, flushed)?;
                        self.free_to(saved);
                        pending = 0;
                        continue;
                    }
                    let reg = self.reserve_regs(1)?;
                    self.expr_to_reg(value, reg)?;
                    pending += 1;
                    if pending as u32 == FIELDS_PER_FLUSH {
                        self.emit_setlist(dst, pending, flushed)?;
                        flushed += pending;
                        pending = 0;
                        self.free_to(saved);
                    }
                }
                TableEntry::Named(name, value) => {
                    let kidx = self.string_constant(name)?;
                    let vsaved = self.fs.freereg;
                    let vreg = self.expr_to_any(value)?;
                    if kidx <= Instruction::MAX_B {
                        self.emit(Instruction::create_abck(
                            OpCode::SetField,
                            dst as u32,
                            kidx,
                            vreg as u32,
                            true,
                        ));
                    } else {
                        let kreg = self.reserve_regs(1)?;
                        self.emit_load_constant(kreg, kidx);
                        self.emit(Instruction::create_abc(
                            OpCode::SetTable,
                            dst as u32,
                            kreg as u32,
                            vreg as u32,
                        ));
                    }
                    self.free_to(vsaved);
                }
                TableEntry::Keyed(key, value) => {
                    let vsaved = self.fs.freereg;
                    match key {
                        Expr::Int(i, _) if *i >= 0 && *i <= Instruction::MAX_B as i64 => {
                            let vreg = self.expr_to_any(value)?;
                            self.emit(Instruction::create_abc(
                                OpCode::SetI,
                                dst as u32,
                                *i as u32,
                                vreg as u32,
                            ));
                        }
                        _ => {
                            let kreg = self.expr_to_any(key)?;
                            let vreg = self.expr_to_any(value)?;
                            self.emit(Instruction::create_abc(
                                OpCode::SetTable,
                                dst as u32,
                                kreg as u32,
                                vreg as u32,
                            ));
                        }
                    }
                    self.free_to(vsaved);
                }
            }
        }
        if pending > 0 {
            self.emit_setlist(dst, pending, flushed)?;
            self.free_to(saved);
        }
        Ok(())
    }

    /// SETLIST with the wide-start-index escape through EXTRAARG.
    fn emit_setlist(&mut self, table: u8, count: usize, start: usize) -> LuaResult<()> {
        if start as u32 <= Instruction::MAX_C {
            self.emit(Instruction::create_abc(
                OpCode::SetList,
                table as u32,
                count as u32,
                start as u32,
            ));
        } else {
            if start as u32 > Instruction::MAX_AX {
                return Err(self.error("table constructor too large"));
            }
            self.emit(Instruction::create_abck(
                OpCode::SetList,
                table as u32,
                count as u32,
                0,
                true,
            ));
            self.emit(Instruction::create_ax(OpCode::ExtraArg, start as u32));
        }
        Ok(())
    }
}

fn is_comparison(op: BinOp) -> bool {
    matches!(
        op,
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
    )
}

fn commutative(op: BinOp) -> bool {
    matches!(
        op,
        BinOp::Add | BinOp::Mul | BinOp::BAnd | BinOp::BOr | BinOp::BXor
    )
}

/// Integer literal that fits the signed immediate fields.
fn small_int(e: &Expr) -> Option<i64> {
    match e {
        Expr::Int(i, _) if Instruction::fits_sc(*i) => Some(*i),
        _ => None,
    }
}

/// K-variant opcode for an arithmetic/bitwise operator.
fn const_variant(op: BinOp) -> Option<OpCode> {
    let kop = match op {
        BinOp::Add => OpCode::AddK,
        BinOp::Sub => OpCode::SubK,
        BinOp::Mul => OpCode::MulK,
        BinOp::Div => OpCode::DivK,
        BinOp::IDiv => OpCode::IDivK,
        BinOp::Mod => OpCode::ModK,
        BinOp::Pow => OpCode::PowK,
        BinOp::BAnd => OpCode::BAndK,
        BinOp::BOr => OpCode::BOrK,
        BinOp::BXor => OpCode::BXorK,
        _ => return None,
    };
    Some(kop)
}

fn flatten_concat<'a>(e: &'a Expr, out: &mut Vec<&'a Expr>) {
    match e {
        Expr::Binary {
            op: BinOp::Concat,
            lhs,
            rhs,
            ..
        } => {
            flatten_concat(lhs, out);
            flatten_concat(rhs, out);
        }
        other => out.push(other),
    }
}
