// Code generator: AST -> function prototypes with Lua 5.5 bytecode.
// One FuncState per source function; nested bodies suspend the enclosing
// state and land in child_protos.

mod expr;
mod stmt;

use std::collections::HashMap;
use std::rc::Rc;

use ahash::RandomState;
use smol_str::SmolStr;

use super::ast::{LocalAttrib, Program};
use crate::lua_value::{Chunk, LuaValue, UpvalueDesc};
use crate::lua_vm::opcode::{Instruction, OpCode};
use crate::lua_vm::{LuaError, LuaResult, SourceLocation};

/// Register headroom the dispatch loop may use beyond what codegen observes.
const STACK_HEADROOM: u8 = 2;
/// Most registers a single function may address.
pub(crate) const MAX_REGS: u32 = 255;
/// Array items flushed per SETLIST batch.
pub(crate) const FIELDS_PER_FLUSH: u32 = 50;

/// Dedup key for the constant pool. Integer and float constants are distinct
/// keys even when numerically equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ConstKey {
    Int(i64),
    FloatBits(u64),
    Str(String),
    True,
    False,
    Nil,
}

pub(crate) struct LocalVar {
    pub name: SmolStr,
    pub reg: u8,
    pub attrib: LocalAttrib,
    pub captured: bool,
}

pub(crate) struct CompiledUpvalue {
    pub name: SmolStr,
    pub in_stack: bool,
    pub index: u8,
}

pub(crate) struct BlockScope {
    pub first_local: usize,
    pub first_label: usize,
    pub has_tbc: bool,
}

pub(crate) struct LoopInfo {
    pub break_jumps: Vec<usize>,
    /// First register belonging to the loop, for CLOSE on break
    pub first_reg: u8,
    /// Block depth of the loop body, for close tracking across break
    pub block_depth: usize,
}

pub(crate) struct LabelDesc {
    pub name: SmolStr,
    pub pc: usize,
    pub nactive: usize,
}

pub(crate) struct PendingGoto {
    pub name: SmolStr,
    pub jump_pc: usize,
    pub nactive: usize,
    pub line: u32,
}

pub(crate) struct FuncState {
    pub chunk: Chunk,
    pub constants: HashMap<ConstKey, u32, RandomState>,
    pub locals: Vec<LocalVar>,
    pub upvalues: Vec<CompiledUpvalue>,
    pub blocks: Vec<BlockScope>,
    pub loops: Vec<LoopInfo>,
    pub labels: Vec<LabelDesc>,
    pub gotos: Vec<PendingGoto>,
    /// First free register; registers below locals.len() are the barrier
    pub freereg: u8,
    pub peak_freereg: u8,
    /// Function needs CLOSE semantics on return
    pub needclose: bool,
    pub line: u32,
    pub prev: Option<Box<FuncState>>,
}

impl FuncState {
    fn new(source_name: SmolStr, line_defined: u32) -> Self {
        let mut chunk = Chunk::new();
        chunk.source_name = source_name;
        chunk.line_defined = line_defined;
        FuncState {
            chunk,
            constants: HashMap::with_hasher(RandomState::new()),
            locals: Vec::new(),
            upvalues: Vec::new(),
            blocks: Vec::new(),
            loops: Vec::new(),
            labels: Vec::new(),
            gotos: Vec::new(),
            freereg: 0,
            peak_freereg: 0,
            needclose: false,
            line: line_defined.max(1),
            prev: None,
        }
    }
}

/// Outcome of resolving a name in the scope chain.
pub(crate) enum VarKind {
    Local(u8),
    Upvalue(u8),
    Global,
}

pub struct CodeGen {
    pub(crate) fs: FuncState,
    chunk_name: SmolStr,
}

impl CodeGen {
    /// Lower a parsed program into its main-chunk prototype. The program
    /// must be error-free; Lua source errors are the parser's department.
    pub fn generate(program: &Program, chunk_name: &str) -> LuaResult<Chunk> {
        let chunk_name = SmolStr::new(chunk_name);
        let mut fs = FuncState::new(chunk_name.clone(), 0);

        // Every main chunk is vararg and holds _ENV at upvalue slot 0
        fs.chunk.is_vararg = true;
        fs.upvalues.push(CompiledUpvalue {
            name: SmolStr::new_static("_ENV"),
            in_stack: true,
            index: 0,
        });

        let mut cg = CodeGen { fs, chunk_name };
        cg.emit(Instruction::create_abc(OpCode::VarargPrep, 0, 0, 0));
        cg.enter_block();
        cg.compile_block(&program.block)?;
        cg.leave_block()?;
        cg.check_pending_gotos()?;
        cg.emit(Instruction::create_abck(
            OpCode::Return,
            cg.fs.freereg as u32,
            1,
            0,
            cg.fs.needclose,
        ));
        Ok(cg.finish())
    }

    fn finish(mut self) -> Chunk {
        self.fs.chunk.max_stack_size = self
            .fs
            .peak_freereg
            .saturating_add(STACK_HEADROOM)
            .max(self.fs.chunk.param_count + STACK_HEADROOM);
        self.fs.chunk.upvalue_descs = self
            .fs
            .upvalues
            .iter()
            .map(|u| UpvalueDesc {
                in_stack: u.in_stack,
                index: u.index,
                name: u.name.clone(),
            })
            .collect();
        self.fs.chunk
    }

    // ---- errors ----

    pub(crate) fn error(&self, message: impl Into<String>) -> LuaError {
        LuaError::syntax(
            message,
            SourceLocation::new(self.chunk_name.clone(), self.fs.line, 0),
        )
    }

    // ---- emission ----

    pub(crate) fn emit(&mut self, instr: u32) -> usize {
        let pc = self.fs.chunk.code.len();
        self.fs.chunk.code.push(instr);
        self.fs.chunk.line_info.push(self.fs.line);
        pc
    }

    pub(crate) fn pc(&self) -> usize {
        self.fs.chunk.code.len()
    }

    /// Emit a forward jump to be patched later.
    pub(crate) fn emit_jump(&mut self) -> usize {
        self.emit(Instruction::create_sj(OpCode::Jmp, 0))
    }

    /// Emit a backward jump straight to a known target.
    pub(crate) fn emit_jump_to(&mut self, target: usize) -> LuaResult<()> {
        let pc = self.emit_jump();
        self.patch_jump(pc, target)
    }

    /// Point the jump at `jump_pc` to `target`.
    pub(crate) fn patch_jump(&mut self, jump_pc: usize, target: usize) -> LuaResult<()> {
        let offset = target as i64 - (jump_pc as i64 + 1);
        if offset < -(Instruction::OFFSET_SJ as i64) || offset > Instruction::OFFSET_SJ as i64 {
            return Err(self.error("control structure too long"));
        }
        let instr = &mut self.fs.chunk.code[jump_pc];
        Instruction::set_sj(instr, offset as i32);
        Ok(())
    }

    /// Patch a jump to land on the next emitted instruction.
    pub(crate) fn patch_jump_here(&mut self, jump_pc: usize) -> LuaResult<()> {
        let here = self.pc();
        self.patch_jump(jump_pc, here)
    }

    pub(crate) fn patch_jumps_here(&mut self, jumps: Vec<usize>) -> LuaResult<()> {
        for pc in jumps {
            self.patch_jump_here(pc)?;
        }
        Ok(())
    }

    // ---- registers ----

    pub(crate) fn reserve_regs(&mut self, n: u8) -> LuaResult<u8> {
        let first = self.fs.freereg;
        let new_top = first as u32 + n as u32;
        if new_top > MAX_REGS {
            return Err(self.error("function or expression needs too many registers"));
        }
        self.fs.freereg = new_top as u8;
        if self.fs.freereg > self.fs.peak_freereg {
            self.fs.peak_freereg = self.fs.freereg;
        }
        Ok(first)
    }

    /// Release temporaries down to `reg`. Never drops below the active-local
    /// barrier.
    pub(crate) fn free_to(&mut self, reg: u8) {
        debug_assert!(reg as usize >= self.fs.locals.len());
        if reg >= self.barrier() {
            self.fs.freereg = reg;
        }
    }

    /// First register not bound to a named local.
    pub(crate) fn barrier(&self) -> u8 {
        self.fs.locals.len() as u8
    }

    // ---- constants ----

    pub(crate) fn add_constant(&mut self, key: ConstKey, value: LuaValue) -> LuaResult<u32> {
        if let Some(&idx) = self.fs.constants.get(&key) {
            return Ok(idx);
        }
        let idx = self.fs.chunk.constants.len() as u32;
        if idx > Instruction::MAX_BX {
            return Err(self.error("too many constants in one function"));
        }
        self.fs.chunk.constants.push(value);
        self.fs.constants.insert(key, idx);
        Ok(idx)
    }

    pub(crate) fn string_constant(&mut self, s: &str) -> LuaResult<u32> {
        self.add_constant(ConstKey::Str(s.to_string()), LuaValue::string(s))
    }

    pub(crate) fn int_constant(&mut self, i: i64) -> LuaResult<u32> {
        self.add_constant(ConstKey::Int(i), LuaValue::integer(i))
    }

    pub(crate) fn float_constant(&mut self, f: f64) -> LuaResult<u32> {
        self.add_constant(ConstKey::FloatBits(f.to_bits()), LuaValue::float(f))
    }

    /// Load a constant by pool index, going through LOADKX for wide indices.
    pub(crate) fn emit_load_constant(&mut self, dst: u8, idx: u32) {
        if idx <= Instruction::MAX_BX {
            self.emit(Instruction::create_abx(OpCode::LoadK, dst as u32, idx));
        } else {
            self.emit(Instruction::create_abx(OpCode::LoadKX, dst as u32, 0));
            self.emit(Instruction::create_ax(OpCode::ExtraArg, idx));
        }
    }

    // ---- scopes and variables ----

    pub(crate) fn enter_block(&mut self) {
        self.fs.blocks.push(BlockScope {
            first_local: self.fs.locals.len(),
            first_label: self.fs.labels.len(),
            has_tbc: false,
        });
    }

    /// Close a block: emit CLOSE when the block held captured or to-be-closed
    /// locals, drop its locals and labels, release its registers.
    pub(crate) fn leave_block(&mut self) -> LuaResult<()> {
        let block = self.fs.blocks.pop().expect("unbalanced block scope");
        let first_local = block.first_local;
        let needs_close = block.has_tbc
            || self.fs.locals[first_local..].iter().any(|l| l.captured);
        if needs_close {
            let reg = if first_local < self.fs.locals.len() {
                self.fs.locals[first_local].reg
            } else {
                self.fs.freereg
            };
            self.emit(Instruction::create_abc(OpCode::Close, reg as u32, 0, 0));
            self.fs.needclose = true;
        }
        self.fs.labels.truncate(block.first_label);
        self.fs.locals.truncate(first_local);
        self.fs.freereg = self.fs.locals.len() as u8;
        Ok(())
    }

    /// Declare a new local occupying the next register. The register must
    /// already hold the initial value.
    pub(crate) fn declare_local(&mut self, name: SmolStr, attrib: LocalAttrib) -> LuaResult<u8> {
        let reg = self.fs.locals.len() as u8;
        if reg as u32 + 1 > MAX_REGS {
            return Err(self.error("too many local variables"));
        }
        if attrib == LocalAttrib::Close {
            self.emit(Instruction::create_abc(OpCode::Tbc, reg as u32, 0, 0));
            if let Some(block) = self.fs.blocks.last_mut() {
                block.has_tbc = true;
            }
            self.fs.needclose = true;
        }
        self.fs.locals.push(LocalVar {
            name,
            reg,
            attrib,
            captured: false,
        });
        if self.fs.freereg <= reg {
            self.fs.freereg = reg + 1;
            if self.fs.freereg > self.fs.peak_freereg {
                self.fs.peak_freereg = self.fs.freereg;
            }
        }
        Ok(reg)
    }

    /// Resolve a name: local of the current function, upvalue (captured on
    /// demand through the enclosing-function chain), or global.
    pub(crate) fn resolve_var(&mut self, name: &str) -> VarKind {
        fn resolve(fs: &mut FuncState, name: &str) -> VarKind {
            for local in fs.locals.iter().rev() {
                if local.name == name {
                    return VarKind::Local(local.reg);
                }
            }
            for (i, up) in fs.upvalues.iter().enumerate() {
                if up.name == name {
                    return VarKind::Upvalue(i as u8);
                }
            }
            let Some(prev) = fs.prev.as_mut() else {
                return VarKind::Global;
            };
            let captured = match resolve(prev, name) {
                VarKind::Local(reg) => {
                    for local in prev.locals.iter_mut().rev() {
                        if local.name == name {
                            local.captured = true;
                            break;
                        }
                    }
                    CompiledUpvalue {
                        name: SmolStr::new(name),
                        in_stack: true,
                        index: reg,
                    }
                }
                VarKind::Upvalue(idx) => CompiledUpvalue {
                    name: SmolStr::new(name),
                    in_stack: false,
                    index: idx,
                },
                VarKind::Global => return VarKind::Global,
            };
            fs.upvalues.push(captured);
            VarKind::Upvalue(fs.upvalues.len() as u8 - 1)
        }
        resolve(&mut self.fs, name)
    }

    /// The `_ENV` upvalue index, capturing it if this function has not yet.
    pub(crate) fn env_upvalue(&mut self) -> LuaResult<u8> {
        match self.resolve_var("_ENV") {
            VarKind::Upvalue(idx) => Ok(idx),
            // _ENV lives at upvalue 0 of the main chunk; the chain walk
            // always lands on it
            _ => Err(self.error("'_ENV' is not accessible")),
        }
    }

    pub(crate) fn find_local(&self, name: &str) -> Option<&LocalVar> {
        self.fs.locals.iter().rev().find(|l| l.name == name)
    }

    // ---- nested functions ----

    pub(crate) fn enter_function(&mut self, line_defined: u32) {
        let new_fs = FuncState::new(self.chunk_name.clone(), line_defined);
        let outer = std::mem::replace(&mut self.fs, new_fs);
        self.fs.prev = Some(Box::new(outer));
    }

    /// Seal the current function and restore the enclosing one, returning
    /// the finished prototype's index in the parent's child list.
    pub(crate) fn leave_function(&mut self) -> LuaResult<u32> {
        self.check_pending_gotos()?;
        self.emit(Instruction::create_abck(
            OpCode::Return,
            self.fs.freereg as u32,
            1,
            0,
            self.fs.needclose,
        ));
        let outer = *self.fs.prev.take().expect("unbalanced function nesting");
        let mut inner = std::mem::replace(&mut self.fs, outer);
        inner.chunk.max_stack_size = inner
            .peak_freereg
            .saturating_add(STACK_HEADROOM)
            .max(inner.chunk.param_count + STACK_HEADROOM);
        inner.chunk.upvalue_descs = inner
            .upvalues
            .iter()
            .map(|u| UpvalueDesc {
                in_stack: u.in_stack,
                index: u.index,
                name: u.name.clone(),
            })
            .collect();
        let idx = self.fs.chunk.child_protos.len() as u32;
        self.fs.chunk.child_protos.push(Rc::new(inner.chunk));
        Ok(idx)
    }

    // ---- gotos and labels ----

    pub(crate) fn check_pending_gotos(&mut self) -> LuaResult<()> {
        if let Some(goto) = self.fs.gotos.first() {
            return Err(LuaError::syntax(
                format!("no visible label '{}' for goto", goto.name),
                SourceLocation::new(self.chunk_name.clone(), goto.line, 0),
            ));
        }
        Ok(())
    }
}
