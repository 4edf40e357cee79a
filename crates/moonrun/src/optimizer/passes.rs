// The optimizer passes. All passes share two safety rules: a rewrite must
// preserve every observable event (calls, table writes, metamethods, error
// points), and any pass that changes code length rebuilds every jump offset
// through an old->new index map or backs out entirely.
//
// `JMP +0` doubles as the in-place no-op: length-preserving passes leave one
// behind and the jump-threading pass deletes it.

use std::collections::{HashMap, HashSet};

use super::PassStats;
use crate::lua_value::{Chunk, LuaValue};
use crate::lua_vm::number_ops::{self, ArithOp, Number};
use crate::lua_vm::opcode::{Instruction, OpCode};

/// Instructions that may skip or consume the following instruction; the pair
/// must never be separated.
fn pairs_with_next(op: OpCode) -> bool {
    use OpCode::*;
    matches!(
        op,
        // comparison and test: conditional skip over the paired JMP
        Eq | Lt | Le | EqK | EqI | LtI | LeI | GtI | GeI | Test | TestSet
        // arithmetic fast paths: skip the MMBIN fallback on success
        | Add | Sub | Mul | Div | IDiv | Mod | Pow
        | BAnd | BOr | BXor | Shl | Shr
        | AddI | AddK | SubK | MulK | ModK | PowK | DivK | IDivK
        | BAndK | BOrK | BXorK | ShrI | ShlI
        // unconditional skip
        | LFalseSkip
        // EXTRAARG consumers
        | LoadKX | NewTable | SetList
    )
}

/// Branch target encoded in the instruction, if any.
fn jump_target(instr: u32, pc: usize) -> Option<usize> {
    let pc = pc as i64;
    match Instruction::get_opcode(instr) {
        OpCode::Jmp => Some((pc + 1 + Instruction::get_sj(instr) as i64) as usize),
        OpCode::ForPrep => Some((pc + Instruction::get_bx(instr) as i64 + 2) as usize),
        OpCode::ForLoop => Some((pc + 1 - Instruction::get_bx(instr) as i64) as usize),
        OpCode::TForPrep => Some((pc + 1 + Instruction::get_bx(instr) as i64) as usize),
        OpCode::TForLoop => Some((pc + 1 - Instruction::get_bx(instr) as i64) as usize),
        _ => None,
    }
}

/// Re-encode a branch for a new position/target. False when out of range.
fn retarget(instr: &mut u32, pc: usize, target: usize) -> bool {
    let pc = pc as i64;
    let target = target as i64;
    match Instruction::get_opcode(*instr) {
        OpCode::Jmp => {
            let offset = target - (pc + 1);
            if offset < -(Instruction::OFFSET_SJ as i64) || offset > Instruction::OFFSET_SJ as i64
            {
                return false;
            }
            Instruction::set_sj(instr, offset as i32);
            true
        }
        OpCode::ForPrep => {
            let bx = target - pc - 2;
            if bx < 0 || bx > Instruction::MAX_BX as i64 {
                return false;
            }
            Instruction::set_bx(instr, bx as u32);
            true
        }
        OpCode::ForLoop | OpCode::TForLoop => {
            let bx = pc + 1 - target;
            if bx < 0 || bx > Instruction::MAX_BX as i64 {
                return false;
            }
            Instruction::set_bx(instr, bx as u32);
            true
        }
        OpCode::TForPrep => {
            let bx = target - pc - 1;
            if bx < 0 || bx > Instruction::MAX_BX as i64 {
                return false;
            }
            Instruction::set_bx(instr, bx as u32);
            true
        }
        _ => false,
    }
}

fn jump_target_set(code: &[u32]) -> HashSet<usize> {
    let mut targets = HashSet::new();
    for (pc, &instr) in code.iter().enumerate() {
        if let Some(t) = jump_target(instr, pc) {
            targets.insert(t);
        }
    }
    targets
}

/// Successor pcs for reachability analysis.
fn successors(code: &[u32], pc: usize, out: &mut Vec<usize>) {
    let instr = code[pc];
    let op = Instruction::get_opcode(instr);
    use OpCode::*;
    match op {
        Return | Return0 | Return1 | TailCall => {}
        Jmp => {
            if let Some(t) = jump_target(instr, pc) {
                out.push(t);
            }
        }
        ForPrep => {
            out.push(pc + 1);
            if let Some(t) = jump_target(instr, pc) {
                out.push(t);
            }
        }
        ForLoop | TForLoop => {
            out.push(pc + 1);
            if let Some(t) = jump_target(instr, pc) {
                out.push(t);
            }
        }
        TForPrep => {
            if let Some(t) = jump_target(instr, pc) {
                out.push(t);
            }
        }
        _ if pairs_with_next(op) => {
            out.push(pc + 1);
            out.push(pc + 2);
        }
        _ => out.push(pc + 1),
    }
}

/// Drop every instruction whose `keep` flag is false, remapping all branches.
/// Returns None (no change applied) when a kept branch would point into the
/// removed region or an offset stops fitting.
fn apply_removal(chunk: &mut Chunk, keep: &[bool]) -> Option<usize> {
    let removed = keep.iter().filter(|k| !**k).count();
    if removed == 0 {
        return Some(0);
    }
    let mut map = vec![usize::MAX; keep.len() + 1];
    let mut next = 0usize;
    for (old, &k) in keep.iter().enumerate() {
        if k {
            map[old] = next;
            next += 1;
        }
    }
    // One-past-the-end stays addressable for jumps to the implicit end
    map[keep.len()] = next;

    // Validate branch targets first
    for (pc, &instr) in chunk.code.iter().enumerate() {
        if !keep[pc] {
            continue;
        }
        if let Some(t) = jump_target(instr, pc) {
            if t > keep.len() || (t < keep.len() && map[t] == usize::MAX) {
                return None;
            }
        }
    }

    let mut new_code = Vec::with_capacity(next);
    let mut new_lines = Vec::with_capacity(next);
    for (pc, &instr) in chunk.code.iter().enumerate() {
        if !keep[pc] {
            continue;
        }
        let mut instr = instr;
        if let Some(t) = jump_target(instr, pc) {
            if !retarget(&mut instr, map[pc], map[t]) {
                return None;
            }
        }
        new_code.push(instr);
        new_lines.push(chunk.line_info.get(pc).copied().unwrap_or(0));
    }
    chunk.code = new_code;
    chunk.line_info = new_lines;
    Some(removed)
}

// ---- constant folding ----

fn load_for(value: Number, dst: u32, chunk: &mut Chunk) -> u32 {
    match value {
        Number::Int(i) if Instruction::fits_sbx(i) => {
            Instruction::create_asbx(OpCode::LoadI, dst, i as i32)
        }
        Number::Float(f)
            if f.fract() == 0.0 && f.is_finite() && Instruction::fits_sbx(f as i64) =>
        {
            Instruction::create_asbx(OpCode::LoadF, dst, f as i32)
        }
        _ => {
            let value = value.to_value();
            let idx = chunk
                .constants
                .iter()
                .position(|c| match (c, &value) {
                    (LuaValue::Integer(a), LuaValue::Integer(b)) => a == b,
                    (LuaValue::Float(a), LuaValue::Float(b)) => a.to_bits() == b.to_bits(),
                    _ => false,
                })
                .unwrap_or_else(|| {
                    chunk.constants.push(value.clone());
                    chunk.constants.len() - 1
                });
            Instruction::create_abx(OpCode::LoadK, dst, idx as u32)
        }
    }
}

fn arith_op_of(op: OpCode) -> Option<ArithOp> {
    use OpCode::*;
    let a = match op {
        Add | AddK | AddI => ArithOp::Add,
        Sub | SubK => ArithOp::Sub,
        Mul | MulK => ArithOp::Mul,
        Div | DivK => ArithOp::Div,
        IDiv | IDivK => ArithOp::IDiv,
        Mod | ModK => ArithOp::Mod,
        Pow | PowK => ArithOp::Pow,
        BAnd | BAndK => ArithOp::BAnd,
        BOr | BOrK => ArithOp::BOr,
        BXor | BXorK => ArithOp::BXor,
        Shl | ShlI => ArithOp::Shl,
        Shr | ShrI => ArithOp::Shr,
        _ => return None,
    };
    Some(a)
}

fn constant_of(value: &LuaValue) -> Option<Number> {
    match value {
        LuaValue::Integer(i) => Some(Number::Int(*i)),
        LuaValue::Float(f) => Some(Number::Float(*f)),
        _ => None,
    }
}

/// Replace arithmetic over known constants with a direct load. The paired
/// MMBIN fallback becomes a no-op jump for the threading pass to sweep up.
pub(super) fn constant_folding(chunk: &mut Chunk) -> PassStats {
    let mut stats = PassStats::default();
    let targets = jump_target_set(&chunk.code);
    let mut known: HashMap<u32, Number> = HashMap::new();

    let mut pc = 0;
    while pc < chunk.code.len() {
        if targets.contains(&pc) {
            known.clear();
        }
        let instr = chunk.code[pc];
        let op = Instruction::get_opcode(instr);
        let a = Instruction::get_a(instr);
        use OpCode::*;
        match op {
            LoadI => {
                known.insert(a, Number::Int(Instruction::get_sbx(instr) as i64));
            }
            LoadF => {
                known.insert(a, Number::Float(Instruction::get_sbx(instr) as f64));
            }
            LoadK => {
                let idx = Instruction::get_bx(instr) as usize;
                match chunk.constants.get(idx).and_then(constant_of) {
                    Some(n) => {
                        known.insert(a, n);
                    }
                    None => {
                        known.remove(&a);
                    }
                }
            }
            Move => {
                let b = Instruction::get_b(instr);
                match known.get(&b).copied() {
                    Some(n) => {
                        known.insert(a, n);
                    }
                    None => {
                        known.remove(&a);
                    }
                }
            }
            Add | Sub | Mul | Div | IDiv | Mod | Pow | BAnd | BOr | BXor | Shl | Shr | AddK
            | SubK | MulK | DivK | IDivK | ModK | PowK | BAndK | BOrK | BXorK | AddI | ShrI
            | ShlI => {
                let arith = arith_op_of(op).unwrap();
                let b = Instruction::get_b(instr);
                let operands = match op {
                    Add | Sub | Mul | Div | IDiv | Mod | Pow | BAnd | BOr | BXor | Shl | Shr => {
                        let c = Instruction::get_c(instr);
                        known
                            .get(&b)
                            .copied()
                            .zip(known.get(&c).copied())
                    }
                    AddK | SubK | MulK | DivK | IDivK | ModK | PowK | BAndK | BOrK | BXorK => {
                        let idx = Instruction::get_c(instr) as usize;
                        known
                            .get(&b)
                            .copied()
                            .zip(chunk.constants.get(idx).and_then(constant_of))
                    }
                    AddI | ShrI => {
                        let imm = Number::Int(Instruction::get_sc(instr) as i64);
                        known.get(&b).copied().map(|x| (x, imm))
                    }
                    ShlI => {
                        // Immediate is the LEFT operand: sC << R[B]
                        let imm = Number::Int(Instruction::get_sc(instr) as i64);
                        known.get(&b).copied().map(|x| (imm, x))
                    }
                    _ => unreachable!(),
                };
                let folded = operands.and_then(|(x, y)| number_ops::arith(arith, x, y));
                let mmbin_ok = chunk
                    .code
                    .get(pc + 1)
                    .map(|&next| {
                        matches!(
                            Instruction::get_opcode(next),
                            MmBin | MmBinI | MmBinK
                        ) && !targets.contains(&(pc + 1))
                    })
                    .unwrap_or(false);
                match folded {
                    Some(result) if mmbin_ok => {
                        let load = load_for(result, a, chunk);
                        chunk.code[pc] = load;
                        chunk.code[pc + 1] = Instruction::create_sj(OpCode::Jmp, 0);
                        known.insert(a, result);
                        stats.replaced += 1;
                        pc += 2;
                        continue;
                    }
                    _ => {
                        known.remove(&a);
                    }
                }
            }
            Unm => {
                let b = Instruction::get_b(instr);
                match known.get(&b).copied() {
                    Some(n) => {
                        let result = number_ops::negate(n);
                        let load = load_for(result, a, chunk);
                        chunk.code[pc] = load;
                        known.insert(a, result);
                        stats.replaced += 1;
                    }
                    None => {
                        known.remove(&a);
                    }
                }
            }
            MmBin | MmBinI | MmBinK => {
                // Fallback only; its write target was invalidated by the
                // preceding arithmetic instruction
            }
            Jmp if Instruction::get_sj(instr) == 0 => {
                // No-op jump left behind by an earlier rewrite
            }
            Call | TailCall | TForCall | Vararg | Closure => {
                known.clear();
            }
            Jmp | ForPrep | ForLoop | TForPrep | TForLoop | Eq | Lt | Le | EqK | EqI | LtI
            | LeI | GtI | GeI | Test | TestSet | Return | Return0 | Return1 => {
                known.clear();
            }
            LoadNil => {
                let b = Instruction::get_b(instr);
                for r in a..=a + b {
                    known.remove(&r);
                }
            }
            _ => {
                known.remove(&a);
            }
        }
        pc += 1;
    }
    stats
}

// ---- dead code ----

fn pure_load(op: OpCode) -> bool {
    matches!(
        op,
        OpCode::Move
            | OpCode::LoadI
            | OpCode::LoadF
            | OpCode::LoadK
            | OpCode::LoadFalse
            | OpCode::LoadTrue
    )
}

/// Remove instructions unreachable from the entry, plus pure loads whose
/// target register is overwritten before any read.
pub(super) fn dead_code(chunk: &mut Chunk) -> PassStats {
    let mut stats = PassStats::default();
    let n = chunk.code.len();
    if n == 0 {
        return stats;
    }
    let mut reachable = vec![false; n];
    let mut work = vec![0usize];
    let mut succ = Vec::with_capacity(2);
    while let Some(pc) = work.pop() {
        if pc >= n || reachable[pc] {
            continue;
        }
        reachable[pc] = true;
        succ.clear();
        successors(&chunk.code, pc, &mut succ);
        work.extend(succ.iter().copied());
    }

    let targets = jump_target_set(&chunk.code);
    let mut keep = reachable.clone();
    // A pure load immediately overwritten by another pure load to the same
    // register is dead
    for pc in 0..n.saturating_sub(1) {
        if !keep[pc] || !keep[pc + 1] || targets.contains(&(pc + 1)) {
            continue;
        }
        // Never pull an instruction out of a skip/data pair
        if pc > 0 && pairs_with_next(Instruction::get_opcode(chunk.code[pc - 1])) {
            continue;
        }
        let cur = chunk.code[pc];
        let next = chunk.code[pc + 1];
        let (cop, nop) = (
            Instruction::get_opcode(cur),
            Instruction::get_opcode(next),
        );
        if pure_load(cop) && pure_load(nop) && Instruction::get_a(cur) == Instruction::get_a(next)
        {
            // MOVE reads its source; don't drop a value it still needs
            let reads_old = nop == OpCode::Move
                && Instruction::get_b(next) == Instruction::get_a(cur);
            if !reads_old {
                keep[pc] = false;
            }
        }
    }

    match apply_removal(chunk, &keep) {
        Some(removed) => stats.removed += removed,
        None => {}
    }
    stats
}

// ---- peephole ----

/// Does this instruction overwrite `reg` without reading it?
fn overwrites_without_reading(instr: u32, reg: u32) -> bool {
    let op = Instruction::get_opcode(instr);
    pure_load(op)
        && Instruction::get_a(instr) == reg
        && !(op == OpCode::Move && Instruction::get_b(instr) == reg)
}

pub(super) fn peephole(chunk: &mut Chunk) -> PassStats {
    let mut stats = PassStats::default();
    let targets = jump_target_set(&chunk.code);
    let nop = Instruction::create_sj(OpCode::Jmp, 0);
    let n = chunk.code.len();

    // Registers holding a value that is provably a number at this point.
    // `x + 0` is only a copy when x cannot be a numeric string.
    let mut numeric: HashSet<u32> = HashSet::new();

    for pc in 0..n {
        if targets.contains(&pc) {
            numeric.clear();
        }
        let instr = chunk.code[pc];
        let op = Instruction::get_opcode(instr);
        let a = Instruction::get_a(instr);
        match op {
            OpCode::LoadI | OpCode::LoadF => {
                numeric.insert(a);
            }
            OpCode::LoadK => {
                let idx = Instruction::get_bx(instr) as usize;
                let is_number = matches!(
                    chunk.constants.get(idx),
                    Some(LuaValue::Integer(_)) | Some(LuaValue::Float(_))
                );
                if is_number {
                    numeric.insert(a);
                } else {
                    numeric.remove(&a);
                }
            }
            // MOVE onto itself
            OpCode::Move if Instruction::get_a(instr) == Instruction::get_b(instr) => {
                chunk.code[pc] = nop;
                stats.replaced += 1;
            }
            OpCode::Move => {
                let b = Instruction::get_b(instr);
                if numeric.contains(&b) {
                    numeric.insert(a);
                } else {
                    numeric.remove(&a);
                }
                // MOVE A,B ; MOVE C,A ; <overwrite A>  =>  MOVE C,B
                if pc + 2 < n
                    && !targets.contains(&(pc + 1))
                    && !targets.contains(&(pc + 2))
                {
                    let second = chunk.code[pc + 1];
                    if Instruction::get_opcode(second) == OpCode::Move
                        && Instruction::get_b(second) == a
                        && Instruction::get_a(second) != a
                        && overwrites_without_reading(chunk.code[pc + 2], a)
                    {
                        let c = Instruction::get_a(second);
                        chunk.code[pc] = nop;
                        chunk.code[pc + 1] = Instruction::create_abc(OpCode::Move, c, b, 0);
                        stats.replaced += 1;
                    }
                }
            }
            // ADDI with immediate 0 over a known number is a MOVE
            OpCode::AddI if Instruction::get_sc(instr) == 0 => {
                let b = Instruction::get_b(instr);
                if numeric.contains(&b) {
                    chunk.code[pc] = if a == b {
                        nop
                    } else {
                        Instruction::create_abc(OpCode::Move, a, b, 0)
                    };
                    if let Some(&next) = chunk.code.get(pc + 1) {
                        if Instruction::get_opcode(next) == OpCode::MmBinI
                            && !targets.contains(&(pc + 1))
                        {
                            chunk.code[pc + 1] = nop;
                        }
                    }
                    numeric.insert(a);
                    stats.replaced += 1;
                } else {
                    numeric.remove(&a);
                }
            }
            // Any call scrambles registers; other writes lose numeric-ness
            OpCode::Call | OpCode::TailCall | OpCode::TForCall | OpCode::Vararg => {
                numeric.clear();
            }
            _ => {
                numeric.remove(&a);
            }
        }
    }
    stats
}

// ---- jump threading ----

pub(super) fn jump_threading(chunk: &mut Chunk) -> PassStats {
    let mut stats = PassStats::default();
    let n = chunk.code.len();

    // Collapse JMP -> JMP chains
    for pc in 0..n {
        let instr = chunk.code[pc];
        if jump_target(instr, pc).is_none() {
            continue;
        }
        let mut target = jump_target(instr, pc).unwrap();
        let mut hops = 0;
        while hops < 8 && target < n {
            let t_instr = chunk.code[target];
            if Instruction::get_opcode(t_instr) != OpCode::Jmp {
                break;
            }
            let next = match jump_target(t_instr, target) {
                Some(t) if t != target => t,
                _ => break,
            };
            target = next;
            hops += 1;
        }
        if hops > 0 {
            let mut updated = instr;
            if retarget(&mut updated, pc, target) {
                chunk.code[pc] = updated;
                stats.replaced += 1;
            }
        }
    }

    // Remove no-op jumps that are not the skip-slot of a pairing instruction
    let mut keep = vec![true; n];
    for pc in 0..n {
        let instr = chunk.code[pc];
        if Instruction::get_opcode(instr) == OpCode::Jmp && Instruction::get_sj(instr) == 0 {
            let protected = pc > 0
                && pairs_with_next(Instruction::get_opcode(chunk.code[pc - 1]));
            if !protected {
                keep[pc] = false;
            }
        }
    }
    if let Some(removed) = apply_removal(chunk, &keep) {
        stats.removed += removed;
    }
    stats
}

// ---- tail calls ----

/// `CALL a b 0 ; RETURN a 0` becomes `TAILCALL a b 0`; the RETURN goes away.
pub(super) fn tail_calls(chunk: &mut Chunk) -> PassStats {
    let mut stats = PassStats::default();
    let n = chunk.code.len();
    let targets = jump_target_set(&chunk.code);
    let mut keep = vec![true; n];
    let mut converted = false;

    for pc in 0..n.saturating_sub(1) {
        let call = chunk.code[pc];
        let ret = chunk.code[pc + 1];
        if Instruction::get_opcode(call) != OpCode::Call
            || Instruction::get_opcode(ret) != OpCode::Return
        {
            continue;
        }
        if targets.contains(&(pc + 1)) {
            continue;
        }
        let a = Instruction::get_a(call);
        // The return must forward exactly the call's open result list, with
        // no to-be-closed work pending
        if Instruction::get_c(call) != 0
            || Instruction::get_a(ret) != a
            || Instruction::get_b(ret) != 0
            || Instruction::get_k(ret)
        {
            continue;
        }
        chunk.code[pc] = Instruction::create_abc(OpCode::TailCall, a, Instruction::get_b(call), 0);
        keep[pc + 1] = false;
        converted = true;
        stats.replaced += 1;
    }

    if converted {
        match apply_removal(chunk, &keep) {
            Some(removed) => stats.removed += removed,
            None => {}
        }
    }
    stats
}

// ---- register compaction ----

/// Highest register the instruction touches, or None when it consumes an
/// open-ended window (stack-top dependent).
fn max_register(instr: u32) -> Option<Option<u32>> {
    use OpCode::*;
    let op = Instruction::get_opcode(instr);
    let a = Instruction::get_a(instr);
    let b = Instruction::get_b(instr);
    let c = Instruction::get_c(instr);
    let m = match op {
        Move | Unm | BNot | Not | Len | GetI | AddI | ShrI | ShlI | AddK | SubK | MulK | DivK
        | IDivK | ModK | PowK | BAndK | BOrK | BXorK | GetField | MmBin => a.max(b),
        LoadI | LoadF | LoadK | LoadKX | LoadFalse | LFalseSkip | LoadTrue | GetUpval
        | SetUpval | GetTabUp | NewTable | Closure | VarargPrep | Tbc | Close | MmBinI
        | MmBinK | EqK | EqI | LtI | LeI | GtI | GeI | Test | Return1 => a,
        LoadNil => a + b,
        SetTabUp => c,
        GetTable | SetTable | Add | Sub | Mul | Div | IDiv | Mod | Pow | BAnd | BOr | BXor
        | Shl | Shr => a.max(b).max(c),
        SetI | SetField => a.max(c),
        Self_ => (a + 1).max(b).max(if Instruction::get_k(instr) { 0 } else { c }),
        Concat => a + b.saturating_sub(1),
        Eq | Lt | Le | TestSet => a.max(b),
        Jmp | Return0 | ExtraArg => 0,
        Call => {
            if b == 0 || c == 0 {
                return Some(None);
            }
            a + b.saturating_sub(1).max(c.saturating_sub(1))
        }
        TailCall => {
            if b == 0 {
                return Some(None);
            }
            a + b.saturating_sub(1)
        }
        Return => {
            if b == 0 {
                return Some(None);
            }
            a + b.saturating_sub(2).min(b)
        }
        ForLoop | ForPrep | TForPrep => a + 3,
        // The iterator call copies fn/state/control up to A+4..A+6 before
        // writing C results at A+4
        TForCall => (a + 6).max(a + 3 + c),
        TForLoop => a + 2,
        SetList => {
            if b == 0 {
                return Some(None);
            }
            a + b
        }
        Vararg => {
            if c == 0 {
                return Some(None);
            }
            a + c.saturating_sub(2)
        }
    };
    Some(Some(m))
}

/// Lower the declared stack size to what the code actually touches. Codegen
/// allocates registers densely, so renumbering reduces to tightening the
/// metadata; open-window instructions keep the declared size as-is.
pub(super) fn register_compaction(chunk: &mut Chunk) -> PassStats {
    let mut stats = PassStats::default();
    let mut max_reg = 0u32;
    for &instr in &chunk.code {
        match max_register(instr) {
            Some(Some(m)) => max_reg = max_reg.max(m),
            Some(None) => return stats,
            None => unreachable!(),
        }
    }
    let needed = ((max_reg + 1).max(chunk.param_count as u32 + 1) + 1).min(255) as u8;
    if needed < chunk.max_stack_size {
        chunk.max_stack_size = needed;
        stats.replaced += 1;
    }
    stats
}
