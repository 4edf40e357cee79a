// Prototype validator: every register, constant index, jump target and
// upvalue slot an instruction names must be in range. Runs over the whole
// prototype tree.

use super::{Instruction, OpCode};
use crate::lua_value::Chunk;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateError {
    pub pc: usize,
    pub message: String,
}

impl std::fmt::Display for ValidateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.pc, self.message)
    }
}

pub fn validate_chunk(chunk: &Chunk) -> Result<(), Vec<ValidateError>> {
    let mut errors = Vec::new();
    validate_one(chunk, &mut errors);
    for child in &chunk.child_protos {
        if let Err(mut child_errors) = validate_chunk(child) {
            errors.append(&mut child_errors);
        }
    }
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn validate_one(chunk: &Chunk, errors: &mut Vec<ValidateError>) {
    let stack = chunk.max_stack_size as u32;
    let nconsts = chunk.constants.len() as u32;
    let nups = chunk.upvalue_descs.len() as u32;
    let nprotos = chunk.child_protos.len() as u32;
    let len = chunk.code.len();

    let mut check = |pc: usize, ok: bool, message: String| {
        if !ok {
            errors.push(ValidateError { pc, message });
        }
    };

    for (pc, &instr) in chunk.code.iter().enumerate() {
        let op = Instruction::get_opcode(instr);
        let a = Instruction::get_a(instr);
        let b = Instruction::get_b(instr);
        let c = Instruction::get_c(instr);
        let k = Instruction::get_k(instr);

        let reg = |r: u32| r < stack;
        let konst = |i: u32| i < nconsts;

        use OpCode::*;
        match op {
            Move => {
                check(pc, reg(a) && reg(b), format!("MOVE registers {} {} out of range", a, b));
            }
            LoadI | LoadF | LoadFalse | LFalseSkip | LoadTrue | Test | Tbc | Close | Return1
            | VarargPrep => {
                check(pc, reg(a), format!("register {} out of range", a));
            }
            LoadK => {
                check(pc, reg(a), format!("register {} out of range", a));
                check(
                    pc,
                    konst(Instruction::get_bx(instr)),
                    format!("constant {} out of range", Instruction::get_bx(instr)),
                );
            }
            LoadKX => {
                check(pc, reg(a), format!("register {} out of range", a));
                let next = chunk.code.get(pc + 1).copied();
                let valid = next
                    .map(|n| {
                        Instruction::get_opcode(n) == ExtraArg
                            && konst(Instruction::get_ax(n))
                    })
                    .unwrap_or(false);
                check(pc, valid, "LOADKX without valid EXTRAARG".to_string());
            }
            LoadNil => {
                check(pc, reg(a + b), format!("LOADNIL range {}..{} out of range", a, a + b));
            }
            GetUpval | SetUpval => {
                check(pc, reg(a), format!("register {} out of range", a));
                check(pc, b < nups, format!("upvalue {} out of range", b));
            }
            GetTabUp => {
                check(pc, reg(a), format!("register {} out of range", a));
                check(pc, b < nups, format!("upvalue {} out of range", b));
                check(pc, konst(c), format!("constant {} out of range", c));
            }
            SetTabUp => {
                check(pc, a < nups, format!("upvalue {} out of range", a));
                check(pc, konst(b), format!("constant {} out of range", b));
                check(pc, reg(c), format!("register {} out of range", c));
            }
            GetTable => {
                check(pc, reg(a) && reg(b) && reg(c), "GETTABLE register out of range".to_string());
            }
            SetTable => {
                check(pc, reg(a) && reg(b) && reg(c), "SETTABLE register out of range".to_string());
            }
            GetI => {
                check(pc, reg(a) && reg(b), "GETI register out of range".to_string());
            }
            SetI => {
                check(pc, reg(a) && reg(c), "SETI register out of range".to_string());
            }
            GetField => {
                check(pc, reg(a) && reg(b), "GETFIELD register out of range".to_string());
                check(pc, konst(c), format!("constant {} out of range", c));
            }
            SetField => {
                check(pc, reg(a) && reg(c), "SETFIELD register out of range".to_string());
                check(pc, konst(b), format!("constant {} out of range", b));
            }
            NewTable => {
                check(pc, reg(a), format!("register {} out of range", a));
            }
            Self_ => {
                check(pc, reg(a + 1) && reg(b), "SELF register out of range".to_string());
                if k {
                    check(pc, konst(c), format!("constant {} out of range", c));
                } else {
                    check(pc, reg(c), format!("register {} out of range", c));
                }
            }
            AddI | ShrI | ShlI => {
                check(pc, reg(a) && reg(b), "immediate-arith register out of range".to_string());
            }
            AddK | SubK | MulK | ModK | PowK | DivK | IDivK | BAndK | BOrK | BXorK => {
                check(pc, reg(a) && reg(b), "K-arith register out of range".to_string());
                check(pc, konst(c), format!("constant {} out of range", c));
            }
            Add | Sub | Mul | Mod | Pow | Div | IDiv | BAnd | BOr | BXor | Shl | Shr => {
                check(pc, reg(a) && reg(b) && reg(c), "arith register out of range".to_string());
            }
            MmBin => {
                check(pc, reg(a) && reg(b), "MMBIN register out of range".to_string());
                check(pc, pc > 0, "MMBIN without preceding instruction".to_string());
            }
            MmBinI => {
                check(pc, reg(a), format!("register {} out of range", a));
                check(pc, pc > 0, "MMBINI without preceding instruction".to_string());
            }
            MmBinK => {
                check(pc, reg(a), format!("register {} out of range", a));
                check(pc, konst(b), format!("constant {} out of range", b));
                check(pc, pc > 0, "MMBINK without preceding instruction".to_string());
            }
            Unm | BNot | Not | Len => {
                check(pc, reg(a) && reg(b), "unary register out of range".to_string());
            }
            Concat => {
                check(
                    pc,
                    b >= 1 && reg(a + b - 1),
                    format!("CONCAT range {}..{} out of range", a, a + b),
                );
            }
            Jmp => {
                let target = pc as i64 + 1 + Instruction::get_sj(instr) as i64;
                check(
                    pc,
                    target >= 0 && target <= len as i64,
                    format!("jump target {} out of range", target),
                );
            }
            Eq | Lt | Le | TestSet => {
                check(pc, reg(a) && reg(b), "comparison register out of range".to_string());
            }
            EqK => {
                check(pc, reg(a), format!("register {} out of range", a));
                check(pc, konst(b), format!("constant {} out of range", b));
            }
            EqI | LtI | LeI | GtI | GeI => {
                check(pc, reg(a), format!("register {} out of range", a));
            }
            Call => {
                check(pc, reg(a), format!("register {} out of range", a));
                if b > 0 {
                    check(pc, reg(a + b - 1), "CALL argument window out of range".to_string());
                }
            }
            TailCall => {
                check(pc, reg(a), format!("register {} out of range", a));
                if b > 0 {
                    check(pc, reg(a + b - 1), "TAILCALL argument window out of range".to_string());
                }
            }
            Return => {
                if b > 0 {
                    check(
                        pc,
                        b < 2 || reg(a + b - 2),
                        "RETURN window out of range".to_string(),
                    );
                } else {
                    check(pc, reg(a), format!("register {} out of range", a));
                }
            }
            Return0 => {}
            ForLoop | ForPrep => {
                check(pc, reg(a + 3), "numeric-for window out of range".to_string());
                let target = match op {
                    ForPrep => pc as i64 + Instruction::get_bx(instr) as i64 + 2,
                    _ => pc as i64 + 1 - Instruction::get_bx(instr) as i64,
                };
                check(
                    pc,
                    target >= 0 && target <= len as i64,
                    format!("loop target {} out of range", target),
                );
            }
            TForPrep => {
                check(pc, reg(a + 3), "generic-for window out of range".to_string());
                let target = pc as i64 + 1 + Instruction::get_bx(instr) as i64;
                check(
                    pc,
                    target >= 0 && target <= len as i64,
                    format!("loop target {} out of range", target),
                );
            }
            TForCall => {
                check(
                    pc,
                    reg((a + 6).max(a + 3 + c)),
                    "TFORCALL window out of range".to_string(),
                );
            }
            TForLoop => {
                check(pc, reg(a + 2), "TFORLOOP window out of range".to_string());
                let target = pc as i64 + 1 - Instruction::get_bx(instr) as i64;
                check(
                    pc,
                    target >= 0 && target <= len as i64,
                    format!("loop target {} out of range", target),
                );
            }
            SetList => {
                check(pc, reg(a), format!("register {} out of range", a));
                if b > 0 {
                    check(pc, reg(a + b), "SETLIST window out of range".to_string());
                }
            }
            Closure => {
                check(pc, reg(a), format!("register {} out of range", a));
                check(
                    pc,
                    Instruction::get_bx(instr) < nprotos,
                    format!("child prototype {} out of range", Instruction::get_bx(instr)),
                );
            }
            Vararg => {
                check(pc, reg(a), format!("register {} out of range", a));
                if c >= 2 {
                    check(pc, reg(a + c - 2), "VARARG window out of range".to_string());
                }
            }
            ExtraArg => {}
        }
    }

    // Every closure upvalue descriptor must address a valid parent slot;
    // checked per-child against this prototype's limits
    for (i, desc) in chunk.upvalue_descs.iter().enumerate() {
        if !desc.in_stack && desc.index as u32 >= nups.max(1) && nups > 0 {
            errors.push(ValidateError {
                pc: 0,
                message: format!("upvalue descriptor {} out of range", i),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_register() {
        let mut chunk = Chunk::new();
        chunk.max_stack_size = 2;
        chunk.code.push(Instruction::create_abc(OpCode::Move, 10, 0, 0));
        chunk.code.push(Instruction::create_abc(OpCode::Return0, 0, 0, 0));
        assert!(validate_chunk(&chunk).is_err());
    }

    #[test]
    fn test_rejects_bad_constant() {
        let mut chunk = Chunk::new();
        chunk.max_stack_size = 4;
        chunk.code.push(Instruction::create_abx(OpCode::LoadK, 0, 5));
        chunk.code.push(Instruction::create_abc(OpCode::Return0, 0, 0, 0));
        assert!(validate_chunk(&chunk).is_err());
    }

    #[test]
    fn test_rejects_bad_jump() {
        let mut chunk = Chunk::new();
        chunk.max_stack_size = 4;
        chunk.code.push(Instruction::create_sj(OpCode::Jmp, 100));
        chunk.code.push(Instruction::create_abc(OpCode::Return0, 0, 0, 0));
        assert!(validate_chunk(&chunk).is_err());
    }

    #[test]
    fn test_accepts_minimal_chunk() {
        let mut chunk = Chunk::new();
        chunk.max_stack_size = 2;
        chunk.code.push(Instruction::create_abc(OpCode::Return0, 0, 0, 0));
        assert!(validate_chunk(&chunk).is_ok());
    }
}
