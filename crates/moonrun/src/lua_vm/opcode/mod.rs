mod disasm;
mod instruction;
mod validate;

pub use disasm::disassemble;
pub use instruction::Instruction;
pub use validate::{ValidateError, validate_chunk};

/// Instruction format modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    IABC,
    IABx,
    IAsBx,
    IAx,
    IsJ,
}

/// Complete Lua 5.5 opcode set (83 opcodes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    // Load/Move operations
    Move = 0,   // R[A] := R[B]
    LoadI,      // R[A] := sBx
    LoadF,      // R[A] := (float)sBx
    LoadK,      // R[A] := K[Bx]
    LoadKX,     // R[A] := K[extra arg]
    LoadFalse,  // R[A] := false
    LFalseSkip, // R[A] := false; pc++
    LoadTrue,   // R[A] := true
    LoadNil,    // R[A], R[A+1], ..., R[A+B] := nil

    // Upvalue operations
    GetUpval, // R[A] := UpValue[B]
    SetUpval, // UpValue[B] := R[A]

    // Table get operations
    GetTabUp, // R[A] := UpValue[B][K[C]:string]
    GetTable, // R[A] := R[B][R[C]]
    GetI,     // R[A] := R[B][C]
    GetField, // R[A] := R[B][K[C]:string]

    // Table set operations
    SetTabUp, // UpValue[A][K[B]:string] := RK(C)
    SetTable, // R[A][R[B]] := RK(C)
    SetI,     // R[A][B] := RK(C)
    SetField, // R[A][K[B]:string] := RK(C)

    // Table creation
    NewTable, // R[A] := {} (B: hash hint, C: array hint; followed by EXTRAARG)

    // Self call
    Self_, // R[A+1] := R[B]; R[A] := R[B][RK(C):string]

    // Arithmetic with immediate/constant
    AddI,  // R[A] := R[B] + sC
    AddK,  // R[A] := R[B] + K[C]:number
    SubK,  // R[A] := R[B] - K[C]:number
    MulK,  // R[A] := R[B] * K[C]:number
    ModK,  // R[A] := R[B] % K[C]:number
    PowK,  // R[A] := R[B] ^ K[C]:number
    DivK,  // R[A] := R[B] / K[C]:number
    IDivK, // R[A] := R[B] // K[C]:number

    // Bitwise with constant
    BAndK, // R[A] := R[B] & K[C]:integer
    BOrK,  // R[A] := R[B] | K[C]:integer
    BXorK, // R[A] := R[B] ~ K[C]:integer

    // Shift with immediate
    ShrI, // R[A] := R[B] >> sC
    ShlI, // R[A] := sC << R[B]

    // Arithmetic operations (register-register)
    Add,  // R[A] := R[B] + R[C]
    Sub,  // R[A] := R[B] - R[C]
    Mul,  // R[A] := R[B] * R[C]
    Mod,  // R[A] := R[B] % R[C]
    Pow,  // R[A] := R[B] ^ R[C]
    Div,  // R[A] := R[B] / R[C]
    IDiv, // R[A] := R[B] // R[C]

    // Bitwise operations (register-register)
    BAnd, // R[A] := R[B] & R[C]
    BOr,  // R[A] := R[B] | R[C]
    BXor, // R[A] := R[B] ~ R[C]
    Shl,  // R[A] := R[B] << R[C]
    Shr,  // R[A] := R[B] >> R[C]

    // Metamethod binary operations
    MmBin,  // call metamethod C over R[A] and R[B]
    MmBinI, // call metamethod C over R[A] and sB
    MmBinK, // call metamethod C over R[A] and K[B]

    // Unary operations
    Unm,  // R[A] := -R[B]
    BNot, // R[A] := ~R[B]
    Not,  // R[A] := not R[B]
    Len,  // R[A] := #R[B]

    // Concatenation
    Concat, // R[A] := R[A].. ... ..R[A + B - 1]

    // Upvalue management
    Close, // close all upvalues and TBC slots >= R[A]
    Tbc,   // mark variable A "to be closed"

    // Jump
    Jmp, // pc += sJ

    // Comparison operations
    Eq, // if ((R[A] == R[B]) ~= k) then pc++
    Lt, // if ((R[A] <  R[B]) ~= k) then pc++
    Le, // if ((R[A] <= R[B]) ~= k) then pc++

    // Comparison with constant/immediate
    EqK, // if ((R[A] == K[B]) ~= k) then pc++
    EqI, // if ((R[A] == sB) ~= k) then pc++
    LtI, // if ((R[A] < sB) ~= k) then pc++
    LeI, // if ((R[A] <= sB) ~= k) then pc++
    GtI, // if ((R[A] > sB) ~= k) then pc++
    GeI, // if ((R[A] >= sB) ~= k) then pc++

    // Test operations
    Test,    // if (not R[A] == k) then pc++
    TestSet, // if (not R[B] == k) then pc++ else R[A] := R[B]

    // Call operations
    Call,     // R[A], ... ,R[A+C-2] := R[A](R[A+1], ... ,R[A+B-1])
    TailCall, // return R[A](R[A+1], ... ,R[A+B-1])

    // Return operations
    Return,  // return R[A], ... ,R[A+B-2]
    Return0, // return
    Return1, // return R[A]

    // Numeric for loops
    ForLoop, // update counters; if loop continues then pc -= Bx
    ForPrep, // check values and prepare counters; if not to run then pc += Bx+1

    // Generic for loops
    TForPrep, // mark R[A+3] to-be-closed; pc += Bx
    TForCall, // R[A+4], ... ,R[A+3+C] := R[A](R[A+1], R[A+2])
    TForLoop, // if R[A+2] ~= nil then { R[A] := R[A+2]; pc -= Bx }

    // Table list initialization
    SetList, // R[A][C+i] := R[A+i], 1 <= i <= B

    // Closure creation
    Closure, // R[A] := closure(KPROTO[Bx])

    // Vararg operations
    Vararg,     // R[A], R[A+1], ..., R[A+C-2] := vararg
    VarargPrep, // adjust varargs at function entry

    // Extra argument for preceding instruction
    ExtraArg, // Ax
}

pub const OPCODE_COUNT: u8 = OpCode::ExtraArg as u8 + 1;

impl OpCode {
    #[inline(always)]
    pub fn from_u8(byte: u8) -> OpCode {
        debug_assert!(byte < OPCODE_COUNT);
        // Every value below OPCODE_COUNT is a valid discriminant
        unsafe { std::mem::transmute(byte) }
    }

    pub fn try_from_u8(byte: u8) -> Option<OpCode> {
        if byte < OPCODE_COUNT {
            Some(Self::from_u8(byte))
        } else {
            None
        }
    }

    pub fn get_mode(self) -> OpMode {
        use OpCode::*;
        match self {
            LoadK | LoadKX | ForLoop | ForPrep | TForPrep | TForLoop | Closure => OpMode::IABx,
            LoadI | LoadF => OpMode::IAsBx,
            ExtraArg => OpMode::IAx,
            Jmp => OpMode::IsJ,
            _ => OpMode::IABC,
        }
    }

    pub fn name(self) -> &'static str {
        use OpCode::*;
        match self {
            Move => "MOVE",
            LoadI => "LOADI",
            LoadF => "LOADF",
            LoadK => "LOADK",
            LoadKX => "LOADKX",
            LoadFalse => "LOADFALSE",
            LFalseSkip => "LFALSESKIP",
            LoadTrue => "LOADTRUE",
            LoadNil => "LOADNIL",
            GetUpval => "GETUPVAL",
            SetUpval => "SETUPVAL",
            GetTabUp => "GETTABUP",
            GetTable => "GETTABLE",
            GetI => "GETI",
            GetField => "GETFIELD",
            SetTabUp => "SETTABUP",
            SetTable => "SETTABLE",
            SetI => "SETI",
            SetField => "SETFIELD",
            NewTable => "NEWTABLE",
            Self_ => "SELF",
            AddI => "ADDI",
            AddK => "ADDK",
            SubK => "SUBK",
            MulK => "MULK",
            ModK => "MODK",
            PowK => "POWK",
            DivK => "DIVK",
            IDivK => "IDIVK",
            BAndK => "BANDK",
            BOrK => "BORK",
            BXorK => "BXORK",
            ShrI => "SHRI",
            ShlI => "SHLI",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Mod => "MOD",
            Pow => "POW",
            Div => "DIV",
            IDiv => "IDIV",
            BAnd => "BAND",
            BOr => "BOR",
            BXor => "BXOR",
            Shl => "SHL",
            Shr => "SHR",
            MmBin => "MMBIN",
            MmBinI => "MMBINI",
            MmBinK => "MMBINK",
            Unm => "UNM",
            BNot => "BNOT",
            Not => "NOT",
            Len => "LEN",
            Concat => "CONCAT",
            Close => "CLOSE",
            Tbc => "TBC",
            Jmp => "JMP",
            Eq => "EQ",
            Lt => "LT",
            Le => "LE",
            EqK => "EQK",
            EqI => "EQI",
            LtI => "LTI",
            LeI => "LEI",
            GtI => "GTI",
            GeI => "GEI",
            Test => "TEST",
            TestSet => "TESTSET",
            Call => "CALL",
            TailCall => "TAILCALL",
            Return => "RETURN",
            Return0 => "RETURN0",
            Return1 => "RETURN1",
            ForLoop => "FORLOOP",
            ForPrep => "FORPREP",
            TForPrep => "TFORPREP",
            TForCall => "TFORCALL",
            TForLoop => "TFORLOOP",
            SetList => "SETLIST",
            Closure => "CLOSURE",
            Vararg => "VARARG",
            VarargPrep => "VARARGPREP",
            ExtraArg => "EXTRAARG",
        }
    }
}
