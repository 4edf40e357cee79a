// Textual disassembler for prototypes, for diagnostics and dumps.

use super::{Instruction, OpCode, OpMode};
use crate::lua_value::{Chunk, LuaValue};

/// Render a prototype (and its nested prototypes) as a listing.
pub fn disassemble(chunk: &Chunk) -> String {
    let mut out = String::new();
    disassemble_into(chunk, &mut out, 0);
    out
}

fn disassemble_into(chunk: &Chunk, out: &mut String, depth: usize) {
    use std::fmt::Write;

    let indent = "  ".repeat(depth);
    let kind = if chunk.line_defined == 0 { "main" } else { "function" };
    let _ = writeln!(
        out,
        "{}{} <{}:{}> ({} instructions, {} constants, {} upvalues, stack {})",
        indent,
        kind,
        chunk.source_name,
        chunk.line_defined,
        chunk.code.len(),
        chunk.constants.len(),
        chunk.upvalue_descs.len(),
        chunk.max_stack_size,
    );

    for (pc, &instr) in chunk.code.iter().enumerate() {
        let op = Instruction::get_opcode(instr);
        let line = chunk.line_at(pc);
        let operands = render_operands(chunk, instr, pc);
        let _ = writeln!(
            out,
            "{}  [{:>4}] {:<12} {}{}",
            indent,
            pc,
            op.name(),
            operands,
            if line > 0 { format!("  ; line {}", line) } else { String::new() },
        );
    }

    if !chunk.constants.is_empty() {
        let _ = writeln!(out, "{}  constants:", indent);
        for (i, constant) in chunk.constants.iter().enumerate() {
            let _ = writeln!(out, "{}    [{}] {}", indent, i, render_constant(constant));
        }
    }

    for child in &chunk.child_protos {
        disassemble_into(child, out, depth + 1);
    }
}

fn render_constant(value: &LuaValue) -> String {
    match value {
        LuaValue::String(s) => format!("{:?}", s.as_str()),
        other => format!("{:?}", other),
    }
}

fn render_operands(chunk: &Chunk, instr: u32, pc: usize) -> String {
    let op = Instruction::get_opcode(instr);
    let a = Instruction::get_a(instr);
    let b = Instruction::get_b(instr);
    let c = Instruction::get_c(instr);
    let k = Instruction::get_k(instr);

    match op.get_mode() {
        OpMode::IABx => {
            let bx = Instruction::get_bx(instr);
            match op {
                OpCode::LoadK => {
                    let comment = chunk
                        .constants
                        .get(bx as usize)
                        .map(|v| format!("  ; {}", render_constant(v)))
                        .unwrap_or_default();
                    format!("{} {}{}", a, bx, comment)
                }
                OpCode::ForPrep => format!("{} {}  ; exit -> {}", a, bx, pc + bx as usize + 2),
                OpCode::ForLoop | OpCode::TForLoop => {
                    format!("{} {}  ; back -> {}", a, bx, pc + 1 - bx as usize)
                }
                OpCode::TForPrep => format!("{} {}  ; -> {}", a, bx, pc + 1 + bx as usize),
                OpCode::Closure => format!("{} {}  ; proto {}", a, bx, bx),
                _ => format!("{} {}", a, bx),
            }
        }
        OpMode::IAsBx => format!("{} {}", a, Instruction::get_sbx(instr)),
        OpMode::IAx => format!("{}", Instruction::get_ax(instr)),
        OpMode::IsJ => {
            let sj = Instruction::get_sj(instr);
            format!("{}  ; -> {}", sj, pc as i64 + 1 + sj as i64)
        }
        OpMode::IABC => {
            let flag = if k { " k" } else { "" };
            match op {
                OpCode::GetField | OpCode::GetTabUp | OpCode::AddK | OpCode::SubK
                | OpCode::MulK | OpCode::ModK | OpCode::PowK | OpCode::DivK | OpCode::IDivK
                | OpCode::BAndK | OpCode::BOrK | OpCode::BXorK => {
                    let comment = chunk
                        .constants
                        .get(c as usize)
                        .map(|v| format!("  ; {}", render_constant(v)))
                        .unwrap_or_default();
                    format!("{} {} {}{}{}", a, b, c, flag, comment)
                }
                OpCode::SetTabUp | OpCode::SetField | OpCode::EqK => {
                    let comment = chunk
                        .constants
                        .get(b as usize)
                        .map(|v| format!("  ; {}", render_constant(v)))
                        .unwrap_or_default();
                    format!("{} {} {}{}{}", a, b, c, flag, comment)
                }
                OpCode::AddI | OpCode::ShrI | OpCode::ShlI => {
                    format!("{} {} {}{}", a, b, Instruction::get_sc(instr), flag)
                }
                OpCode::EqI | OpCode::LtI | OpCode::LeI | OpCode::GtI | OpCode::GeI => {
                    format!("{} {}{}", a, Instruction::get_sb(instr), flag)
                }
                _ => format!("{} {} {}{}", a, b, c, flag),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disassemble_minimal() {
        let mut chunk = Chunk::new();
        chunk.code.push(Instruction::create_asbx(OpCode::LoadI, 0, 42));
        chunk.line_info.push(1);
        chunk.code.push(Instruction::create_abc(OpCode::Return1, 0, 0, 0));
        chunk.line_info.push(1);
        let text = disassemble(&chunk);
        assert!(text.contains("LOADI"));
        assert!(text.contains("RETURN1"));
    }
}
