// Optimizer tests: each pass in isolation, level gating, and semantic
// preservation across every level.

use std::rc::Rc;

use crate::compiler::Compiler;
use crate::lua_vm::opcode::{Instruction, validate_chunk};
use crate::lua_vm::{LuaVM, OpCode, VmOptions};
use crate::optimizer::{OptLevel, Optimizer};

fn unoptimized(source: &str) -> crate::lua_value::Chunk {
    Compiler::compile_with_level(source, "test", OptLevel::None).unwrap()
}

fn count_op(chunk: &crate::lua_value::Chunk, op: OpCode) -> usize {
    let own = chunk
        .code
        .iter()
        .filter(|&&i| Instruction::get_opcode(i) == op)
        .count();
    own + chunk
        .child_protos
        .iter()
        .map(|c| count_op(c, op))
        .sum::<usize>()
}

#[test]
fn test_constant_folding_replaces_arithmetic() {
    let chunk = unoptimized("return 2 + 3 * 4");
    let mut optimizer = Optimizer::new(OptLevel::Basic);
    let optimized = optimizer.optimize(chunk);
    assert!(optimizer.report().constant_folding.replaced > 0);
    // The arithmetic is gone; a plain load feeds the return
    assert_eq!(count_op(&optimized, OpCode::Add), 0);
    assert_eq!(count_op(&optimized, OpCode::AddI), 0);
    assert_eq!(count_op(&optimized, OpCode::Mul), 0);
    assert!(validate_chunk(&optimized).is_ok());
}

#[test]
fn test_folding_respects_numeric_subtypes() {
    let mut vm = vm_at(OptLevel::Aggressive);
    vm.execute_string(
        r#"
        assert(math.type(2 + 3) == 'integer')
        assert(2 / 4 == 0.5)
        assert(math.type(2 * 1.5) == 'float')
        assert(2^2 == 4.0)
    "#,
    )
    .unwrap();
}

#[test]
fn test_folding_never_removes_errors() {
    // Integer division by zero must still raise at runtime
    let mut vm = vm_at(OptLevel::Aggressive);
    assert!(vm.execute_string("return 1 // 0").is_err());
    let mut vm = vm_at(OptLevel::Aggressive);
    assert!(vm.execute_string("return 1 % 0").is_err());
}

#[test]
fn test_dead_code_elimination() {
    let chunk = unoptimized("do return 1 end return 2");
    let mut optimizer = Optimizer::new(OptLevel::Standard);
    let optimized = optimizer.optimize(chunk);
    assert!(optimizer.report().dead_code.removed > 0);
    assert!(validate_chunk(&optimized).is_ok());
}

#[test]
fn test_jump_threading_removes_noop_jumps() {
    // Folding leaves JMP +0 placeholders behind; threading sweeps them
    let chunk = unoptimized("return 1 + 2");
    let mut optimizer = Optimizer::new(OptLevel::Basic);
    let optimized = optimizer.optimize(chunk);
    let noops = optimized
        .code
        .iter()
        .filter(|&&i| {
            Instruction::get_opcode(i) == OpCode::Jmp && Instruction::get_sj(i) == 0
        })
        .count();
    assert_eq!(noops, 0);
    assert!(optimizer.report().jump_threading.removed > 0);
}

#[test]
fn test_tail_call_conversion() {
    let chunk = unoptimized("local function f(n) if n == 0 then return 'x' end return f(n - 1) end return f(3)");
    assert_eq!(count_op(&chunk, OpCode::TailCall), 0);
    let mut optimizer = Optimizer::new(OptLevel::Standard);
    let optimized = optimizer.optimize(chunk);
    assert!(optimizer.report().tail_calls.replaced > 0);
    assert!(count_op(&optimized, OpCode::TailCall) > 0);
    assert!(validate_chunk(&optimized).is_ok());
}

#[test]
fn test_tail_calls_bound_stack_depth() {
    // Deep tail recursion would blow the 200-frame limit without the
    // conversion
    let mut vm = vm_at(OptLevel::Standard);
    vm.execute_string(
        r#"
        local function countdown(n)
            if n == 0 then return 'done' end
            return countdown(n - 1)
        end
        assert(countdown(10000) == 'done')
    "#,
    )
    .unwrap();
}

#[test]
fn test_register_compaction_lowers_stack_metadata() {
    let chunk = unoptimized("return 1 + 2 + 3 + 4 + 5 + 6");
    let before = chunk.max_stack_size;
    let mut optimizer = Optimizer::new(OptLevel::Standard);
    let optimized = optimizer.optimize(chunk);
    assert!(optimized.max_stack_size <= before);
    assert!(validate_chunk(&optimized).is_ok());
}

#[test]
fn test_level_none_is_identity() {
    let source = "local x = 1 + 2 return x";
    let chunk = Compiler::compile_with_level(source, "test", OptLevel::None).unwrap();
    let reference = Compiler::compile_with_level(source, "test", OptLevel::None).unwrap();
    assert_eq!(chunk.code, reference.code);
    // None still folds nothing
    let mut optimizer = Optimizer::new(OptLevel::None);
    let untouched = optimizer.optimize(chunk);
    assert_eq!(untouched.code, reference.code);
}

fn vm_at(level: OptLevel) -> LuaVM {
    let mut vm = LuaVM::with_options(VmOptions {
        opt_level: level,
        ..VmOptions::default()
    });
    vm.open_libs().unwrap();
    vm
}

fn capture_at(level: OptLevel, source: &str) -> String {
    let mut vm = vm_at(level);
    vm.capture_print();
    vm.execute_string(source)
        .unwrap_or_else(|e| panic!("{:?} failed at {:?}: {}", source, level, e));
    vm.take_captured_output()
}

/// Optimization must not change observable behavior at any level.
#[test]
fn test_semantic_preservation_across_levels() {
    let programs = [
        "print(2 + 3)",
        "local t = {1,2,3} print(#t, t[2])",
        "local function f(n) if n<2 then return n end return f(n-1)+f(n-2) end print(f(10))",
        "local a,b = 'hello', 'world' print(a..' '..b)",
        "local function mk() local x=0 return function() x=x+1 return x end end local c=mk() print(c(),c(),c())",
        "local sum=0 for i=1,10 do sum=sum+i end print(sum)",
        "for i = 3, 1, -1 do print(i) end",
        "local i = 0 repeat i = i + 1 print(i) until i == 3",
        "print(7 // 2, 7 % 3, 2^8, 1/4)",
        "local parts = {} for k, v in ipairs({'a', 'b'}) do parts[#parts + 1] = v end print(table.concat(parts))",
        "print(select('#', 1, 2), select(2, 'x', 'y'))",
        "local ok, e = pcall(function() error('E') end) print(ok, e ~= nil)",
    ];
    for source in programs {
        let reference = capture_at(OptLevel::None, source);
        for level in [OptLevel::Basic, OptLevel::Standard, OptLevel::Aggressive] {
            let output = capture_at(level, source);
            assert_eq!(output, reference, "{:?} diverged at {:?}", source, level);
        }
    }
}

/// Error behavior is preserved too: same error kind at every level.
#[test]
fn test_error_preservation_across_levels() {
    let programs = [
        "return 1 // 0",
        "return nil + 1",
        "local t return t.x.y",
        "error('stop')",
    ];
    for source in programs {
        let reference_kind = {
            let mut vm = vm_at(OptLevel::None);
            vm.execute_string(source).unwrap_err().kind
        };
        for level in [OptLevel::Basic, OptLevel::Standard, OptLevel::Aggressive] {
            let mut vm = vm_at(level);
            let kind = vm.execute_string(source).unwrap_err().kind;
            assert_eq!(kind, reference_kind, "{:?} diverged at {:?}", source, level);
        }
    }
}

#[test]
fn test_optimized_chunks_execute() {
    // Run an optimized chunk object directly
    let chunk = Compiler::compile_with_level("return 6 * 7", "test", OptLevel::Aggressive).unwrap();
    let mut vm = LuaVM::new();
    let results = vm.execute(Rc::new(chunk)).unwrap();
    assert_eq!(results[0], crate::lua_value::LuaValue::Integer(42));
}
