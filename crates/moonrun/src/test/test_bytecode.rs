// Bytecode-level tests: validity of generated code, constant-pool dedup,
// deterministic codegen, disassembler output.

use std::collections::HashSet;

use crate::compiler::Compiler;
use crate::lua_value::{Chunk, LuaValue};
use crate::lua_vm::{disassemble, validate_chunk};
use crate::optimizer::OptLevel;

const SAMPLE_PROGRAMS: &[&str] = &[
    "print(2 + 3)",
    "local t = {1, 2, 3}; print(#t, t[2])",
    "local function f(n) if n < 2 then return n end return f(n - 1) + f(n - 2) end print(f(10))",
    "local a, b = 'hello', 'world' print(a .. ' ' .. b)",
    "local function mk() local x = 0 return function() x = x + 1 return x end end local c = mk() print(c(), c(), c())",
    "local sum = 0 for i = 1, 10 do sum = sum + i end print(sum)",
    "for k, v in pairs({a = 1}) do print(k, v) end",
    "local i = 0 while i < 5 do i = i + 1 end repeat i = i - 1 until i == 0",
    "local t = {} t.x = 1 t['y'] = 2 t[3] = 'z' print(t.x, t.y, t[3])",
    "local ok, err = pcall(function() error('boom') end) print(ok, err)",
    "local x <close> = setmetatable({}, {__close = function() end})",
    "goto finish do end ::finish::",
    "local function v(...) return select('#', ...) end print(v(1, 2, 3))",
];

#[test]
fn test_generated_code_validates_at_every_level() {
    for source in SAMPLE_PROGRAMS {
        for level in [
            OptLevel::None,
            OptLevel::Basic,
            OptLevel::Standard,
            OptLevel::Aggressive,
        ] {
            let chunk = Compiler::compile_with_level(source, "test", level)
                .unwrap_or_else(|e| panic!("compile failed for {:?}: {}", source, e));
            if let Err(errors) = validate_chunk(&chunk) {
                panic!(
                    "invalid bytecode for {:?} at {:?}: {:?}\n{}",
                    source,
                    level,
                    errors,
                    disassemble(&chunk)
                );
            }
        }
    }
}

fn assert_pool_deduped(chunk: &Chunk) {
    let mut seen: HashSet<String> = HashSet::new();
    for constant in &chunk.constants {
        // Integer and float constants are distinct even when numerically
        // equal, so the key carries the subtype
        let key = match constant {
            LuaValue::Integer(i) => format!("i{}", i),
            LuaValue::Float(f) => format!("f{}", f.to_bits()),
            LuaValue::String(s) => format!("s{}", s.as_str()),
            other => format!("{:?}", other),
        };
        assert!(
            seen.insert(key),
            "duplicate constant {:?} in pool",
            constant
        );
    }
    for child in &chunk.child_protos {
        assert_pool_deduped(child);
    }
}

#[test]
fn test_constant_pool_dedup() {
    let chunk = Compiler::compile_with_level(
        "local a = 'x' local b = 'x' local c = 1000 local d = 1000 print(a, b, c, d, 'x')",
        "test",
        OptLevel::None,
    )
    .unwrap();
    assert_pool_deduped(&chunk);
    for source in SAMPLE_PROGRAMS {
        let chunk = Compiler::compile_with_level(source, "test", OptLevel::Standard).unwrap();
        assert_pool_deduped(&chunk);
    }
}

#[test]
fn test_integer_and_float_constants_distinct() {
    // 70000 escapes the immediate range both as integer and as float
    let chunk = Compiler::compile_with_level(
        "local a = 70000 local b = 70000.0 print(a, b)",
        "test",
        OptLevel::None,
    )
    .unwrap();
    let ints = chunk
        .constants
        .iter()
        .filter(|c| matches!(c, LuaValue::Integer(70000)))
        .count();
    let floats = chunk
        .constants
        .iter()
        .filter(|c| matches!(c, LuaValue::Float(f) if *f == 70000.0))
        .count();
    assert_eq!((ints, floats), (1, 1));
}

#[test]
fn test_codegen_is_deterministic() {
    for source in SAMPLE_PROGRAMS {
        let a = Compiler::compile_with_level(source, "test", OptLevel::Standard).unwrap();
        let b = Compiler::compile_with_level(source, "test", OptLevel::Standard).unwrap();
        assert_chunks_equal(&a, &b, source);
    }
}

fn assert_chunks_equal(a: &Chunk, b: &Chunk, source: &str) {
    assert_eq!(a.code, b.code, "code differs for {:?}", source);
    assert_eq!(a.constants.len(), b.constants.len());
    assert_eq!(a.max_stack_size, b.max_stack_size);
    assert_eq!(a.child_protos.len(), b.child_protos.len());
    for (ca, cb) in a.child_protos.iter().zip(&b.child_protos) {
        assert_chunks_equal(ca, cb, source);
    }
}

#[test]
fn test_disassembler_covers_whole_tree() {
    let chunk = Compiler::compile_with_level(
        "local function f(x) return x + 1 end print(f(41))",
        "test",
        OptLevel::Standard,
    )
    .unwrap();
    let text = disassemble(&chunk);
    assert!(text.contains("main"));
    assert!(text.contains("function"));
    assert!(text.contains("CLOSURE"));
    assert!(text.contains("RETURN"));
    assert!(text.contains("constants:"));
}

#[test]
fn test_main_chunk_shape() {
    let chunk = Compiler::compile_with_level("return 1", "test", OptLevel::None).unwrap();
    assert!(chunk.is_vararg);
    assert_eq!(chunk.param_count, 0);
    assert_eq!(chunk.upvalue_descs.len(), 1);
    assert_eq!(chunk.upvalue_descs[0].name.as_str(), "_ENV");
    assert_eq!(chunk.line_info.len(), chunk.code.len());
}

#[test]
fn test_stack_size_covers_registers() {
    for source in SAMPLE_PROGRAMS {
        let chunk = Compiler::compile_with_level(source, "test", OptLevel::None).unwrap();
        assert!(chunk.max_stack_size >= 2);
    }
}
