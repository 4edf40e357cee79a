// moonrun - a Lua 5.5 interpreter core
// Pipeline: source -> lexer -> parser -> AST -> codegen -> optimizer ->
// bytecode -> register VM, with a hybrid refcount + cycle-tracing GC.

#[cfg(test)]
mod test;

pub mod compiler;
pub mod gc;
pub mod lua_value;
pub mod lua_vm;
pub mod optimizer;
pub mod stdlib;

pub use compiler::Compiler;
pub use gc::{GC, GcMode, GcStats, RootGuard};
pub use lua_value::{Chunk, LuaFunction, LuaStr, LuaTable, LuaValue};
pub use lua_vm::{
    ErrorKind, Instruction, LuaError, LuaResult, LuaVM, OpCode, SourceLocation, VmOptions,
    VmStatus, disassemble, validate_chunk,
};
pub use optimizer::{OptLevel, Optimizer};

/// Main entry point for executing Lua code.
pub fn execute(source: &str) -> LuaResult<LuaValue> {
    let mut vm = LuaVM::new();
    vm.open_libs()?;
    vm.execute_string(source)
}

/// Execute Lua code on an existing VM instance.
pub fn execute_with_vm(vm: &mut LuaVM, source: &str) -> LuaResult<LuaValue> {
    vm.execute_string(source)
}
