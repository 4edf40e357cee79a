// Test support: every test drives full Lua sources through a fresh VM with
// the standard libraries open, asserting inside Lua where possible.

mod test_basic;
mod test_bytecode;
mod test_closures;
mod test_control_flow;
mod test_coroutine;
mod test_integration;
mod test_lexer;
mod test_metamethods;
mod test_operators;
mod test_optimizer;
mod test_parser;
mod test_stdlib;

use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaResult, LuaVM};

pub(crate) fn new_vm() -> LuaVM {
    let mut vm = LuaVM::new();
    vm.open_libs().expect("stdlib install failed");
    vm
}

pub(crate) fn run(source: &str) -> LuaResult<LuaValue> {
    new_vm().execute_string(source)
}

/// Run a script whose own `assert` calls carry the checks.
pub(crate) fn check(source: &str) {
    if let Err(e) = run(source) {
        panic!("script failed: {}", e);
    }
}

/// Run a script and return everything it printed.
pub(crate) fn capture(source: &str) -> String {
    let mut vm = new_vm();
    vm.capture_print();
    if let Err(e) = vm.execute_string(source) {
        panic!("script failed: {}", e);
    }
    vm.take_captured_output()
}
