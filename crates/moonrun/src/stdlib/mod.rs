// Standard library surface.

mod basic;
mod coroutine_lib;
mod math_lib;
pub mod registry;
mod string_lib;
mod table_lib;

use crate::lua_vm::{LuaResult, LuaVM};

/// coroutine.wrap needs a per-coroutine closure, which is exactly what a
/// Lua closure is; it is bootstrapped on top of create/resume.
const WRAP_BOOTSTRAP: &str = r#"
function coroutine.wrap(f)
    local co = coroutine.create(f)
    return function(...)
        local results = table.pack(coroutine.resume(co, ...))
        if results[1] then
            return table.unpack(results, 2, results.n)
        end
        error(results[2])
    end
end
"#;

/// Install every library: basic (_G), math, string, table, coroutine.
pub fn open_all(vm: &mut LuaVM) -> LuaResult<()> {
    basic::create_basic_lib().install(vm)?;
    math_lib::create_math_lib().install(vm)?;
    let string_table = string_lib::create_string_lib().install(vm)?;
    string_lib::install_string_metatable(vm, string_table);
    table_lib::create_table_lib().install(vm)?;
    coroutine_lib::create_coroutine_lib().install(vm)?;
    vm.execute_string(WRAP_BOOTSTRAP)?;
    Ok(())
}
