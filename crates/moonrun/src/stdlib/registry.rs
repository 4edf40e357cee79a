// Library registration: a module is a name plus its native function table.
// `_G` entries land directly in the globals; everything else gets its own
// table.

use crate::lua_value::{LuaFunction, LuaValue, NativeFn};
use crate::lua_vm::{LuaResult, LuaVM};

pub struct LibraryModule {
    pub name: &'static str,
    pub functions: Vec<(&'static str, NativeFn)>,
    pub values: Vec<(&'static str, fn(&mut LuaVM) -> LuaValue)>,
}

impl LibraryModule {
    pub fn new(name: &'static str) -> Self {
        LibraryModule {
            name,
            functions: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn with_fn(mut self, name: &'static str, func: NativeFn) -> Self {
        self.functions.push((name, func));
        self
    }

    pub fn with_value(mut self, name: &'static str, value: fn(&mut LuaVM) -> LuaValue) -> Self {
        self.values.push((name, value));
        self
    }

    /// Install into the VM. Returns the module table (the globals table for
    /// `_G`).
    pub fn install(self, vm: &mut LuaVM) -> LuaResult<LuaValue> {
        if self.name == "_G" {
            for (name, func) in self.functions {
                vm.register_native(name, func);
            }
            for (name, value_fn) in self.values {
                let value = value_fn(vm);
                vm.set_global(name, value);
            }
            return Ok(LuaValue::Table(vm.globals()));
        }
        let table_value = vm.create_table();
        {
            let table = table_value.as_table().expect("module table");
            for (name, func) in self.functions {
                let key = vm.create_string(name);
                let value = vm.create_function(LuaFunction::native(name, func));
                table.borrow_mut().raw_set(key, value);
            }
            for (name, value_fn) in self.values {
                let key = vm.create_string(name);
                let value = value_fn(vm);
                table.borrow_mut().raw_set(key, value);
            }
        }
        vm.set_global(self.name, table_value.clone());
        Ok(table_value)
    }
}

/// Build a [`LibraryModule`] from a `"name" => function` table.
#[macro_export]
macro_rules! lib_module {
    ($name:expr, { $($fname:expr => $func:expr),* $(,)? }) => {{
        let mut module = $crate::stdlib::registry::LibraryModule::new($name);
        $(
            module = module.with_fn($fname, $func);
        )*
        module
    }};
}
