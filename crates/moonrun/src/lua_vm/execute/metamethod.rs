// Metamethod lookup helpers.

use std::cell::RefCell;
use std::rc::Rc;

use crate::lua_value::{LuaTable, LuaValue};
use crate::lua_vm::lua_state::LuaVM;
use crate::lua_vm::metamethod::MetaMethod;

impl LuaVM {
    /// Metatable of any value: tables and userdata carry their own; strings
    /// share the VM-wide string metatable.
    pub fn get_metatable_of(&self, value: &LuaValue) -> Option<Rc<RefCell<LuaTable>>> {
        match value {
            LuaValue::Table(t) => t.borrow().get_metatable(),
            LuaValue::Userdata(u) => u.get_metatable(),
            LuaValue::String(_) => self.string_metatable.clone(),
            _ => None,
        }
    }

    /// Look a metamethod up on a value, Nil filtered out.
    pub fn get_metamethod(&self, value: &LuaValue, event: MetaMethod) -> Option<LuaValue> {
        let mt = self.get_metatable_of(value)?;
        let handler = mt.borrow().get_str(event.key());
        if handler.is_nil() { None } else { Some(handler) }
    }
}
