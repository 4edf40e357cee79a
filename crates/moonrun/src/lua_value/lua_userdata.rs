// Userdata: a sized raw byte region with a type tag, an optional metatable
// and a vector of associated Lua values.

use std::cell::RefCell;
use std::rc::Rc;

use smol_str::SmolStr;

use super::lua_table::LuaTable;
use super::lua_value::LuaValue;

pub struct LuaUserdata {
    data: RefCell<Box<[u8]>>,
    type_tag: SmolStr,
    metatable: RefCell<Option<Rc<RefCell<LuaTable>>>>,
    user_values: RefCell<Vec<LuaValue>>,
}

impl LuaUserdata {
    pub fn new(size: usize, type_tag: impl Into<SmolStr>) -> Self {
        LuaUserdata {
            data: RefCell::new(vec![0u8; size].into_boxed_slice()),
            type_tag: type_tag.into(),
            metatable: RefCell::new(None),
            user_values: RefCell::new(Vec::new()),
        }
    }

    pub fn size(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn type_tag(&self) -> &SmolStr {
        &self.type_tag
    }

    pub fn read(&self, offset: usize, out: &mut [u8]) -> bool {
        let data = self.data.borrow();
        match data.get(offset..offset + out.len()) {
            Some(src) => {
                out.copy_from_slice(src);
                true
            }
            None => false,
        }
    }

    pub fn write(&self, offset: usize, src: &[u8]) -> bool {
        let mut data = self.data.borrow_mut();
        match data.get_mut(offset..offset + src.len()) {
            Some(dst) => {
                dst.copy_from_slice(src);
                true
            }
            None => false,
        }
    }

    pub fn get_metatable(&self) -> Option<Rc<RefCell<LuaTable>>> {
        self.metatable.borrow().clone()
    }

    pub fn set_metatable(&self, mt: Option<Rc<RefCell<LuaTable>>>) {
        *self.metatable.borrow_mut() = mt;
    }

    pub fn user_value(&self, index: usize) -> LuaValue {
        self.user_values
            .borrow()
            .get(index)
            .cloned()
            .unwrap_or(LuaValue::Nil)
    }

    pub fn set_user_value(&self, index: usize, value: LuaValue) {
        let mut values = self.user_values.borrow_mut();
        if index >= values.len() {
            values.resize(index + 1, LuaValue::Nil);
        }
        values[index] = value;
    }

    pub fn user_values_snapshot(&self) -> Vec<LuaValue> {
        self.user_values.borrow().clone()
    }

    /// Cycle-collector hook: drop every Lua reference this object holds.
    pub fn clear_all(&self) {
        *self.metatable.borrow_mut() = None;
        self.user_values.borrow_mut().clear();
    }
}

impl std::fmt::Debug for LuaUserdata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "userdata<{}>({} bytes)", self.type_tag, self.size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_region() {
        let ud = LuaUserdata::new(8, "point");
        assert_eq!(ud.size(), 8);
        assert!(ud.write(0, &[1, 2, 3, 4]));
        let mut buf = [0u8; 4];
        assert!(ud.read(0, &mut buf));
        assert_eq!(buf, [1, 2, 3, 4]);
        assert!(!ud.write(6, &[0; 4]));
    }

    #[test]
    fn test_user_values() {
        let ud = LuaUserdata::new(0, "bag");
        assert!(ud.user_value(0).is_nil());
        ud.set_user_value(1, LuaValue::integer(7));
        assert_eq!(ud.user_value(1), LuaValue::integer(7));
        assert!(ud.user_value(0).is_nil());
    }
}
