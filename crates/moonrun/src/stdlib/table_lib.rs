// Table library: insert, remove, concat, unpack, pack.

use crate::lib_module;
use crate::lua_value::{LuaTable, LuaValue};
use crate::lua_vm::coercion;
use crate::lua_vm::{LuaError, LuaResult, LuaVM};
use crate::stdlib::registry::LibraryModule;

pub fn create_table_lib() -> LibraryModule {
    lib_module!("table", {
        "insert" => table_insert,
        "remove" => table_remove,
        "concat" => table_concat,
        "unpack" => table_unpack,
        "pack" => table_pack,
    })
}

fn arg_table(
    args: &[LuaValue],
    index: usize,
    fname: &str,
) -> LuaResult<std::rc::Rc<std::cell::RefCell<LuaTable>>> {
    args.get(index).and_then(|v| v.as_table()).ok_or_else(|| {
        LuaError::argument(format!(
            "bad argument #{} to '{}' (table expected)",
            index + 1,
            fname
        ))
    })
}

/// insert(t, v) appends; insert(t, pos, v) shifts up.
fn table_insert(_vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let table = arg_table(&args, 0, "insert")?;
    match args.len() {
        2 => {
            let value = args[1].clone();
            let len = table.borrow().len();
            table.borrow_mut().set_int(len + 1, value);
            Ok(Vec::new())
        }
        3 => {
            let pos = args[1].as_integer().ok_or_else(|| {
                LuaError::argument("bad argument #2 to 'insert' (number expected)")
            })?;
            let value = args[2].clone();
            table
                .borrow_mut()
                .insert_at(pos, value)
                .map_err(|_| LuaError::argument("bad argument #2 to 'insert' (position out of bounds)"))?;
            Ok(Vec::new())
        }
        _ => Err(LuaError::argument("wrong number of arguments to 'insert'")),
    }
}

fn table_remove(_vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let table = arg_table(&args, 0, "remove")?;
    let len = table.borrow().len();
    let pos = match args.get(1) {
        None | Some(LuaValue::Nil) => len,
        Some(v) => v.as_integer().ok_or_else(|| {
            LuaError::argument("bad argument #2 to 'remove' (number expected)")
        })?,
    };
    if len == 0 && (pos == 0 || pos == len) {
        return Ok(vec![LuaValue::Nil]);
    }
    let removed = table
        .borrow_mut()
        .remove_at(pos)
        .map_err(|_| LuaError::argument("bad argument #2 to 'remove' (position out of bounds)"))?;
    Ok(vec![removed])
}

fn table_concat(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let table = arg_table(&args, 0, "concat")?;
    let sep = match args.get(1) {
        None | Some(LuaValue::Nil) => String::new(),
        Some(LuaValue::String(s)) => s.as_str().to_string(),
        Some(v @ (LuaValue::Integer(_) | LuaValue::Float(_))) => coercion::display_value(v),
        _ => {
            return Err(LuaError::argument(
                "bad argument #2 to 'concat' (string expected)",
            ));
        }
    };
    let first = args.get(2).and_then(|v| v.as_integer()).unwrap_or(1);
    let last = match args.get(3) {
        None | Some(LuaValue::Nil) => table.borrow().len(),
        Some(v) => v.as_integer().ok_or_else(|| {
            LuaError::argument("bad argument #4 to 'concat' (number expected)")
        })?,
    };
    let mut out = String::new();
    let mut i = first;
    while i <= last {
        let value = table.borrow().get_int(i);
        match &value {
            LuaValue::String(s) => out.push_str(s.as_str()),
            LuaValue::Integer(_) | LuaValue::Float(_) => {
                out.push_str(&coercion::display_value(&value))
            }
            _ => {
                return Err(LuaError::argument(format!(
                    "invalid value (at index {}) in table for 'concat'",
                    i
                )));
            }
        }
        if i < last {
            out.push_str(&sep);
        }
        i += 1;
    }
    Ok(vec![vm.create_string_owned(out)])
}

fn table_unpack(_vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let table = arg_table(&args, 0, "unpack")?;
    let first = args.get(1).and_then(|v| v.as_integer()).unwrap_or(1);
    let last = match args.get(2) {
        None | Some(LuaValue::Nil) => table.borrow().len(),
        Some(v) => v.as_integer().ok_or_else(|| {
            LuaError::argument("bad argument #3 to 'unpack' (number expected)")
        })?,
    };
    if last - first + 1 > 1_000_000 {
        return Err(LuaError::runtime("too many results to unpack"));
    }
    let mut out = Vec::new();
    let mut i = first;
    while i <= last {
        out.push(table.borrow().get_int(i));
        i += 1;
    }
    Ok(out)
}

/// pack(...) -> {..., n = count}
fn table_pack(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let n = args.len();
    let result = vm.create_table_with(n, 1);
    {
        let table = result.as_table().expect("pack table");
        let mut table = table.borrow_mut();
        for (i, value) in args.into_iter().enumerate() {
            table.set_int(i as i64 + 1, value);
        }
    }
    let key = vm.create_string("n");
    result
        .as_table()
        .expect("pack table")
        .borrow_mut()
        .raw_set(key, LuaValue::Integer(n as i64));
    Ok(vec![result])
}
