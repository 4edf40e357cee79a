// Basic library (_G global functions)
// Implements: print, type, assert, error, tonumber, tostring, select,
// ipairs, pairs, next, pcall, xpcall, getmetatable, setmetatable, rawget,
// rawset, rawlen, rawequal, collectgarbage

use crate::lib_module;
use crate::lua_value::{LuaFunction, LuaValue};
use crate::lua_vm::coercion;
use crate::lua_vm::{LuaError, LuaResult, LuaVM, MetaMethod};
use crate::stdlib::registry::LibraryModule;

pub fn create_basic_lib() -> LibraryModule {
    lib_module!("_G", {
        "print" => lua_print,
        "type" => lua_type,
        "assert" => lua_assert,
        "error" => lua_error,
        "tonumber" => lua_tonumber,
        "tostring" => lua_tostring,
        "select" => lua_select,
        "ipairs" => lua_ipairs,
        "pairs" => lua_pairs,
        "next" => lua_next,
        "pcall" => lua_pcall,
        "xpcall" => lua_xpcall,
        "getmetatable" => lua_getmetatable,
        "setmetatable" => lua_setmetatable,
        "rawget" => lua_rawget,
        "rawset" => lua_rawset,
        "rawlen" => lua_rawlen,
        "rawequal" => lua_rawequal,
        "collectgarbage" => lua_collectgarbage,
    })
    .with_value("_VERSION", |vm| vm.create_string("Lua 5.5"))
}

/// print(...) - render each argument through tostring, tab separated.
fn lua_print(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let mut line = String::new();
    for (index, arg) in args.iter().enumerate() {
        if index > 0 {
            line.push('\t');
        }
        line.push_str(&vm.tostring_value(arg)?);
    }
    vm.print_line(&line);
    Ok(Vec::new())
}

fn lua_type(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let value = args
        .first()
        .ok_or_else(|| LuaError::argument("bad argument #1 to 'type' (value expected)"))?;
    Ok(vec![vm.create_string(value.type_name())])
}

fn lua_assert(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let condition = args.first().cloned().unwrap_or(LuaValue::Nil);
    if condition.is_truthy() {
        return Ok(args);
    }
    match args.get(1) {
        Some(message) => {
            if let Some(s) = message.as_str() {
                Err(LuaError::runtime(s.to_string()))
            } else {
                vm.error_value = Some(message.clone());
                Err(LuaError::runtime("assertion failed with non-string message"))
            }
        }
        None => Err(LuaError::runtime("assertion failed!")),
    }
}

/// error(message) - raise with any value as the payload.
fn lua_error(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let value = args.first().cloned().unwrap_or(LuaValue::Nil);
    match value.as_str() {
        Some(s) => Err(LuaError::runtime(s.to_string())),
        None => {
            vm.error_value = Some(value.clone());
            let text = coercion::display_value(&value);
            Err(LuaError::runtime(text))
        }
    }
}

fn lua_tonumber(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let value = args.first().cloned().unwrap_or(LuaValue::Nil);
    match args.get(1) {
        None | Some(LuaValue::Nil) => {
            let converted = match &value {
                LuaValue::Integer(_) | LuaValue::Float(_) => value.clone(),
                LuaValue::String(s) => {
                    coercion::parse_lua_number(s.as_str()).unwrap_or(LuaValue::Nil)
                }
                _ => LuaValue::Nil,
            };
            Ok(vec![converted])
        }
        Some(base) => {
            let base = base.as_integer().ok_or_else(|| {
                LuaError::argument("bad argument #2 to 'tonumber' (number expected)")
            })?;
            if !(2..=36).contains(&base) {
                return Err(LuaError::argument(
                    "bad argument #2 to 'tonumber' (base out of range)",
                ));
            }
            let text = value.as_str().ok_or_else(|| {
                LuaError::argument("bad argument #1 to 'tonumber' (string expected)")
            })?;
            let text = text.trim();
            let (negative, digits) = match text.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, text.strip_prefix('+').unwrap_or(text)),
            };
            if digits.is_empty() {
                return Ok(vec![LuaValue::Nil]);
            }
            let mut result: i64 = 0;
            for c in digits.chars() {
                match c.to_digit(36) {
                    Some(d) if (d as i64) < base => {
                        result = result.wrapping_mul(base).wrapping_add(d as i64);
                    }
                    _ => {
                        let _ = vm;
                        return Ok(vec![LuaValue::Nil]);
                    }
                }
            }
            Ok(vec![LuaValue::Integer(if negative { -result } else { result })])
        }
    }
}

fn lua_tostring(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let value = args.first().cloned().unwrap_or(LuaValue::Nil);
    let text = vm.tostring_value(&value)?;
    Ok(vec![vm.create_string_owned(text)])
}

/// select('#', ...) or select(n, ...).
fn lua_select(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let selector = args
        .first()
        .ok_or_else(|| LuaError::argument("bad argument #1 to 'select' (number expected)"))?;
    if selector.as_str() == Some("#") {
        return Ok(vec![LuaValue::Integer(args.len() as i64 - 1)]);
    }
    let n = selector
        .as_integer()
        .ok_or_else(|| LuaError::argument("bad argument #1 to 'select' (number expected)"))?;
    let rest = args.len() as i64 - 1;
    let start = if n < 0 {
        let s = rest + n;
        if s < 0 {
            return Err(LuaError::argument(
                "bad argument #1 to 'select' (index out of range)",
            ));
        }
        s
    } else if n == 0 {
        return Err(LuaError::argument(
            "bad argument #1 to 'select' (index out of range)",
        ));
    } else {
        n - 1
    };
    let _ = vm;
    Ok(args.into_iter().skip(1 + start as usize).collect())
}

/// Stateless ipairs iterator: (t, i) -> i+1, t[i+1].
fn ipairs_iterator(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let table = args.first().cloned().unwrap_or(LuaValue::Nil);
    let i = args.get(1).and_then(|v| v.as_integer()).unwrap_or(0);
    let value = vm.index_get(&table, &LuaValue::Integer(i + 1))?;
    if value.is_nil() {
        Ok(vec![LuaValue::Nil])
    } else {
        Ok(vec![LuaValue::Integer(i + 1), value])
    }
}

fn lua_ipairs(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let table = args
        .first()
        .cloned()
        .ok_or_else(|| LuaError::argument("bad argument #1 to 'ipairs' (table expected)"))?;
    let iterator = vm.create_function(LuaFunction::native("ipairs_iterator", ipairs_iterator));
    Ok(vec![iterator, table, LuaValue::Integer(0)])
}

fn lua_next(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let table = args
        .first()
        .and_then(|v| v.as_table())
        .ok_or_else(|| LuaError::argument("bad argument #1 to 'next' (table expected)"))?;
    let key = args.get(1).cloned().unwrap_or(LuaValue::Nil);
    let _ = vm;
    match table.borrow().next(&key) {
        Some((k, v)) => Ok(vec![k, v]),
        None => Ok(vec![LuaValue::Nil]),
    }
}

fn lua_pairs(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let table = args
        .first()
        .cloned()
        .ok_or_else(|| LuaError::argument("bad argument #1 to 'pairs' (table expected)"))?;
    let iterator = vm.create_function(LuaFunction::native("next", lua_next));
    Ok(vec![iterator, table, LuaValue::Nil])
}

/// The error value pcall/xpcall hand to the caller: the raw payload when
/// error() raised a non-string, the located message otherwise.
fn protected_error_value(vm: &mut LuaVM, e: &LuaError) -> LuaValue {
    if let Some(payload) = vm.error_value.take() {
        return payload;
    }
    let text = match &e.location {
        Some(loc) => format!("{}: {}", loc, e.message),
        None => e.message.clone(),
    };
    vm.create_string_owned(text)
}

fn lua_pcall(vm: &mut LuaVM, mut args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    if args.is_empty() {
        return Err(LuaError::argument("bad argument #1 to 'pcall' (value expected)"));
    }
    let func = args.remove(0);
    match vm.call_value(func, args) {
        Ok(mut results) => {
            let mut out = Vec::with_capacity(results.len() + 1);
            out.push(LuaValue::Boolean(true));
            out.append(&mut results);
            Ok(out)
        }
        Err(e) if e.is_yield() => Err(e),
        Err(e) => {
            let e = vm.decorate_error(e);
            let value = protected_error_value(vm, &e);
            Ok(vec![LuaValue::Boolean(false), value])
        }
    }
}

fn lua_xpcall(vm: &mut LuaVM, mut args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    if args.len() < 2 {
        return Err(LuaError::argument(
            "bad argument #2 to 'xpcall' (value expected)",
        ));
    }
    let func = args.remove(0);
    let handler = args.remove(0);
    match vm.call_value(func, args) {
        Ok(mut results) => {
            let mut out = Vec::with_capacity(results.len() + 1);
            out.push(LuaValue::Boolean(true));
            out.append(&mut results);
            Ok(out)
        }
        Err(e) if e.is_yield() => Err(e),
        Err(e) => {
            let e = vm.decorate_error(e);
            let value = protected_error_value(vm, &e);
            let handled = vm.call_value(handler, vec![value])?;
            let mut out = vec![LuaValue::Boolean(false)];
            out.extend(handled);
            Ok(out)
        }
    }
}

fn lua_getmetatable(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let value = args.first().cloned().unwrap_or(LuaValue::Nil);
    match vm.get_metatable_of(&value) {
        Some(mt) => {
            // A __metatable field shields the real metatable
            let guard = mt.borrow().get_str(MetaMethod::Metatable.key());
            if guard.is_nil() {
                Ok(vec![LuaValue::Table(mt)])
            } else {
                Ok(vec![guard])
            }
        }
        None => Ok(vec![LuaValue::Nil]),
    }
}

fn lua_setmetatable(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let table_value = args.first().cloned().unwrap_or(LuaValue::Nil);
    let table = table_value
        .as_table()
        .ok_or_else(|| LuaError::argument("bad argument #1 to 'setmetatable' (table expected)"))?;
    let mt = args.get(1).cloned().unwrap_or(LuaValue::Nil);
    if let Some(existing) = vm.get_metatable_of(&table_value) {
        if !existing.borrow().get_str(MetaMethod::Metatable.key()).is_nil() {
            return Err(LuaError::runtime("cannot change a protected metatable"));
        }
    }
    match mt {
        LuaValue::Nil => table.borrow_mut().set_metatable(None),
        LuaValue::Table(new_mt) => table.borrow_mut().set_metatable(Some(new_mt)),
        _ => {
            return Err(LuaError::argument(
                "bad argument #2 to 'setmetatable' (nil or table expected)",
            ));
        }
    }
    Ok(vec![table_value])
}

fn lua_rawget(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let table = args
        .first()
        .and_then(|v| v.as_table())
        .ok_or_else(|| LuaError::argument("bad argument #1 to 'rawget' (table expected)"))?;
    let key = args.get(1).cloned().unwrap_or(LuaValue::Nil);
    let _ = vm;
    Ok(vec![table.borrow().raw_get(&key)])
}

fn lua_rawset(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let table_value = args.first().cloned().unwrap_or(LuaValue::Nil);
    let table = table_value
        .as_table()
        .ok_or_else(|| LuaError::argument("bad argument #1 to 'rawset' (table expected)"))?;
    let key = args.get(1).cloned().unwrap_or(LuaValue::Nil);
    if key.is_nil() {
        return Err(LuaError::runtime("table index is nil"));
    }
    let value = args.get(2).cloned().unwrap_or(LuaValue::Nil);
    let _ = vm;
    table.borrow_mut().raw_set(key, value);
    Ok(vec![table_value])
}

fn lua_rawlen(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let value = args.first().cloned().unwrap_or(LuaValue::Nil);
    let _ = vm;
    match &value {
        LuaValue::String(s) => Ok(vec![LuaValue::Integer(s.len() as i64)]),
        LuaValue::Table(t) => Ok(vec![LuaValue::Integer(t.borrow().len())]),
        _ => Err(LuaError::argument(
            "table or string expected in 'rawlen'",
        )),
    }
}

fn lua_rawequal(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let a = args.first().cloned().unwrap_or(LuaValue::Nil);
    let b = args.get(1).cloned().unwrap_or(LuaValue::Nil);
    let _ = vm;
    Ok(vec![LuaValue::Boolean(a == b)])
}

fn lua_collectgarbage(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let opt = args
        .first()
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| "collect".to_string());
    match opt.as_str() {
        "collect" | "step" => {
            let freed = vm.collect_garbage();
            Ok(vec![LuaValue::Integer(freed as i64)])
        }
        "count" => {
            // Rough live-set footprint in kilobytes
            let live = vm.gc_stats().live;
            Ok(vec![LuaValue::Float((live * 64) as f64 / 1024.0)])
        }
        _ => Err(LuaError::argument(format!(
            "bad argument #1 to 'collectgarbage' (invalid option '{}')",
            opt
        ))),
    }
}
