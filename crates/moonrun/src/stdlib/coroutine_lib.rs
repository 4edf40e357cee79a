// Coroutine library over the VM's fiber driver: create, resume, yield,
// status, isyieldable, running. `wrap` is bootstrapped in Lua (it needs a
// per-coroutine closure) - see stdlib::open_all.

use std::rc::Rc;

use crate::lib_module;
use crate::lua_value::{CoroutineStatus, LuaValue};
use crate::lua_vm::{LuaError, LuaResult, LuaVM};
use crate::stdlib::registry::LibraryModule;

pub fn create_coroutine_lib() -> LibraryModule {
    lib_module!("coroutine", {
        "create" => co_create,
        "resume" => co_resume,
        "yield" => co_yield,
        "status" => co_status,
        "isyieldable" => co_isyieldable,
        "running" => co_running,
    })
}

fn co_create(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let entry = args
        .first()
        .and_then(|v| v.as_function())
        .ok_or_else(|| LuaError::argument("bad argument #1 to 'create' (function expected)"))?;
    Ok(vec![vm.create_coroutine(entry)])
}

fn co_resume(vm: &mut LuaVM, mut args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    if args.is_empty() {
        return Err(LuaError::argument(
            "bad argument #1 to 'resume' (coroutine expected)",
        ));
    }
    let co = args.remove(0).as_thread().ok_or_else(|| {
        LuaError::argument("bad argument #1 to 'resume' (coroutine expected)")
    })?;
    match vm.resume_coroutine(co, args) {
        Ok(mut results) => {
            let mut out = Vec::with_capacity(results.len() + 1);
            out.push(LuaValue::Boolean(true));
            out.append(&mut results);
            Ok(out)
        }
        Err(e) => {
            // Both invalid transitions and in-body errors surface as
            // (false, message)
            let payload = match vm.error_value.take() {
                Some(value) => value,
                None => {
                    let text = match &e.location {
                        Some(loc) => format!("{}: {}", loc, e.message),
                        None => e.message.clone(),
                    };
                    vm.create_string_owned(text)
                }
            };
            Ok(vec![LuaValue::Boolean(false), payload])
        }
    }
}

fn co_yield(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    vm.yield_coroutine(args)
}

fn co_status(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let co = args.first().and_then(|v| v.as_thread()).ok_or_else(|| {
        LuaError::argument("bad argument #1 to 'status' (coroutine expected)")
    })?;
    let status = co.borrow().status;
    Ok(vec![vm.create_string(status.name())])
}

fn co_isyieldable(vm: &mut LuaVM, _args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    Ok(vec![LuaValue::Boolean(vm.current_coroutine().is_some())])
}

/// running() -> current coroutine (or the main thread) and whether it is
/// the main one.
fn co_running(vm: &mut LuaVM, _args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    match vm.current_coroutine() {
        Some(co) => {
            debug_assert!(co.borrow().status == CoroutineStatus::Running);
            Ok(vec![LuaValue::Thread(co), LuaValue::Boolean(false)])
        }
        None => {
            let main = vm
                .thread_stack
                .first()
                .map(Rc::clone)
                .expect("main thread missing");
            Ok(vec![LuaValue::Thread(main), LuaValue::Boolean(true)])
        }
    }
}
