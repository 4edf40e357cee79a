// End-to-end basics: values, locals, globals, multiple assignment, varargs.

use super::{check, new_vm, run};
use crate::lua_value::LuaValue;
use crate::lua_vm::ErrorKind;

#[test]
fn test_return_values() {
    assert_eq!(run("return 42").unwrap(), LuaValue::Integer(42));
    assert_eq!(run("return 3.5").unwrap(), LuaValue::Float(3.5));
    assert_eq!(run("return true").unwrap(), LuaValue::Boolean(true));
    assert_eq!(run("return nil").unwrap(), LuaValue::Nil);
    assert_eq!(run("return 'hi'").unwrap().as_str(), Some("hi"));
    assert_eq!(run("").unwrap(), LuaValue::Nil);
}

#[test]
fn test_multiple_returns() {
    let mut vm = new_vm();
    let chunk = vm.compile("return 1, 2, 3").unwrap();
    let results = vm.execute(std::rc::Rc::new(chunk)).unwrap();
    assert_eq!(
        results,
        vec![
            LuaValue::Integer(1),
            LuaValue::Integer(2),
            LuaValue::Integer(3)
        ]
    );
}

#[test]
fn test_locals_and_globals() {
    check(
        r#"
        local a = 10
        b = 20
        assert(a == 10)
        assert(b == 20)
        assert(_G.b == 20)
        c = nil
    "#,
    );
}

#[test]
fn test_multiple_assignment() {
    check(
        r#"
        local a, b, c = 1, 2
        assert(a == 1 and b == 2 and c == nil)
        a, b = b, a
        assert(a == 2 and b == 1)
        local x, y = 1, 2, 3
        assert(x == 1 and y == 2)
    "#,
    );
}

#[test]
fn test_self_referencing_assignment() {
    check(
        r#"
        local x = 5
        local y = 7
        x = y and x
        assert(x == 5)
        x = nil
        x = x or y
        assert(x == 7)
    "#,
    );
}

#[test]
fn test_scoping() {
    check(
        r#"
        local x = 1
        do
            local x = 2
            assert(x == 2)
        end
        assert(x == 1)
    "#,
    );
}

#[test]
fn test_functions_and_arity() {
    check(
        r#"
        local function f(a, b, c) return a, b, c end
        local x, y, z = f(1, 2)
        assert(x == 1 and y == 2 and z == nil)
        local p, q = f(1, 2, 3, 4)
        assert(p == 1 and q == 2)
    "#,
    );
}

#[test]
fn test_varargs() {
    check(
        r#"
        local function count(...) return select('#', ...) end
        assert(count() == 0)
        assert(count(1, nil, 3) == 3)

        local function forward(...) return ... end
        local a, b, c = forward(10, 20, 30)
        assert(a == 10 and b == 20 and c == 30)

        local function pack_varargs(...)
            local t = {...}
            return #t
        end
        assert(pack_varargs('x', 'y') == 2)
    "#,
    );
}

#[test]
fn test_method_definition_and_call() {
    check(
        r#"
        local account = {balance = 100}
        function account:deposit(n)
            self.balance = self.balance + n
        end
        account:deposit(50)
        assert(account.balance == 150)
    "#,
    );
}

#[test]
fn test_nested_tables() {
    check(
        r#"
        local t = {a = {b = {c = 42}}}
        assert(t.a.b.c == 42)
        t.a.b.c = 43
        assert(t.a.b.c == 43)
        t.a.b[1] = 'one'
        assert(t.a.b[1] == 'one')
    "#,
    );
}

#[test]
fn test_table_constructor_with_call_expansion() {
    check(
        r#"
        local function three() return 1, 2, 3 end
        local t = {three()}
        assert(#t == 3)
        local u = {three(), 10}
        assert(#u == 2 and u[1] == 1 and u[2] == 10)
    "#,
    );
}

#[test]
fn test_runtime_error_kinds() {
    let err = run("local x = nil; return x.field").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);

    let err = run("local f = 42; f()").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);

    let err = run("error('custom')").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime);
    assert!(err.message.contains("custom"));
}

#[test]
fn test_error_has_location_and_traceback() {
    let err = run("local x\n\nreturn x + {}").unwrap_err();
    assert_eq!(err.location.as_ref().map(|l| l.line), Some(3));
    assert!(!err.traceback.is_empty());
}

#[test]
fn test_stack_overflow_detected() {
    let err = run("local function f(n) return 1 + f(n) end return f(1)").unwrap_err();
    assert_eq!(err.kind, ErrorKind::StackOverflow);
}

#[test]
fn test_vm_status_transitions() {
    use crate::lua_vm::VmStatus;
    let mut vm = new_vm();
    assert_eq!(vm.status(), VmStatus::Finished); // open_libs ran a chunk
    vm.execute_string("return 1").unwrap();
    assert_eq!(vm.status(), VmStatus::Finished);
    let _ = vm.execute_string("error('x')");
    assert_eq!(vm.status(), VmStatus::Error);
    assert!(vm.last_error().is_some());
    vm.reset();
    assert_eq!(vm.status(), VmStatus::Ready);
    vm.execute_string("return 2").unwrap();
    assert_eq!(vm.status(), VmStatus::Finished);
}

#[test]
fn test_execute_file_missing_is_io_error() {
    let mut vm = new_vm();
    let err = vm.execute_file("/nonexistent/path.lua").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Io);
}

#[test]
fn test_bare_prototype_is_callable() {
    use crate::lua_value::LuaFunction;
    use std::rc::Rc;
    let mut vm = new_vm();
    let chunk = vm.compile("return 5").unwrap();
    // A prototype with no captures instantiates against the default
    // environment when called
    let proto = LuaValue::Function(Rc::new(LuaFunction::Proto(Rc::new(chunk))));
    let results = vm.call_value(proto, Vec::new()).unwrap();
    assert_eq!(results[0], LuaValue::Integer(5));
}

#[test]
fn test_set_get_global_from_rust() {
    let mut vm = new_vm();
    vm.set_global("answer", LuaValue::Integer(42));
    vm.execute_string("assert(answer == 42) answer = answer + 1")
        .unwrap();
    assert_eq!(vm.get_global("answer"), LuaValue::Integer(43));
}
