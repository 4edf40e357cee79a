// Closures and upvalues: capture, sharing, closing, recursion.

use super::check;

#[test]
fn test_counter_closure() {
    check(
        r#"
        local function mk()
            local x = 0
            return function() x = x + 1 return x end
        end
        local c = mk()
        assert(c() == 1)
        assert(c() == 2)
        assert(c() == 3)
        -- independent instances get independent cells
        local d = mk()
        assert(d() == 1)
        assert(c() == 4)
    "#,
    );
}

#[test]
fn test_upvalue_sharing() {
    check(
        r#"
        local function make()
            local v = 0
            local function inc() v = v + 1 end
            local function get() return v end
            return inc, get
        end
        local inc, get = make()
        inc(); inc()
        assert(get() == 2)
    "#,
    );
}

#[test]
fn test_capture_through_levels() {
    check(
        r#"
        local function outer()
            local a = 1
            return function()
                local b = 10
                return function()
                    return a + b
                end
            end
        end
        assert(outer()()() == 11)
    "#,
    );
}

#[test]
fn test_local_function_recursion() {
    check(
        r#"
        local function fact(n)
            if n <= 1 then return 1 end
            return n * fact(n - 1)
        end
        assert(fact(5) == 120)
    "#,
    );
}

#[test]
fn test_mutual_recursion_via_upvalue() {
    check(
        r#"
        local is_even, is_odd
        function is_even(n) if n == 0 then return true end return is_odd(n - 1) end
        function is_odd(n) if n == 0 then return false end return is_even(n - 1) end
        assert(is_even(10))
        assert(is_odd(7))
    "#,
    );
}

#[test]
fn test_loop_variable_capture_per_iteration() {
    check(
        r#"
        local fns = {}
        for i = 1, 3 do
            fns[i] = function() return i end
        end
        assert(fns[1]() == 1)
        assert(fns[2]() == 2)
        assert(fns[3]() == 3)
    "#,
    );
}

#[test]
fn test_upvalue_mutation_visible_after_close() {
    check(
        r#"
        local get, set
        do
            local hidden = 'initial'
            get = function() return hidden end
            set = function(v) hidden = v end
        end
        -- scope exited; the cell is closed but still shared
        assert(get() == 'initial')
        set('changed')
        assert(get() == 'changed')
    "#,
    );
}

#[test]
fn test_parameters_capturable() {
    check(
        r#"
        local function adder(n)
            return function(x) return x + n end
        end
        local add5 = adder(5)
        local add10 = adder(10)
        assert(add5(1) == 6)
        assert(add10(1) == 11)
    "#,
    );
}

#[test]
fn test_env_is_an_upvalue() {
    check(
        r#"
        glob = 'visible'
        local function reader() return glob end
        assert(reader() == 'visible')
        glob = 'updated'
        assert(reader() == 'updated')
        glob = nil
    "#,
    );
}

#[test]
fn test_closure_identity() {
    check(
        r#"
        local function mk() return function() end end
        local f = mk()
        assert(f == f)
        assert(mk() ~= mk())
    "#,
    );
}
