// Coroutines: create/resume/yield round trips, status transitions, wrap,
// error propagation.

use super::check;

#[test]
fn test_basic_resume_yield() {
    check(
        r#"
        local co = coroutine.create(function(a, b)
            local c = coroutine.yield(a + b)
            return c * 2
        end)
        local ok, sum = coroutine.resume(co, 3, 4)
        assert(ok and sum == 7)
        local ok2, doubled = coroutine.resume(co, 10)
        assert(ok2 and doubled == 20)
        assert(coroutine.status(co) == 'dead')
    "#,
    );
}

#[test]
fn test_multiple_yield_values() {
    check(
        r#"
        local co = coroutine.create(function()
            local a, b = coroutine.yield(1, 2, 3)
            return a + b
        end)
        local ok, x, y, z = coroutine.resume(co)
        assert(ok and x == 1 and y == 2 and z == 3)
        local ok2, sum = coroutine.resume(co, 10, 20)
        assert(ok2 and sum == 30)
    "#,
    );
}

#[test]
fn test_status_transitions() {
    check(
        r#"
        local co = coroutine.create(function() coroutine.yield() end)
        assert(coroutine.status(co) == 'suspended')
        coroutine.resume(co)
        assert(coroutine.status(co) == 'suspended')
        coroutine.resume(co)
        assert(coroutine.status(co) == 'dead')
        -- resuming a dead coroutine fails gracefully
        local ok, err = coroutine.resume(co)
        assert(not ok)
        assert(tostring(err):find('dead') ~= nil or err ~= nil)
    "#,
    );
}

#[test]
fn test_normal_status_of_resumer() {
    check(
        r#"
        local outer
        local inner = coroutine.create(function()
            assert(coroutine.status(outer) == 'normal')
            coroutine.yield()
        end)
        outer = coroutine.create(function()
            local ok = coroutine.resume(inner)
            assert(ok)
        end)
        assert(coroutine.resume(outer))
    "#,
    );
}

#[test]
fn test_generator_pattern() {
    check(
        r#"
        local function range(n)
            return coroutine.wrap(function()
                for i = 1, n do coroutine.yield(i) end
            end)
        end
        local sum = 0
        local nextval = range(5)
        local v = nextval()
        while v do
            sum = sum + v
            v = nextval()
        end
        assert(sum == 15)
    "#,
    );
}

#[test]
fn test_error_inside_coroutine() {
    check(
        r#"
        local co = coroutine.create(function() error('inner failure') end)
        local ok, err = coroutine.resume(co)
        assert(not ok)
        assert(tostring(err):find('inner failure') ~= nil)
        assert(coroutine.status(co) == 'dead')
    "#,
    );
}

#[test]
fn test_wrap_reraises() {
    check(
        r#"
        local f = coroutine.wrap(function() error('wrapped failure') end)
        local ok, err = pcall(f)
        assert(not ok)
        assert(tostring(err):find('wrapped failure') ~= nil)
    "#,
    );
}

#[test]
fn test_running_and_isyieldable() {
    check(
        r#"
        local main_co, is_main = coroutine.running()
        assert(is_main == true)
        assert(not coroutine.isyieldable())

        local observed
        local co = coroutine.create(function()
            local self_co, inside_main = coroutine.running()
            observed = (inside_main == false) and coroutine.isyieldable()
        end)
        coroutine.resume(co)
        assert(observed == true)
    "#,
    );
}

#[test]
fn test_yield_outside_coroutine_fails() {
    check(
        r#"
        local ok, err = pcall(coroutine.yield)
        assert(not ok)
    "#,
    );
}

#[test]
fn test_resume_passes_first_arguments() {
    check(
        r#"
        local co = coroutine.create(function(a, b, c)
            return a, b, c
        end)
        local ok, x, y, z = coroutine.resume(co, 'p', 'q', 'r')
        assert(ok and x == 'p' and y == 'q' and z == 'r')
    "#,
    );
}

#[test]
fn test_coroutine_keeps_own_stack() {
    check(
        r#"
        local function worker(id)
            local acc = 0
            for i = 1, 3 do
                acc = acc + i
                coroutine.yield(id .. ':' .. acc)
            end
            return id .. ':done'
        end
        local a = coroutine.create(function() return worker('a') end)
        local b = coroutine.create(function() return worker('b') end)
        local _, r1 = coroutine.resume(a)
        local _, r2 = coroutine.resume(b)
        local _, r3 = coroutine.resume(a)
        assert(r1 == 'a:1' and r2 == 'b:1' and r3 == 'a:3')
    "#,
    );
}
