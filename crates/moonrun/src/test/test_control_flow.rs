// Control flow: if/while/repeat/for, break, goto, labels.

use super::{check, run};

#[test]
fn test_if_elseif_else() {
    check(
        r#"
        local function classify(n)
            if n < 0 then return 'negative'
            elseif n == 0 then return 'zero'
            elseif n < 10 then return 'small'
            else return 'big' end
        end
        assert(classify(-5) == 'negative')
        assert(classify(0) == 'zero')
        assert(classify(5) == 'small')
        assert(classify(50) == 'big')
    "#,
    );
}

#[test]
fn test_complex_conditions() {
    check(
        r#"
        local function test(a, b)
            if a and b then return 'both' end
            if a or b then return 'one' end
            return 'none'
        end
        assert(test(true, true) == 'both')
        assert(test(true, false) == 'one')
        assert(test(false, true) == 'one')
        assert(test(false, false) == 'none')

        local n = 7
        if n > 0 and n < 10 and n ~= 5 then n = n * 2 end
        assert(n == 14)
        if not (n == 14) then n = 0 end
        assert(n == 14)
    "#,
    );
}

#[test]
fn test_while_loop() {
    check(
        r#"
        local i, sum = 1, 0
        while i <= 100 do
            sum = sum + i
            i = i + 1
        end
        assert(sum == 5050)

        local never = true
        while false do never = false end
        assert(never)
    "#,
    );
}

#[test]
fn test_repeat_until() {
    check(
        r#"
        local i = 0
        repeat i = i + 1 until i >= 3
        assert(i == 3)

        -- body runs at least once
        local ran = false
        repeat ran = true until true
        assert(ran)

        -- the condition sees the body's locals
        local n = 0
        repeat
            local done = n >= 2
            n = n + 1
        until done
        assert(n == 3)
    "#,
    );
}

#[test]
fn test_numeric_for() {
    check(
        r#"
        local sum = 0
        for i = 1, 10 do sum = sum + i end
        assert(sum == 55)

        local count = 0
        for i = 10, 1, -2 do count = count + 1 end
        assert(count == 5)

        local steps = 0
        for i = 1, 2, 0.5 do steps = steps + 1 end
        assert(steps == 3)

        -- zero-iteration loops
        local never = true
        for i = 2, 1 do never = false end
        for i = 1, 2, -1 do never = false end
        assert(never)

        -- the loop variable is local to the loop
        local i = 'outer'
        for i = 1, 3 do end
        assert(i == 'outer')
    "#,
    );
}

#[test]
fn test_numeric_for_zero_step_errors() {
    assert!(run("for i = 1, 10, 0 do end").is_err());
}

#[test]
fn test_generic_for() {
    check(
        r#"
        local t = {10, 20, 30}
        local sum = 0
        for i, v in ipairs(t) do sum = sum + i * v end
        assert(sum == 10 + 40 + 90)

        local count = 0
        for k, v in pairs({a = 1, b = 2, c = 3}) do count = count + v end
        assert(count == 6)

        -- custom stateless iterator
        local function upto(n)
            local function iter(limit, i)
                if i < limit then return i + 1 end
            end
            return iter, n, 0
        end
        local total = 0
        for i in upto(4) do total = total + i end
        assert(total == 10)
    "#,
    );
}

#[test]
fn test_generic_for_stops_on_nil() {
    check(
        r#"
        local t = {1, 2, nil, 4}
        local last = 0
        for i, v in ipairs(t) do last = i end
        assert(last == 2)
    "#,
    );
}

#[test]
fn test_break() {
    check(
        r#"
        local i = 0
        while true do
            i = i + 1
            if i == 5 then break end
        end
        assert(i == 5)

        local found
        for i = 1, 10 do
            if i * i > 20 then found = i break end
        end
        assert(found == 5)

        -- break leaves only the innermost loop
        local outer = 0
        for i = 1, 3 do
            for j = 1, 10 do break end
            outer = outer + 1
        end
        assert(outer == 3)

        local r = 0
        repeat
            r = r + 1
            if r == 2 then break end
        until false
        assert(r == 2)
    "#,
    );
}

#[test]
fn test_goto_backward() {
    check(
        r#"
        local i = 1
        ::top::
        if i < 5 then
            i = i + 1
            goto top
        end
        assert(i == 5)
    "#,
    );
}

#[test]
fn test_goto_forward() {
    check(
        r#"
        local reached = false
        do goto after end
        reached = true
        ::after::
        assert(not reached)
    "#,
    );
}

#[test]
fn test_goto_as_continue() {
    check(
        r#"
        local evens = 0
        for i = 1, 10 do
            if i % 2 == 1 then goto continue end
            evens = evens + 1
            ::continue::
        end
        assert(evens == 5)
    "#,
    );
}

#[test]
fn test_goto_unresolved_is_error() {
    assert!(run("goto nowhere").is_err());
}

#[test]
fn test_duplicate_label_is_error() {
    assert!(run("::l:: ::l::").is_err());
}

#[test]
fn test_break_outside_loop_is_error() {
    assert!(run("break").is_err());
}

#[test]
fn test_nested_loop_mix() {
    check(
        r#"
        local grid = {}
        for i = 1, 3 do
            grid[i] = {}
            local j = 1
            while j <= 3 do
                grid[i][j] = i * 10 + j
                j = j + 1
            end
        end
        assert(grid[2][3] == 23)
        assert(grid[3][1] == 31)
    "#,
    );
}
