// End-to-end pipeline scenarios: source through lexer, parser, codegen,
// optimizer and the VM, comparing captured stdout byte for byte.

use super::capture;

#[test]
fn test_scenario_arithmetic() {
    assert_eq!(capture("print(2 + 3)"), "5\n");
}

#[test]
fn test_scenario_table_length_and_index() {
    assert_eq!(capture("local t = {1,2,3}; print(#t, t[2])"), "3\t2\n");
}

#[test]
fn test_scenario_recursive_fibonacci() {
    assert_eq!(
        capture(
            "local function f(n) if n<2 then return n end; return f(n-1)+f(n-2) end; print(f(10))"
        ),
        "55\n"
    );
}

#[test]
fn test_scenario_concat() {
    assert_eq!(
        capture(r#"local a,b = "hello", "world"; print(a.." "..b)"#),
        "hello world\n"
    );
}

#[test]
fn test_scenario_closure_counter() {
    assert_eq!(
        capture(
            "local function mk() local x=0; return function() x=x+1; return x end end; \
             local c=mk(); print(c(),c(),c())"
        ),
        "1\t2\t3\n"
    );
}

#[test]
fn test_scenario_numeric_for_sum() {
    assert_eq!(
        capture("local sum=0; for i=1,10 do sum=sum+i end; print(sum)"),
        "55\n"
    );
}

#[test]
fn test_larger_program() {
    let source = r#"
        local function map(t, f)
            local out = {}
            for i, v in ipairs(t) do out[i] = f(v) end
            return out
        end
        local function filter(t, pred)
            local out = {}
            for _, v in ipairs(t) do
                if pred(v) then out[#out + 1] = v end
            end
            return out
        end
        local nums = {}
        for i = 1, 20 do nums[i] = i end
        local squares = map(nums, function(x) return x * x end)
        local evens = filter(squares, function(x) return x % 2 == 0 end)
        local total = 0
        for _, v in ipairs(evens) do total = total + v end
        print(#evens, total)
    "#;
    assert_eq!(capture(source), "10\t1540\n");
}

#[test]
fn test_object_oriented_program() {
    let source = r#"
        local Queue = {}
        Queue.__index = Queue

        function Queue.new()
            return setmetatable({first = 1, last = 0, items = {}}, Queue)
        end

        function Queue:push(v)
            self.last = self.last + 1
            self.items[self.last] = v
        end

        function Queue:pop()
            if self.first > self.last then return nil end
            local v = self.items[self.first]
            self.items[self.first] = nil
            self.first = self.first + 1
            return v
        end

        local q = Queue.new()
        q:push('a') q:push('b') q:push('c')
        print(q:pop(), q:pop(), q:pop(), q:pop())
    "#;
    assert_eq!(capture(source), "a\tb\tc\tnil\n");
}

#[test]
fn test_coroutine_pipeline() {
    let source = r#"
        local producer = coroutine.wrap(function()
            for i = 1, 3 do coroutine.yield(i * 10) end
        end)
        local got = {}
        for i = 1, 3 do got[i] = producer() end
        print(got[1], got[2], got[3])
    "#;
    assert_eq!(capture(source), "10\t20\t30\n");
}

#[test]
fn test_error_reporting_pipeline() {
    let source = r#"
        local ok, err = pcall(function()
            local t = nil
            return t.field
        end)
        print(ok, err ~= nil)
    "#;
    assert_eq!(capture(source), "false\ttrue\n");
}

#[test]
fn test_mixed_output_formats() {
    assert_eq!(
        capture("print(1, 1.0, '1', true, nil)"),
        "1\t1.0\t1\ttrue\tnil\n"
    );
}
