// Metatable behavior: __index, __newindex, arithmetic, comparison, __call,
// __concat, __len, __tostring, __eq, __close.

use super::{check, run};

#[test]
fn test_index_function_and_table() {
    check(
        r#"
        local defaults = {color = 'red'}
        local t = setmetatable({}, {__index = defaults})
        assert(t.color == 'red')
        t.color = 'blue'
        assert(t.color == 'blue')
        assert(defaults.color == 'red')

        local u = setmetatable({}, {__index = function(_, k) return k .. '!' end})
        assert(u.hey == 'hey!')
    "#,
    );
}

#[test]
fn test_index_chain() {
    check(
        r#"
        local base = {x = 1}
        local mid = setmetatable({y = 2}, {__index = base})
        local top = setmetatable({z = 3}, {__index = mid})
        assert(top.x == 1 and top.y == 2 and top.z == 3)
        assert(top.missing == nil)
    "#,
    );
}

#[test]
fn test_index_loop_is_bounded() {
    let err = run(
        r#"
        local a = {}
        local b = {}
        setmetatable(a, {__index = b})
        setmetatable(b, {__index = a})
        return a.missing
    "#,
    )
    .unwrap_err();
    assert!(err.message.contains("__index"));
}

#[test]
fn test_newindex() {
    check(
        r#"
        local log = {}
        local t = setmetatable({}, {
            __newindex = function(t, k, v) log[#log + 1] = k rawset(t, k, v) end,
        })
        t.a = 1
        t.b = 2
        -- existing keys bypass __newindex
        t.a = 3
        assert(#log == 2 and log[1] == 'a' and log[2] == 'b')
        assert(t.a == 3)

        -- __newindex as a table redirects writes
        local store = {}
        local proxy = setmetatable({}, {__newindex = store})
        proxy.k = 'v'
        assert(rawget(proxy, 'k') == nil)
        assert(store.k == 'v')
    "#,
    );
}

#[test]
fn test_arithmetic_metamethods() {
    check(
        r#"
        local mt = {}
        mt.__add = function(a, b) return a.n + b.n end
        mt.__sub = function(a, b) return a.n - b.n end
        mt.__mul = function(a, b) return a.n * b.n end
        mt.__unm = function(a) return -a.n end
        local function box(n) return setmetatable({n = n}, mt) end
        assert(box(3) + box(4) == 7)
        assert(box(10) - box(4) == 6)
        assert(box(3) * box(4) == 12)
        assert(-box(5) == -5)
    "#,
    );
}

#[test]
fn test_arithmetic_metamethod_on_either_operand() {
    check(
        r#"
        local mt = {__add = function(a, b)
            if type(a) == 'number' then return a + b.n end
            return a.n + b
        end}
        local v = setmetatable({n = 10}, mt)
        assert(v + 5 == 15)
        assert(5 + v == 15)
    "#,
    );
}

#[test]
fn test_comparison_metamethods() {
    check(
        r#"
        local mt
        mt = {
            __lt = function(a, b) return a.rank < b.rank end,
            __le = function(a, b) return a.rank <= b.rank end,
        }
        local function rank(r) return setmetatable({rank = r}, mt) end
        assert(rank(1) < rank(2))
        assert(rank(2) > rank(1))
        assert(rank(2) <= rank(2))
        assert(not (rank(3) < rank(2)))
    "#,
    );
}

#[test]
fn test_eq_metamethod() {
    check(
        r#"
        local mt = {__eq = function(a, b) return a.id == b.id end}
        local a = setmetatable({id = 7}, mt)
        local b = setmetatable({id = 7}, mt)
        local c = setmetatable({id = 8}, mt)
        assert(a == b)
        assert(a ~= c)
        -- identity still wins without metamethod consultation
        assert(a == a)
        -- different types never consult __eq
        assert(not (a == 7))
    "#,
    );
}

#[test]
fn test_call_metamethod() {
    check(
        r#"
        local callable = setmetatable({total = 0}, {
            __call = function(self, n) self.total = self.total + n return self.total end,
        })
        assert(callable(5) == 5)
        assert(callable(3) == 8)
    "#,
    );
}

#[test]
fn test_concat_metamethod() {
    check(
        r#"
        local mt = {__concat = function(a, b)
            local an = type(a) == 'table' and a.s or a
            local bn = type(b) == 'table' and b.s or b
            return an .. '|' .. bn
        end}
        local w = setmetatable({s = 'mid'}, mt)
        assert('pre' .. w == 'pre|mid')
        assert(w .. 'post' == 'mid|post')
    "#,
    );
}

#[test]
fn test_len_metamethod() {
    check(
        r#"
        local t = setmetatable({1, 2, 3}, {__len = function() return 99 end})
        assert(#t == 99)
        assert(rawlen(t) == 3)
    "#,
    );
}

#[test]
fn test_tostring_metamethod() {
    check(
        r#"
        local p = setmetatable({x = 1, y = 2}, {
            __tostring = function(self) return '(' .. self.x .. ',' .. self.y .. ')' end,
        })
        assert(tostring(p) == '(1,2)')
    "#,
    );
}

#[test]
fn test_metatable_protection() {
    check(
        r#"
        local t = setmetatable({}, {__metatable = 'locked'})
        assert(getmetatable(t) == 'locked')
        local ok = pcall(setmetatable, t, {})
        assert(not ok)
    "#,
    );
}

#[test]
fn test_close_metamethod() {
    check(
        r#"
        local order = {}
        do
            local a <close> = setmetatable({}, {__close = function() order[#order + 1] = 'a' end})
            local b <close> = setmetatable({}, {__close = function() order[#order + 1] = 'b' end})
        end
        -- closed in reverse declaration order
        assert(#order == 2)
        assert(order[1] == 'b' and order[2] == 'a')
    "#,
    );
}

#[test]
fn test_close_on_break() {
    check(
        r#"
        local closed = false
        for i = 1, 3 do
            local guard <close> = setmetatable({}, {__close = function() closed = true end})
            break
        end
        assert(closed)
    "#,
    );
}

#[test]
fn test_close_requires_metamethod() {
    let err = run("local x <close> = {}").unwrap_err();
    assert!(err.message.contains("__close"));
}

#[test]
fn test_userdata_metatable_from_the_embedder() {
    let mut vm = super::new_vm();
    let ud = vm.create_userdata(16, "buffer");
    let mt = vm.create_table();
    let index_fn = vm
        .execute_string("return function(u, k) return 'ud:' .. k end")
        .unwrap();
    let key = vm.create_string("__index");
    mt.as_table().unwrap().borrow_mut().raw_set(key, index_fn);
    ud.as_userdata().unwrap().set_metatable(mt.as_table());
    vm.set_global("u", ud);
    vm.execute_string(
        r#"
        assert(type(u) == 'userdata')
        assert(u.size == 'ud:size')
    "#,
    )
    .unwrap();
}

#[test]
fn test_string_methods_via_metatable() {
    check(
        r#"
        local s = 'hello'
        assert(s:upper() == 'HELLO')
        assert(s:len() == 5)
        assert(('abc'):sub(2) == 'bc')
    "#,
    );
}
