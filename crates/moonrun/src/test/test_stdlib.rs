// Standard library surface: basic, math, string, table.

use super::{capture, check};

#[test]
fn test_print_formatting() {
    assert_eq!(capture("print('Hello, World!')"), "Hello, World!\n");
    assert_eq!(capture("print(1, 2, 3)"), "1\t2\t3\n");
    assert_eq!(capture("print()"), "\n");
    assert_eq!(capture("print(nil, true, false)"), "nil\ttrue\tfalse\n");
    assert_eq!(capture("print(1.5)"), "1.5\n");
    assert_eq!(capture("print(1e100)"), "1e+100\n");
    assert_eq!(capture("print(10 / 2)"), "5.0\n");
}

#[test]
fn test_type() {
    check(
        r#"
        assert(type(nil) == 'nil')
        assert(type(true) == 'boolean')
        assert(type(42) == 'number')
        assert(type(3.14) == 'number')
        assert(type('hello') == 'string')
        assert(type({}) == 'table')
        assert(type(print) == 'function')
        assert(type(coroutine.create(print)) == 'thread')
    "#,
    );
}

#[test]
fn test_tostring() {
    check(
        r#"
        assert(tostring(123) == '123')
        assert(tostring(-7) == '-7')
        assert(tostring(1.5) == '1.5')
        assert(tostring(true) == 'true')
        assert(tostring(nil) == 'nil')
        assert(tostring('s') == 's')
        assert(tostring({}):sub(1, 6) == 'table:')
        assert(tostring(print):sub(1, 9) == 'function:')
    "#,
    );
}

#[test]
fn test_tonumber() {
    check(
        r#"
        assert(tonumber('123') == 123)
        assert(tonumber('3.14') == 3.14)
        assert(tonumber('  -42  ') == -42)
        assert(tonumber('0x1F') == 31)
        assert(tonumber('1e2') == 100.0)
        assert(tonumber('bad') == nil)
        assert(tonumber('') == nil)
        assert(tonumber(42) == 42)
        assert(tonumber('FF', 16) == 255)
        assert(tonumber('z', 36) == 35)
        assert(tonumber('777', 8) == 511)
        assert(tonumber('8', 8) == nil)
    "#,
    );
}

#[test]
fn test_assert_and_error() {
    check(
        r#"
        local a, b = assert(1, 'extra')
        assert(a == 1 and b == 'extra')

        local ok, msg = pcall(function() assert(false, 'because') end)
        assert(not ok)
        assert(msg:find('because') ~= nil)

        local ok2, msg2 = pcall(function() assert(nil) end)
        assert(not ok2)
        assert(msg2:find('assertion failed') ~= nil)
    "#,
    );
}

#[test]
fn test_pcall_with_error_object() {
    check(
        r#"
        local ok, e = pcall(function() error({code = 42}) end)
        assert(not ok)
        assert(type(e) == 'table')
        assert(e.code == 42)
    "#,
    );
}

#[test]
fn test_pcall_message_carries_location() {
    check(
        r#"
        local ok, msg = pcall(function() error('lost') end)
        assert(not ok)
        assert(type(msg) == 'string')
        assert(msg:find('lost') ~= nil)
        assert(msg:find('chunk') ~= nil)
    "#,
    );
}

#[test]
fn test_xpcall() {
    check(
        r#"
        local handled
        local ok, result = xpcall(function() error('boom') end, function(e)
            handled = e
            return 'recovered'
        end)
        assert(not ok)
        assert(result == 'recovered')
        assert(tostring(handled):find('boom') ~= nil)

        local ok2, v = xpcall(function() return 7 end, function() end)
        assert(ok2 and v == 7)
    "#,
    );
}

#[test]
fn test_select() {
    check(
        r#"
        assert(select('#') == 0)
        assert(select('#', 1, 2, 3) == 3)
        local a, b = select(2, 'x', 'y', 'z')
        assert(a == 'y' and b == 'z')
        assert(select(-1, 'p', 'q') == 'q')
    "#,
    );
}

#[test]
fn test_rawops() {
    check(
        r#"
        local t = setmetatable({}, {
            __index = function() return 'ghost' end,
            __newindex = function() error('blocked') end,
        })
        assert(t.any == 'ghost')
        assert(rawget(t, 'any') == nil)
        rawset(t, 'real', 1)
        assert(rawget(t, 'real') == 1)
        assert(rawequal(t, t))
        assert(not rawequal(t, {}))
        assert(rawlen({1, 2}) == 2)
        assert(rawlen('abc') == 3)
    "#,
    );
}

#[test]
fn test_math_functions() {
    check(
        r#"
        assert(math.abs(-5) == 5)
        assert(math.abs(5) == 5)
        assert(math.abs(-2.5) == 2.5)
        assert(math.floor(3.7) == 3)
        assert(math.floor(-3.2) == -4)
        assert(math.ceil(3.2) == 4)
        assert(math.ceil(-3.7) == -3)
        assert(math.sqrt(16) == 4.0)
        assert(math.max(1, 5, 3) == 5)
        assert(math.min(1, 5, 3) == 1)
        assert(math.max(1.5, 2) == 2)
        assert(math.fmod(7, 3) == 1)
        local int_part, frac = math.modf(3.25)
        assert(int_part == 3.0 and frac == 0.25)
        assert(math.tointeger(5.0) == 5)
        assert(math.tointeger(5.5) == nil)
        assert(math.type(1) == 'integer')
        assert(math.type(1.0) == 'float')
        assert(math.type('1') == nil)
        assert(math.huge > 1e300)
        assert(math.pi > 3.14 and math.pi < 3.15)
        assert(math.exp(0) == 1.0)
        assert(math.log(math.exp(1)) == 1.0)
        assert(math.abs(math.log(8, 2) - 3.0) < 1e-12)
    "#,
    );
}

#[test]
fn test_math_random() {
    check(
        r#"
        math.randomseed(42)
        for i = 1, 50 do
            local r = math.random()
            assert(r >= 0 and r < 1)
            local n = math.random(10)
            assert(n >= 1 and n <= 10 and math.type(n) == 'integer')
            local m = math.random(5, 7)
            assert(m >= 5 and m <= 7)
        end
        -- the same seed replays the same sequence
        math.randomseed(7)
        local first = math.random(1000000)
        math.randomseed(7)
        assert(math.random(1000000) == first)
    "#,
    );
}

#[test]
fn test_string_functions() {
    check(
        r#"
        assert(string.len('hello') == 5)
        assert(('hello'):sub(2, 4) == 'ell')
        assert(('hello'):sub(-3) == 'llo')
        assert(('hello'):sub(2) == 'ello')
        assert(('hello'):sub(10) == '')
        assert(('abc'):upper() == 'ABC')
        assert(('AbC'):lower() == 'abc')
        assert(('ab'):rep(3) == 'ababab')
        assert(('ab'):rep(3, '-') == 'ab-ab-ab')
        assert(('ab'):rep(0) == '')
        assert(('abc'):reverse() == 'cba')
        assert(('A'):byte() == 65)
        local a, b = ('AB'):byte(1, 2)
        assert(a == 65 and b == 66)
        assert(string.char(72, 105) == 'Hi')
        assert(('hello world'):find('world') == 7)
        assert(('hello'):find('zz') == nil)
    "#,
    );
}

#[test]
fn test_string_format() {
    check(
        r#"
        assert(string.format('%d items', 3) == '3 items')
        assert(string.format('%5d', 42) == '   42')
        assert(string.format('%-5d|', 42) == '42   |')
        assert(string.format('%05d', 42) == '00042')
        assert(string.format('%x', 255) == 'ff')
        assert(string.format('%X', 255) == 'FF')
        assert(string.format('%o', 8) == '10')
        assert(string.format('%s=%s', 'k', 'v') == 'k=v')
        assert(string.format('%.2f', 3.14159) == '3.14')
        assert(string.format('%c', 65) == 'A')
        assert(string.format('100%%') == '100%')
        assert(string.format('%q', 'a"b') == '"a\\"b"')
        assert(string.format('%.3s', 'abcdef') == 'abc')
    "#,
    );
}

#[test]
fn test_table_functions() {
    check(
        r#"
        local t = {1, 2, 3}
        table.insert(t, 4)
        assert(#t == 4 and t[4] == 4)
        table.insert(t, 1, 0)
        assert(#t == 5 and t[1] == 0 and t[2] == 1)

        local removed = table.remove(t)
        assert(removed == 4 and #t == 4)
        local first = table.remove(t, 1)
        assert(first == 0 and t[1] == 1)

        assert(table.concat({1, 2, 3}) == '123')
        assert(table.concat({'a', 'b', 'c'}, ', ') == 'a, b, c')
        assert(table.concat({'x', 'y', 'z'}, '-', 2, 3) == 'y-z')
        assert(table.concat({}) == '')

        local a, b, c = table.unpack({10, 20, 30})
        assert(a == 10 and b == 20 and c == 30)
        local mid = table.unpack({1, 2, 3, 4}, 2, 3)
        assert(mid == 2)

        local packed = table.pack('p', 'q')
        assert(packed.n == 2 and packed[1] == 'p' and packed[2] == 'q')
    "#,
    );
}

#[test]
fn test_version_global() {
    check("assert(_VERSION == 'Lua 5.5')");
}

#[test]
fn test_g_is_globals() {
    check(
        r#"
        marker = 'present'
        assert(_G.marker == 'present')
        _G.other = 1
        assert(other == 1)
        assert(_G._G == _G)
        marker = nil
        other = nil
    "#,
    );
}
