// Operator semantics: integer/float arithmetic, bitwise, comparison,
// concatenation, length, logical operators.

use super::{check, run};
use crate::lua_vm::ErrorKind;

#[test]
fn test_integer_arithmetic() {
    check(
        r#"
        assert(2 + 3 == 5)
        assert(7 - 10 == -3)
        assert(6 * 7 == 42)
        assert(7 // 2 == 3)
        assert(-7 // 2 == -4)
        assert(7 % 3 == 1)
        assert(-7 % 3 == 2)
        assert(7 % -3 == -2)
        assert(math.type(2 + 3) == 'integer')
    "#,
    );
}

#[test]
fn test_division_and_power_always_float() {
    check(
        r#"
        assert(7 / 2 == 3.5)
        assert(math.type(4 / 2) == 'float')
        assert(4 / 2 == 2.0)
        assert(2 ^ 10 == 1024.0)
        assert(math.type(2 ^ 2) == 'float')
        assert(1 / 0 == math.huge)
        assert(-1 / 0 == -math.huge)
    "#,
    );
}

#[test]
fn test_mixed_arithmetic_promotes() {
    check(
        r#"
        assert(1 + 0.5 == 1.5)
        assert(math.type(1 + 1.0) == 'float')
        assert(10.0 // 3 == 3.0)
        assert(math.type(10.0 // 3) == 'float')
        assert(5.5 % 2 == 1.5)
    "#,
    );
}

#[test]
fn test_integer_overflow_wraps() {
    check(
        r#"
        assert(math.maxinteger + 1 == math.mininteger)
        assert(math.mininteger - 1 == math.maxinteger)
    "#,
    );
}

#[test]
fn test_integer_division_by_zero_errors() {
    let err = run("return 1 // 0").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime);
    let err = run("return 1 % 0").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime);
    // Float floor division by zero is inf, not an error
    check("assert(1.0 // 0 == math.huge)");
}

#[test]
fn test_bitwise_operators() {
    check(
        r#"
        assert(3 & 5 == 1)
        assert(3 | 5 == 7)
        assert(3 ~ 5 == 6)
        assert(~0 == -1)
        assert(1 << 4 == 16)
        assert(256 >> 4 == 16)
        assert(1 << 64 == 0)
        assert(-1 >> 1 == math.maxinteger)
        assert(16 >> -2 == 64)
        assert(3.0 & 1 == 1)
    "#,
    );
}

#[test]
fn test_bitwise_requires_integral() {
    let err = run("return 1.5 & 2").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime);
}

#[test]
fn test_numeric_string_coercion() {
    check(
        r#"
        assert('10' + 5 == 15)
        assert('3' * '4' == 12)
        assert('0x10' + 0 == 16)
        assert(10 .. '' == '10')
        assert(1.5 .. 'x' == '1.5x')
    "#,
    );
}

#[test]
fn test_arithmetic_on_non_numbers_errors() {
    let err = run("return {} + 1").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
    let err = run("return 'abc' * 2").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
}

#[test]
fn test_comparison() {
    check(
        r#"
        assert(1 < 2)
        assert(2 <= 2)
        assert(3 > 2)
        assert(3 >= 3)
        assert(1 ~= 2)
        assert(1 == 1.0)
        assert(1 < 1.5)
        assert('a' < 'b')
        assert('abc' < 'abd')
        assert('Z' < 'a')
        assert(not (1 == '1'))
    "#,
    );
}

#[test]
fn test_comparison_type_mismatch_errors() {
    let err = run("return 1 < 'x'").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
}

#[test]
fn test_equality_across_subtypes() {
    check(
        r#"
        assert(0 == 0.0)
        assert(0 == -0.0)
        assert(2^53 == 9007199254740992)
        assert(0/0 ~= 0/0)
    "#,
    );
}

#[test]
fn test_concat() {
    check(
        r#"
        assert('a' .. 'b' .. 'c' == 'abc')
        assert(1 .. 2 == '12')
        assert('n=' .. 42 == 'n=42')
        local parts = 'x'
        for i = 1, 3 do parts = parts .. i end
        assert(parts == 'x123')
    "#,
    );
}

#[test]
fn test_length_operator() {
    check(
        r#"
        assert(#'hello' == 5)
        assert(#'' == 0)
        assert(#{} == 0)
        assert(#{1, 2, 3} == 3)
        local t = {1, 2, 3}
        t[3] = nil
        assert(#t == 2)
    "#,
    );
}

#[test]
fn test_logical_operators() {
    check(
        r#"
        assert((true and 1) == 1)
        assert((false and 1) == false)
        assert((nil and 1) == nil)
        assert((true or 2) == true)
        assert((false or 2) == 2)
        assert((nil or 'default') == 'default')
        assert(not nil)
        assert(not false)
        assert(not not 1)
        -- short circuit: rhs must not evaluate
        local evaluated = false
        local function touch() evaluated = true return true end
        local _ = false and touch()
        assert(not evaluated)
        local _ = true or touch()
        assert(not evaluated)
    "#,
    );
}

#[test]
fn test_truthiness_only_nil_and_false() {
    check(
        r#"
        assert(0 and true)
        assert(0.0 and true)
        assert('' and true)
        local falsy = 0
        if nil then falsy = 1 end
        if false then falsy = 2 end
        assert(falsy == 0)
    "#,
    );
}

#[test]
fn test_unary_minus() {
    check(
        r#"
        assert(-(5) == -5)
        assert(-(-5) == 5)
        assert(-(2.5) == -2.5)
        assert(-'3' == -3)
        assert(math.type(-math.mininteger) == 'integer')
    "#,
    );
}
