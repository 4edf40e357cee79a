// Coercion rules: numeric strings in arithmetic, numbers in concatenation,
// and Lua's default number rendering (%.14g with a ".0" suffix for
// integral floats).

use std::rc::Rc;

use crate::lua_value::LuaValue;
use crate::lua_vm::lua_state::LuaVM;
use crate::lua_vm::metamethod::MetaMethod;
use crate::lua_vm::number_ops::Number;
use crate::lua_vm::{LuaError, LuaResult};

/// Arithmetic operand view: numbers directly, strings via the tonumber
/// grammar.
pub fn to_number(value: &LuaValue) -> Option<Number> {
    match value {
        LuaValue::Integer(i) => Some(Number::Int(*i)),
        LuaValue::Float(f) => Some(Number::Float(*f)),
        LuaValue::String(s) => match parse_lua_number(s.as_str())? {
            LuaValue::Integer(i) => Some(Number::Int(i)),
            LuaValue::Float(f) => Some(Number::Float(f)),
            _ => None,
        },
        _ => None,
    }
}

/// Parse a string with Lua's number grammar: optional sign, decimal
/// integer/float, or 0x hex integer/float. Surrounding whitespace allowed.
pub fn parse_lua_number(s: &str) -> Option<LuaValue> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (negative, body) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    if body.is_empty() {
        return None;
    }
    let lower = body.to_ascii_lowercase();
    if let Some(hex) = lower.strip_prefix("0x") {
        return parse_hex_body(hex, negative);
    }
    // Reject forms Rust accepts but Lua does not
    if lower.contains("inf") || lower.contains("nan") {
        return None;
    }
    if let Ok(i) = body.parse::<i64>() {
        return Some(LuaValue::Integer(if negative { i.wrapping_neg() } else { i }));
    }
    if let Ok(f) = body.parse::<f64>() {
        return Some(LuaValue::Float(if negative { -f } else { f }));
    }
    None
}

fn parse_hex_body(hex: &str, negative: bool) -> Option<LuaValue> {
    if hex.is_empty() {
        return None;
    }
    let mut mantissa: u64 = 0;
    let mut float_value = 0.0f64;
    let mut exponent: i32 = 0;
    let mut digits = 0usize;
    let mut is_float = false;
    let mut chars = hex.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c.to_digit(16) {
            Some(d) => {
                mantissa = mantissa.wrapping_mul(16).wrapping_add(d as u64);
                float_value = float_value * 16.0 + d as f64;
                digits += 1;
                chars.next();
            }
            None => break,
        }
    }
    if chars.peek() == Some(&'.') {
        is_float = true;
        chars.next();
        while let Some(&c) = chars.peek() {
            match c.to_digit(16) {
                Some(d) => {
                    float_value = float_value * 16.0 + d as f64;
                    exponent -= 4;
                    digits += 1;
                    chars.next();
                }
                None => break,
            }
        }
    }
    if digits == 0 {
        return None;
    }
    if matches!(chars.peek(), Some('p') | Some('P')) {
        is_float = true;
        chars.next();
        let neg_exp = match chars.peek() {
            Some('-') => {
                chars.next();
                true
            }
            Some('+') => {
                chars.next();
                false
            }
            _ => false,
        };
        let mut exp = 0i32;
        let mut exp_digits = 0;
        while let Some(&c) = chars.peek() {
            match c.to_digit(10) {
                Some(d) => {
                    exp = exp.saturating_mul(10).saturating_add(d as i32);
                    exp_digits += 1;
                    chars.next();
                }
                None => break,
            }
        }
        if exp_digits == 0 {
            return None;
        }
        exponent += if neg_exp { -exp } else { exp };
    }
    if chars.next().is_some() {
        return None;
    }

    if is_float {
        let value = float_value * (exponent as f64).exp2();
        Some(LuaValue::Float(if negative { -value } else { value }))
    } else {
        let i = mantissa as i64;
        Some(LuaValue::Integer(if negative { i.wrapping_neg() } else { i }))
    }
}

/// Lua's default float rendering: %.14g, with ".0" appended when the result
/// reads as an integer.
pub fn fmt_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    let mut text = fmt_g(f, 14);
    if !text.contains('.') && !text.contains('e') && !text.contains('n') {
        text.push_str(".0");
    }
    text
}

/// printf-style %g: fixed or scientific notation, `prec` significant digits,
/// trailing zeros trimmed.
fn fmt_g(f: f64, prec: i32) -> String {
    if f == 0.0 {
        return "0".to_string();
    }
    let exp = f.abs().log10().floor() as i32;
    if exp >= -4 && exp < prec {
        let decimals = (prec - 1 - exp).max(0) as usize;
        let mut text = format!("{:.*}", decimals, f);
        if text.contains('.') {
            while text.ends_with('0') {
                text.pop();
            }
            if text.ends_with('.') {
                text.pop();
            }
        }
        text
    } else {
        let text = format!("{:.*e}", (prec - 1).max(0) as usize, f);
        // Rust renders "1.5e5"; normalize to "1.5e+05"
        let (mantissa, exponent) = text.split_once('e').expect("scientific format");
        let mut mantissa = mantissa.to_string();
        if mantissa.contains('.') {
            while mantissa.ends_with('0') {
                mantissa.pop();
            }
            if mantissa.ends_with('.') {
                mantissa.pop();
            }
        }
        let exp_num: i32 = exponent.parse().unwrap_or(0);
        format!("{}e{}{:02}", mantissa, if exp_num < 0 { "-" } else { "+" }, exp_num.abs())
    }
}

/// Raw display text for a value, without consulting __tostring.
pub fn display_value(value: &LuaValue) -> String {
    match value {
        LuaValue::Nil => "nil".to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        LuaValue::Integer(i) => {
            let mut buffer = itoa::Buffer::new();
            buffer.format(*i).to_string()
        }
        LuaValue::Float(f) => fmt_float(*f),
        LuaValue::String(s) => s.as_str().to_string(),
        LuaValue::Table(t) => format!("table: {:p}", Rc::as_ptr(t)),
        LuaValue::Function(f) => format!("function: {:p}", Rc::as_ptr(f)),
        LuaValue::Userdata(u) => format!("userdata: {:p}", Rc::as_ptr(u)),
        LuaValue::Thread(t) => format!("thread: {:p}", Rc::as_ptr(t)),
    }
}

impl LuaVM {
    /// `tostring` semantics: __tostring first, then __name for the prefix,
    /// then the default rendering.
    pub fn tostring_value(&mut self, value: &LuaValue) -> LuaResult<String> {
        if let Some(mm) = self.get_metamethod(value, MetaMethod::ToString) {
            let results = self.call_value(mm, vec![value.clone()])?;
            let first = results.into_iter().next().unwrap_or(LuaValue::Nil);
            return match first.as_str() {
                Some(s) => Ok(s.to_string()),
                None => Err(LuaError::runtime("'__tostring' must return a string")),
            };
        }
        Ok(display_value(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_integers() {
        assert_eq!(parse_lua_number("42"), Some(LuaValue::Integer(42)));
        assert_eq!(parse_lua_number("  -7  "), Some(LuaValue::Integer(-7)));
        assert_eq!(parse_lua_number("0xFF"), Some(LuaValue::Integer(255)));
        assert_eq!(parse_lua_number("0x10"), Some(LuaValue::Integer(16)));
    }

    #[test]
    fn test_parse_floats() {
        assert_eq!(parse_lua_number("3.5"), Some(LuaValue::Float(3.5)));
        assert_eq!(parse_lua_number("1e2"), Some(LuaValue::Float(100.0)));
        assert_eq!(parse_lua_number("0x1p4"), Some(LuaValue::Float(16.0)));
        assert_eq!(parse_lua_number("0x.8"), Some(LuaValue::Float(0.5)));
    }

    #[test]
    fn test_parse_rejects() {
        assert_eq!(parse_lua_number(""), None);
        assert_eq!(parse_lua_number("abc"), None);
        assert_eq!(parse_lua_number("1x"), None);
        assert_eq!(parse_lua_number("inf"), None);
        assert_eq!(parse_lua_number("0x"), None);
    }

    #[test]
    fn test_fmt_float() {
        assert_eq!(fmt_float(1.0), "1.0");
        assert_eq!(fmt_float(3.5), "3.5");
        assert_eq!(fmt_float(3.14), "3.14");
        assert_eq!(fmt_float(0.0), "0.0");
        assert_eq!(fmt_float(f64::INFINITY), "inf");
        assert_eq!(fmt_float(100.0), "100.0");
        assert_eq!(fmt_float(1e100), "1e+100");
        assert_eq!(fmt_float(0.5), "0.5");
    }
}
