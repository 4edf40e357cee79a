// String library: len, sub, upper, lower, rep, reverse, byte, char, format.
// Opening the library also installs the shared string metatable with
// __index pointing at the library table, so `s:upper()` works.

use crate::lib_module;
use crate::lua_value::LuaValue;
use crate::lua_vm::coercion;
use crate::lua_vm::{LuaError, LuaResult, LuaVM};
use crate::stdlib::registry::LibraryModule;

pub fn create_string_lib() -> LibraryModule {
    lib_module!("string", {
        "len" => string_len,
        "sub" => string_sub,
        "upper" => string_upper,
        "lower" => string_lower,
        "rep" => string_rep,
        "reverse" => string_reverse,
        "byte" => string_byte,
        "char" => string_char,
        "format" => string_format,
        "find" => string_find,
    })
}

/// Plain-text find: returns the 1-based start and end of the first
/// occurrence at or after init, or nil. (No pattern matching.)
fn string_find(_vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let s = arg_str(&args, 0, "find")?;
    let needle = arg_str(&args, 1, "find")?;
    let init = match args.get(2) {
        None | Some(LuaValue::Nil) => 1,
        _ => arg_int(&args, 2, "find")?,
    };
    let len = s.len();
    let start = str_position(init, len).max(1) as usize - 1;
    if start > len {
        return Ok(vec![LuaValue::Nil]);
    }
    match s[start..].find(&needle) {
        Some(pos) => {
            let begin = start + pos + 1;
            let end = begin + needle.len() - 1;
            Ok(vec![
                LuaValue::Integer(begin as i64),
                LuaValue::Integer(end as i64),
            ])
        }
        None => Ok(vec![LuaValue::Nil]),
    }
}

/// Hook the library table into every string value through the shared
/// string metatable.
pub fn install_string_metatable(vm: &mut LuaVM, lib_table: LuaValue) {
    let mt_value = vm.create_table();
    let mt = mt_value.as_table().expect("metatable");
    let key = vm.create_string("__index");
    mt.borrow_mut().raw_set(key, lib_table);
    vm.string_metatable = Some(mt);
}

fn arg_str(args: &[LuaValue], index: usize, fname: &str) -> LuaResult<String> {
    match args.get(index) {
        Some(LuaValue::String(s)) => Ok(s.as_str().to_string()),
        Some(v @ (LuaValue::Integer(_) | LuaValue::Float(_))) => Ok(coercion::display_value(v)),
        _ => Err(LuaError::argument(format!(
            "bad argument #{} to '{}' (string expected)",
            index + 1,
            fname
        ))),
    }
}

fn arg_int(args: &[LuaValue], index: usize, fname: &str) -> LuaResult<i64> {
    args.get(index).and_then(|v| v.as_integer()).ok_or_else(|| {
        LuaError::argument(format!(
            "bad argument #{} to '{}' (number expected)",
            index + 1,
            fname
        ))
    })
}

/// Translate a 1-based, possibly negative string position.
fn str_position(pos: i64, len: usize) -> i64 {
    if pos >= 0 { pos } else { len as i64 + pos + 1 }
}

fn string_len(_vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let s = arg_str(&args, 0, "len")?;
    Ok(vec![LuaValue::Integer(s.len() as i64)])
}

fn string_sub(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let s = arg_str(&args, 0, "sub")?;
    let len = s.len();
    let mut i = str_position(arg_int(&args, 1, "sub").unwrap_or(1), len);
    let mut j = str_position(
        match args.get(2) {
            None | Some(LuaValue::Nil) => -1,
            _ => arg_int(&args, 2, "sub")?,
        },
        len,
    );
    if i < 1 {
        i = 1;
    }
    if j > len as i64 {
        j = len as i64;
    }
    let result = if i > j {
        String::new()
    } else {
        s.as_bytes()[(i - 1) as usize..j as usize]
            .iter()
            .map(|&b| b as char)
            .collect()
    };
    Ok(vec![vm.create_string_owned(result)])
}

fn string_upper(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let s = arg_str(&args, 0, "upper")?;
    Ok(vec![vm.create_string_owned(s.to_uppercase())])
}

fn string_lower(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let s = arg_str(&args, 0, "lower")?;
    Ok(vec![vm.create_string_owned(s.to_lowercase())])
}

fn string_rep(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let s = arg_str(&args, 0, "rep")?;
    let n = arg_int(&args, 1, "rep")?;
    let sep = match args.get(2) {
        None | Some(LuaValue::Nil) => String::new(),
        _ => arg_str(&args, 2, "rep")?,
    };
    if n <= 0 {
        return Ok(vec![vm.create_string("")]);
    }
    let mut out = String::with_capacity(s.len() * n as usize);
    for i in 0..n {
        if i > 0 {
            out.push_str(&sep);
        }
        out.push_str(&s);
    }
    Ok(vec![vm.create_string_owned(out)])
}

fn string_reverse(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let s = arg_str(&args, 0, "reverse")?;
    let reversed: String = s.chars().rev().collect();
    Ok(vec![vm.create_string_owned(reversed)])
}

fn string_byte(_vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let s = arg_str(&args, 0, "byte")?;
    let len = s.len();
    let i = str_position(
        match args.get(1) {
            None | Some(LuaValue::Nil) => 1,
            _ => arg_int(&args, 1, "byte")?,
        },
        len,
    )
    .max(1);
    let j = str_position(
        match args.get(2) {
            None | Some(LuaValue::Nil) => i,
            _ => arg_int(&args, 2, "byte")?,
        },
        len,
    )
    .min(len as i64);
    let mut out = Vec::new();
    let bytes = s.as_bytes();
    let mut k = i;
    while k <= j {
        out.push(LuaValue::Integer(bytes[(k - 1) as usize] as i64));
        k += 1;
    }
    Ok(out)
}

fn string_char(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let mut out = String::with_capacity(args.len());
    for (index, arg) in args.iter().enumerate() {
        let code = arg.as_integer().ok_or_else(|| {
            LuaError::argument(format!(
                "bad argument #{} to 'char' (number expected)",
                index + 1
            ))
        })?;
        if !(0..=255).contains(&code) {
            return Err(LuaError::argument(format!(
                "bad argument #{} to 'char' (value out of range)",
                index + 1
            )));
        }
        out.push(code as u8 as char);
    }
    Ok(vec![vm.create_string_owned(out)])
}

/// string.format with the printf subset %d %i %u %c %s %q %f %g %e %x %X %o
/// %% plus '-'/'0' flags, width and precision.
fn string_format(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let template = arg_str(&args, 0, "format")?;
    let mut out = String::with_capacity(template.len());
    let mut arg_index = 1usize;
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        // flags
        let mut left_align = false;
        let mut zero_pad = false;
        while let Some(&f) = chars.peek() {
            match f {
                '-' => {
                    left_align = true;
                    chars.next();
                }
                '0' => {
                    zero_pad = true;
                    chars.next();
                }
                '+' | ' ' | '#' => {
                    chars.next();
                }
                _ => break,
            }
        }
        // width
        let mut width = 0usize;
        while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
            width = width * 10 + d as usize;
            chars.next();
        }
        // precision
        let mut precision: Option<usize> = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut p = 0usize;
            while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                p = p * 10 + d as usize;
                chars.next();
            }
            precision = Some(p);
        }
        let conv = chars
            .next()
            .ok_or_else(|| LuaError::argument("invalid format string to 'format'"))?;
        let arg = args.get(arg_index).cloned().unwrap_or(LuaValue::Nil);
        arg_index += 1;

        let piece = match conv {
            'd' | 'i' => {
                let n = arg.as_integer().ok_or_else(|| {
                    LuaError::argument(format!(
                        "bad argument #{} to 'format' (number expected)",
                        arg_index
                    ))
                })?;
                n.to_string()
            }
            'u' => {
                let n = arg.as_integer().ok_or_else(|| {
                    LuaError::argument(format!(
                        "bad argument #{} to 'format' (number expected)",
                        arg_index
                    ))
                })?;
                (n as u64).to_string()
            }
            'c' => {
                let n = arg.as_integer().unwrap_or(0);
                ((n as u8) as char).to_string()
            }
            'x' => format!("{:x}", arg.as_integer().unwrap_or(0)),
            'X' => format!("{:X}", arg.as_integer().unwrap_or(0)),
            'o' => format!("{:o}", arg.as_integer().unwrap_or(0)),
            'f' | 'F' => {
                let f = arg.as_float().ok_or_else(|| {
                    LuaError::argument(format!(
                        "bad argument #{} to 'format' (number expected)",
                        arg_index
                    ))
                })?;
                format!("{:.*}", precision.unwrap_or(6), f)
            }
            'e' | 'E' => {
                let f = arg.as_float().unwrap_or(0.0);
                let text = format!("{:.*e}", precision.unwrap_or(6), f);
                if conv == 'E' { text.to_uppercase() } else { text }
            }
            'g' | 'G' => {
                let f = arg.as_float().unwrap_or(0.0);
                let text = coercion::fmt_float(f);
                // %g has no mandatory ".0" suffix
                let text = text.strip_suffix(".0").map(str::to_string).unwrap_or(text);
                if conv == 'G' { text.to_uppercase() } else { text }
            }
            's' => {
                let mut text = vm.tostring_value(&arg)?;
                if let Some(p) = precision {
                    text.truncate(p);
                }
                text
            }
            'q' => {
                let text = vm.tostring_value(&arg)?;
                let mut quoted = String::with_capacity(text.len() + 2);
                quoted.push('"');
                for ch in text.chars() {
                    match ch {
                        '"' => quoted.push_str("\\\""),
                        '\\' => quoted.push_str("\\\\"),
                        '\n' => quoted.push_str("\\n"),
                        '\r' => quoted.push_str("\\r"),
                        '\0' => quoted.push_str("\\0"),
                        c => quoted.push(c),
                    }
                }
                quoted.push('"');
                quoted
            }
            other => {
                return Err(LuaError::argument(format!(
                    "invalid conversion '%{}' to 'format'",
                    other
                )));
            }
        };

        // width padding
        if piece.len() < width {
            let pad = width - piece.len();
            if left_align {
                out.push_str(&piece);
                out.extend(std::iter::repeat(' ').take(pad));
            } else if zero_pad && matches!(conv, 'd' | 'i' | 'u' | 'x' | 'X' | 'o' | 'f' | 'e') {
                if let Some(rest) = piece.strip_prefix('-') {
                    out.push('-');
                    out.extend(std::iter::repeat('0').take(pad));
                    out.push_str(rest);
                } else {
                    out.extend(std::iter::repeat('0').take(pad));
                    out.push_str(&piece);
                }
            } else {
                out.extend(std::iter::repeat(' ').take(pad));
                out.push_str(&piece);
            }
        } else {
            out.push_str(&piece);
        }
    }
    Ok(vec![vm.create_string_owned(out)])
}
