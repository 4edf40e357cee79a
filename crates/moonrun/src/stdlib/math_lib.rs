// Math library: abs, ceil, floor, sqrt, exp, log, sin, cos, tan, fmod,
// modf, max, min, tointeger, type, random, randomseed, plus the pi/huge/
// maxinteger/mininteger constants.

use crate::lib_module;
use crate::lua_value::{LuaValue, float_to_integer};
use crate::lua_vm::number_ops::{Number, num_lt};
use crate::lua_vm::{LuaError, LuaResult, LuaRng, LuaVM};
use crate::stdlib::registry::LibraryModule;

pub fn create_math_lib() -> LibraryModule {
    lib_module!("math", {
        "abs" => math_abs,
        "ceil" => math_ceil,
        "floor" => math_floor,
        "sqrt" => math_sqrt,
        "exp" => math_exp,
        "log" => math_log,
        "sin" => math_sin,
        "cos" => math_cos,
        "tan" => math_tan,
        "fmod" => math_fmod,
        "modf" => math_modf,
        "max" => math_max,
        "min" => math_min,
        "tointeger" => math_tointeger,
        "type" => math_type,
        "random" => math_random,
        "randomseed" => math_randomseed,
    })
    .with_value("pi", |_| LuaValue::Float(std::f64::consts::PI))
    .with_value("huge", |_| LuaValue::Float(f64::INFINITY))
    .with_value("maxinteger", |_| LuaValue::Integer(i64::MAX))
    .with_value("mininteger", |_| LuaValue::Integer(i64::MIN))
}

fn arg_number(args: &[LuaValue], index: usize, fname: &str) -> LuaResult<Number> {
    args.get(index)
        .and_then(Number::of)
        .or_else(|| {
            args.get(index)
                .and_then(|v| v.as_str())
                .and_then(|s| crate::lua_vm::coercion::parse_lua_number(s))
                .and_then(|v| Number::of(&v))
        })
        .ok_or_else(|| {
            LuaError::argument(format!(
                "bad argument #{} to '{}' (number expected)",
                index + 1,
                fname
            ))
        })
}

fn arg_float(args: &[LuaValue], index: usize, fname: &str) -> LuaResult<f64> {
    Ok(arg_number(args, index, fname)?.as_float())
}

fn math_abs(_vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let n = arg_number(&args, 0, "abs")?;
    let result = match n {
        Number::Int(i) => LuaValue::Integer(i.wrapping_abs()),
        Number::Float(f) => LuaValue::Float(f.abs()),
    };
    Ok(vec![result])
}

fn floor_to_value(f: f64) -> LuaValue {
    match float_to_integer(f) {
        Some(i) => LuaValue::Integer(i),
        None => LuaValue::Float(f),
    }
}

fn math_ceil(_vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let n = arg_number(&args, 0, "ceil")?;
    let result = match n {
        Number::Int(i) => LuaValue::Integer(i),
        Number::Float(f) => floor_to_value(f.ceil()),
    };
    Ok(vec![result])
}

fn math_floor(_vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let n = arg_number(&args, 0, "floor")?;
    let result = match n {
        Number::Int(i) => LuaValue::Integer(i),
        Number::Float(f) => floor_to_value(f.floor()),
    };
    Ok(vec![result])
}

fn math_sqrt(_vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    Ok(vec![LuaValue::Float(arg_float(&args, 0, "sqrt")?.sqrt())])
}

fn math_exp(_vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    Ok(vec![LuaValue::Float(arg_float(&args, 0, "exp")?.exp())])
}

fn math_log(_vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let x = arg_float(&args, 0, "log")?;
    let result = match args.get(1) {
        None | Some(LuaValue::Nil) => x.ln(),
        Some(_) => {
            let base = arg_float(&args, 1, "log")?;
            x.log(base)
        }
    };
    Ok(vec![LuaValue::Float(result)])
}

fn math_sin(_vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    Ok(vec![LuaValue::Float(arg_float(&args, 0, "sin")?.sin())])
}

fn math_cos(_vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    Ok(vec![LuaValue::Float(arg_float(&args, 0, "cos")?.cos())])
}

fn math_tan(_vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    Ok(vec![LuaValue::Float(arg_float(&args, 0, "tan")?.tan())])
}

fn math_fmod(_vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let a = arg_number(&args, 0, "fmod")?;
    let b = arg_number(&args, 1, "fmod")?;
    let result = match (a, b) {
        (Number::Int(_), Number::Int(0)) => {
            return Err(LuaError::argument("bad argument #2 to 'fmod' (zero)"));
        }
        (Number::Int(x), Number::Int(y)) => LuaValue::Integer(x.wrapping_rem(y)),
        _ => LuaValue::Float(a.as_float() % b.as_float()),
    };
    Ok(vec![result])
}

/// modf: integral part (as float) and fractional part.
fn math_modf(_vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let f = arg_float(&args, 0, "modf")?;
    let int_part = f.trunc();
    let frac = if f.is_infinite() { 0.0 } else { f - int_part };
    // The integral part is always a float
    Ok(vec![LuaValue::Float(int_part), LuaValue::Float(frac)])
}

fn math_max(_vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let mut best = arg_number(&args, 0, "max")?;
    for index in 1..args.len() {
        let candidate = arg_number(&args, index, "max")?;
        if num_lt(best, candidate) {
            best = candidate;
        }
    }
    Ok(vec![best.to_value()])
}

fn math_min(_vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let mut best = arg_number(&args, 0, "min")?;
    for index in 1..args.len() {
        let candidate = arg_number(&args, index, "min")?;
        if num_lt(candidate, best) {
            best = candidate;
        }
    }
    Ok(vec![best.to_value()])
}

fn math_tointeger(_vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let result = match args.first() {
        Some(LuaValue::Integer(i)) => LuaValue::Integer(*i),
        Some(LuaValue::Float(f)) => match float_to_integer(*f) {
            Some(i) => LuaValue::Integer(i),
            None => LuaValue::Nil,
        },
        _ => LuaValue::Nil,
    };
    Ok(vec![result])
}

fn math_type(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let result = match args.first() {
        Some(LuaValue::Integer(_)) => vm.create_string("integer"),
        Some(LuaValue::Float(_)) => vm.create_string("float"),
        _ => LuaValue::Nil,
    };
    Ok(vec![result])
}

/// random() -> [0,1); random(m) -> [1,m]; random(m,n) -> [m,n]; random(0)
/// -> raw 64-bit integer.
fn math_random(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    match args.len() {
        0 => Ok(vec![LuaValue::Float(vm.rng.next_float())]),
        1 => {
            let m = arg_number(&args, 0, "random")?
                .as_int()
                .ok_or_else(|| {
                    LuaError::argument("bad argument #1 to 'random' (number has no integer representation)")
                })?;
            if m == 0 {
                return Ok(vec![LuaValue::Integer(vm.rng.next_rand())]);
            }
            if m < 1 {
                return Err(LuaError::argument(
                    "bad argument #1 to 'random' (interval is empty)",
                ));
            }
            let r = (vm.rng.next_rand() as u64) % (m as u64);
            Ok(vec![LuaValue::Integer(r as i64 + 1)])
        }
        _ => {
            let m = arg_number(&args, 0, "random")?.as_int().ok_or_else(|| {
                LuaError::argument("bad argument #1 to 'random' (number has no integer representation)")
            })?;
            let n = arg_number(&args, 1, "random")?.as_int().ok_or_else(|| {
                LuaError::argument("bad argument #2 to 'random' (number has no integer representation)")
            })?;
            if m > n {
                return Err(LuaError::argument(
                    "bad argument #2 to 'random' (interval is empty)",
                ));
            }
            let span = (n as i128 - m as i128 + 1) as u128;
            let r = (vm.rng.next_rand() as u64 as u128) % span;
            Ok(vec![LuaValue::Integer((m as i128 + r as i128) as i64)])
        }
    }
}

fn math_randomseed(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let s1 = args
        .first()
        .and_then(Number::of)
        .map(|n| n.as_float().to_bits())
        .unwrap_or(0x853C49E6748FEA9B);
    let s2 = args
        .get(1)
        .and_then(Number::of)
        .map(|n| n.as_float().to_bits())
        .unwrap_or(0xDA3E39CB94B95BDB);
    vm.rng = LuaRng::from_seed(s1, s2);
    Ok(Vec::new())
}
