//! Arithmetic, bitwise, and comparison opcode implementations on [`Value`]
//! (spec §4.4 "Arithmetic respects loose typing: operands are coerced to
//! numeric first; `+` over two ordered maps returns their union; string
//! concatenation is a separate operator (`.`)").

use quill_core::{OrderedArray, Value};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

/// `+`. Two arrays union instead of adding (spec §4.4); everything else
/// coerces to numeric first. Integer overflow wraps rather than promoting to
/// float or panicking — see DESIGN.md for why this was the chosen resolution
/// of the open question spec §9 raises about reference-implementation
/// overflow behavior.
pub fn add(a: &Value, b: &Value) -> Value {
    if let (Value::Array(x), Value::Array(y)) = (a, b) {
        return Value::Array(Rc::new(RefCell::new(x.borrow().union(&y.borrow()))));
    }
    numeric_binop(a, b, i64::wrapping_add, |x, y| x + y)
}

pub fn sub(a: &Value, b: &Value) -> Value {
    numeric_binop(a, b, i64::wrapping_sub, |x, y| x - y)
}

pub fn mul(a: &Value, b: &Value) -> Value {
    numeric_binop(a, b, i64::wrapping_mul, |x, y| x * y)
}

/// `/`. Integer division that divides evenly stays an int; anything else
/// (including any float operand) produces a float, matching the reference
/// implementation's numeric-result-type rule. Division by zero is a runtime
/// warning (spec §7), surfaced to the caller as `Err` so the VM can log it
/// and produce `Value::Bool(false)` in its place.
pub fn div(a: &Value, b: &Value) -> Result<Value, &'static str> {
    let (x, y) = (a.to_number(), b.to_number());
    match (x, y) {
        (Value::Int(xi), Value::Int(yi)) => {
            if yi == 0 {
                return Err("division by zero");
            }
            if xi % yi == 0 {
                Ok(Value::Int(xi.wrapping_div(yi)))
            } else {
                Ok(Value::Real(xi as f64 / yi as f64))
            }
        }
        (xn, yn) => {
            let yf = xn_to_f64(&yn);
            if yf == 0.0 {
                return Err("division by zero");
            }
            Ok(Value::Real(xn_to_f64(&xn) / yf))
        }
    }
}

pub fn modulo(a: &Value, b: &Value) -> Result<Value, &'static str> {
    let yi = b.to_int();
    if yi == 0 {
        return Err("modulo by zero");
    }
    Ok(Value::Int(a.to_int().wrapping_rem(yi)))
}

pub fn concat(a: &Value, b: &Value) -> Value {
    let mut s = a.to_display_string();
    s.push_str(&b.to_display_string());
    Value::str(s)
}

pub fn uminus(a: &Value) -> Value {
    match a.to_number() {
        Value::Int(n) => Value::Int(n.wrapping_neg()),
        Value::Real(f) => Value::Real(-f),
        other => other,
    }
}

pub fn uplus(a: &Value) -> Value {
    a.to_number()
}

pub fn bitnot(a: &Value) -> Value {
    Value::Int(!a.to_int())
}

pub fn lnot(a: &Value) -> Value {
    Value::Bool(!a.to_bool())
}

pub fn shl(a: &Value, b: &Value) -> Value {
    Value::Int(a.to_int().wrapping_shl(b.to_int() as u32))
}

pub fn shr(a: &Value, b: &Value) -> Value {
    Value::Int(a.to_int().wrapping_shr(b.to_int() as u32))
}

pub fn band(a: &Value, b: &Value) -> Value {
    Value::Int(a.to_int() & b.to_int())
}

pub fn bor(a: &Value, b: &Value) -> Value {
    Value::Int(a.to_int() | b.to_int())
}

pub fn bxor(a: &Value, b: &Value) -> Value {
    Value::Int(a.to_int() ^ b.to_int())
}

pub fn land(a: &Value, b: &Value) -> Value {
    Value::Bool(a.to_bool() && b.to_bool())
}

pub fn lor(a: &Value, b: &Value) -> Value {
    Value::Bool(a.to_bool() || b.to_bool())
}

pub fn lxor(a: &Value, b: &Value) -> Value {
    Value::Bool(a.to_bool() ^ b.to_bool())
}

/// Ordering comparison (`<`/`<=`/`>`/`>=`) under loose typing: numeric if
/// either side is numeric or both sides parse as numeric strings, string
/// comparison otherwise.
pub fn compare_loose(a: &Value, b: &Value) -> Ordering {
    use Value::*;
    match (a, b) {
        (Array(x), Array(y)) => x.borrow().len().cmp(&y.borrow().len()),
        (Str(x), Str(y)) => match (x.parse::<f64>(), y.parse::<f64>()) {
            (Ok(xf), Ok(yf)) => xf.partial_cmp(&yf).unwrap_or(Ordering::Equal),
            _ => x.as_ref().cmp(y.as_ref()),
        },
        (Bool(_), _) | (_, Bool(_)) | (Null, _) | (_, Null) => a.to_bool().cmp(&b.to_bool()),
        _ => {
            let (x, y) = (a.to_real(), b.to_real());
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
    }
}

fn numeric_binop(a: &Value, b: &Value, int_op: fn(i64, i64) -> i64, real_op: fn(f64, f64) -> f64) -> Value {
    match (a.to_number(), b.to_number()) {
        (Value::Int(x), Value::Int(y)) => Value::Int(int_op(x, y)),
        (x, y) => Value::Real(real_op(xn_to_f64(&x), xn_to_f64(&y))),
    }
}

fn xn_to_f64(v: &Value) -> f64 {
    match v {
        Value::Int(n) => *n as f64,
        Value::Real(f) => *f,
        _ => 0.0,
    }
}

/// `+` applied directly to two ordered maps at the value level, exposed for
/// callers (e.g. `array_merge`-style host functions) that want the union
/// without going through `Value`.
pub fn array_union(a: &OrderedArray, b: &OrderedArray) -> OrderedArray {
    a.union(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_division_that_divides_evenly_stays_int() {
        assert!(matches!(div(&Value::Int(10), &Value::Int(2)), Ok(Value::Int(5))));
        assert!(matches!(div(&Value::Int(10), &Value::Int(3)), Ok(Value::Real(_))));
    }

    #[test]
    fn division_by_zero_is_an_error_not_a_panic() {
        assert!(div(&Value::Int(1), &Value::Int(0)).is_err());
    }

    #[test]
    fn add_unions_two_arrays_instead_of_adding() {
        let mut x = OrderedArray::new();
        x.push(Value::Int(1));
        let mut y = OrderedArray::new();
        y.push(Value::Int(2));
        y.push(Value::Int(3));
        let result = add(
            &Value::Array(Rc::new(RefCell::new(x))),
            &Value::Array(Rc::new(RefCell::new(y))),
        );
        let Value::Array(merged) = result else { panic!("expected array") };
        assert_eq!(merged.borrow().len(), 2);
    }

    #[test]
    fn loose_comparison_orders_numeric_strings_numerically() {
        assert_eq!(compare_loose(&Value::str("10"), &Value::str("9")), Ordering::Greater);
    }
}
