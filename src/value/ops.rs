use std::fmt::Write;
use std::sync::Arc;

use crate::error::{Error, ErrorKind};
use crate::value::{StringType, Value, ValueRepr};

pub enum CoerceResult<'a> {
    I64(i64, i64),
    F64(f64, f64),
    Str(&'a str, &'a str),
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64_lossy()
}

pub fn coerce<'x>(a: &'x Value, b: &'x Value) -> Option<CoerceResult<'x>> {
    match (&a.0, &b.0) {
        // equal mappings are trivial
        (ValueRepr::I64(a), ValueRepr::I64(b)) => Some(CoerceResult::I64(*a, *b)),
        (ValueRepr::String(a, _), ValueRepr::String(b, _)) => Some(CoerceResult::Str(a, b)),
        (ValueRepr::F64(a), ValueRepr::F64(b)) => Some(CoerceResult::F64(*a, *b)),

        // are floats involved?
        (ValueRepr::F64(a), _) => Some(CoerceResult::F64(*a, some!(as_f64(b)))),
        (_, ValueRepr::F64(b)) => Some(CoerceResult::F64(some!(as_f64(a)), *b)),

        // everything else goes through i64 (bools become 0/1)
        (ValueRepr::Bool(a), ValueRepr::Bool(b)) => Some(CoerceResult::I64(*a as i64, *b as i64)),
        (ValueRepr::Bool(a), ValueRepr::I64(b)) => Some(CoerceResult::I64(*a as i64, *b)),
        (ValueRepr::I64(a), ValueRepr::Bool(b)) => Some(CoerceResult::I64(*a, *b as i64)),
        _ => None,
    }
}

fn get_offset_and_len<F: FnOnce() -> usize>(
    start: i64,
    stop: Option<i64>,
    end: F,
) -> (usize, usize) {
    if start < 0 || stop.map_or(true, |x| x < 0) {
        let end = end();
        let start = if start < 0 {
            (end as i64 + start).max(0) as usize
        } else {
            start as usize
        };
        let stop = match stop {
            None => end,
            Some(x) if x < 0 => (end as i64 + x).max(0) as usize,
            Some(x) => x as usize,
        };
        (start, stop.saturating_sub(start))
    } else {
        (
            start as usize,
            (stop.unwrap() as usize).saturating_sub(start as usize),
        )
    }
}

pub fn slice(value: Value, start: Value, stop: Value, step: Value) -> Result<Value, Error> {
    let start: i64 = if start.is_none() {
        0
    } else {
        ok!(i64::try_from(start))
    };
    let stop = if stop.is_none() {
        None
    } else {
        Some(ok!(i64::try_from(stop)))
    };
    let step = if step.is_none() {
        1
    } else {
        ok!(i64::try_from(step))
    };
    if step < 1 {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "cannot slice by step size below 1",
        ));
    }
    let step = step as usize;

    match value.0 {
        ValueRepr::String(..) => {
            let s = value.as_str().unwrap();
            let (start, len) = get_offset_and_len(start, stop, || s.chars().count());
            Ok(Value::from(
                s.chars()
                    .skip(start)
                    .take(len)
                    .step_by(step)
                    .collect::<String>(),
            ))
        }
        ValueRepr::Undefined(_) | ValueRepr::None => Ok(Value::from(Vec::<Value>::new())),
        ValueRepr::Seq(ref s) => {
            let (start, len) = get_offset_and_len(start, stop, || s.len());
            Ok(Value::from(
                s.iter()
                    .skip(start)
                    .take(len)
                    .step_by(step)
                    .cloned()
                    .collect::<Vec<_>>(),
            ))
        }
        _ => Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("value of type {} cannot be sliced", value.kind()),
        )),
    }
}

fn impossible_op(op: &str, lhs: &Value, rhs: &Value) -> Error {
    Error::new(
        ErrorKind::InvalidOperation,
        format!(
            "tried to use {} operator on unsupported types {} and {}",
            op,
            lhs.kind(),
            rhs.kind()
        ),
    )
}

fn failed_op(op: &str, lhs: &Value, rhs: &Value) -> Error {
    Error::new(
        ErrorKind::InvalidOperation,
        format!("unable to calculate {lhs} {op} {rhs}"),
    )
}

macro_rules! math_binop {
    ($name:ident, $int:ident, $float:tt) => {
        pub fn $name(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
            match coerce(lhs, rhs) {
                Some(CoerceResult::I64(a, b)) => match a.$int(b) {
                    Some(val) => Ok(Value::from(val)),
                    None => Err(failed_op(stringify!($float), lhs, rhs))
                },
                Some(CoerceResult::F64(a, b)) => Ok((a $float b).into()),
                _ => Err(impossible_op(stringify!($float), lhs, rhs))
            }
        }
    }
}

pub fn add(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    match coerce(lhs, rhs) {
        Some(CoerceResult::I64(a, b)) => a
            .checked_add(b)
            .map(Value::from)
            .ok_or_else(|| failed_op("+", lhs, rhs)),
        Some(CoerceResult::F64(a, b)) => Ok((a + b).into()),
        Some(CoerceResult::Str(a, b)) => Ok(Value::from([a, b].concat())),
        None => match (&lhs.0, &rhs.0) {
            (ValueRepr::Seq(a), ValueRepr::Seq(b)) => Ok(Value::from(
                a.iter().chain(b.iter()).cloned().collect::<Vec<_>>(),
            )),
            _ => Err(impossible_op("+", lhs, rhs)),
        },
    }
}

math_binop!(sub, checked_sub, -);
math_binop!(rem, checked_rem_euclid, %);

pub fn mul(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    // sequence and string repetition works like in Jinja2
    if let (Some(s), ValueRepr::I64(n)) = (lhs.as_str(), &rhs.0) {
        return Ok(Value::from(s.repeat((*n).max(0) as usize)));
    }
    if let (ValueRepr::Seq(items), ValueRepr::I64(n)) = (&lhs.0, &rhs.0) {
        let mut rv = Vec::with_capacity(items.len() * (*n).max(0) as usize);
        for _ in 0..*n {
            rv.extend(items.iter().cloned());
        }
        return Ok(Value::from(rv));
    }
    match coerce(lhs, rhs) {
        Some(CoerceResult::I64(a, b)) => match a.checked_mul(b) {
            Some(val) => Ok(Value::from(val)),
            None => Err(failed_op("*", lhs, rhs)),
        },
        Some(CoerceResult::F64(a, b)) => Ok((a * b).into()),
        _ => Err(impossible_op("*", lhs, rhs)),
    }
}

pub fn div(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    fn do_it(lhs: &Value, rhs: &Value) -> Option<Value> {
        let a = some!(as_f64(lhs));
        let b = some!(as_f64(rhs));
        if b == 0.0 {
            return None;
        }
        Some((a / b).into())
    }
    do_it(lhs, rhs).ok_or_else(|| {
        if as_f64(lhs).is_some() && as_f64(rhs) == Some(0.0) {
            failed_op("/", lhs, rhs)
        } else {
            impossible_op("/", lhs, rhs)
        }
    })
}

pub fn int_div(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    match coerce(lhs, rhs) {
        Some(CoerceResult::I64(a, b)) => {
            if b != 0 {
                Ok(Value::from(a.div_euclid(b)))
            } else {
                Err(failed_op("//", lhs, rhs))
            }
        }
        Some(CoerceResult::F64(a, b)) => Ok(a.div_euclid(b).into()),
        _ => Err(impossible_op("//", lhs, rhs)),
    }
}

/// Implements a binary `pow` operation on values.
pub fn pow(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    match coerce(lhs, rhs) {
        Some(CoerceResult::I64(a, b)) => {
            match u32::try_from(b).ok().and_then(|b| a.checked_pow(b)) {
                Some(val) => Ok(Value::from(val)),
                None => Err(failed_op("**", lhs, rhs)),
            }
        }
        Some(CoerceResult::F64(a, b)) => Ok((a.powf(b)).into()),
        _ => Err(impossible_op("**", lhs, rhs)),
    }
}

/// Implements an unary `neg` operation on value.
pub fn neg(val: &Value) -> Result<Value, Error> {
    match val.0 {
        ValueRepr::I64(x) => Ok(Value::from(-x)),
        ValueRepr::F64(x) => Ok(Value::from(-x)),
        _ => Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("value of type {} cannot be negated", val.kind()),
        )),
    }
}

/// Attempts a string concatenation.
pub fn string_concat(left: Value, right: &Value) -> Value {
    // the safe flag is only retained when both sides are safe
    let safe = left.is_safe() && right.is_safe();
    let mut rv = left.to_string();
    write!(rv, "{right}").ok();
    if safe {
        Value::from_safe_string(rv)
    } else {
        Value::from(rv)
    }
}

/// Implements a containment operation on values.
pub fn contains(container: &Value, value: &Value) -> Result<Value, Error> {
    // Special case where if the container is undefined, it cannot hold
    // values.  For strict containment checks the vm has a special case.
    if container.is_undefined() {
        return Ok(Value::from(false));
    }
    let rv = if let Some(s) = container.as_str() {
        if let Some(s2) = value.as_str() {
            s.contains(s2)
        } else {
            s.contains(&value.to_string())
        }
    } else if let ValueRepr::Seq(ref seq) = container.0 {
        seq.iter().any(|item| item == value)
    } else if let ValueRepr::Map(ref map, _) = container.0 {
        map.contains_key(value)
    } else {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "cannot perform a containment check on this value",
        ));
    };
    Ok(Value::from(rv))
}

/// Marks a value as safe if it is a string, retaining safety information.
pub fn mark_safe(value: Value) -> Value {
    match value.0 {
        ValueRepr::String(s, StringType::Normal) => {
            Value(ValueRepr::String(s, StringType::Safe))
        }
        other => Value(other),
    }
}

/// Like `Value::from` for strings but retains the safe flag of a template
/// value that the string was derived from.
pub fn soft_string(original: &Value, new: String) -> Value {
    if original.is_safe() {
        Value::from_safe_string(new)
    } else {
        Value::from(new)
    }
}

/// Turns an arbitrary value into a string value, keeping the safe flag.
pub fn soft_str(value: &Value) -> Value {
    match value.0 {
        ValueRepr::String(..) => value.clone(),
        _ => Value::from(value.to_string()),
    }
}

pub fn wrapping_seq(values: Vec<Value>) -> Value {
    Value(ValueRepr::Seq(Arc::new(values)))
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_adding() {
        let err = add(&Value::from("a"), &Value::from(42)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid operation: tried to use + operator on unsupported types string and number"
        );

        assert_eq!(
            add(&Value::from(1), &Value::from(2)).unwrap(),
            Value::from(3)
        );
        assert_eq!(
            add(&Value::from("foo"), &Value::from("bar")).unwrap(),
            Value::from("foobar")
        );
    }

    #[test]
    fn test_subtracting() {
        let err = sub(&Value::from("a"), &Value::from(42)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid operation: tried to use - operator on unsupported types string and number"
        );

        assert_eq!(
            sub(&Value::from(2), &Value::from(1)).unwrap(),
            Value::from(1)
        );
    }

    #[test]
    fn test_dividing() {
        assert_eq!(
            div(&Value::from(100), &Value::from(2)).unwrap(),
            Value::from(50.0)
        );
        assert_eq!(
            int_div(&Value::from(7), &Value::from(2)).unwrap(),
            Value::from(3)
        );
    }

    #[test]
    fn test_concat() {
        assert_eq!(
            string_concat(Value::from("foo"), &Value::from(42)),
            Value::from("foo42")
        );
        assert_eq!(
            string_concat(Value::from(23), &Value::from(42)),
            Value::from("2342")
        );
        assert!(string_concat(
            Value::from_safe_string("a".into()),
            &Value::from_safe_string("b".into())
        )
        .is_safe());
    }

    #[test]
    fn test_slicing() {
        let v = Value::from(vec![1, 2, 3, 4, 5]);
        assert_eq!(
            slice(v.clone(), Value::from(1), Value::from(3), Value::from(())).unwrap(),
            Value::from(vec![2, 3])
        );
        assert_eq!(
            slice(v, Value::from(()), Value::from(()), Value::from(2)).unwrap(),
            Value::from(vec![1, 3, 5])
        );
    }
}
