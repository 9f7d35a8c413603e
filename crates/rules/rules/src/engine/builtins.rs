//! Built-in functions available in rule expressions.
//!
//! Registered functions take precedence: a builtin is only consulted when
//! no function of the same name is registered.

use ruleweave_facts::Value;

use crate::error::FunctionError;

/// Names of every builtin, for static function-existence checks.
pub const BUILTINS: &[&str] = &[
    "abs",
    "ends_with",
    "format",
    "len",
    "lower",
    "max",
    "min",
    "starts_with",
    "to_int",
    "to_string",
    "upper",
];

/// Returns `true` if `name` is a builtin.
pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Dispatch a built-in function call by name.
pub fn call_builtin(name: &str, args: &[Value]) -> Result<Value, FunctionError> {
    match name {
        "len" => builtin_len(args),
        "lower" => builtin_lower(args),
        "upper" => builtin_upper(args),
        "starts_with" => builtin_starts_with(args),
        "ends_with" => builtin_ends_with(args),
        "format" => builtin_format(args),
        "abs" => builtin_abs(args),
        "min" => builtin_extreme("min", args, std::cmp::Ordering::is_lt),
        "max" => builtin_extreme("max", args, std::cmp::Ordering::is_gt),
        "to_string" => builtin_to_string(args),
        "to_int" => builtin_to_int(args),
        _ => Err(FunctionError::NotFound(name.to_owned())),
    }
}

/// Ensure the argument list has exactly `n` elements.
fn expect_args(name: &str, args: &[Value], n: usize) -> Result<(), FunctionError> {
    if args.len() != n {
        return Err(FunctionError::Arity {
            function: name.to_owned(),
            expected: n.to_string(),
            actual: args.len(),
        });
    }
    Ok(())
}

fn type_error(name: &str, expected: &str, args: &[Value]) -> FunctionError {
    let got = args
        .iter()
        .map(Value::type_name)
        .collect::<Vec<_>>()
        .join(", ");
    FunctionError::Type(format!("{name}() expects {expected}, got ({got})"))
}

/// `len(value)` - returns the length of a string or list.
fn builtin_len(args: &[Value]) -> Result<Value, FunctionError> {
    expect_args("len", args, 1)?;
    match &args[0] {
        Value::String(s) => Ok(Value::Int(
            i64::try_from(s.chars().count()).unwrap_or(i64::MAX),
        )),
        Value::List(v) => Ok(Value::Int(i64::try_from(v.len()).unwrap_or(i64::MAX))),
        _ => Err(type_error("len", "string or list", args)),
    }
}

/// `lower(string)` - convert a string to lowercase.
fn builtin_lower(args: &[Value]) -> Result<Value, FunctionError> {
    expect_args("lower", args, 1)?;
    match &args[0] {
        Value::String(s) => Ok(Value::String(s.to_lowercase())),
        _ => Err(type_error("lower", "string", args)),
    }
}

/// `upper(string)` - convert a string to uppercase.
fn builtin_upper(args: &[Value]) -> Result<Value, FunctionError> {
    expect_args("upper", args, 1)?;
    match &args[0] {
        Value::String(s) => Ok(Value::String(s.to_uppercase())),
        _ => Err(type_error("upper", "string", args)),
    }
}

fn builtin_starts_with(args: &[Value]) -> Result<Value, FunctionError> {
    expect_args("starts_with", args, 2)?;
    match (&args[0], &args[1]) {
        (Value::String(s), Value::String(prefix)) => {
            Ok(Value::Bool(s.starts_with(prefix.as_str())))
        }
        _ => Err(type_error("starts_with", "(string, string)", args)),
    }
}

fn builtin_ends_with(args: &[Value]) -> Result<Value, FunctionError> {
    expect_args("ends_with", args, 2)?;
    match (&args[0], &args[1]) {
        (Value::String(s), Value::String(suffix)) => Ok(Value::Bool(s.ends_with(suffix.as_str()))),
        _ => Err(type_error("ends_with", "(string, string)", args)),
    }
}

/// `format(template, args...)` - replaces each `{}` left-to-right.
fn builtin_format(args: &[Value]) -> Result<Value, FunctionError> {
    let Some((Value::String(template), rest)) = args.split_first() else {
        return Err(type_error("format", "(string, ...)", args));
    };
    let mut result = String::with_capacity(template.len());
    let mut pieces = template.split("{}");
    if let Some(first) = pieces.next() {
        result.push_str(first);
    }
    let mut values = rest.iter();
    for piece in pieces {
        match values.next() {
            Some(Value::String(s)) => result.push_str(s),
            Some(other) => result.push_str(&other.to_string()),
            None => result.push_str("{}"),
        }
        result.push_str(piece);
    }
    Ok(Value::String(result))
}

/// `abs(number)` - returns the absolute value.
fn builtin_abs(args: &[Value]) -> Result<Value, FunctionError> {
    expect_args("abs", args, 1)?;
    match &args[0] {
        Value::Int(n) => Ok(Value::Int(n.wrapping_abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        _ => Err(type_error("abs", "number", args)),
    }
}

/// `min(a, b, ...)` / `max(a, b, ...)` over numbers.
#[allow(clippy::cast_precision_loss)]
fn builtin_extreme(
    name: &str,
    args: &[Value],
    better: fn(std::cmp::Ordering) -> bool,
) -> Result<Value, FunctionError> {
    let mut best: Option<&Value> = None;
    for arg in args {
        let as_float = |v: &Value| match v {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        };
        let candidate = as_float(arg).ok_or_else(|| type_error(name, "numbers", args))?;
        best = match best {
            Some(current) => {
                let current_f = as_float(current).unwrap_or(f64::NAN);
                match candidate.partial_cmp(&current_f) {
                    Some(ordering) if better(ordering) => Some(arg),
                    _ => Some(current),
                }
            }
            None => Some(arg),
        };
    }
    best.cloned().ok_or_else(|| FunctionError::Arity {
        function: name.to_owned(),
        expected: "at least 1".to_owned(),
        actual: 0,
    })
}

/// `to_string(value)` - strings pass through, other values render as literals.
fn builtin_to_string(args: &[Value]) -> Result<Value, FunctionError> {
    expect_args("to_string", args, 1)?;
    Ok(Value::String(match &args[0] {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }))
}

/// `to_int(value)` - parse or truncate to an integer.
#[allow(clippy::cast_possible_truncation)]
fn builtin_to_int(args: &[Value]) -> Result<Value, FunctionError> {
    expect_args("to_int", args, 1)?;
    match &args[0] {
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::Float(f) => Ok(Value::Int(*f as i64)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| FunctionError::Type(format!("to_int() cannot parse {s:?}: {e}"))),
        _ => Err(type_error("to_int", "number, bool, or string", args)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn len_counts_chars_and_items() {
        assert_eq!(call_builtin("len", &["héllo".into()]).unwrap(), Value::Int(5));
        assert_eq!(
            call_builtin("len", &[Value::from(vec![1, 2, 3])]).unwrap(),
            Value::Int(3)
        );
        assert!(matches!(
            call_builtin("len", &[Value::Int(3)]),
            Err(FunctionError::Type(_))
        ));
    }

    #[test]
    fn arity_is_checked() {
        let err = call_builtin("lower", &[]).unwrap_err();
        assert_eq!(err.to_string(), "lower expects 1 argument(s), got 0");
    }

    #[test]
    fn min_max_keep_original_type() {
        let args = [Value::Int(3), Value::Float(1.5), Value::Int(7)];
        assert_eq!(call_builtin("min", &args).unwrap(), Value::Float(1.5));
        assert_eq!(call_builtin("max", &args).unwrap(), Value::Int(7));
        assert!(call_builtin("max", &[]).is_err());
    }

    #[test]
    fn format_fills_placeholders() {
        let out = call_builtin(
            "format",
            &["{} has {}".into(), "ann".into(), Value::Int(2)],
        )
        .unwrap();
        assert_eq!(out, Value::String("ann has 2".into()));
    }

    #[test]
    fn to_int_conversions() {
        assert_eq!(call_builtin("to_int", &[" 42 ".into()]).unwrap(), Value::Int(42));
        assert_eq!(call_builtin("to_int", &[Value::Float(2.9)]).unwrap(), Value::Int(2));
        assert!(call_builtin("to_int", &["x".into()]).is_err());
    }

    #[test]
    fn unknown_builtin() {
        assert_eq!(
            call_builtin("nope", &[]).unwrap_err(),
            FunctionError::NotFound("nope".into())
        );
        assert!(is_builtin("abs"));
        assert!(!is_builtin("notify"));
    }
}
