use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex, PoisonError};

use regex::Regex;
use ruleweave_facts::{Fact, FactSource, Value};

use crate::engine::functions::{FunctionContext, FunctionRegistry};
use crate::error::RuleError;
use crate::ir::condition::{CompareOp, Test};
use crate::ir::expr::{BinaryOp, Expr, UnaryOp};

/// Everything an expression can see: the fact store, the facts bound so
/// far, and the callable functions.
pub(crate) struct Scope<'s> {
    pub facts: &'s dyn FactSource,
    pub bound: &'s [(&'s str, &'s Fact)],
    pub functions: &'s FunctionRegistry,
}

impl Scope<'_> {
    fn lookup(&self, binding: &str) -> Result<&Fact, RuleError> {
        self.bound
            .iter()
            .find(|(name, _)| *name == binding)
            .map(|(_, fact)| *fact)
            .ok_or_else(|| RuleError::UndefinedBinding(binding.to_owned()))
    }
}

/// Recursively evaluate an expression.
pub(crate) fn eval(expr: &Expr, scope: &Scope<'_>) -> Result<Value, RuleError> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Int(n) => Ok(Value::Int(*n)),
        Expr::Float(f) => Ok(Value::Float(*f)),
        Expr::String(s) => Ok(Value::String(s.clone())),

        Expr::List(items) => items
            .iter()
            .map(|item| eval(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),

        Expr::Attr { binding, attribute } => Ok(scope
            .lookup(binding)?
            .get(attribute)
            .cloned()
            .unwrap_or(Value::Null)),

        Expr::Binding(binding) => Ok(Value::Ref(scope.lookup(binding)?.id().clone())),

        Expr::Unary(op, inner) => {
            let val = eval(inner, scope)?;
            eval_unary(*op, &val)
        }

        Expr::Binary(op, lhs, rhs) => {
            let left = eval(lhs, scope)?;
            let right = eval(rhs, scope)?;
            match op {
                BinaryOp::Add => eval_add(&left, &right),
                BinaryOp::Sub => eval_arithmetic(
                    &left,
                    &right,
                    i64::wrapping_sub,
                    |a, b| a - b,
                    "subtract",
                ),
                BinaryOp::Mul => eval_arithmetic(
                    &left,
                    &right,
                    i64::wrapping_mul,
                    |a, b| a * b,
                    "multiply",
                ),
                BinaryOp::Div => eval_div(&left, &right),
                BinaryOp::Mod => eval_mod(&left, &right),
            }
        }

        Expr::Call(name, args) => {
            let evaluated = args
                .iter()
                .map(|arg| eval(arg, scope))
                .collect::<Result<Vec<_>, _>>()?;
            let mut ctx = FunctionContext::read_only(scope.facts);
            Ok(scope
                .functions
                .call_or_builtin(name, &evaluated, &mut ctx)?)
        }
    }
}

/// Evaluate a single test against the bound facts.
///
/// A comparison on an attribute the fact does not have is simply false.
pub(crate) fn eval_test(test: &Test, scope: &Scope<'_>) -> Result<bool, RuleError> {
    match test {
        Test::Compare {
            binding,
            attribute,
            op,
            operand,
        } => {
            let Some(left) = scope.lookup(binding)?.get(attribute) else {
                return Ok(false);
            };
            let right = eval(operand, scope)?;
            compare(*op, left, &right)
        }
        Test::Predicate { function, args } => {
            let evaluated = args
                .iter()
                .map(|arg| eval(arg, scope))
                .collect::<Result<Vec<_>, _>>()?;
            let mut ctx = FunctionContext::read_only(scope.facts);
            Ok(scope
                .functions
                .call_or_builtin(function, &evaluated, &mut ctx)?
                .is_truthy())
        }
    }
}

/// Apply a comparison operator.
///
/// Ordering comparisons involving `null` are false rather than an error.
pub fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, RuleError> {
    match op {
        CompareOp::Eq => Ok(values_equal(left, right)),
        CompareOp::Ne => Ok(!values_equal(left, right)),
        CompareOp::Lt => eval_compare(left, right, Ordering::is_lt),
        CompareOp::Le => eval_compare(left, right, Ordering::is_le),
        CompareOp::Gt => eval_compare(left, right, Ordering::is_gt),
        CompareOp::Ge => eval_compare(left, right, Ordering::is_ge),
        CompareOp::In => eval_in(left, right),
        CompareOp::NotIn => eval_in(left, right).map(|found| !found),
        CompareOp::Contains => eval_contains(left, right),
        CompareOp::Matches => eval_matches(left, right),
    }
}

/// Evaluate a unary operation on a value.
pub(crate) fn eval_unary(op: UnaryOp, val: &Value) -> Result<Value, RuleError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!val.is_truthy())),
        UnaryOp::Neg => match val {
            Value::Int(n) => Ok(Value::Int(n.wrapping_neg())),
            Value::Float(f) => Ok(Value::Float(-f)),
            _ => Err(RuleError::TypeError(format!(
                "cannot negate {}",
                val.type_name()
            ))),
        },
    }
}

/// Add two values (supports int, float, and string concatenation).
#[allow(clippy::cast_precision_loss)]
fn eval_add(left: &Value, right: &Value) -> Result<Value, RuleError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f64 + b)),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + *b as f64)),
        (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
        _ => Err(RuleError::TypeError(format!(
            "cannot add {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

/// Generic arithmetic on two numeric values.
#[allow(clippy::cast_precision_loss)]
fn eval_arithmetic(
    left: &Value,
    right: &Value,
    int_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
    op_name: &str,
) -> Result<Value, RuleError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(*a, *b))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float_op(*a, *b))),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(float_op(*a as f64, *b))),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(float_op(*a, *b as f64))),
        _ => Err(RuleError::TypeError(format!(
            "cannot {op_name} {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

/// Division with zero-check.
#[allow(clippy::cast_precision_loss)]
fn eval_div(left: &Value, right: &Value) -> Result<Value, RuleError> {
    match (left, right) {
        (Value::Int(_) | Value::Float(_), Value::Int(0)) => {
            Err(RuleError::Evaluation("division by zero".into()))
        }
        (Value::Int(_) | Value::Float(_), Value::Float(f)) if *f == 0.0 => {
            Err(RuleError::Evaluation("division by zero".into()))
        }
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_div(*b))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a / b)),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f64 / b)),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a / *b as f64)),
        _ => Err(RuleError::TypeError(format!(
            "cannot divide {} by {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

/// Modulo with zero-check.
#[allow(clippy::cast_precision_loss)]
fn eval_mod(left: &Value, right: &Value) -> Result<Value, RuleError> {
    match (left, right) {
        (Value::Int(_), Value::Int(0)) => Err(RuleError::Evaluation("modulo by zero".into())),
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_rem(*b))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a % b)),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f64 % b)),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a % *b as f64)),
        _ => Err(RuleError::TypeError(format!(
            "cannot modulo {} by {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

/// Check equality of two values, with type coercion for int/float.
#[allow(clippy::cast_precision_loss)]
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => (a - b).abs() < f64::EPSILON,
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
            (*a as f64 - b).abs() < f64::EPSILON
        }
        (Value::String(a), Value::String(b)) => a == b,
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Ref(a), Value::Ref(b)) => a == b,
        _ => false,
    }
}

/// Ordered comparison returning the predicate applied to the `Ordering`.
#[allow(clippy::cast_precision_loss)]
fn eval_compare(
    left: &Value,
    right: &Value,
    predicate: fn(Ordering) -> bool,
) -> Result<bool, RuleError> {
    let ordering = match (left, right) {
        (Value::Null, _) | (_, Value::Null) => return Ok(false),
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => {
            return Err(RuleError::TypeError(format!(
                "cannot compare {} and {}",
                left.type_name(),
                right.type_name()
            )));
        }
    };
    // NaN compares false in every direction.
    Ok(ordering.is_some_and(predicate))
}

/// Membership test: `value in collection`.
fn eval_in(left: &Value, right: &Value) -> Result<bool, RuleError> {
    match right {
        Value::List(list) => Ok(list.iter().any(|item| values_equal(left, item))),
        Value::String(s) => match left {
            Value::String(sub) => Ok(s.contains(sub.as_str())),
            _ => Err(RuleError::TypeError(format!(
                "in: cannot check {} membership in string",
                left.type_name()
            ))),
        },
        _ => Err(RuleError::TypeError(format!(
            "in: right-hand side must be list or string, got {}",
            right.type_name()
        ))),
    }
}

/// `haystack contains needle` for strings and lists.
fn eval_contains(left: &Value, right: &Value) -> Result<bool, RuleError> {
    match (left, right) {
        (Value::String(haystack), Value::String(needle)) => Ok(haystack.contains(needle.as_str())),
        (Value::List(list), needle) => Ok(list.iter().any(|item| values_equal(item, needle))),
        _ => Err(RuleError::TypeError(format!(
            "contains: unsupported types {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

/// Compiled `matches` patterns, shared by every match worker.
static REGEX_CACHE: LazyLock<Mutex<HashMap<String, Regex>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Patterns read from facts are unbounded, so the cache starts over when full.
const REGEX_CACHE_CAPACITY: usize = 1024;

fn compiled_regex(pattern: &str) -> Result<Regex, RuleError> {
    let mut cache = REGEX_CACHE.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(re) = cache.get(pattern) {
        return Ok(re.clone());
    }
    let re = Regex::new(pattern).map_err(|e| RuleError::InvalidRegex(e.to_string()))?;
    if cache.len() >= REGEX_CACHE_CAPACITY {
        cache.clear();
    }
    cache.insert(pattern.to_owned(), re.clone());
    Ok(re)
}

/// Regex matches check.
fn eval_matches(left: &Value, right: &Value) -> Result<bool, RuleError> {
    match (left, right) {
        (Value::String(s), Value::String(pattern)) => Ok(compiled_regex(pattern)?.is_match(s)),
        _ => Err(RuleError::TypeError(format!(
            "matches: unsupported types {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use ruleweave_facts::FactStore;

    use super::*;

    fn with_scope<T>(facts: &[(&str, Fact)], f: impl FnOnce(&Scope<'_>) -> T) -> T {
        let store = FactStore::new();
        let functions = FunctionRegistry::new();
        let bound: Vec<(&str, &Fact)> = facts.iter().map(|(n, fact)| (*n, fact)).collect();
        let scope = Scope {
            facts: &store,
            bound: &bound,
            functions: &functions,
        };
        f(&scope)
    }

    fn patient() -> Fact {
        Fact::new("Patient")
            .with_id("p1")
            .with("age", 40)
            .with("name", "Ann")
            .with("tags", vec!["vip", "adult"])
            .with("temp", 38.5)
    }

    #[test]
    fn attribute_and_binding_references() {
        with_scope(&[("p", patient())], |scope| {
            assert_eq!(eval(&Expr::attr("p", "age"), scope).unwrap(), Value::Int(40));
            assert_eq!(eval(&Expr::attr("p", "missing"), scope).unwrap(), Value::Null);
            assert_eq!(
                eval(&Expr::Binding("p".into()), scope).unwrap(),
                Value::Ref("p1".into())
            );
            assert!(matches!(
                eval(&Expr::attr("q", "age"), scope),
                Err(RuleError::UndefinedBinding(name)) if name == "q"
            ));
        });
    }

    #[test]
    fn arithmetic_coerces_numbers() {
        with_scope(&[("p", patient())], |scope| {
            let expr = Expr::Binary(
                BinaryOp::Add,
                Box::new(Expr::attr("p", "age")),
                Box::new(Expr::Float(0.5)),
            );
            assert_eq!(eval(&expr, scope).unwrap(), Value::Float(40.5));

            let div = Expr::Binary(BinaryOp::Div, Box::new(Expr::Int(1)), Box::new(Expr::Int(0)));
            assert!(matches!(eval(&div, scope), Err(RuleError::Evaluation(_))));

            let neg = Expr::Unary(UnaryOp::Neg, Box::new(Expr::String("x".into())));
            assert!(matches!(eval(&neg, scope), Err(RuleError::TypeError(_))));
        });
    }

    #[test]
    fn calls_fall_back_to_builtins() {
        with_scope(&[("p", patient())], |scope| {
            let expr = Expr::Call("upper".into(), vec![Expr::attr("p", "name")]);
            assert_eq!(eval(&expr, scope).unwrap(), Value::String("ANN".into()));
            let unknown = Expr::Call("nope".into(), vec![]);
            assert!(matches!(eval(&unknown, scope), Err(RuleError::Function(_))));
        });
    }

    #[test]
    fn compare_operators() {
        let int = Value::Int(5);
        assert!(compare(CompareOp::Eq, &int, &Value::Float(5.0)).unwrap());
        assert!(compare(CompareOp::Ne, &int, &Value::String("5".into())).unwrap());
        assert!(compare(CompareOp::Ge, &int, &Value::Int(5)).unwrap());
        assert!(!compare(CompareOp::Lt, &int, &Value::Null).unwrap());
        assert!(compare(CompareOp::Lt, &int, &Value::Bool(true)).is_err());

        let list = Value::from(vec![1, 2, 3]);
        assert!(compare(CompareOp::In, &Value::Float(2.0), &list).unwrap());
        assert!(compare(CompareOp::NotIn, &Value::Int(9), &list).unwrap());
        assert!(compare(CompareOp::Contains, &list, &Value::Int(3)).unwrap());

        let name = Value::String("influenza".into());
        assert!(compare(CompareOp::Matches, &name, &Value::String("^in.*a$".into())).unwrap());
        assert!(matches!(
            compare(CompareOp::Matches, &name, &Value::String("(".into())),
            Err(RuleError::InvalidRegex(_))
        ));
    }

    #[test]
    fn regex_patterns_are_compiled_once() {
        let pattern = "^flu-[0-9]+$";
        let first = compiled_regex(pattern).unwrap();
        let second = compiled_regex(pattern).unwrap();
        assert_eq!(first.as_str(), second.as_str());
        assert!(
            REGEX_CACHE
                .lock()
                .unwrap()
                .contains_key(pattern)
        );

        assert!(compiled_regex("[unclosed").is_err());
        assert!(!REGEX_CACHE.lock().unwrap().contains_key("[unclosed"));
    }

    #[test]
    fn test_on_missing_attribute_is_false() {
        with_scope(&[("p", patient())], |scope| {
            let test = Test::compare("p", "fever", CompareOp::Ne, Expr::Bool(true));
            assert!(!eval_test(&test, scope).unwrap());

            let test = Test::compare("p", "tags", CompareOp::Contains, Expr::String("vip".into()));
            assert!(eval_test(&test, scope).unwrap());
        });
    }

    #[test]
    fn cross_fact_test() {
        let other = Fact::new("Patient").with_id("p2").with("age", 30);
        with_scope(&[("p", patient()), ("q", other)], |scope| {
            let test = Test::compare("p", "age", CompareOp::Gt, Expr::attr("q", "age"));
            assert!(eval_test(&test, scope).unwrap());
        });
    }

    #[test]
    fn predicate_uses_truthiness() {
        with_scope(&[("p", patient())], |scope| {
            let test = Test::Predicate {
                function: "len".into(),
                args: vec![Expr::attr("p", "tags")],
            };
            assert!(eval_test(&test, scope).unwrap());
        });
    }
}
