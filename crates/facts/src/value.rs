use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FactError;
use crate::fact::FactId;

/// JSON object key that marks a reference to another fact.
const REF_KEY: &str = "$ref";

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// The null value. Missing attributes read as `Null`.
    Null,
    /// A boolean value.
    Bool(bool),
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit floating-point number.
    Float(f64),
    /// A UTF-8 string.
    String(String),
    /// An ordered list of values.
    List(Vec<Value>),
    /// A reference to another fact.
    Ref(FactId),
}

impl Value {
    /// Convert a `serde_json::Value` into a `Value`.
    ///
    /// Objects of the form `{"$ref": "<id>"}` become [`Value::Ref`]; any
    /// other object is rejected because facts hold flat attributes.
    pub fn from_json(json: serde_json::Value) -> Result<Self, FactError> {
        Ok(match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Self::Float(f)
                } else {
                    Self::Null
                }
            }
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(arr) => Self::List(
                arr.into_iter()
                    .map(Self::from_json)
                    .collect::<Result<_, _>>()?,
            ),
            serde_json::Value::Object(obj) => match obj.get(REF_KEY) {
                Some(serde_json::Value::String(id)) if obj.len() == 1 => {
                    Self::Ref(FactId::from(id.as_str()))
                }
                _ => {
                    return Err(FactError::Json(
                        "nested objects are not supported as attribute values".to_owned(),
                    ));
                }
            },
        })
    }

    /// Convert this value into a `serde_json::Value`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(n) => serde_json::Value::from(*n),
            Self::Float(f) => serde_json::Value::from(*f),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Ref(id) => {
                let mut obj = serde_json::Map::with_capacity(1);
                obj.insert(
                    REF_KEY.to_owned(),
                    serde_json::Value::String(id.as_str().to_owned()),
                );
                serde_json::Value::Object(obj)
            }
        }
    }

    /// Returns `true` if this value is considered truthy.
    ///
    /// - `Null` is falsy.
    /// - `Bool` is its own truthiness.
    /// - `Int(0)` and `Float(0.0)` are falsy.
    /// - Empty strings and lists are falsy.
    /// - References are always truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Float(f) => *f != 0.0,
            Self::String(s) => !s.is_empty(),
            Self::List(v) => !v.is_empty(),
            Self::Ref(_) => true,
        }
    }

    /// Returns a string representation of the value type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Ref(_) => "ref",
        }
    }

    /// The referenced fact, if this is a [`Value::Ref`].
    pub fn as_fact_id(&self) -> Option<&FactId> {
        match self {
            Self::Ref(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    /// Renders the value as a rule-language literal.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => f.write_str(&render_float(*x)),
            Self::String(s) => f.write_str(&render_string(s)),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Ref(id) => write!(f, "@{}", render_string(id.as_str())),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<FactId> for Value {
    fn from(id: FactId) -> Self {
        Self::Ref(id)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

/// Render a float so that it always reads back as a float literal.
pub fn render_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

/// Render a string as a double-quoted literal with escapes.
pub fn render_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_json_scalars_and_lists() {
        let json = serde_json::json!([1, 2.5, "x", true, null]);
        let value = Value::from_json(json).unwrap();
        assert_eq!(
            value,
            Value::List(vec![
                Value::Int(1),
                Value::Float(2.5),
                Value::String("x".into()),
                Value::Bool(true),
                Value::Null,
            ])
        );
    }

    #[test]
    fn from_json_reference_object() {
        let json = serde_json::json!({"$ref": "patient-1"});
        let value = Value::from_json(json).unwrap();
        assert_eq!(value, Value::Ref(FactId::from("patient-1")));
        assert_eq!(value.to_json(), serde_json::json!({"$ref": "patient-1"}));
    }

    #[test]
    fn from_json_rejects_nested_objects() {
        let json = serde_json::json!({"a": 1});
        assert!(matches!(Value::from_json(json), Err(FactError::Json(_))));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Float(0.5).is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
        assert!(Value::Ref(FactId::from("a")).is_truthy());
    }

    #[test]
    fn display_renders_literals() {
        assert_eq!(Value::Float(3.0).to_string(), "3.0");
        assert_eq!(Value::Float(0.25).to_string(), "0.25");
        assert_eq!(Value::from("a\"b").to_string(), r#""a\"b""#);
        assert_eq!(
            Value::from(vec![Value::Int(1), Value::Null]).to_string(),
            "[1, null]"
        );
        assert_eq!(Value::Ref(FactId::from("p1")).to_string(), r#"@"p1""#);
    }
}
