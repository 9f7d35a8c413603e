use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::FactError;
use crate::value::{Value, render_string};

/// Number of hex characters kept from the content digest in generated ids.
const FINGERPRINT_LEN: usize = 16;

/// Identity of a fact within a [`FactStore`](crate::FactStore).
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactId(String);

impl FactId {
    /// Create an id from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the placeholder id of a fact that has not been
    /// assigned an identity yet.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FactId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for FactId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A typed record in working memory.
///
/// Facts built without an explicit id receive a content fingerprint when
/// asserted, so asserting the same content twice yields the same identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    id: FactId,
    fact_type: String,
    attributes: BTreeMap<String, Value>,
}

impl Fact {
    /// Create a fact of the given type with no attributes and no id.
    pub fn new(fact_type: impl Into<String>) -> Self {
        Self {
            id: FactId::default(),
            fact_type: fact_type.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Set an attribute.
    #[must_use]
    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(attribute.into(), value.into());
        self
    }

    /// Give the fact an explicit identity.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<FactId>) -> Self {
        self.id = id.into();
        self
    }

    /// The fact's identity. Empty until assigned.
    pub fn id(&self) -> &FactId {
        &self.id
    }

    /// The fact's type name.
    pub fn fact_type(&self) -> &str {
        &self.fact_type
    }

    /// All attributes in name order.
    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// Look up a single attribute.
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.attributes.get(attribute)
    }

    pub(crate) fn set(&mut self, attribute: String, value: Value) -> Option<Value> {
        self.attributes.insert(attribute, value)
    }

    /// Compute the content fingerprint id: `<type>#<digest prefix>`.
    pub fn fingerprint(&self) -> FactId {
        let mut hasher = Sha256::new();
        hasher.update(self.fact_type.as_bytes());
        hasher.update(b"\n");
        for (name, value) in &self.attributes {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.to_string().as_bytes());
            hasher.update(b"\n");
        }
        let digest = hex::encode(hasher.finalize());
        FactId(format!("{}#{}", self.fact_type, &digest[..FINGERPRINT_LEN]))
    }

    /// Assign the content fingerprint if the fact has no id yet.
    #[must_use]
    pub fn identified(mut self) -> Self {
        if self.id.is_empty() {
            self.id = self.fingerprint();
        }
        self
    }

    /// Build a fact from a JSON object.
    ///
    /// Expected shape: `{"type": "Patient", "id": "p1", "attributes": {...}}`
    /// where `id` and `attributes` are optional.
    pub fn from_json(json: serde_json::Value) -> Result<Self, FactError> {
        let serde_json::Value::Object(mut obj) = json else {
            return Err(FactError::Json("expected an object".to_owned()));
        };
        let fact_type = match obj.remove("type") {
            Some(serde_json::Value::String(t)) if !t.is_empty() => t,
            _ => {
                return Err(FactError::Json(
                    "missing or empty \"type\" field".to_owned(),
                ));
            }
        };
        let mut fact = Self::new(fact_type);
        match obj.remove("id") {
            None | Some(serde_json::Value::Null) => {}
            Some(serde_json::Value::String(id)) => fact.id = FactId(id),
            Some(other) => {
                return Err(FactError::Json(format!(
                    "\"id\" must be a string, got {other}"
                )));
            }
        }
        match obj.remove("attributes") {
            None | Some(serde_json::Value::Null) => {}
            Some(serde_json::Value::Object(attrs)) => {
                for (name, value) in attrs {
                    if name.is_empty() {
                        return Err(FactError::InvalidAttribute(
                            "attribute name must not be empty".to_owned(),
                        ));
                    }
                    fact.attributes.insert(name, Value::from_json(value)?);
                }
            }
            Some(_) => {
                return Err(FactError::Json("\"attributes\" must be an object".to_owned()));
            }
        }
        if let Some(key) = obj.keys().next() {
            return Err(FactError::Json(format!("unknown field \"{key}\"")));
        }
        Ok(fact)
    }

    /// Serialize into the shape accepted by [`Fact::from_json`].
    pub fn to_json(&self) -> serde_json::Value {
        let attributes: serde_json::Map<String, serde_json::Value> = self
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        serde_json::json!({
            "type": self.fact_type,
            "id": self.id.as_str(),
            "attributes": attributes,
        })
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fact_type)?;
        if !self.id.is_empty() {
            write!(f, "[{}]", render_string(self.id.as_str()))?;
        }
        f.write_str(" {")?;
        for (i, (name, value)) in self.attributes.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, " {name}: {value}")?;
        }
        if !self.attributes.is_empty() {
            f.write_str(" ")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_depends_on_content_only() {
        let a = Fact::new("Patient").with("fever", true).with("age", 40);
        let b = Fact::new("Patient").with("age", 40).with("fever", true);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert!(a.fingerprint().as_str().starts_with("Patient#"));

        let c = Fact::new("Patient").with("fever", false).with("age", 40);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn identified_keeps_explicit_id() {
        let fact = Fact::new("Patient").with_id("p1").identified();
        assert_eq!(fact.id().as_str(), "p1");

        let fact = Fact::new("Patient").identified();
        assert!(!fact.id().is_empty());
    }

    #[test]
    fn from_json_full_document() {
        let json = serde_json::json!({
            "type": "Patient",
            "id": "p1",
            "attributes": {"fever": true, "age": 40, "doctor": {"$ref": "d1"}}
        });
        let fact = Fact::from_json(json).unwrap();
        assert_eq!(fact.id().as_str(), "p1");
        assert_eq!(fact.fact_type(), "Patient");
        assert_eq!(fact.get("fever"), Some(&Value::Bool(true)));
        assert_eq!(fact.get("doctor"), Some(&Value::Ref(FactId::from("d1"))));
        assert_eq!(Fact::from_json(fact.to_json()).unwrap(), fact);
    }

    #[test]
    fn from_json_rejects_malformed_documents() {
        assert!(Fact::from_json(serde_json::json!([])).is_err());
        assert!(Fact::from_json(serde_json::json!({"id": "x"})).is_err());
        assert!(Fact::from_json(serde_json::json!({"type": "A", "extra": 1})).is_err());
        assert!(matches!(
            Fact::from_json(serde_json::json!({"type": "A", "attributes": {"": 1}})),
            Err(FactError::InvalidAttribute(_))
        ));
    }

    #[test]
    fn display_lists_attributes() {
        let fact = Fact::new("Diagnosis").with("name", "flu").with_id("d1");
        assert_eq!(fact.to_string(), r#"Diagnosis["d1"] { name: "flu" }"#);
        assert_eq!(Fact::new("Empty").to_string(), "Empty {}");
    }
}
