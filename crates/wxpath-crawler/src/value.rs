use serde_json::json;

/// A string produced from a fetched document, carrying the document's base
/// URL so downstream consumers can resolve relative references.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvenancedString {
    pub value: String,
    pub base_url: Option<String>,
}

/// A DOM element carrying its crawl context. Elements are emitted as owned
/// compact markup; the backing document does not outlive its worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvenancedElement {
    pub markup: String,
    pub base_url: String,
    pub backlink: Option<String>,
    pub depth: usize,
}

/// Error datum streamed in place of a result when `yield_errors` is on.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorValue {
    pub url: String,
    pub reason: String,
    pub status: Option<u16>,
    pub depth: usize,
}

/// A value emitted on the result stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Element(ProvenancedElement),
    Str(ProvenancedString),
    Number(f64),
    Bool(bool),
    /// Ordered key/value pairs from a `map{...}` segment.
    Map(Vec<(String, Value)>),
    Array(Vec<Value>),
    /// Absent entry inside a map (the XPath matched nothing).
    Null,
    Error(ErrorValue),
}

impl Value {
    pub fn str(value: impl Into<String>, base_url: Option<String>) -> Self {
        Value::Str(ProvenancedString {
            value: value.into(),
            base_url,
        })
    }

    /// JSON rendition: elements flatten to their compact markup, provenanced
    /// strings to their underlying string, maps keep key order.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Element(el) => json!(el.markup),
            Value::Str(s) => json!(s.value),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() && n.abs() < i64::MAX as f64 {
                    json!(*n as i64)
                } else {
                    json!(n)
                }
            }
            Value::Bool(b) => json!(b),
            Value::Map(entries) => {
                let mut map = serde_json::Map::new();
                for (k, v) in entries {
                    map.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(map)
            }
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Null => serde_json::Value::Null,
            Value::Error(e) => {
                let mut map = serde_json::Map::new();
                map.insert("__type__".into(), json!("error"));
                map.insert("url".into(), json!(e.url));
                map.insert("reason".into(), json!(e.reason));
                if let Some(status) = e.status {
                    map.insert("status".into(), json!(status));
                }
                map.insert("depth".into(), json!(e.depth));
                serde_json::Value::Object(map)
            }
        }
    }

    /// Plain string rendition, used by `||` concatenation and provenance
    /// stripping.
    pub fn string_value(&self) -> String {
        match self {
            Value::Element(el) => el.markup.clone(),
            Value::Str(s) => s.value.clone(),
            Value::Number(n) => number_string(*n),
            Value::Bool(b) => b.to_string(),
            Value::Null => String::new(),
            other => other.to_json().to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }
}

/// XPath number-to-string rules: integral values render without a decimal
/// point.
pub(crate) fn number_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.fract() == 0.0 && n.is_finite() && n.abs() < i64::MAX as f64 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
