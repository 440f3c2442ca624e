//! Firestore REST wire types and the typed-value mapping.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub name: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub update_time: Option<String>,
}

impl Document {
    /// Last path segment of the resource name.
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    pub fn plain_fields(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), from_firestore(v)))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDocumentsResponse {
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WriteRequest {
    pub fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
}

/// Plain JSON -> Firestore `Value` (`stringValue`, `mapValue`, ...).
pub fn to_firestore(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                json!({ "integerValue": i.to_string() })
            } else if let Some(u) = n.as_u64() {
                json!({ "integerValue": u.to_string() })
            } else {
                json!({ "doubleValue": n.as_f64().unwrap_or_default() })
            }
        }
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            let values: Vec<Value> = items.iter().map(to_firestore).collect();
            json!({ "arrayValue": { "values": values } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": to_firestore_fields(map) } }),
    }
}

pub fn to_firestore_fields(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter().map(|(k, v)| (k.clone(), to_firestore(v))).collect()
}

/// Firestore `Value` -> plain JSON. Timestamps come back as strings.
pub fn from_firestore(value: &Value) -> Value {
    let Some(object) = value.as_object() else {
        return Value::Null;
    };
    let Some((kind, inner)) = object.iter().next() else {
        return Value::Null;
    };

    match kind.as_str() {
        "booleanValue" => inner.clone(),
        "integerValue" => inner
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or_else(|| inner.clone()),
        "doubleValue" => inner.clone(),
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner.clone(),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(from_firestore).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(
            inner
                .get("fields")
                .and_then(Value::as_object)
                .map(|fields| fields.iter().map(|(k, v)| (k.clone(), from_firestore(v))).collect())
                .unwrap_or_default(),
        ),
        _ => Value::Null,
    }
}
