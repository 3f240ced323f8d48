//! Query keys and their canonical hashes.
//!
//! A key is any serializable value. Its hash is a canonical JSON rendering in which object
//! members are sorted by name, so `{"a":1,"b":2}` and `{"b":2,"a":1}` identify the same query,
//! while array order stays significant.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::InvalidKeyError;

/// Identifies a query. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Value);

impl QueryKey {
    /// Builds a key from any serializable value.
    pub fn new<T: Serialize + ?Sized>(value: &T) -> Result<Self, InvalidKeyError> {
        serde_json::to_value(value)
            .map(Self)
            .map_err(|err| InvalidKeyError::Unserializable(err.to_string()))
    }

    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    pub fn hash(&self) -> QueryHash {
        let mut out = String::new();
        write_canonical(&self.0, &mut out);
        QueryHash(out)
    }

    /// Returns true if `self` is an array key whose leading elements equal `prefix`.
    ///
    /// A non-array prefix only matches an equal key. Elements are compared by canonical form,
    /// so member order inside structured elements does not matter.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        match (&self.0, &prefix.0) {
            (Value::Array(items), Value::Array(head)) => {
                head.len() <= items.len()
                    && head
                        .iter()
                        .zip(items)
                        .all(|(left, right)| canonical(left) == canonical(right))
            }
            _ => self.hash() == prefix.hash(),
        }
    }
}

impl From<&str> for QueryKey {
    fn from(value: &str) -> Self {
        Self(Value::String(value.to_string()))
    }
}

impl From<String> for QueryKey {
    fn from(value: String) -> Self {
        Self(Value::String(value))
    }
}

impl From<Vec<Value>> for QueryKey {
    fn from(value: Vec<Value>) -> Self {
        Self(Value::Array(value))
    }
}

impl From<Value> for QueryKey {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.hash().as_str())
    }
}

/// The canonical string form of a [`QueryKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryHash(String);

impl QueryHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<QueryHash> for String {
    fn from(hash: QueryHash) -> Self {
        hash.0
    }
}

/// Hashes any serializable key.
pub fn hash_key<T: Serialize + ?Sized>(key: &T) -> Result<QueryHash, InvalidKeyError> {
    QueryKey::new(key).map(|key| key.hash())
}

fn canonical(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(left, _), (right, _)| left.cmp(right));
            out.push('{');
            for (index, (name, item)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(name.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
