//! Attribute values and the ordered string-keyed map spans/events/scopes use
//! to carry them.
//!
//! The teacher represents an attribute as a `KeyValue { key: Key, value:
//! Value }` pair stored in an order-preserving `Vec` (see
//! `opentelemetry/src/common.rs`). We follow the same shape but serialize
//! straight to JSON (this SDK's wire format, unlike OTLP protobuf), so `Value`
//! maps onto `serde_json::Value`'s primitive subset instead of OTel's
//! `Array`/`Bytes` variants.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single attribute value: string, number, bool, or null.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::I64(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::F64(n)
    }
}

/// An insertion-order-preserving `string -> Value` map.
///
/// A plain `serde_json::Map` sorts keys alphabetically unless the
/// `preserve_order` feature is on; rather than take on that feature flag for
/// every downstream consumer we keep our own small ordered map, matching how
/// the teacher's `Vec<KeyValue>` preserves attribute insertion order by
/// construction (see `Span::set_attribute`'s "Attributes SHOULD preserve the
/// order in which they're set" contract).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Attributes(Vec<(String, Value)>);

impl Attributes {
    pub fn new() -> Self {
        Attributes(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Inserts `key`, overwriting any existing value for the same key in
    /// place (position preserved) to match "setting an attribute with the
    /// same key as an existing attribute SHOULD overwrite the existing
    /// attribute's value".
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        if let Some(entry) = self.0.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Shallow-merges `other` into `self`, leaving keys already present in
    /// `self` untouched (used by `Scope::update`'s "merge tags/extra shallow"
    /// rule).
    pub fn merge_missing(&mut self, other: &Attributes) {
        for (k, v) in other.iter() {
            if self.get(k).is_none() {
                self.insert(k.to_owned(), v.clone());
            }
        }
    }
}

impl FromIterator<(String, Value)> for Attributes {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut attrs = Attributes::new();
        for (k, v) in iter {
            attrs.insert(k, v);
        }
        attrs
    }
}

impl Serialize for Attributes {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Attributes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct AttrVisitor;

        impl<'de> Visitor<'de> for AttrVisitor {
            type Value = Attributes;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object of attributes")
            }

            fn visit_map<M>(self, mut access: M) -> Result<Attributes, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut attrs = Attributes::new();
                while let Some((k, v)) = access.next_entry::<String, Value>()? {
                    attrs.insert(k, v);
                }
                Ok(attrs)
            }
        }

        deserializer.deserialize_map(AttrVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_overwrites_in_place() {
        let mut attrs = Attributes::new();
        attrs.insert("a", 1i64);
        attrs.insert("b", 2i64);
        attrs.insert("a", 3i64);
        let keys: Vec<_> = attrs.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(attrs.get("a"), Some(&Value::I64(3)));
    }

    #[test]
    fn serializes_preserving_insertion_order() {
        let mut attrs = Attributes::new();
        attrs.insert("zebra", "z");
        attrs.insert("apple", "a");
        let json = serde_json::to_string(&attrs).unwrap();
        assert_eq!(json, r#"{"zebra":"z","apple":"a"}"#);
    }

    #[test]
    fn merge_missing_does_not_overwrite() {
        let mut base = Attributes::new();
        base.insert("a", "base");
        let mut incoming = Attributes::new();
        incoming.insert("a", "incoming");
        incoming.insert("b", "incoming");
        base.merge_missing(&incoming);
        assert_eq!(base.get("a"), Some(&Value::String("base".into())));
        assert_eq!(base.get("b"), Some(&Value::String("incoming".into())));
    }
}
