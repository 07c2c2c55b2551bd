//! Entry handles and the detached entries returned to callers.

use crate::FieldValue;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Stable handle of a stored entry within its table.
///
/// Handles are never reused while the table lives, so unique indexes can
/// refer to entries by handle without owning them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub(crate) u64);

/// A detached copy of an entry (or of a projection of it).
///
/// Keys keep the table's declared field order. Mutating an `Entry` never
/// affects the table it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    fields: Vec<(String, FieldValue)>,
}

impl Entry {
    pub(crate) fn new(fields: Vec<(String, FieldValue)>) -> Self {
        Self { fields }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Plain JSON object form, as stored in the serialized document.
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(self.to_map())
    }

    #[must_use]
    pub fn to_map(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }
}

impl Serialize for Entry {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_keeps_declared_order() {
        let entry = Entry::new(vec![
            ("zeta".to_string(), FieldValue::Integer(1)),
            ("alpha".to_string(), FieldValue::Text("x".into())),
        ]);
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"zeta":1,"alpha":"x"}"#);
        assert_eq!(entry.to_json(), json!({"zeta": 1, "alpha": "x"}));
    }

    #[test]
    fn test_entry_get() {
        let entry = Entry::new(vec![("a".to_string(), FieldValue::Null)]);
        assert_eq!(entry.get("a"), Some(&FieldValue::Null));
        assert!(entry.get("b").is_none());
        assert_eq!(entry.len(), 1);
    }
}
