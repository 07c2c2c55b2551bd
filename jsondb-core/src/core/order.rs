//! Orderers: multi-key comparators built from `[field, "+val", field, "-len", ..]`.

use crate::core::table::Row;
use crate::{FieldType, JsonDbError, Result, Table};
use serde_json::Value;
use std::cmp::Ordering;

/// How one sort key compares two values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKind {
    /// Compare the raw values.
    Value,
    /// Compare string lengths.
    Length,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub position: usize,
    pub descending: bool,
    pub kind: SortKind,
}

/// A compiled comparator chain. Later keys only break ties of earlier ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Orderer {
    keys: Vec<SortKey>,
}

impl Orderer {
    /// Compiles a flat `[field, direction+kind, ...]` list against `table`.
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::InvalidOrderer`] if the list has an odd length,
    /// names an unknown field, or uses a malformed or unsupported direction.
    pub fn compile(table: &Table, expr: &Value) -> Result<Self> {
        let items = expr
            .as_array()
            .ok_or_else(|| invalid("fields must be an array".to_string()))?;
        if items.len() % 2 != 0 {
            return Err(invalid("fields must have an even number of elements".to_string()));
        }

        let keys = items
            .chunks(2)
            .map(|pair| compile_key(table, &pair[0], &pair[1]))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { keys })
    }

    #[must_use]
    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    pub(crate) fn compare(&self, a: &Row, b: &Row) -> Ordering {
        for key in &self.keys {
            let (x, y) = (&a[key.position], &b[key.position]);
            let ord = match key.kind {
                SortKind::Value => x.compare(y),
                SortKind::Length => x.text_len().unwrap_or(0).cmp(&y.text_len().unwrap_or(0)),
            };
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

fn invalid(msg: String) -> JsonDbError {
    JsonDbError::InvalidOrderer(msg)
}

fn compile_key(table: &Table, field: &Value, spec: &Value) -> Result<SortKey> {
    let position = field
        .as_str()
        .and_then(|name| table.field_position(name))
        .ok_or_else(|| invalid(format!("unknown field {field}")))?;
    let spec = spec
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid("type must be a non empty string".to_string()))?;

    let descending = match spec.chars().next() {
        Some('+') => false,
        Some('-') => true,
        _ => return Err(invalid(format!("type '{spec}' must start by + or -"))),
    };
    let kind = match &spec[1..] {
        "val" => SortKind::Value,
        "len" => {
            if table.fields()[position].field_type() != FieldType::String {
                return Err(invalid(format!("len: field {field} must be a string")));
            }
            SortKind::Length
        }
        other => return Err(invalid(format!("unknown type '{other}'"))),
    };

    Ok(SortKey { position, descending, kind })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scores() -> Table {
        let mut table = Table::from_value(json!({
            "name": "scores",
            "fields": [
                {"name": "score", "type": "integer"},
                {"name": "id", "type": "string"}
            ]
        }))
        .unwrap();
        for (score, id) in [(1, "a"), (2, "b"), (1, "c")] {
            table.insert(json!({"score": score, "id": id}).as_object().unwrap()).unwrap();
        }
        table
    }

    fn ids(table: &Table, orderer: Value) -> Vec<String> {
        table
            .select(&json!("*"), Some(&orderer), None, 0, -1)
            .unwrap()
            .iter()
            .map(|e| e.get("id").unwrap().render())
            .collect()
    }

    #[test]
    fn test_descending_sort_is_stable() {
        assert_eq!(ids(&scores(), json!(["score", "-val"])), ["b", "a", "c"]);
    }

    #[test]
    fn test_ascending_with_tie_breaker() {
        assert_eq!(ids(&scores(), json!(["score", "+val", "id", "-val"])), ["c", "a", "b"]);
    }

    #[test]
    fn test_length_ordering() {
        let mut t = Table::from_value(json!({
            "name": "words",
            "fields": [{"name": "id", "type": "string"}]
        }))
        .unwrap();
        for w in ["ccc", "a", "bb"] {
            t.insert(json!({ "id": w }).as_object().unwrap()).unwrap();
        }
        assert_eq!(ids(&t, json!(["id", "+len"])), ["a", "bb", "ccc"]);
        assert_eq!(ids(&t, json!(["id", "-len"])), ["ccc", "bb", "a"]);
    }

    #[test]
    fn test_empty_orderer_keeps_storage_order() {
        assert_eq!(ids(&scores(), json!([])), ["a", "b", "c"]);
    }

    #[test]
    fn test_compile_errors() {
        let t = scores();
        for case in [
            json!("score"),
            json!(["score"]),
            json!(["height", "+val"]),
            json!(["score", ""]),
            json!(["score", "val"]),
            json!(["score", "+size"]),
            json!(["score", "+len"]),
            json!([1, "+val"]),
        ] {
            let err = Orderer::compile(&t, &case).unwrap_err();
            assert!(matches!(err, JsonDbError::InvalidOrderer(_)), "{case} gave {err}");
        }
    }
}
