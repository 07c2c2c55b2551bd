//! Field definitions, type predicates, constraint checks and value generators.

use crate::core::value::{is_id, next_timestamp, now_millis, random_id, FieldValue, IndexKey};
use crate::{JsonDbError, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::HashMap;

/// The scalar kind of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Boolean,
    Number,
    Integer,
    Date,
    String,
    Char,
    Id,
}

impl FieldType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Date => "date",
            Self::String => "string",
            Self::Char => "char",
            Self::Id => "id",
        }
    }

    /// Whether `regex`/`regexFlags` may be declared on this type.
    #[must_use]
    pub fn accepts_regex(self) -> bool {
        matches!(self, Self::Number | Self::Integer | Self::String | Self::Char)
    }

    fn is_numeric(self) -> bool {
        matches!(self, Self::Number | Self::Integer)
    }

    /// Applies the type predicate to a non-null JSON value.
    ///
    /// # Errors
    ///
    /// Returns a description of the mismatch when `value` is not of this type.
    pub fn parse(self, value: &Value) -> std::result::Result<FieldValue, String> {
        let parsed = match (self, value) {
            (Self::Boolean, Value::Bool(b)) => Some(FieldValue::Boolean(*b)),
            (Self::Number, Value::Number(n)) => n.as_f64().map(FieldValue::Number),
            (Self::Integer, Value::Number(n)) => as_integer(n).map(FieldValue::Integer),
            (Self::Date, Value::Number(n)) => {
                as_integer(n).filter(|i| *i > 0).map(FieldValue::Date)
            }
            (Self::String, Value::String(s)) => Some(FieldValue::Text(s.clone())),
            (Self::Char, Value::String(s)) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(FieldValue::Char(c)),
                    _ => None,
                }
            }
            (Self::Id, Value::String(s)) if is_id(s) => Some(FieldValue::Id(s.clone())),
            _ => None,
        };
        parsed.ok_or_else(|| {
            let article = match self {
                Self::Integer | Self::Id => "an",
                _ => "a",
            };
            let kind = match self {
                Self::Date => "date timestamp",
                other => other.as_str(),
            };
            format!("the value {value} isn't {article} {kind}")
        })
    }
}

/// An integral JSON number, including integral floats such as `1.0`.
pub(crate) fn as_integer(n: &Number) -> Option<i64> {
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    let f = n.as_f64()?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// Serialized description of a single field, as found in the `fields` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub generated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex_flags: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
}

impl FieldDefinition {
    /// A plain, non-null, non-unique field of `field_type`.
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            nullable: false,
            unique: false,
            field_type,
            generated: false,
            default: None,
            regex: None,
            regex_flags: None,
            min_value: None,
            max_value: None,
            min_length: None,
            max_length: None,
        }
    }
}

/// Builds a regex honouring the serialized flag letters.
///
/// `i`, `m` and `s` map onto the regex builder; `g`, `u` and `y` are accepted
/// and ignored since matching is always a single unanchored search.
pub(crate) fn build_regex(pattern: &str, flags: &str) -> std::result::Result<Regex, String> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'g' | 'u' | 'y' => {}
            other => return Err(format!("unsupported regex flag '{other}'")),
        }
    }
    builder.build().map_err(|e| e.to_string())
}

/// A validated field with its compiled regex and parsed default value.
#[derive(Debug, Clone)]
pub struct Field {
    definition: FieldDefinition,
    regex: Option<Regex>,
    min_value: Option<f64>,
    max_value: Option<f64>,
    default: FieldValue,
}

impl Field {
    /// Validates a definition and compiles it.
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::Schema`] when the definition breaks one of the
    /// rules on empty names, forbidden property combinations, ranges or the
    /// default value.
    pub fn from_definition(definition: FieldDefinition) -> Result<Self> {
        let name = definition.name.clone();
        let schema_err = |msg: String| JsonDbError::Schema(format!("Field '{name}': {msg}"));

        if name.is_empty() {
            return Err(JsonDbError::Schema(
                "property 'name' must be a non-empty string".to_string(),
            ));
        }
        let ty = definition.field_type;

        if definition.generated {
            let forbidden = [
                ("regex", definition.regex.is_some()),
                ("regexFlags", definition.regex_flags.is_some()),
                ("minValue", definition.min_value.is_some()),
                ("maxValue", definition.max_value.is_some()),
                ("minLength", definition.min_length.is_some()),
                ("maxLength", definition.max_length.is_some()),
            ];
            if let Some((prop, _)) = forbidden.iter().find(|(_, present)| *present) {
                return Err(schema_err(format!(
                    "property '{prop}' is forbidden on generated fields"
                )));
            }
        }

        let regex = match (&definition.regex, &definition.regex_flags) {
            (Some(pattern), flags) => {
                if !ty.accepts_regex() {
                    return Err(schema_err(format!(
                        "property 'regex' is forbidden for type '{}'",
                        ty.as_str()
                    )));
                }
                let flags = flags.as_deref().unwrap_or("");
                Some(build_regex(pattern, flags).map_err(|e| schema_err(format!("invalid regex: {e}")))?)
            }
            (None, Some(_)) => {
                return Err(schema_err("property 'regexFlags' requires 'regex'".to_string()));
            }
            (None, None) => None,
        };

        let min_value = bound(&definition.min_value, "minValue", ty).map_err(&schema_err)?;
        let max_value = bound(&definition.max_value, "maxValue", ty).map_err(&schema_err)?;
        if let (Some(min), Some(max)) = (min_value, max_value) {
            if max < min {
                return Err(schema_err("'maxValue' must be >= 'minValue'".to_string()));
            }
        }

        for (prop, value) in [("minLength", definition.min_length), ("maxLength", definition.max_length)] {
            if value.is_some() && ty != FieldType::String {
                return Err(schema_err(format!(
                    "property '{prop}' is forbidden for type '{}'",
                    ty.as_str()
                )));
            }
        }
        if let (Some(min), Some(max)) = (definition.min_length, definition.max_length) {
            if max < min {
                return Err(schema_err("'maxLength' must be >= 'minLength'".to_string()));
            }
        }

        let mut field = Self {
            definition,
            regex,
            min_value,
            max_value,
            default: FieldValue::Null,
        };

        if let Some(default) = field.definition.default.clone().filter(|v| !v.is_null()) {
            if field.definition.unique {
                return Err(schema_err("'default' and 'unique' are incompatible".to_string()));
            }
            if field.definition.generated {
                return Err(schema_err("'default' and 'generated' are incompatible".to_string()));
            }
            field.default = field
                .check(&default)
                .map_err(|e| JsonDbError::Schema(format!("Default value: {e}")))?;
        }

        Ok(field)
    }

    #[must_use]
    pub fn definition(&self) -> &FieldDefinition {
        &self.definition
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    #[must_use]
    pub fn field_type(&self) -> FieldType {
        self.definition.field_type
    }

    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.definition.unique
    }

    #[must_use]
    pub fn is_generated(&self) -> bool {
        self.definition.generated
    }

    /// The value used when an insert omits a non-generated field.
    #[must_use]
    pub fn default_value(&self) -> &FieldValue {
        &self.default
    }

    /// Checks `value` against nullability, type, regex, range and length.
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::ValidationFailed`] naming the field and the
    /// first violated constraint.
    pub fn check(&self, value: &Value) -> Result<FieldValue> {
        if value.is_null() {
            return if self.definition.nullable {
                Ok(FieldValue::Null)
            } else {
                Err(self.invalid("cannot be null".to_string()))
            };
        }
        let parsed = self
            .definition
            .field_type
            .parse(value)
            .map_err(|e| self.invalid(e))?;
        self.check_constraints(&parsed)?;
        Ok(parsed)
    }

    /// Checks an already-typed value against regex, range and length.
    pub(crate) fn check_constraints(&self, value: &FieldValue) -> Result<()> {
        if value.is_null() {
            return Ok(());
        }
        if let Some(regex) = &self.regex {
            if !regex.is_match(&value.render()) {
                return Err(self.invalid(format!(
                    "value {value} doesn't validate the regex /{}/",
                    regex.as_str()
                )));
            }
        }
        let numeric = match value {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Integer(i) => Some(*i as f64),
            _ => None,
        };
        if let Some(n) = numeric {
            if let Some(min) = self.min_value.filter(|min| n < *min) {
                return Err(self.invalid(format!("value {value} is less than {min}")));
            }
            if let Some(max) = self.max_value.filter(|max| n > *max) {
                return Err(self.invalid(format!("value {value} is greater than {max}")));
            }
        }
        if let (FieldValue::Text(s), true) = (value, self.definition.field_type == FieldType::String) {
            let len = s.chars().count() as u64;
            if let Some(min) = self.definition.min_length.filter(|min| len < *min) {
                return Err(self.invalid(format!("size of {value} is less than {min}")));
            }
            if let Some(max) = self.definition.max_length.filter(|max| len > *max) {
                return Err(self.invalid(format!("size of {value} is greater than {max}")));
            }
        }
        Ok(())
    }

    /// Produces the value of a `generated` field for a new entry.
    ///
    /// `index` is the field's unique index when the field is unique; unique
    /// fields draw values that are not already present in it.
    #[must_use]
    pub fn generate(&self, index: Option<&HashMap<IndexKey, crate::EntryId>>) -> FieldValue {
        let taken = |v: &FieldValue| index.is_some_and(|idx| idx.contains_key(&v.index_key()));
        match self.definition.field_type {
            FieldType::Boolean => FieldValue::Boolean(false),
            FieldType::Number => {
                let n = first_free(|x| taken(&FieldValue::Number(x as f64)));
                FieldValue::Number(n as f64)
            }
            FieldType::Integer => FieldValue::Integer(first_free(|x| taken(&FieldValue::Integer(x)))),
            FieldType::Date => {
                let mut ts = now_millis().max(1);
                while taken(&FieldValue::Date(ts)) {
                    ts = next_timestamp(ts);
                }
                FieldValue::Date(ts)
            }
            FieldType::String => match index {
                Some(_) => FieldValue::Text(
                    first_free(|x| taken(&FieldValue::Text(x.to_string()))).to_string(),
                ),
                None => FieldValue::Text(String::new()),
            },
            FieldType::Char => FieldValue::Char('0'),
            FieldType::Id => loop {
                let id = FieldValue::Id(random_id());
                if !taken(&id) {
                    break id;
                }
            },
        }
    }

    fn invalid(&self, msg: String) -> JsonDbError {
        JsonDbError::ValidationFailed(format!("field '{}': {msg}", self.definition.name))
    }
}

fn first_free(taken: impl Fn(i64) -> bool) -> i64 {
    let mut x = 0;
    while taken(x) {
        x += 1;
    }
    x
}

fn bound(value: &Option<Number>, prop: &str, ty: FieldType) -> std::result::Result<Option<f64>, String> {
    let Some(n) = value else {
        return Ok(None);
    };
    if !ty.is_numeric() {
        return Err(format!("property '{prop}' is forbidden for type '{}'", ty.as_str()));
    }
    if ty == FieldType::Integer && as_integer(n).is_none() {
        return Err(format!("property '{prop}' must be an integer"));
    }
    n.as_f64()
        .map(Some)
        .ok_or_else(|| format!("property '{prop}' must be a number"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(value: Value) -> Result<Field> {
        let def: FieldDefinition = serde_json::from_value(value)?;
        Field::from_definition(def)
    }

    #[test]
    fn test_type_predicates() {
        assert!(FieldType::Integer.parse(&json!(3)).is_ok());
        assert!(FieldType::Integer.parse(&json!(3.0)).is_ok());
        assert!(FieldType::Integer.parse(&json!(3.5)).is_err());
        assert!(FieldType::Date.parse(&json!(0)).is_err());
        assert!(FieldType::Date.parse(&json!(1_600_000_000_000_i64)).is_ok());
        assert!(FieldType::Char.parse(&json!("ab")).is_err());
        assert!(FieldType::Char.parse(&json!("é")).is_ok());
        assert!(FieldType::Boolean.parse(&json!("true")).is_err());
        assert!(FieldType::Id.parse(&json!("012345789abcdefg")).is_ok());
        assert!(FieldType::Number.parse(&json!(null)).is_err());
    }

    #[test]
    fn test_definition_defaults_are_applied() {
        let f = field(json!({"name": "age", "type": "integer"})).unwrap();
        assert!(!f.definition().nullable);
        assert!(!f.is_unique());
        assert!(!f.is_generated());
        assert_eq!(f.default_value(), &FieldValue::Null);
    }

    #[test]
    fn test_unknown_field_property_is_rejected() {
        assert!(field(json!({"name": "a", "type": "string", "colour": "red"})).is_err());
        assert!(field(json!({"name": "a", "type": "float"})).is_err());
    }

    #[test]
    fn test_generated_forbids_constraints() {
        let err = field(json!({"name": "a", "type": "string", "generated": true, "maxLength": 3}))
            .unwrap_err();
        assert!(err.to_string().contains("maxLength"));
    }

    #[test]
    fn test_default_incompatible_with_unique_and_generated() {
        assert!(field(json!({"name": "a", "type": "integer", "unique": true, "default": 1})).is_err());
        assert!(field(json!({"name": "a", "type": "integer", "generated": true, "default": 1})).is_err());
        assert!(field(json!({"name": "a", "type": "integer", "default": 1})).is_ok());
    }

    #[test]
    fn test_default_must_pass_own_constraints() {
        assert!(field(json!({"name": "a", "type": "integer", "maxValue": 5, "default": 9})).is_err());
        assert!(field(json!({"name": "a", "type": "integer", "default": "x"})).is_err());
    }

    #[test]
    fn test_value_range_rules() {
        assert!(field(json!({"name": "a", "type": "string", "minValue": 1})).is_err());
        assert!(field(json!({"name": "a", "type": "integer", "minValue": 1.5})).is_err());
        assert!(field(json!({"name": "a", "type": "number", "minValue": 5, "maxValue": 1})).is_err());
        assert!(field(json!({"name": "a", "type": "number", "minValue": 1, "maxValue": 1})).is_ok());
    }

    #[test]
    fn test_length_rules() {
        assert!(field(json!({"name": "a", "type": "char", "minLength": 1})).is_err());
        assert!(field(json!({"name": "a", "type": "string", "minLength": -1})).is_err());
        assert!(field(json!({"name": "a", "type": "string", "minLength": 4, "maxLength": 2})).is_err());
    }

    #[test]
    fn test_regex_rules() {
        assert!(field(json!({"name": "a", "type": "boolean", "regex": "x"})).is_err());
        assert!(field(json!({"name": "a", "type": "string", "regexFlags": "i"})).is_err());
        assert!(field(json!({"name": "a", "type": "string", "regex": "(", "regexFlags": "i"})).is_err());
        assert!(field(json!({"name": "a", "type": "string", "regex": "x", "regexFlags": "q"})).is_err());
    }

    #[test]
    fn test_check_nullability() {
        let strict = field(json!({"name": "a", "type": "string"})).unwrap();
        let loose = field(json!({"name": "a", "type": "string", "nullable": true})).unwrap();
        let err = strict.check(&json!(null)).unwrap_err();
        assert!(err.to_string().contains("cannot be null"));
        assert_eq!(loose.check(&json!(null)).unwrap(), FieldValue::Null);
    }

    #[test]
    fn test_check_regex_on_rendered_number() {
        let f = field(json!({"name": "code", "type": "integer", "regex": "^[0-9]{3}$"})).unwrap();
        assert!(f.check(&json!(123)).is_ok());
        assert!(f.check(&json!(12)).is_err());

        let ci = field(json!({"name": "n", "type": "string", "regex": "^ab", "regexFlags": "i"})).unwrap();
        assert!(ci.check(&json!("ABc")).is_ok());
    }

    #[test]
    fn test_check_range_and_length() {
        let n = field(json!({"name": "n", "type": "number", "minValue": 0, "maxValue": 10})).unwrap();
        assert!(n.check(&json!(10)).is_ok());
        assert!(n.check(&json!(-0.5)).is_err());
        assert!(n.check(&json!(10.5)).is_err());

        let s = field(json!({"name": "s", "type": "string", "minLength": 2, "maxLength": 3})).unwrap();
        assert!(s.check(&json!("ab")).is_ok());
        assert!(s.check(&json!("a")).is_err());
        assert!(s.check(&json!("abcd")).is_err());
    }

    #[test]
    fn test_generate_without_index() {
        let b = field(json!({"name": "b", "type": "boolean", "generated": true})).unwrap();
        let s = field(json!({"name": "s", "type": "string", "generated": true})).unwrap();
        let c = field(json!({"name": "c", "type": "char", "generated": true})).unwrap();
        let i = field(json!({"name": "i", "type": "integer", "generated": true})).unwrap();
        assert_eq!(b.generate(None), FieldValue::Boolean(false));
        assert_eq!(s.generate(None), FieldValue::Text(String::new()));
        assert_eq!(c.generate(None), FieldValue::Char('0'));
        assert_eq!(i.generate(None), FieldValue::Integer(0));
    }

    #[test]
    fn test_generate_skips_taken_values() {
        let i = field(json!({"name": "i", "type": "integer", "generated": true, "unique": true})).unwrap();
        let s = field(json!({"name": "s", "type": "string", "generated": true, "unique": true})).unwrap();
        let mut index = HashMap::new();
        index.insert(FieldValue::Integer(0).index_key(), crate::EntryId(0));
        index.insert(FieldValue::Integer(1).index_key(), crate::EntryId(1));
        assert_eq!(i.generate(Some(&index)), FieldValue::Integer(2));

        let mut text_index = HashMap::new();
        text_index.insert(FieldValue::Text("0".into()).index_key(), crate::EntryId(0));
        assert_eq!(s.generate(Some(&text_index)), FieldValue::Text("1".into()));
    }

    #[test]
    fn test_generate_unique_number_skips_taken_values() {
        let n = field(json!({"name": "n", "type": "number", "generated": true, "unique": true})).unwrap();
        let mut index = HashMap::new();
        index.insert(FieldValue::Number(0.0).index_key(), crate::EntryId(0));
        index.insert(FieldValue::Number(1.0).index_key(), crate::EntryId(1));
        assert_eq!(n.generate(Some(&index)), FieldValue::Number(2.0));
        assert_eq!(n.generate(None), FieldValue::Number(0.0));
    }

    #[test]
    fn test_generate_unique_date_skips_taken_values() {
        let d = field(json!({"name": "d", "type": "date", "generated": true, "unique": true})).unwrap();
        let start = now_millis();
        let mut index = HashMap::new();
        for (i, ts) in (start..start + 1000).enumerate() {
            index.insert(FieldValue::Date(ts).index_key(), crate::EntryId(i as u64));
        }
        let FieldValue::Date(ts) = d.generate(Some(&index)) else {
            panic!("expected a date");
        };
        assert!(ts >= start + 1000);
        assert!(!index.contains_key(&FieldValue::Date(ts).index_key()));
    }
}
