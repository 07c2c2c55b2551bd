//! Typed field values, unique-index keys and the millisecond clock.

use serde::{Serialize, Serializer};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// Length of every `id` value.
pub const ID_LENGTH: usize = 16;

/// Characters an `id` value may contain.
pub const ID_ALPHABET: &str = "012345789abcdefghijklmnopqrstuvwxyz";

/// A single stored value, tagged with the kind of field that produced it.
///
/// Values only ever exist after passing their field's type check, so a
/// `Date` is always positive and a `Char` always holds exactly one character.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Number(f64),
    Integer(i64),
    Date(i64),
    Text(String),
    Char(char),
    Id(String),
}

impl FieldValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Length in characters for textual values, `None` otherwise.
    #[must_use]
    pub fn text_len(&self) -> Option<usize> {
        match self {
            Self::Text(s) | Self::Id(s) => Some(s.chars().count()),
            Self::Char(_) => Some(1),
            _ => None,
        }
    }

    /// Renders the value the way regexes and error messages see it.
    ///
    /// Integral numbers print without a fractional part (`3`, not `3.0`).
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Boolean(b) => b.to_string(),
            Self::Number(n) => render_number(*n),
            Self::Integer(i) | Self::Date(i) => i.to_string(),
            Self::Text(s) | Self::Id(s) => s.clone(),
            Self::Char(c) => c.to_string(),
        }
    }

    /// Converts back to the plain JSON form used by the serialized document.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Boolean(b) => Value::Bool(*b),
            Self::Number(n) => match integral(*n) {
                Some(i) => Value::from(i),
                None => Value::from(*n),
            },
            Self::Integer(i) | Self::Date(i) => Value::from(*i),
            Self::Text(s) | Self::Id(s) => Value::String(s.clone()),
            Self::Char(c) => Value::String(c.to_string()),
        }
    }

    /// Key under which this value is stored in a unique index.
    #[must_use]
    pub fn index_key(&self) -> IndexKey {
        match self {
            Self::Null => IndexKey::Null,
            Self::Boolean(b) => IndexKey::Boolean(*b),
            // -0.0 and 0.0 are the same number
            Self::Number(n) => IndexKey::Number(if *n == 0.0 { 0 } else { n.to_bits() }),
            Self::Integer(i) | Self::Date(i) => IndexKey::Integer(*i),
            Self::Text(s) | Self::Id(s) => IndexKey::Text(s.clone()),
            Self::Char(c) => IndexKey::Text(c.to_string()),
        }
    }

    /// Orders two values of the same field. `Null` sorts before everything.
    #[must_use]
    pub fn compare(&self, other: &FieldValue) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Null, _) => Ordering::Less,
            (_, Self::Null) => Ordering::Greater,
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Number(a), Self::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Self::Integer(a), Self::Integer(b)) | (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) | (Self::Id(a), Self::Id(b)) => a.cmp(b),
            (Self::Char(a), Self::Char(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) | Self::Id(s) => write!(f, "\"{s}\""),
            Self::Char(c) => write!(f, "'{c}'"),
            other => f.write_str(&other.render()),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Hashable projection of a [`FieldValue`] used by unique indexes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexKey {
    Null,
    Boolean(bool),
    Number(u64),
    Integer(i64),
    Text(String),
}

fn integral(n: f64) -> Option<i64> {
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        Some(n as i64)
    } else {
        None
    }
}

fn render_number(n: f64) -> String {
    match integral(n) {
        Some(i) => i.to_string(),
        None => n.to_string(),
    }
}

/// Returns `true` if `s` is a well-formed `id` value.
#[must_use]
pub fn is_id(s: &str) -> bool {
    s.chars().count() == ID_LENGTH && s.chars().all(|c| ID_ALPHABET.contains(c))
}

/// Draws a random `id` value over [`ID_ALPHABET`].
#[must_use]
pub fn random_id() -> String {
    use rand::Rng;

    let alphabet = ID_ALPHABET.as_bytes();
    let mut rng = rand::rng();
    (0..ID_LENGTH)
        .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
        .collect()
}

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Returns the next `updated` timestamp after `previous`.
///
/// Always strictly greater than `previous`, and never behind the clock.
#[must_use]
pub fn next_timestamp(previous: i64) -> i64 {
    now_millis().max(previous.saturating_add(1))
}
