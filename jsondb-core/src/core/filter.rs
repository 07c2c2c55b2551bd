//! Filter expressions: compilation from their JSON form and evaluation.
//!
//! A filter is either the match-all token `"*"` or a list whose head selects
//! the node kind:
//!
//! - `["$field", op, args.., op, args..]` tests one field; operators are
//!   applied one after another, so they are implicitly ANDed.
//! - `["and", filter, filter, ..]` feeds the output of each sub-filter into
//!   the next.
//! - `["or", filter, filter, ..]` runs every sub-filter against the same
//!   input and concatenates the results, skipping entries already taken.
//!
//! Every shape, operator and operand problem is reported by
//! [`Filter::compile`], before any entry is looked at.

use crate::core::field::build_regex;
use crate::core::table::Row;
use crate::{EntryId, FieldType, FieldValue, JsonDbError, Result, Table};
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

/// The literal that matches every entry.
pub const MATCH_ALL: &str = "*";

/// A compiled filter expression.
#[derive(Debug, Clone)]
pub enum Filter {
    All,
    Field {
        position: usize,
        predicates: Vec<Predicate>,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

/// A single field operator with its typed operands.
#[derive(Debug, Clone)]
pub enum Predicate {
    Eq(FieldValue),
    Ne(FieldValue),
    Gt(FieldValue),
    Ge(FieldValue),
    Lt(FieldValue),
    Le(FieldValue),
    IsNull,
    NotNull,
    LenAtLeast(usize),
    LenAtMost(usize),
    LenBetween(usize, usize),
    Matches(Regex),
}

impl Predicate {
    #[must_use]
    pub fn matches(&self, value: &FieldValue) -> bool {
        use std::cmp::Ordering::{Greater, Less};

        match self {
            Self::Eq(arg) => value == arg,
            Self::Ne(arg) => value != arg,
            Self::IsNull => value.is_null(),
            Self::NotNull => !value.is_null(),
            _ if value.is_null() => false,
            Self::Gt(arg) => value.compare(arg) == Greater,
            Self::Ge(arg) => value.compare(arg) != Less,
            Self::Lt(arg) => value.compare(arg) == Less,
            Self::Le(arg) => value.compare(arg) != Greater,
            Self::LenAtLeast(n) => value.text_len().is_some_and(|len| len >= *n),
            Self::LenAtMost(n) => value.text_len().is_some_and(|len| len <= *n),
            Self::LenBetween(lo, hi) => value.text_len().is_some_and(|len| len >= *lo && len <= *hi),
            Self::Matches(regex) => regex.is_match(&value.render()),
        }
    }
}

impl Filter {
    /// Compiles `expr` against the schema of `table`.
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::InvalidFilter`] for malformed nodes, unknown
    /// operators, missing operands and operands that do not fit the field,
    /// and [`JsonDbError::FieldNotFound`] for fields the table lacks.
    pub fn compile(table: &Table, expr: &Value) -> Result<Self> {
        let node = match expr {
            Value::String(s) if s == MATCH_ALL => return Ok(Self::All),
            Value::Array(node) => node,
            other => return Err(invalid(format!("node must be an array or \"*\", got {other}"))),
        };
        let Some((head, rest)) = node.split_first() else {
            return Err(invalid("node is empty".to_string()));
        };
        let Some(head) = head.as_str() else {
            return Err(invalid("the node's name must be a string".to_string()));
        };

        if let Some(field) = head.strip_prefix('$') {
            return compile_field(table, field, rest);
        }
        let children = rest
            .iter()
            .map(|child| Self::compile(table, child))
            .collect::<Result<Vec<_>>>()?;
        match head {
            "and" => Ok(Self::And(children)),
            "or" => Ok(Self::Or(children)),
            other => Err(invalid(format!("unknown node '{other}'"))),
        }
    }

    /// Returns the subset of `rows` accepted by this filter.
    pub(crate) fn apply<'a>(&self, rows: Vec<(EntryId, &'a Row)>) -> Vec<(EntryId, &'a Row)> {
        match self {
            Self::All => rows,
            Self::Field { position, predicates } => {
                let mut rows = rows;
                for predicate in predicates {
                    rows.retain(|(_, row)| predicate.matches(&row[*position]));
                }
                rows
            }
            Self::And(filters) => filters.iter().fold(rows, |acc, f| f.apply(acc)),
            Self::Or(filters) => {
                let mut seen = HashSet::new();
                let mut union = Vec::new();
                for filter in filters {
                    for (id, row) in filter.apply(rows.clone()) {
                        if seen.insert(id) {
                            union.push((id, row));
                        }
                    }
                }
                union
            }
        }
    }
}

fn invalid(msg: String) -> JsonDbError {
    JsonDbError::InvalidFilter(msg)
}

fn compile_field(table: &Table, name: &str, rest: &[Value]) -> Result<Filter> {
    let position = table.field_position(name).ok_or_else(|| JsonDbError::FieldNotFound {
        table: table.name().to_string(),
        field: name.to_string(),
    })?;
    let field_type = table.fields()[position].field_type();

    let mut predicates = Vec::new();
    let mut i = 0;
    while i < rest.len() {
        let op = rest[i]
            .as_str()
            .ok_or_else(|| invalid(format!("filter for '{name}': unknown op {}", rest[i])))?;
        let arity = operator_arity(op)
            .ok_or_else(|| invalid(format!("filter for '{name}': unknown op '{op}'")))?;
        let args = rest
            .get(i + 1..i + 1 + arity)
            .ok_or_else(|| invalid(format!("filter for '{name}': missing arguments for '{op}'")))?;
        predicates.push(compile_predicate(name, field_type, op, args)?);
        i += 1 + arity;
    }

    Ok(Filter::Field { position, predicates })
}

fn operator_arity(op: &str) -> Option<usize> {
    match op {
        "!" | "!!" => Some(0),
        "=" | "!=" | ">" | ">=" | "<" | "<=" | "len[" | "len]" | "reg" => Some(1),
        "len[]" | "regf" => Some(2),
        _ => None,
    }
}

fn compile_predicate(name: &str, ty: FieldType, op: &str, args: &[Value]) -> Result<Predicate> {
    let operand = |i: usize| -> Result<FieldValue> {
        ty.parse(&args[i])
            .map_err(|e| invalid(format!("filter '{op}' on '{name}': {e}")))
    };
    let length = |i: usize| -> Result<usize> {
        if ty != FieldType::String {
            return Err(invalid(format!("filter '{op}': the field '{name}' must be a string")));
        }
        args[i]
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| invalid(format!("filter '{op}': arg{} must be unsigned", i + 1)))
    };
    let pattern = |flags: &str| -> Result<Predicate> {
        if !matches!(ty, FieldType::String | FieldType::Char) {
            return Err(invalid(format!("filter '{op}': the field '{name}' must be a string")));
        }
        let source = args[0]
            .as_str()
            .ok_or_else(|| invalid(format!("filter '{op}': pattern must be a string")))?;
        build_regex(source, flags)
            .map(Predicate::Matches)
            .map_err(|e| invalid(format!("filter '{op}': {e}")))
    };

    match op {
        "=" => Ok(Predicate::Eq(operand(0)?)),
        "!=" => Ok(Predicate::Ne(operand(0)?)),
        ">" => Ok(Predicate::Gt(operand(0)?)),
        ">=" => Ok(Predicate::Ge(operand(0)?)),
        "<" => Ok(Predicate::Lt(operand(0)?)),
        "<=" => Ok(Predicate::Le(operand(0)?)),
        "!" => Ok(Predicate::IsNull),
        "!!" => Ok(Predicate::NotNull),
        "len[" => Ok(Predicate::LenAtLeast(length(0)?)),
        "len]" => Ok(Predicate::LenAtMost(length(0)?)),
        "len[]" => {
            let (lo, hi) = (length(0)?, length(1)?);
            if lo > hi {
                return Err(invalid(format!("filter '{op}': arg1 must be <= arg2")));
            }
            Ok(Predicate::LenBetween(lo, hi))
        }
        "reg" => pattern(""),
        "regf" => {
            let flags = args[1]
                .as_str()
                .ok_or_else(|| invalid(format!("filter '{op}': flags must be a string")))?;
            pattern(flags)
        }
        other => Err(invalid(format!("filter for '{name}': unknown op '{other}'"))),
    }
}
