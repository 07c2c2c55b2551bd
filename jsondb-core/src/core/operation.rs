//! The query operation registry.
//!
//! Every operation reachable through [`Database::query`] is listed once in
//! [`OPERATIONS`] with its argument range and short aliases. Aliases are
//! resolved into the same descriptor when the registry is first used.

use crate::core::field::as_integer;
use crate::{Database, Entry, JsonDbError, Result, Table};
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Signature shared by all operation handlers. `args` excludes the
/// operation name and has already passed the arity check.
pub type Handler = fn(&mut Database, &[Value]) -> Result<Value>;

/// Descriptor of one query operation.
#[derive(Debug)]
pub struct Operation {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub min_args: usize,
    pub max_args: usize,
    pub handler: Handler,
}

impl Operation {
    /// Human-readable argument range: `"2"` or `"2 to 6"`.
    #[must_use]
    pub fn expected_args(&self) -> String {
        if self.min_args == self.max_args {
            self.min_args.to_string()
        } else {
            format!("{} to {}", self.min_args, self.max_args)
        }
    }

    /// Checks an argument count against the operation's range.
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::Arity`] naming `called_as` and the expected range.
    pub fn check_arity(&self, called_as: &str, got: usize) -> Result<()> {
        if (self.min_args..=self.max_args).contains(&got) {
            Ok(())
        } else {
            Err(JsonDbError::Arity {
                operation: called_as.to_string(),
                got,
                expected: self.expected_args(),
            })
        }
    }
}

/// All query operations, in documentation order.
pub static OPERATIONS: &[Operation] = &[
    Operation { name: "getName", aliases: &["name"], min_args: 0, max_args: 0, handler: get_name },
    Operation { name: "setName", aliases: &["name="], min_args: 1, max_args: 1, handler: set_name },
    Operation { name: "getVersion", aliases: &["v"], min_args: 0, max_args: 0, handler: get_version },
    Operation { name: "setVersion", aliases: &["v="], min_args: 1, max_args: 1, handler: set_version },
    Operation { name: "getCreated", aliases: &["ctime"], min_args: 0, max_args: 0, handler: get_created },
    Operation { name: "getUpdated", aliases: &["utime"], min_args: 0, max_args: 0, handler: get_updated },
    Operation { name: "listTables", aliases: &["ls"], min_args: 0, max_args: 0, handler: list_tables },
    Operation { name: "createTable", aliases: &["tmk"], min_args: 1, max_args: 1, handler: create_table },
    Operation { name: "removeTable", aliases: &[], min_args: 1, max_args: 1, handler: remove_table },
    Operation { name: "renameTable", aliases: &["tmv"], min_args: 2, max_args: 2, handler: rename_table },
    Operation { name: "clearTables", aliases: &["cl"], min_args: 0, max_args: 0, handler: clear_tables },
    Operation { name: "removeTables", aliases: &["rm*"], min_args: 0, max_args: 0, handler: remove_tables },
    Operation { name: "tableGetCreated", aliases: &["tctime"], min_args: 1, max_args: 1, handler: table_get_created },
    Operation { name: "tableGetUpdated", aliases: &["tutime"], min_args: 1, max_args: 1, handler: table_get_updated },
    Operation { name: "tableGetFields", aliases: &["tfi"], min_args: 1, max_args: 1, handler: table_get_fields },
    Operation { name: "insert", aliases: &["tput"], min_args: 2, max_args: 2, handler: insert },
    Operation { name: "select", aliases: &["tget"], min_args: 2, max_args: 6, handler: select },
    Operation { name: "remove", aliases: &["trm"], min_args: 2, max_args: 2, handler: remove },
    Operation { name: "update", aliases: &["tset"], min_args: 3, max_args: 3, handler: update },
    Operation { name: "clear", aliases: &["tcl"], min_args: 1, max_args: 1, handler: clear },
];

/// Names and aliases resolved to their descriptors.
static REGISTRY: Lazy<HashMap<&'static str, &'static Operation>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for op in OPERATIONS {
        map.insert(op.name, op);
        for alias in op.aliases {
            map.insert(*alias, op);
        }
    }
    map
});

/// Resolves an operation name or alias.
#[must_use]
pub fn lookup(name: &str) -> Option<&'static Operation> {
    REGISTRY.get(name).copied()
}

fn arg<'a>(args: &'a [Value], i: usize) -> Result<&'a Value> {
    args.get(i)
        .ok_or_else(|| JsonDbError::InvalidArgument(format!("argument {} is missing", i + 1)))
}

fn str_arg<'a>(args: &'a [Value], i: usize, what: &str) -> Result<&'a str> {
    arg(args, i)?
        .as_str()
        .ok_or_else(|| JsonDbError::InvalidArgument(format!("{what} must be a string")))
}

fn object_arg<'a>(args: &'a [Value], i: usize, what: &str) -> Result<&'a Map<String, Value>> {
    arg(args, i)?
        .as_object()
        .ok_or_else(|| JsonDbError::InvalidArgument(format!("{what} must be an object")))
}

/// An optional integer argument; absent or `null` means `default`.
fn int_arg(args: &[Value], i: usize, default: i64, what: &str) -> Result<i64> {
    match args.get(i) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => as_integer(n)
            .ok_or_else(|| JsonDbError::InvalidArgument(format!("{what} must be an integer"))),
        Some(_) => Err(JsonDbError::InvalidArgument(format!("{what} must be an integer"))),
    }
}

fn field_list(value: &Value) -> Result<Vec<String>> {
    let invalid = || JsonDbError::InvalidArgument("fields must be an array of strings".to_string());
    value
        .as_array()
        .ok_or_else(invalid)?
        .iter()
        .map(|v| v.as_str().map(str::to_string).ok_or_else(invalid))
        .collect()
}

fn entries(entries: &[Entry]) -> Value {
    Value::Array(entries.iter().map(Entry::to_json).collect())
}

fn get_name(db: &mut Database, _: &[Value]) -> Result<Value> {
    Ok(Value::from(db.name()))
}

fn set_name(db: &mut Database, args: &[Value]) -> Result<Value> {
    db.set_name(str_arg(args, 0, "the new database name")?)?;
    Ok(Value::Null)
}

fn get_version(db: &mut Database, _: &[Value]) -> Result<Value> {
    Ok(Value::from(db.version()))
}

fn set_version(db: &mut Database, args: &[Value]) -> Result<Value> {
    db.set_version(str_arg(args, 0, "the new database version")?)?;
    Ok(Value::Null)
}

fn get_created(db: &mut Database, _: &[Value]) -> Result<Value> {
    Ok(Value::from(db.created()))
}

fn get_updated(db: &mut Database, _: &[Value]) -> Result<Value> {
    Ok(Value::from(db.updated()))
}

fn list_tables(db: &mut Database, _: &[Value]) -> Result<Value> {
    Ok(Value::from(db.list_tables()))
}

fn create_table(db: &mut Database, args: &[Value]) -> Result<Value> {
    let table = Table::from_value(arg(args, 0)?.clone())?;
    db.create_table(table)?;
    Ok(Value::Null)
}

fn remove_table(db: &mut Database, args: &[Value]) -> Result<Value> {
    db.remove_table(str_arg(args, 0, "table name")?)?;
    Ok(Value::Null)
}

fn rename_table(db: &mut Database, args: &[Value]) -> Result<Value> {
    let old_name = str_arg(args, 0, "table name")?;
    let new_name = str_arg(args, 1, "table name")?;
    db.rename_table(old_name, new_name)?;
    Ok(Value::Null)
}

fn clear_tables(db: &mut Database, _: &[Value]) -> Result<Value> {
    db.clear_tables();
    Ok(Value::Null)
}

fn remove_tables(db: &mut Database, _: &[Value]) -> Result<Value> {
    db.remove_tables();
    Ok(Value::Null)
}

fn table_get_created(db: &mut Database, args: &[Value]) -> Result<Value> {
    Ok(Value::from(db.table(str_arg(args, 0, "table name")?)?.created()))
}

fn table_get_updated(db: &mut Database, args: &[Value]) -> Result<Value> {
    Ok(Value::from(db.table(str_arg(args, 0, "table name")?)?.updated()))
}

fn table_get_fields(db: &mut Database, args: &[Value]) -> Result<Value> {
    let table = db.table(str_arg(args, 0, "table name")?)?;
    Ok(serde_json::to_value(table.field_definitions())?)
}

fn insert(db: &mut Database, args: &[Value]) -> Result<Value> {
    let table = str_arg(args, 0, "table name")?;
    let entry = db.insert(table, object_arg(args, 1, "entry")?)?;
    Ok(entry.to_json())
}

fn select(db: &mut Database, args: &[Value]) -> Result<Value> {
    let table = str_arg(args, 0, "table name")?;
    let filter = arg(args, 1)?;
    let orderer = args.get(2).filter(|v| !v.is_null());
    let fields = args
        .get(3)
        .filter(|v| !v.is_null())
        .map(field_list)
        .transpose()?;
    let offset = int_arg(args, 4, 0, "offset")?;
    let limit = int_arg(args, 5, -1, "limit")?;
    let selected = db.select(table, filter, orderer, fields.as_deref(), offset, limit)?;
    Ok(entries(&selected))
}

fn remove(db: &mut Database, args: &[Value]) -> Result<Value> {
    let table = str_arg(args, 0, "table name")?;
    let removed = db.remove(table, arg(args, 1)?)?;
    Ok(entries(&removed))
}

fn update(db: &mut Database, args: &[Value]) -> Result<Value> {
    let table = str_arg(args, 0, "table name")?;
    let modifs = object_arg(args, 2, "modifications")?;
    let updated = db.update(table, arg(args, 1)?, modifs)?;
    Ok(entries(&updated))
}

fn clear(db: &mut Database, args: &[Value]) -> Result<Value> {
    db.clear(str_arg(args, 0, "table name")?)?;
    Ok(Value::Null)
}
