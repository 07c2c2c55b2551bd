//! The database: a named, versioned registry of tables and the query entry points.

use crate::core::operation;
use crate::core::table::strip_kind;
use crate::core::value::{next_timestamp, now_millis};
use crate::{atomically, Entry, JsonDbError, Result, Snapshot, Table, TableDefinition};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Serialized form of a whole database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseDefinition {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<i64>,
    #[serde(default)]
    pub tables: Vec<TableDefinition>,
}

#[derive(Debug)]
struct DatabaseState {
    name: String,
    version: String,
    created: i64,
    updated: i64,
    tables: Vec<Table>,
    lookup: HashMap<String, usize>,
}

impl DatabaseState {
    fn copy(&self) -> Self {
        Self {
            name: self.name.clone(),
            version: self.version.clone(),
            created: self.created,
            updated: self.updated,
            tables: self.tables.iter().map(Table::detached).collect(),
            lookup: self.lookup.clone(),
        }
    }
}

/// An in-memory JSON document store.
///
/// `Database` owns its tables and is the only way to reach them mutably, so
/// its `updated` timestamp advances whenever any table changes. All
/// operations are available both as typed methods and through the JSON
/// query protocol ([`query`](Self::query), [`queries`](Self::queries) and
/// their atomic variants).
#[derive(Debug)]
pub struct Database {
    state: DatabaseState,
    saved: Vec<DatabaseState>,
}

impl Database {
    /// Creates an empty database.
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::Schema`] if `name` or `version` is empty.
    pub fn new(name: &str, version: &str) -> Result<Self> {
        Self::from_definition(DatabaseDefinition {
            name: name.to_string(),
            version: version.to_string(),
            created: None,
            updated: None,
            tables: Vec::new(),
        })
    }

    /// Builds a database from its serialized form, validating every table and
    /// every stored entry. The stored `updated` timestamp is kept.
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::Schema`] for any invalid part of the document.
    pub fn from_definition(definition: DatabaseDefinition) -> Result<Self> {
        if definition.name.is_empty() {
            return Err(JsonDbError::Schema(
                "property 'name' must be a non-empty string".to_string(),
            ));
        }
        if definition.version.is_empty() {
            return Err(JsonDbError::Schema(
                "property 'version' must be a non-empty string".to_string(),
            ));
        }
        let now = now_millis();
        let created = positive(definition.created, "created", now)?;
        let updated = positive(definition.updated, "updated", now)?;

        let mut db = Self {
            state: DatabaseState {
                name: definition.name,
                version: definition.version,
                created,
                updated,
                tables: Vec::new(),
                lookup: HashMap::new(),
            },
            saved: Vec::new(),
        };
        for (i, table) in definition.tables.into_iter().enumerate() {
            let table = Table::from_definition(table)
                .map_err(|e| JsonDbError::Schema(format!("tables[{i}]: {}", strip_kind(&e))))?;
            db.create_table(table)
                .map_err(|e| JsonDbError::Schema(format!("tables[{i}]: {}", strip_kind(&e))))?;
        }
        db.state.updated = updated;
        Ok(db)
    }

    /// Builds a database from a JSON value holding its serialized form.
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::Schema`] if the value is not a valid database.
    pub fn from_value(value: Value) -> Result<Self> {
        let definition: DatabaseDefinition =
            serde_json::from_value(value).map_err(|e| JsonDbError::Schema(e.to_string()))?;
        Self::from_definition(definition)
    }

    /// Parses serialized text and builds the database from it.
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::Json`] for malformed text and
    /// [`JsonDbError::Schema`] for a malformed document.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    #[must_use]
    pub fn to_definition(&self) -> DatabaseDefinition {
        DatabaseDefinition {
            name: self.state.name.clone(),
            version: self.state.version.clone(),
            created: Some(self.state.created),
            updated: Some(self.state.updated),
            tables: self.state.tables.iter().map(Table::to_definition).collect(),
        }
    }

    /// The whole document in its serialized JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.to_definition())?)
    }

    /// The serialized form of a single table.
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::TableNotFound`] if there is no such table.
    pub fn table_to_json(&self, name: &str) -> Result<Value> {
        self.table(name)?.to_json()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.state.name
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.state.version
    }

    #[must_use]
    pub fn created(&self) -> i64 {
        self.state.created
    }

    #[must_use]
    pub fn updated(&self) -> i64 {
        self.state.updated
    }

    /// Renames the database.
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::InvalidArgument`] if `name` is empty.
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(JsonDbError::InvalidArgument(
                "the new database name must be a non-empty string".to_string(),
            ));
        }
        self.state.name = name.to_string();
        self.touch();
        Ok(())
    }

    /// Changes the database version.
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::InvalidArgument`] if `version` is empty.
    pub fn set_version(&mut self, version: &str) -> Result<()> {
        if version.is_empty() {
            return Err(JsonDbError::InvalidArgument(
                "the new database version must be a non-empty string".to_string(),
            ));
        }
        self.state.version = version.to_string();
        self.touch();
        Ok(())
    }

    /// Table names in creation order.
    #[must_use]
    pub fn list_tables(&self) -> Vec<&str> {
        self.state.tables.iter().map(Table::name).collect()
    }

    /// Looks up a table by name.
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::TableNotFound`] if there is no such table.
    pub fn table(&self, name: &str) -> Result<&Table> {
        self.position(name).map(|i| &self.state.tables[i])
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        let i = self.position(name)?;
        Ok(&mut self.state.tables[i])
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.state
            .lookup
            .get(name)
            .copied()
            .ok_or_else(|| JsonDbError::TableNotFound(name.to_string()))
    }

    /// Adds a table.
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::TableExists`] if the name is taken.
    pub fn create_table(&mut self, table: Table) -> Result<()> {
        if self.state.lookup.contains_key(table.name()) {
            return Err(JsonDbError::TableExists(table.name().to_string()));
        }
        log::info!("Creating table '{}' in database '{}'", table.name(), self.state.name);
        self.state
            .lookup
            .insert(table.name().to_string(), self.state.tables.len());
        self.state.tables.push(table);
        self.touch();
        Ok(())
    }

    /// Drops a table and all of its entries.
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::TableNotFound`] if there is no such table.
    pub fn remove_table(&mut self, name: &str) -> Result<()> {
        let i = self.position(name)?;
        log::info!("Removing table '{name}' from database '{}'", self.state.name);
        self.state.tables.remove(i);
        self.reindex();
        self.touch();
        Ok(())
    }

    /// Renames a table, keeping its position in the listing.
    ///
    /// # Errors
    ///
    /// - [`JsonDbError::InvalidArgument`] if `new_name` is empty.
    /// - [`JsonDbError::TableNotFound`] if `old_name` does not exist.
    /// - [`JsonDbError::TableExists`] if `new_name` is taken.
    pub fn rename_table(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        if new_name.is_empty() {
            return Err(JsonDbError::InvalidArgument(
                "table name cannot be empty".to_string(),
            ));
        }
        let i = self.position(old_name)?;
        if self.state.lookup.contains_key(new_name) {
            return Err(JsonDbError::TableExists(new_name.to_string()));
        }
        log::info!("Renaming table '{old_name}' to '{new_name}'");
        self.state.tables[i].set_name(new_name.to_string());
        self.state.lookup.remove(old_name);
        self.state.lookup.insert(new_name.to_string(), i);
        self.touch();
        Ok(())
    }

    /// Empties every table. Returns `true` if any entry was removed.
    pub fn clear_tables(&mut self) -> bool {
        let mut changed = false;
        for table in &mut self.state.tables {
            changed |= table.clear();
        }
        if changed {
            self.touch();
        }
        changed
    }

    /// Drops every table. Returns `true` if there was any.
    pub fn remove_tables(&mut self) -> bool {
        if self.state.tables.is_empty() {
            return false;
        }
        log::info!("Removing all tables from database '{}'", self.state.name);
        self.state.tables.clear();
        self.state.lookup.clear();
        self.touch();
        true
    }

    /// Inserts an entry into `table`. See [`Table::insert`].
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::TableNotFound`] or any insert error.
    pub fn insert(&mut self, table: &str, values: &Map<String, Value>) -> Result<Entry> {
        let entry = self.table_mut(table)?.insert(values)?;
        self.touch();
        Ok(entry)
    }

    /// Selects entries from `table`. See [`Table::select`].
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::TableNotFound`] or any select error.
    pub fn select(
        &self,
        table: &str,
        filter: &Value,
        orderer: Option<&Value>,
        fields: Option<&[String]>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Entry>> {
        self.table(table)?
            .select(filter, orderer, fields, offset, limit)
    }

    /// Updates entries of `table`. See [`Table::update`].
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::TableNotFound`] or any update error.
    pub fn update(
        &mut self,
        table: &str,
        filter: &Value,
        modifs: &Map<String, Value>,
    ) -> Result<Vec<Entry>> {
        let updated = self.table_mut(table)?.update(filter, modifs)?;
        if !updated.is_empty() {
            self.touch();
        }
        Ok(updated)
    }

    /// Removes entries of `table`. See [`Table::remove`].
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::TableNotFound`] or any filter error.
    pub fn remove(&mut self, table: &str, filter: &Value) -> Result<Vec<Entry>> {
        let removed = self.table_mut(table)?.remove(filter)?;
        if !removed.is_empty() {
            self.touch();
        }
        Ok(removed)
    }

    /// Removes every entry of `table`. Returns `true` if it had any.
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::TableNotFound`] if there is no such table.
    pub fn clear(&mut self, table: &str) -> Result<bool> {
        let cleared = self.table_mut(table)?.clear();
        if cleared {
            self.touch();
        }
        Ok(cleared)
    }

    /// Runs one query `[operation, args..]` and returns its result.
    ///
    /// Nothing is rolled back on failure; use
    /// [`atomic_query`](Self::atomic_query) for that.
    ///
    /// # Errors
    ///
    /// - [`JsonDbError::InvalidArgument`] if `query` is not a non-empty array
    ///   whose first element is a string.
    /// - [`JsonDbError::UnknownOperation`] for an unregistered name.
    /// - [`JsonDbError::Arity`] for a wrong number of arguments.
    /// - [`JsonDbError::QueryFailed`] wrapping any error of the operation itself.
    pub fn query(&mut self, query: &Value) -> Result<Value> {
        let items = query.as_array().ok_or_else(|| {
            JsonDbError::InvalidArgument("the query object must be an array".to_string())
        })?;
        let Some((head, args)) = items.split_first() else {
            return Err(JsonDbError::InvalidArgument(
                "the query object cannot be empty".to_string(),
            ));
        };
        let name = head.as_str().ok_or_else(|| {
            JsonDbError::InvalidArgument("the query's operation name must be a string".to_string())
        })?;
        let op = operation::lookup(name)
            .ok_or_else(|| JsonDbError::UnknownOperation(name.to_string()))?;
        op.check_arity(name, args.len())?;

        log::debug!("Database '{}': running '{name}' ({})", self.state.name, op.name);
        (op.handler)(self, args).map_err(|e| JsonDbError::QueryFailed {
            database: self.state.name.clone(),
            operation: name.to_string(),
            source: Box::new(e),
            query: serde_json::to_string(query).unwrap_or_default(),
        })
    }

    /// Runs one query; on failure the database is left exactly as before.
    ///
    /// # Errors
    ///
    /// Same as [`query`](Self::query).
    pub fn atomic_query(&mut self, query: &Value) -> Result<Value> {
        atomically(self, |db| db.query(query))
    }

    /// Runs a list of queries in order and returns the list of results.
    ///
    /// Queries before a failing one stay applied.
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::InvalidArgument`] if `queries` is not an array,
    /// and [`JsonDbError::BatchFailed`] naming the first failing query.
    pub fn queries(&mut self, queries: &Value) -> Result<Value> {
        let items = queries.as_array().ok_or_else(|| {
            JsonDbError::InvalidArgument("queries must be an array of queries".to_string())
        })?;
        let mut results = Vec::with_capacity(items.len());
        for (index, query) in items.iter().enumerate() {
            let result = self.query(query).map_err(|e| JsonDbError::BatchFailed {
                index,
                source: Box::new(e),
            })?;
            results.push(result);
        }
        Ok(Value::Array(results))
    }

    /// Runs a list of queries as one unit: if any fails, every query of the
    /// batch is rolled back.
    ///
    /// # Errors
    ///
    /// Same as [`queries`](Self::queries).
    pub fn atomic_queries(&mut self, queries: &Value) -> Result<Value> {
        atomically(self, |db| db.queries(queries))
    }

    fn touch(&mut self) {
        self.state.updated = next_timestamp(self.state.updated);
    }

    fn reindex(&mut self) {
        self.state.lookup = self
            .state
            .tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name().to_string(), i))
            .collect();
    }
}

impl Snapshot for Database {
    fn save_state(&mut self) {
        self.saved.push(self.state.copy());
    }

    fn restore_state(&mut self) -> Result<()> {
        self.state = self
            .saved
            .pop()
            .ok_or(JsonDbError::EmptySnapshotStack("Restore state"))?;
        Ok(())
    }

    fn ignore_state(&mut self) -> Result<()> {
        self.saved
            .pop()
            .map(|_| ())
            .ok_or(JsonDbError::EmptySnapshotStack("Ignore state"))
    }

    fn saved_states(&self) -> usize {
        self.saved.len()
    }
}

impl Serialize for Database {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_definition().serialize(serializer)
    }
}

impl PartialEq for Database {
    fn eq(&self, other: &Self) -> bool {
        self.state.name == other.state.name
            && self.state.version == other.state.version
            && self.state.created == other.state.created
            && self.state.updated == other.state.updated
            && self.state.tables == other.state.tables
    }
}

fn positive(value: Option<i64>, prop: &str, now: i64) -> Result<i64> {
    match value {
        None => Ok(now),
        Some(ts) if ts > 0 => Ok(ts),
        Some(_) => Err(JsonDbError::Schema(format!("property '{prop}' must be a date"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shop() -> Database {
        let mut db = Database::new("shop", "1.0").unwrap();
        db.query(&json!(["createTable", {
            "name": "items",
            "fields": [
                {"name": "id", "type": "id", "unique": true, "generated": true},
                {"name": "label", "type": "string", "unique": true},
                {"name": "price", "type": "number", "minValue": 0},
                {"name": "stock", "type": "integer", "default": 0}
            ]
        }]))
        .unwrap();
        db
    }

    fn labels(db: &mut Database) -> Vec<String> {
        db.query(&json!(["select", "items", "*", null, ["label"]]))
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["label"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_new_database_rejects_empty_name_or_version() {
        assert!(matches!(Database::new("", "1"), Err(JsonDbError::Schema(_))));
        assert!(matches!(Database::new("db", ""), Err(JsonDbError::Schema(_))));
        let db = Database::new("db", "1").unwrap();
        assert!(db.list_tables().is_empty());
        assert!(db.created() > 0);
    }

    #[test]
    fn test_meta_operations_and_aliases() {
        let mut db = shop();
        assert_eq!(db.query(&json!(["getName"])).unwrap(), json!("shop"));
        assert_eq!(db.query(&json!(["name"])).unwrap(), json!("shop"));
        db.query(&json!(["name=", "store"])).unwrap();
        db.query(&json!(["v=", "2.0"])).unwrap();
        assert_eq!(db.query(&json!(["v"])).unwrap(), json!("2.0"));
        assert_eq!(db.name(), "store");
        assert_eq!(db.query(&json!(["ctime"])).unwrap(), json!(db.created()));
        assert_eq!(db.query(&json!(["utime"])).unwrap(), json!(db.updated()));
        assert_eq!(db.query(&json!(["ls"])).unwrap(), json!(["items"]));
    }

    #[test]
    fn test_set_name_rejects_empty_string() {
        let mut db = shop();
        let err = db.query(&json!(["setName", ""])).unwrap_err();
        assert!(matches!(err.root(), JsonDbError::InvalidArgument(_)));
        let err = db.query(&json!(["setName", 3])).unwrap_err();
        assert!(matches!(err.root(), JsonDbError::InvalidArgument(_)));
        assert_eq!(db.name(), "shop");
    }

    #[test]
    fn test_query_shape_errors() {
        let mut db = shop();
        assert!(matches!(db.query(&json!("ls")), Err(JsonDbError::InvalidArgument(_))));
        assert!(matches!(db.query(&json!([])), Err(JsonDbError::InvalidArgument(_))));
        assert!(matches!(db.query(&json!([1])), Err(JsonDbError::InvalidArgument(_))));
        assert!(matches!(
            db.query(&json!(["dropEverything"])),
            Err(JsonDbError::UnknownOperation(_))
        ));
        let err = db.query(&json!(["select", "items"])).unwrap_err();
        assert!(matches!(err, JsonDbError::Arity { got: 1, ref expected, .. } if expected == "2 to 6"));
        let err = db.query(&json!(["getName", 1])).unwrap_err();
        assert!(matches!(err, JsonDbError::Arity { ref expected, .. } if expected == "0"));
    }

    #[test]
    fn test_handler_errors_carry_query_context() {
        let mut db = shop();
        let err = db.query(&json!(["tput", "nope", {}])).unwrap_err();
        match &err {
            JsonDbError::QueryFailed { database, operation, query, .. } => {
                assert_eq!(database, "shop");
                assert_eq!(operation, "tput");
                assert_eq!(query, r#"["tput","nope",{}]"#);
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(matches!(err.root(), JsonDbError::TableNotFound(_)));
    }

    #[test]
    fn test_table_lifecycle() {
        let mut db = shop();
        db.query(&json!(["tmk", {"name": "tags", "fields": [{"name": "t", "type": "string"}]}]))
            .unwrap();
        assert_eq!(db.list_tables(), ["items", "tags"]);

        let err = db
            .query(&json!(["tmk", {"name": "tags", "fields": [{"name": "t", "type": "string"}]}]))
            .unwrap_err();
        assert!(matches!(err.root(), JsonDbError::TableExists(_)));

        db.query(&json!(["tmv", "items", "products"])).unwrap();
        assert_eq!(db.list_tables(), ["products", "tags"]);
        assert!(db.table("items").is_err());
        assert_eq!(db.table("products").unwrap().name(), "products");
        let err = db.query(&json!(["tmv", "tags", "products"])).unwrap_err();
        assert!(matches!(err.root(), JsonDbError::TableExists(_)));
        let err = db.query(&json!(["tmv", "tags", ""])).unwrap_err();
        assert!(matches!(err.root(), JsonDbError::InvalidArgument(_)));

        db.query(&json!(["removeTable", "products"])).unwrap();
        assert_eq!(db.list_tables(), ["tags"]);
        assert!(db.table("tags").is_ok());

        db.query(&json!(["rm*"])).unwrap();
        assert!(db.list_tables().is_empty());
    }

    #[test]
    fn test_table_introspection() {
        let mut db = shop();
        let fields = db.query(&json!(["tfi", "items"])).unwrap();
        assert_eq!(fields[0]["name"], json!("id"));
        assert_eq!(fields[1]["nullable"], json!(false));
        assert_eq!(fields[3]["default"], json!(0));
        let created = db.query(&json!(["tctime", "items"])).unwrap();
        assert_eq!(created, json!(db.table("items").unwrap().created()));
        db.query(&json!(["tput", "items", {"label": "pen", "price": 1.5}])).unwrap();
        let updated = db.query(&json!(["tutime", "items"])).unwrap();
        assert_eq!(updated, json!(db.table("items").unwrap().updated()));
    }

    #[test]
    fn test_entry_operations() {
        let mut db = shop();
        let pen = db.query(&json!(["insert", "items", {"label": "pen", "price": 1.5}])).unwrap();
        assert_eq!(pen["stock"], json!(0));
        assert_eq!(pen["id"].as_str().unwrap().len(), 16);
        db.query(&json!(["tput", "items", {"label": "ink", "price": 4, "stock": 3}])).unwrap();
        db.query(&json!(["tput", "items", {"label": "cap", "price": 0.5, "stock": 9}])).unwrap();

        let got = db
            .query(&json!(["tget", "items", ["$price", "<", 2], ["price", "+val"], ["label"], 0, -1]))
            .unwrap();
        assert_eq!(got, json!([{"label": "cap"}, {"label": "pen"}]));

        let set = db
            .query(&json!(["tset", "items", ["$label", "=", "pen"], {"stock": 7}]))
            .unwrap();
        assert_eq!(set[0]["stock"], json!(7));

        let removed = db.query(&json!(["trm", "items", ["$stock", ">", 5]])).unwrap();
        assert_eq!(removed.as_array().unwrap().len(), 2);
        assert_eq!(labels(&mut db), ["ink"]);

        db.query(&json!(["tcl", "items"])).unwrap();
        assert!(labels(&mut db).is_empty());
    }

    #[test]
    fn test_select_argument_errors() {
        let mut db = shop();
        for bad in [
            json!(["select", "items", "*", null, null, "1"]),
            json!(["select", "items", "*", null, null, -1]),
            json!(["select", "items", "*", null, null, 0, -4]),
            json!(["select", "items", "*", null, [1]]),
            json!(["select", "items", "*", null, "label"]),
            json!(["select", "items", "*", null, ["label", "label"]]),
            json!(["select", 3, "*"]),
        ] {
            let err = db.query(&bad).unwrap_err();
            assert!(matches!(err, JsonDbError::QueryFailed { .. }), "{bad} gave {err}");
        }
    }

    #[test]
    fn test_select_accepts_integral_float_window() {
        let mut db = shop();
        for label in ["a", "b", "c"] {
            db.query(&json!(["tput", "items", {"label": label, "price": 1}])).unwrap();
        }
        let got = db
            .query(&json!(["select", "items", "*", null, ["label"], 1.0, 1.0]))
            .unwrap();
        assert_eq!(got, json!([{"label": "b"}]));
        let err = db
            .query(&json!(["select", "items", "*", null, null, 1.5]))
            .unwrap_err();
        assert!(matches!(err.root(), JsonDbError::InvalidArgument(_)));
    }

    #[test]
    fn test_reads_do_not_advance_updated() {
        let mut db = shop();
        let before = db.updated();
        db.query(&json!(["select", "items", "*"])).unwrap();
        db.query(&json!(["ls"])).unwrap();
        db.query(&json!(["tfi", "items"])).unwrap();
        assert_eq!(db.updated(), before);
        db.query(&json!(["trm", "items", "*"])).unwrap();
        db.query(&json!(["cl"])).unwrap();
        assert_eq!(db.updated(), before);
        db.query(&json!(["tput", "items", {"label": "pen", "price": 1}])).unwrap();
        assert!(db.updated() > before);
    }

    #[test]
    fn test_atomic_query_rollback_keeps_state() {
        let mut db = shop();
        db.query(&json!(["tput", "items", {"label": "pen", "price": 1}])).unwrap();
        let before = db.to_json().unwrap();
        let updated = db.updated();

        assert!(db.atomic_query(&json!(["tput", "items", {"label": "pen", "price": 2}])).is_err());
        assert!(db.atomic_query(&json!(["tset", "items", "*", {"price": -5}])).is_err());
        assert_eq!(db.updated(), updated);
        assert_eq!(db.to_json().unwrap(), before);
        assert_eq!(db.saved_states(), 0);
    }

    #[test]
    fn test_batch_failure_modes() {
        let mut db = shop();
        let batch = json!([
            ["tput", "items", {"label": "a", "price": 1}],
            ["tput", "items", {"label": "b", "price": 1}],
            ["tput", "items", {"label": "a", "price": 1}]
        ]);

        let err = db.atomic_queries(&batch).unwrap_err();
        assert!(matches!(err, JsonDbError::BatchFailed { index: 2, .. }));
        assert!(err.to_string().starts_with("Query [2]: "));
        assert!(matches!(err.root(), JsonDbError::UniqueConflict { .. }));
        assert!(labels(&mut db).is_empty());

        let err = db.queries(&batch).unwrap_err();
        assert!(matches!(err, JsonDbError::BatchFailed { index: 2, .. }));
        assert_eq!(labels(&mut db), ["a", "b"]);
    }

    #[test]
    fn test_batch_results_are_parallel() {
        let mut db = shop();
        let res = db
            .atomic_queries(&json!([["name"], ["tput", "items", {"label": "a", "price": 1}], ["ls"]]))
            .unwrap();
        let res = res.as_array().unwrap();
        assert_eq!(res.len(), 3);
        assert_eq!(res[0], json!("shop"));
        assert_eq!(res[1]["label"], json!("a"));
        assert_eq!(res[2], json!(["items"]));
        assert!(matches!(db.queries(&json!({})), Err(JsonDbError::InvalidArgument(_))));
    }

    #[test]
    fn test_round_trip_through_text() {
        let mut db = shop();
        db.query(&json!(["tput", "items", {"label": "pen", "price": 1.5}])).unwrap();
        db.query(&json!(["tput", "items", {"label": "ink", "price": 4}])).unwrap();

        let text = serde_json::to_string(&db).unwrap();
        let back = Database::from_json_str(&text).unwrap();
        assert_eq!(back, db);
        assert_eq!(back.to_json().unwrap(), db.to_json().unwrap());
        assert_eq!(db.table_to_json("items").unwrap(), db.to_json().unwrap()["tables"][0]);
    }

    #[test]
    fn test_load_errors() {
        assert!(matches!(Database::from_json_str("{"), Err(JsonDbError::Json(_))));
        for bad in [
            json!({"name": "db"}),
            json!({"name": "db", "version": "1", "owner": "me"}),
            json!({"name": "db", "version": "1", "updated": -3}),
            json!({"name": "db", "version": "1", "tables": [
                {"name": "t", "fields": [{"name": "a", "type": "string"}]},
                {"name": "t", "fields": [{"name": "a", "type": "string"}]}
            ]}),
            json!({"name": "db", "version": "1", "tables": [
                {"name": "t", "fields": [{"name": "a", "type": "string", "size": 3}]}
            ]}),
        ] {
            assert!(matches!(Database::from_value(bad.clone()), Err(JsonDbError::Schema(_))), "{bad}");
        }
    }

    #[test]
    fn test_snapshot_stack() {
        let mut db = shop();
        db.save_state();
        db.query(&json!(["rm*"])).unwrap();
        db.save_state();
        db.query(&json!(["name=", "other"])).unwrap();
        db.ignore_state().unwrap();
        assert_eq!(db.name(), "other");
        db.restore_state().unwrap();
        assert_eq!(db.name(), "shop");
        assert_eq!(db.list_tables(), ["items"]);
        assert!(db.restore_state().is_err());
        assert!(db.ignore_state().is_err());
    }
}
