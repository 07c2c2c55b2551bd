//! A single table: its fixed schema, its entries and its unique indexes.

use crate::core::value::next_timestamp;
use crate::{
    Entry, EntryId, Field, FieldDefinition, FieldValue, Filter, IndexKey, JsonDbError, Orderer,
    Result, Snapshot,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Stored values of one entry, aligned with the table's field order.
pub(crate) type Row = Vec<FieldValue>;

/// Value-to-entry lookup for one unique field.
pub type UniqueIndex = HashMap<IndexKey, EntryId>;

/// Serialized form of a table, as found in the `tables` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<i64>,
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub entries: Vec<Map<String, Value>>,
}

/// The mutable part of a table, which is all a snapshot needs to copy.
#[derive(Debug, Clone)]
struct TableState {
    name: String,
    updated: i64,
    entries: BTreeMap<EntryId, Row>,
    indexes: BTreeMap<usize, UniqueIndex>,
    next_id: u64,
}

/// One table of a [`Database`](crate::Database).
///
/// The field list is fixed when the table is built. Entries live in an
/// ordered map keyed by [`EntryId`], so iteration follows insertion order and
/// unique indexes can point at entries by handle.
///
/// Every mutating method validates its whole input before touching any
/// entry; an `Err` always means nothing changed.
#[derive(Debug, Clone)]
pub struct Table {
    created: i64,
    fields: Vec<Field>,
    positions: HashMap<String, usize>,
    state: TableState,
    saved: Vec<TableState>,
}

impl Table {
    /// Builds a table from its serialized form.
    ///
    /// Stored entries go through the regular insert path, so missing values
    /// are generated or defaulted and every constraint is enforced. The stored
    /// `updated` timestamp is kept.
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::Schema`] for an invalid table or field
    /// definition, or when a stored entry fails validation.
    pub fn from_definition(definition: TableDefinition) -> Result<Self> {
        if definition.name.is_empty() {
            return Err(JsonDbError::Schema(
                "property 'name' must be a non-empty string".to_string(),
            ));
        }
        let now = crate::core::value::now_millis();
        let created = timestamp(definition.created, "created", now)?;
        let updated = timestamp(definition.updated, "updated", now)?;
        if definition.fields.is_empty() {
            return Err(JsonDbError::Schema(
                "property 'fields' must be a non-empty array".to_string(),
            ));
        }

        let mut fields = Vec::with_capacity(definition.fields.len());
        let mut positions = HashMap::new();
        let mut indexes = BTreeMap::new();
        for (i, def) in definition.fields.into_iter().enumerate() {
            if positions.contains_key(&def.name) {
                return Err(JsonDbError::Schema(format!(
                    "fields[{i}]: field '{}' already exists",
                    def.name
                )));
            }
            let field = Field::from_definition(def)
                .map_err(|e| JsonDbError::Schema(format!("fields[{i}]: {}", strip_kind(&e))))?;
            if field.is_unique() {
                indexes.insert(i, UniqueIndex::new());
            }
            positions.insert(field.name().to_string(), i);
            fields.push(field);
        }

        let mut table = Self {
            created,
            fields,
            positions,
            state: TableState {
                name: definition.name,
                updated,
                entries: BTreeMap::new(),
                indexes,
                next_id: 0,
            },
            saved: Vec::new(),
        };

        for (i, entry) in definition.entries.iter().enumerate() {
            table
                .insert(entry)
                .map_err(|e| JsonDbError::Schema(format!("entries[{i}]: {}", strip_kind(&e))))?;
        }
        table.state.updated = updated;
        Ok(table)
    }

    /// Builds a table from a JSON value holding its serialized form.
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::Schema`] if the value does not describe a valid table.
    pub fn from_value(value: Value) -> Result<Self> {
        let definition: TableDefinition =
            serde_json::from_value(value).map_err(|e| JsonDbError::Schema(e.to_string()))?;
        Self::from_definition(definition)
    }

    /// Returns the serialized form of the table.
    #[must_use]
    pub fn to_definition(&self) -> TableDefinition {
        TableDefinition {
            name: self.state.name.clone(),
            created: Some(self.created),
            updated: Some(self.state.updated),
            fields: self.field_definitions(),
            entries: self
                .state
                .entries
                .values()
                .map(|row| self.project(row, None).to_map())
                .collect(),
        }
    }

    /// The serialized form as a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`JsonDbError::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.to_definition())?)
    }

    /// A copy of the table without its snapshot stack.
    pub(crate) fn detached(&self) -> Self {
        Self {
            created: self.created,
            fields: self.fields.clone(),
            positions: self.positions.clone(),
            state: self.state.clone(),
            saved: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.state.name = name;
        self.touch();
    }

    #[must_use]
    pub fn created(&self) -> i64 {
        self.created
    }

    #[must_use]
    pub fn updated(&self) -> i64 {
        self.state.updated
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn field_definitions(&self) -> Vec<FieldDefinition> {
        self.fields.iter().map(|f| f.definition().clone()).collect()
    }

    #[must_use]
    pub fn field_position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.entries.is_empty()
    }

    /// The unique index of `field`, if that field is unique.
    #[must_use]
    pub fn unique_index(&self, field: &str) -> Option<&UniqueIndex> {
        self.field_position(field)
            .and_then(|pos| self.state.indexes.get(&pos))
    }

    /// Inserts an entry built from `values`.
    ///
    /// Missing fields are generated (for `generated` fields) or take the
    /// field's default. Returns a copy of the stored entry.
    ///
    /// # Errors
    ///
    /// - [`JsonDbError::FieldNotFound`] if `values` names an unknown field.
    /// - [`JsonDbError::ValidationFailed`] if a value breaks its constraints.
    /// - [`JsonDbError::UniqueConflict`] if a unique value is already taken.
    pub fn insert(&mut self, values: &Map<String, Value>) -> Result<Entry> {
        self.check_known_fields(values)?;

        let mut row = Row::with_capacity(self.fields.len());
        for (pos, field) in self.fields.iter().enumerate() {
            let value = match values.get(field.name()) {
                Some(raw) => field.check(raw)?,
                None if field.is_generated() => field.generate(self.state.indexes.get(&pos)),
                None if field.default_value().is_null() => field.check(&Value::Null)?,
                None => field.default_value().clone(),
            };
            self.check_unique_free(pos, &value)?;
            row.push(value);
        }

        let id = EntryId(self.state.next_id);
        self.state.next_id += 1;
        for (pos, index) in &mut self.state.indexes {
            index.insert(row[*pos].index_key(), id);
        }
        let entry = self.project(&row, None);
        self.state.entries.insert(id, row);
        self.touch();
        Ok(entry)
    }

    /// Returns detached copies of the entries matching `filter`.
    ///
    /// Matches are optionally sorted (stable) by `orderer`, then the window
    /// `[offset, offset + limit)` is taken (`limit = -1` means no limit) and
    /// each entry is projected onto `fields` (all fields when `None`).
    ///
    /// # Errors
    ///
    /// - [`JsonDbError::InvalidArgument`] for a negative `offset` or a
    ///   `limit` below `-1`.
    /// - [`JsonDbError::FieldNotFound`] for an unknown projected field, and
    ///   [`JsonDbError::InvalidArgument`] for one projected twice.
    /// - Any compile error of `filter` or `orderer`.
    pub fn select(
        &self,
        filter: &Value,
        orderer: Option<&Value>,
        fields: Option<&[String]>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Entry>> {
        let projection = fields
            .map(|names| {
                let mut positions = Vec::with_capacity(names.len());
                for name in names {
                    let pos = self.field_position(name).ok_or_else(|| self.unknown_field(name))?;
                    if positions.contains(&pos) {
                        return Err(JsonDbError::InvalidArgument(format!(
                            "field '{name}' is selected more than once"
                        )));
                    }
                    positions.push(pos);
                }
                Ok(positions)
            })
            .transpose()?;
        let offset = usize::try_from(offset).map_err(|_| {
            JsonDbError::InvalidArgument("offset must be an integer >= 0".to_string())
        })?;
        let limit = match limit {
            -1 => None,
            n => Some(usize::try_from(n).map_err(|_| {
                JsonDbError::InvalidArgument("limit must be an integer >= -1".to_string())
            })?),
        };

        let filter = Filter::compile(self, filter)?;
        let orderer = orderer.map(|o| Orderer::compile(self, o)).transpose()?;

        let mut rows = filter.apply(self.rows());
        if let Some(orderer) = &orderer {
            rows.sort_by(|(_, a), (_, b)| orderer.compare(a, b));
        }
        Ok(rows
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .map(|(_, row)| self.project(row, projection.as_deref()))
            .collect())
    }

    /// Applies `modifs` to every entry matching `filter` and returns the
    /// updated entries.
    ///
    /// # Errors
    ///
    /// - [`JsonDbError::FieldNotFound`] / [`JsonDbError::ValidationFailed`]
    ///   if `modifs` is not a valid partial entry.
    /// - [`JsonDbError::UniqueConflict`] if a modified unique value is
    ///   already present in its index.
    /// - [`JsonDbError::InvalidArgument`] if a unique field would be set on
    ///   more than one entry.
    pub fn update(&mut self, filter: &Value, modifs: &Map<String, Value>) -> Result<Vec<Entry>> {
        let changes = self.check_partial(modifs)?;
        for (pos, value) in &changes {
            self.check_unique_free(*pos, value)?;
        }

        let filter = Filter::compile(self, filter)?;
        let targets: Vec<EntryId> = filter.apply(self.rows()).into_iter().map(|(id, _)| id).collect();
        if targets.is_empty() {
            return Ok(Vec::new());
        }
        let touches_unique = changes.iter().any(|(pos, _)| self.fields[*pos].is_unique());
        if targets.len() > 1 && touches_unique {
            return Err(JsonDbError::InvalidArgument(
                "cannot update unique fields of several entries".to_string(),
            ));
        }

        let mut updated = Vec::with_capacity(targets.len());
        for id in targets {
            let Some(row) = self.state.entries.get_mut(&id) else {
                continue;
            };
            for (pos, value) in &changes {
                if row[*pos] == *value {
                    continue;
                }
                if let Some(index) = self.state.indexes.get_mut(pos) {
                    index.remove(&row[*pos].index_key());
                    index.insert(value.index_key(), id);
                }
                row[*pos] = value.clone();
            }
            updated.push(id);
        }
        self.touch();

        Ok(updated
            .iter()
            .filter_map(|id| self.state.entries.get(id))
            .map(|row| self.project(row, None))
            .collect())
    }

    /// Removes every entry matching `filter` and returns them.
    ///
    /// # Errors
    ///
    /// Returns any compile error of `filter`.
    pub fn remove(&mut self, filter: &Value) -> Result<Vec<Entry>> {
        let filter = Filter::compile(self, filter)?;
        let targets: Vec<EntryId> = filter.apply(self.rows()).into_iter().map(|(id, _)| id).collect();
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let mut removed = Vec::with_capacity(targets.len());
        for id in targets {
            if let Some(row) = self.state.entries.remove(&id) {
                for (pos, index) in &mut self.state.indexes {
                    index.remove(&row[*pos].index_key());
                }
                removed.push(self.project(&row, None));
            }
        }
        self.touch();
        Ok(removed)
    }

    /// Removes every entry. Returns `true` if there was anything to remove.
    pub fn clear(&mut self) -> bool {
        if self.state.entries.is_empty() {
            return false;
        }
        self.state.entries.clear();
        for index in self.state.indexes.values_mut() {
            index.clear();
        }
        self.touch();
        true
    }

    fn rows(&self) -> Vec<(EntryId, &Row)> {
        self.state.entries.iter().map(|(id, row)| (*id, row)).collect()
    }

    fn project(&self, row: &Row, positions: Option<&[usize]>) -> Entry {
        let pick = |pos: usize| (self.fields[pos].name().to_string(), row[pos].clone());
        match positions {
            Some(positions) => Entry::new(positions.iter().map(|p| pick(*p)).collect()),
            None => Entry::new((0..self.fields.len()).map(pick).collect()),
        }
    }

    fn touch(&mut self) {
        self.state.updated = next_timestamp(self.state.updated);
    }

    fn unknown_field(&self, name: &str) -> JsonDbError {
        JsonDbError::FieldNotFound {
            table: self.state.name.clone(),
            field: name.to_string(),
        }
    }

    fn check_known_fields(&self, values: &Map<String, Value>) -> Result<()> {
        match values.keys().find(|k| !self.positions.contains_key(*k)) {
            Some(unknown) => Err(self.unknown_field(unknown)),
            None => Ok(()),
        }
    }

    /// Validates a partial entry, returning typed values by field position.
    fn check_partial(&self, values: &Map<String, Value>) -> Result<Vec<(usize, FieldValue)>> {
        values
            .iter()
            .map(|(name, raw)| -> Result<(usize, FieldValue)> {
                let pos = self.field_position(name).ok_or_else(|| self.unknown_field(name))?;
                Ok((pos, self.fields[pos].check(raw)?))
            })
            .collect()
    }

    fn check_unique_free(&self, pos: usize, value: &FieldValue) -> Result<()> {
        match self.state.indexes.get(&pos) {
            Some(index) if index.contains_key(&value.index_key()) => {
                Err(JsonDbError::UniqueConflict {
                    field: self.fields[pos].name().to_string(),
                    value: value.to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

impl Serialize for Table {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_definition().serialize(serializer)
    }
}

impl Snapshot for Table {
    fn save_state(&mut self) {
        self.saved.push(self.state.clone());
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

impl PartialEq for Table {
    /// Tables are equal when their schema, timestamps and entries are.
    fn eq(&self, other: &Self) -> bool {
        self.created == other.created
            && self.state.name == other.state.name
            && self.state.updated == other.state.updated
            && self.field_definitions() == other.field_definitions()
            && self.state.entries.values().eq(other.state.entries.values())
    }
}

fn timestamp(value: Option<i64>, prop: &str, now: i64) -> Result<i64> {
    match value {
        None => Ok(now),
        Some(ts) if ts > 0 => Ok(ts),
        Some(_) => Err(JsonDbError::Schema(format!("property '{prop}' must be a date"))),
    }
}

/// Message of a nested error without its kind prefix.
pub(crate) fn strip_kind(e: &JsonDbError) -> String {
    match e {
        JsonDbError::Schema(msg)
        | JsonDbError::ValidationFailed(msg)
        | JsonDbError::InvalidArgument(msg) => msg.clone(),
        other => other.to_string(),
    }
}
