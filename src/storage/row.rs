//! # Row Management
use super::column::ColumnValue;
use super::encoding;
use super::schema::TableSchema;
use crate::errors::Error;
use bincode::{Decode, Encode};
use std::collections::HashMap;

/// A database row keyed by column name.
///
/// Rows are open maps: a row may omit nullable columns, and partial rows are
/// used for updates. Validation against a [`TableSchema`] happens before
/// anything reaches disk.
#[derive(Encode, Decode, Debug, Clone, Default, PartialEq)]
pub struct Row {
    /// Internal storage of column values
    pub inner: HashMap<String, ColumnValue>,
}

impl Row {
    pub fn new() -> Self {
        Row {
            inner: HashMap::new(),
        }
    }

    /// Builder-style setter accepting anything convertible to a value.
    pub fn set(mut self, column: &str, value: impl Into<ColumnValue>) -> Self {
        self.inner.insert(column.to_string(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.inner.get(column)
    }

    /// Extracts the primary key value from the row based on the table schema.
    pub fn primary_key(&self, schema: &TableSchema) -> Result<i64, Error> {
        let pk = schema
            .primary_key()
            .ok_or_else(|| Error::SchemaInvalid("No primary key column defined".into()))?;
        match self.inner.get(&pk.name) {
            Some(ColumnValue::Int(v)) => Ok(*v),
            Some(_) => Err(Error::TypeMismatch {
                column: pk.name.clone(),
                expected: pk.type_.to_string(),
            }),
            None => Err(Error::MissingPrimaryKey(pk.name.clone())),
        }
    }

    /// Checks every present column against the schema: the name must exist
    /// and the value must match the column type.
    fn check_columns(&self, schema: &TableSchema) -> Result<(), Error> {
        for (name, value) in &self.inner {
            let column = schema
                .column(name)
                .ok_or_else(|| Error::UnknownColumn(name.clone()))?;
            if value.column_type() != column.type_ {
                return Err(Error::TypeMismatch {
                    column: name.clone(),
                    expected: column.type_.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Validates a full row about to be inserted. The primary key must be
    /// present.
    pub fn validate_insert(&self, schema: &TableSchema) -> Result<(), Error> {
        self.check_columns(schema)?;
        self.primary_key(schema)?;
        Ok(())
    }

    /// Validates a partial row about to be merged into an existing one. The
    /// primary key must not be present.
    pub fn validate_update(&self, schema: &TableSchema) -> Result<(), Error> {
        self.check_columns(schema)?;
        if let Some(pk) = schema.primary_key() {
            if self.inner.contains_key(&pk.name) {
                return Err(Error::PrimaryKeyUpdateForbidden(pk.name.clone()));
            }
        }
        Ok(())
    }

    /// Overlays `patch` onto this row, replacing existing values.
    pub fn merge(&mut self, patch: Row) {
        for (name, value) in patch.inner {
            self.inner.insert(name, value);
        }
    }
}

impl std::fmt::Display for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut columns: Vec<&String> = self.inner.keys().collect();
        columns.sort();
        let formatted: Vec<String> = columns
            .iter()
            .map(|name| format!("{}: {}", name, self.inner[*name]))
            .collect();
        write!(f, "Row({})", formatted.join(", "))
    }
}

/// Serializes a validated row into the bytes stored as a leaf value.
pub fn encode_row(row: &Row) -> Result<Vec<u8>, Error> {
    encoding::to_bytes(row).map_err(|e| Error::Fatal(format!("Failed to encode row. {}", e)))
}

/// Reconstructs a row from stored bytes. A decode failure here means the
/// stored value is corrupt, not that the caller passed bad input.
pub fn decode_row(bytes: &[u8]) -> Result<Row, Error> {
    encoding::from_bytes(bytes).map_err(|e| Error::Fatal(format!("Failed to decode row. {}", e)))
}
