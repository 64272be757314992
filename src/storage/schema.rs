use super::column::ColumnType;
use crate::errors::Error;
use bincode::de::Decoder;
use bincode::enc::Encoder;
use bincode::error::{DecodeError, EncodeError};
use bincode::{Decode, Encode};
use std::collections::HashMap;

/// Conventional name of the primary-key column.
pub const PRIMARY_KEY: &str = "id";

#[derive(Encode, Decode, Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub type_: ColumnType,
    pub is_primary: bool,
}

/// An ordered list of columns plus a name lookup index.
///
/// Only `columns` is persisted; the index is rebuilt whenever a schema is
/// constructed or decoded from disk.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub columns: Vec<ColumnSchema>,
    by_name: HashMap<String, usize>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnSchema>) -> Self {
        let by_name = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        TableSchema { columns, by_name }
    }

    /// Looks a column up by name through the rebuilt index.
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.by_name.get(name).map(|&i| &self.columns[i])
    }

    pub fn primary_key(&self) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.is_primary)
    }

    /// Checks the create-table rules: unique column names and exactly one
    /// primary key, which must be an INTEGER column named `id`.
    pub fn validate(&self, table: &str) -> Result<(), Error> {
        if table.is_empty() {
            return Err(Error::SchemaInvalid("Table name is empty".into()));
        }
        if self.columns.is_empty() {
            return Err(Error::SchemaInvalid(format!(
                "Table '{}' has no columns",
                table
            )));
        }

        let mut seen = HashMap::new();
        for column in &self.columns {
            if column.name.is_empty() {
                return Err(Error::SchemaInvalid(format!(
                    "Table '{}' has a column with an empty name",
                    table
                )));
            }
            if seen.insert(column.name.as_str(), ()).is_some() {
                return Err(Error::SchemaInvalid(format!(
                    "Duplicate column '{}' in table '{}'",
                    column.name, table
                )));
            }
        }

        let primaries: Vec<&ColumnSchema> =
            self.columns.iter().filter(|c| c.is_primary).collect();
        match primaries.as_slice() {
            [pk] => {
                if pk.name != PRIMARY_KEY {
                    return Err(Error::SchemaInvalid(format!(
                        "Primary key must be named '{}', got '{}'",
                        PRIMARY_KEY, pk.name
                    )));
                }
                if pk.type_ != ColumnType::Integer {
                    return Err(Error::SchemaInvalid(format!(
                        "Primary key '{}' must be INTEGER, got {}",
                        pk.name, pk.type_
                    )));
                }
                Ok(())
            }
            [] => Err(Error::SchemaInvalid(format!(
                "Table '{}' has no primary key",
                table
            ))),
            _ => Err(Error::SchemaInvalid(format!(
                "Table '{}' has more than one primary key",
                table
            ))),
        }
    }
}

impl PartialEq for TableSchema {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
    }
}

// Only the column list goes to disk; decode rebuilds the lookup index.
impl Encode for TableSchema {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        self.columns.encode(encoder)
    }
}

impl<Context> Decode<Context> for TableSchema {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let columns = Vec::<ColumnSchema>::decode(decoder)?;
        Ok(TableSchema::new(columns))
    }
}

bincode::impl_borrow_decode!(TableSchema);
