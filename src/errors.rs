use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error. {0}")]
    Io(#[from] std::io::Error),

    #[error("Page {0} not found")]
    PageNotFound(u32),

    #[error("Short read on page {page}: got {got} of {expected} bytes")]
    ShortRead {
        page: u32,
        got: usize,
        expected: usize,
    },

    #[error("Metadata corrupt. {0}")]
    MetadataCorrupt(String),

    #[error("Corrupt node on page {page}. {reason}")]
    CorruptNode { page: u32, reason: String },

    #[error("Node on page {page} does not fit in a page: {size} > {max} bytes")]
    NodeOversize { page: u32, size: usize, max: usize },

    #[error("Invalid schema. {0}")]
    SchemaInvalid(String),

    #[error("Table '{0}' already exists")]
    DuplicateTable(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Key {0} not found")]
    KeyNotFound(i64),

    #[error("Row is missing its primary key '{0}'")]
    MissingPrimaryKey(String),

    #[error("Primary key '{0}' cannot be updated")]
    PrimaryKeyUpdateForbidden(String),

    #[error("Type mismatch for column '{column}': expected {expected}")]
    TypeMismatch { column: String, expected: String },

    #[error("Unknown column '{0}'")]
    UnknownColumn(String),

    #[error("Fatal. {0}")]
    Fatal(String),
}
