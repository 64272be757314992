//! Single-file embedded database built on a persistent B+Tree.
//!
//! The engine stores everything in one paged file: page 0 holds the
//! metadata (allocation counter, table roots, table schemas) and every other
//! page holds one tree node. Tables map 64-bit integer primary keys to
//! schema-validated rows.
//!
//! ```no_run
//! use pagedb::{ColumnSchema, ColumnType, Config, Database, Row};
//!
//! # fn main() -> Result<(), pagedb::Error> {
//! let mut db = Database::open(Config::new("app.db"))?;
//! db.create_table(
//!     "users",
//!     vec![
//!         ColumnSchema { name: "id".into(), type_: ColumnType::Integer, is_primary: true },
//!         ColumnSchema { name: "name".into(), type_: ColumnType::Text, is_primary: false },
//!     ],
//! )?;
//! db.insert_row("users", Row::new().set("id", 1).set("name", "Alice"))?;
//! let row = db.search_row("users", 1)?;
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod errors;
pub mod storage;

pub use database::{Config, Database, DEFAULT_BRANCHING_FACTOR};
pub use errors::Error;
pub use storage::column::{ColumnType, ColumnValue};
pub use storage::row::Row;
pub use storage::schema::{ColumnSchema, TableSchema};
