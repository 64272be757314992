use crate::errors::Error;
use crate::storage::btree::BTree;
use crate::storage::pager::Pager;
use crate::storage::row::{self, Row};
use crate::storage::schema::{ColumnSchema, TableSchema};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Branching factor used when the configuration does not name a usable one.
pub const DEFAULT_BRANCHING_FACTOR: usize = 4;

/// Open-time configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the single backing file.
    pub path: PathBuf,
    /// Branching factor for newly opened trees. Values below 2 fall back to
    /// [`DEFAULT_BRANCHING_FACTOR`].
    pub default_branching_factor: usize,
    /// Installs a verbose tracing subscriber when set.
    pub debug: bool,
}

impl Config {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Config {
            path: path.into(),
            default_branching_factor: DEFAULT_BRANCHING_FACTOR,
            debug: false,
        }
    }
}

/// The table-level surface over the storage engine.
///
/// Owns the schema cache and the page manager; every call resolves the named
/// table's schema and tree, then runs the typed pipeline against the tree.
/// Callers run operations sequentially or add their own locking; only file
/// I/O and metadata are internally serialized.
pub struct Database {
    pager: Pager,
    schemas: HashMap<String, TableSchema>,
    branching: usize,
}

impl Database {
    pub fn open(config: Config) -> Result<Self, Error> {
        if config.debug {
            // Keep whatever subscriber the host application installed.
            let _ = tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
                )
                .try_init();
        }

        let branching = if config.default_branching_factor < 2 {
            warn!(
                requested = config.default_branching_factor,
                fallback = DEFAULT_BRANCHING_FACTOR,
                "Branching factor too small, using fallback"
            );
            DEFAULT_BRANCHING_FACTOR
        } else {
            config.default_branching_factor
        };

        let pager = Pager::open(&config.path)?;
        let schemas = pager.get_all_table_schemas()?;
        info!(
            path = %config.path.display(),
            tables = schemas.len(),
            branching,
            "Opened database"
        );

        Ok(Database {
            pager,
            schemas,
            branching,
        })
    }

    /// Flushes metadata and closes the backing file. Idempotent.
    pub fn close(&mut self) -> Result<(), Error> {
        self.pager.close()
    }

    fn schema(&self, table: &str) -> Result<&TableSchema, Error> {
        self.schemas
            .get(table)
            .ok_or_else(|| Error::TableNotFound(table.to_string()))
    }

    fn tree(&self, table: &str) -> Result<BTree<'_>, Error> {
        BTree::load(&self.pager, table, self.branching)
    }

    /// Creates a table: validates the schema, persists it together with a
    /// fresh empty root leaf, and caches it.
    pub fn create_table(&mut self, name: &str, columns: Vec<ColumnSchema>) -> Result<(), Error> {
        let schema = TableSchema::new(columns);
        schema.validate(name)?;

        if self.schemas.contains_key(name)
            || self.pager.get_table_schema(name)?.is_some()
            || self.pager.get_table_root(name)?.is_some()
        {
            return Err(Error::DuplicateTable(name.to_string()));
        }

        self.pager.set_table_schema(name, schema.clone())?;
        BTree::create(&self.pager, name, self.branching)?;
        self.schemas.insert(name.to_string(), schema);
        info!(table = name, "Created table");
        Ok(())
    }

    /// Drops a table, returning its pages to the allocator and removing its
    /// schema and root in one metadata write.
    pub fn drop_table(&mut self, name: &str) -> Result<(), Error> {
        if !self.schemas.contains_key(name) && self.pager.get_table_schema(name)?.is_none() {
            return Err(Error::TableNotFound(name.to_string()));
        }

        // Collect the table's pages before its root disappears, but hand
        // them back only once the metadata write has committed; a failure in
        // between leaks orphan pages instead of freeing live ones.
        let pages = match self.tree(name) {
            Ok(tree) => tree.pages().unwrap_or_else(|e| {
                warn!(table = name, error = %e, "Failed to walk dropped table");
                Vec::new()
            }),
            Err(e) => {
                warn!(table = name, error = %e, "Dropped table has no tree");
                Vec::new()
            }
        };

        self.pager.delete_table_metadata(name)?;
        self.schemas.remove(name);
        for page_id in pages {
            if let Err(e) = self.pager.deallocate_page(page_id) {
                warn!(table = name, page_id, error = %e, "Failed to deallocate page");
            }
        }
        info!(table = name, "Dropped table");
        Ok(())
    }

    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schemas.keys().cloned().collect();
        names.sort();
        names
    }

    /// Validates a full row against the table schema and upserts it under
    /// its primary key.
    pub fn insert_row(&mut self, table: &str, row: Row) -> Result<(), Error> {
        let schema = self.schema(table)?;
        row.validate_insert(schema)?;
        let key = row.primary_key(schema)?;
        let bytes = row::encode_row(&row)?;

        let mut tree = self.tree(table)?;
        tree.insert(key, bytes)?;
        debug!(table, key, "Inserted row");
        Ok(())
    }

    /// Fetches the row stored under `id`.
    pub fn search_row(&self, table: &str, id: i64) -> Result<Row, Error> {
        self.schema(table)?;
        let tree = self.tree(table)?;
        match tree.search(id)? {
            Some(bytes) => row::decode_row(&bytes),
            None => Err(Error::KeyNotFound(id)),
        }
    }

    /// Merges a partial row into the stored row under `id` and writes the
    /// result back. The primary key itself cannot be changed.
    pub fn update_row(&mut self, table: &str, id: i64, patch: Row) -> Result<(), Error> {
        let schema = self.schema(table)?;
        patch.validate_update(schema)?;

        let mut current = self.search_row(table, id)?;
        current.merge(patch);
        let bytes = row::encode_row(&current)?;

        let mut tree = self.tree(table)?;
        tree.insert(id, bytes)?;
        debug!(table, key = id, "Updated row");
        Ok(())
    }

    /// Removes the row stored under `id`.
    pub fn delete_row(&mut self, table: &str, id: i64) -> Result<(), Error> {
        self.schema(table)?;
        let mut tree = self.tree(table)?;
        tree.delete(id)?;
        debug!(table, key = id, "Deleted row");
        Ok(())
    }

    /// All rows in ascending primary-key order. An empty table yields an
    /// empty vector.
    pub fn scan_table(&self, table: &str) -> Result<Vec<Row>, Error> {
        self.schema(table)?;
        let tree = self.tree(table)?;
        let mut rows = Vec::new();
        for pair in tree.scan_all()? {
            let (_, bytes) = pair?;
            rows.push(row::decode_row(&bytes)?);
        }
        Ok(rows)
    }

    /// Rows whose primary keys fall inside the given bounds.
    pub fn scan_range(
        &self,
        table: &str,
        start: Option<i64>,
        end: Option<i64>,
        inclusive_start: bool,
        inclusive_end: bool,
    ) -> Result<Vec<Row>, Error> {
        self.schema(table)?;
        let tree = self.tree(table)?;
        let mut rows = Vec::new();
        for pair in tree.scan_range(start, end, inclusive_start, inclusive_end)? {
            let (_, bytes) = pair?;
            rows.push(row::decode_row(&bytes)?);
        }
        Ok(rows)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.pager.close() {
            warn!(error = %e, "Failed to close database cleanly");
        }
    }
}
