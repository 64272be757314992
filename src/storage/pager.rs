//! The page manager.
//!
//! Owns the backing file and the metadata recovered from page 0. All file
//! I/O and all metadata mutation happen under one exclusive lock, held for
//! the duration of the call; the metadata flush used inside those calls is a
//! non-locking internal path so no method ever relocks.

use super::meta::Metadata;
use super::node::{self, Node, NodePage};
use super::schema::TableSchema;
use crate::errors::Error;
use std::collections::{BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Page size of 4 kilobytes, the same size as a page used in the virtual
/// memory systems of most computer architectures.
pub const PAGE_SIZE: usize = 4096;

pub struct Pager {
    inner: Mutex<PagerInner>,
}

struct PagerInner {
    /// Taken on `close`; operations on a closed pager fail.
    file: Option<File>,
    meta: Metadata,
    /// Pages freed by merges and table drops, available for reuse until the
    /// process exits. Not persisted.
    free_pages: BTreeSet<u32>,
}

impl PagerInner {
    fn file_mut(&mut self) -> Result<&mut File, Error> {
        self.file
            .as_mut()
            .ok_or_else(|| Error::Fatal("Page manager is closed".into()))
    }

    /// Writes the current metadata image to page 0. Callers already hold the
    /// pager lock.
    fn flush_metadata(&mut self) -> Result<(), Error> {
        let page = self.meta.to_page(PAGE_SIZE)?;
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&page)?;
        Ok(())
    }

    fn read_page_at(&mut self, page_id: u32, buf: &mut [u8]) -> Result<(), Error> {
        let offset = page_id as u64 * PAGE_SIZE as u64;
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(offset))?;

        let mut total = 0;
        while total < buf.len() {
            let n = file.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        if total == 0 {
            return Err(Error::PageNotFound(page_id));
        }
        if total < buf.len() {
            return Err(Error::ShortRead {
                page: page_id,
                got: total,
                expected: buf.len(),
            });
        }
        Ok(())
    }

    fn write_page_at(&mut self, page_id: u32, bytes: &[u8]) -> Result<(), Error> {
        let offset = page_id as u64 * PAGE_SIZE as u64;
        let file = self.file_mut()?;
        let end = offset + PAGE_SIZE as u64;
        if file.metadata()?.len() < end {
            file.set_len(end)?;
        }
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        Ok(())
    }
}

impl Pager {
    /// Opens or creates the backing file at `path`.
    ///
    /// An empty file is initialized with fresh metadata and a next-page
    /// counter of 1. A nonempty file must start with a readable page 0.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let len = file.metadata()?.len();
        let meta = if len == 0 {
            let meta = Metadata::default();
            let page = meta.to_page(PAGE_SIZE)?;
            file.write_all(&page)?;
            file.flush()?;
            meta
        } else {
            let mut buf = vec![0u8; PAGE_SIZE];
            file.seek(SeekFrom::Start(0))?;
            let mut total = 0;
            while total < PAGE_SIZE {
                let n = file.read(&mut buf[total..])?;
                if n == 0 {
                    break;
                }
                total += n;
            }
            if total < PAGE_SIZE {
                return Err(Error::MetadataCorrupt(format!(
                    "Page 0 truncated at {} bytes",
                    total
                )));
            }
            Metadata::from_page(&buf, PAGE_SIZE)?
        };

        info!(
            path = %path.display(),
            next_page_id = meta.next_page_id,
            tables = meta.schemas.len(),
            "Opened database file"
        );

        Ok(Pager {
            inner: Mutex::new(PagerInner {
                file: Some(file),
                meta,
                free_pages: BTreeSet::new(),
            }),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, PagerInner>, Error> {
        self.inner
            .lock()
            .map_err(|_| Error::Fatal("Page manager lock poisoned".into()))
    }

    /// Hands out a page identifier, preferring pages freed earlier in this
    /// process. Taking a fresh identifier advances the counter, extends the
    /// file, and persists the counter before returning.
    pub fn allocate_page(&self) -> Result<u32, Error> {
        let mut inner = self.lock()?;

        if let Some(&page_id) = inner.free_pages.iter().next() {
            inner.free_pages.remove(&page_id);
            debug!(page_id, "Reusing freed page");
            return Ok(page_id);
        }

        let page_id = inner.meta.next_page_id;
        inner.meta.next_page_id += 1;

        let end = (page_id as u64 + 1) * PAGE_SIZE as u64;
        let file = inner.file_mut()?;
        if file.metadata()?.len() < end {
            file.set_len(end)?;
        }
        inner.flush_metadata()?;
        debug!(page_id, "Allocated page");
        Ok(page_id)
    }

    /// Marks a page as free for reuse within this process lifetime.
    pub fn deallocate_page(&self, page_id: u32) -> Result<(), Error> {
        if page_id == 0 {
            return Err(Error::Fatal("Page 0 cannot be deallocated".into()));
        }
        let mut inner = self.lock()?;
        inner.free_pages.insert(page_id);
        debug!(page_id, "Deallocated page");
        Ok(())
    }

    /// Reads a full page into `buf`.
    pub fn read_page(&self, page_id: u32, buf: &mut [u8]) -> Result<(), Error> {
        if buf.len() != PAGE_SIZE {
            return Err(Error::Fatal(format!(
                "Page read into {} bytes, expected {}",
                buf.len(),
                PAGE_SIZE
            )));
        }
        self.lock()?.read_page_at(page_id, buf)
    }

    /// Writes a full page. Page 0 belongs to the metadata flush path and is
    /// rejected here.
    pub fn write_page(&self, page_id: u32, bytes: &[u8]) -> Result<(), Error> {
        if page_id == 0 {
            return Err(Error::Fatal("Page 0 is reserved for metadata".into()));
        }
        if bytes.len() != PAGE_SIZE {
            return Err(Error::Fatal(format!(
                "Page write of {} bytes, expected {}",
                bytes.len(),
                PAGE_SIZE
            )));
        }
        self.lock()?.write_page_at(page_id, bytes)
    }

    /// Reads and decodes a tree node.
    pub fn read_node(&self, page_id: u32) -> Result<Node, Error> {
        let mut buf = vec![0u8; PAGE_SIZE];
        self.read_page(page_id, &mut buf)?;
        node::decode_node(page_id, &buf)
    }

    /// Encodes and writes a tree node to its page.
    pub fn write_node(&self, node: &Node) -> Result<(), Error> {
        let page = node::encode_node(node, PAGE_SIZE)?;
        self.write_page(node.page_id(), &page)
    }

    /// Flushes metadata and releases the file handle. Idempotent.
    pub fn close(&self) -> Result<(), Error> {
        let mut inner = self.lock()?;
        if inner.file.is_none() {
            return Ok(());
        }
        inner.flush_metadata()?;
        if let Some(file) = inner.file.take() {
            file.sync_all()?;
        }
        info!("Closed database file");
        Ok(())
    }

    pub fn get_table_root(&self, name: &str) -> Result<Option<u32>, Error> {
        Ok(self.lock()?.meta.roots.get(name).copied())
    }

    pub fn set_table_root(&self, name: &str, page_id: u32) -> Result<(), Error> {
        let mut inner = self.lock()?;
        inner.meta.roots.insert(name.to_string(), page_id);
        inner.flush_metadata()
    }

    pub fn delete_table_root(&self, name: &str) -> Result<(), Error> {
        let mut inner = self.lock()?;
        if inner.meta.roots.remove(name).is_none() {
            return Err(Error::TableNotFound(name.to_string()));
        }
        inner.flush_metadata()
    }

    pub fn get_table_schema(&self, name: &str) -> Result<Option<TableSchema>, Error> {
        Ok(self.lock()?.meta.schemas.get(name).cloned())
    }

    pub fn set_table_schema(&self, name: &str, schema: TableSchema) -> Result<(), Error> {
        let mut inner = self.lock()?;
        inner.meta.schemas.insert(name.to_string(), schema);
        inner.flush_metadata()
    }

    pub fn get_all_table_schemas(&self) -> Result<HashMap<String, TableSchema>, Error> {
        Ok(self.lock()?.meta.schemas.clone())
    }

    /// Removes a table's root and schema in a single page-0 write.
    pub fn delete_table_metadata(&self, name: &str) -> Result<(), Error> {
        let mut inner = self.lock()?;
        let had_root = inner.meta.roots.remove(name).is_some();
        let had_schema = inner.meta.schemas.remove(name).is_some();
        if !had_root && !had_schema {
            return Err(Error::TableNotFound(name.to_string()));
        }
        inner.flush_metadata()
    }
}
