//! The metadata payload stored in page 0.
//!
//! Layout: a little-endian `u32` holding the payload byte length, then the
//! encoded payload, then zero padding up to the page size. The payload
//! carries everything the engine must recover on open: the next page to hand
//! out, the root page of every table, and every table schema.

use super::encoding;
use super::schema::TableSchema;
use crate::errors::Error;
use bincode::{Decode, Encode};
use std::collections::HashMap;

/// Width of the length prefix in front of the payload.
pub const META_LEN_SIZE: usize = 4;

#[derive(Encode, Decode, Debug, Clone, PartialEq)]
pub struct Metadata {
    /// Next page identifier the allocator hands out. Page 0 is reserved, so
    /// a fresh file starts at 1.
    pub next_page_id: u32,
    /// Table name to root page.
    pub roots: HashMap<String, u32>,
    /// Table name to schema. Schemas rebuild their column lookup index
    /// while decoding.
    pub schemas: HashMap<String, TableSchema>,
}

impl Default for Metadata {
    fn default() -> Self {
        Metadata {
            next_page_id: 1,
            roots: HashMap::new(),
            schemas: HashMap::new(),
        }
    }
}

impl Metadata {
    /// Renders the full page-0 image: length prefix, payload, zero padding.
    ///
    /// A payload that cannot fit in the page means the store holds more
    /// tables and schemas than the format supports; nothing sensible can be
    /// written, so this is fatal.
    pub fn to_page(&self, page_size: usize) -> Result<Vec<u8>, Error> {
        let payload = encoding::to_bytes(self)
            .map_err(|e| Error::Fatal(format!("Failed to encode metadata. {}", e)))?;
        if payload.len() > page_size - META_LEN_SIZE {
            return Err(Error::Fatal(format!(
                "Metadata payload of {} bytes exceeds page capacity of {}",
                payload.len(),
                page_size - META_LEN_SIZE
            )));
        }

        let mut page = vec![0u8; page_size];
        page[..META_LEN_SIZE].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        page[META_LEN_SIZE..META_LEN_SIZE + payload.len()].copy_from_slice(&payload);
        Ok(page)
    }

    /// Recovers metadata from a page-0 image read off disk.
    pub fn from_page(page: &[u8], page_size: usize) -> Result<Self, Error> {
        if page.len() < META_LEN_SIZE {
            return Err(Error::MetadataCorrupt(format!(
                "Page 0 holds only {} bytes",
                page.len()
            )));
        }

        let len = u32::from_le_bytes(
            page[..META_LEN_SIZE]
                .try_into()
                .map_err(|_| Error::MetadataCorrupt("Unreadable length prefix".into()))?,
        ) as usize;

        if len == 0 {
            return Err(Error::MetadataCorrupt("Empty metadata payload".into()));
        }
        if len > page_size - META_LEN_SIZE || META_LEN_SIZE + len > page.len() {
            return Err(Error::MetadataCorrupt(format!(
                "Payload length {} exceeds page capacity",
                len
            )));
        }

        encoding::from_bytes(&page[META_LEN_SIZE..META_LEN_SIZE + len])
            .map_err(|e| Error::MetadataCorrupt(format!("Failed to decode payload. {}", e)))
    }
}
