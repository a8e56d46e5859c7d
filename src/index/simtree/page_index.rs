//! Page table (`.ixp`)
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ offset: i64 LE  (in .ix)     │  × page count, in write order
//! │ length: i32 LE  (bytes)      │
//! └──────────────────────────────┘
//! ```
//!
//! An entry is appended only after the page's records and payloads are
//! flushed, so a listed page is always complete.

use crate::config::Durability;
use crate::error::{IndexError, Result};
use crate::storage::{map_read_only, open_append};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub const PAGE_ENTRY_SIZE: usize = 12;

/// One serialized tree inside the index stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Page {
    pub offset: i64,
    pub length: i32,
}

impl Page {
    pub fn end(&self) -> i64 {
        self.offset + i64::from(self.length)
    }

    pub fn encode(&self) -> [u8; PAGE_ENTRY_SIZE] {
        let mut buf = [0u8; PAGE_ENTRY_SIZE];
        buf[0..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..12].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PAGE_ENTRY_SIZE {
            return Err(IndexError::corruption(format!(
                "page entry is {} bytes, expected {}",
                bytes.len(),
                PAGE_ENTRY_SIZE
            )));
        }
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&bytes[0..8]);
        let mut length = [0u8; 4];
        length.copy_from_slice(&bytes[8..12]);

        let page = Page {
            offset: i64::from_le_bytes(offset),
            length: i32::from_le_bytes(length),
        };
        if page.offset < 0 || page.length < 0 {
            return Err(IndexError::corruption(format!(
                "negative page entry: offset {}, length {}",
                page.offset, page.length
            )));
        }
        Ok(page)
    }
}

/// In-memory copy of the page table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageIndex {
    pages: Vec<Page>,
}

impl PageIndex {
    pub fn new(pages: Vec<Page>) -> Self {
        Self { pages }
    }

    /// Load the page table; a missing file means no pages yet.
    pub fn load(path: &Path) -> Result<Self> {
        match map_read_only(path)? {
            Some(map) => Self::from_bytes(&map),
            None => Ok(Self::default()),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % PAGE_ENTRY_SIZE != 0 {
            return Err(IndexError::corruption(format!(
                "page index of {} bytes ends in a partial entry",
                bytes.len()
            )));
        }
        let pages = bytes
            .chunks_exact(PAGE_ENTRY_SIZE)
            .map(Page::decode)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { pages })
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Page> {
        self.pages.iter()
    }
}

/// Appends entries to a `.ixp` file
pub struct PageIndexWriter {
    file: BufWriter<File>,
    durability: Durability,
}

impl PageIndexWriter {
    pub fn open(path: &Path, durability: Durability) -> Result<Self> {
        let (file, _) = open_append(path)?;
        Ok(Self { file, durability })
    }

    /// Append and flush one entry; this is the publish point of a page.
    pub fn append(&mut self, page: Page) -> Result<()> {
        self.file.write_all(&page.encode())?;
        self.file.flush()?;
        if self.durability.requires_sync() {
            self.file.get_ref().sync_all()?;
        }
        Ok(())
    }
}
