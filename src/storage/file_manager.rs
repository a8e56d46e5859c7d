//! Column file layout and stream factory
//!
//! Each (collection, field) pair owns three append-only files:
//!
//! ```text
//! {collection}.{key}.ix    node records, one contiguous run per page
//! {collection}.{key}.vec   vector bytes + node annex
//! {collection}.{key}.ixp   page table, (offset, length) per page
//! ```
//!
//! Writers only ever append. Readers map a read-only snapshot per query,
//! so a page that is appended later is simply not visible to it.

use crate::error::Result;
use memmap2::{Mmap, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Paths of the three files backing one indexed field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnFiles {
    pub index: PathBuf,
    pub payload: PathBuf,
    pub page_index: PathBuf,
}

impl ColumnFiles {
    pub fn new(dir: impl AsRef<Path>, collection_id: u64, key_id: u64) -> Self {
        let dir = dir.as_ref();
        let stem = format!("{}.{}", collection_id, key_id);
        Self {
            index: dir.join(format!("{}.ix", stem)),
            payload: dir.join(format!("{}.vec", stem)),
            page_index: dir.join(format!("{}.ixp", stem)),
        }
    }

    /// True once at least one page has been published.
    pub fn is_published(&self) -> bool {
        std::fs::metadata(&self.page_index)
            .map(|m| m.len() > 0)
            .unwrap_or(false)
    }
}

/// Append stream positioned at the current end of `path`.
///
/// Returns the writer and the byte offset the next write lands at.
pub fn open_append(path: &Path) -> Result<(BufWriter<File>, u64)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let len = file.metadata()?.len();
    Ok((BufWriter::new(file), len))
}

/// Read-only snapshot of `path`.
///
/// `None` when the file does not exist or is empty (nothing to map).
pub fn map_read_only(path: &Path) -> Result<Option<Mmap>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if file.metadata()?.len() == 0 {
        return Ok(None);
    }
    // SAFETY: files are append-only; mapped bytes are never rewritten.
    let mmap = unsafe { MmapOptions::new().map(&file)? };
    Ok(Some(mmap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_column_file_names() {
        let files = ColumnFiles::new("/data", 7, 42);
        assert_eq!(files.index, PathBuf::from("/data/7.42.ix"));
        assert_eq!(files.payload, PathBuf::from("/data/7.42.vec"));
        assert_eq!(files.page_index, PathBuf::from("/data/7.42.ixp"));
    }

    #[test]
    fn test_append_reports_end_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.ix");

        let (mut w, pos) = open_append(&path).unwrap();
        assert_eq!(pos, 0);
        w.write_all(b"hello").unwrap();
        drop(w);

        let (mut w, pos) = open_append(&path).unwrap();
        assert_eq!(pos, 5);
        w.write_all(b"!").unwrap();
        drop(w);

        let map = map_read_only(&path).unwrap().unwrap();
        assert_eq!(&map[..], b"hello!");
    }

    #[test]
    fn test_map_missing_or_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("none.vec");
        assert!(map_read_only(&path).unwrap().is_none());

        File::create(&path).unwrap();
        assert!(map_read_only(&path).unwrap().is_none());
    }

    #[test]
    fn test_is_published() {
        let dir = TempDir::new().unwrap();
        let files = ColumnFiles::new(dir.path(), 1, 1);
        assert!(!files.is_published());

        std::fs::write(&files.page_index, [0u8; 12]).unwrap();
        assert!(files.is_published());
    }
}
