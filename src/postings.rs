//! Posting store boundary
//!
//! The index only carries opaque [`PostingRef`] handles. Resolving them
//! to document ids is the job of a [`PostingStore`].

use crate::error::{IndexError, Result};
use crate::types::{DocId, PostingRef};
use parking_lot::RwLock;
use roaring::RoaringTreemap;

/// Maps posting handles to document-id sets
pub trait PostingStore: Send + Sync {
    fn read(&self, posting_ref: PostingRef) -> Result<RoaringTreemap>;

    /// Store a new list and return its handle.
    fn append(&self, documents: &RoaringTreemap) -> Result<PostingRef>;

    /// Union of several lists (the tied refs of one hit).
    fn union(&self, refs: &[PostingRef]) -> Result<RoaringTreemap> {
        let mut out = RoaringTreemap::new();
        for r in refs {
            out |= &self.read(*r)?;
        }
        Ok(out)
    }
}

/// Posting lists kept in memory, handle = position
#[derive(Debug, Default)]
pub struct MemoryPostingStore {
    lists: RwLock<Vec<RoaringTreemap>>,
}

impl MemoryPostingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a list built from `documents`.
    pub fn append_ids(&self, documents: impl IntoIterator<Item = DocId>) -> Result<PostingRef> {
        let list: RoaringTreemap = documents.into_iter().collect();
        self.append(&list)
    }

    pub fn len(&self) -> usize {
        self.lists.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.read().is_empty()
    }
}

impl PostingStore for MemoryPostingStore {
    fn read(&self, posting_ref: PostingRef) -> Result<RoaringTreemap> {
        let lists = self.lists.read();
        usize::try_from(posting_ref)
            .ok()
            .and_then(|i| lists.get(i))
            .cloned()
            .ok_or_else(|| IndexError::InvalidArgument(format!("unknown posting ref {}", posting_ref)))
    }

    fn append(&self, documents: &RoaringTreemap) -> Result<PostingRef> {
        let mut lists = self.lists.write();
        lists.push(documents.clone());
        Ok((lists.len() - 1) as PostingRef)
    }
}
