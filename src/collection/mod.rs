//! Collection - per-field similarity indexes on disk
//!
//! # Module Structure
//! - `session`: write sessions that build one tree per field and flush it as a page
//!
//! A collection owns a data directory. Field `key_id` of collection `id`
//! lives in `{id}.{key_id}.ix / .vec / .ixp`. Readers are shared through a
//! bounded LRU registry and refreshed when a session publishes pages.

pub mod session;

pub use session::IndexSession;

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::index::simtree::{CancelToken, Hit, PagedReader, TreeOptimizer};
use crate::postings::PostingStore;
use crate::storage::ColumnFiles;
use crate::types::Vector;
use lru::LruCache;
use parking_lot::Mutex;
use roaring::RoaringTreemap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::info;

/// Closest match resolved to document ids
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub hit: Hit,
    /// Union of the documents behind every tied posting ref
    pub documents: RoaringTreemap,
}

/// Handle to one collection's indexes
pub struct Collection {
    id: u64,
    config: IndexConfig,
    /// Reader registry, key_id → reader
    readers: Mutex<LruCache<u64, Arc<PagedReader>>>,
    /// Held by the live write session
    writer: Mutex<()>,
}

impl Collection {
    /// Open (creating the data directory if needed)
    pub fn open(config: IndexConfig, collection_id: u64) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;
        let capacity = NonZeroUsize::new(config.reader_cache_size)
            .ok_or_else(|| IndexError::Config("reader_cache_size must be at least 1".into()))?;

        info!(
            collection = collection_id,
            dir = %config.data_dir.display(),
            durability = config.durability.description(),
            "opened collection"
        );

        Ok(Self {
            id: collection_id,
            config,
            readers: Mutex::new(LruCache::new(capacity)),
            writer: Mutex::new(()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn files(&self, key_id: u64) -> ColumnFiles {
        ColumnFiles::new(&self.config.data_dir, self.id, key_id)
    }

    /// Start a write session; blocks while another session is live.
    pub fn index_session(&self) -> IndexSession<'_> {
        IndexSession::new(self, self.writer.lock())
    }

    /// Shared reader for `key_id`.
    pub fn reader(&self, key_id: u64) -> Result<Arc<PagedReader>> {
        let mut readers = self.readers.lock();
        if let Some(reader) = readers.get(&key_id) {
            return Ok(Arc::clone(reader));
        }
        let reader = Arc::new(PagedReader::open(self.files(key_id), self.config.tree)?);
        readers.put(key_id, Arc::clone(&reader));
        Ok(reader)
    }

    pub fn closest_match(&self, key_id: u64, query: &Vector) -> Result<Option<Hit>> {
        self.reader(key_id)?.closest_match(query)
    }

    pub fn closest_match_cancellable(
        &self,
        key_id: u64,
        query: &Vector,
        token: &CancelToken,
    ) -> Result<Option<Hit>> {
        self.reader(key_id)?.closest_match_cancellable(query, token)
    }

    /// Closest match plus the documents of all its tied posting refs.
    pub fn search(
        &self,
        key_id: u64,
        query: &Vector,
        postings: &dyn PostingStore,
    ) -> Result<Option<SearchResult>> {
        let hit = match self.closest_match(key_id, query)? {
            Some(hit) => hit,
            None => return Ok(None),
        };
        let documents = postings.union(&hit.posting_refs)?;
        Ok(Some(SearchResult { hit, documents }))
    }

    /// Fold every page of `key_id` and install the result as the reader's cache.
    ///
    /// Returns the number of nodes in the optimized tree.
    pub fn optimize(&self, key_id: u64) -> Result<usize> {
        let reader = self.reader(key_id)?;
        let tree = TreeOptimizer::new(self.files(key_id), self.config.tree)
            .with_threads(self.config.optimizer_threads)
            .optimize()?;
        let nodes = tree.subtree_size();
        reader.install_cache(tree);
        Ok(nodes)
    }

    /// Called after a page of `key_id` is published.
    pub(crate) fn pages_published(&self, key_id: u64) -> Result<()> {
        let reader = self.readers.lock().peek(&key_id).cloned();
        if let Some(reader) = reader {
            reader.refresh()?;
        }
        Ok(())
    }
}
