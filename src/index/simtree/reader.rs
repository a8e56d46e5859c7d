//! Paged closest-match reader
//!
//! ## Query path
//!
//! 1. Look in the cache tree; a hit at or above the identical threshold
//!    answers the query without touching disk.
//! 2. Otherwise scan every published page in order. Inside a page the
//!    walk descends left while the angle reaches the fold threshold and
//!    otherwise jumps over the left subtree to the sibling.
//! 3. Merge the best match into the cache tree. The cache's own match
//!    seeds the scan, so a page result only wins on a strictly higher
//!    angle and ties union their posting refs.
//!
//! Each query maps its own read-only snapshot of the `.ix` and `.vec`
//! files, so concurrent queries share nothing but the cache lock.

use super::encoding::{PageCursor, PayloadView, Terminator};
use super::node::VectorNode;
use super::page_index::{Page, PageIndex};
use super::{BestMatch, CancelToken, Hit, Verdict};
use crate::config::TreeConfig;
use crate::error::{IndexError, Result};
use crate::storage::{map_read_only, ColumnFiles};
use crate::types::Vector;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// How a page scan gets past a left subtree it does not descend into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    /// Jump `subtree_size` records
    #[default]
    Seek,
    /// Read the subtree's records one by one, following terminators
    Walk,
}

/// Counters since the reader was opened
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub queries: u64,
    pub cache_hits: u64,
    pub pages_scanned: u64,
    pub records_read: u64,
    pub subtrees_skipped: u64,
}

#[derive(Debug, Default)]
struct StatCounters {
    queries: AtomicU64,
    cache_hits: AtomicU64,
    pages_scanned: AtomicU64,
    records_read: AtomicU64,
    subtrees_skipped: AtomicU64,
}

impl StatCounters {
    fn snapshot(&self) -> ReaderStats {
        ReaderStats {
            queries: self.queries.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            pages_scanned: self.pages_scanned.load(Ordering::Relaxed),
            records_read: self.records_read.load(Ordering::Relaxed),
            subtrees_skipped: self.subtrees_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Closest-match reader over one column's pages
pub struct PagedReader {
    files: ColumnFiles,
    config: TreeConfig,
    mode: ScanMode,
    pages: RwLock<Arc<PageIndex>>,
    cache: RwLock<VectorNode>,
    stats: StatCounters,
}

impl PagedReader {
    /// Open a reader; loads the page table published so far.
    pub fn open(files: ColumnFiles, config: TreeConfig) -> Result<Self> {
        config.validate()?;
        let pages = PageIndex::load(&files.page_index)?;
        debug!(
            index = %files.index.display(),
            pages = pages.len(),
            "opened paged reader"
        );

        Ok(Self {
            files,
            config,
            mode: ScanMode::default(),
            pages: RwLock::new(Arc::new(pages)),
            cache: RwLock::new(VectorNode::root()),
            stats: StatCounters::default(),
        })
    }

    pub fn with_scan_mode(mut self, mode: ScanMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn files(&self) -> &ColumnFiles {
        &self.files
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Reload the page table to pick up newly published pages.
    ///
    /// When the table changed the cache tree is cleared: its entries were
    /// resolved against the old pages and would shadow the new ones.
    pub fn refresh(&self) -> Result<usize> {
        let pages = PageIndex::load(&self.files.page_index)?;
        let count = pages.len();

        // cache before pages, same order as the post-scan merge
        let mut cache = self.cache.write();
        let mut current = self.pages.write();
        if **current == pages {
            return Ok(count);
        }
        *current = Arc::new(pages);
        drop(current);
        let stale = std::mem::replace(&mut *cache, VectorNode::root());
        drop(cache);
        drop(stale);

        debug!(pages = count, "page table refreshed, cache cleared");
        Ok(count)
    }

    pub fn page_count(&self) -> usize {
        self.pages.read().len()
    }

    pub fn stats(&self) -> ReaderStats {
        self.stats.snapshot()
    }

    /// Number of nodes in the cache tree.
    pub fn cache_len(&self) -> usize {
        self.cache.read().subtree_size()
    }

    /// Replace the cache tree, e.g. with an optimized fold of all pages.
    pub fn install_cache(&self, tree: VectorNode) {
        let old = std::mem::replace(&mut *self.cache.write(), tree);
        drop(old);
    }

    pub fn closest_match(&self, query: &Vector) -> Result<Option<Hit>> {
        self.closest_match_cancellable(query, &CancelToken::new())
    }

    /// Closest match, checking `token` before each page.
    pub fn closest_match_cancellable(&self, query: &Vector, token: &CancelToken) -> Result<Option<Hit>> {
        self.stats.queries.fetch_add(1, Ordering::Relaxed);

        let cached = self
            .cache
            .read()
            .closest_match(query, self.config.fold_threshold);
        if let Some(hit) = &cached {
            if hit.score >= self.config.identical_threshold {
                self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(cached);
            }
        }

        let pages = self.pages.read().clone();
        if pages.is_empty() {
            return Ok(cached);
        }

        let index = map_read_only(&self.files.index)?;
        let payload = map_read_only(&self.files.payload)?;
        let index = index.as_deref().unwrap_or(&[]);
        let payload = PayloadView::new(payload.as_deref().unwrap_or(&[]));

        let mut best = BestMatch::seeded(cached.clone());
        for page in pages.iter() {
            if token.is_cancelled() {
                debug!(pages = pages.len(), "closest match cancelled");
                return Err(IndexError::Cancelled);
            }
            self.scan_page(index, payload, *page, query, &mut best)?;
        }

        let hit = best.into_hit();
        if let Some(found) = hit.as_ref().filter(|found| Some(*found) != cached.as_ref()) {
            let mut cache = self.cache.write();
            // skip the merge if a refresh swapped the pages mid-scan
            if Arc::ptr_eq(&*self.pages.read(), &pages) {
                cache.add(found.to_node(), &self.config);
            }
        }
        Ok(hit)
    }

    fn scan_page(
        &self,
        index: &[u8],
        payload: PayloadView<'_>,
        page: Page,
        query: &Vector,
        best: &mut BestMatch,
    ) -> Result<()> {
        let mut cursor = PageCursor::open(index, page)?;
        let mut next = cursor.next_record()?;
        let mut records = 0u64;

        while let Some(record) = next {
            records += 1;
            let vector = payload.vector(&record)?;
            let angle = vector.cosine(query);

            match best.judge(angle) {
                Verdict::Replace => {
                    let (weight, posting_refs) = payload.annex(&record)?;
                    best.replace(Hit {
                        score: angle,
                        vector,
                        weight,
                        posting_refs,
                    });
                }
                Verdict::Tie => {
                    let (_, posting_refs) = payload.annex(&record)?;
                    best.tie(posting_refs);
                }
                Verdict::Ignore => {}
            }

            next = if angle >= self.config.fold_threshold {
                if record.terminator.has_child() {
                    Some(cursor.expect_record()?)
                } else {
                    None
                }
            } else {
                match record.terminator {
                    Terminator::Both => {
                        self.skip_left_subtree(&mut cursor, record.subtree_size)?;
                        Some(cursor.expect_record()?)
                    }
                    Terminator::SiblingOnly => Some(cursor.expect_record()?),
                    Terminator::ChildOnly | Terminator::Leaf => None,
                }
            };
        }

        self.stats.pages_scanned.fetch_add(1, Ordering::Relaxed);
        self.stats.records_read.fetch_add(records, Ordering::Relaxed);
        debug!(offset = page.offset, records, "scanned page");
        Ok(())
    }

    fn skip_left_subtree(&self, cursor: &mut PageCursor<'_>, subtree_size: i32) -> Result<()> {
        self.stats.subtrees_skipped.fetch_add(1, Ordering::Relaxed);
        match self.mode {
            ScanMode::Seek => cursor.skip(subtree_size),
            ScanMode::Walk => {
                let walked = cursor.walk_subtree()?;
                self.stats
                    .records_read
                    .fetch_add(walked as u64, Ordering::Relaxed);
                Ok(())
            }
        }
    }
}
