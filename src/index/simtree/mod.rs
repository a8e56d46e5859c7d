//! Similarity trie - paged on-disk approximate-match index
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  Write session (memory)             │  ← VectorNode tree, sequential inserts
//! │  - left  = more similar, refine     │
//! │  - sibling = less similar, branch   │
//! └─────────────────────────────────────┘
//!            ↓ TreeSerializer (one page per flush)
//! ┌─────────────────────────────────────┐
//! │  .ix   fixed 25-byte records, DFS   │  ← append-only
//! │  .vec  vector bytes + node annex    │  ← append-only
//! │  .ixp  (offset, length) per page    │  ← written last = published
//! └─────────────────────────────────────┘
//!            ↓ PagedReader / TreeOptimizer
//! ┌─────────────────────────────────────┐
//! │  closest match with subtree skip    │
//! │  cache tree of resolved matches     │
//! │  parallel fold of all pages         │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Components
//!
//! - `node`: in-memory tree, insertion and closest match
//! - `encoding`: record / annex layout, page cursor, page decoding
//! - `page_index`: the `.ixp` page table
//! - `writer`: depth-first page writer
//! - `reader`: paged closest-match traversal
//! - `optimizer`: parallel page fold

pub mod node;
pub mod encoding;
pub mod page_index;
pub mod writer;
pub mod reader;
pub mod optimizer;

pub use node::{AddOutcome, TreeShape, VectorNode};
pub use encoding::{decode_page, NodeRecord, PageCursor, Terminator, NO_POSTING, RECORD_SIZE};
pub use page_index::{Page, PageIndex, PageIndexWriter, PAGE_ENTRY_SIZE};
pub use writer::{ColumnWriter, TreeSerializer};
pub use reader::{PagedReader, ReaderStats, ScanMode};
pub use optimizer::TreeOptimizer;

use crate::types::{PostingRef, Vector};
use ahash::AHashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Result of a closest-match query
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    /// Cosine between the query and `vector`
    pub score: f32,
    pub vector: Vector,
    pub weight: u32,
    /// Every posting ref that tied at `score`, in discovery order
    pub posting_refs: Vec<PostingRef>,
}

impl Hit {
    /// Detached tree node carrying this hit, for merging into a tree.
    pub fn to_node(&self) -> VectorNode {
        VectorNode::with_postings(self.vector.clone(), self.weight, self.posting_refs.clone())
    }
}

/// Lists up to this length are searched linearly before a hash index is built.
const REF_INDEX_THRESHOLD: usize = 16;

/// Posting refs in first-seen order, without duplicates.
///
/// Small lists stay a plain `Vec`; a hash index is added once the list
/// grows, so merging a frequent vector stays linear overall.
#[derive(Debug, Clone, Default)]
pub(crate) struct RefSet {
    order: Vec<PostingRef>,
    index: Option<AHashSet<PostingRef>>,
}

impl RefSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn contains(&self, r: PostingRef) -> bool {
        match &self.index {
            Some(index) => index.contains(&r),
            None => self.order.contains(&r),
        }
    }

    /// Append `r` unless already present. Returns true when added.
    pub(crate) fn insert(&mut self, r: PostingRef) -> bool {
        if self.contains(r) {
            return false;
        }
        self.order.push(r);
        match &mut self.index {
            Some(index) => {
                index.insert(r);
            }
            None if self.order.len() > REF_INDEX_THRESHOLD => {
                self.index = Some(self.order.iter().copied().collect());
            }
            None => {}
        }
        true
    }

    pub(crate) fn as_slice(&self) -> &[PostingRef] {
        &self.order
    }

    #[cfg(test)]
    pub(crate) fn is_indexed(&self) -> bool {
        self.index.is_some()
    }

    pub(crate) fn into_vec(self) -> Vec<PostingRef> {
        self.order
    }
}

impl Extend<PostingRef> for RefSet {
    fn extend<T: IntoIterator<Item = PostingRef>>(&mut self, refs: T) {
        for r in refs {
            self.insert(r);
        }
    }
}

impl FromIterator<PostingRef> for RefSet {
    fn from_iter<T: IntoIterator<Item = PostingRef>>(refs: T) -> Self {
        let mut set = RefSet::new();
        set.extend(refs);
        set
    }
}

impl PartialEq for RefSet {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
    }
}

/// What a newly compared node does to the best-so-far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    Replace,
    Tie,
    Ignore,
}

/// Best-so-far accumulator shared by the in-memory and paged traversals.
///
/// Strictly greater angle replaces; an exact tie above zero unions the
/// posting refs into the current best.
#[derive(Debug, Default)]
pub(crate) struct BestMatch {
    /// Best hit; its refs live in `refs` until `into_hit`
    hit: Option<Hit>,
    refs: RefSet,
}

impl BestMatch {
    /// Start from an earlier result, e.g. the cache tree's match.
    pub(crate) fn seeded(hit: Option<Hit>) -> Self {
        let mut best = Self::default();
        if let Some(hit) = hit {
            best.replace(hit);
        }
        best
    }

    pub(crate) fn judge(&self, angle: f32) -> Verdict {
        match &self.hit {
            None => Verdict::Replace,
            Some(best) if angle > best.score => Verdict::Replace,
            Some(best) if angle > 0.0 && angle == best.score => Verdict::Tie,
            Some(_) => Verdict::Ignore,
        }
    }

    pub(crate) fn replace(&mut self, mut hit: Hit) {
        self.refs = std::mem::take(&mut hit.posting_refs).into_iter().collect();
        self.hit = Some(hit);
    }

    pub(crate) fn tie(&mut self, refs: impl IntoIterator<Item = PostingRef>) {
        if self.hit.is_some() {
            self.refs.extend(refs);
        }
    }

    pub(crate) fn into_hit(self) -> Option<Hit> {
        let refs = self.refs;
        self.hit.map(|mut hit| {
            hit.posting_refs = refs.into_vec();
            hit
        })
    }
}

/// Cooperative cancellation flag, checked between pages.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(score: f32, refs: Vec<PostingRef>) -> Hit {
        Hit {
            score,
            vector: Vector::empty(),
            weight: 1,
            posting_refs: refs,
        }
    }

    #[test]
    fn test_best_match_replace_and_tie() {
        let mut best = BestMatch::default();
        assert_eq!(best.judge(0.0), Verdict::Replace);
        best.replace(hit(0.5, vec![1]));

        assert_eq!(best.judge(0.4), Verdict::Ignore);
        assert_eq!(best.judge(0.5), Verdict::Tie);
        best.tie(vec![2, 1]);
        assert_eq!(best.judge(0.6), Verdict::Replace);

        assert_eq!(best.into_hit().unwrap().posting_refs, vec![1, 2]);
    }

    #[test]
    fn test_ref_set_keeps_order_and_indexes_large_lists() {
        let mut refs: RefSet = [3u64, 1, 3, 2].into_iter().collect();
        assert_eq!(refs.as_slice(), &[3, 1, 2]);
        assert!(!refs.is_indexed());

        refs.extend((0..100_000u64).rev());
        assert!(refs.is_indexed());
        assert_eq!(refs.as_slice().len(), 100_000);
        assert_eq!(&refs.as_slice()[..4], &[3, 1, 2, 99_999]);

        assert!(!refs.insert(50_000));
        assert!(refs.insert(100_000));
        assert!(refs.contains(100_000));
        assert_eq!(refs.into_vec().last(), Some(&100_000));
    }

    #[test]
    fn test_seeded_best_match_keeps_better_seed() {
        let mut best = BestMatch::seeded(Some(hit(0.9, vec![7])));
        assert_eq!(best.judge(0.4), Verdict::Ignore);
        assert_eq!(best.judge(0.9), Verdict::Tie);
        best.tie(vec![1]);
        assert_eq!(best.into_hit().unwrap().posting_refs, vec![7, 1]);

        assert!(BestMatch::seeded(None).into_hit().is_none());
    }

    #[test]
    fn test_zero_angle_never_ties() {
        let mut best = BestMatch::default();
        best.replace(hit(0.0, vec![1]));
        assert_eq!(best.judge(0.0), Verdict::Ignore);
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
