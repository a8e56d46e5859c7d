//! Index layer implementation
//!
//! - `simtree`: paged similarity trie over sparse vectors (closest match)
//! - `term_trie`: character prefix trie (exact / prefix lookup)

pub mod simtree;
pub mod term_trie;

pub use simtree::{
    CancelToken, Hit, PagedReader, ReaderStats, ScanMode, TreeOptimizer, VectorNode,
};
pub use term_trie::{TermMatch, TermTrie, TermTrieReader};
