//! vectrie - paged similarity trie
//!
//! 基于余弦相似度的分页近似匹配索引
//!
//! ## 核心特性
//! - Sparse `(dimension, weight)` vectors compared by cosine similarity
//! - Left-child / right-sibling trie: left refines, sibling branches
//! - Append-only pages with a fixed 25-byte record per node
//! - Subtree skip: a scan jumps over a rejected branch without decoding it
//! - Parallel page fold into one compacted in-memory tree
//!
//! ## 架构
//! - 存储层: `.ix` records + `.vec` payloads + `.ixp` page table
//! - 索引层: `VectorNode` (memory) → `TreeSerializer` → `PagedReader` / `TreeOptimizer`
//! - 集合层: `Collection` + `IndexSession` + `PostingStore`

pub mod config;
pub mod storage;
pub mod index;
pub mod types;
pub mod distance;
pub mod postings;
pub mod collection;

mod error;

pub use config::{Durability, IndexConfig, TreeConfig};
pub use error::{IndexError, Result};

pub use collection::{Collection, IndexSession, SearchResult};
pub use index::simtree::{AddOutcome, CancelToken, Hit, PagedReader, ReaderStats, ScanMode, TreeOptimizer, VectorNode};
pub use index::term_trie::{TermMatch, TermTrie, TermTrieReader};
pub use postings::{MemoryPostingStore, PostingStore};
pub use types::{DocId, PostingRef, Vector};
