//! Parallel page fold
//!
//! Every page is decoded independently on the rayon pool and sent over a
//! channel. A single consumer folds the decoded trees into one
//! accumulator with the regular insertion rule, in page order, so the
//! result does not depend on which decode finishes first.

use super::encoding::decode_page;
use super::node::VectorNode;
use super::page_index::{Page, PageIndex};
use super::CancelToken;
use crate::config::TreeConfig;
use crate::error::{IndexError, Result};
use crate::storage::{map_read_only, ColumnFiles};
use crossbeam::channel::{self, Receiver};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, warn};

/// Folds all published pages of a column into one in-memory tree
pub struct TreeOptimizer {
    files: ColumnFiles,
    config: TreeConfig,
    threads: Option<usize>,
}

impl TreeOptimizer {
    pub fn new(files: ColumnFiles, config: TreeConfig) -> Self {
        Self {
            files,
            config,
            threads: None,
        }
    }

    /// Decode on a dedicated pool of `threads` instead of the global one.
    pub fn with_threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads;
        self
    }

    pub fn optimize(&self) -> Result<VectorNode> {
        self.optimize_cancellable(&CancelToken::new())
    }

    /// Fold every page; pages not yet decoded are abandoned once `token` fires.
    pub fn optimize_cancellable(&self, token: &CancelToken) -> Result<VectorNode> {
        let start = Instant::now();
        let pages = PageIndex::load(&self.files.page_index)?;
        if pages.is_empty() {
            return Ok(VectorNode::root());
        }
        let page_count = pages.len();
        let config = self.config;

        let tree = std::thread::scope(|scope| {
            let (tx, rx) = channel::unbounded::<(usize, Result<VectorNode>)>();
            let folder = scope.spawn(move || fold_in_order(rx, &config));

            let pages = pages.pages();
            let decode = move || {
                pages
                    .par_iter()
                    .enumerate()
                    .for_each_with(tx, |tx, (page_no, page)| {
                        let decoded = if token.is_cancelled() {
                            Err(IndexError::Cancelled)
                        } else {
                            self.decode(*page)
                        };
                        // receiver only goes away if the folder panicked
                        let _ = tx.send((page_no, decoded));
                    });
            };

            let spawned = match self.threads {
                Some(threads) => rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map(|pool| pool.install(decode))
                    .map_err(|e| IndexError::Config(format!("optimizer pool: {}", e))),
                None => {
                    decode();
                    Ok(())
                }
            };

            let folded = match folder.join() {
                Ok(folded) => folded,
                Err(panic) => std::panic::resume_unwind(panic),
            };
            spawned.and(folded)
        })?;

        let shape = tree.shape();
        info!(
            pages = page_count,
            nodes = shape.nodes,
            weight = shape.weight,
            depth = shape.depth,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "optimized column {}",
            self.files.index.display()
        );
        Ok(tree)
    }

    fn decode(&self, page: Page) -> Result<VectorNode> {
        let index = map_read_only(&self.files.index)?;
        let payload = map_read_only(&self.files.payload)?;
        decode_page(
            index.as_deref().unwrap_or(&[]),
            payload.as_deref().unwrap_or(&[]),
            page,
        )
    }
}

/// Fold every node of `tree` into `acc`.
pub(crate) fn fold_tree(acc: &mut VectorNode, tree: VectorNode, config: &TreeConfig) {
    for node in tree.into_nodes() {
        acc.add(node, config);
    }
}

/// Single consumer: fold decoded pages strictly in page order.
fn fold_in_order(rx: Receiver<(usize, Result<VectorNode>)>, config: &TreeConfig) -> Result<VectorNode> {
    let mut acc = VectorNode::root();
    let mut pending: BTreeMap<usize, VectorNode> = BTreeMap::new();
    let mut next = 0usize;
    let mut first_error: Option<IndexError> = None;

    for (page_no, decoded) in rx.iter() {
        match decoded {
            Ok(tree) => {
                if first_error.is_some() {
                    continue;
                }
                pending.insert(page_no, tree);
                while let Some(tree) = pending.remove(&next) {
                    fold_tree(&mut acc, tree, config);
                    next += 1;
                }
            }
            Err(e) => {
                if !matches!(e, IndexError::Cancelled) {
                    warn!(page = page_no, error = %e, "page decode failed");
                }
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(acc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Durability;
    use crate::index::simtree::page_index::PageIndexWriter;
    use crate::index::simtree::reader::PagedReader;
    use crate::index::simtree::writer::ColumnWriter;
    use crate::types::Vector;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::TempDir;

    fn config() -> TreeConfig {
        TreeConfig::new(0.98, 0.80, 0.3).unwrap()
    }

    fn random_vector(rng: &mut StdRng) -> Vector {
        let len = rng.gen_range(1..5);
        Vector::from_unsorted(
            (0..len)
                .map(|_| (rng.gen_range(0..10u16), rng.gen_range(1..6u8)))
                .collect(),
        )
    }

    fn publish_random(files: &ColumnFiles, pages: usize, per_page: usize, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut writer = ColumnWriter::open(files, Durability::NoSync).unwrap();
        for p in 0..pages {
            let mut tree = VectorNode::root();
            for i in 0..per_page {
                tree.add_vector(random_vector(&mut rng), Some((p * per_page + i) as u64), &config());
            }
            writer.write_page(&tree).unwrap();
        }
    }

    #[test]
    fn test_no_pages_empty_tree() {
        let dir = TempDir::new().unwrap();
        let optimizer = TreeOptimizer::new(ColumnFiles::new(dir.path(), 1, 1), config());
        assert!(optimizer.optimize().unwrap().is_empty());
    }

    #[test]
    fn test_fold_merges_identical_across_pages() {
        let dir = TempDir::new().unwrap();
        let files = ColumnFiles::new(dir.path(), 1, 1);
        let config = config();
        let a = Vector::new(vec![(1, 5), (3, 2)]).unwrap();

        let mut writer = ColumnWriter::open(&files, Durability::NoSync).unwrap();
        for posting in [1u64, 2, 3] {
            let mut tree = VectorNode::root();
            tree.add_vector(a.clone(), Some(posting), &config);
            writer.write_page(&tree).unwrap();
        }

        let tree = TreeOptimizer::new(files, config).optimize().unwrap();
        let node = tree.left().unwrap();
        assert_eq!(tree.subtree_size(), 1);
        assert_eq!(node.weight(), 3);
        assert_eq!(node.posting_refs(), &[1, 2, 3]);
    }

    #[test]
    fn test_optimize_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let files = ColumnFiles::new(dir.path(), 1, 1);
        publish_random(&files, 6, 40, 7);

        let first = TreeOptimizer::new(files.clone(), config()).optimize().unwrap();
        let second = TreeOptimizer::new(files, config())
            .with_threads(Some(2))
            .optimize()
            .unwrap();

        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..100 {
            let query = random_vector(&mut rng);
            let a = first.closest_match(&query, config().fold_threshold);
            let b = second.closest_match(&query, config().fold_threshold);
            assert_eq!(
                a.map(|h| (h.score, h.posting_refs)),
                b.map(|h| (h.score, h.posting_refs))
            );
        }
    }

    #[test]
    fn test_optimized_cache_answers_without_disk() {
        let dir = TempDir::new().unwrap();
        let files = ColumnFiles::new(dir.path(), 1, 1);
        publish_random(&files, 3, 30, 11);

        let tree = TreeOptimizer::new(files.clone(), config()).optimize().unwrap();
        let query = tree.left().unwrap().vector().clone();

        let reader = PagedReader::open(files, config()).unwrap();
        reader.install_cache(tree);
        let hit = reader.closest_match(&query).unwrap().unwrap();
        assert!(hit.score >= config().identical_threshold);
        assert_eq!(reader.stats().pages_scanned, 0);
    }

    #[test]
    fn test_deep_page_folds_on_pool_threads() {
        let dir = TempDir::new().unwrap();
        let files = ColumnFiles::new(dir.path(), 1, 1);
        let config = TreeConfig::for_documents();

        let mut below: Option<Box<VectorNode>> = None;
        for i in (1..=5_000u16).rev() {
            let mut node = VectorNode::new(Vector::new(vec![(0, 1), (i, 1)]).unwrap(), Some(u64::from(i)));
            node.left = below;
            below = Some(Box::new(node));
        }
        let mut tree = VectorNode::root();
        tree.left = below;
        let mut writer = ColumnWriter::open(&files, Durability::NoSync).unwrap();
        writer.write_page(&tree).unwrap();

        let folded = TreeOptimizer::new(files, config)
            .with_threads(Some(1))
            .optimize()
            .unwrap();
        assert_eq!(folded.shape().depth, 5_000);
        assert!(folded == tree);
    }

    #[test]
    fn test_cancelled_optimize() {
        let dir = TempDir::new().unwrap();
        let files = ColumnFiles::new(dir.path(), 1, 1);
        publish_random(&files, 4, 10, 3);

        let token = CancelToken::new();
        token.cancel();
        let err = TreeOptimizer::new(files, config())
            .optimize_cancellable(&token)
            .unwrap_err();
        assert!(matches!(err, IndexError::Cancelled));
    }

    #[test]
    fn test_bad_page_fails_the_fold() {
        let dir = TempDir::new().unwrap();
        let files = ColumnFiles::new(dir.path(), 1, 1);
        publish_random(&files, 2, 10, 5);

        let mut pages = PageIndexWriter::open(&files.page_index, Durability::NoSync).unwrap();
        pages.append(Page { offset: 1 << 40, length: 25 }).unwrap();

        let err = TreeOptimizer::new(files, config()).optimize().unwrap_err();
        assert!(matches!(err, IndexError::MissingPage { .. }));
    }
}
