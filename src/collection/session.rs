//! Write session
//!
//! Builds one in-memory tree per field; `commit` flushes each non-empty
//! tree as a single new page. Only one session per collection is live at
//! a time.

use super::Collection;
use crate::error::{IndexError, Result};
use crate::index::simtree::{AddOutcome, ColumnWriter, Page, VectorNode, NO_POSTING};
use crate::types::{PostingRef, Vector};
use ahash::AHashMap;
use parking_lot::MutexGuard;
use std::time::Instant;
use tracing::{debug, info};

pub struct IndexSession<'a> {
    collection: &'a Collection,
    _writer: MutexGuard<'a, ()>,
    trees: AHashMap<u64, VectorNode>,
    puts: u64,
}

impl<'a> IndexSession<'a> {
    pub(crate) fn new(collection: &'a Collection, writer: MutexGuard<'a, ()>) -> Self {
        Self {
            collection,
            _writer: writer,
            trees: AHashMap::new(),
            puts: 0,
        }
    }

    /// Insert `vector` into the tree of field `key_id`.
    pub fn put(
        &mut self,
        key_id: u64,
        vector: Vector,
        posting_ref: Option<PostingRef>,
    ) -> Result<AddOutcome> {
        if vector.is_empty() {
            return Err(IndexError::InvalidArgument(format!(
                "empty vector for field {}",
                key_id
            )));
        }
        if posting_ref == Some(NO_POSTING) {
            return Err(IndexError::InvalidArgument(format!(
                "posting ref {} is reserved",
                NO_POSTING
            )));
        }

        let config = self.collection.config().tree;
        let tree = self.trees.entry(key_id).or_insert_with(VectorNode::root);
        self.puts += 1;
        Ok(tree.add_vector(vector, posting_ref, &config))
    }

    /// Insert the character vector of `term`.
    pub fn put_term(
        &mut self,
        key_id: u64,
        term: &str,
        posting_ref: Option<PostingRef>,
    ) -> Result<AddOutcome> {
        self.put(key_id, Vector::from_term(term), posting_ref)
    }

    /// Fields touched so far.
    pub fn fields(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.puts == 0
    }

    /// Flush every field's tree as one page, in key order.
    pub fn commit(mut self) -> Result<Vec<(u64, Page)>> {
        let mut keys: Vec<u64> = self.trees.keys().copied().collect();
        keys.sort_unstable();

        let durability = self.collection.config().durability;
        let mut published = Vec::with_capacity(keys.len());

        for key_id in keys {
            let tree = match self.trees.remove(&key_id) {
                Some(tree) => tree,
                None => continue,
            };
            let start = Instant::now();
            let mut writer = ColumnWriter::open(&self.collection.files(key_id), durability)?;
            let page = match writer.write_page(&tree)? {
                Some(page) => page,
                None => continue,
            };

            let shape = tree.shape();
            info!(
                collection = self.collection.id(),
                key = key_id,
                nodes = shape.nodes,
                weight = shape.weight,
                depth = shape.depth,
                width = shape.width,
                avg_depth = shape.avg_depth,
                bytes = page.length,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "flushed page"
            );

            published.push((key_id, page));
            self.collection.pages_published(key_id)?;
        }

        self.puts = 0;
        Ok(published)
    }
}

impl Drop for IndexSession<'_> {
    fn drop(&mut self) {
        if !self.trees.is_empty() {
            debug!(
                collection = self.collection.id(),
                fields = self.trees.len(),
                puts = self.puts,
                "discarding uncommitted session"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndexConfig, TreeConfig};
    use crate::index::simtree::PageIndex;
    use tempfile::TempDir;

    fn collection(dir: &TempDir) -> Collection {
        let config = IndexConfig::for_testing(dir.path())
            .with_tree(TreeConfig::new(0.98, 0.80, 0.0).unwrap());
        Collection::open(config, 9).unwrap()
    }

    #[test]
    fn test_rejects_empty_vector_and_reserved_ref() {
        let dir = TempDir::new().unwrap();
        let collection = collection(&dir);
        let mut session = collection.index_session();

        assert!(matches!(
            session.put(1, Vector::empty(), Some(1)),
            Err(IndexError::InvalidArgument(_))
        ));
        assert!(matches!(
            session.put_term(1, "a", Some(NO_POSTING)),
            Err(IndexError::InvalidArgument(_))
        ));
        assert!(session.is_empty());
    }

    #[test]
    fn test_commit_one_page_per_field() {
        let dir = TempDir::new().unwrap();
        let collection = collection(&dir);
        let a = Vector::new(vec![(1, 5), (3, 2)]).unwrap();

        let mut session = collection.index_session();
        assert_eq!(session.put(1, a.clone(), Some(1)).unwrap(), AddOutcome::Inserted);
        assert_eq!(session.put(1, a.clone(), Some(2)).unwrap(), AddOutcome::Merged);
        session.put(2, Vector::new(vec![(2, 4)]).unwrap(), Some(3)).unwrap();
        assert_eq!(session.fields(), 2);

        let published = session.commit().unwrap();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].0, 1);
        assert_eq!(published[1].0, 2);

        let pages = PageIndex::load(&collection.files(1).page_index).unwrap();
        assert_eq!(pages.pages(), &[published[0].1]);
    }

    #[test]
    fn test_each_commit_appends_a_page() {
        let dir = TempDir::new().unwrap();
        let collection = collection(&dir);

        for posting in 0..3u64 {
            let mut session = collection.index_session();
            session.put_term(4, "page", Some(posting)).unwrap();
            session.commit().unwrap();
        }

        let pages = PageIndex::load(&collection.files(4).page_index).unwrap();
        assert_eq!(pages.len(), 3);
        let hit = collection
            .closest_match(4, &Vector::from_term("page"))
            .unwrap()
            .unwrap();
        assert_eq!(hit.posting_refs, vec![0, 1, 2]);
    }

    #[test]
    fn test_dropped_session_publishes_nothing() {
        let dir = TempDir::new().unwrap();
        let collection = collection(&dir);
        {
            let mut session = collection.index_session();
            session.put_term(5, "lost", Some(1)).unwrap();
        }
        assert!(!collection.files(5).is_published());

        // the writer slot was released
        let session = collection.index_session();
        assert!(session.commit().unwrap().is_empty());
    }
}
