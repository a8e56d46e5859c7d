//! End-to-end: write sessions, paged queries, optimize, search

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tempfile::TempDir;
use vectrie::{
    AddOutcome, Collection, IndexConfig, IndexError, MemoryPostingStore, ScanMode, TreeConfig,
    Vector,
};

fn v(entries: &[(u16, u8)]) -> Vector {
    Vector::new(entries.to_vec()).unwrap()
}

fn open(dir: &TempDir, tree: TreeConfig) -> Collection {
    Collection::open(IndexConfig::for_testing(dir.path()).with_tree(tree), 1).unwrap()
}

#[test]
fn test_merge_and_sibling_scenario_on_disk() {
    let dir = TempDir::new().unwrap();
    let collection = open(&dir, TreeConfig::new(0.98, 0.80, 0.0).unwrap());
    let store = MemoryPostingStore::new();
    let ref_a = store.append_ids([100]).unwrap();
    let ref_b = store.append_ids([200]).unwrap();
    let ref_c = store.append_ids([300]).unwrap();

    let a = v(&[(1, 5), (3, 2)]);
    let b = v(&[(1, 5), (3, 2)]);
    let c = v(&[(2, 4)]);

    let mut session = collection.index_session();
    assert_eq!(session.put(0, a.clone(), Some(ref_a)).unwrap(), AddOutcome::Inserted);
    assert_eq!(session.put(0, b, Some(ref_b)).unwrap(), AddOutcome::Merged);
    assert_eq!(session.put(0, c.clone(), Some(ref_c)).unwrap(), AddOutcome::Inserted);
    session.commit().unwrap();

    let result = collection.search(0, &a, &store).unwrap().unwrap();
    assert!(result.hit.score >= 0.98);
    assert_eq!(result.hit.weight, 2);
    assert_eq!(result.hit.posting_refs, vec![ref_a, ref_b]);
    assert_eq!(result.documents.iter().collect::<Vec<_>>(), vec![100, 200]);

    let result = collection.search(0, &c, &store).unwrap().unwrap();
    assert_eq!(result.documents.iter().collect::<Vec<_>>(), vec![300]);
}

#[test]
fn test_paged_and_optimized_queries() {
    let dir = TempDir::new().unwrap();
    let tree = TreeConfig::for_documents();
    let collection = open(&dir, tree);
    let mut rng = StdRng::seed_from_u64(2024);

    let mut random_vector = move || {
        let len = rng.gen_range(2..8);
        Vector::from_unsorted(
            (0..len)
                .map(|_| (rng.gen_range(0..40u16), rng.gen_range(1..10u8)))
                .collect(),
        )
    };

    // first vector of the first page: the first node every scan compares
    let anchor = v(&[(100, 3), (101, 3)]);
    let mut inserted = vec![anchor.clone()];
    for page in 0..5u64 {
        let mut session = collection.index_session();
        if page == 0 {
            session.put(3, anchor.clone(), Some(999)).unwrap();
        }
        for i in 0..50u64 {
            let vector = random_vector();
            session.put(3, vector.clone(), Some(page * 50 + i)).unwrap();
            inserted.push(vector);
        }
        session.commit().unwrap();
    }

    let seek = vectrie::PagedReader::open(collection.files(3), tree).unwrap();
    let walk = vectrie::PagedReader::open(collection.files(3), tree)
        .unwrap()
        .with_scan_mode(ScanMode::Walk);
    for vector in &inserted {
        let a = seek.closest_match(vector).unwrap().unwrap();
        let b = walk.closest_match(vector).unwrap().unwrap();
        assert_eq!((a.score, &a.posting_refs), (b.score, &b.posting_refs));
    }
    let hit = seek.closest_match(&anchor).unwrap().unwrap();
    assert!(hit.score >= tree.identical_threshold);
    assert!(hit.posting_refs.contains(&999));

    let nodes = collection.optimize(3).unwrap();
    assert!(nodes > 0 && nodes <= inserted.len());

    let shared = collection.reader(3).unwrap();
    let before = shared.stats();
    let hit = shared.closest_match(&anchor).unwrap().unwrap();
    assert!(hit.posting_refs.contains(&999));
    let after = shared.stats();
    assert_eq!(after.cache_hits, before.cache_hits + 1);
    assert_eq!(after.pages_scanned, before.pages_scanned);
}

#[test]
fn test_concurrent_queries_share_reader() {
    let dir = TempDir::new().unwrap();
    let collection = Arc::new(open(&dir, TreeConfig::for_terms()));

    // pairwise orthogonal: one sibling chain
    let mut session = collection.index_session();
    for i in 0..7u16 {
        session.put(1, v(&[(i, 1 + i as u8)]), Some(u64::from(i))).unwrap();
    }
    session.commit().unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let collection = Arc::clone(&collection);
            std::thread::spawn(move || {
                for i in 0..7u16 {
                    let hit = collection
                        .closest_match(1, &v(&[(i, 1)]))
                        .unwrap()
                        .unwrap();
                    assert_eq!(hit.posting_refs, vec![u64::from(i)]);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let stats = collection.reader(1).unwrap().stats();
    assert_eq!(stats.queries, 28);
}

#[test]
fn test_corrupted_index_is_reported() {
    let dir = TempDir::new().unwrap();
    let collection = open(&dir, TreeConfig::for_terms());
    let mut session = collection.index_session();
    session.put_term(1, "broken", Some(1)).unwrap();
    session.commit().unwrap();

    // chop the index stream in the middle of the only record
    let files = collection.files(1);
    let bytes = std::fs::read(&files.index).unwrap();
    std::fs::write(&files.index, &bytes[..10]).unwrap();

    let err = collection
        .closest_match(1, &Vector::from_term("broken"))
        .unwrap_err();
    assert!(matches!(err, IndexError::MissingPage { .. }));
}
