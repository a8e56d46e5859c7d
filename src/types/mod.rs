//! Core data types

mod vector;

pub use vector::{Dimension, Vector, ENTRY_SIZE};

/// Opaque handle to a document-id list held by a posting store.
/// The index never interprets it.
pub type PostingRef = u64;

/// Document identifier (unique within a collection)
pub type DocId = u64;
