//! Similarity metrics for sparse vectors
//!
//! Merge-join kernels over `(dimension, weight)` slices, used by
//! [`Vector::cosine`](crate::types::Vector::cosine).

pub mod cosine;

pub use cosine::cosine_similarity;
