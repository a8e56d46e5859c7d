//! Sparse weighted vector
//!
//! The fingerprint of a term or document: `(dimension, weight)` pairs with
//! strictly increasing dimensions. Immutable once built.
//!
//! Payload encoding (little-endian, 3 bytes per entry):
//!
//! ```text
//! [dimension: u16][weight: u8] × n
//! ```

use crate::distance::cosine_similarity;
use crate::error::{IndexError, Result};

/// Vector dimension (a character code for term vectors).
pub type Dimension = u16;

/// Encoded size of one `(dimension, weight)` entry.
pub const ENTRY_SIZE: usize = 3;

/// Immutable sparse vector sorted by dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Vector {
    entries: Vec<(Dimension, u8)>,
}

impl Vector {
    /// Build from entries that are already sorted by strictly increasing
    /// dimension.
    pub fn new(entries: Vec<(Dimension, u8)>) -> Result<Self> {
        if let Some(pair) = entries.windows(2).find(|w| w[0].0 >= w[1].0) {
            return Err(IndexError::InvalidArgument(format!(
                "vector dimensions must be strictly increasing, found {} before {}",
                pair[0].0, pair[1].0
            )));
        }
        Ok(Self { entries })
    }

    /// Build from arbitrary entries: sorts by dimension and sums the weights
    /// of repeated dimensions (saturating).
    pub fn from_unsorted(mut entries: Vec<(Dimension, u8)>) -> Self {
        entries.sort_unstable_by_key(|(dim, _)| *dim);

        let mut merged: Vec<(Dimension, u8)> = Vec::with_capacity(entries.len());
        for (dim, weight) in entries {
            match merged.last_mut() {
                Some(last) if last.0 == dim => last.1 = last.1.saturating_add(weight),
                _ => merged.push((dim, weight)),
            }
        }
        Self { entries: merged }
    }

    /// Character-frequency vector of a token. Characters outside the basic
    /// multilingual plane have no dimension and are skipped.
    pub fn from_term(term: &str) -> Self {
        let entries = term
            .chars()
            .filter_map(|c| Dimension::try_from(u32::from(c)).ok())
            .map(|dim| (dim, 1u8))
            .collect();
        Self::from_unsorted(entries)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    pub fn entries(&self) -> &[(Dimension, u8)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Weight of `dim`, 0 when absent.
    pub fn weight(&self, dim: Dimension) -> u8 {
        self.entries
            .binary_search_by_key(&dim, |(d, _)| *d)
            .map(|i| self.entries[i].1)
            .unwrap_or(0)
    }

    /// Cosine of the angle between `self` and `other`, in [0, 1].
    #[inline]
    pub fn cosine(&self, other: &Vector) -> f32 {
        cosine_similarity(&self.entries, &other.entries)
    }

    /// Number of payload bytes `encode_into` appends.
    pub fn encoded_len(&self) -> usize {
        self.entries.len() * ENTRY_SIZE
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.reserve(self.encoded_len());
        for (dim, weight) in &self.entries {
            out.extend_from_slice(&dim.to_le_bytes());
            out.push(*weight);
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    /// Decode a payload record. The byte length must be a whole number of
    /// entries and the dimensions strictly increasing.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % ENTRY_SIZE != 0 {
            return Err(IndexError::corruption(format!(
                "vector payload of {} bytes is not a multiple of {}",
                bytes.len(),
                ENTRY_SIZE
            )));
        }

        let entries: Vec<(Dimension, u8)> = bytes
            .chunks_exact(ENTRY_SIZE)
            .map(|chunk| (u16::from_le_bytes([chunk[0], chunk[1]]), chunk[2]))
            .collect();

        if entries.windows(2).any(|w| w[0].0 >= w[1].0) {
            return Err(IndexError::corruption("vector payload dimensions out of order"));
        }
        Ok(Self { entries })
    }
}

impl From<&str> for Vector {
    fn from(term: &str) -> Self {
        Self::from_term(term)
    }
}
