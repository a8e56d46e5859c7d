//! Cosine similarity over sparse `(dimension, weight)` vectors
//!
//! Both inputs are sorted by dimension, so the dot product is a single
//! merge-join pass. Weights are unsigned, which keeps the result in [0, 1].

/// Compute cosine similarity between two sparse vectors
///
/// # Arguments
/// * `a` - First vector, sorted by strictly increasing dimension
/// * `b` - Second vector, sorted by strictly increasing dimension
///
/// # Returns
/// Cosine similarity in range [0, 1], where 1 means identical direction.
/// Symmetric bit-for-bit: `cosine_similarity(a, b) == cosine_similarity(b, a)`.
#[inline]
pub fn cosine_similarity(a: &[(u16, u8)], b: &[(u16, u8)]) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let dot = sparse_dot(a, b);
    compute_cosine_similarity(dot, norm_squared(a), norm_squared(b))
}

/// Merge-join dot product. Integer accumulation keeps it exact and
/// independent of argument order.
#[inline]
fn sparse_dot(a: &[(u16, u8)], b: &[(u16, u8)]) -> u64 {
    let (mut i, mut j) = (0, 0);
    let mut dot = 0u64;

    while i < a.len() && j < b.len() {
        let (da, wa) = a[i];
        let (db, wb) = b[j];
        match da.cmp(&db) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                dot += u64::from(wa) * u64::from(wb);
                i += 1;
                j += 1;
            }
        }
    }
    dot
}

#[inline]
fn norm_squared(v: &[(u16, u8)]) -> u64 {
    v.iter().map(|(_, w)| u64::from(*w) * u64::from(*w)).sum()
}

/// 计算最终的余弦相似度
#[inline]
fn compute_cosine_similarity(dot: u64, norm_a: u64, norm_b: u64) -> f32 {
    if dot == 0 || norm_a == 0 || norm_b == 0 {
        return 0.0;
    }
    // f64 product is commutative, so the result is symmetric
    let similarity = dot as f64 / ((norm_a as f64).sqrt() * (norm_b as f64).sqrt());
    (similarity as f32).clamp(0.0, 1.0)
}
