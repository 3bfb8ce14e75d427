//! SIMD-accelerated Euclidean distance for vector similarity search.
//!
//! The index is L2-only; the kernel here is the single hottest function in
//! the crate, called once per candidate expansion during layer search and
//! once per selected/candidate pair during neighbour selection.
//!
//! Uses the `wide` crate for portable SIMD (AVX2, AVX-512, NEON) with a
//! scalar tail for dimensions that are not a multiple of 8.

/// Compute Euclidean (L2) distance using SIMD.
///
/// `d(a, b) = sqrt(sum((a[i] - b[i])^2))`. Lower is closer.
///
/// Both slices must have the same length; this is guaranteed by the node
/// store, which fixes the dimension at the first insert.
pub fn euclidean_distance_simd(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let dim = a.len();
    let mut sum = wide::f32x8::ZERO;

    // Process 8 elements at a time
    let chunks = dim / 8;
    for i in 0..chunks {
        let offset = i * 8;
        let va = wide::f32x8::from(&a[offset..offset + 8]);
        let vb = wide::f32x8::from(&b[offset..offset + 8]);
        let diff = va - vb;
        sum = sum + (diff * diff);
    }

    // Horizontal sum of SIMD vector
    let mut result: f32 = sum.to_array().iter().sum();

    // Handle remaining elements
    let remainder = dim % 8;
    if remainder > 0 {
        let start = chunks * 8;
        for i in 0..remainder {
            let diff = a[start + i] - b[start + i];
            result += diff * diff;
        }
    }

    result.sqrt()
}

/// Scalar fallback implementation for comparison and testing.
pub mod scalar {
    /// Scalar Euclidean distance.
    pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
        let sum: f32 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum();
        sum.sqrt()
    }
}
