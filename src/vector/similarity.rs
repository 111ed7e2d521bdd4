//! Vector Similarity Functions
//!
//! Cosine similarity and distance over `f32` slices.

/// Compute dot product of two vectors
///
/// Uses unrolled loop for better CPU performance.
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let len = a.len().min(b.len());
    let chunks = len / 4;
    let mut sum = [0.0f32; 4];

    for i in 0..chunks {
        let idx = i * 4;
        sum[0] += a[idx] * b[idx];
        sum[1] += a[idx + 1] * b[idx + 1];
        sum[2] += a[idx + 2] * b[idx + 2];
        sum[3] += a[idx + 3] * b[idx + 3];
    }

    let mut total = (sum[0] + sum[1]) + (sum[2] + sum[3]);
    for i in (chunks * 4)..len {
        total += a[i] * b[i];
    }
    total
}

/// Euclidean norm
#[inline]
pub fn magnitude(v: &[f32]) -> f32 {
    dot_product(v, v).sqrt()
}

/// Cosine similarity in `[-1, 1]`; zero vectors have similarity 0
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let denom = magnitude(a) * magnitude(b);
    if denom > 0.0 {
        (dot_product(a, b) / denom).clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// `1 - cosine_similarity`, in `[0, 2]`
#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Distance between two unit vectors
#[inline]
pub(crate) fn unit_distance(a: &[f32], b: &[f32]) -> f32 {
    (1.0 - dot_product(a, b)).max(0.0)
}

/// Normalize a vector in place. Zero vectors are left untouched.
pub fn normalize_vector(v: &mut [f32]) {
    let mag = magnitude(v);
    if mag > 0.0 {
        for x in v.iter_mut() {
            *x /= mag;
        }
    }
}

/// Normalize and return a new vector
pub fn normalized(v: &[f32]) -> Vec<f32> {
    let mut result = v.to_vec();
    normalize_vector(&mut result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_product() {
        let a = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let b = vec![5.0, 4.0, 3.0, 2.0, 1.0];
        assert!((dot_product(&a, &b) - 35.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!(cosine_distance(&a, &a).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
        assert!((cosine_distance(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![-2.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
        assert!((cosine_distance(&a, &b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_vector() {
        let zero = vec![0.0, 0.0];
        assert_eq!(cosine_similarity(&zero, &[1.0, 0.0]), 0.0);
        assert_eq!(normalized(&zero), zero);
    }

    #[test]
    fn test_normalize() {
        let n = normalized(&[3.0, 4.0, 0.0]);
        assert!((n[0] - 0.6).abs() < 1e-6);
        assert!((n[1] - 0.8).abs() < 1e-6);
        assert!((magnitude(&n) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_unit_distance_matches_cosine() {
        let a = normalized(&[1.0, 0.0]);
        let b = normalized(&[0.9, 0.1]);
        let expected = cosine_distance(&[1.0, 0.0], &[0.9, 0.1]);
        assert!((unit_distance(&a, &b) - expected).abs() < 1e-6);
        assert!(expected > 0.0 && expected < 0.01);
    }
}
