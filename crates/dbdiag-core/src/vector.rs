//! Vector math and the f32 blob codec.
//!
//! Embeddings are stored as little-endian f32 blobs; all similarity math in
//! the engine goes through `cosine_similarity`.

/// Serialize a vector as a little-endian f32 blob.
pub fn serialize_f32(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

/// Deserialize a little-endian f32 blob back into a vector. Trailing bytes
/// that do not form a full f32 are ignored.
pub fn deserialize_f32(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity of two vectors. Returns 0.0 for mismatched dimensions
/// or zero-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// Incremental-mean centroid update: the centroid of a cluster that grew
/// from `n - 1` to `n` members by adding `added`.
pub fn update_centroid(centroid: &mut [f32], added: &[f32], n: usize) {
    debug_assert_eq!(centroid.len(), added.len());
    debug_assert!(n >= 1);
    let n = n as f32;
    for (c, e) in centroid.iter_mut().zip(added.iter()) {
        *c = (*c * (n - 1.0) + *e) / n;
    }
}

/// Element-wise mean of a non-empty set of vectors.
pub fn mean(vectors: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let mut acc = vec![0.0f32; first.len()];
    for v in vectors {
        for (a, x) in acc.iter_mut().zip(v.iter()) {
            *a += x;
        }
    }
    let n = vectors.len() as f32;
    for a in &mut acc {
        *a /= n;
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_round_trip() {
        let v = vec![0.25f32, -1.5, 3.125, 0.0];
        assert_eq!(deserialize_f32(&serialize_f32(&v)), v);
    }

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_incremental_mean_matches_batch_mean() {
        let vs = vec![vec![1.0f32, 2.0], vec![3.0, 4.0], vec![5.0, 0.0]];
        let batch = mean(&vs);

        let mut centroid = vs[0].clone();
        update_centroid(&mut centroid, &vs[1], 2);
        update_centroid(&mut centroid, &vs[2], 3);

        for (a, b) in centroid.iter().zip(batch.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }
}
