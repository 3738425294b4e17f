//! Embedding vector type and distance math.
//!
//! All vectors handled by the index are unit length, so cosine similarity
//! reduces to a plain dot product and cosine distance is `1 - dot`.

use crate::error::EmbeddingError;

/// Self-similarity of a unit vector must be within this of 1.0.
pub const SELF_SIMILARITY_TOLERANCE: f32 = 1e-5;

/// Vector embedding - a normalized float array.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    /// The embedding vector (normalized to unit length)
    pub values: Vec<f32>,
}

impl Embedding {
    /// Create a new embedding from a raw vector, normalizing to unit length.
    ///
    /// Fails with [`EmbeddingError::DegenerateVector`] when the norm is zero
    /// or non-finite.
    pub fn new(values: Vec<f32>) -> Result<Self, EmbeddingError> {
        Ok(Self {
            values: normalize(values)?,
        })
    }

    /// Create embedding without normalization (for pre-normalized vectors)
    pub fn from_normalized(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Get the embedding dimension
    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Fail unless this embedding has exactly `expected` components.
    pub fn check_dimension(&self, expected: usize) -> Result<(), EmbeddingError> {
        if self.values.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: self.values.len(),
            });
        }
        Ok(())
    }

    /// Cosine similarity in [-1, 1] (1 = identical direction).
    pub fn cosine_similarity(&self, other: &Embedding) -> Result<f32, EmbeddingError> {
        cosine_similarity(&self.values, &other.values)
    }

    /// Cosine distance `1 - similarity`, in [0, 2].
    pub fn cosine_distance(&self, other: &Embedding) -> Result<f32, EmbeddingError> {
        cosine_distance(&self.values, &other.values)
    }
}

/// Rescale `values` to unit L2 norm.
///
/// The norm is accumulated in f64 so large 512-d vectors don't lose
/// precision before the division.
pub fn normalize(mut values: Vec<f32>) -> Result<Vec<f32>, EmbeddingError> {
    if values.is_empty() {
        return Err(EmbeddingError::DegenerateVector(
            "empty vector".to_string(),
        ));
    }
    let norm = values
        .iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt();
    if !norm.is_finite() {
        return Err(EmbeddingError::DegenerateVector(format!(
            "non-finite norm ({norm})"
        )));
    }
    if norm == 0.0 {
        return Err(EmbeddingError::DegenerateVector("zero norm".to_string()));
    }
    for x in values.iter_mut() {
        *x = (f64::from(*x) / norm) as f32;
    }
    Ok(values)
}

/// Plain dot product. Callers guarantee equal lengths.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity of two unit vectors, clamped to [-1, 1].
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, EmbeddingError> {
    if a.len() != b.len() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    Ok(dot(a, b).clamp(-1.0, 1.0))
}

/// Cosine distance of two unit vectors.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Result<f32, EmbeddingError> {
    Ok(1.0 - cosine_similarity(a, b)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn test_embedding_normalization() {
        let emb = Embedding::new(vec![3.0, 4.0]).unwrap();
        // 3-4-5 triangle: normalized should be [0.6, 0.8]
        assert!((emb.values[0] - 0.6).abs() < 0.001);
        assert!((emb.values[1] - 0.8).abs() < 0.001);
    }

    #[test]
    fn test_zero_vector_is_degenerate() {
        let err = normalize(vec![0.0; 512]).unwrap_err();
        assert!(matches!(err, EmbeddingError::DegenerateVector(_)));
        assert!(err.is_input_error());
    }

    #[test]
    fn test_non_finite_vector_is_degenerate() {
        assert!(normalize(vec![1.0, f32::NAN]).is_err());
        assert!(normalize(vec![f32::INFINITY, 0.0]).is_err());
        assert!(normalize(vec![]).is_err());
    }

    #[test]
    fn test_self_similarity_within_tolerance() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let raw: Vec<f32> = (0..512).map(|_| rng.random_range(-1.0..1.0)).collect();
            let emb = Embedding::new(raw).unwrap();
            let sim = emb.cosine_similarity(&emb).unwrap();
            assert!((sim - 1.0).abs() <= SELF_SIMILARITY_TOLERANCE, "sim = {sim}");
        }
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = Embedding::new(vec![1.0, 0.0]).unwrap();
        let b = Embedding::new(vec![0.0, 1.0]).unwrap();
        assert!(a.cosine_similarity(&b).unwrap().abs() < 0.001);
        assert!((a.cosine_distance(&b).unwrap() - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = Embedding::new(vec![1.0, 0.0]).unwrap();
        let b = Embedding::new(vec![-1.0, 0.0]).unwrap();
        assert!((a.cosine_similarity(&b).unwrap() + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));

        let emb = Embedding::from_normalized(vec![1.0, 0.0]);
        assert!(emb.check_dimension(2).is_ok());
        assert!(emb.check_dimension(512).is_err());
    }
}
