//! Face index module
//!
//! The face collection searched during match checks. Faces are keyed by
//! `face_id` and carry an external id naming what they belong to:
//! `user_<userId>` for enrolled user faces, `photo_<photoId>` for faces
//! detected in photos. Both kinds live in the same collection, so search
//! results are filtered by prefix.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use anyhow::Result;

/// External id prefix for faces detected in photos
pub const PHOTO_PREFIX: &str = "photo_";
/// External id prefix for enrolled user faces
pub const USER_PREFIX: &str = "user_";

/// A face stored in the index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedFace {
    pub face_id: String,
    pub external_id: String,
    /// Face embedding vector (floats as little-endian bytes)
    pub embedding: Vec<u8>,
}

impl IndexedFace {
    pub fn from_vector(face_id: &str, external_id: &str, embedding: &[f32]) -> Self {
        Self {
            face_id: face_id.to_string(),
            external_id: external_id.to_string(),
            embedding: embedding.iter().flat_map(|f| f.to_le_bytes()).collect(),
        }
    }

    /// Get embedding as float vector
    pub fn get_embedding(&self) -> Vec<f32> {
        self.embedding
            .chunks_exact(4)
            .map(|chunk| {
                let arr: [u8; 4] = chunk.try_into().unwrap();
                f32::from_le_bytes(arr)
            })
            .collect()
    }
}

/// An index hit with similarity score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceMatch {
    pub face_id: String,
    pub external_id: String,
    /// Similarity percentage (0-100)
    pub similarity: f64,
}

/// Face index trait
/// Implementations must be thread-safe and async-compatible
#[async_trait]
pub trait FaceIndex: Send + Sync + 'static {
    /// Add a face to the index
    async fn index_face(&self, face: &IndexedFace) -> Result<()>;

    /// Search the collection by an already-indexed face.
    /// Returns faces with similarity >= threshold, sorted by similarity
    /// descending, excluding the probe face itself.
    async fn search_faces(
        &self,
        face_id: &str,
        threshold: f64,
        max_faces: usize,
    ) -> Result<Vec<FaceMatch>>;

    /// Remove a face from the index
    async fn delete_face(&self, face_id: &str) -> Result<bool>;
}

/// Compute cosine similarity between two embeddings
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

/// Similarity percentage between two embeddings.
/// Negative cosine values clamp to 0.
pub fn similarity_percent(a: &[f32], b: &[f32]) -> f64 {
    (cosine_similarity(a, b).max(0.0) as f64) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_mismatched_lengths() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_similarity_percent_clamps_negative() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert_eq!(similarity_percent(&a, &b), 0.0);
    }

    #[test]
    fn test_embedding_roundtrip() {
        let face = IndexedFace::from_vector("f1", "photo_p1", &[0.5, -1.25, 3.0]);
        assert_eq!(face.get_embedding(), vec![0.5, -1.25, 3.0]);
    }
}
