//! Flat inner-product vector index
//!
//! Exhaustive scoring over row-major `f32` storage. Stored vectors are unit
//! length, so inner product equals cosine similarity. A row's position is
//! the snippet identifier.

use crate::encoder::dot;
use crate::error::{Result, RetrievalError};
use rayon::prelude::*;
use std::cmp::Ordering;

/// Below this many rows scoring stays on the calling thread
const PARALLEL_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    data: Vec<f32>,
    embedding_dim: usize,
}

impl VectorIndex {
    /// Create an empty index
    pub fn new(embedding_dim: usize) -> Self {
        Self {
            data: Vec::new(),
            embedding_dim,
        }
    }

    /// Build from row-major data; `data.len()` must be a multiple of the dimension
    pub fn from_flat(embedding_dim: usize, data: Vec<f32>) -> Result<Self> {
        if embedding_dim == 0 || data.len() % embedding_dim != 0 {
            return Err(RetrievalError::CacheCorruption(format!(
                "{} values cannot form rows of dimension {}",
                data.len(),
                embedding_dim
            )));
        }
        Ok(Self {
            data,
            embedding_dim,
        })
    }

    /// Append a vector; its row becomes the next identifier
    pub fn add(&mut self, embedding: &[f32]) -> Result<usize> {
        if embedding.len() != self.embedding_dim {
            return Err(RetrievalError::Encoding(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.embedding_dim,
                embedding.len()
            )));
        }
        self.data.extend_from_slice(embedding);
        Ok(self.len() - 1)
    }

    /// Top `k` rows by inner product with `query`, highest first.
    /// Equal scores are ordered by ascending identifier.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        if query.len() != self.embedding_dim {
            return Err(RetrievalError::Encoding(format!(
                "query dimension mismatch: expected {}, got {}",
                self.embedding_dim,
                query.len()
            )));
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = if self.len() >= PARALLEL_THRESHOLD {
            self.data
                .par_chunks_exact(self.embedding_dim)
                .enumerate()
                .map(|(id, row)| (id, dot(query, row)))
                .collect()
        } else {
            self.data
                .chunks_exact(self.embedding_dim)
                .enumerate()
                .map(|(id, row)| (id, dot(query, row)))
                .collect()
        };

        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, rank_order);
            scored.truncate(k);
        }
        scored.sort_unstable_by(rank_order);

        Ok(scored)
    }

    /// Stored vector for an identifier
    pub fn vector(&self, id: usize) -> Option<&[f32]> {
        let start = id.checked_mul(self.embedding_dim)?;
        self.data.get(start..start + self.embedding_dim)
    }

    /// Row-major view of every stored vector
    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    pub fn len(&self) -> usize {
        if self.embedding_dim == 0 {
            0
        } else {
            self.data.len() / self.embedding_dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Descending score, then ascending identifier
fn rank_order(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> VectorIndex {
        let mut index = VectorIndex::new(3);
        index.add(&[1.0, 0.0, 0.0]).unwrap();
        index.add(&[0.0, 1.0, 0.0]).unwrap();
        index.add(&[0.0, 0.0, 1.0]).unwrap();
        index.add(&[0.6, 0.8, 0.0]).unwrap();
        index
    }

    #[test]
    fn test_add_and_search() {
        let index = sample_index();
        assert_eq!(index.len(), 4);

        let results = index.search(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, 0);
        assert!((results[0].1 - 1.0).abs() < 1e-6);
        assert_eq!(results[1].0, 3);
    }

    #[test]
    fn test_ties_break_by_identifier() {
        let mut index = VectorIndex::new(2);
        for _ in 0..5 {
            index.add(&[0.0, 1.0]).unwrap();
        }
        let ids: Vec<usize> = index
            .search(&[0.0, 1.0], 3)
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_prefix_consistency() {
        let index = sample_index();
        let query = [0.5, 0.5, 0.1];
        let full = index.search(&query, 4).unwrap();
        for k in 1..=4 {
            assert_eq!(index.search(&query, k).unwrap(), full[..k].to_vec());
        }
    }

    #[test]
    fn test_k_larger_than_index() {
        let index = sample_index();
        assert_eq!(index.search(&[0.0, 0.0, 1.0], 50).unwrap().len(), 4);
        assert!(index.search(&[0.0, 0.0, 1.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut index = VectorIndex::new(3);
        assert!(index.add(&[1.0, 0.0]).is_err());
        assert!(index.search(&[1.0, 0.0], 1).is_err());
    }

    #[test]
    fn test_from_flat_rejects_ragged_data() {
        assert!(VectorIndex::from_flat(3, vec![0.0; 7]).is_err());
        let index = VectorIndex::from_flat(3, vec![0.0; 6]).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.vector(1), Some(&[0.0, 0.0, 0.0][..]));
        assert_eq!(index.vector(2), None);
    }
}
