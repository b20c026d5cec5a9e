//! In-memory vector index with an on-disk form of two files: the vectors
//! (JSON array of arrays) and their labels (one per line).

use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use weft_core::error::{Result, WeftError};

/// Cosine of the angle between `a` and `b`. Vectors of different length,
/// empty vectors and zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, na, nb), (x, y)| (dot + x * y, na + x * x, nb + y * y));
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[derive(Debug, Clone)]
struct IndexEntry {
    label: String,
    vector: Vec<f32>,
}

#[derive(Debug, Default)]
pub struct EmbeddingIndex {
    entries: RwLock<Vec<IndexEntry>>,
}

impl EmbeddingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<IndexEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<IndexEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn insert(&self, label: impl Into<String>, vector: Vec<f32>) {
        // Labels are stored one per line on disk
        let label = label.into().replace('\n', " ");
        self.write().push(IndexEntry { label, vector });
    }

    /// The `n` most similar labels, best first.
    pub fn search(&self, query: &[f32], n: usize) -> Vec<(String, f32)> {
        let mut scored: Vec<(String, f32)> = self
            .read()
            .iter()
            .map(|e| (e.label.clone(), cosine_similarity(query, &e.vector)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(n);
        debug!(results = scored.len(), "Index search");
        scored
    }

    /// Replace the contents with the vectors and labels in the given files.
    pub fn load(&self, index_path: &Path, label_path: &Path) -> Result<usize> {
        let vectors: Vec<Vec<f32>> = serde_json::from_str(&std::fs::read_to_string(index_path)?)
            .map_err(|e| WeftError::MalformedFile(format!("{}: {}", index_path.display(), e)))?;
        let labels_text = std::fs::read_to_string(label_path)?;
        let labels: Vec<&str> = labels_text.lines().collect();
        if labels.len() != vectors.len() {
            return Err(WeftError::MalformedFile(format!(
                "{} has {} vectors but {} has {} labels",
                index_path.display(),
                vectors.len(),
                label_path.display(),
                labels.len()
            )));
        }

        let entries: Vec<IndexEntry> = labels
            .into_iter()
            .zip(vectors)
            .map(|(label, vector)| IndexEntry {
                label: label.to_string(),
                vector,
            })
            .collect();
        let count = entries.len();
        *self.write() = entries;
        info!(index = %index_path.display(), entries = count, "Embedding index loaded");
        Ok(count)
    }

    pub fn save(&self, index_path: &Path, label_path: &Path) -> Result<()> {
        let entries = self.read();
        let vectors: Vec<&Vec<f32>> = entries.iter().map(|e| &e.vector).collect();
        std::fs::write(index_path, serde_json::to_string(&vectors)?)?;
        let mut labels = String::new();
        for e in entries.iter() {
            labels.push_str(&e.label);
            labels.push('\n');
        }
        std::fs::write(label_path, labels)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_edge_cases() {
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let index = EmbeddingIndex::new();
        index.insert("x axis", vec![1.0, 0.0]);
        index.insert("y axis", vec![0.0, 1.0]);
        index.insert("diagonal", vec![1.0, 1.0]);

        let hits = index.search(&[0.9, 0.1], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "x axis");
        assert_eq!(hits[1].0, "diagonal");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let (vec_path, label_path) = (dir.path().join("index.json"), dir.path().join("labels.txt"));

        let index = EmbeddingIndex::new();
        index.insert("first\nline", vec![0.5, 0.5]);
        index.insert("second", vec![0.1, 0.9]);
        index.save(&vec_path, &label_path).unwrap();

        let loaded = EmbeddingIndex::new();
        assert_eq!(loaded.load(&vec_path, &label_path).unwrap(), 2);
        assert_eq!(loaded.search(&[0.1, 0.9], 1)[0].0, "second");
        assert_eq!(loaded.search(&[0.5, 0.5], 1)[0].0, "first line");
    }

    #[test]
    fn test_load_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let (vec_path, label_path) = (dir.path().join("index.json"), dir.path().join("labels.txt"));
        std::fs::write(&vec_path, "[[1.0], [2.0]]").unwrap();
        std::fs::write(&label_path, "only one\n").unwrap();
        let err = EmbeddingIndex::new().load(&vec_path, &label_path).unwrap_err();
        assert!(matches!(err, WeftError::MalformedFile(_)));
    }
}
