//! Min-max score fusion for combining dense and sparse rankings
//!
//! Each side is normalized independently into [0, 1] over the union of
//! candidates (an absent candidate scores 0 before normalization), then
//! blended as `alpha * dense + (1 - alpha) * sparse`.

use super::{RetrievalMethod, RetrievalResult};
use std::collections::HashMap;

/// Normalize scores into [0, 1]; a zero range widens the denominator to 1
pub fn min_max_normalize(scores: &[f64]) -> Vec<f64> {
    let Some(min) = scores.iter().copied().reduce(f64::min) else {
        return Vec::new();
    };
    let max = scores.iter().copied().fold(min, f64::max);
    let range = if max - min > 0.0 { max - min } else { 1.0 };
    scores.iter().map(|s| (s - min) / range).collect()
}

/// Fuse two rankings into one hybrid ranking, deduplicated by source id
pub fn fuse(
    dense: Vec<RetrievalResult>,
    sparse: Vec<RetrievalResult>,
    alpha: f64,
    top_k: usize,
) -> Vec<RetrievalResult> {
    // Candidate order: dense first, then sparse-only; keeps ties stable
    let mut order: Vec<RetrievalResult> = Vec::new();
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut dense_raw: Vec<f64> = Vec::new();
    let mut sparse_raw: Vec<f64> = Vec::new();

    for result in dense {
        if position.contains_key(&result.source_id) {
            continue;
        }
        position.insert(result.source_id.clone(), order.len());
        dense_raw.push(result.score);
        sparse_raw.push(0.0);
        order.push(result);
    }

    for result in sparse {
        match position.get(&result.source_id) {
            Some(&idx) => {
                if sparse_raw[idx] == 0.0 {
                    sparse_raw[idx] = result.score;
                }
            }
            None => {
                position.insert(result.source_id.clone(), order.len());
                dense_raw.push(0.0);
                sparse_raw.push(result.score);
                order.push(result);
            }
        }
    }

    let dense_norm = min_max_normalize(&dense_raw);
    let sparse_norm = min_max_normalize(&sparse_raw);

    let mut fused: Vec<RetrievalResult> = order
        .into_iter()
        .enumerate()
        .map(|(i, mut result)| {
            result.score = alpha * dense_norm[i] + (1.0 - alpha) * sparse_norm[i];
            result.method = RetrievalMethod::Hybrid;
            result
        })
        .collect();

    // `sort_by` is stable
    fused.sort_by(|a, b| b.score.total_cmp(&a.score));
    fused.truncate(top_k);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn make(id: &str, score: f64, method: RetrievalMethod) -> RetrievalResult {
        RetrievalResult {
            content: format!("content {}", id),
            score,
            source_id: id.to_string(),
            method,
            metadata: Map::new(),
        }
    }

    #[test]
    fn test_min_max_zero_range() {
        assert_eq!(min_max_normalize(&[0.4, 0.4]), vec![0.0, 0.0]);
        assert_eq!(min_max_normalize(&[1.0, 3.0, 2.0]), vec![0.0, 1.0, 0.5]);
        assert!(min_max_normalize(&[]).is_empty());
    }

    #[test]
    fn test_fusion_blends_both_sides() {
        // Dense: A 0.9, B 0.5 ; Sparse: B 6.0, C 2.0
        let dense = vec![
            make("A", 0.9, RetrievalMethod::Dense),
            make("B", 0.5, RetrievalMethod::Dense),
        ];
        let sparse = vec![
            make("B", 6.0, RetrievalMethod::Sparse),
            make("C", 2.0, RetrievalMethod::Sparse),
        ];

        let results = fuse(dense, sparse, 0.5, 10);
        assert_eq!(results.len(), 3);
        // B appears on both sides and wins
        assert_eq!(results[0].source_id, "B");
        assert!(results.iter().all(|r| r.method == RetrievalMethod::Hybrid));
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.score)));
    }

    #[test]
    fn test_fusion_dedupes_and_truncates() {
        let dense = vec![
            make("A", 0.9, RetrievalMethod::Dense),
            make("A", 0.1, RetrievalMethod::Dense),
        ];
        let results = fuse(dense, vec![], 0.7, 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_id, "A");
    }
}
