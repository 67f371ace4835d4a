//! Score normalization and result fusion for hybrid retrieval.
//!
//! 1. Normalize each source's raw scores to `[0, 1]` with min-max.
//! 2. Merge by chunk id. A chunk found by both sources scores the higher of
//!    its two normalized scores plus a corroboration bonus.
//! 3. Sort descending by fused score, ties by chunk id.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::processing::Language;

/// Which source(s) returned a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRank {
    Vector,
    Lexical,
    Both,
}

/// One hit from a single source, before fusion.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub chunk_id: String,
    pub file_path: String,
    pub page_content: String,
    pub language: Language,
    pub raw_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub page_content: String,
    pub file_path: String,
    pub language: Language,
    pub score: f64,
    pub source_rank: SourceRank,
    /// Normalized vector score, when the vector source returned this chunk
    pub vector_score: Option<f64>,
    /// Normalized lexical score, when the lexical source returned this chunk
    pub lexical_score: Option<f64>,
}

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// If all scores are equal, they are normalized to `1.0`.
pub fn normalize_scores(candidates: &[Candidate]) -> Vec<f64> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            if (max - min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - min) / (max - min)
            }
        })
        .collect()
}

fn result_from(candidate: Candidate, rank: SourceRank, score: f64) -> RetrievalResult {
    RetrievalResult {
        chunk_id: candidate.chunk_id,
        page_content: candidate.page_content,
        file_path: candidate.file_path,
        language: candidate.language,
        score,
        source_rank: rank,
        vector_score: (rank == SourceRank::Vector).then_some(score),
        lexical_score: (rank == SourceRank::Lexical).then_some(score),
    }
}

/// Merge both sources into one ranked list.
pub fn fuse(vector: Vec<Candidate>, lexical: Vec<Candidate>, corroboration_bonus: f64) -> Vec<RetrievalResult> {
    let vector_scores = normalize_scores(&vector);
    let lexical_scores = normalize_scores(&lexical);

    let mut merged: HashMap<String, RetrievalResult> = HashMap::new();

    for (candidate, score) in vector.into_iter().zip(vector_scores) {
        // Keep the best score if a source repeats a chunk.
        let better = merged
            .get(&candidate.chunk_id)
            .map_or(true, |existing| score > existing.score);
        if better {
            merged.insert(
                candidate.chunk_id.clone(),
                result_from(candidate, SourceRank::Vector, score),
            );
        }
    }

    for (candidate, score) in lexical.into_iter().zip(lexical_scores) {
        match merged.get_mut(&candidate.chunk_id) {
            Some(existing) if existing.source_rank == SourceRank::Lexical => {
                if score > existing.score {
                    existing.score = score;
                    existing.lexical_score = Some(score);
                }
            }
            Some(existing) => {
                let lexical_score = existing.lexical_score.map_or(score, |s| s.max(score));
                let vector_score = existing.vector_score.unwrap_or(0.0);
                existing.lexical_score = Some(lexical_score);
                existing.source_rank = SourceRank::Both;
                existing.score = vector_score.max(lexical_score) + corroboration_bonus;
            }
            None => {
                merged.insert(
                    candidate.chunk_id.clone(),
                    result_from(candidate, SourceRank::Lexical, score),
                );
            }
        }
    }

    let mut results: Vec<RetrievalResult> = merged.into_values().collect();
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    results
}

/// Keep at most `max_per_file` results per source file, preserving order.
pub fn limit_per_file(results: Vec<RetrievalResult>, max_per_file: usize) -> Vec<RetrievalResult> {
    if max_per_file == 0 {
        return results;
    }
    let mut seen: HashMap<String, usize> = HashMap::new();
    results
        .into_iter()
        .filter(|r| {
            let count = seen.entry(r.file_path.clone()).or_insert(0);
            *count += 1;
            *count <= max_per_file
        })
        .collect()
}
