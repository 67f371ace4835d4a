//! Similarity-driven sentence grouping for files without unit syntax.
//!
//! Sentences are found with Unicode sentence boundaries. Consecutive
//! sentences stay in one group while the cosine similarity of their vectors
//! stays at or above a topic-shift threshold and the group fits the token
//! budget.

use std::ops::Range;

use unicode_segmentation::UnicodeSegmentation;

use super::base::count_tokens;
use super::line_window::line_windows;

/// Produces sentence vectors for topic-shift detection.
pub trait SentenceEncoder: Send + Sync {
    fn encode(&self, sentence: &str) -> Vec<f32>;
}

/// Deterministic hashed bag-of-words encoder.
///
/// Lowercased words are hashed (FNV-1a) into a fixed number of buckets and
/// the result is L2-normalized. Pure and reproducible, so chunking of a file
/// never depends on an external service.
#[derive(Debug, Clone, Copy)]
pub struct HashingEncoder {
    dimensions: usize,
}

impl HashingEncoder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }
}

impl Default for HashingEncoder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl SentenceEncoder for HashingEncoder {
    fn encode(&self, sentence: &str) -> Vec<f32> {
        hashed_embedding(sentence, self.dimensions)
    }
}

/// Hashed bag-of-words vector of `text`, L2-normalized.
pub fn hashed_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimensions.max(1)];
    for word in text.unicode_words() {
        let bucket = (fnv1a(&word.to_lowercase()) % vector.len() as u64) as usize;
        vector[bucket] += 1.0;
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
    vector
}

fn fnv1a(text: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    text.bytes()
        .fold(OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(PRIME))
}

/// Cosine similarity; zero for mismatched or zero-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

/// A grouped span of `content`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextGroup {
    pub range: Range<usize>,
    /// Set when a single sentence overflowed the budget and was cut into windows
    pub line_split: bool,
}

/// Group the sentences of `content` into token-bounded spans.
pub fn group_sentences(
    content: &str,
    encoder: &dyn SentenceEncoder,
    budget: usize,
    threshold: f32,
) -> Vec<TextGroup> {
    let mut groups = Vec::new();
    let mut current: Option<Range<usize>> = None;
    let mut previous: Option<Vec<f32>> = None;

    for (offset, sentence) in content.split_sentence_bound_indices() {
        let span = offset..offset + sentence.len();

        if sentence.trim().is_empty() {
            if let Some(range) = current.as_mut() {
                range.end = span.end;
            }
            continue;
        }

        if count_tokens(sentence) > budget {
            if let Some(range) = current.take() {
                groups.push(TextGroup { range, line_split: false });
            }
            groups.extend(
                line_windows(content, span, budget, 0)
                    .into_iter()
                    .map(|range| TextGroup { range, line_split: true }),
            );
            previous = None;
            continue;
        }

        let vector = encoder.encode(sentence);
        current = match current.take() {
            None => Some(span),
            Some(range) => {
                let similar = previous
                    .as_deref()
                    .map_or(false, |prev| cosine_similarity(prev, &vector) >= threshold);
                if similar && count_tokens(&content[range.start..span.end]) <= budget {
                    Some(range.start..span.end)
                } else {
                    groups.push(TextGroup { range, line_split: false });
                    Some(span)
                }
            }
        };
        previous = Some(vector);
    }

    if let Some(range) = current {
        groups.push(TextGroup { range, line_split: false });
    }

    // Trailing whitespace is not part of any group body.
    for group in &mut groups {
        let trimmed = content[group.range.clone()].trim_end().len();
        group.range.end = group.range.start + trimmed;
    }
    groups.retain(|g| !g.range.is_empty());
    groups
}
