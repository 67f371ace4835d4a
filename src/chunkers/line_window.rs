//! Line-window splitting for spans too large to keep whole.

use std::ops::Range;

use unicode_segmentation::UnicodeSegmentation;

use super::base::count_tokens;

/// Upper bound on bytes per token when sizing a search span inside one line.
const MAX_BYTES_PER_TOKEN: usize = 16;

/// Byte offsets of line starts, for mapping byte ranges to line numbers.
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(content: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(content.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    /// 1-indexed line containing the byte at `offset`.
    pub fn line_of(&self, offset: usize) -> usize {
        match self.starts.binary_search(&offset) {
            Ok(i) => i + 1,
            Err(i) => i,
        }
    }

    /// Inclusive 1-indexed line range of a non-empty byte range.
    pub fn line_range(&self, range: &Range<usize>) -> (usize, usize) {
        let start = self.line_of(range.start);
        let end = self.line_of(range.end.saturating_sub(1).max(range.start));
        (start, end)
    }
}

/// Lines of `content[range]`, each including its trailing newline.
fn line_spans(content: &str, range: Range<usize>) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start = range.start;
    for (i, _) in content[range.clone()].match_indices('\n') {
        let end = range.start + i + 1;
        spans.push(start..end);
        start = end;
    }
    if start < range.end {
        spans.push(start..range.end);
    }
    spans
}

/// Split `content[range]` into windows of whole lines.
///
/// Each window stays within `budget` tokens. A single line that alone
/// exceeds the budget is cut at word boundaries instead. Trailing lines of a window totalling at most
/// `overlap_tokens` (clamped to half the budget) are repeated at the start of
/// the next window. Whitespace-only windows are dropped.
pub fn line_windows(
    content: &str,
    range: Range<usize>,
    budget: usize,
    overlap_tokens: usize,
) -> Vec<Range<usize>> {
    let lines = line_spans(content, range);
    let budget = budget.max(1);
    let overlap_tokens = overlap_tokens.min(budget / 2);
    let span = |from: usize, to: usize| &content[lines[from].start..lines[to - 1].end];

    let mut windows = Vec::new();
    let mut start = 0;

    while start < lines.len() {
        let mut end = start + 1;
        while end < lines.len() && count_tokens(span(start, end + 1)) <= budget {
            end += 1;
        }

        let window = lines[start].start..lines[end - 1].end;
        if end == start + 1 && count_tokens(&content[window.clone()]) > budget {
            windows.extend(split_line(content, window, budget));
        } else if !content[window.clone()].trim().is_empty() {
            windows.push(window);
        }

        if end == lines.len() {
            break;
        }

        // Step back over trailing lines for overlap, keeping room for line `end`.
        let mut next = end;
        while overlap_tokens > 0
            && next > start + 1
            && count_tokens(span(next - 1, end)) <= overlap_tokens
            && count_tokens(span(next - 1, end + 1)) <= budget
        {
            next -= 1;
        }
        start = next;
    }

    windows
}

/// Cut one over-budget line into spans of at most `budget` tokens.
///
/// Spans end on word boundaries where possible and on char boundaries when a
/// single word is larger than the budget.
fn split_line(content: &str, range: Range<usize>, budget: usize) -> Vec<Range<usize>> {
    let bounds: Vec<usize> = content[range.clone()]
        .split_word_bound_indices()
        .map(|(i, word)| range.start + i + word.len())
        .collect();

    let mut spans = Vec::new();
    let mut start = range.start;
    let mut next_bound = 0;

    while start < range.end {
        while next_bound < bounds.len() && bounds[next_bound] <= start {
            next_bound += 1;
        }
        let horizon = start + budget.saturating_mul(MAX_BYTES_PER_TOKEN);
        let reachable = bounds[next_bound..].partition_point(|&b| b <= horizon);
        let candidates = &bounds[next_bound..next_bound + reachable];

        let end = match last_fitting(content, start, candidates, budget) {
            Some(end) => end,
            None => {
                // First word alone is over budget.
                let word_end = bounds.get(next_bound).copied().unwrap_or(range.end);
                let chars: Vec<usize> = content[start..word_end]
                    .char_indices()
                    .skip(1)
                    .map(|(i, _)| start + i)
                    .chain(std::iter::once(word_end))
                    .collect();
                last_fitting(content, start, &chars, budget).unwrap_or(chars[0])
            }
        };

        if !content[start..end].trim().is_empty() {
            spans.push(start..end);
        }
        start = end;
    }

    spans
}

/// Largest candidate end whose span from `start` fits the budget.
fn last_fitting(content: &str, start: usize, candidates: &[usize], budget: usize) -> Option<usize> {
    let (mut lo, mut hi) = (0, candidates.len());
    let mut found = None;
    while lo < hi {
        let mid = (lo + hi) / 2;
        if count_tokens(&content[start..candidates[mid]]) <= budget {
            found = Some(candidates[mid]);
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    found
}
