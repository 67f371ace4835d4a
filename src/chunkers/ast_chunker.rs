//! AST-aware semantic chunker.
//!
//! Packs semantic units into token-bounded chunks. Units are never split
//! unless one alone exceeds the budget, in which case it is cut into line
//! windows with overlapping trailing context. Files without recognized units
//! fall back to a whole-file chunk or similarity-driven sentence groups.

use std::ops::Range;
use std::sync::Arc;

use tracing::debug;

use super::base::{count_tokens, Chunker};
use super::line_window::{line_windows, LineIndex};
use super::semantic_text::{group_sentences, HashingEncoder, SentenceEncoder};
use crate::ast_engine::UnitExtractor;
use crate::types::{
    Chunk, ChunkConfig, ChunkMetadata, SemanticUnit, SourceFile, SplittingMethod, UnitKind,
};

/// A chunk body before ids and metadata are attached.
#[derive(Debug, Clone)]
struct Piece {
    range: Range<usize>,
    method: SplittingMethod,
    /// Indices into the file's unit list
    units: Vec<usize>,
    contains_imports: bool,
}

impl Piece {
    fn is_mergeable(&self) -> bool {
        matches!(
            self.method,
            SplittingMethod::UnitPack | SplittingMethod::Semantic
        )
    }

    fn merged(&self, next: &Piece) -> Piece {
        let mut units = self.units.clone();
        units.extend_from_slice(&next.units);
        Piece {
            range: self.range.start..next.range.end,
            method: self.method,
            units,
            contains_imports: self.contains_imports || next.contains_imports,
        }
    }
}

/// Chunker driven by tree-sitter semantic units.
pub struct AstChunker {
    extractor: UnitExtractor,
    encoder: Arc<dyn SentenceEncoder>,
}

impl AstChunker {
    pub fn new() -> Self {
        Self::with_encoder(Arc::new(HashingEncoder::default()))
    }

    /// Use a custom sentence encoder for the text fallback.
    pub fn with_encoder(encoder: Arc<dyn SentenceEncoder>) -> Self {
        Self {
            extractor: UnitExtractor::new(),
            encoder,
        }
    }

    fn chunk_units(
        &self,
        file: &SourceFile,
        units: &[SemanticUnit],
        config: &ChunkConfig,
    ) -> Vec<Chunk> {
        let content = file.raw_content.as_str();
        let max_tokens = config.max_tokens.max(1);

        let header = import_header(units, config);
        let budget = max_tokens - header.as_deref().map_or(0, count_tokens);
        let units = self.split_oversized_classes(file, units, budget);

        let pieces = pack_units(content, &units, budget, config);
        let pieces = merge_small(content, pieces, budget, config);

        assemble(file, pieces, &units, header.as_deref(), max_tokens)
    }

    /// Replace classes over the budget with their methods, so packing can
    /// keep whole methods together before resorting to line windows.
    fn split_oversized_classes(
        &self,
        file: &SourceFile,
        units: &[SemanticUnit],
        budget: usize,
    ) -> Vec<SemanticUnit> {
        let mut out = Vec::with_capacity(units.len());
        for unit in units {
            if unit.kind == UnitKind::Class && count_tokens(&unit.raw_text) > budget {
                let members = self.extractor.split_members(file, unit);
                if !members.is_empty() {
                    debug!(class = %unit.name, methods = members.len(), "Splitting oversized class into methods");
                    out.extend(members);
                    continue;
                }
            }
            out.push(unit.clone());
        }
        out
    }

    fn chunk_text(&self, file: &SourceFile, config: &ChunkConfig) -> Vec<Chunk> {
        let content = file.raw_content.as_str();
        let max_tokens = config.max_tokens.max(1);

        if count_tokens(content) <= max_tokens {
            let piece = Piece {
                range: 0..content.len(),
                method: SplittingMethod::WholeFile,
                units: Vec::new(),
                contains_imports: false,
            };
            return assemble(file, vec![piece], &[], None, max_tokens);
        }

        let pieces = group_sentences(
            content,
            self.encoder.as_ref(),
            max_tokens,
            config.similarity_threshold,
        )
        .into_iter()
        .map(|group| Piece {
            range: group.range,
            method: if group.line_split {
                SplittingMethod::LineWindow
            } else {
                SplittingMethod::Semantic
            },
            units: Vec::new(),
            contains_imports: false,
        })
        .collect();

        let pieces = merge_small(content, pieces, max_tokens, config);
        assemble(file, pieces, &[], None, max_tokens)
    }
}

impl Default for AstChunker {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunker for AstChunker {
    fn name(&self) -> &'static str {
        "ast"
    }

    fn chunk(&self, file: &SourceFile, config: &ChunkConfig) -> Vec<Chunk> {
        if file.raw_content.trim().is_empty() {
            return Vec::new();
        }

        match self.extractor.extract(file) {
            Ok(units) if units.is_empty() => self.chunk_text(file, config),
            Ok(units) => self.chunk_units(file, &units, config),
            Err(err) => {
                debug!(
                    path = %file.path,
                    error = %err,
                    "Unit extraction failed, falling back to line windows"
                );
                let content = file.raw_content.as_str();
                let max_tokens = config.max_tokens.max(1);
                let pieces = line_windows(content, 0..content.len(), max_tokens, config.overlap_tokens)
                    .into_iter()
                    .map(|range| Piece {
                        range,
                        method: SplittingMethod::LineWindow,
                        units: Vec::new(),
                        contains_imports: false,
                    })
                    .collect();
                assemble(file, pieces, &[], None, max_tokens)
            }
        }
    }
}

/// The leading import block, formatted as a prefix for later chunks.
///
/// Only used when it costs at most half the budget.
fn import_header(units: &[SemanticUnit], config: &ChunkConfig) -> Option<String> {
    if !config.include_imports_in_context || units.len() < 2 {
        return None;
    }
    let first = units.first().filter(|u| u.kind == UnitKind::ImportBlock)?;
    let header = format!("{}\n\n", first.raw_text.trim_end());
    (count_tokens(&header) <= config.max_tokens / 2).then_some(header)
}

/// Greedy packing of consecutive units under the budget and unit cap.
fn pack_units(
    content: &str,
    units: &[SemanticUnit],
    budget: usize,
    config: &ChunkConfig,
) -> Vec<Piece> {
    let max_units = config.max_units_per_chunk.max(1);
    let mut pieces = Vec::new();
    let mut current: Option<(usize, usize)> = None;

    let flush = |current: &mut Option<(usize, usize)>, pieces: &mut Vec<Piece>| {
        if let Some((first, last)) = current.take() {
            pieces.push(Piece {
                range: units[first].start_offset..units[last].end_offset,
                method: SplittingMethod::UnitPack,
                units: (first..=last).collect(),
                contains_imports: units[first..=last]
                    .iter()
                    .any(|u| u.kind == UnitKind::ImportBlock),
            });
        }
    };

    for (i, unit) in units.iter().enumerate() {
        if count_tokens(&unit.raw_text) > budget {
            flush(&mut current, &mut pieces);
            debug!(unit = %unit.name, kind = %unit.kind, "Splitting oversized unit into line windows");
            let windows = line_windows(
                content,
                unit.start_offset..unit.end_offset,
                budget,
                config.overlap_tokens,
            );
            pieces.extend(windows.into_iter().map(|range| Piece {
                range,
                method: SplittingMethod::LineWindow,
                units: vec![i],
                contains_imports: unit.kind == UnitKind::ImportBlock,
            }));
            continue;
        }

        if let Some((first, _)) = current {
            let candidate = &content[units[first].start_offset..unit.end_offset];
            if i - first < max_units && count_tokens(candidate) <= budget {
                current = Some((first, i));
                continue;
            }
            flush(&mut current, &mut pieces);
        }
        current = Some((i, i));
    }
    flush(&mut current, &mut pieces);

    pieces
}

/// Merge pieces below `min_tokens` into a neighbour when the result fits.
///
/// Forward merge is tried first, then backward. The file's last piece is
/// exempt, as are line windows.
fn merge_small(
    content: &str,
    mut pieces: Vec<Piece>,
    budget: usize,
    config: &ChunkConfig,
) -> Vec<Piece> {
    let max_units = config.max_units_per_chunk.max(1);
    let tokens = |piece: &Piece| count_tokens(&content[piece.range.clone()]);
    let fits = |piece: &Piece| {
        (piece.method != SplittingMethod::UnitPack || piece.units.len() <= max_units)
            && tokens(piece) <= budget
    };

    let mut i = 0;
    while i + 1 < pieces.len() {
        if !pieces[i].is_mergeable() || tokens(&pieces[i]) >= config.min_tokens {
            i += 1;
            continue;
        }

        let next = &pieces[i + 1];
        if next.method == pieces[i].method {
            let merged = pieces[i].merged(next);
            if fits(&merged) {
                pieces[i] = merged;
                pieces.remove(i + 1);
                continue;
            }
        }

        if i > 0 && pieces[i - 1].method == pieces[i].method {
            let merged = pieces[i - 1].merged(&pieces[i]);
            if fits(&merged) {
                pieces[i - 1] = merged;
                pieces.remove(i);
                i -= 1;
                continue;
            }
        }

        i += 1;
    }

    pieces
}

fn assemble(
    file: &SourceFile,
    pieces: Vec<Piece>,
    units: &[SemanticUnit],
    header: Option<&str>,
    max_tokens: usize,
) -> Vec<Chunk> {
    let content = file.raw_content.as_str();
    let index = LineIndex::new(content);

    pieces
        .into_iter()
        .enumerate()
        .map(|(chunk_index, piece)| {
            let body = &content[piece.range.clone()];
            let mut page_content = body.to_string();
            let mut injected = false;

            if let Some(header) = header.filter(|_| !piece.contains_imports) {
                let prefixed = format!("{header}{body}");
                if count_tokens(&prefixed) <= max_tokens {
                    page_content = prefixed;
                    injected = true;
                }
            }

            let metadata = ChunkMetadata::new(
                file.language,
                index.line_range(&piece.range),
                (piece.range.start, piece.range.end),
            )
            .with_import_context(injected);

            Chunk::new(
                &file.path,
                chunk_index,
                page_content.clone(),
                count_tokens(&page_content),
                piece.method,
                piece.units.iter().map(|&u| units[u].to_ref()).collect(),
                metadata,
            )
        })
        .collect()
}
