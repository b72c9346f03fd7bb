
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{RagError, Result};

/// Literal separator ladder, coarsest first. Two finer levels follow:
/// whitespace word boundaries, then raw characters.
const SEPARATORS: [&str; 3] = ["\n\n", "\n", ". "];

/// Ladder level for word-boundary splitting.
const WORD_LEVEL: usize = SEPARATORS.len();
/// Ladder level for character splitting (last resort).
const CHAR_LEVEL: usize = SEPARATORS.len() + 1;

/// A bounded piece of a document, the atomic retrieval unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Chunk text, exactly `&source[start_offset..end_offset]`
    pub text: String,
    /// Estimated token count of `text`
    pub token_count: usize,
    /// Position of this chunk within the document
    pub chunk_index: usize,
    /// Byte offset into the source text where this chunk begins
    pub start_offset: usize,
    /// Byte offset into the source text where this chunk ends
    pub end_offset: usize,
}

/// Configuration for document chunking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Token budget for a single chunk
    pub target_tokens: usize,
    /// Tokens of trailing context re-included at the start of the next chunk
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    #[inline]
    fn default() -> Self {
        Self {
            target_tokens: 500,
            overlap_tokens: 50,
        }
    }
}

impl ChunkerConfig {
    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.target_tokens == 0 || self.overlap_tokens == 0 {
            return Err(RagError::InvalidConfiguration(format!(
                "chunk sizes must be positive (target_tokens={}, overlap_tokens={})",
                self.target_tokens, self.overlap_tokens
            )));
        }
        if self.overlap_tokens >= self.target_tokens {
            return Err(RagError::InvalidConfiguration(format!(
                "overlap_tokens ({}) must be smaller than target_tokens ({})",
                self.overlap_tokens, self.target_tokens
            )));
        }
        Ok(())
    }
}

/// Estimate the token count of a piece of text.
///
/// Roughly four characters per token, counted per whitespace word so the
/// estimate is stable under re-splitting at word boundaries. The same
/// estimator is used for chunk budgets, context assembly, and stored
/// metadata so a chunk measured under budget here stays under budget
/// everywhere.
#[inline]
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace()
        .map(|word| word.chars().count().div_ceil(4).max(1))
        .sum()
}

/// Split text into an ordered sequence of overlapping chunks, each within
/// the configured token budget.
///
/// Splitting walks a fixed separator ladder (paragraphs, lines, sentences,
/// words, characters), refining any span that exceeds the budget at the next
/// finer level. The resulting atomic pieces are greedily packed into chunks;
/// each chunk after the first re-includes the trailing `overlap_tokens`
/// worth of words from its predecessor, shrunk when necessary so the budget
/// and forward progress are never violated. Deterministic for a given input
/// and configuration.
#[inline]
pub fn chunk_text(text: &str, config: &ChunkerConfig) -> Result<Vec<TextChunk>> {
    config.validate()?;

    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let pieces = split_into_pieces(text, config.target_tokens);
    let chunks = assemble_chunks(text, &pieces, config);

    debug!(
        "chunked {} bytes into {} chunks (avg {} tokens)",
        text.len(),
        chunks.len(),
        chunks.iter().map(|c| c.token_count).sum::<usize>() / chunks.len().max(1)
    );

    Ok(chunks)
}

/// Decompose the text into contiguous atomic pieces, each within the token
/// budget. Separator text stays attached to the preceding piece so the
/// pieces concatenate back to the source exactly.
///
/// Uses an explicit work stack rather than recursion so pathological input
/// (e.g. one enormous unbroken token) cannot overflow the stack.
fn split_into_pieces(text: &str, target_tokens: usize) -> Vec<(usize, usize)> {
    let mut pieces = Vec::new();
    let mut work = vec![(0usize, text.len(), 0usize)];

    while let Some((start, end, level)) = work.pop() {
        let span = &text[start..end];

        if estimate_tokens(span) <= target_tokens {
            pieces.push((start, end));
            continue;
        }

        if level >= CHAR_LEVEL {
            hard_split(text, start, end, target_tokens, &mut pieces);
            continue;
        }

        let bounds = if level == WORD_LEVEL {
            split_after_whitespace(span)
        } else {
            split_after_separator(span, SEPARATORS[level])
        };

        if bounds.len() <= 1 {
            // Separator absent at this level, try the next finer one.
            work.push((start, end, level + 1));
            continue;
        }

        // Push sub-spans in reverse so they pop in document order.
        let mut sub_start = 0;
        let mut spans = Vec::with_capacity(bounds.len());
        for bound in bounds {
            spans.push((start + sub_start, start + bound, level + 1));
            sub_start = bound;
        }
        work.extend(spans.into_iter().rev());
    }

    pieces
}

/// Relative end offsets of sub-spans, cut after each occurrence of `sep`.
fn split_after_separator(span: &str, sep: &str) -> Vec<usize> {
    let mut bounds = Vec::new();
    let mut search = 0;

    while let Some(pos) = span[search..].find(sep) {
        let bound = search + pos + sep.len();
        bounds.push(bound);
        search = bound;
    }

    if bounds.last() != Some(&span.len()) {
        bounds.push(span.len());
    }
    bounds
}

/// Relative end offsets of sub-spans, cut after each whitespace run.
fn split_after_whitespace(span: &str) -> Vec<usize> {
    let mut bounds = Vec::new();
    let mut in_whitespace = false;

    for (idx, ch) in span.char_indices() {
        if ch.is_whitespace() {
            in_whitespace = true;
        } else if in_whitespace {
            bounds.push(idx);
            in_whitespace = false;
        }
    }

    if bounds.last() != Some(&span.len()) {
        bounds.push(span.len());
    }
    bounds
}

/// Last resort for a span with no whitespace at all: cut on char boundaries
/// at the estimator's chars-per-token budget.
fn hard_split(
    text: &str,
    start: usize,
    end: usize,
    target_tokens: usize,
    pieces: &mut Vec<(usize, usize)>,
) {
    let char_budget = target_tokens * 4;
    let mut piece_start = start;
    let mut chars = 0usize;

    for (idx, _) in text[start..end].char_indices() {
        if chars == char_budget {
            pieces.push((piece_start, start + idx));
            piece_start = start + idx;
            chars = 0;
        }
        chars += 1;
    }

    if piece_start < end {
        pieces.push((piece_start, end));
    }
}

/// Greedily pack atomic pieces into chunks, carrying overlap between
/// consecutive chunks. Start offsets strictly increase.
fn assemble_chunks(text: &str, pieces: &[(usize, usize)], config: &ChunkerConfig) -> Vec<TextChunk> {
    let mut chunks: Vec<TextChunk> = Vec::new();
    let mut start = pieces[0].0;
    let mut end = start;
    let mut budget_used = 0usize;

    for &(piece_start, piece_end) in pieces {
        let piece_tokens = estimate_tokens(&text[piece_start..piece_end]);

        if budget_used + piece_tokens <= config.target_tokens {
            end = piece_end;
            budget_used += piece_tokens;
            continue;
        }

        // Close out the current chunk; the next one starts at the overlap
        // position inside it. The overlap shrinks when the incoming piece
        // would not otherwise fit under the budget.
        let allowed_overlap = config
            .overlap_tokens
            .min(config.target_tokens - piece_tokens);
        let overlap_start = overlap_start(text, start, end, allowed_overlap);
        chunks.push(make_chunk(text, start, end, chunks.len()));

        start = overlap_start;
        end = piece_end;
        budget_used = estimate_tokens(&text[start..end]);
    }

    chunks.push(make_chunk(text, start, end, chunks.len()));
    chunks
}

/// Byte offset within `[chunk_start, chunk_end)` where the next chunk should
/// begin so that it re-includes up to `max_tokens` of trailing whole words.
/// Always returns an offset strictly greater than `chunk_start`.
fn overlap_start(text: &str, chunk_start: usize, chunk_end: usize, max_tokens: usize) -> usize {
    if max_tokens == 0 {
        return chunk_end;
    }

    let span = &text[chunk_start..chunk_end];
    let mut words: Vec<(usize, usize)> = Vec::new();
    let mut word_start: Option<usize> = None;

    for (idx, ch) in span.char_indices() {
        if ch.is_whitespace() {
            if let Some(ws) = word_start.take() {
                words.push((ws, estimate_tokens(&span[ws..idx])));
            }
        } else if word_start.is_none() {
            word_start = Some(idx);
        }
    }
    if let Some(ws) = word_start {
        words.push((ws, estimate_tokens(&span[ws..])));
    }

    let mut taken = 0usize;
    let mut candidate = chunk_end;
    for &(rel, cost) in words.iter().rev() {
        // Never reuse the entire previous chunk; forward progress wins.
        if rel == 0 || taken + cost > max_tokens {
            break;
        }
        taken += cost;
        candidate = chunk_start + rel;
    }

    candidate
}

fn make_chunk(text: &str, start: usize, end: usize, index: usize) -> TextChunk {
    let slice = &text[start..end];
    TextChunk {
        text: slice.to_string(),
        token_count: estimate_tokens(slice),
        chunk_index: index,
        start_offset: start,
        end_offset: end,
    }
}
