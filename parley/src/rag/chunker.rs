//! Text chunking for ingest. Sizes are in approximate tokens (4 characters per token);
//! positions are character offsets into the normalized source text.

use serde::{Deserialize, Serialize};

/// How a document is split before embedding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Fixed-size character windows.
    #[default]
    Fixed,
    /// Paragraph-bounded (`\n\n`), packed up to the size budget.
    Paragraph,
    /// Sentence-bounded, packed up to the size budget.
    Sentence,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkingConfig {
    #[serde(default)]
    pub strategy: ChunkStrategy,
    /// Target chunk size in tokens.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in tokens.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_chunk_size() -> usize {
    400
}

fn default_chunk_overlap() -> usize {
    40
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::Fixed,
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

/// One chunk of source text.
#[derive(Clone, Debug)]
pub struct TextChunk {
    pub index: usize,
    pub text: String,
    pub token_count: usize,
    /// Character offset of the chunk start in the source.
    pub start: usize,
    /// Character offset one past the chunk end.
    pub end: usize,
}

/// ~4 characters per token, rounded up. Good enough for packing budgets.
pub fn approx_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Splits `text` per the configured strategy. Empty or whitespace-only text yields no
/// chunks. A single unit larger than the budget becomes its own chunk rather than being
/// split mid-unit (fixed strategy excepted).
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<TextChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let overlap = config.chunk_overlap.min(config.chunk_size / 2);
    match config.strategy {
        ChunkStrategy::Fixed => fixed_chunks(text, config.chunk_size, overlap),
        ChunkStrategy::Paragraph => pack_units(paragraph_units(text), config.chunk_size, overlap),
        ChunkStrategy::Sentence => pack_units(sentence_units(text), config.chunk_size, overlap),
    }
}

fn fixed_chunks(text: &str, chunk_tokens: usize, overlap_tokens: usize) -> Vec<TextChunk> {
    let chars: Vec<char> = text.chars().collect();
    let window = (chunk_tokens.max(1)) * 4;
    let step = window.saturating_sub(overlap_tokens * 4).max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let end = (start + window).min(chars.len());
        let slice: String = chars[start..end].iter().collect();
        if !slice.trim().is_empty() {
            chunks.push(TextChunk {
                index: chunks.len(),
                token_count: approx_tokens(&slice),
                text: slice,
                start,
                end,
            });
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// A unit of text with its character span.
struct Unit {
    start: usize,
    end: usize,
    text: String,
}

fn paragraph_units(text: &str) -> Vec<Unit> {
    let mut units = Vec::new();
    let mut offset = 0usize;
    for part in text.split("\n\n") {
        let char_len = part.chars().count();
        if !part.trim().is_empty() {
            units.push(Unit {
                start: offset,
                end: offset + char_len,
                text: part.to_string(),
            });
        }
        offset += char_len + 2;
    }
    units
}

fn sentence_units(text: &str) -> Vec<Unit> {
    let chars: Vec<char> = text.chars().collect();
    let mut units = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        let boundary = matches!(c, '.' | '!' | '?')
            && chars.get(i + 1).map(|n| n.is_whitespace()).unwrap_or(true);
        if boundary || i == chars.len() - 1 {
            let end = i + 1;
            let sentence: String = chars[start..end].iter().collect();
            if !sentence.trim().is_empty() {
                units.push(Unit {
                    start,
                    end,
                    text: sentence,
                });
            }
            start = end;
        }
        i += 1;
    }
    units
}

/// Packs units greedily to the token budget. Each next chunk re-seeds with trailing units
/// worth roughly `overlap_tokens` for continuity.
fn pack_units(units: Vec<Unit>, chunk_tokens: usize, overlap_tokens: usize) -> Vec<TextChunk> {
    let mut chunks: Vec<TextChunk> = Vec::new();
    let mut current: Vec<&Unit> = Vec::new();
    let mut current_tokens = 0usize;

    let flush = |current: &[&Unit], chunks: &mut Vec<TextChunk>| {
        if current.is_empty() {
            return;
        }
        let start = current[0].start;
        let end = current[current.len() - 1].end;
        let text: String = current
            .iter()
            .map(|u| u.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }
        chunks.push(TextChunk {
            index: chunks.len(),
            token_count: approx_tokens(&text),
            text,
            start,
            end,
        });
    };

    for unit in &units {
        let unit_tokens = approx_tokens(&unit.text);
        if current_tokens + unit_tokens > chunk_tokens && !current.is_empty() {
            flush(&current, &mut chunks);
            // Re-seed with trailing overlap units.
            let mut seed: Vec<&Unit> = Vec::new();
            let mut seed_tokens = 0usize;
            for prev in current.iter().rev() {
                let t = approx_tokens(&prev.text);
                if seed_tokens + t > overlap_tokens {
                    break;
                }
                seed_tokens += t;
                seed.push(prev);
            }
            seed.reverse();
            current = seed;
            current_tokens = seed_tokens;
        }
        current.push(unit);
        current_tokens += unit_tokens;
    }
    flush(&current, &mut chunks);
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: fixed chunking covers the whole text with the configured overlap.
    #[test]
    fn fixed_chunks_cover_text_with_overlap() {
        let text = "abcdefgh".repeat(50); // 400 chars
        let config = ChunkingConfig {
            strategy: ChunkStrategy::Fixed,
            chunk_size: 25, // 100-char window
            chunk_overlap: 5, // 20-char overlap
        };
        let chunks = chunk_text(&text, &config);
        assert!(chunks.len() >= 4);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks[0].end, 100);
        assert_eq!(chunks[1].start, 80);
        for pair in chunks.windows(2) {
            assert!(pair[1].start < pair[0].end, "consecutive chunks overlap");
        }
        assert_eq!(chunks.last().unwrap().end, 400);
    }

    /// **Scenario**: paragraph chunking never splits inside a paragraph.
    #[test]
    fn paragraph_chunks_respect_boundaries() {
        let text = "first paragraph here\n\nsecond paragraph goes here\n\nthird one";
        let config = ChunkingConfig {
            strategy: ChunkStrategy::Paragraph,
            chunk_size: 10,
            chunk_overlap: 0,
        };
        let chunks = chunk_text(text, &config);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(!chunk.text.contains("\n\n"));
        }
    }

    /// **Scenario**: sentence chunking keeps sentence enders attached.
    #[test]
    fn sentence_chunks_keep_punctuation() {
        let text = "One sentence. Another one! A third? Trailing tail";
        let config = ChunkingConfig {
            strategy: ChunkStrategy::Sentence,
            chunk_size: 3,
            chunk_overlap: 0,
        };
        let chunks = chunk_text(text, &config);
        assert!(chunks.len() >= 3);
        assert!(chunks[0].text.ends_with('.'));
    }

    /// **Scenario**: empty input yields no chunks; a huge single paragraph still chunks.
    #[test]
    fn edge_cases() {
        assert!(chunk_text("   \n ", &ChunkingConfig::default()).is_empty());

        let huge = "word ".repeat(1000);
        let config = ChunkingConfig {
            strategy: ChunkStrategy::Paragraph,
            chunk_size: 50,
            chunk_overlap: 0,
        };
        let chunks = chunk_text(&huge, &config);
        assert_eq!(chunks.len(), 1, "single oversized unit stays whole");
    }

    /// **Scenario**: indexes are sequential from zero.
    #[test]
    fn indexes_are_sequential() {
        let text = "para one\n\npara two\n\npara three\n\npara four";
        let config = ChunkingConfig {
            strategy: ChunkStrategy::Paragraph,
            chunk_size: 4,
            chunk_overlap: 0,
        };
        let chunks = chunk_text(text, &config);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
    }
}
