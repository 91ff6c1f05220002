//! Text chunking module
//!
//! Splits extracted document text into bounded, overlapping chunks for
//! embedding. Two strategies:
//!
//! - `Character`: split on a separator, then greedily merge the pieces back
//!   into windows of at most `chunk_size` characters, carrying up to
//!   `chunk_overlap` characters of trailing pieces into the next window.
//! - `Semantic`: `text-splitter` picks the highest semantic level
//!   (paragraph, sentence, word) that fits the same capacity.

use crate::errors::IngestionError;
use doctalk_common::config::{ChunkStrategy, ChunkingSettings};
use regex_lite::Regex;
use std::collections::VecDeque;
use text_splitter::{ChunkConfig, TextSplitter};
use tracing::{debug, warn};

/// Joins regex-separated pieces; the matched text itself is not kept
const REGEX_JOINER: &str = " ";

/// Configuration for text chunking
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub strategy: ChunkStrategy,
    /// Separator for the character strategy
    pub separator: String,
    /// Interpret `separator` as a regular expression
    pub separator_is_regex: bool,
    /// Target chunk size in characters
    pub chunk_size: usize,
    /// Overlap between chunks in characters
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::Character,
            separator: "\n".to_string(),
            separator_is_regex: false,
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl From<&ChunkingSettings> for ChunkingConfig {
    fn from(settings: &ChunkingSettings) -> Self {
        Self {
            strategy: settings.strategy,
            separator: settings.separator.clone(),
            separator_is_regex: settings.separator_is_regex,
            chunk_size: settings.chunk_size,
            chunk_overlap: settings.chunk_overlap,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestionError> {
        if self.chunk_size == 0 {
            return Err(IngestionError::ChunkingError(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestionError::ChunkingError(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// A text chunk with metadata
#[derive(Debug, Clone)]
pub struct TextChunk {
    /// The chunk content
    pub content: String,
    /// Index of this chunk in the document
    pub index: usize,
    /// Approximate token count
    pub token_count: usize,
    /// Start byte offset of the span this chunk covers in the source text
    pub start_pos: usize,
    /// End byte offset (exclusive)
    pub end_pos: usize,
}

impl TextChunk {
    fn new(content: String, index: usize, start_pos: usize, end_pos: usize) -> Self {
        // ~4 characters per token
        let token_count = content.chars().count() / 4;
        Self {
            content,
            index,
            token_count,
            start_pos,
            end_pos,
        }
    }
}

/// Split text into chunks for embedding
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Result<Vec<TextChunk>, IngestionError> {
    config.validate()?;

    let chunks = match config.strategy {
        ChunkStrategy::Character => chunk_by_separator(text, config)?,
        ChunkStrategy::Semantic => chunk_semantic(text, config)?,
    };

    debug!(
        input_len = text.len(),
        chunk_count = chunks.len(),
        chunk_size = config.chunk_size,
        chunk_overlap = config.chunk_overlap,
        strategy = ?config.strategy,
        "Text chunked"
    );

    Ok(chunks)
}

/// A separator-delimited slice of the source text
#[derive(Debug, Clone, Copy)]
struct Piece<'a> {
    text: &'a str,
    start: usize,
    end: usize,
    chars: usize,
}

impl<'a> Piece<'a> {
    fn new(text: &'a str, start: usize) -> Self {
        Self {
            text,
            start,
            end: start + text.len(),
            chars: text.chars().count(),
        }
    }
}

fn split_pieces<'a>(text: &'a str, config: &ChunkingConfig) -> Result<Vec<Piece<'a>>, IngestionError> {
    let mut pieces = Vec::new();

    if config.separator_is_regex {
        let re = Regex::new(&config.separator).map_err(|e| {
            IngestionError::ChunkingError(format!("Invalid separator pattern: {}", e))
        })?;
        let mut last = 0;
        for m in re.find_iter(text) {
            if m.start() > last {
                pieces.push(Piece::new(&text[last..m.start()], last));
            }
            last = m.end();
        }
        if last < text.len() {
            pieces.push(Piece::new(&text[last..], last));
        }
    } else if config.separator.is_empty() {
        for (offset, ch) in text.char_indices() {
            pieces.push(Piece::new(&text[offset..offset + ch.len_utf8()], offset));
        }
    } else {
        let mut offset = 0;
        for part in text.split(config.separator.as_str()) {
            if !part.is_empty() {
                pieces.push(Piece::new(part, offset));
            }
            offset += part.len() + config.separator.len();
        }
    }

    Ok(pieces)
}

fn chunk_by_separator(text: &str, config: &ChunkingConfig) -> Result<Vec<TextChunk>, IngestionError> {
    let pieces = split_pieces(text, config)?;
    let joiner = if config.separator_is_regex {
        REGEX_JOINER
    } else {
        config.separator.as_str()
    };
    let sep_len = joiner.chars().count();

    let mut chunks = Vec::new();
    let mut window: VecDeque<Piece> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let joined_len = |total: usize, window: &VecDeque<Piece>| {
            total + piece.chars + if window.is_empty() { 0 } else { sep_len }
        };

        if joined_len(total, &window) > config.chunk_size {
            if total > config.chunk_size {
                warn!(
                    size = total,
                    chunk_size = config.chunk_size,
                    "Created a chunk longer than the configured chunk size"
                );
            }

            if !window.is_empty() {
                emit(&mut chunks, &window, joiner);

                // Keep at most `chunk_overlap` characters, and only as many
                // as still leave room for the incoming piece
                while total > config.chunk_overlap
                    || (joined_len(total, &window) > config.chunk_size && total > 0)
                {
                    let Some(front) = window.pop_front() else {
                        break;
                    };
                    total -= front.chars + if window.is_empty() { 0 } else { sep_len };
                }
            }
        }

        total += piece.chars + if window.is_empty() { 0 } else { sep_len };
        window.push_back(piece);
    }

    if total > config.chunk_size {
        warn!(
            size = total,
            chunk_size = config.chunk_size,
            "Created a chunk longer than the configured chunk size"
        );
    }
    emit(&mut chunks, &window, joiner);

    Ok(chunks)
}

/// Join a window into a chunk; whitespace-only windows produce nothing
fn emit(chunks: &mut Vec<TextChunk>, window: &VecDeque<Piece>, joiner: &str) {
    let (Some(first), Some(last)) = (window.front(), window.back()) else {
        return;
    };

    let joined = window.iter().map(|p| p.text).collect::<Vec<_>>().join(joiner);
    let content = joined.trim();
    if content.is_empty() {
        return;
    }

    let leading = joined.len() - joined.trim_start().len();
    let trailing = joined.len() - joined.trim_end().len();
    let start = first.start + leading;
    let end = last.end.saturating_sub(trailing).max(start);

    chunks.push(TextChunk::new(content.to_string(), chunks.len(), start, end));
}

fn chunk_semantic(text: &str, config: &ChunkingConfig) -> Result<Vec<TextChunk>, IngestionError> {
    let chunk_config = ChunkConfig::new(config.chunk_size)
        .with_overlap(config.chunk_overlap)
        .map_err(|e| IngestionError::ChunkingError(e.to_string()))?;
    let splitter = TextSplitter::new(chunk_config);

    Ok(splitter
        .chunk_indices(text)
        .filter(|(_, chunk)| !chunk.trim().is_empty())
        .enumerate()
        .map(|(index, (offset, chunk))| {
            TextChunk::new(chunk.to_string(), index, offset, offset + chunk.len())
        })
        .collect())
}
