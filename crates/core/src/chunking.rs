use crate::error::IngestError;
use crate::extractor::PageText;
use regex::Regex;
use std::collections::VecDeque;

/// Paragraph, line, word, then single characters.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 1_000,
            overlap_chars: 200,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be greater than zero".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk size {}",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub page: u32,
    pub text: String,
}

/// Collapses runs of inline whitespace, trims lines and caps blank-line runs
/// at a single paragraph break.
pub fn normalize_whitespace(text: &str) -> Result<String, IngestError> {
    let inline = Regex::new(r"[^\S\n]+")?;
    let blank_runs = Regex::new(r"\n{3,}")?;

    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let spaced = inline.replace_all(&unified, " ");
    let lines = spaced.lines().map(str::trim).collect::<Vec<_>>().join("\n");

    Ok(blank_runs.replace_all(&lines, "\n\n").trim().to_string())
}

pub fn chunk_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    split_recursive(text, &SEPARATORS, config)
}

/// Splits every page on its own, so a chunk never straddles two pages.
pub fn chunk_pages(pages: &[PageText], config: ChunkingConfig) -> Result<Vec<TextChunk>, IngestError> {
    config.validate()?;

    let mut chunks = Vec::new();
    for page in pages {
        let normalized = normalize_whitespace(&page.text)?;
        if normalized.is_empty() {
            continue;
        }

        chunks.extend(chunk_text(&normalized, config).into_iter().map(|text| TextChunk {
            page: page.number,
            text,
        }));
    }

    Ok(chunks)
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn split_recursive(text: &str, separators: &[&str], config: ChunkingConfig) -> Vec<String> {
    let position = separators
        .iter()
        .position(|separator| separator.is_empty() || text.contains(separator))
        .unwrap_or(separators.len().saturating_sub(1));
    let separator = separators.get(position).copied().unwrap_or("");
    let finer = separators.get(position + 1..).unwrap_or(&[]);

    let pieces: Vec<&str> = if separator.is_empty() {
        text.char_indices()
            .map(|(start, ch)| &text[start..start + ch.len_utf8()])
            .collect()
    } else {
        text.split(separator).filter(|piece| !piece.is_empty()).collect()
    };

    let mut chunks = Vec::new();
    let mut pending: Vec<&str> = Vec::new();

    for piece in pieces {
        if char_len(piece) < config.max_chars {
            pending.push(piece);
            continue;
        }

        if !pending.is_empty() {
            chunks.extend(merge_pieces(&pending, separator, config));
            pending.clear();
        }

        if finer.is_empty() {
            chunks.push(piece.to_string());
        } else {
            chunks.extend(split_recursive(piece, finer, config));
        }
    }

    if !pending.is_empty() {
        chunks.extend(merge_pieces(&pending, separator, config));
    }

    chunks
}

/// Greedily joins pieces up to `max_chars`; after each emitted chunk the
/// window keeps at most `overlap_chars` of trailing pieces.
fn merge_pieces(pieces: &[&str], separator: &str, config: ChunkingConfig) -> Vec<String> {
    let separator_len = char_len(separator);
    let mut merged = Vec::new();
    let mut window: VecDeque<(&str, usize)> = VecDeque::new();
    let mut total = 0usize;

    for &piece in pieces {
        let len = char_len(piece);
        let joiner = if window.is_empty() { 0 } else { separator_len };

        if total + len + joiner > config.max_chars && !window.is_empty() {
            push_joined(&mut merged, &window, separator);

            loop {
                let joiner = if window.is_empty() { 0 } else { separator_len };
                let over_overlap = total > config.overlap_chars;
                let no_room = total + len + joiner > config.max_chars && total > 0;
                if !(over_overlap || no_room) {
                    break;
                }
                match window.pop_front() {
                    Some((_, first_len)) => {
                        let dropped_joiner = if window.is_empty() { 0 } else { separator_len };
                        total = total.saturating_sub(first_len + dropped_joiner);
                    }
                    None => break,
                }
            }
        }

        total += len + if window.is_empty() { 0 } else { separator_len };
        window.push_back((piece, len));
    }

    push_joined(&mut merged, &window, separator);
    merged
}

fn push_joined(target: &mut Vec<String>, window: &VecDeque<(&str, usize)>, separator: &str) {
    let joined = window
        .iter()
        .map(|(piece, _)| *piece)
        .collect::<Vec<_>>()
        .join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        target.push(trimmed.to_string());
    }
}
