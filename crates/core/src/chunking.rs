use crate::config::RagConfig;
use crate::error::IngestError;
use crate::extractor::PageRecord;
use crate::models::Chunk;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::OnceLock;

/// Boundaries tried in order, from paragraph down to a hard character cut.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, IngestError> {
        if chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_overlap {chunk_overlap} must be smaller than chunk_size {chunk_size}"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }
}

impl TryFrom<&RagConfig> for ChunkingConfig {
    type Error = IngestError;

    fn try_from(value: &RagConfig) -> Result<Self, Self::Error> {
        Self::new(value.chunk_size, value.chunk_overlap)
    }
}

fn horizontal_space() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t\u{a0}\u{000c}]+").expect("static regex"))
}

fn blank_lines() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n\s*").expect("static regex"))
}

/// Collapses runs of spaces and blank lines while keeping paragraph and line breaks.
pub fn clean_page_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let spaced = horizontal_space().replace_all(&unified, " ");
    let lines = spaced
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");
    blank_lines().replace_all(&lines, "\n\n").trim().to_string()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Splits `text` into pieces of at most `chunk_size` characters, overlapping by
/// up to `chunk_overlap` characters.
pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    split_with(text, &SEPARATORS, config)
}

fn split_with(text: &str, separators: &[&str], config: ChunkingConfig) -> Vec<String> {
    let position = separators
        .iter()
        .position(|separator| separator.is_empty() || text.contains(separator))
        .unwrap_or(separators.len().saturating_sub(1));
    let separator = separators.get(position).copied().unwrap_or("");
    let remaining = &separators[(position + 1).min(separators.len())..];

    let pieces: Vec<String> = if separator.is_empty() {
        text.chars().map(String::from).collect()
    } else {
        text.split(separator)
            .filter(|piece| !piece.is_empty())
            .map(str::to_string)
            .collect()
    };

    let mut output = Vec::new();
    let mut pending = Vec::new();

    for piece in pieces {
        if char_len(&piece) < config.chunk_size {
            pending.push(piece);
            continue;
        }

        if !pending.is_empty() {
            output.extend(merge_pieces(&pending, separator, config));
            pending.clear();
        }

        if remaining.is_empty() {
            output.push(piece);
        } else {
            output.extend(split_with(&piece, remaining, config));
        }
    }

    if !pending.is_empty() {
        output.extend(merge_pieces(&pending, separator, config));
    }

    output
}

fn merge_pieces(pieces: &[String], separator: &str, config: ChunkingConfig) -> Vec<String> {
    let separator_len = char_len(separator);
    let mut merged = Vec::new();
    let mut window: VecDeque<(&str, usize)> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = char_len(piece);
        let joiner = if window.is_empty() { 0 } else { separator_len };

        if total + len + joiner > config.chunk_size && !window.is_empty() {
            push_joined(&mut merged, &window, separator);

            loop {
                let joiner = if window.is_empty() { 0 } else { separator_len };
                let overflows = total > 0 && total + len + joiner > config.chunk_size;
                if total <= config.chunk_overlap && !overflows {
                    break;
                }
                let Some((_, dropped)) = window.pop_front() else {
                    break;
                };
                total -= dropped + if window.is_empty() { 0 } else { separator_len };
            }
        }

        let joiner = if window.is_empty() { 0 } else { separator_len };
        window.push_back((piece.as_str(), len));
        total += len + joiner;
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

/// Chunks every page separately so each chunk keeps a single source page.
pub fn build_chunks(pages: &[PageRecord], config: ChunkingConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut cursor = 0u64;

    for page in pages {
        let cleaned = clean_page_text(&page.text);
        if cleaned.is_empty() {
            continue;
        }

        for text in split_text(&cleaned, config) {
            chunks.push(Chunk {
                chunk_id: make_chunk_id(page.number, cursor, &text),
                chunk_index: cursor,
                source_page: page.number,
                text,
            });
            cursor = cursor.saturating_add(1);
        }
    }

    chunks
}

fn make_chunk_id(page: u32, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(page.to_le_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(number: u32, text: &str) -> PageRecord {
        PageRecord {
            number,
            text: text.to_string(),
        }
    }

    #[test]
    fn page_text_keeps_paragraph_breaks() {
        let input = "A  \t  lot\r\nof   spacing\n\n\n\nNext   paragraph";
        assert_eq!(clean_page_text(input), "A lot\nof spacing\n\nNext paragraph");
    }

    #[test]
    fn overlap_not_smaller_than_size_is_rejected() {
        assert!(ChunkingConfig::new(10, 10).is_err());
        assert!(ChunkingConfig::new(0, 0).is_err());
        assert!(ChunkingConfig::new(10, 3).is_ok());
    }

    #[test]
    fn short_page_yields_exactly_one_chunk() {
        let config = ChunkingConfig::new(1_000, 200).unwrap();
        let chunks = build_chunks(&[page(0, "Photosynthesis converts light.")], config);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Photosynthesis converts light.");
        assert_eq!(chunks[0].source_page, 0);
    }

    #[test]
    fn hard_cuts_overlap_exactly() {
        let config = ChunkingConfig::new(10, 3).unwrap();
        let pieces = split_text("abcdefghijklmnopqrstuvwxyz", config);

        assert!(pieces.len() > 1);
        assert_eq!(pieces[0], "abcdefghij");
        for pair in pieces.windows(2) {
            let tail: String = pair[0].chars().skip(pair[0].chars().count() - 3).collect();
            let head: String = pair[1].chars().take(3).collect();
            assert_eq!(tail, head);
        }
        assert!(pieces.iter().all(|piece| piece.chars().count() <= 10));
        assert!(pieces.last().unwrap().ends_with('z'));
    }

    #[test]
    fn words_are_not_split_when_spaces_exist() {
        let config = ChunkingConfig::new(20, 5).unwrap();
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let pieces = split_text(text, config);

        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(piece.chars().count() <= 20);
            for word in piece.split(' ') {
                assert!(text.split(' ').any(|original| original == word));
            }
        }
    }

    #[test]
    fn paragraphs_are_preferred_boundaries() {
        let config = ChunkingConfig::new(30, 5).unwrap();
        let text = "First paragraph here.\n\nSecond paragraph here.";
        let pieces = split_text(text, config);
        assert_eq!(pieces, vec!["First paragraph here.", "Second paragraph here."]);
    }

    #[test]
    fn chunk_indexes_follow_emission_order_across_pages() {
        let config = ChunkingConfig::new(12, 2).unwrap();
        let pages = vec![
            page(0, "one two three four"),
            page(1, "   "),
            page(2, "five six"),
        ];
        let chunks = build_chunks(&pages, config);

        assert!(chunks.len() >= 3);
        for (position, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, position as u64);
            assert!(!chunk.text.is_empty());
            assert_ne!(chunk.source_page, 1);
        }
        assert_eq!(chunks.last().unwrap().source_page, 2);
    }

    #[test]
    fn chunk_ids_are_stable() {
        let config = ChunkingConfig::new(100, 10).unwrap();
        let pages = vec![page(0, "stable text")];
        let first = build_chunks(&pages, config);
        let second = build_chunks(&pages, config);
        assert_eq!(first, second);
    }
}
