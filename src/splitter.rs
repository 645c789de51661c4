//! Text chunking strategies.
//!
//! Splits loaded documents into bounded, overlapping [`Chunk`]s ahead of
//! embedding. Four strategies are supported:
//!
//! - **recursive** — try separators from paragraph down to single
//!   characters, only falling back when a unit still exceeds `chunk_size`;
//! - **character** — split on paragraph boundaries only, no fallback;
//! - **token** — same separator cascade, but sized in estimated token
//!   units (~4 chars per token) instead of characters;
//! - **sentence** — split on sentence punctuation and greedily pack whole
//!   sentences up to `chunk_size` (never overlapped).
//!
//! Splitting is pure and deterministic: the same input and parameters
//! always yield the same chunk sequence, and concatenating the produced
//! chunks (minus overlap prefixes) reconstructs the input exactly.

use std::collections::HashMap;

use serde::Deserialize;

use crate::models::{Chunk, LoadedDocument};

/// Approximate chars-per-token ratio used by the token strategy.
const CHARS_PER_TOKEN: usize = 4;

/// Separator cascade for the recursive and token strategies, largest first.
const RECURSIVE_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Selectable chunking strategy, fixed at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    #[default]
    Recursive,
    Character,
    Token,
    Sentence,
}

/// How chunk size is measured for a given strategy.
#[derive(Debug, Clone, Copy)]
enum Measure {
    Chars,
    Tokens,
}

impl Measure {
    fn of(&self, text: &str) -> usize {
        let chars = text.chars().count();
        match self {
            Measure::Chars => chars,
            Measure::Tokens => chars.div_ceil(CHARS_PER_TOKEN),
        }
    }

    /// Character budget equivalent to `max` units of this measure.
    fn char_budget(&self, max: usize) -> usize {
        match self {
            Measure::Chars => max,
            Measure::Tokens => max * CHARS_PER_TOKEN,
        }
    }
}

/// Splits documents into chunks using a fixed strategy and size settings.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    strategy: ChunkingStrategy,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    pub fn new(strategy: ChunkingStrategy, chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            strategy,
            chunk_size,
            chunk_overlap,
        }
    }

    /// Split a batch of loaded documents into chunks.
    ///
    /// `chunk_index` is assigned per source file (0-based, increasing), so
    /// a multi-page file keeps a single index sequence across its pages.
    /// Empty documents contribute no chunks.
    pub fn split_documents(&self, documents: &[LoadedDocument]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut next_index: HashMap<String, i32> = HashMap::new();

        for doc in documents {
            for text in self.split_text(&doc.content) {
                let index = next_index.entry(doc.source_file.clone()).or_insert(0);
                let size = text.chars().count();
                chunks.push(Chunk {
                    text,
                    source_file: doc.source_file.clone(),
                    page_number: doc.page_number,
                    title: doc.title.clone(),
                    chunk_index: *index,
                    size,
                });
                *index += 1;
            }
        }

        chunks
    }

    /// Split a single text into chunk strings. Empty input yields an
    /// empty sequence, not an error.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }

        match self.strategy {
            ChunkingStrategy::Recursive => {
                let base =
                    split_cascade(text, &RECURSIVE_SEPARATORS, self.chunk_size, Measure::Chars);
                apply_overlap(base, self.chunk_overlap)
            }
            ChunkingStrategy::Character => {
                // Single separator, no fallback: oversized paragraphs pass
                // through whole.
                let pieces = split_keeping(text, "\n\n");
                let base = merge_pieces(pieces, self.chunk_size, Measure::Chars);
                apply_overlap(base, self.chunk_overlap)
            }
            ChunkingStrategy::Token => {
                split_cascade(text, &RECURSIVE_SEPARATORS, self.chunk_size, Measure::Tokens)
            }
            ChunkingStrategy::Sentence => pack_sentences(text, self.chunk_size),
        }
    }
}

/// Statistics over a chunk sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkStats {
    pub total: usize,
    pub avg_size: f64,
    pub min_size: usize,
    pub max_size: usize,
}

/// Compute `{total, avg, min, max}` over chunk sizes; all zero on empty
/// input.
pub fn chunk_stats(chunks: &[Chunk]) -> ChunkStats {
    if chunks.is_empty() {
        return ChunkStats {
            total: 0,
            avg_size: 0.0,
            min_size: 0,
            max_size: 0,
        };
    }

    let sizes: Vec<usize> = chunks.iter().map(|c| c.size).collect();
    let sum: usize = sizes.iter().sum();

    ChunkStats {
        total: chunks.len(),
        avg_size: sum as f64 / chunks.len() as f64,
        min_size: *sizes.iter().min().unwrap(),
        max_size: *sizes.iter().max().unwrap(),
    }
}

/// Split on the first applicable separator, recursing into oversized
/// pieces with the remaining (smaller) separators, then greedily merge
/// adjacent pieces back up to `max` units.
///
/// Separators stay attached to the preceding piece, so concatenating the
/// output reproduces the input byte for byte.
fn split_cascade(text: &str, separators: &[&str], max: usize, measure: Measure) -> Vec<String> {
    if measure.of(text) <= max {
        return vec![text.to_string()];
    }

    let sep_pos = separators
        .iter()
        .position(|s| s.is_empty() || text.contains(s));

    let (sep, rest) = match sep_pos {
        Some(i) => (separators[i], &separators[i + 1..]),
        None => return vec![text.to_string()],
    };

    let pieces: Vec<String> = if sep.is_empty() {
        char_groups(text, measure.char_budget(max))
    } else {
        split_keeping(text, sep)
            .into_iter()
            .map(str::to_string)
            .collect()
    };

    let mut splits = Vec::new();
    for piece in pieces {
        if measure.of(&piece) > max && !rest.is_empty() {
            splits.extend(split_cascade(&piece, rest, max, measure));
        } else {
            splits.push(piece);
        }
    }

    merge_pieces(splits, max, measure)
}

/// Split `text` on `sep`, keeping the separator attached to the preceding
/// piece. Concatenation of the result equals the input.
fn split_keeping<'a>(text: &'a str, sep: &str) -> Vec<&'a str> {
    let mut out = Vec::new();
    let mut start = 0;

    while let Some(pos) = text[start..].find(sep) {
        let end = start + pos + sep.len();
        out.push(&text[start..end]);
        start = end;
    }

    if start < text.len() {
        out.push(&text[start..]);
    }
    if out.is_empty() {
        out.push(text);
    }

    out
}

/// Split into groups of at most `max_chars` characters (char-boundary
/// safe). Last resort when no separator applies.
fn char_groups(text: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut count = 0;

    for ch in text.chars() {
        if count == max_chars {
            out.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(ch);
        count += 1;
    }
    if !current.is_empty() {
        out.push(current);
    }

    out
}

/// Greedily concatenate adjacent pieces while the combined size stays at
/// or under `max` units. Pieces already over the limit pass through.
fn merge_pieces<S: AsRef<str>>(pieces: Vec<S>, max: usize, measure: Measure) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();

    for piece in &pieces {
        let piece = piece.as_ref();
        if current.is_empty() {
            current.push_str(piece);
            continue;
        }

        let mut candidate = String::with_capacity(current.len() + piece.len());
        candidate.push_str(&current);
        candidate.push_str(piece);

        if measure.of(&candidate) <= max {
            current = candidate;
        } else {
            out.push(std::mem::take(&mut current));
            current.push_str(piece);
        }
    }

    if !current.is_empty() {
        out.push(current);
    }

    out
}

/// Prefix each chunk after the first with the trailing `overlap`
/// characters of its predecessor (taken from the un-overlapped base).
fn apply_overlap(base: Vec<String>, overlap: usize) -> Vec<String> {
    if overlap == 0 || base.len() < 2 {
        return base;
    }

    let mut out = Vec::with_capacity(base.len());
    for (i, chunk) in base.iter().enumerate() {
        if i == 0 {
            out.push(chunk.clone());
        } else {
            let tail = last_chars(&base[i - 1], overlap);
            out.push(format!("{}{}", tail, chunk));
        }
    }

    out
}

/// The last `n` characters of `s` (char-boundary safe).
fn last_chars(s: &str, n: usize) -> &str {
    let count = s.chars().count();
    if count <= n {
        return s;
    }
    let skip = count - n;
    match s.char_indices().nth(skip) {
        Some((byte_idx, _)) => &s[byte_idx..],
        None => s,
    }
}

/// Split on sentence boundaries (`.`, `!`, `?` followed by whitespace) and
/// greedily pack whole sentences until adding the next one would exceed
/// `chunk_size`. Sentences are joined with single spaces; no overlap.
fn pack_sentences(text: &str, chunk_size: usize) -> Vec<String> {
    let sentences = split_sentences(text);

    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_size = 0;

    for sentence in &sentences {
        let sentence_size = sentence.chars().count();

        if current_size + sentence_size > chunk_size && !current.is_empty() {
            chunks.push(current.join(" "));
            current.clear();
            current_size = 0;
        }

        current.push(sentence);
        current_size += sentence_size;
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    chunks
}

/// Split text into sentences: a sentence ends at `.`, `!`, or `?` when
/// followed by whitespace. The terminating punctuation stays with the
/// sentence; the inter-sentence whitespace is dropped.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev_was_terminal = false;

    for (idx, ch) in text.char_indices() {
        if prev_was_terminal && ch.is_whitespace() {
            sentences.push(&text[start..idx]);
            start = idx + ch.len_utf8();
            prev_was_terminal = false;
            continue;
        }
        // Skip any further whitespace runs between sentences.
        if start == idx && ch.is_whitespace() {
            start = idx + ch.len_utf8();
            continue;
        }
        prev_was_terminal = matches!(ch, '.' | '!' | '?');
    }

    if start < text.len() {
        let tail = text[start..].trim_end();
        if !tail.is_empty() {
            sentences.push(tail);
        }
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str, content: &str) -> LoadedDocument {
        LoadedDocument {
            source_file: name.to_string(),
            page_number: 0,
            title: name.to_string(),
            content: content.to_string(),
        }
    }

    fn splitter(strategy: ChunkingStrategy, size: usize, overlap: usize) -> TextSplitter {
        TextSplitter::new(strategy, size, overlap)
    }

    #[test]
    fn recursive_reconstructs_input_without_overlap() {
        let text = "First paragraph here.\n\nSecond paragraph is a bit longer than the first.\n\nThird one.\nWith a second line.";
        let chunks = splitter(ChunkingStrategy::Recursive, 30, 0).split_text(text);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn character_reconstructs_input_without_overlap() {
        let text = "Alpha.\n\nBeta.\n\nGamma paragraph with more content.\n\nDelta.";
        let chunks = splitter(ChunkingStrategy::Character, 20, 0).split_text(text);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn token_reconstructs_input() {
        let text = "one two three four five six seven eight nine ten ".repeat(20);
        let chunks = splitter(ChunkingStrategy::Token, 10, 0).split_text(&text);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), text);
        // 10 tokens ~= 40 chars per chunk
        for c in &chunks {
            assert!(c.chars().count() <= 10 * CHARS_PER_TOKEN);
        }
    }

    #[test]
    fn overlap_prefixes_come_from_previous_chunk() {
        let text = "aaaa bbbb cccc dddd eeee ffff gggg hhhh";
        let base = splitter(ChunkingStrategy::Recursive, 10, 0).split_text(text);
        let overlapped = splitter(ChunkingStrategy::Recursive, 10, 3).split_text(text);

        assert_eq!(base.len(), overlapped.len());
        assert_eq!(base[0], overlapped[0]);
        for i in 1..base.len() {
            let tail = last_chars(&base[i - 1], 3);
            assert_eq!(overlapped[i], format!("{}{}", tail, base[i]));
        }

        // Stripping the overlap prefixes reconstructs the original.
        let mut rebuilt = overlapped[0].clone();
        for i in 1..overlapped.len() {
            let prefix_len = last_chars(&base[i - 1], 3).chars().count();
            let stripped: String = overlapped[i].chars().skip(prefix_len).collect();
            rebuilt.push_str(&stripped);
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn sentence_strategy_packs_whole_sentences() {
        let text = "Short one. Another short. This sentence is somewhat longer than the others. End.";
        let chunks = splitter(ChunkingStrategy::Sentence, 30, 0).split_text(text);
        assert!(chunks.len() > 1);
        // Every chunk ends with terminal punctuation — sentences are never
        // cut in the middle.
        for c in &chunks {
            let last = c.chars().last().unwrap();
            assert!(matches!(last, '.' | '!' | '?'), "chunk {:?}", c);
        }
    }

    #[test]
    fn sentence_strategy_ignores_overlap() {
        let text = "One sentence here. Two sentences here. Three sentences here.";
        let with = splitter(ChunkingStrategy::Sentence, 25, 10).split_text(text);
        let without = splitter(ChunkingStrategy::Sentence, 25, 0).split_text(text);
        assert_eq!(with, without);
    }

    #[test]
    fn oversized_paragraph_passes_through_in_character_mode() {
        let long = "x".repeat(50);
        let text = format!("short\n\n{}\n\nshort again", long);
        let chunks = splitter(ChunkingStrategy::Character, 20, 0).split_text(&text);
        assert!(chunks.iter().any(|c| c.chars().count() > 20));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn empty_document_yields_no_chunks() {
        let s = splitter(ChunkingStrategy::Recursive, 100, 10);
        assert!(s.split_text("").is_empty());
        assert!(s.split_documents(&[doc("empty.txt", "")]).is_empty());
    }

    #[test]
    fn chunk_indices_increase_from_zero_per_source_file() {
        let s = splitter(ChunkingStrategy::Recursive, 15, 0);
        let docs = vec![
            doc("a.txt", "para one\n\npara two\n\npara three"),
            doc("b.txt", "other one\n\nother two"),
        ];
        let chunks = s.split_documents(&docs);

        for file in ["a.txt", "b.txt"] {
            let indices: Vec<i32> = chunks
                .iter()
                .filter(|c| c.source_file == file)
                .map(|c| c.chunk_index)
                .collect();
            assert!(!indices.is_empty());
            for (expected, got) in indices.iter().enumerate() {
                assert_eq!(*got, expected as i32);
            }
        }
    }

    #[test]
    fn multi_page_file_keeps_one_index_sequence() {
        let s = splitter(ChunkingStrategy::Recursive, 15, 0);
        let mut page2 = doc("report.pdf", "second page\n\nmore text");
        page2.page_number = 2;
        let docs = vec![doc("report.pdf", "first page\n\nsome text"), page2];

        let chunks = s.split_documents(&docs);
        let indices: Vec<i32> = chunks.iter().map(|c| c.chunk_index).collect();
        let expected: Vec<i32> = (0..chunks.len() as i32).collect();
        assert_eq!(indices, expected);
    }

    #[test]
    fn splitting_is_deterministic() {
        let text = "Alpha beta gamma.\n\nDelta epsilon zeta.\n\nEta theta iota kappa.";
        let s = splitter(ChunkingStrategy::Recursive, 25, 5);
        let a = s.split_documents(&[doc("d.txt", text)]);
        let b = s.split_documents(&[doc("d.txt", text)]);
        assert_eq!(a, b);
    }

    #[test]
    fn stats_on_empty_input_are_zero() {
        let stats = chunk_stats(&[]);
        assert_eq!(
            stats,
            ChunkStats {
                total: 0,
                avg_size: 0.0,
                min_size: 0,
                max_size: 0
            }
        );
    }

    #[test]
    fn stats_ordering_min_avg_max() {
        let s = splitter(ChunkingStrategy::Recursive, 20, 0);
        let chunks = s.split_documents(&[doc(
            "d.txt",
            "tiny\n\na medium paragraph\n\nthe longest paragraph of them all",
        )]);
        let stats = chunk_stats(&chunks);
        assert_eq!(stats.total, chunks.len());
        assert!(stats.min_size as f64 <= stats.avg_size);
        assert!(stats.avg_size <= stats.max_size as f64);
    }

    #[test]
    fn recorded_size_matches_text_length() {
        let s = splitter(ChunkingStrategy::Recursive, 25, 0);
        let chunks = s.split_documents(&[doc("d.txt", "some text\n\nmore text here")]);
        for c in &chunks {
            assert_eq!(c.size, c.text.chars().count());
        }
    }

    #[test]
    fn single_small_document_is_one_chunk() {
        let s = splitter(ChunkingStrategy::Recursive, 1000, 200);
        let chunks =
            s.split_documents(&[doc("policy.txt", "Employees get 20 vacation days per year.")]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Employees get 20 vacation days per year.");
    }

    #[test]
    fn sentence_split_handles_all_terminators() {
        let got = split_sentences("Really? Yes! Good. Done");
        assert_eq!(got, vec!["Really?", "Yes!", "Good.", "Done"]);
    }
}
