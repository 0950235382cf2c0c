//! Chunking - split segment text into synthesis-sized pieces.
//!
//! Sentence boundaries: `. ! ? \u{61f} \u{3002}` followed by whitespace.
//! Breath boundaries: `, \u{60c} ; \u{61b} :` followed by whitespace.
//! Adjacent small units merge greedily; oversized units are hard-split
//! at the last whitespace inside the cap, or at the cap when a unit has
//! no internal whitespace.

use crate::project::config::ChunkStrategy;

const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', '\u{61f}', '\u{3002}'];
const BREATH_TERMINATORS: &[char] = &[',', '\u{60c}', ';', '\u{61b}', ':'];

/// Split text at terminator-then-whitespace boundaries, keeping the
/// terminator with the left part.
fn split_after(text: &str, terminators: &[char]) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if terminators.contains(&c) {
            if let Some(next) = chars.peek() {
                if next.is_whitespace() {
                    let trimmed = current.trim();
                    if !trimmed.is_empty() {
                        parts.push(trimmed.to_string());
                    }
                    current.clear();
                }
            }
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        parts.push(trimmed.to_string());
    }
    parts
}

/// Split text into sentences.
pub fn split_sentences(text: &str) -> Vec<String> {
    split_after(text.trim(), SENTENCE_TERMINATORS)
}

/// Split text into breath groups: sentence split first, then clause
/// punctuation within each sentence.
pub fn split_breath_groups(text: &str) -> Vec<String> {
    split_sentences(text)
        .iter()
        .flat_map(|sentence| split_after(sentence, BREATH_TERMINATORS))
        .collect()
}

/// Split text into chunks respecting `max_chars`.
///
/// Every produced chunk is non-empty and at most `max_chars` characters,
/// except a single token with no internal whitespace which cannot be
/// split further.
pub fn chunk_text(text: &str, max_chars: usize, strategy: ChunkStrategy) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let units = match strategy {
        ChunkStrategy::BreathGroup => split_breath_groups(text),
        ChunkStrategy::Sentence => split_sentences(text),
        ChunkStrategy::Fixed => return hard_split(text, max_chars),
    };

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for unit in units {
        if unit.chars().count() > max_chars {
            // Oversized unit: flush the accumulator, then hard-split.
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.extend(hard_split(&unit, max_chars));
            continue;
        }

        if current.is_empty() {
            current = unit;
        } else if current.chars().count() + 1 + unit.chars().count() <= max_chars {
            current.push(' ');
            current.push_str(&unit);
        } else {
            chunks.push(std::mem::take(&mut current));
            current = unit;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Hard split at `max_chars`, preferring the last whitespace inside the
/// cap. Used when no natural break point exists.
fn hard_split(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining: Vec<char> = text.trim().chars().collect();

    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            let tail: String = remaining.iter().collect();
            let tail = tail.trim().to_string();
            if !tail.is_empty() {
                chunks.push(tail);
            }
            break;
        }

        let window = &remaining[..max_chars];
        let split_pos = window
            .iter()
            .rposition(|c| c.is_whitespace())
            .filter(|&p| p > 0)
            .unwrap_or(max_chars);

        let head: String = remaining[..split_pos].iter().collect();
        let head = head.trim().to_string();
        if !head.is_empty() {
            chunks.push(head);
        }

        remaining.drain(..split_pos);
        while remaining.first().map(|c| c.is_whitespace()).unwrap_or(false) {
            remaining.remove(0);
        }
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentences_split_on_terminators() {
        let parts = split_sentences("One. Two! Three? Done");
        assert_eq!(parts, vec!["One.", "Two!", "Three?", "Done"]);
    }

    #[test]
    fn arabic_terminators_split() {
        let parts = split_sentences("\u{623}\u{647}\u{644}\u{627}\u{61f} \u{646}\u{639}\u{645}.");
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn breath_groups_split_clauses() {
        let parts = split_breath_groups("First, second; third: fourth. Next.");
        assert_eq!(parts, vec!["First,", "second;", "third:", "fourth.", "Next."]);
    }

    #[test]
    fn small_units_merge_into_one_chunk() {
        // Short clauses all fit inside the cap - one chunk out.
        let chunks = chunk_text("A, B, C, D, E.", 200, ChunkStrategy::BreathGroup);
        assert_eq!(chunks, vec!["A, B, C, D, E."]);
    }

    #[test]
    fn fixed_strategy_hard_splits() {
        let text = "X".repeat(500);
        let chunks = chunk_text(&text, 200, ChunkStrategy::Fixed);

        let lens: Vec<usize> = chunks.iter().map(|c| c.chars().count()).collect();
        assert_eq!(lens, vec![200, 200, 100]);
    }

    #[test]
    fn every_chunk_respects_the_cap() {
        let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit, \
                    sed do eiusmod tempor incididunt ut labore et dolore magna aliqua. "
            .repeat(10);
        for strategy in [
            ChunkStrategy::BreathGroup,
            ChunkStrategy::Sentence,
            ChunkStrategy::Fixed,
        ] {
            for chunk in chunk_text(&text, 80, strategy) {
                assert!(
                    chunk.chars().count() <= 80 || !chunk.contains(char::is_whitespace),
                    "oversized chunk: {:?}",
                    chunk
                );
                assert!(!chunk.trim().is_empty());
            }
        }
    }

    #[test]
    fn chunks_cover_the_input() {
        let text = "One two three, four five. Six seven eight nine ten!";
        let chunks = chunk_text(text, 20, ChunkStrategy::BreathGroup);

        let rejoined = chunks.join(" ");
        let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
        assert_eq!(normalize(&rejoined), normalize(text));
    }

    #[test]
    fn oversized_unit_prefers_word_boundary() {
        let text = "word ".repeat(60); // 300 chars, no clause punctuation
        let chunks = chunk_text(text.trim(), 100, ChunkStrategy::BreathGroup);

        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 100);
            assert!(!chunk.starts_with(' ') && !chunk.ends_with(' '));
        }
    }

    #[test]
    fn unbroken_token_splits_at_cap() {
        let token = "\u{645}".to_string().repeat(450);
        let chunks = hard_split(&token, 200);
        let lens: Vec<usize> = chunks.iter().map(|c| c.chars().count()).collect();
        assert_eq!(lens, vec![200, 200, 50]);
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_text("", 200, ChunkStrategy::BreathGroup).is_empty());
        assert!(chunk_text("   \n ", 200, ChunkStrategy::Sentence).is_empty());
    }
}
