//! Paragraph-boundary block splitter.
//!
//! Converter blocks are usually one page each. A page longer than
//! `max_tokens` is split on paragraph boundaries (`\n\n`), falling back to
//! line and word boundaries for oversized paragraphs. Every piece keeps the
//! filename and page label of its block so grounding can find the page again.

use uuid::Uuid;

use crate::models::{Chunk, ExtractedMetadata, TextBlock};

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split every block of `filename` into chunks tagged with `metadata`.
pub fn chunk_blocks(
    filename: &str,
    blocks: &[TextBlock],
    metadata: &ExtractedMetadata,
    max_tokens: usize,
) -> Vec<Chunk> {
    blocks
        .iter()
        .flat_map(|block| {
            split_text(&block.text, max_tokens)
                .into_iter()
                .map(move |text| Chunk {
                    id: Uuid::new_v4().to_string(),
                    filename: filename.to_string(),
                    page_label: block.page_label.clone(),
                    text,
                    metadata: metadata.clone(),
                })
        })
        .collect()
}

/// Split text into pieces of at most `max_tokens` (approximate) each.
/// Empty input yields no pieces.
pub fn split_text(text: &str, max_tokens: usize) -> Vec<String> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut pieces = Vec::new();
    let mut current = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current.is_empty() {
            trimmed.len()
        } else {
            current.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }

        if trimmed.len() > max_chars {
            hard_split(trimmed, max_chars, &mut pieces);
        } else {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(trimmed);
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
}

/// Split an oversized paragraph at newline or space boundaries.
fn hard_split(mut remaining: &str, max_chars: usize, out: &mut Vec<String>) {
    while !remaining.is_empty() {
        let mut split_at = remaining.len().min(max_chars);
        while !remaining.is_char_boundary(split_at) {
            split_at -= 1;
        }
        if split_at == 0 {
            // A single char wider than max_chars.
            split_at = remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len());
        }

        let actual = if split_at < remaining.len() {
            remaining[..split_at]
                .rfind('\n')
                .or_else(|| remaining[..split_at].rfind(' '))
                .filter(|&pos| pos > 0)
                .map(|pos| pos + 1)
                .unwrap_or(split_at)
        } else {
            split_at
        };

        let piece = remaining[..actual].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = &remaining[actual..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_text_single_piece() {
        assert_eq!(split_text("Hello, world!", 700), vec!["Hello, world!"]);
    }

    #[test]
    fn empty_text_has_no_pieces() {
        assert!(split_text("", 700).is_empty());
        assert!(split_text("\n\n  \n\n", 700).is_empty());
    }

    #[test]
    fn paragraphs_under_limit_stay_together() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let pieces = split_text(text, 700);
        assert_eq!(pieces.len(), 1);
        assert!(pieces[0].contains("First paragraph."));
        assert!(pieces[0].contains("Third paragraph."));
    }

    #[test]
    fn paragraphs_over_limit_split() {
        // max_tokens=5 => max_chars=20
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        let pieces = split_text(text, 5);
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(piece.len() <= 24, "piece too long: {:?}", piece);
        }
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let text = "合同".repeat(40);
        let pieces = split_text(&text, 2);
        assert!(pieces.len() > 1);
        assert_eq!(pieces.concat(), text);
    }

    #[test]
    fn chunks_keep_page_label_and_metadata() {
        let blocks = vec![
            TextBlock::new("page one", "1"),
            TextBlock::new("alpha beta gamma delta epsilon zeta eta theta", "2"),
        ];
        let meta = ExtractedMetadata::fallback();
        let chunks = chunk_blocks("doc.pdf", &blocks, &meta, 3);

        assert!(chunks.len() > 2);
        assert_eq!(chunks[0].page_label, "1");
        assert!(chunks[1..].iter().all(|c| c.page_label == "2"));
        assert!(chunks.iter().all(|c| c.filename == "doc.pdf"));
        assert!(chunks.iter().all(|c| c.metadata == meta));
    }
}
