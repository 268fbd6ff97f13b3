//! Token-bounded chunking.
//!
//! Text is split semantically with `text-splitter` at a character capacity
//! derived from the token budget. If any chunk still costs more tokens than
//! allowed, the capacity is halved and the split retried a bounded number of
//! times; whatever is still oversized afterwards is cut at token boundaries.
//! Every passage the [`Chunker`] returns therefore fits the budget.
//!
//! Layout documents keep provenance: each passage records the page of its first
//! span and the union of that page's span rectangles it overlaps.

use crate::rag::bbox::BoxAccumulator;
use crate::rag::loader::ParsedDocument;
use crate::rag::tokenizer::TokenCounter;
use crate::types::{AppError, DocType, Passage, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use text_splitter::{ChunkConfig, TextSplitter};

/// Smallest accepted token budget. Byte-level BPE may spend one token per
/// UTF-8 byte, so a single character can cost up to four.
pub const MIN_MAX_TOKENS: usize = 4;

/// Chunking parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Hard per-passage token limit.
    pub max_tokens: usize,
    /// Characters-per-token ratio used to size the first split attempt.
    pub chars_per_token: f32,
    /// Split attempts before falling back to token-boundary cuts.
    pub max_attempts: u32,
    /// Overlap between neighbouring chunks, in tokens. 0 disables overlap.
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            chars_per_token: 4.0,
            max_attempts: 3,
            overlap_tokens: 0,
        }
    }
}

/// A chunk of the input and its byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextPiece<'a> {
    /// Byte offset of `text` in the input.
    pub offset: usize,
    /// The chunk, borrowed from the input.
    pub text: &'a str,
}

impl TextPiece<'_> {
    fn end(&self) -> usize {
        self.offset + self.text.len()
    }
}

/// Splits text and layout documents into passages within a token budget.
pub struct Chunker {
    config: ChunkerConfig,
    counter: Arc<dyn TokenCounter>,
}

impl Chunker {
    /// Validate `config` and bind it to a token counter.
    pub fn new(config: ChunkerConfig, counter: Arc<dyn TokenCounter>) -> Result<Self> {
        if config.max_tokens < MIN_MAX_TOKENS {
            return Err(AppError::Configuration(format!(
                "max_tokens must be at least {}",
                MIN_MAX_TOKENS
            )));
        }
        if !(config.chars_per_token.is_finite() && config.chars_per_token > 0.0) {
            return Err(AppError::Configuration(
                "chars_per_token must be a positive number".to_string(),
            ));
        }
        if config.max_attempts == 0 {
            return Err(AppError::Configuration(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if config.overlap_tokens >= config.max_tokens {
            return Err(AppError::Configuration(
                "overlap_tokens must be smaller than max_tokens".to_string(),
            ));
        }
        Ok(Self { config, counter })
    }

    /// Active parameters.
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    fn fits(&self, text: &str) -> bool {
        self.counter.count(text) <= self.config.max_tokens
    }

    fn initial_capacity(&self) -> usize {
        ((self.config.max_tokens as f32 * self.config.chars_per_token) as usize).max(1)
    }

    fn semantic_split<'a>(&self, text: &'a str, capacity: usize) -> Vec<TextPiece<'a>> {
        let overlap =
            (self.config.overlap_tokens as f32 * self.config.chars_per_token) as usize;
        let base = || ChunkConfig::new(capacity).with_trim(true);
        let config = if overlap > 0 && overlap < capacity {
            base().with_overlap(overlap).unwrap_or_else(|_| base())
        } else {
            base()
        };

        TextSplitter::new(config)
            .chunk_indices(text)
            .map(|(offset, text)| TextPiece { offset, text })
            .collect()
    }

    /// Split `text` into pieces that each fit the token budget, in source order.
    pub fn split<'a>(&self, text: &'a str) -> Vec<TextPiece<'a>> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut capacity = self.initial_capacity();
        let mut pieces = Vec::new();
        for attempt in 1..=self.config.max_attempts {
            pieces = self.semantic_split(text, capacity);
            let oversized = pieces.iter().filter(|p| !self.fits(p.text)).count();
            if oversized == 0 {
                return pieces;
            }
            tracing::debug!(
                attempt,
                capacity,
                oversized,
                "chunks over token budget, shrinking capacity"
            );
            capacity = (capacity / 2).max(1);
        }

        let mut out = Vec::with_capacity(pieces.len());
        for piece in pieces {
            if self.fits(piece.text) {
                out.push(piece);
            } else {
                self.force_split(piece, &mut out);
            }
        }
        out
    }

    /// Cut an oversized piece into token-bounded prefixes.
    fn force_split<'a>(&self, piece: TextPiece<'a>, out: &mut Vec<TextPiece<'a>>) {
        let mut rest = piece.text;
        let mut offset = piece.offset;

        while !rest.is_empty() {
            if self.fits(rest) {
                out.push(TextPiece { offset, text: rest });
                return;
            }

            let cut = self.longest_fitting_prefix(rest);
            let head = &rest[..cut];
            if !head.trim().is_empty() {
                out.push(TextPiece { offset, text: head });
            }

            let tail = &rest[cut..];
            let trimmed = tail.trim_start();
            offset += cut + (tail.len() - trimmed.len());
            rest = trimmed;
        }
    }

    /// Byte length of the longest char-boundary prefix within budget. Always
    /// advances by at least one character.
    fn longest_fitting_prefix(&self, text: &str) -> usize {
        let ends: Vec<usize> = text
            .char_indices()
            .skip(1)
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();

        let mut best = ends[0];
        let (mut lo, mut hi) = (0usize, ends.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.fits(&text[..ends[mid]]) {
                best = ends[mid];
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        best
    }

    /// Chunk plain text. Passages carry no page or bbox.
    pub fn chunk_text(&self, doc_path: &str, doc_type: DocType, text: &str) -> Vec<Passage> {
        self.split(text)
            .into_iter()
            .enumerate()
            .map(|(idx, piece)| Passage {
                id: Passage::make_id(doc_path, idx),
                doc_path: doc_path.to_string(),
                doc_type,
                chunk_index: idx,
                text: piece.text.to_string(),
                page_number: None,
                bbox: None,
            })
            .collect()
    }

    /// Chunk a layout document, attaching page and bbox provenance.
    pub fn chunk_document(
        &self,
        doc_path: &str,
        doc_type: DocType,
        doc: &ParsedDocument,
    ) -> Vec<Passage> {
        let (joined, spans) = join_spans(doc);

        self.split(&joined)
            .into_iter()
            .enumerate()
            .map(|(idx, piece)| {
                let (page_number, bbox) = provenance(doc, &spans, &piece);
                Passage {
                    id: Passage::make_id(doc_path, idx),
                    doc_path: doc_path.to_string(),
                    doc_type,
                    chunk_index: idx,
                    text: piece.text.to_string(),
                    page_number,
                    bbox,
                }
            })
            .collect()
    }
}

/// Byte range of one span inside the joined document text.
#[derive(Debug, Clone, Copy)]
struct SpanRange {
    start: usize,
    end: usize,
    page: usize,
    span: usize,
}

/// Join span texts (`\n` within a page, `\n\n` between pages).
fn join_spans(doc: &ParsedDocument) -> (String, Vec<SpanRange>) {
    let mut joined = String::new();
    let mut ranges = Vec::new();

    for (page_idx, page) in doc.pages.iter().enumerate() {
        let mut first_on_page = true;
        for (span_idx, span) in page.spans.iter().enumerate() {
            let text = span.text.trim();
            if text.is_empty() {
                continue;
            }
            if !joined.is_empty() {
                joined.push_str(if first_on_page { "\n\n" } else { "\n" });
            }
            first_on_page = false;

            let start = joined.len();
            joined.push_str(text);
            ranges.push(SpanRange {
                start,
                end: joined.len(),
                page: page_idx,
                span: span_idx,
            });
        }
    }

    (joined, ranges)
}

fn provenance(
    doc: &ParsedDocument,
    spans: &[SpanRange],
    piece: &TextPiece<'_>,
) -> (Option<u32>, Option<crate::types::BoundingBox>) {
    let mut overlapping = spans
        .iter()
        .filter(|r| r.start < piece.end() && r.end > piece.offset);

    let Some(first) = overlapping.next() else {
        return (None, None);
    };
    let page = &doc.pages[first.page];

    let mut acc = BoxAccumulator::new();
    for range in std::iter::once(first).chain(overlapping) {
        if range.page != first.page {
            continue;
        }
        if let Some(rect) = &page.spans[range.span].bbox {
            acc.add_raw(rect, page.size());
        }
    }

    (Some(page.page_no), acc.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::bbox::{CoordOrigin, RawRect};
    use crate::rag::loader::{ParsedPage, TextSpan};
    use crate::rag::tokenizer::TiktokenCounter;

    /// One token per whitespace-separated word.
    struct WordCounter;

    impl TokenCounter for WordCounter {
        fn count(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }

        fn name(&self) -> &str {
            "words"
        }
    }

    /// One token per character.
    struct CharCounter;

    impl TokenCounter for CharCounter {
        fn count(&self, text: &str) -> usize {
            text.chars().count()
        }

        fn name(&self) -> &str {
            "chars"
        }
    }

    fn chunker(max_tokens: usize, counter: Arc<dyn TokenCounter>) -> Chunker {
        Chunker::new(
            ChunkerConfig {
                max_tokens,
                ..Default::default()
            },
            counter,
        )
        .unwrap()
    }

    #[test]
    fn test_short_text_is_one_passage() {
        let chunker = chunker(512, Arc::new(TiktokenCounter::cl100k().unwrap()));
        let passages = chunker.chunk_text("a.txt", DocType::Text, "aaaaaaaaaa");
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].text, "aaaaaaaaaa");
        assert_eq!(passages[0].id, "a.txt_0");
        assert_eq!(passages[0].chunk_index, 0);
        assert!(passages[0].page_number.is_none());
        assert!(passages[0].bbox.is_none());
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        let chunker = chunker(16, Arc::new(WordCounter));
        assert!(chunker.chunk_text("a.txt", DocType::Text, "").is_empty());
        assert!(chunker.chunk_text("a.txt", DocType::Text, "  \n\t ").is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let zero = Chunker::new(
            ChunkerConfig {
                max_tokens: 0,
                ..Default::default()
            },
            Arc::new(WordCounter),
        );
        assert!(matches!(zero, Err(AppError::Configuration(_))));

        let ratio = Chunker::new(
            ChunkerConfig {
                chars_per_token: 0.0,
                ..Default::default()
            },
            Arc::new(WordCounter),
        );
        assert!(matches!(ratio, Err(AppError::Configuration(_))));

        let tiny = Chunker::new(
            ChunkerConfig {
                max_tokens: MIN_MAX_TOKENS - 1,
                ..Default::default()
            },
            Arc::new(WordCounter),
        );
        assert!(matches!(tiny, Err(AppError::Configuration(_))));
    }

    #[test]
    fn test_minimum_budget_fits_astral_characters() {
        // Each of these characters is four UTF-8 bytes.
        let counter: Arc<dyn TokenCounter> = Arc::new(TiktokenCounter::cl100k().unwrap());
        let config = ChunkerConfig {
            max_tokens: MIN_MAX_TOKENS,
            chars_per_token: 4.0,
            max_attempts: 1,
            overlap_tokens: 0,
        };
        let chunker = Chunker::new(config, counter.clone()).unwrap();
        let text = "\u{1d518}\u{1d52b}\u{1d526}\u{1d520}\u{1d52c}\u{1d521}\u{1d522}";

        let pieces = chunker.split(text);
        assert!(!pieces.is_empty());
        assert!(pieces.iter().all(|p| counter.count(p.text) <= MIN_MAX_TOKENS));
        let rebuilt: String = pieces.iter().map(|p| p.text).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_dense_text_is_force_split() {
        // The character ratio badly underestimates a one-token-per-char counter,
        // so shrinking alone cannot fit and token-boundary cuts must kick in.
        let config = ChunkerConfig {
            max_tokens: 10,
            chars_per_token: 100.0,
            max_attempts: 2,
            overlap_tokens: 0,
        };
        let chunker = Chunker::new(config, Arc::new(CharCounter)).unwrap();
        let text = "x".repeat(95);

        let pieces = chunker.split(&text);
        assert!(pieces.iter().all(|p| p.text.chars().count() <= 10));
        let total: usize = pieces.iter().map(|p| p.text.len()).sum();
        assert_eq!(total, 95);
        for p in &pieces {
            assert_eq!(&text[p.offset..p.offset + p.text.len()], p.text);
        }
    }

    #[test]
    fn test_pieces_map_back_to_source() {
        let chunker = chunker(8, Arc::new(WordCounter));
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(20);
        for piece in chunker.split(&text) {
            assert_eq!(&text[piece.offset..piece.end()], piece.text);
            assert!(piece.text.split_whitespace().count() <= 8);
        }
    }

    #[test]
    fn test_multibyte_force_split_respects_char_boundaries() {
        let config = ChunkerConfig {
            max_tokens: 4,
            chars_per_token: 50.0,
            max_attempts: 1,
            overlap_tokens: 0,
        };
        let chunker = Chunker::new(config, Arc::new(CharCounter)).unwrap();
        let text = "日本語のテキストです";
        let pieces = chunker.split(text);
        assert!(pieces.iter().all(|p| p.text.chars().count() <= 4));
        let rebuilt: String = pieces.iter().map(|p| p.text).collect();
        assert_eq!(rebuilt, text);
    }

    fn span(text: &str, l: f32, t: f32, r: f32, b: f32) -> TextSpan {
        TextSpan {
            text: text.to_string(),
            bbox: Some(RawRect {
                l,
                t,
                r,
                b,
                coord_origin: CoordOrigin::TopLeft,
            }),
        }
    }

    #[test]
    fn test_document_provenance_folds_spans_on_first_page() {
        let doc = ParsedDocument {
            pages: vec![
                ParsedPage {
                    page_no: 3,
                    width: 100.0,
                    height: 200.0,
                    spans: vec![
                        span("alpha beta", 10.0, 20.0, 50.0, 40.0),
                        span("gamma delta", 20.0, 60.0, 90.0, 80.0),
                    ],
                },
                ParsedPage {
                    page_no: 4,
                    width: 100.0,
                    height: 200.0,
                    spans: vec![span("epsilon", 0.0, 0.0, 100.0, 200.0)],
                },
            ],
        };

        let chunker = chunker(512, Arc::new(WordCounter));
        let passages = chunker.chunk_document("doc.pdf", DocType::Pdf, &doc);
        assert_eq!(passages.len(), 1);

        let p = &passages[0];
        assert_eq!(p.text, "alpha beta\ngamma delta\n\nepsilon");
        assert_eq!(p.page_number, Some(3));
        let bbox = p.bbox.unwrap();
        assert!((bbox.left - 0.1).abs() < 1e-6);
        assert!((bbox.top - 0.1).abs() < 1e-6);
        assert!((bbox.right - 0.9).abs() < 1e-6);
        assert!((bbox.bottom - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_document_without_geometry_has_page_only() {
        let doc = ParsedDocument {
            pages: vec![ParsedPage {
                page_no: 1,
                width: 0.0,
                height: 0.0,
                spans: vec![span("no usable page size", 1.0, 1.0, 2.0, 2.0)],
            }],
        };
        let chunker = chunker(512, Arc::new(WordCounter));
        let passages = chunker.chunk_document("d.pdf", DocType::Pdf, &doc);
        assert_eq!(passages[0].page_number, Some(1));
        assert!(passages[0].bbox.is_none());
    }
}
