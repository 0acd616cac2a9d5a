//! Passage chunking for document ingestion.
//!
//! Splits an extracted page/line tree into overlapping passages while
//! preserving source coordinates (page number, inclusive line range). The
//! output feeds the embedder and the vector index; citations shown to users
//! are reconstructed from these coordinates, so the mapping must be exact.
//!
//! Contract:
//! - passages cover the document's lines in order, chunk indices contiguous
//!   from 0;
//! - adjacent passages within a page overlap by approximately
//!   `overlap_chars` (suffix of passage n = prefix of passage n+1);
//! - a passage never crosses a page boundary, except when a page's residual
//!   text is shorter than `min_chars` - then it is merged with the next page
//!   and the line range spans both (page number = first page of the span);
//! - same input always produces identical output.

use serde::{Deserialize, Serialize};

use crate::extract::ExtractedText;
use crate::rag::text::normalize_whitespace;
use crate::types::{AppError, Result};
use crate::utils::config::ChunkingSettings;

/// Configuration for the passage chunker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Target passage length in characters.
    #[serde(default = "default_target_chars")]
    pub target_chars: usize,
    /// Approximate overlap between adjacent passages.
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    /// Page residuals shorter than this merge into the next page.
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
}

fn default_target_chars() -> usize {
    1200
}

fn default_overlap_chars() -> usize {
    200
}

fn default_min_chars() -> usize {
    300
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_chars: default_target_chars(),
            overlap_chars: default_overlap_chars(),
            min_chars: default_min_chars(),
        }
    }
}

impl From<&ChunkingSettings> for ChunkerConfig {
    fn from(s: &ChunkingSettings) -> Self {
        Self {
            target_chars: s.target_chars,
            overlap_chars: s.overlap_chars,
            min_chars: s.min_chars,
        }
    }
}

/// A chunked passage with source coordinates, ready for embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassageDraft {
    /// 0-based position within the document; contiguous.
    pub chunk_index: u32,
    /// Normalized passage text.
    pub text: String,
    /// Page the passage starts on.
    pub page_number: u32,
    /// First source line (inclusive).
    pub line_start: u32,
    /// Last source line (inclusive). May be on a later page for spans.
    pub line_end: u32,
}

/// A normalized line segment carried through chunk assembly.
#[derive(Debug, Clone)]
struct Segment {
    page: u32,
    line: u32,
    text: String,
}

/// Splits extracted text into coordinate-preserving passages.
#[derive(Debug, Clone)]
pub struct PassageChunker {
    config: ChunkerConfig,
}

impl PassageChunker {
    /// Create a chunker with the given configuration.
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Chunk an extraction result into passages.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::EmptyDocument`] when every page contains only
    /// whitespace.
    pub fn chunk(&self, extracted: &ExtractedText) -> Result<Vec<PassageDraft>> {
        let pages = self.normalize_pages(extracted);
        if pages.iter().all(|p| p.is_empty()) {
            return Err(AppError::EmptyDocument);
        }

        let mut out: Vec<PassageDraft> = Vec::new();
        let mut buf: Vec<Segment> = Vec::new();
        // Leading segments of `buf` that were already emitted as the tail of
        // the previous passage (overlap carry).
        let mut carried = 0usize;

        let last_nonempty_page = pages.iter().rposition(|p| !p.is_empty());

        for (page_idx, segments) in pages.iter().enumerate() {
            for segment in segments {
                buf.push(segment.clone());
                if Self::joined_len(&buf) >= self.config.target_chars {
                    self.flush(&mut out, &buf);
                    let seed = self.overlap_seed(&buf);
                    carried = seed.len();
                    buf = seed;
                }
            }

            // Page boundary: decide whether the residual stays on this page
            // or spans into the next one.
            let fresh: usize = buf.iter().skip(carried).map(|s| s.text.chars().count()).sum();
            if fresh == 0 {
                // Only overlap carry left; nothing new to emit.
                buf.clear();
                carried = 0;
                continue;
            }

            let has_next = last_nonempty_page.is_some_and(|last| page_idx < last);
            if fresh < self.config.min_chars && has_next {
                // Residual too short to stand alone: span into the next page.
                continue;
            }

            self.flush(&mut out, &buf);
            buf.clear();
            carried = 0;
        }

        debug_assert!(out.iter().enumerate().all(|(i, p)| p.chunk_index as usize == i));
        Ok(out)
    }

    /// Current configuration.
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Normalize pages into non-empty line segments, hard-splitting lines
    /// longer than the target so a single line cannot oversize a passage.
    fn normalize_pages(&self, extracted: &ExtractedText) -> Vec<Vec<Segment>> {
        extracted
            .pages
            .iter()
            .map(|page| {
                let mut segments = Vec::new();
                for line in &page.lines {
                    let text = normalize_whitespace(&line.text);
                    if text.is_empty() {
                        continue;
                    }
                    let chars: Vec<char> = text.chars().collect();
                    if chars.len() <= self.config.target_chars {
                        segments.push(Segment {
                            page: page.page_no,
                            line: line.line_no,
                            text,
                        });
                    } else {
                        for slice in chars.chunks(self.config.target_chars) {
                            segments.push(Segment {
                                page: page.page_no,
                                line: line.line_no,
                                text: slice.iter().collect(),
                            });
                        }
                    }
                }
                segments
            })
            .collect()
    }

    /// Length of the buffer when joined with single spaces.
    fn joined_len(buf: &[Segment]) -> usize {
        let chars: usize = buf.iter().map(|s| s.text.chars().count()).sum();
        chars + buf.len().saturating_sub(1)
    }

    /// Emit the buffer as the next passage.
    fn flush(&self, out: &mut Vec<PassageDraft>, buf: &[Segment]) {
        let first = &buf[0];
        let last = &buf[buf.len() - 1];
        let text = buf
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        out.push(PassageDraft {
            chunk_index: out.len() as u32,
            text,
            page_number: first.page,
            line_start: first.line,
            line_end: last.line,
        });
    }

    /// Trailing segments of a flushed buffer that seed the next passage.
    ///
    /// Collects from the end until `overlap_chars` is reached, but never the
    /// whole buffer - the next passage must contain fresh text.
    fn overlap_seed(&self, buf: &[Segment]) -> Vec<Segment> {
        if self.config.overlap_chars == 0 || buf.len() < 2 {
            return Vec::new();
        }
        let mut total = 0usize;
        let mut taken = 0usize;
        for segment in buf.iter().rev() {
            if taken + 1 >= buf.len() || total >= self.config.overlap_chars {
                break;
            }
            total += segment.text.chars().count();
            taken += 1;
        }
        buf[buf.len() - taken..].to_vec()
    }
}

impl Default for PassageChunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}
