//! Reliability scoring for generated answers.
//!
//! Combines retrieval, content and recency signals into a [0, 1] score:
//!
//! ```text
//! reliability = 0.40·S_avg + 0.20·diversity + 0.15·len_factor + 0.25·recency
//! confidence  = 0.60·S_avg + 0.40·diversity
//! ```
//!
//! Below [`CAVEAT_THRESHOLD`] the composer prepends a caveat line; below
//! [`INSUFFICIENT_THRESHOLD`] the answer is flagged as resting on
//! insufficient evidence and citations must not be asserted as
//! authoritative.

use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::types::RetrievedPassage;

/// Below this, the answer carries a caveat line.
pub const CAVEAT_THRESHOLD: f32 = 0.40;

/// Below this, the answer is flagged as insufficient evidence.
pub const INSUFFICIENT_THRESHOLD: f32 = 0.20;

/// Neutral recency contribution for passages without a publication date.
const UNKNOWN_RECENCY: f32 = 0.5;

/// Diagnostic breakdown of a reliability computation.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    /// Mean similarity of the retrieved passages.
    pub s_avg: f32,
    /// Unique source documents over passage count, capped at 1.
    pub diversity: f32,
    /// Answer length saturation (500 chars = 1.0).
    pub len_factor: f32,
    /// Mean per-passage publication recency.
    pub recency: f32,
    /// Combined reliability score in [0, 1].
    pub reliability: f32,
    /// Retrieval-only confidence score in [0, 1].
    pub confidence: f32,
}

impl ScoreBreakdown {
    /// Whether the composer should prepend a caveat line.
    pub fn needs_caveat(&self) -> bool {
        self.reliability < CAVEAT_THRESHOLD
    }

    /// Whether the answer rests on insufficient evidence.
    pub fn insufficient_evidence(&self) -> bool {
        self.reliability < INSUFFICIENT_THRESHOLD
    }
}

fn clamp01(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

/// Score an answer against the passages that produced it.
///
/// `publication_dates` maps document ids to their official publication
/// dates where known; unknown dates contribute a neutral 0.5 recency.
/// `today` is injected so the computation stays deterministic under test.
pub fn score(
    passages: &[RetrievedPassage],
    answer: &str,
    publication_dates: &HashMap<Uuid, NaiveDate>,
    today: NaiveDate,
) -> ScoreBreakdown {
    let s_avg = if passages.is_empty() {
        0.0
    } else {
        passages.iter().map(|p| p.similarity).sum::<f32>() / passages.len() as f32
    };

    let unique_documents: HashSet<Uuid> = passages.iter().map(|p| p.document_id).collect();
    let diversity = clamp01(unique_documents.len() as f32 / passages.len().max(1) as f32);

    let len_factor = clamp01(answer.chars().count() as f32 / 500.0);

    let recency = if passages.is_empty() {
        UNKNOWN_RECENCY
    } else {
        passages
            .iter()
            .map(|p| match publication_dates.get(&p.document_id) {
                Some(date) => {
                    let years = (today - *date).num_days() as f32 / 365.25;
                    (1.0 - years / 10.0).max(0.0)
                }
                None => UNKNOWN_RECENCY,
            })
            .sum::<f32>()
            / passages.len() as f32
    };

    let reliability = clamp01(0.40 * s_avg + 0.20 * diversity + 0.15 * len_factor + 0.25 * recency);
    let confidence = clamp01(0.60 * s_avg + 0.40 * diversity);

    ScoreBreakdown {
        s_avg,
        diversity,
        len_factor,
        recency,
        reliability,
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(doc: Uuid, similarity: f32) -> RetrievedPassage {
        RetrievedPassage {
            document_id: doc,
            chunk_index: 0,
            title: "Test".to_string(),
            page: 1,
            line_start: 1,
            line_end: 2,
            text: "metin".to_string(),
            similarity,
            institution: "SGK".to_string(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()
    }

    #[test]
    fn test_weights_sum_as_specified() {
        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();
        let passages = vec![passage(doc_a, 0.9), passage(doc_b, 0.7)];
        let answer = "a".repeat(500);
        let mut dates = HashMap::new();
        // Fresh documents: recency 1.0.
        dates.insert(doc_a, today());
        dates.insert(doc_b, today());

        let breakdown = score(&passages, &answer, &dates, today());
        assert!((breakdown.s_avg - 0.8).abs() < 1e-6);
        assert!((breakdown.diversity - 1.0).abs() < 1e-6);
        assert!((breakdown.len_factor - 1.0).abs() < 1e-6);
        assert!((breakdown.recency - 1.0).abs() < 1e-6);
        let expected = 0.40 * 0.8 + 0.20 + 0.15 + 0.25;
        assert!((breakdown.reliability - expected).abs() < 1e-5);
        let expected_confidence = 0.60 * 0.8 + 0.40;
        assert!((breakdown.confidence - expected_confidence).abs() < 1e-5);
    }

    #[test]
    fn test_missing_dates_contribute_half() {
        let passages = vec![passage(Uuid::new_v4(), 0.8)];
        let breakdown = score(&passages, "kısa yanıt", &HashMap::new(), today());
        assert!((breakdown.recency - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_old_document_recency_floors_at_zero() {
        let doc = Uuid::new_v4();
        let passages = vec![passage(doc, 0.8)];
        let mut dates = HashMap::new();
        dates.insert(doc, NaiveDate::from_ymd_opt(1990, 1, 1).unwrap());
        let breakdown = score(&passages, "yanıt", &dates, today());
        assert_eq!(breakdown.recency, 0.0);
    }

    #[test]
    fn test_duplicate_documents_reduce_diversity() {
        let doc = Uuid::new_v4();
        let passages = vec![passage(doc, 0.9), passage(doc, 0.8), passage(doc, 0.7)];
        let breakdown = score(&passages, "yanıt", &HashMap::new(), today());
        assert!((breakdown.diversity - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_retrieval_scores_low() {
        let breakdown = score(&[], "yanıt yok", &HashMap::new(), today());
        assert_eq!(breakdown.s_avg, 0.0);
        assert_eq!(breakdown.diversity, 0.0);
        assert!(breakdown.reliability < CAVEAT_THRESHOLD);
        assert!(breakdown.needs_caveat());
    }

    #[test]
    fn test_thresholds() {
        let low = ScoreBreakdown {
            s_avg: 0.0,
            diversity: 0.0,
            len_factor: 0.0,
            recency: 0.0,
            reliability: 0.19,
            confidence: 0.0,
        };
        assert!(low.insufficient_evidence());
        assert!(low.needs_caveat());

        let mid = ScoreBreakdown {
            reliability: 0.35,
            ..low.clone()
        };
        assert!(!mid.insufficient_evidence());
        assert!(mid.needs_caveat());

        let high = ScoreBreakdown {
            reliability: 0.6,
            ..low
        };
        assert!(!high.needs_caveat());
    }
}
