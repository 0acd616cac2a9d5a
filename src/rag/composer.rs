//! Answer composition: prompt building, generation, citation post-processing.
//!
//! The composer assembles the context block with `[#i]` citation anchors,
//! picks the system prompt from the versioned template store (with a
//! built-in Turkish fallback), invokes the generator pair, and strips
//! anchors the model hallucinated beyond the passage count.

use std::sync::Arc;
use std::time::Instant;

use crate::db::MetaStore;
use crate::llm::{FallbackGenerator, GenerateOptions};
use crate::rag::scorer::ScoreBreakdown;
use crate::types::{Citation, Result, RetrievedPassage};

/// Answer returned when no passage survives pruning. The generator is not
/// invoked in that case.
pub const INSUFFICIENT_INFO_ANSWER: &str =
    "Bu soruya mevcut mevzuat kaynaklarında yeterli bilgi bulunamadı. Lütfen sorunuzu \
     farklı anahtar kelimelerle yeniden ifade edin veya ilgili kurumu belirtin.";

/// Caveat line prepended below the reliability threshold.
const CAVEAT_LINE: &str =
    "Not: Bu yanıtın güvenilirlik puanı düşüktür; resmi işlem yapmadan önce ilgili \
     mevzuatın güncel metnini doğrulayın.";

/// Line prepended when the evidence is insufficient; citations below this
/// level must not be presented as authoritative.
const INSUFFICIENT_EVIDENCE_LINE: &str =
    "Uyarı: Bu yanıt yetersiz kanıta dayanmaktadır ve kaynak gösterimi bağlayıcı değildir.";

const BUILTIN_SYSTEM_PROMPT: &str = "Sen Türk mevzuatı konusunda uzman bir hukuk asistanısın. \
Yalnızca sana verilen kaynak pasajlara dayanarak Türkçe yanıt ver. Her iddianın sonuna \
ilgili pasajın numarasını [#1] biçiminde ekle. Kaynaklarda bulunmayan bilgi için tahmin \
yürütme; bilgi yoksa bunu açıkça söyle.";

/// A composed answer with provider accounting.
#[derive(Debug, Clone)]
pub struct ComposedAnswer {
    /// Post-processed answer text.
    pub text: String,
    /// Citations in context order (`anchor` matches the `[#i]` markers).
    pub citations: Vec<Citation>,
    /// Prompt tokens consumed.
    pub tokens_in: u32,
    /// Completion tokens produced.
    pub tokens_out: u32,
    /// Provider that produced the answer, or "none" for the template path.
    pub provider: String,
    /// Composition wall-clock time in milliseconds.
    pub elapsed_ms: u64,
}

/// The answer composer.
pub struct AnswerComposer {
    generator: Arc<FallbackGenerator>,
    meta: Arc<MetaStore>,
}

impl AnswerComposer {
    /// Wire the composer to the generator pair and the template store.
    pub fn new(generator: Arc<FallbackGenerator>, meta: Arc<MetaStore>) -> Self {
        Self { generator, meta }
    }

    /// Build the context block with citation anchors.
    fn context_block(passages: &[RetrievedPassage]) -> String {
        let mut block = String::new();
        for (i, passage) in passages.iter().enumerate() {
            block.push_str(&format!(
                "[#{}] {} (s. {}, {}. kurum: {})\n{}\n\n",
                i + 1,
                passage.title,
                passage.page,
                passage.document_id,
                passage.institution,
                passage.text
            ));
        }
        block
    }

    /// System prompt: newest template for (provider, "system"), else the
    /// built-in. Template store failures degrade to the built-in.
    async fn system_prompt(&self) -> String {
        match self
            .meta
            .latest_prompt_template(self.generator.primary_name(), "system")
            .await
        {
            Ok(Some(template)) => template,
            Ok(None) => BUILTIN_SYSTEM_PROMPT.to_string(),
            Err(e) => {
                tracing::debug!(error = %e, "Template store unavailable, using built-in prompt");
                BUILTIN_SYSTEM_PROMPT.to_string()
            }
        }
    }

    /// Compose an answer from the retrieved passages.
    ///
    /// With an empty context the "insufficient information" template is
    /// returned directly; the generator is not invoked and no tokens are
    /// consumed.
    pub async fn compose(
        &self,
        query: &str,
        passages: &[RetrievedPassage],
    ) -> Result<ComposedAnswer> {
        let start = Instant::now();

        if passages.is_empty() {
            return Ok(ComposedAnswer {
                text: INSUFFICIENT_INFO_ANSWER.to_string(),
                citations: Vec::new(),
                tokens_in: 0,
                tokens_out: 0,
                provider: "none".to_string(),
                elapsed_ms: start.elapsed().as_millis() as u64,
            });
        }

        let system = self.system_prompt().await;
        let user = format!(
            "Kaynak pasajlar:\n\n{}Soru: {}\n\nYanıtını yalnızca yukarıdaki pasajlara dayandır.",
            Self::context_block(passages),
            query
        );

        let (completion, provider) = self
            .generator
            .complete(&system, &user, &GenerateOptions::default())
            .await?;

        let text = strip_invalid_citations(&completion.text, passages.len());
        let citations = passages
            .iter()
            .enumerate()
            .map(|(i, p)| Citation {
                anchor: i as u32 + 1,
                document_id: p.document_id,
                title: p.title.clone(),
                page: p.page,
                line_start: p.line_start,
                line_end: p.line_end,
                similarity: p.similarity,
            })
            .collect();

        Ok(ComposedAnswer {
            text,
            citations,
            tokens_in: completion.tokens_in,
            tokens_out: completion.tokens_out,
            provider,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Prepend the reliability caveats the score calls for.
pub fn apply_caveats(answer: &str, breakdown: &ScoreBreakdown) -> String {
    if breakdown.insufficient_evidence() {
        format!("{}\n\n{}", INSUFFICIENT_EVIDENCE_LINE, answer)
    } else if breakdown.needs_caveat() {
        format!("{}\n\n{}", CAVEAT_LINE, answer)
    } else {
        answer.to_string()
    }
}

/// Remove `[#i]` anchors whose index exceeds the passage count.
fn strip_invalid_citations(text: &str, max: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '[' && i + 1 < chars.len() && chars[i + 1] == '#' {
            let mut j = i + 2;
            let mut digits = String::new();
            while j < chars.len() && chars[j].is_ascii_digit() {
                digits.push(chars[j]);
                j += 1;
            }
            if !digits.is_empty() && j < chars.len() && chars[j] == ']' {
                let anchor: usize = digits.parse().unwrap_or(0);
                if anchor >= 1 && anchor <= max {
                    out.push_str("[#");
                    out.push_str(&digits);
                    out.push(']');
                }
                i = j + 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Completion, GenerateOptions, Generator};
    use crate::types::AppError;
    use async_trait::async_trait;
    use std::time::Duration;
    use uuid::Uuid;

    struct CannedGenerator {
        text: &'static str,
        fail: bool,
    }

    #[async_trait]
    impl Generator for CannedGenerator {
        fn provider_name(&self) -> &str {
            "canned"
        }

        async fn complete(
            &self,
            _system: &str,
            _user: &str,
            _options: &GenerateOptions,
        ) -> Result<Completion> {
            if self.fail {
                return Err(AppError::AdapterUnavailable {
                    adapter: "generator",
                    message: "down".to_string(),
                    refund_txn_id: None,
                });
            }
            Ok(Completion {
                text: self.text.to_string(),
                tokens_in: 100,
                tokens_out: 42,
            })
        }
    }

    fn passage(title: &str, page: u32, similarity: f32) -> RetrievedPassage {
        RetrievedPassage {
            document_id: Uuid::new_v4(),
            chunk_index: 0,
            title: title.to_string(),
            page,
            line_start: 3,
            line_end: 9,
            text: "Prim borçları tebliğ tarihinden itibaren bir ay içinde ödenir.".to_string(),
            similarity,
            institution: "SGK".to_string(),
        }
    }

    async fn composer(text: &'static str, fail: bool) -> AnswerComposer {
        let generator = FallbackGenerator::new(
            Box::new(CannedGenerator { text, fail }),
            None,
            Duration::from_secs(5),
        );
        let meta = Arc::new(MetaStore::new_memory().await.unwrap());
        AnswerComposer::new(Arc::new(generator), meta)
    }

    #[test]
    fn test_strip_invalid_citations() {
        assert_eq!(
            strip_invalid_citations("Ödeme süresi bir aydır [#1]. Ek bilgi [#7].", 2),
            "Ödeme süresi bir aydır [#1]. Ek bilgi ."
        );
        assert_eq!(strip_invalid_citations("[#1][#2][#3]", 2), "[#1][#2]");
        // Malformed anchors pass through untouched.
        assert_eq!(strip_invalid_citations("[#] [#x] [# 1]", 3), "[#] [#x] [# 1]");
        assert_eq!(strip_invalid_citations("[#0] kalmaz", 3), " kalmaz");
    }

    #[tokio::test]
    async fn test_empty_context_skips_generator() {
        let composer = composer("unused", true).await;
        let answer = composer.compose("ödeme süresi nedir", &[]).await.unwrap();
        assert_eq!(answer.text, INSUFFICIENT_INFO_ANSWER);
        assert_eq!(answer.provider, "none");
        assert_eq!(answer.tokens_in, 0);
        assert!(answer.citations.is_empty());
    }

    #[tokio::test]
    async fn test_compose_builds_citations_in_context_order() {
        let composer = composer("Süre bir aydır [#1], ikinci kaynak [#2], uydurma [#9].", false).await;
        let passages = vec![passage("5510 Sayılı Kanun", 12, 0.91), passage("SGK Genelgesi", 3, 0.84)];

        let answer = composer.compose("ödeme süresi", &passages).await.unwrap();
        assert_eq!(answer.citations.len(), 2);
        assert_eq!(answer.citations[0].anchor, 1);
        assert_eq!(answer.citations[0].page, 12);
        assert_eq!(answer.citations[1].anchor, 2);
        assert!(!answer.text.contains("[#9]"));
        assert!(answer.text.contains("[#1]"));
        assert_eq!(answer.provider, "canned");
        assert_eq!(answer.tokens_out, 42);
    }

    #[test]
    fn test_apply_caveats() {
        let mut breakdown = ScoreBreakdown {
            s_avg: 0.0,
            diversity: 0.0,
            len_factor: 0.0,
            recency: 0.0,
            reliability: 0.8,
            confidence: 0.0,
        };
        assert_eq!(apply_caveats("yanıt", &breakdown), "yanıt");

        breakdown.reliability = 0.3;
        assert!(apply_caveats("yanıt", &breakdown).starts_with("Not:"));

        breakdown.reliability = 0.1;
        assert!(apply_caveats("yanıt", &breakdown).starts_with("Uyarı:"));
    }
}
