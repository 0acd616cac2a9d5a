//! Query execution: the retrieve-and-answer pipeline with credit
//! accounting.
//!
//! `ask` runs the full flow: admission → cache lookup → credit reserve →
//! retrieval → generation → scoring → audit log → cache store. Any failure
//! after the reserve triggers a compensating refund, and the error carried
//! back to the client names the refund transaction. `search` is the
//! retrieval-only variant with no generation and no charge.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::credits::CreditLedger;
use crate::db::MetaStore;
use crate::rag::cache::CacheCoordinator;
use crate::rag::composer::{apply_caveats, AnswerComposer};
use crate::rag::planner::{QueryOptions, QueryPlanner};
use crate::rag::scorer;
use crate::types::{
    AppError, AskRequest, AskResponse, Citation, Claims, QueryKind, QueryLog, Result,
    RetrievedPassage, SearchRequest, SearchResponse, SourceRef,
};
use crate::utils::config::Settings;

/// Payload stored in the query result cache. `cached` and `elapsed_ms` are
/// per-request and stay out of the cached form.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedAnswer {
    answer: String,
    citations: Vec<Citation>,
    reliability: f32,
    confidence: f32,
    provider: String,
    sources: Vec<SourceRef>,
    results_count: u32,
}

/// The query pipeline service.
pub struct QueryService {
    meta: Arc<MetaStore>,
    planner: Arc<QueryPlanner>,
    composer: Arc<AnswerComposer>,
    ledger: Arc<CreditLedger>,
    cache: Arc<CacheCoordinator>,
    settings: Arc<Settings>,
}

impl QueryService {
    /// Wire the pipeline together.
    pub fn new(
        meta: Arc<MetaStore>,
        planner: Arc<QueryPlanner>,
        composer: Arc<AnswerComposer>,
        ledger: Arc<CreditLedger>,
        cache: Arc<CacheCoordinator>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            meta,
            planner,
            composer,
            ledger,
            cache,
            settings,
        }
    }

    /// Reject queries while maintenance mode blocks this user.
    async fn check_maintenance(&self, user_id: &str) -> Result<()> {
        let flag = self.meta.maintenance_flag().await?;
        if flag.blocks(user_id) {
            return Err(AppError::AdapterUnavailable {
                adapter: "maintenance",
                message: flag
                    .message
                    .unwrap_or_else(|| "Sistem bakımda, lütfen daha sonra deneyin.".to_string()),
                refund_txn_id: None,
            });
        }
        Ok(())
    }

    /// Publication dates for the scorer, keyed by document id.
    async fn publication_dates(
        &self,
        passages: &[RetrievedPassage],
    ) -> HashMap<Uuid, NaiveDate> {
        let mut dates = HashMap::new();
        let unique: std::collections::HashSet<Uuid> =
            passages.iter().map(|p| p.document_id).collect();
        for id in unique {
            if let Ok(Some(doc)) = self.meta.get_document(id).await {
                if let Some(date) = doc.publication_date {
                    dates.insert(id, date);
                }
            }
        }
        dates
    }

    fn sources_from(passages: &[RetrievedPassage]) -> Vec<SourceRef> {
        passages
            .iter()
            .map(|p| SourceRef {
                document_id: p.document_id,
                title: p.title.clone(),
                page: p.page,
                similarity: p.similarity,
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn query_log(
        log_id: Uuid,
        claims: &Claims,
        query: &str,
        kind: QueryKind,
        options: &QueryOptions,
        session_id: Option<String>,
        cache_used: bool,
        results_count: u32,
        response_time_ms: u64,
        reliability: f32,
        confidence: f32,
        credits_charged: i64,
        sources: Vec<SourceRef>,
        metadata: serde_json::Value,
    ) -> QueryLog {
        QueryLog {
            id: log_id,
            user_id: claims.sub.clone(),
            session_id,
            query: query.to_string(),
            kind,
            institution: options.institution.clone(),
            threshold: options.threshold,
            k: options.k,
            cache_used,
            results_count,
            response_time_ms,
            reliability,
            confidence,
            credits_charged,
            sources,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Full retrieve-and-answer flow for `/api/user/ask`.
    pub async fn ask(&self, claims: &Claims, request: AskRequest) -> Result<AskResponse> {
        let started = Instant::now();
        if request.query.trim().is_empty() {
            return Err(AppError::InvalidInput("query must not be empty".to_string()));
        }

        self.check_maintenance(&claims.sub).await?;
        let account = self
            .ledger
            .ensure_account(claims, self.settings.credits.initial_grant)
            .await?;

        let options = self.planner.resolve_options(
            request.institution.clone(),
            request.limit,
            request.threshold,
        )?;

        self.planner
            .admit(&claims.sub, self.settings.rate_limit.asks_per_minute)
            .await?;

        let fingerprint = QueryPlanner::fingerprint(&request.query, &options);
        let log_id = Uuid::new_v4();

        // Cached answers are free: no reserve, no generator, still logged.
        if request.use_cache {
            if let Some(cached) = self.cache.get_json::<CachedAnswer>(&fingerprint).await {
                let elapsed = started.elapsed().as_millis() as u64;
                self.meta
                    .insert_query_log(&Self::query_log(
                        log_id,
                        claims,
                        &request.query,
                        QueryKind::Ask,
                        &options,
                        request.session_id.clone(),
                        true,
                        cached.results_count,
                        elapsed,
                        cached.reliability,
                        cached.confidence,
                        0,
                        cached.sources.clone(),
                        serde_json::json!({}),
                    ))
                    .await?;

                tracing::info!(
                    user_id = %claims.sub,
                    query_log_id = %log_id,
                    "Query answered from cache"
                );
                return Ok(AskResponse {
                    answer: cached.answer,
                    citations: cached.citations,
                    reliability: cached.reliability,
                    confidence: cached.confidence,
                    cached: true,
                    credits_charged: 0,
                    query_log_id: log_id,
                    provider: cached.provider,
                    elapsed_ms: elapsed,
                });
            }
        }

        let reservation = self
            .ledger
            .reserve(&account, self.settings.credits.cost_per_ask, Some(log_id))
            .await?;
        let charged = reservation.amount.abs();

        let deadline = Duration::from_secs(self.settings.server.ask_deadline_s);
        let work = async {
            let passages = self.planner.retrieve(&request.query, &options).await?;
            let composed = self.composer.compose(&request.query, &passages).await?;
            Ok::<_, AppError>((passages, composed))
        };

        let outcome = match tokio::time::timeout(deadline, work).await {
            Ok(result) => result,
            Err(_) => Err(AppError::AdapterUnavailable {
                adapter: "deadline",
                message: format!("ask deadline of {}s exceeded", deadline.as_secs()),
                refund_txn_id: None,
            }),
        };

        let (passages, composed) = match outcome {
            Ok(parts) => parts,
            Err(e) => {
                let refund = self.ledger.refund(reservation.id, e.kind()).await?;
                let elapsed = started.elapsed().as_millis() as u64;
                self.meta
                    .insert_query_log(&Self::query_log(
                        log_id,
                        claims,
                        &request.query,
                        QueryKind::Ask,
                        &options,
                        request.session_id.clone(),
                        false,
                        0,
                        elapsed,
                        0.0,
                        0.0,
                        0,
                        Vec::new(),
                        serde_json::json!({ "error": e.kind(), "refund_txn_id": refund.id }),
                    ))
                    .await?;

                tracing::warn!(
                    user_id = %claims.sub,
                    query_log_id = %log_id,
                    refund_txn_id = %refund.id,
                    error = %e,
                    "Ask failed after reserve, credits refunded"
                );
                return Err(match e {
                    AppError::GeneratorFailed { .. } => AppError::GeneratorFailed {
                        refund_txn_id: Some(refund.id),
                    },
                    AppError::AdapterUnavailable {
                        adapter, message, ..
                    } => AppError::AdapterUnavailable {
                        adapter,
                        message,
                        refund_txn_id: Some(refund.id),
                    },
                    other => other,
                });
            }
        };

        let dates = self.publication_dates(&passages).await;
        let breakdown = scorer::score(
            &passages,
            &composed.text,
            &dates,
            Utc::now().date_naive(),
        );
        let answer = apply_caveats(&composed.text, &breakdown);
        let sources = Self::sources_from(&passages);
        let elapsed = started.elapsed().as_millis() as u64;

        self.meta
            .insert_query_log(&Self::query_log(
                log_id,
                claims,
                &request.query,
                QueryKind::Ask,
                &options,
                request.session_id.clone(),
                false,
                passages.len() as u32,
                elapsed,
                breakdown.reliability,
                breakdown.confidence,
                charged,
                sources.clone(),
                serde_json::json!({
                    "tokens_in": composed.tokens_in,
                    "tokens_out": composed.tokens_out,
                }),
            ))
            .await?;

        self.cache
            .put_json(
                &fingerprint,
                &CachedAnswer {
                    answer: answer.clone(),
                    citations: composed.citations.clone(),
                    reliability: breakdown.reliability,
                    confidence: breakdown.confidence,
                    provider: composed.provider.clone(),
                    sources,
                    results_count: passages.len() as u32,
                },
            )
            .await;

        tracing::info!(
            user_id = %claims.sub,
            query_log_id = %log_id,
            results = passages.len(),
            reliability = breakdown.reliability,
            provider = %composed.provider,
            duration_ms = elapsed,
            "Ask completed"
        );

        Ok(AskResponse {
            answer,
            citations: composed.citations,
            reliability: breakdown.reliability,
            confidence: breakdown.confidence,
            cached: false,
            credits_charged: charged,
            query_log_id: log_id,
            provider: composed.provider,
            elapsed_ms: elapsed,
        })
    }

    /// Retrieval-only flow for `/api/user/search`. Free of charge.
    pub async fn search(&self, claims: &Claims, request: SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();
        if request.query.trim().is_empty() {
            return Err(AppError::InvalidInput("query must not be empty".to_string()));
        }

        self.check_maintenance(&claims.sub).await?;
        self.ledger
            .ensure_account(claims, self.settings.credits.initial_grant)
            .await?;

        let options = self.planner.resolve_options(
            request.institution.clone(),
            request.limit,
            request.threshold,
        )?;
        self.planner
            .admit(&claims.sub, self.settings.rate_limit.asks_per_minute)
            .await?;

        let deadline = Duration::from_secs(self.settings.server.search_deadline_s);
        let passages = match tokio::time::timeout(
            deadline,
            self.planner.retrieve(&request.query, &options),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(AppError::AdapterUnavailable {
                    adapter: "deadline",
                    message: format!("search deadline of {}s exceeded", deadline.as_secs()),
                    refund_txn_id: None,
                })
            }
        };

        let elapsed = started.elapsed().as_millis() as u64;
        let log_id = Uuid::new_v4();
        self.meta
            .insert_query_log(&Self::query_log(
                log_id,
                claims,
                &request.query,
                QueryKind::Search,
                &options,
                request.session_id.clone(),
                false,
                passages.len() as u32,
                elapsed,
                0.0,
                0.0,
                0,
                Self::sources_from(&passages),
                serde_json::json!({}),
            ))
            .await?;

        tracing::info!(
            user_id = %claims.sub,
            query_log_id = %log_id,
            results = passages.len(),
            duration_ms = elapsed,
            "Search completed"
        );

        Ok(SearchResponse {
            total: passages.len(),
            results: passages,
            query_log_id: log_id,
            elapsed_ms: elapsed,
        })
    }
}
