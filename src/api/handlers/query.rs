//! User query handlers: ask, search, history.
//!
//! Thin layer over [`QueryService`](crate::rag::QueryService); no business
//! logic here.

use axum::extract::{Query, State};
use axum::Json;

use crate::auth::middleware::AuthUser;
use crate::types::{
    AskRequest, AskResponse, HistoryQuery, QueryLog, Result, SearchRequest, SearchResponse,
};
use crate::AppState;

/// Answer a natural-language question from the indexed corpus.
#[utoipa::path(
    post,
    path = "/api/user/ask",
    request_body = AskRequest,
    responses(
        (status = 200, description = "Answer with citations", body = AskResponse),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Unauthorized"),
        (status = 402, description = "Insufficient credits"),
        (status = 429, description = "Rate limited"),
        (status = 502, description = "All generation providers failed")
    ),
    tag = "query",
    security(("bearer" = []))
)]
pub async fn ask(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(payload): Json<AskRequest>,
) -> Result<Json<AskResponse>> {
    let response = state.query_service.ask(&claims, payload).await?;
    Ok(Json(response))
}

/// Vector search without generation.
#[utoipa::path(
    post,
    path = "/api/user/search",
    request_body = SearchRequest,
    responses(
        (status = 200, description = "Matching passages", body = SearchResponse),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Unauthorized"),
        (status = 429, description = "Rate limited")
    ),
    tag = "query",
    security(("bearer" = []))
)]
pub async fn search(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let response = state.query_service.search(&claims, payload).await?;
    Ok(Json(response))
}

/// The caller's query history, newest first.
#[utoipa::path(
    get,
    path = "/api/user/search-history",
    responses(
        (status = 200, description = "Query history", body = Vec<QueryLog>),
        (status = 401, description = "Unauthorized")
    ),
    tag = "query",
    security(("bearer" = []))
)]
pub async fn search_history(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<QueryLog>>> {
    let limit = query.limit.unwrap_or(20).min(100);
    let offset = query.offset.unwrap_or(0);
    let logs = state
        .meta
        .list_query_logs(&claims.sub, limit, offset)
        .await?;
    Ok(Json(logs))
}
