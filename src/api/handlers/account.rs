//! Account handlers: credit balance and answer feedback.

use axum::extract::State;
use axum::Json;

use crate::auth::middleware::AuthUser;
use crate::types::{
    AppError, CreditsResponse, Feedback, FeedbackKind, FeedbackRequest, Result, UserRole,
};
use crate::AppState;

/// Current balance plus the admin bypass flag.
#[utoipa::path(
    get,
    path = "/api/user/credits",
    responses(
        (status = 200, description = "Credit balance", body = CreditsResponse),
        (status = 401, description = "Unauthorized")
    ),
    tag = "account",
    security(("bearer" = []))
)]
pub async fn credits(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<CreditsResponse>> {
    let account = state
        .ledger
        .ensure_account(&claims, state.settings.credits.initial_grant)
        .await?;
    Ok(Json(CreditsResponse {
        balance: account.credit_balance,
        is_admin: account.role == UserRole::Admin,
    }))
}

/// Submit or update feedback on an answer. One live row per
/// (user, query log); resubmission updates in place.
#[utoipa::path(
    post,
    path = "/api/user/feedback",
    request_body = FeedbackRequest,
    responses(
        (status = 200, description = "Feedback stored", body = Feedback),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Unknown query log")
    ),
    tag = "account",
    security(("bearer" = []))
)]
pub async fn feedback(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(payload): Json<FeedbackRequest>,
) -> Result<Json<Feedback>> {
    let kind: FeedbackKind = payload.kind.parse()?;
    if kind == FeedbackKind::Rating {
        match payload.rating {
            Some(r) if (1..=5).contains(&r) => {}
            _ => {
                return Err(AppError::InvalidInput(
                    "rating must be in 1..=5 for rating feedback".to_string(),
                ))
            }
        }
    }

    // The referenced answer must exist and belong to the caller.
    let log = state
        .meta
        .get_query_log(payload.query_log_id)
        .await?
        .filter(|log| log.user_id == claims.sub)
        .ok_or_else(|| AppError::NotFound(format!("query log {}", payload.query_log_id)))?;

    let stored = state
        .meta
        .upsert_feedback(
            &claims.sub,
            log.id,
            kind,
            payload.rating,
            payload.comment.as_deref(),
            &payload.tags,
        )
        .await?;

    tracing::info!(
        user_id = %claims.sub,
        query_log_id = %log.id,
        kind = kind.as_str(),
        "Feedback stored"
    );
    Ok(Json(stored))
}
