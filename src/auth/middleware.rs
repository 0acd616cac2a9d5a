//! Axum auth middleware and extractors.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::auth::jwt::AuthVerifier;
use crate::types::{AppError, Claims, UserRole};

/// Verify the bearer token and stash the claims in request extensions.
pub async fn auth_middleware(
    State(verifier): State<Arc<AuthVerifier>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthenticated("missing authorization header".to_string()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthenticated("expected bearer token".to_string()))?;

    let claims = verifier.verify_token(token)?;
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Extractor for authenticated user claims.
pub struct AuthUser(pub Claims);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Claims>()
            .cloned()
            .map(AuthUser)
            .ok_or_else(|| AppError::Unauthenticated("missing credentials".to_string()))
    }
}

/// Extractor that additionally requires the admin role.
pub struct AdminUser(pub Claims);

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthUser(claims) = AuthUser::from_request_parts(parts, state).await?;
        if claims.role != UserRole::Admin {
            return Err(AppError::Forbidden("admin role required".to_string()));
        }
        Ok(AdminUser(claims))
    }
}
