//! Route table for the `/api` surface.

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use crate::auth::jwt::AuthVerifier;
use crate::auth::middleware::auth_middleware;
use crate::AppState;

/// Build the `/api` router. Bearer auth covers everything except the
/// public maintenance status; the admin group additionally requires the
/// admin role via the `AdminUser` extractor.
pub fn create_router(verifier: Arc<AuthVerifier>) -> Router<AppState> {
    let public_routes = Router::new().route(
        "/maintenance/status",
        get(crate::api::handlers::maintenance::status),
    );

    let user_routes = Router::new()
        .route("/user/ask", post(crate::api::handlers::query::ask))
        .route("/user/search", post(crate::api::handlers::query::search))
        .route(
            "/user/search-history",
            get(crate::api::handlers::query::search_history),
        )
        .route("/user/feedback", post(crate::api::handlers::account::feedback))
        .route("/user/credits", get(crate::api::handlers::account::credits))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&verifier),
            auth_middleware,
        ));

    let admin_routes = Router::new()
        .route(
            "/admin/documents/upload",
            post(crate::api::handlers::admin::upload),
        )
        .route(
            "/admin/documents",
            get(crate::api::handlers::admin::list_documents),
        )
        .route(
            "/admin/documents/{id}",
            delete(crate::api::handlers::admin::delete_document),
        )
        .route_layer(middleware::from_fn_with_state(verifier, auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(user_routes)
        .merge(admin_routes)
}
