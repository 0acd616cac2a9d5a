//! Public maintenance status handler.

use axum::extract::State;
use axum::Json;

use crate::types::{MaintenanceStatusResponse, Result};
use crate::AppState;

/// Public read of the maintenance flag.
#[utoipa::path(
    get,
    path = "/api/maintenance/status",
    responses(
        (status = 200, description = "Maintenance status", body = MaintenanceStatusResponse)
    ),
    tag = "maintenance"
)]
pub async fn status(State(state): State<AppState>) -> Result<Json<MaintenanceStatusResponse>> {
    let flag = state.meta.maintenance_flag().await?;
    Ok(Json(MaintenanceStatusResponse {
        enabled: flag.enabled,
        title: flag.title,
        message: flag.message,
    }))
}
