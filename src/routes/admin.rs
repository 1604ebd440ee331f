use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};

use crate::error::AppResult;
use crate::routes::auth::AuthUser;
use crate::services::orchestrator::CleanupReport;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/cleanup", post(trigger_cleanup))
}

/// Run the retention sweep and the activity audit now, outside their schedule.
async fn trigger_cleanup(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> AppResult<Json<CleanupReport>> {
    auth.require_admin()?;
    tracing::info!("Manual cleanup requested by {}", auth.0.sub);

    let report = state.orchestrator.trigger_cleanup().await?;
    Ok(Json(report))
}
