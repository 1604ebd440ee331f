use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, patch},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::models::{CreateStreamer, Streamer, TrackedStreamer, UpdatePreferences, UserStreamer};
use crate::db::{StreamerRepository, TrackingRepository, UserRepository};
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::routes::schedules::get_schedules;
use crate::AppState;

/// Router for per-user endpoints: schedules, tracked streamers, preferences
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:user_id/schedules", get(get_schedules))
        .route(
            "/:user_id/streamers",
            get(list_streamers).post(track_streamer),
        )
        .route("/:user_id/streamers/:streamer_id", delete(untrack_streamer))
        .route("/:user_id/preferences", patch(update_preferences))
}

#[derive(Debug, Deserialize)]
pub struct TrackStreamerRequest {
    /// Broadcaster id on Twitch
    pub twitch_id: String,
    pub display_name: String,
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TrackStreamerResponse {
    pub streamer: Streamer,
    pub tracking: UserStreamer,
}

#[derive(Debug, Deserialize)]
pub struct PreferencesRequest {
    pub streamer_id: String,
    #[serde(flatten)]
    pub update: UpdatePreferences,
}

async fn list_streamers(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> AppResult<Json<Vec<TrackedStreamer>>> {
    auth.require_user(&user_id)?;
    let streamers = TrackingRepository::list_for_user(&state.db, &user_id).await?;
    Ok(Json(streamers))
}

/// Start tracking a streamer. The streamer is created on first reference and
/// reactivated if the weekly audit had deactivated it.
async fn track_streamer(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(user_id): Path<String>,
    Json(req): Json<TrackStreamerRequest>,
) -> AppResult<(StatusCode, Json<TrackStreamerResponse>)> {
    auth.require_user(&user_id)?;

    let twitch_id = req.twitch_id.trim();
    let display_name = req.display_name.trim();
    if twitch_id.is_empty() || display_name.is_empty() {
        return Err(AppError::Validation(
            "twitch_id and display_name are required".to_string(),
        ));
    }

    UserRepository::find_by_id(&state.db, &user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {}", user_id)))?;

    let now = state.clock.now().naive_utc();
    let streamer = StreamerRepository::get_or_create(
        &state.db,
        &CreateStreamer {
            twitch_id: twitch_id.to_string(),
            display_name: display_name.to_string(),
            profile_image_url: req.profile_image_url,
        },
        now,
    )
    .await?;
    let tracking = TrackingRepository::track(&state.db, &user_id, &streamer.id, now).await?;

    tracing::info!("User {} now tracks streamer {}", user_id, streamer.twitch_id);
    Ok((
        StatusCode::CREATED,
        Json(TrackStreamerResponse { streamer, tracking }),
    ))
}

async fn untrack_streamer(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path((user_id, streamer_id)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    auth.require_user(&user_id)?;

    if !TrackingRepository::untrack(&state.db, &user_id, &streamer_id).await? {
        return Err(AppError::NotFound(format!("streamer {}", streamer_id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn update_preferences(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(user_id): Path<String>,
    Json(req): Json<PreferencesRequest>,
) -> AppResult<Json<UserStreamer>> {
    auth.require_user(&user_id)?;

    TrackingRepository::update_preferences(&state.db, &user_id, &req.streamer_id, &req.update)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("streamer {}", req.streamer_id)))
}
