use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::ScheduleEntry;
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::AppState;

/// Window bounds in epoch milliseconds, both inclusive.
#[derive(Debug, Deserialize)]
pub struct ScheduleQuery {
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ScheduleEntryResponse {
    pub id: String,
    pub streamer_id: String,
    pub streamer_twitch_id: String,
    pub streamer_name: String,
    pub streamer_image_url: Option<String>,
    pub title: String,
    pub category: Option<String>,
    pub category_image_url: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_recurring: bool,
    pub status: String,
}

impl From<ScheduleEntry> for ScheduleEntryResponse {
    fn from(e: ScheduleEntry) -> Self {
        Self {
            id: e.id,
            streamer_id: e.streamer_id,
            streamer_twitch_id: e.streamer_twitch_id,
            streamer_name: e.streamer_display_name,
            streamer_image_url: e.streamer_image_url,
            title: e.title,
            category: e.category,
            category_image_url: e.category_image_url,
            start_time: e.start_time.and_utc(),
            end_time: e.end_time.and_utc(),
            is_recurring: e.is_recurring,
            status: e.status,
        }
    }
}

fn parse_bound(name: &str, value: Option<i64>) -> AppResult<DateTime<Utc>> {
    let millis = value.ok_or_else(|| AppError::BadRequest(format!("{} is required", name)))?;
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| AppError::BadRequest(format!("{} is out of range", name)))
}

/// Upcoming schedule of the streamers a user tracks. Stale streamers are
/// refreshed from Twitch before reading.
pub async fn get_schedules(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(user_id): Path<String>,
    Query(query): Query<ScheduleQuery>,
) -> AppResult<Json<Vec<ScheduleEntryResponse>>> {
    auth.require_user(&user_id)?;

    let start = parse_bound("start_date", query.start_date)?;
    let end = parse_bound("end_date", query.end_date)?;
    if start > end {
        return Err(AppError::BadRequest(
            "start_date must not be after end_date".to_string(),
        ));
    }

    let entries = state.orchestrator.get_schedules(&user_id, start, end).await?;
    Ok(Json(entries.into_iter().map(Into::into).collect()))
}
