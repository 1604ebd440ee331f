//! Shared fixtures for unit tests: in-memory database, manual clock and a
//! scripted schedule source.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{ScheduleSegment, SegmentStatus, Streamer, User};
use crate::services::clock::Clock;
use crate::services::source::{FetchError, FetchedSegment, ScheduleSource};

/// Fresh in-memory database with the schema applied.
///
/// A single connection keeps every query on the same in-memory database.
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");
    pool
}

/// `"2024-03-01 12:00:00"` as a UTC timestamp.
pub fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").expect("timestamp literal")
}

pub async fn insert_user(pool: &SqlitePool, username: &str) -> User {
    let now = at("2024-01-01 00:00:00");
    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, twitch_id, username, profile_image_url, created_at, updated_at)
        VALUES (?, ?, ?, NULL, ?, ?)
        RETURNING id, twitch_id, username, profile_image_url, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(format!("u-{}", username))
    .bind(username)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await
    .expect("insert user")
}

pub async fn insert_streamer(pool: &SqlitePool, twitch_id: &str, active: bool) -> Streamer {
    let now = at("2024-01-01 00:00:00");
    sqlx::query_as::<_, Streamer>(
        r#"
        INSERT INTO streamers (id, twitch_id, display_name, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING id, twitch_id, display_name, profile_image_url, compressed_image_url,
                  is_active, last_schedule_update, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(twitch_id)
    .bind(format!("streamer_{}", twitch_id))
    .bind(active)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await
    .expect("insert streamer")
}

pub async fn insert_segment(
    pool: &SqlitePool,
    streamer_id: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
    status: SegmentStatus,
) -> ScheduleSegment {
    sqlx::query_as::<_, ScheduleSegment>(
        r#"
        INSERT INTO schedule_segments (
            id, streamer_id, title, start_time, end_time, is_recurring, status,
            created_at, updated_at
        )
        VALUES (?, ?, 'Stream', ?, ?, 0, ?, ?, ?)
        RETURNING id, streamer_id, title, category, category_image_url,
                  start_time, end_time, is_recurring, status, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(streamer_id)
    .bind(start)
    .bind(end)
    .bind(status.as_str())
    .bind(start)
    .bind(start)
    .fetch_one(pool)
    .await
    .expect("insert segment")
}

/// A valid fetched segment with RFC 3339 bounds.
pub fn fetched(start: &str, end: &str) -> FetchedSegment {
    FetchedSegment {
        title: "Stream".to_string(),
        category: Some("Just Chatting".to_string()),
        category_image_url: None,
        start_time: start.to_string(),
        end_time: Some(end.to_string()),
        is_recurring: false,
        is_canceled: false,
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(s: &str) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(at(s).and_utc()),
        })
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Schedule source answering from a fixed table; unknown broadcasters have
/// an empty schedule.
#[derive(Default)]
pub struct FakeSource {
    schedules: HashMap<String, Vec<FetchedSegment>>,
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn with_schedule(mut self, broadcaster_id: &str, segments: Vec<FetchedSegment>) -> Self {
        self.schedules.insert(broadcaster_id.to_string(), segments);
        self
    }

    pub fn failing(mut self, broadcaster_id: &str) -> Self {
        self.failing.insert(broadcaster_id.to_string());
        self
    }

    /// Broadcaster ids fetched so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScheduleSource for FakeSource {
    async fn fetch_schedule(&self, broadcaster_id: &str) -> Result<Vec<FetchedSegment>, FetchError> {
        self.calls.lock().unwrap().push(broadcaster_id.to_string());
        if self.failing.contains(broadcaster_id) {
            return Err(FetchError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(self
            .schedules
            .get(broadcaster_id)
            .cloned()
            .unwrap_or_default())
    }
}
