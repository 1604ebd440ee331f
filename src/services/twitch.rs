use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::RwLock;

use crate::config::TwitchConfig;
use crate::services::source::{FetchError, FetchedSegment, ScheduleSource};

const TWITCH_AUTH_URL: &str = "https://id.twitch.tv/oauth2";
const TWITCH_API_URL: &str = "https://api.twitch.tv/helix";
const BOX_ART_URL: &str = "https://static-cdn.jtvnw.net/ttv-boxart";

/// Segments requested per page (Helix maximum).
const PAGE_SIZE: u32 = 25;
/// Hard stop for cursors that never run out.
const MAX_PAGES: usize = 10;

/// Helix client for broadcaster schedules, authenticated with an app access token.
#[derive(Debug, Clone)]
pub struct TwitchService {
    client: Client,
    client_id: String,
    client_secret: String,
    app_access_token: Arc<RwLock<Option<AppAccessToken>>>,
}

#[derive(Debug, Clone)]
pub struct AppAccessToken {
    pub token: String,
    pub expires_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct AppAccessTokenResponse {
    access_token: String,
    expires_in: i64,
}

// ============================================================================
// Schedule Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ScheduleResponse {
    data: ScheduleData,
    #[serde(default)]
    pagination: Pagination,
}

#[derive(Debug, Deserialize)]
struct ScheduleData {
    /// `null` when the broadcaster has no upcoming segment
    segments: Option<Vec<HelixSegment>>,
}

#[derive(Debug, Default, Deserialize)]
struct Pagination {
    cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct HelixSegment {
    start_time: String,
    end_time: Option<String>,
    title: String,
    canceled_until: Option<String>,
    category: Option<HelixCategory>,
    is_recurring: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct HelixCategory {
    id: String,
    name: String,
}

/// Box art of a category at the size shown in the schedule view.
pub fn box_art_url(category_id: &str) -> String {
    format!("{}/{}-144x192.jpg", BOX_ART_URL, category_id)
}

impl From<HelixSegment> for FetchedSegment {
    fn from(segment: HelixSegment) -> Self {
        let (category, category_image_url) = match segment.category {
            Some(c) => (Some(c.name), Some(box_art_url(&c.id))),
            None => (None, None),
        };

        FetchedSegment {
            title: segment.title,
            category,
            category_image_url,
            start_time: segment.start_time,
            end_time: segment.end_time,
            is_recurring: segment.is_recurring,
            is_canceled: segment.canceled_until.is_some(),
        }
    }
}

impl TwitchService {
    /// Build the client. The app token is requested on first use.
    pub fn new(config: &TwitchConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            app_access_token: Arc::new(RwLock::new(None)),
        })
    }

    /// Request a new app access token (client-credentials grant) and cache it.
    async fn refresh_app_access_token(&self) -> Result<String, FetchError> {
        let response = self
            .client
            .post(format!("{}/token", TWITCH_AUTH_URL))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Auth(format!("app token request rejected: {}", body)));
        }

        let token_response: AppAccessTokenResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(format!("token response: {}", e)))?;

        let expires_at = Utc::now() + Duration::seconds(token_response.expires_in);
        let token = token_response.access_token;

        *self.app_access_token.write().await = Some(AppAccessToken {
            token: token.clone(),
            expires_at,
        });

        tracing::info!("Refreshed Twitch app access token; expires at {}", expires_at);
        Ok(token)
    }

    /// Cached app token, refreshed when it expires within a minute.
    async fn app_access_token(&self) -> Result<String, FetchError> {
        const REFRESH_MARGIN_SECS: i64 = 60;

        {
            let guard = self.app_access_token.read().await;
            if let Some(ref t) = *guard {
                if t.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > Utc::now() {
                    return Ok(t.token.clone());
                }
            }
        }

        self.refresh_app_access_token().await
    }

    /// Send an authenticated Helix request. A 401 invalidates the cached token
    /// and the request is sent once more with a fresh one.
    async fn send_helix<F>(&self, build: F) -> Result<Response, FetchError>
    where
        F: Fn() -> RequestBuilder,
    {
        let token = self.app_access_token().await?;
        let response = build()
            .header("Client-Id", &self.client_id)
            .bearer_auth(&token)
            .send()
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::warn!("Helix rejected the app access token, requesting a new one");
        let token = self.refresh_app_access_token().await?;
        Ok(build()
            .header("Client-Id", &self.client_id)
            .bearer_auth(&token)
            .send()
            .await?)
    }

    /// Every upcoming segment of a broadcaster, following pagination.
    /// `None` when the broadcaster has no schedule at all.
    async fn get_schedule(&self, broadcaster_id: &str) -> Result<Option<Vec<HelixSegment>>, FetchError> {
        let mut segments = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let after = cursor.clone();
            let response = self
                .send_helix(|| {
                    let mut query = vec![
                        ("broadcaster_id", broadcaster_id.to_string()),
                        ("first", PAGE_SIZE.to_string()),
                    ];
                    if let Some(ref after) = after {
                        query.push(("after", after.clone()));
                    }
                    self.client
                        .get(format!("{}/schedule", TWITCH_API_URL))
                        .query(&query)
                })
                .await?;

            // 404 is returned when there's no schedule
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(if segments.is_empty() { None } else { Some(segments) });
            }

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(FetchError::Status { status, body });
            }

            let page: ScheduleResponse = response
                .json()
                .await
                .map_err(|e| FetchError::Decode(format!("schedule response: {}", e)))?;

            segments.extend(page.data.segments.unwrap_or_default());

            match page.pagination.cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(Some(segments)),
            }
        }

        tracing::warn!(
            "Schedule of broadcaster {} exceeded {} pages, keeping what was read",
            broadcaster_id,
            MAX_PAGES
        );
        Ok(Some(segments))
    }
}

#[async_trait]
impl ScheduleSource for TwitchService {
    async fn fetch_schedule(&self, broadcaster_id: &str) -> Result<Vec<FetchedSegment>, FetchError> {
        let segments = self.get_schedule(broadcaster_id).await?.unwrap_or_default();
        tracing::debug!(
            "Fetched {} schedule segments for broadcaster {}",
            segments.len(),
            broadcaster_id
        );
        Ok(segments.into_iter().map(FetchedSegment::from).collect())
    }
}
