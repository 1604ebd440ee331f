use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One upcoming segment as reported by the streaming platform, before validation.
///
/// Times are kept as the raw RFC 3339 strings the platform sent so that
/// malformed entries can be rejected one by one during reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedSegment {
    pub title: String,
    pub category: Option<String>,
    pub category_image_url: Option<String>,
    pub start_time: String,
    pub end_time: Option<String>,
    pub is_recurring: bool,
    /// The broadcaster cancelled this occurrence.
    pub is_canceled: bool,
}

/// The platform could not be reached or rejected the schedule request.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("authentication failed: {0}")]
    Auth(String),
}

/// Schedule fetch client.
#[async_trait]
pub trait ScheduleSource: Send + Sync {
    /// Current upcoming segments of the broadcaster with the given external id.
    /// A broadcaster without a schedule yields an empty list.
    async fn fetch_schedule(&self, broadcaster_id: &str) -> Result<Vec<FetchedSegment>, FetchError>;
}
