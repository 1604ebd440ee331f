use chrono::{DateTime, Duration, Utc};

/// Whether a streamer's schedule should be refetched.
///
/// True when it was never refreshed or when at least `threshold` has passed
/// since the last refresh (the boundary counts as stale).
pub fn needs_refresh(
    last_update: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    threshold: Duration,
) -> bool {
    match last_update {
        None => true,
        Some(last) => now - last >= threshold,
    }
}
