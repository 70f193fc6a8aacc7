use std::{future::Future, time};

use crate::error::Result;

/// Get the current system time in milliseconds from epoch.
///
/// Play events, playlists and cache entries are stamped with this value.
///
/// # Panics
///
/// Panics if the system time is before epoch.
#[must_use]
pub fn now_from_epoch_ms() -> u64 {
    let elapsed = time::SystemTime::now()
        .duration_since(time::UNIX_EPOCH)
        .expect("system time is before epoch");

    // Milliseconds since epoch fit in `u64` for the next half a billion years.
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Formats an epoch timestamp in milliseconds for humans.
///
/// Falls back to the raw number when the value is out of range.
#[must_use]
pub fn format_epoch_ms(millis: u64) -> String {
    time::UNIX_EPOCH
        .checked_add(time::Duration::from_millis(millis))
        .map(::time::OffsetDateTime::from)
        .map_or_else(|| millis.to_string(), |datetime| datetime.to_string())
}

/// Runs `future` to completion or until `duration` elapses, whichever is
/// first. Elapsing maps to [`FetchTimeout`](crate::error::ErrorKind::FetchTimeout).
pub async fn timeout<T>(
    duration: time::Duration,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(duration, future).await?
}
