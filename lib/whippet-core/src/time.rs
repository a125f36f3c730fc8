use std::time::SystemTime;

/// Returns the current Unix timestamp, in milliseconds.
pub(crate) fn unix_timestamp_ms() -> u64 {
    let since_unix_epoch = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    since_unix_epoch.as_millis() as u64
}
