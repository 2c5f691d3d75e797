//! Timestamp utilities

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// A file's modification time as fractional seconds since the Unix epoch —
/// the cache-witness representation used throughout the engine (spec §3).
pub fn mtime_seconds(meta: &std::fs::Metadata) -> std::io::Result<f64> {
    let mtime = meta.modified()?;
    Ok(match mtime.duration_since(std::time::UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    })
}
