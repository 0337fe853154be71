use chrono::Utc;

/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// UTC wall-clock label used at the head of relay log lines.
pub fn utc_timestamp_label() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
