//! Low-level helpers shared by the relay crates.
//!
//! Provides crash-safe file replacement, the rotating local log writer, and
//! clock helpers used to stamp log lines.

pub mod atomic_io;
pub mod log_rotation;
pub mod time_utils;

pub use atomic_io::{
    remove_stale_staged_writes, stage_bytes_atomic, write_text_atomic, StagedWrite,
};
pub use log_rotation::{append_line_with_rotation, LogRotationPolicy};
pub use time_utils::{current_unix_timestamp_ms, utc_timestamp_label};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_unix_timestamp_ms_is_monotonic_enough() {
        let first = current_unix_timestamp_ms();
        let second = current_unix_timestamp_ms();
        assert!(first > 1_600_000_000_000);
        assert!(second >= first);
    }

    #[test]
    fn unit_utc_timestamp_label_has_fixed_shape() {
        let label = utc_timestamp_label();
        assert_eq!(label.len(), "2024-01-01 00:00:00".len());
        assert_eq!(&label[4..5], "-");
        assert_eq!(&label[10..11], " ");
    }
}
