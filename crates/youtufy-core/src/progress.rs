//! Progress and seek arithmetic.

use youtufy_types::ProgressSnapshot;

/// Format whole seconds as `MM:SS`. Minutes are not wrapped into hours.
pub fn format_time(seconds: u64) -> String {
    let mins = seconds / 60;
    let secs = seconds % 60;
    format!("{mins:02}:{secs:02}")
}

/// Format a millisecond position as `MM:SS`.
pub fn format_time_ms(ms: u64) -> String {
    format_time(ms / 1000)
}

/// Absolute seek target for a slider fraction. Fractions outside `[0, 1]` clamp.
pub fn seek_target_ms(fraction: f64, duration_ms: u64) -> u64 {
    let fraction = if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    };
    let target = (fraction * duration_ms as f64).round() as u64;
    target.min(duration_ms)
}

/// Build a snapshot with the position clamped to a known duration.
pub fn snapshot(position_ms: u64, duration_ms: u64) -> ProgressSnapshot {
    let position_ms = if duration_ms > 0 {
        position_ms.min(duration_ms)
    } else {
        position_ms
    };
    ProgressSnapshot {
        position_ms,
        duration_ms,
    }
}
