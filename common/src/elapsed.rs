use std::time::Duration;
use std::time::Instant;

/// Time since `start` formatted like `"850ms"`, `"1.50s"` or `"1m15s"`.
pub fn format_elapsed(start: Instant) -> String {
    format_duration(start.elapsed())
}

pub fn format_duration(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    if millis < 1_000 {
        format!("{millis}ms")
    } else if millis < 60_000 {
        format!("{:.2}s", elapsed.as_secs_f64())
    } else {
        let minutes = millis / 60_000;
        let seconds = (millis % 60_000) / 1_000;
        format!("{minutes}m{seconds}s")
    }
}
