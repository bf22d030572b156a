use std::time::Duration;

const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
const BAR_CELLS: usize = 20;

pub fn humanize_bytes(n: u64) -> String {
    if n == 0 {
        return "0 B".to_string();
    }
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// Renders milliseconds as `"1d 2h 3m 4s"`, dropping zero leading units.
pub fn format_duration(milliseconds: u64) -> String {
    let total = milliseconds / 1000;
    let parts = [
        (total / 86_400, "d"),
        (total % 86_400 / 3_600, "h"),
        (total % 3_600 / 60, "m"),
        (total % 60, "s"),
    ];

    match parts.iter().position(|(value, _)| *value > 0) {
        Some(first) => parts[first..]
            .iter()
            .map(|(value, unit)| format!("{}{}", value, unit))
            .collect::<Vec<_>>()
            .join(" "),
        None => "0s".to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressStats {
    pub percentage: f64,
    pub bytes_per_sec: f64,
    pub eta_ms: u64,
}

impl ProgressStats {
    pub fn compute(total: u64, done: u64, elapsed_seconds: f64) -> Self {
        let percentage = if total > 0 {
            done as f64 * 100.0 / total as f64
        } else {
            0.0
        };
        let bytes_per_sec = if elapsed_seconds > 0.0 {
            done as f64 / elapsed_seconds
        } else {
            0.0
        };
        let eta_ms = if bytes_per_sec > 0.0 {
            (total.saturating_sub(done) as f64 / bytes_per_sec * 1000.0).round() as u64
        } else {
            0
        };
        Self {
            percentage,
            bytes_per_sec,
            eta_ms,
        }
    }
}

pub fn render_status(url: &str, total: u64, downloaded: u64, elapsed_seconds: f64) -> String {
    let stats = ProgressStats::compute(total, downloaded, elapsed_seconds);
    format!(
        "**Download Status**\nPercentage: {:.1}%\nURL: {}\nFile Size: {}\nDownloaded: {}\nSpeed: {}/s\nETA: {}",
        stats.percentage,
        url,
        humanize_bytes(total),
        humanize_bytes(downloaded),
        humanize_bytes(stats.bytes_per_sec as u64),
        format_duration(stats.eta_ms),
    )
}

pub fn render_upload(header: &str, current: u64, total: u64, elapsed_seconds: f64) -> String {
    let stats = ProgressStats::compute(total, current, elapsed_seconds);
    let filled = ((stats.percentage / 100.0) * BAR_CELLS as f64)
        .floor()
        .clamp(0.0, BAR_CELLS as f64) as usize;
    format!(
        "{}\n[{}{}] {:.1}%\n{} of {}\nSpeed: {}/s\nETA: {}",
        header,
        "■".repeat(filled),
        "□".repeat(BAR_CELLS - filled),
        stats.percentage,
        humanize_bytes(current),
        humanize_bytes(total),
        humanize_bytes(stats.bytes_per_sec as u64),
        format_duration(stats.eta_ms),
    )
}

/// Lets a progress update through when elapsed time enters a new interval
/// window, or when the transfer has just completed.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval_ms: u128,
    last_window: u128,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis().max(1),
            last_window: 0,
        }
    }

    pub fn should_emit(&mut self, elapsed: Duration, complete: bool) -> bool {
        let window = elapsed.as_millis() / self.interval_ms;
        if window > self.last_window {
            self.last_window = window;
            return true;
        }
        complete
    }
}
