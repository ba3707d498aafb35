use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// One flush of `key=value` lines from the tool's machine-readable progress output
pub type ProgressBlock = HashMap<String, String>;

/// Smoothing factor for the exponential moving average of the percentage
pub const SMOOTHING_ALPHA: f64 = 0.25;

/// Minimum spacing between two emitted snapshots
pub const EMIT_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub out_time_micros: i64,
    pub percent: Option<f64>,
    pub smoothed_percent: Option<f64>,
    pub speed_multiplier: Option<f64>,
    pub eta_seconds: Option<u64>,
}

impl ProgressSnapshot {
    pub fn out_time_secs(&self) -> f64 {
        self.out_time_micros as f64 / 1_000_000.0
    }
}

/// Output time in microseconds. `out_time_ms` carries microseconds despite its name.
pub fn parse_out_time_micros(block: &ProgressBlock) -> Option<i64> {
    ["out_time_us", "out_time_ms"]
        .iter()
        .find_map(|key| block.get(*key).and_then(|v| v.trim().parse::<i64>().ok()))
}

/// Parse `8.18x` style speed values
pub fn parse_speed(value: &str) -> Option<f64> {
    let value = value.trim();
    let number = value.strip_suffix('x').unwrap_or(value).trim();
    number.parse::<f64>().ok().filter(|s| s.is_finite())
}

/// Whether this block is the tool's final report
pub fn is_final_block(block: &ProgressBlock) -> bool {
    block.get("progress").map(|v| v.trim() == "end").unwrap_or(false)
}

/// Turns raw progress blocks into throttled, smoothed snapshots.
pub struct ProgressNormalizer {
    total_duration: Option<f64>,
    smoothed: Option<f64>,
    last_emit: Option<Instant>,
    interval: Duration,
}

impl ProgressNormalizer {
    /// `total_duration` is the input length in seconds, when known
    pub fn new(total_duration: Option<f64>) -> Self {
        Self {
            total_duration: total_duration.filter(|d| d.is_finite() && *d > 0.0),
            smoothed: None,
            last_emit: None,
            interval: EMIT_INTERVAL,
        }
    }

    /// Compute a snapshot for `block` without throttling
    pub fn snapshot(&mut self, block: &ProgressBlock) -> Option<ProgressSnapshot> {
        let out_time_micros = parse_out_time_micros(block)?;
        let out_secs = out_time_micros.max(0) as f64 / 1_000_000.0;

        let percent = self
            .total_duration
            .map(|total| (out_secs / total * 100.0).clamp(0.0, 100.0));

        let smoothed_percent = percent.map(|raw| {
            let next = match self.smoothed {
                Some(s) => s + SMOOTHING_ALPHA * (raw - s),
                None => raw,
            };
            self.smoothed = Some(next);
            next
        });

        let speed_multiplier = block.get("speed").and_then(|v| parse_speed(v));

        let eta_seconds = match (self.total_duration, speed_multiplier) {
            (Some(total), Some(speed)) if speed > 0.0 => {
                Some(((total - out_secs) / speed).max(0.0).floor() as u64)
            }
            _ => None,
        };

        Some(ProgressSnapshot {
            out_time_micros,
            percent,
            smoothed_percent,
            speed_multiplier,
            eta_seconds,
        })
    }

    /// Feed one block; returns a snapshot when one is due. The smoothing state
    /// advances on every block, emission is limited to one per interval except
    /// for the final block.
    pub fn observe(&mut self, block: &ProgressBlock, now: Instant) -> Option<ProgressSnapshot> {
        let snapshot = self.snapshot(block)?;

        let due = match self.last_emit {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if !due && !is_final_block(block) {
            return None;
        }

        self.last_emit = Some(now);
        Some(snapshot)
    }
}
