use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::lexicon::MatchResult;

/// Length of the fade applied on both edges of a mute interval
pub const FADE_DURATION: Duration = Duration::from_millis(10);

/// How long the fade-in window stays enabled after the last interval
pub const FADE_IN_FALLBACK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalKind {
    /// Derived from a subtitle cue that matched the lexicon
    Mute,
    /// Supplied from outside as a scene skip
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuteInterval {
    pub start: Duration,
    pub end: Duration,
    pub kind: IntervalKind,
}

impl MuteInterval {
    pub fn new(start: Duration, end: Duration, kind: IntervalKind) -> Self {
        Self { start, end, kind }
    }

    pub fn start_secs(&self) -> f64 {
        self.start.as_secs_f64()
    }

    pub fn end_secs(&self) -> f64 {
        self.end.as_secs_f64()
    }
}

/// Externally supplied range intended for playback skipping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipRange {
    pub id: i64,
    pub start_ms: i64,
    pub end_ms: i64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl SkipRange {
    pub fn new(id: i64, start_ms: i64, end_ms: i64) -> Self {
        Self {
            id,
            start_ms,
            end_ms,
            created_at: Utc::now(),
        }
    }

    fn to_interval(&self) -> Option<MuteInterval> {
        let start = Duration::from_millis(self.start_ms.max(0) as u64);
        let end = Duration::from_millis(self.end_ms.max(0) as u64);
        (start < end).then(|| MuteInterval::new(start, end, IntervalKind::Skip))
    }
}

/// Windows in which the audio filter ramps down before an interval and back up after it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FadeGuard {
    pub fade_out: (Duration, Duration),
    pub fade_in: (Duration, Duration),
}

/// Finalized set of intervals: sorted by start, non-overlapping, touching
/// intervals merged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    intervals: Vec<MuteInterval>,
}

impl Timeline {
    /// Build a timeline from arbitrary intervals
    pub fn from_intervals(intervals: Vec<MuteInterval>) -> Self {
        Self {
            intervals: merge_intervals(intervals),
        }
    }

    pub fn intervals(&self) -> &[MuteInterval] {
        &self.intervals
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    /// Total muted time
    pub fn total_duration(&self) -> Duration {
        self.intervals.iter().map(|i| i.end - i.start).sum()
    }

    /// Fade windows for every interval, in timeline order
    pub fn fade_guards(&self) -> Vec<FadeGuard> {
        self.intervals
            .iter()
            .enumerate()
            .map(|(idx, interval)| {
                let fade_out_start = interval.start.saturating_sub(FADE_DURATION);
                let fade_in_end = match self.intervals.get(idx + 1) {
                    Some(next) => next.start,
                    None => interval.end + FADE_IN_FALLBACK,
                };
                FadeGuard {
                    fade_out: (fade_out_start, interval.start),
                    fade_in: (interval.end, fade_in_end),
                }
            })
            .collect()
    }
}

/// Sort and merge intervals. An interval starting at or before the running
/// end is folded into it; the merged interval is a skip if any member is.
pub fn merge_intervals(mut intervals: Vec<MuteInterval>) -> Vec<MuteInterval> {
    intervals.retain(|i| i.start < i.end);
    intervals.sort_by(|a, b| a.start.cmp(&b.start).then(a.end.cmp(&b.end)));

    let mut merged: Vec<MuteInterval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        match merged.last_mut() {
            Some(last) if interval.start <= last.end => {
                last.end = last.end.max(interval.end);
                if interval.kind == IntervalKind::Skip {
                    last.kind = IntervalKind::Skip;
                }
            }
            _ => merged.push(interval),
        }
    }
    merged
}

/// Convert a padding in seconds to whole milliseconds; negative or NaN pads are treated as zero.
fn pad_duration(pad_seconds: f64) -> Duration {
    if pad_seconds.is_finite() && pad_seconds > 0.0 {
        Duration::from_millis((pad_seconds * 1000.0).round() as u64)
    } else {
        Duration::ZERO
    }
}

/// Compile matched cues and skip ranges into a mute timeline.
///
/// Every matched cue contributes `[start - pad, end + pad]` clamped at zero;
/// every valid skip range contributes its own span. Never fails: empty input
/// gives an empty timeline.
pub fn build_timeline(
    matches: &[MatchResult],
    skip_ranges: &[SkipRange],
    pad_seconds: f64,
) -> Timeline {
    let pad = pad_duration(pad_seconds);

    let mut raw: Vec<MuteInterval> = matches
        .iter()
        .filter(|m| m.matched)
        .map(|m| {
            MuteInterval::new(m.cue.start.saturating_sub(pad), m.cue.end + pad, IntervalKind::Mute)
        })
        .collect();

    for range in skip_ranges {
        match range.to_interval() {
            Some(interval) => raw.push(interval),
            None => warn!(
                "Ignoring skip range {} with empty span ({}ms..{}ms)",
                range.id, range.start_ms, range.end_ms
            ),
        }
    }

    let raw_count = raw.len();
    let timeline = Timeline::from_intervals(raw);
    debug!(
        "Built timeline: {} raw intervals merged into {} ({:.3}s muted)",
        raw_count,
        timeline.len(),
        timeline.total_duration().as_secs_f64()
    );
    timeline
}
