use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

use crate::error::{HushError, Result};

static TIMING_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+):(\d{2}):(\d{2})[,.](\d{1,3})\s*-->\s*(\d+):(\d{2}):(\d{2})[,.](\d{1,3})")
        .expect("timing pattern is valid")
});

/// A single timed subtitle entry
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleCue {
    pub index: usize,
    pub start: Duration,
    pub end: Duration,
    pub text: String,
}

impl SubtitleCue {
    pub fn new<S: Into<String>>(index: usize, start: Duration, end: Duration, text: S) -> Self {
        Self {
            index,
            start,
            end,
            text: text.into(),
        }
    }
}

/// Read and parse an SRT file
pub async fn read_srt<P: AsRef<Path>>(path: P) -> Result<Vec<SubtitleCue>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(HushError::FileNotFound(path.display().to_string()));
    }

    let bytes = fs::read(path).await?;
    let content = String::from_utf8_lossy(&bytes);
    let cues = parse_srt(&content, &path.display().to_string())?;

    info!("Parsed {} subtitle cues from {}", cues.len(), path.display());
    Ok(cues)
}

/// Parse SRT content. `source_name` only appears in error messages.
pub fn parse_srt(content: &str, source_name: &str) -> Result<Vec<SubtitleCue>> {
    let content = content.trim_start_matches('\u{feff}');
    let mut cues = Vec::new();
    let mut lines = content.lines().map(|l| l.trim_end_matches('\r')).enumerate().peekable();

    loop {
        // Skip blank separators
        while matches!(lines.peek(), Some((_, l)) if l.trim().is_empty()) {
            lines.next();
        }
        let Some((line_no, first)) = lines.next() else {
            break;
        };

        // The index line is optional in the wild; accept a timing line directly
        let (timing_no, timing, index) = if TIMING_REGEX.is_match(first.trim()) {
            (line_no, first, cues.len() + 1)
        } else {
            let index: usize = first.trim().parse().map_err(|_| {
                let message = format!("expected cue index, found '{}'", first.trim());
                HushError::format(source_name, line_no + 1, message)
            })?;
            let Some((timing_no, timing)) = lines.next() else {
                return Err(HushError::format(source_name, line_no + 2, "missing timing line"));
            };
            (timing_no, timing, index)
        };

        let (start, end) = parse_timing(timing.trim())
            .ok_or_else(|| {
                let message = format!("malformed timing '{}'", timing.trim());
                HushError::format(source_name, timing_no + 1, message)
            })?;
        if end < start {
            return Err(HushError::format(source_name, timing_no + 1, "cue ends before it starts"));
        }

        let mut text_lines = Vec::new();
        while let Some((_, l)) = lines.peek() {
            if l.trim().is_empty() {
                break;
            }
            text_lines.push(*l);
            lines.next();
        }

        cues.push(SubtitleCue::new(index, start, end, text_lines.join("\n")));
    }

    debug!("Parsed {} cues from {}", cues.len(), source_name);
    Ok(cues)
}

fn parse_timing(line: &str) -> Option<(Duration, Duration)> {
    let caps = TIMING_REGEX.captures(line)?;
    let part = |i: usize| -> Option<u64> { caps.get(i)?.as_str().parse().ok() };
    let millis = |i: usize| -> Option<u64> {
        // "5" means 500ms, "05" means 50ms
        let raw = caps.get(i)?.as_str();
        let value: u64 = raw.parse().ok()?;
        Some(value * 10u64.pow(3 - raw.len() as u32))
    };

    let to_duration = |h: u64, m: u64, s: u64, ms: u64| -> Option<Duration> {
        if m >= 60 || s >= 60 {
            return None;
        }
        Some(Duration::from_millis(h * 3_600_000 + m * 60_000 + s * 1_000 + ms))
    };

    let start = to_duration(part(1)?, part(2)?, part(3)?, millis(4)?)?;
    let end = to_duration(part(5)?, part(6)?, part(7)?, millis(8)?)?;
    Some((start, end))
}

/// Render cues as SRT text, renumbering them from 1
pub fn render_srt(cues: &[SubtitleCue]) -> String {
    let mut srt_content = String::new();

    for (index, cue) in cues.iter().enumerate() {
        srt_content.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            format_srt_time(cue.start),
            format_srt_time(cue.end),
            cue.text.trim()
        ));
    }

    srt_content
}

/// Write cues to an SRT file
pub async fn write_srt<P: AsRef<Path>>(cues: &[SubtitleCue], output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();
    info!("Writing SRT file: {}", output_path.display());

    fs::write(output_path, render_srt(cues)).await?;

    debug!("Wrote {} cues", cues.len());
    Ok(())
}

/// Format a duration to SRT time format (HH:MM:SS,mmm)
pub fn format_srt_time(time: Duration) -> String {
    let total_milliseconds = time.as_millis() as u64;
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}
