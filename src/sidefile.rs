use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::info;

use crate::error::{HushError, Result};
use crate::timeline::{IntervalKind, SkipRange, Timeline};

/// Render an edit-decision list: `start<TAB>end<TAB>action` per interval,
/// seconds with millisecond precision. Action 1 mutes, action 0 cuts.
pub fn render_edl(timeline: &Timeline) -> String {
    timeline
        .intervals()
        .iter()
        .map(|i| {
            let action = match i.kind {
                IntervalKind::Mute => 1,
                IntervalKind::Skip => 0,
            };
            format!("{:.3}\t{:.3}\t{}\n", i.start_secs(), i.end_secs(), action)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataMarker {
    pub start: f64,
    pub end: f64,
    pub mode: String,
}

/// Document consumed by third-party playback-skip integrations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataDocument {
    pub id: String,
    pub markers: Vec<MetadataMarker>,
}

impl MetadataDocument {
    pub fn from_timeline<S: Into<String>>(content_id: S, timeline: &Timeline) -> Self {
        let markers = timeline
            .intervals()
            .iter()
            .map(|i| MetadataMarker {
                start: round_millis(i.start_secs()),
                end: round_millis(i.end_secs()),
                mode: match i.kind {
                    IntervalKind::Mute => "volume".to_string(),
                    IntervalKind::Skip => "skip".to_string(),
                },
            })
            .collect();

        Self {
            id: content_id.into(),
            markers,
        }
    }
}

fn round_millis(secs: f64) -> f64 {
    (secs * 1000.0).round() / 1000.0
}

pub fn render_metadata<S: Into<String>>(content_id: S, timeline: &Timeline) -> Result<String> {
    Ok(serde_json::to_string_pretty(&MetadataDocument::from_timeline(content_id, timeline))?)
}

/// Load a skip-range side file (JSON array of `{id, start_ms, end_ms}`)
pub async fn load_skip_ranges<P: AsRef<Path>>(path: P) -> Result<Vec<SkipRange>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(HushError::FileNotFound(path.display().to_string()));
    }

    let content = fs::read_to_string(path).await?;
    let ranges: Vec<SkipRange> = serde_json::from_str(&content)?;

    info!("Loaded {} skip ranges from {}", ranges.len(), path.display());
    Ok(ranges)
}
