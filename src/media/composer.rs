use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::config::{ProcessingConfig, SubtitleMode, default_thread_count, params_copy_stream};
use crate::error::{HushError, Result};
use crate::sidefile::{render_edl, render_metadata};
use crate::timeline::Timeline;
use super::{MediaCommand, MediaCommandBuilder};

/// Folds surround channels into stereo, keeping the dialogue-heavy center channel
pub const DOWNMIX_FILTER: &str = "pan=stereo|FL=FC+0.30*FL+0.30*BL|FR=FC+0.30*FR+0.30*BR";

/// A side file to be written next to the output
#[derive(Debug, Clone, PartialEq)]
pub struct SideOutput {
    pub path: PathBuf,
    pub contents: String,
}

/// Seconds with millisecond precision, as the filter expressions expect
fn secs(d: Duration) -> String {
    format!("{:.3}", d.as_secs_f64())
}

/// Audio filter chain muting every timeline interval, with short fades on both
/// edges. `None` when there is nothing to filter.
pub fn audio_filter_graph(timeline: &Timeline, downmix: bool) -> Option<String> {
    let fade = secs(crate::timeline::FADE_DURATION);
    let mut filters = Vec::new();

    if downmix {
        filters.push(DOWNMIX_FILTER.to_string());
    }

    for (interval, guard) in timeline.intervals().iter().zip(timeline.fade_guards()) {
        let (out_start, out_end) = guard.fade_out;
        let (in_start, in_end) = guard.fade_in;

        if out_start < out_end {
            filters.push(format!(
                "afade=enable='between(t,{},{})':t=out:st={}:d={}",
                secs(out_start),
                secs(out_end),
                secs(out_start),
                fade
            ));
        }
        filters.push(format!(
            "volume=enable='between(t,{},{})':volume=0",
            secs(interval.start),
            secs(interval.end)
        ));
        filters.push(format!(
            "afade=enable='between(t,{},{})':t=in:st={}:d={}",
            secs(in_start),
            secs(in_end),
            secs(in_start),
            fade
        ));
    }

    (!filters.is_empty()).then(|| filters.join(","))
}

/// Escape a path for use inside a filter argument such as `subtitles='...'`
pub fn escape_filter_path(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            ':' => escaped.push_str("\\:"),
            '\'' => escaped.push_str("'\\''"),
            ',' | '[' | ']' | ';' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Subtitle codec the output container accepts
fn subtitle_codec_for(output: &Path) -> &'static str {
    let ext = output
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" | "m4v" | "mov" => "mov_text",
        _ => "srt",
    }
}

/// Translates a processing configuration and a mute timeline into the remux
/// command line.
pub struct CommandComposer {
    builder: MediaCommandBuilder,
}

impl CommandComposer {
    pub fn new(builder: MediaCommandBuilder) -> Self {
        Self { builder }
    }

    /// Check the options that depend on what the pipeline produced
    fn check(&self, config: &ProcessingConfig, subtitle: Option<&Path>) -> Result<()> {
        config.validate()?;
        match (config.subtitle_mode, subtitle) {
            (SubtitleMode::Embed, None) => Err(HushError::Config(
                "Embedding subtitles requires a subtitle file".to_string(),
            )),
            (SubtitleMode::Hardcode, None) => Err(HushError::Config(
                "Hardcoding subtitles requires a subtitle file".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Whether the audio track has to go through an encoder
    pub fn audio_needs_encode(config: &ProcessingConfig, timeline: &Timeline) -> bool {
        !timeline.is_empty() || config.downmix || config.reencode_audio
    }

    /// Whether the video track has to go through an encoder
    pub fn video_needs_encode(config: &ProcessingConfig) -> bool {
        config.reencode_video || config.subtitle_mode == SubtitleMode::Hardcode
    }

    pub fn compose(
        &self,
        config: &ProcessingConfig,
        timeline: &Timeline,
        subtitle: Option<&Path>,
    ) -> Result<MediaCommand> {
        self.check(config, subtitle)?;

        let threads_input = config.threads_input.unwrap_or_else(default_thread_count);
        let threads_encoding = config.threads_encoding.unwrap_or_else(default_thread_count);
        let embed = match (config.subtitle_mode, subtitle) {
            (SubtitleMode::Embed, Some(path)) => Some(path),
            _ => None,
        };

        let mut cmd = self
            .builder
            .custom("Remux")
            .quiet()
            .overwrite()
            .threads(threads_input)
            .input(&config.input);
        if let Some(path) = embed {
            cmd = cmd.input(path);
        }

        cmd = cmd
            .map("0:v:0?")
            .map(format!("0:a:{}", config.audio_stream_index.unwrap_or(0)));
        if embed.is_some() {
            cmd = cmd
                .map("1:0")
                .subtitle_codec(subtitle_codec_for(&config.output))
                .arg("-metadata:s:s:0")
                .arg(format!("language={}", config.subtitle_language))
                .arg("-disposition:s:0")
                .arg("default");
        }

        // Video
        if Self::video_needs_encode(config) {
            if let (SubtitleMode::Hardcode, Some(path)) = (config.subtitle_mode, subtitle) {
                cmd = cmd.video_filter(format!("subtitles='{}'", escape_filter_path(path)));
            }
            cmd = cmd.args(config.video_params.iter().cloned());
        } else {
            cmd = cmd.copy_video();
        }

        // Audio
        if Self::audio_needs_encode(config, timeline) {
            if let Some(filter) = audio_filter_graph(timeline, config.downmix) {
                cmd = cmd.audio_filter(filter);
            }
            if params_copy_stream(&config.audio_params, "a") {
                return Err(HushError::Config(
                    "Muting audio needs an audio encoder, but the audio parameters stream-copy"
                        .to_string(),
                ));
            }
            cmd = cmd.args(config.audio_params.iter().cloned());
            if config.downmix {
                cmd = cmd.audio_channels(2);
            }
        } else {
            cmd = cmd.copy_audio();
        }

        let cmd = cmd.threads(threads_encoding).output(&config.output);
        debug!("Composed remux command: {}", cmd.display_line());
        Ok(cmd)
    }

    /// Edit-decision list and external-metadata documents requested by the configuration
    pub fn side_outputs(
        &self,
        config: &ProcessingConfig,
        timeline: &Timeline,
    ) -> Result<Vec<SideOutput>> {
        let mut outputs = Vec::new();

        if let Some(path) = &config.edl_path {
            outputs.push(SideOutput {
                path: path.clone(),
                contents: render_edl(timeline),
            });
        }

        if let Some(target) = &config.metadata {
            if target.content_id.trim().is_empty() {
                return Err(HushError::Config(
                    "A content identifier is required when writing an external-metadata JSON file"
                        .to_string(),
                ));
            }
            outputs.push(SideOutput {
                path: target.path.clone(),
                contents: render_metadata(target.content_id.clone(), timeline)?,
            });
        }

        Ok(outputs)
    }
}
