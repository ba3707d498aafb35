use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HushError, Result};

fn default_video_params() -> Vec<String> {
    ["-c:v", "libx264", "-preset", "slow", "-crf", "22"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_audio_params() -> Vec<String> {
    ["-c:a", "aac", "-b:a", "224k", "-ar", "44100"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_subtitle_language() -> String {
    "eng".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(".hushcut").join("log")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub media: MediaConfig,
    pub lexicon: LexiconConfig,
    pub processing: ProcessingDefaults,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
    /// Path to ffprobe binary, used to learn the input duration for progress
    pub probe_path: String,
    /// Directory for temporary subtitle files; system temp dir when unset
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexiconConfig {
    /// Lexicon file: one `term` or `term|replacement` per line
    pub path: PathBuf,
}

/// Defaults applied to every run unless overridden on the command line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingDefaults {
    /// Seconds added before and after each matched cue
    pub pad_seconds: f64,
    /// Encoder options used when the video track is re-encoded
    /// Common options: ["-c:v", "libx264", "-preset", "medium", "-crf", "23"]
    #[serde(default = "default_video_params")]
    pub video_params: Vec<String>,
    /// Encoder options used when the audio track is re-encoded
    #[serde(default = "default_audio_params")]
    pub audio_params: Vec<String>,
    /// ISO 639-2 language tag for embedded and extracted subtitles
    #[serde(default = "default_subtitle_language")]
    pub subtitle_language: String,
    /// Demux/decode threads; logical cores minus two when unset
    #[serde(default)]
    pub threads_input: Option<usize>,
    /// Encode threads; logical cores minus two when unset
    #[serde(default)]
    pub threads_encoding: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Record every tool invocation and raw progress line to a log file
    pub enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_dir: default_log_dir(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            media: MediaConfig {
                binary_path: "ffmpeg".to_string(),
                probe_path: "ffprobe".to_string(),
                temp_dir: None,
            },
            lexicon: LexiconConfig {
                path: PathBuf::from("swears.txt"),
            },
            processing: ProcessingDefaults {
                pad_seconds: 0.0,
                video_params: default_video_params(),
                audio_params: default_audio_params(),
                subtitle_language: default_subtitle_language(),
                threads_input: None,
                threads_encoding: None,
            },
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HushError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| HushError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| HushError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| HushError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SubtitleMode {
    /// No subtitle stream in the output
    #[default]
    None,
    /// Mux the cleaned subtitles as a separate stream
    Embed,
    /// Render the cleaned subtitles into the video pixels
    Hardcode,
}

/// Where to write the external-metadata JSON and which content it describes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataTarget {
    pub path: PathBuf,
    pub content_id: String,
}

/// Everything one run needs, resolved from defaults and per-run options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Subtitle file to scan; extracted from the input when unset
    pub subtitles: Option<PathBuf>,
    /// Where to keep the cleaned subtitle file; a temporary file when unset
    pub subtitles_out: Option<PathBuf>,
    pub subtitle_mode: SubtitleMode,
    /// Keep every cue in the cleaned subtitle file, not only the scrubbed ones
    pub full_subs: bool,
    /// Produce the cleaned subtitles and side files, skip the remux
    pub subs_only: bool,
    pub reencode_video: bool,
    pub reencode_audio: bool,
    pub video_params: Vec<String>,
    pub audio_params: Vec<String>,
    pub audio_stream_index: Option<u32>,
    pub downmix: bool,
    pub threads_input: Option<usize>,
    pub threads_encoding: Option<usize>,
    pub subtitle_language: String,
    pub pad_seconds: f64,
    pub edl_path: Option<PathBuf>,
    pub metadata: Option<MetadataTarget>,
    /// Wall-clock limit for the remux
    pub timeout: Option<Duration>,
}

impl ProcessingConfig {
    /// Start a run description for `input`, writing `<stem>_clean.<ext>` next to it
    pub fn for_input<P: AsRef<Path>>(input: P, defaults: &ProcessingDefaults) -> Self {
        let input = input.as_ref().to_path_buf();
        let output = default_output_path(&input);

        Self {
            input,
            output,
            subtitles: None,
            subtitles_out: None,
            subtitle_mode: SubtitleMode::None,
            full_subs: false,
            subs_only: false,
            reencode_video: false,
            reencode_audio: false,
            video_params: defaults.video_params.clone(),
            audio_params: defaults.audio_params.clone(),
            audio_stream_index: None,
            downmix: false,
            threads_input: defaults.threads_input,
            threads_encoding: defaults.threads_encoding,
            subtitle_language: defaults.subtitle_language.clone(),
            pad_seconds: defaults.pad_seconds,
            edl_path: None,
            metadata: None,
            timeout: None,
        }
    }

    /// Reject combinations that cannot be turned into a single tool invocation
    pub fn validate(&self) -> Result<()> {
        if !self.pad_seconds.is_finite() || self.pad_seconds < 0.0 {
            return Err(HushError::Config(format!(
                "Padding must be a non-negative number of seconds, got {}",
                self.pad_seconds
            )));
        }
        if self.threads_input == Some(0) || self.threads_encoding == Some(0) {
            return Err(HushError::Config("Thread counts must be at least 1".to_string()));
        }
        if let Some(target) = &self.metadata {
            if target.content_id.trim().is_empty() {
                return Err(HushError::Config(
                    "A content identifier is required when writing an external-metadata JSON file"
                        .to_string(),
                ));
            }
        }
        if self.subtitle_mode == SubtitleMode::Hardcode
            && params_copy_stream(&self.video_params, "v")
        {
            return Err(HushError::Config(
                "Hardcoded subtitles need a video encoder, but the video parameters stream-copy"
                    .to_string(),
            ));
        }
        if !self.subs_only && self.input == self.output {
            return Err(HushError::Config(format!(
                "Output would overwrite the input {}",
                self.input.display()
            )));
        }
        Ok(())
    }
}

/// Whether encoder params select stream copy for the given stream letter (`v` or `a`)
pub(crate) fn params_copy_stream(params: &[String], stream: &str) -> bool {
    params.windows(2).any(|w| {
        let flag = w[0].as_str();
        let selects_stream = flag == "-c"
            || flag == format!("-c:{}", stream)
            || flag == format!("-{}codec", stream)
            || flag == "-codec";
        selects_stream && w[1] == "copy"
    })
}

/// `<dir>/<stem>_clean.<ext>`
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    let file_name = match input.extension() {
        Some(ext) => format!("{}_clean.{}", stem, ext.to_string_lossy()),
        None => format!("{}_clean", stem),
    };
    input.with_file_name(file_name)
}

/// `<dir>/<stem>_PlexAutoSkip_clean.json`
pub fn default_metadata_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    input.with_file_name(format!("{}_PlexAutoSkip_clean.json", stem))
}

/// Threads to use when no explicit count is configured: logical cores minus two, at least one
pub fn default_thread_count() -> usize {
    num_cpus::get().saturating_sub(2).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processing() -> ProcessingConfig {
        ProcessingConfig::for_input("/videos/movie.mkv", &Config::default().processing)
    }

    #[test]
    fn test_default_paths() {
        let p = processing();
        assert_eq!(p.output, PathBuf::from("/videos/movie_clean.mkv"));
        assert_eq!(
            default_metadata_path(&p.input),
            PathBuf::from("/videos/movie_PlexAutoSkip_clean.json")
        );
        assert_eq!(default_output_path(Path::new("noext")), PathBuf::from("noext_clean"));
    }

    #[test]
    fn test_default_thread_count_is_positive() {
        assert!(default_thread_count() >= 1);
    }

    #[test]
    fn test_validate_defaults() {
        assert!(processing().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_conflicts() {
        let mut p = processing();
        p.pad_seconds = -1.0;
        assert!(matches!(p.validate(), Err(HushError::Config(_))));

        let mut p = processing();
        p.threads_encoding = Some(0);
        assert!(p.validate().is_err());

        let mut p = processing();
        p.metadata = Some(MetadataTarget {
            path: PathBuf::from("x.json"),
            content_id: " ".to_string(),
        });
        assert!(p.validate().is_err());

        let mut p = processing();
        p.subtitle_mode = SubtitleMode::Hardcode;
        p.video_params = vec!["-c:v".to_string(), "copy".to_string()];
        assert!(p.validate().is_err());

        let mut p = processing();
        p.output = p.input.clone();
        assert!(p.validate().is_err());
        p.subs_only = true;
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_params_copy_stream() {
        let params = |s: &[&str]| s.iter().map(|x| x.to_string()).collect::<Vec<_>>();
        assert!(params_copy_stream(&params(&["-c:v", "copy"]), "v"));
        assert!(params_copy_stream(&params(&["-c", "copy"]), "v"));
        assert!(!params_copy_stream(&params(&["-c:a", "copy"]), "v"));
        assert!(!params_copy_stream(&params(&["-c:v", "libx264"]), "v"));
    }

    #[test]
    fn test_config_toml_roundtrip_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        Config::default().save_to_file(&path).unwrap();
        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.media.binary_path, "ffmpeg");
        assert_eq!(loaded.processing.audio_params, default_audio_params());

        // Optional sections fall back to defaults
        let minimal = r#"
            [media]
            binary_path = "/opt/ffmpeg"
            probe_path = "/opt/ffprobe"

            [lexicon]
            path = "words.txt"

            [processing]
            pad_seconds = 0.25
        "#;
        let config: Config = toml::from_str(minimal).unwrap();
        assert_eq!(config.processing.subtitle_language, "eng");
        assert_eq!(config.processing.video_params, default_video_params());
        assert!(!config.diagnostics.enabled);
    }
}
