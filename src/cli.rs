use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{MetadataTarget, ProcessingConfig, SubtitleMode, default_metadata_path};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Mute lexicon terms in a single video file
    Clean {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,

        /// Subtitle file to scan; the embedded track is extracted when omitted
        #[arg(short, long)]
        subs: Option<PathBuf>,

        /// Output video file (default: <input>_clean.<ext>)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// JSON file with additional skip ranges
        #[arg(long)]
        skip_ranges: Option<PathBuf>,

        /// Print the run report as JSON on stdout
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        options: CleanOptions,
    },

    /// Clean every video file in a directory, reading `<stem>.srt` next to each
    Batch {
        /// Input directory containing video files
        #[arg(short, long)]
        input_dir: PathBuf,

        #[command(flatten)]
        options: CleanOptions,
    },

    /// Load a lexicon file and list its entries
    Lexicon {
        /// Lexicon file (default: the configured one)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// Write the default configuration file
    InitConfig {
        /// Destination
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Per-run options shared by `clean` and `batch`
#[derive(clap::Args, Debug, Clone, Default)]
pub struct CleanOptions {
    /// Lexicon file (default: the configured one)
    #[arg(short = 'w', long)]
    pub swears: Option<PathBuf>,

    /// Seconds of padding before and after each matched cue
    #[arg(short, long)]
    pub pad: Option<f64>,

    /// Embed the cleaned subtitles as a subtitle stream
    #[arg(short, long, conflicts_with = "hardcode")]
    pub embed_subs: bool,

    /// Burn the cleaned subtitles into the video (re-encodes video)
    #[arg(long)]
    pub hardcode: bool,

    /// Keep every cue in the cleaned subtitles, not only the scrubbed ones
    #[arg(short, long)]
    pub full_subs: bool,

    /// Only write cleaned subtitles and side files, skip the remux
    #[arg(long)]
    pub subs_only: bool,

    /// Keep the cleaned subtitles at this path
    #[arg(long)]
    pub subs_out: Option<PathBuf>,

    /// Write an edit decision list next to the output
    #[arg(long)]
    pub edl: bool,

    /// Re-encode video even when it could be copied
    #[arg(long)]
    pub re_encode_video: bool,

    /// Re-encode audio even when nothing is muted
    #[arg(long)]
    pub re_encode_audio: bool,

    /// Video encoder parameters, whitespace separated
    #[arg(long, allow_hyphen_values = true)]
    pub video_params: Option<String>,

    /// Audio encoder parameters, whitespace separated
    #[arg(long, allow_hyphen_values = true)]
    pub audio_params: Option<String>,

    /// Index of the audio stream to keep (default: first)
    #[arg(short, long)]
    pub audio_stream_index: Option<u32>,

    /// Downmix multichannel audio to stereo
    #[arg(short, long)]
    pub downmix: bool,

    /// Threads for both decoding and encoding
    #[arg(long)]
    pub threads: Option<usize>,

    /// Threads for decoding (overrides --threads)
    #[arg(long)]
    pub threads_input: Option<usize>,

    /// Threads for encoding (overrides --threads)
    #[arg(long)]
    pub threads_encoding: Option<usize>,

    /// Write an external-metadata JSON file describing the muted and skipped ranges
    #[arg(long)]
    pub plex_json: bool,

    /// Content identifier for the external-metadata JSON; implies --plex-json
    #[arg(long)]
    pub plex_id: Option<String>,

    /// Subtitle language tag
    #[arg(short, long)]
    pub lang: Option<String>,

    /// Abort the remux after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

fn split_params(params: &str) -> Vec<String> {
    params.split_whitespace().map(|s| s.to_string()).collect()
}

impl CleanOptions {
    /// Apply the command-line overrides to a run description
    pub fn apply(&self, config: &mut ProcessingConfig) {
        if let Some(pad) = self.pad {
            config.pad_seconds = pad;
        }
        config.subtitle_mode = if self.hardcode {
            SubtitleMode::Hardcode
        } else if self.embed_subs {
            SubtitleMode::Embed
        } else {
            SubtitleMode::None
        };
        config.full_subs = self.full_subs;
        config.subs_only = self.subs_only;
        if self.subs_out.is_some() {
            config.subtitles_out = self.subs_out.clone();
        }
        config.reencode_video = self.re_encode_video;
        config.reencode_audio = self.re_encode_audio;
        if let Some(params) = &self.video_params {
            config.video_params = split_params(params);
        }
        if let Some(params) = &self.audio_params {
            config.audio_params = split_params(params);
        }
        config.audio_stream_index = self.audio_stream_index;
        config.downmix = self.downmix;

        if let Some(threads) = self.threads {
            config.threads_input = Some(threads);
            config.threads_encoding = Some(threads);
        }
        if self.threads_input.is_some() {
            config.threads_input = self.threads_input;
        }
        if self.threads_encoding.is_some() {
            config.threads_encoding = self.threads_encoding;
        }

        if let Some(lang) = &self.lang {
            config.subtitle_language = lang.clone();
        }
        if self.edl {
            config.edl_path = Some(config.output.with_extension("edl"));
        }
        if self.plex_json || self.plex_id.is_some() {
            config.metadata = Some(MetadataTarget {
                path: default_metadata_path(&config.input),
                content_id: self.plex_id.clone().unwrap_or_default(),
            });
        }
        config.timeout = self.timeout.map(Duration::from_secs);
    }
}

/// `<dir>/<stem>.srt` when it exists
pub fn sibling_subtitles(video: &Path) -> Option<PathBuf> {
    let candidate = video.with_extension("srt");
    candidate.exists().then_some(candidate)
}
