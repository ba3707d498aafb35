// Media processing: everything that talks to the external tool
//
// - Commands: argument-list builder for ffmpeg/ffprobe invocations
// - Composer: turns a processing configuration and mute timeline into the remux command
// - Runner: blocking and streaming execution of the tool
// - Progress: normalization of the tool's key/value progress blocks

pub mod commands;
pub mod composer;
pub mod progress;
pub mod runner;

use async_trait::async_trait;
use std::time::Duration;

pub use commands::*;
pub use composer::*;
pub use progress::*;
pub use runner::*;

use crate::config::MediaConfig;
use crate::error::Result;

/// Receiver of raw progress blocks, called on the reading task in tool output order
pub type ProgressSink<'a> = dyn FnMut(ProgressBlock) + Send + 'a;

/// Seam between the pipeline and the process that does the remux
#[async_trait]
pub trait MediaRunner: Send + Sync {
    /// Run `command`. With a sink the tool is asked for machine-readable
    /// progress and every block is handed to the sink; without one the run
    /// just captures output. Failures are reported in the result, never panicked.
    async fn run(
        &self,
        command: &MediaCommand,
        sink: Option<&mut ProgressSink<'_>>,
        timeout: Option<Duration>,
    ) -> ExitResult;

    /// Check if the media tool can be started
    fn check_availability(&self) -> Result<()>;
}

/// Factory for creating media runner instances
pub struct MediaProcessorFactory;

impl MediaProcessorFactory {
    /// Create the default runner (child-process based)
    pub fn create_runner(config: &MediaConfig) -> Box<dyn MediaRunner> {
        Box::new(runner::ProcessRunner::new(&config.binary_path))
    }

    pub fn create_builder(config: &MediaConfig) -> MediaCommandBuilder {
        MediaCommandBuilder::new(&config.binary_path, &config.probe_path)
    }
}
