use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{MediaConfig, ProcessingConfig, SubtitleMode};
use crate::error::{HushError, Result};
use crate::lexicon::{MatchResult, Matcher};
use crate::media::{
    CommandComposer, MediaCommandBuilder, MediaProcessorFactory, MediaRunner, ProgressBlock,
    ProgressNormalizer, ProgressSnapshot,
};
use crate::subtitle::{read_srt, write_srt, SubtitleCue};
use crate::timeline::{build_timeline, IntervalKind, SkipRange, Timeline};

/// Receiver of normalized progress snapshots
pub type SnapshotSink<'a> = dyn FnMut(ProgressSnapshot) + Send + 'a;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Idle,
    TimelineBuilt,
    Remuxed,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportInterval {
    pub start: f64,
    pub end: f64,
    pub kind: IntervalKind,
}

/// One cue whose text the lexicon changed
#[derive(Debug, Clone, Serialize)]
pub struct ReportEdit {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub old: String,
    pub new: String,
}

impl From<&MatchResult> for ReportEdit {
    fn from(m: &MatchResult) -> Self {
        Self {
            index: m.cue.index,
            start: m.cue.start.as_secs_f64(),
            end: m.cue.end.as_secs_f64(),
            old: m.cue.text.clone(),
            new: m.cleaned_text.clone(),
        }
    }
}

/// What one run produced
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub input: PathBuf,
    /// Remuxed file; absent for subtitle-only runs
    pub output: Option<PathBuf>,
    pub cues: usize,
    pub matched_cues: usize,
    pub intervals: Vec<ReportInterval>,
    /// Every cue edit, in subtitle order
    pub edits: Vec<ReportEdit>,
    pub muted_seconds: f64,
    /// Cleaned subtitle file kept after the run
    pub cleaned_subtitles: Option<PathBuf>,
    pub side_files: Vec<PathBuf>,
}

/// Orchestrator-owned temporary files; removed when the run ends, whatever the outcome
#[derive(Default)]
struct TempArtifacts {
    files: Vec<NamedTempFile>,
}

impl TempArtifacts {
    fn create(&mut self, dir: Option<&Path>, prefix: &str, suffix: &str) -> Result<PathBuf> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix).suffix(suffix);
        let file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let path = file.path().to_path_buf();
        debug!("Created temporary file {}", path.display());
        self.files.push(file);
        Ok(path)
    }
}

impl Drop for TempArtifacts {
    fn drop(&mut self) {
        for file in self.files.drain(..) {
            let path = file.path().to_path_buf();
            match file.close() {
                Ok(()) => debug!("Removed temporary file {}", path.display()),
                Err(e) => warn!("Failed to remove temporary file {}: {}", path.display(), e),
            }
        }
    }
}

/// Outcome of the timeline phase, consumed by the remux phase
struct TimelinePhase {
    cues: usize,
    edits: Vec<ReportEdit>,
    timeline: Timeline,
    cleaned_subtitles: Option<CleanedSubtitles>,
}

/// The cleaned subtitle file and how many cues it holds
struct CleanedSubtitles {
    path: PathBuf,
    cues: usize,
}

/// Runs one clean-up of one input: build the mute timeline, then remux.
/// A pipeline instance runs at most once.
pub struct Pipeline {
    media: MediaConfig,
    matcher: Arc<Matcher>,
    runner: Box<dyn MediaRunner>,
    builder: MediaCommandBuilder,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(media: MediaConfig, matcher: Arc<Matcher>) -> Self {
        let runner = MediaProcessorFactory::create_runner(&media);
        Self::with_runner(media, matcher, runner)
    }

    pub fn with_runner(
        media: MediaConfig,
        matcher: Arc<Matcher>,
        runner: Box<dyn MediaRunner>,
    ) -> Self {
        let builder = MediaProcessorFactory::create_builder(&media);
        Self {
            media,
            matcher,
            runner,
            builder,
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn advance(&mut self, next: PipelineState) {
        debug!("Pipeline state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Execute both phases. `progress` receives normalized snapshots while the remux runs.
    pub async fn run(
        &mut self,
        processing: &ProcessingConfig,
        skip_ranges: &[SkipRange],
        progress: Option<&mut SnapshotSink<'_>>,
    ) -> Result<PipelineReport> {
        if self.state != PipelineState::Idle {
            return Err(HushError::Config(format!(
                "Pipeline already ran (state {:?})",
                self.state
            )));
        }

        let mut temps = TempArtifacts::default();
        let result = self.run_phases(processing, skip_ranges, progress, &mut temps).await;
        if let Err(e) = &result {
            warn!("Processing {} failed: {}", processing.input.display(), e);
            self.advance(PipelineState::Failed);
        }
        drop(temps);
        result
    }

    async fn run_phases(
        &mut self,
        processing: &ProcessingConfig,
        skip_ranges: &[SkipRange],
        progress: Option<&mut SnapshotSink<'_>>,
        temps: &mut TempArtifacts,
    ) -> Result<PipelineReport> {
        processing.validate().map_err(|e| e.in_phase("configuration"))?;

        let phase = self
            .build_timeline_phase(processing, skip_ranges, temps)
            .await
            .map_err(|e| e.in_phase("timeline"))?;
        self.advance(PipelineState::TimelineBuilt);

        let side_files = self.write_side_files(processing, &phase.timeline).await?;

        let output = if processing.subs_only {
            info!("Subtitle-only run; skipping remux");
            None
        } else {
            self.remux_phase(processing, &phase, progress)
                .await
                .map_err(|e| e.in_phase("remux"))?;
            self.advance(PipelineState::Remuxed);
            Some(processing.output.clone())
        };
        self.advance(PipelineState::Done);

        let kept_subtitles = processing
            .subtitles_out
            .clone()
            .filter(|_| phase.cleaned_subtitles.is_some());
        let edits = phase.edits;

        Ok(PipelineReport {
            input: processing.input.clone(),
            output,
            cues: phase.cues,
            matched_cues: edits.len(),
            intervals: phase
                .timeline
                .intervals()
                .iter()
                .map(|i| ReportInterval {
                    start: i.start_secs(),
                    end: i.end_secs(),
                    kind: i.kind,
                })
                .collect(),
            edits,
            muted_seconds: phase.timeline.total_duration().as_secs_f64(),
            cleaned_subtitles: kept_subtitles,
            side_files,
        })
    }

    /// Subtitle file to scan: the configured one, or the input's embedded track
    async fn resolve_subtitles(
        &self,
        processing: &ProcessingConfig,
        temps: &mut TempArtifacts,
    ) -> Result<PathBuf> {
        if let Some(path) = &processing.subtitles {
            return Ok(path.clone());
        }

        info!(
            "No subtitle file given; extracting the '{}' track from {}",
            processing.subtitle_language,
            processing.input.display()
        );
        let path = temps.create(self.media.temp_dir.as_deref(), "hushcut-extracted-", ".srt")?;
        let command = self
            .builder
            .extract_subtitles(&processing.input, &processing.subtitle_language, &path);
        self.runner.run(&command, None, None).await.into_result(&command)?;
        Ok(path)
    }

    async fn build_timeline_phase(
        &self,
        processing: &ProcessingConfig,
        skip_ranges: &[SkipRange],
        temps: &mut TempArtifacts,
    ) -> Result<TimelinePhase> {
        let subtitle_path = self.resolve_subtitles(processing, temps).await?;
        let cues = read_srt(&subtitle_path).await?;

        let matches = self.matcher.match_all(&cues);
        let edits: Vec<ReportEdit> = matches
            .iter()
            .filter(|m| m.matched)
            .map(ReportEdit::from)
            .collect();
        info!("{} of {} cues contain lexicon terms", edits.len(), cues.len());

        let cleaned_subtitles = self.write_cleaned_subtitles(processing, &matches, temps).await?;
        let timeline = build_timeline(&matches, skip_ranges, processing.pad_seconds);
        info!(
            "Mute timeline: {} intervals, {:.3}s total",
            timeline.len(),
            timeline.total_duration().as_secs_f64()
        );

        Ok(TimelinePhase {
            cues: cues.len(),
            edits,
            timeline,
            cleaned_subtitles,
        })
    }

    /// Write the cleaned subtitle file when someone needs it. A write failure
    /// is fatal only if the remux depends on the file.
    async fn write_cleaned_subtitles(
        &self,
        processing: &ProcessingConfig,
        matches: &[MatchResult],
        temps: &mut TempArtifacts,
    ) -> Result<Option<CleanedSubtitles>> {
        let muxed = processing.subtitle_mode != SubtitleMode::None;
        let needed_downstream = muxed || processing.subs_only;
        if !needed_downstream && processing.subtitles_out.is_none() {
            return Ok(None);
        }

        let mut cues: Vec<SubtitleCue> = matches
            .iter()
            .filter(|m| processing.full_subs || m.matched)
            .map(MatchResult::cleaned_cue)
            .collect();
        // A subtitle stream with no cues cannot be muxed; keep every cue instead
        if cues.is_empty() && muxed {
            debug!("No cue was scrubbed; muxing the full subtitle track");
            cues = matches.iter().map(MatchResult::cleaned_cue).collect();
        }

        let attempt = async {
            let path = match &processing.subtitles_out {
                Some(path) => path.clone(),
                None => temps.create(self.media.temp_dir.as_deref(), "hushcut-clean-", ".srt")?,
            };
            write_srt(&cues, &path).await?;
            Ok::<PathBuf, HushError>(path)
        };

        match attempt.await {
            Ok(path) => {
                info!("Wrote {} cleaned cues to {}", cues.len(), path.display());
                Ok(Some(CleanedSubtitles { path, cues: cues.len() }))
            }
            Err(e) if needed_downstream => Err(e),
            Err(e) => {
                warn!("Could not write cleaned subtitles: {}", e);
                Ok(None)
            }
        }
    }

    /// Side files are conveniences; failing to write one is logged, not fatal
    async fn write_side_files(
        &self,
        processing: &ProcessingConfig,
        timeline: &Timeline,
    ) -> Result<Vec<PathBuf>> {
        let composer = CommandComposer::new(MediaProcessorFactory::create_builder(&self.media));
        let outputs = composer
            .side_outputs(processing, timeline)
            .map_err(|e| e.in_phase("timeline"))?;

        let mut written = Vec::new();
        for output in outputs {
            match fs::write(&output.path, &output.contents).await {
                Ok(()) => {
                    info!("Wrote {}", output.path.display());
                    written.push(output.path);
                }
                Err(e) => warn!("Failed to write {}: {}", output.path.display(), e),
            }
        }
        Ok(written)
    }

    /// Input duration in seconds, for percentages. Unknown when probing fails.
    async fn probe_duration(&self, input: &Path) -> Option<f64> {
        let command = self.builder.probe_duration(input);
        match self.runner.run(&command, None, None).await.into_result(&command) {
            Ok(output) => {
                let duration = output.lines().find_map(|l| l.trim().parse::<f64>().ok());
                if duration.is_none() {
                    warn!("Duration probe printed no duration for {}", input.display());
                }
                duration
            }
            Err(e) => {
                warn!("Could not determine duration of {}: {}", input.display(), e);
                None
            }
        }
    }

    async fn remux_phase(
        &self,
        processing: &ProcessingConfig,
        phase: &TimelinePhase,
        progress: Option<&mut SnapshotSink<'_>>,
    ) -> Result<()> {
        let composer = CommandComposer::new(MediaProcessorFactory::create_builder(&self.media));
        let subtitle = phase
            .cleaned_subtitles
            .as_ref()
            .filter(|s| s.cues > 0)
            .map(|s| s.path.as_path());

        let without_subtitles;
        let processing = if subtitle.is_none() && processing.subtitle_mode != SubtitleMode::None {
            warn!("The subtitle source has no cues; remuxing without a subtitle stream");
            without_subtitles = ProcessingConfig {
                subtitle_mode: SubtitleMode::None,
                ..processing.clone()
            };
            &without_subtitles
        } else {
            processing
        };
        let command = composer.compose(processing, &phase.timeline, subtitle)?;

        info!(
            "Remuxing {} -> {}",
            processing.input.display(),
            processing.output.display()
        );

        let result = match progress {
            Some(forward) => {
                let total = self.probe_duration(&processing.input).await;
                let mut normalizer = ProgressNormalizer::new(total);
                let mut sink = |block: ProgressBlock| {
                    if let Some(snapshot) = normalizer.observe(&block, Instant::now()) {
                        forward(snapshot);
                    }
                };
                self.runner.run(&command, Some(&mut sink), processing.timeout).await
            }
            None => self.runner.run(&command, None, processing.timeout).await,
        };

        result.into_result(&command)?;
        info!("Remux completed: {}", processing.output.display());
        Ok(())
    }
}

/// Process every video under `dir` with a shared matcher. Each file gets its
/// own pipeline; a failure is logged and the batch moves on.
pub async fn process_directory<F>(
    dir: &Path,
    media: &MediaConfig,
    matcher: Arc<Matcher>,
    configure: F,
) -> Result<Vec<(PathBuf, Result<PipelineReport>)>>
where
    F: Fn(&Path) -> ProcessingConfig,
{
    if !dir.is_dir() {
        return Err(HushError::Config(format!("{} is not a directory", dir.display())));
    }

    let video_extensions = ["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm", "m4v"];
    let mut video_files = Vec::new();

    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if let Some(extension) = entry.path().extension() {
            if let Some(ext_str) = extension.to_str() {
                let is_output = entry
                    .path()
                    .file_stem()
                    .map(|s| s.to_string_lossy().ends_with("_clean"))
                    .unwrap_or(false);
                if video_extensions.contains(&ext_str.to_lowercase().as_str()) && !is_output {
                    video_files.push(entry.path().to_path_buf());
                }
            }
        }
    }
    video_files.sort();

    info!("Found {} video files to process", video_files.len());

    let mut results = Vec::with_capacity(video_files.len());
    for video_path in video_files {
        let processing = configure(&video_path);
        let mut pipeline = Pipeline::new(media.clone(), matcher.clone());
        let result = pipeline.run(&processing, &[], None).await;
        match &result {
            Ok(_) => info!("Successfully processed: {}", video_path.display()),
            Err(e) => warn!("Failed to process {}: {}", video_path.display(), e),
        }
        results.push((video_path, result));
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, MetadataTarget};
    use crate::lexicon::Lexicon;
    use crate::media::{ExitResult, MediaCommand, ProgressSink, RunFailure};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    const SRT: &str = "1\n00:00:01,000 --> 00:00:02,000\nwhat the heck\n\n\
                       2\n00:00:03,000 --> 00:00:04,000\nall good\n";

    /// Records commands and replays canned progress and exit codes
    struct FakeRunner {
        commands: Arc<Mutex<Vec<MediaCommand>>>,
        remux_code: i32,
        blocks: Vec<ProgressBlock>,
        probe_output: String,
        spawn_fails: bool,
        /// Contents of every extra `-i` file, read while the remux "runs"
        extra_inputs: Arc<Mutex<Vec<String>>>,
    }

    impl FakeRunner {
        fn new(remux_code: i32) -> (Self, Arc<Mutex<Vec<MediaCommand>>>) {
            let commands = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    commands: commands.clone(),
                    remux_code,
                    blocks: Vec::new(),
                    probe_output: "10.0\n".to_string(),
                    spawn_fails: false,
                    extra_inputs: Arc::new(Mutex::new(Vec::new())),
                },
                commands,
            )
        }
    }

    #[async_trait]
    impl MediaRunner for FakeRunner {
        async fn run(
            &self,
            command: &MediaCommand,
            sink: Option<&mut ProgressSink<'_>>,
            _timeout: Option<Duration>,
        ) -> ExitResult {
            self.commands.lock().unwrap().push(command.clone());
            if command.description == "Duration probe" {
                return ExitResult {
                    return_code: 0,
                    combined_output: self.probe_output.clone(),
                    failure: None,
                };
            }
            if self.spawn_fails {
                return ExitResult {
                    return_code: -1,
                    combined_output: String::new(),
                    failure: Some(RunFailure::Spawn("No such file or directory".to_string())),
                };
            }
            let extra: Vec<String> = command
                .args
                .windows(2)
                .filter(|w| w[0] == "-i")
                .skip(1)
                .map(|w| std::fs::read_to_string(&w[1]).unwrap_or_default())
                .collect();
            self.extra_inputs.lock().unwrap().extend(extra);
            if let Some(sink) = sink {
                for block in &self.blocks {
                    sink(block.clone());
                }
            }
            ExitResult {
                return_code: self.remux_code,
                combined_output: "tool output".to_string(),
                failure: None,
            }
        }

        fn check_availability(&self) -> Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        temp_dir: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let temp_dir = dir.path().join("tmp");
            std::fs::create_dir(&temp_dir).unwrap();
            std::fs::write(dir.path().join("movie.srt"), SRT).unwrap();
            Self { dir, temp_dir }
        }

        fn media(&self) -> MediaConfig {
            let mut media = Config::default().media;
            media.temp_dir = Some(self.temp_dir.clone());
            media
        }

        fn processing(&self) -> ProcessingConfig {
            let defaults = Config::default().processing;
            let mut p = ProcessingConfig::for_input(self.dir.path().join("movie.mkv"), &defaults);
            p.subtitles = Some(self.dir.path().join("movie.srt"));
            p.pad_seconds = 0.5;
            p.threads_input = Some(1);
            p.threads_encoding = Some(1);
            p
        }

        fn pipeline(&self, runner: FakeRunner, lexicon: &str) -> Pipeline {
            Pipeline::with_runner(self.media(), matcher(lexicon), Box::new(runner))
        }

        fn temp_files(&self) -> usize {
            std::fs::read_dir(&self.temp_dir).unwrap().count()
        }
    }

    fn matcher(src: &str) -> Arc<Matcher> {
        Arc::new(Matcher::new(Lexicon::parse(src, "test").unwrap()).unwrap())
    }

    #[tokio::test]
    async fn test_successful_run() {
        let fixture = Fixture::new();
        let (runner, commands) = FakeRunner::new(0);
        let mut pipeline = fixture.pipeline(runner, "heck|****\n");

        let mut processing = fixture.processing();
        processing.edl_path = Some(fixture.dir.path().join("movie_clean.edl"));
        let report = pipeline.run(&processing, &[], None).await.unwrap();

        assert_eq!(pipeline.state(), PipelineState::Done);
        assert_eq!(report.cues, 2);
        assert_eq!(report.matched_cues, 1);
        assert_eq!(report.intervals.len(), 1);
        assert_eq!(report.intervals[0].start, 0.5);
        assert_eq!(report.intervals[0].end, 2.5);
        assert_eq!(report.output, Some(processing.output.clone()));

        let edl = std::fs::read_to_string(fixture.dir.path().join("movie_clean.edl")).unwrap();
        assert_eq!(edl, "0.500\t2.500\t1\n");

        let commands = commands.lock().unwrap();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].has_arg("-af"));
    }

    #[tokio::test]
    async fn test_empty_lexicon_copies_audio() {
        let fixture = Fixture::new();
        let (runner, commands) = FakeRunner::new(0);
        let mut pipeline = fixture.pipeline(runner, "");

        let report = pipeline.run(&fixture.processing(), &[], None).await.unwrap();
        assert_eq!(report.matched_cues, 0);
        assert!(report.intervals.is_empty());

        let commands = commands.lock().unwrap();
        let audio = commands[0].args.windows(2).find(|w| w[0] == "-c:a").map(|w| w[1].clone());
        assert_eq!(audio.as_deref(), Some("copy"));
    }

    #[tokio::test]
    async fn test_failing_tool_marks_failed_and_removes_temp_files() {
        let fixture = Fixture::new();
        let (runner, _commands) = FakeRunner::new(1);
        let mut pipeline = fixture.pipeline(runner, "heck\n");

        let mut processing = fixture.processing();
        processing.subtitle_mode = SubtitleMode::Embed;

        let err = pipeline.run(&processing, &[], None).await.unwrap_err();
        assert_eq!(pipeline.state(), PipelineState::Failed);
        assert_eq!(err.category(), "tool");
        assert_eq!(err.tool_output(), Some("tool output"));
        assert!(err.to_string().starts_with("remux phase failed"));
        assert_eq!(fixture.temp_files(), 0);
    }

    #[tokio::test]
    async fn test_embedded_subtitle_is_temporary_on_success() {
        let fixture = Fixture::new();
        let (runner, commands) = FakeRunner::new(0);
        let mut pipeline = fixture.pipeline(runner, "heck\n");

        let mut processing = fixture.processing();
        processing.subtitle_mode = SubtitleMode::Embed;
        let report = pipeline.run(&processing, &[], None).await.unwrap();

        assert!(report.cleaned_subtitles.is_none());
        assert_eq!(fixture.temp_files(), 0);
        let commands = commands.lock().unwrap();
        let inputs: Vec<_> = commands[0].args.windows(2).filter(|w| w[0] == "-i").collect();
        assert_eq!(inputs.len(), 2);
    }

    #[tokio::test]
    async fn test_embed_without_matches_muxes_full_track() {
        let fixture = Fixture::new();
        std::fs::write(
            fixture.dir.path().join("movie.srt"),
            "1\n00:00:03,000 --> 00:00:04,000\nall good\n",
        )
        .unwrap();
        let (runner, commands) = FakeRunner::new(0);
        let extra_inputs = runner.extra_inputs.clone();
        let mut pipeline = fixture.pipeline(runner, "heck\n");

        let mut processing = fixture.processing();
        processing.subtitle_mode = SubtitleMode::Embed;
        let report = pipeline.run(&processing, &[], None).await.unwrap();

        assert_eq!(report.matched_cues, 0);
        let extra_inputs = extra_inputs.lock().unwrap();
        assert_eq!(extra_inputs.len(), 1);
        assert!(extra_inputs[0].contains("all good"));
        let commands = commands.lock().unwrap();
        let audio = commands[0].args.windows(2).find(|w| w[0] == "-c:a").map(|w| w[1].clone());
        assert_eq!(audio.as_deref(), Some("copy"));
    }

    #[tokio::test]
    async fn test_hardcode_with_empty_track_drops_subtitles() {
        let fixture = Fixture::new();
        std::fs::write(fixture.dir.path().join("movie.srt"), "").unwrap();
        let (runner, commands) = FakeRunner::new(0);
        let mut pipeline = fixture.pipeline(runner, "heck\n");

        let mut processing = fixture.processing();
        processing.subtitle_mode = SubtitleMode::Hardcode;
        pipeline.run(&processing, &[], None).await.unwrap();

        let commands = commands.lock().unwrap();
        assert!(!commands[0].has_arg("-vf"));
        assert_eq!(commands[0].args.iter().filter(|a| *a == "-i").count(), 1);
        assert_eq!(fixture.temp_files(), 0);
    }

    #[tokio::test]
    async fn test_report_lists_cue_edits() {
        let fixture = Fixture::new();
        let (runner, _) = FakeRunner::new(0);
        let mut pipeline = fixture.pipeline(runner, "heck|****\n");

        let report = pipeline.run(&fixture.processing(), &[], None).await.unwrap();
        assert_eq!(report.edits.len(), 1);
        let edit = &report.edits[0];
        assert_eq!(edit.index, 1);
        assert_eq!((edit.start, edit.end), (1.0, 2.0));
        assert_eq!(edit.old, "what the heck");
        assert_eq!(edit.new, "what the ****");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["edits"][0]["new"], "what the ****");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_environment_error() {
        let fixture = Fixture::new();
        let (mut runner, _) = FakeRunner::new(0);
        runner.spawn_fails = true;
        let mut pipeline = fixture.pipeline(runner, "heck\n");

        let err = pipeline.run(&fixture.processing(), &[], None).await.unwrap_err();
        assert_eq!(err.category(), "environment");
        assert_eq!(pipeline.state(), PipelineState::Failed);
    }

    #[tokio::test]
    async fn test_bad_subtitles_fail_before_any_process() {
        let fixture = Fixture::new();
        std::fs::write(fixture.dir.path().join("movie.srt"), "1\nnot a timing line\nhi\n").unwrap();
        let (runner, commands) = FakeRunner::new(0);
        let mut pipeline = fixture.pipeline(runner, "heck\n");

        let err = pipeline.run(&fixture.processing(), &[], None).await.unwrap_err();
        assert_eq!(err.category(), "input");
        assert!(err.to_string().starts_with("timeline phase failed"));
        assert!(commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_config_error_before_any_work() {
        let fixture = Fixture::new();
        let (runner, commands) = FakeRunner::new(0);
        let mut pipeline = fixture.pipeline(runner, "heck\n");

        let mut processing = fixture.processing();
        processing.metadata = Some(MetadataTarget {
            path: fixture.dir.path().join("plex.json"),
            content_id: String::new(),
        });
        let err = pipeline.run(&processing, &[], None).await.unwrap_err();
        assert_eq!(err.category(), "environment");
        assert!(commands.lock().unwrap().is_empty());
        assert_eq!(pipeline.state(), PipelineState::Failed);
    }

    #[tokio::test]
    async fn test_subs_only_writes_cleaned_file_without_remux() {
        let fixture = Fixture::new();
        let (runner, commands) = FakeRunner::new(0);
        let mut pipeline = fixture.pipeline(runner, "heck|****\n");

        let mut processing = fixture.processing();
        processing.subs_only = true;
        let clean_path = fixture.dir.path().join("movie_clean.srt");
        processing.subtitles_out = Some(clean_path.clone());
        let report = pipeline.run(&processing, &[], None).await.unwrap();

        assert_eq!(pipeline.state(), PipelineState::Done);
        assert!(report.output.is_none());
        assert_eq!(report.cleaned_subtitles, Some(clean_path.clone()));
        assert!(commands.lock().unwrap().is_empty());
        let written = std::fs::read_to_string(clean_path).unwrap();
        assert_eq!(written, "1\n00:00:01,000 --> 00:00:02,000\nwhat the ****\n\n");
    }

    #[tokio::test]
    async fn test_full_subs_keeps_every_cue() {
        let fixture = Fixture::new();
        let (runner, _) = FakeRunner::new(0);
        let mut pipeline = fixture.pipeline(runner, "heck\n");

        let mut processing = fixture.processing();
        processing.subs_only = true;
        processing.full_subs = true;
        let clean_path = fixture.dir.path().join("full.srt");
        processing.subtitles_out = Some(clean_path.clone());
        pipeline.run(&processing, &[], None).await.unwrap();

        let written = std::fs::read_to_string(clean_path).unwrap();
        let cues = crate::subtitle::parse_srt(&written, "full.srt").unwrap();
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[1].text, "all good");
    }

    #[tokio::test]
    async fn test_skip_ranges_reach_side_files() {
        let fixture = Fixture::new();
        let (runner, _) = FakeRunner::new(0);
        let mut pipeline = fixture.pipeline(runner, "heck\n");

        let mut processing = fixture.processing();
        let meta_path = fixture.dir.path().join("meta.json");
        processing.metadata = Some(MetadataTarget {
            path: meta_path.clone(),
            content_id: "abc".to_string(),
        });
        let skips = vec![SkipRange::new(1, 60_000, 90_000)];
        let report = pipeline.run(&processing, &skips, None).await.unwrap();

        assert_eq!(report.intervals.len(), 2);
        assert_eq!(report.intervals[1].kind, IntervalKind::Skip);
        assert_eq!(report.side_files, vec![meta_path.clone()]);
        let json = std::fs::read_to_string(meta_path).unwrap();
        assert!(json.contains("\"skip\""));
    }

    #[tokio::test]
    async fn test_progress_is_normalized() {
        let fixture = Fixture::new();
        let (mut runner, commands) = FakeRunner::new(0);
        let block = |us: &str, progress: &str| -> ProgressBlock {
            [("out_time_ms", us), ("speed", "2.00x"), ("progress", progress)]
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        };
        runner.blocks = vec![block("5000000", "continue"), block("10000000", "end")];
        let mut pipeline = fixture.pipeline(runner, "heck\n");

        let mut snapshots = Vec::new();
        let mut sink = |s: ProgressSnapshot| snapshots.push(s);
        pipeline.run(&fixture.processing(), &[], Some(&mut sink)).await.unwrap();

        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].percent, Some(50.0));
        assert_eq!(snapshots[0].eta_seconds, Some(2));
        assert_eq!(snapshots[1].percent, Some(100.0));
        assert!(snapshots[0].out_time_micros <= snapshots[1].out_time_micros);

        let commands = commands.lock().unwrap();
        assert_eq!(commands[0].description, "Duration probe");
        assert_eq!(commands[1].description, "Remux");
    }

    #[tokio::test]
    async fn test_pipeline_runs_once() {
        let fixture = Fixture::new();
        let (runner, _) = FakeRunner::new(0);
        let mut pipeline = fixture.pipeline(runner, "heck\n");

        pipeline.run(&fixture.processing(), &[], None).await.unwrap();
        assert!(pipeline.run(&fixture.processing(), &[], None).await.is_err());
        assert_eq!(pipeline.state(), PipelineState::Done);
    }

    #[tokio::test]
    async fn test_extracts_subtitles_when_none_given() {
        let fixture = Fixture::new();
        let (runner, commands) = FakeRunner::new(0);
        let mut pipeline = fixture.pipeline(runner, "heck\n");

        let mut processing = fixture.processing();
        processing.subtitles = None;
        // The fake extraction writes nothing, so the temp file parses as zero cues
        let report = pipeline.run(&processing, &[], None).await.unwrap();

        assert_eq!(report.cues, 0);
        assert_eq!(fixture.temp_files(), 0);
        let commands = commands.lock().unwrap();
        assert_eq!(commands[0].description, "Subtitle extraction");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_real_process_failure() {
        let fixture = Fixture::new();
        let mut media = fixture.media();
        media.binary_path = "false".to_string();
        media.probe_path = "false".to_string();
        let mut pipeline = Pipeline::new(media, matcher("heck\n"));

        let mut processing = fixture.processing();
        processing.subtitle_mode = SubtitleMode::Embed;
        let mut sink = |_s: ProgressSnapshot| {};
        let err = pipeline.run(&processing, &[], Some(&mut sink)).await.unwrap_err();

        assert!(matches!(
            err,
            HushError::Phase { ref source, .. }
                if matches!(**source, HushError::Process { code: 1, .. })
        ));
        assert_eq!(pipeline.state(), PipelineState::Failed);
        assert_eq!(fixture.temp_files(), 0);
    }

    #[tokio::test]
    async fn test_process_directory_skips_outputs() {
        let fixture = Fixture::new();
        std::fs::write(fixture.dir.path().join("movie.mkv"), b"").unwrap();
        std::fs::write(fixture.dir.path().join("movie_clean.mkv"), b"").unwrap();

        let media = fixture.media();
        let dir = fixture.dir.path().to_path_buf();
        let results = process_directory(&dir, &media, matcher("heck\n"), |video| {
            let mut p = ProcessingConfig::for_input(video, &Config::default().processing);
            p.subtitles = Some(dir.join("movie.srt"));
            p.subs_only = true;
            p
        })
        .await
        .unwrap();

        assert_eq!(results.len(), 1);
        assert!(results[0].0.ends_with("movie.mkv"));
        assert!(results[0].1.is_ok());
    }
}
