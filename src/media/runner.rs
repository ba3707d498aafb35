use async_trait::async_trait;
use std::process::{Command as StdCommand, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{HushError, Result};
use super::progress::ProgressBlock;
use super::{MediaCommand, MediaRunner, ProgressSink};

/// Tracing target for the invocation/progress diagnostics log
pub const DIAG_TARGET: &str = "hushcut::diag";

/// Exit code reported when the tool never produced one of its own
pub const SYNTHETIC_FAILURE_CODE: i32 = -1;

/// Why a run ended without a normal exit status
#[derive(Debug, Clone, PartialEq)]
pub enum RunFailure {
    /// The tool could not be started
    Spawn(String),
    /// Reading the tool's output or waiting on it failed
    Stream(String),
    /// The caller's wall-clock limit ran out and the tool was killed
    TimedOut(Duration),
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunFailure::Spawn(msg) => write!(f, "spawn failed: {}", msg),
            RunFailure::Stream(msg) => write!(f, "output stream failed: {}", msg),
            RunFailure::TimedOut(limit) => write!(f, "timed out after {:.1}s", limit.as_secs_f64()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExitResult {
    pub return_code: i32,
    /// Standard output followed by standard error
    pub combined_output: String,
    pub failure: Option<RunFailure>,
}

impl ExitResult {
    fn exited(return_code: i32, combined_output: String) -> Self {
        Self {
            return_code,
            combined_output,
            failure: None,
        }
    }

    fn failed(failure: RunFailure, combined_output: String) -> Self {
        Self {
            return_code: SYNTHETIC_FAILURE_CODE,
            combined_output,
            failure: Some(failure),
        }
    }

    pub fn success(&self) -> bool {
        self.return_code == 0 && self.failure.is_none()
    }

    /// Map to the error taxonomy; the caller decides whether that is fatal
    pub fn into_result(self, command: &MediaCommand) -> Result<String> {
        match self.failure {
            Some(RunFailure::Spawn(message)) => Err(HushError::Spawn {
                binary: command.binary_path.clone(),
                message,
            }),
            Some(failure) => Err(HushError::Process {
                description: format!("{} ({})", command.description, failure),
                code: self.return_code,
                output: self.combined_output,
            }),
            None if self.return_code != 0 => Err(HushError::Process {
                description: command.description.clone(),
                code: self.return_code,
                output: self.combined_output,
            }),
            None => Ok(self.combined_output),
        }
    }
}

fn join_output(stdout: &str, stderr: &str) -> String {
    let mut combined = String::with_capacity(stdout.len() + stderr.len());
    combined.push_str(stdout);
    combined.push_str(stderr);
    combined
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        if let Err(e) = reader.read_to_end(&mut buf).await {
            debug!("Stopped draining tool output: {}", e);
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Read `key=value` lines, flushing the accumulated block to `sink` whenever
/// the `progress` key arrives. Every line is appended to `captured`.
async fn read_progress_lines<R: AsyncRead + Unpin>(
    stdout: R,
    captured: &mut String,
    sink: &mut ProgressSink<'_>,
) -> std::result::Result<(), String> {
    let mut lines = BufReader::new(stdout).lines();
    let mut block = ProgressBlock::new();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => return Err(e.to_string()),
        };

        debug!(target: DIAG_TARGET, "progress: {}", line);
        captured.push_str(&line);
        captured.push('\n');

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        block.insert(key.to_string(), value.trim().to_string());
        if key == "progress" {
            sink(std::mem::take(&mut block));
        }
    }

    if !block.is_empty() {
        debug!("Discarding {} progress keys without a closing progress line", block.len());
    }
    Ok(())
}

/// Runs the external media tool as a child process
pub struct ProcessRunner {
    binary_path: String,
}

impl ProcessRunner {
    pub fn new<S: Into<String>>(binary_path: S) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    fn spawn(command: &MediaCommand) -> std::io::Result<Child> {
        Command::new(&command.binary_path)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }

    /// Spawn, capture everything, wait
    pub async fn run_blocking(
        &self,
        command: &MediaCommand,
        timeout: Option<Duration>,
    ) -> ExitResult {
        debug!(target: DIAG_TARGET, "invoke (blocking): {}", command.display_line());

        let child = match Self::spawn(command) {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to start {}: {}", command.binary_path, e);
                return ExitResult::failed(RunFailure::Spawn(e.to_string()), String::new());
            }
        };

        let waiting = child.wait_with_output();
        let output = match timeout {
            // Dropping the wait future kills the child
            Some(limit) => match tokio::time::timeout(limit, waiting).await {
                Ok(output) => output,
                Err(_) => {
                    warn!("{} timed out after {:?}", command.description, limit);
                    return ExitResult::failed(RunFailure::TimedOut(limit), String::new());
                }
            },
            None => waiting.await,
        };

        let result = match output {
            Ok(output) => ExitResult::exited(
                output.status.code().unwrap_or(SYNTHETIC_FAILURE_CODE),
                join_output(
                    &String::from_utf8_lossy(&output.stdout),
                    &String::from_utf8_lossy(&output.stderr),
                ),
            ),
            Err(e) => ExitResult::failed(RunFailure::Stream(e.to_string()), String::new()),
        };
        debug!(
            target: DIAG_TARGET,
            "exit (blocking): {} -> {}", command.description, result.return_code
        );
        result
    }

    /// Spawn with machine-readable progress on stdout and feed each block to `sink`
    pub async fn run_streaming(
        &self,
        command: &MediaCommand,
        sink: &mut ProgressSink<'_>,
        timeout: Option<Duration>,
    ) -> ExitResult {
        let command = command.with_progress_reporting();
        debug!(target: DIAG_TARGET, "invoke (streaming): {}", command.display_line());

        let mut child = match Self::spawn(&command) {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to start {}: {}", command.binary_path, e);
                return ExitResult::failed(RunFailure::Spawn(e.to_string()), String::new());
            }
        };

        let stderr_task = tokio::spawn(drain(child.stderr.take()));
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill().await;
            let stderr = stderr_task.await.unwrap_or_default();
            let failure = RunFailure::Stream("stdout was not captured".to_string());
            return ExitResult::failed(failure, stderr);
        };

        let mut captured = String::new();
        let outcome = {
            let run = async {
                let read = read_progress_lines(stdout, &mut captured, sink).await;
                (read, child.wait().await)
            };
            match timeout {
                Some(limit) => tokio::time::timeout(limit, run).await.ok(),
                None => Some(run.await),
            }
        };

        let Some((read, status)) = outcome else {
            let limit = timeout.unwrap_or_default();
            warn!("{} timed out after {:?}; killing it", command.description, limit);
            let _ = child.kill().await;
            let stderr = tokio::time::timeout(Duration::from_secs(1), stderr_task)
                .await
                .ok()
                .and_then(|joined| joined.ok())
                .unwrap_or_default();
            return ExitResult::failed(RunFailure::TimedOut(limit), join_output(&captured, &stderr));
        };

        let stderr = stderr_task.await.unwrap_or_default();
        let combined = join_output(&captured, &stderr);

        let result = match (read, status) {
            (Err(e), _) => {
                warn!("Lost the progress stream of {}: {}", command.description, e);
                ExitResult::failed(RunFailure::Stream(e), combined)
            }
            (Ok(()), Err(e)) => ExitResult::failed(RunFailure::Stream(e.to_string()), combined),
            (Ok(()), Ok(status)) => {
                ExitResult::exited(status.code().unwrap_or(SYNTHETIC_FAILURE_CODE), combined)
            }
        };
        debug!(
            target: DIAG_TARGET,
            "exit (streaming): {} -> {}", command.description, result.return_code
        );
        result
    }
}

#[async_trait]
impl MediaRunner for ProcessRunner {
    async fn run(
        &self,
        command: &MediaCommand,
        sink: Option<&mut ProgressSink<'_>>,
        timeout: Option<Duration>,
    ) -> ExitResult {
        match sink {
            Some(sink) => self.run_streaming(command, sink, timeout).await,
            None => self.run_blocking(command, timeout).await,
        }
    }

    /// Check if the media tool is available
    fn check_availability(&self) -> Result<()> {
        let output = StdCommand::new(&self.binary_path)
            .arg("-version")
            .output()
            .map_err(|e| HushError::Spawn {
                binary: self.binary_path.clone(),
                message: e.to_string(),
            })?;

        if output.status.success() {
            let version_info = String::from_utf8_lossy(&output.stdout);
            let first_line = version_info.lines().next().unwrap_or("unknown version");
            info!("Media tool is available: {}", first_line);
            Ok(())
        } else {
            Err(HushError::Process {
                description: "Version check".to_string(),
                code: output.status.code().unwrap_or(SYNTHETIC_FAILURE_CODE),
                output: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> MediaCommand {
        // `-progress pipe:1` become $0/$1 of the script, which keeps the
        // runner from prepending flags `sh` would not understand.
        MediaCommand::new("sh", "Test script")
            .arg("-c")
            .arg(script)
            .arg("-progress")
            .arg("pipe:1")
    }

    #[tokio::test]
    async fn test_blocking_captures_output() {
        let runner = ProcessRunner::new("sh");
        let cmd = MediaCommand::new("sh", "Echo").arg("-c").arg("echo out; echo err >&2; exit 0");
        let result = runner.run(&cmd, None, None).await;

        assert!(result.success());
        assert_eq!(result.combined_output, "out\nerr\n");
    }

    #[tokio::test]
    async fn test_blocking_nonzero_exit() {
        let runner = ProcessRunner::new("sh");
        let cmd = MediaCommand::new("sh", "Fail").arg("-c").arg("echo nope >&2; exit 7");
        let result = runner.run(&cmd, None, None).await;

        assert_eq!(result.return_code, 7);
        assert!(result.failure.is_none());
        match result.into_result(&cmd) {
            Err(HushError::Process { code, output, .. }) => {
                assert_eq!(code, 7);
                assert_eq!(output, "nope\n");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let runner = ProcessRunner::new("/nonexistent/ffmpeg");
        let cmd = MediaCommand::new("/nonexistent/ffmpeg", "Remux").arg("-version");

        let result = runner.run(&cmd, None, None).await;
        assert_eq!(result.return_code, SYNTHETIC_FAILURE_CODE);
        assert!(matches!(result.failure, Some(RunFailure::Spawn(_))));
        assert!(matches!(result.into_result(&cmd), Err(HushError::Spawn { .. })));

        let mut sink = |_block: ProgressBlock| {};
        let result = runner.run(&cmd, Some(&mut sink), None).await;
        assert!(matches!(result.failure, Some(RunFailure::Spawn(_))));
    }

    #[tokio::test]
    async fn test_blocking_timeout() {
        let runner = ProcessRunner::new("sh");
        let cmd = MediaCommand::new("sh", "Sleep").arg("-c").arg("sleep 5");
        let started = std::time::Instant::now();
        let result = runner.run(&cmd, None, Some(Duration::from_millis(100))).await;

        assert!(matches!(result.failure, Some(RunFailure::TimedOut(_))));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_streaming_flushes_blocks() {
        let runner = ProcessRunner::new("sh");
        let cmd = shell(
            "printf 'frame=1\\nout_time_ms=1000000\\nspeed=2.0x\\nprogress=continue\\n\
             out_time_ms=2000000\\nprogress=end\\n'",
        );

        let mut blocks = Vec::new();
        let mut sink = |block: ProgressBlock| blocks.push(block);
        let result = runner.run(&cmd, Some(&mut sink), None).await;

        assert!(result.success(), "{:?}", result);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].get("out_time_ms").map(String::as_str), Some("1000000"));
        assert_eq!(blocks[0].get("speed").map(String::as_str), Some("2.0x"));
        assert_eq!(blocks[0].get("frame").map(String::as_str), Some("1"));
        assert_eq!(blocks[1].len(), 2);
        assert_eq!(blocks[1].get("progress").map(String::as_str), Some("end"));
    }

    #[tokio::test]
    async fn test_streaming_nonzero_exit_keeps_output() {
        let runner = ProcessRunner::new("sh");
        let cmd = shell("echo out_time_ms=5; echo progress=continue; echo boom >&2; exit 3");

        let mut count = 0;
        let mut sink = |_block: ProgressBlock| count += 1;
        let result = runner.run(&cmd, Some(&mut sink), None).await;

        assert_eq!(result.return_code, 3);
        assert!(result.failure.is_none());
        assert!(result.combined_output.contains("out_time_ms=5"));
        assert!(result.combined_output.ends_with("boom\n"));
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_streaming_timeout_keeps_partial_output() {
        let runner = ProcessRunner::new("sh");
        let cmd = shell("echo out_time_ms=1000000; echo progress=continue; exec sleep 5");

        let mut count = 0;
        let mut sink = |_block: ProgressBlock| count += 1;
        let started = std::time::Instant::now();
        let result = runner.run(&cmd, Some(&mut sink), Some(Duration::from_millis(300))).await;

        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(result.failure, Some(RunFailure::TimedOut(Duration::from_millis(300))));
        assert_eq!(result.return_code, SYNTHETIC_FAILURE_CODE);
        assert!(result.combined_output.contains("out_time_ms=1000000"));
        assert!(result.combined_output.contains("progress=continue"));
        assert_eq!(count, 1);
        assert!(matches!(result.into_result(&cmd), Err(HushError::Process { code: -1, .. })));
    }

    #[tokio::test]
    async fn test_streaming_unreadable_output_is_stream_failure() {
        let runner = ProcessRunner::new("sh");
        // Invalid UTF-8 ends line reading with an error
        let cmd = shell("echo progress=continue; printf '\\377\\n'; exit 0");

        let mut count = 0;
        let mut sink = |_block: ProgressBlock| count += 1;
        let result = runner.run(&cmd, Some(&mut sink), None).await;

        assert!(matches!(result.failure, Some(RunFailure::Stream(_))));
        assert_eq!(result.return_code, SYNTHETIC_FAILURE_CODE);
        assert!(result.combined_output.contains("progress=continue"));
        assert_eq!(count, 1);
    }
}
