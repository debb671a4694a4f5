//! Subprocess execution with capped output capture.
//!
//! Commands run through the platform shell. Stdout and stderr are drained on
//! reader threads so a chatty child never blocks on a full pipe; only the
//! first N bytes of each stream are kept and the rest is replaced by a
//! marker. A launch failure or timeout becomes a synthetic exit code of -1
//! rather than an error.

use crate::config::CaptureConfig;
use log::{debug, info, warn};
use std::io::Read;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Exit code recorded when a command could not run to completion.
pub const SYNTHETIC_EXIT_CODE: i32 = -1;

/// How long to wait for output readers once the child is gone. Background
/// grandchildren can keep the pipes open indefinitely.
const READER_GRACE: Duration = Duration::from_millis(500);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Why a command did not produce a normal exit status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionFailure {
    /// The process could not be spawned
    Launch(String),
    /// The process was killed after the configured timeout
    TimedOut(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub output: Option<String>,
    pub error_output: Option<String>,
    pub duration_ms: u64,
    pub failure: Option<ExecutionFailure>,
}

impl ExecutionResult {
    fn failed(failure: ExecutionFailure, message: String, duration_ms: u64) -> Self {
        ExecutionResult {
            exit_code: SYNTHETIC_EXIT_CODE,
            output: None,
            error_output: Some(message),
            duration_ms,
            failure: Some(failure),
        }
    }
}

/// Runs shell commands according to [`CaptureConfig`].
#[derive(Debug, Clone)]
pub struct Executor {
    max_output_bytes: usize,
    max_error_bytes: usize,
    timeout: Option<Duration>,
}

impl Executor {
    pub fn new(config: &CaptureConfig) -> Self {
        Executor {
            max_output_bytes: config.max_output_bytes,
            max_error_bytes: config.max_error_bytes,
            timeout: (config.timeout_secs > 0).then(|| Duration::from_secs(config.timeout_secs)),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `command` in `cwd`, blocking until it exits or times out.
    pub fn run(&self, command: &str, cwd: &Path) -> ExecutionResult {
        let start = Instant::now();

        let mut child = match shell_command(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to launch '{}': {}", command, e);
                let message = format!("Failed to execute command: {}", e);
                return ExecutionResult::failed(
                    ExecutionFailure::Launch(e.to_string()),
                    message,
                    elapsed_ms(start),
                );
            }
        };

        let stdout = child
            .stdout
            .take()
            .map(|pipe| CappedReader::spawn(pipe, self.max_output_bytes));
        let stderr = child
            .stderr
            .take()
            .map(|pipe| CappedReader::spawn(pipe, self.max_error_bytes));

        let status = loop {
            if let Some(timeout) = self.timeout {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    info!(
                        "Command timed out after {}s: {}",
                        timeout.as_secs_f64(),
                        command
                    );
                    break None;
                }
            }

            match child.try_wait() {
                Ok(Some(status)) => break Some(Ok(status)),
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    let _ = child.kill();
                    break Some(Err(e));
                }
            }
        };
        let duration_ms = elapsed_ms(start);

        let output = stdout.and_then(CappedReader::finish);
        let error_output = stderr.and_then(CappedReader::finish);

        match status {
            Some(Ok(status)) => {
                let exit_code = exit_code(status);
                debug!("'{}' exited with {} in {}ms", command, exit_code, duration_ms);
                ExecutionResult {
                    exit_code,
                    output,
                    error_output,
                    duration_ms,
                    failure: None,
                }
            }
            Some(Err(e)) => {
                warn!("Lost track of '{}': {}", command, e);
                ExecutionResult {
                    output,
                    ..ExecutionResult::failed(
                        ExecutionFailure::Launch(e.to_string()),
                        format!("Failed to wait for command: {}", e),
                        duration_ms,
                    )
                }
            }
            None => {
                let timeout = self.timeout.unwrap_or_default();
                let mut message =
                    format!("Command timed out after {} seconds", timeout.as_secs_f64());
                if let Some(partial) = error_output {
                    message = format!("{}\n{}", partial, message);
                }
                ExecutionResult {
                    output,
                    ..ExecutionResult::failed(
                        ExecutionFailure::TimedOut(timeout),
                        message,
                        duration_ms,
                    )
                }
            }
        }
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(SYNTHETIC_EXIT_CODE)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(SYNTHETIC_EXIT_CODE)
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[derive(Debug, Default)]
struct Captured {
    kept: Vec<u8>,
    omitted: u64,
}

/// Drains a pipe on its own thread, keeping at most `cap` bytes.
struct CappedReader {
    captured: Arc<Mutex<Captured>>,
    handle: JoinHandle<()>,
}

impl CappedReader {
    fn spawn<R: Read + Send + 'static>(mut pipe: R, cap: usize) -> Self {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let sink = Arc::clone(&captured);

        let handle = thread::spawn(move || {
            let mut buf = [0u8; 8192];
            loop {
                let n = match pipe.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let mut captured = sink.lock().unwrap_or_else(|p| p.into_inner());
                let room = cap.saturating_sub(captured.kept.len());
                let take = room.min(n);
                captured.kept.extend_from_slice(&buf[..take]);
                captured.omitted += (n - take) as u64;
            }
        });

        CappedReader { captured, handle }
    }

    /// Whatever was read, as text with a truncation marker when capped.
    fn finish(self) -> Option<String> {
        let deadline = Instant::now() + READER_GRACE;
        while !self.handle.is_finished() && Instant::now() < deadline {
            thread::sleep(POLL_INTERVAL);
        }
        if self.handle.is_finished() {
            let _ = self.handle.join();
        } else {
            debug!("Output pipe still open after exit; keeping what was read");
        }

        let captured = self.captured.lock().unwrap_or_else(|p| p.into_inner());
        if captured.kept.is_empty() && captured.omitted == 0 {
            return None;
        }

        let mut text = String::from_utf8_lossy(&captured.kept).into_owned();
        if captured.omitted > 0 {
            text.push_str(&format!(
                "\n[... output truncated: {} bytes omitted]",
                captured.omitted
            ));
        }
        Some(text)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn executor() -> Executor {
        Executor::new(&CaptureConfig::default())
    }

    #[test]
    fn test_captures_stdout_and_exit_code() {
        let temp_dir = TempDir::new().unwrap();
        let result = executor().run("echo hello; echo oops >&2; exit 3", temp_dir.path());

        assert_eq!(result.exit_code, 3);
        assert_eq!(result.output.as_deref(), Some("hello\n"));
        assert_eq!(result.error_output.as_deref(), Some("oops\n"));
        assert!(result.failure.is_none());
    }

    #[test]
    fn test_runs_in_working_directory() {
        let temp_dir = TempDir::new().unwrap();
        executor().run("echo hi > test.txt", temp_dir.path());
        assert_eq!(
            std::fs::read_to_string(temp_dir.path().join("test.txt")).unwrap(),
            "hi\n"
        );
    }

    #[test]
    fn test_empty_output_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let result = executor().run("true", temp_dir.path());
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, None);
        assert_eq!(result.error_output, None);
    }

    #[test]
    fn test_output_is_truncated_with_marker() {
        let temp_dir = TempDir::new().unwrap();
        let config = CaptureConfig {
            max_output_bytes: 10,
            ..CaptureConfig::default()
        };
        let result = Executor::new(&config).run("printf '%0100d' 0", temp_dir.path());

        let output = result.output.unwrap();
        assert!(output.starts_with("0000000000\n"));
        assert!(output.ends_with("[... output truncated: 90 bytes omitted]"));
    }

    #[test]
    fn test_unknown_binary_is_nonzero_exit() {
        let temp_dir = TempDir::new().unwrap();
        let result = executor().run("definitely-not-a-real-binary-xyz", temp_dir.path());
        assert_eq!(result.exit_code, 127);
        assert!(result.error_output.is_some());
    }

    #[test]
    fn test_launch_failure_is_synthetic_exit() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("does-not-exist");
        let result = executor().run("echo never", &missing);

        assert_eq!(result.exit_code, SYNTHETIC_EXIT_CODE);
        assert!(matches!(result.failure, Some(ExecutionFailure::Launch(_))));
        assert!(result
            .error_output
            .unwrap()
            .starts_with("Failed to execute command"));
    }

    #[test]
    fn test_timeout_kills_command() {
        let temp_dir = TempDir::new().unwrap();
        let start = Instant::now();
        let result = executor()
            .with_timeout(Some(Duration::from_millis(200)))
            .run("sleep 5", temp_dir.path());

        assert!(start.elapsed() < Duration::from_secs(4));
        assert_eq!(result.exit_code, SYNTHETIC_EXIT_CODE);
        assert!(matches!(result.failure, Some(ExecutionFailure::TimedOut(_))));
        assert!(result.error_output.unwrap().contains("Command timed out after"));
    }

    #[test]
    fn test_signal_exit_code() {
        let temp_dir = TempDir::new().unwrap();
        let result = executor().run("kill -TERM $$", temp_dir.path());
        assert_eq!(result.exit_code, 128 + 15);
    }
}
