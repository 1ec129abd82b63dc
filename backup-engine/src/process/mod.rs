//! Process supervision for external engine tools.
//!
//! A [`Supervisor`] spawns one tool per call, wires its standard streams,
//! forwards stderr line by line to the job log and turns the exit status
//! into a typed result. Cancellation sends SIGTERM, waits a grace period and
//! then kills; `kill_on_drop` covers tasks that are aborted outright.

pub mod mask;

use crate::dialect::join_args;
use crate::report::{JobReporter, LogLevel, LogType, ProgressCallback, ProgressReader};
use crate::utils::errors::{stderr_tail, STDERR_TAIL_BYTES};
use crate::utils::{EngineError, Result};
use bytes::BytesMut;
use futures_util::StreamExt;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default wait between SIGTERM and SIGKILL.
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(10);

const MAX_STDERR_LINE: usize = 64 * 1024;

/// Newline-framed stderr that tolerates invalid UTF-8 and splits lines
/// longer than [`MAX_STDERR_LINE`], so decoding never stops early.
#[derive(Debug, Default)]
struct StderrLines;

impl Decoder for StderrLines {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        let end = match buf.iter().position(|b| *b == b'\n') {
            Some(newline) if newline < MAX_STDERR_LINE => newline + 1,
            _ if buf.len() >= MAX_STDERR_LINE => MAX_STDERR_LINE,
            _ => return Ok(None),
        };
        let line = buf.split_to(end);
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let rest = buf.split();
        Ok(Some(String::from_utf8_lossy(&rest).into_owned()))
    }
}

/// How a nonzero exit status is judged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitPolicy {
    /// Anything but exit code 0 fails.
    #[default]
    ZeroOnly,
    /// `pg_restore` exits 1 when it skipped failing statements but finished
    /// the restore ("WARNING: errors ignored on restore: N"); treat that as
    /// a partial success.
    AllowIgnoredErrors,
}

/// One external tool invocation
#[derive(Debug, Clone)]
pub struct ToolCommand {
    /// Logical tool name used in logs and errors
    pub tool: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub exit_policy: ExitPolicy,
}

impl ToolCommand {
    pub fn new(tool: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            tool: tool.into(),
            program: program.into(),
            args,
            env: Vec::new(),
            exit_policy: ExitPolicy::default(),
        }
    }

    pub fn envs(mut self, env: Vec<(String, String)>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn exit_policy(mut self, policy: ExitPolicy) -> Self {
        self.exit_policy = policy;
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Unmasked command line; pass through [`mask::mask_command`] before logging.
    pub fn command_line(&self) -> String {
        join_args(&self.program, &self.args)
    }
}

/// Where the child's stdin comes from
pub enum Input {
    Null,
    /// A file streamed in, with optional byte-level progress
    File {
        path: PathBuf,
        progress: Option<ProgressCallback>,
    },
    /// Any async producer, e.g. the read half of a rewrite pipe
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

/// Where the child's stdout goes
#[derive(Debug, Clone)]
pub enum Output {
    Null,
    File(PathBuf),
    /// Collected in memory; only for short query output.
    Capture,
}

/// What a finished tool produced
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub bytes_written: u64,
    /// Exit 1 accepted under [`ExitPolicy::AllowIgnoredErrors`]
    pub partial: bool,
}

/// Spawns and supervises external tools for one job.
#[derive(Clone)]
pub struct Supervisor {
    reporter: JobReporter,
    cancel: CancellationToken,
    secrets: Vec<String>,
    grace: Duration,
    forward_stderr: bool,
}

impl Supervisor {
    pub fn new(reporter: JobReporter, cancel: CancellationToken) -> Self {
        Self {
            reporter,
            cancel,
            secrets: Vec::new(),
            grace: DEFAULT_TERMINATE_GRACE,
            forward_stderr: true,
        }
    }

    pub fn with_secrets(mut self, secrets: Vec<String>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Keep stderr out of the job log (connection checks); it is still captured.
    pub fn quiet(mut self) -> Self {
        self.forward_stderr = false;
        self
    }

    /// Same supervisor with a different cancellation token.
    pub fn with_cancel(&self, cancel: CancellationToken) -> Self {
        let mut supervisor = self.clone();
        supervisor.cancel = cancel;
        supervisor
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn mask(&self, text: &str) -> String {
        mask::mask_command(text, &self.secrets)
    }

    /// Run `command` to completion.
    pub async fn run(&self, command: ToolCommand, input: Input, output: Output) -> Result<ToolOutput> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let masked = self.mask(&command.command_line());
        if self.forward_stderr {
            self.reporter.command(format!("Executing {}", command.tool), masked);
        } else {
            debug!(tool = %command.tool, command = %masked, "Executing");
        }

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(match input {
                Input::Null => Stdio::null(),
                _ => Stdio::piped(),
            })
            .stdout(match output {
                Output::Null => Stdio::null(),
                _ => Stdio::piped(),
            })
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => EngineError::ToolNotFound(command.program.clone()),
                _ => EngineError::Io(e),
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let feed = async move {
            match stdin {
                Some(mut stdin) => {
                    let result = feed_input(input, &mut stdin).await;
                    // Close stdin so the tool sees EOF.
                    drop(stdin);
                    match result {
                        // The tool exited before reading everything; its
                        // exit status explains why.
                        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                        other => other,
                    }
                }
                None => Ok(()),
            }
        };

        let drain = async move {
            match (output, stdout) {
                (Output::File(path), Some(mut stdout)) => {
                    let mut file = File::create(&path).await?;
                    let written = tokio::io::copy(&mut stdout, &mut file).await?;
                    file.flush().await?;
                    file.sync_all().await?;
                    Ok::<_, io::Error>((written, String::new()))
                }
                (Output::Capture, Some(mut stdout)) => {
                    let mut buf = Vec::new();
                    stdout.read_to_end(&mut buf).await?;
                    Ok((buf.len() as u64, String::from_utf8_lossy(&buf).into_owned()))
                }
                _ => Ok((0, String::new())),
            }
        };

        let collect = self.collect_stderr(stderr);

        let finished = {
            let io = async { tokio::join!(feed, drain, collect, child.wait()) };
            tokio::select! {
                res = io => Some(res),
                _ = self.cancel.cancelled() => None,
            }
        };

        let Some((fed, drained, stderr_text, status)) = finished else {
            self.terminate(&mut child).await;
            warn!(tool = %command.tool, "Tool cancelled");
            return Err(EngineError::Cancelled);
        };

        let status = status?;
        let partial = self.judge_exit(&command, status, &stderr_text)?;
        fed?;
        let (bytes_written, stdout) = drained?;

        Ok(ToolOutput {
            stdout,
            stderr: stderr_text,
            bytes_written,
            partial,
        })
    }

    async fn collect_stderr<R: AsyncRead + Unpin>(&self, stderr: Option<R>) -> String {
        let Some(stderr) = stderr else {
            return String::new();
        };
        let mut collected = String::new();
        let mut lines = FramedRead::new(stderr, StderrLines);

        while let Some(line) = lines.next().await {
            match line {
                Ok(line) => {
                    let line = self.mask(line.trim_end());
                    if line.is_empty() {
                        continue;
                    }
                    if self.forward_stderr {
                        self.reporter.log(classify_line(&line), LogType::General, line.clone(), None);
                    }
                    collected.push_str(&line);
                    collected.push('\n');
                    keep_tail(&mut collected);
                }
                Err(e) => {
                    debug!("stderr read failed: {}", e);
                    // Keep the pipe drained so the tool cannot block on it.
                    let mut rest = lines.into_inner();
                    let _ = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await;
                    break;
                }
            }
        }
        collected
    }

    fn judge_exit(&self, command: &ToolCommand, status: ExitStatus, stderr: &str) -> Result<bool> {
        if status.success() {
            return Ok(false);
        }

        let code = status.code();
        if command.exit_policy == ExitPolicy::AllowIgnoredErrors
            && code == Some(1)
            && is_ignored_errors(stderr)
        {
            self.reporter.warning(format!(
                "{} finished with ignored errors; the restore may be incomplete",
                command.tool
            ));
            return Ok(true);
        }

        let stderr = stderr_tail(stderr);
        if is_connection_failure(&stderr) {
            return Err(EngineError::Connection {
                message: format!("{} could not reach the server", command.tool),
                stderr,
            });
        }
        Err(EngineError::ToolFailed {
            tool: command.tool.clone(),
            code,
            stderr,
        })
    }

    async fn terminate(&self, child: &mut Child) {
        if let Some(pid) = child.id() {
            match i32::try_from(pid) {
                Ok(pid) => {
                    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                        debug!("SIGTERM to {} failed: {}", pid, e);
                    }
                }
                Err(_) => debug!("pid {} out of range", pid),
            }
            if tokio::time::timeout(self.grace, child.wait()).await.is_ok() {
                return;
            }
            warn!("Tool ignored SIGTERM for {:?}, killing", self.grace);
        }
        if let Err(e) = child.kill().await {
            debug!("kill failed: {}", e);
        }
    }
}

async fn feed_input<W: AsyncWrite + Unpin>(input: Input, stdin: &mut W) -> io::Result<()> {
    match input {
        Input::Null => {}
        Input::File { path, progress } => {
            let file = File::open(&path).await?;
            let total = file.metadata().await?.len();
            match progress {
                Some(callback) => {
                    let mut reader = ProgressReader::new(file, total, callback);
                    tokio::io::copy(&mut reader, stdin).await?;
                }
                None => {
                    let mut file = file;
                    tokio::io::copy(&mut file, stdin).await?;
                }
            }
        }
        Input::Reader(mut reader) => {
            tokio::io::copy(&mut reader, stdin).await?;
        }
    }
    stdin.shutdown().await
}

fn keep_tail(text: &mut String) {
    let limit = STDERR_TAIL_BYTES * 8;
    if text.len() <= limit {
        return;
    }
    let mut cut = text.len() - STDERR_TAIL_BYTES * 4;
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    text.drain(..cut);
}

fn classify_line(line: &str) -> LogLevel {
    let lower = line.to_ascii_lowercase();
    if lower.contains("error") || lower.contains("fatal") {
        LogLevel::Error
    } else if lower.contains("warning") {
        LogLevel::Warning
    } else {
        LogLevel::Info
    }
}

fn is_ignored_errors(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("warning") && lower.contains("errors ignored")
}

fn is_connection_failure(stderr: &str) -> bool {
    const MARKERS: [&str; 10] = [
        "can't connect",
        "could not connect",
        "connection refused",
        "could not translate host",
        "unknown mysql server host",
        "unknown server host",
        "no reachable servers",
        "server selection error",
        "login timeout expired",
        "could not connect to redis",
    ];
    let lower = stderr.to_ascii_lowercase();
    MARKERS.iter().any(|m| lower.contains(m))
}
