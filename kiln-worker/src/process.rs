//! Subprocess execution
//!
//! Runs external commands (git, the site's build recipe) with stdout and
//! stderr merged into one line stream. Both pipes are drained by background
//! tasks for as long as the child lives, so a chatty process can never
//! block on a full pipe while the caller is busy elsewhere.
//!
//! Two ways to consume a process:
//! - `ProcessRunner::run` waits for exit and returns the captured text
//! - `ProcessRunner::spawn` hands back a `RunningProcess` whose lines the
//!   caller receives one by one before calling `finish`

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::debug;

/// Exit code reported when the process could not be started at all
pub const LAUNCH_FAILURE: i32 = -1;

/// Exit code and merged output of a finished process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub exit_code: i32,
    pub output: String,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Final `n` lines of the output, ignoring the terminating newline
    pub fn last_lines(&self, n: usize) -> String {
        last_lines(self.output.strip_suffix('\n').unwrap_or(&self.output), n)
    }
}

/// Returns the final `n` newline-separated lines of `text`
///
/// Empty lines count as lines.
pub fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// A program invocation
#[derive(Debug, Clone)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    cwd: Option<PathBuf>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            cwd: None,
        }
    }

    /// A script executed by `sh -c`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }
        command
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Launches processes with merged output capture
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// Starts a process and returns a handle for streaming its output
    ///
    /// A launch failure is returned as a finished outcome with exit code
    /// `LAUNCH_FAILURE` and a diagnostic message as output.
    pub fn spawn(&self, command: &CommandLine) -> Result<RunningProcess, ProcessOutcome> {
        debug!("Spawning: {}", command);

        let mut child = command.to_command().spawn().map_err(|e| ProcessOutcome {
            exit_code: LAUNCH_FAILURE,
            output: format!("failed to launch '{}': {}\n", command.program(), e),
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, tx);
        }

        Ok(RunningProcess {
            child,
            lines: rx,
            output: String::new(),
        })
    }

    /// Runs a process to completion and returns everything it printed
    pub async fn run(&self, command: &CommandLine) -> ProcessOutcome {
        match self.spawn(command) {
            Ok(process) => process.finish().await,
            Err(outcome) => outcome,
        }
    }
}

/// A started process whose output is being drained in the background
pub struct RunningProcess {
    child: Child,
    lines: mpsc::UnboundedReceiver<String>,
    output: String,
}

impl RunningProcess {
    /// Waits for the next complete output line
    ///
    /// Returns `None` once both output pipes are closed. Every line is also
    /// kept for the final `ProcessOutcome`.
    pub async fn next_line(&mut self) -> Option<String> {
        let line = self.lines.recv().await?;
        self.output.push_str(&line);
        self.output.push('\n');
        Some(line)
    }

    /// Drains any remaining output and waits for the process to exit
    pub async fn finish(mut self) -> ProcessOutcome {
        while self.next_line().await.is_some() {}

        match self.child.wait().await {
            Ok(status) => ProcessOutcome {
                exit_code: exit_code(status),
                output: self.output,
            },
            Err(e) => {
                self.output
                    .push_str(&format!("failed to wait for process: {}\n", e));
                ProcessOutcome {
                    exit_code: 1,
                    output: self.output,
                }
            }
        }
    }
}

/// Reads `reader` line by line into `tx` until EOF
///
/// Trailing bytes without a newline are sent as a last line. Keeps reading
/// after the receiver is gone so the child never blocks on the pipe.
fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if buf.last() == Some(&b'\n') {
                        buf.pop();
                        if buf.last() == Some(&b'\r') {
                            buf.pop();
                        }
                    }
                    let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
                }
                Err(e) => {
                    debug!("Output pipe read failed: {}", e);
                    break;
                }
            }
        }
    });
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}
