use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::adapters::block_on;

/// A fully enumerated external command: program, arguments, working
/// directory and extra environment for the child only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Value following `flag` in the argument list, if any.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|index| self.args.get(index + 1))
            .map(String::as_str)
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, or `-1` when the process was terminated by a signal.
    pub code: i32,
}

impl ProcessExit {
    pub fn success(self) -> bool {
        self.code == 0
    }
}

/// Runs an external command to completion, handing each line of its merged
/// stdout/stderr to `on_line` as soon as it is read.
///
/// `Err` means the process could not be started or awaited; a process that
/// ran and failed is reported through [`ProcessExit`].
pub trait ProcessRunner: Send + Sync {
    fn run(
        &self,
        command: &CommandSpec,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<ProcessExit, String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

impl ProcessRunner for TokioProcessRunner {
    fn run(
        &self,
        command: &CommandSpec,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<ProcessExit, String> {
        block_on(run_streaming(command, on_line))
    }
}

async fn run_streaming(
    command: &CommandSpec,
    on_line: &mut dyn FnMut(&str),
) -> Result<ProcessExit, String> {
    let mut process = Command::new(&command.program);
    process
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &command.current_dir {
        process.current_dir(dir);
    }
    for (key, value) in &command.envs {
        process.env(key, value);
    }

    let mut child = process
        .spawn()
        .map_err(|error| format!("failed to spawn `{}`: {error}", command.program))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "child stdout was not captured".to_string())?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| "child stderr was not captured".to_string())?;

    let mut stdout = BufReader::new(stdout);
    let mut stderr = BufReader::new(stderr);
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();
    let mut stdout_open = true;
    let mut stderr_open = true;

    // Partial reads stay in the per-stream buffers when the other branch wins.
    while stdout_open || stderr_open {
        tokio::select! {
            read = stdout.read_until(b'\n', &mut stdout_buf), if stdout_open => {
                stdout_open = forward_line(read, &mut stdout_buf, on_line);
            }
            read = stderr.read_until(b'\n', &mut stderr_buf), if stderr_open => {
                stderr_open = forward_line(read, &mut stderr_buf, on_line);
            }
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|error| format!("failed to wait for `{}`: {error}", command.program))?;

    Ok(ProcessExit {
        code: status.code().unwrap_or(-1),
    })
}

/// Emits a completed line and reports whether the stream is still open.
fn forward_line(
    read: std::io::Result<usize>,
    buf: &mut Vec<u8>,
    on_line: &mut dyn FnMut(&str),
) -> bool {
    match read {
        Ok(0) => false,
        Ok(_) => {
            let line = String::from_utf8_lossy(buf);
            on_line(line.trim_end_matches(['\n', '\r']));
            buf.clear();
            true
        }
        Err(error) => {
            tracing::warn!(%error, "failed to read child output stream");
            false
        }
    }
}
