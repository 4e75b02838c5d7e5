//! Subprocess execution for the compile and convert steps.
//!
//! Non-zero exit codes are reported in [`CommandOutput`], not as errors; only
//! a failure to launch, a decode failure on stdout, or the wall-clock
//! deadline produce an `Err`. Stderr tolerates non-UTF-8 bytes (TeX engines
//! emit locale-dependent output there), stdout is decoded strictly.

use std::{
    ffi::OsString,
    io::Read,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use thiserror::Error;
use tracing::warn;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` produced non-UTF-8 output on stdout")]
    StdoutEncoding { program: PathBuf },
    #[error("`{program}` exceeded the {timeout_secs}s deadline and was killed")]
    Timeout { program: PathBuf, timeout_secs: u64 },
    #[error("failed waiting for `{program}`: {source}")]
    Wait {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CommandError {
    /// True when the binary itself could not be started (missing or not
    /// executable) as opposed to failing after launch.
    pub fn is_launch_failure(&self) -> bool {
        matches!(self, CommandError::Launch { .. })
    }
}

/// Captured result of a finished subprocess.
#[derive(Debug)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run `program` with `args`, capturing stdout/stderr until it exits or the
/// deadline passes. The child is killed on timeout; the caller cannot cancel
/// an in-flight run otherwise.
pub fn run_command(
    program: &Path,
    args: &[OsString],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CommandOutput, CommandError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let mut child = command.spawn().map_err(|source| CommandError::Launch {
        program: program.to_path_buf(),
        source,
    })?;

    // Drain the pipes on helper threads so a chatty child cannot deadlock
    // against a full pipe buffer while we poll for exit.
    let stdout_reader = spawn_pipe_reader(child.stdout.take());
    let stderr_reader = spawn_pipe_reader(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    if let Err(err) = child.kill() {
                        warn!(
                            target = "application::render::command",
                            program = %program.display(),
                            error = %err,
                            "Failed to kill timed-out subprocess"
                        );
                    }
                    let _ = child.wait();
                    // kill() reaps only the direct child; a grandchild (the
                    // engine latexmk spawns) can keep the pipe write ends
                    // open, so joining the readers here would block past the
                    // deadline. The threads exit once the tree does.
                    drop(stdout_reader);
                    drop(stderr_reader);
                    return Err(CommandError::Timeout {
                        program: program.to_path_buf(),
                        timeout_secs: timeout.as_secs(),
                    });
                }
                thread::sleep(WAIT_POLL_INTERVAL);
            }
            Err(source) => {
                let _ = child.kill();
                let _ = child.wait();
                drop(stdout_reader);
                drop(stderr_reader);
                return Err(CommandError::Wait {
                    program: program.to_path_buf(),
                    source,
                });
            }
        }
    };

    let stdout_bytes = stdout_reader.join().unwrap_or_default();
    let stderr_bytes = stderr_reader.join().unwrap_or_default();

    let stdout =
        String::from_utf8(stdout_bytes).map_err(|_| CommandError::StdoutEncoding {
            program: program.to_path_buf(),
        })?;
    let stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();

    Ok(CommandOutput {
        stdout,
        stderr,
        exit_code: status.code(),
    })
}

fn spawn_pipe_reader<R>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer);
        }
        buffer
    })
}
