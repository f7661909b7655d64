//! Command runner abstraction used to drive the configuration tool.

use std::ffi::OsString;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use super::DeployError;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output, one `\n` terminated line per line read.
    pub stdout: String,
    /// Captured standard error, one `\n` terminated line per line read.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Future returned by [`CommandRunner::run`].
pub type CommandFuture<'a> = Pin<Box<dyn Future<Output = Result<CommandOutput, DeployError>> + Send + 'a>>;

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::Spawn`] if the command cannot be started or its
    /// output cannot be read.
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> CommandFuture<'a>;
}

#[derive(Clone, Copy, Debug)]
enum Stream {
    Stdout,
    Stderr,
}

/// Runner that logs every output line as it arrives while still capturing
/// the full output.
///
/// Both pipes are drained concurrently with the wait on the child, so a
/// chatty stream can never fill its pipe buffer and stall the process. The
/// future resolves only after both streams reach end of file and the process
/// has exited.
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamingCommandRunner;

impl CommandRunner for StreamingCommandRunner {
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> CommandFuture<'a> {
        Box::pin(async move {
            let spawn_error = |message: String| DeployError::Spawn {
                program: program.to_owned(),
                message,
            };

            let mut child = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|err| spawn_error(err.to_string()))?;

            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| spawn_error(String::from("stdout pipe unavailable")))?;
            let stderr = child
                .stderr
                .take()
                .ok_or_else(|| spawn_error(String::from("stderr pipe unavailable")))?;

            let (stdout, stderr, status) = tokio::join!(
                drain(program, stdout, Stream::Stdout),
                drain(program, stderr, Stream::Stderr),
                child.wait(),
            );

            Ok(CommandOutput {
                code: status.map_err(|err| spawn_error(err.to_string()))?.code(),
                stdout: stdout.map_err(|err| spawn_error(err.to_string()))?,
                stderr: stderr.map_err(|err| spawn_error(err.to_string()))?,
            })
        })
    }
}

async fn drain<R>(program: &str, pipe: R, stream: Stream) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut captured = String::new();
    let mut lines = BufReader::new(pipe).lines();
    while let Some(line) = lines.next_line().await? {
        match stream {
            Stream::Stdout => info!(program, "{line}"),
            Stream::Stderr => warn!(program, "{line}"),
        }
        captured.push_str(&line);
        captured.push('\n');
    }
    Ok(captured)
}
