//! Process runner
//!
//! Starts one external program per command with stdout and stderr both
//! writing into the same pipe, so the parent reads the merged stream in the
//! order the child produced it. The program is looked up through `PATH`
//! and receives the argument vector directly; no shell is involved.
//!
//! Commands run with the full privileges of the server process.

pub mod stream;

use crate::error::ExecError;
use crate::lexer::ArgumentList;
use nix::sys::signal::Signal;
use os_pipe::{PipeReader, PipeWriter};
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, ExitStatus, Stdio};

pub use stream::{ResponseStreamer, StreamFailure, StreamReport};

/// Creates a child process whose stdout and stderr are the given pipe ends
pub trait Spawner {
    fn spawn(&self, argv: &ArgumentList, stdout: PipeWriter, stderr: PipeWriter)
        -> Result<Child, ExecError>;
}

/// Spawns programs through `std::process::Command`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSpawner;

impl Spawner for SystemSpawner {
    fn spawn(
        &self,
        argv: &ArgumentList,
        stdout: PipeWriter,
        stderr: PipeWriter,
    ) -> Result<Child, ExecError> {
        // The Command owns the parent's copies of the write end; it is
        // dropped on return so the reader sees EOF once the child exits.
        let mut command = Command::new(&argv.program);
        command
            .args(&argv.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);

        command
            .spawn()
            .map_err(|e| ExecError::from_spawn(&argv.program, e))
    }
}

/// A started child and the read end of its output pipe.
///
/// Must be finished with [`RunningProcess::wait`] so the child is reaped.
#[derive(Debug)]
pub struct RunningProcess {
    program: String,
    child: Child,
    output: PipeReader,
}

impl RunningProcess {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Merged stdout/stderr of the child
    pub fn output(&mut self) -> &mut PipeReader {
        &mut self.output
    }

    /// Close the read end and reap the child.
    ///
    /// The read end is closed first so a child still writing gets EPIPE
    /// instead of blocking on a full pipe nobody drains.
    pub fn wait(self) -> Result<ExitStatus, ExecError> {
        let RunningProcess {
            mut child, output, ..
        } = self;
        drop(output);

        let pid = child.id();
        child.wait().map_err(|source| ExecError::Wait { pid, source })
    }
}

/// Exit status plus whatever the drain step produced
#[derive(Debug)]
pub struct ProcessOutcome<T> {
    pub pid: u32,
    pub status: ExitStatus,
    pub drained: T,
}

impl<T> ProcessOutcome<T> {
    pub fn exit(&self) -> ExitKind {
        ExitKind::from(self.status)
    }
}

/// How a child terminated, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Code(i32),
    Signal(Option<Signal>),
}

impl ExitKind {
    pub fn success(&self) -> bool {
        matches!(self, ExitKind::Code(0))
    }
}

impl From<ExitStatus> for ExitKind {
    fn from(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => ExitKind::Code(code),
            None => ExitKind::Signal(status.signal().and_then(|sig| Signal::try_from(sig).ok())),
        }
    }
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitKind::Code(code) => write!(f, "exit {}", code),
            ExitKind::Signal(Some(signal)) => write!(f, "killed by {}", signal),
            ExitKind::Signal(None) => write!(f, "killed by signal"),
        }
    }
}

/// Runs one command at a time, blocking until it exits
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner<S = SystemSpawner> {
    spawner: S,
}

impl ProcessRunner<SystemSpawner> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: Spawner> ProcessRunner<S> {
    pub fn with_spawner(spawner: S) -> Self {
        Self { spawner }
    }

    /// Create the pipe and start the program
    pub fn start(&self, argv: &ArgumentList) -> Result<RunningProcess, ExecError> {
        let (reader, writer) = os_pipe::pipe().map_err(ExecError::Pipe)?;
        let writer_err = writer.try_clone().map_err(ExecError::Pipe)?;

        let child = self.spawner.spawn(argv, writer, writer_err)?;

        Ok(RunningProcess {
            program: argv.program.clone(),
            child,
            output: reader,
        })
    }

    /// Start the program, hand its output to `drain`, then reap it
    pub fn run<T, F>(&self, argv: &ArgumentList, drain: F) -> Result<ProcessOutcome<T>, ExecError>
    where
        F: FnOnce(&mut PipeReader) -> T,
    {
        let mut process = self.start(argv)?;
        let pid = process.pid();
        let drained = drain(process.output());
        let status = process.wait()?;

        Ok(ProcessOutcome {
            pid,
            status,
            drained,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use std::io::{self, Read};

    fn read_all(runner: &ProcessRunner, line: &str) -> (Vec<u8>, ExitKind) {
        let argv = Lexer::split_command(line).unwrap();
        let outcome = runner
            .run(&argv, |out| {
                let mut buf = Vec::new();
                out.read_to_end(&mut buf).unwrap();
                buf
            })
            .unwrap();
        let exit = outcome.exit();
        (outcome.drained, exit)
    }

    #[test]
    fn test_stdout_is_captured() {
        let (output, exit) = read_all(&ProcessRunner::new(), "echo hello");
        assert_eq!(output, b"hello\n");
        assert_eq!(exit, ExitKind::Code(0));
    }

    #[test]
    fn test_stderr_is_merged() {
        let (output, exit) = read_all(&ProcessRunner::new(), "ls /definitely/not/here");
        assert!(!output.is_empty(), "stderr should reach the pipe");
        assert!(!exit.success());
    }

    #[test]
    fn test_arguments_are_not_shell_expanded() {
        let (output, _) = read_all(&ProcessRunner::new(), "echo $HOME *");
        assert_eq!(output, b"$HOME *\n");
    }

    #[test]
    fn test_stdin_is_closed() {
        // would block forever if stdin were inherited
        let (output, exit) = read_all(&ProcessRunner::new(), "cat");
        assert!(output.is_empty());
        assert!(exit.success());
    }

    #[test]
    fn test_missing_program_is_not_found() {
        let argv = Lexer::split_command("rexsh-no-such-program-12345").unwrap();
        let err = ProcessRunner::new().start(&argv).unwrap_err();
        assert!(matches!(err, ExecError::NotFound { .. }));
    }

    #[test]
    fn test_exit_code_is_collected() {
        let (_, exit) = read_all(&ProcessRunner::new(), "false");
        assert_eq!(exit, ExitKind::Code(1));
        assert_eq!(exit.to_string(), "exit 1");
    }

    struct FailingSpawner;

    impl Spawner for FailingSpawner {
        fn spawn(
            &self,
            argv: &ArgumentList,
            _stdout: PipeWriter,
            _stderr: PipeWriter,
        ) -> Result<Child, ExecError> {
            Err(ExecError::from_spawn(
                &argv.program,
                io::Error::new(io::ErrorKind::Other, "fork failed"),
            ))
        }
    }

    #[test]
    fn test_custom_spawner_errors_propagate() {
        let runner = ProcessRunner::with_spawner(FailingSpawner);
        let argv = Lexer::split_command("echo hi").unwrap();
        let err = runner.run(&argv, |_| ()).unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }
}
