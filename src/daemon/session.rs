//! Session handler
//!
//! Owns one accepted connection and serves command turns until the client
//! leaves:
//!
//! ```text
//! greeting ──> AwaitCommand ──(empty)──────> error line + end ──> AwaitCommand
//!                   │  │
//!                   │  └──(command)──> Execute ──> StreamResponse ──> AwaitCommand
//!                   │
//!                   ├──(exit/salir)──> SendFarewell ──> Terminated
//!                   └──(EOF / read error)──────────────> Terminated
//! ```
//!
//! One read is one command line. A command longer than a single read, or
//! two commands arriving in one read, are not separated.

use crate::daemon::config::ServerConfig;
use crate::daemon::protocol::{self, classify_command, CommandKind, Framing, FAREWELL};
use crate::error::ExecError;
use crate::executor::{
    ProcessRunner, ResponseStreamer, Spawner, StreamFailure, StreamReport, SystemSpawner,
};
use crate::lexer::Lexer;
use chrono::Local;
use std::io::{self, Read, Write};
use std::net::IpAddr;
use tracing::{debug, error, info, warn};

/// Identifier assigned by the connection loop, for logs only
pub type SessionId = u64;

/// Per-session settings derived from [`ServerConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub framing: Framing,
    pub chunk_size: usize,
    pub max_command_len: usize,
    pub empty_notice: bool,
}

impl From<&ServerConfig> for SessionOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            framing: config.framing,
            chunk_size: config.chunk_size,
            max_command_len: config.max_command_len,
            empty_notice: config.empty_notice,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client sent exit/salir and got the farewell
    ClientExit,
    /// Zero-byte read
    PeerClosed,
    ReadFailed(io::ErrorKind),
    WriteFailed(io::ErrorKind),
}

/// Counters reported when a session ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub end: SessionEnd,
    pub commands: u64,
    pub bytes_sent: u64,
}

pub struct Session<C, S = SystemSpawner> {
    id: SessionId,
    conn: C,
    peer: IpAddr,
    options: SessionOptions,
    runner: ProcessRunner<S>,
    streamer: ResponseStreamer,
    commands: u64,
    bytes_sent: u64,
}

impl<C: Read + Write> Session<C, SystemSpawner> {
    pub fn new(id: SessionId, conn: C, peer: IpAddr, options: SessionOptions) -> Self {
        Self::with_runner(id, conn, peer, options, ProcessRunner::new())
    }
}

impl<C: Read + Write, S: Spawner> Session<C, S> {
    pub fn with_runner(
        id: SessionId,
        conn: C,
        peer: IpAddr,
        options: SessionOptions,
        runner: ProcessRunner<S>,
    ) -> Self {
        Self {
            id,
            conn,
            peer,
            options,
            runner,
            streamer: ResponseStreamer::new(options.framing, options.chunk_size),
            commands: 0,
            bytes_sent: 0,
        }
    }

    /// Serve the connection until the client leaves or it breaks
    pub fn run(mut self) -> SessionSummary {
        let end = self.serve();

        match end {
            SessionEnd::ClientExit => info!(session = self.id, "Client requested disconnect"),
            SessionEnd::PeerClosed => info!(session = self.id, "Client disconnected"),
            SessionEnd::ReadFailed(kind) => {
                warn!(session = self.id, error = ?kind, "Session ended on read error")
            }
            SessionEnd::WriteFailed(kind) => {
                warn!(session = self.id, error = ?kind, "Session ended on write error")
            }
        }

        SessionSummary {
            end,
            commands: self.commands,
            bytes_sent: self.bytes_sent,
        }
    }

    fn serve(&mut self) -> SessionEnd {
        if let Err(e) = self.send_greeting() {
            return SessionEnd::WriteFailed(e.kind());
        }

        loop {
            let raw = match self.read_command() {
                Ok(Some(raw)) => raw,
                Ok(None) => return SessionEnd::PeerClosed,
                Err(e) => return SessionEnd::ReadFailed(e.kind()),
            };

            let turn = match classify_command(&raw) {
                CommandKind::Empty => {
                    debug!(session = self.id, "Empty command");
                    self.reply(&ExecError::EmptyCommand.to_wire_line())
                }
                CommandKind::Exit => {
                    return match self.send_farewell() {
                        Ok(()) => SessionEnd::ClientExit,
                        Err(e) => SessionEnd::WriteFailed(e.kind()),
                    };
                }
                CommandKind::Run(command) => self.execute(&command),
            };

            if let Err(e) = turn {
                return SessionEnd::WriteFailed(e.kind());
            }
        }
    }

    fn send_greeting(&mut self) -> io::Result<()> {
        let text = protocol::greeting(Local::now(), self.peer);
        self.conn.write_all(text.as_bytes())?;
        self.conn.flush()
    }

    fn send_farewell(&mut self) -> io::Result<()> {
        self.conn.write_all(FAREWELL.as_bytes())?;
        self.conn.flush()
    }

    /// One bounded read; None when the peer closed the connection
    fn read_command(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut buffer = vec![0u8; self.options.max_command_len.max(1)];

        loop {
            match self.conn.read(&mut buffer) {
                Ok(0) => return Ok(None),
                Ok(n) => {
                    buffer.truncate(n);
                    return Ok(Some(buffer));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Complete text response: line plus end of response
    fn reply(&mut self, text: &str) -> io::Result<()> {
        self.options.framing.write_text_response(&mut self.conn, text)
    }

    fn execute(&mut self, command: &str) -> io::Result<()> {
        info!(session = self.id, command, "Executing command");
        self.commands += 1;

        let argv = match Lexer::split_command(command) {
            Ok(argv) => argv,
            Err(e) => {
                let err = ExecError::from(e);
                error!(session = self.id, error = %err, "Tokenizer produced no program");
                return self.reply(&err.to_wire_line());
            }
        };

        let streamer = self.streamer;
        let conn = &mut self.conn;
        let empty_notice = self.options.empty_notice;

        let result = self.runner.run(&argv, |output| {
            if empty_notice {
                streamer.forward(output, conn)
            } else {
                streamer.stream(output, conn)
            }
        });

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err @ ExecError::Wait { .. }) => {
                error!(session = self.id, error = %err, "Failed to reap command");
                if empty_notice {
                    // the end of response is still owed
                    return self.options.framing.write_end(&mut self.conn);
                }
                return Ok(());
            }
            Err(err) => {
                warn!(session = self.id, error = %err, "Command could not be started");
                return self.reply(&err.to_wire_line());
            }
        };

        let mut report: StreamReport = outcome.drained;
        let exit = outcome.exit();

        if empty_notice {
            if report.bytes == 0 && report.failure.is_none() {
                let notice = if exit.success() {
                    format!("[Info] Comando '{}' ejecutado (sin salida)\n", command)
                } else {
                    format!("[Error] Comando '{}' falló\n", command)
                };
                self.streamer.append_text(&mut self.conn, &notice, &mut report);
            }
            self.streamer.finish(&mut self.conn, &mut report);
        }

        self.bytes_sent += report.bytes;
        info!(
            session = self.id,
            pid = outcome.pid,
            status = %exit,
            bytes = report.bytes,
            "Response sent"
        );

        if report.connection_lost() {
            let kind = match report.failure {
                Some(StreamFailure::Write(kind)) => kind,
                _ => io::ErrorKind::BrokenPipe,
            };
            return Err(io::Error::from(kind));
        }

        Ok(())
    }
}
